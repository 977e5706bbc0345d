//! Flow virtual machine
//!
//! Register-based bytecode interpreter for compiled handlers:
//! - Bytecode format and opcodes (`opcode`)
//! - Constant pool and match tables (`constants`, `matcher`)
//! - Linked programs (`program`) and per-invocation runners (`runner`)
//! - Native callbacks and their registry (`signature`, `native`, `runtime`)

pub mod constants;
pub mod matcher;
pub mod native;
pub mod opcode;
pub mod program;
pub mod runner;
pub mod runtime;
pub mod signature;
pub mod value;

pub use constants::{ConstantPool, MatchCaseDef, MatchDef};
pub use matcher::{Match, MatchHead, MatchRegExp, MatchSame, MatchTail, RegExpContext};
pub use native::{Attributes, NativeCallback, NativeFn, Params, Verifier};
pub use opcode::{CodeWriter, Instruction, Opcode};
pub use program::{Handler, Program};
pub use runner::{Runner, RunnerOptions, RunnerState};
pub use runtime::Runtime;
pub use signature::{Signature, SignatureError};
pub use value::Value;

use thiserror::Error;

/// VM execution errors
///
/// Any of these traps the runner that raised it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VmError {
    /// Undecodable opcode
    #[error("invalid opcode: {0:#06x}")]
    InvalidOpcode(u16),

    /// Native id outside the runtime's registry
    #[error("invalid native callback id: {0}")]
    InvalidNativeId(usize),

    /// Register index outside the frame
    #[error("invalid register: r{0}")]
    InvalidRegister(u16),

    /// Constant pool index out of range
    #[error("invalid constant index: {0}")]
    InvalidConstant(u16),

    /// Jump target outside the code
    #[error("invalid jump target: {0}")]
    InvalidJump(usize),

    /// Operand had the wrong type
    #[error("type error: {0}")]
    TypeError(String),

    /// Program contains native calls but was never linked
    #[error("program is not linked")]
    NotLinked,

    /// No handler with that name or index
    #[error("unknown handler: {0}")]
    UnknownHandler(String),

    /// Integer division or remainder by zero
    #[error("division by zero")]
    DivisionByZero,

    /// Configured instruction budget exhausted
    #[error("instruction limit exceeded ({0})")]
    InstructionLimitExceeded(u64),

    /// Operation not allowed in the runner's current state
    #[error("invalid runner state for this operation: {0}")]
    InvalidState(String),

    /// `alloca` asked for an array longer than the configured limit
    #[error("array of {size} elements exceeds the limit of {limit}")]
    ArrayTooLarge {
        /// Requested length
        size: i64,
        /// Configured limit
        limit: usize,
    },

    /// A native callback reported failure
    #[error("native callback failed: {0}")]
    Native(String),
}

/// Result type for VM operations
pub type VmResult<T> = Result<T, VmError>;
