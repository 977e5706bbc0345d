//! Flow Language Engine
//!
//! Middle and back end of the Flow routing language:
//! - **Compiler**: IR, optimization passes, and bytecode generation (`compiler` module)
//! - **VM**: bytecode, match tables, runner, and the native callback registry (`vm` module)
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use flow_engine::{Compiler, CompileOptions, IrBuilder, IrProgram, LiteralType, Runtime};
//!
//! let mut runtime = Runtime::new();
//! runtime
//!     .register_handler("deny")
//!     .bind(|params| params.set_result(true));
//!
//! let mut program = IrProgram::new();
//! let callee = program.get_native(runtime.find("deny()B").unwrap());
//! let mut b = IrBuilder::new(&mut program);
//! b.create_handler("main");
//! let entry = b.create_block("entry");
//! b.set_insert_point(entry);
//! b.create_invoke_handler(callee, vec![]);
//! let f = b.get_boolean(false);
//! b.create_ret(f);
//!
//! let compiled = Compiler::new(CompileOptions::default())
//!     .compile_and_link(program, Arc::new(runtime))
//!     .unwrap();
//! assert_eq!(compiled.run("main", None), Ok(true));
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

/// Literal types, match classes, and CIDR networks
pub mod types;

/// Compiler module: IR, optimizations, and bytecode generation
pub mod compiler;

/// VM module: bytecode interpreter and native callbacks
pub mod vm;

// ============================================================================
// Re-exports
// ============================================================================

pub use types::{Cidr, CidrParseError, FlowNumber, LiteralType, MatchClass};

pub use compiler::{
    // IR
    ir,
    IrBuilder, IrHandler, IrProgram, PrettyPrint,
    // Passes
    HandlerPass, PassManager,
    // Code generation
    TargetCodeGenerator,
    // Compiler
    CompileError, CompileOptions, CompileResult, Compiler,
};

pub use vm::{
    // Bytecode
    CodeWriter, Instruction, Opcode,
    // Programs and execution
    Handler, Program, Runner, RunnerOptions, RunnerState, Value, VmError, VmResult,
    // Native callbacks
    Attributes, NativeCallback, Params, Runtime, Signature, SignatureError,
};
