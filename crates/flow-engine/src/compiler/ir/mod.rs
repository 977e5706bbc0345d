//! Intermediate Representation (IR) for Flow
//!
//! The IR sits between the front end's syntax tree and VM bytecode. Handlers
//! are control-flow graphs of basic blocks over an arena of instructions.
//!
//! # Structure
//!
//! - `IrProgram` - Handlers of one compilation unit plus shared constants
//! - `IrHandler` - Block and instruction arenas with use-lists
//! - `BasicBlock` - Instructions ending in exactly one terminator
//! - `Instruction` - One operation over `ValueRef` operands
//! - `IrBuilder` - Construction API used by the front end

pub mod block;
pub mod builder;
pub mod constant;
pub mod handler;
pub mod instr;
pub mod pretty;
pub mod program;
pub mod value;

pub use block::BasicBlock;
pub use builder::IrBuilder;
pub use constant::{Builtin, Constant, ConstantArray, ConstantKind, IrConstantPool};
pub use handler::{IrHandler, SourceLocation};
pub use instr::{InstrKind, Instruction};
pub use pretty::PrettyPrint;
pub use program::{value_type, IrProgram};
pub use value::{BlockId, ConstId, InstrId, Namer, ValueRef};
