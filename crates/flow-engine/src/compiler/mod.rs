//! Flow compiler back end
//!
//! Turns an [`IrProgram`] built through [`IrBuilder`] into an executable
//! [`Program`]:
//!
//! 1. validate the IR
//! 2. run the optimization passes for the configured level to a fixpoint
//! 3. validate again
//! 4. lower every handler to bytecode
//!
//! Linking against a native [`Runtime`] is a separate step so one compiled
//! program can be checked against several registries. When a runtime is at
//! hand up front, [`Compiler::compile_and_link`] also runs each callback's
//! verifier over its call sites before optimizing.

pub mod codegen;
pub mod error;
pub mod ir;
pub mod optimize;
pub mod options;

pub use codegen::TargetCodeGenerator;
pub use error::{CompileError, CompileResult};
pub use ir::{IrBuilder, IrHandler, IrProgram, PrettyPrint};
pub use optimize::{HandlerPass, PassManager};
pub use options::CompileOptions;

use std::sync::Arc;

use tracing::{debug, error};

use crate::vm::{Program, Runtime};
use ir::{ConstantKind, InstrKind};

/// Compiler pipeline
#[derive(Debug, Clone, Default)]
pub struct Compiler {
    options: CompileOptions,
}

impl Compiler {
    /// Create a compiler with the given options
    pub fn new(options: CompileOptions) -> Self {
        Self { options }
    }

    /// Options in use
    pub fn options(&self) -> &CompileOptions {
        &self.options
    }

    /// Optimize and generate code for `program`
    pub fn compile(&self, mut program: IrProgram) -> CompileResult<Program> {
        self.validate(&program)?;

        let mut passes = PassManager::for_level(self.options.optimization_level);
        let changed = passes.run(&mut program);
        debug!(
            level = self.options.optimization_level,
            passes = ?passes.pass_names(),
            changed,
            "optimized program"
        );

        self.validate(&program)?;
        TargetCodeGenerator::new(&program).generate()
    }

    /// Verify native call sites, [`compile`](Self::compile), then link
    /// against `runtime`
    pub fn compile_and_link(&self, program: IrProgram, runtime: Arc<Runtime>) -> CompileResult<Program> {
        self.verify_native_calls(&program, &runtime)?;
        let mut compiled = self.compile(program)?;
        compiled.link(runtime)?;
        Ok(compiled)
    }

    /// Run the registered verifier of every `call`/`handler` target
    ///
    /// Callees missing from `runtime` are left for linking to report.
    pub fn verify_native_calls(&self, program: &IrProgram, runtime: &Runtime) -> CompileResult<()> {
        let constants = program.constants();
        let mut rejected = Vec::new();
        for handler in program.handlers() {
            for &block in handler.blocks() {
                for &id in handler.block_instrs(block) {
                    let Some(instr) = handler.instr(id) else { continue };
                    let is_handler = match instr.kind {
                        InstrKind::Call => false,
                        InstrKind::HandlerCall => true,
                        _ => continue,
                    };
                    let Some(callee) = instr.operands().first().and_then(|op| op.as_const()) else {
                        continue;
                    };
                    let builtin = match constants.kind(callee) {
                        Some(ConstantKind::BuiltinFunction(b) | ConstantKind::BuiltinHandler(b)) => b,
                        _ => continue,
                    };
                    let Some(native) = runtime
                        .find_signature(&builtin.signature)
                        .filter(|cb| cb.is_handler() == is_handler)
                    else {
                        continue;
                    };
                    if !native.verify(handler, id, constants) {
                        error!(handler = handler.name(), callee = %builtin.signature, "native call rejected");
                        rejected.push(format!("{}: call to {} rejected", handler.name(), builtin.signature));
                    }
                }
            }
        }
        if rejected.is_empty() {
            Ok(())
        } else {
            Err(CompileError::VerificationFailed(rejected))
        }
    }

    fn validate(&self, program: &IrProgram) -> CompileResult<()> {
        if !self.options.validate {
            return Ok(());
        }
        program.validate().map_err(CompileError::InvalidIr)
    }
}
