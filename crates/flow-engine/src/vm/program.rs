//! Compiled programs
//!
//! A [`Program`] is the code generator's output: bytecode handlers, the
//! constant pool they index, and the match tables built from it. Native
//! calls in bytecode use program-local ids; [`Program::link`] maps them to
//! runtime registry ids once, after which the program is immutable and may
//! be shared between any number of runners.

use std::any::Any;
use std::fmt::Write;
use std::sync::Arc;

use tracing::{debug, error};

use super::constants::ConstantPool;
use super::matcher::Match;
use super::opcode::Instruction;
use super::runner::Runner;
use super::runtime::Runtime;
use super::signature::Signature;
use super::{VmError, VmResult};
use crate::compiler::error::{CompileError, CompileResult};

/// Bytecode of one handler
#[derive(Debug, Clone)]
pub struct Handler {
    name: String,
    code: Vec<Instruction>,
    register_count: usize,
}

impl Handler {
    /// Create a handler from its code and frame size
    pub fn new(name: impl Into<String>, code: Vec<Instruction>, register_count: usize) -> Self {
        Self {
            name: name.into(),
            code,
            register_count,
        }
    }

    /// Handler name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Instructions
    pub fn code(&self) -> &[Instruction] {
        &self.code
    }

    /// Registers in the frame
    pub fn register_count(&self) -> usize {
        self.register_count
    }

    /// Human-readable listing, one instruction per line
    pub fn disassemble(&self) -> String {
        let mut out = String::new();
        writeln!(out, "handler {} ({} registers):", self.name, self.register_count).unwrap();
        for (pc, instr) in self.code.iter().enumerate() {
            writeln!(out, "  {:4}: {}", pc, instr).unwrap();
        }
        out
    }
}

/// A compiled, linkable program
#[derive(Debug)]
pub struct Program {
    constants: ConstantPool,
    handlers: Vec<Handler>,
    matchers: Vec<Match>,
    runtime: Option<Arc<Runtime>>,
    native_handlers: Vec<usize>,
    native_functions: Vec<usize>,
}

impl Program {
    /// Assemble a program, building every match table of `constants`
    pub fn new(constants: ConstantPool, handlers: Vec<Handler>) -> VmResult<Self> {
        let matchers = constants
            .match_defs()
            .iter()
            .map(|def| Match::new(def.clone(), &constants))
            .collect::<VmResult<Vec<_>>>()?;
        Ok(Self {
            constants,
            handlers,
            matchers,
            runtime: None,
            native_handlers: Vec::new(),
            native_functions: Vec::new(),
        })
    }

    /// Constant pool
    pub fn constants(&self) -> &ConstantPool {
        &self.constants
    }

    /// Handlers in definition order
    pub fn handlers(&self) -> &[Handler] {
        &self.handlers
    }

    /// Handler by index
    pub fn handler(&self, index: usize) -> Option<&Handler> {
        self.handlers.get(index)
    }

    /// Index of the handler called `name`
    pub fn find_handler(&self, name: &str) -> Option<usize> {
        self.handlers.iter().position(|h| h.name == name)
    }

    /// Match table by index
    pub fn matcher(&self, index: usize) -> Option<&Match> {
        self.matchers.get(index)
    }

    /// Runtime the program was linked against
    pub fn runtime(&self) -> Option<&Runtime> {
        self.runtime.as_deref()
    }

    /// Whether [`link`](Self::link) succeeded
    pub fn is_linked(&self) -> bool {
        self.runtime.is_some()
    }

    /// Runtime id of program-local native handler `local`
    pub fn native_handler_id(&self, local: usize) -> Option<usize> {
        self.native_handlers.get(local).copied()
    }

    /// Runtime id of program-local native function `local`
    pub fn native_function_id(&self, local: usize) -> Option<usize> {
        self.native_functions.get(local).copied()
    }

    /// Resolve every native signature the program uses against `runtime`
    ///
    /// Each missing signature is logged; the error lists all of them. A
    /// handler signature only resolves to a registered handler and a function
    /// signature only to a registered function.
    pub fn link(&mut self, runtime: Arc<Runtime>) -> CompileResult<()> {
        let mut unresolved = Vec::new();
        let handlers = resolve(
            &runtime,
            self.constants.native_handler_signatures(),
            true,
            &mut unresolved,
        );
        let functions = resolve(
            &runtime,
            self.constants.native_function_signatures(),
            false,
            &mut unresolved,
        );
        if !unresolved.is_empty() {
            return Err(CompileError::UnresolvedSymbols(unresolved));
        }

        debug!(
            handlers = handlers.len(),
            functions = functions.len(),
            "program linked"
        );
        self.native_handlers = handlers;
        self.native_functions = functions;
        self.runtime = Some(runtime);
        Ok(())
    }

    /// Run the handler called `name` to completion
    ///
    /// A suspension requested by a native callback ends the run with
    /// `Ok(false)`; use [`Runner`] directly to resume.
    pub fn run(&self, name: &str, userdata: Option<&mut dyn Any>) -> VmResult<bool> {
        let index = self
            .find_handler(name)
            .ok_or_else(|| VmError::UnknownHandler(name.to_string()))?;
        let mut runner = Runner::new(self, index);
        if let Some(userdata) = userdata {
            runner = runner.with_userdata(userdata);
        }
        runner.run()
    }

    /// Listing of every handler plus the native symbol tables
    pub fn disassemble(&self) -> String {
        let mut out = String::new();
        for (id, sig) in self.constants.native_handler_signatures().iter().enumerate() {
            writeln!(out, "; native handler n{} = {}", id, sig).unwrap();
        }
        for (id, sig) in self.constants.native_function_signatures().iter().enumerate() {
            writeln!(out, "; native function n{} = {}", id, sig).unwrap();
        }
        for (k, def) in self.constants.match_defs().iter().enumerate() {
            writeln!(
                out,
                "; match k{} ({}): {} cases, else {}",
                k,
                def.class,
                def.cases.len(),
                def.else_pc
            )
            .unwrap();
        }
        for handler in &self.handlers {
            out.push_str(&handler.disassemble());
        }
        out
    }
}

fn resolve(
    runtime: &Runtime,
    signatures: &[Signature],
    handlers: bool,
    unresolved: &mut Vec<String>,
) -> Vec<usize> {
    signatures
        .iter()
        .filter_map(|sig| {
            let found = runtime
                .callbacks()
                .iter()
                .position(|cb| cb.is_handler() == handlers && cb.signature() == sig);
            if found.is_none() {
                let kind = if handlers { "handler" } else { "function" };
                error!(signature = %sig, kind, "unresolved native symbol");
                unresolved.push(sig.to_string());
            }
            found
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::LiteralType;
    use crate::vm::opcode::{CodeWriter, Opcode};

    fn calling_program() -> Program {
        let mut pool = ConstantPool::new();
        let f = pool.add_native_function(Signature::with("answer", LiteralType::Number, vec![]));
        let mut w = CodeWriter::new();
        w.emit(Opcode::Call, f as u16, 0, 0);
        w.emit(Opcode::Exit, 1, 0, 0);
        Program::new(pool, vec![Handler::new("main", w.finish(), 2)]).unwrap()
    }

    #[test]
    fn test_link_reports_every_missing_symbol() {
        let mut pool = ConstantPool::new();
        pool.add_native_handler(Signature::with("deny", LiteralType::Boolean, vec![]));
        pool.add_native_function(Signature::with("len", LiteralType::Number, vec![]));
        let mut program = Program::new(pool, Vec::new()).unwrap();

        let err = program.link(Arc::new(Runtime::new())).unwrap_err();
        assert_eq!(
            err,
            CompileError::UnresolvedSymbols(vec!["deny()B".into(), "len()I".into()])
        );
        assert!(!program.is_linked());
    }

    #[test]
    fn test_link_distinguishes_handlers_from_functions() {
        let mut runtime = Runtime::new();
        runtime.register_function("answer", LiteralType::Number);
        runtime.register_handler("answer");

        let mut program = calling_program();
        program.link(Arc::new(runtime)).unwrap();
        assert_eq!(program.native_function_id(0), Some(0));
        assert_eq!(program.native_handler_id(0), None);
    }

    #[test]
    fn test_run_by_name() {
        let mut w = CodeWriter::new();
        w.emit(Opcode::Exit, 1, 0, 0);
        let handlers = vec![Handler::new("main", w.finish(), 0)];
        let program = Program::new(ConstantPool::new(), handlers).unwrap();
        assert_eq!(program.run("main", None), Ok(true));
        assert_eq!(
            program.run("other", None),
            Err(VmError::UnknownHandler("other".into()))
        );
    }

    #[test]
    fn test_disassemble() {
        let program = calling_program();
        let text = program.disassemble();
        assert!(text.contains("; native function n0 = answer()I"));
        assert!(text.contains("handler main (2 registers):"));
        assert!(text.contains("call       n0, 0, r0"));
    }
}
