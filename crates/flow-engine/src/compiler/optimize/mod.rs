//! IR optimization passes
//!
//! A pass transforms one handler's block graph and reports whether it changed
//! anything. The `PassManager` runs its pass list over a handler until a full
//! sweep makes no change, then moves on to the next handler.

pub mod constant_fold;
pub mod empty_block;
pub mod instruction_elimination;
pub mod merge_block;
pub mod unused_block;

pub use empty_block::EmptyBlockElimination;
pub use instruction_elimination::InstructionElimination;
pub use merge_block::MergeBlockPass;
pub use unused_block::UnusedBlockPass;

use tracing::debug;

use crate::compiler::ir::{IrConstantPool, IrHandler, IrProgram};

/// A transformation over one handler
///
/// Passes must leave every block terminated and every use-list consistent,
/// must not depend on block order, and must eventually return `false` when
/// re-run on their own output.
pub trait HandlerPass {
    /// Name for diagnostics
    fn name(&self) -> &str;

    /// Transform `handler`; returns whether anything changed
    fn run(&mut self, handler: &mut IrHandler, constants: &IrConstantPool) -> bool;
}

/// Ordered pass list run to a fixpoint
#[derive(Default)]
pub struct PassManager {
    passes: Vec<Box<dyn HandlerPass>>,
}

impl PassManager {
    /// Manager with no passes
    pub fn new() -> Self {
        Self::default()
    }

    /// Pass list for an optimization level
    ///
    /// Unreachable-block removal always runs; level 1 and above add block
    /// merging, empty-block elimination, and branch simplification.
    pub fn for_level(level: u8) -> Self {
        let mut pm = Self::new();
        pm.register_pass(Box::new(UnusedBlockPass));
        if level >= 1 {
            pm.register_pass(Box::new(MergeBlockPass));
            pm.register_pass(Box::new(EmptyBlockElimination));
            pm.register_pass(Box::new(InstructionElimination));
        }
        pm
    }

    /// Append a pass; registration order is execution order
    pub fn register_pass(&mut self, pass: Box<dyn HandlerPass>) {
        self.passes.push(pass);
    }

    /// Names of registered passes in order
    pub fn pass_names(&self) -> Vec<&str> {
        self.passes.iter().map(|p| p.name()).collect()
    }

    /// Number of registered passes
    pub fn len(&self) -> usize {
        self.passes.len()
    }

    /// Whether no pass is registered
    pub fn is_empty(&self) -> bool {
        self.passes.is_empty()
    }

    /// Run the pass list over `handler` until a sweep changes nothing
    ///
    /// Returns whether any pass changed the handler.
    pub fn run_handler(&mut self, handler: &mut IrHandler, constants: &IrConstantPool) -> bool {
        let mut any = false;
        loop {
            let mut changed = false;
            for pass in &mut self.passes {
                if pass.run(handler, constants) {
                    debug!(pass = pass.name(), handler = handler.name(), "pass modified handler");
                    changed = true;
                }
            }
            if !changed {
                break;
            }
            any = true;
        }
        any
    }

    /// Run the handler fixpoint for every handler, in program order
    pub fn run(&mut self, program: &mut IrProgram) -> bool {
        let (handlers, constants) = program.split_mut();
        let mut any = false;
        for handler in handlers {
            any |= self.run_handler(handler, constants);
        }
        any
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::ir::{IrBuilder, IrProgram};

    struct CountDown {
        remaining: usize,
    }

    impl HandlerPass for CountDown {
        fn name(&self) -> &str {
            "countdown"
        }

        fn run(&mut self, _: &mut IrHandler, _: &IrConstantPool) -> bool {
            if self.remaining > 0 {
                self.remaining -= 1;
                true
            } else {
                false
            }
        }
    }

    fn trivial_program() -> IrProgram {
        let mut program = IrProgram::new();
        let mut b = IrBuilder::new(&mut program);
        b.create_handler("main");
        let entry = b.create_block("entry");
        b.set_insert_point(entry);
        let t = b.get_boolean(true);
        b.create_ret(t);
        program
    }

    #[test]
    fn test_fixpoint_restarts_full_sweep() {
        let mut program = trivial_program();
        let mut pm = PassManager::new();
        pm.register_pass(Box::new(CountDown { remaining: 3 }));
        assert!(pm.run(&mut program));
        // three modifying sweeps plus one clean sweep
        assert!(!pm.run(&mut program));
    }

    #[test]
    fn test_levels() {
        assert_eq!(PassManager::for_level(0).pass_names(), vec!["unused-block"]);
        assert_eq!(
            PassManager::for_level(1).pass_names(),
            vec![
                "unused-block",
                "merge-block",
                "empty-block-elimination",
                "instruction-elimination"
            ]
        );
    }

    #[test]
    fn test_unchanged_program_reports_false() {
        let mut program = trivial_program();
        assert!(!PassManager::for_level(1).run(&mut program));
    }
}
