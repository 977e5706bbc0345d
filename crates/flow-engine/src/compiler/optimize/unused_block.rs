//! Unreachable block removal

use rustc_hash::FxHashSet;
use tracing::trace;

use super::HandlerPass;
use crate::compiler::ir::{BlockId, IrConstantPool, IrHandler};

/// Erases every block not reachable from the entry block
///
/// Predecessor-less blocks and dead cycles are found by one reachability
/// walk and erased together, so no surviving operand names an erased block.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnusedBlockPass;

impl HandlerPass for UnusedBlockPass {
    fn name(&self) -> &str {
        "unused-block"
    }

    fn run(&mut self, handler: &mut IrHandler, _constants: &IrConstantPool) -> bool {
        let Some(entry) = handler.entry_block() else {
            return false;
        };

        let reachable = reachable_from(handler, entry);
        let dead: Vec<BlockId> = handler
            .blocks()
            .iter()
            .copied()
            .filter(|b| !reachable.contains(b))
            .collect();
        if dead.is_empty() {
            return false;
        }

        trace!(handler = handler.name(), count = dead.len(), "erasing unreachable blocks");
        handler.erase_blocks(&dead);
        true
    }
}

/// Blocks reachable from `start` along successor edges
pub fn reachable_from(handler: &IrHandler, start: BlockId) -> FxHashSet<BlockId> {
    let mut seen = FxHashSet::default();
    let mut stack = vec![start];
    while let Some(b) = stack.pop() {
        if !seen.insert(b) {
            continue;
        }
        stack.extend(handler.successors(b).into_iter().filter(|s| !seen.contains(s)));
    }
    seen
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::ir::{IrBuilder, IrProgram};

    #[test]
    fn test_removes_predecessor_less_block() {
        let mut program = IrProgram::new();
        let mut b = IrBuilder::new(&mut program);
        b.create_handler("main");
        let entry = b.create_block("entry");
        let orphan = b.create_block("orphan");
        let t = b.get_boolean(true);
        b.set_insert_point(entry);
        b.create_ret(t);
        b.set_insert_point(orphan);
        b.create_ret(t);

        let (handlers, constants) = program.split_mut();
        let h = &mut handlers[0];
        assert!(UnusedBlockPass.run(h, constants));
        assert_eq!(h.blocks(), &[entry]);
        assert!(!UnusedBlockPass.run(h, constants));
    }

    #[test]
    fn test_removes_dead_cycle() {
        let mut program = IrProgram::new();
        let mut b = IrBuilder::new(&mut program);
        b.create_handler("main");
        let entry = b.create_block("entry");
        let x = b.create_block("x");
        let y = b.create_block("y");
        let t = b.get_boolean(true);
        b.set_insert_point(entry);
        b.create_ret(t);
        b.set_insert_point(x);
        b.create_br(y);
        b.set_insert_point(y);
        b.create_br(x);

        let (handlers, constants) = program.split_mut();
        let h = &mut handlers[0];
        assert!(UnusedBlockPass.run(h, constants));
        assert_eq!(h.blocks(), &[entry]);
        assert!(h.validate().is_ok());
    }

    #[test]
    fn test_keeps_reachable_loop() {
        let mut program = IrProgram::new();
        let mut b = IrBuilder::new(&mut program);
        b.create_handler("main");
        let entry = b.create_block("entry");
        let head = b.create_block("head");
        let exit = b.create_block("exit");
        let t = b.get_boolean(true);
        b.set_insert_point(entry);
        b.create_br(head);
        b.set_insert_point(head);
        b.create_cond_br(t, head, exit);
        b.set_insert_point(exit);
        b.create_ret(t);

        let (handlers, constants) = program.split_mut();
        assert!(!UnusedBlockPass.run(&mut handlers[0], constants));
    }
}
