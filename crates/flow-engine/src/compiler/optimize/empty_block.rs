//! Empty block elimination

use tracing::trace;

use super::HandlerPass;
use crate::compiler::ir::{BlockId, InstrKind, IrConstantPool, IrHandler, ValueRef};

/// Removes blocks that consist of nothing but `br target`
///
/// Every edge into such a block is redirected to its target, and a `phi` in
/// the target takes the forwarded value from each of those predecessors.
/// When the entry block is the forwarding block, its target becomes the new
/// entry. A block branching to itself is left alone, and so is one whose
/// predecessors already reach a `phi` target directly.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptyBlockElimination;

impl HandlerPass for EmptyBlockElimination {
    fn name(&self) -> &str {
        "empty-block-elimination"
    }

    fn run(&mut self, handler: &mut IrHandler, _constants: &IrConstantPool) -> bool {
        let mut changed = false;
        // predecessors are recomputed after every elimination
        while let Some((block, target)) = find_forwarding_block(handler) {
            trace!(handler = handler.name(), %block, %target, "eliminating empty block");
            forward_phi_incoming(handler, block, target);
            handler.replace_all_uses_with(ValueRef::Block(block), ValueRef::Block(target));
            if handler.entry_block() == Some(block) {
                handler.set_entry_block(target);
            }
            handler.erase_block(block);
            changed = true;
        }
        changed
    }
}

/// First block in layout order whose only instruction is `br T`, with `T`
fn find_forwarding_block(handler: &IrHandler) -> Option<(BlockId, BlockId)> {
    handler.blocks().iter().find_map(|&b| {
        let target = forwarding_target(handler, b)?;
        (target != b && keeps_phi_edges(handler, b, target)).then_some((b, target))
    })
}

/// Whether `target`'s phis can take `block`'s predecessors as their own
fn keeps_phi_edges(handler: &IrHandler, block: BlockId, target: BlockId) -> bool {
    if !handler.has_phi(target) {
        return true;
    }
    let preds = handler.predecessors(block);
    let direct = handler.predecessors(target);
    !preds.is_empty() && !preds.iter().any(|p| direct.contains(p))
}

/// Re-key the pairs of `target`'s phis arriving from `block` to each of
/// `block`'s predecessors
fn forward_phi_incoming(handler: &mut IrHandler, block: BlockId, target: BlockId) {
    let mut preds = Vec::new();
    for pred in handler.predecessors(block) {
        if !preds.contains(&pred) {
            preds.push(pred);
        }
    }
    for phi in handler.phis(target) {
        let forwarded = handler[phi]
            .phi_incoming()
            .into_iter()
            .find(|&(_, p)| p == block);
        let Some((value, _)) = forwarded else {
            continue;
        };
        handler.remove_phi_incoming(phi, block);
        for &pred in &preds {
            handler.add_phi_incoming(phi, value, pred);
        }
    }
}

fn forwarding_target(handler: &IrHandler, block: BlockId) -> Option<BlockId> {
    match handler.block_instrs(block) {
        [only] => {
            let instr = handler.instr(*only)?;
            if instr.kind != InstrKind::Br {
                return None;
            }
            instr.operand(0)?.as_block()
        }
        _ => None,
    }
}
