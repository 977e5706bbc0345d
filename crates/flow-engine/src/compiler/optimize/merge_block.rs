//! Merging of structurally identical blocks

use tracing::trace;

use super::HandlerPass;
use crate::compiler::ir::{BlockId, IrConstantPool, IrHandler, ValueRef};

/// Folds duplicate blocks into the earliest equal block in layout order
///
/// Two blocks are equal when their instructions match pairwise in kind,
/// type and operands. Operands defined inside a block compare by position,
/// a branch back to the block itself compares equal to the other block's
/// branch to itself, and everything else compares by identity. The entry
/// block, blocks whose values escape, and blocks holding or feeding a `phi`
/// are never folded away.
#[derive(Debug, Default, Clone, Copy)]
pub struct MergeBlockPass;

impl HandlerPass for MergeBlockPass {
    fn name(&self) -> &str {
        "merge-block"
    }

    fn run(&mut self, handler: &mut IrHandler, _constants: &IrConstantPool) -> bool {
        let mut changed = false;
        while let Some((canonical, duplicate)) = find_duplicate(handler) {
            trace!(%canonical, %duplicate, "merging identical blocks");
            handler.replace_all_uses_with(duplicate.into(), canonical.into());
            handler.erase_block(duplicate);
            changed = true;
        }
        changed
    }
}

fn find_duplicate(handler: &IrHandler) -> Option<(BlockId, BlockId)> {
    let layout = handler.blocks();
    for (n, &duplicate) in layout.iter().enumerate() {
        if !is_mergeable(handler, duplicate) {
            continue;
        }
        if let Some(&canonical) = layout[..n]
            .iter()
            .find(|&&c| equivalent(handler, c, duplicate))
        {
            return Some((canonical, duplicate));
        }
    }
    None
}

fn is_mergeable(handler: &IrHandler, block: BlockId) -> bool {
    handler.entry_block() != Some(block)
        && !handler.has_external_uses(block)
        && !handler.has_phi(block)
        && !handler.successors(block).iter().any(|&s| handler.has_phi(s))
}

/// Position of `value` inside `block`, if it is an instruction of it
fn local_position(handler: &IrHandler, block: BlockId, value: ValueRef) -> Option<usize> {
    let id = value.as_instr()?;
    handler.block_instrs(block).iter().position(|&i| i == id)
}

fn same_operand(handler: &IrHandler, a: BlockId, b: BlockId, x: ValueRef, y: ValueRef) -> bool {
    match (local_position(handler, a, x), local_position(handler, b, y)) {
        (Some(px), Some(py)) => return px == py,
        (None, None) => {}
        _ => return false,
    }
    if x == ValueRef::Block(a) && y == ValueRef::Block(b) {
        return true;
    }
    x == y
}

/// Whether blocks `a` and `b` compute the same thing and leave the same way
pub fn equivalent(handler: &IrHandler, a: BlockId, b: BlockId) -> bool {
    let ia = handler.block_instrs(a);
    let ib = handler.block_instrs(b);
    if a == b || ia.len() != ib.len() || ia.is_empty() {
        return false;
    }

    ia.iter().zip(ib).all(|(&x, &y)| {
        let (Some(x), Some(y)) = (handler.instr(x), handler.instr(y)) else {
            return false;
        };
        x.kind == y.kind
            && x.ty == y.ty
            && x.operands().len() == y.operands().len()
            && x.operands()
                .iter()
                .zip(y.operands())
                .all(|(&u, &v)| same_operand(handler, a, b, u, v))
    })
}
