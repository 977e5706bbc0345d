//! Branch and terminator simplification

use tracing::trace;

use super::HandlerPass;
use crate::compiler::ir::{BlockId, ConstantKind, InstrKind, IrConstantPool, IrHandler, ValueRef};

/// Simplifies terminators and drops dead pure calls, block by block
///
/// Sub-transforms:
/// - `condbr c, T, T` becomes `br T`
/// - `condbr <const>, T, F` becomes `br` to the statically chosen target
/// - `br T` where this block is T's only predecessor absorbs T; T's phis
///   collapse to their single incoming value
/// - `br T` where T holds only a `ret` becomes a copy of that `ret`
/// - unused results of side-effect free native calls are removed
#[derive(Debug, Default, Clone, Copy)]
pub struct InstructionElimination;

impl HandlerPass for InstructionElimination {
    fn name(&self) -> &str {
        "instruction-elimination"
    }

    fn run(&mut self, handler: &mut IrHandler, constants: &IrConstantPool) -> bool {
        let mut changed = false;
        loop {
            let mut swept = false;
            for block in handler.blocks().to_vec() {
                if !handler.contains_block(block) {
                    continue;
                }
                swept |= rewrite_cond_br_to_same_branches(handler, block);
                swept |= eliminate_unused_instr(handler, constants, block);
                swept |= eliminate_linear_br(handler, block);
                swept |= fold_constant_cond_br(handler, constants, block);
                swept |= branch_to_exit(handler, block);
            }
            if !swept {
                return changed;
            }
            changed = true;
        }
    }
}

/// Terminator of `block` if it has kind `kind`, with its operands
fn terminator_of(handler: &IrHandler, block: BlockId, kind: InstrKind) -> Option<Vec<ValueRef>> {
    let term = handler.terminator(block)?;
    let instr = handler.instr(term)?;
    (instr.kind == kind).then(|| instr.operands().to_vec())
}

/// `condbr c, T, T` becomes `br T`
pub fn rewrite_cond_br_to_same_branches(handler: &mut IrHandler, block: BlockId) -> bool {
    let Some(ops) = terminator_of(handler, block, InstrKind::CondBr) else {
        return false;
    };
    if ops.len() != 3 || ops[1] != ops[2] {
        return false;
    }
    trace!(%block, "rewriting condbr with identical targets");
    handler.replace_terminator(block, InstrKind::Br, vec![ops[1]]);
    true
}

/// `condbr <const bool>, T, F` becomes `br T` or `br F`
pub fn fold_constant_cond_br(handler: &mut IrHandler, constants: &IrConstantPool, block: BlockId) -> bool {
    let Some(ops) = terminator_of(handler, block, InstrKind::CondBr) else {
        return false;
    };
    let Some(cond) = ops
        .first()
        .and_then(|v| v.as_const())
        .and_then(|c| constants.get_bool(c))
    else {
        return false;
    };
    let (target, dropped) = if cond { (ops[1], ops[2]) } else { (ops[2], ops[1]) };
    trace!(%block, cond, "folding constant condbr");
    handler.replace_terminator(block, InstrKind::Br, vec![target]);
    if let Some(dropped) = dropped.as_block().filter(|&d| ValueRef::Block(d) != target) {
        for phi in handler.phis(dropped) {
            handler.remove_phi_incoming(phi, block);
        }
    }
    true
}

/// `br T` where `block` is T's only predecessor: T's code moves into `block`
pub fn eliminate_linear_br(handler: &mut IrHandler, block: BlockId) -> bool {
    let Some(ops) = terminator_of(handler, block, InstrKind::Br) else {
        return false;
    };
    let Some(target) = ops.first().and_then(|v| v.as_block()) else {
        return false;
    };
    if target == block || handler.entry_block() == Some(target) {
        return false;
    }
    if handler.predecessors(target) != [block] {
        return false;
    }
    let mut collapsed = Vec::new();
    for phi in handler.phis(target) {
        match handler[phi].phi_incoming().as_slice() {
            [(value, _)] => collapsed.push((phi, *value)),
            _ => return false,
        }
    }

    trace!(%block, %target, "merging linear successor");
    for (phi, value) in collapsed {
        handler.replace_all_uses_with(phi.into(), value);
        handler.erase_instr(phi);
    }
    if let Some(br) = handler.terminator(block) {
        handler.erase_instr(br);
    }
    handler.move_instrs(target, block);
    // phis further down now see `block` as their predecessor
    handler.replace_all_uses_with(target.into(), block.into());
    handler.erase_block(target);
    true
}

/// `br T` where T is a lone `ret` becomes that `ret`
pub fn branch_to_exit(handler: &mut IrHandler, block: BlockId) -> bool {
    let Some(ops) = terminator_of(handler, block, InstrKind::Br) else {
        return false;
    };
    let Some(target) = ops.first().and_then(|v| v.as_block()) else {
        return false;
    };
    let ret = match handler.block_instrs(target) {
        [only] => match handler.instr(*only) {
            Some(instr) if instr.kind == InstrKind::Ret => instr.operands().to_vec(),
            _ => return false,
        },
        _ => return false,
    };

    trace!(%block, %target, "inlining branch to exit block");
    handler.replace_terminator(block, InstrKind::Ret, ret);
    true
}

/// Removes unused value-producing calls to side-effect free natives
pub fn eliminate_unused_instr(handler: &mut IrHandler, constants: &IrConstantPool, block: BlockId) -> bool {
    let dead: Vec<_> = handler
        .block_instrs(block)
        .iter()
        .copied()
        .filter(|&id| {
            let Some(instr) = handler.instr(id) else {
                return false;
            };
            if instr.kind != InstrKind::Call || !instr.produces_value() || handler.is_used(id) {
                return false;
            }
            matches!(
                instr.operand(0).and_then(|v| v.as_const()).and_then(|c| constants.kind(c)),
                Some(ConstantKind::BuiltinFunction(f)) if f.is_read_only()
            )
        })
        .collect();

    for &id in &dead {
        trace!(%id, "removing unused pure call");
        handler.erase_instr(id);
    }
    !dead.is_empty()
}
