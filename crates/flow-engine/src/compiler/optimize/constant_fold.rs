//! Constant folding
//!
//! Evaluates VM value operations whose operands are all constants, using the
//! VM's own evaluator so folded and executed results cannot diverge.

use std::sync::Arc;

use crate::compiler::ir::ConstantKind;
use crate::vm::opcode::Opcode;
use crate::vm::runner::eval_pure;
use crate::vm::value::Value;

/// Fold `op` over constant operands
///
/// Returns `None` when the operation is not foldable (regex captures,
/// division by zero, operand type mismatch, non-scalar result).
pub fn fold_vm(op: Opcode, operands: &[&ConstantKind]) -> Option<ConstantKind> {
    if matches!(op, Opcode::Sregmatch | Opcode::Sreggroup) {
        return None;
    }
    if op.operand_count() != Some(operands.len()) {
        return None;
    }

    let values = operands
        .iter()
        .map(|c| to_value(c))
        .collect::<Option<Vec<_>>>()?;
    let rhs = values.get(1).cloned().unwrap_or(Value::Void);
    let result = eval_pure(op, &values[0], &rhs).ok()?;
    from_value(result)
}

fn to_value(kind: &ConstantKind) -> Option<Value> {
    match kind {
        ConstantKind::Boolean(b) => Some(Value::Boolean(*b)),
        ConstantKind::Number(n) => Some(Value::Number(*n)),
        ConstantKind::String(s) => Some(Value::String(Arc::from(s.as_str()))),
        ConstantKind::IpAddress(ip) => Some(Value::IpAddress(*ip)),
        ConstantKind::Cidr(c) => Some(Value::Cidr(*c)),
        _ => None,
    }
}

fn from_value(value: Value) -> Option<ConstantKind> {
    match value {
        Value::Boolean(b) => Some(ConstantKind::Boolean(b)),
        Value::Number(n) => Some(ConstantKind::Number(n)),
        Value::String(s) => Some(ConstantKind::String(s.to_string())),
        _ => None,
    }
}
