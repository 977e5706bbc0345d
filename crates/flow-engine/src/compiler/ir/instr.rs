//! IR instructions
//!
//! Operand layouts by kind:
//!
//! | kind                  | operands                                  |
//! |-----------------------|-------------------------------------------|
//! | `Nop`                 | none                                      |
//! | `Alloca`              | `[size]`                                  |
//! | `Load`                | `[variable]`                              |
//! | `Store`               | `[variable, value]`                       |
//! | `ArraySet`            | `[array, index, value]`                   |
//! | `Vm(op)`              | `[inputs...]`                             |
//! | `Call`, `HandlerCall` | `[callee, args...]`                       |
//! | `Phi`                 | `[(value, predecessor)*]`                 |
//! | `Br`                  | `[target]`                                |
//! | `CondBr`              | `[condition, if_true, if_false]`          |
//! | `Ret`                 | `[result]`                                |
//! | `Match(class)`        | `[condition, default, (label, target)*]`  |

use super::value::{BlockId, ValueRef};
use crate::types::{LiteralType, MatchClass};
use crate::vm::opcode::Opcode;

/// Instruction kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstrKind {
    /// No operation
    Nop,
    /// Local variable (or local array of `size` elements)
    Alloca,
    /// Read a local variable
    Load,
    /// Write a local variable
    Store,
    /// Write one element of a local array
    ArraySet,
    /// Raw VM operation over its operands
    Vm(Opcode),
    /// Native function call
    Call,
    /// Native handler invocation; ends the run when the handler reports handled
    HandlerCall,
    /// SSA join
    Phi,
    /// Unconditional branch
    Br,
    /// Conditional branch
    CondBr,
    /// Return from the handler
    Ret,
    /// Multi-way dispatch
    Match(MatchClass),
}

impl InstrKind {
    /// Whether this kind ends a block
    pub fn is_terminator(self) -> bool {
        matches!(self, Self::Br | Self::CondBr | Self::Ret | Self::Match(_))
    }

    /// Mnemonic used by the pretty printer
    pub fn mnemonic(self) -> &'static str {
        match self {
            Self::Nop => "nop",
            Self::Alloca => "alloca",
            Self::Load => "load",
            Self::Store => "store",
            Self::ArraySet => "aset",
            Self::Vm(op) => op.mnemonic(),
            Self::Call => "call",
            Self::HandlerCall => "handler",
            Self::Phi => "phi",
            Self::Br => "br",
            Self::CondBr => "condbr",
            Self::Ret => "ret",
            Self::Match(MatchClass::Same) => "match.same",
            Self::Match(MatchClass::Head) => "match.head",
            Self::Match(MatchClass::Tail) => "match.tail",
            Self::Match(MatchClass::RegExp) => "match.re",
        }
    }
}

/// An instruction in a handler's arena
#[derive(Debug, Clone)]
pub struct Instruction {
    /// Kind
    pub kind: InstrKind,
    /// Result type (`Void` when nothing is produced)
    pub ty: LiteralType,
    /// Value name; empty for terminators
    pub name: String,
    /// Owning block
    pub block: BlockId,
    pub(crate) operands: Vec<ValueRef>,
}

impl Instruction {
    /// Operands in slot order
    pub fn operands(&self) -> &[ValueRef] {
        &self.operands
    }

    /// Operand at `index`
    pub fn operand(&self, index: usize) -> Option<ValueRef> {
        self.operands.get(index).copied()
    }

    /// Whether this instruction ends its block
    pub fn is_terminator(&self) -> bool {
        self.kind.is_terminator()
    }

    /// Whether this instruction produces a value other instructions can use
    pub fn produces_value(&self) -> bool {
        !self.is_terminator() && self.ty != LiteralType::Void
    }

    /// Block operands, in slot order; duplicates are kept
    pub fn successors(&self) -> Vec<BlockId> {
        if !self.is_terminator() {
            return Vec::new();
        }
        self.operands.iter().filter_map(|v| v.as_block()).collect()
    }

    /// `(value, predecessor)` pairs of a `Phi`
    pub fn phi_incoming(&self) -> Vec<(ValueRef, BlockId)> {
        if self.kind != InstrKind::Phi {
            return Vec::new();
        }
        self.operands
            .chunks(2)
            .filter_map(|pair| match pair {
                [value, ValueRef::Block(pred)] => Some((*value, *pred)),
                _ => None,
            })
            .collect()
    }

    /// `(label, target)` pairs of a `Match`
    pub fn match_cases(&self) -> Vec<(ValueRef, BlockId)> {
        if !matches!(self.kind, InstrKind::Match(_)) {
            return Vec::new();
        }
        self.operands
            .get(2..)
            .unwrap_or(&[])
            .chunks(2)
            .filter_map(|pair| match pair {
                [label, ValueRef::Block(target)] => Some((*label, *target)),
                _ => None,
            })
            .collect()
    }
}
