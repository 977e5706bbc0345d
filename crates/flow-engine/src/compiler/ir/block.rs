//! Basic blocks
//!
//! A block is a name plus the ordered ids of its instructions. Everything
//! else (terminator, successors, predecessors) is derived through the owning
//! [`IrHandler`](super::IrHandler), which also owns the instruction arena.

use super::value::InstrId;

/// A straight-line instruction sequence ending in one terminator
#[derive(Debug, Clone)]
pub struct BasicBlock {
    /// Label for printing and debugging
    pub name: String,
    pub(crate) instrs: Vec<InstrId>,
}

impl BasicBlock {
    pub(crate) fn new(name: String) -> Self {
        Self {
            name,
            instrs: Vec::new(),
        }
    }

    /// Label
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Instruction ids in execution order
    pub fn instructions(&self) -> &[InstrId] {
        &self.instrs
    }

    /// Number of instructions
    pub fn len(&self) -> usize {
        self.instrs.len()
    }

    /// Whether the block has no instructions yet
    pub fn is_empty(&self) -> bool {
        self.instrs.is_empty()
    }

    /// Last instruction, which is the terminator in a well-formed block
    pub fn last(&self) -> Option<InstrId> {
        self.instrs.last().copied()
    }
}
