//! Value references and naming
//!
//! Everything an instruction can use as an operand is a `ValueRef`: a
//! constant from the program's pool, the result of another instruction, or a
//! basic block (branch targets). Ids index slot arenas and are never reused,
//! so a stale id can be detected rather than silently aliasing a new value.

use std::fmt;

/// Constant pool index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConstId(pub u32);

/// Instruction arena index within a handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstrId(pub u32);

/// Block arena index within a handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub u32);

macro_rules! id_index {
    ($($ty:ident),*) => {$(
        impl $ty {
            /// Arena slot
            #[inline]
            pub fn index(self) -> usize {
                self.0 as usize
            }
        }
    )*};
}

id_index!(ConstId, InstrId, BlockId);

impl fmt::Display for ConstId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "c{}", self.0)
    }
}

impl fmt::Display for InstrId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "i{}", self.0)
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bb{}", self.0)
    }
}

/// An operand
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueRef {
    /// Program constant
    Const(ConstId),
    /// Instruction result
    Instr(InstrId),
    /// Basic block
    Block(BlockId),
}

impl ValueRef {
    /// Block id, if this refers to a block
    pub fn as_block(self) -> Option<BlockId> {
        match self {
            Self::Block(b) => Some(b),
            _ => None,
        }
    }

    /// Instruction id, if this refers to an instruction
    pub fn as_instr(self) -> Option<InstrId> {
        match self {
            Self::Instr(i) => Some(i),
            _ => None,
        }
    }

    /// Constant id, if this refers to a constant
    pub fn as_const(self) -> Option<ConstId> {
        match self {
            Self::Const(c) => Some(c),
            _ => None,
        }
    }
}

impl From<ConstId> for ValueRef {
    fn from(id: ConstId) -> Self {
        Self::Const(id)
    }
}

impl From<InstrId> for ValueRef {
    fn from(id: InstrId) -> Self {
        Self::Instr(id)
    }
}

impl From<BlockId> for ValueRef {
    fn from(id: BlockId) -> Self {
        Self::Block(id)
    }
}

impl fmt::Display for ValueRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Const(c) => write!(f, "{}", c),
            Self::Instr(i) => write!(f, "{}", i),
            Self::Block(b) => write!(f, "{}", b),
        }
    }
}

/// Source of `unnamed<N>` names for values created without one
///
/// Owned by the program being compiled, so naming is deterministic per
/// compilation unit.
#[derive(Debug, Clone, Default)]
pub struct Namer {
    next: u64,
}

impl Namer {
    /// Namer starting at `unnamed0`
    pub fn new() -> Self {
        Self::default()
    }

    /// Namer starting at `unnamed<seed>`
    pub fn with_seed(seed: u64) -> Self {
        Self { next: seed }
    }

    /// Next generated name
    pub fn next_name(&mut self) -> String {
        let name = format!("unnamed{}", self.next);
        self.next += 1;
        name
    }

    /// `name` if non-empty, otherwise a generated one
    pub fn name_or_next(&mut self, name: &str) -> String {
        if name.is_empty() {
            self.next_name()
        } else {
            name.to_string()
        }
    }
}
