//! IR handlers
//!
//! A handler owns slot arenas of blocks and instructions plus the use-lists
//! of every value its instructions reference. All operand mutation goes
//! through the handler so both sides of the use-def relation change together.

use std::ops::Index;

use rustc_hash::{FxHashMap, FxHashSet};

use super::block::BasicBlock;
use super::instr::{InstrKind, Instruction};
use super::value::{BlockId, InstrId, ValueRef};
use crate::types::LiteralType;

/// Position in the Flow source a handler was declared at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SourceLocation {
    /// 1-based line
    pub line: u32,
    /// 1-based column
    pub column: u32,
    /// Byte offset
    pub offset: usize,
}

/// One compiled routing rule
#[derive(Debug, Clone)]
pub struct IrHandler {
    name: String,
    entry: Option<BlockId>,
    blocks: Vec<Option<BasicBlock>>,
    instrs: Vec<Option<Instruction>>,
    layout: Vec<BlockId>,
    uses: FxHashMap<ValueRef, Vec<InstrId>>,
    location: Option<SourceLocation>,
}

impl IrHandler {
    /// Create an empty handler
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entry: None,
            blocks: Vec::new(),
            instrs: Vec::new(),
            layout: Vec::new(),
            uses: FxHashMap::default(),
            location: None,
        }
    }

    /// Handler name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declaration site
    pub fn location(&self) -> Option<SourceLocation> {
        self.location
    }

    /// Record the declaration site
    pub fn set_location(&mut self, location: SourceLocation) {
        self.location = Some(location);
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Entry block
    pub fn entry_block(&self) -> Option<BlockId> {
        self.entry
    }

    /// Live blocks in layout order
    pub fn blocks(&self) -> &[BlockId] {
        &self.layout
    }

    /// Number of live blocks
    pub fn block_count(&self) -> usize {
        self.layout.len()
    }

    /// Number of live instructions
    pub fn instruction_count(&self) -> usize {
        self.instrs.iter().flatten().count()
    }

    /// Block by id
    pub fn block(&self, id: BlockId) -> Option<&BasicBlock> {
        self.blocks.get(id.index()).and_then(Option::as_ref)
    }

    /// Instruction by id
    pub fn instr(&self, id: InstrId) -> Option<&Instruction> {
        self.instrs.get(id.index()).and_then(Option::as_ref)
    }

    /// Whether `id` is a live block
    pub fn contains_block(&self, id: BlockId) -> bool {
        self.block(id).is_some()
    }

    /// Whether `id` is a live instruction
    pub fn contains_instr(&self, id: InstrId) -> bool {
        self.instr(id).is_some()
    }

    /// Instructions of `block`; empty for a dead block
    pub fn block_instrs(&self, block: BlockId) -> &[InstrId] {
        self.block(block).map(BasicBlock::instructions).unwrap_or(&[])
    }

    /// The block's terminator, if its last instruction is one
    pub fn terminator(&self, block: BlockId) -> Option<InstrId> {
        let last = self.block(block)?.last()?;
        self.instr(last)
            .filter(|i| i.is_terminator())
            .map(|_| last)
    }

    /// Successor edges of `block`, in terminator operand order
    pub fn successors(&self, block: BlockId) -> Vec<BlockId> {
        self.terminator(block)
            .and_then(|t| self.instr(t))
            .map(Instruction::successors)
            .unwrap_or_default()
    }

    /// Predecessor edges of `block`
    ///
    /// A terminator naming `block` twice contributes two entries. A `phi`
    /// naming `block` as an incoming edge is not a predecessor.
    pub fn predecessors(&self, block: BlockId) -> Vec<BlockId> {
        self.uses(block)
            .iter()
            .filter_map(|&user| self.instr(user))
            .filter(|i| i.is_terminator())
            .map(|i| i.block)
            .collect()
    }

    /// The `phi`s of `block`
    pub fn phis(&self, block: BlockId) -> Vec<InstrId> {
        self.block_instrs(block)
            .iter()
            .copied()
            .filter(|&i| self.instr(i).map(|i| i.kind) == Some(InstrKind::Phi))
            .collect()
    }

    /// Instructions using `value`, one entry per operand slot
    pub fn uses(&self, value: impl Into<ValueRef>) -> &[InstrId] {
        self.uses
            .get(&value.into())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Whether anything uses `value`
    pub fn is_used(&self, value: impl Into<ValueRef>) -> bool {
        !self.uses(value).is_empty()
    }

    /// Whether an instruction of `block` is used outside of it
    pub fn has_external_uses(&self, block: BlockId) -> bool {
        self.block_instrs(block).iter().any(|&i| {
            self.uses(i)
                .iter()
                .any(|&user| self.instr(user).map(|u| u.block) != Some(block))
        })
    }

    /// Whether `block` holds a `phi`
    pub fn has_phi(&self, block: BlockId) -> bool {
        !self.phis(block).is_empty()
    }

    // ========================================================================
    // Blocks
    // ========================================================================

    /// Append a new empty block; the first block becomes the entry
    pub fn create_block(&mut self, name: impl Into<String>) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(Some(BasicBlock::new(name.into())));
        self.layout.push(id);
        if self.entry.is_none() {
            self.entry = Some(id);
        }
        id
    }

    /// Make `block` the entry and move it to the front of the layout
    pub fn set_entry_block(&mut self, block: BlockId) {
        debug_assert!(self.contains_block(block), "entry {} is not live", block);
        self.entry = Some(block);
        self.layout.retain(|&b| b != block);
        self.layout.insert(0, block);
    }

    /// Move every instruction of `from` to the end of `to`
    pub fn move_instrs(&mut self, from: BlockId, to: BlockId) {
        let moved = match self.blocks.get_mut(from.index()).and_then(Option::as_mut) {
            Some(block) => std::mem::take(&mut block.instrs),
            None => return,
        };
        for &id in &moved {
            if let Some(Some(instr)) = self.instrs.get_mut(id.index()) {
                instr.block = to;
            }
        }
        if let Some(Some(block)) = self.blocks.get_mut(to.index()) {
            block.instrs.extend(moved);
        }
    }

    /// Erase one block and its instructions
    pub fn erase_block(&mut self, block: BlockId) {
        self.erase_blocks(&[block]);
    }

    /// Erase a set of blocks at once
    ///
    /// Operands of all doomed instructions are dropped before anything is
    /// freed, so blocks of the set may reference each other (dead cycles).
    /// Phi pairs elsewhere that name a doomed value or block are removed.
    pub fn erase_blocks(&mut self, blocks: &[BlockId]) {
        let mut seen = FxHashSet::default();
        let doomed: Vec<BlockId> = blocks
            .iter()
            .copied()
            .filter(|&b| self.contains_block(b) && seen.insert(b))
            .collect();
        if doomed.is_empty() {
            return;
        }

        let doomed_instrs: Vec<InstrId> = doomed
            .iter()
            .flat_map(|&b| self.block_instrs(b).to_vec())
            .collect();

        for &id in &doomed_instrs {
            self.drop_operands(id);
        }

        for &id in &doomed_instrs {
            let users = self.uses(id).to_vec();
            for user in users {
                let is_phi = self.instr(user).map(|u| u.kind) == Some(InstrKind::Phi);
                debug_assert!(is_phi, "erasing {} still used by {}", id, user);
                if is_phi {
                    self.remove_phi_pairs(user, |value, _| value == ValueRef::Instr(id));
                }
            }
            self.uses.remove(&ValueRef::Instr(id));
            self.instrs[id.index()] = None;
        }

        for &b in &doomed {
            let users = self.uses(b).to_vec();
            for user in users {
                self.remove_phi_pairs(user, |_, pred| pred == b);
            }
            debug_assert!(
                self.uses(b).is_empty(),
                "erasing {} which is still a branch target",
                b
            );
            self.uses.remove(&ValueRef::Block(b));
            self.blocks[b.index()] = None;
            if self.entry == Some(b) {
                self.entry = None;
            }
        }
        self.layout.retain(|b| seen.get(b).is_none());
    }

    // ========================================================================
    // Instructions
    // ========================================================================

    /// Append an instruction to `block`
    pub fn append_instr(
        &mut self,
        block: BlockId,
        kind: InstrKind,
        ty: LiteralType,
        name: impl Into<String>,
        operands: Vec<ValueRef>,
    ) -> InstrId {
        let at = self.block_instrs(block).len();
        self.insert_instr(block, at, kind, ty, name, operands)
    }

    /// Insert an instruction into `block` at position `at`
    pub fn insert_instr(
        &mut self,
        block: BlockId,
        at: usize,
        kind: InstrKind,
        ty: LiteralType,
        name: impl Into<String>,
        operands: Vec<ValueRef>,
    ) -> InstrId {
        debug_assert!(self.contains_block(block), "inserting into dead block {}", block);
        let id = InstrId(self.instrs.len() as u32);
        for &op in &operands {
            self.add_use(op, id);
        }
        self.instrs.push(Some(Instruction {
            kind,
            ty,
            name: name.into(),
            block,
            operands,
        }));
        if let Some(Some(b)) = self.blocks.get_mut(block.index()) {
            let at = at.min(b.instrs.len());
            b.instrs.insert(at, id);
        }
        id
    }

    /// Remove an unused instruction from its block
    pub fn erase_instr(&mut self, id: InstrId) {
        debug_assert!(self.uses(id).is_empty(), "erasing {} which still has uses", id);
        self.drop_operands(id);
        let Some(instr) = self.instrs.get_mut(id.index()).and_then(Option::take) else {
            return;
        };
        if let Some(Some(block)) = self.blocks.get_mut(instr.block.index()) {
            block.instrs.retain(|&i| i != id);
        }
        self.uses.remove(&ValueRef::Instr(id));
    }

    /// Replace the terminator of `block` with a new one
    pub fn replace_terminator(
        &mut self,
        block: BlockId,
        kind: InstrKind,
        operands: Vec<ValueRef>,
    ) -> InstrId {
        debug_assert!(kind.is_terminator(), "{:?} is not a terminator", kind);
        if let Some(old) = self.terminator(block) {
            self.erase_instr(old);
        }
        self.append_instr(block, kind, LiteralType::Void, String::new(), operands)
    }

    /// Set operand slot `index` of `instr`
    pub fn set_operand(&mut self, instr: InstrId, index: usize, value: ValueRef) {
        let old = match self
            .instrs
            .get_mut(instr.index())
            .and_then(Option::as_mut)
            .and_then(|i| i.operands.get_mut(index))
        {
            Some(slot) => std::mem::replace(slot, value),
            None => return,
        };
        self.remove_use(old, instr);
        self.add_use(value, instr);
    }

    /// Append an operand to `instr`
    pub fn add_operand(&mut self, instr: InstrId, value: ValueRef) {
        if let Some(Some(i)) = self.instrs.get_mut(instr.index()) {
            i.operands.push(value);
            self.add_use(value, instr);
        }
    }

    /// Remove operand slot `index` of `instr`
    pub fn remove_operand(&mut self, instr: InstrId, index: usize) -> Option<ValueRef> {
        let i = self.instrs.get_mut(instr.index()).and_then(Option::as_mut)?;
        if index >= i.operands.len() {
            return None;
        }
        let old = i.operands.remove(index);
        self.remove_use(old, instr);
        Some(old)
    }

    /// Replace every slot of `instr` holding `old` with `new`
    pub fn replace_operand(&mut self, instr: InstrId, old: ValueRef, new: ValueRef) -> usize {
        let slots: Vec<usize> = match self.instr(instr) {
            Some(i) => i
                .operands
                .iter()
                .enumerate()
                .filter(|&(_, &v)| v == old)
                .map(|(n, _)| n)
                .collect(),
            None => return 0,
        };
        for &slot in &slots {
            self.set_operand(instr, slot, new);
        }
        slots.len()
    }

    /// Redirect every use of `old` to `new`
    pub fn replace_all_uses_with(&mut self, old: ValueRef, new: ValueRef) -> usize {
        if old == new {
            return 0;
        }
        let mut users = self.uses(old).to_vec();
        users.dedup();
        users
            .into_iter()
            .map(|user| self.replace_operand(user, old, new))
            .sum()
    }

    fn drop_operands(&mut self, id: InstrId) {
        let operands = match self.instrs.get_mut(id.index()).and_then(Option::as_mut) {
            Some(instr) => std::mem::take(&mut instr.operands),
            None => return,
        };
        for op in operands {
            self.remove_use(op, id);
        }
    }

    /// Add the pair `(value, pred)` to `phi`
    pub fn add_phi_incoming(&mut self, phi: InstrId, value: ValueRef, pred: BlockId) {
        self.add_operand(phi, value);
        self.add_operand(phi, pred.into());
    }

    /// Drop the pair of `phi` arriving from `pred`
    pub fn remove_phi_incoming(&mut self, phi: InstrId, pred: BlockId) {
        self.remove_phi_pairs(phi, |_, p| p == pred);
    }

    fn remove_phi_pairs(&mut self, phi: InstrId, doomed: impl Fn(ValueRef, BlockId) -> bool) {
        let Some(instr) = self.instr(phi).filter(|i| i.kind == InstrKind::Phi) else {
            return;
        };
        let slots: Vec<usize> = instr
            .phi_incoming()
            .into_iter()
            .enumerate()
            .filter(|&(_, (value, pred))| doomed(value, pred))
            .map(|(n, _)| 2 * n)
            .collect();
        for slot in slots.into_iter().rev() {
            self.remove_operand(phi, slot + 1);
            self.remove_operand(phi, slot);
        }
    }

    fn add_use(&mut self, value: ValueRef, user: InstrId) {
        self.uses.entry(value).or_default().push(user);
    }

    fn remove_use(&mut self, value: ValueRef, user: InstrId) {
        if let Some(list) = self.uses.get_mut(&value) {
            if let Some(pos) = list.iter().position(|&u| u == user) {
                list.remove(pos);
            }
            if list.is_empty() {
                self.uses.remove(&value);
            }
        }
    }

    // ========================================================================
    // Validation
    // ========================================================================

    /// Check block, terminator, and use-list invariants
    pub fn validate(&self) -> Result<(), String> {
        let entry = self
            .entry
            .ok_or_else(|| format!("Handler '{}' has no entry block", self.name))?;
        if !self.contains_block(entry) {
            return Err(format!("Entry block {} does not exist", entry));
        }
        if self.blocks.iter().flatten().count() != self.layout.len() {
            return Err("Block layout does not match live blocks".to_string());
        }

        for &b in &self.layout {
            let block = self
                .block(b)
                .ok_or_else(|| format!("Layout references dead block {}", b))?;
            if block.is_empty() {
                return Err(format!("Block {} ({}) is empty", b, block.name));
            }
            let count = block.len();
            for (pos, &id) in block.instrs.iter().enumerate() {
                let instr = self
                    .instr(id)
                    .ok_or_else(|| format!("Block {} references dead instruction {}", b, id))?;
                if instr.block != b {
                    return Err(format!("Instruction {} in {} claims block {}", id, b, instr.block));
                }
                let last = pos + 1 == count;
                if instr.is_terminator() && !last {
                    return Err(format!("Block {} has terminator {} before its end", b, id));
                }
                if !instr.is_terminator() && last {
                    return Err(format!("Block {} is not terminated", b));
                }
                if instr.kind == InstrKind::Phi {
                    self.validate_phi(b, id, instr)?;
                }
                for &op in &instr.operands {
                    match op {
                        ValueRef::Instr(d) if !self.contains_instr(d) => {
                            return Err(format!("Instruction {} uses dead value {}", id, d));
                        }
                        ValueRef::Block(t) if !self.contains_block(t) => {
                            return Err(format!(
                                "Block {} references non-existent successor {}",
                                b, t
                            ));
                        }
                        _ => {}
                    }
                    let slots = instr.operands.iter().filter(|&&v| v == op).count();
                    let recorded = self.uses(op).iter().filter(|&&u| u == id).count();
                    if slots != recorded {
                        return Err(format!(
                            "Use-list of {} has {} entries for {}, expected {}",
                            op, recorded, id, slots
                        ));
                    }
                }
            }
        }

        for (value, users) in &self.uses {
            for &user in users {
                match self.instr(user) {
                    Some(instr) if instr.operands.contains(value) => {}
                    _ => {
                        return Err(format!("Use-list of {} has stale user {}", value, user));
                    }
                }
            }
        }

        Ok(())
    }

    fn validate_phi(&self, block: BlockId, id: InstrId, phi: &Instruction) -> Result<(), String> {
        let pairs = phi.phi_incoming();
        if pairs.len() * 2 != phi.operands.len() {
            return Err(format!("Phi {} operands are not (value, block) pairs", id));
        }
        let preds = self.predecessors(block);
        for (n, &(_, pred)) in pairs.iter().enumerate() {
            if !preds.contains(&pred) {
                return Err(format!("Phi {} names {} which is not a predecessor of {}", id, pred, block));
            }
            if pairs[..n].iter().any(|&(_, p)| p == pred) {
                return Err(format!("Phi {} names predecessor {} twice", id, pred));
            }
        }
        Ok(())
    }
}

impl Index<BlockId> for IrHandler {
    type Output = BasicBlock;

    fn index(&self, id: BlockId) -> &BasicBlock {
        match self.block(id) {
            Some(block) => block,
            None => panic!("dead block {} in handler '{}'", id, self.name),
        }
    }
}

impl Index<InstrId> for IrHandler {
    type Output = Instruction;

    fn index(&self, id: InstrId) -> &Instruction {
        match self.instr(id) {
            Some(instr) => instr,
            None => panic!("dead instruction {} in handler '{}'", id, self.name),
        }
    }
}
