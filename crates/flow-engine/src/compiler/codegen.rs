//! Code generator: IR → Flow bytecode
//!
//! Each handler gets one flat register frame:
//!
//! - a register per constant operand, filled by a prologue of load opcodes
//! - a register per value-producing instruction, `phi`s included
//! - a scratch window above those where native call arguments are packed
//!   and `phi` copies are staged
//!
//! Each `(value, predecessor)` pair of a `phi` becomes a copy into the
//! `phi`'s register on that predecessor's edge. Copies for an edge leaving by
//! `br` go right before the branch; an edge out of a `condbr` or `match`
//! gets its own stub after the last block.
//!
//! Blocks are emitted in layout order and a branch to the block that follows
//! falls through. Jump targets and match-table targets are patched once every
//! block and stub position is known.

use std::sync::Arc;

use regex::Regex;
use rustc_hash::FxHashMap;
use tracing::debug;

use crate::compiler::error::{CompileError, CompileResult};
use crate::compiler::ir::{
    BlockId, ConstId, ConstantArray, ConstantKind, InstrId, InstrKind, Instruction, IrHandler,
    IrProgram, ValueRef,
};
use crate::types::{LiteralType, MatchClass};
use crate::vm::{CodeWriter, ConstantPool, Handler, MatchCaseDef, MatchDef, Opcode, Program};

/// Lowers every handler of an [`IrProgram`] to bytecode
pub struct TargetCodeGenerator<'a> {
    program: &'a IrProgram,
    pool: ConstantPool,
}

/// Field of a jump instruction that holds its target
#[derive(Debug, Clone, Copy)]
enum JumpField {
    A,
    B,
}

/// Where a jump lands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Label {
    Block(BlockId),
    /// Stub carrying the `phi` copies of one edge
    Edge(usize),
}

/// `(phi register, incoming value)` pairs moved along one edge
type EdgeCopies = Vec<(u16, ValueRef)>;

/// Per-handler generation state
struct HandlerCtx {
    index: usize,
    writer: CodeWriter,
    const_regs: FxHashMap<ConstId, u16>,
    /// Constants in first-use order, for the prologue
    const_order: Vec<ConstId>,
    instr_regs: FxHashMap<InstrId, u16>,
    next_reg: usize,
    /// First register of the argument packing window
    temp_base: u16,
    block_positions: FxHashMap<BlockId, usize>,
    edge_copies: FxHashMap<(BlockId, BlockId), EdgeCopies>,
    /// Edges that need a stub, indexed by `Label::Edge`
    edges: Vec<(BlockId, BlockId)>,
    edge_labels: FxHashMap<(BlockId, BlockId), usize>,
    edge_positions: Vec<usize>,
    pending_jumps: Vec<(usize, JumpField, Label)>,
    /// (match table, default target, case targets)
    pending_matches: Vec<(usize, Label, Vec<Label>)>,
}

impl HandlerCtx {
    fn new(index: usize) -> Self {
        Self {
            index,
            writer: CodeWriter::new(),
            const_regs: FxHashMap::default(),
            const_order: Vec::new(),
            instr_regs: FxHashMap::default(),
            next_reg: 0,
            temp_base: 0,
            block_positions: FxHashMap::default(),
            edge_copies: FxHashMap::default(),
            edges: Vec::new(),
            edge_labels: FxHashMap::default(),
            edge_positions: Vec::new(),
            pending_jumps: Vec::new(),
            pending_matches: Vec::new(),
        }
    }

    fn alloc_reg(&mut self) -> CompileResult<u16> {
        let reg = to_u16(self.next_reg, "registers")?;
        self.next_reg += 1;
        Ok(reg)
    }

    fn map_const(&mut self, c: ConstId) -> CompileResult<()> {
        if !self.const_regs.contains_key(&c) {
            let reg = self.alloc_reg()?;
            self.const_regs.insert(c, reg);
            self.const_order.push(c);
        }
        Ok(())
    }

    /// Register holding `value`
    fn reg(&self, value: ValueRef) -> CompileResult<u16> {
        match value {
            ValueRef::Const(c) => self.const_regs.get(&c),
            ValueRef::Instr(i) => self.instr_regs.get(&i),
            ValueRef::Block(_) => None,
        }
        .copied()
        .ok_or_else(|| CompileError::Unsupported(format!("{} has no register", value)))
    }

    fn mov(&mut self, dst: u16, src: u16) {
        if dst != src {
            self.writer.emit(Opcode::Mov, dst, src, 0);
        }
    }

    fn record_block(&mut self, block: BlockId) {
        self.block_positions.insert(block, self.writer.position());
    }

    fn jump(&mut self, target: Label) {
        let pos = self.writer.emit(Opcode::Jmp, 0, 0, 0);
        self.pending_jumps.push((pos, JumpField::A, target));
    }

    fn cond_jump(&mut self, op: Opcode, cond: u16, target: Label) {
        let pos = self.writer.emit(op, cond, 0, 0);
        self.pending_jumps.push((pos, JumpField::B, target));
    }

    /// Label for the edge `from -> to`, opening a stub when it carries copies
    fn edge_label(&mut self, from: BlockId, to: BlockId) -> Label {
        if !self.edge_copies.contains_key(&(from, to)) {
            return Label::Block(to);
        }
        let next = self.edges.len();
        let index = *self.edge_labels.entry((from, to)).or_insert(next);
        if index == next {
            self.edges.push((from, to));
        }
        Label::Edge(index)
    }

    /// Perform the `phi` copies of `from -> to` as one parallel move
    fn emit_copies(&mut self, from: BlockId, to: BlockId) -> CompileResult<()> {
        let Some(copies) = self.edge_copies.get(&(from, to)) else {
            return Ok(());
        };
        let moves = copies
            .iter()
            .map(|&(dst, value)| self.reg(value).map(|src| (dst, src)))
            .collect::<CompileResult<Vec<_>>>()?;

        let clobbers = moves
            .iter()
            .any(|&(dst, _)| moves.iter().any(|&(d, src)| src == dst && d != dst));
        if clobbers {
            for (n, &(_, src)) in moves.iter().enumerate() {
                self.mov(self.temp_base + n as u16, src);
            }
            for (n, &(dst, _)) in moves.iter().enumerate() {
                self.mov(dst, self.temp_base + n as u16);
            }
        } else {
            for (dst, src) in moves {
                self.mov(dst, src);
            }
        }
        Ok(())
    }

    /// Emit every edge stub: its copies, then a jump to the real target
    fn emit_edges(&mut self) -> CompileResult<()> {
        for (from, to) in self.edges.clone() {
            self.edge_positions.push(self.writer.position());
            self.emit_copies(from, to)?;
            self.jump(Label::Block(to));
        }
        Ok(())
    }

    fn position_of(&self, label: Label) -> CompileResult<usize> {
        match label {
            Label::Block(block) => self.block_positions.get(&block).copied().ok_or_else(|| {
                CompileError::InvalidIr(vec![format!(
                    "branch to block {} outside the handler",
                    block
                )])
            }),
            Label::Edge(index) => self.edge_positions.get(index).copied().ok_or_else(|| {
                CompileError::Unsupported(format!("edge stub {} was never emitted", index))
            }),
        }
    }

    fn patch_all(&mut self, pool: &mut ConstantPool) -> CompileResult<()> {
        for (pos, field, target) in std::mem::take(&mut self.pending_jumps) {
            let pc = to_u16(self.position_of(target)?, "instructions")?;
            match field {
                JumpField::A => self.writer.patch_a(pos, pc),
                JumpField::B => self.writer.patch_b(pos, pc),
            }
        }

        for (k, default, targets) in std::mem::take(&mut self.pending_matches) {
            let else_pc = self.position_of(default)?;
            let pcs = targets
                .iter()
                .map(|&t| self.position_of(t))
                .collect::<CompileResult<Vec<_>>>()?;
            let def = pool
                .get_match_def_mut(k)
                .ok_or_else(|| CompileError::Unsupported(format!("match table {} vanished", k)))?;
            def.else_pc = else_pc;
            for (case, pc) in def.cases.iter_mut().zip(pcs) {
                case.pc = pc;
            }
        }
        Ok(())
    }
}

fn to_u16(value: usize, what: &str) -> CompileResult<u16> {
    u16::try_from(value)
        .map_err(|_| CompileError::Unsupported(format!("too many {} ({})", what, value)))
}

fn operand(instr: &Instruction, index: usize) -> CompileResult<ValueRef> {
    instr.operand(index).ok_or_else(|| {
        CompileError::InvalidIr(vec![format!(
            "{} is missing operand {}",
            instr.kind.mnemonic(),
            index
        )])
    })
}

fn block_operand(instr: &Instruction, index: usize) -> CompileResult<BlockId> {
    operand(instr, index)?.as_block().ok_or_else(|| {
        CompileError::InvalidIr(vec![format!(
            "{} operand {} is not a block",
            instr.kind.mnemonic(),
            index
        )])
    })
}

fn compile_regexp(pattern: &str) -> CompileResult<Regex> {
    Regex::new(pattern).map_err(|e| CompileError::InvalidRegExp {
        pattern: pattern.to_string(),
        message: e.to_string(),
    })
}

fn match_opcode(class: MatchClass) -> Opcode {
    match class {
        MatchClass::Same => Opcode::Smatcheq,
        MatchClass::Head => Opcode::Smatchbeg,
        MatchClass::Tail => Opcode::Smatchend,
        MatchClass::RegExp => Opcode::Smatchr,
    }
}

/// Operand slots that are encoded in the instruction rather than loaded
fn is_immediate_slot(instr: &Instruction, slot: usize) -> bool {
    match instr.kind {
        InstrKind::Call | InstrKind::HandlerCall => slot == 0,
        InstrKind::Match(_) => slot >= 2 && slot % 2 == 0,
        _ => false,
    }
}

/// Record the copy every `phi` pair asks of its predecessor edge
fn collect_phi_copies(handler: &IrHandler, ctx: &mut HandlerCtx) -> CompileResult<()> {
    for &block in handler.blocks() {
        for phi in handler.phis(block) {
            if !handler[phi].produces_value() {
                continue;
            }
            let dst = ctx.reg(phi.into())?;
            for (value, pred) in handler[phi].phi_incoming() {
                ctx.edge_copies.entry((pred, block)).or_default().push((dst, value));
            }
        }
    }
    Ok(())
}

impl<'a> TargetCodeGenerator<'a> {
    /// Create a generator for `program`
    pub fn new(program: &'a IrProgram) -> Self {
        Self {
            program,
            pool: ConstantPool::new(),
        }
    }

    /// Generate bytecode for every handler
    pub fn generate(mut self) -> CompileResult<Program> {
        let mut handlers = Vec::with_capacity(self.program.handlers().len());
        for (index, handler) in self.program.handlers().iter().enumerate() {
            handlers.push(self.generate_handler(index, handler)?);
        }
        Program::new(self.pool, handlers).map_err(|e| CompileError::InvalidIr(vec![e.to_string()]))
    }

    fn generate_handler(&mut self, index: usize, handler: &IrHandler) -> CompileResult<Handler> {
        let mut ctx = HandlerCtx::new(index);
        self.allocate_registers(handler, &mut ctx)?;
        collect_phi_copies(handler, &mut ctx)?;

        // Prologue
        for c in ctx.const_order.clone() {
            let reg = ctx.reg(c.into())?;
            self.load_constant(&mut ctx, c, reg)?;
        }

        let layout = handler.blocks();
        if layout.is_empty() {
            ctx.writer.emit(Opcode::Exit, 0, 0, 0);
        }
        for (n, &block) in layout.iter().enumerate() {
            ctx.record_block(block);
            let next = layout.get(n + 1).copied();
            for &id in handler.block_instrs(block) {
                self.emit_instr(handler, &mut ctx, id, next)?;
            }
        }
        ctx.emit_edges()?;
        ctx.patch_all(&mut self.pool)?;

        let register_count = ctx.next_reg;
        let code = ctx.writer.finish();
        debug!(
            handler = handler.name(),
            registers = register_count,
            instructions = code.len(),
            "generated handler"
        );
        Ok(Handler::new(handler.name(), code, register_count))
    }

    /// Assign registers to constants, values, and the scratch window
    fn allocate_registers(&self, handler: &IrHandler, ctx: &mut HandlerCtx) -> CompileResult<()> {
        let mut window = 0;
        for &block in handler.blocks() {
            let phis = handler
                .block_instrs(block)
                .iter()
                .filter(|&&id| handler[id].kind == InstrKind::Phi)
                .count();
            window = window.max(phis);
            for &id in handler.block_instrs(block) {
                let instr = &handler[id];
                if instr.produces_value() {
                    let reg = ctx.alloc_reg()?;
                    ctx.instr_regs.insert(id, reg);
                }
                if matches!(instr.kind, InstrKind::Call | InstrKind::HandlerCall) {
                    window = window.max(instr.operands().len());
                }
                if self.folds_away(instr) {
                    continue;
                }
                for (slot, &value) in instr.operands().iter().enumerate() {
                    if let ValueRef::Const(c) = value {
                        if !is_immediate_slot(instr, slot) {
                            ctx.map_const(c)?;
                        }
                    }
                }
            }
        }

        ctx.temp_base = to_u16(ctx.next_reg, "registers")?;
        ctx.next_reg += window;
        to_u16(ctx.next_reg, "registers")?;
        Ok(())
    }

    /// Terminators on constant Booleans are encoded without a register
    fn folds_away(&self, instr: &Instruction) -> bool {
        matches!(instr.kind, InstrKind::Ret | InstrKind::CondBr)
            && self.const_bool(instr.operand(0)).is_some()
    }

    fn const_bool(&self, value: Option<ValueRef>) -> Option<bool> {
        self.program.constants().get_bool(value?.as_const()?)
    }

    fn const_kind(&self, c: ConstId) -> CompileResult<&'a ConstantKind> {
        self.program
            .constants()
            .kind(c)
            .ok_or_else(|| CompileError::InvalidIr(vec![format!("unknown constant {}", c)]))
    }

    fn load_constant(&mut self, ctx: &mut HandlerCtx, c: ConstId, reg: u16) -> CompileResult<()> {
        let (op, b) = match self.const_kind(c)? {
            ConstantKind::Boolean(v) => (Opcode::Bload, *v as usize),
            ConstantKind::Number(n) if (0..=u16::MAX as i64).contains(n) => (Opcode::Iload, *n as usize),
            ConstantKind::Number(n) => (Opcode::Nload, self.pool.add_number(*n)),
            ConstantKind::String(s) => (Opcode::Sload, self.pool.add_string(s)),
            ConstantKind::IpAddress(ip) => (Opcode::Pload, self.pool.add_ipaddr(*ip)),
            ConstantKind::Cidr(cidr) => (Opcode::Cload, self.pool.add_cidr(*cidr)),
            ConstantKind::RegExp(pattern) => {
                (Opcode::Rload, self.pool.add_regexp(compile_regexp(pattern)?))
            }
            ConstantKind::Array(array) => self.add_array(array)?,
            ConstantKind::Handler(name) => {
                let target = self
                    .program
                    .find_handler_index(name)
                    .ok_or_else(|| CompileError::UnknownHandler(name.clone()))?;
                (Opcode::Hload, target)
            }
            ConstantKind::BuiltinFunction(b) | ConstantKind::BuiltinHandler(b) => {
                return Err(CompileError::Unsupported(format!(
                    "native callback {} used as a value",
                    b.signature
                )));
            }
        };
        ctx.writer.emit(op, reg, to_u16(b, "constants")?, 0);
        Ok(())
    }

    fn add_array(&mut self, array: &ConstantArray) -> CompileResult<(Opcode, usize)> {
        let elements = array.elements();
        Ok(match array.element_type() {
            LiteralType::Number => {
                let values = elements.iter().filter_map(|e| e.as_number()).collect();
                (Opcode::Itload, self.pool.add_int_array(values))
            }
            LiteralType::String => {
                let values = elements.iter().filter_map(|e| e.as_str()).map(Arc::from).collect();
                (Opcode::Stload, self.pool.add_string_array(values))
            }
            LiteralType::IPAddress => {
                let values = elements
                    .iter()
                    .filter_map(|e| match e {
                        ConstantKind::IpAddress(ip) => Some(*ip),
                        _ => None,
                    })
                    .collect();
                (Opcode::Ptload, self.pool.add_ipaddr_array(values))
            }
            LiteralType::Cidr => {
                let values = elements
                    .iter()
                    .filter_map(|e| match e {
                        ConstantKind::Cidr(c) => Some(*c),
                        _ => None,
                    })
                    .collect();
                (Opcode::Ctload, self.pool.add_cidr_array(values))
            }
            other => return Err(CompileError::InvalidArrayElement(other)),
        })
    }

    fn emit_instr(
        &mut self,
        handler: &IrHandler,
        ctx: &mut HandlerCtx,
        id: InstrId,
        next: Option<BlockId>,
    ) -> CompileResult<()> {
        let instr = &handler[id];
        match instr.kind {
            InstrKind::Nop | InstrKind::Phi => {}

            InstrKind::Alloca => {
                let dst = ctx.reg(id.into())?;
                let size = ctx.reg(operand(instr, 0)?)?;
                let code = instr.ty.signature_code() as u16;
                ctx.writer.emit(Opcode::Alloca, dst, code, size);
            }

            InstrKind::Load => {
                let src = ctx.reg(operand(instr, 0)?)?;
                let dst = ctx.reg(id.into())?;
                ctx.mov(dst, src);
            }

            InstrKind::Store => {
                let var = ctx.reg(operand(instr, 0)?)?;
                let value = ctx.reg(operand(instr, 1)?)?;
                ctx.mov(var, value);
            }

            InstrKind::ArraySet => {
                let array = ctx.reg(operand(instr, 0)?)?;
                let index = ctx.reg(operand(instr, 1)?)?;
                let value = ctx.reg(operand(instr, 2)?)?;
                ctx.writer.emit(Opcode::Aset, array, index, value);
            }

            InstrKind::Vm(op) => {
                let count = op.operand_count().ok_or_else(|| {
                    CompileError::Unsupported(format!("{} is not a value operation", op))
                })?;
                if instr.operands().len() != count {
                    return Err(CompileError::InvalidIr(vec![format!(
                        "{} takes {} operands, got {}",
                        op,
                        count,
                        instr.operands().len()
                    )]));
                }
                let dst = ctx.reg(id.into())?;
                let lhs = ctx.reg(operand(instr, 0)?)?;
                let rhs = if count == 2 { ctx.reg(operand(instr, 1)?)? } else { 0 };
                ctx.writer.emit(op, dst, lhs, rhs);
            }

            InstrKind::Call | InstrKind::HandlerCall => self.emit_call(ctx, id, instr)?,

            InstrKind::Ret => match self.const_bool(instr.operand(0)) {
                Some(result) => {
                    ctx.writer.emit(Opcode::Exit, result as u16, 0, 0);
                }
                None => {
                    let reg = ctx.reg(operand(instr, 0)?)?;
                    ctx.writer.emit(Opcode::Ret, reg, 0, 0);
                }
            },

            InstrKind::Br => {
                let target = block_operand(instr, 0)?;
                ctx.emit_copies(instr.block, target)?;
                if next != Some(target) {
                    ctx.jump(Label::Block(target));
                }
            }

            InstrKind::CondBr => {
                let if_true = block_operand(instr, 1)?;
                let if_false = block_operand(instr, 2)?;
                let taken = match self.const_bool(instr.operand(0)) {
                    Some(true) => Some(if_true),
                    Some(false) => Some(if_false),
                    None if if_true == if_false => Some(if_true),
                    None => None,
                };
                if let Some(target) = taken {
                    ctx.emit_copies(instr.block, target)?;
                    if next != Some(target) {
                        ctx.jump(Label::Block(target));
                    }
                    return Ok(());
                }

                let cond = ctx.reg(operand(instr, 0)?)?;
                let on_true = ctx.edge_label(instr.block, if_true);
                let on_false = ctx.edge_label(instr.block, if_false);
                let falls_to = next.map(Label::Block);
                if falls_to == Some(on_true) {
                    ctx.cond_jump(Opcode::Jz, cond, on_false);
                } else {
                    ctx.cond_jump(Opcode::Jn, cond, on_true);
                    if falls_to != Some(on_false) {
                        ctx.jump(on_false);
                    }
                }
            }

            InstrKind::Match(class) => {
                let subject = ctx.reg(operand(instr, 0)?)?;
                let default = ctx.edge_label(instr.block, block_operand(instr, 1)?);
                let mut cases = Vec::new();
                let mut targets = Vec::new();
                for (label, target) in instr.match_cases() {
                    let c = label.as_const().ok_or_else(|| {
                        CompileError::Unsupported(format!("non-constant match label {}", label))
                    })?;
                    let label = match (class, self.const_kind(c)?) {
                        (MatchClass::RegExp, ConstantKind::RegExp(p))
                        | (MatchClass::RegExp, ConstantKind::String(p)) => {
                            self.pool.add_regexp(compile_regexp(p)?)
                        }
                        (MatchClass::RegExp, _) => {
                            return Err(CompileError::Unsupported(format!(
                                "regex match label {} is not a pattern",
                                c
                            )));
                        }
                        (_, ConstantKind::String(s)) => self.pool.add_string(s),
                        (_, _) => {
                            return Err(CompileError::Unsupported(format!(
                                "match label {} is not a string",
                                c
                            )));
                        }
                    };
                    cases.push(MatchCaseDef { label, pc: 0 });
                    targets.push(ctx.edge_label(instr.block, target));
                }
                let k = self.pool.add_match_def(MatchDef {
                    handler: ctx.index,
                    class,
                    cases,
                    else_pc: 0,
                });
                ctx.pending_matches.push((k, default, targets));
                ctx.writer
                    .emit(match_opcode(class), to_u16(k, "match tables")?, subject, 0);
            }
        }
        Ok(())
    }

    /// Pack `[result, args...]` into the scratch window and call
    fn emit_call(&mut self, ctx: &mut HandlerCtx, id: InstrId, instr: &Instruction) -> CompileResult<()> {
        let callee = operand(instr, 0)?
            .as_const()
            .ok_or_else(|| CompileError::Unsupported("indirect native call".to_string()))?;
        let (op, local) = match (instr.kind, self.const_kind(callee)?) {
            (InstrKind::Call, ConstantKind::BuiltinFunction(b)) => {
                (Opcode::Call, self.pool.add_native_function(b.signature.clone()))
            }
            (InstrKind::HandlerCall, ConstantKind::BuiltinHandler(b)) => {
                (Opcode::Handler, self.pool.add_native_handler(b.signature.clone()))
            }
            (kind, other) => {
                return Err(CompileError::InvalidIr(vec![format!(
                    "{} callee {} is not a matching native callback",
                    kind.mnemonic(),
                    other
                )]));
            }
        };

        let args = &instr.operands()[1..];
        let base = ctx.temp_base;
        for (n, &arg) in args.iter().enumerate() {
            let src = ctx.reg(arg)?;
            ctx.mov(base + 1 + n as u16, src);
        }
        ctx.writer.emit(
            op,
            to_u16(local, "native callbacks")?,
            to_u16(args.len(), "arguments")?,
            base,
        );
        if instr.produces_value() {
            let dst = ctx.reg(id.into())?;
            ctx.mov(dst, base);
        }
        Ok(())
    }
}
