//! IR construction
//!
//! The front end lowers its syntax tree through `IrBuilder`: pick a handler,
//! create blocks, set an insert point, and emit instructions. Value
//! operations whose operands are all constants fold into constants instead
//! of emitting code.

use std::net::IpAddr;

use super::constant::{ConstantArray, ConstantKind};
use super::handler::{IrHandler, SourceLocation};
use super::instr::InstrKind;
use super::program::{value_type, IrProgram};
use super::value::{BlockId, ConstId, InstrId, ValueRef};
use crate::compiler::error::CompileResult;
use crate::compiler::optimize::constant_fold::fold_vm;
use crate::types::{Cidr, FlowNumber, LiteralType, MatchClass};
use crate::vm::opcode::Opcode;

/// Cursor-style builder over an [`IrProgram`]
pub struct IrBuilder<'p> {
    program: &'p mut IrProgram,
    handler: Option<usize>,
    insert_point: Option<BlockId>,
}

impl<'p> IrBuilder<'p> {
    /// Builder emitting into `program`
    pub fn new(program: &'p mut IrProgram) -> Self {
        Self {
            program,
            handler: None,
            insert_point: None,
        }
    }

    /// Program being built
    pub fn program(&self) -> &IrProgram {
        self.program
    }

    // ========================================================================
    // Handlers and blocks
    // ========================================================================

    /// Create a handler and make it current
    pub fn create_handler(&mut self, name: impl Into<String>) -> usize {
        let index = self.program.create_handler(name);
        self.set_handler(index);
        index
    }

    /// Create a handler declared at `location` and make it current
    pub fn create_handler_at(&mut self, name: impl Into<String>, location: SourceLocation) -> usize {
        let index = self.create_handler(name);
        self.current().set_location(location);
        index
    }

    /// Make handler `index` current
    pub fn set_handler(&mut self, index: usize) {
        self.handler = Some(index);
        self.insert_point = None;
    }

    /// Current handler
    pub fn handler(&self) -> Option<&IrHandler> {
        self.program.handler(self.handler?)
    }

    fn current(&mut self) -> &mut IrHandler {
        let index = match self.handler {
            Some(index) => index,
            None => panic!("IrBuilder: no current handler"),
        };
        match self.program.handler_mut(index) {
            Some(handler) => handler,
            None => panic!("IrBuilder: handler {} does not exist", index),
        }
    }

    /// Create a block in the current handler
    pub fn create_block(&mut self, name: impl Into<String>) -> BlockId {
        self.current().create_block(name)
    }

    /// Emit subsequent instructions at the end of `block`
    pub fn set_insert_point(&mut self, block: BlockId) {
        self.insert_point = Some(block);
    }

    /// Current insert block
    pub fn insert_point(&self) -> Option<BlockId> {
        self.insert_point
    }

    fn insert(
        &mut self,
        kind: InstrKind,
        ty: LiteralType,
        name: &str,
        operands: Vec<ValueRef>,
    ) -> InstrId {
        let block = match self.insert_point {
            Some(block) => block,
            None => panic!("IrBuilder: no insert point"),
        };
        let name = if kind.is_terminator() || ty == LiteralType::Void {
            String::new()
        } else {
            self.program.namer_mut().name_or_next(name)
        };
        let handler = self.current();
        debug_assert!(
            handler.terminator(block).is_none(),
            "block {} is already terminated",
            block
        );
        handler.append_instr(block, kind, ty, name, operands)
    }

    fn type_of(&self, value: ValueRef) -> LiteralType {
        match self.handler() {
            Some(handler) => value_type(handler, self.program.constants(), value),
            None => LiteralType::Void,
        }
    }

    // ========================================================================
    // Constants
    // ========================================================================

    /// Boolean constant
    pub fn get_boolean(&mut self, value: bool) -> ValueRef {
        self.program.get_boolean(value).into()
    }

    /// Number constant
    pub fn get_number(&mut self, value: FlowNumber) -> ValueRef {
        self.program.get_number(value).into()
    }

    /// String constant
    pub fn get_string(&mut self, value: impl Into<String>) -> ValueRef {
        self.program.get_string(value).into()
    }

    /// IP address constant
    pub fn get_ip(&mut self, value: IpAddr) -> ValueRef {
        self.program.get_ip(value).into()
    }

    /// CIDR constant
    pub fn get_cidr(&mut self, value: Cidr) -> ValueRef {
        self.program.get_cidr(value).into()
    }

    /// Regex constant
    pub fn get_regexp(&mut self, pattern: impl Into<String>) -> CompileResult<ValueRef> {
        Ok(self.program.get_regexp(pattern)?.into())
    }

    /// Array constant
    pub fn get_array(&mut self, array: ConstantArray) -> ValueRef {
        self.program.get_array(array).into()
    }

    /// Reference to a handler of the program
    pub fn get_handler_ref(&mut self, name: impl Into<String>) -> ValueRef {
        self.program.get_handler_ref(name).into()
    }

    // ========================================================================
    // Variables
    // ========================================================================

    /// Local variable of type `ty`; `size` is the element count for arrays
    pub fn create_alloca(&mut self, ty: LiteralType, size: ValueRef, name: &str) -> ValueRef {
        self.insert(InstrKind::Alloca, ty, name, vec![size]).into()
    }

    /// Read a variable; constants are returned as is
    pub fn create_load(&mut self, variable: ValueRef, name: &str) -> ValueRef {
        if let ValueRef::Const(_) = variable {
            return variable;
        }
        let ty = self.type_of(variable);
        self.insert(InstrKind::Load, ty, name, vec![variable]).into()
    }

    /// Write a variable
    pub fn create_store(&mut self, variable: ValueRef, value: ValueRef) -> InstrId {
        self.insert(InstrKind::Store, LiteralType::Void, "", vec![variable, value])
    }

    /// Write one element of an array variable
    pub fn create_array_set(&mut self, array: ValueRef, index: ValueRef, value: ValueRef) -> InstrId {
        self.insert(
            InstrKind::ArraySet,
            LiteralType::Void,
            "",
            vec![array, index, value],
        )
    }

    /// SSA join: the value arriving from each predecessor block
    pub fn create_phi(&mut self, incoming: Vec<(ValueRef, BlockId)>, name: &str) -> ValueRef {
        let ty = incoming
            .first()
            .map(|&(v, _)| self.type_of(v))
            .unwrap_or(LiteralType::Void);
        let operands = incoming
            .into_iter()
            .flat_map(|(value, pred)| [value, pred.into()])
            .collect();
        self.insert(InstrKind::Phi, ty, name, operands).into()
    }

    // ========================================================================
    // Value operations
    // ========================================================================

    /// Raw VM value operation, folded when every operand is constant
    pub fn create_vm(&mut self, op: Opcode, operands: Vec<ValueRef>, name: &str) -> ValueRef {
        debug_assert_eq!(
            op.operand_count(),
            Some(operands.len()),
            "{} takes {:?} operands",
            op,
            op.operand_count()
        );
        if let Some(folded) = self.try_fold(op, &operands) {
            return self.program.get_constant(folded).into();
        }
        self.insert(InstrKind::Vm(op), op.result_type(), name, operands)
            .into()
    }

    fn try_fold(&self, op: Opcode, operands: &[ValueRef]) -> Option<ConstantKind> {
        let constants = operands
            .iter()
            .map(|v| v.as_const().and_then(|c| self.program.constants().kind(c)))
            .collect::<Option<Vec<_>>>()?;
        fold_vm(op, &constants)
    }

    /// `-value`
    pub fn create_neg(&mut self, value: ValueRef, name: &str) -> ValueRef {
        self.create_vm(Opcode::Nneg, vec![value], name)
    }

    /// `!value` on Booleans
    pub fn create_bnot(&mut self, value: ValueRef, name: &str) -> ValueRef {
        self.create_vm(Opcode::Bnot, vec![value], name)
    }

    /// `lhs + rhs` on numbers
    pub fn create_add(&mut self, lhs: ValueRef, rhs: ValueRef, name: &str) -> ValueRef {
        self.create_vm(Opcode::Nadd, vec![lhs, rhs], name)
    }

    /// `lhs - rhs` on numbers
    pub fn create_sub(&mut self, lhs: ValueRef, rhs: ValueRef, name: &str) -> ValueRef {
        self.create_vm(Opcode::Nsub, vec![lhs, rhs], name)
    }

    /// `lhs * rhs` on numbers
    pub fn create_mul(&mut self, lhs: ValueRef, rhs: ValueRef, name: &str) -> ValueRef {
        self.create_vm(Opcode::Nmul, vec![lhs, rhs], name)
    }

    /// `lhs + rhs` on strings
    pub fn create_sadd(&mut self, lhs: ValueRef, rhs: ValueRef, name: &str) -> ValueRef {
        self.create_vm(Opcode::Sadd, vec![lhs, rhs], name)
    }

    /// `lhs == rhs` on strings
    pub fn create_scmp_eq(&mut self, lhs: ValueRef, rhs: ValueRef, name: &str) -> ValueRef {
        self.create_vm(Opcode::Scmpeq, vec![lhs, rhs], name)
    }

    /// `lhs =~ rhs`; never folded since it records capture groups
    pub fn create_scmp_re(&mut self, lhs: ValueRef, rhs: ValueRef, name: &str) -> ValueRef {
        self.create_vm(Opcode::Sregmatch, vec![lhs, rhs], name)
    }

    /// `ip in cidr`
    pub fn create_pin_cidr(&mut self, ip: ValueRef, cidr: ValueRef, name: &str) -> ValueRef {
        self.create_vm(Opcode::Pincidr, vec![ip, cidr], name)
    }

    // ========================================================================
    // Native calls
    // ========================================================================

    /// Call a native function constant
    pub fn create_call(&mut self, callee: ConstId, args: Vec<ValueRef>, name: &str) -> ValueRef {
        let ty = self.type_of(callee.into());
        let mut operands = Vec::with_capacity(args.len() + 1);
        operands.push(callee.into());
        operands.extend(args);
        self.insert(InstrKind::Call, ty, name, operands).into()
    }

    /// Invoke a native handler constant
    pub fn create_invoke_handler(&mut self, callee: ConstId, args: Vec<ValueRef>) -> InstrId {
        let mut operands = Vec::with_capacity(args.len() + 1);
        operands.push(callee.into());
        operands.extend(args);
        self.insert(InstrKind::HandlerCall, LiteralType::Void, "", operands)
    }

    // ========================================================================
    // Terminators
    // ========================================================================

    /// Return `result` from the handler
    pub fn create_ret(&mut self, result: ValueRef) -> InstrId {
        self.insert(InstrKind::Ret, LiteralType::Void, "", vec![result])
    }

    /// Jump to `target`
    pub fn create_br(&mut self, target: BlockId) -> InstrId {
        self.insert(InstrKind::Br, LiteralType::Void, "", vec![target.into()])
    }

    /// Branch on `cond`
    pub fn create_cond_br(&mut self, cond: ValueRef, if_true: BlockId, if_false: BlockId) -> InstrId {
        self.insert(
            InstrKind::CondBr,
            LiteralType::Void,
            "",
            vec![cond, if_true.into(), if_false.into()],
        )
    }

    /// Dispatch `cond` by `class`; cases are added with [`add_match_case`](Self::add_match_case)
    pub fn create_match(&mut self, class: MatchClass, cond: ValueRef, default: BlockId) -> InstrId {
        self.insert(
            InstrKind::Match(class),
            LiteralType::Void,
            "",
            vec![cond, default.into()],
        )
    }

    /// Add a `label => target` case to a match
    pub fn add_match_case(&mut self, instr: InstrId, label: ValueRef, target: BlockId) {
        let handler = self.current();
        handler.add_operand(instr, label);
        handler.add_operand(instr, target.into());
    }
}
