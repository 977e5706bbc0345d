//! Bytecode execution
//!
//! A [`Runner`] executes one handler of a linked [`Program`] in its own
//! register frame. Runs are synchronous; a native callback may ask for the
//! run to be suspended, in which case `run` returns early and `resume`
//! continues after the call.
//!
//! ```text
//! Inactive --run--> Running --exit/ret--> Returned(bool)
//!                      |  ^
//!               suspend|  |resume
//!                      v  |
//!                   Suspended          any error --> Trapped
//! ```

use std::any::Any;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::trace;

use super::matcher::RegExpContext;
use super::native::Params;
use super::opcode::{Instruction, Opcode};
use super::program::Program;
use super::value::Value;
use super::{VmError, VmResult};
use crate::types::{Cidr, LiteralType};

/// Default upper bound on the length of an `alloca`ted array
pub const DEFAULT_MAX_ARRAY_LEN: usize = 1 << 16;

/// Per-invocation limits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerOptions {
    /// Trap after this many executed instructions; unbounded when `None`
    pub max_instructions: Option<u64>,
    /// Longest array an `alloca` may create
    pub max_array_len: usize,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self {
            max_instructions: None,
            max_array_len: DEFAULT_MAX_ARRAY_LEN,
        }
    }
}

/// Lifecycle of a runner
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerState {
    /// Not started, or rewound
    Inactive,
    /// Executing instructions
    Running,
    /// Paused by a native callback; `resume` continues
    Suspended,
    /// Finished with the handler's result
    Returned(bool),
    /// Stopped by a VM error
    Trapped,
}

/// Outcome of one instruction
enum Step {
    Next,
    Jump(usize),
    Exit(bool),
    Suspend { handled: bool },
}

/// Executes one handler invocation
pub struct Runner<'a> {
    program: &'a Program,
    handler: usize,
    registers: Vec<Value>,
    pc: usize,
    state: RunnerState,
    options: RunnerOptions,
    executed: u64,
    handled_on_resume: bool,
    regexp: RegExpContext,
    userdata: Option<&'a mut dyn Any>,
}

impl<'a> Runner<'a> {
    /// Runner for handler `handler` of `program`
    pub fn new(program: &'a Program, handler: usize) -> Self {
        Self {
            program,
            handler,
            registers: Vec::new(),
            pc: 0,
            state: RunnerState::Inactive,
            options: RunnerOptions::default(),
            executed: 0,
            handled_on_resume: false,
            regexp: RegExpContext::new(),
            userdata: None,
        }
    }

    /// Context handed to every native callback through [`Params::userdata`]
    pub fn with_userdata(mut self, userdata: &'a mut dyn Any) -> Self {
        self.userdata = Some(userdata);
        self
    }

    /// Apply execution limits
    pub fn with_options(mut self, options: RunnerOptions) -> Self {
        self.options = options;
        self
    }

    /// Current state
    pub fn state(&self) -> RunnerState {
        self.state
    }

    /// Index of the next instruction
    pub fn pc(&self) -> usize {
        self.pc
    }

    /// Register contents
    pub fn registers(&self) -> &[Value] {
        &self.registers
    }

    /// Captures of the last regex match
    pub fn regexp_context(&self) -> &RegExpContext {
        &self.regexp
    }

    /// Instructions executed since the run started
    pub fn instructions_executed(&self) -> u64 {
        self.executed
    }

    /// Start the handler from its first instruction
    ///
    /// Returns the handler's result, or `Ok(false)` with the runner left
    /// `Suspended` when a native callback suspended it.
    pub fn run(&mut self) -> VmResult<bool> {
        if self.state != RunnerState::Inactive {
            return Err(VmError::InvalidState(format!("cannot run from {:?}", self.state)));
        }
        let count = match self.program.handler(self.handler) {
            Some(handler) => handler.register_count(),
            None => {
                self.state = RunnerState::Trapped;
                return Err(VmError::UnknownHandler(format!("#{}", self.handler)));
            }
        };
        self.registers = vec![Value::Void; count];
        self.pc = 0;
        self.executed = 0;
        self.regexp.clear();
        self.state = RunnerState::Running;
        self.execute()
    }

    /// Continue a suspended run after the suspending call
    pub fn resume(&mut self) -> VmResult<bool> {
        if self.state != RunnerState::Suspended {
            return Err(VmError::InvalidState(format!("cannot resume from {:?}", self.state)));
        }
        self.state = RunnerState::Running;
        if std::mem::take(&mut self.handled_on_resume) {
            self.state = RunnerState::Returned(true);
            return Ok(true);
        }
        self.execute()
    }

    /// Reset to `Inactive` so the handler can be run again
    pub fn rewind(&mut self) {
        self.registers.clear();
        self.pc = 0;
        self.executed = 0;
        self.handled_on_resume = false;
        self.regexp.clear();
        self.state = RunnerState::Inactive;
    }

    fn execute(&mut self) -> VmResult<bool> {
        match self.execute_inner() {
            Ok(Some(result)) => {
                self.state = RunnerState::Returned(result);
                Ok(result)
            }
            Ok(None) => {
                self.state = RunnerState::Suspended;
                Ok(false)
            }
            Err(e) => {
                self.state = RunnerState::Trapped;
                Err(e)
            }
        }
    }

    /// Returns `Some(result)` on exit and `None` on suspension
    fn execute_inner(&mut self) -> VmResult<Option<bool>> {
        let program = self.program;
        let handler = program
            .handler(self.handler)
            .ok_or_else(|| VmError::UnknownHandler(format!("#{}", self.handler)))?;
        let code = handler.code();

        loop {
            let instr = *code.get(self.pc).ok_or(VmError::InvalidJump(self.pc))?;
            self.executed += 1;
            if let Some(max) = self.options.max_instructions {
                if self.executed > max {
                    return Err(VmError::InstructionLimitExceeded(max));
                }
            }
            trace!(handler = handler.name(), pc = self.pc, instr = %instr, "exec");

            match self.step(instr)? {
                Step::Next => self.pc += 1,
                Step::Jump(target) => {
                    if target >= code.len() {
                        return Err(VmError::InvalidJump(target));
                    }
                    self.pc = target;
                }
                Step::Exit(result) => return Ok(Some(result)),
                Step::Suspend { handled } => {
                    self.pc += 1;
                    self.handled_on_resume = handled;
                    return Ok(None);
                }
            }
        }
    }

    fn reg(&self, r: u16) -> VmResult<&Value> {
        self.registers
            .get(r as usize)
            .ok_or(VmError::InvalidRegister(r))
    }

    fn set(&mut self, r: u16, value: Value) -> VmResult<()> {
        let slot = self
            .registers
            .get_mut(r as usize)
            .ok_or(VmError::InvalidRegister(r))?;
        *slot = value;
        Ok(())
    }

    fn step(&mut self, instr: Instruction) -> VmResult<Step> {
        let op = instr
            .opcode()
            .ok_or(VmError::InvalidOpcode(instr.opcode_raw()))?;
        let (a, b, c) = (instr.a(), instr.b(), instr.c());
        let program = self.program;
        let pool = program.constants();
        let missing = |k: u16| VmError::InvalidConstant(k);

        use Opcode::*;
        match op {
            Nop => {}
            Exit => return Ok(Step::Exit(a != 0)),
            Ret => return Ok(Step::Exit(self.reg(a)?.as_bool()?)),
            Jmp => return Ok(Step::Jump(a as usize)),
            Jn => {
                if self.reg(a)?.as_bool()? {
                    return Ok(Step::Jump(b as usize));
                }
            }
            Jz => {
                if !self.reg(a)?.as_bool()? {
                    return Ok(Step::Jump(b as usize));
                }
            }
            Smatcheq | Smatchbeg | Smatchend | Smatchr => {
                let table = program.matcher(a as usize).ok_or(missing(a))?;
                let subject = self.reg(b)?.clone();
                let target = table.evaluate(subject.as_str()?, &mut self.regexp);
                return Ok(Step::Jump(target));
            }

            Mov => {
                let v = self.reg(b)?.clone();
                self.set(a, v)?;
            }
            Alloca => {
                let ty = char::from_u32(b as u32)
                    .and_then(LiteralType::from_signature_code)
                    .ok_or_else(|| VmError::TypeError(format!("bad type code {}", b)))?;
                let size = if ty.is_array() {
                    let n = self.reg(c)?.as_number()?.max(0);
                    let size = usize::try_from(n).unwrap_or(usize::MAX);
                    let limit = self.options.max_array_len;
                    if size > limit {
                        return Err(VmError::ArrayTooLarge { size: n, limit });
                    }
                    size
                } else {
                    0
                };
                self.set(a, default_value(ty, size))?;
            }
            Aset => self.array_set(a, b, c)?,
            Iload => self.set(a, Value::Number(b as i64))?,
            Bload => self.set(a, Value::Boolean(b != 0))?,
            Hload => {
                if program.handler(b as usize).is_none() {
                    return Err(VmError::UnknownHandler(format!("#{}", b)));
                }
                self.set(a, Value::Handler(b as usize))?;
            }
            Nload => {
                let n = pool.get_number(b as usize).ok_or(missing(b))?;
                self.set(a, Value::Number(n))?;
            }
            Sload => {
                let s = pool.get_string(b as usize).ok_or(missing(b))?.clone();
                self.set(a, Value::String(s))?;
            }
            Pload => {
                let ip = pool.get_ipaddr(b as usize).ok_or(missing(b))?;
                self.set(a, Value::IpAddress(ip))?;
            }
            Cload => {
                let cidr = pool.get_cidr(b as usize).ok_or(missing(b))?;
                self.set(a, Value::Cidr(cidr))?;
            }
            Rload => {
                let re = pool.get_regexp(b as usize).ok_or(missing(b))?.clone();
                self.set(a, Value::RegExp(re))?;
            }
            Itload => {
                let v = pool.get_int_array(b as usize).ok_or(missing(b))?.clone();
                self.set(a, Value::IntArray(v))?;
            }
            Stload => {
                let v = pool.get_string_array(b as usize).ok_or(missing(b))?.clone();
                self.set(a, Value::StringArray(v))?;
            }
            Ptload => {
                let v = pool.get_ipaddr_array(b as usize).ok_or(missing(b))?.clone();
                self.set(a, Value::IpAddrArray(v))?;
            }
            Ctload => {
                let v = pool.get_cidr_array(b as usize).ok_or(missing(b))?.clone();
                self.set(a, Value::CidrArray(v))?;
            }

            Sregmatch => {
                let subject = self.reg(b)?.clone();
                let pattern = self.reg(c)?.clone();
                let matched = match pattern.as_regex()?.captures(subject.as_str()?) {
                    Some(captures) => {
                        self.regexp.set(&captures);
                        true
                    }
                    None => {
                        self.regexp.clear();
                        false
                    }
                };
                self.set(a, Value::Boolean(matched))?;
            }
            Sreggroup => {
                let index = self.reg(b)?.as_number()?.max(0) as usize;
                let group = self.regexp.group(index);
                self.set(a, Value::String(group))?;
            }

            Call => return self.call_function(a, b, c),
            Handler => return self.call_handler(a, b, c),

            _ => {
                let result = match op.operand_count() {
                    Some(1) => eval_pure(op, self.reg(b)?, &Value::Void)?,
                    Some(2) => eval_pure(op, self.reg(b)?, self.reg(c)?)?,
                    _ => return Err(VmError::InvalidOpcode(op as u16)),
                };
                self.set(a, result)?;
            }
        }
        Ok(Step::Next)
    }

    fn array_set(&mut self, array: u16, index: u16, value: u16) -> VmResult<()> {
        let i = self.reg(index)?.as_number()?;
        let value = self.reg(value)?.clone();
        let slot = self
            .registers
            .get_mut(array as usize)
            .ok_or(VmError::InvalidRegister(array))?;
        let out_of_bounds = || VmError::TypeError(format!("array index {} out of bounds", i));
        let i = usize::try_from(i).map_err(|_| out_of_bounds())?;
        match (slot, value) {
            (Value::IntArray(v), Value::Number(n)) => {
                *Arc::make_mut(v).get_mut(i).ok_or_else(out_of_bounds)? = n;
            }
            (Value::StringArray(v), Value::String(s)) => {
                *Arc::make_mut(v).get_mut(i).ok_or_else(out_of_bounds)? = s;
            }
            (Value::IpAddrArray(v), Value::IpAddress(ip)) => {
                *Arc::make_mut(v).get_mut(i).ok_or_else(out_of_bounds)? = ip;
            }
            (Value::CidrArray(v), Value::Cidr(cidr)) => {
                *Arc::make_mut(v).get_mut(i).ok_or_else(out_of_bounds)? = cidr;
            }
            (slot, value) => {
                return Err(VmError::TypeError(format!(
                    "cannot store {} into {}",
                    value.literal_type(),
                    slot.literal_type()
                )))
            }
        }
        Ok(())
    }

    fn collect_args(&self, argc: u16, base: u16) -> VmResult<Vec<Value>> {
        (1..=argc)
            .map(|i| {
                let r = base
                    .checked_add(i)
                    .ok_or(VmError::InvalidRegister(u16::MAX))?;
                self.reg(r).cloned()
            })
            .collect()
    }

    fn call_function(&mut self, local: u16, argc: u16, base: u16) -> VmResult<Step> {
        let program = self.program;
        let runtime = program.runtime().ok_or(VmError::NotLinked)?;
        let id = program
            .native_function_id(local as usize)
            .ok_or(VmError::InvalidNativeId(local as usize))?;
        let args = self.collect_args(argc, base)?;
        let mut params = Params::new(args, self.userdata.as_deref_mut());
        runtime.invoke(id, &mut params)?;
        let suspend = params.suspend_requested();
        let result = params.take_result();
        drop(params);
        self.set(base, result)?;
        Ok(if suspend {
            Step::Suspend { handled: false }
        } else {
            Step::Next
        })
    }

    fn call_handler(&mut self, local: u16, argc: u16, base: u16) -> VmResult<Step> {
        let program = self.program;
        let runtime = program.runtime().ok_or(VmError::NotLinked)?;
        let id = program
            .native_handler_id(local as usize)
            .ok_or(VmError::InvalidNativeId(local as usize))?;
        let args = self.collect_args(argc, base)?;
        let mut params = Params::new(args, self.userdata.as_deref_mut());
        runtime.invoke(id, &mut params)?;
        let handled = matches!(params.result(), Value::Boolean(true));
        Ok(if params.suspend_requested() {
            Step::Suspend { handled }
        } else if handled {
            Step::Exit(true)
        } else {
            Step::Next
        })
    }
}

/// Initial value of an `alloca` of type `ty`
fn default_value(ty: LiteralType, size: usize) -> Value {
    let unspecified = IpAddr::V4(Ipv4Addr::UNSPECIFIED);
    let any_net = Cidr::default();
    match ty {
        LiteralType::Boolean => Value::Boolean(false),
        LiteralType::Number => Value::Number(0),
        LiteralType::String => Value::String(Arc::from("")),
        LiteralType::Buffer => Value::Buffer(Arc::from(Vec::new())),
        LiteralType::IPAddress => Value::IpAddress(unspecified),
        LiteralType::Cidr => Value::Cidr(any_net),
        LiteralType::IntArray => Value::IntArray(Arc::new(vec![0; size])),
        LiteralType::StringArray => Value::StringArray(Arc::new(vec![Arc::from(""); size])),
        LiteralType::IPAddrArray => Value::IpAddrArray(Arc::new(vec![unspecified; size])),
        LiteralType::CidrArray => Value::CidrArray(Arc::new(vec![any_net; size])),
        LiteralType::Void | LiteralType::RegExp | LiteralType::Handler => Value::Void,
    }
}

/// Evaluate a pure value operation
///
/// Unary operations ignore `rhs`. Regex capture operations are not pure and
/// are rejected, as are control and call opcodes.
pub(crate) fn eval_pure(op: Opcode, lhs: &Value, rhs: &Value) -> VmResult<Value> {
    use Opcode::*;
    let v = match op {
        Nneg => Value::Number(lhs.as_number()?.wrapping_neg()),
        Nnot => Value::Number(!lhs.as_number()?),
        Nadd => Value::Number(lhs.as_number()?.wrapping_add(rhs.as_number()?)),
        Nsub => Value::Number(lhs.as_number()?.wrapping_sub(rhs.as_number()?)),
        Nmul => Value::Number(lhs.as_number()?.wrapping_mul(rhs.as_number()?)),
        Ndiv | Nrem => {
            let (x, y) = (lhs.as_number()?, rhs.as_number()?);
            if y == 0 {
                return Err(VmError::DivisionByZero);
            }
            Value::Number(if op == Ndiv {
                x.wrapping_div(y)
            } else {
                x.wrapping_rem(y)
            })
        }
        Nshl => Value::Number(lhs.as_number()?.wrapping_shl(rhs.as_number()? as u32)),
        Nshr => Value::Number(lhs.as_number()?.wrapping_shr(rhs.as_number()? as u32)),
        Npow => {
            let (x, y) = (lhs.as_number()?, rhs.as_number()?);
            if y < 0 {
                Value::Number(0)
            } else {
                Value::Number(x.wrapping_pow(u32::try_from(y).unwrap_or(u32::MAX)))
            }
        }
        Nand => Value::Number(lhs.as_number()? & rhs.as_number()?),
        Nor => Value::Number(lhs.as_number()? | rhs.as_number()?),
        Nxor => Value::Number(lhs.as_number()? ^ rhs.as_number()?),
        Ncmpz => Value::Boolean(lhs.as_number()? == 0),
        Ncmpeq => Value::Boolean(lhs.as_number()? == rhs.as_number()?),
        Ncmpne => Value::Boolean(lhs.as_number()? != rhs.as_number()?),
        Ncmple => Value::Boolean(lhs.as_number()? <= rhs.as_number()?),
        Ncmpge => Value::Boolean(lhs.as_number()? >= rhs.as_number()?),
        Ncmplt => Value::Boolean(lhs.as_number()? < rhs.as_number()?),
        Ncmpgt => Value::Boolean(lhs.as_number()? > rhs.as_number()?),

        Bnot => Value::Boolean(!lhs.as_bool()?),
        Band => Value::Boolean(lhs.as_bool()? && rhs.as_bool()?),
        Bor => Value::Boolean(lhs.as_bool()? || rhs.as_bool()?),
        Bxor => Value::Boolean(lhs.as_bool()? ^ rhs.as_bool()?),

        Sadd => {
            let mut s = String::from(lhs.as_str()?);
            s.push_str(rhs.as_str()?);
            Value::string(s)
        }
        Scmpeq => Value::Boolean(lhs.as_str()? == rhs.as_str()?),
        Scmpne => Value::Boolean(lhs.as_str()? != rhs.as_str()?),
        Scmple => Value::Boolean(lhs.as_str()? <= rhs.as_str()?),
        Scmpge => Value::Boolean(lhs.as_str()? >= rhs.as_str()?),
        Scmplt => Value::Boolean(lhs.as_str()? < rhs.as_str()?),
        Scmpgt => Value::Boolean(lhs.as_str()? > rhs.as_str()?),
        Scmpbeg => Value::Boolean(lhs.as_str()?.starts_with(rhs.as_str()?)),
        Scmpend => Value::Boolean(lhs.as_str()?.ends_with(rhs.as_str()?)),
        Scontains => Value::Boolean(lhs.as_str()?.contains(rhs.as_str()?)),
        Slen => Value::Number(lhs.as_str()?.len() as i64),
        Sisempty => Value::Boolean(lhs.as_str()?.is_empty()),

        Pcmpeq => Value::Boolean(lhs.as_ip()? == rhs.as_ip()?),
        Pcmpne => Value::Boolean(lhs.as_ip()? != rhs.as_ip()?),
        Pincidr => Value::Boolean(rhs.as_cidr()?.contains(&lhs.as_ip()?)),

        N2s => Value::string(lhs.as_number()?.to_string()),
        P2s => Value::string(lhs.as_ip()?.to_string()),
        C2s => Value::string(lhs.as_cidr()?.to_string()),
        R2s => Value::string(lhs.as_regex()?.as_str()),
        S2n => Value::Number(lhs.as_str()?.trim().parse().unwrap_or(0)),
        B2s => Value::string(if lhs.as_bool()? { "true" } else { "false" }),

        _ => {
            return Err(VmError::InvalidState(format!(
                "{} is not a pure value operation",
                op
            )))
        }
    };
    Ok(v)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::constants::ConstantPool;
    use crate::vm::opcode::CodeWriter;
    use crate::vm::program::Handler;

    fn program(code: CodeWriter, registers: usize) -> Program {
        Program::new(
            ConstantPool::new(),
            vec![Handler::new("main", code.finish(), registers)],
        )
        .unwrap()
    }

    #[test]
    fn test_eval_pure_numbers() {
        let n = Value::Number;
        assert_eq!(eval_pure(Opcode::Nsub, &n(5), &n(7)), Ok(n(-2)));
        assert_eq!(eval_pure(Opcode::Ndiv, &n(7), &n(2)), Ok(n(3)));
        assert_eq!(eval_pure(Opcode::Nrem, &n(7), &n(0)), Err(VmError::DivisionByZero));
        assert_eq!(eval_pure(Opcode::Npow, &n(2), &n(-1)), Ok(n(0)));
        assert_eq!(eval_pure(Opcode::Nshl, &n(1), &n(4)), Ok(n(16)));
        assert_eq!(eval_pure(Opcode::Nadd, &n(i64::MAX), &n(1)), Ok(n(i64::MIN)));
    }

    #[test]
    fn test_eval_pure_strings_and_conversions() {
        let s = Value::from;
        assert_eq!(eval_pure(Opcode::Scontains, &s("haystack"), &s("st")), Ok(Value::Boolean(true)));
        assert_eq!(eval_pure(Opcode::S2n, &s(" 42 "), &Value::Void), Ok(Value::Number(42)));
        assert_eq!(eval_pure(Opcode::S2n, &s("x"), &Value::Void), Ok(Value::Number(0)));
        assert_eq!(eval_pure(Opcode::B2s, &Value::Boolean(true), &Value::Void), Ok(s("true")));
        assert!(matches!(
            eval_pure(Opcode::Sadd, &s("a"), &Value::Number(1)),
            Err(VmError::TypeError(_))
        ));
        assert!(eval_pure(Opcode::Jmp, &Value::Void, &Value::Void).is_err());
    }

    #[test]
    fn test_eval_pure_ip_in_cidr() {
        let ip: IpAddr = "10.1.2.3".parse().unwrap();
        let net: Cidr = "10.0.0.0/8".parse().unwrap();
        assert_eq!(
            eval_pure(Opcode::Pincidr, &Value::from(ip), &Value::from(net)),
            Ok(Value::Boolean(true))
        );
    }

    #[test]
    fn test_conditional_jump() {
        let mut w = CodeWriter::new();
        w.emit(Opcode::Iload, 0, 3, 0);
        w.emit(Opcode::Iload, 1, 2, 0);
        w.emit(Opcode::Ncmpgt, 2, 0, 1);
        w.emit(Opcode::Jn, 2, 5, 0);
        w.emit(Opcode::Exit, 0, 0, 0);
        w.emit(Opcode::Exit, 1, 0, 0);
        let program = program(w, 3);

        let mut runner = Runner::new(&program, 0);
        assert_eq!(runner.run(), Ok(true));
        assert_eq!(runner.state(), RunnerState::Returned(true));
        assert_eq!(runner.instructions_executed(), 5);
    }

    #[test]
    fn test_error_traps() {
        let mut w = CodeWriter::new();
        w.emit(Opcode::Iload, 0, 1, 0);
        w.emit(Opcode::Iload, 1, 0, 0);
        w.emit(Opcode::Ndiv, 2, 0, 1);
        w.emit(Opcode::Exit, 1, 0, 0);
        let program = program(w, 3);

        let mut runner = Runner::new(&program, 0);
        assert_eq!(runner.run(), Err(VmError::DivisionByZero));
        assert_eq!(runner.state(), RunnerState::Trapped);
        assert!(matches!(runner.run(), Err(VmError::InvalidState(_))));

        runner.rewind();
        assert_eq!(runner.state(), RunnerState::Inactive);
    }

    #[test]
    fn test_instruction_limit() {
        let mut w = CodeWriter::new();
        w.emit(Opcode::Jmp, 0, 0, 0);
        let program = program(w, 0);

        let mut runner = Runner::new(&program, 0).with_options(RunnerOptions {
            max_instructions: Some(100),
            ..RunnerOptions::default()
        });
        assert_eq!(runner.run(), Err(VmError::InstructionLimitExceeded(100)));
    }

    #[test]
    fn test_oversized_alloca_traps() {
        let mut w = CodeWriter::new();
        w.emit(Opcode::Nload, 0, 0, 0);
        w.emit(Opcode::Alloca, 1, 'i' as u16, 0);
        w.emit(Opcode::Exit, 1, 0, 0);
        let mut pool = ConstantPool::new();
        pool.add_number(1 << 40);
        let program = Program::new(pool, vec![Handler::new("main", w.finish(), 2)]).unwrap();

        let mut runner = Runner::new(&program, 0);
        assert_eq!(
            runner.run(),
            Err(VmError::ArrayTooLarge {
                size: 1 << 40,
                limit: DEFAULT_MAX_ARRAY_LEN,
            })
        );
        assert_eq!(runner.state(), RunnerState::Trapped);
    }

    #[test]
    fn test_alloca_within_limit() {
        let mut w = CodeWriter::new();
        w.emit(Opcode::Iload, 0, 4, 0);
        w.emit(Opcode::Alloca, 1, 'i' as u16, 0);
        w.emit(Opcode::Exit, 1, 0, 0);
        let program = program(w, 2);

        let mut runner = Runner::new(&program, 0).with_options(RunnerOptions {
            max_array_len: 4,
            ..RunnerOptions::default()
        });
        assert_eq!(runner.run(), Ok(true));
    }

    #[test]
    fn test_falling_off_the_end_traps() {
        let mut w = CodeWriter::new();
        w.emit(Opcode::Nop, 0, 0, 0);
        let program = program(w, 0);
        assert_eq!(Runner::new(&program, 0).run(), Err(VmError::InvalidJump(1)));
    }

    #[test]
    fn test_alloca_and_array_set() {
        let mut w = CodeWriter::new();
        w.emit(Opcode::Iload, 1, 3, 0);
        w.emit(Opcode::Alloca, 0, 'i' as u16, 1);
        w.emit(Opcode::Iload, 2, 1, 0);
        w.emit(Opcode::Iload, 3, 7, 0);
        w.emit(Opcode::Aset, 0, 2, 3);
        w.emit(Opcode::Exit, 1, 0, 0);
        let program = program(w, 4);

        let mut runner = Runner::new(&program, 0);
        assert_eq!(runner.run(), Ok(true));
        assert_eq!(
            runner.registers()[0],
            Value::IntArray(Arc::new(vec![0, 7, 0]))
        );
    }

    #[test]
    fn test_call_without_link() {
        let mut w = CodeWriter::new();
        w.emit(Opcode::Call, 0, 0, 0);
        w.emit(Opcode::Exit, 1, 0, 0);
        let program = program(w, 1);
        assert_eq!(Runner::new(&program, 0).run(), Err(VmError::NotLinked));
    }

    #[test]
    fn test_options_from_json() {
        let options: RunnerOptions = serde_json::from_str(r#"{"max_instructions": 5}"#).unwrap();
        assert_eq!(options.max_instructions, Some(5));
        let options: RunnerOptions = serde_json::from_str("{}").unwrap();
        assert_eq!(options, RunnerOptions::default());
    }
}
