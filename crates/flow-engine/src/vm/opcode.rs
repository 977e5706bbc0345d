//! Register-based bytecode for the Flow VM
//!
//! 64-bit fixed-width instructions: `[opcode:16][A:16][B:16][C:16]`.
//! Operands are register indices unless noted: `pc` fields are absolute
//! instruction indices, `k` fields index the program's constant pool, `imm`
//! fields are immediates.

use std::fmt;

use crate::types::LiteralType;

/// VM opcodes
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    // ===== Control =====
    /// No operation
    Nop = 0,
    /// End the run with result `imm` A (0 = false)
    Exit,
    /// End the run with the Boolean in rA
    Ret,
    /// pc = A
    Jmp,
    /// if rA { pc = B }
    Jn,
    /// if !rA { pc = B }
    Jz,

    // ===== Matching =====
    /// Dispatch rB through exact-match table kA
    Smatcheq,
    /// Dispatch rB through prefix-match table kA
    Smatchbeg,
    /// Dispatch rB through suffix-match table kA
    Smatchend,
    /// Dispatch rB through regex-match table kA
    Smatchr,

    // ===== Registers & constants =====
    /// rA = rB
    Mov,
    /// rA = default value of type code B; arrays get rC elements
    Alloca,
    /// rA[rB] = rC
    Aset,
    /// rA = imm B (non-negative number)
    Iload,
    /// rA = numbers[kB]
    Nload,
    /// rA = strings[kB]
    Sload,
    /// rA = ipaddrs[kB]
    Pload,
    /// rA = cidrs[kB]
    Cload,
    /// rA = regexps[kB]
    Rload,
    /// rA = imm B != 0
    Bload,
    /// rA = reference to program handler imm B
    Hload,
    /// rA = int_arrays[kB]
    Itload,
    /// rA = string_arrays[kB]
    Stload,
    /// rA = ipaddr_arrays[kB]
    Ptload,
    /// rA = cidr_arrays[kB]
    Ctload,

    // ===== Numbers =====
    /// rA = -rB
    Nneg,
    /// rA = !rB (bitwise)
    Nnot,
    /// rA = rB + rC
    Nadd,
    /// rA = rB - rC
    Nsub,
    /// rA = rB * rC
    Nmul,
    /// rA = rB / rC
    Ndiv,
    /// rA = rB % rC
    Nrem,
    /// rA = rB << rC
    Nshl,
    /// rA = rB >> rC
    Nshr,
    /// rA = rB ** rC
    Npow,
    /// rA = rB & rC
    Nand,
    /// rA = rB | rC
    Nor,
    /// rA = rB ^ rC
    Nxor,
    /// rA = rB == 0
    Ncmpz,
    /// rA = rB == rC
    Ncmpeq,
    /// rA = rB != rC
    Ncmpne,
    /// rA = rB <= rC
    Ncmple,
    /// rA = rB >= rC
    Ncmpge,
    /// rA = rB < rC
    Ncmplt,
    /// rA = rB > rC
    Ncmpgt,

    // ===== Booleans =====
    /// rA = !rB
    Bnot,
    /// rA = rB && rC
    Band,
    /// rA = rB || rC
    Bor,
    /// rA = rB ^ rC
    Bxor,

    // ===== Strings =====
    /// rA = rB + rC
    Sadd,
    /// rA = rB == rC
    Scmpeq,
    /// rA = rB != rC
    Scmpne,
    /// rA = rB <= rC
    Scmple,
    /// rA = rB >= rC
    Scmpge,
    /// rA = rB < rC
    Scmplt,
    /// rA = rB > rC
    Scmpgt,
    /// rA = rB begins with rC
    Scmpbeg,
    /// rA = rB ends with rC
    Scmpend,
    /// rA = rB contains rC
    Scontains,
    /// rA = length of rB
    Slen,
    /// rA = rB is empty
    Sisempty,
    /// rA = rB =~ rC, remembering captures
    Sregmatch,
    /// rA = capture group rB of the last regex match
    Sreggroup,

    // ===== IP addresses =====
    /// rA = rB == rC
    Pcmpeq,
    /// rA = rB != rC
    Pcmpne,
    /// rA = rB in network rC
    Pincidr,

    // ===== Conversions =====
    /// rA = string of number rB
    N2s,
    /// rA = string of IP rB
    P2s,
    /// rA = string of CIDR rB
    C2s,
    /// rA = pattern of regex rB
    R2s,
    /// rA = number parsed from rB (0 if unparsable)
    S2n,
    /// rA = string of Boolean rB
    B2s,

    // ===== Native calls =====
    /// Call native function A with B args in r(C+1).., result in rC
    Call,
    /// Invoke native handler A with B args in r(C+1)..; handled ends the run
    Handler,
}

const ALL: [Opcode; 74] = [
    Opcode::Nop,
    Opcode::Exit,
    Opcode::Ret,
    Opcode::Jmp,
    Opcode::Jn,
    Opcode::Jz,
    Opcode::Smatcheq,
    Opcode::Smatchbeg,
    Opcode::Smatchend,
    Opcode::Smatchr,
    Opcode::Mov,
    Opcode::Alloca,
    Opcode::Aset,
    Opcode::Iload,
    Opcode::Nload,
    Opcode::Sload,
    Opcode::Pload,
    Opcode::Cload,
    Opcode::Rload,
    Opcode::Bload,
    Opcode::Hload,
    Opcode::Itload,
    Opcode::Stload,
    Opcode::Ptload,
    Opcode::Ctload,
    Opcode::Nneg,
    Opcode::Nnot,
    Opcode::Nadd,
    Opcode::Nsub,
    Opcode::Nmul,
    Opcode::Ndiv,
    Opcode::Nrem,
    Opcode::Nshl,
    Opcode::Nshr,
    Opcode::Npow,
    Opcode::Nand,
    Opcode::Nor,
    Opcode::Nxor,
    Opcode::Ncmpz,
    Opcode::Ncmpeq,
    Opcode::Ncmpne,
    Opcode::Ncmple,
    Opcode::Ncmpge,
    Opcode::Ncmplt,
    Opcode::Ncmpgt,
    Opcode::Bnot,
    Opcode::Band,
    Opcode::Bor,
    Opcode::Bxor,
    Opcode::Sadd,
    Opcode::Scmpeq,
    Opcode::Scmpne,
    Opcode::Scmple,
    Opcode::Scmpge,
    Opcode::Scmplt,
    Opcode::Scmpgt,
    Opcode::Scmpbeg,
    Opcode::Scmpend,
    Opcode::Scontains,
    Opcode::Slen,
    Opcode::Sisempty,
    Opcode::Sregmatch,
    Opcode::Sreggroup,
    Opcode::Pcmpeq,
    Opcode::Pcmpne,
    Opcode::Pincidr,
    Opcode::N2s,
    Opcode::P2s,
    Opcode::C2s,
    Opcode::R2s,
    Opcode::S2n,
    Opcode::B2s,
    Opcode::Call,
    Opcode::Handler,
];

impl Opcode {
    /// Decode an opcode
    pub fn from_u16(raw: u16) -> Option<Self> {
        ALL.get(raw as usize).copied()
    }

    /// Lowercase mnemonic
    pub fn mnemonic(self) -> &'static str {
        match self {
            Self::Nop => "nop",
            Self::Exit => "exit",
            Self::Ret => "ret",
            Self::Jmp => "jmp",
            Self::Jn => "jn",
            Self::Jz => "jz",
            Self::Smatcheq => "smatcheq",
            Self::Smatchbeg => "smatchbeg",
            Self::Smatchend => "smatchend",
            Self::Smatchr => "smatchr",
            Self::Mov => "mov",
            Self::Alloca => "alloca",
            Self::Aset => "aset",
            Self::Iload => "iload",
            Self::Nload => "nload",
            Self::Sload => "sload",
            Self::Pload => "pload",
            Self::Cload => "cload",
            Self::Rload => "rload",
            Self::Bload => "bload",
            Self::Hload => "hload",
            Self::Itload => "itload",
            Self::Stload => "stload",
            Self::Ptload => "ptload",
            Self::Ctload => "ctload",
            Self::Nneg => "nneg",
            Self::Nnot => "nnot",
            Self::Nadd => "nadd",
            Self::Nsub => "nsub",
            Self::Nmul => "nmul",
            Self::Ndiv => "ndiv",
            Self::Nrem => "nrem",
            Self::Nshl => "nshl",
            Self::Nshr => "nshr",
            Self::Npow => "npow",
            Self::Nand => "nand",
            Self::Nor => "nor",
            Self::Nxor => "nxor",
            Self::Ncmpz => "ncmpz",
            Self::Ncmpeq => "ncmpeq",
            Self::Ncmpne => "ncmpne",
            Self::Ncmple => "ncmple",
            Self::Ncmpge => "ncmpge",
            Self::Ncmplt => "ncmplt",
            Self::Ncmpgt => "ncmpgt",
            Self::Bnot => "bnot",
            Self::Band => "band",
            Self::Bor => "bor",
            Self::Bxor => "bxor",
            Self::Sadd => "sadd",
            Self::Scmpeq => "scmpeq",
            Self::Scmpne => "scmpne",
            Self::Scmple => "scmple",
            Self::Scmpge => "scmpge",
            Self::Scmplt => "scmplt",
            Self::Scmpgt => "scmpgt",
            Self::Scmpbeg => "scmpbeg",
            Self::Scmpend => "scmpend",
            Self::Scontains => "scontains",
            Self::Slen => "slen",
            Self::Sisempty => "sisempty",
            Self::Sregmatch => "sregmatch",
            Self::Sreggroup => "sreggroup",
            Self::Pcmpeq => "pcmpeq",
            Self::Pcmpne => "pcmpne",
            Self::Pincidr => "pincidr",
            Self::N2s => "n2s",
            Self::P2s => "p2s",
            Self::C2s => "c2s",
            Self::R2s => "r2s",
            Self::S2n => "s2n",
            Self::B2s => "b2s",
            Self::Call => "call",
            Self::Handler => "handler",
        }
    }

    /// Register inputs of a pure `rA = op(rB[, rC])` operation
    ///
    /// `None` for opcodes that are not plain value operations; those cannot
    /// appear as raw VM instructions in the IR.
    pub fn operand_count(self) -> Option<usize> {
        use Opcode::*;
        match self {
            Nneg | Nnot | Ncmpz | Bnot | Slen | Sisempty | Sreggroup | N2s | P2s | C2s | R2s
            | S2n | B2s => Some(1),
            Nadd | Nsub | Nmul | Ndiv | Nrem | Nshl | Nshr | Npow | Nand | Nor | Nxor | Ncmpeq
            | Ncmpne | Ncmple | Ncmpge | Ncmplt | Ncmpgt | Band | Bor | Bxor | Sadd | Scmpeq
            | Scmpne | Scmple | Scmpge | Scmplt | Scmpgt | Scmpbeg | Scmpend | Scontains
            | Sregmatch | Pcmpeq | Pcmpne | Pincidr => Some(2),
            _ => None,
        }
    }

    /// Type written to rA by a value operation
    pub fn result_type(self) -> LiteralType {
        use Opcode::*;
        match self {
            Nneg | Nnot | Nadd | Nsub | Nmul | Ndiv | Nrem | Nshl | Nshr | Npow | Nand | Nor
            | Nxor | Slen | S2n => LiteralType::Number,
            Ncmpz | Ncmpeq | Ncmpne | Ncmple | Ncmpge | Ncmplt | Ncmpgt | Bnot | Band | Bor
            | Bxor | Scmpeq | Scmpne | Scmple | Scmpge | Scmplt | Scmpgt | Scmpbeg | Scmpend
            | Scontains | Sisempty | Sregmatch | Pcmpeq | Pcmpne | Pincidr => LiteralType::Boolean,
            Sadd | Sreggroup | N2s | P2s | C2s | R2s | B2s => LiteralType::String,
            _ => LiteralType::Void,
        }
    }

    /// Whether field B (Jn/Jz) or A (Jmp) is a jump target
    pub fn is_jump(self) -> bool {
        matches!(self, Self::Jmp | Self::Jn | Self::Jz)
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.mnemonic())
    }
}

/// One encoded instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Instruction(pub u64);

impl Instruction {
    /// Encode `[op][A][B][C]`
    #[inline]
    pub fn new(op: Opcode, a: u16, b: u16, c: u16) -> Self {
        Self((op as u64) << 48 | (a as u64) << 32 | (b as u64) << 16 | c as u64)
    }

    /// Raw opcode field
    #[inline]
    pub fn opcode_raw(self) -> u16 {
        (self.0 >> 48) as u16
    }

    /// Decoded opcode
    #[inline]
    pub fn opcode(self) -> Option<Opcode> {
        Opcode::from_u16(self.opcode_raw())
    }

    /// Field A
    #[inline]
    pub fn a(self) -> u16 {
        (self.0 >> 32) as u16
    }

    /// Field B
    #[inline]
    pub fn b(self) -> u16 {
        (self.0 >> 16) as u16
    }

    /// Field C
    #[inline]
    pub fn c(self) -> u16 {
        self.0 as u16
    }

    /// Copy with field A replaced
    #[inline]
    pub fn with_a(self, a: u16) -> Self {
        Self(self.0 & !(0xFFFFu64 << 32) | (a as u64) << 32)
    }

    /// Copy with field B replaced
    #[inline]
    pub fn with_b(self, b: u16) -> Self {
        Self(self.0 & !(0xFFFFu64 << 16) | (b as u64) << 16)
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Some(op) = self.opcode() else {
            return write!(f, "<invalid {:#06x}>", self.opcode_raw());
        };
        let (a, b, c) = (self.a(), self.b(), self.c());
        use Opcode::*;
        match op {
            Nop => write!(f, "{}", op),
            Exit => write!(f, "{:<10} {}", op, a != 0),
            Ret => write!(f, "{:<10} r{}", op, a),
            Jmp => write!(f, "{:<10} {}", op, a),
            Jn | Jz => write!(f, "{:<10} r{}, {}", op, a, b),
            Smatcheq | Smatchbeg | Smatchend | Smatchr => write!(f, "{:<10} k{}, r{}", op, a, b),
            Iload | Bload | Hload => write!(f, "{:<10} r{}, {}", op, a, b),
            Nload | Sload | Pload | Cload | Rload | Itload | Stload | Ptload | Ctload => {
                write!(f, "{:<10} r{}, k{}", op, a, b)
            }
            Alloca => {
                let code = char::from_u32(b as u32).unwrap_or('?');
                write!(f, "{:<10} r{}, {}, r{}", op, a, code, c)
            }
            Call | Handler => write!(f, "{:<10} n{}, {}, r{}", op, a, b, c),
            _ => match op.operand_count() {
                Some(1) => write!(f, "{:<10} r{}, r{}", op, a, b),
                _ => write!(f, "{:<10} r{}, r{}, r{}", op, a, b, c),
            },
        }
    }
}

/// Emits instructions and patches forward jumps
#[derive(Debug, Default)]
pub struct CodeWriter {
    code: Vec<Instruction>,
}

impl CodeWriter {
    /// Create an empty writer
    pub fn new() -> Self {
        Self::default()
    }

    /// Emit an instruction and return its position
    #[inline]
    pub fn emit(&mut self, op: Opcode, a: u16, b: u16, c: u16) -> usize {
        let pos = self.code.len();
        self.code.push(Instruction::new(op, a, b, c));
        pos
    }

    /// Position of the next instruction
    #[inline]
    pub fn position(&self) -> usize {
        self.code.len()
    }

    /// Overwrite field A at `pos`
    pub fn patch_a(&mut self, pos: usize, a: u16) {
        if let Some(instr) = self.code.get_mut(pos) {
            *instr = instr.with_a(a);
        }
    }

    /// Overwrite field B at `pos`
    pub fn patch_b(&mut self, pos: usize, b: u16) {
        if let Some(instr) = self.code.get_mut(pos) {
            *instr = instr.with_b(b);
        }
    }

    /// Finish and return the code
    pub fn finish(self) -> Vec<Instruction> {
        self.code
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_table_matches_discriminants() {
        for (i, op) in ALL.iter().enumerate() {
            assert_eq!(*op as u16 as usize, i, "{:?}", op);
            assert_eq!(Opcode::from_u16(i as u16), Some(*op));
        }
        assert_eq!(Opcode::from_u16(ALL.len() as u16), None);
    }

    #[test]
    fn test_encode_decode() {
        let instr = Instruction::new(Opcode::Nadd, 2, 0, 65535);
        assert_eq!(instr.opcode(), Some(Opcode::Nadd));
        assert_eq!(instr.a(), 2);
        assert_eq!(instr.b(), 0);
        assert_eq!(instr.c(), 65535);
    }

    #[test]
    fn test_patch_jump_target() {
        let mut w = CodeWriter::new();
        let jz = w.emit(Opcode::Jz, 3, 0, 0);
        let jmp = w.emit(Opcode::Jmp, 0, 0, 0);
        w.emit(Opcode::Exit, 1, 0, 0);
        w.patch_b(jz, 2);
        w.patch_a(jmp, 2);
        let code = w.finish();
        assert_eq!(code[jz].a(), 3);
        assert_eq!(code[jz].b(), 2);
        assert_eq!(code[jmp].a(), 2);
    }

    #[test]
    fn test_value_op_metadata() {
        assert_eq!(Opcode::Nadd.operand_count(), Some(2));
        assert_eq!(Opcode::Slen.operand_count(), Some(1));
        assert_eq!(Opcode::Jmp.operand_count(), None);
        assert_eq!(Opcode::Scmpbeg.result_type(), LiteralType::Boolean);
        assert_eq!(Opcode::Sadd.result_type(), LiteralType::String);
        assert_eq!(Opcode::Nmul.result_type(), LiteralType::Number);
    }

    #[test]
    fn test_display() {
        assert_eq!(Instruction::new(Opcode::Nadd, 2, 0, 1).to_string(), "nadd       r2, r0, r1");
        assert_eq!(Instruction::new(Opcode::Exit, 1, 0, 0).to_string(), "exit       true");
        assert_eq!(Instruction(u64::MAX).to_string(), "<invalid 0xffff>");
    }
}
