use std::{fmt, ops::Range, str::FromStr};

use fxhash::FxBuildHasher;
use indexmap::IndexMap;
use miette::SourceSpan;

type FxMap<K, V> = IndexMap<K, V, FxBuildHasher>;

/// Label name -> instruction index. Lives for a single assembly only.
#[derive(Default, Debug)]
pub struct LabelTable(FxMap<String, usize>);

impl LabelTable {
    pub fn new() -> Self {
        LabelTable(IndexMap::with_hasher(FxBuildHasher::default()))
    }

    /// Bind `name` to `index`. Returns `Err` with the existing index if already bound.
    pub fn insert(&mut self, name: &str, index: usize) -> Result<(), usize> {
        if let Some(existing) = self.0.get(name) {
            return Err(*existing);
        }
        self.0.insert(name.to_owned(), index);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<usize> {
        self.0.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, usize)> {
        self.0.iter().map(|(name, idx)| (name.as_str(), *idx))
    }
}

/// Location within source
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Span {
    offs: SrcOffset,
    len: usize,
}

impl Span {
    pub fn new(offs: SrcOffset, len: usize) -> Self {
        Span { offs, len }
    }

    pub fn dummy() -> Self {
        Span {
            offs: SrcOffset(0),
            len: 0,
        }
    }

    pub fn range(&self) -> Range<usize> {
        self.offs.0..self.offs.0 + self.len
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn offs(&self) -> usize {
        self.offs.0
    }

    pub fn end(&self) -> usize {
        self.offs.0 + self.len
    }

    /// Smallest span covering both `self` and `other`.
    pub fn join(&self, other: Span) -> Span {
        let start = self.offs().min(other.offs());
        let end = self.end().max(other.end());
        Span::new(SrcOffset(start), end - start)
    }
}

impl From<Span> for SourceSpan {
    fn from(value: Span) -> Self {
        SourceSpan::new(value.offs().into(), value.len())
    }
}

impl From<Span> for Range<usize> {
    fn from(value: Span) -> Self {
        value.range()
    }
}

/// Used to refer to offsets from the start of a source file.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub struct SrcOffset(pub usize);

/// Represents the CPU registers.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum Register {
    /// Stack pointer. Starts at `0xFFFF` (empty stack).
    R0 = 0,
    R1,
    R2,
    R3,
    R4,
    R5,
    R6,
    R7,
}

impl Register {
    pub const ALL: [Register; 8] = [
        Register::R0,
        Register::R1,
        Register::R2,
        Register::R3,
        Register::R4,
        Register::R5,
        Register::R6,
        Register::R7,
    ];

    /// Register used by `PUSH`/`POP`/`CALL`/`RET`.
    pub const SP: Register = Register::R0;

    /// Only the low three bits of `bits` are considered.
    pub fn from_bits(bits: u16) -> Register {
        Register::ALL[(bits & 0b111) as usize]
    }

    /// Fails on anything outside `0..=7` instead of masking.
    pub fn from_index(index: u16) -> Option<Register> {
        Register::ALL.get(index as usize).copied()
    }

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn bits(self) -> u16 {
        self as u16
    }
}

impl FromStr for Register {
    type Err = ();

    /// Accepts `r0`..`r7`, any case.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.strip_prefix(['r', 'R']).ok_or(())?;
        match digits {
            "0" => Ok(Register::R0),
            "1" => Ok(Register::R1),
            "2" => Ok(Register::R2),
            "3" => Ok(Register::R3),
            "4" => Ok(Register::R4),
            "5" => Ok(Register::R5),
            "6" => Ok(Register::R6),
            "7" => Ok(Register::R7),
            _ => Err(()),
        }
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.index())
    }
}

/// The 4-bit operation selector in the top of every word.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Opcode {
    Hlt = 0x0,
    Add = 0x1,
    Sub = 0x2,
    Mul = 0x3,
    Div = 0x4,
    And = 0x5,
    Or = 0x6,
    Xor = 0x7,
    Shf = 0x8,
    Mov = 0x9,
    Ld = 0xA,
    St = 0xB,
    Stack = 0xC,
    Cmp = 0xD,
    Br = 0xE,
    Func = 0xF,
}

impl Opcode {
    const TABLE: [Opcode; 16] = [
        Opcode::Hlt,
        Opcode::Add,
        Opcode::Sub,
        Opcode::Mul,
        Opcode::Div,
        Opcode::And,
        Opcode::Or,
        Opcode::Xor,
        Opcode::Shf,
        Opcode::Mov,
        Opcode::Ld,
        Opcode::St,
        Opcode::Stack,
        Opcode::Cmp,
        Opcode::Br,
        Opcode::Func,
    ];

    pub fn of_word(word: u16) -> Opcode {
        Opcode::TABLE[(word >> 12) as usize]
    }

    pub fn bits(self) -> u16 {
        self as u16
    }

    /// Word with only the opcode nibble set.
    pub fn base(self) -> u16 {
        self.bits() << 12
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Opcode::Hlt => "HLT",
            Opcode::Add => "ADD",
            Opcode::Sub => "SUB",
            Opcode::Mul => "MUL",
            Opcode::Div => "DIV",
            Opcode::And => "AND",
            Opcode::Or => "OR",
            Opcode::Xor => "XOR",
            Opcode::Shf => "SHF",
            Opcode::Mov => "MOV",
            Opcode::Ld => "LD",
            Opcode::St => "ST",
            Opcode::Stack => "STACK",
            Opcode::Cmp => "CMP",
            Opcode::Br => "BR",
            Opcode::Func => "FUNC",
        };
        f.write_str(name)
    }
}

/// Everything the assembler accepts in mnemonic position, aliases included.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Mnemonic {
    Hlt,
    Alu(AluOp),
    Mov,
    /// Family name only, use one of the shift aliases.
    Shf,
    Shift(ShiftKind),
    Ld,
    St,
    /// Family name only, use `PUSH`/`POP`.
    Stack,
    Push,
    Pop,
    Cmp,
    Br,
    /// Family name only, use `CALL`/`RET`.
    Func,
    Call,
    Ret,
}

impl Mnemonic {
    pub fn opcode(self) -> Opcode {
        match self {
            Mnemonic::Hlt => Opcode::Hlt,
            Mnemonic::Alu(op) => op.opcode(),
            Mnemonic::Mov => Opcode::Mov,
            Mnemonic::Shf | Mnemonic::Shift(_) => Opcode::Shf,
            Mnemonic::Ld => Opcode::Ld,
            Mnemonic::St => Opcode::St,
            Mnemonic::Stack | Mnemonic::Push | Mnemonic::Pop => Opcode::Stack,
            Mnemonic::Cmp => Opcode::Cmp,
            Mnemonic::Br => Opcode::Br,
            Mnemonic::Func | Mnemonic::Call | Mnemonic::Ret => Opcode::Func,
        }
    }

    /// Concrete mnemonics to suggest when a family name is used on its own.
    pub fn aliases(self) -> Option<&'static str> {
        match self {
            Mnemonic::Shf => Some("SHL, SHR, SAR or ROR"),
            Mnemonic::Stack => Some("PUSH or POP"),
            Mnemonic::Func => Some("CALL or RET"),
            _ => None,
        }
    }
}

impl FromStr for Mnemonic {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mnemonic = match s.to_ascii_uppercase().as_str() {
            "HLT" => Mnemonic::Hlt,
            "ADD" => Mnemonic::Alu(AluOp::Add),
            "SUB" => Mnemonic::Alu(AluOp::Sub),
            "MUL" => Mnemonic::Alu(AluOp::Mul),
            "DIV" => Mnemonic::Alu(AluOp::Div),
            "AND" => Mnemonic::Alu(AluOp::And),
            "OR" => Mnemonic::Alu(AluOp::Or),
            "XOR" => Mnemonic::Alu(AluOp::Xor),
            "SHF" => Mnemonic::Shf,
            "SHL" => Mnemonic::Shift(ShiftKind::Shl),
            "SHR" => Mnemonic::Shift(ShiftKind::Shr),
            "SAR" => Mnemonic::Shift(ShiftKind::Sar),
            "ROR" => Mnemonic::Shift(ShiftKind::Ror),
            "MOV" => Mnemonic::Mov,
            "LD" => Mnemonic::Ld,
            "ST" => Mnemonic::St,
            "STACK" => Mnemonic::Stack,
            "PUSH" => Mnemonic::Push,
            "POP" => Mnemonic::Pop,
            "CMP" => Mnemonic::Cmp,
            "BR" => Mnemonic::Br,
            "FUNC" => Mnemonic::Func,
            "CALL" => Mnemonic::Call,
            "RET" => Mnemonic::Ret,
            _ => return Err(()),
        };
        Ok(mnemonic)
    }
}

/// Two-operand arithmetic/logic operations sharing the register-or-immediate layout.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum AluOp {
    Add,
    Sub,
    Mul,
    Div,
    And,
    Or,
    Xor,
}

impl AluOp {
    pub fn opcode(self) -> Opcode {
        match self {
            AluOp::Add => Opcode::Add,
            AluOp::Sub => Opcode::Sub,
            AluOp::Mul => Opcode::Mul,
            AluOp::Div => Opcode::Div,
            AluOp::And => Opcode::And,
            AluOp::Or => Opcode::Or,
            AluOp::Xor => Opcode::Xor,
        }
    }
}

/// Mode field of the `SHF` opcode.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ShiftKind {
    /// Logical left
    Shl = 0,
    /// Logical right
    Shr = 1,
    /// Arithmetic right, keeps the sign
    Sar = 2,
    /// Rotate right
    Ror = 3,
}

impl ShiftKind {
    pub fn from_bits(bits: u16) -> ShiftKind {
        match bits & 0b11 {
            0 => ShiftKind::Shl,
            1 => ShiftKind::Shr,
            2 => ShiftKind::Sar,
            _ => ShiftKind::Ror,
        }
    }

    pub fn bits(self) -> u16 {
        self as u16
    }
}

/// Branch condition, evaluated against the current flags.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Condition {
    /// ==
    Eq = 0,
    /// !=
    Ne = 1,
    /// >
    Gt = 2,
    /// <
    Lt = 3,
    /// >=
    Ge = 4,
    /// <=
    Le = 5,
    /// Unconditional
    Always = 6,
    /// Encodable but never taken.
    Reserved = 7,
}

impl Condition {
    pub fn from_bits(bits: u16) -> Condition {
        match bits & 0b111 {
            0 => Condition::Eq,
            1 => Condition::Ne,
            2 => Condition::Gt,
            3 => Condition::Lt,
            4 => Condition::Ge,
            5 => Condition::Le,
            6 => Condition::Always,
            _ => Condition::Reserved,
        }
    }

    pub fn bits(self) -> u16 {
        self as u16
    }
}

impl FromStr for Condition {
    type Err = ();

    /// Only the names usable in source; `Reserved` has none.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "EQ" => Ok(Condition::Eq),
            "NE" => Ok(Condition::Ne),
            "GT" => Ok(Condition::Gt),
            "LT" => Ok(Condition::Lt),
            "GE" => Ok(Condition::Ge),
            "LE" => Ok(Condition::Le),
            "AL" => Ok(Condition::Always),
            _ => Err(()),
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Condition::Eq => "EQ",
            Condition::Ne => "NE",
            Condition::Gt => "GT",
            Condition::Lt => "LT",
            Condition::Ge => "GE",
            Condition::Le => "LE",
            Condition::Always => "AL",
            Condition::Reserved => "??",
        };
        f.write_str(name)
    }
}
