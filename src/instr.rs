use std::fmt;

use crate::symbol::{AluOp, Condition, Opcode, Register, ShiftKind};

// Field widths shared by the assembler and the decoder.
pub const ALU_IMM_BITS: u32 = 8;
pub const SHIFT_AMOUNT_BITS: u32 = 6;
pub const MEM_OFFSET_BITS: u32 = 6;
pub const STACK_VALUE_BITS: u32 = 10;
pub const BRANCH_OFFSET_BITS: u32 = 9;
pub const CALL_OFFSET_BITS: u32 = 11;

/// Sign-extend the low `bits` bits of `val` to a full word.
#[inline]
pub fn s_ext(val: u16, bits: u32) -> u16 {
    debug_assert!(bits > 0 && bits < 16);
    // Sign bit
    let sign = val & (1u16 << (bits - 1));
    // Bits lower than sign bit
    let magnitude = val & ((1u16 << (bits - 1)) - 1);
    // Positive input: 0x0000, negative input: sign bit and everything above it set
    let sign_extension = (!sign).wrapping_add(1);
    magnitude | sign_extension
}

/// Low `bits` bits of `val`, i.e. the two's complement field for a signed value.
#[inline]
pub fn trunc(val: i32, bits: u32) -> u16 {
    (val as u16) & mask(bits)
}

#[inline]
pub fn mask(bits: u32) -> u16 {
    ((1u32 << bits) - 1) as u16
}

/// Inclusive range of values a signed field of `bits` bits can hold.
pub fn signed_range(bits: u32) -> (i32, i32) {
    let half = 1i32 << (bits - 1);
    (-half, half - 1)
}

/// Inclusive range of values an unsigned field of `bits` bits can hold.
pub fn unsigned_range(bits: u32) -> (i32, i32) {
    (0, (1i32 << bits) - 1)
}

pub fn fits_signed(val: i32, bits: u32) -> bool {
    let (min, max) = signed_range(bits);
    (min..=max).contains(&val)
}

pub fn fits_unsigned(val: i32, bits: u32) -> bool {
    let (min, max) = unsigned_range(bits);
    (min..=max).contains(&val)
}

/// Second operand of the register-or-immediate forms.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ImmOrReg {
    Reg(Register),
    Imm(u16),
}

/// A fully decoded instruction. This is the only meaning a word has.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Instr {
    Halt,
    /// `dest = dest <op> src`
    Alu {
        op: AluOp,
        dest: Register,
        src: ImmOrReg,
    },
    /// Shift or rotate `dest`. A register amount uses that register's value.
    Shift {
        kind: ShiftKind,
        dest: Register,
        amount: ImmOrReg,
    },
    Mov {
        dest: Register,
        src: ImmOrReg,
    },
    /// `dest = mem[base + offset]`
    Load {
        dest: Register,
        base: Register,
        offset: i16,
    },
    /// `mem[base + offset] = src`
    Store {
        src: Register,
        base: Register,
        offset: i16,
    },
    Push {
        src: ImmOrReg,
    },
    Pop {
        dest: Register,
    },
    Cmp {
        lhs: Register,
        rhs: Register,
    },
    /// Offset is relative to the word after the branch.
    Branch {
        cond: Condition,
        offset: i16,
    },
    /// Offset is relative to the word after the call.
    Call {
        offset: i16,
    },
    Ret,
}

/// Why a word has no meaning.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum DecodeError {
    /// Stack mode 3.
    StackMode,
    /// Register-mode shift whose amount field is not a register index.
    ShiftRegister(u16),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StackMode => write!(f, "stack mode 3 is not defined"),
            Self::ShiftRegister(field) => {
                write!(f, "shift amount field {field} does not name a register")
            }
        }
    }
}

impl Instr {
    pub fn opcode(&self) -> Opcode {
        match self {
            Instr::Halt => Opcode::Hlt,
            Instr::Alu { op, .. } => op.opcode(),
            Instr::Shift { .. } => Opcode::Shf,
            Instr::Mov { .. } => Opcode::Mov,
            Instr::Load { .. } => Opcode::Ld,
            Instr::Store { .. } => Opcode::St,
            Instr::Push { .. } | Instr::Pop { .. } => Opcode::Stack,
            Instr::Cmp { .. } => Opcode::Cmp,
            Instr::Branch { .. } => Opcode::Br,
            Instr::Call { .. } | Instr::Ret => Opcode::Func,
        }
    }

    /// Encode into a word. Field values must already fit; the assembler checks them.
    pub fn encode(&self) -> u16 {
        let base = self.opcode().base();
        match *self {
            Instr::Halt => base,
            Instr::Alu { dest, src, .. } | Instr::Mov { dest, src } => {
                // [op:4] [rd:3] [imm:8 | ....rs:3] [mode:1]
                let operand = match src {
                    ImmOrReg::Imm(imm) => ((imm & mask(ALU_IMM_BITS)) << 1) | 1,
                    ImmOrReg::Reg(reg) => reg.bits() << 1,
                };
                base | dest.bits() << 9 | operand
            }
            Instr::Shift { kind, dest, amount } => {
                // [op:4] [rd:3] [amount:6] [kind:2] [imm:1]
                let (field, imm) = match amount {
                    ImmOrReg::Imm(amount) => (amount & mask(SHIFT_AMOUNT_BITS), 1),
                    ImmOrReg::Reg(reg) => (reg.bits(), 0),
                };
                base | dest.bits() << 9 | field << 3 | kind.bits() << 1 | imm
            }
            Instr::Load { dest: reg, base: base_r, offset }
            | Instr::Store { src: reg, base: base_r, offset } => {
                // [op:4] [r:3] [base:3] [offset:6]
                base | reg.bits() << 9
                    | base_r.bits() << 6
                    | trunc(offset as i32, MEM_OFFSET_BITS)
            }
            Instr::Push { src } => {
                // [op:4] [value:10] [mode:2]
                let (value, mode) = match src {
                    ImmOrReg::Reg(reg) => (reg.bits(), StackMode::PushReg),
                    ImmOrReg::Imm(imm) => (imm & mask(STACK_VALUE_BITS), StackMode::PushImm),
                };
                base | value << 2 | mode as u16
            }
            Instr::Pop { dest } => base | dest.bits() << 2 | StackMode::Pop as u16,
            Instr::Cmp { lhs, rhs } => {
                // [op:4] [ra:3] [rb:3] [unused:6]
                base | lhs.bits() << 9 | rhs.bits() << 6
            }
            Instr::Branch { cond, offset } => {
                // [op:4] [offset:9] [cond:3]
                base | trunc(offset as i32, BRANCH_OFFSET_BITS) << 3 | cond.bits()
            }
            Instr::Call { offset } => {
                // [op:4] [offset:11] [mode:1]
                base | trunc(offset as i32, CALL_OFFSET_BITS) << 1
            }
            Instr::Ret => base | 1,
        }
    }

    pub fn decode(word: u16) -> Result<Instr, DecodeError> {
        let dest = Register::from_bits(word >> 9);
        let instr = match Opcode::of_word(word) {
            Opcode::Hlt => Instr::Halt,
            op @ (Opcode::Add
            | Opcode::Sub
            | Opcode::Mul
            | Opcode::Div
            | Opcode::And
            | Opcode::Or
            | Opcode::Xor
            | Opcode::Mov) => {
                let src = if word & 1 != 0 {
                    ImmOrReg::Imm((word >> 1) & mask(ALU_IMM_BITS))
                } else {
                    ImmOrReg::Reg(Register::from_bits(word >> 1))
                };
                match op {
                    Opcode::Add => Instr::Alu { op: AluOp::Add, dest, src },
                    Opcode::Sub => Instr::Alu { op: AluOp::Sub, dest, src },
                    Opcode::Mul => Instr::Alu { op: AluOp::Mul, dest, src },
                    Opcode::Div => Instr::Alu { op: AluOp::Div, dest, src },
                    Opcode::And => Instr::Alu { op: AluOp::And, dest, src },
                    Opcode::Or => Instr::Alu { op: AluOp::Or, dest, src },
                    Opcode::Xor => Instr::Alu { op: AluOp::Xor, dest, src },
                    _ => Instr::Mov { dest, src },
                }
            }
            Opcode::Shf => {
                let field = (word >> 3) & mask(SHIFT_AMOUNT_BITS);
                let amount = if word & 1 != 0 {
                    ImmOrReg::Imm(field)
                } else {
                    let reg = Register::from_index(field).ok_or(DecodeError::ShiftRegister(field))?;
                    ImmOrReg::Reg(reg)
                };
                Instr::Shift {
                    kind: ShiftKind::from_bits(word >> 1),
                    dest,
                    amount,
                }
            }
            Opcode::Ld => Instr::Load {
                dest,
                base: Register::from_bits(word >> 6),
                offset: s_ext(word, MEM_OFFSET_BITS) as i16,
            },
            Opcode::St => Instr::Store {
                src: dest,
                base: Register::from_bits(word >> 6),
                offset: s_ext(word, MEM_OFFSET_BITS) as i16,
            },
            Opcode::Stack => {
                let value = (word >> 2) & mask(STACK_VALUE_BITS);
                match word & 0b11 {
                    0 => Instr::Push {
                        src: ImmOrReg::Reg(Register::from_bits(value)),
                    },
                    1 => Instr::Pop {
                        dest: Register::from_bits(value),
                    },
                    2 => Instr::Push {
                        src: ImmOrReg::Imm(value),
                    },
                    _ => return Err(DecodeError::StackMode),
                }
            }
            Opcode::Cmp => Instr::Cmp {
                lhs: dest,
                rhs: Register::from_bits(word >> 6),
            },
            Opcode::Br => Instr::Branch {
                cond: Condition::from_bits(word),
                offset: s_ext(word >> 3, BRANCH_OFFSET_BITS) as i16,
            },
            Opcode::Func => {
                if word & 1 == 0 {
                    Instr::Call {
                        offset: s_ext(word >> 1, CALL_OFFSET_BITS) as i16,
                    }
                } else {
                    Instr::Ret
                }
            }
        };
        Ok(instr)
    }
}

#[derive(Clone, Copy)]
enum StackMode {
    PushReg = 0,
    Pop = 1,
    PushImm = 2,
}

impl fmt::Display for ImmOrReg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImmOrReg::Reg(reg) => write!(f, "{reg}"),
            ImmOrReg::Imm(imm) => write!(f, "#{imm}"),
        }
    }
}

/// Disassembly. Branch and call targets are shown as relative offsets.
impl fmt::Display for Instr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instr::Halt => write!(f, "HLT"),
            Instr::Alu { op, dest, src } => write!(f, "{} {dest}, {src}", op.opcode()),
            Instr::Shift { kind, dest, amount } => {
                let name = match kind {
                    ShiftKind::Shl => "SHL",
                    ShiftKind::Shr => "SHR",
                    ShiftKind::Sar => "SAR",
                    ShiftKind::Ror => "ROR",
                };
                write!(f, "{name} {dest}, {amount}")
            }
            Instr::Mov { dest, src } => write!(f, "MOV {dest}, {src}"),
            Instr::Load { dest, base, offset } => write!(f, "LD {dest}, [{base}{offset:+}]"),
            Instr::Store { src, base, offset } => write!(f, "ST {src}, [{base}{offset:+}]"),
            Instr::Push { src } => write!(f, "PUSH {src}"),
            Instr::Pop { dest } => write!(f, "POP {dest}"),
            Instr::Cmp { lhs, rhs } => write!(f, "CMP {lhs}, {rhs}"),
            Instr::Branch { cond, offset } => write!(f, "BR {cond}, {offset:+}"),
            Instr::Call { offset } => write!(f, "CALL {offset:+}"),
            Instr::Ret => write!(f, "RET"),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn s_ext() {
        #[rustfmt::skip]
        let cases = [
            // (input, bits, expected)
            (0x001F, 6, 0x001F),
            (0x0020, 6, 0xFFE0),
            (0x003F, 6, 0xFFFF),
            (0x00FF, 9, 0x00FF),
            (0x0100, 9, 0xFF00),
            (0x01FF, 9, 0xFFFF),
            (0x03FF, 11, 0x03FF),
            (0x0400, 11, 0xFC00),
            (0x07FE, 11, 0xFFFE),
            // Bits above the field are ignored
            (0xFFC1, 6, 0x0001),
            (0x8000, 9, 0x0000),
        ];
        for (input, bits, expected) in cases {
            let actual = super::s_ext(input, bits);
            assert_eq!(
                actual, expected,
                "s_ext(0x{input:04x}, {bits}) == 0x{actual:04x}"
            );
        }
    }

    #[test]
    fn field_limits() {
        assert!(fits_unsigned(255, ALU_IMM_BITS));
        assert!(!fits_unsigned(256, ALU_IMM_BITS));
        assert!(!fits_unsigned(-1, ALU_IMM_BITS));
        assert!(fits_signed(-32, MEM_OFFSET_BITS));
        assert!(!fits_signed(32, MEM_OFFSET_BITS));
        assert_eq!(signed_range(BRANCH_OFFSET_BITS), (-256, 255));
        assert_eq!(unsigned_range(STACK_VALUE_BITS), (0, 1023));
        assert_eq!(trunc(-1, 6), 0x3F);
    }

    #[test]
    fn encode_layouts() {
        let add_imm = Instr::Alu {
            op: AluOp::Add,
            dest: Register::R1,
            src: ImmOrReg::Imm(5),
        };
        assert_eq!(add_imm.encode(), 0x1000 | 1 << 9 | 5 << 1 | 1);

        let mov_reg = Instr::Mov {
            dest: Register::R2,
            src: ImmOrReg::Reg(Register::R3),
        };
        assert_eq!(mov_reg.encode(), 0x9000 | 2 << 9 | 3 << 1);

        let cmp = Instr::Cmp {
            lhs: Register::R1,
            rhs: Register::R2,
        };
        assert_eq!(cmp.encode(), 0xD000 | 1 << 9 | 2 << 6);

        let ld = Instr::Load {
            dest: Register::R4,
            base: Register::R5,
            offset: -1,
        };
        assert_eq!(ld.encode(), 0xA000 | 4 << 9 | 5 << 6 | 0x3F);

        let br = Instr::Branch {
            cond: Condition::Ne,
            offset: -2,
        };
        assert_eq!(br.encode(), 0xE000 | 0x1FE << 3 | 1);

        let pop = Instr::Pop { dest: Register::R3 };
        assert_eq!(pop.encode(), 0xC000 | 3 << 2 | 1);

        let push = Instr::Push {
            src: ImmOrReg::Imm(1023),
        };
        assert_eq!(push.encode(), 0xC000 | 1023 << 2 | 2);

        assert_eq!(Instr::Ret.encode(), 0xF001);
        assert_eq!(Instr::Halt.encode(), 0x0000);
    }

    #[test]
    fn decode_inverts_encode() {
        let instrs = [
            Instr::Halt,
            Instr::Alu {
                op: AluOp::Xor,
                dest: Register::R7,
                src: ImmOrReg::Imm(255),
            },
            Instr::Alu {
                op: AluOp::Div,
                dest: Register::R0,
                src: ImmOrReg::Reg(Register::R6),
            },
            Instr::Shift {
                kind: ShiftKind::Sar,
                dest: Register::R3,
                amount: ImmOrReg::Imm(63),
            },
            Instr::Shift {
                kind: ShiftKind::Ror,
                dest: Register::R3,
                amount: ImmOrReg::Reg(Register::R7),
            },
            Instr::Mov {
                dest: Register::R4,
                src: ImmOrReg::Imm(0),
            },
            Instr::Mov {
                dest: Register::R2,
                src: ImmOrReg::Reg(Register::R0),
            },
            Instr::Load {
                dest: Register::R6,
                base: Register::R7,
                offset: 31,
            },
            Instr::Store {
                src: Register::R1,
                base: Register::R2,
                offset: -32,
            },
            Instr::Push {
                src: ImmOrReg::Reg(Register::R5),
            },
            Instr::Push {
                src: ImmOrReg::Imm(0),
            },
            Instr::Pop { dest: Register::R0 },
            Instr::Cmp {
                lhs: Register::R3,
                rhs: Register::R5,
            },
            Instr::Cmp {
                lhs: Register::R7,
                rhs: Register::R1,
            },
            Instr::Branch {
                cond: Condition::Le,
                offset: 255,
            },
            Instr::Call { offset: -1024 },
            Instr::Ret,
        ];
        for instr in instrs {
            assert_eq!(Instr::decode(instr.encode()), Ok(instr), "{instr}");
        }
    }

    #[test]
    fn decode_illegal() {
        assert_eq!(Instr::decode(0xC003), Err(DecodeError::StackMode));
        // Register-mode shift naming "register" 8
        assert_eq!(
            Instr::decode(0x8000 | 8 << 3),
            Err(DecodeError::ShiftRegister(8))
        );
    }

    #[test]
    fn display() {
        let ld = Instr::Load {
            dest: Register::R1,
            base: Register::R2,
            offset: 3,
        };
        assert_eq!(ld.to_string(), "LD r1, [r2+3]");
        let br = Instr::Branch {
            cond: Condition::Eq,
            offset: -4,
        };
        assert_eq!(br.to_string(), "BR EQ, -4");
    }
}
