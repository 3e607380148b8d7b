use std::{fmt, thread, time::Duration};

use colored::Colorize;
use miette::{bail, Result};

use crate::{
    instr::{ImmOrReg, Instr},
    symbol::{AluOp, Condition, Opcode, Register, ShiftKind},
    Air,
};

/// Memory holds 64K words.
pub const MEMORY_MAX: usize = 0x10000;
/// Loads and stores into this range fault.
pub const PROTECTED: std::ops::RangeInclusive<u16> = 0x0100..=0x7FFF;
/// Lowest address the stack may occupy. The stack grows down from `0xFFFF`.
pub const STACK_BASE: u16 = 0xF000;
/// Stack pointer value of an empty stack.
pub const STACK_EMPTY: u16 = 0xFFFF;

pub const VRAM_START: u16 = 0xE000;
pub const VRAM_WIDTH: usize = 64;
pub const VRAM_HEIGHT: usize = 64;

/// Represents complete machine state during runtime.
pub struct RunState {
    /// System memory, 64K words
    mem: Box<[u16]>,
    /// Program counter
    pc: u16,
    /// 8x 16-bit registers, r0 is the stack pointer
    reg: [u16; 8],
    /// Written by `CMP` and the ALU ops
    flags: Flags,
    status: Status,
    /// Print every executed instruction to stderr
    trace: bool,
}

#[derive(Clone, Copy, Default, PartialEq, Eq, Debug)]
pub struct Flags {
    pub zero: bool,
    pub negative: bool,
    pub carry: bool,
    pub overflow: bool,
}

impl Flags {
    /// Flags of `lhs - rhs`.
    pub fn compare(lhs: u16, rhs: u16) -> Flags {
        let res = lhs.wrapping_sub(rhs);
        Flags {
            zero: res == 0,
            negative: (res as i16) < 0,
            carry: lhs < rhs,
            // Operand signs differ and the result sign differs from lhs
            overflow: (lhs ^ rhs) & (lhs ^ res) & 0x8000 != 0,
        }
    }

    /// ALU results update zero and negative. Carry and overflow are left to `CMP`.
    fn set_result(&mut self, res: u16) {
        self.zero = res == 0;
        self.negative = (res as i16) < 0;
    }

    pub fn holds(&self, cond: Condition) -> bool {
        match cond {
            Condition::Eq => self.zero,
            Condition::Ne => !self.zero,
            Condition::Gt => !self.negative && !self.zero,
            Condition::Lt => self.negative,
            Condition::Ge => !self.negative || self.zero,
            Condition::Le => self.negative || self.zero,
            Condition::Always => true,
            Condition::Reserved => false,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Status {
    Running,
    /// `None` for a normal `HLT`.
    Halted(Option<Fault>),
}

/// Run-time conditions that halt the machine. `addr` is the address of the faulting word.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Fault {
    IllegalInstruction { opcode: Opcode, word: u16, addr: u16 },
    ProtectedAccess { target: u16, addr: u16 },
    StackOverflow { addr: u16 },
    StackUnderflow { addr: u16 },
    DivideByZero { addr: u16 },
}

impl std::error::Error for Fault {}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IllegalInstruction { opcode, word, addr } => write!(
                f,
                "illegal instruction 0x{word:04X} (opcode {opcode}, 0x{:X}) at 0x{addr:04X}",
                opcode.bits()
            ),
            Self::ProtectedAccess { target, addr } => write!(
                f,
                "access to protected address 0x{target:04X} at 0x{addr:04X}"
            ),
            Self::StackOverflow { addr } => write!(f, "stack overflow at 0x{addr:04X}"),
            Self::StackUnderflow { addr } => write!(f, "stack underflow at 0x{addr:04X}"),
            Self::DivideByZero { addr } => write!(f, "division by zero at 0x{addr:04X}"),
        }
    }
}

impl Default for RunState {
    fn default() -> Self {
        Self::new()
    }
}

impl RunState {
    /// Machine after reset: zeroed memory and registers, empty stack, PC 0.
    pub fn new() -> RunState {
        let mut reg = [0; 8];
        reg[Register::SP.index()] = STACK_EMPTY;
        RunState {
            mem: vec![0; MEMORY_MAX].into_boxed_slice(),
            pc: 0,
            reg,
            flags: Flags::default(),
            status: Status::Running,
            trace: false,
        }
    }

    // Not generic because of miette error
    pub fn try_from(air: &Air) -> Result<RunState> {
        RunState::from_raw(&air.emit())
    }

    /// Reset and place word `i` of `raw` at address `i`.
    pub fn from_raw(raw: &[u16]) -> Result<RunState> {
        if raw.len() > MEMORY_MAX {
            bail!(
                "Program is {} words long and cannot fit in memory ({MEMORY_MAX} words).",
                raw.len()
            );
        }
        let mut state = RunState::new();
        state.mem[..raw.len()].copy_from_slice(raw);
        Ok(state)
    }

    pub fn set_trace(&mut self, trace: bool) {
        self.trace = trace;
    }

    pub fn pc(&self) -> u16 {
        self.pc
    }

    pub fn set_pc(&mut self, pc: u16) {
        self.pc = pc;
    }

    pub fn reg(&self, reg: Register) -> u16 {
        self.reg[reg.index()]
    }

    pub fn reg_mut(&mut self, reg: Register) -> &mut u16 {
        &mut self.reg[reg.index()]
    }

    pub fn mem(&self, addr: u16) -> u16 {
        self.mem[addr as usize]
    }

    pub fn mem_mut(&mut self, addr: u16) -> &mut u16 {
        &mut self.mem[addr as usize]
    }

    pub fn flags(&self) -> Flags {
        self.flags
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn is_running(&self) -> bool {
        self.status == Status::Running
    }

    /// Fault that halted the machine, if any.
    pub fn fault(&self) -> Option<Fault> {
        match self.status {
            Status::Halted(fault) => fault,
            Status::Running => None,
        }
    }

    /// The 64x64 RGB565 pixel window, row major.
    pub fn vram(&self) -> &[u16] {
        let start = VRAM_START as usize;
        &self.mem[start..start + VRAM_WIDTH * VRAM_HEIGHT]
    }

    /// Execute a single instruction. Does nothing once halted.
    ///
    /// A fault halts the machine, is returned, and stays available through [`RunState::fault`].
    pub fn step(&mut self) -> std::result::Result<(), Fault> {
        if !self.is_running() {
            return Ok(());
        }
        let addr = self.pc;
        let word = self.mem(addr);
        // PC incremented before instruction is performed
        self.pc = self.pc.wrapping_add(1);

        let res = match Instr::decode(word) {
            Ok(instr) => {
                if self.trace {
                    eprintln!("{} {addr:04x}: {word:04x}  {instr}", "trace".dimmed());
                }
                self.execute(instr, addr)
            }
            Err(_) => Err(Fault::IllegalInstruction {
                opcode: Opcode::of_word(word),
                word,
                addr,
            }),
        };
        if let Err(fault) = res {
            self.status = Status::Halted(Some(fault));
        }
        res
    }

    fn execute(&mut self, instr: Instr, addr: u16) -> std::result::Result<(), Fault> {
        match instr {
            Instr::Halt => {
                self.status = Status::Halted(None);
            }
            Instr::Alu { op, dest, src } => {
                let lhs = self.reg(dest);
                let rhs = self.operand(src);
                let res = match op {
                    AluOp::Add => lhs.wrapping_add(rhs),
                    AluOp::Sub => lhs.wrapping_sub(rhs),
                    AluOp::Mul => lhs.wrapping_mul(rhs),
                    AluOp::Div => lhs
                        .checked_div(rhs)
                        .ok_or(Fault::DivideByZero { addr })?,
                    AluOp::And => lhs & rhs,
                    AluOp::Or => lhs | rhs,
                    AluOp::Xor => lhs ^ rhs,
                };
                *self.reg_mut(dest) = res;
                self.flags.set_result(res);
            }
            Instr::Shift { kind, dest, amount } => {
                let val = self.reg(dest);
                let amount = self.operand(amount) as u32;
                *self.reg_mut(dest) = shift(kind, val, amount);
            }
            Instr::Mov { dest, src } => {
                *self.reg_mut(dest) = self.operand(src);
            }
            Instr::Load { dest, base, offset } => {
                let target = self.effective_addr(base, offset, addr)?;
                *self.reg_mut(dest) = self.mem(target);
            }
            Instr::Store { src, base, offset } => {
                let target = self.effective_addr(base, offset, addr)?;
                *self.mem_mut(target) = self.reg(src);
            }
            Instr::Push { src } => {
                let val = self.operand(src);
                self.push_val(val, addr)?;
            }
            Instr::Pop { dest } => {
                let val = self.pop_val(addr)?;
                *self.reg_mut(dest) = val;
            }
            Instr::Cmp { lhs, rhs } => {
                self.flags = Flags::compare(self.reg(lhs), self.reg(rhs));
            }
            Instr::Branch { cond, offset } => {
                if self.flags.holds(cond) {
                    self.pc = self.pc.wrapping_add(offset as u16);
                }
            }
            Instr::Call { offset } => {
                self.push_val(self.pc, addr)?;
                self.pc = self.pc.wrapping_add(offset as u16);
            }
            Instr::Ret => {
                self.pc = self.pop_val(addr)?;
            }
        }
        Ok(())
    }

    fn operand(&self, src: ImmOrReg) -> u16 {
        match src {
            ImmOrReg::Reg(reg) => self.reg(reg),
            ImmOrReg::Imm(imm) => imm,
        }
    }

    fn effective_addr(&self, base: Register, offset: i16, addr: u16) -> std::result::Result<u16, Fault> {
        let target = self.reg(base).wrapping_add(offset as u16);
        if PROTECTED.contains(&target) {
            return Err(Fault::ProtectedAccess { target, addr });
        }
        Ok(target)
    }

    fn push_val(&mut self, val: u16, addr: u16) -> std::result::Result<(), Fault> {
        let sp = self.reg(Register::SP);
        if sp <= STACK_BASE {
            return Err(Fault::StackOverflow { addr });
        }
        let sp = sp - 1;
        *self.reg_mut(Register::SP) = sp;
        *self.mem_mut(sp) = val;
        Ok(())
    }

    fn pop_val(&mut self, addr: u16) -> std::result::Result<u16, Fault> {
        let sp = self.reg(Register::SP);
        // Empty, or pointing outside the stack area
        if sp < STACK_BASE || sp == STACK_EMPTY {
            return Err(Fault::StackUnderflow { addr });
        }
        let val = self.mem(sp);
        *self.reg_mut(Register::SP) = sp + 1;
        Ok(val)
    }

    /// Registers and flags, one per line.
    pub fn dump(&self) -> String {
        let mut out = String::new();
        for reg in Register::ALL {
            let val = self.reg(reg);
            out.push_str(&format!("{reg}: 0x{val:04X} {val:>6} {:>6}\n", val as i16));
        }
        let flags = self.flags;
        out.push_str(&format!(
            "pc: 0x{:04X}\nflags: Z={} N={} C={} V={}\n",
            self.pc, flags.zero as u8, flags.negative as u8, flags.carry as u8, flags.overflow as u8
        ));
        out
    }
}

/// `amount` is the full 16-bit register value for register-sourced shifts.
fn shift(kind: ShiftKind, val: u16, amount: u32) -> u16 {
    match kind {
        ShiftKind::Shl => val.checked_shl(amount).unwrap_or(0),
        ShiftKind::Shr => val.checked_shr(amount).unwrap_or(0),
        ShiftKind::Sar => ((val as i16) >> amount.min(15)) as u16,
        ShiftKind::Ror => val.rotate_right(amount % 16),
    }
}

/// Expand an RGB565 pixel to 8 bits per channel.
pub fn rgb565_to_rgb888(pixel: u16) -> [u8; 3] {
    let r = (pixel >> 11) & 0x1F;
    let g = (pixel >> 5) & 0x3F;
    let b = pixel & 0x1F;
    [
        ((r << 3) | (r >> 2)) as u8,
        ((g << 2) | (g >> 4)) as u8,
        ((b << 3) | (b >> 2)) as u8,
    ]
}

/// Why [`RunEnvironment::run`] stopped.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Outcome {
    Halted,
    Faulted(Fault),
    /// The step budget ran out while the machine was still running.
    StepLimit,
}

/// Host loop: steps the machine in fixed-size slices, the way a display front end would
/// between frames.
pub struct RunEnvironment {
    state: RunState,
    steps_per_slice: u32,
    max_steps: Option<u64>,
    pace: Option<Duration>,
    steps: u64,
}

impl RunEnvironment {
    pub const DEFAULT_STEPS_PER_SLICE: u32 = 100;

    pub fn new(state: RunState) -> Self {
        RunEnvironment {
            state,
            steps_per_slice: Self::DEFAULT_STEPS_PER_SLICE,
            max_steps: None,
            pace: None,
            steps: 0,
        }
    }

    pub fn from_raw(raw: &[u16]) -> Result<Self> {
        Ok(Self::new(RunState::from_raw(raw)?))
    }

    pub fn try_from(air: &Air) -> Result<Self> {
        Ok(Self::new(RunState::try_from(air)?))
    }

    pub fn set_steps_per_slice(&mut self, steps: u32) {
        self.steps_per_slice = steps.max(1);
    }

    pub fn set_max_steps(&mut self, max_steps: Option<u64>) {
        self.max_steps = max_steps;
    }

    /// Sleep between slices. Does not affect results.
    pub fn set_pace(&mut self, pace: Option<Duration>) {
        self.pace = pace;
    }

    pub fn set_trace(&mut self, trace: bool) {
        self.state.set_trace(trace);
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut RunState {
        &mut self.state
    }

    /// Total steps executed so far.
    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// Run one slice. Returns `false` once the machine stopped or the budget is spent.
    pub fn run_slice(&mut self) -> bool {
        for _ in 0..self.steps_per_slice {
            if !self.state.is_running() || self.budget_spent() {
                return false;
            }
            self.steps += 1;
            if self.state.step().is_err() {
                return false;
            }
        }
        self.state.is_running() && !self.budget_spent()
    }

    /// Run until halted, faulted or out of budget.
    pub fn run(&mut self) -> Outcome {
        while self.run_slice() {
            if let Some(pace) = self.pace {
                thread::sleep(pace);
            }
        }
        match self.state.status() {
            Status::Halted(None) => Outcome::Halted,
            Status::Halted(Some(fault)) => Outcome::Faulted(fault),
            Status::Running => Outcome::StepLimit,
        }
    }

    fn budget_spent(&self) -> bool {
        self.max_steps.is_some_and(|max| self.steps >= max)
    }
}
