// Parsing
mod parser;
pub use parser::{assemble, AsmParser};
mod air;
pub use air::{from_bytes, listing, to_bytes, to_text, Air, AsmLine};

// Encoding
mod instr;
pub use instr::{s_ext, DecodeError, ImmOrReg, Instr};
mod symbol;
pub use symbol::{AluOp, Condition, LabelTable, Opcode, Register, ShiftKind, Span};

// Running
mod runtime;
pub use runtime::{
    rgb565_to_rgb888, Fault, Flags, Outcome, RunEnvironment, RunState, Status, MEMORY_MAX,
    VRAM_HEIGHT, VRAM_START, VRAM_WIDTH,
};

mod error;
mod lexer;

pub mod env;

/// Amount of lines to show as context, each side of focus line (line containing span).
pub const DIAGNOSTIC_CONTEXT_LINES: usize = 8;
