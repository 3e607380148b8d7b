use std::fmt::Display;

use miette::{miette, LabeledSpan, Report, Severity};

use crate::{lexer::Token, symbol::Span};

// Lexer errors

pub fn lex_invalid_lit(span: Span, src: &str, e: impl Display) -> Report {
    miette!(
        severity = Severity::Error,
        code = "lex::bad_lit",
        help = "literals look like #12, #-3 or #0x1F",
        labels = vec![LabeledSpan::at(span, "incorrect literal")],
        "Encountered an invalid literal: {e}",
    )
    .with_source_code(src.to_owned())
}

pub fn lex_unknown(span: Span, src: &str) -> Report {
    miette!(
        severity = Severity::Error,
        code = "lex::unknown",
        help = "make sure that your immediates start with # and memory operands look like [r1+2]",
        labels = vec![LabeledSpan::at(span, "unknown token")],
        "Encountered an unknown token",
    )
    .with_source_code(src.to_owned())
}

// Label errors

pub fn asm_duplicate_label(span: Span, src: &str, first_index: usize) -> Report {
    miette!(
        severity = Severity::Error,
        code = "asm::duplicate_label",
        help = format!("this label already names instruction {first_index}"),
        labels = vec![LabeledSpan::at(span, "duplicate label")],
        "Duplicate label definition",
    )
    .with_source_code(src.to_owned())
}

pub fn asm_unresolved_label(span: Span, src: &str, name: &str) -> Report {
    miette!(
        severity = Severity::Error,
        code = "asm::unresolved_label",
        help = "labels are defined by writing `name:` before an instruction",
        labels = vec![LabeledSpan::at(span, "unresolved label")],
        "Label `{name}` is never defined",
    )
    .with_source_code(src.to_owned())
}

pub fn asm_too_long(span: Span, src: &str, max: usize) -> Report {
    miette!(
        severity = Severity::Error,
        code = "asm::too_long",
        help = format!("a program holds at most {max} instructions"),
        labels = vec![LabeledSpan::at(span, "does not fit in memory")],
        "Program is too long",
    )
    .with_source_code(src.to_owned())
}

// Instruction errors

pub fn asm_unknown_mnemonic(span: Span, src: &str, name: &str) -> Report {
    miette!(
        severity = Severity::Error,
        code = "asm::unknown_mnemonic",
        help = "check the list of available instructions in the documentation",
        labels = vec![LabeledSpan::at(span, "unknown mnemonic")],
        "Unknown opcode `{name}`",
    )
    .with_source_code(src.to_owned())
}

pub fn asm_family_mnemonic(span: Span, src: &str, name: &str, aliases: &str) -> Report {
    miette!(
        severity = Severity::Error,
        code = "asm::family_mnemonic",
        help = format!("use one of {aliases} instead"),
        labels = vec![LabeledSpan::at(span, "ambiguous mnemonic")],
        "`{name}` names an instruction family, not an instruction",
    )
    .with_source_code(src.to_owned())
}

pub fn asm_unknown_register(span: Span, src: &str, name: &str) -> Report {
    miette!(
        severity = Severity::Error,
        code = "asm::unknown_register",
        help = "registers are named r0 to r7",
        labels = vec![LabeledSpan::at(span, "unknown register")],
        "Unknown register `{name}`",
    )
    .with_source_code(src.to_owned())
}

pub fn asm_overflow(span: Span, src: &str, field: &str, value: i64, (min, max): (i32, i32)) -> Report {
    miette!(
        severity = Severity::Error,
        code = "asm::overflow",
        help = format!("the {field} field holds values from {min} to {max}"),
        labels = vec![LabeledSpan::at(span, "out-of-range value")],
        "Value {value} does not fit in the {field} field",
    )
    .with_source_code(src.to_owned())
}

pub fn asm_unexpected(src: &str, expected: &str, found: Token) -> Report {
    miette!(
        severity = Severity::Error,
        code = "asm::unexpected_token",
        help = "check the operands for this instruction",
        labels = vec![LabeledSpan::at(found.span, "unexpected token")],
        "Expected {expected}, found {}",
        found.kind
    )
    .with_source_code(src.to_owned())
}

/// `span` is the instruction missing the operand.
pub fn asm_missing_operand(span: Span, src: &str, expected: &str) -> Report {
    miette!(
        severity = Severity::Error,
        code = "asm::missing_operand",
        help = "you may be missing operands in this statement",
        labels = vec![LabeledSpan::at(span, "incomplete instruction")],
        "Expected {expected}, found end of line",
    )
    .with_source_code(src.to_owned())
}

pub fn asm_extra_operand(src: &str, found: Token) -> Report {
    miette!(
        severity = Severity::Error,
        code = "asm::extra_operand",
        help = "each line holds exactly one instruction",
        labels = vec![LabeledSpan::at(found.span, "extra operand")],
        "Too many operands for this instruction",
    )
    .with_source_code(src.to_owned())
}
