use std::{iter::Peekable, str::FromStr, vec::IntoIter};

use miette::Result;

use crate::{
    air::{Air, AsmLine},
    error,
    instr::{self, ImmOrReg, Instr},
    lexer::{tokenize_line, Token, TokenKind},
    runtime::MEMORY_MAX,
    symbol::{Condition, LabelTable, Mnemonic, Register, Span},
};

/// Assemble a whole source file. Fails on the first error without producing any output.
pub fn assemble(src: &str) -> Result<Air> {
    AsmParser::new(src)?.parse()
}

/// Two-pass assembler. [`AsmParser::new`] runs label discovery, [`AsmParser::parse`] encodes.
pub struct AsmParser<'a> {
    /// Reference to the source file
    src: &'a str,
    /// Tokenized instruction lines, labels stripped. Index == address.
    lines: Vec<InstrLine>,
    labels: LabelTable,
}

/// One line holding exactly one instruction.
struct InstrLine {
    /// 1-based
    line: usize,
    toks: Vec<Token>,
}

impl<'a> AsmParser<'a> {
    /// Pass 1: tokenize every line and bind labels to the index of the instruction they
    /// precede.
    pub fn new(src: &'a str) -> Result<Self> {
        let mut lines = Vec::new();
        let mut labels = LabelTable::new();
        let mut offset = 0;

        for (line_idx, line) in src.split('\n').enumerate() {
            let base = offset;
            offset += line.len() + 1;

            let mut toks = tokenize_line(src, line, base)?;
            if toks.is_empty() {
                continue;
            }

            // Leading label definitions all bind to the next instruction
            let label_count = toks
                .iter()
                .take_while(|tok| tok.kind == TokenKind::LabelDef)
                .count();
            for label in toks.drain(..label_count) {
                let name = &src[label.span.offs()..label.span.end() - 1];
                if let Err(first) = labels.insert(name, lines.len()) {
                    return Err(error::asm_duplicate_label(label.span, src, first));
                }
            }
            if toks.is_empty() {
                continue;
            }

            if lines.len() == MEMORY_MAX {
                return Err(error::asm_too_long(toks[0].span, src, MEMORY_MAX));
            }
            lines.push(InstrLine {
                line: line_idx + 1,
                toks,
            });
        }

        Ok(AsmParser { src, lines, labels })
    }

    pub fn labels(&self) -> &LabelTable {
        &self.labels
    }

    /// Pass 2: encode each line against the finished label table.
    pub fn parse(self) -> Result<Air> {
        let mut air = Air::new();
        for (idx, line) in self.lines.iter().enumerate() {
            let span = line.toks[0].span.join(line.toks[line.toks.len() - 1].span);
            let mut ops = Operands {
                src: self.src,
                labels: &self.labels,
                toks: line.toks.clone().into_iter().peekable(),
                instr_span: span,
                index: idx,
            };
            let stmt = ops.instr()?;
            ops.finish()?;
            air.add_stmt(AsmLine {
                line: line.line,
                span,
                stmt,
            });
        }
        // Consume self to return AIR
        Ok(air)
    }
}

/// Operand reader for a single instruction line.
struct Operands<'a> {
    src: &'a str,
    labels: &'a LabelTable,
    toks: Peekable<IntoIter<Token>>,
    instr_span: Span,
    /// Address of the instruction being encoded
    index: usize,
}

impl<'a> Operands<'a> {
    fn text(&self, tok: Token) -> &'a str {
        &self.src[tok.span.range()]
    }

    fn instr(&mut self) -> Result<Instr> {
        let head = self.next("instruction")?;
        if head.kind != TokenKind::Ident {
            return Err(error::asm_unexpected(self.src, "instruction", head));
        }
        let name = self.text(head);
        let mnemonic = Mnemonic::from_str(name)
            .map_err(|_| error::asm_unknown_mnemonic(head.span, self.src, name))?;

        let stmt = match mnemonic {
            Mnemonic::Hlt => Instr::Halt,
            Mnemonic::Alu(op) => {
                let dest = self.expect_reg()?;
                let src = self.expect_reg_or_imm(instr::ALU_IMM_BITS, "immediate")?;
                Instr::Alu { op, dest, src }
            }
            Mnemonic::Mov => {
                let dest = self.expect_reg()?;
                let src = self.expect_reg_or_imm(instr::ALU_IMM_BITS, "immediate")?;
                Instr::Mov { dest, src }
            }
            Mnemonic::Shift(kind) => {
                let dest = self.expect_reg()?;
                let amount = self.expect_reg_or_imm(instr::SHIFT_AMOUNT_BITS, "shift amount")?;
                Instr::Shift { kind, dest, amount }
            }
            Mnemonic::Ld => {
                let dest = self.expect_reg()?;
                let (base, offset) = self.expect_mem()?;
                Instr::Load { dest, base, offset }
            }
            Mnemonic::St => {
                let src = self.expect_reg()?;
                let (base, offset) = self.expect_mem()?;
                Instr::Store { src, base, offset }
            }
            Mnemonic::Push => {
                let src = self.expect_reg_or_imm(instr::STACK_VALUE_BITS, "stack value")?;
                Instr::Push { src }
            }
            Mnemonic::Pop => Instr::Pop {
                dest: self.expect_reg()?,
            },
            Mnemonic::Cmp => {
                let lhs = self.expect_reg()?;
                let rhs = self.expect_reg()?;
                Instr::Cmp { lhs, rhs }
            }
            Mnemonic::Br => {
                self.reject_bare_condition()?;
                let cond = self.optional_condition();
                let offset = self.expect_label_offset(instr::BRANCH_OFFSET_BITS, "branch offset")?;
                Instr::Branch { cond, offset }
            }
            Mnemonic::Call => Instr::Call {
                offset: self.expect_label_offset(instr::CALL_OFFSET_BITS, "call offset")?,
            },
            Mnemonic::Ret => Instr::Ret,
            Mnemonic::Shf | Mnemonic::Stack | Mnemonic::Func => {
                let aliases = mnemonic.aliases().unwrap_or_default();
                return Err(error::asm_family_mnemonic(head.span, self.src, name, aliases));
            }
        };
        debug_assert_eq!(stmt.opcode(), mnemonic.opcode());
        Ok(stmt)
    }

    /// Error if anything is left on the line.
    fn finish(&mut self) -> Result<()> {
        match self.toks.next() {
            Some(extra) => Err(error::asm_extra_operand(self.src, extra)),
            None => Ok(()),
        }
    }

    fn next(&mut self, expected: &str) -> Result<Token> {
        self.toks
            .next()
            .ok_or_else(|| error::asm_missing_operand(self.instr_span, self.src, expected))
    }

    fn expect(&mut self, expected: TokenKind, name: &str) -> Result<Token> {
        match self.next(name)? {
            tok if tok.kind == expected => Ok(tok),
            unexpected => Err(error::asm_unexpected(self.src, name, unexpected)),
        }
    }

    fn expect_reg(&mut self) -> Result<Register> {
        let tok = self.next("register")?;
        match tok.kind {
            TokenKind::Reg(reg) => Ok(reg),
            // Looks like a name, so most likely a misspelled register
            TokenKind::Ident => Err(error::asm_unknown_register(tok.span, self.src, self.text(tok))),
            _ => Err(error::asm_unexpected(self.src, "register", tok)),
        }
    }

    fn expect_reg_or_imm(&mut self, bits: u32, field: &str) -> Result<ImmOrReg> {
        let tok = self.next("register or immediate")?;
        match tok.kind {
            TokenKind::Reg(reg) => Ok(ImmOrReg::Reg(reg)),
            TokenKind::Lit(val) => {
                if !instr::fits_unsigned(val, bits) {
                    return Err(error::asm_overflow(
                        tok.span,
                        self.src,
                        field,
                        val as i64,
                        instr::unsigned_range(bits),
                    ));
                }
                Ok(ImmOrReg::Imm(val as u16))
            }
            TokenKind::Ident => Err(error::asm_unknown_register(tok.span, self.src, self.text(tok))),
            _ => Err(error::asm_unexpected(self.src, "register or immediate", tok)),
        }
    }

    /// `[rN]`, `[rN+off]` or `[rN-off]`
    fn expect_mem(&mut self) -> Result<(Register, i16)> {
        self.expect(TokenKind::OpenBracket, "memory operand")?;
        let base = self.expect_reg()?;
        let offset = match self.toks.peek().copied() {
            Some(tok) => match tok.kind {
                TokenKind::Int(val) | TokenKind::Lit(val) => {
                    self.toks.next();
                    if !instr::fits_signed(val, instr::MEM_OFFSET_BITS) {
                        return Err(error::asm_overflow(
                            tok.span,
                            self.src,
                            "memory offset",
                            val as i64,
                            instr::signed_range(instr::MEM_OFFSET_BITS),
                        ));
                    }
                    val as i16
                }
                _ => 0,
            },
            None => 0,
        };
        self.expect(TokenKind::CloseBracket, "']'")?;
        Ok((base, offset))
    }

    /// `BR NE` with nothing after it is missing its label, unless a label really is named `NE`.
    fn reject_bare_condition(&self) -> Result<()> {
        let mut ahead = self.toks.clone();
        if let (Some(tok), None) = (ahead.next(), ahead.next()) {
            let name = self.text(tok);
            if tok.kind == TokenKind::Ident
                && Condition::from_str(name).is_ok()
                && self.labels.get(name).is_none()
            {
                return Err(error::asm_missing_operand(
                    self.instr_span,
                    self.src,
                    &format!("label after condition `{name}`"),
                ));
            }
        }
        Ok(())
    }

    /// A condition name only counts if a label follows it, so `BR eq` branches to `eq`.
    fn optional_condition(&mut self) -> Condition {
        let mut ahead = self.toks.clone();
        match (ahead.next(), ahead.next()) {
            (Some(tok), Some(_)) if tok.kind == TokenKind::Ident => {
                match Condition::from_str(self.text(tok)) {
                    Ok(cond) => {
                        self.toks.next();
                        cond
                    }
                    Err(()) => Condition::Always,
                }
            }
            _ => Condition::Always,
        }
    }

    /// Resolve a label to an offset relative to the following instruction.
    fn expect_label_offset(&mut self, bits: u32, field: &str) -> Result<i16> {
        let tok = self.expect(TokenKind::Ident, "label")?;
        let name = self.text(tok);
        let target = self
            .labels
            .get(name)
            .ok_or_else(|| error::asm_unresolved_label(tok.span, self.src, name))?;
        let offset = target as i64 - (self.index as i64 + 1);
        if !(i32::try_from(offset).is_ok_and(|offset| instr::fits_signed(offset, bits))) {
            return Err(error::asm_overflow(
                tok.span,
                self.src,
                field,
                offset,
                instr::signed_range(bits),
            ));
        }
        Ok(offset as i16)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbol::{AluOp, ShiftKind};

    fn code(err: &miette::Report) -> String {
        err.code().map(|code| code.to_string()).unwrap_or_default()
    }

    fn stmts(src: &str) -> Vec<Instr> {
        assemble(src).unwrap().iter().map(|line| line.stmt).collect()
    }

    #[test]
    fn parse_alu() {
        assert_eq!(
            stmts("ADD r1, r2\nsub r3 #255"),
            vec![
                Instr::Alu {
                    op: AluOp::Add,
                    dest: Register::R1,
                    src: ImmOrReg::Reg(Register::R2),
                },
                Instr::Alu {
                    op: AluOp::Sub,
                    dest: Register::R3,
                    src: ImmOrReg::Imm(255),
                },
            ]
        );
    }

    #[test]
    fn immediate_overflow() {
        // No output at all, even though the first line is fine
        let err = assemble("MOV r1, #1\nMOV r2, #300").unwrap_err();
        assert_eq!(code(&err), "asm::overflow");
        assert!(err.to_string().contains("300"));
        assert!(err.to_string().contains("immediate"));

        let err = assemble("ADD r1, #-1").unwrap_err();
        assert_eq!(code(&err), "asm::overflow");
        let err = assemble("SHL r1, #64").unwrap_err();
        assert_eq!(code(&err), "asm::overflow");
        let err = assemble("PUSH #1024").unwrap_err();
        assert_eq!(code(&err), "asm::overflow");
    }

    #[test]
    fn comments_and_blank_lines() {
        let air = assemble(
            r#"
            ; header comment

            MOV r1, #5   ; trailing
                HLT
            "#,
        )
        .unwrap();
        assert_eq!(air.len(), 2);
        assert_eq!(air.get(0).line, 4);
        assert_eq!(air.get(1).stmt, Instr::Halt);
    }

    #[test]
    fn labels_bind_to_next_instruction() {
        let parser = AsmParser::new(
            r#"
            start: MOV r1, #1
            lonely:
            ; comment between
            next: HLT
            end:
            "#,
        )
        .unwrap();
        assert_eq!(parser.labels().get("start"), Some(0));
        assert_eq!(parser.labels().get("lonely"), Some(1));
        assert_eq!(parser.labels().get("next"), Some(1));
        assert_eq!(parser.labels().get("end"), Some(2));
    }

    #[test]
    fn duplicate_label() {
        let err = assemble("a: HLT\na: HLT").unwrap_err();
        assert_eq!(code(&err), "asm::duplicate_label");
    }

    #[test]
    fn branch_offsets() {
        let air = assemble(
            r#"
            top: MOV r1, #10
            loop: SUB r1, #1
                  BR NE, loop
                  BR done
                  BR eq top
            done: HLT
            "#,
        )
        .unwrap();
        assert_eq!(
            air.get(2).stmt,
            Instr::Branch {
                cond: Condition::Ne,
                offset: -2
            }
        );
        assert_eq!(
            air.get(3).stmt,
            Instr::Branch {
                cond: Condition::Always,
                offset: 1
            }
        );
        assert_eq!(
            air.get(4).stmt,
            Instr::Branch {
                cond: Condition::Eq,
                offset: -5
            }
        );
    }

    #[test]
    fn branch_offset_law() {
        // Target `b` from branch at `a` is always encoded as b - (a + 1)
        for (a, b) in [(0usize, 0usize), (3, 1), (1, 6), (5, 5)] {
            let mut src = String::new();
            for idx in 0..8 {
                if idx == b {
                    src.push_str("target: ");
                }
                if idx == a {
                    src.push_str("BR target\n");
                } else {
                    src.push_str("HLT\n");
                }
            }
            let air = assemble(&src).unwrap();
            let expected = b as i16 - (a as i16 + 1);
            assert_eq!(
                air.get(a).stmt,
                Instr::Branch {
                    cond: Condition::Always,
                    offset: expected
                }
            );
        }
    }

    #[test]
    fn label_named_like_condition() {
        let air = assemble("eq: HLT\nBR eq").unwrap();
        assert_eq!(
            air.get(1).stmt,
            Instr::Branch {
                cond: Condition::Always,
                offset: -2
            }
        );
    }

    #[test]
    fn condition_without_label() {
        let err = assemble("loop: HLT\nBR NE").unwrap_err();
        assert_eq!(code(&err), "asm::missing_operand");
        assert!(err.to_string().contains("label after condition `NE`"));

        let err = assemble("BR al").unwrap_err();
        assert_eq!(code(&err), "asm::missing_operand");

        // Still a plain unresolved label when it is not a condition name
        let err = assemble("BR nowhere").unwrap_err();
        assert_eq!(code(&err), "asm::unresolved_label");
    }

    #[test]
    fn branch_out_of_range() {
        let mut src = String::from("far: HLT\n");
        for _ in 0..300 {
            src.push_str("HLT\n");
        }
        src.push_str("BR far\n");
        let err = assemble(&src).unwrap_err();
        assert_eq!(code(&err), "asm::overflow");
        assert!(err.to_string().contains("branch offset"));
    }

    #[test]
    fn unresolved_label() {
        let err = assemble("CALL nowhere").unwrap_err();
        assert_eq!(code(&err), "asm::unresolved_label");
        assert!(err.to_string().contains("nowhere"));
    }

    #[test]
    fn call_and_ret() {
        assert_eq!(
            stmts("CALL fn\nHLT\nfn: RET"),
            vec![Instr::Call { offset: 1 }, Instr::Halt, Instr::Ret]
        );
    }

    #[test]
    fn memory_operands() {
        assert_eq!(
            stmts("LD r1, [r2+4]\nST r3, [r4-32]\nLD r5, [r6]"),
            vec![
                Instr::Load {
                    dest: Register::R1,
                    base: Register::R2,
                    offset: 4
                },
                Instr::Store {
                    src: Register::R3,
                    base: Register::R4,
                    offset: -32
                },
                Instr::Load {
                    dest: Register::R5,
                    base: Register::R6,
                    offset: 0
                },
            ]
        );
        let err = assemble("LD r1, [r2+32]").unwrap_err();
        assert_eq!(code(&err), "asm::overflow");
        let err = assemble("LD r1, r2").unwrap_err();
        assert_eq!(code(&err), "asm::unexpected_token");
    }

    #[test]
    fn shifts_and_stack() {
        assert_eq!(
            stmts("SAR r1, #3\nror r2, r3\nPUSH r4\nPUSH #1000\nPOP r5"),
            vec![
                Instr::Shift {
                    kind: ShiftKind::Sar,
                    dest: Register::R1,
                    amount: ImmOrReg::Imm(3)
                },
                Instr::Shift {
                    kind: ShiftKind::Ror,
                    dest: Register::R2,
                    amount: ImmOrReg::Reg(Register::R3)
                },
                Instr::Push {
                    src: ImmOrReg::Reg(Register::R4)
                },
                Instr::Push {
                    src: ImmOrReg::Imm(1000)
                },
                Instr::Pop { dest: Register::R5 },
            ]
        );
    }

    #[test]
    fn bad_mnemonics_and_registers() {
        let err = assemble("NOP").unwrap_err();
        assert_eq!(code(&err), "asm::unknown_mnemonic");
        assert!(err.to_string().contains("NOP"));

        let err = assemble("SHF r1, #2").unwrap_err();
        assert_eq!(code(&err), "asm::family_mnemonic");

        let err = assemble("MOV r8, #1").unwrap_err();
        assert_eq!(code(&err), "asm::unknown_register");
        assert!(err.to_string().contains("r8"));

        let err = assemble("CMP r1").unwrap_err();
        assert_eq!(code(&err), "asm::missing_operand");

        let err = assemble("HLT r1").unwrap_err();
        assert_eq!(code(&err), "asm::extra_operand");

        let err = assemble("#5").unwrap_err();
        assert_eq!(code(&err), "asm::unexpected_token");
    }

    #[test]
    fn assembly_is_deterministic() {
        let src = include_str!("../tests/files/countdown.asm");
        assert_eq!(assemble(src).unwrap().emit(), assemble(src).unwrap().emit());
    }

    #[test]
    fn decode_reproduces_parsed_instructions() {
        let air = assemble(include_str!("../tests/files/kitchen_sink.asm")).unwrap();
        assert!(air.len() > 10);
        for line in &air {
            assert_eq!(Instr::decode(line.stmt.encode()), Ok(line.stmt), "line {}", line.line);
        }
    }
}
