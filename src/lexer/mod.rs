use std::fmt;

use miette::Result;

use crate::error;
use crate::lexer::cursor::Cursor;
use crate::symbol::{Register, Span, SrcOffset};

pub mod cursor;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

impl Token {
    pub fn new(kind: TokenKind, span: Span) -> Self {
        Token { kind, span }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TokenKind {
    /// Mnemonic, label reference or branch condition
    Ident,
    /// `name:`, the span covers the name and the colon
    LabelDef,
    Reg(Register),
    /// `#` prefixed integer
    Lit(i32),
    /// Bare signed integer, used for memory offsets
    Int(i32),
    OpenBracket,
    CloseBracket,
    Comment,
    /// Also includes commas
    Whitespace,
    Unknown,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TokenKind::Ident => "identifier",
            TokenKind::LabelDef => "label definition",
            TokenKind::Reg(_) => "register",
            TokenKind::Lit(_) => "immediate",
            TokenKind::Int(_) => "integer",
            TokenKind::OpenBracket => "'['",
            TokenKind::CloseBracket => "']'",
            TokenKind::Comment => "comment",
            TokenKind::Whitespace => "whitespace",
            TokenKind::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Test if a character is considered to be whitespace.
pub(crate) fn is_whitespace(c: char) -> bool {
    // Operands may be separated by commas or spaces
    matches!(c, ' ' | '\t' | '\r' | '\n' | ',')
}

pub(crate) fn is_id_start(c: char) -> bool {
    matches!(c, 'a'..='z' | 'A'..='Z' | '_' | '.')
}

pub(crate) fn is_id(c: char) -> bool {
    is_id_start(c) || c.is_ascii_digit()
}

/// Tokenize one source line. `base` is the offset of `line` inside `src`.
///
/// Whitespace and comments are dropped from the result.
pub fn tokenize_line(src: &str, line: &str, base: usize) -> Result<Vec<Token>> {
    let mut cursor = Cursor::new(line, base);
    let mut toks = Vec::new();
    while !cursor.is_eof() {
        let tok = cursor.advance_token(src)?;
        match tok.kind {
            TokenKind::Whitespace | TokenKind::Comment => {}
            TokenKind::Unknown => return Err(error::lex_unknown(tok.span, src)),
            _ => toks.push(tok),
        }
    }
    Ok(toks)
}

impl Cursor<'_> {
    pub fn advance_token(&mut self, src: &str) -> Result<Token> {
        let start = self.token_start();
        let first_char = match self.bump() {
            Some(c) => c,
            None => return Ok(Token::new(TokenKind::Whitespace, Span::dummy())),
        };
        let token_kind = match first_char {
            ';' => {
                self.take_while(|c| c != '\n');
                TokenKind::Comment
            }
            c if is_whitespace(c) => {
                self.take_while(is_whitespace);
                TokenKind::Whitespace
            }
            '[' => TokenKind::OpenBracket,
            ']' => TokenKind::CloseBracket,
            '#' => TokenKind::Lit(self.number(src, start)?),
            '+' | '-' if self.first().is_ascii_digit() || self.first() == '#' => {
                TokenKind::Int(self.number(src, start)?)
            }
            c if c.is_ascii_digit() => TokenKind::Int(self.number(src, start)?),
            c if is_id_start(c) => {
                self.take_while(is_id);
                if self.first() == ':' {
                    self.bump();
                    TokenKind::LabelDef
                } else {
                    match self.token_text().parse::<Register>() {
                        Ok(reg) => TokenKind::Reg(reg),
                        Err(()) => TokenKind::Ident,
                    }
                }
            }
            _ => TokenKind::Unknown,
        };
        let span = Span::new(SrcOffset(start), self.pos_in_token());
        self.reset_pos();
        Ok(Token::new(token_kind, span))
    }

    /// Lex the rest of a numeric token. Everything already consumed (a `#` or a sign) is
    /// part of the token text.
    fn number(&mut self, src: &str, start: usize) -> Result<i32> {
        // A sign may precede or follow the `#`
        if self.first() == '#' {
            self.bump();
        }
        if matches!(self.first(), '+' | '-') {
            self.bump();
        }
        self.take_while(|c| c.is_ascii_alphanumeric() || c == '_');

        let text = self.token_text();
        let span = Span::new(SrcOffset(start), self.pos_in_token());
        let body = text.trim_start_matches('#');
        let (negative, body) = match body.strip_prefix('-') {
            Some(rest) => (true, rest.trim_start_matches('#')),
            None => (false, body.trim_start_matches('+').trim_start_matches('#')),
        };
        let parsed = match body
            .strip_prefix("0x")
            .or_else(|| body.strip_prefix("0X"))
            .or_else(|| body.strip_prefix('x'))
            .or_else(|| body.strip_prefix('X'))
        {
            Some(hex) => i64::from_str_radix(hex, 16),
            None => body.parse::<i64>(),
        };
        let magnitude = parsed.map_err(|e| error::lex_invalid_lit(span, src, e))?;
        let value = if negative { -magnitude } else { magnitude };
        i32::try_from(value).map_err(|e| error::lex_invalid_lit(span, src, e))
    }
}
