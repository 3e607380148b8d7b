// Heavily inspired by `rustc_lexer` and adapted to suit the project.
// See https://doc.rust-lang.org/beta/nightly-rustc/src/rustc_lexer/cursor.rs.html

use std::str::Chars;

/// Peekable iterator over a char sequence.
#[derive(Clone)]
pub struct Cursor<'a> {
    /// Bytes left at the start of the current token
    len_remaining: usize,
    /// Iterator over chars in a &str
    chars: Chars<'a>,
    /// Byte offset of the input inside the whole source
    base: usize,
    /// The full input, for slicing out token text
    input: &'a str,
}

pub(crate) const EOF_CHAR: char = '\0';

impl<'a> Cursor<'a> {
    /// `base` is the offset of `input` inside the source file, used for spans.
    pub fn new(input: &'a str, base: usize) -> Cursor<'a> {
        Cursor {
            len_remaining: input.len(),
            chars: input.chars(),
            base,
            input,
        }
    }

    /// Peek the next char without consuming it. Returns `EOF_CHAR` at the end.
    pub fn first(&self) -> char {
        self.chars.clone().next().unwrap_or(EOF_CHAR)
    }

    pub fn is_eof(&self) -> bool {
        self.chars.as_str().is_empty()
    }

    /// Bytes consumed since the last `reset_pos`.
    pub fn pos_in_token(&self) -> usize {
        self.len_remaining - self.chars.as_str().len()
    }

    /// Start a new token at the current position.
    pub fn reset_pos(&mut self) {
        self.len_remaining = self.chars.as_str().len();
    }

    /// Absolute source offset of the start of the current token.
    pub fn token_start(&self) -> usize {
        self.base + self.input.len() - self.len_remaining
    }

    /// Text of the current token so far.
    pub fn token_text(&self) -> &'a str {
        let start = self.input.len() - self.len_remaining;
        &self.input[start..start + self.pos_in_token()]
    }

    pub fn bump(&mut self) -> Option<char> {
        self.chars.next()
    }

    pub fn take_while(&mut self, mut predicate: impl FnMut(char) -> bool) {
        while predicate(self.first()) && !self.is_eof() {
            self.bump();
        }
    }
}
