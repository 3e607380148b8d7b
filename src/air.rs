use std::fmt::Write as _;

use crate::{instr::Instr, symbol::Span};

/// Assembly intermediate representation: one fully resolved instruction per address,
/// starting at address 0.
#[derive(Debug, Default)]
pub struct Air {
    ast: Vec<AsmLine>,
}

/// Single instruction along with where it came from.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct AsmLine {
    /// 1-based line number in the source
    pub line: usize,
    /// The instruction text, label excluded
    pub span: Span,
    pub stmt: Instr,
}

impl Air {
    pub fn new() -> Self {
        Air { ast: Vec::new() }
    }

    pub fn add_stmt(&mut self, line: AsmLine) {
        self.ast.push(line)
    }

    pub fn get(&self, idx: usize) -> &AsmLine {
        &self.ast[idx]
    }

    pub fn len(&self) -> usize {
        self.ast.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ast.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, AsmLine> {
        self.ast.iter()
    }

    /// Encoded program, index == address.
    pub fn emit(&self) -> Vec<u16> {
        self.ast.iter().map(|line| line.stmt.encode()).collect()
    }
}

impl<'a> IntoIterator for &'a Air {
    type Item = &'a AsmLine;
    type IntoIter = std::slice::Iter<'a, AsmLine>;
    fn into_iter(self) -> Self::IntoIter {
        self.ast.iter()
    }
}

/// Program file layout: every word written verbatim in host byte order.
pub fn to_bytes(words: &[u16]) -> Vec<u8> {
    words.iter().flat_map(|word| word.to_ne_bytes()).collect()
}

/// Inverse of [`to_bytes`]. `None` if the length is not a whole number of words.
pub fn from_bytes(bytes: &[u8]) -> Option<Vec<u16>> {
    if bytes.len() % 2 != 0 {
        return None;
    }
    Some(
        bytes
            .chunks_exact(2)
            .map(|word| u16::from_ne_bytes([word[0], word[1]]))
            .collect(),
    )
}

/// One 16 character string of `0`/`1` per word.
pub fn to_text(words: &[u16]) -> String {
    let mut out = String::with_capacity(words.len() * 17);
    for word in words {
        let _ = writeln!(out, "{word:016b}");
    }
    out
}

/// `index: binary (hex)  disassembly` for each word.
pub fn listing(words: &[u16]) -> String {
    let mut out = String::new();
    for (idx, word) in words.iter().enumerate() {
        let asm = match Instr::decode(*word) {
            Ok(instr) => instr.to_string(),
            Err(e) => format!("<illegal: {e}>"),
        };
        let _ = writeln!(out, "{idx:>5}: {word:016b}  (0x{word:04X})  {asm}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_roundtrip_host_order() {
        let words = [0x1234, 0xF001];
        let bytes = to_bytes(&words);
        assert_eq!(bytes.len(), 4);
        assert_eq!(&bytes[..2], &0x1234u16.to_ne_bytes());
        assert_eq!(from_bytes(&bytes), Some(words.to_vec()));
    }

    #[test]
    fn odd_length_rejected() {
        assert_eq!(from_bytes(&[1, 2, 3]), None);
    }

    #[test]
    fn text_dump() {
        assert_eq!(to_text(&[0x0001, 0x8000]), "0000000000000001\n1000000000000000\n");
    }

    #[test]
    fn listing_shows_disassembly() {
        let out = listing(&[0xF001, 0xC003]);
        assert!(out.contains("(0xF001)  RET"));
        assert!(out.contains("<illegal: stack mode 3 is not defined>"));
    }
}
