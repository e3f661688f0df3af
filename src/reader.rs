use std::collections::HashSet;
use std::io::BufRead;
use std::rc::Rc;

use crate::diagnostic::{CompilerError, CompilerStatus};
use crate::sloc::Sloc;

/// Line-buffered source reader with position tracking.
///
/// Reads one logical line at a time (LF or CRLF terminated; the last line
/// need not be terminated). The line counter is 1-based and the column
/// offset is 0-based internally; `tell()` reports a 1-based column.
pub struct SourceReader<'r> {
    input: &'r mut dyn BufRead,
    file: Rc<str>,
    line: i32,
    off: usize,
    text: Vec<u8>,
    interned: HashSet<Rc<str>>,
}

impl<'r> SourceReader<'r> {
    pub fn new(input: &'r mut dyn BufRead, file: Rc<str>, start_line: i32) -> Self {
        Self {
            input,
            file,
            // `advance()` increments before exposing the line, so the
            // first line gets number `start_line`.
            line: start_line - 1,
            off: 0,
            text: Vec::new(),
            interned: HashSet::new(),
        }
    }

    pub fn file(&self) -> &Rc<str> {
        &self.file
    }

    pub fn line(&self) -> i32 {
        self.line
    }

    pub fn column(&self) -> i32 {
        self.off as i32 + 1
    }

    pub fn tell(&self) -> Sloc {
        Sloc::new(self.file.clone(), self.line, self.column())
    }

    /// Read the next line. Returns false at end of input.
    pub fn advance(&mut self) -> Result<bool, CompilerError> {
        self.off = 0;
        self.text.clear();
        let n = self
            .input
            .read_until(b'\n', &mut self.text)
            .map_err(|_| CompilerError::new(CompilerStatus::Utf8SequenceInvalid, self.tell()))?;
        if n == 0 {
            return Ok(false);
        }
        if self.text.last() == Some(&b'\n') {
            self.text.pop();
            if self.text.last() == Some(&b'\r') {
                self.text.pop();
            }
        }
        self.line += 1;
        Ok(true)
    }

    pub fn navail(&self) -> usize {
        self.text.len() - self.off
    }

    /// Byte at offset `nadd` from the current column, or 0 past the end.
    pub fn peek(&self, nadd: usize) -> u8 {
        if nadd < self.navail() {
            self.text[self.off + nadd]
        } else {
            0
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.text[self.off..]
    }

    pub fn starts_with(&self, bytes: &[u8]) -> bool {
        self.data().starts_with(bytes)
    }

    pub fn consume(&mut self, nadd: usize) {
        debug_assert!(nadd <= self.navail());
        self.off += nadd;
    }

    pub fn rewind(&mut self) {
        self.off = 0;
    }

    /// Validate that the remainder of the current line is well-formed
    /// UTF-8 and contains no U+0000.
    pub fn validate_line(&mut self) -> Result<(), CompilerError> {
        let text = std::str::from_utf8(self.data())
            .map_err(|_| CompilerError::new(CompilerStatus::Utf8SequenceInvalid, self.tell()))?;
        for (pos, ch) in text.char_indices() {
            if ch == '\0' {
                let mut sloc = self.tell();
                sloc.column += pos as i32;
                return Err(CompilerError::new(
                    CompilerStatus::NullCharacterDisallowed,
                    sloc,
                ));
            }
        }
        self.off = self.text.len();
        Ok(())
    }

    /// Deduplicate an owned string against the per-reader dictionary.
    pub fn intern(&mut self, val: String) -> Rc<str> {
        if let Some(existing) = self.interned.get(val.as_str()) {
            return existing.clone();
        }
        let shared: Rc<str> = Rc::from(val);
        self.interned.insert(shared.clone());
        shared
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn reader_over(text: &str) -> (Cursor<Vec<u8>>, Rc<str>) {
        (Cursor::new(text.as_bytes().to_vec()), Rc::from("test"))
    }

    #[test]
    fn test_lines_and_positions() {
        let (mut cur, file) = reader_over("ab\ncd\r\nef");
        let mut reader = SourceReader::new(&mut cur, file, 1);

        assert!(reader.advance().unwrap());
        assert_eq!(reader.line(), 1);
        assert_eq!(reader.data(), b"ab");

        assert!(reader.advance().unwrap());
        assert_eq!(reader.data(), b"cd");

        assert!(reader.advance().unwrap());
        assert_eq!(reader.data(), b"ef");
        assert!(!reader.advance().unwrap());
    }

    #[test]
    fn test_peek_consume_rewind() {
        let (mut cur, file) = reader_over("hello");
        let mut reader = SourceReader::new(&mut cur, file, 1);
        reader.advance().unwrap();

        assert_eq!(reader.peek(0), b'h');
        assert_eq!(reader.peek(4), b'o');
        assert_eq!(reader.peek(5), 0);
        reader.consume(2);
        assert_eq!(reader.peek(0), b'l');
        assert_eq!(reader.tell().column, 3);
        reader.rewind();
        assert_eq!(reader.peek(0), b'h');
    }

    #[test]
    fn test_start_line_offset() {
        let (mut cur, file) = reader_over("x");
        let mut reader = SourceReader::new(&mut cur, file, 16);
        reader.advance().unwrap();
        assert_eq!(reader.line(), 16);
    }

    #[test]
    fn test_rejects_invalid_utf8() {
        let mut cur = Cursor::new(vec![b'a', 0xFF, b'b']);
        let mut reader = SourceReader::new(&mut cur, Rc::from("t"), 1);
        reader.advance().unwrap();
        let err = reader.validate_line().unwrap_err();
        assert_eq!(err.status, CompilerStatus::Utf8SequenceInvalid);
    }

    #[test]
    fn test_rejects_nul() {
        let mut cur = Cursor::new(vec![b'a', 0x00, b'b']);
        let mut reader = SourceReader::new(&mut cur, Rc::from("t"), 1);
        reader.advance().unwrap();
        let err = reader.validate_line().unwrap_err();
        assert_eq!(err.status, CompilerStatus::NullCharacterDisallowed);
        assert_eq!(err.sloc.column, 2);
    }

    #[test]
    fn test_interning_dedups() {
        let (mut cur, file) = reader_over("");
        let mut reader = SourceReader::new(&mut cur, file, 1);
        let a = reader.intern("name".to_string());
        let b = reader.intern("name".to_string());
        assert!(Rc::ptr_eq(&a, &b));
    }
}
