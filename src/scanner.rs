//! Pull parser for the key/value layout of a revision file.
//!
//! The whole file is held in memory; a [`Scanner`] walks it with a cursor and
//! hands out borrowed slices. Values are returned raw (exactly the bytes
//! between the key and its `;`) so that fields this crate does not know
//! about can be written back byte for byte.

use crate::error::{Error, Result};

/// Keys whose value is a single `@`-string with no `;` terminator.
const STRING_KEYS: [&str; 3] = ["desc", "log", "text"];

/// One `key value;` record, or one `key @string@` record for the string keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field<'a> {
    pub key: &'a str,
    /// The raw value with surrounding whitespace trimmed. Empty for `key;`.
    pub raw: &'a [u8],
    /// Byte offset of `key` in the input.
    pub offset: usize,
}

impl<'a> Field<'a> {
    /// Splits the value on whitespace, e.g. `branches 1.2.2.1 1.2.4.1;`.
    pub fn words(&self) -> Result<Vec<&'a str>> {
        let text = std::str::from_utf8(self.raw)
            .map_err(|_| Error::parse(self.offset, format!("non-utf8 value for `{}`", self.key)))?;
        Ok(text.split_ascii_whitespace().collect())
    }

    /// The value as a single word, `None` when empty.
    pub fn word(&self) -> Result<Option<&'a str>> {
        let words = self.words()?;
        match words.len() {
            0 => Ok(None),
            1 => Ok(Some(words[0])),
            _ => Err(Error::parse(
                self.offset,
                format!("`{}` expects a single value", self.key),
            )),
        }
    }

    /// Decodes a value that is exactly one `@`-string.
    pub fn string(&self) -> Result<Vec<u8>> {
        let mut strings = self.strings()?;
        if strings.len() != 1 {
            return Err(Error::parse(
                self.offset,
                format!("`{}` expects one quoted string", self.key),
            ));
        }
        Ok(strings.remove(0))
    }

    /// Decodes a value made of whitespace separated `@`-strings.
    pub fn strings(&self) -> Result<Vec<Vec<u8>>> {
        let mut out = Vec::new();
        let mut pos = 0;
        while pos < self.raw.len() {
            if self.raw[pos].is_ascii_whitespace() {
                pos += 1;
                continue;
            }
            if self.raw[pos] != b'@' {
                return Err(Error::parse(
                    self.offset,
                    format!("`{}` expects quoted strings", self.key),
                ));
            }
            let (string, end) = unquote(self.raw, pos)
                .ok_or_else(|| Error::parse(self.offset, "unterminated string"))?;
            out.push(string);
            pos = end;
        }
        Ok(out)
    }
}

/// Decodes the `@`-string starting at `start`; returns it and the offset just past it.
fn unquote(buf: &[u8], start: usize) -> Option<(Vec<u8>, usize)> {
    debug_assert_eq!(buf[start], b'@');
    let mut out = Vec::new();
    let mut pos = start + 1;
    loop {
        let at = pos + buf.get(pos..)?.iter().position(|&b| b == b'@')?;
        out.extend_from_slice(&buf[pos..at]);
        if buf.get(at + 1) == Some(&b'@') {
            out.push(b'@');
            pos = at + 2;
        } else {
            return Some((out, at + 1));
        }
    }
}

/// Encodes `bytes` as an `@`-string.
pub fn quote(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(bytes.len() + 2);
    out.push(b'@');
    for &b in bytes {
        if b == b'@' {
            out.push(b'@');
        }
        out.push(b);
    }
    out.push(b'@');
    out
}

pub struct Scanner<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Scanner<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Scanner { buf, pos: 0 }
    }

    pub fn at(buf: &'a [u8], pos: usize) -> Self {
        Scanner { buf, pos }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    fn skip_whitespace(&mut self) {
        while self.pos < self.buf.len() && self.buf[self.pos].is_ascii_whitespace() {
            self.pos += 1;
        }
    }

    pub fn at_end(&mut self) -> bool {
        self.skip_whitespace();
        self.pos >= self.buf.len()
    }

    /// Returns the next whitespace/`;` delimited word without consuming it.
    pub fn peek_word(&mut self) -> Option<&'a str> {
        self.skip_whitespace();
        let start = self.pos;
        let mut end = start;
        while end < self.buf.len() && !self.buf[end].is_ascii_whitespace() && self.buf[end] != b';'
        {
            end += 1;
        }
        if end == start {
            return None;
        }
        std::str::from_utf8(&self.buf[start..end]).ok()
    }

    /// True when the next word is a revision number (digits and dots only).
    pub fn at_revision_token(&mut self) -> bool {
        self.peek_word()
            .map(|w| w.bytes().all(|b| b.is_ascii_digit() || b == b'.'))
            .unwrap_or(false)
    }

    /// Reads a bare revision number such as the `1.2` opening an admin block.
    pub fn next_revision_token(&mut self) -> Result<&'a str> {
        self.skip_whitespace();
        let start = self.pos;
        while self.pos < self.buf.len()
            && (self.buf[self.pos].is_ascii_digit() || self.buf[self.pos] == b'.')
        {
            self.pos += 1;
        }
        if self.pos == start {
            return Err(Error::parse(start, "revision number expected"));
        }
        // digits and dots are ascii
        Ok(std::str::from_utf8(&self.buf[start..self.pos]).unwrap_or_default())
    }

    /// Reads the next `key value;` record. `None` at end of input.
    pub fn next_key(&mut self) -> Result<Option<Field<'a>>> {
        self.skip_whitespace();
        if self.pos >= self.buf.len() {
            return Ok(None);
        }
        let offset = self.pos;
        while self.pos < self.buf.len()
            && !self.buf[self.pos].is_ascii_whitespace()
            && self.buf[self.pos] != b';'
        {
            self.pos += 1;
        }
        let key = std::str::from_utf8(&self.buf[offset..self.pos])
            .map_err(|_| Error::parse(offset, "non-utf8 key"))?;
        self.skip_whitespace();

        if STRING_KEYS.contains(&key) {
            if self.buf.get(self.pos) != Some(&b'@') {
                return Err(Error::parse(self.pos, format!("`{}` expects a string", key)));
            }
            let start = self.pos;
            let (_, end) = unquote(self.buf, start)
                .ok_or_else(|| Error::parse(start, format!("unterminated `{}` string", key)))?;
            self.pos = end;
            return Ok(Some(Field {
                key,
                raw: &self.buf[start..end],
                offset,
            }));
        }

        let start = self.pos;
        loop {
            match self.buf.get(self.pos) {
                None => {
                    return Err(Error::parse(
                        offset,
                        format!("missing `;` after `{}`", key),
                    ))
                }
                Some(b';') => break,
                Some(b'@') => {
                    let (_, end) = unquote(self.buf, self.pos)
                        .ok_or_else(|| Error::parse(self.pos, "unterminated string"))?;
                    self.pos = end;
                }
                Some(_) => self.pos += 1,
            }
        }
        let mut end = self.pos;
        while end > start && self.buf[end - 1].is_ascii_whitespace() {
            end -= 1;
        }
        self.pos += 1;
        Ok(Some(Field {
            key,
            raw: &self.buf[start..end],
            offset,
        }))
    }

    /// Everything from the cursor to the end of input, untouched.
    pub fn raw_tail(&self) -> &'a [u8] {
        &self.buf[self.pos.min(self.buf.len())..]
    }
}

#[test]
fn test_quote_round_trip() {
    let text = b"user@example.com\n@@\n";
    let quoted = quote(text);
    assert_eq!(quoted, b"@user@@example.com\n@@@@\n@".to_vec());
    assert_eq!(unquote(&quoted, 0), Some((text.to_vec(), quoted.len())));
}

#[test]
fn test_next_key() {
    let input = b"head\t1.2;\naccess;\nsymbols\n\tREL1:1.2 START:1.1;\ncomment\t@# @;\n";
    let mut scanner = Scanner::new(input);
    let head = scanner.next_key().unwrap().unwrap();
    assert_eq!((head.key, head.word().unwrap()), ("head", Some("1.2")));
    let access = scanner.next_key().unwrap().unwrap();
    assert_eq!(access.key, "access");
    assert!(access.raw.is_empty());
    let symbols = scanner.next_key().unwrap().unwrap();
    assert_eq!(symbols.words().unwrap(), vec!["REL1:1.2", "START:1.1"]);
    let comment = scanner.next_key().unwrap().unwrap();
    assert_eq!(comment.string().unwrap(), b"# ".to_vec());
    assert!(scanner.next_key().unwrap().is_none());
}

#[test]
fn test_semicolon_inside_string() {
    let mut scanner = Scanner::new(b"owner @a;b@;");
    let field = scanner.next_key().unwrap().unwrap();
    assert_eq!(field.raw, b"@a;b@");
}

#[test]
fn test_string_keys_have_no_terminator() {
    let mut scanner = Scanner::new(b"\n1.1\nlog\n@initial\n@\ntext\n@a\n@\n");
    assert!(scanner.at_revision_token());
    assert_eq!(scanner.next_revision_token().unwrap(), "1.1");
    let log = scanner.next_key().unwrap().unwrap();
    assert_eq!(log.string().unwrap(), b"initial\n".to_vec());
    let text = scanner.next_key().unwrap().unwrap();
    assert_eq!(text.key, "text");
    assert_eq!(scanner.raw_tail(), b"\n");
}

#[test]
fn test_missing_terminator() {
    let mut scanner = Scanner::new(b"head 1.2");
    assert!(matches!(scanner.next_key(), Err(Error::Parse { .. })));
}
