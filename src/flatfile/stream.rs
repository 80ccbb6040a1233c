//! Byte-level primitives of the flatfile format
//!
//! Numbers are one per line. Strings are either raw (to end of line; a
//! `\r\n` pair does not end the string) or quoted, with `\n \r \t \e`
//! escapes and a backslash before `"` and `\`.

use std::io::Write;

use crate::error::{Result, StoreError};

const ESC_CHAR: u8 = 0x1b;

/// Cursor over a whole snapshot held in memory, tracking the line number
pub(crate) struct SnapshotStream {
    data: Vec<u8>,
    pos: usize,
    line: usize,
}

impl SnapshotStream {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            pos: 0,
            line: 1,
        }
    }

    pub fn line(&self) -> usize {
        self.line
    }

    pub fn at_eof(&self) -> bool {
        self.pos >= self.data.len()
    }

    pub fn error(&self, reason: impl Into<String>) -> StoreError {
        StoreError::corrupt(self.line, reason)
    }

    pub fn getc(&mut self) -> Option<u8> {
        let c = *self.data.get(self.pos)?;
        self.pos += 1;
        if c == b'\n' {
            self.line += 1;
        }
        Some(c)
    }

    /// Step back over the last byte read
    pub fn ungetc(&mut self) {
        if self.pos == 0 {
            return;
        }
        self.pos -= 1;
        if self.data[self.pos] == b'\n' {
            self.line -= 1;
        }
    }

    pub fn peek(&self) -> Option<u8> {
        self.data.get(self.pos).copied()
    }

    /// Consume `c` if it is next
    pub fn eat(&mut self, c: u8) -> bool {
        if self.peek() == Some(c) {
            self.getc();
            true
        } else {
            false
        }
    }

    /// Read to the end of the line, consuming the newline
    fn read_line(&mut self) -> Option<&[u8]> {
        if self.at_eof() {
            return None;
        }
        let start = self.pos;
        let end = self.data[start..]
            .iter()
            .position(|&c| c == b'\n')
            .map_or(self.data.len(), |off| start + off);
        self.pos = (end + 1).min(self.data.len());
        if end < self.data.len() {
            self.line += 1;
        }
        Some(&self.data[start..end])
    }

    fn read_number<T: std::str::FromStr>(&mut self, what: &str) -> Result<T> {
        let line = self.line;
        let Some(raw) = self.read_line() else {
            return Err(StoreError::corrupt(line, format!("unexpected end of snapshot reading {}", what)));
        };
        let text = String::from_utf8_lossy(raw);
        text.trim()
            .parse()
            .map_err(|_| StoreError::corrupt(line, format!("bad {}: {:?}", what, text.trim())))
    }

    /// One object reference or small integer per line
    pub fn getref(&mut self) -> Result<i32> {
        self.read_number("number")
    }

    /// A 32-bit flag word; older writers printed these signed
    pub fn getflags(&mut self) -> Result<u32> {
        self.read_number::<i64>("flag word").map(|v| v as u32)
    }

    /// One long integer (timestamps) per line
    pub fn getlong(&mut self) -> Result<i64> {
        self.read_number("timestamp")
    }

    /// Read a string, quoted or raw
    ///
    /// A quoted string is only recognised when `quoted` is set and the next
    /// byte is `"`; the newline after the closing quote is consumed.
    pub fn getstring(&mut self, quoted: bool) -> String {
        if quoted && self.peek() == Some(b'"') {
            self.getc();
            return self.quoted_body();
        }

        let mut buf = Vec::new();
        let mut last = 0u8;
        while let Some(c) = self.getc() {
            if c == 0 {
                break;
            }
            if c == b'\n' && last != b'\r' {
                break;
            }
            buf.push(c);
            last = c;
        }
        String::from_utf8_lossy(&buf).into_owned()
    }

    fn quoted_body(&mut self) -> String {
        let mut buf = Vec::new();
        while let Some(c) = self.getc() {
            let c = match c {
                b'"' => {
                    self.eat(b'\n');
                    break;
                }
                b'\\' => match self.getc() {
                    Some(b'n') => b'\n',
                    Some(b'r') => b'\r',
                    Some(b't') => b'\t',
                    Some(b'e') => ESC_CHAR,
                    Some(other) => other,
                    None => break,
                },
                c => c,
            };
            if c == 0 {
                break;
            }
            buf.push(c);
        }
        String::from_utf8_lossy(&buf).into_owned()
    }
}

// =============================================================================
// Output
// =============================================================================

pub(crate) fn putref<W: Write>(w: &mut W, value: impl std::fmt::Display) -> Result<()> {
    writeln!(w, "{}", value)?;
    Ok(())
}

/// Write a string in quoted form, or raw when `quoted` is off
pub(crate) fn putstring<W: Write>(w: &mut W, s: &str, quoted: bool) -> Result<()> {
    if quoted {
        w.write_all(&quote(s))?;
    } else {
        w.write_all(s.as_bytes())?;
    }
    w.write_all(b"\n")?;
    Ok(())
}

/// Quoted, escaped form of a string without the trailing newline
pub(crate) fn quote(s: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(s.len() + 2);
    out.push(b'"');
    for &c in s.as_bytes() {
        match c {
            b'\n' => out.extend_from_slice(b"\\n"),
            b'\r' => out.extend_from_slice(b"\\r"),
            b'\t' => out.extend_from_slice(b"\\t"),
            ESC_CHAR => out.extend_from_slice(b"\\e"),
            b'\\' | b'"' => {
                out.push(b'\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out.push(b'"');
    out
}
