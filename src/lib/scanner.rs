//! Field scanner over one SAM text line.
//!
//! SAM text is ASCII with tab-separated columns, colon-separated tag fields,
//! and comma-separated array elements. [`LineScanner`] walks a shared line
//! buffer byte by byte and hands out [`Span`]s, so nothing is copied until a
//! value genuinely needs decoding (integers, hex bytes).

use std::str::FromStr;
use std::sync::Arc;

use crate::errors::{Result, SamprepError};
use crate::span::Span;

/// Cursor over one line buffer, producing spans between separators.
pub struct LineScanner {
    buf: Arc<str>,
    pos: usize,
    end: usize,
}

impl LineScanner {
    /// Scans the whole line.
    #[must_use]
    pub fn new(buf: &Arc<str>) -> Self {
        Self { buf: Arc::clone(buf), pos: 0, end: buf.len() }
    }

    /// Scans the line starting at byte `start` (used to skip header codes).
    #[must_use]
    pub fn starting_at(buf: &Arc<str>, start: usize) -> Self {
        Self { buf: Arc::clone(buf), pos: start.min(buf.len()), end: buf.len() }
    }

    /// Bytes left to scan.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.end - self.pos
    }

    fn bytes(&self) -> &[u8] {
        self.buf.as_bytes()
    }

    /// Reads up to (and consumes) the next `sep`. Returns the span before the
    /// separator and whether the separator was found; at end of line the rest
    /// of the buffer is returned with `false`.
    pub fn read_until(&mut self, sep: u8) -> (Span, bool) {
        let start = self.pos;
        let bytes = self.bytes();
        for end in self.pos..self.end {
            if bytes[end] == sep {
                self.pos = end + 1;
                return (Span::slice(&self.buf, start, end - start), true);
            }
        }
        self.pos = self.end;
        (Span::slice(&self.buf, start, self.end - start), false)
    }

    /// Like [`read_until`](Self::read_until) with two candidate separators.
    /// Returns the matched separator byte, or 0 at end of line.
    pub fn read_until_either(&mut self, sep1: u8, sep2: u8) -> (Span, u8) {
        let start = self.pos;
        let bytes = self.bytes();
        for end in self.pos..self.end {
            let b = bytes[end];
            if b == sep1 || b == sep2 {
                self.pos = end + 1;
                return (Span::slice(&self.buf, start, end - start), b);
            }
        }
        self.pos = self.end;
        (Span::slice(&self.buf, start, self.end - start), 0)
    }

    /// Reads exactly one byte which must be followed by `sep` or end of line.
    /// Returns the byte and whether the separator was present.
    pub fn read_byte_until(&mut self, sep: u8) -> Result<(u8, bool)> {
        let start = self.pos;
        let next = self.pos + 1;
        if start >= self.end {
            return Err(SamprepError::MalformedTagField {
                text: self.buf[..self.end].to_string(),
                reason: "unexpected end of line",
            });
        }
        let b = self.bytes()[start];
        if next >= self.end {
            self.pos = self.end;
            Ok((b, false))
        } else if self.bytes()[next] != sep {
            Err(SamprepError::MalformedTagField {
                text: self.buf[start..self.end].to_string(),
                reason: "expected single-character value",
            })
        } else {
            self.pos = next + 1;
            Ok((b, true))
        }
    }
}

/// Parses an integer (or float) field from a span, naming the offending field
/// on failure.
pub fn parse_num<T: FromStr>(span: &Span, field: &'static str) -> Result<T> {
    span.as_str().parse().map_err(|_| SamprepError::MalformedNumber {
        field,
        value: span.as_str().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(s: &str) -> Arc<str> {
        Arc::from(s)
    }

    #[test]
    fn test_read_until() {
        let buf = line("r1\t99\tchr1");
        let mut sc = LineScanner::new(&buf);
        let (name, found) = sc.read_until(b'\t');
        assert_eq!(name, "r1");
        assert!(found);
        let (flag, found) = sc.read_until(b'\t');
        assert_eq!(flag, "99");
        assert!(found);
        let (rname, found) = sc.read_until(b'\t');
        assert_eq!(rname, "chr1");
        assert!(!found);
        assert_eq!(sc.remaining(), 0);
    }

    #[test]
    fn test_read_until_either() {
        let buf = line("1,2\t");
        let mut sc = LineScanner::new(&buf);
        let (v, sep) = sc.read_until_either(b',', b'\t');
        assert_eq!(v, "1");
        assert_eq!(sep, b',');
        let (v, sep) = sc.read_until_either(b',', b'\t');
        assert_eq!(v, "2");
        assert_eq!(sep, b'\t');
        let (v, sep) = sc.read_until_either(b',', b'\t');
        assert!(v.is_empty());
        assert_eq!(sep, 0);
    }

    #[test]
    fn test_read_byte_until() {
        let buf = line("A\tx");
        let mut sc = LineScanner::new(&buf);
        assert_eq!(sc.read_byte_until(b'\t').unwrap(), (b'A', true));

        let buf = line("A");
        let mut sc = LineScanner::new(&buf);
        assert_eq!(sc.read_byte_until(b'\t').unwrap(), (b'A', false));

        let buf = line("AB\t");
        let mut sc = LineScanner::new(&buf);
        assert!(sc.read_byte_until(b'\t').is_err());
    }

    #[test]
    fn test_parse_num() {
        let buf = line("1234");
        let span = Span::whole(&buf);
        assert_eq!(parse_num::<i32>(&span, "POS").unwrap(), 1234);

        let buf = line("12x4");
        let err = parse_num::<i32>(&Span::whole(&buf), "POS").unwrap_err();
        assert!(format!("{err}").contains("POS"));
    }

    #[test]
    fn test_starting_at() {
        let buf = line("@SQ\tSN:chr1");
        let mut sc = LineScanner::starting_at(&buf, 4);
        let (tag, found) = sc.read_until(b':');
        assert_eq!(tag, "SN");
        assert!(found);
    }
}
