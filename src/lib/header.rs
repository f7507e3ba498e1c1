//! SAM header parsing, mutation, and formatting.
//!
//! The header is the leading block of `@`-prefixed lines. Each structured
//! line is a record-type code (`@HD`, `@SQ`, `@RG`, `@PG`, or a user-defined
//! code containing a lowercase letter) followed by tab-separated `TAG:VALUE`
//! fields. Field order within a line is preserved on the round trip, and a
//! repeated tag on one line is a fatal parse error.

use std::str::FromStr;
use std::sync::Arc;

use ahash::AHashMap;

use crate::errors::{Result, SamprepError};
use crate::scanner::LineScanner;
use crate::span::Span;

/// Header format version written when an `@HD` line has to be invented.
pub const FILE_FORMAT_VERSION: &str = "1.5";

const VN: &str = "VN";
const SO: &str = "SO";
const GO: &str = "GO";
const SN: &str = "SN";

/// One structured header line: an ordered `TAG:VALUE` list.
#[derive(Debug, Clone, Default)]
pub struct HeaderLine {
    fields: Vec<(Span, Span)>,
}

impl HeaderLine {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Value for `tag`, if present.
    #[must_use]
    pub fn get(&self, tag: &str) -> Option<&Span> {
        self.fields.iter().find(|(t, _)| *t == tag).map(|(_, v)| v)
    }

    /// Replaces the value for `tag`, or appends the field.
    pub fn set(&mut self, tag: &str, value: Span) {
        match self.fields.iter_mut().find(|(t, _)| *t == tag) {
            Some((_, v)) => *v = value,
            None => self.fields.push((Span::from_str(tag), value)),
        }
    }

    /// Removes the field for `tag`, if present.
    pub fn remove(&mut self, tag: &str) {
        self.fields.retain(|(t, _)| *t != tag);
    }

    /// The fields in input order.
    pub fn iter(&self) -> impl Iterator<Item = &(Span, Span)> {
        self.fields.iter()
    }

    /// Parses the `TAG:VALUE` fields after a record-type code.
    fn parse(sc: &mut LineScanner) -> Result<Self> {
        let mut line = Self::new();
        while sc.remaining() > 0 {
            let (tag, found) = sc.read_until(b':');
            if !found || tag.len() != 2 {
                return Err(SamprepError::InvalidHeader {
                    reason: format!("malformed header field tag '{tag}'"),
                });
            }
            let (value, _) = sc.read_until(b'\t');
            if line.get(tag.as_str()).is_some() {
                return Err(SamprepError::DuplicateTag {
                    tag: tag.as_str().to_string(),
                    context: "header line",
                });
            }
            line.fields.push((tag, value));
        }
        Ok(line)
    }

    fn format_into(&self, code: &str, out: &mut String) {
        out.push_str(code);
        for (tag, value) in &self.fields {
            out.push('\t');
            out.push_str(tag.as_str());
            out.push(':');
            out.push_str(value.as_str());
        }
        out.push('\n');
    }
}

/// The sorting order of a SAM file, plus the `keep` pseudo-order that defers
/// to whatever the input header declares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Keep,
    Unknown,
    Unsorted,
    Coordinate,
    Queryname,
}

impl SortOrder {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            SortOrder::Keep => "keep",
            SortOrder::Unknown => "unknown",
            SortOrder::Unsorted => "unsorted",
            SortOrder::Coordinate => "coordinate",
            SortOrder::Queryname => "queryname",
        }
    }
}

impl std::fmt::Display for SortOrder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SortOrder {
    type Err = SamprepError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "keep" => Ok(SortOrder::Keep),
            "unknown" => Ok(SortOrder::Unknown),
            "unsorted" => Ok(SortOrder::Unsorted),
            "coordinate" => Ok(SortOrder::Coordinate),
            "queryname" => Ok(SortOrder::Queryname),
            _ => Err(SamprepError::UnknownSortingOrder { value: s.to_string() }),
        }
    }
}

/// Parses a whitespace-separated `TAG:VALUE` list, the form header lines
/// take on a command line (e.g. `ID:group1 LB:lib1`).
pub fn parse_header_line_from_str(s: &str) -> Result<HeaderLine> {
    let mut line = HeaderLine::new();
    for field in s.split_whitespace() {
        if field.len() < 3 || field.as_bytes()[2] != b':' {
            return Err(SamprepError::InvalidHeader {
                reason: format!("malformed header field '{field}'"),
            });
        }
        let tag = &field[..2];
        if line.get(tag).is_some() {
            return Err(SamprepError::DuplicateTag {
                tag: tag.to_string(),
                context: "header line",
            });
        }
        line.set(tag, Span::from_str(&field[3..]));
    }
    Ok(line)
}

/// Whether a three-character record-type code is user-defined (contains a
/// lowercase letter after the `@`).
fn is_user_code(code: &str) -> bool {
    code.bytes().skip(1).any(|b| b.is_ascii_lowercase())
}

/// A parsed SAM header.
#[derive(Debug, Clone, Default)]
pub struct SamHeader {
    pub hd: Option<HeaderLine>,
    pub sq: Vec<HeaderLine>,
    pub rg: Vec<HeaderLine>,
    pub pg: Vec<HeaderLine>,
    pub co: Vec<Span>,
    /// User-defined record types in first-seen order.
    pub user_records: Vec<(Span, Vec<HeaderLine>)>,
}

impl SamHeader {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses the header from the leading `@` lines of a file.
    pub fn parse(lines: &[Arc<str>]) -> Result<Self> {
        let mut header = Self::new();
        for (i, line) in lines.iter().enumerate() {
            header.parse_line(line, i == 0)?;
        }
        Ok(header)
    }

    /// Parses one header line into the right section. `first` guards the
    /// rule that `@HD`, if present, must be the first line of the file.
    pub fn parse_line(&mut self, line: &Arc<str>, first: bool) -> Result<()> {
        if line.len() < 3 || !line.starts_with('@') {
            return Err(SamprepError::InvalidHeader {
                reason: format!("malformed header line '{line}'"),
            });
        }
        let code = &line[..3];
        if code == "@CO" {
            let start = if line.as_bytes().get(3) == Some(&b'\t') { 4 } else { 3 };
            self.co.push(Span::slice(line, start, line.len() - start));
            return Ok(());
        }
        if line.len() > 3 && line.as_bytes()[3] != b'\t' {
            return Err(SamprepError::InvalidHeader {
                reason: format!("header code '{code}' not followed by a tab"),
            });
        }
        let mut sc = LineScanner::starting_at(line, 4.min(line.len()));
        match code {
            "@HD" => {
                if !first {
                    return Err(SamprepError::InvalidHeader {
                        reason: "@HD line is not the first line".to_string(),
                    });
                }
                self.hd = Some(HeaderLine::parse(&mut sc)?);
            }
            "@SQ" => self.sq.push(HeaderLine::parse(&mut sc)?),
            "@RG" => self.rg.push(HeaderLine::parse(&mut sc)?),
            "@PG" => self.pg.push(HeaderLine::parse(&mut sc)?),
            _ if is_user_code(code) => {
                let parsed = HeaderLine::parse(&mut sc)?;
                let code_span = Span::slice(line, 0, 3);
                match self.user_records.iter_mut().find(|(c, _)| *c == code_span) {
                    Some((_, records)) => records.push(parsed),
                    None => self.user_records.push((code_span, vec![parsed])),
                }
            }
            _ => {
                return Err(SamprepError::InvalidHeader {
                    reason: format!("unknown record type code '{code}'"),
                });
            }
        }
        Ok(())
    }

    /// Formats the whole header, one `\n`-terminated line per record.
    pub fn format_into(&self, out: &mut String) {
        if let Some(hd) = &self.hd {
            hd.format_into("@HD", out);
        }
        for line in &self.sq {
            line.format_into("@SQ", out);
        }
        for line in &self.rg {
            line.format_into("@RG", out);
        }
        for line in &self.pg {
            line.format_into("@PG", out);
        }
        for comment in &self.co {
            out.push_str("@CO\t");
            out.push_str(comment.as_str());
            out.push('\n');
        }
        for (code, records) in &self.user_records {
            for line in records {
                line.format_into(code.as_str(), out);
            }
        }
    }

    fn ensure_hd(&mut self) -> &mut HeaderLine {
        self.hd.get_or_insert_with(|| {
            let mut hd = HeaderLine::new();
            hd.set(VN, Span::from_str(FILE_FORMAT_VERSION));
            hd
        })
    }

    /// The declared sorting order; absent or unrecognized SO reads as
    /// `unknown`.
    #[must_use]
    pub fn sort_order(&self) -> SortOrder {
        self.hd
            .as_ref()
            .and_then(|hd| hd.get(SO))
            .and_then(|so| so.as_str().parse().ok())
            .unwrap_or(SortOrder::Unknown)
    }

    /// Declares the sorting order. Setting SO removes any GO field.
    pub fn set_sort_order(&mut self, order: SortOrder) {
        let hd = self.ensure_hd();
        hd.remove(GO);
        hd.set(SO, Span::from_str(order.as_str()));
    }

    /// The declared grouping order, if any.
    #[must_use]
    pub fn group_order(&self) -> Option<&Span> {
        self.hd.as_ref().and_then(|hd| hd.get(GO))
    }

    /// Declares the grouping order. Setting GO removes any SO field.
    pub fn set_group_order(&mut self, order: Span) {
        let hd = self.ensure_hd();
        hd.remove(SO);
        hd.set(GO, order);
    }

    /// Reference dictionary: `@SQ` SN values mapped to their index.
    #[must_use]
    pub fn reference_dict(&self) -> AHashMap<Span, i32> {
        let mut dict = AHashMap::with_capacity(self.sq.len());
        for (i, sq) in self.sq.iter().enumerate() {
            if let Some(sn) = sq.get(SN) {
                dict.insert(sn.clone(), i as i32);
            }
        }
        dict
    }

    /// Removes and returns the records for a user-defined code, if any.
    pub fn take_user_records(&mut self, code: &str) -> Option<Vec<HeaderLine>> {
        let idx = self.user_records.iter().position(|(c, _)| *c == code)?;
        Some(self.user_records.remove(idx).1)
    }
}
