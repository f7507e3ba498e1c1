//! Typed optional tag fields (`TAG:TYPE:VALUE`).
//!
//! Each optional field is a two-character tag plus a type-tagged value. The
//! value is a sum type with one formatting operation dispatched by variant,
//! which keeps exhaustive-match safety without virtual dispatch. Numeric
//! arrays carry their element-type code so formatting round-trips exactly.

use crate::errors::{Result, SamprepError};
use crate::scanner::LineScanner;
use crate::span::Span;

/// A typed numeric array (`B` fields), tagged with its SAM element-type code.
#[derive(Debug, Clone, PartialEq)]
pub enum NumericArray {
    /// `c`: signed 8-bit
    I8(Vec<i8>),
    /// `C`: unsigned 8-bit
    U8(Vec<u8>),
    /// `s`: signed 16-bit
    I16(Vec<i16>),
    /// `S`: unsigned 16-bit
    U16(Vec<u16>),
    /// `i`: signed 32-bit
    I32(Vec<i32>),
    /// `I`: unsigned 32-bit
    U32(Vec<u32>),
    /// `f`: 32-bit float
    F32(Vec<f32>),
}

impl NumericArray {
    /// The SAM element-type code (`cCsSiIf`).
    #[must_use]
    pub fn type_code(&self) -> char {
        match self {
            NumericArray::I8(_) => 'c',
            NumericArray::U8(_) => 'C',
            NumericArray::I16(_) => 's',
            NumericArray::U16(_) => 'S',
            NumericArray::I32(_) => 'i',
            NumericArray::U32(_) => 'I',
            NumericArray::F32(_) => 'f',
        }
    }

    fn format_into(&self, out: &mut String) {
        fn elems<T: std::fmt::Display>(values: &[T], out: &mut String) {
            for v in values {
                out.push(',');
                out.push_str(&v.to_string());
            }
        }
        out.push(self.type_code());
        match self {
            NumericArray::I8(v) => elems(v, out),
            NumericArray::U8(v) => elems(v, out),
            NumericArray::I16(v) => elems(v, out),
            NumericArray::U16(v) => elems(v, out),
            NumericArray::I32(v) => elems(v, out),
            NumericArray::U32(v) => elems(v, out),
            NumericArray::F32(v) => elems(v, out),
        }
    }
}

/// A type-tagged optional field value.
#[derive(Debug, Clone, PartialEq)]
pub enum TagValue {
    /// `A`: a single printable character
    Character(u8),
    /// `i`: a signed integer
    Int(i64),
    /// `f`: a float
    Float(f32),
    /// `Z`: a string (zero-copy span into the line buffer)
    String(Span),
    /// `H`: a hex-encoded byte array
    Hex(Vec<u8>),
    /// `B`: a typed numeric array
    Array(NumericArray),
}

impl TagValue {
    /// The SAM TYPE code.
    #[must_use]
    pub fn type_code(&self) -> char {
        match self {
            TagValue::Character(_) => 'A',
            TagValue::Int(_) => 'i',
            TagValue::Float(_) => 'f',
            TagValue::String(_) => 'Z',
            TagValue::Hex(_) => 'H',
            TagValue::Array(_) => 'B',
        }
    }
}

/// One optional field: two-character tag plus typed value.
#[derive(Debug, Clone, PartialEq)]
pub struct TagField {
    /// The two-character tag.
    pub tag: [u8; 2],
    /// The typed value.
    pub value: TagValue,
}

impl TagField {
    /// Appends `\tTAG:TYPE:VALUE` to `out`.
    pub fn format_into(&self, out: &mut String) {
        out.push('\t');
        out.push(self.tag[0] as char);
        out.push(self.tag[1] as char);
        out.push(':');
        out.push(self.value.type_code());
        out.push(':');
        match &self.value {
            TagValue::Character(c) => out.push(*c as char),
            TagValue::Int(v) => out.push_str(&v.to_string()),
            TagValue::Float(v) => out.push_str(&v.to_string()),
            TagValue::String(s) => out.push_str(s.as_str()),
            TagValue::Hex(bytes) => {
                for b in bytes {
                    out.push_str(&format!("{b:02x}"));
                }
            }
            TagValue::Array(arr) => arr.format_into(out),
        }
    }

    /// The tag as a str for error messages.
    #[must_use]
    pub fn tag_str(&self) -> String {
        String::from_utf8_lossy(&self.tag).into_owned()
    }
}

/// First field with the given tag, if any.
#[must_use]
pub fn assoc<'a>(tags: &'a [TagField], tag: [u8; 2]) -> Option<&'a TagField> {
    tags.iter().find(|f| f.tag == tag)
}

/// Mutable variant of [`assoc`].
pub fn assoc_mut(tags: &mut [TagField], tag: [u8; 2]) -> Option<&mut TagField> {
    tags.iter_mut().find(|f| f.tag == tag)
}

fn int_value(span: &Span) -> Result<i64> {
    span.as_str().parse().map_err(|_| SamprepError::MalformedTagField {
        text: span.as_str().to_string(),
        reason: "invalid integer value",
    })
}

fn float_value(span: &Span) -> Result<f32> {
    span.as_str().parse().map_err(|_| SamprepError::MalformedTagField {
        text: span.as_str().to_string(),
        reason: "invalid float value",
    })
}

fn hex_value(span: &Span) -> Result<Vec<u8>> {
    let s = span.as_str();
    if s.len() % 2 != 0 {
        return Err(SamprepError::MalformedTagField {
            text: s.to_string(),
            reason: "odd-length hex byte array",
        });
    }
    (0..s.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&s[i..i + 2], 16).map_err(|_| SamprepError::MalformedTagField {
                text: s.to_string(),
                reason: "invalid hex digit",
            })
        })
        .collect()
}

fn numeric_array(sc: &mut LineScanner, tag: &Span) -> Result<NumericArray> {
    fn parse_all<T: std::str::FromStr>(sc: &mut LineScanner) -> Result<Vec<T>> {
        let mut values = Vec::new();
        loop {
            let (v, sep) = sc.read_until_either(b',', b'\t');
            values.push(v.as_str().parse().map_err(|_| SamprepError::MalformedTagField {
                text: v.as_str().to_string(),
                reason: "invalid numeric array element",
            })?);
            if sep != b',' {
                return Ok(values);
            }
        }
    }

    let (elem_type, found) = sc.read_byte_until(b',')?;
    if !found {
        return Err(SamprepError::MalformedTagField {
            text: tag.as_str().to_string(),
            reason: "numeric array without elements",
        });
    }
    match elem_type {
        b'c' => Ok(NumericArray::I8(parse_all(sc)?)),
        b'C' => Ok(NumericArray::U8(parse_all(sc)?)),
        b's' => Ok(NumericArray::I16(parse_all(sc)?)),
        b'S' => Ok(NumericArray::U16(parse_all(sc)?)),
        b'i' => Ok(NumericArray::I32(parse_all(sc)?)),
        b'I' => Ok(NumericArray::U32(parse_all(sc)?)),
        b'f' => Ok(NumericArray::F32(parse_all(sc)?)),
        other => Err(SamprepError::UnknownTagType {
            type_code: other as char,
            tag: tag.as_str().to_string(),
        }),
    }
}

/// Parses one `TAG:TYPE:VALUE` field at the scanner's position.
pub fn parse_tag_field(sc: &mut LineScanner) -> Result<TagField> {
    let (tag, found) = sc.read_until(b':');
    if !found || tag.len() != 2 {
        return Err(SamprepError::MalformedTagField {
            text: tag.as_str().to_string(),
            reason: "field tag must be two characters followed by ':'",
        });
    }
    let (type_code, found) = sc.read_byte_until(b':')?;
    if !found {
        return Err(SamprepError::MalformedTagField {
            text: tag.as_str().to_string(),
            reason: "field type must be followed by ':'",
        });
    }
    let value = match type_code {
        b'A' => {
            let (c, _) = sc.read_byte_until(b'\t')?;
            TagValue::Character(c)
        }
        b'i' => {
            let (v, _) = sc.read_until(b'\t');
            TagValue::Int(int_value(&v)?)
        }
        b'f' => {
            let (v, _) = sc.read_until(b'\t');
            TagValue::Float(float_value(&v)?)
        }
        b'Z' => {
            let (v, _) = sc.read_until(b'\t');
            TagValue::String(v)
        }
        b'H' => {
            let (v, _) = sc.read_until(b'\t');
            TagValue::Hex(hex_value(&v)?)
        }
        b'B' => TagValue::Array(numeric_array(sc, &tag)?),
        other => {
            return Err(SamprepError::UnknownTagType {
                type_code: other as char,
                tag: tag.as_str().to_string(),
            });
        }
    };
    Ok(TagField { tag: [tag.byte_at(0), tag.byte_at(1)], value })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn parse_one(s: &str) -> Result<TagField> {
        let buf: Arc<str> = Arc::from(s);
        let mut sc = LineScanner::new(&buf);
        parse_tag_field(&mut sc)
    }

    fn format_one(field: &TagField) -> String {
        let mut out = String::new();
        field.format_into(&mut out);
        out
    }

    #[test]
    fn test_parse_character() {
        let f = parse_one("XA:A:q").unwrap();
        assert_eq!(f.tag, *b"XA");
        assert_eq!(f.value, TagValue::Character(b'q'));
        assert_eq!(format_one(&f), "\tXA:A:q");
    }

    #[test]
    fn test_parse_integer() {
        let f = parse_one("NM:i:-42").unwrap();
        assert_eq!(f.value, TagValue::Int(-42));
        assert_eq!(format_one(&f), "\tNM:i:-42");
    }

    #[test]
    fn test_parse_float() {
        let f = parse_one("XS:f:1.5").unwrap();
        assert_eq!(f.value, TagValue::Float(1.5));
        assert_eq!(format_one(&f), "\tXS:f:1.5");
    }

    #[test]
    fn test_parse_string() {
        let f = parse_one("RG:Z:sample.1").unwrap();
        assert!(matches!(&f.value, TagValue::String(s) if *s == "sample.1"));
        assert_eq!(format_one(&f), "\tRG:Z:sample.1");
    }

    #[test]
    fn test_parse_hex() {
        let f = parse_one("XH:H:1aff00").unwrap();
        assert_eq!(f.value, TagValue::Hex(vec![0x1a, 0xff, 0x00]));
        assert_eq!(format_one(&f), "\tXH:H:1aff00");
        assert!(parse_one("XH:H:1af").is_err());
        assert!(parse_one("XH:H:zz").is_err());
    }

    #[test]
    fn test_parse_numeric_arrays() {
        let f = parse_one("XB:B:c,-1,2,-3").unwrap();
        assert_eq!(f.value, TagValue::Array(NumericArray::I8(vec![-1, 2, -3])));
        assert_eq!(format_one(&f), "\tXB:B:c,-1,2,-3");

        let f = parse_one("XB:B:I,1,4294967295").unwrap();
        assert_eq!(f.value, TagValue::Array(NumericArray::U32(vec![1, u32::MAX])));
        assert_eq!(format_one(&f), "\tXB:B:I,1,4294967295");

        let f = parse_one("XB:B:f,0.5,2").unwrap();
        assert_eq!(f.value, TagValue::Array(NumericArray::F32(vec![0.5, 2.0])));
    }

    #[test]
    fn test_element_type_round_trips() {
        // Signed vs unsigned element codes must survive format/parse.
        for raw in ["XB:B:s,-5,5", "XB:B:S,5,65535", "XB:B:C,0,255", "XB:B:i,-7", "XB:B:I,7"] {
            let f = parse_one(raw).unwrap();
            let text = format_one(&f);
            let reparsed = parse_one(&text[1..]).unwrap();
            assert_eq!(f, reparsed, "round trip for {raw}");
        }
    }

    #[test]
    fn test_unknown_type_code() {
        let err = parse_one("XX:Q:1").unwrap_err();
        assert!(matches!(err, SamprepError::UnknownTagType { type_code: 'Q', .. }));
        let err = parse_one("XB:B:q,1").unwrap_err();
        assert!(matches!(err, SamprepError::UnknownTagType { type_code: 'q', .. }));
    }

    #[test]
    fn test_malformed_tag() {
        assert!(parse_one("X:i:1").is_err());
        assert!(parse_one("LONG:i:1").is_err());
        assert!(parse_one("XB:B:").is_err());
    }

    #[test]
    fn test_assoc() {
        let tags = vec![
            parse_one("RG:Z:rg1").unwrap(),
            parse_one("NM:i:3").unwrap(),
        ];
        assert!(assoc(&tags, *b"NM").is_some());
        assert!(assoc(&tags, *b"MD").is_none());
    }
}
