//! CIGAR operation parsing and the shared parse cache.
//!
//! A CIGAR string is a run-length encoding of how a read aligns against the
//! reference: decimal lengths each followed by one operation letter from
//! `MIDNSHPX=` (lower case accepted on input and folded to upper case). The
//! same CIGAR strings recur across millions of records, so parses are
//! memoized per distinct raw span in a [`CigarCache`] owned by the pipeline
//! run.

use std::sync::Arc;

use crate::errors::{Result, SamprepError};
use crate::scanner::parse_num;
use crate::sharded::ShardedMap;
use crate::span::Span;

/// One run-length-encoded alignment operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CigarOp {
    /// Run length.
    pub len: u32,
    /// Upper-case operation letter, one of `MIDNSHPX=`.
    pub op: u8,
}

/// Upper-cased operation letter for a raw input byte, or 0 if not a CIGAR
/// operation.
const fn op_table() -> [u8; 256] {
    let mut table = [0u8; 256];
    let ops = *b"MIDNSHPX=";
    let mut i = 0;
    while i < ops.len() {
        table[ops[i] as usize] = ops[i];
        table[ops[i].to_ascii_lowercase() as usize] = ops[i];
        i += 1;
    }
    table
}

const OP_TABLE: [u8; 256] = op_table();

/// 1 for the clipping operations `S` and `H`, 0 otherwise.
pub(crate) const fn clip_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    table[b'S' as usize] = 1;
    table[b'H' as usize] = 1;
    table
}

/// 1 for the reference-consuming operations `M`, `D`, `N`, `=`, `X`.
pub(crate) const fn reference_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    table[b'M' as usize] = 1;
    table[b'D' as usize] = 1;
    table[b'N' as usize] = 1;
    table[b'=' as usize] = 1;
    table[b'X' as usize] = 1;
    table
}

/// Parses a raw CIGAR string into its operation sequence.
///
/// The unavailable marker `*` is handled by [`CigarCache`], not here; an
/// empty string is a parse error.
pub fn parse_cigar(cigar: &Span) -> Result<Vec<CigarOp>> {
    let bytes = cigar.as_bytes();
    if bytes.is_empty() {
        return Err(SamprepError::InvalidCigar {
            cigar: String::new(),
            reason: "empty CIGAR string",
        });
    }
    let mut ops = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        let start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        if i == start {
            return Err(SamprepError::InvalidCigar {
                cigar: cigar.as_str().to_string(),
                reason: "operation without a length",
            });
        }
        if i == bytes.len() {
            return Err(SamprepError::InvalidCigar {
                cigar: cigar.as_str().to_string(),
                reason: "trailing length without operation",
            });
        }
        let len: u32 = parse_num(&cigar.sub(start, i - start), "CIGAR")?;
        let op = OP_TABLE[bytes[i] as usize];
        if op == 0 {
            return Err(SamprepError::InvalidCigar {
                cigar: cigar.as_str().to_string(),
                reason: "unknown operation letter",
            });
        }
        ops.push(CigarOp { len, op });
        i += 1;
    }
    Ok(ops)
}

/// Formats an operation sequence back to CIGAR text (`*` when empty).
#[must_use]
pub fn format_cigar(ops: &[CigarOp]) -> String {
    if ops.is_empty() {
        return "*".to_string();
    }
    let mut out = String::with_capacity(ops.len() * 3);
    for op in ops {
        out.push_str(&op.len.to_string());
        out.push(op.op as char);
    }
    out
}

/// Memoized CIGAR parses keyed by the raw (case-preserved) span.
///
/// Pre-seeded with `* -> []` so the unavailable marker never hits the
/// scanner. Concurrent parses of the same new span race on insertion;
/// first committed wins and the losing parse is discarded, which is
/// observably correct because parses of identical input are value-equal.
pub struct CigarCache {
    cache: ShardedMap<Span, Arc<[CigarOp]>>,
}

impl Default for CigarCache {
    fn default() -> Self {
        let cache = ShardedMap::new();
        let _seed = cache.get_or_insert_with(Span::from_str("*"), || Arc::from(Vec::new()));
        Self { cache }
    }
}

impl CigarCache {
    /// Creates a cache holding only the `*` seed.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the parsed operation sequence for `cigar`, parsing and caching
    /// on first occurrence.
    pub fn parse(&self, cigar: &Span) -> Result<Arc<[CigarOp]>> {
        if let Some(ops) = self.cache.get(cigar) {
            return Ok(ops);
        }
        let parsed: Arc<[CigarOp]> = Arc::from(parse_cigar(cigar)?);
        Ok(self.cache.get_or_insert_with(cigar.clone(), || parsed))
    }

    /// Number of distinct cached CIGAR strings (including the `*` seed).
    #[must_use]
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    /// Always false: the `*` seed is present from construction.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        false
    }
}
