//! Alignment records and their derived duplicate-marking fields.
//!
//! A [`SamRecord`] holds the eleven mandatory columns as zero-copy spans plus
//! the ordered optional fields. The FLAG lives in an `AtomicU16` so the
//! duplicate bit can be set from the marking pass through a shared slice; all
//! other fields are only written by the thread that owns the record at the
//! time.
//!
//! The derived fields (`ref_id`, `library`, `adapted_pos`, `adapted_score`)
//! are transient: they are computed by the adapt pass and never serialized.

use std::cmp::Ordering;
use std::sync::Arc;
use std::sync::atomic::{self, AtomicU16};

use ahash::AHashMap;

use crate::cigar::{CigarCache, clip_table, reference_table};
use crate::errors::{Result, SamprepError};
use crate::fields::{TagField, TagValue, assoc, assoc_mut, parse_tag_field};
use crate::scanner::{LineScanner, parse_num};
use crate::span::{InternPool, Span};

pub const MULTIPLE: u16 = 0x1;
pub const PROPER: u16 = 0x2;
pub const UNMAPPED: u16 = 0x4;
pub const NEXT_UNMAPPED: u16 = 0x8;
pub const REVERSED: u16 = 0x10;
pub const NEXT_REVERSED: u16 = 0x20;
pub const FIRST: u16 = 0x40;
pub const LAST: u16 = 0x80;
pub const SECONDARY: u16 = 0x100;
pub const QC_FAILED: u16 = 0x200;
pub const DUPLICATE: u16 = 0x400;
pub const SUPPLEMENTARY: u16 = 0x800;

/// The `RG` tag.
pub const RG: [u8; 2] = *b"RG";

/// Phred contribution per QUAL byte: quality below 15 contributes 0,
/// otherwise byte − 33.
const fn phred_score_table() -> [u8; 256] {
    let mut table = [0u8; 256];
    let mut c = 33usize;
    while c <= 126 {
        if c - 33 >= 15 {
            table[c] = (c - 33) as u8;
        }
        c += 1;
    }
    table
}

/// 1 for QUAL bytes outside the printable range [33, 126].
const fn phred_invalid_table() -> [u8; 256] {
    let mut table = [0u8; 256];
    let mut c = 0usize;
    while c < 256 {
        if c < 33 || c > 126 {
            table[c] = 1;
        }
        c += 1;
    }
    table
}

const PHRED_SCORE: [u8; 256] = phred_score_table();
const PHRED_INVALID: [u8; 256] = phred_invalid_table();
const CLIPPED: [u32; 256] = clip_table();
const REFERENCE: [u32; 256] = reference_table();

/// One SAM alignment line.
#[derive(Debug)]
pub struct SamRecord {
    pub qname: Span,
    flag: AtomicU16,
    pub rname: Span,
    /// 1-based leftmost position, 0 when unavailable.
    pub pos: i32,
    pub mapq: u8,
    /// Raw CIGAR text; parsed on demand through the run's [`CigarCache`].
    pub cigar: Span,
    pub rnext: Span,
    pub pnext: i32,
    pub tlen: i32,
    pub seq: Span,
    pub qual: Span,
    pub tags: Vec<TagField>,

    /// Index into the reference dictionary, −1 when unknown. Transient.
    pub ref_id: i32,
    /// Interned library name resolved through the @RG table. Transient.
    pub library: Option<Span>,
    /// Unclipped position computed by the adapt pass. Transient.
    pub adapted_pos: i32,
    /// Phred score computed by the adapt pass. Transient.
    pub adapted_score: i32,
}

fn mandatory(sc: &mut LineScanner, field: &'static str) -> Result<Span> {
    let (span, found) = sc.read_until(b'\t');
    if found {
        Ok(span)
    } else {
        Err(SamprepError::MissingColumn { field })
    }
}

impl SamRecord {
    /// Parses one alignment line: eleven mandatory tab-separated columns
    /// followed by optional `TAG:TYPE:VALUE` fields.
    pub fn parse(line: &Arc<str>) -> Result<Self> {
        let mut sc = LineScanner::new(line);
        let qname = mandatory(&mut sc, "QNAME")?;
        let flag: u16 = parse_num(&mandatory(&mut sc, "FLAG")?, "FLAG")?;
        let rname = mandatory(&mut sc, "RNAME")?;
        let pos: i32 = parse_num(&mandatory(&mut sc, "POS")?, "POS")?;
        let mapq: u8 = parse_num(&mandatory(&mut sc, "MAPQ")?, "MAPQ")?;
        let cigar = mandatory(&mut sc, "CIGAR")?;
        let rnext = mandatory(&mut sc, "RNEXT")?;
        let pnext: i32 = parse_num(&mandatory(&mut sc, "PNEXT")?, "PNEXT")?;
        let tlen: i32 = parse_num(&mandatory(&mut sc, "TLEN")?, "TLEN")?;
        let seq = mandatory(&mut sc, "SEQ")?;
        // QUAL is the last mandatory column; end of line is fine here.
        let (qual, _) = sc.read_until(b'\t');

        let mut tags: Vec<TagField> = Vec::new();
        while sc.remaining() > 0 {
            let field = parse_tag_field(&mut sc)?;
            if assoc(&tags, field.tag).is_some() {
                return Err(SamprepError::DuplicateTag {
                    tag: field.tag_str(),
                    context: "alignment line",
                });
            }
            tags.push(field);
        }

        Ok(Self {
            qname,
            flag: AtomicU16::new(flag),
            rname,
            pos,
            mapq,
            cigar,
            rnext,
            pnext,
            tlen,
            seq,
            qual,
            tags,
            ref_id: -1,
            library: None,
            adapted_pos: 0,
            adapted_score: 0,
        })
    }

    /// Appends the tab-separated line (no trailing newline) to `out`.
    pub fn format_into(&self, out: &mut String) {
        out.push_str(self.qname.as_str());
        out.push('\t');
        out.push_str(&self.flag().to_string());
        out.push('\t');
        out.push_str(self.rname.as_str());
        out.push('\t');
        out.push_str(&self.pos.to_string());
        out.push('\t');
        out.push_str(&self.mapq.to_string());
        out.push('\t');
        out.push_str(self.cigar.as_str());
        out.push('\t');
        out.push_str(self.rnext.as_str());
        out.push('\t');
        out.push_str(&self.pnext.to_string());
        out.push('\t');
        out.push_str(&self.tlen.to_string());
        out.push('\t');
        out.push_str(self.seq.as_str());
        out.push('\t');
        out.push_str(self.qual.as_str());
        for tag in &self.tags {
            tag.format_into(out);
        }
    }

    #[must_use]
    pub fn flag(&self) -> u16 {
        self.flag.load(atomic::Ordering::Relaxed)
    }

    pub fn set_flag(&mut self, flag: u16) {
        *self.flag.get_mut() = flag;
    }

    /// Sets the duplicate bit. Safe to call concurrently from the marking
    /// pass; idempotent.
    pub fn set_duplicate(&self) {
        self.flag.fetch_or(DUPLICATE, atomic::Ordering::Relaxed);
    }

    #[must_use]
    pub fn is_multiple(&self) -> bool {
        self.flag() & MULTIPLE != 0
    }

    #[must_use]
    pub fn is_proper(&self) -> bool {
        self.flag() & PROPER != 0
    }

    #[must_use]
    pub fn is_unmapped(&self) -> bool {
        self.flag() & UNMAPPED != 0
    }

    #[must_use]
    pub fn is_next_unmapped(&self) -> bool {
        self.flag() & NEXT_UNMAPPED != 0
    }

    #[must_use]
    pub fn is_reversed(&self) -> bool {
        self.flag() & REVERSED != 0
    }

    #[must_use]
    pub fn is_next_reversed(&self) -> bool {
        self.flag() & NEXT_REVERSED != 0
    }

    #[must_use]
    pub fn is_first(&self) -> bool {
        self.flag() & FIRST != 0
    }

    #[must_use]
    pub fn is_last(&self) -> bool {
        self.flag() & LAST != 0
    }

    #[must_use]
    pub fn is_secondary(&self) -> bool {
        self.flag() & SECONDARY != 0
    }

    #[must_use]
    pub fn is_qc_failed(&self) -> bool {
        self.flag() & QC_FAILED != 0
    }

    #[must_use]
    pub fn is_duplicate(&self) -> bool {
        self.flag() & DUPLICATE != 0
    }

    #[must_use]
    pub fn is_supplementary(&self) -> bool {
        self.flag() & SUPPLEMENTARY != 0
    }

    #[must_use]
    pub fn flag_every(&self, flag: u16) -> bool {
        self.flag() & flag == flag
    }

    #[must_use]
    pub fn flag_some(&self, flag: u16) -> bool {
        self.flag() & flag != 0
    }

    #[must_use]
    pub fn flag_not_every(&self, flag: u16) -> bool {
        self.flag() & flag != flag
    }

    #[must_use]
    pub fn flag_not_any(&self, flag: u16) -> bool {
        self.flag() & flag == 0
    }

    /// An unpaired read, or a paired read whose mate is unmapped: competes as
    /// a fragment only.
    #[must_use]
    pub fn is_true_fragment(&self) -> bool {
        self.flag() & (MULTIPLE | NEXT_UNMAPPED) != MULTIPLE
    }

    /// A paired read whose mate is mapped: competes as half of a pair.
    #[must_use]
    pub fn is_true_pair(&self) -> bool {
        self.flag() & (MULTIPLE | NEXT_UNMAPPED) == MULTIPLE
    }

    /// The `RG:Z` value, if present.
    #[must_use]
    pub fn read_group(&self) -> Option<&Span> {
        match assoc(&self.tags, RG) {
            Some(TagField { value: TagValue::String(rg), .. }) => Some(rg),
            _ => None,
        }
    }

    /// Sets or replaces the `RG:Z` tag.
    pub fn set_read_group(&mut self, rg: Span) {
        match assoc_mut(&mut self.tags, RG) {
            Some(field) => field.value = TagValue::String(rg),
            None => self.tags.push(TagField { tag: RG, value: TagValue::String(rg) }),
        }
    }

    /// Sum of Phred contributions over QUAL: bytes outside [33, 126] are
    /// invalid and contribute 0, quality below 15 contributes 0, otherwise
    /// byte − 33.
    ///
    /// An invalid byte trips a `debug_assert!`; release builds report it as a
    /// data-quality warning and keep going.
    #[must_use]
    pub fn phred_score(&self) -> i32 {
        let mut score = 0i32;
        let mut invalid = 0u8;
        for &c in self.qual.as_bytes() {
            score += i32::from(PHRED_SCORE[c as usize]);
            invalid |= PHRED_INVALID[c as usize];
        }
        if invalid != 0 {
            debug_assert!(invalid == 0, "invalid QUAL character in {}", self.qual);
            log::warn!("invalid QUAL character in {} for read {}", self.qual, self.qname);
        }
        score
    }

    /// The leftmost position the read would have if clipping had not removed
    /// bases, strand-adjusted for duplicate grouping.
    ///
    /// With no CIGAR this is POS. Forward strand: POS minus the leading run
    /// of `S`/`H` lengths. Reverse strand: POS − 1 plus, walking operations
    /// back to front, the lengths of the trailing clip run and of every
    /// reference-consuming operation. The sticky `clipped` flag is
    /// multiplicative, so one non-clip operation ends the trailing run for
    /// good even when more clips appear further in.
    pub fn unclipped_position(&self, cigars: &CigarCache) -> Result<i32> {
        let ops = cigars.parse(&self.cigar)?;
        if ops.is_empty() {
            return Ok(self.pos);
        }
        if self.is_reversed() {
            let mut clipped = 1u32;
            let mut result = self.pos - 1;
            for op in ops.iter().rev() {
                clipped *= CLIPPED[op.op as usize];
                result += ((REFERENCE[op.op as usize] | clipped) * op.len) as i32;
            }
            Ok(result)
        } else {
            let mut result = self.pos;
            for op in ops.iter() {
                if CLIPPED[op.op as usize] == 0 {
                    break;
                }
                result -= op.len as i32;
            }
            Ok(result)
        }
    }

    /// The adapt pass: interns the RG tag, resolves the library through the
    /// read-group table (an absent or unknown RG leaves the library unset),
    /// and stores the unclipped position and Phred score.
    ///
    /// `ref_id` is populated by the upstream reference-dictionary filter, not
    /// here.
    pub fn adapt(
        &mut self,
        lb_table: &AHashMap<Span, Span>,
        intern: &InternPool,
        cigars: &CigarCache,
    ) -> Result<()> {
        if let Some(rg) = self.read_group() {
            let rg = intern.intern(rg);
            self.library = lb_table.get(&rg).cloned();
            self.set_read_group(rg);
        }
        self.adapted_pos = self.unclipped_position(cigars)?;
        self.adapted_score = self.phred_score();
        Ok(())
    }
}

/// Coordinate order: reference id ascending with unknown (−1) after every
/// valid id, ties broken by POS.
#[must_use]
pub fn coordinate_cmp(a: &SamRecord, b: &SamRecord) -> Ordering {
    if a.ref_id == b.ref_id {
        a.pos.cmp(&b.pos)
    } else if a.ref_id < b.ref_id {
        if a.ref_id >= 0 { Ordering::Less } else { Ordering::Greater }
    } else if b.ref_id < 0 {
        Ordering::Less
    } else {
        Ordering::Greater
    }
}
