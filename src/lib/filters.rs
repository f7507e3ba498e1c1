//! Stateless per-record filters and their header-patching factories.
//!
//! A filter factory runs once against the mutable header (its chance to
//! patch `@SQ`, `@RG`, `@PG`, or user records) and returns an optional
//! per-record predicate. The predicate may rewrite the record in place;
//! returning `false` drops the record from the output.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;

use ahash::AHashSet;
use rand::Rng;

use crate::errors::{Result, SamprepError};
use crate::header::{HeaderLine, SamHeader, SortOrder};
use crate::record::{self, SamRecord};
use crate::span::Span;

/// A per-record predicate; `false` drops the record.
pub type RecordFilter = Box<dyn Fn(&mut SamRecord) -> bool + Send + Sync>;

/// A one-shot header pass producing an optional predicate.
pub type FilterFactory = Box<dyn FnOnce(&mut SamHeader) -> Result<Option<RecordFilter>> + Send>;

/// Drops unmapped reads (FLAG bit 0x4).
pub fn filter_unmapped_reads(_header: &mut SamHeader) -> Result<Option<RecordFilter>> {
    Ok(Some(Box::new(|rec| rec.flag_not_any(record::UNMAPPED))))
}

/// Drops unmapped reads, also treating POS 0 or RNAME `*` as unmapped.
pub fn filter_unmapped_reads_strict(_header: &mut SamHeader) -> Result<Option<RecordFilter>> {
    Ok(Some(Box::new(|rec| {
        rec.flag_not_any(record::UNMAPPED) && rec.pos != 0 && rec.rname != "*"
    })))
}

/// Drops reads carrying the duplicate bit.
pub fn filter_duplicate_reads(_header: &mut SamHeader) -> Result<Option<RecordFilter>> {
    Ok(Some(Box::new(|rec| rec.flag_not_any(record::DUPLICATE))))
}

/// Drops reads tagged `sr` when the header carries an `@sr` user record,
/// which this factory removes. Without the header record there is nothing to
/// do and no predicate is returned.
pub fn filter_optional_reads(header: &mut SamHeader) -> Result<Option<RecordFilter>> {
    if header.take_user_records("@sr").is_none() {
        Ok(None)
    } else {
        Ok(Some(Box::new(|rec| crate::fields::assoc(&rec.tags, *b"sr").is_none())))
    }
}

/// Replaces the `@RG` section with a single read group and rewrites every
/// record's RG tag to its ID.
pub fn add_or_replace_read_group(read_group: HeaderLine) -> FilterFactory {
    Box::new(move |header| {
        let id = read_group.get("ID").ok_or(SamprepError::MissingReadGroupId)?.clone();
        header.rg = vec![read_group];
        Ok(Some(Box::new(move |rec: &mut SamRecord| {
            rec.set_read_group(id.clone());
            true
        })))
    })
}

/// Resolves RNAME through the `@SQ` dictionary into the transient reference
/// id, −1 when the name is unknown.
pub fn add_ref_id(header: &mut SamHeader) -> Result<Option<RecordFilter>> {
    let dict = header.reference_dict();
    Ok(Some(Box::new(move |rec| {
        rec.ref_id = dict.get(&rec.rname).copied().unwrap_or(-1);
        true
    })))
}

/// Prefixes `chr` on every `@SQ` SN and on each record's RNAME and RNEXT
/// (leaving `=` and `*` alone).
pub fn rename_chromosomes(header: &mut SamHeader) -> Result<Option<RecordFilter>> {
    for sq in &mut header.sq {
        if let Some(sn) = sq.get("SN") {
            let renamed = Span::from_str(&format!("chr{sn}"));
            sq.set("SN", renamed);
        }
    }
    Ok(Some(Box::new(|rec| {
        if rec.rname != "=" && rec.rname != "*" {
            rec.rname = Span::from_str(&format!("chr{}", rec.rname));
        }
        if rec.rnext != "=" && rec.rnext != "*" {
            rec.rnext = Span::from_str(&format!("chr{}", rec.rnext));
        }
        true
    })))
}

/// Replaces the `@SQ` section with a new dictionary and drops records whose
/// RNAME it does not cover. A coordinate-sorted header whose sequences no
/// longer appear in the same relative order is downgraded to `unknown`.
pub fn replace_reference_dictionary(dict: Vec<HeaderLine>) -> FilterFactory {
    Box::new(move |header| {
        if header.sort_order() == SortOrder::Coordinate {
            let mut previous = -1i64;
            'outer: for entry in &dict {
                let Some(sn) = entry.get("SN") else { continue };
                for (i, old) in header.sq.iter().enumerate() {
                    if old.get("SN") == Some(sn) {
                        if (i as i64) > previous {
                            previous = i as i64;
                        } else {
                            header.set_sort_order(SortOrder::Unknown);
                            break 'outer;
                        }
                        break;
                    }
                }
            }
        }
        let names: AHashSet<Span> =
            dict.iter().filter_map(|entry| entry.get("SN").cloned()).collect();
        header.sq = dict;
        Ok(Some(Box::new(move |rec: &mut SamRecord| names.contains(&rec.rname))))
    })
}

/// Loads the `@SQ` section of another SAM file and replaces the dictionary
/// with it.
pub fn replace_reference_dictionary_from_sam_file(
    path: impl AsRef<Path>,
) -> Result<FilterFactory> {
    let reader = BufReader::new(File::open(path.as_ref())?);
    let mut lines: Vec<Arc<str>> = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if !line.starts_with('@') {
            break;
        }
        lines.push(Arc::from(line.as_str()));
    }
    let header = SamHeader::parse(&lines)?;
    Ok(replace_reference_dictionary(header.sq))
}

/// Appends a `@PG` line, making its ID unique against the existing section
/// and chaining PP to the current end of the program chain. Header-only: no
/// predicate.
pub fn add_pg_line(mut new_pg: HeaderLine) -> FilterFactory {
    Box::new(move |header| {
        let mut id = new_pg
            .get("ID")
            .ok_or(SamprepError::InvalidHeader {
                reason: "@PG line without an ID entry".to_string(),
            })?
            .as_str()
            .to_string();
        let mut rng = rand::thread_rng();
        while header.pg.iter().any(|pg| pg.get("ID").is_some_and(|v| *v == id.as_str())) {
            id.push_str(&format!("{:x}", rng.gen_range(0..0x10000)));
        }
        new_pg.set("ID", Span::from_str(&id));
        // The end of the chain is the program no other line points at.
        for pg in &header.pg {
            let Some(pg_id) = pg.get("ID") else { continue };
            let referenced = header.pg.iter().any(|entry| entry.get("PP") == Some(pg_id));
            if !referenced {
                new_pg.set("PP", pg_id.clone());
                break;
            }
        }
        header.pg.push(new_pg);
        Ok(None)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(line: &str) -> SamRecord {
        let buf: Arc<str> = Arc::from(line);
        SamRecord::parse(&buf).unwrap()
    }

    fn header(lines: &[&str]) -> SamHeader {
        let lines: Vec<Arc<str>> = lines.iter().map(|s| Arc::from(*s)).collect();
        SamHeader::parse(&lines).unwrap()
    }

    fn sq(sn: &str) -> HeaderLine {
        let mut line = HeaderLine::new();
        line.set("SN", Span::from_str(sn));
        line.set("LN", Span::from_str("1000"));
        line
    }

    #[test]
    fn test_filter_unmapped() {
        let mut h = SamHeader::new();
        let f = filter_unmapped_reads(&mut h).unwrap().unwrap();
        let mut mapped = record("r\t0\tchr1\t100\t60\t10M\t*\t0\t0\t*\t*");
        let mut unmapped = record("r\t4\t*\t0\t0\t*\t*\t0\t0\t*\t*");
        assert!(f(&mut mapped));
        assert!(!f(&mut unmapped));

        let strict = filter_unmapped_reads_strict(&mut h).unwrap().unwrap();
        let mut no_pos = record("r\t0\tchr1\t0\t60\t10M\t*\t0\t0\t*\t*");
        let mut no_rname = record("r\t0\t*\t100\t60\t10M\t*\t0\t0\t*\t*");
        assert!(strict(&mut mapped));
        assert!(!strict(&mut no_pos));
        assert!(!strict(&mut no_rname));
    }

    #[test]
    fn test_filter_duplicates() {
        let mut h = SamHeader::new();
        let f = filter_duplicate_reads(&mut h).unwrap().unwrap();
        let mut clean = record("r\t0\t*\t0\t0\t*\t*\t0\t0\t*\t*");
        let mut dup = record("r\t1024\t*\t0\t0\t*\t*\t0\t0\t*\t*");
        assert!(f(&mut clean));
        assert!(!f(&mut dup));
    }

    #[test]
    fn test_filter_optional_reads() {
        let mut h = header(&["@sr\tio:1"]);
        let f = filter_optional_reads(&mut h).unwrap().unwrap();
        assert!(h.user_records.is_empty(), "factory removes the @sr record");
        let mut tagged = record("r\t0\t*\t0\t0\t*\t*\t0\t0\t*\t*\tsr:i:1");
        let mut plain = record("r\t0\t*\t0\t0\t*\t*\t0\t0\t*\t*");
        assert!(!f(&mut tagged));
        assert!(f(&mut plain));

        let mut h = SamHeader::new();
        assert!(filter_optional_reads(&mut h).unwrap().is_none());
    }

    #[test]
    fn test_add_or_replace_read_group() {
        let mut h = header(&["@RG\tID:old1", "@RG\tID:old2"]);
        let mut rg = HeaderLine::new();
        rg.set("ID", Span::from_str("new"));
        rg.set("LB", Span::from_str("lib"));
        let f = add_or_replace_read_group(rg)(&mut h).unwrap().unwrap();
        assert_eq!(h.rg.len(), 1);
        assert_eq!(h.rg[0].get("ID").unwrap(), &"new");

        let mut rec = record("r\t0\t*\t0\t0\t*\t*\t0\t0\t*\t*\tRG:Z:old1");
        assert!(f(&mut rec));
        assert_eq!(rec.read_group().unwrap(), &"new");

        // Missing ID is a configuration error.
        let mut h = SamHeader::new();
        assert!(add_or_replace_read_group(HeaderLine::new())(&mut h).is_err());
    }

    #[test]
    fn test_add_ref_id() {
        let mut h = header(&["@SQ\tSN:chr1\tLN:100", "@SQ\tSN:chr2\tLN:200"]);
        let f = add_ref_id(&mut h).unwrap().unwrap();
        let mut rec = record("r\t0\tchr2\t10\t60\t10M\t*\t0\t0\t*\t*");
        assert!(f(&mut rec));
        assert_eq!(rec.ref_id, 1);
        let mut rec = record("r\t0\tchrUn\t10\t60\t10M\t*\t0\t0\t*\t*");
        assert!(f(&mut rec));
        assert_eq!(rec.ref_id, -1);
    }

    #[test]
    fn test_rename_chromosomes() {
        let mut h = header(&["@SQ\tSN:1\tLN:100"]);
        let f = rename_chromosomes(&mut h).unwrap().unwrap();
        assert_eq!(h.sq[0].get("SN").unwrap(), &"chr1");
        let mut rec = record("r\t0\t1\t10\t60\t10M\t=\t20\t0\t*\t*");
        assert!(f(&mut rec));
        assert_eq!(rec.rname, "chr1");
        assert_eq!(rec.rnext, "=");
        let mut rec = record("r\t4\t*\t0\t0\t*\t2\t0\t0\t*\t*");
        assert!(f(&mut rec));
        assert_eq!(rec.rname, "*");
        assert_eq!(rec.rnext, "chr2");
    }

    #[test]
    fn test_replace_reference_dictionary_filters_records() {
        let mut h = header(&["@HD\tVN:1.5\tSO:coordinate", "@SQ\tSN:chr1\tLN:100"]);
        let f = replace_reference_dictionary(vec![sq("chr1"), sq("chr2")])(&mut h)
            .unwrap()
            .unwrap();
        assert_eq!(h.sq.len(), 2);
        // Same relative order for the surviving sequence: SO untouched.
        assert_eq!(h.sort_order(), SortOrder::Coordinate);
        let mut kept = record("r\t0\tchr2\t10\t60\t10M\t*\t0\t0\t*\t*");
        let mut dropped = record("r\t0\tchrM\t10\t60\t10M\t*\t0\t0\t*\t*");
        assert!(f(&mut kept));
        assert!(!f(&mut dropped));
    }

    #[test]
    fn test_replace_reference_dictionary_downgrades_sort_order() {
        let mut h = header(&[
            "@HD\tVN:1.5\tSO:coordinate",
            "@SQ\tSN:chr1\tLN:100",
            "@SQ\tSN:chr2\tLN:200",
        ]);
        // Reversed order of the known sequences breaks coordinate sorting.
        let _ = replace_reference_dictionary(vec![sq("chr2"), sq("chr1")])(&mut h).unwrap();
        assert_eq!(h.sort_order(), SortOrder::Unknown);
    }

    #[test]
    fn test_add_pg_line_unique_id_and_chaining() {
        let mut h = header(&["@PG\tID:bwa", "@PG\tID:sort\tPP:bwa"]);
        let mut pg = HeaderLine::new();
        pg.set("ID", Span::from_str("samprep"));
        assert!(add_pg_line(pg)(&mut h).unwrap().is_none());
        assert_eq!(h.pg.len(), 3);
        let added = &h.pg[2];
        assert_eq!(added.get("ID").unwrap(), &"samprep");
        // "sort" is the end of the chain: nothing points at it via PP.
        assert_eq!(added.get("PP").unwrap(), &"sort");

        // A colliding ID picks up a random hex suffix.
        let mut pg = HeaderLine::new();
        pg.set("ID", Span::from_str("samprep"));
        assert!(add_pg_line(pg)(&mut h).unwrap().is_none());
        let suffixed = h.pg[3].get("ID").unwrap();
        assert_ne!(suffixed, &"samprep");
        assert!(suffixed.as_str().starts_with("samprep"));
    }
}
