//! Pipeline orchestration.
//!
//! Two run modes share the same skeleton. The single-pass mode streams
//! parse → filter → sort → format. The two-phase mode is used whenever
//! duplicate marking participates: the filtered batch is materialized first,
//! because pair rendezvous needs the complete view, then the marking engine
//! runs over it before post-filters and output.
//!
//! Per-run state (the CIGAR cache and the interning pool) lives in
//! [`RunCaches`], constructed at run start and dropped at run end, so
//! independent runs never share memory.

use std::io::{BufRead, Write};
use std::sync::Arc;

use rayon::prelude::*;

use crate::cigar::CigarCache;
use crate::errors::Result;
use crate::filters::{FilterFactory, RecordFilter};
use crate::header::{SamHeader, SortOrder};
use crate::logging::{OperationTimer, format_count, format_percent};
use crate::markdup;
use crate::record::{SamRecord, coordinate_cmp};
use crate::span::InternPool;

/// Caches scoped to one pipeline run.
#[derive(Default)]
pub struct RunCaches {
    pub intern: InternPool,
    pub cigars: CigarCache,
}

impl RunCaches {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

/// Applies the factories once, in order, against the mutable header and
/// combines the surviving predicates into one short-circuiting filter.
/// Returns `None` when no factory produced a predicate, so callers can skip
/// the filter pass entirely.
pub fn compose_filters(
    header: &mut SamHeader,
    factories: Vec<FilterFactory>,
) -> Result<Option<RecordFilter>> {
    let mut predicates: Vec<RecordFilter> = Vec::new();
    for factory in factories {
        if let Some(predicate) = factory(header)? {
            predicates.push(predicate);
        }
    }
    Ok(match predicates.len() {
        0 => None,
        1 => predicates.pop(),
        _ => Some(Box::new(move |rec: &mut SamRecord| {
            for predicate in &predicates {
                if !predicate(&mut *rec) {
                    return false;
                }
            }
            true
        })),
    })
}

/// Resolves the requested sorting order against the header.
///
/// `keep` defers to the order the input declared before any header mutation.
/// Coordinate and queryname update the header's SO field unless it already
/// matches, in which case `keep` is returned and no sort pass is needed.
/// Unknown and unsorted only update the header when it differs.
pub fn effective_sorting_order(
    requested: SortOrder,
    header: &mut SamHeader,
    original: SortOrder,
) -> SortOrder {
    let so = if requested == SortOrder::Keep { original } else { requested };
    let current = header.sort_order();
    match so {
        SortOrder::Coordinate | SortOrder::Queryname => {
            if current == so {
                return SortOrder::Keep;
            }
            header.set_sort_order(so);
        }
        SortOrder::Unknown | SortOrder::Unsorted => {
            if current != so {
                header.set_sort_order(so);
            }
        }
        SortOrder::Keep => {}
    }
    so
}

/// Splits the input into the parsed header and the raw record lines.
fn read_sam(input: impl BufRead) -> Result<(SamHeader, Vec<Arc<str>>)> {
    let mut header_lines: Vec<Arc<str>> = Vec::new();
    let mut record_lines: Vec<Arc<str>> = Vec::new();
    let mut in_header = true;
    for line in input.lines() {
        let line = line?;
        if in_header && line.starts_with('@') {
            header_lines.push(Arc::from(line.as_str()));
        } else {
            in_header = false;
            record_lines.push(Arc::from(line.as_str()));
        }
    }
    let header = SamHeader::parse(&header_lines)?;
    Ok((header, record_lines))
}

fn parse_records(lines: &[Arc<str>]) -> Result<Vec<SamRecord>> {
    lines.par_iter().map(SamRecord::parse).collect()
}

fn apply_filter(records: Vec<SamRecord>, filter: Option<RecordFilter>) -> Vec<SamRecord> {
    match filter {
        None => records,
        Some(filter) => records
            .into_par_iter()
            .filter_map(|mut rec| if filter(&mut rec) { Some(rec) } else { None })
            .collect(),
    }
}

fn sort_records(records: &mut [SamRecord], effective: SortOrder) {
    match effective {
        SortOrder::Coordinate => records.par_sort_by(|a, b| coordinate_cmp(a, b)),
        SortOrder::Queryname => records.par_sort_by(|a, b| a.qname.cmp(&b.qname)),
        _ => {}
    }
}

fn write_output(
    mut output: impl Write,
    header: &SamHeader,
    records: &[SamRecord],
) -> Result<()> {
    let mut text = String::new();
    header.format_into(&mut text);
    output.write_all(text.as_bytes())?;

    let lines: Vec<String> = records
        .par_iter()
        .map(|rec| {
            let mut line = String::with_capacity(256);
            rec.format_into(&mut line);
            line.push('\n');
            line
        })
        .collect();
    for line in &lines {
        output.write_all(line.as_bytes())?;
    }
    output.flush()?;
    Ok(())
}

/// The single-pass mode: parse, filter, sort, write.
pub fn run_filter_pipeline(
    input: impl BufRead,
    output: impl Write,
    requested: SortOrder,
    factories: Vec<FilterFactory>,
    timed: bool,
) -> Result<()> {
    let timer = timed.then(|| OperationTimer::new("Running pipeline"));
    let (mut header, lines) = read_sam(input)?;
    let original = header.sort_order();
    let filter = compose_filters(&mut header, factories)?;
    let effective = effective_sorting_order(requested, &mut header, original);

    let records = parse_records(&lines)?;
    let total = records.len();
    let mut records = apply_filter(records, filter);
    sort_records(&mut records, effective);
    write_output(output, &header, &records)?;

    log::info!(
        "Processed {} records, wrote {}",
        format_count(total as u64),
        format_count(records.len() as u64)
    );
    if let Some(timer) = timer {
        timer.log_completion(total as u64);
    }
    Ok(())
}

/// The two-phase mode used whenever duplicate marking participates.
///
/// Phase one materializes the filtered batch, runs the marking engine, and
/// sorts. Phase two applies the post-filters (such as remove-duplicates) and
/// writes.
#[allow(clippy::cast_precision_loss)]
pub fn run_markdup_pipeline(
    input: impl BufRead,
    output: impl Write,
    requested: SortOrder,
    pre_factories: Vec<FilterFactory>,
    post_factories: Vec<FilterFactory>,
    deterministic: bool,
    timed: bool,
) -> Result<()> {
    let caches = RunCaches::new();

    let read_timer =
        timed.then(|| OperationTimer::new("Reading SAM into memory and applying filters"));
    let (mut header, lines) = read_sam(input)?;
    let original = header.sort_order();
    let pre_filter = compose_filters(&mut header, pre_factories)?;
    let effective = effective_sorting_order(requested, &mut header, original);

    let records = parse_records(&lines)?;
    let total = records.len();
    let mut records = apply_filter(records, pre_filter);

    markdup::mark_duplicates(&mut records, &header, deterministic, &caches.intern, &caches.cigars)?;
    let duplicates = records.par_iter().filter(|rec| rec.is_duplicate()).count();
    log::info!(
        "Marked {} of {} records as duplicates ({})",
        format_count(duplicates as u64),
        format_count(records.len() as u64),
        format_percent(duplicates as f64 / records.len().max(1) as f64, 2)
    );

    sort_records(&mut records, effective);
    if let Some(timer) = read_timer {
        timer.log_completion(total as u64);
    }

    let write_timer = timed.then(|| OperationTimer::new("Write to file"));
    let post_filter = compose_filters(&mut header, post_factories)?;
    let records = apply_filter(records, post_filter);
    write_output(output, &header, &records)?;
    if let Some(timer) = write_timer {
        timer.log_completion(records.len() as u64);
    }
    Ok(())
}
