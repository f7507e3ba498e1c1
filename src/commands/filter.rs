//! The filter command: the main SAM preparation pipeline.
//!
//! Assembles a chain of per-record filters from the command-line options and
//! runs either the single-pass pipeline or, when duplicate marking is
//! requested, the two-phase pipeline that materializes the filtered reads
//! before marking.

use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use samprep_lib::filters::{self, FilterFactory};
use samprep_lib::header::{HeaderLine, SortOrder, parse_header_line_from_str};
use samprep_lib::pipeline::{run_filter_pipeline, run_markdup_pipeline};
use samprep_lib::span::Span;

use crate::commands::command::Command;
use crate::version::VERSION;

/// Sorting order for the output file.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum SortOrderArg {
    /// Keep the order of the input file
    Keep,
    /// Declare the order unknown
    Unknown,
    /// Declare the output unsorted
    Unsorted,
    /// Sort by coordinate (reference id, then position)
    Coordinate,
    /// Sort by read name
    Queryname,
}

impl From<SortOrderArg> for SortOrder {
    fn from(arg: SortOrderArg) -> Self {
        match arg {
            SortOrderArg::Keep => SortOrder::Keep,
            SortOrderArg::Unknown => SortOrder::Unknown,
            SortOrderArg::Unsorted => SortOrder::Unsorted,
            SortOrderArg::Coordinate => SortOrder::Coordinate,
            SortOrderArg::Queryname => SortOrder::Queryname,
        }
    }
}

/// Filter, transform, duplicate-mark, and sort a SAM file.
///
/// Reads SAM text, applies the requested filters in a fixed order, and
/// writes SAM text. Use `-` for standard input or output.
#[derive(Debug, Parser)]
#[command(
    name = "filter",
    about = "Filter, transform, duplicate-mark, and sort a SAM file"
)]
pub struct Filter {
    /// Input SAM file, or - for stdin.
    pub input: PathBuf,

    /// Output SAM file, or - for stdout.
    pub output: PathBuf,

    /// Remove unmapped reads (FLAG bit 0x4).
    #[arg(long = "filter-unmapped-reads")]
    pub filter_unmapped_reads: bool,

    /// Remove unmapped reads, also treating POS 0 or RNAME * as unmapped.
    #[arg(long = "filter-unmapped-reads-strict", conflicts_with = "filter_unmapped_reads")]
    pub filter_unmapped_reads_strict: bool,

    /// Replace the reference dictionary with the @SQ section of this SAM
    /// file, dropping reads it does not cover.
    #[arg(long = "replace-reference-sequences", value_name = "SAM_FILE")]
    pub replace_reference_sequences: Option<PathBuf>,

    /// Replace the read groups with this one (e.g. "ID:group1 LB:lib1") and
    /// retag every read with its ID.
    #[arg(long = "replace-read-group", value_name = "READ_GROUP")]
    pub replace_read_group: Option<String>,

    /// Prefix "chr" on reference names in the header and in the reads.
    #[arg(long = "rename-chromosomes")]
    pub rename_chromosomes: bool,

    /// Mark duplicate reads.
    #[arg(long = "mark-duplicates")]
    pub mark_duplicates: bool,

    /// Mark duplicate reads with deterministic tie-breaking on read names.
    #[arg(long = "mark-duplicates-deterministic", conflicts_with = "mark_duplicates")]
    pub mark_duplicates_deterministic: bool,

    /// Remove reads carrying the duplicate flag from the output.
    #[arg(long = "remove-duplicates")]
    pub remove_duplicates: bool,

    /// Sorting order of the output.
    #[arg(long = "sorting-order", value_enum, default_value = "keep")]
    pub sorting_order: SortOrderArg,

    /// Number of worker threads (defaults to the number of logical CPUs).
    #[arg(long = "nr-of-threads", value_name = "N")]
    pub nr_of_threads: Option<usize>,

    /// Log per-phase timings.
    #[arg(long = "timed")]
    pub timed: bool,
}

fn open_input(path: &Path) -> Result<Box<dyn BufRead>> {
    if path.as_os_str() == "-" {
        Ok(Box::new(BufReader::new(io::stdin())))
    } else {
        let file = File::open(path)
            .with_context(|| format!("Failed to open input file {}", path.display()))?;
        Ok(Box::new(BufReader::new(file)))
    }
}

fn open_output(path: &Path) -> Result<Box<dyn Write>> {
    if path.as_os_str() == "-" {
        Ok(Box::new(BufWriter::new(io::stdout())))
    } else {
        let file = File::create(path)
            .with_context(|| format!("Failed to create output file {}", path.display()))?;
        Ok(Box::new(BufWriter::new(file)))
    }
}

impl Command for Filter {
    fn execute(&self, command_line: &str) -> Result<()> {
        if let Some(threads) = self.nr_of_threads {
            rayon::ThreadPoolBuilder::new()
                .num_threads(threads)
                .build_global()
                .context("Failed to configure the worker thread pool")?;
        }

        let sorting_order: SortOrder = self.sorting_order.into();
        let marking = self.mark_duplicates || self.mark_duplicates_deterministic;

        // The pre-filters run before duplicate marking, in the same fixed
        // order regardless of option order on the command line.
        let mut pre: Vec<FilterFactory> = Vec::new();
        if self.filter_unmapped_reads_strict {
            pre.push(Box::new(filters::filter_unmapped_reads_strict));
        } else if self.filter_unmapped_reads {
            pre.push(Box::new(filters::filter_unmapped_reads));
        }
        if let Some(dict_file) = &self.replace_reference_sequences {
            pre.push(
                filters::replace_reference_dictionary_from_sam_file(dict_file).with_context(
                    || format!("Failed to load reference dictionary from {}", dict_file.display()),
                )?,
            );
        }
        if let Some(read_group) = &self.replace_read_group {
            let line = parse_header_line_from_str(read_group)
                .context("Failed to parse --replace-read-group")?;
            pre.push(filters::add_or_replace_read_group(line));
        }
        if self.rename_chromosomes {
            pre.push(Box::new(filters::rename_chromosomes));
        }
        // The coordinate comparator and the marking engine both need
        // resolved reference ids, as does a replaced dictionary.
        if self.replace_reference_sequences.is_some()
            || marking
            || matches!(sorting_order, SortOrder::Coordinate | SortOrder::Queryname)
        {
            pre.push(Box::new(filters::add_ref_id));
        }
        pre.push(filters::add_pg_line(self.pg_line(command_line)));

        let mut post: Vec<FilterFactory> = Vec::new();
        if marking {
            // Reads tagged for removal still take part in marking; they are
            // dropped only on the way out.
            post.push(Box::new(filters::filter_optional_reads));
        } else {
            pre.push(Box::new(filters::filter_optional_reads));
        }
        if self.remove_duplicates {
            post.push(Box::new(filters::filter_duplicate_reads));
        }

        let input = open_input(&self.input)?;
        let output = open_output(&self.output)?;
        if marking {
            run_markdup_pipeline(
                input,
                output,
                sorting_order,
                pre,
                post,
                self.mark_duplicates_deterministic,
                self.timed,
            )?;
        } else {
            pre.extend(post);
            run_filter_pipeline(input, output, sorting_order, pre, self.timed)?;
        }
        Ok(())
    }
}

impl Filter {
    fn pg_line(&self, command_line: &str) -> HeaderLine {
        let mut pg = HeaderLine::new();
        pg.set("ID", Span::from_str("samprep"));
        pg.set("PN", Span::from_str("samprep"));
        pg.set("VN", Span::from_str(VERSION));
        pg.set("CL", Span::from_str(command_line));
        pg
    }
}
