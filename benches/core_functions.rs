//! Benchmarks for core samprep functions.
//!
//! Run with: `cargo bench`
//! View reports in: `target/criterion/report/index.html`

use criterion::{BatchSize, BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use std::hint::black_box;
use std::sync::Arc;

use samprep_lib::cigar::{CigarCache, parse_cigar};
use samprep_lib::header::SamHeader;
use samprep_lib::markdup::mark_duplicates;
use samprep_lib::record::SamRecord;
use samprep_lib::span::{InternPool, Span};

fn record_line(qname: &str, flag: u16, pos: i32, cigar: &str, len: usize, tags: &str) -> String {
    let seq: String = (0..len).map(|i| ['A', 'C', 'G', 'T'][i % 4]).collect();
    let qual: String = (0..len).map(|i| char::from(b'!' + 10 + (i % 30) as u8)).collect();
    format!("{qname}\t{flag}\tchr1\t{pos}\t60\t{cigar}\t*\t0\t0\t{seq}\t{qual}{tags}")
}

/// Benchmark SAM record parsing for typical alignment lines
fn bench_record_parsing(c: &mut Criterion) {
    let mut group = c.benchmark_group("record_parsing");

    let cases = [
        ("no_tags", record_line("read1", 0, 10000, "100M", 100, "")),
        ("few_tags", record_line("read1", 0, 10000, "100M", 100, "\tRG:Z:rg1\tNM:i:2\tAS:i:95")),
        (
            "many_tags",
            record_line(
                "read1",
                99,
                10000,
                "5S90M5S",
                100,
                "\tRG:Z:rg1\tNM:i:2\tAS:i:95\tXS:i:80\tMD:Z:90\tMC:Z:100M\tpa:f:0.984\tZB:B:c,1,-2,3",
            ),
        ),
    ];

    for (name, line) in cases {
        let line: Arc<str> = Arc::from(line.as_str());
        group.throughput(Throughput::Bytes(line.len() as u64));
        group.bench_with_input(BenchmarkId::new("parse", name), &line, |b, line| {
            b.iter(|| black_box(SamRecord::parse(black_box(line)).unwrap()));
        });
    }

    group.finish();
}

/// Benchmark record formatting back to SAM text
fn bench_record_formatting(c: &mut Criterion) {
    let mut group = c.benchmark_group("record_formatting");

    let line: Arc<str> =
        Arc::from(record_line("read1", 99, 10000, "5S90M5S", 100, "\tRG:Z:rg1\tNM:i:2").as_str());
    let record = SamRecord::parse(&line).unwrap();

    group.throughput(Throughput::Bytes(line.len() as u64));
    group.bench_function("format_into", |b| {
        let mut out = String::with_capacity(512);
        b.iter(|| {
            out.clear();
            record.format_into(&mut out);
            black_box(out.len())
        });
    });

    group.finish();
}

/// Benchmark base quality summation over the quality string
fn bench_phred_score(c: &mut Criterion) {
    let mut group = c.benchmark_group("phred_score");

    for len in [50, 100, 150, 300] {
        let line: Arc<str> = Arc::from(record_line("read1", 0, 10000, "*", len, "").as_str());
        let record = SamRecord::parse(&line).unwrap();
        group.throughput(Throughput::Bytes(len as u64));
        group.bench_with_input(BenchmarkId::new("sum", len), &record, |b, record| {
            b.iter(|| black_box(record.phred_score()));
        });
    }

    group.finish();
}

/// Benchmark CIGAR parsing and the shared parse cache
fn bench_cigar(c: &mut Criterion) {
    let mut group = c.benchmark_group("cigar");

    let cigars = [
        ("simple_100M", "100M"),
        ("with_clips", "5S90M5S"),
        ("with_indels", "25M1I10M2D15M"),
        ("complex", "5H10S30M5I20M3D25M10S5H"),
    ];

    for (name, cigar) in cigars {
        let span = Span::from_str(cigar);
        group.bench_with_input(BenchmarkId::new("parse_cigar", name), &span, |b, span| {
            b.iter(|| black_box(parse_cigar(black_box(span)).unwrap()));
        });
    }

    // The cache hit path, which is what duplicate marking mostly sees.
    let cache = CigarCache::new();
    let span = Span::from_str("5S90M5S");
    cache.parse(&span).unwrap();
    group.bench_function("cache_hit", |b| {
        b.iter(|| black_box(cache.parse(black_box(&span)).unwrap()));
    });

    group.finish();
}

/// Benchmark unclipped position derivation on both strands
fn bench_unclipped_position(c: &mut Criterion) {
    let mut group = c.benchmark_group("unclipped_position");
    let cache = CigarCache::new();

    let forward: Arc<str> = Arc::from(record_line("fwd", 0, 10000, "5S90M5S", 100, "").as_str());
    let forward = SamRecord::parse(&forward).unwrap();
    group.bench_function("forward", |b| {
        b.iter(|| black_box(forward.unclipped_position(&cache).unwrap()));
    });

    let reverse: Arc<str> = Arc::from(record_line("rev", 16, 10000, "5S90M5S", 100, "").as_str());
    let reverse = SamRecord::parse(&reverse).unwrap();
    group.bench_function("reverse", |b| {
        b.iter(|| black_box(reverse.unclipped_position(&cache).unwrap()));
    });

    group.finish();
}

/// Benchmark the duplicate marking engine on synthetic batches
fn bench_mark_duplicates(c: &mut Criterion) {
    let mut group = c.benchmark_group("mark_duplicates");
    group.sample_size(20);

    let header_lines: Vec<Arc<str>> = [
        "@HD\tVN:1.5\tSO:unknown",
        "@SQ\tSN:chr1\tLN:100000000",
        "@RG\tID:rg1\tLB:lib1",
    ]
    .iter()
    .map(|line| Arc::from(*line))
    .collect();
    let header = SamHeader::parse(&header_lines).unwrap();

    for num_records in [1_000_usize, 10_000] {
        // Ten reads per position so every group has duplicates to resolve.
        let lines: Vec<Arc<str>> = (0..num_records)
            .map(|i| {
                let line = record_line(
                    &format!("read{i}"),
                    0,
                    (1 + (i / 10) * 200) as i32,
                    "100M",
                    100,
                    "\tRG:Z:rg1",
                );
                Arc::from(line.as_str())
            })
            .collect();

        group.throughput(Throughput::Elements(num_records as u64));
        group.bench_with_input(
            BenchmarkId::new("fragments", num_records),
            &lines,
            |b, lines| {
                b.iter_batched(
                    || {
                        let mut records: Vec<SamRecord> =
                            lines.iter().map(|line| SamRecord::parse(line).unwrap()).collect();
                        for rec in &mut records {
                            rec.ref_id = 0;
                        }
                        records
                    },
                    |mut records| {
                        let intern = InternPool::new();
                        let cigars = CigarCache::new();
                        mark_duplicates(&mut records, &header, true, &intern, &cigars).unwrap();
                        black_box(records)
                    },
                    BatchSize::LargeInput,
                );
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_record_parsing,
    bench_record_formatting,
    bench_phred_score,
    bench_cigar,
    bench_unclipped_position,
    bench_mark_duplicates,
);
criterion_main!(benches);
