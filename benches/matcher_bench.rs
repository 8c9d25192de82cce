//! Benchmarks for offline candidate matching over search pages of varying size.
//!
//! Run with: `cargo bench --bench matcher_bench`

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use reelsource::provider::{Film, MediaType, SearchResult};
use reelsource::resolve::matcher::{evaluate, release_year, Candidate};

const DATES: &[&str] = &[
    "1999-10-15",
    "October 15, 1999",
    "Oct 15, 1999",
    "15 October 1999",
    "Released in 1999",
    "unknown",
];

/// A page of near-miss candidates with the real match last.
fn page(size: usize) -> Vec<SearchResult> {
    let mut results: Vec<SearchResult> = (0..size.saturating_sub(1))
        .map(|i| SearchResult {
            id: format!("miss-{i}"),
            title: if i % 2 == 0 { "Fight Club".into() } else { format!("Fight Club {i}") },
            media_type: Some(MediaType::Movie),
            release_date: Some(format!("{}-01-01", 1950 + i % 70)),
            season_count: None,
            catalog_id: None,
        })
        .collect();
    results.push(SearchResult {
        id: "hit".into(),
        title: "fight club".into(),
        media_type: Some(MediaType::Movie),
        release_date: Some("October 15, 1999".into()),
        season_count: None,
        catalog_id: None,
    });
    results
}

fn bench_release_year(c: &mut Criterion) {
    let mut group = c.benchmark_group("release_year");
    for date in DATES {
        group.bench_with_input(BenchmarkId::from_parameter(date), date, |b, date| {
            b.iter(|| release_year(black_box(date)));
        });
    }
    group.finish();
}

fn bench_scan_page(c: &mut Criterion) {
    let film = Film {
        id: "tmdb-550".into(),
        title: "Fight Club".into(),
        media_type: MediaType::Movie,
        release_date: Some("1999-10-15".into()),
        season_count: None,
        catalog_id: None,
    };

    let mut group = c.benchmark_group("scan_page");
    for size in [1, 20, 100] {
        let results = page(size);
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &results, |b, results| {
            b.iter(|| {
                results
                    .iter()
                    .find(|r| evaluate(black_box(&film), r) == Candidate::Accept)
                    .map(|r| r.id.as_str())
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_release_year, bench_scan_page);
criterion_main!(benches);
