use chrono::{Duration, NaiveDate};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use load_fusion::hourly_fuser::contiguous_partitions;
use load_fusion::load_shapes::{aggregate_month_hour, DEFAULT_SEASON_MONTHS};
use load_fusion::sink::CountingSink;
use load_fusion::{ExpandedRow, HourlyFuser, HourlyRecord};

const PROFILES: usize = 20;
const ZIPS_PER_PROFILE: usize = 50;

fn expanded_rows() -> Vec<ExpandedRow> {
    let mut rows = Vec::with_capacity(PROFILES * ZIPS_PER_PROFILE);
    for p in 0..PROFILES {
        for z in 0..ZIPS_PER_PROFILE {
            rows.push(ExpandedRow {
                zip_code: format!("{:05}", 90000 + z),
                profile_id: format!("{}_1_NS_C", p),
            });
        }
    }
    rows
}

/// One month of hourly data per profile, grouped by profile.
fn hourly_series() -> Vec<HourlyRecord> {
    let start = NaiveDate::from_ymd_opt(2024, 7, 1).unwrap();
    let mut records = Vec::new();
    for p in 0..PROFILES {
        for day in 0..31 {
            for hour in 0..24u8 {
                let kwh = if (17..=20).contains(&hour) { 1.8 } else { 0.4 };
                records.push(HourlyRecord {
                    profile_id: format!("{}_1_NS_C", p),
                    date: start + Duration::days(day),
                    hour,
                    kwh,
                });
            }
        }
    }
    records
}

fn benchmark_streaming_fusion(c: &mut Criterion) {
    let fuser = HourlyFuser::new(&expanded_rows());
    let series = hourly_series();

    c.bench_function("fuse_stream_hourly", |b| {
        b.iter(|| {
            let mut sink = CountingSink::default();
            let stats = fuser.fuse_stream(series.clone(), &mut sink).unwrap();
            black_box(stats.fused_rows)
        });
    });
}

fn benchmark_parallel_fusion(c: &mut Criterion) {
    let fuser = HourlyFuser::new(&expanded_rows());
    let series = hourly_series();

    c.bench_function("fuse_partitions_hourly", |b| {
        b.iter(|| {
            let mut sink = CountingSink::default();
            let partitions = contiguous_partitions(series.clone());
            let stats = fuser.fuse_partitions(partitions, 8, &mut sink).unwrap();
            black_box(stats.fused_rows)
        });
    });
}

fn benchmark_month_hour_aggregation(c: &mut Criterion) {
    let series = hourly_series();

    c.bench_function("aggregate_month_hour", |b| {
        b.iter(|| black_box(aggregate_month_hour(&series, &DEFAULT_SEASON_MONTHS)));
    });
}

criterion_group!(
    benches,
    benchmark_streaming_fusion,
    benchmark_parallel_fusion,
    benchmark_month_hour_aggregation
);
criterion_main!(benches);
