use crate::output_verifier::scan_output;
use anyhow::Result;
use load_fusion::pipeline::{ZIPS_FINAL, ZIPS_WITH_LOADS};
use polars::prelude::*;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq)]
pub struct ProfileStats {
    pub profile_id: String,
    pub count: u32,
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    pub std: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadSummary {
    pub total_records: usize,
    pub zip_count: usize,
    pub profile_count: usize,
    pub day_count: usize,
    pub records_by_zip: Vec<(String, u32)>,
    pub records_by_territory: Vec<(String, u32)>,
    pub profile_stats: Vec<ProfileStats>,
    /// Mean kWh per hour of day, indexed by hour.
    pub hourly_average: Vec<(i64, f64)>,
    pub peak_hour: Option<i64>,
    /// Row count extrapolated to 365 days.
    pub full_year_records: u64,
}

fn first_existing(output_dir: &Path, stem: &str) -> Option<PathBuf> {
    ["parquet", "arrow", "csv"]
        .iter()
        .map(|ext| output_dir.join(format!("{}.{}", stem, ext)))
        .find(|path| path.exists())
}

fn string_counts(df: &DataFrame, key: &str) -> Result<Vec<(String, u32)>> {
    let keys = df.column(key)?.str()?;
    let counts = df.column("count")?.cast(&DataType::UInt32)?;
    let counts = counts.u32()?;
    Ok(keys
        .into_iter()
        .zip(counts.into_iter())
        .map(|(k, c)| (k.unwrap_or_default().to_string(), c.unwrap_or(0)))
        .collect())
}

pub fn summarize_loads(output_dir: &Path) -> Result<LoadSummary> {
    let Some(loads_path) = first_existing(output_dir, ZIPS_WITH_LOADS) else {
        anyhow::bail!("no {} output in {}", ZIPS_WITH_LOADS, output_dir.display());
    };

    let loads = scan_output(&loads_path)?.select([
        col("zip_code").cast(DataType::String),
        col("profile_id").cast(DataType::String),
        col("date").cast(DataType::String),
        col("hour").cast(DataType::Int64),
        col("kwh").cast(DataType::Float64),
    ]);
    let df = loads.clone().collect()?;

    let mut summary = LoadSummary {
        total_records: df.height(),
        zip_count: df.column("zip_code")?.n_unique()?,
        profile_count: df.column("profile_id")?.n_unique()?,
        day_count: df.column("date")?.n_unique()?,
        ..LoadSummary::default()
    };

    let by_zip = loads
        .clone()
        .group_by([col("zip_code")])
        .agg([len().alias("count")])
        .sort(["zip_code"], SortMultipleOptions::default())
        .collect()?;
    summary.records_by_zip = string_counts(&by_zip, "zip_code")?;

    if let Some(zips_path) = first_existing(output_dir, ZIPS_FINAL) {
        let territories = scan_output(&zips_path)?.select([
            col("zip_code").cast(DataType::String),
            col("territory").cast(DataType::String),
        ]);
        let by_territory = loads
            .clone()
            .join(
                territories,
                [col("zip_code")],
                [col("zip_code")],
                JoinArgs::new(JoinType::Inner),
            )
            .group_by([col("territory")])
            .agg([len().alias("count")])
            .sort(["territory"], SortMultipleOptions::default())
            .collect()?;
        summary.records_by_territory = string_counts(&by_territory, "territory")?;
    }

    let stats = loads
        .clone()
        .group_by([col("profile_id")])
        .agg([
            len().alias("count"),
            col("kwh").mean().alias("mean"),
            col("kwh").min().alias("min"),
            col("kwh").max().alias("max"),
            col("kwh").std(1).alias("std"),
        ])
        .sort(["profile_id"], SortMultipleOptions::default())
        .collect()?;
    let ids = stats.column("profile_id")?.str()?;
    let counts = stats.column("count")?.cast(&DataType::UInt32)?;
    let counts = counts.u32()?;
    let means = stats.column("mean")?.f64()?;
    let mins = stats.column("min")?.f64()?;
    let maxs = stats.column("max")?.f64()?;
    let stds = stats.column("std")?.f64()?;
    for idx in 0..stats.height() {
        summary.profile_stats.push(ProfileStats {
            profile_id: ids.get(idx).unwrap_or_default().to_string(),
            count: counts.get(idx).unwrap_or(0),
            mean: means.get(idx).unwrap_or(f64::NAN),
            min: mins.get(idx).unwrap_or(f64::NAN),
            max: maxs.get(idx).unwrap_or(f64::NAN),
            std: stds.get(idx).unwrap_or(0.0),
        });
    }

    let hourly = loads
        .group_by([col("hour")])
        .agg([col("kwh").mean().alias("avg_kwh")])
        .sort(["hour"], SortMultipleOptions::default())
        .collect()?;
    let hours = hourly.column("hour")?.i64()?;
    let averages = hourly.column("avg_kwh")?.f64()?;
    summary.hourly_average = hours
        .into_iter()
        .zip(averages.into_iter())
        .filter_map(|(h, avg)| Some((h?, avg?)))
        .collect();
    summary.peak_hour = summary
        .hourly_average
        .iter()
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(hour, _)| *hour);

    if summary.day_count > 0 {
        summary.full_year_records =
            (summary.total_records as u64 * 365) / summary.day_count as u64;
    }

    Ok(summary)
}

pub fn print_summary(summary: &LoadSummary) {
    println!("\n📊 zips_with_loads Summary");
    println!("{}", "=".repeat(60));
    println!("  Total records: {}", summary.total_records);
    println!("  ZIP codes:     {}", summary.zip_count);
    println!("  Load profiles: {}", summary.profile_count);
    println!("  Days:          {}", summary.day_count);

    println!("\n  Records by ZIP code:");
    for (zip_code, count) in &summary.records_by_zip {
        println!("    ZIP {}: {} records", zip_code, count);
    }

    if !summary.records_by_territory.is_empty() {
        println!("\n  Records by territory:");
        for (territory, count) in &summary.records_by_territory {
            println!("    {}: {} records", territory, count);
        }
    }

    println!("\n  Load profile statistics:");
    println!(
        "    {:<16} {:>8} {:>8} {:>8} {:>8} {:>8}",
        "profile", "count", "mean", "min", "max", "std"
    );
    for stats in &summary.profile_stats {
        println!(
            "    {:<16} {:>8} {:>8.4} {:>8.4} {:>8.4} {:>8.4}",
            stats.profile_id, stats.count, stats.mean, stats.min, stats.max, stats.std
        );
    }

    println!("\n  Hourly consumption pattern:");
    println!("    Hour | Avg kWh");
    for (hour, avg) in &summary.hourly_average {
        let bar = "█".repeat((avg * 20.0).max(0.0) as usize);
        println!("    {:02}   | {:.4} {}", hour, avg, bar);
    }
    if let Some(peak) = summary.peak_hour {
        println!("\n  Peak hour: {:02}:00", peak);
    }

    println!("\n  Full-year estimate: {} records", summary.full_year_records);
}
