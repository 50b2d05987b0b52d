use anyhow::Result;
use glob::glob;
use load_fusion::pipeline::{DIAGNOSTICS_FILE, ZIPS_WITH_LOADS, ZIPS_WITH_MONTH_HOUR_LOADS};
use load_fusion::FusionDiagnostics;
use polars::prelude::*;
use std::path::{Path, PathBuf};

/// Opens a written output table by extension. CSV columns are read as
/// strings so ZIP codes keep their leading zeros; callers cast the rest.
pub fn scan_output(path: &Path) -> Result<LazyFrame> {
    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or_default();
    let lf = match extension {
        "parquet" => LazyFrame::scan_parquet(path, ScanArgsParquet::default())?,
        "arrow" => LazyFrame::scan_ipc(path, ScanArgsIpc::default())?,
        _ => LazyCsvReader::new(path)
            .with_has_header(true)
            .with_infer_schema_length(Some(0))
            .finish()?,
    };
    Ok(lf)
}

fn fused_files(output_dir: &Path, stem: &str) -> Result<Vec<PathBuf>> {
    let pattern = output_dir.join(format!("{}.*", stem));
    let mut files: Vec<PathBuf> = glob(&pattern.to_string_lossy())?
        .filter_map(|entry| entry.ok())
        .filter(|path| {
            matches!(
                path.extension().and_then(|e| e.to_str()),
                Some("csv" | "parquet" | "arrow")
            )
        })
        .collect();
    files.sort();
    Ok(files)
}

/// Checks one fused table; returns the number of issues found.
fn verify_table(file: &Path, time_key: &str, expected_rows: Option<u64>) -> Result<usize> {
    let name = file.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
    println!("\n  Verifying: {}", name);
    let mut issues = 0;

    let df = scan_output(file)?
        .select([
            col("zip_code").cast(DataType::String),
            col("profile_id").cast(DataType::String),
            col(time_key).cast(DataType::String),
            col("hour").cast(DataType::Int64),
            col("kwh").cast(DataType::Float64),
        ])
        .collect()?;

    let duplicates = df
        .clone()
        .lazy()
        .group_by([col("zip_code"), col("profile_id"), col(time_key), col("hour")])
        .agg([len().alias("count")])
        .filter(col("count").gt(lit(1)))
        .collect()?;
    if duplicates.height() > 0 {
        println!(
            "    ❌ Found {} duplicate (zip, profile, {}, hour) keys",
            duplicates.height(),
            time_key
        );
        issues += duplicates.height();
    } else {
        println!("    ✅ No duplicates found");
    }

    let bad_hours = df
        .clone()
        .lazy()
        .filter(col("hour").lt(lit(0)).or(col("hour").gt(lit(23))).or(col("hour").is_null()))
        .collect()?
        .height();
    if bad_hours > 0 {
        println!("    ❌ Found {} rows with hour outside 0-23", bad_hours);
        issues += bad_hours;
    } else {
        println!("    ✅ All hours within 0-23");
    }

    if let Some(expected) = expected_rows {
        if df.height() as u64 != expected {
            println!(
                "    ❌ Row count {} does not match fused_row_count {}",
                df.height(),
                expected
            );
            issues += 1;
        } else {
            println!("    ✅ Row count matches diagnostics ({})", expected);
        }
    }

    println!("    📊 Total records: {}", df.height());
    println!("    📊 Unique ZIPs: {}", df.column("zip_code")?.n_unique()?);
    println!("    📊 Unique profiles: {}", df.column("profile_id")?.n_unique()?);
    Ok(issues)
}

/// Re-reads every fused output under `output_dir` and checks key
/// uniqueness, hour range and the row count recorded in diagnostics.
pub fn verify_outputs(output_dir: &Path) -> Result<usize> {
    println!("\n🔍 Output Verification");
    println!("{}", "=".repeat(60));

    let diagnostics_path = output_dir.join(DIAGNOSTICS_FILE);
    let expected_rows = if diagnostics_path.exists() {
        Some(FusionDiagnostics::read_json(&diagnostics_path)?.fused_row_count)
    } else {
        println!("⚠️  {} not found; skipping row count check", diagnostics_path.display());
        None
    };

    let mut total_issues = 0;
    let mut checked = 0;
    for (stem, time_key) in [(ZIPS_WITH_LOADS, "date"), (ZIPS_WITH_MONTH_HOUR_LOADS, "month")] {
        let files = fused_files(output_dir, stem)?;
        if files.is_empty() {
            continue;
        }
        println!("\n📁 Checking {} {} files", files.len(), stem);
        for file in files {
            total_issues += verify_table(&file, time_key, expected_rows)?;
            checked += 1;
        }
    }

    println!("\n{}", "=".repeat(60));
    if checked == 0 {
        anyhow::bail!("no fused outputs found in {}", output_dir.display());
    }
    if total_issues == 0 {
        println!("✅ Output verification passed! No issues found.");
    } else {
        println!("⚠️  Output verification found {} issues", total_issues);
    }
    Ok(total_issues)
}
