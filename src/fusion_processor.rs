use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use load_fusion::models::{FusedRow, HourlyRecord, ZipMonthHourRow};
use load_fusion::pipeline::{
    PendingOutputs, PreparedZips, ZIPS_WITH_LOADS, ZIPS_WITH_MONTH_HOUR_LOADS,
};
use load_fusion::sink::RowSink;
use load_fusion::{FusionDiagnostics, FusionPipeline, Granularity, PipelineConfig};
use std::time::Instant;

fn progress_bar(partitions: u64) -> Result<ProgressBar> {
    let pb = ProgressBar::new(partitions);
    pb.set_style(ProgressStyle::default_bar().template(
        "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}",
    )?);
    Ok(pb)
}

/// Ticks a progress bar once per fused profile partition.
pub struct ProgressSink<S> {
    inner: S,
    pb: ProgressBar,
}

impl<S> ProgressSink<S> {
    pub fn with_bar(inner: S, pb: ProgressBar) -> Self {
        Self { inner, pb }
    }
}

impl<R, S: RowSink<R>> RowSink<R> for ProgressSink<S> {
    fn write_batch(&mut self, profile_id: &str, rows: Vec<R>) -> load_fusion::Result<()> {
        self.inner.write_batch(profile_id, rows)?;
        self.pb.set_message(profile_id.to_string());
        self.pb.inc(1);
        Ok(())
    }

    fn finish(&mut self) -> load_fusion::Result<u64> {
        let rows = self.inner.finish()?;
        self.pb.finish_with_message(format!("{} rows", rows));
        Ok(rows)
    }
}

/// Writes every output of the run under staged names; nothing is committed here.
fn stage_run(
    pipeline: &FusionPipeline,
    prepared: &mut PreparedZips,
    hourly: Vec<HourlyRecord>,
    pb: ProgressBar,
    pending: &mut PendingOutputs,
) -> load_fusion::Result<()> {
    pipeline.write_zip_tables(prepared, pending)?;

    match pipeline.config().granularity {
        Granularity::Hourly => {
            let tee = pipeline.open_sinks::<FusedRow>(ZIPS_WITH_LOADS, pending)?;
            let mut sink = ProgressSink::with_bar(tee, pb);
            pipeline.fuse_hourly(prepared, hourly, &mut sink)?;
        }
        Granularity::MonthHour => {
            let tee =
                pipeline.open_sinks::<ZipMonthHourRow>(ZIPS_WITH_MONTH_HOUR_LOADS, pending)?;
            let mut sink = ProgressSink::with_bar(tee, pb);
            pipeline.fuse_month_hour(prepared, &hourly, &mut sink)?;
        }
    }

    pipeline.write_diagnostics(&prepared.diagnostics, pending)
}

pub fn process_fusion(config: PipelineConfig) -> Result<FusionDiagnostics> {
    println!("🚀 ZIP Load Fusion - Rust Processor");
    println!("Rayon thread pool configured with {} threads", rayon::current_num_threads());
    println!("{}", "=".repeat(60));
    let start = Instant::now();

    let pipeline = FusionPipeline::new(config);

    println!("\n📁 Loading inputs");
    let inputs = pipeline.load_inputs()?;
    println!("  Climate zones:     {}", inputs.zones.len());
    println!("  ZIP codes:         {}", inputs.zips.len());
    println!("  Catalog profiles:  {}", inputs.catalog.len());
    println!("  Load shape rows:   {}", inputs.hourly.len());

    println!("\n🗺️  Assigning ZIPs to territories");
    let mut prepared = pipeline.prepare(inputs.zones, &inputs.zips, &inputs.catalog)?;
    println!("  ZIPs with territory:  {}", prepared.zips_final.len());
    println!("  ZIPs unassigned:      {}", prepared.diagnostics.unassigned_zip_count);
    println!("  ZIP-profile pairs:    {}", prepared.expanded.len());

    let partitions = pipeline.fuser(&prepared.expanded).referenced_profiles().count() as u64;
    println!("\n🔗 Fusing load shapes across {} profiles", partitions);
    let pb = progress_bar(partitions)?;

    let mut pending = PendingOutputs::new();
    let staged = stage_run(&pipeline, &mut prepared, inputs.hourly, pb, &mut pending);
    for path in pending.settle(staged)? {
        println!("  ✅ Saved {}", path.display());
    }
    prepared.diagnostics.log_summary();

    let d = &prepared.diagnostics;
    println!("\n📊 Fused rows: {}", d.fused_row_count);
    if d.is_clean() {
        println!("✅ No referential gaps");
    } else {
        println!("⚠️  Referential gaps:");
        println!("    Unassigned ZIPs:          {}", d.unassigned_zip_count);
        println!("    ZIPs without profiles:    {}", d.zips_with_empty_profiles.len());
        println!(
            "    Orphaned profile-hours:   {} ({} profiles)",
            d.orphaned_profile_hour_count,
            d.orphaned_profile_ids.len()
        );
        println!("    Profiles without loads:   {}", d.profiles_without_hourly.len());
    }

    log::info!("Fusion run wrote {} fused rows", d.fused_row_count);
    println!("\n✅ Processing complete in {:?}!", start.elapsed());
    Ok(prepared.diagnostics)
}
