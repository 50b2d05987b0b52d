use anyhow::Result;
use clap::{Parser, ValueEnum};
use load_fusion::{FusionPipeline, Granularity, OutputFormat, PipelineConfig};
use log::info;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "load_fusion")]
#[command(about = "Fuse ZIP codes, climate-zone territories and CALMAC load profiles")]
struct Args {
    /// JSON pipeline configuration; flags below override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Climate zone polygons (JSON)
    #[arg(long)]
    zones: Option<PathBuf>,

    /// ZIP representative points (CSV)
    #[arg(long)]
    zips: Option<PathBuf>,

    /// Residential characteristics catalog (CSV)
    #[arg(long)]
    res_catalog: Option<PathBuf>,

    /// Non-residential characteristics catalog (CSV)
    #[arg(long)]
    nonres_catalog: Option<PathBuf>,

    /// Hourly load shapes, file or glob pattern (CSV or Parquet)
    #[arg(long)]
    hourly: Option<String>,

    /// Feeder representative points (CSV)
    #[arg(long)]
    feeders: Option<PathBuf>,

    /// ZIP polygons used to place feeders (JSON)
    #[arg(long)]
    zip_boundaries: Option<PathBuf>,

    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Output file formats (repeatable)
    #[arg(short, long, value_enum)]
    format: Vec<FormatArg>,

    #[arg(short, long, value_enum)]
    granularity: Option<GranularityArg>,

    /// Upper bound on rows materialized for one profile partition
    #[arg(long)]
    max_partition_rows: Option<u64>,

    /// Profile partitions fused per parallel wave (1 = sequential streaming)
    #[arg(long)]
    partition_batch: Option<usize>,

    /// Report printed on completion
    #[arg(short, long, value_enum, default_value = "summary")]
    report: Report,
}

#[derive(Clone, Copy, ValueEnum)]
enum FormatArg {
    Csv,
    Parquet,
    Ipc,
}

impl From<FormatArg> for OutputFormat {
    fn from(arg: FormatArg) -> Self {
        match arg {
            FormatArg::Csv => OutputFormat::Csv,
            FormatArg::Parquet => OutputFormat::Parquet,
            FormatArg::Ipc => OutputFormat::Ipc,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum GranularityArg {
    Hourly,
    MonthHour,
}

#[derive(Clone, ValueEnum)]
enum Report {
    Json,
    Summary,
}

fn build_config(args: &Args) -> Result<PipelineConfig> {
    let mut config = match &args.config {
        Some(path) => PipelineConfig::from_json_file(path)?,
        None => PipelineConfig::default(),
    };

    if let Some(path) = &args.zones {
        config.input.zones = path.clone();
    }
    if let Some(path) = &args.zips {
        config.input.zips = path.clone();
    }
    if let Some(path) = &args.res_catalog {
        config.input.residential_catalog = path.clone();
    }
    if let Some(path) = &args.nonres_catalog {
        config.input.nonresidential_catalog = Some(path.clone());
    }
    if let Some(pattern) = &args.hourly {
        config.input.hourly = pattern.clone();
    }
    if let Some(path) = &args.feeders {
        config.input.feeders = Some(path.clone());
    }
    if let Some(path) = &args.zip_boundaries {
        config.input.zip_boundaries = Some(path.clone());
    }
    if let Some(dir) = &args.output_dir {
        config.output_dir = dir.clone();
    }
    if !args.format.is_empty() {
        config.output_formats = args.format.iter().map(|f| (*f).into()).collect();
    }
    if let Some(granularity) = args.granularity {
        config.granularity = match granularity {
            GranularityArg::Hourly => Granularity::Hourly,
            GranularityArg::MonthHour => Granularity::MonthHour,
        };
    }
    if let Some(limit) = args.max_partition_rows {
        config.max_partition_rows = limit;
    }
    if let Some(batch) = args.partition_batch {
        config.partition_batch = batch;
    }

    config.validate()?;
    Ok(config)
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();
    let config = build_config(&args)?;

    if config.worker_threads > 0 {
        rayon::ThreadPoolBuilder::new()
            .num_threads(config.worker_threads)
            .build_global()?;
    }

    info!("Starting ZIP load fusion into {}", config.output_dir.display());
    let pipeline = FusionPipeline::new(config);
    let outcome = pipeline.run()?;

    match args.report {
        Report::Json => {
            println!("{}", serde_json::to_string_pretty(&outcome.diagnostics)?);
        }
        Report::Summary => {
            let d = &outcome.diagnostics;
            println!("ZIP Load Fusion Summary");
            println!("=======================");
            println!("ZIPs with territory:      {}", d.zips_final_count);
            println!("ZIPs without territory:   {}", d.unassigned_zip_count);
            println!("ZIPs with no profiles:    {}", d.zips_with_empty_profiles.len());
            println!("ZIP-profile pairs:        {}", d.expanded_row_count);
            println!("Fused rows:               {}", d.fused_row_count);
            println!(
                "Orphaned profile-hours:   {} ({} profiles)",
                d.orphaned_profile_hour_count,
                d.orphaned_profile_ids.len()
            );
            println!("Profiles without loads:   {}", d.profiles_without_hourly.len());
            println!();
            println!("Outputs:");
            for path in &outcome.outputs {
                println!("  {}", path.display());
            }
            if !d.is_clean() {
                println!();
                println!("Referential gaps found; see diagnostics.json");
            }
        }
    }

    Ok(())
}
