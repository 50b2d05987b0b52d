use anyhow::Result;
use load_fusion::PipelineConfig;
use std::path::PathBuf;

mod feeder_processor;
mod fusion_processor;
mod load_summary;
mod output_verifier;

/// Value following `flag` on the command line, if any.
fn flag_value(args: &[String], flag: &str) -> Option<String> {
    args.iter()
        .position(|arg| arg == flag)
        .and_then(|idx| args.get(idx + 1))
        .cloned()
}

fn load_config(args: &[String]) -> Result<PipelineConfig> {
    let mut config = match flag_value(args, "--config") {
        Some(path) => PipelineConfig::from_json_file(&PathBuf::from(path))?,
        None => PipelineConfig::default(),
    };
    if let Some(dir) = flag_value(args, "--output-dir") {
        config.output_dir = PathBuf::from(dir);
    }
    Ok(config)
}

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = std::env::args().collect();
    let config = load_config(&args)?;

    // Use all available cores unless the config pins a thread count
    let threads = if config.worker_threads > 0 {
        config.worker_threads
    } else {
        num_cpus::get()
    };
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build_global()?;

    let mode = args.get(1).map(String::as_str).unwrap_or("--fuse");
    match mode {
        "--feeders" => {
            // Feeder placement and month-hour feature matrix
            feeder_processor::process_feeders(config)?;
        }
        "--verify-results" => {
            // Re-check fused outputs against diagnostics.json
            let issues = output_verifier::verify_outputs(&config.output_dir)?;
            if issues > 0 {
                anyhow::bail!("{} issues found in fused outputs", issues);
            }
        }
        "--summary" => {
            let summary = load_summary::summarize_loads(&config.output_dir)?;
            load_summary::print_summary(&summary);
        }
        "--help" | "-h" => {
            println!("Usage: zip_load_processor [MODE] [--config <file>] [--output-dir <dir>]");
            println!("Modes:");
            println!("  --fuse            run the full ZIP/territory/load fusion (default)");
            println!("  --feeders         map feeders to ZIPs and build feeder features");
            println!("  --verify-results  verify fused outputs");
            println!("  --summary         summarize zips_with_loads");
        }
        _ => {
            // Full fusion (default)
            println!("Using {} CPU cores", num_cpus::get());
            fusion_processor::process_fusion(config)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn test_flag_value_reads_next_argument() {
        let argv = args(&["zip_load_processor", "--summary", "--output-dir", "out"]);
        assert_eq!(flag_value(&argv, "--output-dir"), Some("out".to_string()));
        assert_eq!(flag_value(&argv, "--config"), None);
    }

    #[test]
    fn test_output_dir_overrides_default() {
        let argv = args(&["zip_load_processor", "--verify-results", "--output-dir", "elsewhere"]);
        let config = load_config(&argv).unwrap();
        assert_eq!(config.output_dir, PathBuf::from("elsewhere"));
    }

    #[test]
    fn test_config_file_is_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.json");
        std::fs::write(&path, r#"{"output_dir": "from_file", "partition_batch": 1}"#).unwrap();

        let argv = args(&["zip_load_processor", "--config", path.to_str().unwrap()]);
        let config = load_config(&argv).unwrap();
        assert_eq!(config.output_dir, PathBuf::from("from_file"));
        assert_eq!(config.partition_batch, 1);
    }
}
