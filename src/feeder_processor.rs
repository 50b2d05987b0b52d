use anyhow::Result;
use load_fusion::feeder_features::FeederFeatureTable;
use load_fusion::pipeline::PendingOutputs;
use load_fusion::{FusionPipeline, PipelineConfig};
use std::collections::BTreeMap;
use std::time::Instant;

/// Feeders per ZIP, largest first.
fn busiest_zips(table: &FeederFeatureTable, limit: usize) -> Vec<(String, usize)> {
    let mut feeders_by_zip: BTreeMap<&str, std::collections::BTreeSet<&str>> = BTreeMap::new();
    for row in &table.rows {
        feeders_by_zip
            .entry(row.zip_code.as_str())
            .or_default()
            .insert(row.feeder_id.as_str());
    }

    let mut counts: Vec<(String, usize)> = feeders_by_zip
        .into_iter()
        .map(|(zip, feeders)| (zip.to_string(), feeders.len()))
        .collect();
    counts.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    counts.truncate(limit);
    counts
}

pub fn process_feeders(config: PipelineConfig) -> Result<()> {
    if config.input.feeders.is_none() || config.input.zip_boundaries.is_none() {
        anyhow::bail!(
            "feeder processing needs input.feeders and input.zip_boundaries in the config"
        );
    }

    println!("🔌 Feeder Load Features - Rust Processor");
    println!("{}", "=".repeat(60));
    let start = Instant::now();

    let pipeline = FusionPipeline::new(config);
    let inputs = pipeline.load_inputs()?;
    let prepared = pipeline.prepare(inputs.zones, &inputs.zips, &inputs.catalog)?;
    println!("  ZIPs with territory: {}", prepared.zips_final.len());

    let Some((mapping, table)) = pipeline.build_feeders(&prepared, &inputs.hourly)? else {
        anyhow::bail!("feeder inputs are not configured");
    };

    println!("\n📍 Feeder placement");
    println!("  Feeders mapped to a ZIP:   {}", mapping.pairs.len());
    println!("  Feeders outside all ZIPs:  {}", mapping.unmapped_feeders.len());
    if mapping.duplicate_feeders > 0 {
        println!("  ⚠️  Repeated feeder ids skipped: {}", mapping.duplicate_feeders);
    }

    println!("\n📈 Feature matrix");
    println!("  Rows:             {}", table.rows.len());
    println!("  Profile columns:  {}", table.profile_ids.len());
    for (zip_code, feeders) in busiest_zips(&table, 5) {
        println!("    ZIP {}: {} feeders", zip_code, feeders);
    }

    let mut pending = PendingOutputs::new();
    let staged = pipeline.write_feeder_tables(&mapping, &table, &mut pending);
    for path in pending.settle(staged)? {
        println!("  ✅ Saved {}", path.display());
    }

    println!("\n✅ Feeder processing complete in {:?}!", start.elapsed());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use load_fusion::feeder_features::FeederFeatureRow;

    fn row(feeder: &str, zip: &str, hour: u8) -> FeederFeatureRow {
        FeederFeatureRow {
            feeder_id: feeder.to_string(),
            zip_code: zip.to_string(),
            month: 7,
            hour,
            kwh: vec![0.5],
        }
    }

    #[test]
    fn test_busiest_zips_counts_distinct_feeders() {
        let table = FeederFeatureTable {
            profile_ids: vec!["1_1_NS_C".to_string()],
            rows: vec![
                row("F1", "90210", 0),
                row("F1", "90210", 1),
                row("F2", "90210", 0),
                row("F3", "95814", 0),
            ],
        };

        assert_eq!(
            busiest_zips(&table, 5),
            vec![("90210".to_string(), 2), ("95814".to_string(), 1)]
        );
        assert_eq!(busiest_zips(&table, 1).len(), 1);
    }

    #[test]
    fn test_missing_feeder_inputs_are_rejected() {
        let config = PipelineConfig::default();
        assert!(process_feeders(config).is_err());
    }
}
