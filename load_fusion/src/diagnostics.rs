use crate::hourly_fuser::FusionStats;
use crate::load_shapes::SeasonCoverage;
use crate::spatial_attributor::AttributionResult;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;

/// Referential gaps of one run. Gaps never abort a run; they are reported
/// here once all stages have finished.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FusionDiagnostics {
    pub unassigned_zip_count: usize,
    pub unassigned_zip_codes: Vec<String>,
    pub zips_with_empty_profiles: Vec<String>,
    pub orphaned_profile_hour_count: u64,
    pub orphaned_profile_ids: BTreeSet<String>,
    pub profiles_without_hourly: BTreeSet<String>,
    /// Empty on every successful run: duplicates abort before fusion.
    pub duplicate_profile_ids: BTreeSet<String>,
    pub boundary_zip_count: usize,
    pub overlap_zip_count: usize,
    pub zips_final_count: usize,
    pub expanded_row_count: usize,
    pub fused_row_count: u64,
    /// Month-hour runs only: hourly records outside the season months.
    #[serde(default)]
    pub out_of_season_record_count: u64,
    /// Month-hour runs only: profiles whose hourly data is all out of season.
    /// Referenced ones also appear in `profiles_without_hourly`.
    #[serde(default)]
    pub out_of_season_profile_ids: BTreeSet<String>,
}

impl FusionDiagnostics {
    pub fn record_attribution(&mut self, attribution: &AttributionResult) {
        let mut unassigned = attribution.unassigned.clone();
        unassigned.sort();
        self.unassigned_zip_count = unassigned.len();
        self.unassigned_zip_codes = unassigned;
        self.boundary_zip_count = attribution.boundary_hits;
        self.overlap_zip_count = attribution.overlap_hits;
    }

    pub fn record_fusion(&mut self, stats: &FusionStats) {
        self.orphaned_profile_hour_count = stats.orphaned_profile_hours;
        self.orphaned_profile_ids = stats.orphaned_profile_ids.clone();
        self.profiles_without_hourly = stats.profiles_without_series.clone();
        self.fused_row_count = stats.fused_rows;
    }

    pub fn record_season(&mut self, coverage: &SeasonCoverage) {
        self.out_of_season_record_count = coverage.out_of_season_records;
        self.out_of_season_profile_ids = coverage.profiles_out_of_season.clone();
    }

    /// True when no referential gap was observed.
    pub fn is_clean(&self) -> bool {
        self.unassigned_zip_count == 0
            && self.orphaned_profile_hour_count == 0
            && self.profiles_without_hourly.is_empty()
            && self.duplicate_profile_ids.is_empty()
            && self.zips_with_empty_profiles.is_empty()
    }

    pub fn write_json(&self, path: &Path) -> crate::Result<()> {
        let file = std::fs::File::create(path)?;
        serde_json::to_writer_pretty(file, self)?;
        Ok(())
    }

    pub fn read_json(path: &Path) -> crate::Result<Self> {
        let file = std::fs::File::open(path)?;
        Ok(serde_json::from_reader(file)?)
    }

    pub fn log_summary(&self) {
        log::info!(
            "Diagnostics: {} unassigned ZIPs, {} orphaned profile-hours, \
             {} profiles without hourly data",
            self.unassigned_zip_count,
            self.orphaned_profile_hour_count,
            self.profiles_without_hourly.len()
        );
    }
}
