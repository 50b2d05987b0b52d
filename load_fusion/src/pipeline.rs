use crate::config::{Granularity, OutputFormat, PipelineConfig};
use crate::data_loader::DataLoader;
use crate::diagnostics::FusionDiagnostics;
use crate::error::{FusionError, Result};
use crate::expander::Expander;
use crate::feeder_features::{
    build_feeder_features, map_feeders_to_zips, FeederFeatureTable, FeederMapping,
};
use crate::frames::{zips_final_flat_frame, FrameRows};
use crate::hourly_fuser::{contiguous_partitions, FusionStats, HourlyFuser, SeriesRecord};
use crate::load_shapes::{aggregate_month_hour, season_coverage};
use crate::models::{
    ClimateZone, ExpandedRow, FusedRow, HourlyRecord, ProfileCatalogEntry, ZipMonthHourRow,
    ZipRecord, ZipWithProfiles,
};
use crate::profile_aggregator::ProfileAggregator;
use crate::sink::{CsvRowSink, IpcRowSink, ParquetRowSink, RowSink, TeeSink};
use crate::spatial_attributor::SpatialAttributor;
use crate::zone_classifier::ZoneClassifier;
use crate::zone_merger::ZoneMerger;
use polars::prelude::*;
use serde::Serialize;
use std::fs::File;
use std::path::{Path, PathBuf};

pub const ZIPS_FINAL: &str = "zips_final";
pub const ZIPS_EXPANDED: &str = "zips_expanded";
pub const ZIPS_WITH_LOADS: &str = "zips_with_loads";
pub const ZIPS_WITH_MONTH_HOUR_LOADS: &str = "zips_with_month_hour_loads";
pub const FEEDER_ZIPS: &str = "feeder_zips";
pub const FEEDER_FEATURES: &str = "feeder_features";
pub const DIAGNOSTICS_FILE: &str = "diagnostics.json";

/// Everything needed to run the pipeline, already parsed.
#[derive(Debug, Clone)]
pub struct PipelineInputs {
    pub zones: Vec<ClimateZone>,
    pub zips: Vec<ZipRecord>,
    pub catalog: Vec<ProfileCatalogEntry>,
    pub hourly: Vec<HourlyRecord>,
}

/// Output of the ZIP-side stages, before the load series is joined.
#[derive(Debug, Clone, Default)]
pub struct PreparedZips {
    pub zips_final: Vec<ZipWithProfiles>,
    pub expanded: Vec<ExpandedRow>,
    pub diagnostics: FusionDiagnostics,
}

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub diagnostics: FusionDiagnostics,
    pub outputs: Vec<PathBuf>,
}

/// Outputs of one run, written under temporary `*.partial` names and only
/// renamed into place once every stage has succeeded.
#[derive(Debug, Default)]
pub struct PendingOutputs {
    files: Vec<(PathBuf, PathBuf)>,
}

impl PendingOutputs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `target` and returns the temporary path to write it under.
    pub fn stage(&mut self, target: PathBuf) -> PathBuf {
        let mut partial = target.clone().into_os_string();
        partial.push(".partial");
        let partial = PathBuf::from(partial);
        self.files.push((partial.clone(), target));
        partial
    }

    pub fn targets(&self) -> impl Iterator<Item = &Path> {
        self.files.iter().map(|(_, target)| target.as_path())
    }

    /// Commits on success, discards everything staged on failure.
    pub fn settle(self, staged: Result<()>) -> Result<Vec<PathBuf>> {
        match staged {
            Ok(()) => self.commit(),
            Err(e) => {
                self.discard();
                Err(e)
            }
        }
    }

    pub fn commit(self) -> Result<Vec<PathBuf>> {
        let mut committed = Vec::with_capacity(self.files.len());
        for (partial, target) in self.files {
            std::fs::rename(&partial, &target)?;
            committed.push(target);
        }
        Ok(committed)
    }

    pub fn discard(self) {
        for (partial, _) in self.files {
            match std::fs::remove_file(&partial) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    log::warn!("Could not remove partial output {}: {}", partial.display(), e);
                }
            }
        }
    }
}

pub struct FusionPipeline {
    config: PipelineConfig,
}

impl FusionPipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn load_inputs(&self) -> Result<PipelineInputs> {
        let input = &self.config.input;
        Ok(PipelineInputs {
            zones: DataLoader::load_climate_zones(&input.zones)?,
            zips: DataLoader::load_zips(&input.zips)?,
            catalog: DataLoader::load_catalogs(
                &input.residential_catalog,
                input.nonresidential_catalog.as_deref(),
            )?,
            hourly: DataLoader::load_hourly(&input.hourly)?,
        })
    }

    /// Classify zones, attribute ZIPs, group the catalog, merge and expand.
    ///
    /// Structural errors from any stage abort before anything is fused.
    pub fn prepare(
        &self,
        zones: Vec<ClimateZone>,
        zips: &[ZipRecord],
        catalog: &[ProfileCatalogEntry],
    ) -> Result<PreparedZips> {
        let classified = ZoneClassifier::classify(zones)?;
        let attribution = SpatialAttributor::new(classified).attribute(zips)?;
        let profiles = ProfileAggregator::aggregate(catalog)?;

        let zips_final = ZoneMerger::merge(zips, &attribution.assignments, &profiles);
        let expanded = Expander::expand(&zips_final);

        let mut diagnostics = FusionDiagnostics::default();
        diagnostics.record_attribution(&attribution);
        diagnostics.zips_with_empty_profiles = zips_final
            .iter()
            .filter(|z| z.profile_ids.is_empty())
            .map(|z| z.zip_code.clone())
            .collect();
        diagnostics.zips_final_count = zips_final.len();
        diagnostics.expanded_row_count = expanded.len();

        Ok(PreparedZips {
            zips_final,
            expanded,
            diagnostics,
        })
    }

    pub fn fuser(&self, expanded: &[ExpandedRow]) -> HourlyFuser {
        HourlyFuser::new(expanded).with_max_partition_rows(self.config.max_partition_rows)
    }

    /// Joins the hourly series against the expanded ZIP-profile pairs.
    pub fn fuse_hourly<S: RowSink<FusedRow>>(
        &self,
        prepared: &mut PreparedZips,
        hourly: Vec<HourlyRecord>,
        sink: &mut S,
    ) -> Result<FusionStats> {
        self.fuse_series(prepared, hourly, sink)
    }

    /// Joins seasonal month-hour means instead of the raw hourly series.
    pub fn fuse_month_hour<S: RowSink<ZipMonthHourRow>>(
        &self,
        prepared: &mut PreparedZips,
        hourly: &[HourlyRecord],
        sink: &mut S,
    ) -> Result<FusionStats> {
        let loads = aggregate_month_hour(hourly, &self.config.season_months);
        let stats = self.fuse_series(prepared, loads, sink)?;
        prepared
            .diagnostics
            .record_season(&season_coverage(hourly, &self.config.season_months));
        Ok(stats)
    }

    fn fuse_series<R, S>(
        &self,
        prepared: &mut PreparedZips,
        records: Vec<R>,
        sink: &mut S,
    ) -> Result<FusionStats>
    where
        R: SeriesRecord,
        S: RowSink<R::Output>,
    {
        let fuser = self.fuser(&prepared.expanded);
        let stats = if self.config.partition_batch <= 1 {
            fuser.fuse_stream(records, sink)?
        } else {
            fuser.fuse_partitions(
                contiguous_partitions(records),
                self.config.partition_batch,
                sink,
            )?
        };

        let written = sink.finish()?;
        if written != stats.fused_rows {
            return Err(FusionError::Sink {
                message: format!(
                    "sink reported {} rows, fuser produced {}",
                    written, stats.fused_rows
                ),
            });
        }

        prepared.diagnostics.record_fusion(&stats);
        Ok(stats)
    }

    /// Stages `zips_final` and `zips_expanded` in every configured format.
    pub fn write_zip_tables(
        &self,
        prepared: &PreparedZips,
        pending: &mut PendingOutputs,
    ) -> Result<()> {
        std::fs::create_dir_all(&self.config.output_dir)?;

        for &format in &self.config.output_formats {
            let mut zips_final = match format {
                OutputFormat::Csv => zips_final_flat_frame(&prepared.zips_final)?,
                _ => ZipWithProfiles::to_frame(&prepared.zips_final)?,
            };
            let path = pending.stage(self.config.output_path(ZIPS_FINAL, format));
            write_frame(&mut zips_final, &path, format)?;

            let mut expanded = ExpandedRow::to_frame(&prepared.expanded)?;
            let path = pending.stage(self.config.output_path(ZIPS_EXPANDED, format));
            write_frame(&mut expanded, &path, format)?;
        }

        log::info!("Staged ZIP tables in {}", self.config.output_dir.display());
        Ok(())
    }

    /// Opens one streaming sink per configured format, writing to staged paths.
    pub fn open_sinks<R>(&self, stem: &str, pending: &mut PendingOutputs) -> Result<TeeSink<R>>
    where
        R: Serialize + FrameRows + Clone + 'static,
    {
        std::fs::create_dir_all(&self.config.output_dir)?;
        let mut sinks: Vec<Box<dyn RowSink<R>>> = Vec::new();

        for &format in &self.config.output_formats {
            let partial = pending.stage(self.config.output_path(stem, format));
            let sink: Box<dyn RowSink<R>> = match format {
                OutputFormat::Csv => Box::new(CsvRowSink::create(&partial)?),
                OutputFormat::Parquet => Box::new(ParquetRowSink::create(&partial)?),
                OutputFormat::Ipc => Box::new(IpcRowSink::create(&partial)?),
            };
            sinks.push(sink);
        }

        Ok(TeeSink::new(sinks))
    }

    /// Maps feeders to assigned ZIPs and pivots their month-hour loads.
    ///
    /// Returns `None` when no feeder inputs are configured.
    pub fn build_feeders(
        &self,
        prepared: &PreparedZips,
        hourly: &[HourlyRecord],
    ) -> Result<Option<(FeederMapping, FeederFeatureTable)>> {
        let (Some(feeders_path), Some(boundaries_path)) = (
            self.config.input.feeders.as_deref(),
            self.config.input.zip_boundaries.as_deref(),
        ) else {
            return Ok(None);
        };

        let feeders = DataLoader::load_feeders(feeders_path)?;
        let boundaries = DataLoader::load_zip_boundaries(boundaries_path)?;
        let mapping = map_feeders_to_zips(&feeders, &boundaries, &prepared.zips_final);

        let loads = aggregate_month_hour(hourly, &self.config.season_months);
        let table = build_feeder_features(&mapping.pairs, &prepared.expanded, &loads);
        Ok(Some((mapping, table)))
    }

    pub fn write_feeder_tables(
        &self,
        mapping: &FeederMapping,
        table: &FeederFeatureTable,
        pending: &mut PendingOutputs,
    ) -> Result<()> {
        std::fs::create_dir_all(&self.config.output_dir)?;
        for &format in &self.config.output_formats {
            let mut pairs = crate::models::FeederZip::to_frame(&mapping.pairs)?;
            let path = pending.stage(self.config.output_path(FEEDER_ZIPS, format));
            write_frame(&mut pairs, &path, format)?;

            let path = pending.stage(self.config.output_path(FEEDER_FEATURES, format));
            write_frame(&mut table.to_frame()?, &path, format)?;
        }
        Ok(())
    }

    /// Stages `diagnostics.json`; it is committed with the tables it describes.
    pub fn write_diagnostics(
        &self,
        diagnostics: &FusionDiagnostics,
        pending: &mut PendingOutputs,
    ) -> Result<()> {
        let path = pending.stage(self.config.output_dir.join(DIAGNOSTICS_FILE));
        diagnostics.write_json(&path)
    }

    /// Loads every input, runs all stages and writes all outputs.
    ///
    /// Nothing in the output directory changes unless the whole run succeeds.
    pub fn run(&self) -> Result<RunOutcome> {
        let inputs = self.load_inputs()?;
        self.run_with_inputs(inputs)
    }

    pub fn run_with_inputs(&self, inputs: PipelineInputs) -> Result<RunOutcome> {
        let PipelineInputs {
            zones,
            zips,
            catalog,
            hourly,
        } = inputs;

        let mut prepared = self.prepare(zones, &zips, &catalog)?;
        let mut pending = PendingOutputs::new();
        let staged = self.stage_outputs(&mut prepared, hourly, &mut pending);
        let outputs = pending.settle(staged)?;
        prepared.diagnostics.log_summary();

        Ok(RunOutcome {
            diagnostics: prepared.diagnostics,
            outputs,
        })
    }

    fn stage_outputs(
        &self,
        prepared: &mut PreparedZips,
        hourly: Vec<HourlyRecord>,
        pending: &mut PendingOutputs,
    ) -> Result<()> {
        self.write_zip_tables(prepared, pending)?;

        if let Some((mapping, table)) = self.build_feeders(prepared, &hourly)? {
            self.write_feeder_tables(&mapping, &table, pending)?;
        }

        match self.config.granularity {
            Granularity::Hourly => {
                let mut sink = self.open_sinks::<FusedRow>(ZIPS_WITH_LOADS, pending)?;
                self.fuse_hourly(prepared, hourly, &mut sink)?;
            }
            Granularity::MonthHour => {
                let mut sink =
                    self.open_sinks::<ZipMonthHourRow>(ZIPS_WITH_MONTH_HOUR_LOADS, pending)?;
                self.fuse_month_hour(prepared, &hourly, &mut sink)?;
            }
        }

        self.write_diagnostics(&prepared.diagnostics, pending)
    }
}

/// Writes a whole frame in one of the supported formats.
pub fn write_frame(df: &mut DataFrame, path: &Path, format: OutputFormat) -> Result<()> {
    let mut file = File::create(path)?;
    match format {
        OutputFormat::Csv => {
            CsvWriter::new(&mut file).include_header(true).finish(df)?;
        }
        OutputFormat::Parquet => {
            ParquetWriter::new(&mut file)
                .with_compression(ParquetCompression::Snappy)
                .finish(df)?;
        }
        OutputFormat::Ipc => {
            IpcWriter::new(&mut file).finish(df)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CustomerClass, Territory};
    use crate::sink::VecSink;
    use chrono::NaiveDate;
    use geo::{polygon, MultiPolygon, Point};

    fn zone(id: i64, x0: f64) -> ClimateZone {
        ClimateZone {
            agency_zone_id: id,
            polygon: MultiPolygon::new(vec![polygon![
                (x: x0, y: 0.0),
                (x: x0 + 10.0, y: 0.0),
                (x: x0 + 10.0, y: 10.0),
                (x: x0, y: 10.0),
                (x: x0, y: 0.0),
            ]]),
        }
    }

    fn entry(id: &str, territory: Territory) -> ProfileCatalogEntry {
        ProfileCatalogEntry::new(id, territory, CustomerClass::Residential)
    }

    fn hours(profile: &str, count: u8) -> Vec<HourlyRecord> {
        (0..count)
            .map(|hour| HourlyRecord {
                profile_id: profile.to_string(),
                date: NaiveDate::from_ymd_opt(2024, 7, 1).unwrap(),
                hour,
                kwh: 0.5,
            })
            .collect()
    }

    fn config(dir: &Path) -> PipelineConfig {
        PipelineConfig {
            output_dir: dir.to_path_buf(),
            ..PipelineConfig::default()
        }
    }

    #[test]
    fn test_prepare_reports_gaps_without_failing() {
        let pipeline = FusionPipeline::new(PipelineConfig::default());
        let zips = vec![
            ZipRecord::new("90210", 100, 1.0, Point::new(5.0, 5.0)).unwrap(),
            ZipRecord::new("95814", 100, 1.0, Point::new(15.0, 5.0)).unwrap(),
            ZipRecord::new("96161", 100, 1.0, Point::new(50.0, 5.0)).unwrap(),
        ];
        let catalog = vec![entry("1_1_NS_C", Territory::Coastal)];

        let prepared = pipeline
            .prepare(vec![zone(3, 0.0), zone(12, 10.0)], &zips, &catalog)
            .unwrap();

        assert_eq!(prepared.zips_final.len(), 2);
        assert_eq!(prepared.expanded.len(), 1);
        assert_eq!(prepared.diagnostics.unassigned_zip_codes, vec!["96161"]);
        assert_eq!(prepared.diagnostics.zips_with_empty_profiles, vec!["95814"]);
    }

    #[test]
    fn test_unmapped_zone_aborts_prepare() {
        let pipeline = FusionPipeline::new(PipelineConfig::default());
        let result = pipeline.prepare(vec![zone(7, 0.0)], &[], &[]);
        assert!(matches!(result, Err(FusionError::UnmappedZone { agency_zone_id: 7 })));
    }

    #[test]
    fn test_month_hour_granularity_uses_season_only() {
        let pipeline = FusionPipeline::new(PipelineConfig::default());
        let zips = vec![ZipRecord::new("90210", 100, 1.0, Point::new(5.0, 5.0)).unwrap()];
        let mut prepared = pipeline
            .prepare(vec![zone(3, 0.0)], &zips, &[entry("A", Territory::Coastal)])
            .unwrap();

        let january = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let mut hourly = hours("A", 24);
        for profile in ["A", "WINTER_ONLY"] {
            hourly.push(HourlyRecord {
                profile_id: profile.to_string(),
                date: january,
                hour: 0,
                kwh: 9.0,
            });
        }

        let mut sink = VecSink::new();
        let stats = pipeline.fuse_month_hour(&mut prepared, &hourly, &mut sink).unwrap();
        assert_eq!(stats.fused_rows, 24);
        assert!(sink.rows.iter().all(|r| r.month == 7 && r.kwh == 0.5));

        let diagnostics = &prepared.diagnostics;
        assert_eq!(diagnostics.orphaned_profile_hour_count, 0);
        assert_eq!(diagnostics.out_of_season_record_count, 2);
        assert_eq!(
            diagnostics.out_of_season_profile_ids.iter().collect::<Vec<_>>(),
            vec!["WINTER_ONLY"]
        );
    }

    #[test]
    fn test_failed_fusion_leaves_no_fused_files() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = FusionPipeline::new(PipelineConfig {
            max_partition_rows: 10,
            ..config(dir.path())
        });
        let inputs = PipelineInputs {
            zones: vec![zone(3, 0.0)],
            zips: vec![ZipRecord::new("90210", 100, 1.0, Point::new(5.0, 5.0)).unwrap()],
            catalog: vec![entry("A", Territory::Coastal)],
            hourly: hours("A", 24),
        };

        let result = pipeline.run_with_inputs(inputs);
        assert!(matches!(result, Err(FusionError::ResourceExhausted { .. })));
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().to_string())
            .collect();
        assert!(leftovers.is_empty(), "unexpected files: {:?}", leftovers);
    }

    #[test]
    fn test_staged_paths_keep_the_full_file_name() {
        let mut pending = PendingOutputs::new();
        let partial = pending.stage(PathBuf::from("out/zips_final.csv"));
        assert_eq!(partial, PathBuf::from("out/zips_final.csv.partial"));
        assert_eq!(
            pending.targets().collect::<Vec<_>>(),
            vec![Path::new("out/zips_final.csv")]
        );
    }

    #[test]
    fn test_discard_tolerates_unwritten_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut pending = PendingOutputs::new();
        let written = pending.stage(dir.path().join("zips_final.csv"));
        pending.stage(dir.path().join("zips_expanded.csv"));
        std::fs::write(&written, "zip_code\n").unwrap();

        let failure = Err(FusionError::schema("bad input"));
        assert!(pending.settle(failure).is_err());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
