use crate::error::Result;
use crate::hourly_fuser::HourlyFuser;
use crate::load_shapes::DEFAULT_SEASON_MONTHS;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Csv,
    Parquet,
    Ipc,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Csv => "csv",
            OutputFormat::Parquet => "parquet",
            OutputFormat::Ipc => "arrow",
        }
    }
}

/// Granularity of the load series joined in the final fusion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Granularity {
    /// Every (date, hour) of the source series.
    Hourly,
    /// Seasonal mean per (month, hour).
    MonthHour,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InputPaths {
    pub zones: PathBuf,
    pub zips: PathBuf,
    pub residential_catalog: PathBuf,
    pub nonresidential_catalog: Option<PathBuf>,
    /// File path or glob pattern; several files are unioned.
    pub hourly: String,
    pub feeders: Option<PathBuf>,
    pub zip_boundaries: Option<PathBuf>,
}

impl Default for InputPaths {
    fn default() -> Self {
        Self {
            zones: PathBuf::from("CALMAC/building_climate_zones.json"),
            zips: PathBuf::from("zip_codes/zip_points.csv"),
            residential_catalog: PathBuf::from("CALMAC/res_characteristics.csv"),
            nonresidential_catalog: Some(PathBuf::from("CALMAC/nonres_characteristics.csv")),
            hourly: "CALMAC/Res_GP_Elec_2024.csv".to_string(),
            feeders: None,
            zip_boundaries: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub input: InputPaths,
    pub output_dir: PathBuf,
    pub output_formats: Vec<OutputFormat>,
    pub granularity: Granularity,
    pub season_months: Vec<u32>,
    pub max_partition_rows: u64,
    /// Profile partitions fused concurrently per wave; 1 keeps the join
    /// strictly sequential.
    pub partition_batch: usize,
    /// 0 lets rayon pick.
    pub worker_threads: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            input: InputPaths::default(),
            output_dir: PathBuf::from("outputs"),
            output_formats: vec![OutputFormat::Csv, OutputFormat::Parquet],
            granularity: Granularity::Hourly,
            season_months: DEFAULT_SEASON_MONTHS.to_vec(),
            max_partition_rows: HourlyFuser::DEFAULT_MAX_PARTITION_ROWS,
            partition_batch: 32,
            worker_threads: 0,
        }
    }
}

impl PipelineConfig {
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        let config: PipelineConfig = serde_json::from_reader(std::io::BufReader::new(file))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(month) = self.season_months.iter().find(|m| !(1..=12).contains(*m)) {
            return Err(crate::FusionError::schema(format!(
                "season month {} is outside 1-12",
                month
            )));
        }
        if self.max_partition_rows == 0 {
            return Err(crate::FusionError::schema("max_partition_rows must be positive"));
        }
        Ok(())
    }

    pub fn output_path(&self, stem: &str, format: OutputFormat) -> PathBuf {
        self.output_dir.join(format!("{}.{}", stem, format.extension()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_falls_back_to_defaults() {
        let config: PipelineConfig = serde_json::from_str(
            r#"{
                "output_dir": "out",
                "granularity": "month-hour",
                "output_formats": ["parquet", "ipc"],
                "input": { "hourly": "CALMAC/*_GP_Elec_2024.csv" }
            }"#,
        )
        .unwrap();

        assert_eq!(config.output_dir, PathBuf::from("out"));
        assert_eq!(config.granularity, Granularity::MonthHour);
        assert_eq!(config.season_months, vec![5, 6, 7, 8, 9, 10]);
        assert_eq!(config.input.hourly, "CALMAC/*_GP_Elec_2024.csv");
        assert_eq!(
            config.input.residential_catalog,
            PathBuf::from("CALMAC/res_characteristics.csv")
        );
        assert_eq!(
            config.output_path("zips_with_loads", OutputFormat::Ipc),
            PathBuf::from("out/zips_with_loads.arrow")
        );
    }

    #[test]
    fn test_invalid_season_month_is_rejected() {
        let config = PipelineConfig {
            season_months: vec![5, 13],
            ..PipelineConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
