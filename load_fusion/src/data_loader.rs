//! Adapters from prepared on-disk tables to pipeline records.
//!
//! Geometry is expected pre-processed: zone and ZIP polygons as coordinate
//! rings in JSON, ZIP and feeder representative points as CSV columns.

use crate::error::{FusionError, Result};
use crate::frames::date_from_epoch_days;
use crate::models::{
    ClimateZone, CustomerClass, FeederRecord, HourlyRecord, ProfileCatalogEntry, SolarSegment,
    ZipBoundary, ZipRecord,
};
use chrono::NaiveDate;
use geo::{LineString, MultiPolygon, Point, Polygon};
use polars::prelude::*;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Accepted date layouts for the hourly series.
const DATE_FORMATS: [&str; 3] = ["%Y-%m-%d", "%m/%d/%Y", "%Y/%m/%d"];

type Rings = Vec<Vec<[f64; 2]>>;

/// A single polygon goes in `rings`; multi-part shapes use `polygons`,
/// each a list of rings. The first ring of a polygon is its exterior.
#[derive(Debug, Deserialize)]
struct ZoneFeature {
    agency_zone_id: i64,
    #[serde(default)]
    rings: Option<Rings>,
    #[serde(default)]
    polygons: Vec<Rings>,
}

#[derive(Debug, Deserialize)]
struct ZipBoundaryFeature {
    zip_code: String,
    #[serde(default)]
    rings: Option<Rings>,
    #[serde(default)]
    polygons: Vec<Rings>,
}

fn feature_polygons(rings: Option<Rings>, polygons: Vec<Rings>) -> Vec<Rings> {
    rings.into_iter().chain(polygons).collect()
}

fn to_multipolygon(polygons: Vec<Rings>) -> MultiPolygon<f64> {
    MultiPolygon::new(
        polygons
            .into_iter()
            .filter(|rings| !rings.is_empty())
            .map(|rings| {
                let mut rings = rings
                    .into_iter()
                    .map(|ring| {
                        LineString::from(ring.into_iter().map(|[x, y]| (x, y)).collect::<Vec<_>>())
                    });
                let exterior = rings.next().unwrap_or_else(|| LineString::new(vec![]));
                Polygon::new(exterior, rings.collect())
            })
            .collect(),
    )
}

pub struct DataLoader;

impl DataLoader {
    pub fn load_climate_zones(path: &Path) -> Result<Vec<ClimateZone>> {
        log::info!("Loading climate zones from {}", path.display());
        let file = std::fs::File::open(path)?;
        let features: Vec<ZoneFeature> = serde_json::from_reader(std::io::BufReader::new(file))?;

        Ok(features
            .into_iter()
            .map(|feature| ClimateZone {
                agency_zone_id: feature.agency_zone_id,
                polygon: to_multipolygon(feature_polygons(feature.rings, feature.polygons)),
            })
            .collect())
    }

    pub fn load_zip_boundaries(path: &Path) -> Result<Vec<ZipBoundary>> {
        log::info!("Loading ZIP polygons from {}", path.display());
        let file = std::fs::File::open(path)?;
        let features: Vec<ZipBoundaryFeature> =
            serde_json::from_reader(std::io::BufReader::new(file))?;

        features
            .into_iter()
            .map(|feature| {
                Ok(ZipBoundary {
                    zip_code: crate::models::normalize_zip_code(&feature.zip_code)?,
                    polygon: to_multipolygon(feature_polygons(feature.rings, feature.polygons)),
                })
            })
            .collect()
    }

    /// Reads `zip_code,population,area_sqmi,point_x,point_y`.
    pub fn load_zips(path: &Path) -> Result<Vec<ZipRecord>> {
        log::info!("Loading ZIP codes from {}", path.display());
        let df = read_csv(path)?;

        let zip_codes = string_column(&df, "zip_code")?;
        let populations = df.column("population")?.cast(&DataType::Int64)?;
        let populations = populations.i64()?;
        let areas = df.column("area_sqmi")?.cast(&DataType::Float64)?;
        let areas = areas.f64()?;
        let xs = df.column("point_x")?.cast(&DataType::Float64)?;
        let xs = xs.f64()?;
        let ys = df.column("point_y")?.cast(&DataType::Float64)?;
        let ys = ys.f64()?;

        let mut zips = Vec::with_capacity(df.height());
        for idx in 0..df.height() {
            let (Some(zip_code), Some(population), Some(area), Some(x), Some(y)) = (
                zip_codes.get(idx),
                populations.get(idx),
                areas.get(idx),
                xs.get(idx),
                ys.get(idx),
            ) else {
                return Err(FusionError::schema(format!(
                    "ZIP table row {} has missing values",
                    idx
                )));
            };

            let population =
                u64::try_from(population).map_err(|_| FusionError::InvalidZipAttributes {
                    zip_code: zip_code.to_string(),
                    reason: format!("negative population {}", population),
                })?;
            zips.push(ZipRecord::new(zip_code, population, area, Point::new(x, y))?);
        }

        log::info!("Loaded {} ZIP codes", zips.len());
        Ok(zips)
    }

    pub fn load_feeders(path: &Path) -> Result<Vec<FeederRecord>> {
        log::info!("Loading feeders from {}", path.display());
        let df = read_csv(path)?;

        let ids = string_column(&df, "feeder_id")?;
        let xs = df.column("point_x")?.cast(&DataType::Float64)?;
        let ys = df.column("point_y")?.cast(&DataType::Float64)?;

        let feeders = (&ids)
            .into_iter()
            .zip(xs.f64()?.into_iter())
            .zip(ys.f64()?.into_iter())
            .filter_map(|((id, x), y)| {
                Some(FeederRecord {
                    feeder_id: id?.to_string(),
                    representative_point: Point::new(x?, y?),
                })
            })
            .collect::<Vec<_>>();

        if feeders.len() != df.height() {
            log::warn!(
                "Skipped {} feeders with missing id or location",
                df.height() - feeders.len()
            );
        }
        Ok(feeders)
    }

    /// Reads one CALMAC characteristics table (`gp`, `seg_cz`, segment columns).
    pub fn load_catalog(path: &Path, class: CustomerClass) -> Result<Vec<ProfileCatalogEntry>> {
        log::info!("Loading {} characteristics from {}", class.label(), path.display());
        let df = read_csv(path)?;

        let profile_ids = string_column(&df, "gp")?;
        let territories = string_column(&df, "seg_cz")?;
        let sizes = optional_i64_column(&df, "seg_size")?;
        let seasons = optional_i64_column(&df, "seg_season")?;
        let premises = optional_i64_column(&df, "premise_count")?;
        let solar = match df.column("seg_solar") {
            Ok(s) => Some(s.cast(&DataType::String)?),
            Err(_) => None,
        };
        let solar = solar.as_ref().map(|s| s.str()).transpose()?;

        let mut entries = Vec::with_capacity(df.height());
        for idx in 0..df.height() {
            let (Some(profile_id), Some(territory)) = (profile_ids.get(idx), territories.get(idx))
            else {
                return Err(FusionError::schema(format!(
                    "{} catalog row {} is missing gp or seg_cz",
                    class.label(),
                    idx
                )));
            };

            entries.push(ProfileCatalogEntry {
                profile_id: profile_id.trim().to_string(),
                territory: territory.parse()?,
                size_segment: sizes.as_ref().and_then(|c| c.get(idx)),
                season_segment: seasons.as_ref().and_then(|c| c.get(idx)),
                solar_segment: solar.and_then(|c| c.get(idx)).map(SolarSegment::from_code),
                premise_count: premises.as_ref().and_then(|c| c.get(idx)),
                customer_class: class,
            });
        }

        log::info!("Loaded {} {} profiles", entries.len(), class.label());
        Ok(entries)
    }

    /// Unions residential and non-residential catalogs, residential first.
    pub fn load_catalogs(
        residential: &Path,
        nonresidential: Option<&Path>,
    ) -> Result<Vec<ProfileCatalogEntry>> {
        let mut catalog = Self::load_catalog(residential, CustomerClass::Residential)?;
        if let Some(path) = nonresidential {
            catalog.extend(Self::load_catalog(path, CustomerClass::NonResidential)?);
        }
        Ok(catalog)
    }

    /// Loads the long-format hourly series from one file or a glob pattern,
    /// CSV or Parquet by extension, ordered by (gp, date, hour).
    ///
    /// Dates are compared after parsing, so mixed date layouts across files
    /// still sort chronologically. Repeated keys stay adjacent for the fuser
    /// to reject.
    pub fn load_hourly(pattern: &str) -> Result<Vec<HourlyRecord>> {
        let files = expand_pattern(pattern)?;
        log::info!("Loading hourly load shapes from {} file(s)", files.len());

        let frames = files
            .iter()
            .map(|file| scan_table(file))
            .collect::<Result<Vec<_>>>()?;
        let df = concat(frames, UnionArgs::default())?.collect()?;

        let mut records = hourly_records_from_frame(&df)?;
        records.sort_by(|a, b| {
            (&a.profile_id, a.date, a.hour).cmp(&(&b.profile_id, b.date, b.hour))
        });
        log::info!("Loaded {} load shape records", records.len());
        Ok(records)
    }
}

fn expand_pattern(pattern: &str) -> Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = glob::glob(pattern)
        .map_err(|e| FusionError::schema(format!("bad path pattern {}: {}", pattern, e)))?
        .filter_map(|entry| entry.ok())
        .collect();
    files.sort();

    if files.is_empty() {
        return Err(FusionError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("no files match {}", pattern),
        )));
    }
    Ok(files)
}

fn read_csv(path: &Path) -> Result<DataFrame> {
    Ok(LazyCsvReader::new(path)
        .with_has_header(true)
        .with_infer_schema_length(Some(10_000))
        .finish()?
        .collect()?)
}

fn scan_table(path: &Path) -> Result<LazyFrame> {
    let is_parquet = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("parquet"))
        .unwrap_or(false);

    let lf = if is_parquet {
        LazyFrame::scan_parquet(path, ScanArgsParquet::default())?
    } else {
        LazyCsvReader::new(path)
            .with_has_header(true)
            .with_infer_schema_length(Some(10_000))
            .finish()?
    };

    Ok(lf.select([
        col("gp").cast(DataType::String),
        col("date"),
        col("hour").cast(DataType::Int64),
        col("kwh").cast(DataType::Float64),
    ]))
}

fn string_column(df: &DataFrame, name: &str) -> Result<StringChunked> {
    let column = df
        .column(name)
        .map_err(|_| FusionError::schema(format!("missing required column {}", name)))?;
    Ok(column.cast(&DataType::String)?.str()?.clone())
}

fn optional_i64_column(df: &DataFrame, name: &str) -> Result<Option<Int64Chunked>> {
    match df.column(name) {
        Ok(column) => Ok(Some(column.cast(&DataType::Int64)?.i64()?.clone())),
        Err(_) => Ok(None),
    }
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(raw.trim(), format).ok())
}

/// Converts a `gp, date, hour, kwh` frame into records, rejecting nulls and
/// out-of-range hours instead of dropping them.
pub fn hourly_records_from_frame(df: &DataFrame) -> Result<Vec<HourlyRecord>> {
    let profile_ids = string_column(df, "gp")?;
    let hours = df.column("hour")?.cast(&DataType::Int64)?;
    let hours = hours.i64()?;
    let kwhs = df.column("kwh")?.cast(&DataType::Float64)?;
    let kwhs = kwhs.f64()?;

    let dates_column = df.column("date")?;
    let dates: Vec<Option<NaiveDate>> = match dates_column.dtype() {
        DataType::Date => dates_column
            .cast(&DataType::Int32)?
            .i32()?
            .into_iter()
            .map(|days| days.map(date_from_epoch_days))
            .collect(),
        _ => dates_column
            .cast(&DataType::String)?
            .str()?
            .into_iter()
            .map(|raw| raw.and_then(parse_date))
            .collect(),
    };

    let mut records = Vec::with_capacity(df.height());
    for idx in 0..df.height() {
        let (Some(profile_id), Some(date), Some(hour), Some(kwh)) = (
            profile_ids.get(idx),
            dates[idx],
            hours.get(idx),
            kwhs.get(idx),
        ) else {
            return Err(FusionError::schema(format!(
                "hourly row {} has a missing or unparseable value",
                idx
            )));
        };

        let hour = u8::try_from(hour)
            .ok()
            .filter(|h| *h <= 23)
            .ok_or_else(|| FusionError::HourOutOfRange {
                profile_id: profile_id.to_string(),
                hour,
            })?;

        records.push(HourlyRecord {
            profile_id: profile_id.to_string(),
            date,
            hour,
            kwh,
        });
    }

    Ok(records)
}
