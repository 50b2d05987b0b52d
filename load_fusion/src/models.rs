use chrono::NaiveDate;
use geo::{MultiPolygon, Point};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::FusionError;

/// CALMAC climate-zone group. Join key between the spatial side and the
/// load-profile catalog (`seg_cz`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Territory {
    Coastal,
    Inland,
    NorthCentralValley,
    SouthCentralValley,
}

impl Territory {
    pub const ALL: [Territory; 4] = [
        Territory::Coastal,
        Territory::Inland,
        Territory::NorthCentralValley,
        Territory::SouthCentralValley,
    ];

    /// Label as written in the catalog's `seg_cz` column.
    pub fn label(&self) -> &'static str {
        match self {
            Territory::Coastal => "Coastal",
            Territory::Inland => "Inland",
            Territory::NorthCentralValley => "North Central Valley",
            Territory::SouthCentralValley => "South Central Valley",
        }
    }
}

impl fmt::Display for Territory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Territory {
    type Err = FusionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();

        match normalized.as_str() {
            "coastal" => Ok(Territory::Coastal),
            "inland" => Ok(Territory::Inland),
            "northcentralvalley" => Ok(Territory::NorthCentralValley),
            "southcentralvalley" => Ok(Territory::SouthCentralValley),
            _ => Err(FusionError::UnknownTerritory {
                label: s.to_string(),
            }),
        }
    }
}

/// Raw climate-zone polygon as delivered by the geometry loader.
#[derive(Debug, Clone)]
pub struct ClimateZone {
    pub agency_zone_id: i64,
    pub polygon: MultiPolygon<f64>,
}

/// Climate-zone polygon after territory classification.
#[derive(Debug, Clone)]
pub struct ZoneRecord {
    pub agency_zone_id: i64,
    pub territory: Territory,
    pub polygon: MultiPolygon<f64>,
}

#[derive(Debug, Clone)]
pub struct ZipRecord {
    pub zip_code: String,
    pub population: u64,
    pub area_sqmi: f64,
    pub representative_point: Point<f64>,
}

impl ZipRecord {
    /// Builds a record, zero-padding numeric ZIP codes ("2108" -> "02108").
    pub fn new(
        zip_code: &str,
        population: u64,
        area_sqmi: f64,
        representative_point: Point<f64>,
    ) -> Result<Self, FusionError> {
        let zip_code = normalize_zip_code(zip_code)?;
        if !area_sqmi.is_finite() || area_sqmi <= 0.0 {
            return Err(FusionError::InvalidZipAttributes {
                zip_code,
                reason: format!("area_sqmi must be positive, got {}", area_sqmi),
            });
        }

        Ok(Self {
            zip_code,
            population,
            area_sqmi,
            representative_point,
        })
    }
}

/// Normalizes a ZIP code to its 5-digit zero-padded form.
pub fn normalize_zip_code(raw: &str) -> Result<String, FusionError> {
    let trimmed = raw.trim();
    // Numeric ZIP columns sometimes come back from CSV inference as floats
    let digits = trimmed.strip_suffix(".0").unwrap_or(trimmed);

    if digits.is_empty() || digits.len() > 5 || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(FusionError::InvalidZipCode {
            value: raw.to_string(),
        });
    }

    Ok(format!("{:0>5}", digits))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SolarSegment {
    NoSolar,
    Solar,
    Other,
}

impl SolarSegment {
    pub fn from_code(code: &str) -> Self {
        match code.trim().to_ascii_uppercase().as_str() {
            "NS" => SolarSegment::NoSolar,
            "S" | "PV" => SolarSegment::Solar,
            _ => SolarSegment::Other,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CustomerClass {
    Residential,
    NonResidential,
}

impl CustomerClass {
    pub fn label(&self) -> &'static str {
        match self {
            CustomerClass::Residential => "residential",
            CustomerClass::NonResidential => "nonresidential",
        }
    }
}

/// One row of the unioned CALMAC characteristics catalog.
///
/// `territory` comes only from the explicit `seg_cz` field; the profile
/// identifier is an opaque join key and is never parsed.
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileCatalogEntry {
    pub profile_id: String,
    pub territory: Territory,
    pub size_segment: Option<i64>,
    pub season_segment: Option<i64>,
    pub solar_segment: Option<SolarSegment>,
    pub premise_count: Option<i64>,
    pub customer_class: CustomerClass,
}

impl ProfileCatalogEntry {
    pub fn new(profile_id: &str, territory: Territory, customer_class: CustomerClass) -> Self {
        Self {
            profile_id: profile_id.to_string(),
            territory,
            size_segment: None,
            season_segment: None,
            solar_segment: None,
            premise_count: None,
            customer_class,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ZipTerritoryAssignment {
    pub zip_code: String,
    pub territory: Territory,
    pub agency_zone_id: i64,
}

/// "zips_final": one row per assigned ZIP with its applicable profile list.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ZipWithProfiles {
    pub zip_code: String,
    pub population: u64,
    pub area_sqmi: f64,
    pub territory: Territory,
    pub agency_zone_id: i64,
    pub profile_ids: Vec<String>,
}

/// "zips_expanded": one row per (ZIP, profile) pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ExpandedRow {
    pub zip_code: String,
    pub profile_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HourlyRecord {
    pub profile_id: String,
    pub date: NaiveDate,
    pub hour: u8,
    pub kwh: f64,
}

/// Final "zips_with_loads" row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FusedRow {
    pub zip_code: String,
    pub profile_id: String,
    pub date: NaiveDate,
    pub hour: u8,
    pub kwh: f64,
}

/// Mean kWh of one profile for one (month, hour) cell of the season.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonthHourLoad {
    pub profile_id: String,
    pub month: u32,
    pub hour: u8,
    pub kwh: f64,
    pub samples: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ZipMonthHourRow {
    pub zip_code: String,
    pub profile_id: String,
    pub month: u32,
    pub hour: u8,
    pub kwh: f64,
}

#[derive(Debug, Clone)]
pub struct FeederRecord {
    pub feeder_id: String,
    pub representative_point: Point<f64>,
}

#[derive(Debug, Clone)]
pub struct ZipBoundary {
    pub zip_code: String,
    pub polygon: MultiPolygon<f64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeederZip {
    pub feeder_id: String,
    pub zip_code: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zip_code_normalization() {
        assert_eq!(normalize_zip_code("90210").unwrap(), "90210");
        assert_eq!(normalize_zip_code("2108").unwrap(), "02108");
        assert_eq!(normalize_zip_code(" 94102.0 ").unwrap(), "94102");
        assert!(normalize_zip_code("9021A").is_err());
        assert!(normalize_zip_code("902100").is_err());
        assert!(normalize_zip_code("").is_err());
    }

    #[test]
    fn test_territory_labels_round_trip() {
        for territory in Territory::ALL {
            assert_eq!(territory.label().parse::<Territory>().unwrap(), territory);
        }
        assert_eq!(
            "north_central_valley".parse::<Territory>().unwrap(),
            Territory::NorthCentralValley
        );
        assert!("Desert".parse::<Territory>().is_err());
    }

    #[test]
    fn test_zip_record_rejects_non_positive_area() {
        let point = Point::new(-118.4, 34.07);
        assert!(ZipRecord::new("90210", 10_234, 0.0, point).is_err());
        assert!(ZipRecord::new("90210", 10_234, 5.3, point).is_ok());
    }
}
