//! Conversions between pipeline rows and polars frames.

use crate::models::{
    ExpandedRow, FeederZip, FusedRow, MonthHourLoad, ZipMonthHourRow, ZipWithProfiles,
};
use chrono::NaiveDate;
use polars::prelude::*;

/// Separator used when a list column has to be flattened for CSV output.
pub const LIST_SEPARATOR: &str = ";";

pub trait FrameRows: Sized {
    fn to_frame(rows: &[Self]) -> PolarsResult<DataFrame>;
}

/// `NaiveDate::default()` is 1970-01-01, the epoch of the polars `Date` type.
pub(crate) fn days_since_epoch(date: NaiveDate) -> i32 {
    date.signed_duration_since(NaiveDate::default()).num_days() as i32
}

pub(crate) fn date_from_epoch_days(days: i32) -> NaiveDate {
    NaiveDate::default() + chrono::Duration::days(i64::from(days))
}

fn date_series(name: &str, dates: impl Iterator<Item = NaiveDate>) -> PolarsResult<Series> {
    let days: Vec<i32> = dates.map(days_since_epoch).collect();
    Series::new(name.into(), days).cast(&DataType::Date)
}

impl FrameRows for FusedRow {
    fn to_frame(rows: &[Self]) -> PolarsResult<DataFrame> {
        DataFrame::new(vec![
            Series::new(
                "zip_code".into(),
                rows.iter().map(|r| r.zip_code.as_str()).collect::<Vec<_>>(),
            ),
            Series::new(
                "profile_id".into(),
                rows.iter().map(|r| r.profile_id.as_str()).collect::<Vec<_>>(),
            ),
            date_series("date", rows.iter().map(|r| r.date))?,
            Series::new(
                "hour".into(),
                rows.iter().map(|r| i32::from(r.hour)).collect::<Vec<_>>(),
            ),
            Series::new("kwh".into(), rows.iter().map(|r| r.kwh).collect::<Vec<_>>()),
        ])
    }
}

impl FrameRows for ZipMonthHourRow {
    fn to_frame(rows: &[Self]) -> PolarsResult<DataFrame> {
        DataFrame::new(vec![
            Series::new(
                "zip_code".into(),
                rows.iter().map(|r| r.zip_code.as_str()).collect::<Vec<_>>(),
            ),
            Series::new(
                "profile_id".into(),
                rows.iter().map(|r| r.profile_id.as_str()).collect::<Vec<_>>(),
            ),
            Series::new(
                "month".into(),
                rows.iter().map(|r| r.month as i32).collect::<Vec<_>>(),
            ),
            Series::new(
                "hour".into(),
                rows.iter().map(|r| i32::from(r.hour)).collect::<Vec<_>>(),
            ),
            Series::new("kwh".into(), rows.iter().map(|r| r.kwh).collect::<Vec<_>>()),
        ])
    }
}

impl FrameRows for MonthHourLoad {
    fn to_frame(rows: &[Self]) -> PolarsResult<DataFrame> {
        DataFrame::new(vec![
            Series::new(
                "profile_id".into(),
                rows.iter().map(|r| r.profile_id.as_str()).collect::<Vec<_>>(),
            ),
            Series::new(
                "month".into(),
                rows.iter().map(|r| r.month as i32).collect::<Vec<_>>(),
            ),
            Series::new(
                "hour".into(),
                rows.iter().map(|r| i32::from(r.hour)).collect::<Vec<_>>(),
            ),
            Series::new("kwh".into(), rows.iter().map(|r| r.kwh).collect::<Vec<_>>()),
            Series::new(
                "samples".into(),
                rows.iter().map(|r| r.samples as u32).collect::<Vec<_>>(),
            ),
        ])
    }
}

impl FrameRows for ExpandedRow {
    fn to_frame(rows: &[Self]) -> PolarsResult<DataFrame> {
        DataFrame::new(vec![
            Series::new(
                "zip_code".into(),
                rows.iter().map(|r| r.zip_code.as_str()).collect::<Vec<_>>(),
            ),
            Series::new(
                "profile_id".into(),
                rows.iter().map(|r| r.profile_id.as_str()).collect::<Vec<_>>(),
            ),
        ])
    }
}

impl FrameRows for FeederZip {
    fn to_frame(rows: &[Self]) -> PolarsResult<DataFrame> {
        DataFrame::new(vec![
            Series::new(
                "feeder_id".into(),
                rows.iter().map(|r| r.feeder_id.as_str()).collect::<Vec<_>>(),
            ),
            Series::new(
                "zip_code".into(),
                rows.iter().map(|r| r.zip_code.as_str()).collect::<Vec<_>>(),
            ),
        ])
    }
}

fn zip_attribute_columns(rows: &[ZipWithProfiles]) -> Vec<Series> {
    vec![
        Series::new(
            "zip_code".into(),
            rows.iter().map(|r| r.zip_code.as_str()).collect::<Vec<_>>(),
        ),
        Series::new(
            "population".into(),
            rows.iter().map(|r| r.population).collect::<Vec<_>>(),
        ),
        Series::new(
            "area_sqmi".into(),
            rows.iter().map(|r| r.area_sqmi).collect::<Vec<_>>(),
        ),
        Series::new(
            "territory".into(),
            rows.iter().map(|r| r.territory.label()).collect::<Vec<_>>(),
        ),
        Series::new(
            "agency_zone_id".into(),
            rows.iter().map(|r| r.agency_zone_id).collect::<Vec<_>>(),
        ),
    ]
}

/// `profile_ids` as a native list column (Parquet/IPC).
impl FrameRows for ZipWithProfiles {
    fn to_frame(rows: &[Self]) -> PolarsResult<DataFrame> {
        let lists: Vec<Series> = rows
            .iter()
            .map(|r| Series::new("".into(), r.profile_ids.as_slice()))
            .collect();

        let mut columns = zip_attribute_columns(rows);
        let profile_ids = if lists.is_empty() {
            Series::new_empty("profile_ids".into(), &DataType::List(Box::new(DataType::String)))
        } else {
            Series::new("profile_ids".into(), lists)
        };
        columns.push(profile_ids);
        DataFrame::new(columns)
    }
}

/// `profile_ids` joined with [`LIST_SEPARATOR`], for CSV which has no list type.
pub fn zips_final_flat_frame(rows: &[ZipWithProfiles]) -> PolarsResult<DataFrame> {
    let mut columns = zip_attribute_columns(rows);
    columns.push(Series::new(
        "profile_ids".into(),
        rows.iter()
            .map(|r| r.profile_ids.join(LIST_SEPARATOR))
            .collect::<Vec<_>>(),
    ));
    DataFrame::new(columns)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Territory;

    #[test]
    fn test_fused_frame_has_date_dtype() {
        let rows = vec![FusedRow {
            zip_code: "90210".to_string(),
            profile_id: "1_1_NS_C".to_string(),
            date: NaiveDate::from_ymd_opt(2024, 4, 1).unwrap(),
            hour: 5,
            kwh: 0.16,
        }];

        let df = FusedRow::to_frame(&rows).unwrap();
        assert_eq!(df.shape(), (1, 5));
        assert_eq!(df.column("date").unwrap().dtype(), &DataType::Date);
        assert_eq!(df.column("hour").unwrap().i32().unwrap().get(0), Some(5));
    }

    #[test]
    fn test_zips_final_list_and_flat_forms() {
        let rows = vec![
            ZipWithProfiles {
                zip_code: "90210".to_string(),
                population: 10_234,
                area_sqmi: 5.1,
                territory: Territory::Coastal,
                agency_zone_id: 3,
                profile_ids: vec!["1_1_NS_C".to_string(), "2_1_NS_C".to_string()],
            },
            ZipWithProfiles {
                zip_code: "93301".to_string(),
                population: 500,
                area_sqmi: 1.0,
                territory: Territory::SouthCentralValley,
                agency_zone_id: 13,
                profile_ids: vec![],
            },
        ];

        let listed = ZipWithProfiles::to_frame(&rows).unwrap();
        assert!(matches!(
            listed.column("profile_ids").unwrap().dtype(),
            DataType::List(_)
        ));

        let flat = zips_final_flat_frame(&rows).unwrap();
        let ids = flat.column("profile_ids").unwrap().str().unwrap();
        assert_eq!(ids.get(0), Some("1_1_NS_C;2_1_NS_C"));
        assert_eq!(ids.get(1), Some(""));
    }

    #[test]
    fn test_empty_batches_still_have_schema() {
        let df = FusedRow::to_frame(&[]).unwrap();
        assert_eq!(df.height(), 0);
        assert_eq!(df.width(), 5);
    }
}
