use crate::models::{HourlyRecord, MonthHourLoad};
use chrono::Datelike;
use std::collections::{BTreeMap, BTreeSet};

/// May through October, the congestion season used for feeder features.
pub const DEFAULT_SEASON_MONTHS: [u32; 6] = [5, 6, 7, 8, 9, 10];

/// Mean kWh per (profile, month, hour) over the given months.
///
/// Output is ordered by profile id, then month, then hour, so it can be fed
/// straight into the streaming fuser.
pub fn aggregate_month_hour(
    records: &[HourlyRecord],
    season_months: &[u32],
) -> Vec<MonthHourLoad> {
    let mut cells: BTreeMap<(&str, u32, u8), (f64, usize)> = BTreeMap::new();

    for record in records {
        let month = record.date.month();
        if !season_months.contains(&month) {
            continue;
        }
        let cell = cells
            .entry((record.profile_id.as_str(), month, record.hour))
            .or_insert((0.0, 0));
        cell.0 += record.kwh;
        cell.1 += 1;
    }

    let loads: Vec<MonthHourLoad> = cells
        .into_iter()
        .map(|((profile_id, month, hour), (sum, samples))| MonthHourLoad {
            profile_id: profile_id.to_string(),
            month,
            hour,
            kwh: sum / samples as f64,
            samples,
        })
        .collect();

    log::info!(
        "Aggregated {} hourly records to {} month-hour cells",
        records.len(),
        loads.len()
    );
    loads
}

/// Hourly records dropped by the season filter.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SeasonCoverage {
    pub out_of_season_records: u64,
    /// Profiles with hourly data, none of it inside the season.
    pub profiles_out_of_season: BTreeSet<String>,
}

pub fn season_coverage(records: &[HourlyRecord], season_months: &[u32]) -> SeasonCoverage {
    let mut in_season: BTreeSet<&str> = BTreeSet::new();
    let mut outside: BTreeSet<&str> = BTreeSet::new();
    let mut out_of_season_records = 0;

    for record in records {
        if season_months.contains(&record.date.month()) {
            in_season.insert(record.profile_id.as_str());
        } else {
            out_of_season_records += 1;
            outside.insert(record.profile_id.as_str());
        }
    }

    SeasonCoverage {
        out_of_season_records,
        profiles_out_of_season: outside
            .difference(&in_season)
            .map(|id| id.to_string())
            .collect(),
    }
}
