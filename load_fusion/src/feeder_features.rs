use crate::models::{
    ExpandedRow, FeederRecord, FeederZip, MonthHourLoad, ZipBoundary, ZipWithProfiles,
};
use crate::spatial_attributor::PolygonIndex;
use polars::prelude::*;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

#[derive(Debug, Clone, Default)]
pub struct FeederMapping {
    pub pairs: Vec<FeederZip>,
    pub unmapped_feeders: Vec<String>,
    pub duplicate_feeders: usize,
}

/// Locates each feeder's representative point in the ZIP polygons of
/// territory-assigned ZIPs. One ZIP per feeder; a repeated feeder id keeps
/// its first occurrence.
pub fn map_feeders_to_zips(
    feeders: &[FeederRecord],
    boundaries: &[ZipBoundary],
    zips_final: &[ZipWithProfiles],
) -> FeederMapping {
    let assigned: HashSet<&str> = zips_final.iter().map(|z| z.zip_code.as_str()).collect();

    let mut index = PolygonIndex::new();
    for boundary in boundaries {
        if assigned.contains(boundary.zip_code.as_str()) {
            index.insert(boundary.zip_code.clone(), boundary.polygon.clone());
        }
    }

    let mut mapping = FeederMapping::default();
    let mut seen = HashSet::new();
    for feeder in feeders {
        if !seen.insert(feeder.feeder_id.as_str()) {
            mapping.duplicate_feeders += 1;
            continue;
        }
        match index.locate(&feeder.representative_point) {
            Some(location) => mapping.pairs.push(FeederZip {
                feeder_id: feeder.feeder_id.clone(),
                zip_code: location.key,
            }),
            None => mapping.unmapped_feeders.push(feeder.feeder_id.clone()),
        }
    }

    log::info!(
        "Unique feeders mapped: {} ({} without a ZIP)",
        mapping.pairs.len(),
        mapping.unmapped_feeders.len()
    );
    mapping
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeederFeatureRow {
    pub feeder_id: String,
    pub zip_code: String,
    pub month: u32,
    pub hour: u8,
    /// One value per entry of [`FeederFeatureTable::profile_ids`].
    pub kwh: Vec<f64>,
}

/// Feeder x month-hour matrix with one kWh column per load profile.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeederFeatureTable {
    pub profile_ids: Vec<String>,
    pub rows: Vec<FeederFeatureRow>,
}

impl FeederFeatureTable {
    pub fn column_name(profile_id: &str) -> String {
        format!("kwh_{}", profile_id)
    }

    pub fn to_frame(&self) -> PolarsResult<DataFrame> {
        let mut columns = vec![
            Series::new(
                "feeder_id".into(),
                self.rows.iter().map(|r| r.feeder_id.as_str()).collect::<Vec<_>>(),
            ),
            Series::new(
                "month".into(),
                self.rows.iter().map(|r| r.month as i32).collect::<Vec<_>>(),
            ),
            Series::new(
                "hour".into(),
                self.rows.iter().map(|r| i32::from(r.hour)).collect::<Vec<_>>(),
            ),
        ];
        for (idx, profile_id) in self.profile_ids.iter().enumerate() {
            columns.push(Series::new(
                Self::column_name(profile_id).as_str().into(),
                self.rows.iter().map(|r| r.kwh[idx]).collect::<Vec<_>>(),
            ));
        }
        columns.push(Series::new(
            "zip_code".into(),
            self.rows.iter().map(|r| r.zip_code.as_str()).collect::<Vec<_>>(),
        ));
        DataFrame::new(columns)
    }
}

/// Pivots month-hour loads to one row per (feeder, month, hour).
///
/// Profiles present for a feeder contribute their mean kWh; profiles absent
/// for that feeder are filled with 0.0. Feeders whose profiles have no
/// loads produce no rows.
pub fn build_feeder_features(
    feeder_zips: &[FeederZip],
    expanded: &[ExpandedRow],
    loads: &[MonthHourLoad],
) -> FeederFeatureTable {
    let feeders_by_zip: HashMap<&str, Vec<&str>> =
        feeder_zips.iter().fold(HashMap::new(), |mut acc, pair| {
            acc.entry(pair.zip_code.as_str())
                .or_insert_with(Vec::new)
                .push(pair.feeder_id.as_str());
            acc
        });

    let feeder_profiles: BTreeSet<(&str, &str)> = expanded
        .iter()
        .filter_map(|row| {
            feeders_by_zip
                .get(row.zip_code.as_str())
                .map(|feeders| (feeders, row.profile_id.as_str()))
        })
        .flat_map(|(feeders, profile_id)| feeders.iter().map(move |f| (*f, profile_id)))
        .collect();
    log::info!("Feeder-profile pairs: {}", feeder_profiles.len());

    let mut loads_by_profile: HashMap<&str, Vec<&MonthHourLoad>> = HashMap::new();
    for load in loads {
        loads_by_profile
            .entry(load.profile_id.as_str())
            .or_default()
            .push(load);
    }

    // (feeder, month, hour) -> profile -> (sum, count)
    let mut cells: BTreeMap<(&str, u32, u8), BTreeMap<&str, (f64, usize)>> = BTreeMap::new();
    let mut profile_columns: BTreeSet<&str> = BTreeSet::new();
    for &(feeder_id, profile_id) in &feeder_profiles {
        let Some(profile_loads) = loads_by_profile.get(profile_id) else {
            continue;
        };
        profile_columns.insert(profile_id);
        for load in profile_loads {
            let cell = cells
                .entry((feeder_id, load.month, load.hour))
                .or_default()
                .entry(profile_id)
                .or_insert((0.0, 0));
            cell.0 += load.kwh;
            cell.1 += 1;
        }
    }

    let zip_by_feeder: HashMap<&str, &str> = feeder_zips
        .iter()
        .map(|p| (p.feeder_id.as_str(), p.zip_code.as_str()))
        .collect();
    let profile_ids: Vec<String> = profile_columns.iter().map(|p| p.to_string()).collect();

    let rows: Vec<FeederFeatureRow> = cells
        .into_iter()
        .map(|((feeder_id, month, hour), values)| FeederFeatureRow {
            feeder_id: feeder_id.to_string(),
            zip_code: zip_by_feeder
                .get(feeder_id)
                .map(|z| z.to_string())
                .unwrap_or_default(),
            month,
            hour,
            kwh: profile_columns
                .iter()
                .map(|p| {
                    values
                        .get(p)
                        .map(|(sum, count)| sum / *count as f64)
                        .unwrap_or(0.0)
                })
                .collect(),
        })
        .collect();

    log::info!(
        "Feeder-wide feature rows: {} and {} profile columns",
        rows.len(),
        profile_ids.len()
    );

    FeederFeatureTable { profile_ids, rows }
}
