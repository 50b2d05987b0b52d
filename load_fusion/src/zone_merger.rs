use crate::models::{ZipRecord, ZipTerritoryAssignment, ZipWithProfiles};
use crate::profile_aggregator::ProfilesByTerritory;
use std::collections::HashMap;

pub struct ZoneMerger;

impl ZoneMerger {
    /// Left join of assigned ZIPs onto the territory profile lists.
    ///
    /// ZIPs without an assignment are dropped (they were reported by the
    /// attributor). A territory with no profiles yields an empty list, not a
    /// dropped row.
    pub fn merge(
        zips: &[ZipRecord],
        assignments: &[ZipTerritoryAssignment],
        profiles: &ProfilesByTerritory,
    ) -> Vec<ZipWithProfiles> {
        let by_zip: HashMap<&str, &ZipTerritoryAssignment> = assignments
            .iter()
            .map(|a| (a.zip_code.as_str(), a))
            .collect();

        let merged: Vec<ZipWithProfiles> = zips
            .iter()
            .filter_map(|zip| {
                let assignment = by_zip.get(zip.zip_code.as_str())?;
                Some(ZipWithProfiles {
                    zip_code: zip.zip_code.clone(),
                    population: zip.population,
                    area_sqmi: zip.area_sqmi,
                    territory: assignment.territory,
                    agency_zone_id: assignment.agency_zone_id,
                    profile_ids: profiles.profiles_for(assignment.territory).to_vec(),
                })
            })
            .collect();

        let empty = merged.iter().filter(|z| z.profile_ids.is_empty()).count();
        log::info!("Merged {} ZIPs with territory profile lists", merged.len());
        if empty > 0 {
            log::warn!("{} ZIPs have no load profiles for their territory", empty);
        }

        merged
    }
}
