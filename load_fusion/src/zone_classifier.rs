use crate::error::{FusionError, Result};
use crate::models::{ClimateZone, Territory, ZoneRecord};
use std::collections::BTreeMap;
use std::sync::LazyLock;

/// CEC building climate zone -> CALMAC territory, from the CALMAC data description.
const ZONE_TERRITORIES: [(i64, Territory); 8] = [
    (1, Territory::Coastal),
    (3, Territory::Coastal),
    (5, Territory::Coastal),
    (2, Territory::Inland),
    (4, Territory::Inland),
    (11, Territory::NorthCentralValley),
    (12, Territory::NorthCentralValley),
    (13, Territory::SouthCentralValley),
];

static TERRITORY_LOOKUP: LazyLock<BTreeMap<i64, Territory>> =
    LazyLock::new(|| ZONE_TERRITORIES.iter().copied().collect());

pub struct ZoneClassifier;

impl ZoneClassifier {
    /// Territory for a single agency zone id.
    pub fn territory_for(agency_zone_id: i64) -> Result<Territory> {
        TERRITORY_LOOKUP
            .get(&agency_zone_id)
            .copied()
            .ok_or(FusionError::UnmappedZone { agency_zone_id })
    }

    /// Zone ids known to the mapping, ascending.
    pub fn known_zone_ids() -> Vec<i64> {
        TERRITORY_LOOKUP.keys().copied().collect()
    }

    /// Classifies every zone, failing on the first unmapped id.
    ///
    /// Input order is preserved; the spatial attributor relies on it only
    /// as a secondary tie-break.
    pub fn classify(zones: Vec<ClimateZone>) -> Result<Vec<ZoneRecord>> {
        let classified = zones
            .into_iter()
            .map(|zone| {
                let territory = Self::territory_for(zone.agency_zone_id)?;
                Ok(ZoneRecord {
                    agency_zone_id: zone.agency_zone_id,
                    territory,
                    polygon: zone.polygon,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        log::info!("Classified {} climate zones", classified.len());
        Ok(classified)
    }
}
