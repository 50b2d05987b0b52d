use crate::error::{FusionError, Result};
use crate::models::{ProfileCatalogEntry, Territory};
use std::collections::{BTreeMap, BTreeSet, HashSet};

/// Territory -> profile ids, each list in catalog order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProfilesByTerritory {
    groups: BTreeMap<Territory, Vec<String>>,
}

impl ProfilesByTerritory {
    /// Profiles valid in `territory`; empty when the catalog has none.
    pub fn profiles_for(&self, territory: Territory) -> &[String] {
        self.groups
            .get(&territory)
            .map(|ids| ids.as_slice())
            .unwrap_or(&[])
    }

    pub fn territories(&self) -> impl Iterator<Item = (&Territory, &Vec<String>)> {
        self.groups.iter()
    }

    pub fn total_profiles(&self) -> usize {
        self.groups.values().map(|ids| ids.len()).sum()
    }

    pub fn contains(&self, territory: Territory, profile_id: &str) -> bool {
        self.profiles_for(territory).iter().any(|id| id == profile_id)
    }
}

pub struct ProfileAggregator;

impl ProfileAggregator {
    /// Groups the unioned residential + non-residential catalog by territory.
    ///
    /// Every repeated profile id is collected before failing, so a single
    /// `DuplicateProfile` error names all offenders.
    pub fn aggregate(catalog: &[ProfileCatalogEntry]) -> Result<ProfilesByTerritory> {
        let mut seen: HashSet<&str> = HashSet::with_capacity(catalog.len());
        let mut duplicates = BTreeSet::new();
        let mut groups: BTreeMap<Territory, Vec<String>> = BTreeMap::new();

        for entry in catalog {
            if !seen.insert(entry.profile_id.as_str()) {
                duplicates.insert(entry.profile_id.clone());
                continue;
            }
            groups
                .entry(entry.territory)
                .or_default()
                .push(entry.profile_id.clone());
        }

        if !duplicates.is_empty() {
            return Err(FusionError::DuplicateProfile {
                profile_ids: duplicates,
            });
        }

        for (territory, ids) in &groups {
            log::info!("{}: {} load profiles", territory, ids.len());
        }
        for territory in Territory::ALL {
            if !groups.contains_key(&territory) {
                log::warn!("Catalog has no load profiles for {}", territory);
            }
        }

        Ok(ProfilesByTerritory { groups })
    }
}
