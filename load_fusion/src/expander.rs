use crate::models::{ExpandedRow, ZipWithProfiles};

pub struct Expander;

impl Expander {
    /// Unnests `profile_ids` into one row per (ZIP, profile).
    ///
    /// ZIPs with an empty list contribute zero rows.
    pub fn expand(zips: &[ZipWithProfiles]) -> Vec<ExpandedRow> {
        let total: usize = zips.iter().map(|z| z.profile_ids.len()).sum();
        let mut rows = Vec::with_capacity(total);

        for zip in zips {
            for profile_id in &zip.profile_ids {
                rows.push(ExpandedRow {
                    zip_code: zip.zip_code.clone(),
                    profile_id: profile_id.clone(),
                });
            }
        }

        log::info!("ZIP-profile pairs: {}", rows.len());
        rows
    }
}
