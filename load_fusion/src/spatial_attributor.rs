use crate::error::{FusionError, Result};
use crate::models::{ZipRecord, ZipTerritoryAssignment, ZoneRecord};
use geo::{BoundingRect, Contains, Intersects, MultiPolygon, Point, Rect};
use rayon::prelude::*;
use std::collections::HashSet;

/// How a located point relates to the polygon that won it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Containment {
    Interior,
    Boundary,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location<K> {
    pub key: K,
    pub position: usize,
    pub containment: Containment,
    /// Number of polygons that matched the point (> 1 means overlap).
    pub candidates: usize,
}

struct IndexedPolygon<K> {
    key: K,
    polygon: MultiPolygon<f64>,
    bbox: Option<Rect<f64>>,
}

/// Point-in-polygon index with a deterministic tie-break.
///
/// A point matches every polygon whose closure contains it (interior or
/// boundary). When several match, the smallest key wins, then the earliest
/// insertion position.
pub struct PolygonIndex<K> {
    entries: Vec<IndexedPolygon<K>>,
}

impl<K: Ord + Clone> PolygonIndex<K> {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    pub fn insert(&mut self, key: K, polygon: MultiPolygon<f64>) {
        let bbox = polygon.bounding_rect();
        self.entries.push(IndexedPolygon { key, polygon, bbox });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn locate(&self, point: &Point<f64>) -> Option<Location<K>> {
        let mut best: Option<Location<K>> = None;
        let mut candidates = 0;

        for (position, entry) in self.entries.iter().enumerate() {
            let in_bbox = entry.bbox.map(|rect| rect.intersects(point)).unwrap_or(false);
            if !in_bbox || !entry.polygon.intersects(point) {
                continue;
            }
            candidates += 1;

            let replace = match &best {
                None => true,
                Some(current) => entry.key < current.key,
            };
            if replace {
                let containment = if entry.polygon.contains(point) {
                    Containment::Interior
                } else {
                    Containment::Boundary
                };
                best = Some(Location {
                    key: entry.key.clone(),
                    position,
                    containment,
                    candidates: 0,
                });
            }
        }

        best.map(|mut location| {
            location.candidates = candidates;
            location
        })
    }
}

impl<K: Ord + Clone> Default for PolygonIndex<K> {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Default)]
pub struct AttributionResult {
    /// One assignment per located ZIP, in input ZIP order.
    pub assignments: Vec<ZipTerritoryAssignment>,
    /// ZIPs whose representative point fell in no zone, in input order.
    pub unassigned: Vec<String>,
    pub boundary_hits: usize,
    pub overlap_hits: usize,
}

pub struct SpatialAttributor {
    index: PolygonIndex<i64>,
    zones: Vec<ZoneRecord>,
}

impl SpatialAttributor {
    /// Ties between overlapping zones go to the lowest agency zone id, then to
    /// the zone listed first.
    pub fn new(zones: Vec<ZoneRecord>) -> Self {
        let mut index = PolygonIndex::new();
        for zone in &zones {
            index.insert(zone.agency_zone_id, zone.polygon.clone());
        }
        Self { index, zones }
    }

    pub fn zone_count(&self) -> usize {
        self.zones.len()
    }

    pub fn attribute(&self, zips: &[ZipRecord]) -> Result<AttributionResult> {
        let mut seen = HashSet::with_capacity(zips.len());
        for zip in zips {
            if !seen.insert(zip.zip_code.as_str()) {
                return Err(FusionError::DuplicateZip {
                    zip_code: zip.zip_code.clone(),
                });
            }
        }

        let located: Vec<Option<Location<i64>>> = zips
            .par_iter()
            .map(|zip| self.index.locate(&zip.representative_point))
            .collect();

        let mut result = AttributionResult::default();
        for (zip, location) in zips.iter().zip(located) {
            match location {
                Some(location) => {
                    if location.containment == Containment::Boundary {
                        result.boundary_hits += 1;
                    }
                    if location.candidates > 1 {
                        result.overlap_hits += 1;
                    }
                    let zone = &self.zones[location.position];
                    result.assignments.push(ZipTerritoryAssignment {
                        zip_code: zip.zip_code.clone(),
                        territory: zone.territory,
                        agency_zone_id: zone.agency_zone_id,
                    });
                }
                None => result.unassigned.push(zip.zip_code.clone()),
            }
        }

        log::info!(
            "Assigned {} of {} ZIPs to territories ({} unassigned, {} on zone boundaries, {} in overlapping zones)",
            result.assignments.len(),
            zips.len(),
            result.unassigned.len(),
            result.boundary_hits,
            result.overlap_hits
        );
        if !result.unassigned.is_empty() {
            log::warn!(
                "{} ZIPs have no containing climate zone and are excluded",
                result.unassigned.len()
            );
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Territory;
    use geo::{polygon, MultiPolygon};

    fn square(x0: f64, y0: f64, size: f64) -> MultiPolygon<f64> {
        MultiPolygon::new(vec![polygon![
            (x: x0, y: y0),
            (x: x0 + size, y: y0),
            (x: x0 + size, y: y0 + size),
            (x: x0, y: y0 + size),
            (x: x0, y: y0),
        ]])
    }

    fn zone(id: i64, territory: Territory, polygon: MultiPolygon<f64>) -> ZoneRecord {
        ZoneRecord {
            agency_zone_id: id,
            territory,
            polygon,
        }
    }

    fn zip(code: &str, x: f64, y: f64) -> ZipRecord {
        ZipRecord::new(code, 1_000, 2.5, Point::new(x, y)).unwrap()
    }

    #[test]
    fn test_interior_point_gets_its_zone() {
        let attributor = SpatialAttributor::new(vec![
            zone(1, Territory::Coastal, square(0.0, 0.0, 10.0)),
            zone(2, Territory::Inland, square(10.0, 0.0, 10.0)),
        ]);

        let result = attributor
            .attribute(&[zip("90210", 5.0, 5.0), zip("90212", 15.0, 5.0)])
            .unwrap();

        assert_eq!(result.assignments.len(), 2);
        assert_eq!(result.assignments[0].territory, Territory::Coastal);
        assert_eq!(result.assignments[1].territory, Territory::Inland);
        assert!(result.unassigned.is_empty());
        assert_eq!(result.boundary_hits, 0);
    }

    #[test]
    fn test_point_outside_all_zones_is_unassigned() {
        let attributor =
            SpatialAttributor::new(vec![zone(1, Territory::Coastal, square(0.0, 0.0, 10.0))]);

        let result = attributor
            .attribute(&[zip("90210", 5.0, 5.0), zip("96161", 50.0, 50.0)])
            .unwrap();

        assert_eq!(result.assignments.len(), 1);
        assert_eq!(result.unassigned, vec!["96161".to_string()]);
    }

    #[test]
    fn test_shared_boundary_goes_to_lowest_zone_id() {
        // Zone 4 listed first, zone 2 second; the edge at x=10 belongs to both.
        let attributor = SpatialAttributor::new(vec![
            zone(4, Territory::Inland, square(10.0, 0.0, 10.0)),
            zone(2, Territory::Inland, square(0.0, 0.0, 10.0)),
            zone(13, Territory::SouthCentralValley, square(20.0, 0.0, 10.0)),
        ]);

        let result = attributor.attribute(&[zip("93301", 10.0, 5.0)]).unwrap();

        assert_eq!(result.assignments[0].agency_zone_id, 2);
        assert_eq!(result.boundary_hits, 1);
        assert_eq!(result.overlap_hits, 1);
    }

    #[test]
    fn test_overlapping_zones_resolve_independent_of_input_order() {
        let forward = SpatialAttributor::new(vec![
            zone(3, Territory::Coastal, square(0.0, 0.0, 10.0)),
            zone(12, Territory::NorthCentralValley, square(5.0, 5.0, 10.0)),
        ]);
        let reversed = SpatialAttributor::new(vec![
            zone(12, Territory::NorthCentralValley, square(5.0, 5.0, 10.0)),
            zone(3, Territory::Coastal, square(0.0, 0.0, 10.0)),
        ]);

        let zips = [zip("95814", 7.0, 7.0)];
        let a = forward.attribute(&zips).unwrap();
        let b = reversed.attribute(&zips).unwrap();

        assert_eq!(a.assignments, b.assignments);
        assert_eq!(a.assignments[0].territory, Territory::Coastal);
        assert_eq!(a.assignments[0].agency_zone_id, 3);
    }

    #[test]
    fn test_duplicate_zip_is_rejected() {
        let attributor =
            SpatialAttributor::new(vec![zone(1, Territory::Coastal, square(0.0, 0.0, 10.0))]);
        let err = attributor
            .attribute(&[zip("90210", 1.0, 1.0), zip("90210", 2.0, 2.0)])
            .unwrap_err();
        assert!(matches!(err, FusionError::DuplicateZip { .. }));
    }

    #[test]
    fn test_polygon_index_with_string_keys() {
        let mut index = PolygonIndex::new();
        index.insert("90211".to_string(), square(0.0, 0.0, 10.0));
        index.insert("90210".to_string(), square(0.0, 0.0, 10.0));

        let location = index.locate(&Point::new(1.0, 1.0)).unwrap();
        assert_eq!(location.key, "90210");
        assert_eq!(location.position, 1);
        assert_eq!(location.containment, Containment::Interior);
        assert!(index.locate(&Point::new(-1.0, -1.0)).is_none());
    }
}
