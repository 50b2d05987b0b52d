use crate::error::{FusionError, Result};
use crate::models::{ExpandedRow, FusedRow, HourlyRecord, MonthHourLoad, ZipMonthHourRow};
use crate::sink::RowSink;
use chrono::NaiveDate;
use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::hash::Hash;

/// A long-format load series row that can be fanned out to ZIPs.
pub trait SeriesRecord: Send + Sync {
    /// Position of the row within its profile's series; unique per profile.
    type Key: Eq + Hash + Send;
    type Output: Send;

    fn profile_id(&self) -> &str;
    fn hour(&self) -> u8;
    fn key(&self) -> Self::Key;
    fn fuse(&self, zip_code: &str) -> Self::Output;
    fn duplicate_error(&self) -> FusionError;
}

impl SeriesRecord for HourlyRecord {
    type Key = (NaiveDate, u8);
    type Output = FusedRow;

    fn profile_id(&self) -> &str {
        &self.profile_id
    }

    fn hour(&self) -> u8 {
        self.hour
    }

    fn key(&self) -> Self::Key {
        (self.date, self.hour)
    }

    fn fuse(&self, zip_code: &str) -> FusedRow {
        FusedRow {
            zip_code: zip_code.to_string(),
            profile_id: self.profile_id.clone(),
            date: self.date,
            hour: self.hour,
            kwh: self.kwh,
        }
    }

    fn duplicate_error(&self) -> FusionError {
        FusionError::DuplicateHourlyKey {
            profile_id: self.profile_id.clone(),
            date: self.date,
            hour: self.hour,
        }
    }
}

impl SeriesRecord for MonthHourLoad {
    type Key = (u32, u8);
    type Output = ZipMonthHourRow;

    fn profile_id(&self) -> &str {
        &self.profile_id
    }

    fn hour(&self) -> u8 {
        self.hour
    }

    fn key(&self) -> Self::Key {
        (self.month, self.hour)
    }

    fn fuse(&self, zip_code: &str) -> ZipMonthHourRow {
        ZipMonthHourRow {
            zip_code: zip_code.to_string(),
            profile_id: self.profile_id.clone(),
            month: self.month,
            hour: self.hour,
            kwh: self.kwh,
        }
    }

    fn duplicate_error(&self) -> FusionError {
        FusionError::Schema {
            message: format!(
                "duplicate month-hour cell for profile {} month {} hour {}",
                self.profile_id, self.month, self.hour
            ),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FusionStats {
    pub fused_rows: u64,
    pub matched_profiles: usize,
    pub orphaned_profile_hours: u64,
    pub orphaned_profile_ids: BTreeSet<String>,
    /// Profiles referenced by at least one ZIP but absent from the series.
    pub profiles_without_series: BTreeSet<String>,
}

/// Result of joining one profile's series against its ZIP fan-out.
#[derive(Debug)]
pub enum PartitionOutcome<O> {
    Fused { profile_id: String, rows: Vec<O> },
    Orphaned { profile_id: String, records: u64 },
}

/// Partitioned inner join of ZIP-profile pairs against a long-format series.
///
/// Work is done one profile at a time, so peak memory follows the planned
/// fan-out (`#zips x #series rows` per profile) held at once, capped by
/// `max_partition_rows`, rather than the total output size.
pub struct HourlyFuser {
    fan_out: BTreeMap<String, Vec<String>>,
    max_partition_rows: u64,
}

impl HourlyFuser {
    pub const DEFAULT_MAX_PARTITION_ROWS: u64 = 50_000_000;

    pub fn new(expanded: &[ExpandedRow]) -> Self {
        let mut fan_out: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for row in expanded {
            fan_out
                .entry(row.profile_id.clone())
                .or_default()
                .push(row.zip_code.clone());
        }

        Self {
            fan_out,
            max_partition_rows: Self::DEFAULT_MAX_PARTITION_ROWS,
        }
    }

    pub fn with_max_partition_rows(mut self, max_partition_rows: u64) -> Self {
        self.max_partition_rows = max_partition_rows;
        self
    }

    /// ZIP codes referencing `profile_id`, in expansion order.
    pub fn fan_out(&self, profile_id: &str) -> &[String] {
        self.fan_out
            .get(profile_id)
            .map(|zips| zips.as_slice())
            .unwrap_or(&[])
    }

    pub fn referenced_profiles(&self) -> impl Iterator<Item = &str> {
        self.fan_out.keys().map(|k| k.as_str())
    }

    /// Joins a single profile's full series against its ZIP fan-out.
    ///
    /// All `records` must belong to `profile_id`.
    pub fn fuse_partition<R: SeriesRecord>(
        &self,
        profile_id: &str,
        records: &[R],
    ) -> Result<PartitionOutcome<R::Output>> {
        let mut keys = HashSet::with_capacity(records.len());
        for record in records {
            if record.profile_id() != profile_id {
                return Err(FusionError::schema(format!(
                    "record for profile {} found in partition {}",
                    record.profile_id(),
                    profile_id
                )));
            }
            if record.hour() > 23 {
                return Err(FusionError::HourOutOfRange {
                    profile_id: profile_id.to_string(),
                    hour: i64::from(record.hour()),
                });
            }
            if !keys.insert(record.key()) {
                return Err(record.duplicate_error());
            }
        }

        let zips = self.fan_out(profile_id);
        if zips.is_empty() {
            return Ok(PartitionOutcome::Orphaned {
                profile_id: profile_id.to_string(),
                records: records.len() as u64,
            });
        }

        let requested_rows = zips.len() as u64 * records.len() as u64;
        let exhausted = || FusionError::ResourceExhausted {
            profile_id: profile_id.to_string(),
            requested_rows,
            limit: self.max_partition_rows,
        };
        if requested_rows > self.max_partition_rows {
            return Err(exhausted());
        }

        let mut rows = Vec::new();
        rows.try_reserve_exact(requested_rows as usize)
            .map_err(|_| exhausted())?;

        for zip_code in zips {
            for record in records {
                rows.push(record.fuse(zip_code));
            }
        }

        Ok(PartitionOutcome::Fused {
            profile_id: profile_id.to_string(),
            rows,
        })
    }

    /// Streams a series grouped by profile id, emitting each partition to
    /// `sink` as soon as it closes.
    ///
    /// Each profile's rows must be contiguous; a profile that reappears after
    /// its partition closed is rejected rather than silently fused twice.
    pub fn fuse_stream<R, I, S>(&self, records: I, sink: &mut S) -> Result<FusionStats>
    where
        R: SeriesRecord,
        I: IntoIterator<Item = R>,
        S: RowSink<R::Output>,
    {
        let mut stats = FusionStats::default();
        let mut closed: HashSet<String> = HashSet::new();
        let mut current: Vec<R> = Vec::new();

        for record in records {
            let same_partition = current
                .first()
                .map(|first| first.profile_id() == record.profile_id())
                .unwrap_or(true);

            if !same_partition {
                let partition = std::mem::take(&mut current);
                self.flush(partition, &mut closed, &mut stats, sink)?;
            }
            if closed.contains(record.profile_id()) {
                return Err(FusionError::HourlySeriesNotGrouped {
                    profile_id: record.profile_id().to_string(),
                });
            }
            current.push(record);
        }

        if !current.is_empty() {
            self.flush(current, &mut closed, &mut stats, sink)?;
        }

        self.finish_stats(&mut stats, &closed);
        Ok(stats)
    }

    /// Rows a partition would produce: its ZIP fan-out times its series length.
    pub fn planned_rows(&self, profile_id: &str, records: usize) -> u64 {
        self.fan_out(profile_id).len() as u64 * records as u64
    }

    /// Splits partitions into consecutive waves of at most `wave_size`
    /// partitions whose planned rows together stay within `max_partition_rows`.
    ///
    /// A partition is never split; one that alone exceeds the limit gets a
    /// wave of its own and fails in [`HourlyFuser::fuse_partition`].
    pub fn plan_waves<R>(
        &self,
        partitions: &[(String, Vec<R>)],
        wave_size: usize,
    ) -> Vec<usize> {
        let wave_size = wave_size.max(1);
        let mut waves = Vec::new();
        let mut len = 0usize;
        let mut rows = 0u64;

        for (profile_id, records) in partitions {
            let planned = self.planned_rows(profile_id, records.len());
            let over_budget = rows.saturating_add(planned) > self.max_partition_rows;
            if len > 0 && (len == wave_size || over_budget) {
                waves.push(len);
                len = 0;
                rows = 0;
            }
            len += 1;
            rows = rows.saturating_add(planned);
        }
        if len > 0 {
            waves.push(len);
        }
        waves
    }

    /// Fuses pre-grouped partitions on the rayon pool in waves planned by
    /// [`HourlyFuser::plan_waves`].
    ///
    /// Partitions are independent; results of each wave are handed to the
    /// sink in input order so output is deterministic. The rows held at once
    /// never exceed `max_partition_rows`.
    pub fn fuse_partitions<R, S>(
        &self,
        partitions: Vec<(String, Vec<R>)>,
        wave_size: usize,
        sink: &mut S,
    ) -> Result<FusionStats>
    where
        R: SeriesRecord,
        S: RowSink<R::Output>,
    {
        let mut stats = FusionStats::default();
        let mut seen: HashSet<String> = HashSet::with_capacity(partitions.len());
        let waves = self.plan_waves(&partitions, wave_size);
        log::debug!("Fusing {} partitions in {} waves", partitions.len(), waves.len());

        let mut pending = partitions.into_iter();
        for wave_len in waves {
            let wave: Vec<(String, Vec<R>)> = pending.by_ref().take(wave_len).collect();

            for (profile_id, _) in &wave {
                if !seen.insert(profile_id.clone()) {
                    return Err(FusionError::HourlySeriesNotGrouped {
                        profile_id: profile_id.clone(),
                    });
                }
            }

            let outcomes: Vec<Result<PartitionOutcome<R::Output>>> = wave
                .par_iter()
                .map(|(profile_id, records)| self.fuse_partition(profile_id, records))
                .collect();
            drop(wave);

            for outcome in outcomes {
                self.record_outcome(outcome?, &mut stats, sink)?;
            }
        }

        self.finish_stats(&mut stats, &seen);
        Ok(stats)
    }

    fn flush<R, S>(
        &self,
        partition: Vec<R>,
        closed: &mut HashSet<String>,
        stats: &mut FusionStats,
        sink: &mut S,
    ) -> Result<()>
    where
        R: SeriesRecord,
        S: RowSink<R::Output>,
    {
        let profile_id = match partition.first() {
            Some(first) => first.profile_id().to_string(),
            None => return Ok(()),
        };
        let outcome = self.fuse_partition(&profile_id, &partition)?;
        drop(partition);
        closed.insert(profile_id);
        self.record_outcome(outcome, stats, sink)
    }

    fn record_outcome<O, S: RowSink<O>>(
        &self,
        outcome: PartitionOutcome<O>,
        stats: &mut FusionStats,
        sink: &mut S,
    ) -> Result<()> {
        match outcome {
            PartitionOutcome::Fused { profile_id, rows } => {
                log::debug!("Fused {} rows for profile {}", rows.len(), profile_id);
                stats.fused_rows += rows.len() as u64;
                stats.matched_profiles += 1;
                sink.write_batch(&profile_id, rows)?;
            }
            PartitionOutcome::Orphaned {
                profile_id,
                records,
            } => {
                stats.orphaned_profile_hours += records;
                stats.orphaned_profile_ids.insert(profile_id);
            }
        }
        Ok(())
    }

    fn finish_stats(&self, stats: &mut FusionStats, seen: &HashSet<String>) {
        stats.profiles_without_series = self
            .fan_out
            .keys()
            .filter(|profile_id| !seen.contains(profile_id.as_str()))
            .cloned()
            .collect();

        log::info!(
            "Fused {} rows across {} profiles ({} orphaned profile-hours from {} profiles)",
            stats.fused_rows,
            stats.matched_profiles,
            stats.orphaned_profile_hours,
            stats.orphaned_profile_ids.len()
        );
        if !stats.profiles_without_series.is_empty() {
            log::warn!(
                "{} profiles referenced by ZIPs have no load series",
                stats.profiles_without_series.len()
            );
        }
    }
}

/// Groups an unsorted series into per-profile partitions, ordered by
/// profile id with each partition in input order.
pub fn partition_by_profile<R: SeriesRecord>(records: Vec<R>) -> Vec<(String, Vec<R>)> {
    let mut grouped: BTreeMap<String, Vec<R>> = BTreeMap::new();
    for record in records {
        match grouped.get_mut(record.profile_id()) {
            Some(partition) => partition.push(record),
            None => {
                grouped.insert(record.profile_id().to_string(), vec![record]);
            }
        }
    }
    grouped.into_iter().collect()
}

/// Splits a series already grouped by profile into its contiguous runs,
/// preserving order. A profile that reappears yields a second run, which
/// [`HourlyFuser::fuse_partitions`] rejects.
pub fn contiguous_partitions<R: SeriesRecord>(records: Vec<R>) -> Vec<(String, Vec<R>)> {
    let mut partitions: Vec<(String, Vec<R>)> = Vec::new();
    for record in records {
        match partitions.last_mut() {
            Some((profile_id, run)) if profile_id.as_str() == record.profile_id() => {
                run.push(record)
            }
            _ => partitions.push((record.profile_id().to_string(), vec![record])),
        }
    }
    partitions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::{CountingSink, VecSink};

    fn pair(zip: &str, profile: &str) -> ExpandedRow {
        ExpandedRow {
            zip_code: zip.to_string(),
            profile_id: profile.to_string(),
        }
    }

    fn day(profile: &str, date: NaiveDate, hours: std::ops::Range<u8>) -> Vec<HourlyRecord> {
        hours
            .map(|hour| HourlyRecord {
                profile_id: profile.to_string(),
                date,
                hour,
                kwh: 0.1 + f64::from(hour) / 100.0,
            })
            .collect()
    }

    fn april_first() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 4, 1).unwrap()
    }

    #[test]
    fn test_fan_out_cardinality_is_k_times_h() {
        let expanded = vec![
            pair("90210", "1_1_NS_C"),
            pair("90211", "1_1_NS_C"),
            pair("94102", "1_1_NS_C"),
            pair("90210", "2_1_NS_C"),
        ];
        let fuser = HourlyFuser::new(&expanded);

        let mut series = day("1_1_NS_C", april_first(), 0..24);
        series.extend(day("2_1_NS_C", april_first(), 0..4));

        let mut sink = VecSink::new();
        let stats = fuser.fuse_stream(series, &mut sink).unwrap();

        assert_eq!(stats.fused_rows, 3 * 24 + 4);
        assert_eq!(sink.rows.len(), 76);
        assert_eq!(stats.matched_profiles, 2);
        assert_eq!(stats.orphaned_profile_hours, 0);
        assert!(sink
            .rows
            .iter()
            .all(|r| expanded.contains(&pair(&r.zip_code, &r.profile_id))));
    }

    #[test]
    fn test_orphaned_profile_hours_are_counted_not_fused() {
        let fuser = HourlyFuser::new(&[pair("90210", "1_1_NS_C")]);

        let mut series = day("1_1_NS_C", april_first(), 0..24);
        series.extend(day("9_9_NS_X", april_first(), 0..24));

        let mut sink = CountingSink::default();
        let stats = fuser.fuse_stream(series, &mut sink).unwrap();

        assert_eq!(sink.rows, 24);
        assert_eq!(stats.orphaned_profile_hours, 24);
        assert_eq!(
            stats.orphaned_profile_ids.iter().collect::<Vec<_>>(),
            vec!["9_9_NS_X"]
        );
    }

    #[test]
    fn test_profiles_without_series_are_reported() {
        let fuser = HourlyFuser::new(&[pair("90210", "1_1_NS_C"), pair("90210", "3_1_NS_C")]);
        let mut sink = CountingSink::default();
        let stats = fuser
            .fuse_stream(day("1_1_NS_C", april_first(), 0..2), &mut sink)
            .unwrap();

        assert_eq!(
            stats.profiles_without_series.into_iter().collect::<Vec<_>>(),
            vec!["3_1_NS_C".to_string()]
        );
    }

    #[test]
    fn test_ungrouped_stream_is_rejected() {
        let fuser = HourlyFuser::new(&[pair("90210", "A"), pair("90210", "B")]);
        let mut series = day("A", april_first(), 0..2);
        series.extend(day("B", april_first(), 0..2));
        series.extend(day("A", april_first(), 2..4));

        let err = fuser
            .fuse_stream(series, &mut CountingSink::default())
            .unwrap_err();
        assert!(matches!(
            err,
            FusionError::HourlySeriesNotGrouped { profile_id } if profile_id == "A"
        ));
    }

    #[test]
    fn test_duplicate_hourly_key_is_fatal() {
        let fuser = HourlyFuser::new(&[pair("90210", "A")]);
        let mut series = day("A", april_first(), 0..3);
        series.push(series[1].clone());

        let err = fuser
            .fuse_stream(series, &mut CountingSink::default())
            .unwrap_err();
        assert!(matches!(err, FusionError::DuplicateHourlyKey { hour: 1, .. }));
    }

    #[test]
    fn test_hour_out_of_range_is_rejected() {
        let fuser = HourlyFuser::new(&[pair("90210", "A")]);
        let series = day("A", april_first(), 23..25);
        assert!(matches!(
            fuser.fuse_stream(series, &mut CountingSink::default()),
            Err(FusionError::HourOutOfRange { hour: 24, .. })
        ));
    }

    #[test]
    fn test_partition_over_limit_reports_profile() {
        let fuser = HourlyFuser::new(&[pair("90210", "BIG"), pair("90211", "BIG")])
            .with_max_partition_rows(40);

        match fuser.fuse_stream(day("BIG", april_first(), 0..24), &mut CountingSink::default()) {
            Err(FusionError::ResourceExhausted {
                profile_id,
                requested_rows,
                limit,
            }) => {
                assert_eq!(profile_id, "BIG");
                assert_eq!(requested_rows, 48);
                assert_eq!(limit, 40);
            }
            other => panic!("expected ResourceExhausted, got {:?}", other.map(|s| s.fused_rows)),
        }
    }

    #[test]
    fn test_parallel_partitions_match_streaming() {
        let expanded = vec![
            pair("90210", "A"),
            pair("90211", "A"),
            pair("90212", "B"),
            pair("90212", "C"),
        ];
        let fuser = HourlyFuser::new(&expanded);

        let mut series = day("C", april_first(), 0..24);
        series.extend(day("A", april_first(), 0..24));
        series.extend(day("ORPHAN", april_first(), 0..5));
        series.extend(day("B", april_first(), 0..24));

        let mut streamed = VecSink::new();
        let stream_stats = fuser.fuse_stream(series.clone(), &mut streamed).unwrap();

        let mut parallel = VecSink::new();
        let parallel_stats = fuser
            .fuse_partitions(partition_by_profile(series), 2, &mut parallel)
            .unwrap();

        assert_eq!(stream_stats.fused_rows, parallel_stats.fused_rows);
        assert_eq!(parallel_stats.orphaned_profile_hours, 5);

        let normalize = |rows: &mut Vec<FusedRow>| {
            rows.sort_by(|a, b| {
                (&a.zip_code, &a.profile_id, a.date, a.hour)
                    .cmp(&(&b.zip_code, &b.profile_id, b.date, b.hour))
            })
        };
        normalize(&mut streamed.rows);
        normalize(&mut parallel.rows);
        assert_eq!(streamed.rows, parallel.rows);
    }

    #[test]
    fn test_month_hour_series_fuses_with_same_accounting() {
        let fuser = HourlyFuser::new(&[pair("90210", "A"), pair("90211", "A")]);
        let loads: Vec<MonthHourLoad> = (5..=6)
            .flat_map(|month| {
                (0..24).map(move |hour| MonthHourLoad {
                    profile_id: "A".to_string(),
                    month,
                    hour,
                    kwh: 0.5,
                    samples: 30,
                })
            })
            .collect();

        let mut sink = VecSink::new();
        let stats = fuser.fuse_stream(loads, &mut sink).unwrap();

        assert_eq!(stats.fused_rows, 2 * 48);
        assert!(sink.rows.iter().all(|r| r.month == 5 || r.month == 6));
    }

    #[test]
    fn test_contiguous_runs_keep_reappearing_profiles_apart() {
        let mut records = day("A", april_first(), 0..2);
        records.extend(day("B", april_first(), 0..1));
        records.extend(day("A", april_first(), 2..3));

        let runs = contiguous_partitions(records);
        let ids: Vec<&str> = runs.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["A", "B", "A"]);

        let fuser = HourlyFuser::new(&[pair("90210", "A"), pair("90210", "B")]);
        let mut sink = CountingSink::default();
        assert!(matches!(
            fuser.fuse_partitions(runs, 1, &mut sink),
            Err(FusionError::HourlySeriesNotGrouped { .. })
        ));
    }

    #[test]
    fn test_waves_respect_row_limit_across_partitions() {
        // Each profile fans out to 2 ZIPs x 24 hours = 48 rows; two together exceed 60
        let fuser = HourlyFuser::new(&[
            pair("90210", "A"),
            pair("90211", "A"),
            pair("90210", "B"),
            pair("90211", "B"),
            pair("90210", "C"),
        ])
        .with_max_partition_rows(60);

        let mut series = day("A", april_first(), 0..24);
        series.extend(day("B", april_first(), 0..24));
        series.extend(day("C", april_first(), 0..6));
        series.extend(day("ORPHAN", april_first(), 0..24));
        let partitions = contiguous_partitions(series);

        assert_eq!(fuser.plan_waves(&partitions, 32), vec![1, 3]);
        assert_eq!(fuser.plan_waves(&partitions, 2), vec![1, 2, 1]);

        let mut sink = VecSink::new();
        let stats = fuser.fuse_partitions(partitions, 32, &mut sink).unwrap();
        assert_eq!(stats.fused_rows, 48 + 48 + 6);
        assert_eq!(stats.orphaned_profile_hours, 24);
    }

    #[test]
    fn test_oversized_partition_gets_its_own_wave() {
        let expanded = vec![pair("90210", "A"), pair("90211", "A"), pair("90210", "B")];
        let fuser = HourlyFuser::new(&expanded).with_max_partition_rows(10);

        let mut series = day("B", april_first(), 0..2);
        series.extend(day("A", april_first(), 0..24));
        let partitions = contiguous_partitions(series);

        assert_eq!(fuser.plan_waves(&partitions, 8), vec![1, 1]);
        assert!(matches!(
            fuser.fuse_partitions(partitions, 8, &mut CountingSink::default()),
            Err(FusionError::ResourceExhausted { requested_rows: 48, .. })
        ));
    }
}
