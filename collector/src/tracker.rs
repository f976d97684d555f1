//! Match lifecycle tracking
//!
//! Each actionable sample is classified against the most recent match in the
//! store:
//! - no match yet, a different map, or the match started longer ago than the
//!   timeout: the previous match is finalized and a new one is created
//! - otherwise the sample belongs to the running match
//!
//! The store is the source of truth for "the current match". The in-memory
//! [`TrackerState`] only remembers the last sample so unchanged scoreboards do
//! not cause redundant writes.

use chrono::{Duration as ChronoDuration, Local, NaiveDateTime, Offset, TimeZone};
use log::{debug, info};
use shared::{MatchHeader, MatchId, Sample, StatsStore, StoreError};
use std::collections::BTreeMap;
use std::time::Duration;

/// What the tracker remembers between poll cycles.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackerState {
    pub last_map: Option<String>,
    pub last_scores: BTreeMap<String, i64>,
    pub match_active: bool,
}

impl TrackerState {
    fn scores_changed(&self, scores: &BTreeMap<String, i64>) -> bool {
        &self.last_scores != scores
    }
}

/// Result of one handled sample.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleOutcome {
    /// Match the sample was recorded against.
    pub match_id: MatchId,
    /// True when this sample opened `match_id`.
    pub started: bool,
    /// Previous match, when this sample finalized it.
    pub finalized: Option<MatchId>,
    /// Number of score rows inserted or updated.
    pub scores_written: usize,
}

pub struct MatchTracker {
    state: TrackerState,
    match_timeout: ChronoDuration,
}

impl MatchTracker {
    pub fn new(match_timeout: Duration) -> Self {
        Self {
            state: TrackerState::default(),
            match_timeout: ChronoDuration::from_std(match_timeout)
                .unwrap_or(ChronoDuration::MAX),
        }
    }

    pub fn state(&self) -> &TrackerState {
        &self.state
    }

    /// Records a sample at the current local time.
    pub fn handle_sample(
        &mut self,
        store: &StatsStore,
        sample: &Sample,
    ) -> Result<Option<CycleOutcome>, StoreError> {
        self.handle_sample_at(store, sample, Local::now().naive_local())
    }

    /// Records a sample observed at `now`.
    ///
    /// Empty samples are ignored and leave both the store and the state alone.
    /// All writes for the sample happen in one transaction; the in-memory state
    /// only moves forward once that transaction has committed.
    pub fn handle_sample_at(
        &mut self,
        store: &StatsStore,
        sample: &Sample,
        now: NaiveDateTime,
    ) -> Result<Option<CycleOutcome>, StoreError> {
        if !sample.is_actionable() {
            return Ok(None);
        }

        let outcome = store.atomically(|store| self.record(store, sample, now))?;

        self.state = TrackerState {
            last_map: sample.map.clone(),
            last_scores: sample.scores.clone(),
            match_active: true,
        };

        Ok(Some(outcome))
    }

    fn record(
        &self,
        store: &StatsStore,
        sample: &Sample,
        now: NaiveDateTime,
    ) -> Result<CycleOutcome, StoreError> {
        let (match_id, starts_new_match, finalized) = match store.last_match()? {
            Some(last) if !self.is_new_match(&last, sample, now) => (last.id, false, None),
            last => {
                let mut finalized = None;
                if let Some(last) = last {
                    if finalize(store, last.id, now)? {
                        info!("Ended previous match {} on {}", last.id, map_label(&last.map));
                        finalized = Some(last.id);
                    }
                }

                let id = store.create_match(sample.map.as_deref(), now)?;
                info!("New match {} started on map {}", id, map_label(&sample.map));
                (id, true, finalized)
            }
        };

        // a fresh match has no rows yet, so it is always written
        let mut scores_written = 0;
        if starts_new_match || self.state.scores_changed(&sample.scores) {
            for (player, score) in &sample.scores {
                if store.upsert_score(match_id, player, *score)?.is_write() {
                    info!("Match {}: {} has {} frags", match_id, player, score);
                    scores_written += 1;
                }
            }
        } else {
            debug!("Match {}: scores unchanged", match_id);
        }

        Ok(CycleOutcome {
            match_id,
            started: starts_new_match,
            finalized,
            scores_written,
        })
    }

    fn is_new_match(&self, last: &MatchHeader, sample: &Sample, now: NaiveDateTime) -> bool {
        last.map != sample.map
            || elapsed_between(&Local, last.start_time, now) > self.match_timeout
    }
}

/// Real time between two wall-clock readings of `tz`.
///
/// Stored timestamps are local, so a plain difference is off by the offset
/// change when a DST switch falls in between.
fn elapsed_between<Tz: TimeZone>(
    tz: &Tz,
    start: NaiveDateTime,
    end: NaiveDateTime,
) -> ChronoDuration {
    ChronoDuration::seconds(instant(tz, &end) - instant(tz, &start))
}

/// Unix timestamp of a local wall-clock time. Repeated hours resolve to the
/// earlier instant, skipped ones use the offset in force at that UTC time.
fn instant<Tz: TimeZone>(tz: &Tz, local: &NaiveDateTime) -> i64 {
    match tz.from_local_datetime(local).earliest() {
        Some(time) => time.timestamp(),
        None => {
            let offset = tz.offset_from_utc_datetime(local).fix();
            (*local - offset).and_utc().timestamp()
        }
    }
}

/// Writes the end-of-match aggregates once. Returns false if already finalized.
pub fn finalize(
    store: &StatsStore,
    id: MatchId,
    end_time: NaiveDateTime,
) -> Result<bool, StoreError> {
    let summary = store.match_summary(id)?;
    let applied = store.finalize_match(id, end_time, &summary)?;
    if applied {
        info!(
            "Match {} final: {} frags, best {} ({})",
            id,
            summary.total_frags,
            summary.best_player.as_deref().unwrap_or("-"),
            summary.best_score.unwrap_or(0)
        );
    }
    Ok(applied)
}

fn map_label(map: &Option<String>) -> &str {
    map.as_deref().unwrap_or("<unknown>")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, LocalResult, NaiveDate};

    const HOUR: Duration = Duration::from_secs(3600);

    fn t0() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_opt(20, 0, 0)
            .unwrap()
    }

    fn secs(n: i64) -> ChronoDuration {
        ChronoDuration::seconds(n)
    }

    fn sample(map: &str, scores: &[(&str, i64)]) -> Sample {
        Sample::new(
            Some(map.to_string()),
            scores.iter().map(|(p, s)| (p.to_string(), *s)).collect(),
        )
    }

    #[test]
    fn test_first_sample_creates_match() {
        let store = StatsStore::open_in_memory().unwrap();
        let mut tracker = MatchTracker::new(HOUR);

        let outcome = tracker
            .handle_sample_at(&store, &sample("q3dm1", &[("Sarge", 0)]), t0())
            .unwrap()
            .unwrap();

        assert!(outcome.started);
        assert_eq!(outcome.finalized, None);
        assert_eq!(outcome.scores_written, 1);

        let record = store.get_match(outcome.match_id).unwrap().unwrap();
        assert_eq!(record.map.as_deref(), Some("q3dm1"));
        assert_eq!(record.start_time, t0());
        assert!(tracker.state().match_active);
    }

    #[test]
    fn test_same_map_within_timeout_continues() {
        let store = StatsStore::open_in_memory().unwrap();
        let mut tracker = MatchTracker::new(HOUR);

        let first = tracker
            .handle_sample_at(&store, &sample("q3dm1", &[("Sarge", 1)]), t0())
            .unwrap()
            .unwrap();
        let second = tracker
            .handle_sample_at(&store, &sample("q3dm1", &[("Sarge", 4)]), t0() + secs(10))
            .unwrap()
            .unwrap();

        assert!(!second.started);
        assert_eq!(second.match_id, first.match_id);
        assert_eq!(store.match_count().unwrap(), 1);
        assert_eq!(store.player_scores(first.match_id).unwrap()[0].score, 4);
    }

    #[test]
    fn test_map_change_finalizes_and_starts_new_match() {
        let store = StatsStore::open_in_memory().unwrap();
        let mut tracker = MatchTracker::new(HOUR);

        let first = tracker
            .handle_sample_at(
                &store,
                &sample("q3dm1", &[("A", 10), ("B", 25), ("C", 7)]),
                t0(),
            )
            .unwrap()
            .unwrap();
        let second = tracker
            .handle_sample_at(&store, &sample("q3dm7", &[("A", 0)]), t0() + secs(600))
            .unwrap()
            .unwrap();

        assert!(second.started);
        assert_ne!(second.match_id, first.match_id);
        assert_eq!(second.finalized, Some(first.match_id));

        let old = store.get_match(first.match_id).unwrap().unwrap();
        assert_eq!(old.end_time, Some(t0() + secs(600)));
        assert_eq!(old.best_player.as_deref(), Some("B"));
        assert_eq!(old.best_score, Some(25));
        assert_eq!(old.total_frags, 42);

        let new = store.get_match(second.match_id).unwrap().unwrap();
        assert_eq!(new.map.as_deref(), Some("q3dm7"));
        assert!(!new.is_finalized());
    }

    #[test]
    fn test_timeout_starts_new_match_on_same_map() {
        let store = StatsStore::open_in_memory().unwrap();
        let mut tracker = MatchTracker::new(HOUR);

        let first = tracker
            .handle_sample_at(&store, &sample("q3dm1", &[("Sarge", 5)]), t0())
            .unwrap()
            .unwrap();
        let at_limit = tracker
            .handle_sample_at(&store, &sample("q3dm1", &[("Sarge", 5)]), t0() + secs(3600))
            .unwrap()
            .unwrap();
        assert!(!at_limit.started);

        let second = tracker
            .handle_sample_at(&store, &sample("q3dm1", &[("Sarge", 5)]), t0() + secs(3601))
            .unwrap()
            .unwrap();

        assert!(second.started);
        assert_eq!(second.finalized, Some(first.match_id));
        // identical scoreboard, but the new match still gets its rows
        assert_eq!(second.scores_written, 1);
        assert_eq!(store.player_scores(second.match_id).unwrap().len(), 1);
    }

    /// UTC+1 until 2024-03-31 01:00 UTC, UTC+2 afterwards.
    #[derive(Debug, Clone)]
    struct SpringForward;

    impl SpringForward {
        fn switch() -> NaiveDateTime {
            NaiveDate::from_ymd_opt(2024, 3, 31)
                .unwrap()
                .and_hms_opt(1, 0, 0)
                .unwrap()
        }

        fn winter() -> FixedOffset {
            FixedOffset::east_opt(3600).unwrap()
        }

        fn summer() -> FixedOffset {
            FixedOffset::east_opt(7200).unwrap()
        }
    }

    impl TimeZone for SpringForward {
        type Offset = FixedOffset;

        fn from_offset(_offset: &FixedOffset) -> Self {
            SpringForward
        }

        fn offset_from_local_date(&self, local: &NaiveDate) -> LocalResult<FixedOffset> {
            self.offset_from_local_datetime(&local.and_hms_opt(0, 0, 0).unwrap())
        }

        fn offset_from_local_datetime(&self, local: &NaiveDateTime) -> LocalResult<FixedOffset> {
            let as_winter = *local - Self::winter() < Self::switch();
            let as_summer = *local - Self::summer() >= Self::switch();
            match (as_winter, as_summer) {
                (true, true) => LocalResult::Ambiguous(Self::winter(), Self::summer()),
                (true, false) => LocalResult::Single(Self::winter()),
                (false, true) => LocalResult::Single(Self::summer()),
                (false, false) => LocalResult::None,
            }
        }

        fn offset_from_utc_date(&self, utc: &NaiveDate) -> FixedOffset {
            self.offset_from_utc_datetime(&utc.and_hms_opt(0, 0, 0).unwrap())
        }

        fn offset_from_utc_datetime(&self, utc: &NaiveDateTime) -> FixedOffset {
            if *utc < Self::switch() {
                Self::winter()
            } else {
                Self::summer()
            }
        }
    }

    fn march_31(hour: u32, min: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 31)
            .unwrap()
            .and_hms_opt(hour, min, 0)
            .unwrap()
    }

    #[test]
    fn test_elapsed_time_across_dst_switch() {
        // 01:30 winter time to 04:20 summer time is 1h50m, not 2h50m
        let elapsed = elapsed_between(&SpringForward, march_31(1, 30), march_31(4, 20));
        assert_eq!(elapsed, secs(6600));
        assert!(elapsed <= ChronoDuration::hours(2));
    }

    #[test]
    fn test_elapsed_time_without_dst_switch() {
        let elapsed = elapsed_between(&SpringForward, march_31(4, 0), march_31(5, 0));
        assert_eq!(elapsed, secs(3600));
        assert_eq!(elapsed_between(&Local, t0(), t0() + secs(3601)), secs(3601));
    }

    #[test]
    fn test_elapsed_time_from_skipped_hour() {
        // 02:30 never happened; it is read with the summer offset
        let elapsed = elapsed_between(&SpringForward, march_31(2, 30), march_31(3, 30));
        assert_eq!(elapsed, secs(3600));
    }

    #[test]
    fn test_unchanged_scores_are_not_rewritten() {
        let store = StatsStore::open_in_memory().unwrap();
        let mut tracker = MatchTracker::new(HOUR);
        let scores = sample("q3dm1", &[("Sarge", 3), ("Visor", 1)]);

        tracker.handle_sample_at(&store, &scores, t0()).unwrap();
        let again = tracker
            .handle_sample_at(&store, &scores, t0() + secs(2))
            .unwrap()
            .unwrap();

        assert_eq!(again.scores_written, 0);
        assert_eq!(tracker.state().last_scores, scores.scores);
    }

    #[test]
    fn test_only_changed_rows_count_as_writes() {
        let store = StatsStore::open_in_memory().unwrap();
        let mut tracker = MatchTracker::new(HOUR);

        tracker
            .handle_sample_at(&store, &sample("q3dm1", &[("Sarge", 3), ("Visor", 1)]), t0())
            .unwrap();
        let outcome = tracker
            .handle_sample_at(
                &store,
                &sample("q3dm1", &[("Sarge", 4), ("Visor", 1), ("Anarki", 0)]),
                t0() + secs(2),
            )
            .unwrap()
            .unwrap();

        assert_eq!(outcome.scores_written, 2);
        assert_eq!(store.player_scores(outcome.match_id).unwrap().len(), 3);
    }

    #[test]
    fn test_empty_sample_is_ignored() {
        let store = StatsStore::open_in_memory().unwrap();
        let mut tracker = MatchTracker::new(HOUR);

        let outcome = tracker
            .handle_sample_at(&store, &sample("q3dm7", &[]), t0())
            .unwrap();

        assert_eq!(outcome, None);
        assert_eq!(store.match_count().unwrap(), 0);
        assert_eq!(tracker.state(), &TrackerState::default());
    }

    #[test]
    fn test_restart_continues_stored_match() {
        let store = StatsStore::open_in_memory().unwrap();
        let first = MatchTracker::new(HOUR)
            .handle_sample_at(&store, &sample("q3dm1", &[("Sarge", 2)]), t0())
            .unwrap()
            .unwrap();

        // fresh tracker, empty cache: the store decides
        let mut tracker = MatchTracker::new(HOUR);
        let outcome = tracker
            .handle_sample_at(&store, &sample("q3dm1", &[("Sarge", 2)]), t0() + secs(30))
            .unwrap()
            .unwrap();

        assert!(!outcome.started);
        assert_eq!(outcome.match_id, first.match_id);
        assert_eq!(outcome.scores_written, 0);
    }

    #[test]
    fn test_missing_map_is_a_map_change() {
        let store = StatsStore::open_in_memory().unwrap();
        let mut tracker = MatchTracker::new(HOUR);

        tracker
            .handle_sample_at(&store, &sample("q3dm1", &[("Sarge", 2)]), t0())
            .unwrap();
        let no_map = Sample::new(None, sample("x", &[("Sarge", 2)]).scores);
        let outcome = tracker
            .handle_sample_at(&store, &no_map, t0() + secs(5))
            .unwrap()
            .unwrap();

        assert!(outcome.started);
        assert_eq!(tracker.state().last_map, None);
    }

    #[test]
    fn test_already_finalized_match_is_not_refinalized() {
        let store = StatsStore::open_in_memory().unwrap();
        let mut tracker = MatchTracker::new(HOUR);

        let first = tracker
            .handle_sample_at(&store, &sample("q3dm1", &[("Sarge", 9)]), t0())
            .unwrap()
            .unwrap();
        assert!(finalize(&store, first.match_id, t0() + secs(60)).unwrap());

        let second = tracker
            .handle_sample_at(&store, &sample("q3dm7", &[("Sarge", 0)]), t0() + secs(120))
            .unwrap()
            .unwrap();

        assert!(second.started);
        assert_eq!(second.finalized, None);
        let old = store.get_match(first.match_id).unwrap().unwrap();
        assert_eq!(old.end_time, Some(t0() + secs(60)));
    }

    #[test]
    fn test_failed_cycle_keeps_previous_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats.db");
        let store = StatsStore::open(&path).unwrap();
        let mut tracker = MatchTracker::new(HOUR);

        let first = sample("q3dm1", &[("Sarge", 1)]);
        tracker.handle_sample_at(&store, &first, t0()).unwrap();
        let before = tracker.state().clone();

        let other = rusqlite::Connection::open(&path).unwrap();
        other.execute_batch("DROP TABLE player_stats;").unwrap();
        drop(other);

        let result =
            tracker.handle_sample_at(&store, &sample("q3dm7", &[("Sarge", 0)]), t0() + secs(5));

        assert!(result.is_err());
        assert_eq!(tracker.state(), &before);
        // nothing from the failed cycle was committed
        assert_eq!(store.match_count().unwrap(), 1);
    }
}
