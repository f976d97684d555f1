//! Aggregate queries over the stats database
//!
//! These back the read-only reporting views: recent matches, all-time score
//! totals, activity, wins, per-map averages and the hour-of-day histogram.
//! Ties are always broken by name (or hour) so results are stable.

use crate::store::{MatchRow, StatsStore, StoreError, MATCH_COLUMNS};
use crate::MatchRecord;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlayerTotal {
    pub player_name: String,
    pub total_score: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlayerActivity {
    pub player_name: String,
    pub matches_played: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlayerWins {
    pub player_name: String,
    pub match_wins: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlayerMapAverage {
    pub player_name: String,
    pub map: Option<String>,
    pub avg_score: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HourActivity {
    pub hour: u32,
    pub match_count: i64,
}

/// Row limits for each section of a [`StatsReport`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportLimits {
    pub matches: usize,
    pub players: usize,
    pub map_averages: usize,
    pub hours: usize,
}

impl Default for ReportLimits {
    fn default() -> Self {
        Self {
            matches: 5,
            players: 10,
            map_averages: 10,
            hours: 5,
        }
    }
}

/// Every reporting view gathered in one serializable value.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsReport {
    pub recent_matches: Vec<MatchRecord>,
    pub top_scorers: Vec<PlayerTotal>,
    pub most_active: Vec<PlayerActivity>,
    pub win_counts: Vec<PlayerWins>,
    pub map_averages: Vec<PlayerMapAverage>,
    pub peak_hours: Vec<HourActivity>,
}

impl StatsReport {
    pub fn load(store: &StatsStore, limits: ReportLimits) -> Result<Self, StoreError> {
        Ok(Self {
            recent_matches: store.recent_matches(limits.matches)?,
            top_scorers: store.top_scorers(limits.players)?,
            most_active: store.most_active(limits.players)?,
            win_counts: store.win_counts(limits.players)?,
            map_averages: store.map_averages(limits.map_averages)?,
            peak_hours: store.peak_hours(limits.hours)?,
        })
    }
}

impl StatsStore {
    /// Newest matches first, by start time.
    pub fn recent_matches(&self, limit: usize) -> Result<Vec<MatchRecord>, StoreError> {
        let sql = format!(
            "SELECT {} FROM matches ORDER BY start_time DESC, id DESC LIMIT ?1",
            MATCH_COLUMNS
        );
        let mut stmt = self.conn().prepare(&sql)?;
        let rows = stmt.query_map([sql_limit(limit)], MatchRow::read)?;

        let mut matches = Vec::new();
        for row in rows {
            matches.push(row?.into_record()?);
        }
        Ok(matches)
    }

    /// Players ranked by their score summed over all matches.
    pub fn top_scorers(&self, limit: usize) -> Result<Vec<PlayerTotal>, StoreError> {
        let mut stmt = self.conn().prepare(
            "SELECT player_name, SUM(score) AS total_score
             FROM player_stats
             GROUP BY player_name
             ORDER BY total_score DESC, player_name ASC
             LIMIT ?1",
        )?;
        let rows = stmt.query_map([sql_limit(limit)], |row| {
            Ok(PlayerTotal {
                player_name: row.get(0)?,
                total_score: row.get(1)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Players ranked by the number of distinct matches they appeared in.
    pub fn most_active(&self, limit: usize) -> Result<Vec<PlayerActivity>, StoreError> {
        let mut stmt = self.conn().prepare(
            "SELECT player_name, COUNT(DISTINCT match_id) AS matches_played
             FROM player_stats
             GROUP BY player_name
             ORDER BY matches_played DESC, player_name ASC
             LIMIT ?1",
        )?;
        let rows = stmt.query_map([sql_limit(limit)], |row| {
            Ok(PlayerActivity {
                player_name: row.get(0)?,
                matches_played: row.get(1)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Wins per player.
    ///
    /// A win is holding the top score of a match, the running one included;
    /// players tied on the top score are all credited.
    pub fn win_counts(&self, limit: usize) -> Result<Vec<PlayerWins>, StoreError> {
        let mut stmt = self.conn().prepare(
            "SELECT ps.player_name, COUNT(*) AS match_wins
             FROM player_stats ps
             WHERE ps.score = (
                 SELECT MAX(top.score) FROM player_stats top
                 WHERE top.match_id = ps.match_id
             )
             GROUP BY ps.player_name
             ORDER BY match_wins DESC, ps.player_name ASC
             LIMIT ?1",
        )?;
        let rows = stmt.query_map([sql_limit(limit)], |row| {
            Ok(PlayerWins {
                player_name: row.get(0)?,
                match_wins: row.get(1)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Average score of each player on each map, best first.
    pub fn map_averages(&self, limit: usize) -> Result<Vec<PlayerMapAverage>, StoreError> {
        let mut stmt = self.conn().prepare(
            "SELECT ps.player_name, m.map, AVG(ps.score) AS avg_score
             FROM player_stats ps
             JOIN matches m ON ps.match_id = m.id
             GROUP BY ps.player_name, m.map
             ORDER BY avg_score DESC, ps.player_name ASC, m.map ASC
             LIMIT ?1",
        )?;
        let rows = stmt.query_map([sql_limit(limit)], |row| {
            Ok(PlayerMapAverage {
                player_name: row.get(0)?,
                map: row.get(1)?,
                avg_score: row.get(2)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Number of matches started in each hour of the day, busiest first.
    pub fn peak_hours(&self, limit: usize) -> Result<Vec<HourActivity>, StoreError> {
        let mut stmt = self.conn().prepare(
            "SELECT CAST(strftime('%H', start_time) AS INTEGER) AS hour, COUNT(*) AS match_count
             FROM matches
             GROUP BY hour
             ORDER BY match_count DESC, hour ASC
             LIMIT ?1",
        )?;
        let rows = stmt.query_map([sql_limit(limit)], |row| {
            let hour: i64 = row.get(0)?;
            Ok(HourActivity {
                hour: hour.clamp(0, 23) as u32,
                match_count: row.get(1)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}

fn sql_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}
