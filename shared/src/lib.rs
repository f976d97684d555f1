//! Types and building blocks shared by the collector and the reporting tools.
//!
//! - [`protocol`]: out-of-band rcon datagram encoding and reply decoding
//! - [`parser`]: turns a raw `status` reply into a [`Sample`]
//! - [`store`]: SQLite persistence for matches and per-player scores
//! - [`report`]: read-only aggregate queries over the store

pub mod parser;
pub mod protocol;
pub mod report;
pub mod store;

pub use parser::{clean_name, parse_player_list, StatusParser};
pub use store::{MatchHeader, MatchSummary, ScoreWrite, StatsStore, StoreError};

use chrono::NaiveDateTime;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Format used for every timestamp written to the database.
pub const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Identifier of a row in the `matches` table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct MatchId(pub i64);

impl fmt::Display for MatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One parsed observation of the server: current map and tracked player scores.
///
/// Scores are kept in a `BTreeMap` so that comparisons between samples are by
/// value and iteration order is stable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sample {
    pub map: Option<String>,
    pub scores: BTreeMap<String, i64>,
}

impl Sample {
    pub fn new(map: Option<String>, scores: BTreeMap<String, i64>) -> Self {
        Self { map, scores }
    }

    /// A sample is only worth recording when at least one tracked player was seen.
    pub fn is_actionable(&self) -> bool {
        !self.scores.is_empty()
    }
}

/// A full row of the `matches` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MatchRecord {
    pub id: MatchId,
    pub map: Option<String>,
    #[serde(serialize_with = "serialize_time")]
    pub start_time: NaiveDateTime,
    #[serde(serialize_with = "serialize_opt_time")]
    pub end_time: Option<NaiveDateTime>,
    pub total_frags: i64,
    pub best_player: Option<String>,
    pub best_score: Option<i64>,
}

impl MatchRecord {
    pub fn is_finalized(&self) -> bool {
        self.end_time.is_some()
    }
}

/// A row of the `player_stats` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlayerScore {
    pub match_id: MatchId,
    pub player_name: String,
    pub score: i64,
}

pub fn format_time(time: &NaiveDateTime) -> String {
    time.format(TIME_FORMAT).to_string()
}

fn serialize_time<S: serde::Serializer>(time: &NaiveDateTime, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&format_time(time))
}

fn serialize_opt_time<S: serde::Serializer>(
    time: &Option<NaiveDateTime>,
    s: S,
) -> Result<S::Ok, S::Error> {
    match time {
        Some(t) => s.serialize_some(&format_time(t)),
        None => s.serialize_none(),
    }
}
