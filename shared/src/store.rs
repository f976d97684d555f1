//! SQLite persistence for matches and per-player scores
//!
//! Tables:
//! - matches: one row per match, end-of-match aggregates written once
//! - player_stats: one row per (match, player), unique by constraint
//!
//! Every statement runs in autocommit mode unless it is issued from inside
//! [`StatsStore::atomically`], in which case the whole closure commits or rolls
//! back as one unit.

use crate::{format_time, MatchId, MatchRecord, PlayerScore, TIME_FORMAT};
use chrono::NaiveDateTime;
use log::{debug, info};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::{Path, PathBuf};
use thiserror::Error;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS matches (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    map TEXT,
    start_time TEXT NOT NULL,
    end_time TEXT,
    total_frags INTEGER DEFAULT 0,
    best_player TEXT,
    best_score INTEGER
);
CREATE TABLE IF NOT EXISTS player_stats (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    match_id INTEGER NOT NULL,
    player_name TEXT NOT NULL,
    score INTEGER NOT NULL,
    FOREIGN KEY (match_id) REFERENCES matches(id),
    UNIQUE (match_id, player_name)
);
CREATE INDEX IF NOT EXISTS idx_matches_start_time ON matches(start_time);
CREATE INDEX IF NOT EXISTS idx_player_stats_player ON player_stats(player_name);
"#;

pub(crate) const MATCH_COLUMNS: &str =
    "id, map, start_time, end_time, total_frags, best_player, best_score";

/// Errors that can occur during store operations
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Failed to create database directory {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid timestamp in database: {0:?}")]
    Timestamp(String),
}

/// The fields of the most recent match needed to classify a new sample.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchHeader {
    pub id: MatchId,
    pub start_time: NaiveDateTime,
    pub map: Option<String>,
}

/// End-of-match aggregates written on finalization.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchSummary {
    pub total_frags: i64,
    pub best_player: Option<String>,
    pub best_score: Option<i64>,
}

/// What an upsert did to the stored row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreWrite {
    Inserted,
    Updated,
    Unchanged,
}

impl ScoreWrite {
    pub fn is_write(self) -> bool {
        !matches!(self, ScoreWrite::Unchanged)
    }
}

/// Durable match and score storage backed by one SQLite connection.
pub struct StatsStore {
    conn: Connection,
}

impl StatsStore {
    /// Opens (or creates) the database file and ensures the schema exists.
    ///
    /// Missing parent directories are created.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() && !dir.exists() {
                info!("Creating database directory {}", dir.display());
                std::fs::create_dir_all(dir).map_err(|source| StoreError::Io {
                    path: dir.to_path_buf(),
                    source,
                })?;
            }
        }

        let store = Self::init(Connection::open(path)?)?;
        info!("Database initialized at {}", path.display());
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Runs `f` inside a single transaction.
    ///
    /// The transaction commits when `f` returns `Ok` and rolls back otherwise,
    /// so a failed poll cycle leaves no partial writes behind.
    pub fn atomically<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Self) -> Result<T, StoreError>,
    {
        let tx = self.conn.unchecked_transaction()?;
        let value = f(self)?;
        tx.commit()?;
        Ok(value)
    }

    /// Inserts a new, unfinalized match and returns its id.
    pub fn create_match(
        &self,
        map: Option<&str>,
        start_time: NaiveDateTime,
    ) -> Result<MatchId, StoreError> {
        self.conn.execute(
            "INSERT INTO matches (map, start_time) VALUES (?1, ?2)",
            params![map, format_time(&start_time)],
        )?;
        let id = MatchId(self.conn.last_insert_rowid());
        debug!("Inserted match {} on {:?}", id, map);
        Ok(id)
    }

    /// Most recently created match, finalized or not.
    pub fn last_match(&self) -> Result<Option<MatchHeader>, StoreError> {
        let row = self
            .conn
            .query_row(
                "SELECT id, start_time, map FROM matches ORDER BY id DESC LIMIT 1",
                [],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Option<String>>(2)?,
                    ))
                },
            )
            .optional()?;

        row.map(|(id, start_time, map)| {
            Ok(MatchHeader {
                id: MatchId(id),
                start_time: parse_time(&start_time)?,
                map,
            })
        })
        .transpose()
    }

    /// Computes total frags and the best player of a match.
    ///
    /// Equal top scores go to the lexicographically smallest name. A match
    /// without any score rows has zero frags and no best player.
    pub fn match_summary(&self, id: MatchId) -> Result<MatchSummary, StoreError> {
        let total_frags: i64 = self.conn.query_row(
            "SELECT COALESCE(SUM(score), 0) FROM player_stats WHERE match_id = ?1",
            params![id.0],
            |row| row.get(0),
        )?;

        let best = self
            .conn
            .query_row(
                "SELECT player_name, score FROM player_stats WHERE match_id = ?1
                 ORDER BY score DESC, player_name ASC LIMIT 1",
                params![id.0],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)),
            )
            .optional()?;

        let (best_player, best_score) = match best {
            Some((player, score)) => (Some(player), Some(score)),
            None => (None, None),
        };

        Ok(MatchSummary {
            total_frags,
            best_player,
            best_score,
        })
    }

    /// Writes the end-of-match fields unless the match is already finalized.
    ///
    /// Returns `true` when this call finalized the match.
    pub fn finalize_match(
        &self,
        id: MatchId,
        end_time: NaiveDateTime,
        summary: &MatchSummary,
    ) -> Result<bool, StoreError> {
        let changed = self.conn.execute(
            "UPDATE matches
             SET end_time = ?1, total_frags = ?2, best_player = ?3, best_score = ?4
             WHERE id = ?5 AND end_time IS NULL",
            params![
                format_time(&end_time),
                summary.total_frags,
                summary.best_player,
                summary.best_score,
                id.0
            ],
        )?;
        Ok(changed > 0)
    }

    /// Inserts or updates the score of one player in one match.
    ///
    /// Storing the same score again is a no-op.
    pub fn upsert_score(
        &self,
        id: MatchId,
        player: &str,
        score: i64,
    ) -> Result<ScoreWrite, StoreError> {
        let existing: Option<i64> = self
            .conn
            .query_row(
                "SELECT score FROM player_stats WHERE match_id = ?1 AND player_name = ?2",
                params![id.0, player],
                |row| row.get(0),
            )
            .optional()?;

        match existing {
            None => {
                self.conn.execute(
                    "INSERT INTO player_stats (match_id, player_name, score) VALUES (?1, ?2, ?3)",
                    params![id.0, player, score],
                )?;
                Ok(ScoreWrite::Inserted)
            }
            Some(stored) if stored == score => Ok(ScoreWrite::Unchanged),
            Some(_) => {
                self.conn.execute(
                    "UPDATE player_stats SET score = ?1 WHERE match_id = ?2 AND player_name = ?3",
                    params![score, id.0, player],
                )?;
                Ok(ScoreWrite::Updated)
            }
        }
    }

    pub fn get_match(&self, id: MatchId) -> Result<Option<MatchRecord>, StoreError> {
        let sql = format!("SELECT {} FROM matches WHERE id = ?1", MATCH_COLUMNS);
        let row = self
            .conn
            .query_row(&sql, params![id.0], MatchRow::read)
            .optional()?;
        row.map(MatchRow::into_record).transpose()
    }

    /// All score rows of a match, ordered by player name.
    pub fn player_scores(&self, id: MatchId) -> Result<Vec<PlayerScore>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT player_name, score FROM player_stats WHERE match_id = ?1 ORDER BY player_name",
        )?;
        let rows = stmt.query_map(params![id.0], |row| {
            Ok(PlayerScore {
                match_id: id,
                player_name: row.get(0)?,
                score: row.get(1)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn match_count(&self) -> Result<u64, StoreError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM matches", [], |row| row.get(0))?;
        Ok(count.max(0) as u64)
    }

    /// Closes the connection, reporting any error SQLite raises while doing so.
    pub fn close(self) -> Result<(), StoreError> {
        self.conn.close().map_err(|(_, err)| StoreError::Sqlite(err))
    }
}

/// Raw `matches` row as read from SQLite, before timestamp parsing.
pub(crate) struct MatchRow {
    id: i64,
    map: Option<String>,
    start_time: String,
    end_time: Option<String>,
    total_frags: Option<i64>,
    best_player: Option<String>,
    best_score: Option<i64>,
}

impl MatchRow {
    /// Reads the columns listed in [`MATCH_COLUMNS`], in order.
    pub(crate) fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            map: row.get(1)?,
            start_time: row.get(2)?,
            end_time: row.get(3)?,
            total_frags: row.get(4)?,
            best_player: row.get(5)?,
            best_score: row.get(6)?,
        })
    }

    pub(crate) fn into_record(self) -> Result<MatchRecord, StoreError> {
        Ok(MatchRecord {
            id: MatchId(self.id),
            map: self.map,
            start_time: parse_time(&self.start_time)?,
            end_time: self.end_time.as_deref().map(parse_time).transpose()?,
            total_frags: self.total_frags.unwrap_or(0),
            best_player: self.best_player,
            best_score: self.best_score,
        })
    }
}

fn parse_time(value: &str) -> Result<NaiveDateTime, StoreError> {
    NaiveDateTime::parse_from_str(value, TIME_FORMAT)
        .map_err(|_| StoreError::Timestamp(value.to_string()))
}
