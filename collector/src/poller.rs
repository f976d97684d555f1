//! Polling loop: fetch, parse, record, sleep
//!
//! Polls are strictly sequential. A status fetch is never interrupted; it ends
//! on its own reply timeout. Only the sleep between polls races the shutdown
//! token, so cancellation takes effect before the next fetch starts.
//!
//! A missing reply only skips the cycle. A storage failure rolls the cycle back
//! and then stops the loop with an error.

use crate::config::CollectorConfig;
use crate::rcon::{FetchError, RconClient, RconSettings};
use crate::tracker::{CycleOutcome, MatchTracker, TrackerState};
use log::{debug, error, info, warn};
use shared::{StatsStore, StatusParser, StoreError};
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

/// Fatal collector failures: startup errors and storage errors while polling.
#[derive(Error, Debug)]
pub enum PollerError {
    #[error("stats database error: {0}")]
    Store(#[from] StoreError),

    #[error("failed to set up rcon client: {0}")]
    Client(#[from] FetchError),
}

/// What happened during one poll.
#[derive(Debug)]
pub enum CycleResult {
    /// The server did not answer; nothing was touched.
    NoReply(FetchError),
    /// The reply held no tracked players.
    Idle,
    Recorded(CycleOutcome),
    /// Writing the sample failed and was rolled back. Ends [`Poller::run`].
    StoreFailed(StoreError),
}

/// Counters for a finished [`Poller::run`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollStats {
    pub cycles: u64,
    pub recorded: u64,
    pub idle: u64,
    pub no_reply: u64,
    pub store_failures: u64,
    pub matches_started: u64,
}

impl PollStats {
    fn count(&mut self, result: &CycleResult) {
        self.cycles += 1;
        match result {
            CycleResult::NoReply(_) => self.no_reply += 1,
            CycleResult::Idle => self.idle += 1,
            CycleResult::Recorded(outcome) => {
                self.recorded += 1;
                if outcome.started {
                    self.matches_started += 1;
                }
            }
            CycleResult::StoreFailed(_) => self.store_failures += 1,
        }
    }
}

/// Owns the rcon client, the store and the tracker for the lifetime of the
/// collector.
pub struct Poller {
    client: Option<RconClient>,
    store: Option<StatsStore>,
    parser: StatusParser,
    tracker: MatchTracker,
    poll_interval: Duration,
}

impl Poller {
    /// Opens the database (creating the schema if needed), then binds the
    /// client socket. If the socket fails the database is closed again.
    pub async fn new(config: &CollectorConfig) -> Result<Self, PollerError> {
        let store = StatsStore::open(&config.db_path)?;

        let settings = RconSettings {
            host: config.host.clone(),
            port: config.port,
            password: config.rcon_password.clone(),
            command: config.command.clone(),
            reply_timeout: config.rcon_timeout,
        };

        let client = match RconClient::connect(settings).await {
            Ok(client) => client,
            Err(e) => {
                if let Err(close_err) = store.close() {
                    warn!("Failed to close database after startup error: {}", close_err);
                }
                return Err(e.into());
            }
        };

        let parser = StatusParser::new(config.tracked_players.iter().cloned());
        info!(
            "Tracking players: {}",
            parser
                .tracked_players()
                .iter()
                .cloned()
                .collect::<Vec<_>>()
                .join(", ")
        );

        Ok(Self {
            client: Some(client),
            store: Some(store),
            parser,
            tracker: MatchTracker::new(config.match_timeout),
            poll_interval: config.poll_interval,
        })
    }

    pub fn store(&self) -> Option<&StatsStore> {
        self.store.as_ref()
    }

    pub fn tracker_state(&self) -> &TrackerState {
        self.tracker.state()
    }

    pub fn is_shut_down(&self) -> bool {
        self.client.is_none() && self.store.is_none()
    }

    /// Runs a single fetch, parse and record step.
    pub async fn poll_once(&mut self) -> CycleResult {
        let Some(client) = self.client.as_ref() else {
            return CycleResult::NoReply(FetchError::Closed);
        };

        let raw = match client.fetch_status().await {
            Ok(raw) => raw,
            Err(e) => {
                warn!("No status this cycle: {}", e);
                return CycleResult::NoReply(e);
            }
        };

        let sample = self.parser.parse(&raw);
        if !sample.is_actionable() {
            debug!("No tracked players in status reply");
            return CycleResult::Idle;
        }

        // the connection is not Sync, so it is only borrowed after the await
        let Some(store) = self.store.as_ref() else {
            return CycleResult::NoReply(FetchError::Closed);
        };

        match self.tracker.handle_sample(store, &sample) {
            Ok(Some(outcome)) => CycleResult::Recorded(outcome),
            Ok(None) => CycleResult::Idle,
            Err(e) => {
                error!("Failed to record sample, cycle rolled back: {}", e);
                CycleResult::StoreFailed(e)
            }
        }
    }

    /// Polls until `shutdown` is cancelled, then tears everything down.
    ///
    /// A storage failure also ends the loop; the socket and database are
    /// closed before the error is returned.
    pub async fn run(mut self, shutdown: CancellationToken) -> Result<PollStats, PollerError> {
        let mut stats = PollStats::default();
        info!("Collector started, polling every {:?}", self.poll_interval);

        while !shutdown.is_cancelled() {
            let result = self.poll_once().await;
            stats.count(&result);

            if let CycleResult::StoreFailed(e) = result {
                error!("Stopping after {} polls on database error", stats.cycles);
                self.shutdown();
                return Err(e.into());
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = sleep(self.poll_interval) => {}
            }
        }

        info!(
            "Stopping after {} polls ({} recorded, {} without reply, {} store failures)",
            stats.cycles, stats.recorded, stats.no_reply, stats.store_failures
        );
        self.shutdown();
        Ok(stats)
    }

    /// Closes the socket, then the database. Safe to call more than once.
    pub fn shutdown(&mut self) {
        if let Some(mut client) = self.client.take() {
            client.close();
        }
        if let Some(store) = self.store.take() {
            match store.close() {
                Ok(()) => info!("Database closed"),
                Err(e) => error!("Failed to close database: {}", e),
            }
        }
    }
}
