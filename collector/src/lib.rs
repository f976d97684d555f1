//! # Match Statistics Collector
//!
//! This library polls a Quake 3 compatible game server over the UDP rcon
//! protocol and turns the scoreboard it prints into durable match statistics.
//!
//! ## Core Responsibilities
//!
//! ### Sampling
//! Every poll sends one `rcon <password> status` datagram and waits a bounded
//! time for the reply. A missing reply only means there is no sample for this
//! cycle; the collector keeps running.
//!
//! ### Match Detection
//! The server never announces when a match begins or ends. Boundaries are
//! inferred: a map change ends the running match and starts a new one, and so
//! does a match that started longer ago than the configured timeout.
//!
//! ### Persistence
//! Matches and per-player scores are written to SQLite. Score writes are
//! upserts keyed by (match, player), so polling the same scoreboard again never
//! counts anything twice. A finished match gets its totals and best player
//! written exactly once.
//!
//! ## Architecture Design
//!
//! ### Single Sequential Loop
//! Fetch, parse, record and sleep run one after another on a single task. The
//! decision "is this a new match" reads the store and then writes to it, which
//! is only safe without overlapping polls. No locks are involved.
//!
//! ### Cooperative Shutdown
//! SIGINT and SIGTERM cancel a token. The loop notices it while sleeping between
//! polls, leaves, and closes the socket and the database itself. A database
//! error ends the loop the same way but is returned, so the process exits
//! non-zero.
//!
//! ## Module Organization
//!
//! ### Config Module (`config`)
//! Command line flags with environment variable fallbacks, validated into a
//! `CollectorConfig`.
//!
//! ### Rcon Module (`rcon`)
//! The UDP status client:
//! - ephemeral socket bound at startup
//! - host resolution on every poll
//! - reply deadline and lossy text decoding
//!
//! ### Tracker Module (`tracker`)
//! The match state machine and end-of-match finalization.
//!
//! ### Poller Module (`poller`)
//! Owns the client, store and tracker and drives them until shutdown.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use clap::Parser;
//! use collector::config::{CliArgs, CollectorConfig};
//! use collector::poller::Poller;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = CollectorConfig::from_args(CliArgs::parse())?;
//!     let poller = Poller::new(&config).await?;
//!
//!     let shutdown = CancellationToken::new();
//!     let stats = poller.run(shutdown).await?;
//!     println!("{} polls", stats.cycles);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod poller;
pub mod rcon;
pub mod tracker;
