//! Command line and environment configuration for the collector
//!
//! Every option can be given as a flag or through the environment variable
//! used by the container deployment (`SERVER_IP`, `RCON_PASSWORD`, ...).

use clap::Parser;
use shared::parse_player_list;
use shared::protocol::{DEFAULT_COMMAND, DEFAULT_PORT};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Records match statistics from a Quake 3 server", long_about = None)]
pub struct CliArgs {
    /// Game server host name or IP address
    #[arg(short = 'H', long, env = "SERVER_IP", default_value = "quakejs-proxy")]
    pub host: String,

    /// Game server UDP port
    #[arg(short, long, env = "SERVER_PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Remote console password
    #[arg(long, env = "RCON_PASSWORD", hide_env_values = true)]
    pub rcon_password: String,

    /// Remote console command that prints the scoreboard
    #[arg(long, env = "RCON_COMMAND", default_value = DEFAULT_COMMAND)]
    pub command: String,

    /// Comma separated list of player names to record
    #[arg(short = 't', long, env = "TRACKED_PLAYERS")]
    pub tracked_players: String,

    /// Seconds after a match start before the same map counts as a new match
    #[arg(long, env = "MATCH_TIMEOUT", default_value_t = 3600)]
    pub match_timeout: u64,

    /// SQLite database file
    #[arg(long, env = "DB_PATH", default_value = "/app/db/quake_stats.db")]
    pub db_path: PathBuf,

    /// Milliseconds between two polls
    #[arg(long, env = "POLL_INTERVAL", default_value_t = 2000)]
    pub poll_interval: u64,

    /// Milliseconds to wait for a status reply
    #[arg(long, env = "RCON_TIMEOUT", default_value_t = 2000)]
    pub rcon_timeout: u64,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("rcon password must not be empty")]
    MissingPassword,

    #[error("server host must not be empty")]
    MissingHost,

    #[error("tracked player list is empty")]
    NoTrackedPlayers,

    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),
}

/// Validated collector settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectorConfig {
    pub host: String,
    pub port: u16,
    pub rcon_password: String,
    pub command: String,
    pub tracked_players: BTreeSet<String>,
    pub match_timeout: Duration,
    pub db_path: PathBuf,
    pub poll_interval: Duration,
    pub rcon_timeout: Duration,
}

impl CollectorConfig {
    pub fn from_args(args: CliArgs) -> Result<Self, ConfigError> {
        if args.host.trim().is_empty() {
            return Err(ConfigError::MissingHost);
        }
        if args.rcon_password.is_empty() {
            return Err(ConfigError::MissingPassword);
        }

        let tracked_players = parse_player_list(&args.tracked_players);
        if tracked_players.is_empty() {
            return Err(ConfigError::NoTrackedPlayers);
        }

        if args.match_timeout == 0 {
            return Err(ConfigError::ZeroDuration("match timeout"));
        }
        if args.poll_interval == 0 {
            return Err(ConfigError::ZeroDuration("poll interval"));
        }
        if args.rcon_timeout == 0 {
            return Err(ConfigError::ZeroDuration("rcon timeout"));
        }

        let command = if args.command.trim().is_empty() {
            DEFAULT_COMMAND.to_string()
        } else {
            args.command
        };

        Ok(Self {
            host: args.host.trim().to_string(),
            port: args.port,
            rcon_password: args.rcon_password,
            command,
            tracked_players,
            match_timeout: Duration::from_secs(args.match_timeout),
            db_path: args.db_path,
            poll_interval: Duration::from_millis(args.poll_interval),
            rcon_timeout: Duration::from_millis(args.rcon_timeout),
        })
    }

    /// `host:port` of the game server.
    pub fn server_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
