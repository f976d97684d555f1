//! Prints the aggregate statistics of a collector database as JSON.

use clap::Parser;
use log::info;
use shared::report::{ReportLimits, StatsReport};
use shared::StatsStore;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about = "Dump match statistics as JSON", long_about = None)]
struct Args {
    /// SQLite database written by the collector
    #[arg(long, env = "DB_PATH", default_value = "/app/db/quake_stats.db")]
    db_path: PathBuf,

    /// Number of recent matches to list
    #[arg(long, default_value_t = 5)]
    matches: usize,

    /// Number of rows in each player ranking
    #[arg(long, default_value_t = 10)]
    players: usize,

    /// Number of (player, map) averages to list
    #[arg(long, default_value_t = 10)]
    map_averages: usize,

    /// Number of busiest hours to list
    #[arg(long, default_value_t = 5)]
    hours: usize,

    /// Print on one line instead of indented
    #[arg(long)]
    compact: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let args = Args::parse();
    if !args.db_path.exists() {
        return Err(format!("database {} does not exist", args.db_path.display()).into());
    }

    let store = StatsStore::open(&args.db_path)?;
    let limits = ReportLimits {
        matches: args.matches,
        players: args.players,
        map_averages: args.map_averages,
        hours: args.hours,
    };

    let report = StatsReport::load(&store, limits)?;
    info!(
        "Loaded {} recent matches from {}",
        report.recent_matches.len(),
        args.db_path.display()
    );

    let json = if args.compact {
        serde_json::to_string(&report)?
    } else {
        serde_json::to_string_pretty(&report)?
    };
    println!("{}", json);

    store.close()?;
    Ok(())
}
