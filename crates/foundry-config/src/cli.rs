//! Command-line argument parsing.

use std::path::PathBuf;

use clap::Parser;

use crate::Config;

/// Foundry networking command-line arguments.
///
/// Any flag given here wins over the value in `config.ron`.
#[derive(Parser, Debug)]
#[command(name = "foundry", about = "Foundry entity replication")]
pub struct CliArgs {
    /// Sync ticks per second.
    #[arg(long)]
    pub tick_rate: Option<u32>,

    /// Default event queue bound.
    #[arg(long)]
    pub max_event_queue: Option<u32>,

    /// Ownership request timeout in milliseconds.
    #[arg(long)]
    pub ownership_timeout_ms: Option<u64>,

    /// Player id acting as graph authority.
    #[arg(long)]
    pub host: Option<u64>,

    /// Log filter directive, e.g. `debug` or `foundry_replication=trace`.
    #[arg(long)]
    pub log_level: Option<String>,

    /// Number of ticks the demo session runs for.
    #[arg(long, default_value_t = 40)]
    pub ticks: u32,

    /// Directory holding `config.ron` and `logs/`.
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl Config {
    /// Overwrite fields with any flags that were passed.
    pub fn apply_cli_overrides(&mut self, args: &CliArgs) {
        if let Some(rate) = args.tick_rate {
            self.network.tick_rate_hz = rate;
        }
        if let Some(len) = args.max_event_queue {
            self.network.max_event_queue_length = len;
        }
        if let Some(ms) = args.ownership_timeout_ms {
            self.network.ownership_timeout_ms = ms;
        }
        if let Some(host) = args.host {
            self.network.host_player_id = Some(host);
        }
        if let Some(ref level) = args.log_level {
            self.debug.log_level = level.clone();
        }
    }
}
