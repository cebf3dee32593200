//! CLI argument parsing for the refresh daemon.
//!
//! CLI flags override every other configuration source.

use clap::{Parser, Subcommand};

/// Knowledge refresh daemon
///
/// Re-indexes knowledge-index partitions on a daily schedule and rotates the
/// serving alias once every partition has been processed.
#[derive(Parser, Debug)]
#[command(name = "refresh-daemon")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to config file (overrides default <config dir>/kb-refresh/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Set log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the daemon and run the refresh on its daily schedule
    Start {
        /// Run in foreground (don't daemonize)
        #[arg(short, long)]
        foreground: bool,

        /// Override the schedule (6-field cron expression)
        #[arg(long)]
        cron: Option<String>,

        /// Override the schedule timezone (IANA name)
        #[arg(long)]
        timezone: Option<String>,
    },

    /// Stop the running daemon
    Stop,

    /// Show daemon liveness and the last run report
    Status {
        /// Print the last report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run the pipeline once now and print the report as JSON
    RunOnce {
        /// Use in-memory doubles for the knowledge index, consumer config, and blob store
        #[arg(long)]
        dry_run: bool,

        /// Run even if a daemon is alive on this host
        #[arg(long)]
        force: bool,
    },

    /// Print the effective configuration with secrets redacted
    Config,
}
