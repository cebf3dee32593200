//! Knowledge Refresh Daemon
//!
//! Runs the extract, transform, and sync pipeline on a daily schedule and
//! rotates the serving alias after every partition has been re-indexed.
//!
//! # Usage
//!
//! ```bash
//! refresh-daemon start [--foreground] [--cron EXPR] [--timezone TZ]
//! refresh-daemon stop
//! refresh-daemon status [--json]
//! refresh-daemon run-once [--dry-run] [--force]
//! refresh-daemon config
//! ```
//!
//! # Configuration
//!
//! Configuration is loaded in order (later sources override earlier):
//! 1. Built-in defaults
//! 2. Config file (<config dir>/kb-refresh/config.toml)
//! 3. `--config` file
//! 4. Environment variables (REFRESH_*)
//! 5. CLI flags

use anyhow::Result;
use clap::Parser;

use refresh_daemon::{
    run_once, show_config, show_status, start_daemon, stop_daemon, Cli, Commands,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Start {
            foreground,
            cron,
            timezone,
        } => {
            start_daemon(
                cli.config.as_deref(),
                foreground,
                cron.as_deref(),
                timezone.as_deref(),
                cli.log_level.as_deref(),
            )
            .await?;
        }
        Commands::Stop => {
            stop_daemon()?;
        }
        Commands::Status { json } => {
            show_status(cli.config.as_deref(), json).await?;
        }
        Commands::RunOnce { dry_run, force } => {
            let report =
                run_once(cli.config.as_deref(), cli.log_level.as_deref(), dry_run, force).await?;
            if !report.is_success() {
                std::process::exit(1);
            }
        }
        Commands::Config => {
            show_config(cli.config.as_deref())?;
        }
    }

    Ok(())
}
