//! Command implementations for the refresh daemon.
//!
//! Handles:
//! - start: load config, register the daily refresh, run until signalled
//! - stop: signal the running daemon (via PID file)
//! - status: daemon liveness and the last persisted run report
//! - run-once: one pipeline run in this process
//! - config: print effective settings

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::signal;
use tracing::{info, warn};

use refresh_pipeline::{load_last_report, BlobStore};
use refresh_scheduler::jobs::{create_refresh_job, RefreshJobConfig};
use refresh_scheduler::{SchedulerConfig, SchedulerService};
use refresh_types::{BlobBackend, RunReport, Settings};

use crate::services::{dry_run_runner, dry_run_settings, live_runner};

/// Get the PID file path
pub fn pid_file_path() -> PathBuf {
    directories::BaseDirs::new()
        .map(|dirs| {
            #[cfg(unix)]
            {
                dirs.runtime_dir()
                    .map(|p| p.to_path_buf())
                    .unwrap_or_else(|| dirs.cache_dir().to_path_buf())
            }
            #[cfg(not(unix))]
            {
                dirs.cache_dir().to_path_buf()
            }
        })
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("kb-refresh")
        .join("daemon.pid")
}

fn write_pid_file() -> Result<()> {
    let pid_path = pid_file_path();
    if let Some(parent) = pid_path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&pid_path, std::process::id().to_string())?;
    info!("Wrote PID file: {:?}", pid_path);
    Ok(())
}

fn remove_pid_file() {
    let pid_path = pid_file_path();
    if pid_path.exists() {
        if let Err(e) = fs::remove_file(&pid_path) {
            warn!("Failed to remove PID file: {}", e);
        } else {
            info!("Removed PID file");
        }
    }
}

fn read_pid_file() -> Option<u32> {
    fs::read_to_string(pid_file_path())
        .ok()
        .and_then(|s| s.trim().parse().ok())
}

#[cfg(unix)]
fn is_process_running(pid: u32) -> bool {
    // Signal 0 only checks that the process exists
    unsafe { libc::kill(pid as i32, 0) == 0 }
}

#[cfg(not(unix))]
fn is_process_running(_pid: u32) -> bool {
    true
}

/// PID of a live daemon on this host, if any.
fn running_daemon() -> Option<u32> {
    read_pid_file().filter(|pid| is_process_running(*pid))
}

/// Load settings and apply CLI overrides.
pub fn load_settings(config_path: Option<&str>, log_level: Option<&str>) -> Result<Settings> {
    let mut settings = Settings::load(config_path).context("Failed to load configuration")?;
    if let Some(level) = log_level {
        settings.log_level = level.to_string();
    }
    Ok(settings)
}

/// Install the global subscriber. `RUST_LOG` wins over the configured level.
///
/// A second call in the same process is ignored.
pub fn init_logging(log_level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
        _ = terminate => info!("Received SIGTERM, shutting down..."),
    }
}

/// Start the daemon.
///
/// 1. Load and validate configuration
/// 2. Wire the pipeline against live services
/// 3. Register the daily refresh job and start the scheduler
/// 4. Shut down gracefully on SIGINT/SIGTERM
pub async fn start_daemon(
    config_path: Option<&str>,
    foreground: bool,
    cron_override: Option<&str>,
    timezone_override: Option<&str>,
    log_level_override: Option<&str>,
) -> Result<()> {
    let mut settings = load_settings(config_path, log_level_override)?;
    if let Some(cron) = cron_override {
        settings.schedule.cron = cron.to_string();
    }
    if let Some(tz) = timezone_override {
        settings.schedule.timezone = tz.to_string();
    }
    init_logging(&settings.log_level);
    settings.validate().context("Invalid configuration")?;

    if let Some(pid) = running_daemon() {
        anyhow::bail!("Daemon already running (PID {})", pid);
    }

    info!("Refresh daemon starting...");
    info!("  Knowledge index: {}", settings.knowledge_index_id);
    info!("  Consumer: {}", settings.consumer.id);
    info!("  Schedule: {} ({})", settings.schedule.cron, settings.schedule.timezone);
    info!("  Log level: {}", settings.log_level);

    if !foreground {
        warn!("Background mode not implemented, running in foreground");
        warn!("Use a process manager (systemd, launchd) for background operation");
    }

    let runner = Arc::new(live_runner(&settings)?);
    let mut scheduler = SchedulerService::new(
        SchedulerConfig::default().with_timezone(settings.schedule.timezone.clone()),
    )
    .await
    .context("Failed to create scheduler")?;
    create_refresh_job(&scheduler, runner, RefreshJobConfig::from(&settings))
        .await
        .context("Failed to register refresh job")?;

    write_pid_file()?;
    let result = async {
        scheduler.start().await.context("Failed to start scheduler")?;
        shutdown_signal().await;
        scheduler.shutdown().await.context("Scheduler shutdown failed")
    }
    .await;

    remove_pid_file();
    result
}

/// Stop the running daemon by sending SIGTERM.
pub fn stop_daemon() -> Result<()> {
    let pid = read_pid_file().context("No PID file found - daemon may not be running")?;

    if !is_process_running(pid) {
        remove_pid_file();
        anyhow::bail!("Daemon not running (stale PID file removed)");
    }

    #[cfg(unix)]
    {
        // SAFETY: kill has no memory-safety preconditions
        if unsafe { libc::kill(pid as i32, libc::SIGTERM) } != 0 {
            anyhow::bail!("Failed to send SIGTERM to daemon");
        }
        println!("Sent SIGTERM to daemon (PID {})", pid);
    }

    #[cfg(not(unix))]
    {
        anyhow::bail!("Stop command not implemented on this platform");
    }

    Ok(())
}

fn print_report(report: &RunReport) {
    println!("Last run {}", report.run_id);
    println!("  Status:   {}", report.status);
    println!("  Started:  {}", report.started_at.to_rfc3339());
    if let Some(finished) = report.finished_at {
        let elapsed = finished - report.started_at;
        println!(
            "  Finished: {} ({}s)",
            finished.to_rfc3339(),
            elapsed.num_seconds()
        );
    }
    println!("  Message:  {}", report.message);
    for step in &report.steps {
        println!(
            "  - {:<9} {:<9} attempts={} elapsed={}ms {}",
            step.stage.to_string(),
            step.outcome.to_string(),
            step.attempts,
            step.elapsed_ms,
            step.message
        );
    }
}

/// Show daemon liveness and the last run report.
pub async fn show_status(config_path: Option<&str>, json: bool) -> Result<()> {
    let pid_path = pid_file_path();
    match read_pid_file() {
        Some(pid) if is_process_running(pid) => {
            println!("Refresh daemon is running (PID {})", pid);
        }
        Some(pid) => {
            println!(
                "Refresh daemon is NOT running (stale PID {} in {:?})",
                pid, pid_path
            );
        }
        None => println!("Refresh daemon is NOT running (no PID file)"),
    }

    let settings = load_settings(config_path, None)?;
    if settings.blob.backend == BlobBackend::Memory {
        println!("No run history: blob backend is in-memory");
        return Ok(());
    }
    let blob = BlobStore::from_settings(&settings).context("Failed to open blob store")?;
    match load_last_report(&blob, &settings.blob.report_key)
        .await
        .context("Failed to read last run report")?
    {
        Some(report) if json => println!("{}", report.to_json_pretty()?),
        Some(report) => print_report(&report),
        None => println!("No run recorded in {}", blob.describe()),
    }
    Ok(())
}

/// Run the pipeline once in this process.
///
/// Refuses while a daemon is alive unless `force` is set, since the two
/// runs would race on the same partitions and consumer pointer.
pub async fn run_once(
    config_path: Option<&str>,
    log_level_override: Option<&str>,
    dry_run: bool,
    force: bool,
) -> Result<RunReport> {
    let settings = load_settings(config_path, log_level_override)?;
    init_logging(&settings.log_level);

    if !dry_run && !force {
        if let Some(pid) = running_daemon() {
            anyhow::bail!(
                "Daemon is running (PID {}) and its runs would overlap; use --force to run anyway",
                pid
            );
        }
    }

    let report = if dry_run {
        let settings = dry_run_settings(&settings);
        settings.validate().context("Invalid configuration")?;
        let (runner, index) = dry_run_runner(&settings)?;
        let report = runner.run().await;
        info!(
            jobs = index.started_jobs().len(),
            aliases = index.aliases().len(),
            "Dry run finished"
        );
        report
    } else {
        settings.validate().context("Invalid configuration")?;
        live_runner(&settings)?.run().await
    };

    println!("{}", report.to_json_pretty()?);
    Ok(report)
}

/// Print the effective settings as TOML with secrets redacted.
pub fn show_config(config_path: Option<&str>) -> Result<()> {
    let settings = load_settings(config_path, None)?;
    let rendered =
        toml::to_string_pretty(&settings.redacted()).context("Failed to render configuration")?;
    print!("{}", rendered);
    if let Err(e) = settings.validate() {
        eprintln!("warning: {}", e);
    }
    Ok(())
}
