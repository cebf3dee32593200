//! Refresh daemon library exports.
//!
//! # Modules
//!
//! - `cli`: command-line parsing with clap
//! - `commands`: start, stop, status, run-once, config
//! - `services`: wiring settings to live or dry-run collaborators

pub mod cli;
pub mod commands;
pub mod services;

pub use cli::{Cli, Commands};
pub use commands::{
    init_logging, load_settings, pid_file_path, run_once, show_config, show_status, start_daemon,
    stop_daemon,
};
pub use services::{dry_run_runner, dry_run_settings, live_runner};
