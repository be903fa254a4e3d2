//! Command-line interface for groundstation.
//!
//! This module provides the CLI structure and command handlers for the
//! `gstation` binary.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub use commands::{
    ConfigCommand, HistoryCommand, LogsCommand, OutputFormat, SampleCommand, ServeCommand,
    ServiceCommand, StatusCommand, UnitArg,
};

/// gstation - Drone ground station telemetry
///
/// Serves live environmental, battery and host telemetry next to the drone's
/// camera stream, records flight logs and keeps a sample archive.
#[derive(Debug, Parser)]
#[command(name = "gstation")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to custom configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// The command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the telemetry server and sampler
    Serve(ServeCommand),

    /// Take one sample and print it
    Sample(SampleCommand),

    /// Show archived samples
    History(HistoryCommand),

    /// List or verify flight logs
    #[command(subcommand)]
    Logs(LogsCommand),

    /// Render or install systemd units
    #[command(subcommand)]
    Service(ServiceCommand),

    /// Show archive and configuration status
    Status(StatusCommand),

    /// Apply the archive retention policy now
    Prune,

    /// View or validate configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

impl Cli {
    /// Get the verbosity level based on flags.
    #[must_use]
    pub fn verbosity(&self) -> crate::logging::Verbosity {
        if self.quiet {
            crate::logging::Verbosity::Quiet
        } else {
            match self.verbose {
                0 => crate::logging::Verbosity::Normal,
                1 => crate::logging::Verbosity::Verbose,
                _ => crate::logging::Verbosity::Trace,
            }
        }
    }
}
