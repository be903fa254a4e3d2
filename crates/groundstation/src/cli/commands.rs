//! CLI command definitions.
//!
//! This module defines the structure of all CLI subcommands.

use std::path::PathBuf;

use clap::{Args, Subcommand, ValueEnum};

use crate::config::{Config, SensorBackend};
use crate::service::UnitKind;

/// Serve command arguments.
#[derive(Debug, Default, Args)]
pub struct ServeCommand {
    /// Address to bind, overriding `server.bind_address`
    #[arg(short, long, value_name = "ADDR")]
    pub bind: Option<String>,

    /// Port to listen on, overriding `server.port`
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Use simulated sensors instead of hardware
    #[arg(long)]
    pub simulate: bool,
}

impl ServeCommand {
    /// Apply the command-line overrides to `config`.
    pub fn apply(&self, config: &mut Config) {
        if let Some(bind) = &self.bind {
            config.server.bind_address.clone_from(bind);
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if self.simulate {
            config.sensor.backend = SensorBackend::Simulated;
        }
    }
}

/// Sample command arguments.
#[derive(Debug, Args)]
pub struct SampleCommand {
    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,

    /// Use simulated sensors instead of hardware
    #[arg(long)]
    pub simulate: bool,
}

/// History command arguments.
#[derive(Debug, Args)]
pub struct HistoryCommand {
    /// Maximum number of samples, newest first
    #[arg(short, long, default_value = "20")]
    pub limit: usize,

    /// Output format
    #[arg(short, long, value_enum, default_value = "table")]
    pub format: OutputFormat,
}

/// Flight log commands.
#[derive(Debug, Subcommand)]
pub enum LogsCommand {
    /// List recorded flight logs
    List {
        /// Maximum number of logs, newest first
        #[arg(short, long, default_value = "20")]
        limit: usize,

        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Check a finished log file against its recorded digest
    Verify {
        /// Archive id of the log
        id: i64,
    },
}

/// systemd unit commands.
#[derive(Debug, Subcommand)]
pub enum ServiceCommand {
    /// Print a unit file
    Render {
        /// Which unit
        #[arg(value_enum)]
        unit: UnitArg,
    },

    /// Write a unit file into the unit directory
    Install {
        /// Which unit
        #[arg(value_enum)]
        unit: UnitArg,

        /// Directory to write into, overriding `service.unit_dir`
        #[arg(short, long, value_name = "DIR")]
        dir: Option<PathBuf>,
    },
}

/// Status command arguments.
#[derive(Debug, Args)]
pub struct StatusCommand {
    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Configuration commands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Show the configuration file path
    Path,

    /// Validate configuration
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
}

/// Unit argument for the service commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum UnitArg {
    /// The `camera-streamer` unit
    Camera,
    /// The ground station unit
    Station,
}

impl From<UnitArg> for UnitKind {
    fn from(arg: UnitArg) -> Self {
        match arg {
            UnitArg::Camera => Self::Camera,
            UnitArg::Station => Self::Station,
        }
    }
}

/// Output format for commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Plain text output
    #[default]
    Plain,
    /// Formatted table
    Table,
    /// JSON output
    Json,
}
