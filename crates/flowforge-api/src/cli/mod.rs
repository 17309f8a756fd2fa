//! CLI command definitions for the `flowforge` binary.

pub mod serve;
pub mod workflow;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Workflow orchestration engine.
#[derive(Parser)]
#[command(name = "flowforge", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for debug, -vv for trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Data directory (database, plugins, results, config.toml).
    #[arg(long, global = true, env = "FLOWFORGE_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Log filter forced by `-v`/`--quiet`, if any.
    pub fn log_filter(&self) -> Option<&'static str> {
        match self.verbose {
            0 if self.quiet => Some("error"),
            0 => None,
            1 => Some("info,flowforge_core=debug,flowforge_infra=debug,flowforge_api=debug"),
            _ => Some("trace"),
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Check a workflow definition and print every problem found.
    Validate {
        /// Path to the workflow JSON file.
        file: PathBuf,
    },

    /// Print the order in which a workflow's tasks become runnable.
    Plan {
        /// Path to the workflow JSON file.
        file: PathBuf,
    },

    /// Run the engine: queue workers, time triggers and the HTTP server.
    Serve {
        /// Listen address, overriding `[server] bind`.
        #[arg(long)]
        bind: Option<String>,
    },
}
