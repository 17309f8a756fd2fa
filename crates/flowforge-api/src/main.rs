//! Flowforge CLI and HTTP server entry point.
//!
//! Binary name: `flowforge`
//!
//! Loads `config.toml` from the data directory, installs tracing, then runs
//! an offline check (`validate`, `plan`) or the engine (`serve`).

mod cli;
mod http;
mod state;

use clap::Parser;

use cli::{Cli, Commands};
use flowforge_infra::config::{load_engine_config, resolve_data_dir};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let data_dir = cli.data_dir.clone().unwrap_or_else(resolve_data_dir);

    let mut config = load_engine_config(&data_dir).await;
    if let Some(filter) = cli.log_filter() {
        config.logging.filter = filter.to_string();
    }
    flowforge_observe::init_tracing(&config.logging)
        .map_err(|e| anyhow::anyhow!("failed to initialise tracing: {e}"))?;

    let result = match cli.command {
        Commands::Validate { file } => cli::workflow::handle_validate(&file, cli.json),
        Commands::Plan { file } => cli::workflow::handle_plan(&file, cli.json),
        Commands::Serve { bind } => cli::serve::serve(&config, data_dir, bind).await,
    };

    flowforge_observe::shutdown_tracing();
    result
}
