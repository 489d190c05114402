mod cli;

use clap::Parser;
use cli::{Cli, Commands, RunArgs};
use ocr_minion::config::{self, Config};
use ocr_minion::{observability, worker};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Commands::Run(RunArgs::default()));
    let path = cli.config.unwrap_or_else(config::default_config_path);

    let loaded = match &command {
        Commands::Run(args) => Config::load_with_overrides(path, |config| args.apply(config)),
        Commands::CheckConfig => Config::load_with_file(path),
    };
    let config = match loaded {
        Ok(config) => config,
        Err(e) => {
            observability::init_tracing("info");
            tracing::error!(error = %e, "Cannot start");
            return Err(e.into());
        }
    };

    observability::init_tracing(&config.telemetry.log_filter);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "OCR minion");
    config.log_summary();

    match command {
        Commands::Run(_) => worker::run(config).await?,
        Commands::CheckConfig => tracing::info!("Configuration is valid"),
    }

    Ok(())
}
