mod cli;
mod commands;
mod settings;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Commands};
use settings::RunnerConfig;

#[tokio::main]
async fn main() -> Result<()> {
    let default_level = "info";
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .or_else(|_| EnvFilter::try_new(default_level))
                .unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .try_init();

    let cli = Cli::parse();
    let config = RunnerConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Run => commands::run(&config).await,
        Commands::Add { texts, video } => commands::add(&config, texts, video).await,
        Commands::List => commands::list(&config).await,
        Commands::Recover => commands::recover(&config).await,
        Commands::Generate {
            context,
            count,
            video,
            enhanced,
        } => commands::generate(&config, context, count, video, enhanced).await,
    }
}
