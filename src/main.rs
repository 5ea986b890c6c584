use anyhow::Result;
use clap::Parser;

mod cli;

use cli::{Cli, Commands};

fn main() -> Result<()> {
    let cli = Cli::parse();

    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?
        .block_on(async_main(cli))
}

async fn async_main(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Caption(args) => {
            let config = cli::common::load_config(cli.config.as_deref())?;
            init_logging(cli.verbose, &config.logging.level);
            cli::caption::run(args, config).await
        }
        Commands::Config(args) => {
            init_logging(cli.verbose, "warn");
            cli::config::run(args, cli.config.as_deref()).await
        }
    }
}

fn init_logging(verbose: bool, configured: &str) {
    // Logs go to stderr; stdout carries only the caption.
    let log_level = if verbose { "debug" } else { configured };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .init();
}
