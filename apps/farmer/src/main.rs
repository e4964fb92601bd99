//! shardkeep farmer entry point.

mod app;
mod config;

use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "shardkeep-farmer")]
#[command(about = "Serves shard consign/retrieve sessions over a token-gated data channel", long_about = None)]
struct Cli {
    /// Configuration file (default: ~/.config/shardkeep/farmer.toml)
    #[arg(short, long, env = "SHARDKEEP_CONFIG")]
    config: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        "starting shardkeep farmer"
    );

    let path = cli.config.unwrap_or_else(config::default_config_path);
    let config = config::Config::load(&path)?;
    tracing::info!(path = %path.display(), listen = %config.listen, "configuration loaded");

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(app::run(config))?;

    tracing::info!("farmer shut down cleanly");
    Ok(())
}
