//! icond - PWA icon generation daemon

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use icond::{Config, Server};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// PWA icon generation server
#[derive(Parser, Debug)]
#[command(name = "icond", version, about = "Generate PWA icon sets from text prompts")]
struct Args {
    /// TOML config file (ICOND_* environment variables override it)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to listen on
    #[arg(long)]
    bind: Option<SocketAddr>,

    /// Base URL of the diffusion service
    #[arg(long)]
    synth_url: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "icond=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let mut config = Config::load(args.config.as_deref()).context("failed to load config")?;
    if let Some(bind) = args.bind {
        config.bind_addr = bind;
    }
    if let Some(url) = args.synth_url {
        config.synth_url = Some(url);
    }

    match &config.synth_url {
        Some(url) => info!("Using diffusion service at {}", url),
        None => info!("No diffusion service configured; generation requests will fail"),
    }

    let server = Server::new(config)?;
    server.run().await?;

    Ok(())
}
