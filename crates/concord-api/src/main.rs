//! ConcordKV topology server binary.

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use concord_api::{build_service, start_server, ServerConfig};
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// ConcordKV topology service.
#[derive(Debug, Parser)]
#[command(name = "concordkv-topology", version, about)]
struct Cli {
    /// Path to a JSON or TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the bind address from the config file
    #[arg(short, long)]
    bind: Option<String>,

    /// Log format: plain or json
    #[arg(long, default_value = "plain")]
    log_format: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_format)?;

    let mut config = match &cli.config {
        Some(path) => match ServerConfig::load(path) {
            Ok(config) => config,
            Err(e) => {
                error!(error = %e, "Failed to load configuration");
                std::process::exit(1);
            }
        },
        None => ServerConfig::default(),
    };
    if let Some(bind) = cli.bind {
        config.bind_addr = bind;
    }

    let service = match build_service(&config).await {
        Ok(service) => service,
        Err(e) => {
            error!(error = %e, "Failed to start topology service");
            std::process::exit(1);
        }
    };

    info!(bind_addr = %config.bind_addr, "ConcordKV topology server ready");

    let server = start_server(config, std::sync::Arc::clone(&service));
    tokio::select! {
        result = server => {
            if let Err(e) = result {
                error!(error = %e, "Server error");
            }
        }
        _ = signal::ctrl_c() => {
            info!("Shutdown signal received");
        }
    }

    service.stop().await;
    info!("ConcordKV topology server stopped");
    Ok(())
}

/// Install the tracing subscriber.
fn init_logging(format: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_target(true))
                .init();
        }
    }
    Ok(())
}
