// ABOUTME: Command-line entry point for the client data portal backend
// ABOUTME: Runs the HTTP service or resolves a single request id from the terminal

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tm_client_portal::{server, Config, Orchestrator};

#[derive(Parser)]
#[command(name = "tm-portal", version, about = "Trademark search client data portal backend")]
struct Cli {
    /// Optional TOML config file; environment variables take precedence
    #[arg(long, global = true, env = "PORTAL_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP service
    Serve {
        /// Address to listen on, e.g. 0.0.0.0:3000
        #[arg(long)]
        bind: Option<String>,
    },
    /// Resolve one request id and print the dataset as JSON
    Fetch {
        /// External request id issued by the CRM
        id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tm_client_portal=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let mut config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;
    tracing::debug!(?config, "Configuration loaded");
    config.warn_missing();

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    tracing::info!("Received Ctrl-C, shutting down");
                    shutdown.cancel();
                }
                Err(e) => tracing::warn!("Failed to listen for Ctrl-C: {}", e),
            }
        }
    });

    match cli.command {
        Commands::Serve { bind } => {
            if let Some(bind) = bind {
                config.bind_addr = bind;
            }
            server::serve(&config, shutdown).await
        }
        Commands::Fetch { id } => fetch(&config, &id, &shutdown).await,
    }
}

async fn fetch(config: &Config, id: &str, cancel: &CancellationToken) -> Result<()> {
    let orchestrator = Orchestrator::from_config(config)?;

    match orchestrator.resolve_with_cancel(id, cancel).await {
        Ok(dataset) => {
            let json = serde_json::to_string_pretty(dataset.as_ref())
                .context("Failed to serialize dataset")?;
            println!("{}", json);
            Ok(())
        }
        Err(err) => anyhow::bail!(
            "{} (status {}): {}",
            err.public_message(),
            err.status_code(),
            err
        ),
    }
}
