//! Periderm collector binary.
//!
//! Usage:
//!     periderm-collector --orchestrator 127.0.0.1:10000 --root /

use anyhow::{Context, Result};
use clap::Parser;
use periderm_collector::{run_scan, OrchestratorClient};
use periderm_protocol::defaults;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(
    name = "periderm-collector",
    about = "Filesystem collector for the Periderm distributed scanner"
)]
struct Args {
    /// Orchestrator address
    #[arg(long, default_value = "127.0.0.1:10000")]
    orchestrator: String,

    /// Filesystem root to scan
    #[arg(long, default_value = "/")]
    root: PathBuf,

    /// CA certificate used to verify the orchestrator's certificate
    #[arg(long)]
    ca_cert: Option<PathBuf>,

    /// Chunk size for file content, in bytes
    #[arg(long, default_value_t = defaults::CHUNK_SIZE)]
    chunk_size: usize,

    /// Per-call deadline, in seconds
    #[arg(long, default_value_t = 60)]
    deadline_secs: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "periderm_collector=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    tracing::info!("Starting Periderm collector");
    tracing::info!("  Orchestrator: {}", args.orchestrator);
    tracing::info!("  Root: {}", args.root.display());

    let tls = periderm_security::client_config(args.ca_cert.as_deref())
        .context("invalid TLS configuration")?
        .map(Arc::new);

    let client = OrchestratorClient::new(
        args.orchestrator,
        tls,
        Duration::from_secs(args.deadline_secs),
    );

    let outcome = run_scan(&client, &args.root, args.chunk_size).await?;

    println!("{}", serde_json::to_string_pretty(&outcome.findings)?);
    Ok(())
}
