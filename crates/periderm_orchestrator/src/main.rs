//! Periderm orchestrator daemon.
//!
//! Usage:
//!     periderm-orchestrator --port 10000 --analyzer 127.0.0.1:10100

use anyhow::{Context, Result};
use clap::Parser;
use periderm_orchestrator::{AnalyzerRegistry, Orchestrator, ScanStore, Server, ServerConfig};
use periderm_protocol::defaults;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(
    name = "periderm-orchestrator",
    about = "Scan orchestrator for the Periderm distributed scanner"
)]
struct Args {
    /// Interface to listen on
    #[arg(long, default_value = defaults::DEFAULT_BIND)]
    bind: String,

    /// TCP port to listen on
    #[arg(long, default_value_t = defaults::DEFAULT_PORT)]
    port: u16,

    /// Path to the server certificate (PEM). Requires --server-key.
    #[arg(long)]
    server_cert: Option<PathBuf>,

    /// Path to the server private key (PEM). Requires --server-cert.
    #[arg(long)]
    server_key: Option<PathBuf>,

    /// CA certificate used to require and verify client certificates
    #[arg(long)]
    client_ca: Option<PathBuf>,

    /// Analyzer endpoint, repeatable
    #[arg(long = "analyzer")]
    analyzers: Vec<String>,

    /// CA certificate used to verify analyzer server certificates
    #[arg(long)]
    analyzer_ca: Option<PathBuf>,

    /// Per-call deadline for analyzer RPCs, in seconds
    #[arg(long, default_value_t = defaults::ANALYZER_CALL_DEADLINE.as_secs())]
    analyzer_deadline_secs: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "periderm_orchestrator=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    tracing::info!("Starting Periderm orchestrator");
    tracing::info!("  Bind: {}:{}", args.bind, args.port);
    tracing::info!("  Analyzers: {:?}", args.analyzers);

    let server_tls = periderm_security::server_config(
        args.server_cert.as_deref(),
        args.server_key.as_deref(),
        args.client_ca.as_deref(),
    )
    .context("invalid server TLS configuration")?;

    let analyzer_tls = periderm_security::client_config(args.analyzer_ca.as_deref())
        .context("invalid analyzer TLS configuration")?
        .map(Arc::new);

    let analyzer_deadline = Duration::from_secs(args.analyzer_deadline_secs);
    let (registry, initial_interests) =
        AnalyzerRegistry::connect(&args.analyzers, analyzer_tls, analyzer_deadline)
            .await
            .context("analyzer startup failed")?;

    let store = Arc::new(ScanStore::with_default_ttls());
    store.spawn_sweeper(defaults::SCAN_SWEEP_INTERVAL);

    let service = Arc::new(Orchestrator::new(
        store,
        registry,
        initial_interests,
        analyzer_deadline,
    ));

    let server = Server::bind(ServerConfig {
        bind: args.bind,
        port: args.port,
        tls: server_tls,
    })
    .await?;

    server.run(service).await
}
