//! Fixture analyzer daemon, for smoke-testing an orchestrator.
//!
//! Usage:
//!     periderm-analyzer --port 10100 --path '/etc/hosts' --finding

use anyhow::{Context, Result};
use clap::Parser;
use periderm_analyzer::{AnalyzerServer, FixtureAnalyzer, ServeConfig};
use periderm_protocol::defaults;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(
    name = "periderm-analyzer",
    about = "Fixture analyzer for the Periderm distributed scanner"
)]
struct Args {
    /// Interface to listen on
    #[arg(long, default_value = defaults::DEFAULT_BIND)]
    bind: String,

    /// TCP port to listen on
    #[arg(long, default_value_t = defaults::DEFAULT_ANALYZER_PORT)]
    port: u16,

    /// Path pattern to declare interest in, repeatable
    #[arg(long = "path", default_value = "^/etc/hosts$")]
    paths: Vec<String>,

    /// Report a canned finding for every analyzed batch
    #[arg(long)]
    finding: bool,

    /// Path to the server certificate (PEM). Requires --key.
    #[arg(long)]
    cert: Option<PathBuf>,

    /// Path to the server private key (PEM). Requires --cert.
    #[arg(long)]
    key: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "periderm_analyzer=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    tracing::info!("Starting Periderm fixture analyzer");
    tracing::info!("  Bind: {}:{}", args.bind, args.port);
    tracing::info!("  Patterns: {:?}", args.paths);

    let tls = periderm_security::server_config(args.cert.as_deref(), args.key.as_deref(), None)
        .context("invalid TLS configuration")?;

    let patterns: Vec<&str> = args.paths.iter().map(String::as_str).collect();
    let analyzer = Arc::new(FixtureAnalyzer::new(&patterns, args.finding));

    let server = AnalyzerServer::bind(ServeConfig {
        bind: args.bind,
        port: args.port,
        tls,
    })
    .await?;

    server.run(analyzer).await
}
