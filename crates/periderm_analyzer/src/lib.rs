//! Analyzer contract for Periderm.
//!
//! An analyzer inspects the files it declared interest in and returns
//! findings to the orchestrator. Each analyzer exposes exactly two
//! operations: its initial interests, queried once at orchestrator
//! startup, and file analysis, which may express further interests
//! based on what it has seen.

pub mod fixture;
pub mod serve;

pub use fixture::FixtureAnalyzer;
pub use serve::{AnalyzerServer, ServeConfig};

use async_trait::async_trait;
use periderm_protocol::{AnalyzeFilesResponse, AssembledFile, Interest};

/// The two-method contract every analyzer implements.
///
/// Files arrive pre-assembled; chunking is an orchestrator concern and
/// never visible here. `data` is `None` for metadata-only deliveries.
#[async_trait]
pub trait Analyzer: Send + Sync + 'static {
    /// The interests recorded for this analyzer at orchestrator
    /// startup.
    async fn initial_interests(&self) -> anyhow::Result<Vec<Interest>>;

    /// Inspect a batch of routed files. New interests returned here are
    /// merged into the scan so the collector can satisfy them on its
    /// next pass.
    async fn analyze(
        &self,
        scan_id: &str,
        files: Vec<AssembledFile>,
    ) -> anyhow::Result<AnalyzeFilesResponse>;
}
