//! Periderm collector: walks a target filesystem and streams matching
//! files to the orchestrator.
//!
//! The collector never decides what is interesting. It opens a scan,
//! receives the interest predicates, enumerates matching files, and
//! keeps iterating as analyzers express new interests based on what
//! they have already seen.

pub mod client;
pub mod enumerate;
pub mod error;

pub use client::OrchestratorClient;
pub use enumerate::enumerate;
pub use error::{CollectorError, Result};

use periderm_protocol::{Finding, Interest};
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, info};

/// What a finished scan produced.
#[derive(Debug)]
pub struct ScanOutcome {
    pub scan_id: String,
    pub findings: Vec<Finding>,
}

/// Drive one full scan: create it, feed it files, iterate on new
/// interests until nothing unseen matches.
///
/// A path is submitted at most once per scan; resubmitting complete
/// files would trip the orchestrator's chunk monotonicity check.
pub async fn run_scan(
    client: &OrchestratorClient,
    root: &Path,
    chunk_size: usize,
) -> Result<ScanOutcome> {
    let scan = client.create_scan().await?;
    info!(scan_id = %scan.scan_id, interests = scan.interests.len(), "scan created");

    let mut findings = Vec::new();
    let mut sent: HashSet<String> = HashSet::new();
    let mut known: HashSet<Interest> = scan.interests.iter().cloned().collect();
    let mut pending = scan.interests;

    while !pending.is_empty() {
        let interests = std::mem::take(&mut pending);
        let batch: Vec<_> = enumerate(root, &interests, chunk_size)?
            .into_iter()
            .filter(|file| !sent.contains(&file.metadata.path))
            .collect();

        for file in &batch {
            debug!(path = %file.metadata.path, "sending file");
            sent.insert(file.metadata.path.clone());
        }

        // An empty batch still flushes a routing pass: files already
        // submitted may match the interests learned this round.
        let response = client.scan_files(&scan.scan_id, batch).await?;
        findings.extend(response.findings);

        pending = response
            .new_interests
            .into_iter()
            .filter(|interest| known.insert(interest.clone()))
            .collect();
        if !pending.is_empty() {
            info!(count = pending.len(), "analyzers expressed new interests");
        }
    }

    info!(scan_id = %scan.scan_id, findings = findings.len(), "scan drained");
    Ok(ScanOutcome {
        scan_id: scan.scan_id,
        findings,
    })
}
