//! Scan lifecycle operations.
//!
//! The service owns the scan store, the analyzer registry and the
//! global initial-interest snapshot. Handlers here are transport
//! agnostic; the server loop in [`crate::server`] decodes frames and
//! calls in.

use crate::error::{OrchestratorError, Result};
use crate::interest::{self, MappedInterest};
use crate::registry::AnalyzerRegistry;
use crate::routing;
use crate::state::ScanStore;
use chrono::Utc;
use periderm_protocol::{
    CreateScanResponse, Finding, FindingSource, Interest, ListInterestsRequest,
    ListInterestsResponse, ScanFilesRequest, ScanFilesResponse,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

pub struct Orchestrator {
    store: Arc<ScanStore>,
    registry: AnalyzerRegistry,
    initial_interests: Vec<MappedInterest>,
    analyzer_deadline: Duration,
}

impl Orchestrator {
    pub fn new(
        store: Arc<ScanStore>,
        registry: AnalyzerRegistry,
        initial_interests: Vec<MappedInterest>,
        analyzer_deadline: Duration,
    ) -> Self {
        Self {
            store,
            registry,
            initial_interests,
            analyzer_deadline,
        }
    }

    pub fn store(&self) -> &Arc<ScanStore> {
        &self.store
    }

    /// Set up a scan which can then be fed files via `ScanFiles`.
    /// Returns the fresh UUID and the minified initial interests. No
    /// analyzer traffic happens here.
    pub fn create_scan(&self) -> Result<CreateScanResponse> {
        let scan_id = Uuid::new_v4().to_string();

        self.store.create(&scan_id)?;
        for mapped in &self.initial_interests {
            self.store.add_interest(&scan_id, mapped.clone())?;
        }

        let interests = self.minified_interests(&scan_id)?;
        info!(%scan_id, interests = interests.len(), "scan created");
        Ok(CreateScanResponse { scan_id, interests })
    }

    /// The current minified interest set for a scan. Paging is
    /// reserved; a non-empty token is refused.
    pub fn list_interests(&self, request: &ListInterestsRequest) -> Result<ListInterestsResponse> {
        if !request.page_token.is_empty() {
            return Err(OrchestratorError::Unimplemented("page token support"));
        }
        if !self.store.exists(&request.scan_id) {
            return Err(OrchestratorError::ScanNotFound(request.scan_id.clone()));
        }
        let interests = self.minified_interests(&request.scan_id)?;
        Ok(ListInterestsResponse {
            interests,
            next_page_token: String::new(),
        })
    }

    /// Merge submitted chunks, route complete and metadata-only files
    /// to interested analyzers, and merge whatever new interests they
    /// express back into the scan.
    ///
    /// Fail-fast per call: any analyzer failure fails the call after
    /// all parallel calls settle, but interests and delivery marks of
    /// the analyzers that succeeded stay committed.
    pub async fn scan_files(
        &self,
        request: ScanFilesRequest,
        inbound_budget: Option<Duration>,
    ) -> Result<ScanFilesResponse> {
        let scan_id = request.scan_id;
        if !self.store.exists(&scan_id) {
            return Err(OrchestratorError::ScanNotFound(scan_id));
        }

        // Overlapping calls on one scan are serialized end to end so a
        // routing pass never races another call's fan-out.
        let _gate = self.store.scan_gate(&scan_id).await?;

        self.store.add_files(&scan_id, request.files)?;

        let snapshot = self.store.snapshot(&scan_id)?;
        let mut routed = routing::route(&snapshot.interests, &snapshot.files, &snapshot.delivered)?;
        if routed.is_empty() {
            debug!(%scan_id, "nothing to route");
            return Ok(ScanFilesResponse {
                findings: Vec::new(),
                new_interests: Vec::new(),
            });
        }

        let deadline = match inbound_budget {
            Some(budget) => self.analyzer_deadline.min(budget),
            None => self.analyzer_deadline,
        };
        let results = self
            .registry
            .fan_out(&scan_id, routed.per_analyzer, deadline)
            .await?;

        let mut findings = Vec::new();
        let mut new_interests = Vec::new();
        let mut first_failure: Option<OrchestratorError> = None;

        for (analyzer, result) in results {
            match result {
                Ok(mut response) => {
                    for interest in &response.new_interests {
                        self.store.add_interest(
                            &scan_id,
                            MappedInterest {
                                interest: interest.clone(),
                                analyzer: analyzer.clone(),
                            },
                        )?;
                    }
                    if let Some(keys) = routed.deliveries.remove(&analyzer) {
                        self.store.record_deliveries(&scan_id, keys)?;
                    }
                    for finding in &mut response.findings {
                        stamp_source(finding, &scan_id, &analyzer);
                    }
                    findings.extend(response.findings);
                    new_interests.extend(response.new_interests);
                }
                Err(err) => {
                    if first_failure.is_none() {
                        first_failure = Some(err);
                    }
                }
            }
        }

        if let Some(err) = first_failure {
            return Err(err);
        }

        debug!(
            %scan_id,
            findings = findings.len(),
            new_interests = new_interests.len(),
            "scan files processed"
        );
        Ok(ScanFilesResponse {
            findings,
            new_interests,
        })
    }

    fn minified_interests(&self, scan_id: &str) -> Result<Vec<Interest>> {
        let known = self.store.get_interests(scan_id)?;
        let interests: Vec<Interest> = known.into_iter().map(|mapped| mapped.interest).collect();
        Ok(interest::minify(&interests))
    }
}

/// Fill in provenance the analyzer left out.
fn stamp_source(finding: &mut Finding, scan_id: &str, analyzer: &str) {
    match &mut finding.source {
        None => {
            finding.source = Some(FindingSource {
                scan_id: scan_id.to_string(),
                analyzer: analyzer.to_string(),
                detection_time: Utc::now(),
            });
        }
        Some(source) => {
            if source.analyzer.is_empty() {
                source.analyzer = analyzer.to_string();
            }
            if source.scan_id.is_empty() {
                source.scan_id = scan_id.to_string();
            }
        }
    }
}
