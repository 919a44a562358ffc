//! A canned analyzer for tests and smoke runs.
//!
//! Depending on how it is set up it always reports one finding or
//! never does, and can express a follow-up interest the first time it
//! analyzes anything. Useful for exercising routing, fan-out and the
//! iterative interest loop without a real detection backend.

use crate::Analyzer;
use async_trait::async_trait;
use periderm_protocol::{
    Advisory, AnalyzeFilesResponse, AssembledFile, Finding, FindingAccuracy, FindingSeverity,
    Interest, Resource,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

pub struct FixtureAnalyzer {
    interests: Vec<Interest>,
    report_finding: bool,
    fail_analysis: bool,
    follow_up: Mutex<Option<Vec<Interest>>>,
    analyze_calls: AtomicUsize,
}

impl FixtureAnalyzer {
    /// An analyzer wanting full data for each given pattern, reporting
    /// a canned finding per batch when `report_finding` is set.
    pub fn new(patterns: &[&str], report_finding: bool) -> Self {
        Self {
            interests: patterns
                .iter()
                .map(|pattern| Interest::with_data(*pattern))
                .collect(),
            report_finding,
            fail_analysis: false,
            follow_up: Mutex::new(None),
            analyze_calls: AtomicUsize::new(0),
        }
    }

    /// Declare explicit interests instead of data-for-pattern ones.
    pub fn with_interests(interests: Vec<Interest>, report_finding: bool) -> Self {
        Self {
            interests,
            report_finding,
            fail_analysis: false,
            follow_up: Mutex::new(None),
            analyze_calls: AtomicUsize::new(0),
        }
    }

    /// Express these interests on the first `analyze` call only.
    pub fn with_follow_up(mut self, interests: Vec<Interest>) -> Self {
        self.follow_up = Mutex::new(Some(interests));
        self
    }

    /// Make every `analyze` call fail.
    pub fn failing(mut self) -> Self {
        self.fail_analysis = true;
        self
    }

    /// How many `analyze` calls this instance has served.
    pub fn analyze_calls(&self) -> usize {
        self.analyze_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Analyzer for FixtureAnalyzer {
    async fn initial_interests(&self) -> anyhow::Result<Vec<Interest>> {
        Ok(self.interests.clone())
    }

    async fn analyze(
        &self,
        _scan_id: &str,
        files: Vec<AssembledFile>,
    ) -> anyhow::Result<AnalyzeFilesResponse> {
        self.analyze_calls.fetch_add(1, Ordering::SeqCst);

        if self.fail_analysis {
            anyhow::bail!("configured to fail");
        }

        let mut findings = Vec::new();
        if self.report_finding {
            if let Some(file) = files.first() {
                findings.push(Finding {
                    advisory: Advisory {
                        reference: "FIXTURE_ADVISORY".to_string(),
                        description: "A canned advisory, for test purposes".to_string(),
                        recommendation: "Rotate the affected credentials".to_string(),
                    },
                    vulnerable_resources: vec![Resource {
                        path: file.metadata.path.clone(),
                    }],
                    // Left unset so the orchestrator stamps provenance.
                    source: None,
                    severity: FindingSeverity::Critical,
                    accuracy: FindingAccuracy::Great,
                });
            }
        }

        let new_interests = self
            .follow_up
            .lock()
            .map_err(|_| anyhow::anyhow!("follow-up lock poisoned"))?
            .take()
            .unwrap_or_default();

        Ok(AnalyzeFilesResponse {
            findings,
            new_interests,
        })
    }
}
