//! Protocol payload types.
//!
//! Everything that crosses the wire is defined here so the three role
//! crates agree on one vocabulary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Interests
// ============================================================================

/// How much of a file an analyzer wants to see.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DataKind {
    /// Path, ownership, permissions and size only.
    #[default]
    Metadata,
    /// Metadata plus the full file content.
    MetadataAndData,
}

impl DataKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataKind::Metadata => "metadata",
            DataKind::MetadataAndData => "metadata_and_data",
        }
    }

    /// True when this kind carries strictly more information than `other`.
    pub fn dominates(&self, other: DataKind) -> bool {
        *self == DataKind::MetadataAndData && other == DataKind::Metadata
    }
}

impl fmt::Display for DataKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A predicate declaring what an analyzer wants to inspect.
///
/// `path_pattern` is a regular expression matched against root-relative
/// file paths with find semantics. `content_pattern` is reserved: it is
/// carried and preserved but not evaluated.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Interest {
    pub path_pattern: String,
    #[serde(default)]
    pub content_pattern: Option<String>,
    #[serde(default)]
    pub data_kind: DataKind,
}

impl Interest {
    pub fn metadata(path_pattern: impl Into<String>) -> Self {
        Self {
            path_pattern: path_pattern.into(),
            content_pattern: None,
            data_kind: DataKind::Metadata,
        }
    }

    pub fn with_data(path_pattern: impl Into<String>) -> Self {
        Self {
            path_pattern: path_pattern.into(),
            content_pattern: None,
            data_kind: DataKind::MetadataAndData,
        }
    }
}

// ============================================================================
// Files
// ============================================================================

/// File metadata as observed by the collector.
///
/// Paths are canonical and root-relative from the collector's viewpoint;
/// ownership and mode are unix-shaped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    pub path: String,
    pub owner_uid: u32,
    pub owner_gid: u32,
    pub permissions: u32,
    pub size: u64,
}

/// One slice of file content at a byte offset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataChunk {
    pub offset: u64,
    pub data: Vec<u8>,
}

/// A file as submitted by a collector: metadata plus zero or more chunks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkedFile {
    pub metadata: FileMetadata,
    #[serde(default)]
    pub chunks: Vec<DataChunk>,
}

/// A file as routed to an analyzer: reassembled, no chunk structure.
///
/// `data` is `None` for metadata-only deliveries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssembledFile {
    pub metadata: FileMetadata,
    #[serde(default)]
    pub data: Option<Vec<u8>>,
}

// ============================================================================
// Findings
// ============================================================================

/// Reference material describing a detected issue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Advisory {
    pub reference: String,
    pub description: String,
    pub recommendation: String,
}

/// A resource a finding points at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub path: String,
}

/// Provenance of a finding. The orchestrator stamps this when the
/// analyzer leaves it out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FindingSource {
    pub scan_id: String,
    pub analyzer: String,
    pub detection_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FindingSeverity {
    #[default]
    Unknown,
    Minimal,
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FindingAccuracy {
    #[default]
    Unknown,
    Bad,
    Average,
    Great,
}

/// A security result produced by an analyzer. Opaque to the
/// orchestrator apart from source stamping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub advisory: Advisory,
    #[serde(default)]
    pub vulnerable_resources: Vec<Resource>,
    #[serde(default)]
    pub source: Option<FindingSource>,
    #[serde(default)]
    pub severity: FindingSeverity,
    #[serde(default)]
    pub accuracy: FindingAccuracy,
}

// ============================================================================
// Orchestrator RPC surface
// ============================================================================

/// Response to `CreateScan`: the scan handle plus the minified union of
/// initial interests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateScanResponse {
    pub scan_id: String,
    pub interests: Vec<Interest>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListInterestsRequest {
    pub scan_id: String,
    /// Reserved. Sending a non-empty token fails with `unimplemented`.
    #[serde(default)]
    pub page_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListInterestsResponse {
    pub interests: Vec<Interest>,
    #[serde(default)]
    pub next_page_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanFilesRequest {
    pub scan_id: String,
    pub files: Vec<ChunkedFile>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanFilesResponse {
    pub findings: Vec<Finding>,
    /// Raw (un-minified) interests analyzers expressed during this call.
    pub new_interests: Vec<Interest>,
}

// ============================================================================
// Analyzer RPC surface
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListInitialInterestsResponse {
    pub interests: Vec<Interest>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzeFilesRequest {
    pub scan_id: String,
    pub files: Vec<AssembledFile>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzeFilesResponse {
    #[serde(default)]
    pub findings: Vec<Finding>,
    #[serde(default)]
    pub new_interests: Vec<Interest>,
}

// ============================================================================
// Errors on the wire
// ============================================================================

/// Error category carried in an `Err` frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    InvalidArgument,
    NotFound,
    Unimplemented,
    OverlappingChunks,
    MissingChunks,
    AnalyzerError,
    DeadlineExceeded,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidArgument => "invalid-argument",
            ErrorKind::NotFound => "not-found",
            ErrorKind::Unimplemented => "unimplemented",
            ErrorKind::OverlappingChunks => "overlapping-chunks",
            ErrorKind::MissingChunks => "missing-chunks",
            ErrorKind::AnalyzerError => "analyzer-error",
            ErrorKind::DeadlineExceeded => "deadline-exceeded",
            ErrorKind::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub kind: ErrorKind,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_kind_dominance() {
        assert!(DataKind::MetadataAndData.dominates(DataKind::Metadata));
        assert!(!DataKind::Metadata.dominates(DataKind::MetadataAndData));
        assert!(!DataKind::MetadataAndData.dominates(DataKind::MetadataAndData));
    }

    #[test]
    fn interest_serde_defaults() {
        let json = r#"{"path_pattern": "/etc/passwd"}"#;
        let interest: Interest = serde_json::from_str(json).unwrap();
        assert_eq!(interest.data_kind, DataKind::Metadata);
        assert!(interest.content_pattern.is_none());
    }

    #[test]
    fn error_kind_wire_names() {
        let json = serde_json::to_string(&ErrorKind::OverlappingChunks).unwrap();
        assert_eq!(json, "\"overlapping-chunks\"");
        let kind: ErrorKind = serde_json::from_str("\"not-found\"").unwrap();
        assert_eq!(kind, ErrorKind::NotFound);
    }

    #[test]
    fn finding_roundtrip_preserves_source() {
        let finding = Finding {
            advisory: Advisory {
                reference: "ADV-1".into(),
                description: "weak permissions".into(),
                recommendation: "chmod 600".into(),
            },
            vulnerable_resources: vec![Resource {
                path: "/etc/shadow".into(),
            }],
            source: None,
            severity: FindingSeverity::High,
            accuracy: FindingAccuracy::Great,
        };
        let bytes = serde_json::to_vec(&finding).unwrap();
        let back: Finding = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(back, finding);
    }
}
