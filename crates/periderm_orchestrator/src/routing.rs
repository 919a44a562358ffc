//! Routing engine: a pure function over a scan snapshot.
//!
//! Routing never mutates scan state. It takes the interests, the files
//! and the set of past deliveries, and returns the payload batch each
//! analyzer should receive plus the delivery marks to record once that
//! analyzer's call succeeds. Mutation stays at the edges.

use crate::error::Result;
use crate::interest::{self, MappedInterest};
use crate::reassembly::PartialFile;
use periderm_protocol::{AssembledFile, DataKind};
use regex::Regex;
use std::collections::{BTreeMap, HashMap, HashSet};

/// Identifies one delivery of a file to an analyzer. The `with_data`
/// flag keeps a metadata-only delivery from suppressing the full-data
/// delivery owed once the file completes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeliveryKey {
    pub analyzer: String,
    pub path: String,
    pub with_data: bool,
}

/// Result of one routing pass.
#[derive(Debug, Default)]
pub struct RoutedPayloads {
    /// Files each analyzer should see, at most one payload per file.
    pub per_analyzer: BTreeMap<String, Vec<AssembledFile>>,
    /// Delivery marks to record per analyzer after its call succeeds.
    pub deliveries: BTreeMap<String, Vec<DeliveryKey>>,
}

impl RoutedPayloads {
    pub fn is_empty(&self) -> bool {
        self.per_analyzer.is_empty()
    }
}

/// Route every file against every interest.
///
/// Per file and analyzer, the strongest satisfiable payload wins: full
/// bytes when a data interest matches a complete file, metadata when
/// only metadata interests match. A file a data interest wants but
/// which is still incomplete is skipped and stays in the store for a
/// later round. Deterministic for a given snapshot.
pub fn route(
    interests: &[MappedInterest],
    files: &[PartialFile],
    delivered: &HashSet<DeliveryKey>,
) -> Result<RoutedPayloads> {
    let mut patterns: HashMap<&str, Regex> = HashMap::new();
    for mapped in interests {
        let pattern = mapped.interest.path_pattern.as_str();
        if !patterns.contains_key(pattern) {
            patterns.insert(pattern, interest::compile(&mapped.interest)?);
        }
    }

    let mut ordered: Vec<&PartialFile> = files.iter().collect();
    ordered.sort_by(|a, b| a.metadata().path.cmp(&b.metadata().path));

    let mut routed = RoutedPayloads::default();

    for file in ordered {
        // Strongest payload per analyzer for this file.
        let mut candidates: BTreeMap<&str, bool> = BTreeMap::new();

        for mapped in interests {
            let pattern = &patterns[mapped.interest.path_pattern.as_str()];
            if !interest::matches_compiled(pattern, &mapped.interest, file) {
                continue;
            }
            match mapped.interest.data_kind {
                DataKind::Metadata => {
                    candidates.entry(mapped.analyzer.as_str()).or_insert(false);
                }
                DataKind::MetadataAndData => {
                    if file.is_complete() {
                        *candidates.entry(mapped.analyzer.as_str()).or_insert(false) = true;
                    }
                    // Wants data but the file is incomplete: leave it
                    // for a later round.
                }
            }
        }

        for (analyzer, with_data) in candidates {
            let key = DeliveryKey {
                analyzer: analyzer.to_string(),
                path: file.metadata().path.clone(),
                with_data,
            };
            if delivered.contains(&key) {
                continue;
            }
            if !with_data {
                let upgraded = DeliveryKey {
                    with_data: true,
                    ..key.clone()
                };
                // The analyzer already saw the full bytes; metadata
                // again would be a duplicate.
                if delivered.contains(&upgraded) {
                    continue;
                }
            }

            routed
                .per_analyzer
                .entry(analyzer.to_string())
                .or_default()
                .push(file.to_assembled(with_data));
            routed
                .deliveries
                .entry(analyzer.to_string())
                .or_default()
                .push(key);
        }
    }

    Ok(routed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OrchestratorError;
    use periderm_protocol::{DataChunk, FileMetadata, Interest};

    fn mapped(analyzer: &str, interest: Interest) -> MappedInterest {
        MappedInterest {
            interest,
            analyzer: analyzer.to_string(),
        }
    }

    fn partial(path: &str, size: u64, data: &[u8]) -> PartialFile {
        let mut file = PartialFile::new(FileMetadata {
            path: path.to_string(),
            owner_uid: 0,
            owner_gid: 0,
            permissions: 0o644,
            size,
        });
        if !data.is_empty() {
            file.append_chunks(&[DataChunk {
                offset: 0,
                data: data.to_vec(),
            }])
            .unwrap();
        }
        file
    }

    #[test]
    fn complete_file_routes_with_full_bytes() {
        let interests = vec![mapped("a:1", Interest::with_data(r"/etc/hosts"))];
        let files = vec![partial("/etc/hosts", 12, b"hello world\n")];

        let routed = route(&interests, &files, &HashSet::new()).unwrap();
        let batch = &routed.per_analyzer["a:1"];
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].data.as_deref(), Some(b"hello world\n".as_slice()));
    }

    #[test]
    fn metadata_interest_routes_incomplete_file() {
        let interests = vec![mapped("b:1", Interest::metadata(r".*\.conf"))];
        let files = vec![partial("/etc/redis/redis.conf", 100, b"")];

        let routed = route(&interests, &files, &HashSet::new()).unwrap();
        let batch = &routed.per_analyzer["b:1"];
        assert_eq!(batch.len(), 1);
        assert!(batch[0].data.is_none());
    }

    #[test]
    fn incomplete_file_is_skipped_for_data_interests() {
        let interests = vec![mapped("a:1", Interest::with_data(r"/etc/hosts"))];
        let files = vec![partial("/etc/hosts", 12, b"hello ")];

        let routed = route(&interests, &files, &HashSet::new()).unwrap();
        assert!(routed.is_empty());
    }

    #[test]
    fn one_payload_per_analyzer_per_file() {
        // Two interests from the same analyzer match the same file; the
        // data payload wins and arrives once.
        let interests = vec![
            mapped("a:1", Interest::metadata(r"/etc/.*")),
            mapped("a:1", Interest::with_data(r"/etc/hosts")),
        ];
        let files = vec![partial("/etc/hosts", 2, b"hi")];

        let routed = route(&interests, &files, &HashSet::new()).unwrap();
        let batch = &routed.per_analyzer["a:1"];
        assert_eq!(batch.len(), 1);
        assert!(batch[0].data.is_some());
    }

    #[test]
    fn multiple_analyzers_each_get_the_file() {
        let interests = vec![
            mapped("a:1", Interest::with_data(r"/etc/hosts")),
            mapped("b:1", Interest::metadata(r"/etc/hosts")),
        ];
        let files = vec![partial("/etc/hosts", 2, b"hi")];

        let routed = route(&interests, &files, &HashSet::new()).unwrap();
        assert_eq!(routed.per_analyzer.len(), 2);
        assert!(routed.per_analyzer["a:1"][0].data.is_some());
        assert!(routed.per_analyzer["b:1"][0].data.is_none());
    }

    #[test]
    fn past_deliveries_are_not_repeated() {
        let interests = vec![mapped("a:1", Interest::with_data(r"/etc/hosts"))];
        let files = vec![partial("/etc/hosts", 2, b"hi")];

        let first = route(&interests, &files, &HashSet::new()).unwrap();
        let delivered: HashSet<DeliveryKey> =
            first.deliveries.into_values().flatten().collect();

        let second = route(&interests, &files, &delivered).unwrap();
        assert!(second.is_empty());
    }

    #[test]
    fn metadata_delivery_upgrades_to_data_once_complete() {
        let interests = vec![
            mapped("a:1", Interest::metadata(r"/etc/hosts")),
            mapped("a:1", Interest::with_data(r"/etc/hosts")),
        ];

        // First round: file incomplete, metadata payload goes out.
        let files = vec![partial("/etc/hosts", 12, b"hello ")];
        let first = route(&interests, &files, &HashSet::new()).unwrap();
        assert!(first.per_analyzer["a:1"][0].data.is_none());
        let mut delivered: HashSet<DeliveryKey> =
            first.deliveries.into_values().flatten().collect();

        // Second round: file completed, the data payload is still owed.
        let mut file = partial("/etc/hosts", 12, b"hello ");
        file.append_chunks(&[DataChunk {
            offset: 6,
            data: b"world\n".to_vec(),
        }])
        .unwrap();
        let second = route(&interests, &[file.clone()], &delivered).unwrap();
        assert!(second.per_analyzer["a:1"][0].data.is_some());
        delivered.extend(second.deliveries.into_values().flatten());

        // Third round: nothing left to deliver, in either shape.
        let third = route(&interests, &[file], &delivered).unwrap();
        assert!(third.is_empty());
    }

    #[test]
    fn routing_is_deterministic() {
        let interests = vec![
            mapped("b:1", Interest::metadata(r"/etc/.*")),
            mapped("a:1", Interest::with_data(r"/etc/.*")),
        ];
        let files = vec![
            partial("/etc/passwd", 2, b"hi"),
            partial("/etc/hosts", 2, b"hi"),
        ];

        let first = route(&interests, &files, &HashSet::new()).unwrap();
        let second = route(&interests, &files, &HashSet::new()).unwrap();
        assert_eq!(first.per_analyzer, second.per_analyzer);
        assert_eq!(first.deliveries, second.deliveries);
    }

    #[test]
    fn invalid_pattern_fails_the_pass() {
        let interests = vec![mapped("a:1", Interest::metadata(r"(unclosed"))];
        let files = vec![partial("/etc/hosts", 0, b"")];

        let err = route(&interests, &files, &HashSet::new()).unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidArgument(_)));
    }
}
