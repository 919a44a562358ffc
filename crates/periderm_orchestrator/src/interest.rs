//! Interest algebra: minification and matching.

use crate::error::{OrchestratorError, Result};
use crate::reassembly::PartialFile;
use periderm_protocol::{DataKind, Interest};
use regex::Regex;
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

/// An interest tagged with the analyzer that expressed it. Routing is
/// keyed by the analyzer address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappedInterest {
    pub interest: Interest,
    pub analyzer: String,
}

/// Deduplicate a sequence of interests while preserving the predicate
/// union.
///
/// Identity is the path pattern, plus the content pattern when one is
/// set. When duplicates collapse, metadata-and-data wins over
/// metadata-only. Output order is stable (sorted by identity) so
/// repeated calls over the same set agree.
pub fn minify(interests: &[Interest]) -> Vec<Interest> {
    let mut unique: BTreeMap<(String, Option<String>), Interest> = BTreeMap::new();

    for interest in interests {
        let content_key = interest
            .content_pattern
            .as_ref()
            .filter(|pattern| !pattern.is_empty())
            .cloned();
        let key = (interest.path_pattern.clone(), content_key);

        match unique.entry(key) {
            Entry::Vacant(slot) => {
                slot.insert(interest.clone());
            }
            Entry::Occupied(mut slot) => {
                if interest.data_kind.dominates(slot.get().data_kind) {
                    slot.insert(interest.clone());
                }
            }
        }
    }

    unique.into_values().collect()
}

/// Compile an interest's path pattern. A malformed pattern is an
/// invalid-argument error, not a silent miss.
pub fn compile(interest: &Interest) -> Result<Regex> {
    Regex::new(&interest.path_pattern).map_err(|err| {
        OrchestratorError::InvalidArgument(format!(
            "invalid path pattern {:?}: {err}",
            interest.path_pattern
        ))
    })
}

/// Whether a file satisfies an interest: the path matches (find
/// semantics) and, for data interests, at least one byte is buffered.
pub fn matches(interest: &Interest, file: &PartialFile) -> Result<bool> {
    let pattern = compile(interest)?;
    Ok(matches_compiled(&pattern, interest, file))
}

/// [`matches`] against a pre-compiled pattern; routing compiles each
/// unique pattern once per pass.
pub fn matches_compiled(pattern: &Regex, interest: &Interest, file: &PartialFile) -> bool {
    if !pattern.is_match(&file.metadata().path) {
        return false;
    }
    match interest.data_kind {
        DataKind::Metadata => true,
        DataKind::MetadataAndData => !file.is_empty(),
    }
}
