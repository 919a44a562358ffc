//! Interest-driven filesystem enumeration.
//!
//! Walks a root, matches every regular file's root-stripped path
//! against the interest patterns, and builds chunked submissions for
//! the matches. Metadata failures and unreadable files are skipped
//! with a warning so one bad entry does not sink the walk.

use crate::error::{CollectorError, Result};
use ignore::WalkBuilder;
use periderm_protocol::{ChunkedFile, DataChunk, DataKind, FileMetadata, Interest};
use regex::Regex;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

/// Enumerate files under `root` matching any of `interests`.
///
/// The strongest data kind wins when several interests match one path.
/// Content bytes are read and chunked only when a matching interest
/// asks for data. Results are sorted by path.
pub fn enumerate(
    root: &Path,
    interests: &[Interest],
    chunk_size: usize,
) -> Result<Vec<ChunkedFile>> {
    let patterns = compile(interests)?;

    // path -> strongest requested data kind
    let mut matched: HashMap<String, DataKind> = HashMap::new();

    let walk = WalkBuilder::new(root)
        .hidden(false)
        .ignore(false)
        .git_ignore(false)
        .git_global(false)
        .git_exclude(false)
        .build();

    for entry in walk {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                warn!(%err, "skipping unreadable entry");
                continue;
            }
        };
        if !entry.file_type().is_some_and(|kind| kind.is_file()) {
            continue;
        }

        let rel = strip_root(entry.path(), root);
        for (pattern, kind) in &patterns {
            if !pattern.is_match(&rel) {
                continue;
            }
            debug!(path = %rel, pattern = %pattern.as_str(), "path matched");
            matched
                .entry(rel.clone())
                .and_modify(|existing| {
                    if kind.dominates(*existing) {
                        *existing = *kind;
                    }
                })
                .or_insert(*kind);
        }
    }

    let mut files = Vec::new();
    for (rel, kind) in matched {
        let absolute = root.join(rel.trim_start_matches('/'));
        let metadata = match file_metadata(&absolute, &rel) {
            Ok(metadata) => metadata,
            Err(err) => {
                // Stat can fail for permissions or broken symlinks;
                // skip the file rather than kill the scan.
                warn!(path = %rel, %err, "cannot build metadata, skipping");
                continue;
            }
        };

        let chunks = match kind {
            DataKind::Metadata => Vec::new(),
            DataKind::MetadataAndData => match fs::read(&absolute) {
                Ok(data) => chunk_bytes(&data, chunk_size),
                Err(err) if err.kind() == std::io::ErrorKind::PermissionDenied => {
                    warn!(path = %rel, "permission denied, skipping");
                    continue;
                }
                Err(err) => return Err(err.into()),
            },
        };

        files.push(ChunkedFile { metadata, chunks });
    }

    files.sort_by(|a, b| a.metadata.path.cmp(&b.metadata.path));
    Ok(files)
}

fn compile(interests: &[Interest]) -> Result<Vec<(Regex, DataKind)>> {
    interests
        .iter()
        .map(|interest| {
            Regex::new(&interest.path_pattern)
                .map(|pattern| (pattern, interest.data_kind))
                .map_err(|source| CollectorError::InvalidPattern {
                    pattern: interest.path_pattern.clone(),
                    source,
                })
        })
        .collect()
}

/// Root-relative path with a leading slash, the shape analyzers match
/// against.
fn strip_root(path: &Path, root: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    format!("/{}", rel.to_string_lossy().trim_start_matches('/'))
}

fn file_metadata(absolute: &Path, rel: &str) -> std::io::Result<FileMetadata> {
    let stat = fs::metadata(absolute)?;
    let (owner_uid, owner_gid, permissions) = ownership(&stat);
    Ok(FileMetadata {
        path: rel.to_string(),
        owner_uid,
        owner_gid,
        permissions,
        size: stat.len(),
    })
}

#[cfg(unix)]
fn ownership(stat: &fs::Metadata) -> (u32, u32, u32) {
    use std::os::unix::fs::MetadataExt;
    (stat.uid(), stat.gid(), stat.mode())
}

#[cfg(not(unix))]
fn ownership(_stat: &fs::Metadata) -> (u32, u32, u32) {
    (0, 0, 0)
}

fn chunk_bytes(data: &[u8], chunk_size: usize) -> Vec<DataChunk> {
    let chunk_size = chunk_size.max(1);
    data.chunks(chunk_size)
        .enumerate()
        .map(|(index, slice)| DataChunk {
            offset: (index * chunk_size) as u64,
            data: slice.to_vec(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, content: &[u8]) {
        let path = root.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }

    #[test]
    fn matches_root_stripped_paths() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "etc/hosts", b"hello world\n");
        write(temp.path(), "etc/motd", b"welcome\n");

        let interests = vec![Interest::with_data(r"^/etc/hosts$")];
        let files = enumerate(temp.path(), &interests, 1024).unwrap();

        assert_eq!(files.len(), 1);
        assert_eq!(files[0].metadata.path, "/etc/hosts");
        assert_eq!(files[0].metadata.size, 12);
        assert_eq!(files[0].chunks.len(), 1);
        assert_eq!(files[0].chunks[0].data, b"hello world\n");
    }

    #[test]
    fn metadata_interests_carry_no_chunks() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "etc/redis/redis.conf", b"maxmemory 100mb\n");

        let interests = vec![Interest::metadata(r".*\.conf")];
        let files = enumerate(temp.path(), &interests, 1024).unwrap();

        assert_eq!(files.len(), 1);
        assert!(files[0].chunks.is_empty());
        assert_eq!(files[0].metadata.size, 16);
    }

    #[test]
    fn strongest_interest_wins_per_path() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "etc/hosts", b"hi");

        let interests = vec![
            Interest::metadata(r"/etc/.*"),
            Interest::with_data(r"^/etc/hosts$"),
        ];
        let files = enumerate(temp.path(), &interests, 1024).unwrap();

        assert_eq!(files.len(), 1);
        assert_eq!(files[0].chunks.len(), 1);
    }

    #[test]
    fn content_is_split_at_chunk_size() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "etc/hosts", b"abcdefgh");

        let interests = vec![Interest::with_data(r"^/etc/hosts$")];
        let files = enumerate(temp.path(), &interests, 3).unwrap();

        let chunks = &files[0].chunks;
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].offset, 0);
        assert_eq!(chunks[0].data, b"abc");
        assert_eq!(chunks[1].offset, 3);
        assert_eq!(chunks[2].offset, 6);
        assert_eq!(chunks[2].data, b"gh");
    }

    #[test]
    fn empty_files_enumerate_with_no_chunks() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "etc/empty", b"");

        let interests = vec![Interest::with_data(r"^/etc/empty$")];
        let files = enumerate(temp.path(), &interests, 1024).unwrap();

        assert_eq!(files.len(), 1);
        assert_eq!(files[0].metadata.size, 0);
        assert!(files[0].chunks.is_empty());
    }

    #[test]
    fn invalid_pattern_fails_enumeration() {
        let temp = TempDir::new().unwrap();
        let interests = vec![Interest::metadata(r"(unclosed")];
        let err = enumerate(temp.path(), &interests, 1024).unwrap_err();
        assert!(matches!(err, CollectorError::InvalidPattern { .. }));
    }

    #[test]
    fn results_are_sorted_by_path() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "etc/b", b"b");
        write(temp.path(), "etc/a", b"a");
        write(temp.path(), "etc/c", b"c");

        let interests = vec![Interest::metadata(r"/etc/.*")];
        let files = enumerate(temp.path(), &interests, 1024).unwrap();
        let paths: Vec<&str> = files.iter().map(|f| f.metadata.path.as_str()).collect();
        assert_eq!(paths, vec!["/etc/a", "/etc/b", "/etc/c"]);
    }
}
