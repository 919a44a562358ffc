//! Scan state store.
//!
//! An arena of per-scan records keyed by scan id. The outer map lock is
//! held only long enough to fetch the per-scan slot, so operations on
//! different scans never block each other; all mutations on a single
//! scan serialize on that scan's own lock, and whole `ScanFiles`
//! invocations additionally serialize on an async per-scan gate. The
//! synchronous record locks are never held across an await point.
//!
//! Scans expire out-of-band: a sweeper marks a record evicted under its
//! lock before unlinking it, so an operation racing the sweeper fails
//! with scan-not-found instead of mutating a dead record.

use crate::error::{OrchestratorError, Result};
use crate::interest::MappedInterest;
use crate::reassembly::PartialFile;
use crate::routing::DeliveryKey;
use periderm_protocol::defaults;
use periderm_protocol::ChunkedFile;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, warn};

#[derive(Debug)]
struct ScanState {
    interests: Vec<MappedInterest>,
    files: HashMap<String, PartialFile>,
    delivered: HashSet<DeliveryKey>,
    created_at: Instant,
    touched_at: Instant,
    evicted: bool,
}

impl ScanState {
    fn new() -> Self {
        let now = Instant::now();
        Self {
            interests: Vec::new(),
            files: HashMap::new(),
            delivered: HashSet::new(),
            created_at: now,
            touched_at: now,
            evicted: false,
        }
    }
}

/// Consistent view of one scan, taken under the scan lock and handed to
/// the routing pass.
#[derive(Debug)]
pub struct ScanSnapshot {
    pub interests: Vec<MappedInterest>,
    pub files: Vec<PartialFile>,
    pub delivered: HashSet<DeliveryKey>,
}

struct Slot {
    state: Arc<Mutex<ScanState>>,
    /// Serializes whole `ScanFiles` invocations on this scan; the
    /// record lock above only covers individual store operations.
    gate: Arc<AsyncMutex<()>>,
}

impl Slot {
    fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(ScanState::new())),
            gate: Arc::new(AsyncMutex::new(())),
        }
    }
}

/// In-memory scan store with TTL eviction.
pub struct ScanStore {
    scans: Mutex<HashMap<String, Slot>>,
    idle_ttl: Duration,
    max_ttl: Duration,
}

impl ScanStore {
    pub fn new(idle_ttl: Duration, max_ttl: Duration) -> Self {
        Self {
            scans: Mutex::new(HashMap::new()),
            idle_ttl,
            max_ttl,
        }
    }

    pub fn with_default_ttls() -> Self {
        Self::new(defaults::SCAN_IDLE_TTL, defaults::SCAN_MAX_TTL)
    }

    /// Initialize the state for a scan, resetting any existing record.
    pub fn create(&self, scan_id: &str) -> Result<()> {
        self.map()?.insert(scan_id.to_string(), Slot::new());
        Ok(())
    }

    /// Whether any live state is known for the scan.
    pub fn exists(&self, scan_id: &str) -> bool {
        let state = match self.map() {
            Ok(map) => map.get(scan_id).map(|slot| Arc::clone(&slot.state)),
            Err(_) => return false,
        };
        match state {
            Some(state) => state.lock().map(|state| !state.evicted).unwrap_or(false),
            None => false,
        }
    }

    /// Acquire the per-scan call gate. Overlapping `ScanFiles`
    /// invocations on one scan queue up here; operations on other
    /// scans are unaffected.
    pub async fn scan_gate(&self, scan_id: &str) -> Result<OwnedMutexGuard<()>> {
        let gate = self
            .map()?
            .get(scan_id)
            .map(|slot| Arc::clone(&slot.gate))
            .ok_or_else(|| OrchestratorError::ScanNotFound(scan_id.to_string()))?;
        Ok(gate.lock_owned().await)
    }

    pub fn add_interest(&self, scan_id: &str, interest: MappedInterest) -> Result<()> {
        self.with_scan(scan_id, |state| {
            state.interests.push(interest);
            Ok(())
        })
    }

    pub fn get_interests(&self, scan_id: &str) -> Result<Vec<MappedInterest>> {
        self.with_scan(scan_id, |state| Ok(state.interests.clone()))
    }

    /// Merge a batch of chunked files into the scan's partial files.
    ///
    /// The whole call is validated before anything is applied: if any
    /// file in the batch conflicts or violates chunk contiguity, no
    /// chunk from the batch lands.
    pub fn add_files(&self, scan_id: &str, files: Vec<ChunkedFile>) -> Result<()> {
        self.with_scan(scan_id, |state| {
            // Validation pass over projected lengths; duplicate paths
            // within one batch accumulate.
            {
                let mut projected: HashMap<&str, (u64, u64)> = HashMap::new();
                for file in &files {
                    let path = file.metadata.path.as_str();
                    let (declared, current) = match projected.get(path).copied() {
                        Some(entry) => entry,
                        None => match state.files.get(path) {
                            Some(existing) => (existing.metadata().size, existing.len()),
                            None => (file.metadata.size, 0),
                        },
                    };
                    if declared != file.metadata.size {
                        return Err(OrchestratorError::InvalidArgument(format!(
                            "conflicting metadata for {path}: size {} submitted, {} recorded",
                            file.metadata.size, declared
                        )));
                    }
                    let new_len =
                        PartialFile::validate_chunks(path, declared, current, &file.chunks)?;
                    projected.insert(path, (declared, new_len));
                }
            }

            // Apply pass; cannot fail after validation.
            for file in files {
                let entry = state
                    .files
                    .entry(file.metadata.path.clone())
                    .or_insert_with(|| PartialFile::new(file.metadata.clone()));
                entry.apply_chunks(&file.chunks);
            }
            Ok(())
        })
    }

    pub fn get_files(&self, scan_id: &str) -> Result<Vec<PartialFile>> {
        self.with_scan(scan_id, |state| Ok(state.files.values().cloned().collect()))
    }

    /// Delete a tracked file. Returns whether anything was removed.
    pub fn remove_file(&self, scan_id: &str, path: &str) -> Result<bool> {
        self.with_scan(scan_id, |state| Ok(state.files.remove(path).is_some()))
    }

    /// Record completed deliveries so later routing passes skip them.
    pub fn record_deliveries(
        &self,
        scan_id: &str,
        deliveries: impl IntoIterator<Item = DeliveryKey>,
    ) -> Result<()> {
        self.with_scan(scan_id, |state| {
            state.delivered.extend(deliveries);
            Ok(())
        })
    }

    /// Take a consistent snapshot for one routing pass.
    pub fn snapshot(&self, scan_id: &str) -> Result<ScanSnapshot> {
        self.with_scan(scan_id, |state| {
            Ok(ScanSnapshot {
                interests: state.interests.clone(),
                files: state.files.values().cloned().collect(),
                delivered: state.delivered.clone(),
            })
        })
    }

    /// Evict expired scans. Returns how many were removed.
    pub fn sweep(&self) -> Result<usize> {
        let candidates: Vec<(String, Arc<Mutex<ScanState>>)> = self
            .map()?
            .iter()
            .map(|(id, slot)| (id.clone(), Arc::clone(&slot.state)))
            .collect();

        let mut expired = Vec::new();
        for (scan_id, state_arc) in candidates {
            let mut state = lock_scan(&state_arc)?;
            if state.evicted {
                continue;
            }
            if state.touched_at.elapsed() >= self.idle_ttl
                || state.created_at.elapsed() >= self.max_ttl
            {
                state.evicted = true;
                drop(state);
                expired.push((scan_id, state_arc));
            }
        }

        let mut map = self.map()?;
        let mut removed = 0;
        for (scan_id, state_arc) in expired {
            // The scan may have been reset since we marked it; only
            // unlink the record we actually expired.
            if map
                .get(&scan_id)
                .is_some_and(|current| Arc::ptr_eq(&current.state, &state_arc))
            {
                map.remove(&scan_id);
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Run the TTL sweep on an interval until the handle is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match store.sweep() {
                    Ok(0) => {}
                    Ok(evicted) => debug!(evicted, "expired scans evicted"),
                    Err(err) => warn!(%err, "scan sweep failed"),
                }
            }
        })
    }

    fn map(&self) -> Result<MutexGuard<'_, HashMap<String, Slot>>> {
        self.scans
            .lock()
            .map_err(|_| OrchestratorError::Internal("scan store lock poisoned".to_string()))
    }

    fn with_scan<T>(
        &self,
        scan_id: &str,
        op: impl FnOnce(&mut ScanState) -> Result<T>,
    ) -> Result<T> {
        let slot = self
            .map()?
            .get(scan_id)
            .map(|slot| Arc::clone(&slot.state))
            .ok_or_else(|| OrchestratorError::ScanNotFound(scan_id.to_string()))?;
        let mut state = lock_scan(&slot)?;
        if state.evicted {
            return Err(OrchestratorError::ScanNotFound(scan_id.to_string()));
        }
        state.touched_at = Instant::now();
        op(&mut state)
    }
}

fn lock_scan(slot: &Arc<Mutex<ScanState>>) -> Result<MutexGuard<'_, ScanState>> {
    slot.lock()
        .map_err(|_| OrchestratorError::Internal("scan lock poisoned".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ReassemblyError;
    use periderm_protocol::{DataChunk, FileMetadata, Interest};

    fn store() -> ScanStore {
        ScanStore::with_default_ttls()
    }

    fn chunked(path: &str, size: u64, chunks: Vec<(u64, &[u8])>) -> ChunkedFile {
        ChunkedFile {
            metadata: FileMetadata {
                path: path.to_string(),
                owner_uid: 0,
                owner_gid: 0,
                permissions: 0o644,
                size,
            },
            chunks: chunks
                .into_iter()
                .map(|(offset, data)| DataChunk {
                    offset,
                    data: data.to_vec(),
                })
                .collect(),
        }
    }

    #[test]
    fn create_and_exists() {
        let store = store();
        assert!(!store.exists("scan-a"));
        store.create("scan-a").unwrap();
        assert!(store.exists("scan-a"));
    }

    #[test]
    fn create_resets_existing_state() {
        let store = store();
        store.create("scan-a").unwrap();
        store
            .add_interest(
                "scan-a",
                MappedInterest {
                    interest: Interest::metadata("/etc/.*"),
                    analyzer: "a:1".into(),
                },
            )
            .unwrap();

        store.create("scan-a").unwrap();
        assert!(store.get_interests("scan-a").unwrap().is_empty());
    }

    #[test]
    fn operations_on_unknown_scans_fail() {
        let store = store();
        let err = store.get_files("nope").unwrap_err();
        assert!(matches!(err, OrchestratorError::ScanNotFound(_)));

        let err = store
            .add_interest(
                "nope",
                MappedInterest {
                    interest: Interest::metadata("/x"),
                    analyzer: "a:1".into(),
                },
            )
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::ScanNotFound(_)));
    }

    #[test]
    fn interests_accumulate_in_order() {
        let store = store();
        store.create("scan-a").unwrap();
        for pattern in ["/a", "/b"] {
            store
                .add_interest(
                    "scan-a",
                    MappedInterest {
                        interest: Interest::metadata(pattern),
                        analyzer: "a:1".into(),
                    },
                )
                .unwrap();
        }
        let interests = store.get_interests("scan-a").unwrap();
        assert_eq!(interests.len(), 2);
        assert_eq!(interests[0].interest.path_pattern, "/a");
        assert_eq!(interests[1].interest.path_pattern, "/b");
    }

    #[test]
    fn files_merge_across_calls() {
        let store = store();
        store.create("scan-a").unwrap();

        store
            .add_files("scan-a", vec![chunked("/etc/hosts", 12, vec![(0, b"hello ")])])
            .unwrap();
        store
            .add_files("scan-a", vec![chunked("/etc/hosts", 12, vec![(6, b"world\n")])])
            .unwrap();

        let files = store.get_files("scan-a").unwrap();
        assert_eq!(files.len(), 1);
        assert!(files[0].is_complete());
        assert_eq!(files[0].data(), b"hello world\n");
    }

    #[test]
    fn conflicting_metadata_is_rejected() {
        let store = store();
        store.create("scan-a").unwrap();
        store
            .add_files("scan-a", vec![chunked("/etc/hosts", 12, vec![(0, b"hello ")])])
            .unwrap();

        let err = store
            .add_files("scan-a", vec![chunked("/etc/hosts", 99, vec![(6, b"world\n")])])
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidArgument(_)));

        // The buffered prefix survives the rejected call.
        let files = store.get_files("scan-a").unwrap();
        assert_eq!(files[0].data(), b"hello ");
    }

    #[test]
    fn failing_batch_applies_no_file() {
        let store = store();
        store.create("scan-a").unwrap();

        let err = store
            .add_files(
                "scan-a",
                vec![
                    chunked("/etc/hosts", 12, vec![(0, b"hello ")]),
                    chunked("/etc/passwd", 4, vec![(2, b"xx")]),
                ],
            )
            .unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::Reassembly(ReassemblyError::MissingChunks { .. })
        ));
        assert!(store.get_files("scan-a").unwrap().is_empty());
    }

    #[test]
    fn remove_file_reports_presence() {
        let store = store();
        store.create("scan-a").unwrap();
        store
            .add_files("scan-a", vec![chunked("/etc/hosts", 0, vec![])])
            .unwrap();

        assert!(store.remove_file("scan-a", "/etc/hosts").unwrap());
        assert!(!store.remove_file("scan-a", "/etc/hosts").unwrap());
    }

    #[test]
    fn scans_are_independent() {
        let store = store();
        store.create("scan-a").unwrap();
        store.create("scan-b").unwrap();

        store
            .add_files("scan-a", vec![chunked("/etc/hosts", 0, vec![])])
            .unwrap();
        assert!(store.get_files("scan-b").unwrap().is_empty());
    }

    #[test]
    fn idle_scans_are_swept() {
        let store = ScanStore::new(Duration::ZERO, Duration::from_secs(600));
        store.create("scan-a").unwrap();

        let removed = store.sweep().unwrap();
        assert_eq!(removed, 1);
        assert!(!store.exists("scan-a"));
        assert!(matches!(
            store.get_interests("scan-a").unwrap_err(),
            OrchestratorError::ScanNotFound(_)
        ));
    }

    #[test]
    fn fresh_scans_survive_the_sweep() {
        let store = ScanStore::new(Duration::from_secs(300), Duration::from_secs(600));
        store.create("scan-a").unwrap();
        assert_eq!(store.sweep().unwrap(), 0);
        assert!(store.exists("scan-a"));
    }

    #[tokio::test]
    async fn gate_serializes_calls_per_scan() {
        let store = store();
        store.create("scan-a").unwrap();
        store.create("scan-b").unwrap();

        let held = store.scan_gate("scan-a").await.unwrap();

        // Another scan's gate stays free.
        let _other = store.scan_gate("scan-b").await.unwrap();

        // The held gate queues a second caller until release.
        let blocked =
            tokio::time::timeout(Duration::from_millis(50), store.scan_gate("scan-a")).await;
        assert!(blocked.is_err());

        drop(held);
        let reacquired =
            tokio::time::timeout(Duration::from_millis(50), store.scan_gate("scan-a")).await;
        assert!(reacquired.is_ok());

        let err = store.scan_gate("missing").await.unwrap_err();
        assert!(matches!(err, OrchestratorError::ScanNotFound(_)));
    }

    #[test]
    fn tombstoned_scan_behaves_as_missing() {
        let store = store();
        store.create("scan-a").unwrap();

        // Simulate the sweeper marking the record mid-operation.
        let state = store
            .map()
            .unwrap()
            .get("scan-a")
            .map(|slot| Arc::clone(&slot.state))
            .unwrap();
        state.lock().unwrap().evicted = true;

        assert!(!store.exists("scan-a"));
        let err = store
            .add_files("scan-a", vec![chunked("/etc/hosts", 0, vec![])])
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::ScanNotFound(_)));
    }
}
