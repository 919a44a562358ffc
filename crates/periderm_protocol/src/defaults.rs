//! Shared defaults for Periderm binaries.

use std::time::Duration;

/// Default orchestrator listen interface.
pub const DEFAULT_BIND: &str = "127.0.0.1";

/// Default orchestrator TCP port.
pub const DEFAULT_PORT: u16 = 10000;

/// Default analyzer TCP port.
pub const DEFAULT_ANALYZER_PORT: u16 = 10100;

/// Scans are evicted after this much time without a touching call.
pub const SCAN_IDLE_TTL: Duration = Duration::from_secs(5 * 60);

/// Hard cap on scan lifetime regardless of activity.
pub const SCAN_MAX_TTL: Duration = Duration::from_secs(10 * 60);

/// How often the store sweeps for expired scans.
pub const SCAN_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Per-call deadline for analyzer RPCs during fan-out.
pub const ANALYZER_CALL_DEADLINE: Duration = Duration::from_secs(60);

/// Collector-side chunk size for file content.
pub const CHUNK_SIZE: usize = 2 * 1024 * 1024;
