//! Periderm orchestrator: scan lifecycle, chunk reassembly and
//! interest routing.
//!
//! The orchestrator sits between collectors reading a target host and
//! the analyzers inspecting file content. It keeps per-scan state
//! across interleaved collector calls, reassembles chunked uploads into
//! complete files, routes them to every analyzer whose interest
//! matches, and folds newly expressed interests back into the scan so
//! the collector can satisfy them on its next pass.

pub mod error;
pub mod interest;
pub mod reassembly;
pub mod registry;
pub mod routing;
pub mod server;
pub mod service;
pub mod state;

pub use error::{OrchestratorError, ReassemblyError, Result};
pub use interest::MappedInterest;
pub use reassembly::PartialFile;
pub use registry::{AnalyzerClient, AnalyzerRegistry};
pub use routing::{route, DeliveryKey, RoutedPayloads};
pub use server::{Server, ServerConfig};
pub use service::Orchestrator;
pub use state::{ScanSnapshot, ScanStore};
