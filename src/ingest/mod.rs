//! Batched, idempotent ingestion into the graph store.
//!
//! ## Modules
//!
//! - [`planner`]: deterministic batch slicing for nodes and edges
//! - [`coordinator`]: bounded-concurrency submission, node-before-edge ordering,
//!   cancellation, targeted re-run of failed batches
//! - [`report`]: per-run batch outcomes, persisted as `ingest_report.json`

pub mod coordinator;
pub mod planner;
pub mod report;

pub use coordinator::{IngestOptions, IngestionCoordinator};
pub use planner::{plan_batches, Batch, BatchItem, ItemKind};
pub use report::{BatchOutcome, BatchStatus, ErrorClass, IngestionReport, RunStatus};
