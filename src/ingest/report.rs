//! Ingestion report
//!
//! Per-run record of every batch outcome. The coordinator is the only writer;
//! once [`IngestionReport::finalize`] has run the report is read-only and can
//! be persisted as `ingest_report.json` for a targeted re-run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use uuid::Uuid;

use super::planner::ItemKind;
use crate::error::StoreError;
use crate::graph::models::DanglingReference;

/// Terminal state of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    /// Every batch succeeded
    Succeeded,
    /// At least one batch failed; the others ran to completion
    PartiallyFailed,
    /// Cancellation was observed; undispatched batches are `Skipped`
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorClass {
    Transient,
    Permanent,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BatchStatus {
    Succeeded { upserted: usize },
    Failed { class: ErrorClass, message: String },
    /// Never dispatched because the run was cancelled
    Skipped,
}

impl From<&StoreError> for BatchStatus {
    fn from(err: &StoreError) -> Self {
        let class = match err {
            StoreError::Transient(_) => ErrorClass::Transient,
            StoreError::Permanent(_) => ErrorClass::Permanent,
        };
        BatchStatus::Failed {
            class,
            message: err.message().to_string(),
        }
    }
}

/// Outcome of a single batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchOutcome {
    pub kind: ItemKind,
    pub index: usize,
    pub size: usize,
    pub attempts: u32,
    #[serde(flatten)]
    pub status: BatchStatus,
}

impl BatchOutcome {
    pub fn succeeded(&self) -> bool {
        matches!(self.status, BatchStatus::Succeeded { .. })
    }

    pub fn failed(&self) -> bool {
        matches!(self.status, BatchStatus::Failed { .. })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    /// Batch sizes the plan was derived with; a re-run must use the same ones
    pub node_batch_size: usize,
    pub edge_batch_size: usize,
    /// Ordered by (kind, index) once finalized
    pub batches: Vec<BatchOutcome>,
    /// Edges excluded from the plan because an endpoint is missing
    #[serde(default)]
    pub dangling: Vec<DanglingReference>,
}

impl IngestionReport {
    pub fn start(node_batch_size: usize, edge_batch_size: usize) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            finished_at: None,
            status: RunStatus::Running,
            node_batch_size,
            edge_batch_size,
            batches: Vec::new(),
            dangling: Vec::new(),
        }
    }

    pub(crate) fn record(&mut self, outcome: BatchOutcome) {
        self.batches.push(outcome);
    }

    /// Settle the run status.
    ///
    /// A run counts as cancelled only when cancellation changed its course:
    /// a batch was left undispatched, or `interrupted` reports a retry cycle
    /// cut short during backoff.
    pub(crate) fn finalize(&mut self, interrupted: bool) {
        self.batches.sort_by_key(|b| (b.kind, b.index));
        self.finished_at = Some(Utc::now());
        let skipped = self.batches.iter().any(|b| b.status == BatchStatus::Skipped);
        self.status = if interrupted || skipped {
            RunStatus::Cancelled
        } else if self.batches.iter().all(BatchOutcome::succeeded) {
            RunStatus::Succeeded
        } else {
            RunStatus::PartiallyFailed
        };
    }

    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Succeeded
    }

    pub fn attempted(&self) -> usize {
        self.batches
            .iter()
            .filter(|b| !matches!(b.status, BatchStatus::Skipped))
            .count()
    }

    pub fn succeeded(&self) -> usize {
        self.batches.iter().filter(|b| b.succeeded()).count()
    }

    pub fn failed(&self) -> usize {
        self.batches.iter().filter(|b| b.failed()).count()
    }

    pub fn skipped(&self) -> usize {
        self.batches
            .iter()
            .filter(|b| matches!(b.status, BatchStatus::Skipped))
            .count()
    }

    /// Batches a targeted re-run must repeat: failed and skipped ones.
    pub fn pending_batches(&self) -> impl Iterator<Item = &BatchOutcome> {
        self.batches.iter().filter(|b| !b.succeeded())
    }

    pub fn failed_batches(&self) -> impl Iterator<Item = &BatchOutcome> {
        self.batches.iter().filter(|b| b.failed())
    }

    /// Total items reported as merged by the store.
    pub fn items_upserted(&self) -> usize {
        self.batches
            .iter()
            .map(|b| match b.status {
                BatchStatus::Succeeded { upserted } => upserted,
                _ => 0,
            })
            .sum()
    }

    pub fn outcome(&self, kind: ItemKind, index: usize) -> Option<&BatchOutcome> {
        self.batches
            .iter()
            .find(|b| b.kind == kind && b.index == index)
    }

    pub fn write_json(&self, path: &Path) -> std::io::Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(&mut writer, self)?;
        writer.flush()
    }

    pub fn read_json(path: &Path) -> std::io::Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(kind: ItemKind, index: usize, status: BatchStatus) -> BatchOutcome {
        BatchOutcome {
            kind,
            index,
            size: 2,
            attempts: 1,
            status,
        }
    }

    #[test]
    fn test_finalize_orders_and_classifies() {
        let mut report = IngestionReport::start(2, 2);
        report.record(outcome(ItemKind::Edge, 0, BatchStatus::Succeeded { upserted: 2 }));
        report.record(outcome(
            ItemKind::Node,
            1,
            BatchStatus::from(&StoreError::Permanent("bad".into())),
        ));
        report.record(outcome(ItemKind::Node, 0, BatchStatus::Succeeded { upserted: 2 }));
        report.finalize(false);

        assert_eq!(report.status, RunStatus::PartiallyFailed);
        let order: Vec<(ItemKind, usize)> = report.batches.iter().map(|b| (b.kind, b.index)).collect();
        assert_eq!(
            order,
            vec![(ItemKind::Node, 0), (ItemKind::Node, 1), (ItemKind::Edge, 0)]
        );
        assert_eq!(report.attempted(), 3);
        assert_eq!(report.failed(), 1);
        assert_eq!(report.items_upserted(), 4);
        let failed: Vec<usize> = report.failed_batches().map(|b| b.index).collect();
        assert_eq!(failed, vec![1]);
    }

    #[test]
    fn test_cancelled_run_is_distinct() {
        let mut report = IngestionReport::start(1, 1);
        report.record(outcome(ItemKind::Node, 0, BatchStatus::Succeeded { upserted: 1 }));
        report.record(outcome(ItemKind::Node, 1, BatchStatus::Skipped));
        report.finalize(false);
        assert_eq!(report.status, RunStatus::Cancelled);
        assert_eq!(report.skipped(), 1);
        assert_eq!(report.pending_batches().count(), 1);
        assert!(!report.is_success());
    }

    #[test]
    fn test_report_json_round_trip() {
        let mut report = IngestionReport::start(500, 100);
        report.record(outcome(
            ItemKind::Edge,
            3,
            BatchStatus::from(&StoreError::Transient("HTTP 503".into())),
        ));
        report.finalize(false);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ingest_report.json");
        report.write_json(&path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("\"status\": \"failed\""));
        assert!(text.contains("\"class\": \"transient\""));

        let back = IngestionReport::read_json(&path).unwrap();
        assert_eq!(back.run_id, report.run_id);
        assert_eq!(back.batches, report.batches);
        assert_eq!(back.status, RunStatus::PartiallyFailed);
    }
}
