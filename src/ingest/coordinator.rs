//! Ingestion coordinator
//!
//! Drives a run: plan node batches, submit them with bounded concurrency and
//! wait until every one is terminal, then do the same for edge batches.
//! Store failures stay inside their batch; the run always yields a complete
//! [`IngestionReport`].

use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::planner::{plan_batches, Batch, BatchItem, ItemKind};
use super::report::{BatchOutcome, BatchStatus, ErrorClass, IngestionReport};
use crate::error::PipelineError;
use crate::graph::models::{Edge, Node, ParsedGraph};
use crate::neo4j::{GraphStore, RetryPolicy};

#[derive(Debug, Clone)]
pub struct IngestOptions {
    pub node_batch_size: NonZeroUsize,
    pub edge_batch_size: NonZeroUsize,
    /// Batches of one kind in flight at once
    pub concurrency: NonZeroUsize,
    pub retry: RetryPolicy,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            node_batch_size: NonZeroUsize::new(500).unwrap_or(NonZeroUsize::MIN),
            edge_batch_size: NonZeroUsize::new(100).unwrap_or(NonZeroUsize::MIN),
            concurrency: NonZeroUsize::new(4).unwrap_or(NonZeroUsize::MIN),
            retry: RetryPolicy::default(),
        }
    }
}

pub struct IngestionCoordinator {
    store: Arc<dyn GraphStore>,
    options: IngestOptions,
    cancel: CancellationToken,
}

impl IngestionCoordinator {
    pub fn new(store: Arc<dyn GraphStore>, options: IngestOptions) -> Self {
        Self {
            store,
            options,
            cancel: CancellationToken::new(),
        }
    }

    /// Use an externally owned cancellation token (e.g. wired to Ctrl-C).
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Ingest the whole graph.
    pub async fn run(&self, parsed: &ParsedGraph) -> IngestionReport {
        let graph = &parsed.graph;
        let node_batches = plan_batches(graph.nodes(), self.options.node_batch_size);
        let edge_batches = plan_batches(graph.edges(), self.options.edge_batch_size);
        info!(
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            node_batches = node_batches.len(),
            edge_batches = edge_batches.len(),
            dangling = parsed.dangling.len(),
            "Starting ingestion run"
        );

        let mut report = self.new_report();
        report.dangling = parsed.dangling.clone();
        self.execute(node_batches, edge_batches, report).await
    }

    /// Repeat only the batches a previous run did not complete.
    ///
    /// Batches are re-planned with the sizes recorded in `previous`, so the
    /// indices it names select exactly the same items. Given idempotent
    /// upserts, the store converges to the state of one fully successful run.
    pub async fn rerun_failed(
        &self,
        parsed: &ParsedGraph,
        previous: &IngestionReport,
    ) -> Result<IngestionReport, PipelineError> {
        let node_size = NonZeroUsize::new(previous.node_batch_size)
            .ok_or_else(|| PipelineError::StaleReport("node batch size is zero".into()))?;
        let edge_size = NonZeroUsize::new(previous.edge_batch_size)
            .ok_or_else(|| PipelineError::StaleReport("edge batch size is zero".into()))?;

        let graph = &parsed.graph;
        let node_batches = plan_batches(graph.nodes(), node_size);
        let edge_batches = plan_batches(graph.edges(), edge_size);

        let mut pending = HashSet::new();
        for outcome in previous.pending_batches() {
            let planned = match outcome.kind {
                ItemKind::Node => node_batches.get(outcome.index).map(Batch::len),
                ItemKind::Edge => edge_batches.get(outcome.index).map(Batch::len),
            };
            if planned != Some(outcome.size) {
                return Err(PipelineError::StaleReport(format!(
                    "{} batch #{} of size {} is not in the current plan",
                    outcome.kind, outcome.index, outcome.size
                )));
            }
            pending.insert((outcome.kind, outcome.index));
        }

        let keep = |kind: ItemKind, index: usize| pending.contains(&(kind, index));
        let node_batches: Vec<_> = node_batches
            .into_iter()
            .filter(|b| keep(b.kind, b.index))
            .collect();
        let edge_batches: Vec<_> = edge_batches
            .into_iter()
            .filter(|b| keep(b.kind, b.index))
            .collect();
        info!(
            previous_run = %previous.run_id,
            node_batches = node_batches.len(),
            edge_batches = edge_batches.len(),
            "Re-running failed batches"
        );

        let mut report = IngestionReport::start(node_size.get(), edge_size.get());
        report.dangling = parsed.dangling.clone();
        Ok(self.execute(node_batches, edge_batches, report).await)
    }

    fn new_report(&self) -> IngestionReport {
        IngestionReport::start(
            self.options.node_batch_size.get(),
            self.options.edge_batch_size.get(),
        )
    }

    async fn execute(
        &self,
        node_batches: Vec<Batch<'_, Node>>,
        edge_batches: Vec<Batch<'_, Edge>>,
        mut report: IngestionReport,
    ) -> IngestionReport {
        // Every node batch is terminal before the first edge batch is dispatched.
        let mut interrupted = false;
        let phases = [
            self.run_phase(node_batches).await,
            self.run_phase(edge_batches).await,
        ];
        for (outcome, cut_short) in phases.into_iter().flatten() {
            interrupted |= cut_short;
            report.record(outcome);
        }

        report.finalize(interrupted);
        info!(
            run_id = %report.run_id,
            status = ?report.status,
            succeeded = report.succeeded(),
            failed = report.failed(),
            skipped = report.skipped(),
            items = report.items_upserted(),
            "Ingestion run finished"
        );
        report
    }

    async fn run_phase<T: BatchItem>(&self, batches: Vec<Batch<'_, T>>) -> Vec<(BatchOutcome, bool)> {
        stream::iter(batches)
            .map(|batch| self.submit(batch))
            .buffer_unordered(self.options.concurrency.get())
            .collect()
            .await
    }

    /// Run one batch to a terminal outcome. The flag is set when cancellation
    /// cut its retry cycle short.
    async fn submit<T: BatchItem>(&self, batch: Batch<'_, T>) -> (BatchOutcome, bool) {
        let label = batch.label();
        if self.cancel.is_cancelled() {
            debug!(batch = %label, "Cancelled, not dispatching");
            let outcome = BatchOutcome {
                kind: batch.kind,
                index: batch.index,
                size: batch.len(),
                attempts: 0,
                status: BatchStatus::Skipped,
            };
            return (outcome, false);
        }

        let store = self.store.as_ref();
        let attempted = self
            .options
            .retry
            .run(&label, &self.cancel, || T::upsert(store, batch.items))
            .await;

        let status = match &attempted.result {
            // Edges whose endpoints are not stored are dropped by the MATCH;
            // the batch must stay eligible for a re-run.
            Ok(upserted) if *upserted < batch.len() => {
                warn!(
                    batch = %label,
                    upserted,
                    size = batch.len(),
                    "Store merged fewer items than submitted"
                );
                BatchStatus::Failed {
                    class: ErrorClass::Permanent,
                    message: format!(
                        "store merged {} of {} items (missing endpoints?)",
                        upserted,
                        batch.len()
                    ),
                }
            }
            Ok(upserted) => {
                debug!(batch = %label, attempts = attempted.attempts, upserted, "Batch succeeded");
                BatchStatus::Succeeded {
                    upserted: *upserted,
                }
            }
            Err(e) => {
                error!(batch = %label, attempts = attempted.attempts, error = %e, "Batch failed");
                BatchStatus::from(e)
            }
        };

        let outcome = BatchOutcome {
            kind: batch.kind,
            index: batch.index,
            size: batch.len(),
            attempts: attempted.attempts,
            status,
        };
        (outcome, attempted.interrupted)
    }
}
