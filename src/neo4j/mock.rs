//! In-memory mock implementation of GraphStore for testing.
//!
//! Nodes are keyed by id and edges by `(source, target, kind)`, giving the
//! same merge semantics as the Cypher queries. Failures and delays can be
//! scripted per batch (keyed by the first item of the batch), and every call
//! is appended to an ordered event log.
//! Conditionally compiled with `#[cfg(test)]`.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;

use crate::error::StoreError;
use crate::graph::models::{Edge, KnowledgeGraph, Node};
use crate::ingest::planner::{BatchItem, ItemKind};
use crate::neo4j::traits::GraphStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    Started { kind: ItemKind, key: String },
    Finished { kind: ItemKind, key: String },
}

type EdgeKey = (String, String, String);

/// In-memory mock implementation of GraphStore for testing.
#[derive(Default)]
pub struct MockGraphStore {
    pub nodes: RwLock<BTreeMap<String, Node>>,
    pub edges: RwLock<BTreeMap<EdgeKey, Edge>>,
    pub schema_calls: RwLock<usize>,

    /// Errors returned, in order, for batches starting with the given key
    pub failures: RwLock<HashMap<String, VecDeque<StoreError>>>,
    /// Artificial latency for batches starting with the given key
    pub delays: RwLock<HashMap<String, Duration>>,
    pub events: RwLock<Vec<StoreEvent>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl MockGraphStore {
    /// Create a new empty MockGraphStore.
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Scripting helpers for tests
    // ========================================================================

    /// Fail the batch starting with `key` once per queued error.
    pub async fn fail_batch(self, key: &str, errors: Vec<StoreError>) -> Self {
        self.failures
            .write()
            .await
            .entry(key.to_string())
            .or_default()
            .extend(errors);
        self
    }

    /// Delay every attempt of the batch starting with `key`.
    pub async fn delay_batch(self, key: &str, delay: Duration) -> Self {
        self.delays.write().await.insert(key.to_string(), delay);
        self
    }

    pub async fn events(&self) -> Vec<StoreEvent> {
        self.events.read().await.clone()
    }

    /// Highest number of upsert calls that were running at the same time.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    /// Keys of every batch that was started, in call order.
    pub async fn started(&self, kind: ItemKind) -> Vec<String> {
        self.events
            .read()
            .await
            .iter()
            .filter_map(|e| match e {
                StoreEvent::Started { kind: k, key } if *k == kind => Some(key.clone()),
                _ => None,
            })
            .collect()
    }

    async fn run_batch<T: BatchItem>(&self, items: &[T]) -> Result<(), StoreError> {
        let key = items.first().map(T::key).unwrap_or_default();
        self.events.write().await.push(StoreEvent::Started {
            kind: T::KIND,
            key: key.clone(),
        });
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(running, Ordering::SeqCst);

        let delay = self.delays.read().await.get(&key).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let scripted = self
            .failures
            .write()
            .await
            .get_mut(&key)
            .and_then(VecDeque::pop_front);

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.events.write().await.push(StoreEvent::Finished {
            kind: T::KIND,
            key,
        });
        match scripted {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl GraphStore for MockGraphStore {
    async fn ensure_schema(&self) -> Result<(), StoreError> {
        *self.schema_calls.write().await += 1;
        Ok(())
    }

    async fn upsert_nodes(&self, nodes: &[Node]) -> Result<usize, StoreError> {
        self.run_batch(nodes).await?;
        let mut stored = self.nodes.write().await;
        for node in nodes {
            stored.insert(node.id.clone(), node.clone());
        }
        Ok(nodes.len())
    }

    async fn upsert_edges(&self, edges: &[Edge]) -> Result<usize, StoreError> {
        self.run_batch(edges).await?;
        let nodes = self.nodes.read().await;
        let mut stored = self.edges.write().await;
        let mut merged = 0;
        for edge in edges {
            // MATCH on both endpoints drops rows whose nodes are absent
            if !nodes.contains_key(&edge.source) || !nodes.contains_key(&edge.target) {
                continue;
            }
            let key = (edge.source.clone(), edge.target.clone(), edge.kind().to_string());
            stored.insert(key, edge.clone());
            merged += 1;
        }
        Ok(merged)
    }

    async fn export(&self) -> Result<KnowledgeGraph, StoreError> {
        let nodes: Vec<Node> = self.nodes.read().await.values().cloned().collect();
        let edges: Vec<Edge> = self.edges.read().await.values().cloned().collect();
        KnowledgeGraph::assemble(nodes, edges)
            .map(|parsed| parsed.graph)
            .map_err(|e| StoreError::Permanent(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_merge_by_id_overwrites() {
        let store = MockGraphStore::new();
        store
            .upsert_nodes(&[Node::new("A").with_description("old")])
            .await
            .unwrap();
        store
            .upsert_nodes(&[Node::new("A").with_description("new")])
            .await
            .unwrap();
        let graph = store.export().await.unwrap();
        assert_eq!(graph.node_count(), 1);
        assert_eq!(graph.node("A").unwrap().description.as_deref(), Some("new"));
    }

    #[tokio::test]
    async fn test_edges_merge_on_kind_and_need_endpoints() {
        let store = MockGraphStore::new();
        store
            .upsert_nodes(&[Node::new("A"), Node::new("B")])
            .await
            .unwrap();
        let merged = store
            .upsert_edges(&[
                Edge::new("A", "B"),
                Edge::new("A", "B").with_weight(3.0),
                Edge::new("A", "B").with_label("ALLY_OF"),
                Edge::new("A", "Z"),
            ])
            .await
            .unwrap();
        assert_eq!(merged, 3);
        let graph = store.export().await.unwrap();
        assert_eq!(graph.edge_count(), 2);
    }

    #[tokio::test]
    async fn test_scripted_failure_is_consumed() {
        let store = MockGraphStore::new()
            .fail_batch("A", vec![StoreError::Transient("boom".into())])
            .await;
        assert!(store.upsert_nodes(&[Node::new("A")]).await.is_err());
        assert!(store.upsert_nodes(&[Node::new("A")]).await.is_ok());
        assert_eq!(store.started(ItemKind::Node).await, vec!["A", "A"]);
    }

    #[tokio::test]
    async fn test_peak_in_flight_counts_overlapping_calls() {
        let store = MockGraphStore::new()
            .delay_batch("A", Duration::from_millis(30))
            .await
            .delay_batch("B", Duration::from_millis(30))
            .await;
        let nodes_a = [Node::new("A")];
        let nodes_b = [Node::new("B")];
        let (a, b) = tokio::join!(store.upsert_nodes(&nodes_a), store.upsert_nodes(&nodes_b));
        assert!(a.is_ok() && b.is_ok());
        assert_eq!(store.peak_in_flight(), 2);
        store.upsert_nodes(&[Node::new("C")]).await.unwrap();
        assert_eq!(store.peak_in_flight(), 2);
    }
}
