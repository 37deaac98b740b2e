//! Batch planner
//!
//! Slices nodes or edges into bounded, ordered batches. Batch `i` holds items
//! `[i*B, min((i+1)*B, n))`, so the same input always yields the same batch
//! boundaries and a report's batch indices stay valid across re-runs.

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::NonZeroUsize;

use crate::error::StoreError;
use crate::graph::models::{Edge, Node};
use crate::neo4j::GraphStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Node,
    Edge,
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemKind::Node => write!(f, "node"),
            ItemKind::Edge => write!(f, "edge"),
        }
    }
}

/// An item that can be batched and upserted.
pub trait BatchItem: Sync + Sized {
    const KIND: ItemKind;

    /// Human-readable identity, used in logs.
    fn key(&self) -> String;

    /// Submit one batch of this item kind to the store.
    fn upsert<'a>(store: &'a dyn GraphStore, items: &'a [Self]) -> BoxFuture<'a, Result<usize, StoreError>>;
}

impl BatchItem for Node {
    const KIND: ItemKind = ItemKind::Node;

    fn key(&self) -> String {
        self.id.clone()
    }

    fn upsert<'a>(store: &'a dyn GraphStore, items: &'a [Self]) -> BoxFuture<'a, Result<usize, StoreError>> {
        store.upsert_nodes(items)
    }
}

impl BatchItem for Edge {
    const KIND: ItemKind = ItemKind::Edge;

    fn key(&self) -> String {
        format!("{}-[{}]->{}", self.source, self.kind(), self.target)
    }

    fn upsert<'a>(store: &'a dyn GraphStore, items: &'a [Self]) -> BoxFuture<'a, Result<usize, StoreError>> {
        store.upsert_edges(items)
    }
}

/// A bounded, ordered slice of homogeneous items.
#[derive(Debug, Clone, Copy)]
pub struct Batch<'a, T> {
    pub kind: ItemKind,
    pub index: usize,
    pub items: &'a [T],
}

impl<T> Batch<'_, T> {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// `node#3`, `edge#0`, ...
    pub fn label(&self) -> String {
        format!("{}#{}", self.kind, self.index)
    }
}

/// Plan `ceil(n / max_size)` batches over `items`. Empty input yields no batches.
pub fn plan_batches<T: BatchItem>(items: &[T], max_size: NonZeroUsize) -> Vec<Batch<'_, T>> {
    items
        .chunks(max_size.get())
        .enumerate()
        .map(|(index, chunk)| Batch {
            kind: T::KIND,
            index,
            items: chunk,
        })
        .collect()
}
