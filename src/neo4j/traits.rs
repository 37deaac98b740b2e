//! GraphStore trait definition
//!
//! Abstract interface over the property-graph store. `Neo4jClient` talks to a
//! real server; the in-memory mock backs the coordinator tests.

use async_trait::async_trait;

use crate::error::StoreError;
use crate::graph::models::{Edge, KnowledgeGraph, Node};

/// Idempotent upsert operations against a property-graph store.
///
/// Each call is one transaction: it either commits entirely or fails with a
/// classified [`StoreError`].
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Create the uniqueness constraint the merge queries rely on. Safe to repeat.
    async fn ensure_schema(&self) -> Result<(), StoreError>;

    /// Merge nodes by id, overwriting stored attributes. Returns the number merged.
    async fn upsert_nodes(&self, nodes: &[Node]) -> Result<usize, StoreError>;

    /// Merge edges by (source, target, kind). Both endpoints must already exist.
    async fn upsert_edges(&self, edges: &[Edge]) -> Result<usize, StoreError>;

    /// Read back every stored entity and relationship.
    async fn export(&self) -> Result<KnowledgeGraph, StoreError>;
}
