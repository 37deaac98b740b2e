//! Neo4j client over the HTTP transactional endpoint
//!
//! Every call posts one or more Cypher statements to
//! `{uri}/db/{database}/tx/commit` with basic credentials. Failures are
//! classified so the retry policy can tell a flaky network from a bad query:
//!
//! - connection errors, timeouts, 5xx, 408, 429, `Neo.TransientError.*` → transient
//! - any other non-success status, `Neo.ClientError.*`, `Neo.DatabaseError.*` → permanent

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info};

use super::models::*;
use super::traits::GraphStore;
use crate::error::StoreError;
use crate::graph::models::{Edge, KnowledgeGraph, Node};

const UPSERT_NODES: &str = "UNWIND $nodes AS node \
     MERGE (e:Entity {id: node.id}) \
     SET e = node.props \
     RETURN count(e)";

const UPSERT_EDGES: &str = "UNWIND $edges AS edge \
     MATCH (s:Entity {id: edge.source}) \
     MATCH (t:Entity {id: edge.target}) \
     MERGE (s)-[r:RELATIONSHIP {kind: edge.kind}]->(t) \
     SET r = edge.props \
     RETURN count(r)";

const ENTITY_CONSTRAINT: &str =
    "CREATE CONSTRAINT entity_id IF NOT EXISTS FOR (e:Entity) REQUIRE e.id IS UNIQUE";

const EXPORT_NODES: &str = "MATCH (e:Entity) RETURN properties(e) ORDER BY e.id";

const EXPORT_EDGES: &str = "MATCH (s:Entity)-[r:RELATIONSHIP]->(t:Entity) \
     RETURN s.id, t.id, properties(r) ORDER BY s.id, t.id, r.kind";

/// Client for Neo4j operations
pub struct Neo4jClient {
    http: Client,
    endpoint: String,
    user: String,
    password: String,
}

impl Neo4jClient {
    /// Create a new Neo4j client.
    ///
    /// `uri` is the HTTP base (e.g. `http://localhost:7474`); `timeout`
    /// bounds every request end to end.
    pub fn new(
        uri: &str,
        user: &str,
        password: &str,
        database: &str,
        timeout: Duration,
    ) -> Result<Self, StoreError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| StoreError::Permanent(format!("failed to build HTTP client: {}", e)))?;
        let endpoint = format!("{}/db/{}/tx/commit", uri.trim_end_matches('/'), database);
        reqwest::Url::parse(&endpoint).map_err(|e| {
            StoreError::Permanent(format!("invalid Neo4j URI '{}': {}", uri, e))
        })?;
        debug!("Neo4j endpoint: {}", endpoint);
        Ok(Self {
            http,
            endpoint,
            user: user.to_string(),
            password: password.to_string(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Commit `statements` in a single transaction and return their results.
    pub(crate) async fn execute(&self, statements: Vec<Statement>) -> Result<Vec<TxResult>, StoreError> {
        let response = self
            .http
            .post(&self.endpoint)
            .basic_auth(&self.user, Some(&self.password))
            .json(&TxRequest { statements })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        let tx: TxResponse = response.json().await?;
        if let Some(err) = tx.errors.first() {
            return Err(err.classify());
        }
        Ok(tx.results)
    }

    /// First cell of the first row of a single-statement result.
    fn returned_count(results: &[TxResult]) -> usize {
        results
            .first()
            .and_then(|r| r.data.first())
            .and_then(|row| row.row.first())
            .and_then(Value::as_u64)
            .unwrap_or(0) as usize
    }
}

fn classify_status(status: StatusCode, body: &str) -> StoreError {
    let message = if body.is_empty() {
        format!("HTTP {}", status)
    } else {
        format!("HTTP {}: {}", status, body)
    };
    if status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
    {
        StoreError::Transient(message)
    } else {
        StoreError::Permanent(message)
    }
}

#[async_trait]
impl GraphStore for Neo4jClient {
    async fn ensure_schema(&self) -> Result<(), StoreError> {
        self.execute(vec![Statement::bare(ENTITY_CONSTRAINT)]).await?;
        info!("Ensured uniqueness constraint on :{}(id)", ENTITY_LABEL);
        Ok(())
    }

    async fn upsert_nodes(&self, nodes: &[Node]) -> Result<usize, StoreError> {
        let params: Vec<Value> = nodes
            .iter()
            .map(|n| json!({ "id": n.id, "props": node_properties(n) }))
            .collect();
        let results = self
            .execute(vec![Statement::new(UPSERT_NODES, json!({ "nodes": params }))])
            .await?;
        Ok(Self::returned_count(&results))
    }

    async fn upsert_edges(&self, edges: &[Edge]) -> Result<usize, StoreError> {
        let params: Vec<Value> = edges
            .iter()
            .map(|e| {
                json!({
                    "source": e.source,
                    "target": e.target,
                    "kind": e.kind(),
                    "props": edge_properties(e),
                })
            })
            .collect();
        let results = self
            .execute(vec![Statement::new(UPSERT_EDGES, json!({ "edges": params }))])
            .await?;
        Ok(Self::returned_count(&results))
    }

    async fn export(&self) -> Result<KnowledgeGraph, StoreError> {
        let mut results = self
            .execute(vec![
                Statement::bare(EXPORT_NODES),
                Statement::bare(EXPORT_EDGES),
            ])
            .await?
            .into_iter();
        let (node_rows, edge_rows) = match (results.next(), results.next()) {
            (Some(n), Some(e)) => (n.data, e.data),
            _ => {
                return Err(StoreError::Permanent(
                    "export returned fewer result sets than statements".into(),
                ))
            }
        };

        let nodes = node_rows
            .into_iter()
            .map(|row| {
                let props = row.row.into_iter().next().unwrap_or(Value::Null);
                node_from_properties(props)
            })
            .collect::<Result<Vec<_>, _>>()?;

        let edges = edge_rows
            .into_iter()
            .map(|row| match <[Value; 3]>::try_from(row.row) {
                Ok([Value::String(s), Value::String(t), props]) => edge_from_properties(s, t, props),
                Ok(other) => Err(StoreError::Permanent(format!(
                    "unexpected relationship row: {:?}",
                    other
                ))),
                Err(row) => Err(StoreError::Permanent(format!(
                    "expected 3 columns, got {}",
                    row.len()
                ))),
            })
            .collect::<Result<Vec<_>, _>>()?;

        info!(
            nodes = nodes.len(),
            edges = edges.len(),
            "Exported graph from {}",
            self.endpoint
        );
        KnowledgeGraph::assemble(nodes, edges)
            .map(|parsed| parsed.graph)
            .map_err(|e| StoreError::Permanent(format!("inconsistent store export: {}", e)))
    }
}
