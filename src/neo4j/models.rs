//! Wire models for the Neo4j HTTP transactional endpoint, and the mapping
//! between canonical nodes/edges and stored property maps.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::StoreError;
use crate::graph::models::{Attributes, Edge, Node};

/// Label carried by every ingested entity.
pub const ENTITY_LABEL: &str = "Entity";
/// Relationship type of every ingested edge; the edge kind is a property.
pub const RELATIONSHIP_TYPE: &str = "RELATIONSHIP";

// ============================================================================
// Transaction request / response
// ============================================================================

/// One Cypher statement with its bound parameters.
#[derive(Debug, Clone, Serialize)]
pub struct Statement {
    pub statement: String,
    pub parameters: Value,
}

impl Statement {
    pub fn new(statement: impl Into<String>, parameters: Value) -> Self {
        Self {
            statement: statement.into(),
            parameters,
        }
    }

    pub fn bare(statement: impl Into<String>) -> Self {
        Self::new(statement, Value::Object(Map::new()))
    }
}

/// Body of `POST /db/{database}/tx/commit`.
#[derive(Debug, Serialize)]
pub struct TxRequest {
    pub statements: Vec<Statement>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TxResponse {
    #[serde(default)]
    pub results: Vec<TxResult>,
    #[serde(default)]
    pub errors: Vec<TxError>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TxResult {
    #[serde(default)]
    pub columns: Vec<String>,
    #[serde(default)]
    pub data: Vec<TxRow>,
}

#[derive(Debug, Deserialize)]
pub struct TxRow {
    pub row: Vec<Value>,
}

/// Error entry of a transaction response, e.g. `Neo.TransientError.General.DatabaseUnavailable`.
#[derive(Debug, Clone, Deserialize)]
pub struct TxError {
    pub code: String,
    #[serde(default)]
    pub message: String,
}

impl TxError {
    /// `Neo.TransientError.*` may succeed on retry; client and database errors won't.
    pub fn classify(&self) -> StoreError {
        let text = format!("{}: {}", self.code, self.message);
        if self.code.starts_with("Neo.TransientError") {
            StoreError::Transient(text)
        } else {
            StoreError::Permanent(text)
        }
    }
}

// ============================================================================
// Property mapping
// ============================================================================

/// Neo4j properties hold scalars and homogeneous lists only; nested maps
/// and mixed lists are stored as their JSON text.
fn to_property(value: &Value) -> Value {
    match value {
        Value::Object(_) => Value::String(value.to_string()),
        Value::Array(items) if items.iter().any(|v| v.is_object() || v.is_array()) => {
            Value::String(value.to_string())
        }
        other => other.clone(),
    }
}

fn insert_opt(props: &mut Map<String, Value>, key: &str, value: &Option<String>) {
    if let Some(v) = value {
        props.insert(key.to_string(), Value::String(v.clone()));
    }
}

/// Full property map written for a node. `SET e = props` replaces every
/// stored property, so re-running a batch yields the same node state.
pub fn node_properties(node: &Node) -> Map<String, Value> {
    let mut props: Map<String, Value> = node
        .extra
        .iter()
        .map(|(k, v)| (k.clone(), to_property(v)))
        .collect();
    props.insert("id".into(), Value::String(node.id.clone()));
    props.insert("displayName".into(), Value::String(node.id.clone()));
    insert_opt(&mut props, "entity_type", &node.entity_type);
    insert_opt(&mut props, "description", &node.description);
    insert_opt(&mut props, "source_id", &node.source_id);
    props
}

/// Full property map written for an edge, including its merge `kind`.
pub fn edge_properties(edge: &Edge) -> Map<String, Value> {
    let mut props: Map<String, Value> = edge
        .extra
        .iter()
        .map(|(k, v)| (k.clone(), to_property(v)))
        .collect();
    props.insert("kind".into(), Value::String(edge.kind().to_string()));
    props.insert("directed".into(), Value::Bool(edge.directed));
    props.insert("weight".into(), Value::from(edge.weight));
    props.insert(
        "keywords".into(),
        Value::Array(edge.keywords.iter().cloned().map(Value::String).collect()),
    );
    insert_opt(&mut props, "label", &edge.label);
    insert_opt(&mut props, "description", &edge.description);
    insert_opt(&mut props, "source_id", &edge.source_id);
    props
}

fn take_string(props: &mut Map<String, Value>, key: &str) -> Option<String> {
    match props.remove(key) {
        Some(Value::String(s)) => Some(s),
        Some(Value::Null) | None => None,
        Some(other) => Some(other.to_string()),
    }
}

fn into_attributes(props: Map<String, Value>) -> Attributes {
    props.into_iter().collect()
}

/// Rebuild a node from a stored property map.
pub fn node_from_properties(value: Value) -> Result<Node, StoreError> {
    let Value::Object(mut props) = value else {
        return Err(StoreError::Permanent(format!(
            "expected node property map, got {}",
            value
        )));
    };
    let id = take_string(&mut props, "id")
        .ok_or_else(|| StoreError::Permanent("stored entity without id".into()))?;
    props.remove("displayName");
    let mut node = Node::new(id);
    node.entity_type = take_string(&mut props, "entity_type");
    node.description = take_string(&mut props, "description");
    node.source_id = take_string(&mut props, "source_id");
    node.extra = into_attributes(props);
    Ok(node)
}

/// Rebuild an edge from its endpoint ids and stored property map.
pub fn edge_from_properties(source: String, target: String, value: Value) -> Result<Edge, StoreError> {
    let Value::Object(mut props) = value else {
        return Err(StoreError::Permanent(format!(
            "expected relationship property map, got {}",
            value
        )));
    };
    props.remove("kind");
    let mut edge = Edge::new(source, target);
    edge.directed = props
        .remove("directed")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    edge.weight = props
        .remove("weight")
        .and_then(|v| v.as_f64())
        .unwrap_or(1.0);
    edge.keywords = match props.remove("keywords") {
        Some(Value::Array(items)) => items
            .into_iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        _ => Vec::new(),
    };
    edge.label = take_string(&mut props, "label");
    edge.description = take_string(&mut props, "description");
    edge.source_id = take_string(&mut props, "source_id");
    edge.extra = into_attributes(props);
    Ok(edge)
}
