//! Canonical graph model.
//!
//! Defines the in-memory representation every downstream stage consumes:
//!
//! - [`Node`]: an extracted entity, keyed by a stable upstream id
//! - [`Edge`]: a relationship between two nodes
//! - [`KnowledgeGraph`]: nodes in document order with an id index, plus ordered edges
//! - [`DanglingReference`]: an edge whose endpoint is missing from the node set
//!
//! A `KnowledgeGraph` is only built through [`KnowledgeGraph::assemble`], which
//! guarantees unique non-empty ids and keeps dangling edges out of the model.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::warn;

use crate::error::{ParseError, PipelineError};

/// Attributes the model does not know by name, preserved verbatim.
pub type Attributes = BTreeMap<String, serde_json::Value>;

/// Relationship kind used when an edge carries no `label` attribute.
pub const DEFAULT_RELATIONSHIP_KIND: &str = "RELATED";

/// Names a node's `extra` may not use: its own fields and the stored `displayName`.
pub const RESERVED_NODE_ATTRIBUTES: &[&str] =
    &["id", "entity_type", "description", "source_id", "displayName"];

/// Names an edge's `extra` may not use: its own fields and the stored merge `kind`.
pub const RESERVED_EDGE_ATTRIBUTES: &[&str] = &[
    "source",
    "target",
    "directed",
    "label",
    "description",
    "keywords",
    "weight",
    "source_id",
    "kind",
];

/// Prefix given to upstream attributes whose name is reserved.
pub const RESERVED_ATTRIBUTE_PREFIX: &str = "attr_";

fn default_weight() -> f64 {
    1.0
}

/// Move upstream attributes with a reserved name to `attr_<name>`.
pub(crate) fn rename_reserved(attrs: &mut Attributes, reserved: &[&str]) {
    for name in reserved {
        if let Some(value) = attrs.remove(*name) {
            let mut renamed = format!("{}{}", RESERVED_ATTRIBUTE_PREFIX, name);
            while attrs.contains_key(&renamed) {
                renamed.insert_str(0, RESERVED_ATTRIBUTE_PREFIX);
            }
            attrs.insert(renamed, value);
        }
    }
}

fn reserved_attribute<'a>(attrs: &'a Attributes, reserved: &[&str]) -> Option<&'a str> {
    attrs
        .keys()
        .map(String::as_str)
        .find(|k| reserved.contains(k))
}

// ============================================================================
// Node / Edge
// ============================================================================

/// An entity extracted by the upstream indexer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Globally unique, stable across re-ingestion
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Free-form provenance reference (chunk ids)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,
    #[serde(flatten)]
    pub extra: Attributes,
}

impl Node {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            entity_type: None,
            description: None,
            source_id: None,
            extra: Attributes::new(),
        }
    }

    pub fn with_entity_type(mut self, entity_type: impl Into<String>) -> Self {
        self.entity_type = Some(entity_type.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// A relationship between two nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub source: String,
    pub target: String,
    #[serde(default)]
    pub directed: bool,
    /// Relationship label; see [`Edge::kind`]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,
    #[serde(default = "default_weight")]
    pub weight: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,
    #[serde(flatten)]
    pub extra: Attributes,
}

impl Edge {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            directed: false,
            label: None,
            description: None,
            keywords: Vec::new(),
            weight: default_weight(),
            source_id: None,
            extra: Attributes::new(),
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    /// Relationship kind: the `label` attribute, or [`DEFAULT_RELATIONSHIP_KIND`].
    ///
    /// Part of the store merge key `(source, target, kind)`.
    pub fn kind(&self) -> &str {
        self.label
            .as_deref()
            .filter(|l| !l.is_empty())
            .unwrap_or(DEFAULT_RELATIONSHIP_KIND)
    }
}

// ============================================================================
// Dangling references
// ============================================================================

/// An edge whose source and/or target is absent from the node set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DanglingReference {
    /// Position of the edge in the input document
    pub edge_index: usize,
    pub source: String,
    pub target: String,
    /// The endpoint ids that could not be resolved
    pub missing: Vec<String>,
}

impl std::fmt::Display for DanglingReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "edge #{} ({} -> {}) references missing node(s): {}",
            self.edge_index,
            self.source,
            self.target,
            self.missing.join(", ")
        )
    }
}

/// What to do with dangling references found while loading a graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DanglingPolicy {
    /// Drop the edge from the model and report it
    #[default]
    Exclude,
    /// Abort the run before any store I/O
    Fail,
}

// ============================================================================
// KnowledgeGraph
// ============================================================================

/// The canonical graph: unique nodes in document order plus ordered edges.
///
/// `id_to_index` gives O(1) lookups by node id into `nodes`.
/// Immutable once assembled; every accessor is read-only.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KnowledgeGraph {
    nodes: Vec<Node>,
    id_to_index: HashMap<String, usize>,
    edges: Vec<Edge>,
}

/// Result of assembling a graph: the model plus the edges left out of it.
#[derive(Debug, Clone, Default)]
pub struct ParsedGraph {
    pub graph: KnowledgeGraph,
    pub dangling: Vec<DanglingReference>,
}

impl ParsedGraph {
    /// Apply the dangling-reference policy, logging every offending edge.
    pub fn enforce(self, policy: DanglingPolicy) -> Result<Self, PipelineError> {
        for d in &self.dangling {
            warn!(
                edge_index = d.edge_index,
                source = %d.source,
                target = %d.target,
                "Dangling reference: {}",
                d
            );
        }
        match policy {
            DanglingPolicy::Fail if !self.dangling.is_empty() => {
                Err(PipelineError::DanglingReferences(self.dangling))
            }
            _ => Ok(self),
        }
    }
}

impl KnowledgeGraph {
    /// Build a graph from raw nodes and edges.
    ///
    /// Fails on empty or duplicate node ids. Edges with an unknown endpoint
    /// are excluded from the model and returned as [`DanglingReference`]s.
    pub fn assemble(
        nodes: impl IntoIterator<Item = Node>,
        edges: impl IntoIterator<Item = Edge>,
    ) -> Result<ParsedGraph, ParseError> {
        let mut list: Vec<Node> = Vec::new();
        let mut map: HashMap<String, usize> = HashMap::new();
        for (i, node) in nodes.into_iter().enumerate() {
            if node.id.is_empty() {
                return Err(ParseError::malformed(
                    format!("node #{}", i),
                    "node id must not be empty",
                ));
            }
            if let Some(name) = reserved_attribute(&node.extra, RESERVED_NODE_ATTRIBUTES) {
                return Err(ParseError::schema(
                    format!("node '{}'", node.id),
                    format!("attribute '{}' collides with a built-in field", name),
                ));
            }
            if map.contains_key(&node.id) {
                return Err(ParseError::malformed(
                    format!("node #{}", i),
                    format!("duplicate node id '{}'", node.id),
                ));
            }
            map.insert(node.id.clone(), list.len());
            list.push(node);
        }

        let mut kept = Vec::new();
        let mut dangling = Vec::new();
        for (edge_index, edge) in edges.into_iter().enumerate() {
            if let Some(name) = reserved_attribute(&edge.extra, RESERVED_EDGE_ATTRIBUTES) {
                return Err(ParseError::schema(
                    format!("edge #{}", edge_index),
                    format!("attribute '{}' collides with a built-in field", name),
                ));
            }
            if !edge.weight.is_finite() {
                return Err(ParseError::malformed(
                    format!("edge #{}", edge_index),
                    format!("edge weight {} is not a finite number", edge.weight),
                ));
            }
            let mut missing: Vec<String> = [&edge.source, &edge.target]
                .into_iter()
                .filter(|id| !map.contains_key(id.as_str()))
                .cloned()
                .collect();
            missing.dedup();
            if missing.is_empty() {
                kept.push(edge);
            } else {
                dangling.push(DanglingReference {
                    edge_index,
                    source: edge.source,
                    target: edge.target,
                    missing,
                });
            }
        }

        Ok(ParsedGraph {
            graph: Self {
                nodes: list,
                id_to_index: map,
                edges: kept,
            },
            dangling,
        })
    }

    /// Nodes in document order.
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.id_to_index.get(id).map(|&i| &self.nodes[i])
    }

    pub fn contains_node(&self, id: &str) -> bool {
        self.id_to_index.contains_key(id)
    }

    /// Position of a node in document order.
    pub fn node_index(&self, id: &str) -> Option<usize> {
        self.id_to_index.get(id).copied()
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assemble_excludes_dangling_edges() {
        let parsed = KnowledgeGraph::assemble(
            vec![Node::new("A"), Node::new("B")],
            vec![Edge::new("A", "B"), Edge::new("A", "D")],
        )
        .unwrap();

        assert_eq!(parsed.graph.node_count(), 2);
        assert_eq!(parsed.graph.edge_count(), 1);
        assert_eq!(parsed.dangling.len(), 1);
        assert_eq!(parsed.dangling[0].edge_index, 1);
        assert_eq!(parsed.dangling[0].missing, vec!["D".to_string()]);
    }

    #[test]
    fn test_assemble_self_loop_to_missing_node_reported_once() {
        let parsed =
            KnowledgeGraph::assemble(vec![Node::new("A")], vec![Edge::new("X", "X")]).unwrap();
        assert_eq!(parsed.dangling[0].missing, vec!["X".to_string()]);
    }

    #[test]
    fn test_assemble_rejects_duplicate_ids() {
        let err = KnowledgeGraph::assemble(vec![Node::new("A"), Node::new("A")], vec![])
            .unwrap_err();
        assert!(matches!(err, ParseError::MalformedDocument { .. }));
    }

    #[test]
    fn test_assemble_rejects_empty_id() {
        let err = KnowledgeGraph::assemble(vec![Node::new("")], vec![]).unwrap_err();
        assert!(matches!(err, ParseError::MalformedDocument { .. }));
    }

    #[test]
    fn test_nodes_keep_document_order() {
        let parsed = KnowledgeGraph::assemble(
            vec![Node::new("zeta"), Node::new("alpha"), Node::new("mid")],
            vec![],
        )
        .unwrap();
        let ids: Vec<&str> = parsed.graph.nodes().iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["zeta", "alpha", "mid"]);
        assert_eq!(parsed.graph.node_index("alpha"), Some(1));
    }

    #[test]
    fn test_assemble_rejects_reserved_attribute_names() {
        let mut node = Node::new("A");
        node.extra.insert("id".into(), serde_json::json!("other"));
        let err = KnowledgeGraph::assemble(vec![node], vec![]).unwrap_err();
        assert!(matches!(err, ParseError::UnsupportedSchema { .. }));

        let mut edge = Edge::new("A", "A");
        edge.extra.insert("source".into(), serde_json::json!("doc-7"));
        let err = KnowledgeGraph::assemble(vec![Node::new("A")], vec![edge]).unwrap_err();
        assert!(matches!(err, ParseError::UnsupportedSchema { .. }));
    }

    #[test]
    fn test_assemble_rejects_non_finite_weight() {
        for w in [f64::NAN, f64::INFINITY] {
            let err = KnowledgeGraph::assemble(
                vec![Node::new("A"), Node::new("B")],
                vec![Edge::new("A", "B").with_weight(w)],
            )
            .unwrap_err();
            assert!(matches!(err, ParseError::MalformedDocument { .. }));
        }
    }

    #[test]
    fn test_rename_reserved_keeps_values() {
        let mut attrs = Attributes::new();
        attrs.insert("id".into(), serde_json::json!("orig-1"));
        attrs.insert("attr_id".into(), serde_json::json!("taken"));
        attrs.insert("rank".into(), serde_json::json!(2));
        rename_reserved(&mut attrs, RESERVED_NODE_ATTRIBUTES);

        assert!(!attrs.contains_key("id"));
        assert_eq!(attrs["attr_id"], serde_json::json!("taken"));
        assert_eq!(attrs["attr_attr_id"], serde_json::json!("orig-1"));
        assert_eq!(attrs["rank"], serde_json::json!(2));
    }

    #[test]
    fn test_edge_kind_defaults() {
        assert_eq!(Edge::new("a", "b").kind(), DEFAULT_RELATIONSHIP_KIND);
        assert_eq!(Edge::new("a", "b").with_label("").kind(), DEFAULT_RELATIONSHIP_KIND);
        assert_eq!(Edge::new("a", "b").with_label("ALLY_OF").kind(), "ALLY_OF");
    }

    #[test]
    fn test_enforce_policy() {
        let parsed =
            KnowledgeGraph::assemble(vec![Node::new("A")], vec![Edge::new("A", "D")]).unwrap();
        assert!(parsed.clone().enforce(DanglingPolicy::Exclude).is_ok());
        match parsed.enforce(DanglingPolicy::Fail) {
            Err(PipelineError::DanglingReferences(d)) => assert_eq!(d.len(), 1),
            other => panic!("expected dangling error, got {:?}", other),
        }
    }
}
