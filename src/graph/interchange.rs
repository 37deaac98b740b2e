//! JSON forms of the canonical graph.
//!
//! - [`GraphDocument`]: the intermediate `{nodes, edges}` document written
//!   between pipeline stages (`graph_data.json`). Reading it back yields a
//!   graph equal to the one that was written.
//! - [`load_vdb_export`]: rebuilds a graph from the indexer's vector-db dumps
//!   (`vdb_entities.json` / `vdb_relationships.json`), so analytics can run
//!   without the original GraphML.

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use tracing::{debug, info};

use super::graphml::split_keywords;
use super::models::{
    rename_reserved, Attributes, Edge, KnowledgeGraph, Node, ParsedGraph,
    RESERVED_EDGE_ATTRIBUTES, RESERVED_NODE_ATTRIBUTES,
};
use crate::error::{ExportError, ParseError};

/// Serialized mirror of a [`KnowledgeGraph`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphDocument {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
}

impl From<&KnowledgeGraph> for GraphDocument {
    fn from(graph: &KnowledgeGraph) -> Self {
        Self {
            nodes: graph.nodes().to_vec(),
            edges: graph.edges().to_vec(),
        }
    }
}

impl GraphDocument {
    pub fn into_graph(self) -> Result<ParsedGraph, ParseError> {
        KnowledgeGraph::assemble(self.nodes, self.edges)
    }
}

/// Write the intermediate document for `graph` to `path` (pretty-printed).
pub fn write_json(graph: &KnowledgeGraph, path: &Path) -> Result<(), ExportError> {
    let io_err = |source| ExportError::Io {
        path: path.display().to_string(),
        source,
    };
    let file = File::create(path).map_err(io_err)?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, &GraphDocument::from(graph))?;
    writer.flush().map_err(io_err)?;
    info!(
        nodes = graph.node_count(),
        edges = graph.edge_count(),
        "Graph document written to {}",
        path.display()
    );
    Ok(())
}

/// Read an intermediate document from disk.
pub fn read_json(path: &Path) -> Result<ParsedGraph, ParseError> {
    let file = File::open(path).map_err(|source| ParseError::Io {
        path: path.display().to_string(),
        source,
    })?;
    debug!("Reading graph document {}", path.display());
    parse_json_reader(BufReader::new(file))
}

/// Parse an intermediate document held in memory.
pub fn parse_json_str(document: &str) -> Result<ParsedGraph, ParseError> {
    parse_json_reader(document.as_bytes())
}

fn parse_json_reader<R: Read>(input: R) -> Result<ParsedGraph, ParseError> {
    let value = read_value(input)?;
    for container in ["nodes", "edges"] {
        if !value.get(container).is_some_and(|v| v.is_array()) {
            return Err(ParseError::schema(
                "document root",
                format!("missing '{}' array", container),
            ));
        }
    }
    let doc: GraphDocument = serde_json::from_value(value)
        .map_err(|e| ParseError::schema("graph document", e.to_string()))?;
    doc.into_graph()
}

fn read_value<R: Read>(input: R) -> Result<serde_json::Value, ParseError> {
    serde_json::from_reader(input).map_err(|e| {
        ParseError::malformed(format!("line {}, column {}", e.line(), e.column()), e.to_string())
    })
}

// ============================================================================
// Vector-db export
// ============================================================================

#[derive(Debug, Deserialize)]
struct VdbEntity {
    #[serde(rename = "__id__")]
    vdb_id: Option<String>,
    entity_name: Option<String>,
    entity_type: Option<String>,
    description: Option<String>,
    content: Option<String>,
    source_id: Option<String>,
    #[serde(flatten)]
    extra: Attributes,
}

#[derive(Debug, Deserialize)]
struct VdbRelationship {
    src_id: String,
    tgt_id: String,
    label: Option<String>,
    description: Option<String>,
    content: Option<String>,
    keywords: Option<String>,
    weight: Option<f64>,
    source_id: Option<String>,
    #[serde(flatten)]
    extra: Attributes,
}

/// Internal vector-db bookkeeping fields that are not graph attributes.
fn strip_vdb_internals(extra: &mut Attributes) {
    extra.retain(|k, _| !(k.starts_with("__") && k.ends_with("__")));
}

fn read_data_array(path: &Path) -> Result<Vec<serde_json::Value>, ParseError> {
    let file = File::open(path).map_err(|source| ParseError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let mut value = read_value(BufReader::new(file))?;
    match value.get_mut("data").map(serde_json::Value::take) {
        Some(serde_json::Value::Array(items)) => Ok(items),
        _ => Err(ParseError::schema(
            path.display().to_string(),
            "missing 'data' array",
        )),
    }
}

/// Rebuild a graph from the entity / relationship vector-db dumps.
///
/// Entities are keyed by `entity_name` (falling back to `__id__`);
/// relationships reference entities through `src_id` / `tgt_id`.
pub fn load_vdb_export(entities: &Path, relationships: &Path) -> Result<ParsedGraph, ParseError> {
    let mut nodes = Vec::new();
    for (i, item) in read_data_array(entities)?.into_iter().enumerate() {
        let location = format!("{} entry #{}", entities.display(), i);
        let e: VdbEntity = serde_json::from_value(item)
            .map_err(|err| ParseError::schema(location.clone(), err.to_string()))?;
        let id = e
            .entity_name
            .clone()
            .or_else(|| e.vdb_id.clone())
            .ok_or_else(|| ParseError::schema(location, "entity has neither entity_name nor __id__"))?;
        let mut node = Node::new(id);
        node.entity_type = e.entity_type;
        node.description = e.description.or(e.content);
        node.source_id = e.source_id;
        node.extra = e.extra;
        strip_vdb_internals(&mut node.extra);
        rename_reserved(&mut node.extra, RESERVED_NODE_ATTRIBUTES);
        if let (Some(vdb_id), Some(_)) = (e.vdb_id, e.entity_name) {
            node.extra.insert("vdb_id".into(), serde_json::Value::String(vdb_id));
        }
        nodes.push(node);
    }

    let mut edges = Vec::new();
    for (i, item) in read_data_array(relationships)?.into_iter().enumerate() {
        let location = format!("{} entry #{}", relationships.display(), i);
        let r: VdbRelationship = serde_json::from_value(item)
            .map_err(|err| ParseError::schema(location.clone(), err.to_string()))?;
        if let Some(w) = r.weight.filter(|w| !w.is_finite()) {
            return Err(ParseError::malformed(location, format!("weight {} is not a finite number", w)));
        }
        let mut edge = Edge::new(r.src_id, r.tgt_id);
        edge.label = r.label;
        edge.description = r.description.or(r.content);
        edge.keywords = r.keywords.as_deref().map(split_keywords).unwrap_or_default();
        edge.weight = r.weight.unwrap_or(1.0);
        edge.source_id = r.source_id;
        edge.extra = r.extra;
        strip_vdb_internals(&mut edge.extra);
        rename_reserved(&mut edge.extra, RESERVED_EDGE_ATTRIBUTES);
        edges.push(edge);
    }

    info!(
        entities = nodes.len(),
        relationships = edges.len(),
        "Loaded vector-db export"
    );
    KnowledgeGraph::assemble(nodes, edges)
}
