//! Canonical knowledge graph and its document formats.
//!
//! ## Architecture
//!
//! ```text
//! graph_chunk_entity_relation.graphml ──► graphml ──┐
//! graph_data.json ─────────────────────► interchange ┼──► KnowledgeGraph (+ dangling refs)
//! vdb_entities.json / vdb_relationships.json ───────┘
//! ```
//!
//! ## Modules
//!
//! - [`models`]: Node, Edge, KnowledgeGraph, DanglingReference, DanglingPolicy
//! - [`graphml`]: streaming GraphML parser
//! - [`interchange`]: intermediate JSON document and vector-db export loader

pub mod graphml;
pub mod interchange;
pub mod models;

pub use models::{
    Attributes, DanglingPolicy, DanglingReference, Edge, KnowledgeGraph, Node, ParsedGraph,
    DEFAULT_RELATIONSHIP_KIND,
};

use crate::error::ParseError;
use std::path::Path;

/// Load a graph document, picking the format from the file extension.
///
/// `.json` files are read as the intermediate document; anything else is
/// parsed as GraphML.
pub fn load_graph(path: &Path) -> Result<ParsedGraph, ParseError> {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("json") => interchange::read_json(path),
        _ => graphml::parse_file(path),
    }
}
