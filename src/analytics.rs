//! Graph analytics over the canonical model.
//!
//! - **Counts**: entities and relationships
//! - **Relationship-type histogram**: most common first, ties by label
//! - **Degree centrality**: top-K most connected nodes, ties by node id
//! - **Connectivity**: connected components and isolated nodes via petgraph
//!
//! Every function is a pure read of the graph; results are fresh values.

use petgraph::algo;
use petgraph::graph::{NodeIndex, UnGraph};
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::info;

use crate::error::{AnalysisError, ExportError};
use crate::graph::models::KnowledgeGraph;

/// Default number of entries in the centrality ranking.
pub const DEFAULT_TOP_K: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankedNode {
    pub id: String,
    pub degree: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KindCount {
    pub kind: String,
    pub count: usize,
}

/// Everything `kgpipe analyze` reports, written as `graph_stats.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphStats {
    pub entity_count: usize,
    pub relationship_count: usize,
    pub relationship_types: Vec<KindCount>,
    pub centrality: Vec<RankedNode>,
    pub component_count: usize,
    pub isolated_nodes: Vec<String>,
}

impl GraphStats {
    pub fn write_json(&self, path: &Path) -> Result<(), ExportError> {
        let io_err = |source| ExportError::Io {
            path: path.display().to_string(),
            source,
        };
        let mut writer = BufWriter::new(File::create(path).map_err(io_err)?);
        serde_json::to_writer_pretty(&mut writer, self)?;
        writer.flush().map_err(io_err)
    }
}

pub fn entity_count(graph: &KnowledgeGraph) -> usize {
    graph.node_count()
}

pub fn relationship_count(graph: &KnowledgeGraph) -> usize {
    graph.edge_count()
}

/// Occurrences of each relationship kind, most common first.
pub fn relationship_type_histogram(graph: &KnowledgeGraph) -> Vec<KindCount> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for edge in graph.edges() {
        *counts.entry(edge.kind()).or_default() += 1;
    }
    let mut histogram: Vec<KindCount> = counts
        .into_iter()
        .map(|(kind, count)| KindCount {
            kind: kind.to_string(),
            count,
        })
        .collect();
    histogram.sort_by(|a, b| (Reverse(a.count), &a.kind).cmp(&(Reverse(b.count), &b.kind)));
    histogram
}

/// Undirected degree of every node, indexed like `graph.nodes()`.
///
/// A self-loop counts once as source and once as target.
pub fn degrees(graph: &KnowledgeGraph) -> Vec<usize> {
    let mut degree = vec![0usize; graph.node_count()];
    for edge in graph.edges() {
        for endpoint in [&edge.source, &edge.target] {
            if let Some(i) = graph.node_index(endpoint) {
                degree[i] += 1;
            }
        }
    }
    degree
}

/// The `k` most connected nodes, by descending degree then ascending id.
///
/// Degree-zero nodes take part in the ranking.
pub fn centrality_ranking(graph: &KnowledgeGraph, k: usize) -> Result<Vec<RankedNode>, AnalysisError> {
    if graph.is_empty() {
        return Err(AnalysisError::EmptyGraph);
    }
    let degree = degrees(graph);
    let mut ranked: Vec<RankedNode> = graph
        .nodes()
        .iter()
        .zip(degree)
        .map(|(node, degree)| RankedNode {
            id: node.id.clone(),
            degree,
        })
        .collect();
    ranked.sort_by(|a, b| (Reverse(a.degree), &a.id).cmp(&(Reverse(b.degree), &b.id)));
    ranked.truncate(k);
    Ok(ranked)
}

/// Undirected petgraph view; node weights are indices into `graph.nodes()`.
pub(crate) fn to_petgraph(graph: &KnowledgeGraph) -> UnGraph<usize, f64> {
    let mut g = UnGraph::with_capacity(graph.node_count(), graph.edge_count());
    for i in 0..graph.node_count() {
        g.add_node(i);
    }
    for edge in graph.edges() {
        if let (Some(s), Some(t)) = (graph.node_index(&edge.source), graph.node_index(&edge.target)) {
            g.add_edge(NodeIndex::new(s), NodeIndex::new(t), edge.weight);
        }
    }
    g
}

/// Number of connected components, treating edges as undirected.
pub fn component_count(graph: &KnowledgeGraph) -> usize {
    algo::connected_components(&to_petgraph(graph))
}

/// Ids of nodes without any edge, sorted.
pub fn isolated_nodes(graph: &KnowledgeGraph) -> Vec<String> {
    let mut isolated: Vec<String> = graph
        .nodes()
        .iter()
        .zip(degrees(graph))
        .filter(|(_, degree)| *degree == 0)
        .map(|(node, _)| node.id.clone())
        .collect();
    isolated.sort();
    isolated
}

/// Compute every statistic in one pass over the API above.
pub fn analyze(graph: &KnowledgeGraph, top_k: usize) -> Result<GraphStats, AnalysisError> {
    let centrality = centrality_ranking(graph, top_k)?;
    let stats = GraphStats {
        entity_count: entity_count(graph),
        relationship_count: relationship_count(graph),
        relationship_types: relationship_type_histogram(graph),
        centrality,
        component_count: component_count(graph),
        isolated_nodes: isolated_nodes(graph),
    };
    info!(
        entities = stats.entity_count,
        relationships = stats.relationship_count,
        components = stats.component_count,
        isolated = stats.isolated_nodes.len(),
        "Graph analysed"
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::models::{Edge, Node};

    fn graph(nodes: &[&str], edges: Vec<Edge>) -> KnowledgeGraph {
        KnowledgeGraph::assemble(nodes.iter().map(|id| Node::new(*id)), edges)
            .unwrap()
            .graph
    }

    fn ranking(graph: &KnowledgeGraph, k: usize) -> Vec<(String, usize)> {
        centrality_ranking(graph, k)
            .unwrap()
            .into_iter()
            .map(|r| (r.id, r.degree))
            .collect()
    }

    #[test]
    fn test_abc_scenario() {
        let g = graph(&["A", "B", "C"], vec![Edge::new("A", "B"), Edge::new("A", "C")]);
        assert_eq!(entity_count(&g), 3);
        assert_eq!(relationship_count(&g), 2);
        assert_eq!(
            ranking(&g, DEFAULT_TOP_K),
            vec![("A".into(), 2), ("B".into(), 1), ("C".into(), 1)]
        );
    }

    #[test]
    fn test_ranking_tie_break_is_lexical_not_document_order() {
        let g = graph(
            &["zed", "bob", "amy", "hub"],
            vec![
                Edge::new("hub", "zed"),
                Edge::new("hub", "bob"),
                Edge::new("hub", "amy"),
            ],
        );
        assert_eq!(
            ranking(&g, 3),
            vec![("hub".into(), 3), ("amy".into(), 1), ("bob".into(), 1)]
        );
        assert_eq!(ranking(&g, 10), ranking(&g, 10));
    }

    #[test]
    fn test_ranking_includes_isolated_nodes_and_zero_k() {
        let g = graph(&["A", "B", "lonely"], vec![Edge::new("A", "B")]);
        assert_eq!(ranking(&g, 5).last().unwrap(), &("lonely".to_string(), 0));
        assert!(ranking(&g, 0).is_empty());
    }

    #[test]
    fn test_self_loop_counts_twice() {
        let g = graph(&["A", "B"], vec![Edge::new("A", "A"), Edge::new("A", "B")]);
        assert_eq!(degrees(&g), vec![3, 1]);
    }

    #[test]
    fn test_histogram_order() {
        let g = graph(
            &["A", "B", "C"],
            vec![
                Edge::new("A", "B").with_label("WORKS_AT"),
                Edge::new("A", "C").with_label("ALLY_OF"),
                Edge::new("B", "C").with_label("WORKS_AT"),
                Edge::new("C", "A"),
            ],
        );
        let hist: Vec<(String, usize)> = relationship_type_histogram(&g)
            .into_iter()
            .map(|k| (k.kind, k.count))
            .collect();
        assert_eq!(
            hist,
            vec![
                ("WORKS_AT".into(), 2),
                ("ALLY_OF".into(), 1),
                ("RELATED".into(), 1)
            ]
        );
    }

    #[test]
    fn test_components_and_isolated() {
        let g = graph(
            &["A", "B", "C", "D", "E"],
            vec![Edge::new("A", "B"), Edge::new("C", "D")],
        );
        assert_eq!(component_count(&g), 3);
        assert_eq!(isolated_nodes(&g), vec!["E".to_string()]);
    }

    #[test]
    fn test_empty_graph_is_rejected() {
        let g = KnowledgeGraph::default();
        assert_eq!(centrality_ranking(&g, 5), Err(AnalysisError::EmptyGraph));
        assert_eq!(analyze(&g, 5), Err(AnalysisError::EmptyGraph));
        assert_eq!(entity_count(&g), 0);
        assert!(relationship_type_histogram(&g).is_empty());
    }

    #[test]
    fn test_analyze_writes_stats() {
        let g = graph(&["A", "B", "C"], vec![Edge::new("A", "B"), Edge::new("A", "C")]);
        let stats = analyze(&g, 2).unwrap();
        assert_eq!(stats.centrality.len(), 2);
        assert_eq!(stats.component_count, 1);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graph_stats.json");
        stats.write_json(&path).unwrap();
        let back: GraphStats =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(back, stats);
    }
}
