//! Visualization export
//!
//! Serializes a graph, an optional layout and optional analytics into a
//! standalone SVG or HTML file. Node radius follows degree centrality and
//! node colour is derived from the entity type, so the same graph always
//! renders the same picture. Raster formats have no backend here and are
//! rejected with [`ExportError::BackendUnavailable`].

use quick_xml::escape::escape;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fmt::Write as _;
use std::path::Path;
use tracing::info;

use crate::analytics::{self, GraphStats};
use crate::error::ExportError;
use crate::graph::models::KnowledgeGraph;
use crate::layout::{self, Layout, Point};

const MARGIN: f64 = 40.0;
const MIN_RADIUS: f64 = 6.0;
const MAX_RADIUS: f64 = 20.0;
const DEFAULT_RADIUS: f64 = 8.0;

/// Everything a renderer may draw. Borrowed; exporters never modify it.
#[derive(Debug, Clone, Copy)]
pub struct Scene<'a> {
    pub graph: &'a KnowledgeGraph,
    /// Falls back to a circular placement when absent
    pub layout: Option<&'a Layout>,
    pub stats: Option<&'a GraphStats>,
    pub width: f64,
    pub height: f64,
}

impl<'a> Scene<'a> {
    pub fn new(graph: &'a KnowledgeGraph) -> Self {
        Self {
            graph,
            layout: None,
            stats: None,
            width: 1200.0,
            height: 900.0,
        }
    }

    pub fn with_layout(mut self, layout: &'a Layout) -> Self {
        self.layout = Some(layout);
        self
    }

    pub fn with_stats(mut self, stats: &'a GraphStats) -> Self {
        self.stats = Some(stats);
        self
    }

    pub fn with_size(mut self, width: f64, height: f64) -> Self {
        self.width = width;
        self.height = height;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Svg,
    Html,
}

impl ExportFormat {
    /// Pick the format from the file extension.
    pub fn from_path(path: &Path) -> Result<Self, ExportError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        match ext.as_str() {
            "svg" => Ok(Self::Svg),
            "html" | "htm" => Ok(Self::Html),
            "" => Err(ExportError::BackendUnavailable("<no extension>".into())),
            other => Err(ExportError::BackendUnavailable(other.to_string())),
        }
    }
}

/// A rendering sink.
pub trait GraphExporter {
    fn render(&self, scene: &Scene<'_>) -> Result<String, ExportError>;

    fn export(&self, scene: &Scene<'_>, path: &Path) -> Result<(), ExportError> {
        let document = self.render(scene)?;
        std::fs::write(path, document).map_err(|source| ExportError::Io {
            path: path.display().to_string(),
            source,
        })?;
        info!(
            nodes = scene.graph.node_count(),
            edges = scene.graph.edge_count(),
            "Visualization written to {}",
            path.display()
        );
        Ok(())
    }
}

pub struct SvgExporter;

pub struct HtmlExporter;

impl GraphExporter for SvgExporter {
    fn render(&self, scene: &Scene<'_>) -> Result<String, ExportError> {
        Ok(render_svg(scene))
    }
}

impl GraphExporter for HtmlExporter {
    fn render(&self, scene: &Scene<'_>) -> Result<String, ExportError> {
        Ok(render_html(scene))
    }
}

/// Render `scene` to `path` with the exporter matching its extension.
pub fn export_to_path(scene: &Scene<'_>, path: &Path) -> Result<(), ExportError> {
    match ExportFormat::from_path(path)? {
        ExportFormat::Svg => SvgExporter.export(scene, path),
        ExportFormat::Html => HtmlExporter.export(scene, path),
    }
}

/// Stable `#rrggbb` colour for an entity type, kept in the light half of the range.
pub fn entity_color(entity_type: Option<&str>) -> String {
    let digest = Sha256::digest(entity_type.unwrap_or("UNKNOWN").as_bytes());
    let rgb = [digest[0] / 2 + 96, digest[1] / 2 + 96, digest[2] / 2 + 96];
    format!("#{}", hex::encode(rgb))
}

fn fmt_num(v: f64) -> String {
    format!("{:.2}", v)
}

fn render_svg(scene: &Scene<'_>) -> String {
    let graph = scene.graph;
    let fallback;
    let raw = match scene.layout {
        Some(layout) => layout,
        None => {
            fallback = layout::circular(graph);
            &fallback
        }
    };
    let inner = layout::normalize(
        raw,
        (scene.width - 2.0 * MARGIN).max(1.0),
        (scene.height - 2.0 * MARGIN).max(1.0),
    );
    let at = |id: &str| {
        inner
            .get(id)
            .map(|p| Point::new(p.x + MARGIN, p.y + MARGIN))
    };

    let degrees = analytics::degrees(graph);
    let max_degree = degrees.iter().copied().max().unwrap_or(0).max(1) as f64;
    let top: HashSet<&str> = scene
        .stats
        .map(|s| s.centrality.iter().map(|r| r.id.as_str()).collect())
        .unwrap_or_default();

    let mut svg = String::new();
    let _ = writeln!(
        svg,
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="{w}" height="{h}" viewBox="0 0 {w} {h}">"#,
        w = fmt_num(scene.width),
        h = fmt_num(scene.height)
    );
    svg.push_str(
        r##"<defs><marker id="arrow" viewBox="0 0 10 10" refX="10" refY="5" markerWidth="6" markerHeight="6" orient="auto-start-reverse"><path d="M 0 0 L 10 5 L 0 10 z" fill="#888"/></marker></defs>"##,
    );
    svg.push('\n');

    svg.push_str(r##"<g class="edges" stroke="#999" stroke-opacity="0.7">"##);
    svg.push('\n');
    for edge in graph.edges() {
        let (Some(s), Some(t)) = (at(&edge.source), at(&edge.target)) else {
            continue;
        };
        let width = (edge.weight.clamp(0.5, 10.0)).sqrt();
        let marker = if edge.directed {
            r#" marker-end="url(#arrow)""#
        } else {
            ""
        };
        let _ = writeln!(
            svg,
            r#"<line x1="{}" y1="{}" x2="{}" y2="{}" stroke-width="{}"{}><title>{} -[{}]-> {}</title></line>"#,
            fmt_num(s.x),
            fmt_num(s.y),
            fmt_num(t.x),
            fmt_num(t.y),
            fmt_num(width),
            marker,
            escape(edge.source.as_str()),
            escape(edge.kind()),
            escape(edge.target.as_str())
        );
    }
    svg.push_str("</g>\n");

    svg.push_str(r#"<g class="nodes" font-family="sans-serif" font-size="10">"#);
    svg.push('\n');
    for (node, degree) in graph.nodes().iter().zip(&degrees) {
        let Some(p) = at(&node.id) else {
            continue;
        };
        let radius = if scene.stats.is_some() {
            MIN_RADIUS + (MAX_RADIUS - MIN_RADIUS) * (*degree as f64 / max_degree)
        } else {
            DEFAULT_RADIUS
        };
        let stroke = if top.contains(node.id.as_str()) {
            r##" stroke="#222" stroke-width="2""##
        } else {
            r##" stroke="#fff" stroke-width="1""##
        };
        let mut title = node.id.clone();
        if let Some(t) = &node.entity_type {
            let _ = write!(title, " ({})", t);
        }
        if let Some(d) = node.description.as_deref().filter(|d| !d.is_empty()) {
            let _ = write!(title, "\n{}", d);
        }
        let _ = writeln!(
            svg,
            r#"<circle cx="{}" cy="{}" r="{}" fill="{}"{}><title>{}</title></circle>"#,
            fmt_num(p.x),
            fmt_num(p.y),
            fmt_num(radius),
            entity_color(node.entity_type.as_deref()),
            stroke,
            escape(title.as_str())
        );
        let _ = writeln!(
            svg,
            r#"<text x="{}" y="{}" text-anchor="middle">{}</text>"#,
            fmt_num(p.x),
            fmt_num(p.y - radius - 3.0),
            escape(node.id.as_str())
        );
    }
    svg.push_str("</g>\n</svg>\n");
    svg
}

fn render_html(scene: &Scene<'_>) -> String {
    let mut html = String::new();
    html.push_str(
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n<title>Knowledge Graph</title>\n\
         <style>body{font-family:sans-serif;margin:1em}table{border-collapse:collapse;margin:1em 0}\
         td,th{border:1px solid #ccc;padding:2px 8px;text-align:left}</style>\n</head>\n<body>\n",
    );
    let _ = writeln!(
        html,
        "<h1>Knowledge Graph</h1>\n<p>{} entities, {} relationships</p>",
        scene.graph.node_count(),
        scene.graph.edge_count()
    );
    html.push_str(&render_svg(scene));

    if let Some(stats) = scene.stats {
        html.push_str("<h2>Most connected entities</h2>\n<table>\n<tr><th>Entity</th><th>Connections</th></tr>\n");
        for r in &stats.centrality {
            let _ = writeln!(html, "<tr><td>{}</td><td>{}</td></tr>", escape(r.id.as_str()), r.degree);
        }
        html.push_str("</table>\n<h2>Relationship types</h2>\n<table>\n<tr><th>Type</th><th>Count</th></tr>\n");
        for k in &stats.relationship_types {
            let _ = writeln!(html, "<tr><td>{}</td><td>{}</td></tr>", escape(k.kind.as_str()), k.count);
        }
        html.push_str("</table>\n");
    }
    html.push_str("</body>\n</html>\n");
    html
}
