//! GraphML document parser.
//!
//! Streams a GraphML file (as written by the upstream indexer's networkx
//! export) through `quick_xml` and assembles a [`KnowledgeGraph`] without
//! materializing the document as one string.
//!
//! - `<key>` declarations give each `<data>` value its attribute name and type
//! - `entity_type`, `description`, `source_id` map onto [`Node`] fields
//! - `weight`, `description`, `keywords`, `label`, `source_id` map onto [`Edge`] fields
//! - every other attribute lands in `extra`, typed per its declaration; names
//!   that clash with a model field (`id`, `source`, ...) become `attr_<name>`

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tracing::debug;

use super::models::{
    rename_reserved, Attributes, Edge, KnowledgeGraph, Node, ParsedGraph,
    RESERVED_EDGE_ATTRIBUTES, RESERVED_NODE_ATTRIBUTES,
};
use crate::error::ParseError;

/// Declared type of a GraphML attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AttrType {
    String,
    Int,
    Float,
    Boolean,
}

impl AttrType {
    fn from_decl(s: Option<&str>) -> Self {
        match s.map(str::to_ascii_lowercase).as_deref() {
            Some("int") | Some("long") => Self::Int,
            Some("float") | Some("double") => Self::Float,
            Some("boolean") => Self::Boolean,
            _ => Self::String,
        }
    }
}

#[derive(Debug, Clone)]
struct KeyDecl {
    name: String,
    ty: AttrType,
    /// `node`, `edge`, `graph` or `all`
    domain: String,
    default: Option<String>,
}

impl KeyDecl {
    fn applies_to(&self, element: &str) -> bool {
        self.domain == "all" || self.domain == element
    }
}

enum Draft {
    Node { id: String, attrs: Attributes },
    Edge {
        source: String,
        target: String,
        directed: Option<bool>,
        attrs: Attributes,
    },
}

struct DataCapture {
    key: String,
    text: String,
}

/// Parse a GraphML file from disk.
pub fn parse_file(path: &Path) -> Result<ParsedGraph, ParseError> {
    let file = File::open(path).map_err(|source| ParseError::Io {
        path: path.display().to_string(),
        source,
    })?;
    debug!("Parsing GraphML document {}", path.display());
    parse_reader(BufReader::new(file))
}

/// Parse a GraphML document held in memory.
pub fn parse_str(document: &str) -> Result<ParsedGraph, ParseError> {
    parse_reader(document.as_bytes())
}

/// Parse a GraphML document from any buffered reader.
pub fn parse_reader<R: BufRead>(input: R) -> Result<ParsedGraph, ParseError> {
    let mut reader = Reader::from_reader(input);

    let mut keys: HashMap<String, KeyDecl> = HashMap::new();
    let mut nodes: Vec<Node> = Vec::new();
    let mut edges: Vec<Edge> = Vec::new();

    let mut seen_root = false;
    let mut seen_graph = false;
    let mut edge_default_directed = false;
    let mut depth: usize = 0;
    let mut current_key: Option<String> = None;
    let mut default_capture: Option<String> = None;
    let mut draft: Option<Draft> = None;
    let mut data: Option<DataCapture> = None;

    let mut buf = Vec::new();
    loop {
        buf.clear();
        let location = format!("byte {}", reader.buffer_position());
        let event = reader
            .read_event_into(&mut buf)
            .map_err(|e| ParseError::malformed(location.clone(), e.to_string()))?;

        match event {
            Event::Start(ref e) | Event::Empty(ref e) => {
                let is_empty = matches!(event, Event::Empty(_));
                if !is_empty {
                    depth += 1;
                }
                let name = e.local_name().as_ref().to_vec();

                if !seen_root {
                    if name.as_slice() != b"graphml" {
                        return Err(ParseError::schema(
                            location,
                            format!(
                                "root element is <{}>, expected <graphml>",
                                String::from_utf8_lossy(&name)
                            ),
                        ));
                    }
                    seen_root = true;
                    continue;
                }

                match name.as_slice() {
                    b"key" => {
                        let id = required_attr(e, b"id", &location, "key")?;
                        let decl = KeyDecl {
                            name: attr(e, b"attr.name", &location)?.unwrap_or_else(|| id.clone()),
                            ty: AttrType::from_decl(attr(e, b"attr.type", &location)?.as_deref()),
                            domain: attr(e, b"for", &location)?.unwrap_or_else(|| "all".into()),
                            default: None,
                        };
                        keys.insert(id.clone(), decl);
                        if !is_empty {
                            current_key = Some(id);
                        }
                    }
                    b"default" if current_key.is_some() => {
                        if is_empty {
                            set_default(&mut keys, current_key.as_deref(), String::new());
                        } else {
                            default_capture = Some(String::new());
                        }
                    }
                    b"graph" => {
                        seen_graph = true;
                        edge_default_directed = attr(e, b"edgedefault", &location)?.as_deref()
                            == Some("directed");
                    }
                    b"node" => {
                        require_graph(seen_graph, &location, "node")?;
                        let id = required_attr(e, b"id", &location, "node")?;
                        let d = Draft::Node {
                            id,
                            attrs: Attributes::new(),
                        };
                        if is_empty {
                            finish_draft(d, &keys, edge_default_directed, &mut nodes, &mut edges, &location)?;
                        } else {
                            draft = Some(d);
                        }
                    }
                    b"edge" => {
                        require_graph(seen_graph, &location, "edge")?;
                        let source = required_attr(e, b"source", &location, "edge")?;
                        let target = required_attr(e, b"target", &location, "edge")?;
                        let directed = attr(e, b"directed", &location)?.map(|v| v == "true");
                        let d = Draft::Edge {
                            source,
                            target,
                            directed,
                            attrs: Attributes::new(),
                        };
                        if is_empty {
                            finish_draft(d, &keys, edge_default_directed, &mut nodes, &mut edges, &location)?;
                        } else {
                            draft = Some(d);
                        }
                    }
                    b"data" if draft.is_some() => {
                        let key = required_attr(e, b"key", &location, "data")?;
                        if !keys.contains_key(&key) {
                            return Err(ParseError::schema(
                                location,
                                format!("<data> references undeclared key '{}'", key),
                            ));
                        }
                        let capture = DataCapture {
                            key,
                            text: String::new(),
                        };
                        if is_empty {
                            store_data(capture, &keys, draft.as_mut(), &location)?;
                        } else {
                            data = Some(capture);
                        }
                    }
                    _ => {}
                }
            }
            Event::Text(e) => {
                let text = e
                    .unescape()
                    .map_err(|err| ParseError::malformed(location.clone(), err.to_string()))?;
                if let Some(capture) = data.as_mut() {
                    capture.text.push_str(&text);
                } else if let Some(capture) = default_capture.as_mut() {
                    capture.push_str(&text);
                }
            }
            Event::CData(e) => {
                let text = String::from_utf8_lossy(&e).into_owned();
                if let Some(capture) = data.as_mut() {
                    capture.text.push_str(&text);
                } else if let Some(capture) = default_capture.as_mut() {
                    capture.push_str(&text);
                }
            }
            Event::End(e) => {
                depth = depth.saturating_sub(1);
                match e.local_name().as_ref() {
                    b"data" => {
                        if let Some(capture) = data.take() {
                            store_data(capture, &keys, draft.as_mut(), &location)?;
                        }
                    }
                    b"default" => {
                        if let Some(value) = default_capture.take() {
                            set_default(&mut keys, current_key.as_deref(), value);
                        }
                    }
                    b"key" => current_key = None,
                    b"node" | b"edge" => {
                        if let Some(d) = draft.take() {
                            finish_draft(d, &keys, edge_default_directed, &mut nodes, &mut edges, &location)?;
                        }
                    }
                    _ => {}
                }
            }
            Event::Eof => {
                if !seen_root {
                    return Err(ParseError::malformed(location, "document has no root element"));
                }
                if depth != 0 {
                    return Err(ParseError::malformed(
                        location,
                        "unexpected end of document (unclosed elements)",
                    ));
                }
                if !seen_graph {
                    return Err(ParseError::schema(location, "no <graph> element found"));
                }
                break;
            }
            _ => {}
        }
    }

    debug!(
        nodes = nodes.len(),
        edges = edges.len(),
        "GraphML document parsed"
    );
    KnowledgeGraph::assemble(nodes, edges)
}

fn attr(e: &BytesStart<'_>, name: &[u8], location: &str) -> Result<Option<String>, ParseError> {
    for a in e.attributes() {
        let a = a.map_err(|err| ParseError::malformed(location, err.to_string()))?;
        if a.key.as_ref() == name || a.key.local_name().as_ref() == name {
            let value = a
                .unescape_value()
                .map_err(|err| ParseError::malformed(location, err.to_string()))?;
            return Ok(Some(value.into_owned()));
        }
    }
    Ok(None)
}

fn required_attr(
    e: &BytesStart<'_>,
    name: &[u8],
    location: &str,
    element: &str,
) -> Result<String, ParseError> {
    attr(e, name, location)?.ok_or_else(|| {
        ParseError::malformed(
            location,
            format!(
                "<{}> is missing required attribute '{}'",
                element,
                String::from_utf8_lossy(name)
            ),
        )
    })
}

fn require_graph(seen_graph: bool, location: &str, element: &str) -> Result<(), ParseError> {
    if seen_graph {
        Ok(())
    } else {
        Err(ParseError::schema(
            location,
            format!("<{}> found outside of a <graph> container", element),
        ))
    }
}

fn set_default(keys: &mut HashMap<String, KeyDecl>, key: Option<&str>, value: String) {
    if let Some(decl) = key.and_then(|k| keys.get_mut(k)) {
        decl.default = Some(value);
    }
}

fn convert(raw: &str, ty: AttrType, name: &str, location: &str) -> Result<serde_json::Value, ParseError> {
    let invalid = |expected: &str| {
        ParseError::malformed(
            location,
            format!("value '{}' of attribute '{}' is not a valid {}", raw, name, expected),
        )
    };
    Ok(match ty {
        AttrType::String => serde_json::Value::String(raw.to_string()),
        AttrType::Int => raw
            .trim()
            .parse::<i64>()
            .map(serde_json::Value::from)
            .map_err(|_| invalid("integer"))?,
        AttrType::Float => raw
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(serde_json::Value::Number)
            .ok_or_else(|| invalid("number"))?,
        AttrType::Boolean => match raw.trim().to_ascii_lowercase().as_str() {
            "true" | "1" => serde_json::Value::Bool(true),
            "false" | "0" => serde_json::Value::Bool(false),
            _ => return Err(invalid("boolean")),
        },
    })
}

fn store_data(
    capture: DataCapture,
    keys: &HashMap<String, KeyDecl>,
    draft: Option<&mut Draft>,
    location: &str,
) -> Result<(), ParseError> {
    let (Some(decl), Some(draft)) = (keys.get(&capture.key), draft) else {
        return Ok(());
    };
    let value = convert(&capture.text, decl.ty, &decl.name, location)?;
    match draft {
        Draft::Node { attrs, .. } | Draft::Edge { attrs, .. } => {
            attrs.insert(decl.name.clone(), value);
        }
    }
    Ok(())
}

fn apply_defaults(
    attrs: &mut Attributes,
    keys: &HashMap<String, KeyDecl>,
    element: &str,
    location: &str,
) -> Result<(), ParseError> {
    for decl in keys.values().filter(|d| d.applies_to(element)) {
        if let Some(default) = &decl.default {
            if !attrs.contains_key(&decl.name) {
                attrs.insert(decl.name.clone(), convert(default, decl.ty, &decl.name, location)?);
            }
        }
    }
    Ok(())
}

fn value_to_string(v: serde_json::Value) -> String {
    match v {
        serde_json::Value::String(s) => s,
        other => other.to_string(),
    }
}

/// Split LightRAG's comma-separated `keywords` attribute.
pub(crate) fn split_keywords(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(String::from)
        .collect()
}

fn finish_draft(
    draft: Draft,
    keys: &HashMap<String, KeyDecl>,
    edge_default_directed: bool,
    nodes: &mut Vec<Node>,
    edges: &mut Vec<Edge>,
    location: &str,
) -> Result<(), ParseError> {
    match draft {
        Draft::Node { id, mut attrs } => {
            apply_defaults(&mut attrs, keys, "node", location)?;
            let mut node = Node::new(id);
            node.entity_type = attrs.remove("entity_type").map(value_to_string);
            node.description = attrs.remove("description").map(value_to_string);
            node.source_id = attrs.remove("source_id").map(value_to_string);
            rename_reserved(&mut attrs, RESERVED_NODE_ATTRIBUTES);
            node.extra = attrs;
            nodes.push(node);
        }
        Draft::Edge {
            source,
            target,
            directed,
            mut attrs,
        } => {
            apply_defaults(&mut attrs, keys, "edge", location)?;
            let mut edge = Edge::new(source, target);
            edge.directed = directed.unwrap_or(edge_default_directed);
            if let Some(w) = attrs.remove("weight") {
                edge.weight = match &w {
                    serde_json::Value::Number(n) => n.as_f64(),
                    serde_json::Value::String(s) => s.trim().parse().ok(),
                    _ => None,
                }
                .filter(|w: &f64| w.is_finite())
                .ok_or_else(|| {
                    ParseError::malformed(location, format!("edge weight '{}' is not a finite number", w))
                })?;
            }
            edge.label = attrs.remove("label").map(value_to_string);
            edge.description = attrs.remove("description").map(value_to_string);
            edge.keywords = attrs
                .remove("keywords")
                .map(|k| split_keywords(&value_to_string(k)))
                .unwrap_or_default();
            edge.source_id = attrs.remove("source_id").map(value_to_string);
            rename_reserved(&mut attrs, RESERVED_EDGE_ATTRIBUTES);
            edge.extra = attrs;
            edges.push(edge);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version='1.0' encoding='utf-8'?>
<graphml xmlns="http://graphml.graphdrawing.org/xmlns">
  <key id="d0" for="node" attr.name="entity_type" attr.type="string" />
  <key id="d1" for="node" attr.name="description" attr.type="string" />
  <key id="d2" for="node" attr.name="source_id" attr.type="string" />
  <key id="d3" for="node" attr.name="rank" attr.type="long" />
  <key id="d4" for="edge" attr.name="weight" attr.type="double" />
  <key id="d5" for="edge" attr.name="description" attr.type="string" />
  <key id="d6" for="edge" attr.name="keywords" attr.type="string" />
  <key id="d7" for="edge" attr.name="label" attr.type="string" />
  <graph edgedefault="undirected">
    <node id="&quot;ALICE&quot;">
      <data key="d0">"PERSON"</data>
      <data key="d1">Alice works at &amp; leads Acme.</data>
      <data key="d2">chunk-1</data>
      <data key="d3">7</data>
    </node>
    <node id="&quot;ACME&quot;">
      <data key="d0">"ORGANIZATION"</data>
      <data key="d1"></data>
    </node>
    <node id="&quot;BOB&quot;"/>
    <edge source="&quot;ALICE&quot;" target="&quot;ACME&quot;">
      <data key="d4">2.5</data>
      <data key="d5"><![CDATA[Alice <leads> Acme]]></data>
      <data key="d6">leadership, employment</data>
      <data key="d7">WORKS_AT</data>
    </edge>
    <edge source="&quot;BOB&quot;" target="&quot;ALICE&quot;" directed="true"/>
  </graph>
</graphml>"#;

    #[test]
    fn test_parse_lightrag_style_document() {
        let parsed = parse_str(SAMPLE).unwrap();
        let g = &parsed.graph;
        assert!(parsed.dangling.is_empty());
        assert_eq!(g.node_count(), 3);
        assert_eq!(g.edge_count(), 2);

        let alice = g.node("\"ALICE\"").unwrap();
        assert_eq!(alice.entity_type.as_deref(), Some("\"PERSON\""));
        assert_eq!(alice.description.as_deref(), Some("Alice works at & leads Acme."));
        assert_eq!(alice.source_id.as_deref(), Some("chunk-1"));
        // Unknown attribute preserved with its declared type
        assert_eq!(alice.extra.get("rank"), Some(&serde_json::json!(7)));

        let acme = g.node("\"ACME\"").unwrap();
        assert_eq!(acme.description.as_deref(), Some(""));
        let bob = g.node("\"BOB\"").unwrap();
        assert!(bob.entity_type.is_none());

        let e = &g.edges()[0];
        assert_eq!(e.weight, 2.5);
        assert_eq!(e.description.as_deref(), Some("Alice <leads> Acme"));
        assert_eq!(e.keywords, vec!["leadership", "employment"]);
        assert_eq!(e.kind(), "WORKS_AT");
        assert!(!e.directed);

        let e2 = &g.edges()[1];
        assert_eq!(e2.weight, 1.0);
        assert!(e2.directed);
    }

    #[test]
    fn test_parse_reports_dangling_edge() {
        let doc = r#"<graphml><graph edgedefault="undirected">
            <node id="A"/><node id="B"/>
            <edge source="A" target="B"/>
            <edge source="A" target="D"/>
        </graph></graphml>"#;
        let parsed = parse_str(doc).unwrap();
        assert_eq!(parsed.graph.edge_count(), 1);
        assert_eq!(parsed.dangling.len(), 1);
        assert_eq!(parsed.dangling[0].missing, vec!["D".to_string()]);
    }

    #[test]
    fn test_malformed_markup() {
        let err = parse_str("<graphml><graph><node id=\"A\"></graph></graphml>").unwrap_err();
        assert!(matches!(err, ParseError::MalformedDocument { .. }), "{:?}", err);
    }

    #[test]
    fn test_truncated_document_is_malformed() {
        let err = parse_str("<graphml><graph><node id=\"A\"/>").unwrap_err();
        assert!(matches!(err, ParseError::MalformedDocument { .. }), "{:?}", err);
    }

    #[test]
    fn test_empty_input_is_malformed() {
        let err = parse_str("").unwrap_err();
        assert!(matches!(err, ParseError::MalformedDocument { .. }));
    }

    #[test]
    fn test_wrong_root_is_unsupported_schema() {
        let err = parse_str("<html><body/></html>").unwrap_err();
        assert!(matches!(err, ParseError::UnsupportedSchema { .. }));
    }

    #[test]
    fn test_missing_graph_container_is_unsupported_schema() {
        let err = parse_str("<graphml><key id=\"d0\" for=\"node\"/></graphml>").unwrap_err();
        assert!(matches!(err, ParseError::UnsupportedSchema { .. }));
    }

    #[test]
    fn test_undeclared_key_is_unsupported_schema() {
        let doc = r#"<graphml><graph><node id="A"><data key="zz">x</data></node></graph></graphml>"#;
        let err = parse_str(doc).unwrap_err();
        assert!(matches!(err, ParseError::UnsupportedSchema { .. }));
    }

    #[test]
    fn test_bad_typed_value_is_malformed() {
        let doc = r#"<graphml>
            <key id="w" for="edge" attr.name="weight" attr.type="double"/>
            <graph><node id="A"/><edge source="A" target="A"><data key="w">heavy</data></edge></graph>
        </graphml>"#;
        let err = parse_str(doc).unwrap_err();
        assert!(matches!(err, ParseError::MalformedDocument { .. }));
    }

    #[test]
    fn test_key_defaults_applied() {
        let doc = r#"<graphml>
            <key id="t" for="node" attr.name="entity_type" attr.type="string"><default>UNKNOWN</default></key>
            <graph><node id="A"/><node id="B"><data key="t">PERSON</data></node></graph>
        </graphml>"#;
        let parsed = parse_str(doc).unwrap();
        assert_eq!(parsed.graph.node("A").unwrap().entity_type.as_deref(), Some("UNKNOWN"));
        assert_eq!(parsed.graph.node("B").unwrap().entity_type.as_deref(), Some("PERSON"));
    }

    #[test]
    fn test_data_text_kept_verbatim() {
        let doc = "<graphml>\n  <key id=\"d\" for=\"node\" attr.name=\"description\"/>\n  \
                   <graph>\n    <node id=\"A\"><data key=\"d\">  two\n lines </data></node>\n  </graph>\n</graphml>";
        let parsed = parse_str(doc).unwrap();
        assert_eq!(
            parsed.graph.node("A").unwrap().description.as_deref(),
            Some("  two\n lines ")
        );
    }

    #[test]
    fn test_reserved_attribute_names_are_prefixed() {
        let doc = r#"<graphml>
            <key id="k" for="node" attr.name="id"/>
            <key id="s" for="edge" attr.name="source"/>
            <graph><node id="A"><data key="k">orig-1</data></node>
            <edge source="A" target="A"><data key="s">doc-7</data></edge></graph>
        </graphml>"#;
        let parsed = parse_str(doc).unwrap();
        let node = parsed.graph.node("A").unwrap();
        assert_eq!(node.id, "A");
        assert_eq!(node.extra.get("attr_id"), Some(&serde_json::json!("orig-1")));
        let edge = &parsed.graph.edges()[0];
        assert_eq!(edge.source, "A");
        assert_eq!(edge.extra.get("attr_source"), Some(&serde_json::json!("doc-7")));
    }

    #[test]
    fn test_non_finite_string_weight_is_malformed() {
        for raw in ["NaN", "inf", "-infinity"] {
            let doc = format!(
                r#"<graphml>
                <key id="w" for="edge" attr.name="weight" attr.type="string"/>
                <graph><node id="A"/><edge source="A" target="A"><data key="w">{}</data></edge></graph>
            </graphml>"#,
                raw
            );
            let err = parse_str(&doc).unwrap_err();
            assert!(matches!(err, ParseError::MalformedDocument { .. }), "{}: {:?}", raw, err);
        }
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = parse_file(Path::new("/nonexistent/graph.graphml")).unwrap_err();
        assert!(matches!(err, ParseError::Io { .. }));
    }
}
