//! Deterministic force-directed layout (Fruchterman–Reingold).
//!
//! Initial positions come from SHA-256 of `(seed, node id)`, so the same
//! graph, iteration count and seed always give bit-identical coordinates.
//! Nodes repel with `k²/d`, edges attract with `w·d²/k`; per-step movement
//! is capped by a temperature that cools linearly to zero.
//!
//! Coordinates are unnormalized. [`normalize`] maps them into a bounding box
//! as a separate step.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use tracing::debug;

use crate::error::AnalysisError;
use crate::graph::models::KnowledgeGraph;

/// Starting temperature, as a fraction of the unit square.
const INITIAL_TEMPERATURE: f64 = 0.1;
/// Distances are clamped to this to keep forces finite.
const MIN_DISTANCE: f64 = 0.01;
/// Node count from which repulsion is computed on the rayon pool.
const PARALLEL_THRESHOLD: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Node id → coordinate. Immutable once produced.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Layout {
    positions: BTreeMap<String, Point>,
}

impl Layout {
    pub fn get(&self, id: &str) -> Option<Point> {
        self.positions.get(id).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Point)> {
        self.positions.iter().map(|(id, p)| (id.as_str(), *p))
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    fn from_points(graph: &KnowledgeGraph, points: Vec<Point>) -> Self {
        Self {
            positions: graph
                .nodes()
                .iter()
                .map(|n| n.id.clone())
                .zip(points)
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayoutParams {
    pub iterations: usize,
    pub seed: u64,
}

impl Default for LayoutParams {
    fn default() -> Self {
        Self {
            iterations: 50,
            seed: 42,
        }
    }
}

/// Seeded position in `[0, 1)²` for a node.
fn initial_position(seed: u64, id: &str) -> Point {
    let mut hasher = Sha256::new();
    hasher.update(seed.to_le_bytes());
    hasher.update(id.as_bytes());
    let digest = hasher.finalize();
    let unit = |bytes: &[u8]| {
        let mut word = [0u8; 8];
        word.copy_from_slice(bytes);
        // 53 high bits → exactly representable fraction in [0, 1)
        (u64::from_le_bytes(word) >> 11) as f64 / (1u64 << 53) as f64
    };
    Point::new(unit(&digest[0..8]), unit(&digest[8..16]))
}

/// Total repulsive displacement acting on node `i`.
///
/// Summation order is fixed (ascending `j`), so serial and parallel runs agree.
fn repulsion_on(i: usize, pos: &[Point], k2: f64) -> Point {
    let mut d = Point::new(0.0, 0.0);
    for (j, other) in pos.iter().enumerate() {
        if i == j {
            continue;
        }
        let dx = pos[i].x - other.x;
        let dy = pos[i].y - other.y;
        let dist = (dx * dx + dy * dy).sqrt().max(MIN_DISTANCE);
        let force = k2 / dist;
        d.x += dx / dist * force;
        d.y += dy / dist * force;
    }
    d
}

fn repulsion(pos: &[Point], k2: f64, parallel: bool) -> Vec<Point> {
    if parallel {
        (0..pos.len())
            .into_par_iter()
            .map(|i| repulsion_on(i, pos, k2))
            .collect()
    } else {
        (0..pos.len()).map(|i| repulsion_on(i, pos, k2)).collect()
    }
}

/// Compute a layout for `graph`.
pub fn compute(graph: &KnowledgeGraph, params: LayoutParams) -> Result<Layout, AnalysisError> {
    if graph.is_empty() {
        return Err(AnalysisError::EmptyGraph);
    }
    let n = graph.node_count();
    let mut pos: Vec<Point> = graph
        .nodes()
        .iter()
        .map(|node| initial_position(params.seed, &node.id))
        .collect();

    let springs: Vec<(usize, usize, f64)> = graph
        .edges()
        .iter()
        .filter_map(|e| Some((graph.node_index(&e.source)?, graph.node_index(&e.target)?, e.weight)))
        .filter(|(s, t, _)| s != t)
        .collect();

    let k = (1.0 / n as f64).sqrt();
    let k2 = k * k;
    let parallel = n >= PARALLEL_THRESHOLD;
    debug!(nodes = n, springs = springs.len(), parallel, "Computing layout");

    for iteration in 0..params.iterations {
        let temperature =
            INITIAL_TEMPERATURE * (1.0 - iteration as f64 / params.iterations as f64);

        let mut disp = repulsion(&pos, k2, parallel);
        for &(s, t, weight) in &springs {
            let dx = pos[s].x - pos[t].x;
            let dy = pos[s].y - pos[t].y;
            let dist = (dx * dx + dy * dy).sqrt().max(MIN_DISTANCE);
            let force = weight * dist * dist / k;
            let (fx, fy) = (dx / dist * force, dy / dist * force);
            disp[s].x -= fx;
            disp[s].y -= fy;
            disp[t].x += fx;
            disp[t].y += fy;
        }

        for (p, d) in pos.iter_mut().zip(&disp) {
            let len = (d.x * d.x + d.y * d.y).sqrt();
            if len > 0.0 && len.is_finite() {
                let step = len.min(temperature);
                p.x += d.x / len * step;
                p.y += d.y / len * step;
            }
        }
    }

    Ok(Layout::from_points(graph, pos))
}

/// Evenly spaced placement on the unit circle, in document order.
///
/// Used by the exporter when no computed layout is supplied.
pub fn circular(graph: &KnowledgeGraph) -> Layout {
    let n = graph.node_count().max(1) as f64;
    let points = (0..graph.node_count())
        .map(|i| {
            let angle = std::f64::consts::TAU * i as f64 / n;
            Point::new(angle.cos(), angle.sin())
        })
        .collect();
    Layout::from_points(graph, points)
}

/// Scale a layout uniformly into `[0, width] × [0, height]`, centred.
///
/// A layout with no extent (one node, or all nodes coincident) is placed at
/// the centre of the box.
pub fn normalize(layout: &Layout, width: f64, height: f64) -> Layout {
    let (mut min_x, mut min_y) = (f64::INFINITY, f64::INFINITY);
    let (mut max_x, mut max_y) = (f64::NEG_INFINITY, f64::NEG_INFINITY);
    for (_, p) in layout.iter() {
        min_x = min_x.min(p.x);
        min_y = min_y.min(p.y);
        max_x = max_x.max(p.x);
        max_y = max_y.max(p.y);
    }
    let (span_x, span_y) = (max_x - min_x, max_y - min_y);

    let scale_x = if span_x > 0.0 { width / span_x } else { f64::INFINITY };
    let scale_y = if span_y > 0.0 { height / span_y } else { f64::INFINITY };
    let scale = scale_x.min(scale_y);
    let (cx, cy) = (width / 2.0, height / 2.0);

    let positions = layout
        .iter()
        .map(|(id, p)| {
            let q = if scale.is_finite() {
                Point::new(
                    cx + (p.x - (min_x + span_x / 2.0)) * scale,
                    cy + (p.y - (min_y + span_y / 2.0)) * scale,
                )
            } else {
                Point::new(cx, cy)
            };
            (id.to_string(), q)
        })
        .collect();
    Layout { positions }
}
