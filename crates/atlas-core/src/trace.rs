//! Weighted path between two nodes.
//!
//! Strong relationships are cheap to traverse, so the cheapest path is the
//! most meaningful one, not the one with the fewest hops. The search is a
//! uniform-cost search over `(entity, hops)` states bounded by `max_depth`.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};

use serde::Serialize;

use crate::constants::{
    TRACE_BASE_COST, TRACE_DEFAULT_DEPTH, TRACE_EVIDENCE_PER_HOP, TRACE_MAX_DEPTH,
    TRACE_MIN_DEPTH, TRACE_STRENGTH_WEIGHT,
};
use crate::context::GraphContext;
use crate::graph::{GraphAssembly, GraphEdge, GraphId, GraphNode};
use crate::normalize::{
    clamp01, inferred_edge, memory_graph_id, relationship_edge, round4, trace_evidence_edge,
};
use crate::record::MemoryRecord;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TraceRequest {
    pub from: GraphId,
    pub to: GraphId,
    pub max_depth: usize,
}

impl TraceRequest {
    pub fn new(from: GraphId, to: GraphId) -> Self {
        Self {
            from,
            to,
            max_depth: TRACE_DEFAULT_DEPTH,
        }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceMeta {
    pub mode: &'static str,
    pub from: String,
    pub to: String,
    pub max_depth: usize,
    pub found: bool,
    pub used_inferred: bool,
    pub hop_count: usize,
    pub aggregate_weight: f64,
}

/// Shared memories backing one hop of the path.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HopEvidence {
    pub hop_index: usize,
    pub source: String,
    pub target: String,
    pub edge_id: String,
    pub memory_ids: Vec<String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct TraceGraph {
    pub meta: TraceMeta,
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
    pub path: Vec<String>,
    pub evidence: Vec<HopEvidence>,
}

pub fn edge_cost(strength: f64) -> f64 {
    TRACE_BASE_COST - clamp01(strength) * TRACE_STRENGTH_WEIGHT
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum HopSource {
    Explicit(usize),
    Inferred(usize),
}

#[derive(Clone, Copy, Debug)]
struct Hop {
    to: i64,
    cost: f64,
    source: HopSource,
}

/// Entity adjacency with parallel edges collapsed to the cheapest per pair.
struct CostGraph {
    adjacency: HashMap<i64, Vec<Hop>>,
}

impl CostGraph {
    fn build(ctx: &GraphContext<'_>, with_inferred: bool) -> Self {
        let mut best: HashMap<(i64, i64), (f64, HopSource)> = HashMap::new();
        let mut offer = |a: i64, b: i64, cost: f64, source: HopSource| {
            let key = if a < b { (a, b) } else { (b, a) };
            best.entry(key)
                .and_modify(|cur| {
                    if cost < cur.0 {
                        *cur = (cost, source);
                    }
                })
                .or_insert((cost, source));
        };

        for (i, rel) in ctx.dataset.relationships.iter().enumerate() {
            offer(rel.source_id, rel.target_id, edge_cost(rel.strength), HopSource::Explicit(i));
        }
        if with_inferred {
            for (i, rel) in ctx.inferred.iter().enumerate() {
                offer(rel.source_id, rel.target_id, edge_cost(rel.strength), HopSource::Inferred(i));
            }
        }

        let mut adjacency: HashMap<i64, Vec<Hop>> = HashMap::new();
        for ((a, b), (cost, source)) in best {
            adjacency.entry(a).or_default().push(Hop { to: b, cost, source });
            adjacency.entry(b).or_default().push(Hop { to: a, cost, source });
        }
        for hops in adjacency.values_mut() {
            hops.sort_by_key(|h| h.to);
        }
        Self { adjacency }
    }

    fn hops(&self, entity_id: i64) -> &[Hop] {
        self.adjacency
            .get(&entity_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

#[derive(Clone, Copy, Debug)]
struct SearchState {
    cost: f64,
    hops: usize,
    node: i64,
}

impl PartialEq for SearchState {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for SearchState {}

impl Ord for SearchState {
    fn cmp(&self, other: &Self) -> Ordering {
        // Min-heap on cost, then fewer hops, then node id for determinism.
        other
            .cost
            .total_cmp(&self.cost)
            .then_with(|| other.hops.cmp(&self.hops))
            .then_with(|| other.node.cmp(&self.node))
    }
}

impl PartialOrd for SearchState {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

struct FoundPath {
    nodes: Vec<i64>,
    hops: Vec<HopSource>,
    cost: f64,
}

/// Cheapest path from `from` to `to` using at most `max_depth` hops.
fn cheapest_path(graph: &CostGraph, from: i64, to: i64, max_depth: usize) -> Option<FoundPath> {
    let mut dist: HashMap<(i64, usize), f64> = HashMap::new();
    let mut prev: HashMap<(i64, usize), (i64, HopSource)> = HashMap::new();
    // Fewest hops at which each node has been settled. Any later state for the
    // same node costs at least as much, so it only helps if it used fewer hops.
    let mut best_hops: HashMap<i64, usize> = HashMap::new();
    let mut heap = BinaryHeap::new();

    dist.insert((from, 0), 0.0);
    heap.push(SearchState {
        cost: 0.0,
        hops: 0,
        node: from,
    });

    while let Some(SearchState { cost, hops, node }) = heap.pop() {
        if dist.get(&(node, hops)).is_some_and(|d| cost > *d) {
            continue;
        }
        if best_hops.get(&node).is_some_and(|h| *h <= hops) {
            continue;
        }
        best_hops.insert(node, hops);

        if node == to {
            let mut nodes = vec![to];
            let mut sources = Vec::new();
            let (mut cur, mut h) = (to, hops);
            while let Some(&(p, source)) = prev.get(&(cur, h)) {
                nodes.push(p);
                sources.push(source);
                cur = p;
                h -= 1;
            }
            nodes.reverse();
            sources.reverse();
            return Some(FoundPath {
                nodes,
                hops: sources,
                cost,
            });
        }
        if hops >= max_depth {
            continue;
        }

        for hop in graph.hops(node) {
            let next = (hop.to, hops + 1);
            let next_cost = cost + hop.cost;
            if dist.get(&next).is_none_or(|d| next_cost < *d) {
                dist.insert(next, next_cost);
                prev.insert(next, (node, hop.source));
                heap.push(SearchState {
                    cost: next_cost,
                    hops: hops + 1,
                    node: hop.to,
                });
            }
        }
    }
    None
}

fn hop_edge(ctx: &GraphContext<'_>, source: HopSource) -> Option<GraphEdge> {
    match source {
        HopSource::Explicit(i) => ctx.dataset.relationships.get(i).map(relationship_edge),
        HopSource::Inferred(i) => ctx.inferred.get(i).map(inferred_edge),
    }
}

/// Shared memories for a hop, most important first.
fn hop_memories<'d>(ctx: &GraphContext<'d>, a: i64, b: i64) -> Vec<&'d MemoryRecord> {
    let dataset = ctx.dataset;
    let mut shared: Vec<&MemoryRecord> = dataset
        .shared_memories(a, b)
        .into_iter()
        .filter_map(|id| dataset.memory(id))
        .collect();
    shared.sort_by(|x, y| {
        y.importance
            .total_cmp(&x.importance)
            .then_with(|| x.id.cmp(&y.id))
    });
    shared.truncate(TRACE_EVIDENCE_PER_HOP);
    shared
}

fn meta(request: &TraceRequest, max_depth: usize) -> TraceMeta {
    TraceMeta {
        mode: "trace",
        from: request.from.to_string(),
        to: request.to.to_string(),
        max_depth,
        found: false,
        used_inferred: false,
        hop_count: 0,
        aggregate_weight: 0.0,
    }
}

fn not_found(request: &TraceRequest, max_depth: usize) -> TraceGraph {
    TraceGraph {
        meta: meta(request, max_depth),
        nodes: Vec::new(),
        edges: Vec::new(),
        path: Vec::new(),
        evidence: Vec::new(),
    }
}

/// Trace the cheapest explicit path, retrying once with inferred edges merged
/// in. Memory and pattern endpoints stand in for their first linked entity.
pub fn build_trace(ctx: &GraphContext<'_>, request: TraceRequest) -> TraceGraph {
    let max_depth = request.max_depth.clamp(TRACE_MIN_DEPTH, TRACE_MAX_DEPTH);
    let (Some(&from), Some(&to)) = (
        ctx.resolve_entities(request.from).first(),
        ctx.resolve_entities(request.to).first(),
    ) else {
        return not_found(&request, max_depth);
    };

    let explicit = CostGraph::build(ctx, false);
    let (found, used_inferred) = match cheapest_path(&explicit, from, to, max_depth) {
        Some(path) => (path, false),
        None => {
            let merged = CostGraph::build(ctx, true);
            match cheapest_path(&merged, from, to, max_depth) {
                Some(path) => (path, true),
                None => return not_found(&request, max_depth),
            }
        }
    };

    let dataset = ctx.dataset;
    let mut graph = GraphAssembly::new();
    for entity_id in &found.nodes {
        if let Some(entity) = dataset.entity(*entity_id) {
            graph.push_node(ctx.entity_node(entity));
        }
    }

    let mut evidence = Vec::new();
    let mut evidence_edges = Vec::new();
    for (hop_index, (pair, source)) in found.nodes.windows(2).zip(&found.hops).enumerate() {
        let Some(edge) = hop_edge(ctx, *source) else {
            continue;
        };
        let memories = hop_memories(ctx, pair[0], pair[1]);
        for memory in &memories {
            graph.push_node(ctx.memory_node(memory));
            evidence_edges.push(trace_evidence_edge(memory, pair[0]));
            evidence_edges.push(trace_evidence_edge(memory, pair[1]));
        }
        evidence.push(HopEvidence {
            hop_index,
            source: GraphId::entity(pair[0]).to_string(),
            target: GraphId::entity(pair[1]).to_string(),
            edge_id: edge.id.clone(),
            memory_ids: memories
                .iter()
                .map(|m| memory_graph_id(m).to_string())
                .collect(),
        });
        graph.push_edge(edge);
    }
    for edge in evidence_edges {
        graph.push_edge(edge);
    }

    let (nodes, edges) = graph.finish();
    TraceGraph {
        meta: TraceMeta {
            found: true,
            used_inferred,
            hop_count: found.hops.len(),
            aggregate_weight: round4(found.cost),
            ..meta(&request, max_depth)
        },
        nodes,
        edges,
        path: found
            .nodes
            .iter()
            .map(|id| GraphId::entity(*id).to_string())
            .collect(),
        evidence,
    }
}
