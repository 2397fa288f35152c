//! Local view around one focus node: a bounded BFS over the entity graph
//! plus the memories and patterns attached to the visited entities.

use std::collections::{BTreeSet, HashSet, VecDeque};

use serde::Serialize;

use crate::constants::{
    COMMITMENT_BOOST, NEIGHBORHOOD_MEMORY_EDGES, NEIGHBORHOOD_MEMORY_LIMIT,
    NEIGHBORHOOD_PATTERN_EDGES, NEIGHBORHOOD_PATTERN_LIMIT,
};
use crate::context::GraphContext;
use crate::graph::{GraphAssembly, GraphCounts, GraphEdge, GraphId, GraphNode, NodeKind};
use crate::normalize::{memory_entity_edge, pattern_entity_edge, relationship_edge};
use crate::record::{MemoryRecord, PatternRecord};

pub const MIN_DEPTH: usize = 1;
pub const MAX_DEPTH: usize = 2;

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NeighborhoodMeta {
    pub mode: &'static str,
    pub center_id: String,
    pub focus_kind: NodeKind,
    pub depth: usize,
    pub found: bool,
    pub counts: GraphCounts,
}

#[derive(Clone, Debug, Serialize)]
pub struct NeighborhoodGraph {
    pub meta: NeighborhoodMeta,
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}

impl NeighborhoodGraph {
    fn not_found(focus: GraphId, depth: usize) -> Self {
        Self {
            meta: NeighborhoodMeta {
                mode: "neighborhood",
                center_id: focus.to_string(),
                focus_kind: focus.kind,
                depth,
                found: false,
                counts: GraphCounts::default(),
            },
            nodes: Vec::new(),
            edges: Vec::new(),
        }
    }
}

fn focus_exists(ctx: &GraphContext<'_>, focus: GraphId) -> bool {
    let dataset = ctx.dataset;
    match focus.kind {
        NodeKind::Entity => dataset.entity(focus.id).is_some(),
        NodeKind::Memory | NodeKind::Commitment => dataset
            .memory(focus.id)
            .is_some_and(|m| m.is_commitment() == (focus.kind == NodeKind::Commitment)),
        NodeKind::Pattern => dataset.pattern(focus.id).is_some(),
    }
}

/// Entities within `depth` hops of the seeds over explicit and inferred
/// relationships, in BFS order.
fn expand(ctx: &GraphContext<'_>, seeds: &[i64], depth: usize) -> Vec<i64> {
    let mut visited: HashSet<i64> = HashSet::new();
    let mut order = Vec::new();
    let mut queue = VecDeque::new();
    for &seed in seeds {
        if visited.insert(seed) {
            order.push(seed);
            queue.push_back((seed, 0usize));
        }
    }

    while let Some((entity_id, hops)) = queue.pop_front() {
        if hops >= depth {
            continue;
        }
        let explicit = ctx.dataset.neighbors(entity_id).iter().map(|a| a.neighbor);
        let inferred = ctx
            .inferred_for(entity_id)
            .filter_map(|r| r.other_end(entity_id));
        for next in explicit.chain(inferred) {
            if visited.insert(next) {
                order.push(next);
                queue.push_back((next, hops + 1));
            }
        }
    }
    order
}

fn memory_rank(memory: &MemoryRecord) -> f64 {
    let boost = if memory.is_commitment() {
        COMMITMENT_BOOST
    } else {
        0.0
    };
    memory.importance + boost
}

/// Truncate ranked `items` to `limit`. A focus item outside the kept prefix
/// takes the first slot and the tail gives up one place for it.
fn cap_keeping_focus<'d, T>(
    items: &mut Vec<&'d T>,
    limit: usize,
    focus: Option<&'d T>,
    id_of: impl Fn(&T) -> i64,
) {
    let missing = focus.filter(|f| !items.iter().take(limit).any(|i| id_of(i) == id_of(f)));
    match missing {
        Some(focus) if limit > 0 => {
            items.retain(|i| id_of(i) != id_of(focus));
            items.truncate(limit - 1);
            items.insert(0, focus);
        }
        _ => items.truncate(limit),
    }
}

/// Build the neighborhood of `focus`. Depth is clamped to 1..=2; an unknown
/// focus yields `found: false` with no nodes.
pub fn build_neighborhood(ctx: &GraphContext<'_>, focus: GraphId, depth: usize) -> NeighborhoodGraph {
    let depth = depth.clamp(MIN_DEPTH, MAX_DEPTH);
    if !focus_exists(ctx, focus) {
        return NeighborhoodGraph::not_found(focus, depth);
    }
    let dataset = ctx.dataset;
    let seeds = ctx.resolve_entities(focus);
    let frontier = expand(ctx, &seeds, depth);
    let frontier_set: HashSet<i64> = frontier.iter().copied().collect();

    let mut graph = GraphAssembly::new();
    for &entity_id in &frontier {
        if let Some(entity) = dataset.entity(entity_id) {
            graph.push_node(ctx.entity_node(entity));
        }
    }

    // memories linked to the frontier, focus memory first
    let mut candidate_ids: BTreeSet<i64> = BTreeSet::new();
    for entity_id in &frontier {
        if let Some(ids) = dataset.entity_memories(*entity_id) {
            candidate_ids.extend(ids.iter().copied());
        }
    }
    let mut memories: Vec<&MemoryRecord> = candidate_ids
        .iter()
        .filter_map(|id| dataset.memory(*id))
        .collect();
    memories.sort_by(|a, b| {
        memory_rank(b)
            .total_cmp(&memory_rank(a))
            .then_with(|| a.id.cmp(&b.id))
    });
    let focus_memory = dataset.memory(focus.id).filter(|_| focus.kind.is_memory());
    cap_keeping_focus(&mut memories, NEIGHBORHOOD_MEMORY_LIMIT, focus_memory, |m| m.id);

    let mut patterns: Vec<&PatternRecord> = dataset
        .patterns
        .iter()
        .filter(|p| p.is_active || dataset.options.include_historical)
        .filter(|p| ctx.pattern_refs(p.id).iter().any(|e| frontier_set.contains(e)))
        .collect();
    patterns.sort_by(|a, b| {
        b.confidence
            .total_cmp(&a.confidence)
            .then_with(|| a.id.cmp(&b.id))
    });
    let focus_pattern = dataset.pattern(focus.id).filter(|_| focus.kind == NodeKind::Pattern);
    cap_keeping_focus(&mut patterns, NEIGHBORHOOD_PATTERN_LIMIT, focus_pattern, |p| p.id);

    for memory in &memories {
        graph.push_node(ctx.memory_node(memory));
    }
    for pattern in &patterns {
        graph.push_node(ctx.pattern_node(pattern));
    }

    for rel in &dataset.relationships {
        graph.push_edge(relationship_edge(rel));
    }
    for edge in ctx.inferred_edges() {
        graph.push_edge(edge);
    }
    for memory in &memories {
        for link in dataset
            .memory_links(memory.id)
            .filter(|l| frontier_set.contains(&l.entity_id))
            .take(NEIGHBORHOOD_MEMORY_EDGES)
        {
            graph.push_edge(memory_entity_edge(memory, link));
        }
    }
    for pattern in &patterns {
        for entity_id in ctx
            .pattern_refs(pattern.id)
            .iter()
            .filter(|e| frontier_set.contains(e))
            .take(NEIGHBORHOOD_PATTERN_EDGES)
        {
            graph.push_edge(pattern_entity_edge(pattern, *entity_id));
        }
    }

    let counts = graph.counts();
    let (nodes, edges) = graph.finish();
    NeighborhoodGraph {
        meta: NeighborhoodMeta {
            mode: "neighborhood",
            center_id: focus.to_string(),
            focus_kind: focus.kind,
            depth,
            found: true,
            counts,
        },
        nodes,
        edges,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::GraphDataset;
    use crate::dataset::fixtures::Fixture;
    use crate::inference::InferenceOptions;
    use crate::record::{MemoryKind, PatternRecord};

    /// Chain 1 - 2 - 3 - 4 with a memory on every entity.
    fn chain() -> GraphDataset {
        let mut pattern = PatternRecord::new(1, "relationship_11 pattern", 0.6);
        pattern.description = Some("between Bob and Cy".into());
        Fixture::new()
            .person(1, "Ada")
            .person(2, "Bob")
            .person(3, "Cy")
            .person(4, "Di")
            .rel(10, 1, 2, 0.8)
            .rel(11, 2, 3, 0.5)
            .rel(12, 3, 4, 0.5)
            .fact(100, &[1])
            .fact(101, &[2])
            .fact(102, &[3])
            .memory(103, MemoryKind::Commitment, "call Di", 0.4, &[4])
            .pattern(pattern)
            .build()
    }

    fn ids(graph: &NeighborhoodGraph) -> Vec<&str> {
        graph.nodes.iter().map(|n| n.id.as_str()).collect()
    }

    #[test]
    fn test_depth_one_from_entity() {
        let ds = chain();
        let ctx = GraphContext::new(&ds, None, &InferenceOptions::default());
        let graph = build_neighborhood(&ctx, GraphId::entity(1), 1);
        let ids = ids(&graph);
        assert!(graph.meta.found);
        assert_eq!(graph.meta.depth, 1);
        assert!(ids.contains(&"entity-1"));
        assert!(ids.contains(&"entity-2"));
        assert!(!ids.contains(&"entity-3"));
        assert!(ids.contains(&"memory-100"));
        assert!(!ids.contains(&"memory-102"));
        // pattern refs 2 and 3; 2 is in the frontier
        assert!(ids.contains(&"pattern-1"));
    }

    #[test]
    fn test_depth_is_clamped() {
        let ds = chain();
        let ctx = GraphContext::new(&ds, None, &InferenceOptions::default());
        let graph = build_neighborhood(&ctx, GraphId::entity(1), 9);
        assert_eq!(graph.meta.depth, 2);
        let ids = ids(&graph);
        assert!(ids.contains(&"entity-3"));
        assert!(!ids.contains(&"entity-4"));

        let zero = build_neighborhood(&ctx, GraphId::entity(1), 0);
        assert_eq!(zero.meta.depth, 1);
    }

    #[test]
    fn test_commitment_focus_is_included() {
        let ds = chain();
        let ctx = GraphContext::new(&ds, None, &InferenceOptions::default());
        let graph = build_neighborhood(&ctx, GraphId::new(NodeKind::Commitment, 103), 1);
        assert!(graph.meta.found);
        assert_eq!(graph.meta.focus_kind, NodeKind::Commitment);
        let ids = ids(&graph);
        assert!(ids.contains(&"commitment-103"));
        assert!(ids.contains(&"entity-4"));
        assert!(ids.contains(&"entity-3"));
        assert!(graph
            .edges
            .iter()
            .any(|e| e.source == "commitment-103" && e.target == "entity-4"));
    }

    #[test]
    fn test_unknown_focus_not_found() {
        let ds = chain();
        let ctx = GraphContext::new(&ds, None, &InferenceOptions::default());
        for focus in [
            GraphId::entity(999),
            GraphId::new(NodeKind::Memory, 999),
            GraphId::pattern(999),
            // memory 103 is a commitment, not a plain memory
            GraphId::new(NodeKind::Memory, 103),
        ] {
            let graph = build_neighborhood(&ctx, focus, 1);
            assert!(!graph.meta.found, "{focus} should not be found");
            assert!(graph.nodes.is_empty());
            assert!(graph.edges.is_empty());
        }
    }

    #[test]
    fn test_follows_inferred_edges() {
        let ds = Fixture::new()
            .person(1, "Ada")
            .person(2, "Bob")
            .person(3, "Cy")
            .rel(10, 1, 2, 0.5)
            .fact(100, &[3, 1])
            .fact(101, &[3, 1])
            .build();
        let ctx = GraphContext::new(&ds, None, &InferenceOptions::default());
        let graph = build_neighborhood(&ctx, GraphId::entity(3), 1);
        let ids = ids(&graph);
        assert!(ids.contains(&"entity-1"));
        assert_eq!(graph.meta.counts.inferred, 1);
    }

    #[test]
    fn test_memory_limit_and_edge_cap() {
        let mut fx = Fixture::new().person(1, "Ada");
        for i in 0..80 {
            fx = fx.fact(1000 + i, &[1]);
        }
        let ds = fx.build();
        let ctx = GraphContext::new(&ds, None, &InferenceOptions::default());
        let graph = build_neighborhood(&ctx, GraphId::entity(1), 1);
        assert_eq!(graph.meta.counts.memories, NEIGHBORHOOD_MEMORY_LIMIT);
        for edge in &graph.edges {
            assert!(graph.nodes.iter().any(|n| n.id == edge.source));
            assert!(graph.nodes.iter().any(|n| n.id == edge.target));
        }
    }

    #[test]
    fn test_low_ranked_focus_stays_within_limits() {
        let mut fx = Fixture::new().person(1, "Ada");
        for i in 0..80 {
            fx = fx.fact(1000 + i, &[1]);
        }
        for i in 0..25 {
            let mut pattern = PatternRecord::new(i, &format!("p{i}"), 0.9 - i as f64 * 0.01);
            pattern.evidence = Some("entity_id: 1".into());
            fx = fx.pattern(pattern);
        }
        let ds = fx.build();
        let ctx = GraphContext::new(&ds, None, &InferenceOptions::default());

        // 1079 ranks last among 80 equal facts
        let graph = build_neighborhood(&ctx, GraphId::new(NodeKind::Memory, 1079), 1);
        assert_eq!(graph.meta.counts.memories, NEIGHBORHOOD_MEMORY_LIMIT);
        assert_eq!(graph.meta.counts.patterns, NEIGHBORHOOD_PATTERN_LIMIT);
        let ids = ids(&graph);
        assert!(ids.contains(&"memory-1079"));
        assert!(!ids.contains(&"memory-1059"));
        assert!(ids.contains(&"memory-1058"));

        // pattern 24 has the lowest confidence
        let graph = build_neighborhood(&ctx, GraphId::pattern(24), 1);
        assert_eq!(graph.meta.counts.patterns, NEIGHBORHOOD_PATTERN_LIMIT);
        let ids = self::ids(&graph);
        assert!(ids.contains(&"pattern-24"));
        assert!(!ids.contains(&"pattern-17"));
        assert!(ids.contains(&"pattern-16"));
    }
}
