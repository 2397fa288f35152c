//! Global view: every entity, active patterns, and either the urgent
//! commitments or the full memory overlay.

use std::cmp::Ordering;

use serde::Serialize;

use crate::constants::{OVERVIEW_COMMITMENT_LIMIT, OVERVIEW_EVIDENCE_EDGES, URGENT_IMPORTANCE};
use crate::context::GraphContext;
use crate::graph::{GraphAssembly, GraphCounts, GraphEdge, GraphNode};
use crate::normalize::{
    MemoryStatus, memory_entity_edge, memory_status, pattern_entity_edge, relationship_edge,
};
use crate::record::MemoryRecord;
use crate::time::parse_timestamp;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OverviewOptions {
    /// Every non-invalidated memory instead of the urgent commitments.
    pub include_memories: bool,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OverviewMeta {
    pub mode: &'static str,
    pub include_memories: bool,
    pub include_historical: bool,
    pub counts: GraphCounts,
}

#[derive(Clone, Debug, Serialize)]
pub struct OverviewGraph {
    pub meta: OverviewMeta,
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}

/// An open commitment that is overdue or important enough. A future
/// deadline alone only affects ordering.
pub fn is_urgent_candidate(memory: &MemoryRecord, now: i64) -> bool {
    if !memory.is_commitment() {
        return false;
    }
    match memory_status(memory, now) {
        MemoryStatus::Completed | MemoryStatus::Inactive => false,
        MemoryStatus::Overdue => true,
        MemoryStatus::Active => memory.importance >= URGENT_IMPORTANCE,
    }
}

/// Overdue first, then anything with a deadline (earliest first), then by importance.
fn urgency_order(a: &MemoryRecord, b: &MemoryRecord, now: i64) -> Ordering {
    let key = |m: &MemoryRecord| {
        let deadline = m.deadline.as_deref().and_then(parse_timestamp);
        (memory_status(m, now) == MemoryStatus::Overdue, deadline)
    };
    let (a_overdue, a_deadline) = key(a);
    let (b_overdue, b_deadline) = key(b);
    b_overdue
        .cmp(&a_overdue)
        .then_with(|| b_deadline.is_some().cmp(&a_deadline.is_some()))
        .then_with(|| a_deadline.cmp(&b_deadline))
        .then_with(|| b.importance.total_cmp(&a.importance))
        .then_with(|| a.id.cmp(&b.id))
}

/// Up to `limit` urgent commitments in urgency order.
pub fn urgent_commitments<'d>(memories: &'d [MemoryRecord], now: i64, limit: usize) -> Vec<&'d MemoryRecord> {
    let mut urgent: Vec<&MemoryRecord> = memories
        .iter()
        .filter(|m| is_urgent_candidate(m, now))
        .collect();
    urgent.sort_by(|a, b| urgency_order(a, b, now));
    urgent.truncate(limit);
    urgent
}

pub fn build_overview(ctx: &GraphContext<'_>, options: OverviewOptions) -> OverviewGraph {
    let dataset = ctx.dataset;
    let mut graph = GraphAssembly::new();

    for entity in &dataset.entities {
        graph.push_node(ctx.entity_node(entity));
    }

    let patterns: Vec<_> = dataset.patterns.iter().filter(|p| p.is_active).collect();
    for pattern in &patterns {
        graph.push_node(ctx.pattern_node(pattern));
    }

    let memories: Vec<&MemoryRecord> = if options.include_memories {
        dataset
            .memories
            .iter()
            .filter(|m| !m.is_invalidated())
            .collect()
    } else {
        urgent_commitments(&dataset.memories, ctx.now(), OVERVIEW_COMMITMENT_LIMIT)
    };
    for memory in &memories {
        graph.push_node(ctx.memory_node(memory));
    }

    for rel in &dataset.relationships {
        graph.push_edge(relationship_edge(rel));
    }
    for edge in ctx.inferred_edges() {
        graph.push_edge(edge);
    }
    for memory in &memories {
        for link in dataset.memory_links(memory.id).take(OVERVIEW_EVIDENCE_EDGES) {
            graph.push_edge(memory_entity_edge(memory, link));
        }
    }
    for pattern in &patterns {
        for entity_id in ctx.pattern_refs(pattern.id).iter().take(OVERVIEW_EVIDENCE_EDGES) {
            graph.push_edge(pattern_entity_edge(pattern, *entity_id));
        }
    }

    let counts = graph.counts();
    let (nodes, edges) = graph.finish();
    OverviewGraph {
        meta: OverviewMeta {
            mode: "overview",
            include_memories: options.include_memories,
            include_historical: dataset.options.include_historical,
            counts,
        },
        nodes,
        edges,
    }
}
