//! Case-insensitive substring search across entities, patterns and memories.

use std::cmp::Ordering;

use serde::Serialize;

use crate::dataset::GraphDataset;
use crate::graph::{GraphId, NodeKind};
use crate::normalize::{clamp01, memory_graph_id, round4, truncate_label};

pub const DEFAULT_SEARCH_LIMIT: usize = 24;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SearchHit {
    pub id: String,
    pub kind: NodeKind,
    pub subtype: String,
    pub label: String,
    pub description: Option<String>,
    pub score: f64,
}

fn type_priority(kind: NodeKind) -> u8 {
    match kind {
        NodeKind::Entity => 0,
        NodeKind::Pattern => 1,
        NodeKind::Commitment => 2,
        NodeKind::Memory => 3,
    }
}

/// How well `needle` (already lowercased) matches a primary label and an
/// optional body. Zero means no match.
fn match_score(needle: &str, label: &str, body: Option<&str>) -> f64 {
    let label = label.to_lowercase();
    let label_score = if label == needle {
        1.0
    } else if label.starts_with(needle) {
        0.85
    } else if label.contains(needle) {
        0.7
    } else {
        0.0
    };
    if label_score > 0.0 {
        return label_score;
    }
    match body {
        Some(body) if body.to_lowercase().contains(needle) => 0.45,
        _ => 0.0,
    }
}

fn weighted(base: f64, importance: f64) -> f64 {
    round4(base * 0.85 + clamp01(importance) * 0.15)
}

fn hit_order(a: &SearchHit, b: &SearchHit) -> Ordering {
    type_priority(a.kind)
        .cmp(&type_priority(b.kind))
        .then_with(|| b.score.total_cmp(&a.score))
        .then_with(|| a.label.cmp(&b.label))
        .then_with(|| a.id.cmp(&b.id))
}

/// Up to `limit` hits ordered by node kind, score, then label. A blank query
/// matches nothing.
pub fn search(dataset: &GraphDataset, query: &str, limit: usize) -> Vec<SearchHit> {
    let needle = query.trim().to_lowercase();
    if needle.is_empty() || limit == 0 {
        return Vec::new();
    }
    let mut hits = Vec::new();

    for entity in &dataset.entities {
        let base = match_score(&needle, &entity.name, entity.description.as_deref());
        if base > 0.0 {
            hits.push(SearchHit {
                id: GraphId::entity(entity.id).to_string(),
                kind: NodeKind::Entity,
                subtype: entity.kind.as_str().to_string(),
                label: entity.name.clone(),
                description: entity.description.clone(),
                score: weighted(base, entity.importance),
            });
        }
    }

    for pattern in &dataset.patterns {
        let base = match_score(&needle, &pattern.name, pattern.description.as_deref());
        if base > 0.0 {
            hits.push(SearchHit {
                id: GraphId::pattern(pattern.id).to_string(),
                kind: NodeKind::Pattern,
                subtype: pattern.kind.clone(),
                label: pattern.name.clone(),
                description: pattern.description.clone(),
                score: weighted(base, pattern.confidence),
            });
        }
    }

    for memory in &dataset.memories {
        // content is both label and body; a substring hit anywhere counts as a label hit
        let base = match_score(&needle, &memory.content, None);
        if base > 0.0 {
            let id = memory_graph_id(memory);
            hits.push(SearchHit {
                id: id.to_string(),
                kind: id.kind,
                subtype: memory.kind.as_str().to_string(),
                label: truncate_label(&memory.content),
                description: Some(memory.content.clone()),
                score: weighted(base, memory.importance),
            });
        }
    }

    hits.sort_by(hit_order);
    hits.truncate(limit);
    hits
}
