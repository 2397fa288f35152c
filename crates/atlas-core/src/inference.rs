//! Synthesizing edges for isolated entities from shared-memory co-occurrence.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::dataset::GraphDataset;
use crate::normalize::clamp01;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct InferenceOptions {
    pub min_shared_memories: usize,
    pub max_edges: usize,
    /// Rank the most-connected entity last among candidates so isolated
    /// entities do not all collapse onto it.
    pub demote_hub: bool,
}

impl Default for InferenceOptions {
    fn default() -> Self {
        Self {
            min_shared_memories: 2,
            max_edges: 48,
            demote_hub: true,
        }
    }
}

/// An edge absent from the relationships table, backed by shared memories.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InferredRelationship {
    /// The previously isolated entity.
    pub source_id: i64,
    pub target_id: i64,
    pub strength: f64,
    /// Ascending memory ids linked to both endpoints.
    pub shared_memory_ids: Vec<i64>,
}

impl InferredRelationship {
    /// Unordered endpoint pair, smaller id first.
    pub fn pair(&self) -> (i64, i64) {
        if self.source_id <= self.target_id {
            (self.source_id, self.target_id)
        } else {
            (self.target_id, self.source_id)
        }
    }

    pub fn touches(&self, entity_id: i64) -> bool {
        self.source_id == entity_id || self.target_id == entity_id
    }

    pub fn other_end(&self, entity_id: i64) -> Option<i64> {
        if self.source_id == entity_id {
            Some(self.target_id)
        } else if self.target_id == entity_id {
            Some(self.source_id)
        } else {
            None
        }
    }
}

pub fn inferred_strength(shared_count: usize) -> f64 {
    clamp01(0.34 + (shared_count as f64 / 8.0).min(0.44))
}

struct Candidate {
    entity_id: i64,
    shared: Vec<i64>,
    /// Isolated itself and already given its one inferred edge.
    saturated: bool,
    is_hub: bool,
    importance: f64,
}

fn rank(a: &Candidate, b: &Candidate) -> Ordering {
    a.saturated
        .cmp(&b.saturated)
        .then_with(|| a.is_hub.cmp(&b.is_hub))
        .then_with(|| b.shared.len().cmp(&a.shared.len()))
        .then_with(|| b.importance.total_cmp(&a.importance))
        .then_with(|| a.entity_id.cmp(&b.entity_id))
}

/// One inferred edge per isolated entity (zero explicit relationships) whose
/// best co-occurring partner shares at least `min_shared_memories` memories.
///
/// Sources are visited in dataset order. A source already touched by an
/// earlier inferred edge is skipped, and unordered pairs are never repeated.
/// An isolated target that already has its edge ranks behind every fresh
/// candidate; when it is the only one left the source gets no edge, so no
/// isolated entity is ever touched twice. The pass stops at `max_edges`.
pub fn build_inferred_relationships(
    dataset: &GraphDataset,
    options: &InferenceOptions,
) -> Vec<InferredRelationship> {
    let hub = if options.demote_hub {
        dataset.hub_entity()
    } else {
        None
    };
    let mut out: Vec<InferredRelationship> = Vec::new();
    let mut pairs: HashSet<(i64, i64)> = HashSet::new();
    let mut touched: HashSet<i64> = HashSet::new();

    for entity in &dataset.entities {
        if out.len() >= options.max_edges {
            break;
        }
        if dataset.relationship_count(entity.id) > 0 || touched.contains(&entity.id) {
            continue;
        }
        let Some(memory_ids) = dataset.entity_memories(entity.id) else {
            continue;
        };

        // partner -> shared memory ids (ascending because memory_ids is ordered)
        let mut shared: BTreeMap<i64, Vec<i64>> = BTreeMap::new();
        for &memory_id in memory_ids {
            for other in dataset.memory_entities(memory_id) {
                if other != entity.id {
                    shared.entry(other).or_default().push(memory_id);
                }
            }
        }

        let mut candidates: Vec<Candidate> = shared
            .into_iter()
            .filter(|(_, mems)| mems.len() >= options.min_shared_memories.max(1))
            .map(|(other, mems)| Candidate {
                entity_id: other,
                saturated: touched.contains(&other) && dataset.relationship_count(other) == 0,
                is_hub: hub == Some(other),
                importance: dataset.entity(other).map_or(0.0, |e| e.importance),
                shared: mems,
            })
            .collect();
        candidates.sort_by(rank);

        let Some(best) = candidates.into_iter().next().filter(|c| !c.saturated) else {
            continue;
        };
        let pair = if entity.id < best.entity_id {
            (entity.id, best.entity_id)
        } else {
            (best.entity_id, entity.id)
        };
        if !pairs.insert(pair) {
            continue;
        }
        touched.insert(entity.id);
        touched.insert(best.entity_id);
        out.push(InferredRelationship {
            source_id: entity.id,
            target_id: best.entity_id,
            strength: inferred_strength(best.shared.len()),
            shared_memory_ids: best.shared,
        });
    }

    out
}
