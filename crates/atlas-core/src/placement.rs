//! Deterministic fallback positions for when no projection is available.
//!
//! Entities sit on a golden-angle spiral; dependent nodes (memories,
//! commitments, patterns) orbit an anchor at an offset derived from a hash of
//! their graph id, so a reload never moves anything.

use std::collections::HashMap;

use crate::constants::GOLDEN_ANGLE;
use crate::dataset::GraphDataset;
use crate::evidence::{EntityRefExtractor, pattern_entity_refs};
use crate::graph::GraphId;
use crate::normalize::memory_graph_id;
use crate::projection::Projection;
use crate::record::EntityKind;
use crate::vector::Vec3;

/// Orbit radius for memories around their primary entity.
pub const MEMORY_ORBIT: f64 = 22.0;
/// Orbit radius for patterns around the centroid of their entities.
pub const PATTERN_ORBIT: f64 = 34.0;
/// Orbit radius for nodes with no anchor at all.
pub const ORPHAN_ORBIT: f64 = 90.0;

fn type_jitter(kind: EntityKind) -> f64 {
    match kind {
        EntityKind::Person => 0.0,
        EntityKind::Organization => 0.35,
        EntityKind::Project => 0.7,
        EntityKind::Concept => 1.05,
        EntityKind::Location => 1.4,
    }
}

fn type_bias(kind: EntityKind) -> Vec3 {
    match kind {
        EntityKind::Person => Vec3::new(0.0, 6.0, 0.0),
        EntityKind::Organization => Vec3::new(18.0, 0.0, -10.0),
        EntityKind::Project => Vec3::new(-16.0, 8.0, 12.0),
        EntityKind::Concept => Vec3::new(0.0, -18.0, 14.0),
        EntityKind::Location => Vec3::new(10.0, 16.0, -16.0),
    }
}

/// Golden-angle spiral position for the `index`-th of `total` entities.
pub fn fallback_entity_position(kind: EntityKind, importance: f64, index: usize, total: usize) -> Vec3 {
    let importance = importance.clamp(0.0, 1.0);
    let angle = index as f64 * GOLDEN_ANGLE + type_jitter(kind);
    let radius = 28.0
        + (index as f64).sqrt() * 14.0 * (1.15 - importance * 0.5)
        + (total as f64).sqrt() * 2.5;
    let lift = (importance - 0.5) * 40.0 + ((index % 7) as f64 - 3.0) * 2.5;
    Vec3::new(angle.cos() * radius, lift, angle.sin() * radius) + type_bias(kind)
}

/// 64-bit FNV-1a over the seed bytes.
pub fn hash_seed(seed: &str) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in seed.as_bytes() {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

fn unit(bits: u64) -> f64 {
    (bits & 0xffff) as f64 / 65535.0
}

/// Deterministic point near `anchor`; the seed drives angle, distance and depth.
pub fn offset_position(anchor: Vec3, seed: &str, radius: f64) -> Vec3 {
    let h = hash_seed(seed);
    let angle = unit(h) * std::f64::consts::TAU;
    let distance = radius * (0.55 + unit(h >> 16) * 0.45);
    let depth = (unit(h >> 32) - 0.5) * radius * 0.8;
    anchor + Vec3::new(angle.cos() * distance, depth, angle.sin() * distance)
}

/// Resolved seed position for every node a builder may emit, keyed by graph id.
#[derive(Clone, Debug, Default)]
pub struct Placement {
    positions: HashMap<String, Vec3>,
}

impl Placement {
    /// Projection coordinates win per node; everything else falls back to the
    /// spiral and anchored offsets.
    pub fn compute(
        dataset: &GraphDataset,
        projection: Option<&Projection>,
        extractors: &[Box<dyn EntityRefExtractor>],
    ) -> Self {
        let mut positions = HashMap::new();
        let projected = |id: &str| projection.and_then(|p| p.get(id));

        let total = dataset.entities.len();
        for (index, entity) in dataset.entities.iter().enumerate() {
            let id = GraphId::entity(entity.id).to_string();
            let pos = projected(&id).unwrap_or_else(|| {
                fallback_entity_position(entity.kind, entity.importance, index, total)
            });
            positions.insert(id, pos);
        }

        let entity_pos = |positions: &HashMap<String, Vec3>, entity_id: i64| {
            positions.get(&GraphId::entity(entity_id).to_string()).copied()
        };

        for memory in &dataset.memories {
            let id = memory_graph_id(memory).to_string();
            let pos = match projected(&id) {
                Some(p) => p,
                None => match dataset
                    .primary_entity(memory.id)
                    .and_then(|e| entity_pos(&positions, e))
                {
                    Some(anchor) => offset_position(anchor, &id, MEMORY_ORBIT),
                    None => offset_position(Vec3::ZERO, &id, ORPHAN_ORBIT),
                },
            };
            positions.insert(id, pos);
        }

        for pattern in &dataset.patterns {
            let id = GraphId::pattern(pattern.id).to_string();
            let pos = match projected(&id) {
                Some(p) => p,
                None => {
                    let refs = pattern_entity_refs(pattern, dataset, extractors);
                    let anchor = Vec3::centroid(refs.iter().filter_map(|e| entity_pos(&positions, *e)));
                    match anchor {
                        Some(anchor) => offset_position(anchor, &id, PATTERN_ORBIT),
                        None => offset_position(Vec3::ZERO, &id, ORPHAN_ORBIT),
                    }
                }
            };
            positions.insert(id, pos);
        }

        Self { positions }
    }

    pub fn get(&self, graph_id: &str) -> Vec3 {
        self.positions.get(graph_id).copied().unwrap_or(Vec3::ZERO)
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}
