//! Everything the graph builders share for one request: the dataset, the
//! resolved placement, inferred relationships and recovered pattern refs.

use std::collections::HashMap;

use crate::dataset::GraphDataset;
use crate::evidence::{EntityRefExtractor, default_extractors, pattern_entity_refs};
use crate::graph::{GraphEdge, GraphId, GraphNode, NodeKind};
use crate::inference::{InferenceOptions, InferredRelationship, build_inferred_relationships};
use crate::normalize::{
    EntityExtras, MemoryExtras, PatternExtras, inferred_edge, memory_graph_id, normalize_entity,
    normalize_memory, normalize_pattern,
};
use crate::placement::Placement;
use crate::projection::Projection;
use crate::record::{EntityRecord, MemoryRecord, PatternRecord};

pub struct GraphContext<'a> {
    pub dataset: &'a GraphDataset,
    pub placement: Placement,
    pub inferred: Vec<InferredRelationship>,
    pattern_refs: HashMap<i64, Vec<i64>>,
    inferred_by_entity: HashMap<i64, Vec<usize>>,
}

impl<'a> GraphContext<'a> {
    pub fn new(
        dataset: &'a GraphDataset,
        projection: Option<&Projection>,
        inference: &InferenceOptions,
    ) -> Self {
        Self::with_extractors(dataset, projection, inference, &default_extractors())
    }

    pub fn with_extractors(
        dataset: &'a GraphDataset,
        projection: Option<&Projection>,
        inference: &InferenceOptions,
        extractors: &[Box<dyn EntityRefExtractor>],
    ) -> Self {
        let placement = Placement::compute(dataset, projection, extractors);
        let inferred = build_inferred_relationships(dataset, inference);
        let pattern_refs = dataset
            .patterns
            .iter()
            .map(|p| (p.id, pattern_entity_refs(p, dataset, extractors)))
            .collect();
        let mut inferred_by_entity: HashMap<i64, Vec<usize>> = HashMap::new();
        for (i, rel) in inferred.iter().enumerate() {
            inferred_by_entity.entry(rel.source_id).or_default().push(i);
            inferred_by_entity.entry(rel.target_id).or_default().push(i);
        }
        Self {
            dataset,
            placement,
            inferred,
            pattern_refs,
            inferred_by_entity,
        }
    }

    pub fn now(&self) -> i64 {
        self.dataset.now
    }

    pub fn pattern_refs(&self, pattern_id: i64) -> &[i64] {
        self.pattern_refs
            .get(&pattern_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Inferred relationships touching an entity.
    pub fn inferred_for(&self, entity_id: i64) -> impl Iterator<Item = &InferredRelationship> {
        self.inferred_by_entity
            .get(&entity_id)
            .into_iter()
            .flatten()
            .map(|&i| &self.inferred[i])
    }

    pub fn entity_node(&self, entity: &EntityRecord) -> GraphNode {
        let stats = self.dataset.stats(entity.id);
        let id = GraphId::entity(entity.id).to_string();
        normalize_entity(
            entity,
            &EntityExtras {
                stats: &stats,
                position: self.placement.get(&id),
            },
            self.now(),
        )
    }

    pub fn memory_node(&self, memory: &MemoryRecord) -> GraphNode {
        let id = memory_graph_id(memory).to_string();
        normalize_memory(
            memory,
            &MemoryExtras {
                entity_refs: self.dataset.memory_entities(memory.id),
                primary_entity: self.dataset.primary_entity(memory.id),
                position: self.placement.get(&id),
            },
            self.now(),
        )
    }

    pub fn pattern_node(&self, pattern: &PatternRecord) -> GraphNode {
        let id = GraphId::pattern(pattern.id).to_string();
        normalize_pattern(
            pattern,
            &PatternExtras {
                entity_refs: self.pattern_refs(pattern.id).to_vec(),
                position: self.placement.get(&id),
            },
            self.now(),
        )
    }

    pub fn inferred_edges(&self) -> impl Iterator<Item = GraphEdge> + '_ {
        self.inferred.iter().map(inferred_edge)
    }

    /// Entity ids a graph id stands for: the entity itself, a memory's linked
    /// entities, or a pattern's recovered refs. Unknown ids resolve to nothing.
    pub fn resolve_entities(&self, id: GraphId) -> Vec<i64> {
        match id.kind {
            NodeKind::Entity => self
                .dataset
                .entity(id.id)
                .map(|e| vec![e.id])
                .unwrap_or_default(),
            NodeKind::Memory | NodeKind::Commitment => {
                if self.dataset.memory(id.id).is_some() {
                    self.dataset.memory_entities(id.id)
                } else {
                    Vec::new()
                }
            }
            NodeKind::Pattern => self.pattern_refs(id.id).to_vec(),
        }
    }
}
