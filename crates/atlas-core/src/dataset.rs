//! In-memory indices over one read-only snapshot of the memory store.

use std::collections::{BTreeSet, HashMap};

use crate::record::{
    DatasetRecords, EntityRecord, MemoryEntityLink, MemoryRecord, PatternRecord,
    RelationshipRecord,
};
use crate::time::parse_timestamp;

/// Aggregates for a single entity, computed from explicit relationships and links.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EntityStats {
    pub relationship_count: usize,
    pub relationship_strength: f64,
    pub memory_count: usize,
    pub last_memory_at: Option<String>,
}

/// One explicit relationship seen from one endpoint.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Adjacent {
    pub neighbor: i64,
    pub relationship_id: i64,
    pub strength: f64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LoadOptions {
    /// Keep invalidated relationships and memories.
    pub include_historical: bool,
}

/// Indexed snapshot. Record vectors keep the store's explicit ordering; maps
/// are lookup-only and never iterated for output.
#[derive(Clone, Debug)]
pub struct GraphDataset {
    pub entities: Vec<EntityRecord>,
    pub memories: Vec<MemoryRecord>,
    pub relationships: Vec<RelationshipRecord>,
    pub patterns: Vec<PatternRecord>,
    pub links: Vec<MemoryEntityLink>,
    pub options: LoadOptions,
    /// Snapshot time, Unix seconds. Every score in a response uses it.
    pub now: i64,
    entity_index: HashMap<i64, usize>,
    memory_index: HashMap<i64, usize>,
    relationship_index: HashMap<i64, usize>,
    pattern_index: HashMap<i64, usize>,
    entity_stats: HashMap<i64, EntityStats>,
    memory_links: HashMap<i64, Vec<usize>>,
    entity_memories: HashMap<i64, BTreeSet<i64>>,
    adjacency: HashMap<i64, Vec<Adjacent>>,
}

impl GraphDataset {
    /// Index a set of records. Links and relationships whose endpoints are not
    /// loaded entities are dropped, as are invalidated rows unless the options
    /// ask for history.
    pub fn build(records: DatasetRecords, options: LoadOptions, now: i64) -> Self {
        let DatasetRecords {
            entities,
            memories,
            relationships,
            patterns,
            links,
        } = records;

        let entity_index: HashMap<i64, usize> =
            entities.iter().enumerate().map(|(i, e)| (e.id, i)).collect();

        let memories: Vec<MemoryRecord> = memories
            .into_iter()
            .filter(|m| options.include_historical || !m.is_invalidated())
            .collect();
        let memory_index: HashMap<i64, usize> =
            memories.iter().enumerate().map(|(i, m)| (m.id, i)).collect();

        let relationships: Vec<RelationshipRecord> = relationships
            .into_iter()
            .filter(|r| options.include_historical || !r.is_invalidated())
            .filter(|r| {
                r.source_id != r.target_id
                    && entity_index.contains_key(&r.source_id)
                    && entity_index.contains_key(&r.target_id)
            })
            .collect();
        let relationship_index: HashMap<i64, usize> = relationships
            .iter()
            .enumerate()
            .map(|(i, r)| (r.id, i))
            .collect();

        let pattern_index: HashMap<i64, usize> =
            patterns.iter().enumerate().map(|(i, p)| (p.id, i)).collect();

        let mut seen_links = std::collections::HashSet::new();
        let links: Vec<MemoryEntityLink> = links
            .into_iter()
            .filter(|l| memory_index.contains_key(&l.memory_id) && entity_index.contains_key(&l.entity_id))
            .filter(|l| seen_links.insert((l.memory_id, l.entity_id)))
            .collect();

        let mut entity_stats: HashMap<i64, EntityStats> = entities
            .iter()
            .map(|e| (e.id, EntityStats::default()))
            .collect();
        let mut adjacency: HashMap<i64, Vec<Adjacent>> = HashMap::new();

        for rel in &relationships {
            for (from, to) in [(rel.source_id, rel.target_id), (rel.target_id, rel.source_id)] {
                if let Some(stats) = entity_stats.get_mut(&from) {
                    stats.relationship_count += 1;
                    stats.relationship_strength += rel.strength;
                }
                adjacency.entry(from).or_default().push(Adjacent {
                    neighbor: to,
                    relationship_id: rel.id,
                    strength: rel.strength,
                });
            }
        }

        let mut memory_links: HashMap<i64, Vec<usize>> = HashMap::new();
        let mut entity_memories: HashMap<i64, BTreeSet<i64>> = HashMap::new();
        let mut last_memory_secs: HashMap<i64, i64> = HashMap::new();

        for (i, link) in links.iter().enumerate() {
            memory_links.entry(link.memory_id).or_default().push(i);
            entity_memories
                .entry(link.entity_id)
                .or_default()
                .insert(link.memory_id);

            let memory = &memories[memory_index[&link.memory_id]];
            let Some(stats) = entity_stats.get_mut(&link.entity_id) else {
                continue;
            };
            stats.memory_count += 1;
            if let Some(created) = memory.created_at.as_deref()
                && let Some(secs) = parse_timestamp(created)
            {
                let newest = last_memory_secs.entry(link.entity_id).or_insert(i64::MIN);
                if secs > *newest {
                    *newest = secs;
                    stats.last_memory_at = Some(created.to_string());
                }
            }
        }

        Self {
            entities,
            memories,
            relationships,
            patterns,
            links,
            options,
            now,
            entity_index,
            memory_index,
            relationship_index,
            pattern_index,
            entity_stats,
            memory_links,
            entity_memories,
            adjacency,
        }
    }

    pub fn entity(&self, id: i64) -> Option<&EntityRecord> {
        self.entity_index.get(&id).map(|&i| &self.entities[i])
    }

    /// Position of the entity in the dataset ordering.
    pub fn entity_position(&self, id: i64) -> Option<usize> {
        self.entity_index.get(&id).copied()
    }

    pub fn memory(&self, id: i64) -> Option<&MemoryRecord> {
        self.memory_index.get(&id).map(|&i| &self.memories[i])
    }

    pub fn relationship(&self, id: i64) -> Option<&RelationshipRecord> {
        self.relationship_index
            .get(&id)
            .map(|&i| &self.relationships[i])
    }

    pub fn pattern(&self, id: i64) -> Option<&PatternRecord> {
        self.pattern_index.get(&id).map(|&i| &self.patterns[i])
    }

    pub fn stats(&self, entity_id: i64) -> EntityStats {
        self.entity_stats
            .get(&entity_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn relationship_count(&self, entity_id: i64) -> usize {
        self.entity_stats
            .get(&entity_id)
            .map_or(0, |s| s.relationship_count)
    }

    /// Explicit relationships touching `entity_id`, in relationship order.
    pub fn neighbors(&self, entity_id: i64) -> &[Adjacent] {
        self.adjacency
            .get(&entity_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Join rows for a memory, in link order.
    pub fn memory_links(&self, memory_id: i64) -> impl Iterator<Item = &MemoryEntityLink> {
        self.memory_links
            .get(&memory_id)
            .into_iter()
            .flatten()
            .map(|&i| &self.links[i])
    }

    /// Entity ids linked to a memory, in link order.
    pub fn memory_entities(&self, memory_id: i64) -> Vec<i64> {
        self.memory_links(memory_id).map(|l| l.entity_id).collect()
    }

    /// Memory ids linked to an entity, ascending.
    pub fn entity_memories(&self, entity_id: i64) -> Option<&BTreeSet<i64>> {
        self.entity_memories.get(&entity_id)
    }

    /// Memories linked to both entities, ascending by id.
    pub fn shared_memories(&self, a: i64, b: i64) -> Vec<i64> {
        match (self.entity_memories.get(&a), self.entity_memories.get(&b)) {
            (Some(x), Some(y)) => x.intersection(y).copied().collect(),
            _ => Vec::new(),
        }
    }

    /// The linked entity maximizing `importance + relation bias`; the first
    /// link wins ties.
    pub fn primary_entity(&self, memory_id: i64) -> Option<i64> {
        let mut best: Option<(i64, f64)> = None;
        for link in self.memory_links(memory_id) {
            let Some(entity) = self.entity(link.entity_id) else {
                continue;
            };
            let score = entity.importance + link.relation_bias();
            if best.is_none_or(|(_, s)| score > s) {
                best = Some((link.entity_id, score));
            }
        }
        best.map(|(id, _)| id)
    }

    /// Entity with the most explicit relationships; `None` when nothing is connected.
    /// Earlier entities in dataset order win ties.
    pub fn hub_entity(&self) -> Option<i64> {
        let mut best: Option<(i64, usize)> = None;
        for entity in &self.entities {
            let count = self.relationship_count(entity.id);
            if count > 0 && best.is_none_or(|(_, c)| count > c) {
                best = Some((entity.id, count));
            }
        }
        best.map(|(id, _)| id)
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use crate::record::{EntityKind, MemoryKind};

    pub const NOW: i64 = 1_771_632_000; // 2026-02-21T00:00:00Z

    /// Small builder for hand-written datasets.
    #[derive(Default)]
    pub struct Fixture {
        pub records: DatasetRecords,
    }

    impl Fixture {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn entity(mut self, id: i64, kind: EntityKind, name: &str, importance: f64) -> Self {
            self.records
                .entities
                .push(EntityRecord::new(id, kind, name, importance));
            self
        }

        pub fn person(self, id: i64, name: &str) -> Self {
            self.entity(id, EntityKind::Person, name, 0.5)
        }

        pub fn rel(mut self, id: i64, source: i64, target: i64, strength: f64) -> Self {
            self.records
                .relationships
                .push(RelationshipRecord::new(id, source, target, "knows", strength));
            self
        }

        pub fn memory(mut self, id: i64, kind: MemoryKind, content: &str, importance: f64, entities: &[i64]) -> Self {
            self.records
                .memories
                .push(MemoryRecord::new(id, kind, content, importance));
            for e in entities {
                self.records
                    .links
                    .push(MemoryEntityLink::new(id, *e, "about"));
            }
            self
        }

        pub fn fact(self, id: i64, entities: &[i64]) -> Self {
            self.memory(id, MemoryKind::Fact, &format!("fact {id}"), 0.5, entities)
        }

        pub fn pattern(mut self, pattern: PatternRecord) -> Self {
            self.records.patterns.push(pattern);
            self
        }

        pub fn build(self) -> GraphDataset {
            GraphDataset::build(self.records, LoadOptions::default(), NOW)
        }

        pub fn build_historical(self) -> GraphDataset {
            GraphDataset::build(
                self.records,
                LoadOptions {
                    include_historical: true,
                },
                NOW,
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use crate::record::{EntityKind, MemoryKind};

    #[test]
    fn test_stats_and_adjacency() {
        let ds = Fixture::new()
            .person(1, "Ada")
            .person(2, "Bob")
            .person(3, "Cy")
            .rel(10, 1, 2, 0.8)
            .rel(11, 1, 3, 0.4)
            .fact(100, &[1, 2])
            .build();

        let ada = ds.stats(1);
        assert_eq!(ada.relationship_count, 2);
        assert!((ada.relationship_strength - 1.2).abs() < 1e-12);
        assert_eq!(ada.memory_count, 1);
        assert_eq!(ds.neighbors(1).len(), 2);
        assert_eq!(ds.neighbors(2)[0].neighbor, 1);
        assert_eq!(ds.shared_memories(1, 2), vec![100]);
        assert!(ds.shared_memories(1, 3).is_empty());
    }

    #[test]
    fn test_dangling_rows_dropped() {
        let ds = Fixture::new()
            .person(1, "Ada")
            .rel(10, 1, 99, 0.8)
            .rel(11, 1, 1, 0.8)
            .fact(100, &[1, 99])
            .build();
        assert!(ds.relationships.is_empty());
        assert_eq!(ds.links.len(), 1);
        assert_eq!(ds.memory_entities(100), vec![1]);
    }

    #[test]
    fn test_invalidated_rows_filtered_unless_historical() {
        let mut fx = Fixture::new().person(1, "Ada").person(2, "Bob").rel(10, 1, 2, 0.5);
        fx.records.relationships[0].invalid_at = Some("2026-01-01".into());
        fx = fx.fact(100, &[1]);
        fx.records.memories[0].invalidated_at = Some("2026-01-02".into());

        let current = Fixture {
            records: fx.records.clone(),
        }
        .build();
        assert!(current.relationships.is_empty());
        assert!(current.memories.is_empty());
        assert!(current.links.is_empty());

        let historical = fx.build_historical();
        assert_eq!(historical.relationships.len(), 1);
        assert_eq!(historical.memories.len(), 1);
    }

    #[test]
    fn test_primary_entity_prefers_importance_plus_bias() {
        let mut fx = Fixture::new()
            .entity(1, EntityKind::Project, "Atlas", 0.5)
            .entity(2, EntityKind::Person, "Ada", 0.7)
            .memory(100, MemoryKind::Fact, "x", 0.5, &[]);
        fx.records
            .links
            .push(crate::record::MemoryEntityLink::new(100, 1, "about"));
        fx.records
            .links
            .push(crate::record::MemoryEntityLink::new(100, 2, "mentions"));
        let ds = fx.build();
        // 0.5 + 0.3 beats 0.7 + 0.0
        assert_eq!(ds.primary_entity(100), Some(1));
    }

    #[test]
    fn test_last_memory_timestamp() {
        let mut fx = Fixture::new().person(1, "Ada").fact(100, &[1]).fact(101, &[1]);
        fx.records.memories[0].created_at = Some("2026-01-01 10:00:00".into());
        fx.records.memories[1].created_at = Some("2026-02-01 10:00:00".into());
        let ds = fx.build();
        assert_eq!(
            ds.stats(1).last_memory_at.as_deref(),
            Some("2026-02-01 10:00:00")
        );
    }

    #[test]
    fn test_hub_entity() {
        let ds = Fixture::new()
            .person(1, "Ada")
            .person(2, "Bob")
            .person(3, "Cy")
            .rel(10, 2, 1, 0.5)
            .rel(11, 2, 3, 0.5)
            .build();
        assert_eq!(ds.hub_entity(), Some(2));

        let empty = Fixture::new().person(1, "Ada").build();
        assert_eq!(empty.hub_entity(), None);
    }
}
