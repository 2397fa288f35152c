//! Pure mapping from store records to the graph node/edge contract, plus the
//! scoring functions every view shares.
//!
//! All functions here take `now` explicitly so identical inputs always yield
//! identical output.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::constants::SECONDS_PER_DAY;
use crate::dataset::EntityStats;
use crate::graph::{EdgeKind, GraphEdge, GraphId, GraphNode, NodeKind, NodeLayout};
use crate::inference::InferredRelationship;
use crate::record::{
    EntityKind, EntityRecord, MemoryEntityLink, MemoryKind, MemoryRecord, PatternRecord,
    RelationshipRecord,
};
use crate::time::{days_since, parse_timestamp};
use crate::vector::Vec3;

/// Prefixes the daemon writes when a commitment has been fulfilled.
const COMPLETION_PREFIXES: [&str; 3] = ["done:", "sent:", "completed:"];

const LABEL_MAX_CHARS: usize = 80;

pub fn clamp01(v: f64) -> f64 {
    if v.is_nan() { 0.0 } else { v.clamp(0.0, 1.0) }
}

pub fn round4(v: f64) -> f64 {
    (v * 10_000.0).round() / 10_000.0
}

/// Recency tier of a timestamp relative to `now`.
pub fn freshness_score(ts: Option<&str>, now: i64) -> f64 {
    let Some(secs) = ts.and_then(parse_timestamp) else {
        return 0.25;
    };
    let days = days_since(secs, now);
    if days <= 1.0 {
        1.0
    } else if days <= 7.0 {
        0.88
    } else if days <= 14.0 {
        0.74
    } else if days <= 30.0 {
        0.58
    } else if days <= 90.0 {
        0.34
    } else {
        0.14
    }
}

/// How pressing a memory is. Overdue always wins; deadlines are tiered by days remaining.
pub fn urgency_score(
    deadline: Option<&str>,
    importance: f64,
    overdue: bool,
    kind: MemoryKind,
    now: i64,
) -> f64 {
    if overdue {
        return 1.0;
    }
    let Some(deadline) = deadline.and_then(parse_timestamp) else {
        return if kind == MemoryKind::Commitment {
            importance * 0.65
        } else {
            0.0
        };
    };
    let days_until = (deadline - now) as f64 / SECONDS_PER_DAY;
    if days_until <= 0.0 {
        1.0
    } else if days_until <= 1.0 {
        0.95
    } else if days_until <= 3.0 {
        0.82
    } else if days_until <= 7.0 {
        0.67
    } else if days_until <= 14.0 {
        0.48
    } else {
        importance * 0.4
    }
}

pub fn entity_signal_score(importance: f64, memory_count: usize, relationship_count: usize) -> f64 {
    clamp01(
        importance * 0.6
            + (memory_count as f64 / 30.0).min(0.18)
            + (relationship_count as f64 / 20.0).min(0.22),
    )
}

pub fn memory_signal_score(importance: f64, confidence: f64, freshness: f64) -> f64 {
    clamp01(importance * 0.55 + confidence * 0.25 + freshness * 0.2)
}

pub fn pattern_signal_score(confidence: f64, occurrences: i64) -> f64 {
    clamp01(confidence * 0.7 + (occurrences.max(0) as f64 / 20.0).min(0.3))
}

/// Parse stored JSON text. Malformed or blank input is `None`, never an error.
pub fn parse_json_metadata(raw: Option<&str>) -> Option<Value> {
    let raw = raw?.trim();
    if raw.is_empty() {
        return None;
    }
    serde_json::from_str(raw).ok()
}

/// Lifecycle of a memory. Non-commitments are only ever active or inactive.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MemoryStatus {
    Active,
    Completed,
    Overdue,
    Inactive,
}

impl MemoryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Overdue => "overdue",
            Self::Inactive => "inactive",
        }
    }
}

pub fn is_completed(content: &str) -> bool {
    let lower = content.trim_start().to_ascii_lowercase();
    COMPLETION_PREFIXES.iter().any(|p| lower.starts_with(p))
}

pub fn memory_status(memory: &MemoryRecord, now: i64) -> MemoryStatus {
    if memory.is_invalidated() {
        return MemoryStatus::Inactive;
    }
    if !memory.is_commitment() {
        return MemoryStatus::Active;
    }
    if is_completed(&memory.content) {
        return MemoryStatus::Completed;
    }
    match memory.deadline.as_deref().and_then(parse_timestamp) {
        Some(deadline) if deadline < now => MemoryStatus::Overdue,
        _ => MemoryStatus::Active,
    }
}

pub fn is_overdue(memory: &MemoryRecord, now: i64) -> bool {
    memory_status(memory, now) == MemoryStatus::Overdue
}

pub fn memory_graph_id(memory: &MemoryRecord) -> GraphId {
    let kind = if memory.is_commitment() {
        NodeKind::Commitment
    } else {
        NodeKind::Memory
    };
    GraphId::new(kind, memory.id)
}

fn entity_color(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::Person => "#f4a261",
        EntityKind::Organization => "#2a9d8f",
        EntityKind::Project => "#e76f51",
        EntityKind::Concept => "#8ab17d",
        EntityKind::Location => "#457b9d",
    }
}

fn memory_color(kind: MemoryKind, status: MemoryStatus) -> &'static str {
    match (kind, status) {
        (MemoryKind::Commitment, MemoryStatus::Overdue) => "#d62828",
        (MemoryKind::Commitment, MemoryStatus::Completed) => "#6a994e",
        (_, MemoryStatus::Inactive) => "#6c757d",
        (MemoryKind::Commitment, _) => "#ffb703",
        (MemoryKind::Fact, _) => "#adb5bd",
        (MemoryKind::Learning, _) => "#90be6d",
        (MemoryKind::Observation, _) => "#a8dadc",
        (MemoryKind::Preference, _) => "#cdb4db",
        (MemoryKind::Pattern, _) => "#b5838d",
    }
}

const PATTERN_COLOR: &str = "#9d4edd";

fn entity_band(importance: f64) -> &'static str {
    if importance >= 0.75 {
        "core"
    } else if importance >= 0.4 {
        "inner"
    } else {
        "outer"
    }
}

pub fn truncate_label(text: &str) -> String {
    let text = text.trim();
    if text.chars().count() <= LABEL_MAX_CHARS {
        return text.to_string();
    }
    let cut: String = text.chars().take(LABEL_MAX_CHARS - 1).collect();
    format!("{}…", cut.trim_end())
}

fn insert_ts(map: &mut BTreeMap<String, String>, key: &str, value: Option<&str>) {
    if let Some(v) = value.map(str::trim).filter(|v| !v.is_empty()) {
        map.insert(key.to_string(), v.to_string());
    }
}

fn layout_for(position: Vec3, band: &str) -> NodeLayout {
    let p = position.rounded(3);
    NodeLayout {
        seed_x: p.x,
        seed_y: p.y,
        seed_z: p.z,
        band: band.to_string(),
    }
}

fn entity_refs(ids: &[i64]) -> Vec<String> {
    ids.iter().map(|id| GraphId::entity(*id).to_string()).collect()
}

pub struct EntityExtras<'a> {
    pub stats: &'a EntityStats,
    pub position: Vec3,
}

pub fn normalize_entity(entity: &EntityRecord, extras: &EntityExtras<'_>, now: i64) -> GraphNode {
    let stats = extras.stats;
    let importance = clamp01(entity.importance);
    let signal = entity_signal_score(importance, stats.memory_count, stats.relationship_count);
    let freshness_ts = stats
        .last_memory_at
        .as_deref()
        .or(entity.updated_at.as_deref())
        .or(entity.created_at.as_deref());
    let band = entity_band(importance);

    let mut timestamps = BTreeMap::new();
    insert_ts(&mut timestamps, "createdAt", entity.created_at.as_deref());
    insert_ts(&mut timestamps, "updatedAt", entity.updated_at.as_deref());
    insert_ts(&mut timestamps, "lastMemoryAt", stats.last_memory_at.as_deref());
    insert_ts(&mut timestamps, "lastContactAt", entity.last_contact_at.as_deref());

    let p = extras.position.rounded(3);
    GraphNode {
        id: GraphId::entity(entity.id).to_string(),
        kind: NodeKind::Entity,
        subtype: entity.kind.as_str().to_string(),
        label: entity.name.clone(),
        description: entity.description.clone(),
        importance: round4(importance),
        signal_score: round4(signal),
        freshness_score: freshness_score(freshness_ts, now),
        urgency_score: 0.0,
        cluster_key: format!("entity:{}", entity.kind.as_str()),
        status: "active".to_string(),
        entity_refs: Vec::new(),
        timestamps,
        layout: layout_for(p, band),
        color: entity_color(entity.kind).to_string(),
        size: round4(4.0 + importance * 6.0 + signal * 2.0),
        x: p.x,
        y: p.y,
        z: p.z,
        z_index: 3,
    }
}

pub struct MemoryExtras {
    pub entity_refs: Vec<i64>,
    pub primary_entity: Option<i64>,
    pub position: Vec3,
}

pub fn normalize_memory(memory: &MemoryRecord, extras: &MemoryExtras, now: i64) -> GraphNode {
    let status = memory_status(memory, now);
    let importance = clamp01(memory.importance);
    let freshness = freshness_score(memory.created_at.as_deref(), now);
    let urgency = urgency_score(
        memory.deadline.as_deref(),
        importance,
        status == MemoryStatus::Overdue,
        memory.kind,
        now,
    );
    let id = memory_graph_id(memory);
    let cluster_key = match extras.primary_entity {
        Some(entity_id) => GraphId::entity(entity_id).to_string(),
        None => format!("memory:{}", memory.kind.as_str()),
    };
    let size = if memory.is_commitment() {
        2.0 + urgency * 3.0
    } else {
        1.5 + importance * 2.5
    };

    let mut timestamps = BTreeMap::new();
    insert_ts(&mut timestamps, "createdAt", memory.created_at.as_deref());
    insert_ts(&mut timestamps, "updatedAt", memory.updated_at.as_deref());
    insert_ts(&mut timestamps, "deadline", memory.deadline.as_deref());
    insert_ts(&mut timestamps, "invalidatedAt", memory.invalidated_at.as_deref());

    let p = extras.position.rounded(3);
    GraphNode {
        id: id.to_string(),
        kind: id.kind,
        subtype: memory.kind.as_str().to_string(),
        label: truncate_label(&memory.content),
        description: Some(memory.content.clone()),
        importance: round4(importance),
        signal_score: round4(memory_signal_score(importance, clamp01(memory.confidence), freshness)),
        freshness_score: freshness,
        urgency_score: round4(urgency),
        cluster_key,
        status: status.as_str().to_string(),
        entity_refs: entity_refs(&extras.entity_refs),
        timestamps,
        layout: layout_for(p, "orbit"),
        color: memory_color(memory.kind, status).to_string(),
        size: round4(size),
        x: p.x,
        y: p.y,
        z: p.z,
        z_index: if memory.is_commitment() { 2 } else { 1 },
    }
}

pub struct PatternExtras {
    pub entity_refs: Vec<i64>,
    pub position: Vec3,
}

pub fn normalize_pattern(pattern: &PatternRecord, extras: &PatternExtras, now: i64) -> GraphNode {
    let confidence = clamp01(pattern.confidence);
    let freshness = freshness_score(
        pattern.updated_at.as_deref().or(pattern.created_at.as_deref()),
        now,
    );

    let mut timestamps = BTreeMap::new();
    insert_ts(&mut timestamps, "createdAt", pattern.created_at.as_deref());
    insert_ts(&mut timestamps, "updatedAt", pattern.updated_at.as_deref());

    let p = extras.position.rounded(3);
    GraphNode {
        id: GraphId::pattern(pattern.id).to_string(),
        kind: NodeKind::Pattern,
        subtype: pattern.kind.clone(),
        label: pattern.name.clone(),
        description: pattern.description.clone(),
        importance: round4(confidence),
        signal_score: round4(pattern_signal_score(confidence, pattern.occurrences)),
        freshness_score: freshness,
        urgency_score: 0.0,
        cluster_key: format!("pattern:{}", pattern.kind),
        status: if pattern.is_active { "active" } else { "inactive" }.to_string(),
        entity_refs: entity_refs(&extras.entity_refs),
        timestamps,
        layout: layout_for(p, "halo"),
        color: PATTERN_COLOR.to_string(),
        size: round4(3.0 + confidence * 3.0),
        x: p.x,
        y: p.y,
        z: p.z,
        z_index: 2,
    }
}

pub fn relationship_edge(rel: &RelationshipRecord) -> GraphEdge {
    let mut timestamps = BTreeMap::new();
    insert_ts(&mut timestamps, "createdAt", rel.created_at.as_deref());
    insert_ts(&mut timestamps, "updatedAt", rel.updated_at.as_deref());
    insert_ts(&mut timestamps, "validAt", rel.valid_at.as_deref());
    insert_ts(&mut timestamps, "invalidAt", rel.invalid_at.as_deref());

    GraphEdge {
        id: format!("relationship-{}", rel.id),
        source: GraphId::entity(rel.source_id).to_string(),
        target: GraphId::entity(rel.target_id).to_string(),
        kind: EdgeKind::Relationship,
        channel: "explicit".to_string(),
        strength: round4(clamp01(rel.strength)),
        direction: rel.direction.clone(),
        evidence_count: 1,
        status: if rel.is_invalidated() { "invalidated" } else { "active" }.to_string(),
        label: rel.kind.replace('_', " "),
        timestamps,
    }
}

pub fn inferred_edge(inferred: &InferredRelationship) -> GraphEdge {
    let (lo, hi) = inferred.pair();
    GraphEdge {
        id: format!("inferred-{lo}-{hi}"),
        source: GraphId::entity(inferred.source_id).to_string(),
        target: GraphId::entity(inferred.target_id).to_string(),
        kind: EdgeKind::Inferred,
        channel: "co-occurrence".to_string(),
        strength: round4(inferred.strength),
        direction: "undirected".to_string(),
        evidence_count: inferred.shared_memory_ids.len(),
        status: "inferred".to_string(),
        label: "shared memories".to_string(),
        timestamps: BTreeMap::new(),
    }
}

pub fn memory_entity_edge(memory: &MemoryRecord, link: &MemoryEntityLink) -> GraphEdge {
    let mut timestamps = BTreeMap::new();
    insert_ts(&mut timestamps, "createdAt", memory.created_at.as_deref());
    GraphEdge {
        id: format!("memory-entity-{}-{}", memory.id, link.entity_id),
        source: memory_graph_id(memory).to_string(),
        target: GraphId::entity(link.entity_id).to_string(),
        kind: EdgeKind::MemoryEntity,
        channel: link.relation.clone(),
        strength: round4(clamp01(0.35 + link.relation_bias() + clamp01(memory.importance) * 0.35)),
        direction: "outgoing".to_string(),
        evidence_count: 1,
        status: memory_status_label(memory),
        label: link.relation.clone(),
        timestamps,
    }
}

fn memory_status_label(memory: &MemoryRecord) -> String {
    if memory.is_invalidated() { "inactive" } else { "active" }.to_string()
}

pub fn pattern_entity_edge(pattern: &PatternRecord, entity_id: i64) -> GraphEdge {
    GraphEdge {
        id: format!("pattern-entity-{}-{entity_id}", pattern.id),
        source: GraphId::pattern(pattern.id).to_string(),
        target: GraphId::entity(entity_id).to_string(),
        kind: EdgeKind::PatternEntity,
        channel: "evidence".to_string(),
        strength: round4(clamp01(pattern.confidence) * 0.8),
        direction: "outgoing".to_string(),
        evidence_count: pattern.occurrences.max(0) as usize,
        status: if pattern.is_active { "active" } else { "inactive" }.to_string(),
        label: "evidence".to_string(),
        timestamps: BTreeMap::new(),
    }
}

/// Shared-memory evidence attached to one hop of a trace.
pub fn trace_evidence_edge(memory: &MemoryRecord, entity_id: i64) -> GraphEdge {
    GraphEdge {
        id: format!("trace-evidence-{}-{entity_id}", memory.id),
        source: memory_graph_id(memory).to_string(),
        target: GraphId::entity(entity_id).to_string(),
        kind: EdgeKind::TraceEvidence,
        channel: "evidence".to_string(),
        strength: round4(clamp01(memory.importance)),
        direction: "outgoing".to_string(),
        evidence_count: 1,
        status: memory_status_label(memory),
        label: "shared memory".to_string(),
        timestamps: BTreeMap::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::unix_to_iso8601;

    const NOW: i64 = 1_771_632_000; // 2026-02-21T00:00:00Z

    fn days_ago(d: f64) -> String {
        unix_to_iso8601(NOW - (d * SECONDS_PER_DAY) as i64)
    }

    fn days_ahead(d: f64) -> String {
        unix_to_iso8601(NOW + (d * SECONDS_PER_DAY) as i64)
    }

    #[test]
    fn test_freshness_tiers() {
        assert_eq!(freshness_score(None, NOW), 0.25);
        assert_eq!(freshness_score(Some("not a date"), NOW), 0.25);
        assert_eq!(freshness_score(Some(&days_ago(0.5)), NOW), 1.0);
        assert_eq!(freshness_score(Some(&days_ago(1.0)), NOW), 1.0);
        assert_eq!(freshness_score(Some(&days_ago(5.0)), NOW), 0.88);
        assert_eq!(freshness_score(Some(&days_ago(10.0)), NOW), 0.74);
        assert_eq!(freshness_score(Some(&days_ago(20.0)), NOW), 0.58);
        assert_eq!(freshness_score(Some(&days_ago(60.0)), NOW), 0.34);
        assert_eq!(freshness_score(Some(&days_ago(400.0)), NOW), 0.14);
    }

    #[test]
    fn test_urgency_overdue_always_max() {
        for kind in [MemoryKind::Commitment, MemoryKind::Fact] {
            assert_eq!(urgency_score(None, 0.0, true, kind, NOW), 1.0);
            assert_eq!(
                urgency_score(Some(&days_ahead(100.0)), 0.1, true, kind, NOW),
                1.0
            );
        }
    }

    #[test]
    fn test_urgency_without_deadline() {
        assert_eq!(urgency_score(None, 0.9, false, MemoryKind::Fact, NOW), 0.0);
        let c = urgency_score(None, 0.8, false, MemoryKind::Commitment, NOW);
        assert!((c - 0.52).abs() < 1e-12);
    }

    #[test]
    fn test_urgency_deadline_tiers() {
        let u = |d: f64| urgency_score(Some(&days_ahead(d)), 0.5, false, MemoryKind::Commitment, NOW);
        assert_eq!(u(-2.0), 1.0);
        assert_eq!(u(0.5), 0.95);
        assert_eq!(u(2.0), 0.82);
        assert_eq!(u(6.0), 0.67);
        assert_eq!(u(13.0), 0.48);
        assert!((u(30.0) - 0.2).abs() < 1e-12);
    }

    #[test]
    fn test_entity_signal_caps() {
        assert!((entity_signal_score(0.5, 0, 0) - 0.3).abs() < 1e-12);
        // memory and relationship contributions saturate
        assert!((entity_signal_score(0.5, 300, 300) - 0.7).abs() < 1e-12);
        assert_eq!(entity_signal_score(1.0, 300, 300), 1.0);
    }

    #[test]
    fn test_malformed_metadata_is_none() {
        assert!(parse_json_metadata(None).is_none());
        assert!(parse_json_metadata(Some("")).is_none());
        assert!(parse_json_metadata(Some("{broken")).is_none());
        assert!(parse_json_metadata(Some("{\"a\":1}")).is_some());
    }

    #[test]
    fn test_commitment_lifecycle() {
        let mut m = MemoryRecord::new(1, MemoryKind::Commitment, "send the deck", 0.6);
        assert_eq!(memory_status(&m, NOW), MemoryStatus::Active);

        m.deadline = Some(days_ago(2.0));
        assert_eq!(memory_status(&m, NOW), MemoryStatus::Overdue);

        m.content = "Done: send the deck".into();
        assert_eq!(memory_status(&m, NOW), MemoryStatus::Completed);

        m.invalidated_at = Some(days_ago(1.0));
        assert_eq!(memory_status(&m, NOW), MemoryStatus::Inactive);
    }

    #[test]
    fn test_non_commitment_never_overdue() {
        let mut m = MemoryRecord::new(1, MemoryKind::Fact, "sky is blue", 0.6);
        m.deadline = Some(days_ago(2.0));
        assert_eq!(memory_status(&m, NOW), MemoryStatus::Active);
    }

    #[test]
    fn test_normalize_entity_is_pure() {
        let mut e = EntityRecord::new(7, EntityKind::Person, "Ada", 0.8);
        e.updated_at = Some(days_ago(3.0));
        let stats = EntityStats {
            relationship_count: 2,
            relationship_strength: 1.1,
            memory_count: 4,
            last_memory_at: Some(days_ago(0.5)),
        };
        let extras = EntityExtras {
            stats: &stats,
            position: Vec3::new(1.23456, 2.0, -3.0),
        };
        let a = serde_json::to_string(&normalize_entity(&e, &extras, NOW)).unwrap();
        let b = serde_json::to_string(&normalize_entity(&e, &extras, NOW)).unwrap();
        assert_eq!(a, b);

        let node = normalize_entity(&e, &extras, NOW);
        assert_eq!(node.id, "entity-7");
        assert_eq!(node.freshness_score, 1.0);
        assert_eq!(node.x, 1.235);
        assert_eq!(node.layout.band, "core");
        assert_eq!(node.timestamps.get("lastMemoryAt"), stats.last_memory_at.as_ref());
    }

    #[test]
    fn test_normalize_memory_commitment() {
        let mut m = MemoryRecord::new(3, MemoryKind::Commitment, "call Bob", 0.7);
        m.deadline = Some(days_ago(1.0));
        let extras = MemoryExtras {
            entity_refs: vec![2, 5],
            primary_entity: Some(5),
            position: Vec3::ZERO,
        };
        let node = normalize_memory(&m, &extras, NOW);
        assert_eq!(node.id, "commitment-3");
        assert_eq!(node.kind, NodeKind::Commitment);
        assert_eq!(node.status, "overdue");
        assert_eq!(node.urgency_score, 1.0);
        assert_eq!(node.cluster_key, "entity-5");
        assert_eq!(node.entity_refs, vec!["entity-2", "entity-5"]);
    }

    #[test]
    fn test_long_labels_truncate() {
        let text = "x".repeat(200);
        let m = MemoryRecord::new(1, MemoryKind::Fact, &text, 0.5);
        let extras = MemoryExtras {
            entity_refs: vec![],
            primary_entity: None,
            position: Vec3::ZERO,
        };
        let node = normalize_memory(&m, &extras, NOW);
        assert_eq!(node.label.chars().count(), LABEL_MAX_CHARS);
        assert_eq!(node.cluster_key, "memory:fact");
    }

    #[test]
    fn test_relationship_edge_status() {
        let mut r = RelationshipRecord::new(9, 1, 2, "works_with", 0.7);
        assert_eq!(relationship_edge(&r).status, "active");
        assert_eq!(relationship_edge(&r).label, "works with");
        r.invalid_at = Some(days_ago(1.0));
        assert_eq!(relationship_edge(&r).status, "invalidated");
    }
}
