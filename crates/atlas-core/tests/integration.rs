//! Integration tests exercising the full graph pipeline through the public
//! API: records → dataset → context → overview / neighborhood / trace →
//! layout, plus search and insights on the same snapshot.

use atlas_core::{
    DatasetRecords, EdgeKind, EntityKind, EntityRecord, GraphContext, GraphDataset, GraphId,
    InferenceOptions, LayoutOptions, LoadOptions, MemoryEntityLink, MemoryKind, MemoryRecord,
    NodeKind, OverviewOptions, PatternRecord, Projection, RelationshipRecord, TraceRequest, Vec3,
    build_insights, build_layout, build_neighborhood, build_overview, build_trace, search,
};

const NOW: i64 = 1_771_632_000; // 2026-02-21T00:00:00Z

fn entity(id: i64, kind: EntityKind, name: &str, importance: f64) -> EntityRecord {
    EntityRecord::new(id, kind, name, importance)
}

fn memory(id: i64, kind: MemoryKind, content: &str, importance: f64) -> MemoryRecord {
    let mut m = MemoryRecord::new(id, kind, content, importance);
    m.created_at = Some("2026-02-18 09:30:00".into());
    m
}

/// A small but realistic store: an owner, colleagues, a project, one
/// isolated contact only known through shared memories, and a pattern.
fn records() -> DatasetRecords {
    let mut records = DatasetRecords::default();
    records.entities = vec![
        entity(1, EntityKind::Person, "Sam (owner)", 0.95),
        entity(2, EntityKind::Person, "Priya", 0.7),
        entity(3, EntityKind::Project, "Atlas", 0.8),
        entity(4, EntityKind::Organization, "Northwind", 0.6),
        entity(5, EntityKind::Person, "Jonas", 0.4),
    ];
    records.relationships = vec![
        RelationshipRecord::new(10, 1, 2, "works_with", 0.9),
        RelationshipRecord::new(11, 2, 3, "leads", 0.8),
        RelationshipRecord::new(12, 1, 3, "owns", 0.4),
        RelationshipRecord::new(13, 3, 4, "client_of", 0.6),
    ];
    let mut stale = RelationshipRecord::new(14, 1, 4, "knows", 0.9);
    stale.invalid_at = Some("2025-12-01".into());
    records.relationships.push(stale);

    let mut overdue = memory(100, MemoryKind::Commitment, "Send Priya the Atlas budget", 0.8);
    overdue.deadline = Some("2026-02-10".into());
    records.memories = vec![
        overdue,
        memory(101, MemoryKind::Fact, "Jonas introduced Sam to Northwind", 0.6),
        memory(102, MemoryKind::Observation, "Jonas and Sam met at the Atlas demo", 0.5),
        memory(103, MemoryKind::Learning, "Atlas ships every second Friday", 0.7),
        memory(104, MemoryKind::Commitment, "done: review Northwind contract", 0.9),
    ];
    records.links = vec![
        MemoryEntityLink::new(100, 2, "about"),
        MemoryEntityLink::new(100, 3, "mentions"),
        MemoryEntityLink::new(101, 5, "about"),
        MemoryEntityLink::new(101, 1, "mentions"),
        MemoryEntityLink::new(101, 4, "mentions"),
        MemoryEntityLink::new(102, 5, "about"),
        MemoryEntityLink::new(102, 1, "mentions"),
        MemoryEntityLink::new(103, 3, "about"),
        MemoryEntityLink::new(104, 4, "about"),
    ];
    let mut pattern = PatternRecord::new(1, "relationship_11 weekly sync", 0.75);
    pattern.evidence = Some(r#"{"observations":[{"entityId":"4"}]}"#.into());
    records.patterns = vec![pattern];
    records
}

fn dataset() -> GraphDataset {
    GraphDataset::build(records(), LoadOptions::default(), NOW)
}

#[test]
fn overview_pipeline() {
    let ds = dataset();
    let ctx = GraphContext::new(&ds, None, &InferenceOptions::default());
    let graph = build_overview(&ctx, OverviewOptions::default());

    assert_eq!(graph.meta.counts.entities, 5);
    // only the overdue commitment is urgent; the completed one is not
    assert_eq!(graph.meta.counts.commitments, 1);
    assert_eq!(graph.meta.counts.relationships, 4);
    // Jonas is isolated but shares two memories with Sam (the hub) and one
    // with Northwind, so the hub is still the only qualifying partner
    let inferred: Vec<_> = graph
        .edges
        .iter()
        .filter(|e| e.kind == EdgeKind::Inferred)
        .collect();
    assert_eq!(inferred.len(), 1);
    assert_eq!(inferred[0].source, "entity-5");
    assert_eq!(inferred[0].target, "entity-1");

    // pattern recovers Priya + Atlas (relationship 11) and Northwind (JSON)
    let pattern_targets: Vec<&str> = graph
        .edges
        .iter()
        .filter(|e| e.kind == EdgeKind::PatternEntity)
        .map(|e| e.target.as_str())
        .collect();
    assert_eq!(pattern_targets, vec!["entity-2", "entity-3", "entity-4"]);

    let json = serde_json::to_value(&graph).unwrap();
    assert_eq!(json["meta"]["mode"], "overview");
    assert_eq!(json["meta"]["includeHistorical"], false);
    assert!(json["nodes"][0]["signalScore"].is_number());
    assert!(json["nodes"][0]["layout"]["seedX"].is_number());
}

#[test]
fn historical_load_keeps_invalidated_relationship() {
    let ds = GraphDataset::build(
        records(),
        LoadOptions {
            include_historical: true,
        },
        NOW,
    );
    let ctx = GraphContext::new(&ds, None, &InferenceOptions::default());
    let graph = build_overview(&ctx, OverviewOptions::default());
    assert_eq!(graph.meta.counts.relationships, 5);
    let stale = graph
        .edges
        .iter()
        .find(|e| e.id == "relationship-14")
        .unwrap();
    assert_eq!(stale.status, "invalidated");
}

#[test]
fn neighborhood_and_trace_agree() {
    let ds = dataset();
    let ctx = GraphContext::new(&ds, None, &InferenceOptions::default());

    let hood = build_neighborhood(&ctx, "commitment-100".parse().unwrap(), 1);
    assert!(hood.meta.found);
    let ids: Vec<&str> = hood.nodes.iter().map(|n| n.id.as_str()).collect();
    assert!(ids.contains(&"commitment-100"));
    assert!(ids.contains(&"entity-2"));
    assert!(ids.contains(&"entity-3"));

    // Sam -> Atlas: direct 0.4 costs 0.89; via Priya costs 0.44 + 0.53 = 0.97
    let trace = build_trace(&ctx, TraceRequest::new(GraphId::entity(1), GraphId::entity(3)));
    assert!(trace.meta.found);
    assert_eq!(trace.path, vec!["entity-1", "entity-3"]);

    // Jonas is only reachable through the inferred edge
    let trace = build_trace(&ctx, TraceRequest::new(GraphId::entity(4), GraphId::entity(5)));
    assert!(trace.meta.found);
    assert!(trace.meta.used_inferred);
    assert_eq!(trace.path.last().map(String::as_str), Some("entity-5"));
    let last_hop = trace.evidence.last().unwrap();
    assert_eq!(last_hop.memory_ids, vec!["memory-101", "memory-102"]);
}

#[test]
fn projection_overrides_fallback_positions() {
    let ds = dataset();
    let mut projection = Projection::default();
    projection.insert("entity-3", Vec3::new(5.0, -5.0, 12.5));
    let ctx = GraphContext::new(&ds, Some(&projection), &InferenceOptions::default());
    let graph = build_overview(&ctx, OverviewOptions::default());
    let atlas = graph.nodes.iter().find(|n| n.id == "entity-3").unwrap();
    assert_eq!((atlas.x, atlas.y, atlas.z), (5.0, -5.0, 12.5));
}

#[test]
fn layout_from_overview() {
    let ds = dataset();
    let ctx = GraphContext::new(&ds, None, &InferenceOptions::default());
    let graph = build_overview(&ctx, OverviewOptions {
        include_memories: true,
    });
    let edge_count = graph.edges.len();
    let layout = build_layout(graph.nodes, graph.edges, &LayoutOptions::default());
    assert!(layout.meta.converged);
    assert_eq!(layout.geometry.len(), edge_count);
    assert!(layout.nodes.iter().all(|n| n.x.is_finite() && n.y.is_finite() && n.z.is_finite()));
}

#[test]
fn search_and_insights() {
    let ds = dataset();
    let hits = search(&ds, "atlas", 10);
    assert_eq!(hits[0].id, "entity-3");
    assert!(hits.iter().any(|h| h.kind == NodeKind::Commitment));

    let insights = build_insights(&ds);
    assert_eq!(insights.counts.entities, 5);
    assert_eq!(insights.urgent_commitments.len(), 1);
    assert_eq!(insights.urgent_commitments[0].status, "overdue");
    assert_eq!(insights.top_entities[0].id, "entity-1");
}

#[test]
fn repeated_builds_are_byte_identical() {
    let a = {
        let ds = dataset();
        let ctx = GraphContext::new(&ds, None, &InferenceOptions::default());
        serde_json::to_string(&build_overview(&ctx, OverviewOptions {
            include_memories: true,
        }))
        .unwrap()
    };
    let b = {
        let ds = dataset();
        let ctx = GraphContext::new(&ds, None, &InferenceOptions::default());
        serde_json::to_string(&build_overview(&ctx, OverviewOptions {
            include_memories: true,
        }))
        .unwrap()
    };
    assert_eq!(a, b);
}
