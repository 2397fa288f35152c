//! Output contract: graph ids, nodes, edges, and the assembly buffer the
//! builders share.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Kind of node in the rendered graph. Part of the public id scheme.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Entity,
    Memory,
    Commitment,
    Pattern,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Entity => "entity",
            Self::Memory => "memory",
            Self::Commitment => "commitment",
            Self::Pattern => "pattern",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "entity" => Some(Self::Entity),
            "memory" => Some(Self::Memory),
            "commitment" => Some(Self::Commitment),
            "pattern" => Some(Self::Pattern),
            _ => None,
        }
    }

    /// Memories and commitments both live in the memories table.
    pub fn is_memory(&self) -> bool {
        matches!(self, Self::Memory | Self::Commitment)
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphIdError {
    Empty,
    MissingSeparator(String),
    UnknownKind(String),
    InvalidNumber(String),
}

impl fmt::Display for GraphIdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GraphIdError::Empty => write!(f, "graph id is empty"),
            GraphIdError::MissingSeparator(s) => {
                write!(f, "graph id '{s}' must look like '<kind>-<number>'")
            }
            GraphIdError::UnknownKind(k) => write!(f, "unknown graph id kind '{k}'"),
            GraphIdError::InvalidNumber(s) => write!(f, "graph id '{s}' has a non-numeric id"),
        }
    }
}

impl std::error::Error for GraphIdError {}

/// `"<kind>-<numericId>"`, e.g. `entity-12`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GraphId {
    pub kind: NodeKind,
    pub id: i64,
}

impl GraphId {
    pub fn new(kind: NodeKind, id: i64) -> Self {
        Self { kind, id }
    }

    pub fn entity(id: i64) -> Self {
        Self::new(NodeKind::Entity, id)
    }

    pub fn pattern(id: i64) -> Self {
        Self::new(NodeKind::Pattern, id)
    }
}

impl fmt::Display for GraphId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.kind, self.id)
    }
}

impl FromStr for GraphId {
    type Err = GraphIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(GraphIdError::Empty);
        }
        let (kind, num) = s
            .split_once('-')
            .ok_or_else(|| GraphIdError::MissingSeparator(s.to_string()))?;
        let kind = NodeKind::parse(kind).ok_or_else(|| GraphIdError::UnknownKind(kind.to_string()))?;
        // rowids may be negative, which renders as `entity--3`
        let digits = num.strip_prefix('-').unwrap_or(num);
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(GraphIdError::InvalidNumber(s.to_string()));
        }
        let id = num
            .parse::<i64>()
            .map_err(|_| GraphIdError::InvalidNumber(s.to_string()))?;
        Ok(Self { kind, id })
    }
}

impl Serialize for GraphId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for GraphId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Seed coordinates and render band for a node.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeLayout {
    pub seed_x: f64,
    pub seed_y: f64,
    pub seed_z: f64,
    pub band: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphNode {
    pub id: String,
    pub kind: NodeKind,
    pub subtype: String,
    pub label: String,
    pub description: Option<String>,
    pub importance: f64,
    pub signal_score: f64,
    pub freshness_score: f64,
    pub urgency_score: f64,
    pub cluster_key: String,
    pub status: String,
    pub entity_refs: Vec<String>,
    pub timestamps: BTreeMap<String, String>,
    pub layout: NodeLayout,
    pub color: String,
    pub size: f64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub z_index: i32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EdgeKind {
    Relationship,
    Inferred,
    MemoryEntity,
    PatternEntity,
    TraceEvidence,
}

impl EdgeKind {
    /// Entity-to-entity edges, as opposed to evidence attachments.
    pub fn is_structural(&self) -> bool {
        matches!(self, Self::Relationship | Self::Inferred)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphEdge {
    pub id: String,
    pub source: String,
    pub target: String,
    pub kind: EdgeKind,
    pub channel: String,
    pub strength: f64,
    pub direction: String,
    pub evidence_count: usize,
    pub status: String,
    pub label: String,
    pub timestamps: BTreeMap<String, String>,
}

/// Per-response node/edge counts.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphCounts {
    pub nodes: usize,
    pub edges: usize,
    pub entities: usize,
    pub memories: usize,
    pub commitments: usize,
    pub patterns: usize,
    pub relationships: usize,
    pub inferred: usize,
}

/// Insertion-ordered, id-deduplicated node and edge buffer.
#[derive(Debug, Default)]
pub struct GraphAssembly {
    nodes: Vec<GraphNode>,
    edges: Vec<GraphEdge>,
    node_ids: HashSet<String>,
    edge_ids: HashSet<String>,
}

impl GraphAssembly {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if a node with the same id was already present.
    pub fn push_node(&mut self, node: GraphNode) -> bool {
        if !self.node_ids.insert(node.id.clone()) {
            return false;
        }
        self.nodes.push(node);
        true
    }

    pub fn contains_node(&self, id: &str) -> bool {
        self.node_ids.contains(id)
    }

    /// Edges are only accepted once both endpoints are present.
    pub fn push_edge(&mut self, edge: GraphEdge) -> bool {
        if !self.node_ids.contains(&edge.source) || !self.node_ids.contains(&edge.target) {
            return false;
        }
        if !self.edge_ids.insert(edge.id.clone()) {
            return false;
        }
        self.edges.push(edge);
        true
    }

    pub fn counts(&self) -> GraphCounts {
        let mut counts = GraphCounts {
            nodes: self.nodes.len(),
            edges: self.edges.len(),
            ..GraphCounts::default()
        };
        for node in &self.nodes {
            match node.kind {
                NodeKind::Entity => counts.entities += 1,
                NodeKind::Memory => counts.memories += 1,
                NodeKind::Commitment => counts.commitments += 1,
                NodeKind::Pattern => counts.patterns += 1,
            }
        }
        for edge in &self.edges {
            match edge.kind {
                EdgeKind::Relationship => counts.relationships += 1,
                EdgeKind::Inferred => counts.inferred += 1,
                _ => {}
            }
        }
        counts
    }

    pub fn finish(self) -> (Vec<GraphNode>, Vec<GraphEdge>) {
        (self.nodes, self.edges)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_graph_id_roundtrip() {
        for raw in ["entity-1", "memory-42", "commitment-7", "pattern-900"] {
            let id: GraphId = raw.parse().unwrap();
            assert_eq!(id.to_string(), raw);
        }
    }

    #[test]
    fn test_negative_graph_id_roundtrip() {
        let id = GraphId::new(NodeKind::Memory, -1);
        assert_eq!(id.to_string(), "memory--1");
        assert_eq!("memory--1".parse::<GraphId>(), Ok(id));
        let json = serde_json::to_string(&GraphId::entity(-40)).unwrap();
        assert_eq!(serde_json::from_str::<GraphId>(&json).unwrap(), GraphId::entity(-40));
    }

    #[test]
    fn test_graph_id_rejects_bad_grammar() {
        assert_eq!("".parse::<GraphId>(), Err(GraphIdError::Empty));
        assert!(matches!(
            "entity42".parse::<GraphId>(),
            Err(GraphIdError::MissingSeparator(_))
        ));
        assert!(matches!(
            "robot-1".parse::<GraphId>(),
            Err(GraphIdError::UnknownKind(_))
        ));
        assert!(matches!(
            "entity---1".parse::<GraphId>(),
            Err(GraphIdError::InvalidNumber(_))
        ));
        assert!(matches!(
            "entity-".parse::<GraphId>(),
            Err(GraphIdError::InvalidNumber(_))
        ));
        assert!(matches!(
            "entity-1x".parse::<GraphId>(),
            Err(GraphIdError::InvalidNumber(_))
        ));
    }

    #[test]
    fn test_graph_id_serde_as_string() {
        let id = GraphId::entity(3);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"entity-3\"");
        let back: GraphId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn test_edge_kind_wire_names() {
        assert_eq!(
            serde_json::to_string(&EdgeKind::MemoryEntity).unwrap(),
            "\"memory-entity\""
        );
        assert_eq!(
            serde_json::to_string(&EdgeKind::TraceEvidence).unwrap(),
            "\"trace-evidence\""
        );
    }
}
