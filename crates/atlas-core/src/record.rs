//! Concrete row types for the memory store tables.
//!
//! Every row is mapped into one of these structs at the query boundary, before
//! any normalization or graph building touches it.

use serde::{Deserialize, Serialize};

/// Classification of a tracked entity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Person,
    Organization,
    Project,
    #[default]
    Concept,
    Location,
}

impl EntityKind {
    pub const ALL: [EntityKind; 5] = [
        Self::Person,
        Self::Organization,
        Self::Project,
        Self::Concept,
        Self::Location,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Person => "person",
            Self::Organization => "organization",
            Self::Project => "project",
            Self::Concept => "concept",
            Self::Location => "location",
        }
    }

    /// Unknown labels fall back to `Concept`.
    pub fn from_str_lossy(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "person" => Self::Person,
            "organization" | "organisation" | "org" => Self::Organization,
            "project" => Self::Project,
            "location" | "place" => Self::Location,
            _ => Self::Concept,
        }
    }
}

/// Classification of a memory row.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MemoryKind {
    #[default]
    Fact,
    Commitment,
    Learning,
    Observation,
    Preference,
    Pattern,
}

impl MemoryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fact => "fact",
            Self::Commitment => "commitment",
            Self::Learning => "learning",
            Self::Observation => "observation",
            Self::Preference => "preference",
            Self::Pattern => "pattern",
        }
    }

    pub fn from_str_lossy(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "commitment" => Self::Commitment,
            "learning" => Self::Learning,
            "observation" => Self::Observation,
            "preference" => Self::Preference,
            "pattern" => Self::Pattern,
            _ => Self::Fact,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    pub id: i64,
    pub kind: EntityKind,
    pub name: String,
    pub description: Option<String>,
    pub importance: f64,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
    /// Target number of days between contacts.
    pub contact_cadence_days: Option<f64>,
    pub last_contact_at: Option<String>,
    /// Free-form trend label written by the daemon ("warming", "cooling", ...).
    pub contact_trend: Option<String>,
}

impl EntityRecord {
    pub fn new(id: i64, kind: EntityKind, name: &str, importance: f64) -> Self {
        Self {
            id,
            kind,
            name: name.to_string(),
            description: None,
            importance,
            created_at: None,
            updated_at: None,
            contact_cadence_days: None,
            last_contact_at: None,
            contact_trend: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub id: i64,
    pub kind: MemoryKind,
    pub content: String,
    pub importance: f64,
    pub confidence: f64,
    pub verification_status: Option<String>,
    pub deadline: Option<String>,
    pub invalidated_at: Option<String>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
}

impl MemoryRecord {
    pub fn new(id: i64, kind: MemoryKind, content: &str, importance: f64) -> Self {
        Self {
            id,
            kind,
            content: content.to_string(),
            importance,
            confidence: 1.0,
            verification_status: None,
            deadline: None,
            invalidated_at: None,
            created_at: None,
            updated_at: None,
        }
    }

    pub fn is_invalidated(&self) -> bool {
        self.invalidated_at.as_deref().is_some_and(|s| !s.trim().is_empty())
    }

    pub fn is_commitment(&self) -> bool {
        self.kind == MemoryKind::Commitment
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RelationshipRecord {
    pub id: i64,
    pub source_id: i64,
    pub target_id: i64,
    pub kind: String,
    pub strength: f64,
    pub direction: String,
    pub valid_at: Option<String>,
    pub invalid_at: Option<String>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
}

impl RelationshipRecord {
    pub fn new(id: i64, source_id: i64, target_id: i64, kind: &str, strength: f64) -> Self {
        Self {
            id,
            source_id,
            target_id,
            kind: kind.to_string(),
            strength,
            direction: "outgoing".to_string(),
            valid_at: None,
            invalid_at: None,
            created_at: None,
            updated_at: None,
        }
    }

    pub fn is_invalidated(&self) -> bool {
        self.invalid_at.as_deref().is_some_and(|s| !s.trim().is_empty())
    }

    /// The other endpoint, if `entity_id` is one of the two.
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

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PatternRecord {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub kind: String,
    pub confidence: f64,
    pub occurrences: i64,
    pub is_active: bool,
    /// Raw, unstructured evidence text (usually JSON, sometimes not).
    pub evidence: Option<String>,
    /// Raw metadata text (usually JSON, sometimes not).
    pub metadata: Option<String>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
}

impl PatternRecord {
    pub fn new(id: i64, name: &str, confidence: f64) -> Self {
        Self {
            id,
            name: name.to_string(),
            description: None,
            kind: "behavioral".to_string(),
            confidence,
            occurrences: 1,
            is_active: true,
            evidence: None,
            metadata: None,
            created_at: None,
            updated_at: None,
        }
    }
}

/// Join row between a memory and an entity.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntityLink {
    pub memory_id: i64,
    pub entity_id: i64,
    /// "about", "mentions", or whatever the daemon wrote.
    pub relation: String,
}

impl MemoryEntityLink {
    pub fn new(memory_id: i64, entity_id: i64, relation: &str) -> Self {
        Self {
            memory_id,
            entity_id,
            relation: relation.to_string(),
        }
    }

    /// Ranking bias used when choosing a memory's primary entity.
    pub fn relation_bias(&self) -> f64 {
        match self.relation.trim().to_ascii_lowercase().as_str() {
            "about" => 0.3,
            "mentions" => 0.0,
            _ => 0.1,
        }
    }
}

/// Everything one consistent read of the store produces.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DatasetRecords {
    pub entities: Vec<EntityRecord>,
    pub memories: Vec<MemoryRecord>,
    pub relationships: Vec<RelationshipRecord>,
    pub patterns: Vec<PatternRecord>,
    pub links: Vec<MemoryEntityLink>,
}
