//! Dashboard summary: counts and the short lists worth looking at today.

use serde::Serialize;

use crate::constants::COOLING_FACTOR;
use crate::dataset::GraphDataset;
use crate::evidence::{EntityRefExtractor, default_extractors, pattern_entity_refs};
use crate::graph::GraphId;
use crate::normalize::{
    MemoryStatus, clamp01, entity_signal_score, memory_graph_id, memory_status, round4,
    truncate_label, urgency_score,
};
use crate::overview::urgent_commitments;
use crate::time::{days_since, parse_timestamp};

pub const INSIGHT_LIST_LIMIT: usize = 8;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InsightCounts {
    pub entities: usize,
    pub memories: usize,
    pub commitments: usize,
    pub relationships: usize,
    pub patterns: usize,
    pub links: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityInsight {
    pub id: String,
    pub label: String,
    pub subtype: String,
    pub signal_score: f64,
    pub memory_count: usize,
    pub relationship_count: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitmentInsight {
    pub id: String,
    pub label: String,
    pub status: String,
    pub deadline: Option<String>,
    pub importance: f64,
    pub urgency_score: f64,
    pub entity_refs: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PatternInsight {
    pub id: String,
    pub label: String,
    pub confidence: f64,
    pub occurrences: i64,
    pub entity_refs: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CoolingRelationship {
    pub id: String,
    pub label: String,
    pub trend: Option<String>,
    pub days_since_contact: Option<f64>,
    pub cadence_days: Option<f64>,
    pub last_contact_at: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Insights {
    pub counts: InsightCounts,
    pub top_entities: Vec<EntityInsight>,
    pub urgent_commitments: Vec<CommitmentInsight>,
    pub active_patterns: Vec<PatternInsight>,
    pub cooling_relationships: Vec<CoolingRelationship>,
}

fn entity_ids(ids: impl IntoIterator<Item = i64>) -> Vec<String> {
    ids.into_iter()
        .map(|id| GraphId::entity(id).to_string())
        .collect()
}

/// Days since last contact and how many cadences that is, when both are known.
fn contact_lag(last_contact_at: Option<&str>, cadence: Option<f64>, now: i64) -> (Option<f64>, Option<f64>) {
    let days = last_contact_at
        .and_then(parse_timestamp)
        .map(|ts| days_since(ts, now));
    let ratio = match (days, cadence) {
        (Some(d), Some(c)) if c > 0.0 => Some(d / c),
        _ => None,
    };
    (days, ratio)
}

pub fn build_insights(dataset: &GraphDataset) -> Insights {
    build_insights_with(dataset, &default_extractors())
}

pub fn build_insights_with(
    dataset: &GraphDataset,
    extractors: &[Box<dyn EntityRefExtractor>],
) -> Insights {
    let now = dataset.now;

    let counts = InsightCounts {
        entities: dataset.entities.len(),
        memories: dataset.memories.iter().filter(|m| !m.is_commitment()).count(),
        commitments: dataset.memories.iter().filter(|m| m.is_commitment()).count(),
        relationships: dataset.relationships.len(),
        patterns: dataset.patterns.iter().filter(|p| p.is_active).count(),
        links: dataset.links.len(),
    };

    let mut top_entities: Vec<EntityInsight> = dataset
        .entities
        .iter()
        .map(|entity| {
            let stats = dataset.stats(entity.id);
            EntityInsight {
                id: GraphId::entity(entity.id).to_string(),
                label: entity.name.clone(),
                subtype: entity.kind.as_str().to_string(),
                signal_score: round4(entity_signal_score(
                    clamp01(entity.importance),
                    stats.memory_count,
                    stats.relationship_count,
                )),
                memory_count: stats.memory_count,
                relationship_count: stats.relationship_count,
            }
        })
        .collect();
    // stable sort keeps dataset order on ties
    top_entities.sort_by(|a, b| b.signal_score.total_cmp(&a.signal_score));
    top_entities.truncate(INSIGHT_LIST_LIMIT);

    let urgent = urgent_commitments(&dataset.memories, now, INSIGHT_LIST_LIMIT)
        .into_iter()
        .map(|memory| {
            let status = memory_status(memory, now);
            CommitmentInsight {
                id: memory_graph_id(memory).to_string(),
                label: truncate_label(&memory.content),
                status: status.as_str().to_string(),
                deadline: memory.deadline.clone(),
                importance: round4(clamp01(memory.importance)),
                urgency_score: round4(urgency_score(
                    memory.deadline.as_deref(),
                    clamp01(memory.importance),
                    status == MemoryStatus::Overdue,
                    memory.kind,
                    now,
                )),
                entity_refs: entity_ids(dataset.memory_entities(memory.id)),
            }
        })
        .collect();

    let mut patterns: Vec<_> = dataset.patterns.iter().filter(|p| p.is_active).collect();
    patterns.sort_by(|a, b| {
        b.confidence
            .total_cmp(&a.confidence)
            .then_with(|| a.id.cmp(&b.id))
    });
    let active_patterns = patterns
        .into_iter()
        .take(INSIGHT_LIST_LIMIT)
        .map(|pattern| PatternInsight {
            id: GraphId::pattern(pattern.id).to_string(),
            label: pattern.name.clone(),
            confidence: round4(clamp01(pattern.confidence)),
            occurrences: pattern.occurrences,
            entity_refs: entity_ids(pattern_entity_refs(pattern, dataset, extractors)),
        })
        .collect();

    let mut cooling: Vec<(f64, CoolingRelationship)> = dataset
        .entities
        .iter()
        .filter_map(|entity| {
            let (days, ratio) = contact_lag(
                entity.last_contact_at.as_deref(),
                entity.contact_cadence_days,
                now,
            );
            let trend_cooling = entity
                .contact_trend
                .as_deref()
                .is_some_and(|t| t.trim().eq_ignore_ascii_case("cooling"));
            let overdue = ratio.is_some_and(|r| r > COOLING_FACTOR);
            if !trend_cooling && !overdue {
                return None;
            }
            Some((
                ratio.unwrap_or(0.0),
                CoolingRelationship {
                    id: GraphId::entity(entity.id).to_string(),
                    label: entity.name.clone(),
                    trend: entity.contact_trend.clone(),
                    days_since_contact: days.map(|d| (d * 10.0).round() / 10.0),
                    cadence_days: entity.contact_cadence_days,
                    last_contact_at: entity.last_contact_at.clone(),
                },
            ))
        })
        .collect();
    cooling.sort_by(|a, b| b.0.total_cmp(&a.0));
    let cooling_relationships = cooling
        .into_iter()
        .take(INSIGHT_LIST_LIMIT)
        .map(|(_, c)| c)
        .collect();

    Insights {
        counts,
        top_entities,
        urgent_commitments: urgent,
        active_patterns,
        cooling_relationships,
    }
}
