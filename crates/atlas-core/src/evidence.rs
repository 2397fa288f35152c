//! Recovering entity references from unstructured pattern evidence.
//!
//! Pattern evidence has been written by several daemon versions, so no single
//! shape can be trusted. Each strategy is an [`EntityRefExtractor`]; results
//! are unioned, filtered to known entities, and sorted.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::dataset::GraphDataset;
use crate::normalize::parse_json_metadata;
use crate::record::PatternRecord;

static RELATIONSHIP_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"relationship_(\d+)").unwrap());

static ENTITY_ID_TOKEN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"entity_?[iI]d["']?\s*[:=]\s*["']?(\d+)"#).unwrap()
});

const ENTITY_ID_KEYS: [&str; 2] = ["entityId", "entity_id"];

/// One heuristic for pulling entity ids out of a pattern.
pub trait EntityRefExtractor: Send + Sync {
    fn name(&self) -> &'static str;

    /// Candidate entity ids; may contain unknown or duplicate ids.
    fn extract(&self, pattern: &PatternRecord, dataset: &GraphDataset) -> Vec<i64>;
}

/// `relationship_<id>` in the pattern name, resolved to both endpoints.
pub struct RelationshipNameExtractor;

impl EntityRefExtractor for RelationshipNameExtractor {
    fn name(&self) -> &'static str {
        "relationship-name"
    }

    fn extract(&self, pattern: &PatternRecord, dataset: &GraphDataset) -> Vec<i64> {
        RELATIONSHIP_NAME_RE
            .captures_iter(&pattern.name)
            .filter_map(|c| c[1].parse::<i64>().ok())
            .filter_map(|id| dataset.relationship(id))
            .flat_map(|r| [r.source_id, r.target_id])
            .collect()
    }
}

/// Recursive walk of parsed metadata/evidence JSON for `entityId`/`entity_id` keys.
pub struct JsonKeyExtractor;

impl JsonKeyExtractor {
    fn walk(value: &Value, out: &mut Vec<i64>) {
        match value {
            Value::Object(map) => {
                for (key, v) in map {
                    if ENTITY_ID_KEYS.contains(&key.as_str()) {
                        Self::collect_ids(v, out);
                    }
                    Self::walk(v, out);
                }
            }
            Value::Array(items) => {
                for item in items {
                    Self::walk(item, out);
                }
            }
            _ => {}
        }
    }

    fn collect_ids(value: &Value, out: &mut Vec<i64>) {
        match value {
            Value::Number(n) => {
                if let Some(id) = n.as_i64() {
                    out.push(id);
                }
            }
            Value::String(s) => {
                if let Ok(id) = s.trim().parse::<i64>() {
                    out.push(id);
                }
            }
            Value::Array(items) => {
                for item in items {
                    Self::collect_ids(item, out);
                }
            }
            _ => {}
        }
    }
}

impl EntityRefExtractor for JsonKeyExtractor {
    fn name(&self) -> &'static str {
        "json-key"
    }

    fn extract(&self, pattern: &PatternRecord, _dataset: &GraphDataset) -> Vec<i64> {
        let mut out = Vec::new();
        for raw in [pattern.metadata.as_deref(), pattern.evidence.as_deref()] {
            if let Some(value) = parse_json_metadata(raw) {
                Self::walk(&value, &mut out);
            }
        }
        out
    }
}

/// Token scan of the raw text, for evidence that is not valid JSON at all.
pub struct TokenScanExtractor;

impl EntityRefExtractor for TokenScanExtractor {
    fn name(&self) -> &'static str {
        "token-scan"
    }

    fn extract(&self, pattern: &PatternRecord, _dataset: &GraphDataset) -> Vec<i64> {
        [pattern.metadata.as_deref(), pattern.evidence.as_deref()]
            .into_iter()
            .flatten()
            .flat_map(|text| {
                ENTITY_ID_TOKEN_RE
                    .captures_iter(text)
                    .filter_map(|c| c[1].parse::<i64>().ok())
                    .collect::<Vec<_>>()
            })
            .collect()
    }
}

/// The ordered strategy list used by every builder.
pub fn default_extractors() -> Vec<Box<dyn EntityRefExtractor>> {
    vec![
        Box::new(RelationshipNameExtractor),
        Box::new(JsonKeyExtractor),
        Box::new(TokenScanExtractor),
    ]
}

/// Union of all strategies, restricted to loaded entities, ascending.
pub fn pattern_entity_refs(
    pattern: &PatternRecord,
    dataset: &GraphDataset,
    extractors: &[Box<dyn EntityRefExtractor>],
) -> Vec<i64> {
    let mut ids = BTreeSet::new();
    for extractor in extractors {
        for id in extractor.extract(pattern, dataset) {
            if dataset.entity(id).is_some() {
                ids.insert(id);
            }
        }
    }
    ids.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::fixtures::Fixture;

    fn dataset() -> GraphDataset {
        Fixture::new()
            .person(1, "Ada")
            .person(2, "Bob")
            .person(3, "Cy")
            .person(4, "Di")
            .rel(7, 1, 2, 0.5)
            .build()
    }

    #[test]
    fn test_relationship_name_strategy() {
        let ds = dataset();
        let p = PatternRecord::new(1, "strengthening relationship_7", 0.8);
        let mut ids = RelationshipNameExtractor.extract(&p, &ds);
        ids.sort();
        assert_eq!(ids, vec![1, 2]);

        let unknown = PatternRecord::new(2, "relationship_999", 0.8);
        assert!(RelationshipNameExtractor.extract(&unknown, &ds).is_empty());
    }

    #[test]
    fn test_json_walk_strategy() {
        let ds = dataset();
        let mut p = PatternRecord::new(1, "p", 0.8);
        p.metadata = Some(r#"{"signals":[{"entityId":3},{"nested":{"entity_id":"4"}}]}"#.into());
        p.evidence = Some(r#"[{"entity_id":[1,2]}]"#.into());
        let mut ids = JsonKeyExtractor.extract(&p, &ds);
        ids.sort();
        assert_eq!(ids, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_token_scan_handles_broken_json() {
        let ds = dataset();
        let mut p = PatternRecord::new(1, "p", 0.8);
        p.evidence = Some("seen with entity_id: 3, then \"entity_id\": \"4\" and {broken".into());
        let mut ids = TokenScanExtractor.extract(&p, &ds);
        ids.sort();
        assert_eq!(ids, vec![3, 4]);
        assert!(JsonKeyExtractor.extract(&p, &ds).is_empty());
    }

    #[test]
    fn test_union_filters_unknown_entities() {
        let ds = dataset();
        let mut p = PatternRecord::new(1, "relationship_7", 0.8);
        p.metadata = Some(r#"{"entityId": 3, "other": {"entity_id": 404}}"#.into());
        let refs = pattern_entity_refs(&p, &ds, &default_extractors());
        assert_eq!(refs, vec![1, 2, 3]);
    }

    #[test]
    fn test_no_evidence_no_refs() {
        let ds = dataset();
        let p = PatternRecord::new(1, "quiet pattern", 0.8);
        assert!(pattern_entity_refs(&p, &ds, &default_extractors()).is_empty());
    }
}
