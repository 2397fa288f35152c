//! Schema probing for memory stores written by several daemon versions.
//!
//! Nothing here migrates anything: the store is read-only. Instead the set of
//! tables and columns is resolved once and every query substitutes a SQL
//! default for a column the file does not carry.

use std::collections::{BTreeMap, BTreeSet};

use rusqlite::Connection;

use crate::error::{Result, StoreError};

/// Tables a file must have to be a memory store at all.
pub const REQUIRED_TABLES: [&str; 3] = ["entities", "memories", "relationships"];

/// Tables that may be absent; their record sets are then empty.
pub const OPTIONAL_TABLES: [&str; 3] = ["patterns", "memory_entities", "entity_embeddings"];

/// Which tables exist and which columns each carries.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SchemaCapabilities {
    tables: BTreeMap<String, BTreeSet<String>>,
}

impl SchemaCapabilities {
    pub fn has_table(&self, table: &str) -> bool {
        self.tables.contains_key(table)
    }

    pub fn has_column(&self, table: &str, column: &str) -> bool {
        self.tables
            .get(table)
            .is_some_and(|columns| columns.contains(column))
    }

    pub fn columns(&self, table: &str) -> impl Iterator<Item = &str> {
        self.tables
            .get(table)
            .into_iter()
            .flat_map(|columns| columns.iter().map(String::as_str))
    }

    /// `column` when present, otherwise `default AS column`, for a SELECT list.
    pub fn column_or(&self, table: &str, column: &str, default: &str) -> String {
        if self.has_column(table, column) {
            column.to_string()
        } else {
            format!("{default} AS {column}")
        }
    }

    /// Relationships carry `valid_at` / `invalid_at`.
    pub fn is_bitemporal(&self) -> bool {
        self.has_column("relationships", "invalid_at")
    }

    pub fn has_soft_delete(&self, table: &str) -> bool {
        self.has_column(table, "deleted_at")
    }

    /// Error naming the first required table the file lacks.
    pub fn require_core_tables(&self) -> Result<()> {
        match REQUIRED_TABLES.iter().find(|t| !self.has_table(t)) {
            Some(missing) => Err(StoreError::InvalidData(format!(
                "not a memory store: missing table '{missing}'"
            ))),
            None => Ok(()),
        }
    }
}

/// Inspect `sqlite_master` and `PRAGMA table_info` for every table the
/// loader knows about.
pub fn probe_schema(conn: &Connection) -> Result<SchemaCapabilities> {
    let mut stmt = conn.prepare("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")?;
    let present: BTreeSet<String> = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<_, _>>()?;

    let mut tables = BTreeMap::new();
    for table in REQUIRED_TABLES.iter().chain(OPTIONAL_TABLES.iter()) {
        if !present.contains(*table) {
            tracing::debug!(table, "table absent");
            continue;
        }
        let mut info = conn.prepare(&format!("PRAGMA table_info({table})"))?;
        let columns: BTreeSet<String> = info
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<std::result::Result<_, _>>()?;
        tables.insert(table.to_string(), columns);
    }

    Ok(SchemaCapabilities { tables })
}

#[cfg(test)]
mod tests {
    use super::*;

    const CURRENT: &str = "
        CREATE TABLE entities (
            id INTEGER PRIMARY KEY, type TEXT, name TEXT, description TEXT,
            importance REAL, created_at TEXT, updated_at TEXT, deleted_at TEXT,
            contact_frequency_days REAL, last_contact_at TEXT, contact_trend TEXT
        );
        CREATE TABLE memories (
            id INTEGER PRIMARY KEY, type TEXT, content TEXT, importance REAL,
            confidence REAL, verification_status TEXT, deadline TEXT,
            invalidated_at TEXT, created_at TEXT, updated_at TEXT
        );
        CREATE TABLE relationships (
            id INTEGER PRIMARY KEY, source_entity_id INTEGER, target_entity_id INTEGER,
            relationship_type TEXT, strength REAL, direction TEXT,
            valid_at TEXT, invalid_at TEXT, created_at TEXT, updated_at TEXT
        );
        CREATE TABLE patterns (
            id INTEGER PRIMARY KEY, name TEXT, description TEXT, pattern_type TEXT,
            confidence REAL, occurrences INTEGER, is_active INTEGER,
            evidence TEXT, metadata TEXT, created_at TEXT, updated_at TEXT
        );
        CREATE TABLE memory_entities (memory_id INTEGER, entity_id INTEGER, relation_type TEXT);
    ";

    /// Before bi-temporal relationships, contact cadence, and patterns.
    const LEGACY: &str = "
        CREATE TABLE entities (id INTEGER PRIMARY KEY, type TEXT, name TEXT, importance REAL);
        CREATE TABLE memories (id INTEGER PRIMARY KEY, type TEXT, content TEXT, importance REAL);
        CREATE TABLE relationships (
            id INTEGER PRIMARY KEY, source_entity_id INTEGER, target_entity_id INTEGER,
            relationship_type TEXT, strength REAL
        );
    ";

    fn probe(sql: &str) -> SchemaCapabilities {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(sql).unwrap();
        probe_schema(&conn).unwrap()
    }

    #[test]
    fn test_probe_current_schema() {
        let caps = probe(CURRENT);
        assert!(caps.require_core_tables().is_ok());
        assert!(caps.is_bitemporal());
        assert!(caps.has_soft_delete("entities"));
        assert!(caps.has_table("patterns"));
        assert!(caps.has_table("memory_entities"));
        assert!(!caps.has_table("entity_embeddings"));
        assert!(caps.has_column("entities", "contact_trend"));
    }

    #[test]
    fn test_probe_legacy_schema() {
        let caps = probe(LEGACY);
        assert!(caps.require_core_tables().is_ok());
        assert!(!caps.is_bitemporal());
        assert!(!caps.has_soft_delete("entities"));
        assert!(!caps.has_table("patterns"));
        assert!(!caps.has_table("memory_entities"));
        assert_eq!(caps.column_or("memories", "confidence", "1.0"), "1.0 AS confidence");
        assert_eq!(caps.column_or("memories", "content", "''"), "content");
    }

    #[test]
    fn test_unrelated_tables_ignored() {
        let caps = probe(&format!("{LEGACY} CREATE TABLE notes (id INTEGER, body TEXT);"));
        assert!(!caps.has_table("notes"));
        assert_eq!(caps.columns("entities").count(), 4);
    }

    #[test]
    fn test_missing_core_table_is_invalid() {
        let caps = probe("CREATE TABLE entities (id INTEGER PRIMARY KEY);");
        let err = caps.require_core_tables().unwrap_err();
        assert!(err.to_string().contains("memories"), "{err}");
    }

    #[test]
    fn test_empty_file_probes_empty() {
        let conn = Connection::open_in_memory().unwrap();
        let caps = probe_schema(&conn).unwrap();
        assert_eq!(caps, SchemaCapabilities::default());
    }
}
