use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags, Row};
use serde::Serialize;

use atlas_core::time::now_unix_secs;
use atlas_core::{
    DatasetRecords, EntityKind, EntityRecord, GraphDataset, LoadOptions, MemoryEntityLink,
    MemoryKind, MemoryRecord, PatternRecord, RelationshipRecord,
};

use crate::error::Result;
use crate::projection::EmbeddingProjection;
use crate::schema::{self, SchemaCapabilities};

/// How long a read waits on a daemon holding the write lock.
pub const BUSY_TIMEOUT: Duration = Duration::from_millis(5000);

/// Tables fingerprinted by [`Store::change_marker`].
const WATCHED_TABLES: [&str; 5] = [
    "entities",
    "memories",
    "relationships",
    "patterns",
    "memory_entities",
];

/// Read-only handle on a memory store. Never writes, never migrates.
pub struct Store {
    conn: Connection,
    path: Option<PathBuf>,
    caps: SchemaCapabilities,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        let mut store = Self::from_connection(conn)?;
        store.path = Some(path.to_path_buf());
        tracing::debug!(path = %path.display(), "opened memory store read-only");
        Ok(store)
    }

    /// Wrap an already-open connection (tests, in-memory fixtures).
    pub fn from_connection(conn: Connection) -> Result<Self> {
        let caps = schema::probe_schema(&conn)?;
        caps.require_core_tables()?;
        Ok(Self {
            conn,
            path: None,
            caps,
        })
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// File this store was opened from; `None` for wrapped connections.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn capabilities(&self) -> &SchemaCapabilities {
        &self.caps
    }

    /// Projection oracle backed by this store's `entity_embeddings` table.
    pub fn embedding_projection(&self) -> EmbeddingProjection<'_> {
        EmbeddingProjection::new(self)
    }

    // --- Load ---

    /// Every record set, read inside one transaction so the snapshot is
    /// consistent even while the daemon writes.
    pub fn load_records(&self, options: &LoadOptions) -> Result<DatasetRecords> {
        let tx = self.conn.unchecked_transaction()?;
        let records = DatasetRecords {
            entities: self.load_entities(&tx)?,
            memories: self.load_memories(&tx, options)?,
            relationships: self.load_relationships(&tx, options)?,
            patterns: self.load_patterns(&tx)?,
            links: self.load_links(&tx)?,
        };
        tx.finish()?;
        tracing::debug!(
            entities = records.entities.len(),
            memories = records.memories.len(),
            relationships = records.relationships.len(),
            patterns = records.patterns.len(),
            links = records.links.len(),
            historical = options.include_historical,
            "loaded records"
        );
        Ok(records)
    }

    pub fn load_graph_dataset(&self, options: &LoadOptions) -> Result<GraphDataset> {
        self.load_graph_dataset_at(options, now_unix_secs())
    }

    /// As [`load_graph_dataset`](Self::load_graph_dataset) with an explicit clock.
    pub fn load_graph_dataset_at(&self, options: &LoadOptions, now: i64) -> Result<GraphDataset> {
        let records = self.load_records(options)?;
        Ok(GraphDataset::build(records, *options, now))
    }

    fn not_deleted(&self, table: &str) -> &'static str {
        if self.caps.has_soft_delete(table) {
            " WHERE deleted_at IS NULL"
        } else {
            ""
        }
    }

    fn load_entities(&self, conn: &Connection) -> Result<Vec<EntityRecord>> {
        let c = &self.caps;
        let sql = format!(
            "SELECT id, {}, {}, {}, {}, {}, {}, {}, {}, {} FROM entities{} ORDER BY importance DESC, name, id",
            c.column_or("entities", "type", "'concept'"),
            c.column_or("entities", "name", "''"),
            c.column_or("entities", "description", "NULL"),
            c.column_or("entities", "importance", "0.5"),
            c.column_or("entities", "created_at", "NULL"),
            c.column_or("entities", "updated_at", "NULL"),
            c.column_or("entities", "contact_frequency_days", "NULL"),
            c.column_or("entities", "last_contact_at", "NULL"),
            c.column_or("entities", "contact_trend", "NULL"),
            self.not_deleted("entities"),
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], |row| {
                let kind: Option<String> = row.get(1)?;
                Ok(EntityRecord {
                    id: row.get(0)?,
                    kind: EntityKind::from_str_lossy(kind.as_deref().unwrap_or_default()),
                    name: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                    description: text(row, 3)?,
                    importance: unit(row, 4, 0.5)?,
                    created_at: text(row, 5)?,
                    updated_at: text(row, 6)?,
                    contact_cadence_days: row.get::<_, Option<f64>>(7)?.filter(|d| d.is_finite() && *d > 0.0),
                    last_contact_at: text(row, 8)?,
                    contact_trend: text(row, 9)?,
                })
            })?
            .collect::<std::result::Result<_, _>>()?;
        Ok(rows)
    }

    fn load_memories(&self, conn: &Connection, options: &LoadOptions) -> Result<Vec<MemoryRecord>> {
        let c = &self.caps;
        let mut filters = Vec::new();
        if c.has_soft_delete("memories") {
            filters.push("deleted_at IS NULL");
        }
        if !options.include_historical && c.has_column("memories", "invalidated_at") {
            filters.push("invalidated_at IS NULL");
        }
        let sql = format!(
            "SELECT id, {}, {}, {}, {}, {}, {}, {}, {}, {} FROM memories{} \
             ORDER BY importance DESC, created_at DESC, id",
            c.column_or("memories", "type", "'fact'"),
            c.column_or("memories", "content", "''"),
            c.column_or("memories", "importance", "0.5"),
            c.column_or("memories", "confidence", "1.0"),
            c.column_or("memories", "verification_status", "NULL"),
            c.column_or("memories", "deadline", "NULL"),
            c.column_or("memories", "invalidated_at", "NULL"),
            c.column_or("memories", "created_at", "NULL"),
            c.column_or("memories", "updated_at", "NULL"),
            where_clause(&filters),
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], |row| {
                let kind: Option<String> = row.get(1)?;
                Ok(MemoryRecord {
                    id: row.get(0)?,
                    kind: MemoryKind::from_str_lossy(kind.as_deref().unwrap_or_default()),
                    content: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                    importance: unit(row, 3, 0.5)?,
                    confidence: unit(row, 4, 1.0)?,
                    verification_status: text(row, 5)?,
                    deadline: text(row, 6)?,
                    invalidated_at: text(row, 7)?,
                    created_at: text(row, 8)?,
                    updated_at: text(row, 9)?,
                })
            })?
            .collect::<std::result::Result<_, _>>()?;
        Ok(rows)
    }

    fn load_relationships(
        &self,
        conn: &Connection,
        options: &LoadOptions,
    ) -> Result<Vec<RelationshipRecord>> {
        let c = &self.caps;
        let mut filters = Vec::new();
        if c.has_soft_delete("relationships") {
            filters.push("deleted_at IS NULL");
        }
        if !options.include_historical && c.is_bitemporal() {
            filters.push("invalid_at IS NULL");
        }
        let sql = format!(
            "SELECT id, source_entity_id, target_entity_id, {}, {}, {}, {}, {}, {}, {} FROM relationships{} \
             ORDER BY strength DESC, id",
            c.column_or("relationships", "relationship_type", "'related_to'"),
            c.column_or("relationships", "strength", "0.5"),
            c.column_or("relationships", "direction", "'outgoing'"),
            c.column_or("relationships", "valid_at", "NULL"),
            c.column_or("relationships", "invalid_at", "NULL"),
            c.column_or("relationships", "created_at", "NULL"),
            c.column_or("relationships", "updated_at", "NULL"),
            where_clause(&filters),
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], |row| {
                Ok(RelationshipRecord {
                    id: row.get(0)?,
                    source_id: row.get(1)?,
                    target_id: row.get(2)?,
                    kind: row
                        .get::<_, Option<String>>(3)?
                        .unwrap_or_else(|| "related_to".to_string()),
                    strength: unit(row, 4, 0.5)?,
                    direction: row
                        .get::<_, Option<String>>(5)?
                        .unwrap_or_else(|| "outgoing".to_string()),
                    valid_at: text(row, 6)?,
                    invalid_at: text(row, 7)?,
                    created_at: text(row, 8)?,
                    updated_at: text(row, 9)?,
                })
            })?
            .collect::<std::result::Result<_, _>>()?;
        Ok(rows)
    }

    fn load_patterns(&self, conn: &Connection) -> Result<Vec<PatternRecord>> {
        let c = &self.caps;
        if !c.has_table("patterns") {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT id, {}, {}, {}, {}, {}, {}, {}, {}, {}, {} FROM patterns{} \
             ORDER BY confidence DESC, name, id",
            c.column_or("patterns", "name", "''"),
            c.column_or("patterns", "description", "NULL"),
            c.column_or("patterns", "pattern_type", "'behavioral'"),
            c.column_or("patterns", "confidence", "0.5"),
            c.column_or("patterns", "occurrences", "1"),
            c.column_or("patterns", "is_active", "1"),
            c.column_or("patterns", "evidence", "NULL"),
            c.column_or("patterns", "metadata", "NULL"),
            c.column_or("patterns", "created_at", "NULL"),
            c.column_or("patterns", "updated_at", "NULL"),
            self.not_deleted("patterns"),
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], |row| {
                Ok(PatternRecord {
                    id: row.get(0)?,
                    name: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                    description: text(row, 2)?,
                    kind: row
                        .get::<_, Option<String>>(3)?
                        .unwrap_or_else(|| "behavioral".to_string()),
                    confidence: unit(row, 4, 0.5)?,
                    occurrences: row.get::<_, Option<i64>>(5)?.unwrap_or(1),
                    is_active: row.get::<_, Option<i64>>(6)?.unwrap_or(1) != 0,
                    evidence: text(row, 7)?,
                    metadata: text(row, 8)?,
                    created_at: text(row, 9)?,
                    updated_at: text(row, 10)?,
                })
            })?
            .collect::<std::result::Result<_, _>>()?;
        Ok(rows)
    }

    fn load_links(&self, conn: &Connection) -> Result<Vec<MemoryEntityLink>> {
        let c = &self.caps;
        if !c.has_table("memory_entities") {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT memory_id, entity_id, {} FROM memory_entities ORDER BY memory_id, entity_id",
            c.column_or("memory_entities", "relation_type", "'mentions'"),
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], |row| {
                Ok(MemoryEntityLink {
                    memory_id: row.get(0)?,
                    entity_id: row.get(1)?,
                    relation: row
                        .get::<_, Option<String>>(2)?
                        .unwrap_or_else(|| "mentions".to_string()),
                })
            })?
            .collect::<std::result::Result<_, _>>()?;
        Ok(rows)
    }

    // --- Change detection ---

    /// Cheap fingerprint of the store. Two equal markers mean nothing a
    /// graph depends on has changed.
    pub fn change_marker(&self) -> Result<ChangeMarker> {
        let mut marker = ChangeMarker::default();
        for table in WATCHED_TABLES {
            if !self.caps.has_table(table) {
                continue;
            }
            let updated = self.caps.column_or(table, "updated_at", "NULL");
            let (rows, max_id, latest): (i64, i64, Option<String>) = self.conn.query_row(
                &format!(
                    "SELECT COUNT(*), COALESCE(MAX(rowid), 0), CAST(MAX({updated}) AS TEXT) FROM {table}"
                ),
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )?;
            marker.tables.insert(table.to_string(), TableMarker { rows, max_id });
            if let Some(latest) = latest
                && marker.latest_update.as_ref().is_none_or(|current| latest > *current)
            {
                marker.latest_update = Some(latest);
            }
        }
        Ok(marker)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableMarker {
    pub rows: i64,
    pub max_id: i64,
}

/// Row counts, max ids, and the newest `updated_at` across watched tables.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeMarker {
    pub tables: BTreeMap<String, TableMarker>,
    pub latest_update: Option<String>,
}

impl ChangeMarker {
    /// Names of tables whose counts or max id differ from `previous`.
    pub fn changed_tables(&self, previous: &ChangeMarker) -> Vec<String> {
        self.tables
            .iter()
            .filter(|(name, marker)| previous.tables.get(*name) != Some(*marker))
            .map(|(name, _)| name.clone())
            .chain(
                previous
                    .tables
                    .keys()
                    .filter(|name| !self.tables.contains_key(*name))
                    .cloned(),
            )
            .collect()
    }
}

fn where_clause(filters: &[&str]) -> String {
    if filters.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", filters.join(" AND "))
    }
}

/// An optional text column. Blank strings and values stored under another
/// type (an epoch INTEGER in a DATETIME column, say) read as `None`.
fn text(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<String>> {
    Ok(match row.get_ref(idx)? {
        ValueRef::Text(bytes) => std::str::from_utf8(bytes)
            .ok()
            .filter(|s| !s.trim().is_empty())
            .map(str::to_owned),
        _ => None,
    })
}

/// A `[0, 1]` score column; NULL or non-finite values take `default`.
fn unit(row: &Row<'_>, idx: usize, default: f64) -> rusqlite::Result<f64> {
    let value: Option<f64> = row.get(idx)?;
    Ok(value.filter(|v| v.is_finite()).unwrap_or(default).clamp(0.0, 1.0))
}

#[cfg(test)]
pub(crate) mod fixtures {
    use rusqlite::Connection;

    pub const NOW: i64 = 1_771_632_000; // 2026-02-21T00:00:00Z

    pub const SCHEMA: &str = "
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

    pub const SEED: &str = "
        INSERT INTO entities (id, type, name, importance, updated_at) VALUES
            (1, 'person', 'Sam', 0.9, '2026-02-20 10:00:00'),
            (2, 'person', 'Priya', 0.7, '2026-02-19 10:00:00'),
            (3, 'project', 'Atlas', 0.7, '2026-02-18 10:00:00'),
            (4, 'spaceship', 'Mystery', 0.2, NULL);
        INSERT INTO entities (id, type, name, importance, deleted_at) VALUES
            (5, 'person', 'Gone', 0.99, '2026-01-01');
        INSERT INTO memories (id, type, content, importance, confidence, deadline, invalidated_at, created_at) VALUES
            (100, 'commitment', 'Send Priya the budget', 0.8, 0.9, '2026-02-10', NULL, '2026-02-01'),
            (101, 'fact', 'Atlas uses SQLite', 0.6, 1.0, NULL, NULL, '2026-02-15'),
            (102, 'observation', 'Sam prefers mornings', 0.6, NULL, NULL, NULL, '2026-02-18'),
            (103, 'fact', 'Old office address', 0.9, 1.0, NULL, '2026-01-05', '2025-06-01');
        INSERT INTO relationships (id, source_entity_id, target_entity_id, relationship_type, strength, invalid_at) VALUES
            (10, 1, 2, 'works_with', 0.9, NULL),
            (11, 2, 3, 'leads', 0.6, NULL),
            (12, 1, 3, 'owned', 0.95, '2026-01-01'),
            (13, 1, 5, 'knows', 0.5, NULL);
        INSERT INTO patterns (id, name, pattern_type, confidence, occurrences, is_active, evidence) VALUES
            (1, 'relationship_10 weekly sync', 'temporal', 0.8, 4, 1, '{\"entityId\": 3}'),
            (2, 'stale habit', 'behavioral', 0.3, 1, 0, NULL);
        INSERT INTO memory_entities (memory_id, entity_id, relation_type) VALUES
            (101, 3, 'about'),
            (100, 2, 'about'),
            (100, 3, 'mentions'),
            (102, 1, 'about'),
            (102, 5, 'mentions'),
            (103, 1, 'about');
    ";

    /// In-memory connection with the current schema and seed rows.
    pub fn seeded() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(SCHEMA).unwrap();
        conn.execute_batch(SEED).unwrap();
        conn
    }
}
