use criterion::{Criterion, criterion_group, criterion_main};
use rusqlite::{Connection, params};

use atlas_core::LoadOptions;
use atlas_store::Store;

const SCHEMA: &str = "
    CREATE TABLE entities (
        id INTEGER PRIMARY KEY, type TEXT, name TEXT, importance REAL,
        created_at TEXT, updated_at TEXT, deleted_at TEXT
    );
    CREATE TABLE memories (
        id INTEGER PRIMARY KEY, type TEXT, content TEXT, importance REAL,
        confidence REAL, deadline TEXT, invalidated_at TEXT, created_at TEXT
    );
    CREATE TABLE relationships (
        id INTEGER PRIMARY KEY, source_entity_id INTEGER, target_entity_id INTEGER,
        relationship_type TEXT, strength REAL, invalid_at TEXT
    );
    CREATE TABLE memory_entities (memory_id INTEGER, entity_id INTEGER, relation_type TEXT);
";

/// `n` entities on a ring with chords, four memories each.
fn populate(conn: &Connection, n: i64) {
    conn.execute_batch(SCHEMA).unwrap();
    let tx = conn.unchecked_transaction().unwrap();
    for i in 1..=n {
        tx.execute(
            "INSERT INTO entities (id, type, name, importance) VALUES (?1, 'person', ?2, ?3)",
            params![i, format!("entity {i}"), (i % 10) as f64 / 10.0],
        )
        .unwrap();
        tx.execute(
            "INSERT INTO relationships (id, source_entity_id, target_entity_id, relationship_type, strength) \
             VALUES (?1, ?2, ?3, 'knows', 0.5)",
            params![i, i, i % n + 1],
        )
        .unwrap();
        for k in 0..4 {
            let memory = i * 10 + k;
            tx.execute(
                "INSERT INTO memories (id, type, content, importance, created_at) \
                 VALUES (?1, 'fact', 'benchmark memory', 0.5, '2026-02-01')",
                params![memory],
            )
            .unwrap();
            tx.execute(
                "INSERT INTO memory_entities VALUES (?1, ?2, 'about'), (?1, ?3, 'mentions')",
                params![memory, i, (i * 7) % n + 1],
            )
            .unwrap();
        }
    }
    tx.commit().unwrap();
}

fn bench_load(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bench.db");
    populate(&Connection::open(&path).unwrap(), 1000);
    let store = Store::open(&path).unwrap();
    let options = LoadOptions::default();

    c.bench_function("load_records_1000", |b| {
        b.iter(|| store.load_records(&options).unwrap())
    });
    c.bench_function("load_graph_dataset_1000", |b| {
        b.iter(|| store.load_graph_dataset(&options).unwrap())
    });
    c.bench_function("change_marker", |b| b.iter(|| store.change_marker().unwrap()));
}

criterion_group!(benches, bench_load);
criterion_main!(benches);
