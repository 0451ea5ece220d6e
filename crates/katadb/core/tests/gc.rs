// Dotlanth
// Copyright (C) 2025 Synerthink

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

// Garbage collection against live snapshots

use katadb_core::{Database, FieldSpec, FieldType, Fields, Query, QueryPredicate, StoreConfig, Value};

fn counters() -> Database {
    // Inline GC off so sweeps happen only when a test asks for one
    let db = Database::new(StoreConfig {
        auto_gc_threshold: 0,
        ..StoreConfig::default()
    });
    db.define_schema("counters", [("n".to_string(), FieldSpec::new(FieldType::Integer).indexed())])
        .unwrap();
    db
}

fn set(db: &Database, key: &str, n: i64) {
    let mut txn = db.begin();
    db.write(&mut txn, "counters", key, Fields::from([("n".to_string(), Value::Integer(n))]))
        .unwrap();
    db.commit(&mut txn).unwrap();
}

fn remove(db: &Database, key: &str) {
    let mut txn = db.begin();
    db.delete(&mut txn, "counters", key).unwrap();
    db.commit(&mut txn).unwrap();
}

#[test]
fn test_gc_preserves_active_snapshots() {
    let db = counters();
    set(&db, "a", 1);
    set(&db, "b", 1);

    let reader = db.begin();
    let before_a = db.read(&reader, "counters", "a").unwrap();
    let small = Query::new("counters").filter(QueryPredicate::eq("n", 1i64));
    let before_query = db.query(&reader, &small).unwrap();

    for n in 2..10 {
        set(&db, "a", n);
    }
    remove(&db, "b");
    set(&db, "c", 1);

    let stats = db.gc().unwrap();
    assert_eq!(stats.versions_reclaimed, 0);

    assert_eq!(db.read(&reader, "counters", "a").unwrap(), before_a);
    assert!(db.read(&reader, "counters", "b").unwrap().is_some());
    assert_eq!(db.query(&reader, &small).unwrap(), before_query);
    db.verify().unwrap();
}

#[test]
fn test_gc_reclaiming_history_leaves_reads_unchanged() {
    let db = counters();
    set(&db, "a", 1);
    set(&db, "a", 2);
    let reader = db.begin();
    set(&db, "a", 3);

    let before = db.read(&reader, "counters", "a").unwrap();
    let stats = db.gc().unwrap();
    assert!(stats.versions_reclaimed > 0);

    let after = db.read(&reader, "counters", "a").unwrap();
    assert_eq!(after, before);
    assert_eq!(after.map(|record| record.version), Some(2));
    db.verify().unwrap();
}

#[test]
fn test_gc_reclaims_once_readers_finish() {
    let db = counters();
    set(&db, "a", 1);
    let reader = db.begin();
    for n in 2..=5 {
        set(&db, "a", n);
    }
    set(&db, "b", 1);
    remove(&db, "b");

    let watermark = db.watermark();
    assert_eq!(watermark, reader.start_ts());
    drop(reader);
    assert!(db.watermark() > watermark);

    let stats = db.gc().unwrap();
    assert_eq!(stats.versions_reclaimed, 5);
    assert_eq!(stats.keys_removed, 1);

    let latest = db.begin();
    let record = db.read(&latest, "counters", "a").unwrap().unwrap();
    assert_eq!(record.get("n"), Some(&Value::Integer(5)));
    assert_eq!(record.version, 5);
    assert!(db.read(&latest, "counters", "b").unwrap().is_none());

    let again = db.gc().unwrap();
    assert_eq!(again.versions_reclaimed, 0);
    assert_eq!(db.statistics().gc_runs, 2);
    db.verify().unwrap();
}

#[test]
fn test_index_follows_latest_state_after_gc() {
    let db = counters();
    set(&db, "a", 1);
    set(&db, "a", 2);
    set(&db, "b", 2);
    remove(&db, "b");
    db.gc().unwrap();

    assert!(db.range_query("counters", "n", &Value::Integer(1), &Value::Integer(1)).unwrap().is_empty());
    assert_eq!(db.range_query("counters", "n", &Value::Integer(0), &Value::Integer(10)).unwrap(), vec!["a"]);

    let stats = db.statistics();
    let index = &stats.collections["counters"].indexes[0];
    assert_eq!(index.entry_count, 1);
    assert_eq!(index.retired_count, 0);
}

#[test]
fn test_recreating_a_collected_key() {
    let db = counters();
    set(&db, "a", 1);
    remove(&db, "a");
    db.gc().unwrap();

    set(&db, "a", 7);
    let txn = db.begin();
    let record = db.read(&txn, "counters", "a").unwrap().unwrap();
    assert_eq!(record.get("n"), Some(&Value::Integer(7)));
    assert_eq!(record.version, 1);
    assert_eq!(db.history(&txn, "counters", "a").unwrap().len(), 1);
}
