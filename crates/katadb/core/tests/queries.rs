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

// Query planning and execution against snapshots

use katadb_core::query::AccessPath;
use katadb_core::{
    Database, FieldSpec, FieldType, Fields, KataError, Query, QueryPredicate, ScanFallback, SortOrder, StoreConfig, Value,
};

fn catalog(config: StoreConfig) -> Database {
    let db = Database::new(config);
    db.define_schema(
        "items",
        [
            ("kind".to_string(), FieldSpec::new(FieldType::String).indexed()),
            ("price".to_string(), FieldSpec::new(FieldType::Integer).indexed()),
            ("stock".to_string(), FieldSpec::new(FieldType::Integer)),
            ("body".to_string(), FieldSpec::new(FieldType::Text).text_indexed()),
        ],
    )
    .unwrap();

    let mut txn = db.begin();
    for (key, kind, price, body) in [
        ("i1", "tool", 30, "steel hammer"),
        ("i2", "tool", 10, "small steel screwdriver steel"),
        ("i3", "toy", 20, "wooden hammer"),
        ("i4", "toy", 5, "rubber duck"),
        ("i5", "tool", 50, "cordless drill"),
    ] {
        let fields = Fields::from([
            ("kind".to_string(), Value::from(kind)),
            ("price".to_string(), Value::Integer(price)),
            ("stock".to_string(), Value::Integer(price / 5)),
            ("body".to_string(), Value::text(body)),
        ]);
        db.write(&mut txn, "items", key, fields).unwrap();
    }
    db.commit(&mut txn).unwrap();
    db
}

fn keys(records: &[katadb_core::Record]) -> Vec<&str> {
    records.iter().map(|r| r.key.as_str()).collect()
}

#[test]
fn test_index_and_scan_paths_agree() {
    let db = catalog(StoreConfig::default());
    let txn = db.begin();

    let by_index = Query::new("items").filter(QueryPredicate::between("price", 10i64, 30i64));
    let by_scan = Query::new("items").filter(QueryPredicate::between("stock", 2i64, 6i64));
    assert!(db.explain(&by_index).unwrap().access_path.uses_index());
    assert_eq!(db.explain(&by_scan).unwrap().access_path, AccessPath::FullScan);

    let indexed = db.query(&txn, &by_index).unwrap();
    let scanned = db.query(&txn, &by_scan).unwrap();
    assert_eq!(keys(&indexed), vec!["i1", "i2", "i3"]);
    assert_eq!(keys(&indexed), keys(&scanned));
}

#[test]
fn test_predicates_on_one_field_are_intersected() {
    let db = catalog(StoreConfig::default());
    let txn = db.begin();
    let query = Query::new("items")
        .filter(QueryPredicate::gt("price", 5i64))
        .filter(QueryPredicate::le("price", 20i64))
        .filter(QueryPredicate::eq("kind", "tool"));
    assert_eq!(keys(&db.query(&txn, &query).unwrap()), vec!["i2"]);
}

#[test]
fn test_sort_and_pagination() {
    let db = catalog(StoreConfig::default());
    let txn = db.begin();
    let query = Query::new("items")
        .filter(QueryPredicate::eq("kind", "tool"))
        .sort_by("price", SortOrder::Descending)
        .offset(1)
        .limit(1);
    assert_eq!(keys(&db.query(&txn, &query).unwrap()), vec!["i1"]);

    let everything = Query::new("items").sort_by("price", SortOrder::Ascending);
    assert_eq!(keys(&db.query(&txn, &everything).unwrap()), vec!["i4", "i2", "i3", "i1", "i5"]);
}

#[test]
fn test_text_query_ranks_by_term_frequency() {
    let db = catalog(StoreConfig::default());
    let txn = db.begin();

    let hits = db.search(&txn, &Query::new("items").text(["Steel"])).unwrap();
    assert_eq!(hits.iter().map(|h| (h.record.key.as_str(), h.score)).collect::<Vec<_>>(), vec![("i2", 2), ("i1", 1)]);

    let hammers = Query::new("items").text(["hammer"]).filter(QueryPredicate::eq("kind", "toy"));
    assert!(matches!(db.explain(&hammers).unwrap().access_path, AccessPath::IndexAndText { .. }));
    assert_eq!(keys(&db.query(&txn, &hammers).unwrap()), vec!["i3"]);

    let ranked = db.text_search("items", &["hammer"]).unwrap();
    assert_eq!(ranked.iter().map(|h| h.key.as_str()).collect::<Vec<_>>(), vec!["i1", "i3"]);
}

#[test]
fn test_index_query_respects_older_snapshot() {
    let db = catalog(StoreConfig::default());
    let reader = db.begin();

    let mut writer = db.begin();
    let moved = Fields::from([
        ("kind".to_string(), Value::from("toy")),
        ("price".to_string(), Value::Integer(99)),
    ]);
    db.write(&mut writer, "items", "i1", moved).unwrap();
    db.delete(&mut writer, "items", "i2").unwrap();
    db.commit(&mut writer).unwrap();

    let tools = Query::new("items").filter(QueryPredicate::eq("kind", "tool"));
    assert_eq!(keys(&db.query(&reader, &tools).unwrap()), vec!["i1", "i2", "i5"]);

    let fresh = db.begin();
    assert_eq!(keys(&db.query(&fresh, &tools).unwrap()), vec!["i5"]);
    let pricey = Query::new("items").filter(QueryPredicate::ge("price", 60i64));
    assert!(db.query(&reader, &pricey).unwrap().is_empty());
    assert_eq!(keys(&db.query(&fresh, &pricey).unwrap()), vec!["i1"]);
}

#[test]
fn test_query_sees_own_staged_writes() {
    let db = catalog(StoreConfig::default());
    let mut txn = db.begin();
    let fields = Fields::from([
        ("kind".to_string(), Value::from("tool")),
        ("price".to_string(), Value::Integer(15)),
    ]);
    db.write(&mut txn, "items", "i9", fields).unwrap();
    db.delete(&mut txn, "items", "i2").unwrap();

    let query = Query::new("items").filter(QueryPredicate::between("price", 10i64, 20i64));
    let found = db.query(&txn, &query).unwrap();
    assert_eq!(keys(&found), vec!["i3", "i9"]);
    assert!(found[1].is_staged());
}

#[test]
fn test_invalid_queries() {
    let db = catalog(StoreConfig::default());
    let txn = db.begin();

    let undeclared = Query::new("items").filter(QueryPredicate::eq("colour", "red"));
    assert!(matches!(db.query(&txn, &undeclared), Err(KataError::InvalidQuery(_))));

    let mistyped = Query::new("items").filter(QueryPredicate::eq("price", "cheap"));
    assert!(matches!(db.query(&txn, &mistyped), Err(KataError::InvalidQuery(_))));

    let bad_sort = Query::new("items").sort_by("colour", SortOrder::Ascending);
    assert!(matches!(db.query(&txn, &bad_sort), Err(KataError::InvalidQuery(_))));

    assert!(matches!(
        db.range_query("items", "price", &Value::from("a"), &Value::from("z")),
        Err(KataError::InvalidQuery(_))
    ));
    assert!(matches!(db.query(&txn, &Query::new("missing")), Err(KataError::UnknownCollection(_))));
}

#[test]
fn test_reject_fallback_refuses_full_scans() {
    let db = catalog(StoreConfig {
        scan_fallback: ScanFallback::Reject,
        ..StoreConfig::default()
    });
    let txn = db.begin();

    let unindexed = Query::new("items").filter(QueryPredicate::eq("stock", 2i64));
    assert!(matches!(db.query(&txn, &unindexed), Err(KataError::InvalidQuery(_))));

    let indexed = Query::new("items").filter(QueryPredicate::eq("kind", "toy"));
    assert_eq!(keys(&db.query(&txn, &indexed).unwrap()), vec!["i3", "i4"]);
}

#[test]
fn test_explain_renders_plan() {
    let db = catalog(StoreConfig::default());
    let plan = db
        .explain(&Query::new("items").filter(QueryPredicate::eq("kind", "toy")).limit(1))
        .unwrap();
    let rendered = plan.to_string();
    assert!(rendered.contains("collection:   items"));
    assert!(rendered.contains("kind"));
    assert_eq!(plan.collection_keys, 5);
}
