//! End-to-end repair scenarios against the in-memory catalog.

use std::sync::Arc;

use loam_error::LoamError;
use loam_lock::LockRegistry;
use loam_repair::mem::{IndexSpec, MemCatalog};
use loam_repair::{Collection, IndexRepairEngine, RepairAction, RepairRequest, RetryPolicy};
use loam_types::{Document, IndexKey, Namespace, RecordId, Value};

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn ns() -> Namespace {
    Namespace::new("app", "users")
}

fn doc(json: &str) -> Document {
    serde_json::from_str(json).unwrap()
}

fn engine() -> IndexRepairEngine {
    IndexRepairEngine::new(Arc::new(LockRegistry::new()))
}

/// Catalog with app.users, an `idx_email` index, and two documents.
fn setup() -> MemCatalog {
    init_tracing();
    let mut catalog = MemCatalog::new();
    let coll = catalog.create_collection(ns());
    coll.create_index(IndexSpec::new("idx_email", &["email"]))
        .unwrap();
    coll.insert_document(doc(r#"{"_id":1,"email":"ada@x","region":"eu"}"#))
        .unwrap();
    coll.insert_document(doc(r#"{"_id":2,"email":"bob@x","region":"us"}"#))
        .unwrap();
    catalog
}

fn insert_req(pk: i64) -> RepairRequest {
    let mut req = RepairRequest::new(RepairAction::Insert, "idx_email");
    req.primary_key = Some(Value::Int(pk));
    req
}

fn key_of(email: &str) -> IndexKey {
    IndexKey::new(vec![Value::String(email.to_owned())])
}

// === Test: a dropped entry is reinserted, and reinserting again is refused ===
#[test]
fn test_insert_missing_entry() {
    let mut catalog = setup();
    let coll = catalog.collection_mut(&ns()).unwrap();
    assert!(coll.drop_index_entry("idx_email", &key_of("ada@x"), RecordId::new(1)));
    assert_eq!(coll.index("idx_email").unwrap().entry_count(), 1);

    let report = engine().repair(&catalog, &ns(), &insert_req(1)).unwrap();
    assert_eq!(report.keys_inserted, 1);
    assert_eq!(report.record_locator, Some(RecordId::new(1)));

    let index = catalog.collection_mut(&ns()).unwrap().index("idx_email").unwrap();
    assert_eq!(index.entry_count(), 2);

    // The entry is no longer missing, so the same request must now refuse.
    let err = engine().repair(&catalog, &ns(), &insert_req(1)).unwrap_err();
    assert_eq!(err, LoamError::IndexEntryAlreadyExists);
}

// === Test: insert for an unknown primary key reports the document missing ===
#[test]
fn test_insert_unknown_document() {
    let catalog = setup();
    let err = engine().repair(&catalog, &ns(), &insert_req(99)).unwrap_err();
    assert_eq!(err.code(), "DocumentNotFound");
}

// === Test: multikey documents need an explicit key, and it must match ===
#[test]
fn test_insert_multikey_disambiguation() {
    init_tracing();
    let mut catalog = MemCatalog::new();
    let coll = catalog.create_collection(ns());
    coll.create_index(IndexSpec::new("idx_tags", &["tags"])).unwrap();
    let loc = coll
        .insert_document(doc(r#"{"_id":1,"tags":["a","b","c"]}"#))
        .unwrap();
    assert!(coll.drop_index_entry("idx_tags", &key_of("b"), loc));

    let mut req = RepairRequest::new(RepairAction::Insert, "idx_tags");
    req.primary_key = Some(Value::Int(1));

    let err = engine().repair(&catalog, &ns(), &req).unwrap_err();
    assert_eq!(err, LoamError::AmbiguousMatch { match_count: 3 });

    // A key the document does not generate is refused outright.
    req.index_key = Some(key_of("z"));
    let err = engine().repair(&catalog, &ns(), &req).unwrap_err();
    assert_eq!(err, LoamError::KeyMismatch);

    // The explicit candidate resolves the ambiguity.
    req.index_key = Some(key_of("b"));
    let report = engine().repair(&catalog, &ns(), &req).unwrap();
    assert_eq!(report.keys_inserted, 1);
    assert_eq!(
        catalog
            .collection_mut(&ns())
            .unwrap()
            .index("idx_tags")
            .unwrap()
            .entry_count(),
        3
    );
}

// === Test: a sparse index generating nothing is reported, not "repaired" ===
#[test]
fn test_insert_no_keys_generated() {
    init_tracing();
    let mut catalog = MemCatalog::new();
    let coll = catalog.create_collection(ns());
    coll.create_index(IndexSpec::new("idx_opt", &["opt"]).sparse())
        .unwrap();
    coll.insert_document(doc(r#"{"_id":1,"name":"ada"}"#)).unwrap();

    let mut req = RepairRequest::new(RepairAction::Insert, "idx_opt");
    req.primary_key = Some(Value::Int(1));
    let err = engine().repair(&catalog, &ns(), &req).unwrap_err();
    assert_eq!(err, LoamError::NoKeysGenerated);
}

// === Test: an orphaned entry is removed by its explicit key ===
#[test]
fn test_remove_orphan_by_key() {
    let mut catalog = setup();
    let coll = catalog.collection_mut(&ns()).unwrap();
    let loc = coll.orphan_document(&Value::Int(1)).unwrap();
    assert_eq!(coll.index("idx_email").unwrap().entry_count(), 2);

    let mut req = RepairRequest::new(RepairAction::Remove, "idx_email");
    req.index_key = Some(key_of("ada@x"));

    let report = engine().repair(&catalog, &ns(), &req).unwrap();
    assert_eq!(report.keys_removed, 1);
    assert_eq!(report.record_locator, Some(loc));
    assert_eq!(
        catalog
            .collection_mut(&ns())
            .unwrap()
            .index("idx_email")
            .unwrap()
            .entry_count(),
        1
    );
}

// === Test: removing an entry whose document still exists is refused ===
#[test]
fn test_remove_refuses_live_document() {
    let catalog = setup();
    let mut req = RepairRequest::new(RepairAction::Remove, "idx_email");
    req.primary_key = Some(Value::Int(1));
    req.index_key = Some(key_of("ada@x"));

    let err = engine().repair(&catalog, &ns(), &req).unwrap_err();
    assert_eq!(err, LoamError::DocumentStillExists);
}

// === Test: several orphans under one key need a locator to disambiguate ===
#[test]
fn test_remove_ambiguous_orphans() {
    init_tracing();
    let mut catalog = MemCatalog::new();
    let coll = catalog.create_collection(ns());
    coll.create_index(IndexSpec::new("idx_email", &["email"]))
        .unwrap();
    let mut locators = Vec::new();
    for id in 1..=3 {
        coll.insert_document(doc(&format!(r#"{{"_id":{id},"email":"dup@x"}}"#)))
            .unwrap();
        locators.push(coll.orphan_document(&Value::Int(id)).unwrap());
    }

    let mut req = RepairRequest::new(RepairAction::Remove, "idx_email");
    req.index_key = Some(key_of("dup@x"));

    let err = engine().repair(&catalog, &ns(), &req).unwrap_err();
    assert_eq!(err, LoamError::AmbiguousMatch { match_count: 3 });

    // A locator that matches no entry under the key is an error, not a no-op.
    req.record_locator = Some(RecordId::new(999));
    let err = engine().repair(&catalog, &ns(), &req).unwrap_err();
    assert_eq!(err, LoamError::IndexEntryNotFound);

    // Pinning the exact entry removes only that one.
    req.record_locator = Some(locators[1]);
    let report = engine().repair(&catalog, &ns(), &req).unwrap();
    assert_eq!(report.keys_removed, 1);
    assert_eq!(report.record_locator, Some(locators[1]));
    assert_eq!(
        catalog
            .collection_mut(&ns())
            .unwrap()
            .index("idx_email")
            .unwrap()
            .entry_count(),
        2
    );
}

// === Test: removing a key with no matching entry reports it missing ===
#[test]
fn test_remove_nothing_matches() {
    let catalog = setup();
    let mut req = RepairRequest::new(RepairAction::Remove, "idx_email");
    req.index_key = Some(key_of("ghost@x"));
    let err = engine().repair(&catalog, &ns(), &req).unwrap_err();
    assert_eq!(err, LoamError::IndexEntryNotFound);
}

// === Test: without an explicit key the document derives the key to remove ===
#[test]
fn test_remove_derived_from_document() {
    let mut catalog = setup();
    let mut req = RepairRequest::new(RepairAction::Remove, "idx_email");
    req.primary_key = Some(Value::Int(2));

    let report = engine().repair(&catalog, &ns(), &req).unwrap();
    assert_eq!(report.keys_removed, 1);
    assert_eq!(report.record_locator, Some(RecordId::new(2)));
    assert_eq!(
        catalog
            .collection_mut(&ns())
            .unwrap()
            .index("idx_email")
            .unwrap()
            .entry_count(),
        1
    );

    // With the document gone and no key given there is nothing to derive.
    catalog
        .collection_mut(&ns())
        .unwrap()
        .orphan_document(&Value::Int(2));
    let err = engine().repair(&catalog, &ns(), &req).unwrap_err();
    assert_eq!(err, LoamError::CannotDetermineKey);
}

// === Test: dry run resolves and reports but never mutates ===
#[test]
fn test_dry_run_never_mutates() {
    let mut catalog = setup();
    let coll = catalog.collection_mut(&ns()).unwrap();
    assert!(coll.drop_index_entry("idx_email", &key_of("ada@x"), RecordId::new(1)));

    let mut req = insert_req(1);
    req.dry_run = true;
    let report = engine().repair(&catalog, &ns(), &req).unwrap();
    assert!(report.dry_run);
    assert_eq!(report.keys_inserted, 0);
    assert_eq!(report.would_insert, Some(key_of("ada@x")));
    assert_eq!(report.record_locator, Some(RecordId::new(1)));
    assert_eq!(
        catalog
            .collection_mut(&ns())
            .unwrap()
            .index("idx_email")
            .unwrap()
            .entry_count(),
        1
    );

    let loc = catalog
        .collection_mut(&ns())
        .unwrap()
        .orphan_document(&Value::Int(2))
        .unwrap();
    let mut req = RepairRequest::new(RepairAction::Remove, "idx_email");
    req.index_key = Some(key_of("bob@x"));
    req.dry_run = true;
    let report = engine().repair(&catalog, &ns(), &req).unwrap();
    assert!(report.dry_run);
    assert_eq!(report.keys_removed, 0);
    assert_eq!(report.would_remove, Some(key_of("bob@x")));
    assert_eq!(report.record_locator, Some(loc));
    assert_eq!(
        catalog
            .collection_mut(&ns())
            .unwrap()
            .index("idx_email")
            .unwrap()
            .entry_count(),
        1
    );
}

// === Test: write conflicts retry to completion under the default policy ===
#[test]
fn test_conflicts_retry_to_success() {
    let mut catalog = setup();
    let coll = catalog.collection_mut(&ns()).unwrap();
    assert!(coll.drop_index_entry("idx_email", &key_of("ada@x"), RecordId::new(1)));
    coll.index("idx_email").unwrap().inject_write_conflicts(3);

    let report = engine().repair(&catalog, &ns(), &insert_req(1)).unwrap();
    assert_eq!(report.keys_inserted, 1);
    assert_eq!(
        catalog
            .collection_mut(&ns())
            .unwrap()
            .index("idx_email")
            .unwrap()
            .entry_count(),
        2
    );
}

// === Test: a capped policy surfaces the conflict once attempts run out ===
#[test]
fn test_conflicts_exhaust_capped_policy() {
    let mut catalog = setup();
    let coll = catalog.collection_mut(&ns()).unwrap();
    assert!(coll.drop_index_entry("idx_email", &key_of("ada@x"), RecordId::new(1)));
    coll.index("idx_email").unwrap().inject_write_conflicts(5);

    let mut eng = IndexRepairEngine::new(Arc::new(LockRegistry::new()))
        .with_retry_policy(RetryPolicy::capped(2));
    let err = eng.repair(&catalog, &ns(), &insert_req(1)).unwrap_err();
    assert!(err.is_conflict());
    assert_eq!(
        catalog
            .collection_mut(&ns())
            .unwrap()
            .index("idx_email")
            .unwrap()
            .entry_count(),
        1
    );
}

// === Test: a unique-constraint violation propagates without retrying ===
#[test]
fn test_unique_violation_surfaces() {
    init_tracing();
    let mut catalog = MemCatalog::new();
    let coll = catalog.create_collection(ns());
    coll.create_index(IndexSpec::new("idx_email", &["email"]).unique())
        .unwrap();
    coll.insert_document(doc(r#"{"_id":1,"email":"a@x"}"#)).unwrap();

    // A second document with the same email got in while its entry is
    // missing; repairing it trips the constraint.
    coll.orphan_document(&Value::Int(1));
    coll.insert_document(doc(r#"{"_id":2,"email":"a@x"}"#)).unwrap();
    let entries_before = coll.index("idx_email").unwrap().entry_count();

    let mut req = RepairRequest::new(RepairAction::Insert, "idx_email");
    req.primary_key = Some(Value::Int(2));
    let err = engine().repair(&catalog, &ns(), &req).unwrap_err();
    assert_eq!(err.code(), "DuplicateKey");
    assert_eq!(
        catalog
            .collection_mut(&ns())
            .unwrap()
            .index("idx_email")
            .unwrap()
            .entry_count(),
        entries_before
    );
}

// === Test: resolution failures for node, collection and index ===
#[test]
fn test_resolution_failures() {
    let mut catalog = setup();

    let other = Namespace::new("app", "orders");
    let err = engine().repair(&catalog, &other, &insert_req(1)).unwrap_err();
    assert_eq!(err.code(), "CollectionNotFound");

    let mut req = RepairRequest::new(RepairAction::Insert, "idx_missing");
    req.primary_key = Some(Value::Int(1));
    let err = engine().repair(&catalog, &ns(), &req).unwrap_err();
    assert_eq!(err.code(), "IndexNotFound");

    catalog.set_refuses_writes(true);
    let err = engine().repair(&catalog, &ns(), &insert_req(1)).unwrap_err();
    assert_eq!(err.code(), "NotPrimary");
}

// === Test: a JSON request round-trips through the engine ===
#[test]
fn test_json_request_end_to_end() {
    let mut catalog = setup();
    let coll = catalog.collection_mut(&ns()).unwrap();
    assert!(coll.drop_index_entry("idx_email", &key_of("ada@x"), RecordId::new(1)));

    let req: RepairRequest = serde_json::from_str(
        r#"{"action":"insert","indexName":"idx_email","primaryKey":1,
            "shardKey":{"region":"eu"}}"#,
    )
    .unwrap();
    let report = engine().repair(&catalog, &ns(), &req).unwrap();
    let json = serde_json::to_string(&report).unwrap();
    assert!(json.contains("\"keysInserted\":1"));
    assert!(json.contains("\"recordLocator\":1"));
}

// === Test: concurrent repairs of one shard-key value fully serialize, so
//           exactly one wins and the other observes the repaired state ===
#[test]
fn test_concurrent_repair_serializes_on_shard_key() {
    let mut catalog = setup();
    let coll = catalog.collection_mut(&ns()).unwrap();
    assert!(coll.drop_index_entry("idx_email", &key_of("ada@x"), RecordId::new(1)));

    let locks = Arc::new(LockRegistry::new());
    let mut shard_key = Document::new();
    shard_key.insert("region".to_owned(), Value::String("eu".to_owned()));
    let mut req = insert_req(1);
    req.shard_key = Some(shard_key);

    let catalog = &catalog;
    let req = &req;
    let outcomes: Vec<_> = std::thread::scope(|s| {
        let handles: Vec<_> = (0..2)
            .map(|_| {
                let locks = Arc::clone(&locks);
                s.spawn(move || {
                    let mut eng = IndexRepairEngine::new(locks);
                    eng.repair(catalog, &ns(), req)
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let wins = outcomes.iter().filter(|r| r.is_ok()).count();
    assert_eq!(wins, 1);
    assert!(outcomes
        .iter()
        .any(|r| r.as_ref().err() == Some(&LoamError::IndexEntryAlreadyExists)));
    assert_eq!(locks.entry_count(), 0);
}
