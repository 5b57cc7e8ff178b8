//! Idempotency ledger tests

mod common;

use common::*;

fn test_channel(conn: &rusqlite::Connection) -> Channel {
    create_test_channel(conn, ProviderKind::Stripe)
}

#[test]
fn test_check_is_lookup_only() {
    let conn = setup_test_db();
    let channel = test_channel(&conn);
    let scope = idempotency::webhook_scope(ProviderKind::Stripe);

    let record =
        idempotency::check(&conn, &channel.id, &scope, "evt_1").expect("Check failed");
    assert!(record.is_none());

    // Still nothing stored after the lookup
    let record =
        idempotency::check(&conn, &channel.id, &scope, "evt_1").expect("Check failed");
    assert!(record.is_none());
}

#[test]
fn test_fresh_claim_then_complete_then_duplicate() {
    let conn = setup_test_db();
    let channel = test_channel(&conn);
    let scope = idempotency::webhook_scope(ProviderKind::Stripe);
    let hash = idempotency::request_hash(b"payload");

    let begin =
        idempotency::begin(&conn, &channel.id, &scope, "evt_1", &hash).expect("Begin failed");
    assert!(matches!(begin, Begin::Fresh));

    let record = idempotency::check(&conn, &channel.id, &scope, "evt_1")
        .expect("Check failed")
        .expect("Record missing");
    assert_eq!(record.status, IdempotencyStatus::InProgress);
    assert_eq!(record.request_hash, hash);

    let result = serde_json::json!({ "outcome": "created", "dispute_id": "cx_dsp_x" });
    idempotency::complete(&conn, &channel.id, &scope, "evt_1", &result).expect("Complete failed");

    // A second delivery sees the cached result
    let begin =
        idempotency::begin(&conn, &channel.id, &scope, "evt_1", &hash).expect("Begin failed");
    match begin {
        Begin::Duplicate(record) => {
            assert_eq!(record.status, IdempotencyStatus::Completed);
            assert_eq!(record.result, Some(result));
        }
        other => panic!("Expected Duplicate, got {:?}", other),
    }
}

#[test]
fn test_in_progress_claim_is_not_reclaimed() {
    let conn = setup_test_db();
    let channel = test_channel(&conn);
    let scope = idempotency::webhook_scope(ProviderKind::Stripe);
    let hash = idempotency::request_hash(b"payload");

    idempotency::begin(&conn, &channel.id, &scope, "evt_1", &hash).expect("Begin failed");

    // Concurrent delivery of the same event backs off
    let begin =
        idempotency::begin(&conn, &channel.id, &scope, "evt_1", &hash).expect("Begin failed");
    assert!(matches!(begin, Begin::InProgress));
}

#[test]
fn test_failed_claim_is_reclaimed_for_retry() {
    let conn = setup_test_db();
    let channel = test_channel(&conn);
    let scope = idempotency::webhook_scope(ProviderKind::Stripe);
    let hash = idempotency::request_hash(b"payload");

    idempotency::begin(&conn, &channel.id, &scope, "evt_1", &hash).expect("Begin failed");
    idempotency::fail(&conn, &channel.id, &scope, "evt_1").expect("Fail failed");

    // Retry wins the key back and runs the effects again
    let begin =
        idempotency::begin(&conn, &channel.id, &scope, "evt_1", &hash).expect("Begin failed");
    assert!(matches!(begin, Begin::Fresh));

    let record = idempotency::check(&conn, &channel.id, &scope, "evt_1")
        .expect("Check failed")
        .expect("Record missing");
    assert_eq!(record.status, IdempotencyStatus::InProgress);
}

#[test]
fn test_scopes_namespace_keys() {
    let conn = setup_test_db();
    let channel = test_channel(&conn);
    let hash = idempotency::request_hash(b"payload");

    let webhook_scope = idempotency::webhook_scope(ProviderKind::Stripe);
    let ingest_scope = idempotency::ingest_scope(ProviderKind::Stripe);

    let begin = idempotency::begin(&conn, &channel.id, &webhook_scope, "key_1", &hash)
        .expect("Begin failed");
    assert!(matches!(begin, Begin::Fresh));

    // Same key under a different scope is an independent claim
    let begin = idempotency::begin(&conn, &channel.id, &ingest_scope, "key_1", &hash)
        .expect("Begin failed");
    assert!(matches!(begin, Begin::Fresh));
}

#[test]
fn test_channels_namespace_keys() {
    let conn = setup_test_db();
    let first = test_channel(&conn);
    let second = create_test_channel(&conn, ProviderKind::Square);
    let scope = "webhook:stripe";
    let hash = idempotency::request_hash(b"payload");

    let begin =
        idempotency::begin(&conn, &first.id, scope, "evt_1", &hash).expect("Begin failed");
    assert!(matches!(begin, Begin::Fresh));

    let begin =
        idempotency::begin(&conn, &second.id, scope, "evt_1", &hash).expect("Begin failed");
    assert!(matches!(begin, Begin::Fresh));
}

#[test]
fn test_purge_removes_only_aged_completed_rows() {
    let conn = setup_test_db();
    let channel = test_channel(&conn);
    let scope = idempotency::webhook_scope(ProviderKind::Stripe);
    let hash = idempotency::request_hash(b"payload");

    idempotency::begin(&conn, &channel.id, &scope, "evt_done", &hash).expect("Begin failed");
    idempotency::complete(&conn, &channel.id, &scope, "evt_done", &serde_json::json!({}))
        .expect("Complete failed");
    idempotency::begin(&conn, &channel.id, &scope, "evt_live", &hash).expect("Begin failed");

    // Nothing is old enough yet
    let purged = queries::purge_old_idempotency_records(&conn, 30).expect("Purge failed");
    assert_eq!(purged, 0);

    // Backdate the completed row past the retention window
    conn.execute(
        "UPDATE idempotency_records SET updated_at = updated_at - 40 * 86400 WHERE idem_key = 'evt_done'",
        [],
    )
    .expect("Backdate failed");

    let purged = queries::purge_old_idempotency_records(&conn, 30).expect("Purge failed");
    assert_eq!(purged, 1);

    // IN_PROGRESS rows survive regardless of age
    let record = idempotency::check(&conn, &channel.id, &scope, "evt_live")
        .expect("Check failed")
        .expect("Record missing");
    assert_eq!(record.status, IdempotencyStatus::InProgress);
}

#[test]
fn test_ledger_guarded_ingest_batch_short_circuits() {
    let mut conn = setup_test_db();
    let channel = test_channel(&conn);
    let scope = idempotency::ingest_scope(ProviderKind::Stripe);
    let hash = idempotency::request_hash(b"batch-body");

    let batch = vec![IngestTransaction {
        provider_txn_id: "txn_1".to_string(),
        txn_type: "charge".to_string(),
        amount_cents: 1_000,
        fee_cents: 30,
        net_cents: 970,
        status: "available".to_string(),
        provider_data: None,
        provider_created_at: now(),
    }];

    // First delivery: claim, ingest, complete - one transaction scope
    {
        let tx = conn.transaction().expect("Failed to start transaction");
        assert!(matches!(
            idempotency::begin(&tx, &channel.id, &scope, "batch_1", &hash).expect("Begin failed"),
            Begin::Fresh
        ));
        for txn in &batch {
            queries::try_insert_provider_transaction(&tx, &channel.id, ProviderKind::Stripe, txn)
                .expect("Insert failed");
        }
        idempotency::complete(
            &tx, &channel.id, &scope, "batch_1",
            &serde_json::json!({ "inserted": 1, "duplicates": 0 }),
        )
        .expect("Complete failed");
        tx.commit().expect("Commit failed");
    }

    // Redelivery of the whole batch short-circuits on the ledger
    let begin = idempotency::begin(&conn, &channel.id, &scope, "batch_1", &hash)
        .expect("Begin failed");
    match begin {
        Begin::Duplicate(record) => {
            let cached = record.result.expect("Cached summary missing");
            assert_eq!(cached["inserted"], 1);
        }
        other => panic!("Expected Duplicate, got {:?}", other),
    }
}
