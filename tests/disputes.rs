//! Dispute state machine tests

mod common;

use common::*;

const DAY: i64 = 86400;

/// Channel + delivered order, the usual substrate for evidence work.
fn setup_with_order(conn: &rusqlite::Connection) -> (Channel, Order) {
    let channel = create_test_channel(conn, ProviderKind::Stripe);
    let account = create_test_account(conn, "buyer@example.com", true, 90 * DAY);
    let pm = create_test_payment_method(conn, &account.id, 60 * DAY);
    let product = create_test_product(conn, &channel.id, "Hoodie", 4_500);
    let order = create_test_order(
        conn, &channel.id, &account.id, "ORD-1001", OrderStatus::Delivered,
        Some(&pm.id), &product.id, 2, product.price_cents, 14 * DAY,
    );
    (channel, order)
}

#[test]
fn test_webhook_creates_dispute_in_open() {
    let mut conn = setup_test_db();
    let (channel, order) = setup_with_order(&conn);

    let event = dispute_created_event("evt_1", "dp_100", Some("ORD-1001"));
    let outcome = deliver_webhook(&mut conn, &channel.id, ProviderKind::Stripe, &event)
        .expect("Ledger should not short-circuit a fresh event");

    let dispute = match outcome {
        WebhookOutcome::Created(d) => d,
        other => panic!("Expected Created, got {:?}", other),
    };
    assert_eq!(dispute.status, DisputeStatus::Open);
    assert_eq!(dispute.provider_case_id, "dp_100");
    assert_eq!(dispute.order_id, Some(order.id));
    assert_eq!(dispute.amount_cents, 9_000);
    assert!(!dispute.needs_manual);

    // Creation journals exactly one WEBHOOK entry
    let entries = queries::count_timeline_entries(&conn, &dispute.id, Some(TimelineKind::Webhook))
        .expect("Count failed");
    assert_eq!(entries, 1);
}

#[test]
fn test_webhook_without_order_reference_leaves_order_unmatched() {
    let mut conn = setup_test_db();
    let (channel, _order) = setup_with_order(&conn);

    let event = dispute_created_event("evt_1", "dp_100", None);
    let outcome = deliver_webhook(&mut conn, &channel.id, ProviderKind::Stripe, &event).unwrap();

    match outcome {
        WebhookOutcome::Created(d) => assert_eq!(d.order_id, None),
        other => panic!("Expected Created, got {:?}", other),
    }
}

#[test]
fn test_replayed_event_id_creates_no_second_dispute() {
    let mut conn = setup_test_db();
    let (channel, _order) = setup_with_order(&conn);

    let event = dispute_created_event("evt_1", "dp_100", Some("ORD-1001"));
    deliver_webhook(&mut conn, &channel.id, ProviderKind::Stripe, &event)
        .expect("First delivery should apply");

    // Redelivery of the same event_id short-circuits through the ledger
    let replay = deliver_webhook(&mut conn, &channel.id, ProviderKind::Stripe, &event);
    assert!(replay.is_none(), "Replay must not re-apply the event");
    assert_eq!(count_disputes(&conn, &channel.id), 1);
}

#[test]
fn test_same_case_under_new_event_id_is_not_recreated() {
    let mut conn = setup_test_db();
    let (channel, _order) = setup_with_order(&conn);

    let first = dispute_created_event("evt_1", "dp_100", Some("ORD-1001"));
    deliver_webhook(&mut conn, &channel.id, ProviderKind::Stripe, &first).unwrap();

    // Fresh event id, same provider case: the unique case index holds
    let second = dispute_created_event("evt_2", "dp_100", Some("ORD-1001"));
    let outcome = deliver_webhook(&mut conn, &channel.id, ProviderKind::Stripe, &second).unwrap();

    assert!(matches!(outcome, WebhookOutcome::ExistingCase(_)));
    assert_eq!(count_disputes(&conn, &channel.id), 1);
}

#[test]
fn test_non_dispute_events_are_ignored() {
    let mut conn = setup_test_db();
    let (channel, _order) = setup_with_order(&conn);

    let event = WebhookEvent {
        event_id: "evt_other".to_string(),
        event_type: "payout.paid".to_string(),
        resource: serde_json::json!({ "id": "po_1" }),
    };
    let outcome = deliver_webhook(&mut conn, &channel.id, ProviderKind::Stripe, &event).unwrap();

    assert!(matches!(outcome, WebhookOutcome::Ignored));
    assert_eq!(count_disputes(&conn, &channel.id), 0);
}

#[test]
fn test_build_evidence_from_open() {
    let mut conn = setup_test_db();
    let (channel, order) = setup_with_order(&conn);
    queries::create_shipment(
        &conn, &order.id, "UPS", "1Z999", None, Some(now() - 10 * DAY),
    )
    .expect("Failed to create shipment");
    let dispute =
        create_test_dispute(&conn, &channel.id, ProviderKind::Stripe, "dp_100", Some(&order.id));

    let (dispute, pack) =
        disputes::build_evidence(&mut conn, &channel.id, &dispute.id).expect("Build failed");

    assert_eq!(dispute.status, DisputeStatus::EvidenceBuilding);
    assert_eq!(dispute.evidence_pack_id, Some(pack.id.clone()));
    assert_eq!(pack.status, EvidencePackStatus::Building);
    assert_eq!(pack.tracking_number.as_deref(), Some("1Z999"));
    assert!(pack.delivery_proof.as_deref().unwrap().starts_with("UPS, delivered"));
    assert!(pack.product_description.as_deref().unwrap().contains("Hoodie"));
    assert!(pack.customer_communication.is_empty());
    assert!(pack.attachments.is_empty());

    let entries = queries::count_timeline_entries(
        &conn, &dispute.id, Some(TimelineKind::EvidenceBuilding),
    )
    .expect("Count failed");
    assert_eq!(entries, 1);
}

#[test]
fn test_build_evidence_rejected_outside_open_states() {
    let mut conn = setup_test_db();
    let (channel, order) = setup_with_order(&conn);
    let dispute =
        create_test_dispute(&conn, &channel.id, ProviderKind::Stripe, "dp_100", Some(&order.id));

    // Walk to SUBMITTED
    disputes::build_evidence(&mut conn, &channel.id, &dispute.id).expect("Build failed");
    disputes::mark_evidence_ready(&mut conn, &channel.id, &dispute.id, "op").expect("Ready failed");
    disputes::apply_evidence_submitted(&mut conn, &channel.id, &dispute.id, "op", None)
        .expect("Submit failed");

    // The pack link alone forbids a rebuild
    let err = disputes::build_evidence(&mut conn, &channel.id, &dispute.id).unwrap_err();
    assert!(matches!(err, AppError::InvalidState(_)));
}

#[test]
fn test_build_evidence_requires_linked_order() {
    let mut conn = setup_test_db();
    let channel = create_test_channel(&conn, ProviderKind::Stripe);
    let dispute = create_test_dispute(&conn, &channel.id, ProviderKind::Stripe, "dp_100", None);

    let err = disputes::build_evidence(&mut conn, &channel.id, &dispute.id).unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));
}

#[test]
fn test_submit_before_ready_fails_without_submitted_entry() {
    let mut conn = setup_test_db();
    let (channel, order) = setup_with_order(&conn);
    let dispute =
        create_test_dispute(&conn, &channel.id, ProviderKind::Stripe, "dp_100", Some(&order.id));
    disputes::build_evidence(&mut conn, &channel.id, &dispute.id).expect("Build failed");

    // Pack is BUILDING, not READY
    let err = disputes::apply_evidence_submitted(&mut conn, &channel.id, &dispute.id, "op", None)
        .unwrap_err();
    assert!(matches!(err, AppError::EvidenceNotReady(_)));

    let refreshed = queries::get_dispute(&conn, &channel.id, &dispute.id)
        .expect("Query failed")
        .expect("Dispute vanished");
    assert_eq!(refreshed.status, DisputeStatus::EvidenceBuilding);

    let submitted_entries = queries::count_timeline_entries(
        &conn, &dispute.id, Some(TimelineKind::EvidenceSubmitted),
    )
    .expect("Count failed");
    assert_eq!(submitted_entries, 0, "A failed submit must not journal a SUBMITTED entry");
}

#[test]
fn test_full_lifecycle_journals_one_entry_per_transition() {
    let mut conn = setup_test_db();
    let (channel, order) = setup_with_order(&conn);
    queries::create_shipment(&conn, &order.id, "UPS", "1Z999", None, Some(now() - DAY))
        .expect("Failed to create shipment");
    let dispute =
        create_test_dispute(&conn, &channel.id, ProviderKind::Stripe, "dp_100", Some(&order.id));

    disputes::build_evidence(&mut conn, &channel.id, &dispute.id).expect("Build failed");
    disputes::update_evidence(
        &mut conn,
        &channel.id,
        &dispute.id,
        &UpdateEvidencePack {
            add_communication: vec![CommunicationEntry {
                from: "merchant".to_string(),
                message: "Order delivered on time".to_string(),
                sent_at: now(),
            }],
            ..Default::default()
        },
    )
    .expect("Update failed");
    disputes::mark_evidence_ready(&mut conn, &channel.id, &dispute.id, "op").expect("Ready failed");
    let (submitted, pack) =
        disputes::apply_evidence_submitted(&mut conn, &channel.id, &dispute.id, "op", None)
            .expect("Submit failed");

    assert_eq!(submitted.status, DisputeStatus::Submitted);
    assert_eq!(pack.status, EvidencePackStatus::Submitted);
    assert_eq!(pack.submitted_by.as_deref(), Some("op"));
    assert!(pack.submitted_at.is_some());

    let resolved = disputes::update_status(
        &mut conn, &channel.id, &dispute.id, DisputeStatus::Won, "op", None,
    )
    .expect("Resolve failed");
    assert_eq!(resolved.status, DisputeStatus::Won);

    // build + ready + submit + resolve = 4 transitions; update_evidence is
    // not a transition and must not journal
    let (entries, total) =
        queries::list_timeline_paginated(&conn, &dispute.id, 50, 0).expect("Query failed");
    assert_eq!(total, 4);
    let kinds: Vec<TimelineKind> = entries.iter().map(|e| e.kind).collect();
    assert_eq!(
        kinds,
        vec![
            TimelineKind::EvidenceBuilding,
            TimelineKind::StatusUpdate,
            TimelineKind::EvidenceSubmitted,
            TimelineKind::StatusUpdate,
        ]
    );
}

#[test]
fn test_update_status_rejects_illegal_jumps() {
    let mut conn = setup_test_db();
    let (channel, order) = setup_with_order(&conn);
    let dispute =
        create_test_dispute(&conn, &channel.id, ProviderKind::Stripe, "dp_100", Some(&order.id));

    // OPEN cannot jump straight to WON
    let err = disputes::update_status(
        &mut conn, &channel.id, &dispute.id, DisputeStatus::Won, "op", None,
    )
    .unwrap_err();
    assert!(matches!(err, AppError::InvalidState(_)));

    // Nor can a status outside the settable set be forced
    let err = disputes::update_status(
        &mut conn, &channel.id, &dispute.id, DisputeStatus::EvidenceReady, "op", None,
    )
    .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));

    // Unchanged after the rejections, with no journal entries
    let refreshed = queries::get_dispute(&conn, &channel.id, &dispute.id)
        .expect("Query failed")
        .expect("Dispute vanished");
    assert_eq!(refreshed.status, DisputeStatus::Open);
    assert_eq!(
        queries::count_timeline_entries(&conn, &dispute.id, None).expect("Count failed"),
        0
    );
}

#[test]
fn test_cancel_from_open_state() {
    let mut conn = setup_test_db();
    let (channel, order) = setup_with_order(&conn);
    let dispute =
        create_test_dispute(&conn, &channel.id, ProviderKind::Stripe, "dp_100", Some(&order.id));

    let canceled = disputes::update_status(
        &mut conn, &channel.id, &dispute.id, DisputeStatus::Canceled, "op", None,
    )
    .expect("Cancel failed");
    assert_eq!(canceled.status, DisputeStatus::Canceled);

    // Terminal: no further transitions, not even escalation
    let err = disputes::mark_needs_manual(
        &mut conn, &channel.id, &dispute.id, "looks odd", "op", None,
    )
    .unwrap_err();
    assert!(matches!(err, AppError::InvalidState(_)));
}

#[test]
fn test_needs_manual_is_a_flag_not_a_status() {
    let mut conn = setup_test_db();
    let (channel, order) = setup_with_order(&conn);
    let dispute =
        create_test_dispute(&conn, &channel.id, ProviderKind::Stripe, "dp_100", Some(&order.id));
    disputes::build_evidence(&mut conn, &channel.id, &dispute.id).expect("Build failed");

    let escalated = disputes::mark_needs_manual(
        &mut conn, &channel.id, &dispute.id, "conflicting shipment data", "op", None,
    )
    .expect("Escalation failed");

    assert!(escalated.needs_manual);
    // Primary status is unaffected by the escalation
    assert_eq!(escalated.status, DisputeStatus::EvidenceBuilding);

    let entries = queries::count_timeline_entries(
        &conn, &dispute.id, Some(TimelineKind::NeedsManual),
    )
    .expect("Count failed");
    assert_eq!(entries, 1);
}

#[test]
fn test_webhook_verdict_resolves_submitted_dispute() {
    let mut conn = setup_test_db();
    let (channel, order) = setup_with_order(&conn);
    let dispute =
        create_test_dispute(&conn, &channel.id, ProviderKind::Stripe, "dp_100", Some(&order.id));
    disputes::build_evidence(&mut conn, &channel.id, &dispute.id).expect("Build failed");
    disputes::mark_evidence_ready(&mut conn, &channel.id, &dispute.id, "op").expect("Ready failed");
    disputes::apply_evidence_submitted(&mut conn, &channel.id, &dispute.id, "op", None)
        .expect("Submit failed");

    let event = WebhookEvent {
        event_id: "evt_verdict".to_string(),
        event_type: "dispute.closed".to_string(),
        resource: serde_json::json!({ "id": "dp_100", "status": "won" }),
    };
    let outcome = deliver_webhook(&mut conn, &channel.id, ProviderKind::Stripe, &event).unwrap();

    match outcome {
        WebhookOutcome::Resolved(d) => assert_eq!(d.status, DisputeStatus::Won),
        other => panic!("Expected Resolved, got {:?}", other),
    }
}

#[test]
fn test_webhook_verdict_does_not_resolve_unsubmitted_dispute() {
    let mut conn = setup_test_db();
    let (channel, order) = setup_with_order(&conn);
    let dispute =
        create_test_dispute(&conn, &channel.id, ProviderKind::Stripe, "dp_100", Some(&order.id));

    let event = WebhookEvent {
        event_id: "evt_verdict".to_string(),
        event_type: "dispute.updated".to_string(),
        resource: serde_json::json!({ "id": "dp_100", "status": "lost" }),
    };
    let outcome = deliver_webhook(&mut conn, &channel.id, ProviderKind::Stripe, &event).unwrap();

    // Local state is authoritative: the snapshot is journaled, the OPEN
    // dispute is not silently resolved
    assert!(matches!(outcome, WebhookOutcome::Updated(_)));
    let refreshed = queries::get_dispute(&conn, &channel.id, &dispute.id)
        .expect("Query failed")
        .expect("Dispute vanished");
    assert_eq!(refreshed.status, DisputeStatus::Open);
    assert!(refreshed.last_provider_update_at.is_some());
}

#[test]
fn test_evidence_required_webhook_advances_open_dispute() {
    let mut conn = setup_test_db();
    let (channel, order) = setup_with_order(&conn);
    let dispute =
        create_test_dispute(&conn, &channel.id, ProviderKind::Stripe, "dp_100", Some(&order.id));

    let deadline = now() + 7 * DAY;
    let event = WebhookEvent {
        event_id: "evt_er".to_string(),
        event_type: "dispute.evidence_required".to_string(),
        resource: serde_json::json!({ "id": "dp_100", "evidence_due_by": deadline }),
    };
    deliver_webhook(&mut conn, &channel.id, ProviderKind::Stripe, &event).unwrap();

    let refreshed = queries::get_dispute(&conn, &channel.id, &dispute.id)
        .expect("Query failed")
        .expect("Dispute vanished");
    assert_eq!(refreshed.status, DisputeStatus::EvidenceRequired);
    assert_eq!(refreshed.evidence_deadline, Some(deadline));

    // Evidence can still be built from EVIDENCE_REQUIRED
    let (built, _) =
        disputes::build_evidence(&mut conn, &channel.id, &dispute.id).expect("Build failed");
    assert_eq!(built.status, DisputeStatus::EvidenceBuilding);
}

#[test]
fn test_sync_refreshes_metadata_but_never_status() {
    let mut conn = setup_test_db();
    let (channel, order) = setup_with_order(&conn);
    let dispute =
        create_test_dispute(&conn, &channel.id, ProviderKind::Stripe, "dp_100", Some(&order.id));

    // Provider already shows a verdict; the local OPEN status must hold
    let case = crosscheck::providers::ProviderCase {
        provider_case_id: "dp_100".to_string(),
        status: "won".to_string(),
        amount_cents: Some(9_000),
        currency: Some("usd".to_string()),
        evidence_due_by: Some(now() + 5 * DAY),
        raw: serde_json::json!({ "id": "dp_100", "status": "won" }),
    };
    let synced = disputes::record_sync(&mut conn, &channel.id, &dispute.id, &case)
        .expect("Sync failed");

    assert_eq!(synced.status, DisputeStatus::Open);
    assert!(synced.last_provider_update_at.is_some());
    assert_eq!(synced.evidence_deadline, case.evidence_due_by);

    let entries = queries::count_timeline_entries(&conn, &dispute.id, Some(TimelineKind::Sync))
        .expect("Count failed");
    assert_eq!(entries, 1);
}

#[test]
fn test_update_evidence_rejected_once_ready() {
    let mut conn = setup_test_db();
    let (channel, order) = setup_with_order(&conn);
    let dispute =
        create_test_dispute(&conn, &channel.id, ProviderKind::Stripe, "dp_100", Some(&order.id));
    disputes::build_evidence(&mut conn, &channel.id, &dispute.id).expect("Build failed");
    disputes::mark_evidence_ready(&mut conn, &channel.id, &dispute.id, "op").expect("Ready failed");

    let err = disputes::update_evidence(
        &mut conn,
        &channel.id,
        &dispute.id,
        &UpdateEvidencePack {
            tracking_number: Some("LATE-EDIT".to_string()),
            ..Default::default()
        },
    )
    .unwrap_err();
    assert!(matches!(err, AppError::InvalidState(_)));
}
