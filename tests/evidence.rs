//! Evidence pack builder and recommendation tests

mod common;

use common::*;

const DAY: i64 = 86400;

fn setup_dispute_with_shipment(
    conn: &rusqlite::Connection,
    delivered: bool,
) -> (Channel, Dispute) {
    let channel = create_test_channel(conn, ProviderKind::Stripe);
    let account = create_test_account(conn, "buyer@example.com", true, 90 * DAY);
    let pm = create_test_payment_method(conn, &account.id, 60 * DAY);
    let hoodie = create_test_product(conn, &channel.id, "Hoodie", 4_500);
    let order = create_test_order(
        conn, &channel.id, &account.id, "ORD-1001", OrderStatus::Delivered,
        Some(&pm.id), &hoodie.id, 2, hoodie.price_cents, 14 * DAY,
    );
    queries::create_shipment(
        conn,
        &order.id,
        "UPS",
        "1Z999AA10123456784",
        Some("https://track.example/1Z999AA10123456784"),
        delivered.then(|| now() - 10 * DAY),
    )
    .expect("Failed to create shipment");
    let dispute =
        create_test_dispute(conn, &channel.id, ProviderKind::Stripe, "dp_100", Some(&order.id));
    (channel, dispute)
}

#[test]
fn test_builder_synthesizes_from_order_and_shipment() {
    let mut conn = setup_test_db();
    let (channel, dispute) = setup_dispute_with_shipment(&conn, true);

    let (_, pack) =
        disputes::build_evidence(&mut conn, &channel.id, &dispute.id).expect("Build failed");

    assert_eq!(pack.tracking_number.as_deref(), Some("1Z999AA10123456784"));
    assert_eq!(
        pack.tracking_url.as_deref(),
        Some("https://track.example/1Z999AA10123456784")
    );
    let proof = pack.delivery_proof.as_deref().expect("Delivery proof missing");
    assert!(proof.starts_with("UPS, delivered "));
    assert_eq!(
        pack.product_description.as_deref(),
        Some("2x Hoodie (45.00 usd)")
    );
    assert!(!pack.refund_policy.is_empty());
    assert!(!pack.terms_of_service.is_empty());
}

#[test]
fn test_builder_without_delivery_leaves_proof_empty() {
    let mut conn = setup_test_db();
    let (channel, dispute) = setup_dispute_with_shipment(&conn, false);

    let (_, pack) =
        disputes::build_evidence(&mut conn, &channel.id, &dispute.id).expect("Build failed");

    assert!(pack.tracking_number.is_some());
    assert_eq!(pack.delivery_proof, None);
}

#[test]
fn test_builder_uses_most_recent_shipment() {
    let mut conn = setup_test_db();
    let channel = create_test_channel(&conn, ProviderKind::Stripe);
    let account = create_test_account(&conn, "buyer@example.com", true, 90 * DAY);
    let product = create_test_product(&conn, &channel.id, "Hoodie", 4_500);
    let order = create_test_order(
        &conn, &channel.id, &account.id, "ORD-1001", OrderStatus::Delivered,
        None, &product.id, 1, product.price_cents, 14 * DAY,
    );
    queries::create_shipment(&conn, &order.id, "USPS", "FIRST-ATTEMPT", None, None)
        .expect("Failed to create shipment");
    queries::create_shipment(&conn, &order.id, "UPS", "REDELIVERY", None, Some(now() - DAY))
        .expect("Failed to create shipment");
    let dispute =
        create_test_dispute(&conn, &channel.id, ProviderKind::Stripe, "dp_100", Some(&order.id));

    let (_, pack) =
        disputes::build_evidence(&mut conn, &channel.id, &dispute.id).expect("Build failed");

    assert_eq!(pack.tracking_number.as_deref(), Some("REDELIVERY"));
}

#[test]
fn test_operator_enrichment_appends_lists() {
    let mut conn = setup_test_db();
    let (channel, dispute) = setup_dispute_with_shipment(&conn, true);
    disputes::build_evidence(&mut conn, &channel.id, &dispute.id).expect("Build failed");

    disputes::update_evidence(
        &mut conn,
        &channel.id,
        &dispute.id,
        &UpdateEvidencePack {
            add_communication: vec![CommunicationEntry {
                from: "customer".to_string(),
                message: "Package arrived, thanks".to_string(),
                sent_at: now(),
            }],
            add_attachments: vec![Attachment {
                kind: AttachmentKind::Invoice,
                name: "invoice.pdf".to_string(),
                url: "https://files.example/invoice.pdf".to_string(),
            }],
            ..Default::default()
        },
    )
    .expect("Update failed");

    let pack = disputes::update_evidence(
        &mut conn,
        &channel.id,
        &dispute.id,
        &UpdateEvidencePack {
            add_attachments: vec![Attachment {
                kind: AttachmentKind::Photo,
                name: "package.jpg".to_string(),
                url: "https://files.example/package.jpg".to_string(),
            }],
            ..Default::default()
        },
    )
    .expect("Update failed");

    assert_eq!(pack.customer_communication.len(), 1);
    assert_eq!(pack.attachments.len(), 2);
}

#[test]
fn test_recommendation_for_full_pack_is_challenge_high() {
    let mut conn = setup_test_db();
    let (channel, dispute) = setup_dispute_with_shipment(&conn, true);
    disputes::build_evidence(&mut conn, &channel.id, &dispute.id).expect("Build failed");

    let pack = disputes::update_evidence(
        &mut conn,
        &channel.id,
        &dispute.id,
        &UpdateEvidencePack {
            add_communication: vec![CommunicationEntry {
                from: "merchant".to_string(),
                message: "Shipped same day".to_string(),
                sent_at: now(),
            }],
            add_attachments: vec![
                Attachment {
                    kind: AttachmentKind::Photo,
                    name: "package.jpg".to_string(),
                    url: "https://files.example/package.jpg".to_string(),
                },
                Attachment {
                    kind: AttachmentKind::Invoice,
                    name: "invoice.pdf".to_string(),
                    url: "https://files.example/invoice.pdf".to_string(),
                },
            ],
            ..Default::default()
        },
    )
    .expect("Update failed");

    let rec = disputes::evidence::recommend(&pack);
    // 30 + 30 + 20 + 10 + 10
    assert_eq!(rec.strength, 100);
    assert_eq!(rec.action, RecommendedAction::Challenge);
    assert_eq!(rec.confidence, RecommendationConfidence::High);
}

#[test]
fn test_recommendation_without_shipment_facts_is_accept() {
    let mut conn = setup_test_db();
    let channel = create_test_channel(&conn, ProviderKind::Stripe);
    let account = create_test_account(&conn, "buyer@example.com", true, 90 * DAY);
    let product = create_test_product(&conn, &channel.id, "Hoodie", 4_500);
    let order = create_test_order(
        &conn, &channel.id, &account.id, "ORD-1001", OrderStatus::Confirmed,
        None, &product.id, 1, product.price_cents, DAY,
    );
    let dispute =
        create_test_dispute(&conn, &channel.id, ProviderKind::Stripe, "dp_100", Some(&order.id));

    // No shipment exists; the pack carries only boilerplate
    let (_, pack) =
        disputes::build_evidence(&mut conn, &channel.id, &dispute.id).expect("Build failed");

    let rec = disputes::evidence::recommend(&pack);
    assert_eq!(rec.strength, 0);
    assert_eq!(rec.action, RecommendedAction::Accept);
}
