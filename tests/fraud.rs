//! Fraud scoring engine tests

mod common;

use common::*;
use crosscheck::fraud;

const DAY: i64 = 86400;
const HOUR: i64 = 3600;

/// A quiet, established account: verified email, old account, old payment
/// method, modest order history.
fn quiet_setup(conn: &rusqlite::Connection) -> (Channel, Account, PaymentMethod, Product) {
    let channel = create_test_channel(conn, ProviderKind::Stripe);
    let account = create_test_account(conn, "calm@example.com", true, 90 * DAY);
    let pm = create_test_payment_method(conn, &account.id, 60 * DAY);
    let product = create_test_product(conn, &channel.id, "Mug", 1_500);
    (channel, account, pm, product)
}

#[test]
fn test_quiet_account_scores_low() {
    let conn = setup_test_db();
    let (channel, account, pm, product) = quiet_setup(&conn);

    let order = create_test_order(
        &conn, &channel.id, &account.id, "ORD-1", OrderStatus::Confirmed,
        Some(&pm.id), &product.id, 1, product.price_cents, HOUR,
    );

    let result = fraud::evaluate(&conn, &channel.id, &order.id).expect("Evaluation failed");

    assert_eq!(result.risk_score, 0);
    assert_eq!(result.risk_level, RiskLevel::Low);
    assert!(!result.should_reject);
    assert!(!result.should_hold);
    assert!(!result.should_flag);
    assert!(result.flags.is_empty());
}

#[test]
fn test_documented_high_risk_scenario() {
    // 6 orders in the last 24h, payment method added 10 minutes ago,
    // 12-hour-old account => 20 + 25 + 20 = 65 => high, hold, no reject.
    // The account email is verified so no UNVERIFIED_EMAIL points land.
    let conn = setup_test_db();
    let channel = create_test_channel(&conn, ProviderKind::Stripe);
    let account = create_test_account(&conn, "burst@example.com", true, 12 * HOUR);
    let pm = create_test_payment_method(&conn, &account.id, 600);
    let product = create_test_product(&conn, &channel.id, "Mug", 1_500);

    for n in 0..5 {
        create_test_order(
            &conn, &channel.id, &account.id, &format!("ORD-B{}", n), OrderStatus::Confirmed,
            Some(&pm.id), &product.id, 1, product.price_cents, (n + 1) * HOUR,
        );
    }
    let order = create_test_order(
        &conn, &channel.id, &account.id, "ORD-B5", OrderStatus::Pending,
        Some(&pm.id), &product.id, 1, product.price_cents, 60,
    );

    let result = fraud::evaluate(&conn, &channel.id, &order.id).expect("Evaluation failed");

    assert_eq!(result.risk_score, 65);
    assert_eq!(result.risk_level, RiskLevel::High);
    assert!(result.should_hold);
    assert!(!result.should_reject);
    assert!(result.flags.contains(&"HIGH_VELOCITY".to_string()));
    assert!(result.flags.contains(&"NEW_PAYMENT_METHOD".to_string()));
    assert!(result.flags.contains(&"NEW_ACCOUNT".to_string()));
}

#[test]
fn test_medium_velocity_band() {
    let conn = setup_test_db();
    let (channel, account, pm, product) = quiet_setup(&conn);

    // 4 orders in the window including the one under evaluation
    for n in 0..3 {
        create_test_order(
            &conn, &channel.id, &account.id, &format!("ORD-V{}", n), OrderStatus::Confirmed,
            Some(&pm.id), &product.id, 1, product.price_cents, (n + 2) * HOUR,
        );
    }
    let order = create_test_order(
        &conn, &channel.id, &account.id, "ORD-V3", OrderStatus::Pending,
        Some(&pm.id), &product.id, 1, product.price_cents, HOUR,
    );

    let result = fraud::evaluate(&conn, &channel.id, &order.id).expect("Evaluation failed");

    assert!(result.flags.contains(&"MEDIUM_VELOCITY".to_string()));
    assert!(!result.flags.contains(&"HIGH_VELOCITY".to_string()));
    assert_eq!(result.risk_score, 10);
}

#[test]
fn test_amount_anomaly_triggers_above_3x_average() {
    let conn = setup_test_db();
    let (channel, account, pm, product) = quiet_setup(&conn);

    // History: two orders at 1500 cents, placed outside the velocity window
    for n in 0..2 {
        create_test_order(
            &conn, &channel.id, &account.id, &format!("ORD-H{}", n), OrderStatus::Confirmed,
            Some(&pm.id), &product.id, 1, 1_500, (n + 2) * DAY,
        );
    }
    // Current order at 10x the historical average
    let order = create_test_order(
        &conn, &channel.id, &account.id, "ORD-H2", OrderStatus::Pending,
        Some(&pm.id), &product.id, 1, 15_000, HOUR,
    );

    let result = fraud::evaluate(&conn, &channel.id, &order.id).expect("Evaluation failed");

    assert!(result.flags.contains(&"UNUSUAL_AMOUNT".to_string()));
    assert_eq!(result.risk_score, 15);
}

#[test]
fn test_unverified_email_and_failures() {
    let conn = setup_test_db();
    let channel = create_test_channel(&conn, ProviderKind::Stripe);
    let account = create_test_account(&conn, "flaky@example.com", false, 90 * DAY);
    let pm = create_test_payment_method(&conn, &account.id, 60 * DAY);
    let product = create_test_product(&conn, &channel.id, "Mug", 1_500);

    // 3 failed orders outside the velocity window
    for n in 0..3 {
        create_test_order(
            &conn, &channel.id, &account.id, &format!("ORD-F{}", n), OrderStatus::Failed,
            Some(&pm.id), &product.id, 1, product.price_cents, (n + 2) * DAY,
        );
    }
    let order = create_test_order(
        &conn, &channel.id, &account.id, "ORD-F3", OrderStatus::Pending,
        Some(&pm.id), &product.id, 1, product.price_cents, HOUR,
    );

    let result = fraud::evaluate(&conn, &channel.id, &order.id).expect("Evaluation failed");

    // UNVERIFIED_EMAIL (15) + MULTIPLE_FAILURES (15); the failed orders'
    // amounts keep the average equal to the current total, so no anomaly
    assert!(result.flags.contains(&"UNVERIFIED_EMAIL".to_string()));
    assert!(result.flags.contains(&"MULTIPLE_FAILURES".to_string()));
    assert_eq!(result.risk_score, 30);
    assert_eq!(result.risk_level, RiskLevel::Low);
}

#[test]
fn test_product_risk_scores_per_occurrence() {
    let conn = setup_test_db();
    let channel = create_test_channel(&conn, ProviderKind::Stripe);
    let account = create_test_account(&conn, "big@example.com", true, 90 * DAY);
    let pm = create_test_payment_method(&conn, &account.id, 60 * DAY);
    let camera = create_test_product(&conn, &channel.id, "Camera", 89_900);
    let mug = create_test_product(&conn, &channel.id, "Mug", 1_500);

    let order = queries::create_order(
        &conn,
        &queries::CreateOrder {
            channel_id: &channel.id,
            account_id: &account.id,
            order_number: "ORD-RISK",
            status: OrderStatus::Pending,
            payment_method_id: Some(&pm.id),
            currency: "usd",
            items: vec![
                (camera.id.clone(), 1, camera.price_cents), // high-value: +5
                (camera.id.clone(), 1, camera.price_cents), // high-value: +5
                (mug.id.clone(), 12, mug.price_cents),      // large quantity: +10
            ],
            created_at: Some(now() - HOUR),
        },
    )
    .expect("Failed to create order");

    let result = fraud::evaluate(&conn, &channel.id, &order.id).expect("Evaluation failed");

    // 5 + 5 + 10, plus UNUSUAL_AMOUNT cannot trigger without history
    assert_eq!(result.risk_score, 20);
    // Flag set contains HIGH_VALUE_ITEM once despite two occurrences
    assert_eq!(
        result.flags.iter().filter(|f| *f == "HIGH_VALUE_ITEM").count(),
        1
    );
    assert!(result.flags.contains(&"LARGE_QUANTITY".to_string()));
}

#[test]
fn test_historical_fraud_layer_reads_prior_scores() {
    let conn = setup_test_db();
    let (channel, account, pm, product) = quiet_setup(&conn);

    let order = create_test_order(
        &conn, &channel.id, &account.id, "ORD-HIST", OrderStatus::Pending,
        Some(&pm.id), &product.id, 1, product.price_cents, HOUR,
    );

    // Seed history above the 60-point threshold
    for _ in 0..3 {
        queries::insert_fraud_score(
            &conn, &channel.id, &order.id, &account.id, 85, RiskLevel::Critical,
            &["HIGH_VELOCITY".to_string()], &["seed".to_string()],
        )
        .expect("Failed to insert score");
    }

    let result = fraud::evaluate(&conn, &channel.id, &order.id).expect("Evaluation failed");

    assert!(result.flags.contains(&"HISTORICAL_FRAUD".to_string()));
    assert_eq!(result.risk_score, 20);
}

#[test]
fn test_every_evaluation_appends_a_history_row() {
    let conn = setup_test_db();
    let (channel, account, pm, product) = quiet_setup(&conn);
    let order = create_test_order(
        &conn, &channel.id, &account.id, "ORD-APPEND", OrderStatus::Pending,
        Some(&pm.id), &product.id, 1, product.price_cents, HOUR,
    );

    fraud::evaluate(&conn, &channel.id, &order.id).expect("Evaluation failed");
    fraud::evaluate(&conn, &channel.id, &order.id).expect("Evaluation failed");

    let (scores, total) = queries::list_fraud_scores_paginated(
        &conn,
        &channel.id,
        &FraudScoreFilters {
            order_id: Some(order.id.clone()),
            ..Default::default()
        },
        50,
        0,
    )
    .expect("Query failed");

    assert_eq!(total, 2);
    assert_eq!(scores.len(), 2);
}

#[test]
fn test_batch_continues_past_failures() {
    let conn = setup_test_db();
    let (channel, account, pm, product) = quiet_setup(&conn);
    let order = create_test_order(
        &conn, &channel.id, &account.id, "ORD-BATCH", OrderStatus::Pending,
        Some(&pm.id), &product.id, 1, product.price_cents, HOUR,
    );

    let order_ids = vec![
        order.id.clone(),
        "cx_ord_00000000000000000000000000000000".to_string(), // absent
    ];
    let summary = fraud::evaluate_batch(&conn, &channel.id, &order_ids).expect("Batch failed");

    assert_eq!(summary.evaluated.len(), 1);
    assert_eq!(summary.failed.len(), 1);
    assert_eq!(summary.low, 1);
    assert_eq!(summary.failed[0].order_id, order_ids[1]);
}

#[test]
fn test_batch_aggregates_by_level() {
    let conn = setup_test_db();
    let channel = create_test_channel(&conn, ProviderKind::Stripe);
    let calm = create_test_account(&conn, "calm@example.com", true, 90 * DAY);
    let calm_pm = create_test_payment_method(&conn, &calm.id, 60 * DAY);
    let risky = create_test_account(&conn, "risky@example.com", false, 6 * HOUR);
    let risky_pm = create_test_payment_method(&conn, &risky.id, 600);
    let product = create_test_product(&conn, &channel.id, "Mug", 1_500);

    let quiet_order = create_test_order(
        &conn, &channel.id, &calm.id, "ORD-Q", OrderStatus::Pending,
        Some(&calm_pm.id), &product.id, 1, product.price_cents, HOUR,
    );
    // NEW_ACCOUNT (20) + UNVERIFIED_EMAIL (15) + NEW_PAYMENT_METHOD (25) = 60
    let risky_order = create_test_order(
        &conn, &channel.id, &risky.id, "ORD-R", OrderStatus::Pending,
        Some(&risky_pm.id), &product.id, 1, product.price_cents, HOUR,
    );

    let summary = fraud::evaluate_batch(
        &conn,
        &channel.id,
        &[quiet_order.id.clone(), risky_order.id.clone()],
    )
    .expect("Batch failed");

    assert_eq!(summary.evaluated.len(), 2);
    assert_eq!(summary.low, 1);
    assert_eq!(summary.high, 1);
    assert!(summary.failed.is_empty());
}
