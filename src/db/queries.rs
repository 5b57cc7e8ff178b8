use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::Result;
use crate::id::EntityType;
use crate::models::*;
use crate::providers::ProviderKind;

use super::from_row::{
    query_all, query_one, ACCOUNT_COLS, CHANNEL_COLS, DISCREPANCY_COLS, DISPUTE_COLS,
    EVIDENCE_PACK_COLS, FRAUD_SCORE_COLS, FromRow, IDEMPOTENCY_COLS, ORDER_COLS, ORDER_ITEM_COLS,
    PAYMENT_METHOD_COLS, PAYOUT_COLS, PROVIDER_TXN_COLS, SHIPMENT_COLS, TIMELINE_COLS,
};

fn now() -> i64 {
    Utc::now().timestamp()
}

/// Render a `status IN (...)` placeholder list for guarded transitions.
fn status_in_clause(count: usize) -> String {
    let marks = vec!["?"; count].join(", ");
    format!("status IN ({})", marks)
}

// ============ Channels ============

pub fn create_channel(conn: &Connection, input: &CreateChannel) -> Result<Channel> {
    let id = EntityType::Channel.gen_id();
    let now = now();

    conn.execute(
        "INSERT INTO channels (id, name, provider, webhook_secret, provider_api_key, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            &id,
            &input.name,
            input.provider.as_ref(),
            &input.webhook_secret,
            &input.provider_api_key,
            now
        ],
    )?;

    Ok(Channel {
        id,
        name: input.name.clone(),
        provider: input.provider,
        webhook_secret: input.webhook_secret.clone(),
        provider_api_key: input.provider_api_key.clone(),
        created_at: now,
    })
}

pub fn get_channel_by_id(conn: &Connection, id: &str) -> Result<Option<Channel>> {
    query_one(
        conn,
        &format!("SELECT {} FROM channels WHERE id = ?1", CHANNEL_COLS),
        &[&id],
    )
}

pub fn list_channels_paginated(
    conn: &Connection,
    limit: i64,
    offset: i64,
) -> Result<(Vec<Channel>, i64)> {
    let total: i64 = conn.query_row("SELECT COUNT(*) FROM channels", [], |row| row.get(0))?;
    let items = query_all(
        conn,
        &format!(
            "SELECT {} FROM channels ORDER BY created_at DESC LIMIT ?1 OFFSET ?2",
            CHANNEL_COLS
        ),
        &[&limit, &offset],
    )?;
    Ok((items, total))
}

// ============ Signal Store (collaborator inputs, read-mostly) ============

pub fn create_account(conn: &Connection, input: &CreateAccount) -> Result<Account> {
    let id = EntityType::Account.gen_id();
    let created_at = input.created_at.unwrap_or_else(now);
    let email = input.email.trim().to_lowercase();

    conn.execute(
        "INSERT INTO accounts (id, email, email_verified, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![&id, &email, input.email_verified as i32, created_at],
    )?;

    Ok(Account {
        id,
        email,
        email_verified: input.email_verified,
        created_at,
    })
}

pub fn get_account_by_id(conn: &Connection, id: &str) -> Result<Option<Account>> {
    query_one(
        conn,
        &format!("SELECT {} FROM accounts WHERE id = ?1", ACCOUNT_COLS),
        &[&id],
    )
}

pub fn create_payment_method(
    conn: &Connection,
    account_id: &str,
    kind: &str,
    created_at: Option<i64>,
) -> Result<PaymentMethod> {
    let id = EntityType::PaymentMethod.gen_id();
    let created_at = created_at.unwrap_or_else(now);

    conn.execute(
        "INSERT INTO payment_methods (id, account_id, kind, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![&id, account_id, kind, created_at],
    )?;

    Ok(PaymentMethod {
        id,
        account_id: account_id.to_string(),
        kind: kind.to_string(),
        created_at,
    })
}

pub fn get_payment_method_by_id(conn: &Connection, id: &str) -> Result<Option<PaymentMethod>> {
    query_one(
        conn,
        &format!("SELECT {} FROM payment_methods WHERE id = ?1", PAYMENT_METHOD_COLS),
        &[&id],
    )
}

pub fn create_product(
    conn: &Connection,
    channel_id: &str,
    name: &str,
    price_cents: i64,
) -> Result<Product> {
    let id = EntityType::Product.gen_id();
    let now = now();

    conn.execute(
        "INSERT INTO products (id, channel_id, name, price_cents, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![&id, channel_id, name, price_cents, now],
    )?;

    Ok(Product {
        id,
        channel_id: channel_id.to_string(),
        name: name.to_string(),
        price_cents,
        created_at: now,
    })
}

/// Insert an order row with its line items. Fixture/seed path; production
/// orders arrive from the order subsystem.
pub struct CreateOrder<'a> {
    pub channel_id: &'a str,
    pub account_id: &'a str,
    pub order_number: &'a str,
    pub status: OrderStatus,
    pub payment_method_id: Option<&'a str>,
    pub currency: &'a str,
    /// (product_id, quantity, unit_price_cents)
    pub items: Vec<(String, i64, i64)>,
    pub created_at: Option<i64>,
}

pub fn create_order(conn: &Connection, input: &CreateOrder) -> Result<Order> {
    let id = EntityType::Order.gen_id();
    let created_at = input.created_at.unwrap_or_else(now);
    let total_cents: i64 = input.items.iter().map(|(_, qty, unit)| qty * unit).sum();

    conn.execute(
        "INSERT INTO orders (id, channel_id, account_id, order_number, status, payment_method_id, total_cents, currency, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            &id,
            input.channel_id,
            input.account_id,
            input.order_number,
            input.status.as_ref(),
            input.payment_method_id,
            total_cents,
            input.currency,
            created_at
        ],
    )?;

    for (product_id, quantity, unit_price_cents) in &input.items {
        conn.execute(
            "INSERT INTO order_items (id, order_id, product_id, quantity, unit_price_cents)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                EntityType::OrderItem.gen_id(),
                &id,
                product_id,
                quantity,
                unit_price_cents
            ],
        )?;
    }

    Ok(Order {
        id,
        channel_id: input.channel_id.to_string(),
        account_id: input.account_id.to_string(),
        order_number: input.order_number.to_string(),
        status: input.status,
        payment_method_id: input.payment_method_id.map(String::from),
        total_cents,
        currency: input.currency.to_string(),
        created_at,
    })
}

pub fn get_order_by_id(conn: &Connection, id: &str) -> Result<Option<Order>> {
    query_one(
        conn,
        &format!("SELECT {} FROM orders WHERE id = ?1", ORDER_COLS),
        &[&id],
    )
}

pub fn get_order_by_number(
    conn: &Connection,
    channel_id: &str,
    order_number: &str,
) -> Result<Option<Order>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM orders WHERE channel_id = ?1 AND order_number = ?2",
            ORDER_COLS
        ),
        &[&channel_id, &order_number],
    )
}

pub fn get_order_items(conn: &Connection, order_id: &str) -> Result<Vec<OrderItem>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM order_items WHERE order_id = ?1 ORDER BY id",
            ORDER_ITEM_COLS
        ),
        &[&order_id],
    )
}

/// Order lines joined with product names, for evidence descriptions.
/// Returns (product name, quantity, unit_price_cents) per line.
pub fn get_order_lines(conn: &Connection, order_id: &str) -> Result<Vec<(String, i64, i64)>> {
    let mut stmt = conn.prepare(
        "SELECT p.name, i.quantity, i.unit_price_cents
         FROM order_items i JOIN products p ON p.id = i.product_id
         WHERE i.order_id = ?1 ORDER BY i.id",
    )?;
    let lines = stmt
        .query_map(params![order_id], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(lines)
}

pub fn create_shipment(
    conn: &Connection,
    order_id: &str,
    carrier: &str,
    tracking_number: &str,
    tracking_url: Option<&str>,
    delivered_at: Option<i64>,
) -> Result<Shipment> {
    let id = EntityType::Shipment.gen_id();
    let now = now();

    conn.execute(
        "INSERT INTO shipments (id, order_id, carrier, tracking_number, tracking_url, delivered_at, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![&id, order_id, carrier, tracking_number, tracking_url, delivered_at, now],
    )?;

    Ok(Shipment {
        id,
        order_id: order_id.to_string(),
        carrier: carrier.to_string(),
        tracking_number: tracking_number.to_string(),
        tracking_url: tracking_url.map(String::from),
        delivered_at,
        created_at: now,
    })
}

/// The newest shipment for an order, if any. Evidence packs cite this one.
pub fn get_latest_shipment(conn: &Connection, order_id: &str) -> Result<Option<Shipment>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM shipments WHERE order_id = ?1 ORDER BY created_at DESC, rowid DESC LIMIT 1",
            SHIPMENT_COLS
        ),
        &[&order_id],
    )
}

pub fn create_payout(
    conn: &Connection,
    channel_id: &str,
    provider: ProviderKind,
    provider_payout_id: &str,
    amount_cents: i64,
    status: &str,
    arrived_at: Option<i64>,
) -> Result<Payout> {
    let id = EntityType::Payout.gen_id();
    let now = now();

    conn.execute(
        "INSERT INTO payouts (id, channel_id, provider, provider_payout_id, amount_cents, status, arrived_at, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            &id,
            channel_id,
            provider.as_ref(),
            provider_payout_id,
            amount_cents,
            status,
            arrived_at,
            now
        ],
    )?;

    Ok(Payout {
        id,
        channel_id: channel_id.to_string(),
        provider,
        provider_payout_id: provider_payout_id.to_string(),
        amount_cents,
        status: status.to_string(),
        arrived_at,
        created_at: now,
    })
}

pub fn get_payout_by_id(conn: &Connection, id: &str) -> Result<Option<Payout>> {
    query_one(
        conn,
        &format!("SELECT {} FROM payouts WHERE id = ?1", PAYOUT_COLS),
        &[&id],
    )
}

// ============ Fraud Signals (read-only aggregates) ============

/// Orders placed by the account since `since` (inclusive of the current
/// order, which is already stored when scoring runs).
pub fn count_orders_since(conn: &Connection, account_id: &str, since: i64) -> Result<i64> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM orders WHERE account_id = ?1 AND created_at >= ?2",
        params![account_id, since],
        |row| row.get(0),
    )?;
    Ok(count)
}

/// Average historical order value, excluding the order under evaluation.
/// Returns None when the account has no other orders.
pub fn avg_order_total_excluding(
    conn: &Connection,
    account_id: &str,
    order_id: &str,
) -> Result<Option<f64>> {
    let avg: Option<f64> = conn.query_row(
        "SELECT AVG(total_cents) FROM orders WHERE account_id = ?1 AND id != ?2",
        params![account_id, order_id],
        |row| row.get(0),
    )?;
    Ok(avg)
}

pub fn count_failed_orders(conn: &Connection, account_id: &str) -> Result<i64> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM orders WHERE account_id = ?1 AND status = 'failed'",
        params![account_id],
        |row| row.get(0),
    )?;
    Ok(count)
}

/// Average of the account's most recent `limit` fraud scores.
/// Returns None when there is no history.
pub fn avg_recent_fraud_scores(
    conn: &Connection,
    account_id: &str,
    limit: i64,
) -> Result<Option<f64>> {
    let avg: Option<f64> = conn.query_row(
        "SELECT AVG(risk_score) FROM (
             SELECT risk_score FROM fraud_scores
             WHERE account_id = ?1 ORDER BY created_at DESC, rowid DESC LIMIT ?2
         )",
        params![account_id, limit],
        |row| row.get(0),
    )?;
    Ok(avg)
}

// ============ Fraud Scores ============

/// Append one immutable evaluation row. Rows are never updated.
pub fn insert_fraud_score(
    conn: &Connection,
    channel_id: &str,
    order_id: &str,
    account_id: &str,
    risk_score: i64,
    risk_level: RiskLevel,
    flags: &[String],
    reasons: &[String],
) -> Result<FraudScore> {
    let id = EntityType::FraudScore.gen_id();
    let now = now();
    let flags_json = serde_json::to_string(flags)?;
    let reasons_json = serde_json::to_string(reasons)?;

    conn.execute(
        "INSERT INTO fraud_scores (id, channel_id, order_id, account_id, risk_score, risk_level, flags, reasons, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            &id,
            channel_id,
            order_id,
            account_id,
            risk_score,
            risk_level.as_ref(),
            &flags_json,
            &reasons_json,
            now
        ],
    )?;

    Ok(FraudScore {
        id,
        channel_id: channel_id.to_string(),
        order_id: order_id.to_string(),
        account_id: account_id.to_string(),
        risk_score,
        risk_level,
        flags: flags.to_vec(),
        reasons: reasons.to_vec(),
        created_at: now,
    })
}

pub fn list_fraud_scores_paginated(
    conn: &Connection,
    channel_id: &str,
    filters: &FraudScoreFilters,
    limit: i64,
    offset: i64,
) -> Result<(Vec<FraudScore>, i64)> {
    let build_filter_params = || -> Vec<Box<dyn rusqlite::ToSql>> {
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(channel_id.to_string())];
        if let Some(ref v) = filters.order_id {
            params.push(Box::new(v.clone()));
        }
        if let Some(ref v) = filters.account_id {
            params.push(Box::new(v.clone()));
        }
        if let Some(v) = filters.risk_level {
            params.push(Box::new(v.as_ref().to_string()));
        }
        params
    };

    let mut where_clause = String::from("WHERE channel_id = ?");
    if filters.order_id.is_some() {
        where_clause.push_str(" AND order_id = ?");
    }
    if filters.account_id.is_some() {
        where_clause.push_str(" AND account_id = ?");
    }
    if filters.risk_level.is_some() {
        where_clause.push_str(" AND risk_level = ?");
    }

    let count_sql = format!("SELECT COUNT(*) FROM fraud_scores {}", where_clause);
    let filter_params = build_filter_params();
    let filter_refs: Vec<&dyn rusqlite::ToSql> = filter_params.iter().map(|b| b.as_ref()).collect();
    let total: i64 = conn.query_row(&count_sql, filter_refs.as_slice(), |row| row.get(0))?;

    let select_sql = format!(
        "SELECT {} FROM fraud_scores {} ORDER BY created_at DESC, rowid DESC LIMIT ? OFFSET ?",
        FRAUD_SCORE_COLS, where_clause
    );
    let mut select_params = build_filter_params();
    select_params.push(Box::new(limit));
    select_params.push(Box::new(offset));
    let select_refs: Vec<&dyn rusqlite::ToSql> = select_params.iter().map(|b| b.as_ref()).collect();

    let mut stmt = conn.prepare(&select_sql)?;
    let items = stmt
        .query_map(select_refs.as_slice(), FraudScore::from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok((items, total))
}

// ============ Disputes ============

/// Create a dispute in OPEN. Returns None if a row for
/// (provider, provider_case_id) already exists - the unique index is the
/// backstop against double-creation across distinct event ids.
pub fn try_create_dispute(conn: &Connection, input: &CreateDispute) -> Result<Option<Dispute>> {
    let id = EntityType::Dispute.gen_id();
    let now = now();

    let affected = conn.execute(
        "INSERT INTO disputes (id, channel_id, provider, provider_case_id, order_id, status, reason, amount_cents, currency, evidence_deadline, needs_manual, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 0, ?11, ?11)
         ON CONFLICT(provider, provider_case_id) DO NOTHING",
        params![
            &id,
            &input.channel_id,
            input.provider.as_ref(),
            &input.provider_case_id,
            &input.order_id,
            DisputeStatus::Open.as_ref(),
            &input.reason,
            input.amount_cents,
            &input.currency,
            input.evidence_deadline,
            now
        ],
    )?;

    if affected == 0 {
        return Ok(None);
    }

    get_dispute_by_id(conn, &id)
}

pub fn get_dispute_by_id(conn: &Connection, id: &str) -> Result<Option<Dispute>> {
    query_one(
        conn,
        &format!("SELECT {} FROM disputes WHERE id = ?1", DISPUTE_COLS),
        &[&id],
    )
}

/// Channel-scoped lookup for the operator surface.
pub fn get_dispute(conn: &Connection, channel_id: &str, id: &str) -> Result<Option<Dispute>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM disputes WHERE id = ?1 AND channel_id = ?2",
            DISPUTE_COLS
        ),
        &[&id, &channel_id],
    )
}

pub fn get_dispute_by_case(
    conn: &Connection,
    provider: ProviderKind,
    provider_case_id: &str,
) -> Result<Option<Dispute>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM disputes WHERE provider = ?1 AND provider_case_id = ?2",
            DISPUTE_COLS
        ),
        &[&provider.as_ref(), &provider_case_id],
    )
}

pub fn list_disputes_paginated(
    conn: &Connection,
    channel_id: &str,
    filters: &DisputeFilters,
    limit: i64,
    offset: i64,
) -> Result<(Vec<Dispute>, i64)> {
    let build_filter_params = || -> Vec<Box<dyn rusqlite::ToSql>> {
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(channel_id.to_string())];
        if let Some(v) = filters.status {
            params.push(Box::new(v.as_ref().to_string()));
        }
        if let Some(v) = filters.provider {
            params.push(Box::new(v.as_ref().to_string()));
        }
        if let Some(v) = filters.needs_manual {
            params.push(Box::new(v as i32));
        }
        params
    };

    let mut where_clause = String::from("WHERE channel_id = ?");
    if filters.status.is_some() {
        where_clause.push_str(" AND status = ?");
    }
    if filters.provider.is_some() {
        where_clause.push_str(" AND provider = ?");
    }
    if filters.needs_manual.is_some() {
        where_clause.push_str(" AND needs_manual = ?");
    }

    let count_sql = format!("SELECT COUNT(*) FROM disputes {}", where_clause);
    let filter_params = build_filter_params();
    let filter_refs: Vec<&dyn rusqlite::ToSql> = filter_params.iter().map(|b| b.as_ref()).collect();
    let total: i64 = conn.query_row(&count_sql, filter_refs.as_slice(), |row| row.get(0))?;

    let select_sql = format!(
        "SELECT {} FROM disputes {} ORDER BY created_at DESC LIMIT ? OFFSET ?",
        DISPUTE_COLS, where_clause
    );
    let mut select_params = build_filter_params();
    select_params.push(Box::new(limit));
    select_params.push(Box::new(offset));
    let select_refs: Vec<&dyn rusqlite::ToSql> = select_params.iter().map(|b| b.as_ref()).collect();

    let mut stmt = conn.prepare(&select_sql)?;
    let items = stmt
        .query_map(select_refs.as_slice(), Dispute::from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok((items, total))
}

pub fn get_dispute_stats(conn: &Connection, channel_id: &str) -> Result<DisputeStats> {
    let mut stmt = conn.prepare(
        "SELECT status, COUNT(*), COALESCE(SUM(amount_cents), 0)
         FROM disputes WHERE channel_id = ?1 GROUP BY status ORDER BY status",
    )?;
    let by_status = stmt
        .query_map(params![channel_id], |row| {
            let status: String = row.get(0)?;
            Ok((status, row.get::<_, i64>(1)?, row.get::<_, i64>(2)?))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?
        .into_iter()
        .filter_map(|(status, count, amount_cents)| {
            status.parse::<DisputeStatus>().ok().map(|status| DisputeStatusBucket {
                status,
                count,
                amount_cents,
            })
        })
        .collect::<Vec<_>>();

    let needs_manual_count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM disputes WHERE channel_id = ?1 AND needs_manual = 1",
        params![channel_id],
        |row| row.get(0),
    )?;

    let total_count = by_status.iter().map(|b| b.count).sum();
    let total_amount_cents = by_status.iter().map(|b| b.amount_cents).sum();

    Ok(DisputeStats {
        by_status,
        needs_manual_count,
        total_count,
        total_amount_cents,
    })
}

/// Status-guarded transition. Updates the dispute only if its current
/// status is in `from`, returning the updated row; None means the guard
/// failed (concurrent transition or illegal jump) and nothing changed.
pub fn transition_dispute_status(
    conn: &Connection,
    dispute_id: &str,
    from: &[DisputeStatus],
    to: DisputeStatus,
) -> Result<Option<Dispute>> {
    let sql = format!(
        "UPDATE disputes SET status = ?, updated_at = ? WHERE id = ? AND {} RETURNING {}",
        status_in_clause(from.len()),
        DISPUTE_COLS
    );

    let mut params: Vec<Box<dyn rusqlite::ToSql>> = vec![
        Box::new(to.as_ref().to_string()),
        Box::new(now()),
        Box::new(dispute_id.to_string()),
    ];
    for s in from {
        params.push(Box::new(s.as_ref().to_string()));
    }
    let refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|b| b.as_ref()).collect();

    conn.query_row(&sql, refs.as_slice(), Dispute::from_row)
        .optional()
        .map_err(Into::into)
}

pub fn link_evidence_pack(conn: &Connection, dispute_id: &str, pack_id: &str) -> Result<()> {
    conn.execute(
        "UPDATE disputes SET evidence_pack_id = ?1, updated_at = ?2 WHERE id = ?3",
        params![pack_id, now(), dispute_id],
    )?;
    Ok(())
}

pub fn set_dispute_needs_manual(conn: &Connection, dispute_id: &str) -> Result<Option<Dispute>> {
    let sql = format!(
        "UPDATE disputes SET needs_manual = 1, updated_at = ?1
         WHERE id = ?2 AND status NOT IN ('closed', 'duplicate', 'canceled') RETURNING {}",
        DISPUTE_COLS
    );
    conn.query_row(&sql, params![now(), dispute_id], Dispute::from_row)
        .optional()
        .map_err(Into::into)
}

pub fn set_dispute_deadline(
    conn: &Connection,
    dispute_id: &str,
    evidence_deadline: Option<i64>,
) -> Result<()> {
    conn.execute(
        "UPDATE disputes SET evidence_deadline = COALESCE(?1, evidence_deadline), updated_at = ?2
         WHERE id = ?3",
        params![evidence_deadline, now(), dispute_id],
    )?;
    Ok(())
}

pub fn set_dispute_provider_update(
    conn: &Connection,
    dispute_id: &str,
    last_provider_update_at: i64,
) -> Result<()> {
    conn.execute(
        "UPDATE disputes SET last_provider_update_at = ?1, updated_at = ?2 WHERE id = ?3",
        params![last_provider_update_at, now(), dispute_id],
    )?;
    Ok(())
}

pub fn set_dispute_last_error(
    conn: &Connection,
    dispute_id: &str,
    error: Option<&str>,
) -> Result<()> {
    conn.execute(
        "UPDATE disputes SET last_error = ?1, updated_at = ?2 WHERE id = ?3",
        params![error, now(), dispute_id],
    )?;
    Ok(())
}

// ============ Dispute Timeline ============

/// Append one journal entry. The timeline is append-only; there is no
/// update or delete counterpart by design of the audit trail.
pub fn append_timeline(
    conn: &Connection,
    dispute_id: &str,
    kind: TimelineKind,
    message: &str,
    meta: Option<&serde_json::Value>,
) -> Result<DisputeTimelineEntry> {
    let id = EntityType::TimelineEntry.gen_id();
    let now = now();
    let meta_json = meta.map(serde_json::Value::to_string);

    conn.execute(
        "INSERT INTO dispute_timeline (id, dispute_id, kind, message, meta, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![&id, dispute_id, kind.as_ref(), message, &meta_json, now],
    )?;

    Ok(DisputeTimelineEntry {
        id,
        dispute_id: dispute_id.to_string(),
        kind,
        message: message.to_string(),
        meta: meta.cloned(),
        created_at: now,
    })
}

pub fn list_timeline_paginated(
    conn: &Connection,
    dispute_id: &str,
    limit: i64,
    offset: i64,
) -> Result<(Vec<DisputeTimelineEntry>, i64)> {
    let total: i64 = conn.query_row(
        "SELECT COUNT(*) FROM dispute_timeline WHERE dispute_id = ?1",
        params![dispute_id],
        |row| row.get(0),
    )?;
    let items = query_all(
        conn,
        &format!(
            "SELECT {} FROM dispute_timeline WHERE dispute_id = ?1 ORDER BY created_at, rowid LIMIT ?2 OFFSET ?3",
            TIMELINE_COLS
        ),
        &[&dispute_id, &limit, &offset],
    )?;
    Ok((items, total))
}

pub fn count_timeline_entries(
    conn: &Connection,
    dispute_id: &str,
    kind: Option<TimelineKind>,
) -> Result<i64> {
    let count = match kind {
        Some(kind) => conn.query_row(
            "SELECT COUNT(*) FROM dispute_timeline WHERE dispute_id = ?1 AND kind = ?2",
            params![dispute_id, kind.as_ref()],
            |row| row.get(0),
        )?,
        None => conn.query_row(
            "SELECT COUNT(*) FROM dispute_timeline WHERE dispute_id = ?1",
            params![dispute_id],
            |row| row.get(0),
        )?,
    };
    Ok(count)
}

// ============ Evidence Packs ============

pub struct CreateEvidencePack<'a> {
    pub dispute_id: &'a str,
    pub tracking_number: Option<String>,
    pub tracking_url: Option<String>,
    pub delivery_proof: Option<String>,
    pub product_description: Option<String>,
    pub refund_policy: String,
    pub terms_of_service: String,
}

pub fn create_evidence_pack(conn: &Connection, input: &CreateEvidencePack) -> Result<EvidencePack> {
    let id = EntityType::EvidencePack.gen_id();
    let now = now();

    conn.execute(
        "INSERT INTO evidence_packs (id, dispute_id, status, tracking_number, tracking_url, delivery_proof, product_description, customer_communication, refund_policy, terms_of_service, attachments, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, '[]', ?8, ?9, '[]', ?10, ?10)",
        params![
            &id,
            input.dispute_id,
            EvidencePackStatus::Building.as_ref(),
            &input.tracking_number,
            &input.tracking_url,
            &input.delivery_proof,
            &input.product_description,
            &input.refund_policy,
            &input.terms_of_service,
            now
        ],
    )?;

    Ok(EvidencePack {
        id,
        dispute_id: input.dispute_id.to_string(),
        status: EvidencePackStatus::Building,
        tracking_number: input.tracking_number.clone(),
        tracking_url: input.tracking_url.clone(),
        delivery_proof: input.delivery_proof.clone(),
        product_description: input.product_description.clone(),
        customer_communication: Vec::new(),
        refund_policy: input.refund_policy.clone(),
        terms_of_service: input.terms_of_service.clone(),
        attachments: Vec::new(),
        submitted_at: None,
        submitted_by: None,
        created_at: now,
        updated_at: now,
    })
}

pub fn get_evidence_pack_by_id(conn: &Connection, id: &str) -> Result<Option<EvidencePack>> {
    query_one(
        conn,
        &format!("SELECT {} FROM evidence_packs WHERE id = ?1", EVIDENCE_PACK_COLS),
        &[&id],
    )
}

pub fn get_evidence_pack_by_dispute(
    conn: &Connection,
    dispute_id: &str,
) -> Result<Option<EvidencePack>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM evidence_packs WHERE dispute_id = ?1",
            EVIDENCE_PACK_COLS
        ),
        &[&dispute_id],
    )
}

/// Persist an operator enrichment of a BUILDING pack. The full field set is
/// written back; the caller merged the update already.
pub fn save_evidence_pack(conn: &Connection, pack: &EvidencePack) -> Result<()> {
    let communication_json = serde_json::to_string(&pack.customer_communication)?;
    let attachments_json = serde_json::to_string(&pack.attachments)?;

    conn.execute(
        "UPDATE evidence_packs SET tracking_number = ?1, tracking_url = ?2, delivery_proof = ?3, product_description = ?4, customer_communication = ?5, refund_policy = ?6, terms_of_service = ?7, attachments = ?8, updated_at = ?9
         WHERE id = ?10",
        params![
            &pack.tracking_number,
            &pack.tracking_url,
            &pack.delivery_proof,
            &pack.product_description,
            &communication_json,
            &pack.refund_policy,
            &pack.terms_of_service,
            &attachments_json,
            now(),
            &pack.id
        ],
    )?;
    Ok(())
}

/// Status-guarded pack transition (BUILDING -> READY).
pub fn transition_evidence_pack(
    conn: &Connection,
    pack_id: &str,
    from: EvidencePackStatus,
    to: EvidencePackStatus,
) -> Result<Option<EvidencePack>> {
    let sql = format!(
        "UPDATE evidence_packs SET status = ?1, updated_at = ?2 WHERE id = ?3 AND status = ?4 RETURNING {}",
        EVIDENCE_PACK_COLS
    );
    conn.query_row(
        &sql,
        params![to.as_ref(), now(), pack_id, from.as_ref()],
        EvidencePack::from_row,
    )
    .optional()
    .map_err(Into::into)
}

/// READY -> SUBMITTED, stamping submitter and timestamp.
pub fn mark_evidence_pack_submitted(
    conn: &Connection,
    pack_id: &str,
    submitted_by: &str,
) -> Result<Option<EvidencePack>> {
    let now = now();
    let sql = format!(
        "UPDATE evidence_packs SET status = ?1, submitted_at = ?2, submitted_by = ?3, updated_at = ?2
         WHERE id = ?4 AND status = ?5 RETURNING {}",
        EVIDENCE_PACK_COLS
    );
    conn.query_row(
        &sql,
        params![
            EvidencePackStatus::Submitted.as_ref(),
            now,
            submitted_by,
            pack_id,
            EvidencePackStatus::Ready.as_ref()
        ],
        EvidencePack::from_row,
    )
    .optional()
    .map_err(Into::into)
}

// ============ Provider Transactions (reconciliation) ============

/// Insert an ingested transaction, returning true if this external id is
/// new. INSERT OR IGNORE on the (channel, provider, provider_txn_id)
/// unique index makes re-ingestion a no-op.
pub fn try_insert_provider_transaction(
    conn: &Connection,
    channel_id: &str,
    provider: ProviderKind,
    input: &IngestTransaction,
) -> Result<bool> {
    let id = EntityType::ProviderTransaction.gen_id();
    let provider_data_json = input
        .provider_data
        .as_ref()
        .map(serde_json::Value::to_string);

    let affected = conn.execute(
        "INSERT OR IGNORE INTO provider_transactions (id, channel_id, provider, provider_txn_id, txn_type, amount_cents, fee_cents, net_cents, status, provider_data, match_status, provider_created_at, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        params![
            &id,
            channel_id,
            provider.as_ref(),
            &input.provider_txn_id,
            &input.txn_type,
            input.amount_cents,
            input.fee_cents,
            input.net_cents,
            &input.status,
            &provider_data_json,
            MatchStatus::Unmatched.as_ref(),
            input.provider_created_at,
            now()
        ],
    )?;
    Ok(affected > 0)
}

pub fn get_provider_transaction(
    conn: &Connection,
    channel_id: &str,
    id: &str,
) -> Result<Option<ProviderTransaction>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM provider_transactions WHERE id = ?1 AND channel_id = ?2",
            PROVIDER_TXN_COLS
        ),
        &[&id, &channel_id],
    )
}

pub fn list_provider_transactions_paginated(
    conn: &Connection,
    channel_id: &str,
    filters: &TransactionFilters,
    limit: i64,
    offset: i64,
) -> Result<(Vec<ProviderTransaction>, i64)> {
    let build_filter_params = || -> Vec<Box<dyn rusqlite::ToSql>> {
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(channel_id.to_string())];
        if let Some(v) = filters.provider {
            params.push(Box::new(v.as_ref().to_string()));
        }
        if let Some(v) = filters.match_status {
            params.push(Box::new(v.as_ref().to_string()));
        }
        if let Some(ref v) = filters.txn_type {
            params.push(Box::new(v.clone()));
        }
        if let Some(v) = filters.start_date {
            params.push(Box::new(v));
        }
        if let Some(v) = filters.end_date {
            params.push(Box::new(v));
        }
        params
    };

    let mut where_clause = String::from("WHERE channel_id = ?");
    if filters.provider.is_some() {
        where_clause.push_str(" AND provider = ?");
    }
    if filters.match_status.is_some() {
        where_clause.push_str(" AND match_status = ?");
    }
    if filters.txn_type.is_some() {
        where_clause.push_str(" AND txn_type = ?");
    }
    if filters.start_date.is_some() {
        where_clause.push_str(" AND provider_created_at >= ?");
    }
    if filters.end_date.is_some() {
        where_clause.push_str(" AND provider_created_at <= ?");
    }

    let count_sql = format!("SELECT COUNT(*) FROM provider_transactions {}", where_clause);
    let filter_params = build_filter_params();
    let filter_refs: Vec<&dyn rusqlite::ToSql> = filter_params.iter().map(|b| b.as_ref()).collect();
    let total: i64 = conn.query_row(&count_sql, filter_refs.as_slice(), |row| row.get(0))?;

    let select_sql = format!(
        "SELECT {} FROM provider_transactions {} ORDER BY provider_created_at DESC LIMIT ? OFFSET ?",
        PROVIDER_TXN_COLS, where_clause
    );
    let mut select_params = build_filter_params();
    select_params.push(Box::new(limit));
    select_params.push(Box::new(offset));
    let select_refs: Vec<&dyn rusqlite::ToSql> = select_params.iter().map(|b| b.as_ref()).collect();

    let mut stmt = conn.prepare(&select_sql)?;
    let items = stmt
        .query_map(select_refs.as_slice(), ProviderTransaction::from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok((items, total))
}

/// Oldest-first slice of UNMATCHED transactions for the auto-match pass.
pub fn list_unmatched_transactions(
    conn: &Connection,
    channel_id: &str,
    provider: Option<ProviderKind>,
    limit: i64,
) -> Result<Vec<ProviderTransaction>> {
    match provider {
        Some(p) => query_all(
            conn,
            &format!(
                "SELECT {} FROM provider_transactions
                 WHERE channel_id = ?1 AND provider = ?2 AND match_status = 'unmatched'
                 ORDER BY provider_created_at LIMIT ?3",
                PROVIDER_TXN_COLS
            ),
            &[&channel_id, &p.as_ref(), &limit],
        ),
        None => query_all(
            conn,
            &format!(
                "SELECT {} FROM provider_transactions
                 WHERE channel_id = ?1 AND match_status = 'unmatched'
                 ORDER BY provider_created_at LIMIT ?2",
                PROVIDER_TXN_COLS
            ),
            &[&channel_id, &limit],
        ),
    }
}

/// Guarded UNMATCHED -> AUTO_MATCHED. Returns false if another worker got
/// there first.
pub fn mark_transaction_auto_matched(
    conn: &Connection,
    txn_id: &str,
    order_id: &str,
) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE provider_transactions
         SET match_status = 'auto_matched', matched_order_id = ?1, matched_at = ?2
         WHERE id = ?3 AND match_status = 'unmatched'",
        params![order_id, now(), txn_id],
    )?;
    Ok(affected > 0)
}

/// Manual override: always lands on MANUAL_MATCHED and stamps the actor.
pub fn mark_transaction_manual_matched(
    conn: &Connection,
    txn_id: &str,
    order_id: Option<&str>,
    payout_id: Option<&str>,
    matched_by: &str,
) -> Result<Option<ProviderTransaction>> {
    let sql = format!(
        "UPDATE provider_transactions
         SET match_status = 'manual_matched', matched_order_id = ?1, matched_payout_id = ?2, matched_at = ?3, matched_by = ?4
         WHERE id = ?5 RETURNING {}",
        PROVIDER_TXN_COLS
    );
    conn.query_row(
        &sql,
        params![order_id, payout_id, now(), matched_by, txn_id],
        ProviderTransaction::from_row,
    )
    .optional()
    .map_err(Into::into)
}

/// Flag a transaction as having a confirmed discrepancy.
pub fn mark_transaction_discrepancy(conn: &Connection, txn_id: &str) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE provider_transactions SET match_status = 'discrepancy' WHERE id = ?1",
        params![txn_id],
    )?;
    Ok(affected > 0)
}

pub fn transactions_by_match_status(
    conn: &Connection,
    channel_id: &str,
) -> Result<Vec<MatchStatusBucket>> {
    let mut stmt = conn.prepare(
        "SELECT match_status, COUNT(*), COALESCE(SUM(amount_cents), 0), COALESCE(SUM(fee_cents), 0), COALESCE(SUM(net_cents), 0)
         FROM provider_transactions WHERE channel_id = ?1 GROUP BY match_status ORDER BY match_status",
    )?;
    let buckets = stmt
        .query_map(params![channel_id], |row| {
            let status: String = row.get(0)?;
            Ok((
                status,
                row.get::<_, i64>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, i64>(4)?,
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?
        .into_iter()
        .filter_map(|(status, count, amount_cents, fee_cents, net_cents)| {
            status.parse::<MatchStatus>().ok().map(|match_status| MatchStatusBucket {
                match_status,
                count,
                amount_cents,
                fee_cents,
                net_cents,
            })
        })
        .collect();
    Ok(buckets)
}

// ============ Reconciliation Discrepancies ============

pub fn create_discrepancy(
    conn: &Connection,
    channel_id: &str,
    input: &CreateDiscrepancy,
) -> Result<ReconciliationDiscrepancy> {
    let id = EntityType::Discrepancy.gen_id();
    let now = now();
    let difference_cents = input.actual_cents - input.expected_cents;

    conn.execute(
        "INSERT INTO recon_discrepancies (id, channel_id, discrepancy_type, severity, description, provider_txn_id, order_id, expected_cents, actual_cents, difference_cents, status, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            &id,
            channel_id,
            &input.discrepancy_type,
            input.severity.as_ref(),
            &input.description,
            &input.provider_txn_id,
            &input.order_id,
            input.expected_cents,
            input.actual_cents,
            difference_cents,
            DiscrepancyStatus::Open.as_ref(),
            now
        ],
    )?;

    Ok(ReconciliationDiscrepancy {
        id,
        channel_id: channel_id.to_string(),
        discrepancy_type: input.discrepancy_type.clone(),
        severity: input.severity,
        description: input.description.clone(),
        provider_txn_id: input.provider_txn_id.clone(),
        order_id: input.order_id.clone(),
        expected_cents: input.expected_cents,
        actual_cents: input.actual_cents,
        difference_cents,
        status: DiscrepancyStatus::Open,
        resolved_at: None,
        resolved_by: None,
        resolution: None,
        created_at: now,
    })
}

pub fn get_discrepancy(
    conn: &Connection,
    channel_id: &str,
    id: &str,
) -> Result<Option<ReconciliationDiscrepancy>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM recon_discrepancies WHERE id = ?1 AND channel_id = ?2",
            DISCREPANCY_COLS
        ),
        &[&id, &channel_id],
    )
}

pub fn list_discrepancies_paginated(
    conn: &Connection,
    channel_id: &str,
    filters: &DiscrepancyFilters,
    limit: i64,
    offset: i64,
) -> Result<(Vec<ReconciliationDiscrepancy>, i64)> {
    let build_filter_params = || -> Vec<Box<dyn rusqlite::ToSql>> {
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(channel_id.to_string())];
        if let Some(v) = filters.status {
            params.push(Box::new(v.as_ref().to_string()));
        }
        if let Some(v) = filters.severity {
            params.push(Box::new(v.as_ref().to_string()));
        }
        if let Some(ref v) = filters.discrepancy_type {
            params.push(Box::new(v.clone()));
        }
        params
    };

    let mut where_clause = String::from("WHERE channel_id = ?");
    if filters.status.is_some() {
        where_clause.push_str(" AND status = ?");
    }
    if filters.severity.is_some() {
        where_clause.push_str(" AND severity = ?");
    }
    if filters.discrepancy_type.is_some() {
        where_clause.push_str(" AND discrepancy_type = ?");
    }

    let count_sql = format!("SELECT COUNT(*) FROM recon_discrepancies {}", where_clause);
    let filter_params = build_filter_params();
    let filter_refs: Vec<&dyn rusqlite::ToSql> = filter_params.iter().map(|b| b.as_ref()).collect();
    let total: i64 = conn.query_row(&count_sql, filter_refs.as_slice(), |row| row.get(0))?;

    let select_sql = format!(
        "SELECT {} FROM recon_discrepancies {} ORDER BY created_at DESC LIMIT ? OFFSET ?",
        DISCREPANCY_COLS, where_clause
    );
    let mut select_params = build_filter_params();
    select_params.push(Box::new(limit));
    select_params.push(Box::new(offset));
    let select_refs: Vec<&dyn rusqlite::ToSql> = select_params.iter().map(|b| b.as_ref()).collect();

    let mut stmt = conn.prepare(&select_sql)?;
    let items = stmt
        .query_map(select_refs.as_slice(), ReconciliationDiscrepancy::from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok((items, total))
}

/// OPEN -> INVESTIGATING. Terminal rows are never reopened.
pub fn mark_discrepancy_investigating(
    conn: &Connection,
    id: &str,
) -> Result<Option<ReconciliationDiscrepancy>> {
    let sql = format!(
        "UPDATE recon_discrepancies SET status = 'investigating'
         WHERE id = ?1 AND status = 'open' RETURNING {}",
        DISCREPANCY_COLS
    );
    conn.query_row(&sql, params![id], ReconciliationDiscrepancy::from_row)
        .optional()
        .map_err(Into::into)
}

/// Terminal, audited resolution. Only OPEN/INVESTIGATING rows resolve.
pub fn resolve_discrepancy(
    conn: &Connection,
    id: &str,
    final_status: DiscrepancyStatus,
    resolved_by: &str,
    resolution: &str,
) -> Result<Option<ReconciliationDiscrepancy>> {
    let sql = format!(
        "UPDATE recon_discrepancies SET status = ?1, resolved_at = ?2, resolved_by = ?3, resolution = ?4
         WHERE id = ?5 AND status IN ('open', 'investigating') RETURNING {}",
        DISCREPANCY_COLS
    );
    conn.query_row(
        &sql,
        params![final_status.as_ref(), now(), resolved_by, resolution, id],
        ReconciliationDiscrepancy::from_row,
    )
    .optional()
    .map_err(Into::into)
}

pub fn discrepancies_by_status(
    conn: &Connection,
    channel_id: &str,
) -> Result<Vec<DiscrepancyStatusBucket>> {
    let mut stmt = conn.prepare(
        "SELECT status, COUNT(*), COALESCE(SUM(ABS(difference_cents)), 0)
         FROM recon_discrepancies WHERE channel_id = ?1 GROUP BY status ORDER BY status",
    )?;
    let buckets = stmt
        .query_map(params![channel_id], |row| {
            let status: String = row.get(0)?;
            Ok((status, row.get::<_, i64>(1)?, row.get::<_, i64>(2)?))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?
        .into_iter()
        .filter_map(|(status, count, abs_difference_cents)| {
            status.parse::<DiscrepancyStatus>().ok().map(|status| DiscrepancyStatusBucket {
                status,
                count,
                abs_difference_cents,
            })
        })
        .collect();
    Ok(buckets)
}

// ============ Idempotency Ledger ============

pub fn get_idempotency_record(
    conn: &Connection,
    channel_id: &str,
    scope: &str,
    idem_key: &str,
) -> Result<Option<IdempotencyRecord>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM idempotency_records WHERE channel_id = ?1 AND scope = ?2 AND idem_key = ?3",
            IDEMPOTENCY_COLS
        ),
        &[&channel_id, &scope, &idem_key],
    )
}

/// Atomically claim the key, returning true when this caller owns it.
/// The unique primary key makes concurrent claims serialize: exactly one
/// insert wins, every other caller sees false and reads the existing row.
pub fn try_claim_idempotency_key(
    conn: &Connection,
    channel_id: &str,
    scope: &str,
    idem_key: &str,
    request_hash: &str,
) -> Result<bool> {
    let now = now();
    let affected = conn.execute(
        "INSERT INTO idempotency_records (channel_id, scope, idem_key, request_hash, status, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, 'in_progress', ?5, ?5)
         ON CONFLICT(channel_id, scope, idem_key) DO NOTHING",
        params![channel_id, scope, idem_key, request_hash, now],
    )?;
    Ok(affected > 0)
}

/// Re-claim a FAILED key for retry. Key identity never changes; only
/// result/status move.
pub fn reclaim_failed_idempotency_key(
    conn: &Connection,
    channel_id: &str,
    scope: &str,
    idem_key: &str,
    request_hash: &str,
) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE idempotency_records SET status = 'in_progress', request_hash = ?1, result = NULL, updated_at = ?2
         WHERE channel_id = ?3 AND scope = ?4 AND idem_key = ?5 AND status = 'failed'",
        params![request_hash, now(), channel_id, scope, idem_key],
    )?;
    Ok(affected > 0)
}

/// Finish a claimed key, caching the result for duplicate deliveries.
pub fn finish_idempotency_key(
    conn: &Connection,
    channel_id: &str,
    scope: &str,
    idem_key: &str,
    status: IdempotencyStatus,
    result: Option<&serde_json::Value>,
) -> Result<()> {
    let result_json = result.map(serde_json::Value::to_string);
    conn.execute(
        "UPDATE idempotency_records SET status = ?1, result = ?2, updated_at = ?3
         WHERE channel_id = ?4 AND scope = ?5 AND idem_key = ?6",
        params![status.as_ref(), &result_json, now(), channel_id, scope, idem_key],
    )?;
    Ok(())
}

/// Purge aged COMPLETED ledger rows. Providers retry for days, not months;
/// retention is a startup maintenance knob.
pub fn purge_old_idempotency_records(conn: &Connection, retention_days: i64) -> Result<usize> {
    let cutoff = now() - (retention_days * 86400);
    let deleted = conn.execute(
        "DELETE FROM idempotency_records WHERE status = 'completed' AND updated_at < ?1",
        params![cutoff],
    )?;
    Ok(deleted)
}
