//! Fraud scoring engine.
//!
//! Additive scoring across independent signal layers. Each layer reads the
//! signal store (orders, payment methods, accounts, prior scores) and
//! contributes points plus an optional named flag and human-readable
//! reason. Evaluation is pure with respect to its inputs; the only side
//! effect is appending one immutable `fraud_scores` row, which itself
//! feeds the historical-fraud layer of future evaluations - so callers
//! must not evaluate the same order twice without intent.

use rusqlite::Connection;

use crate::db::queries;
use crate::error::{msg, AppError, OptionExt, Result};
use crate::models::{
    BatchFraudError, BatchFraudSummary, FraudCheckResult, Order, RiskLevel,
};

const HOUR_SECS: i64 = 3600;
const DAY_SECS: i64 = 86400;

/// Flags are at most one entry per layer trigger; points may repeat
/// (HIGH_VALUE_ITEM scores per occurrence).
struct Scorecard {
    score: i64,
    flags: Vec<String>,
    reasons: Vec<String>,
}

impl Scorecard {
    fn new() -> Self {
        Self {
            score: 0,
            flags: Vec::new(),
            reasons: Vec::new(),
        }
    }

    fn add(&mut self, points: i64, flag: &str, reason: String) {
        self.score += points;
        if !self.flags.iter().any(|f| f == flag) {
            self.flags.push(flag.to_string());
        }
        self.reasons.push(reason);
    }
}

/// Evaluate one order, persisting an immutable score row.
pub fn evaluate(conn: &Connection, channel_id: &str, order_id: &str) -> Result<FraudCheckResult> {
    let order = queries::get_order_by_id(conn, order_id).or_not_found(msg::ORDER_NOT_FOUND)?;
    if order.channel_id != channel_id {
        return Err(AppError::NotFound(msg::ORDER_NOT_FOUND.into()));
    }

    let account =
        queries::get_account_by_id(conn, &order.account_id).or_not_found(msg::ACCOUNT_NOT_FOUND)?;

    let now = chrono::Utc::now().timestamp();
    let mut card = Scorecard::new();

    // Layer 1: order velocity over the trailing 24h
    let recent_orders = queries::count_orders_since(conn, &order.account_id, now - DAY_SECS)?;
    if recent_orders > 5 {
        card.add(
            20,
            "HIGH_VELOCITY",
            format!("{} orders in the last 24 hours", recent_orders),
        );
    } else if recent_orders >= 4 {
        card.add(
            10,
            "MEDIUM_VELOCITY",
            format!("{} orders in the last 24 hours", recent_orders),
        );
    }

    // Layer 2: amount anomaly vs the account's historical average
    if let Some(avg) = queries::avg_order_total_excluding(conn, &order.account_id, &order.id)? {
        if avg > 0.0 && order.total_cents as f64 > avg * 3.0 {
            card.add(
                15,
                "UNUSUAL_AMOUNT",
                format!(
                    "Order total {} is more than 3x the historical average {}",
                    order.total_cents, avg as i64
                ),
            );
        }
    }

    // Layer 3: payment-method age
    if let Some(pm_id) = &order.payment_method_id {
        if let Some(pm) = queries::get_payment_method_by_id(conn, pm_id)? {
            let age = now - pm.created_at;
            if age < HOUR_SECS {
                card.add(25, "NEW_PAYMENT_METHOD", "Payment method added less than an hour ago".into());
            } else if age < DAY_SECS {
                card.add(10, "RECENT_PAYMENT_METHOD", "Payment method added less than a day ago".into());
            }
        }
    }

    // Layer 4: account age and verification
    let account_age = now - account.created_at;
    if account_age < DAY_SECS {
        card.add(20, "NEW_ACCOUNT", "Account created less than a day ago".into());
    } else if account_age < 7 * DAY_SECS {
        card.add(10, "RECENT_ACCOUNT", "Account created less than a week ago".into());
    }
    if !account.email_verified {
        card.add(15, "UNVERIFIED_EMAIL", "Account email is not verified".into());
    }

    // Layer 5: behavioral - prior failed orders
    let failed = queries::count_failed_orders(conn, &order.account_id)?;
    if failed > 2 {
        card.add(
            15,
            "MULTIPLE_FAILURES",
            format!("{} prior failed orders", failed),
        );
    }

    // Layer 6: product risk per line item
    for item in queries::get_order_items(conn, &order.id)? {
        if item.unit_price_cents > 50_000 {
            card.add(
                5,
                "HIGH_VALUE_ITEM",
                format!("Line item priced at {} cents", item.unit_price_cents),
            );
        }
        if item.quantity > 10 {
            card.add(
                10,
                "LARGE_QUANTITY",
                format!("Line item quantity {}", item.quantity),
            );
        }
    }

    // Layer 7: historical fraud signal from the last 5 evaluations
    if let Some(avg) = queries::avg_recent_fraud_scores(conn, &order.account_id, 5)? {
        if avg > 60.0 {
            card.add(
                20,
                "HISTORICAL_FRAUD",
                format!("Average of recent fraud scores is {:.0}", avg),
            );
        }
    }

    let risk_score = card.score.min(100);
    let risk_level = RiskLevel::from_score(risk_score);

    let score = queries::insert_fraud_score(
        conn,
        channel_id,
        &order.id,
        &order.account_id,
        risk_score,
        risk_level,
        &card.flags,
        &card.reasons,
    )?;

    tracing::info!(
        "Fraud check: order={} account={} score={} level={}",
        order.id,
        order.account_id,
        risk_score,
        risk_level.as_ref()
    );

    Ok(result_from(&order, score.id, risk_score, risk_level, card.flags, card.reasons))
}

fn result_from(
    order: &Order,
    score_id: String,
    risk_score: i64,
    risk_level: RiskLevel,
    flags: Vec<String>,
    reasons: Vec<String>,
) -> FraudCheckResult {
    FraudCheckResult {
        score_id,
        order_id: order.id.clone(),
        account_id: order.account_id.clone(),
        risk_score,
        risk_level,
        flags,
        reasons,
        should_reject: risk_level == RiskLevel::Critical,
        should_hold: risk_level == RiskLevel::High,
        should_flag: risk_level == RiskLevel::Medium,
    }
}

/// Evaluate a list of orders independently. One order's failure is logged
/// and recorded per-item; it never aborts the batch.
pub fn evaluate_batch(
    conn: &Connection,
    channel_id: &str,
    order_ids: &[String],
) -> Result<BatchFraudSummary> {
    let mut summary = BatchFraudSummary {
        evaluated: Vec::new(),
        failed: Vec::new(),
        low: 0,
        medium: 0,
        high: 0,
        critical: 0,
    };

    for order_id in order_ids {
        match evaluate(conn, channel_id, order_id) {
            Ok(result) => {
                match result.risk_level {
                    RiskLevel::Low => summary.low += 1,
                    RiskLevel::Medium => summary.medium += 1,
                    RiskLevel::High => summary.high += 1,
                    RiskLevel::Critical => summary.critical += 1,
                }
                summary.evaluated.push(result);
            }
            Err(e) => {
                tracing::warn!("Batch fraud check failed for order {}: {}", order_id, e);
                summary.failed.push(BatchFraudError {
                    order_id: order_id.clone(),
                    error: e.to_string(),
                });
            }
        }
    }

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_risk_level_thresholds() {
        assert_eq!(RiskLevel::from_score(0), RiskLevel::Low);
        assert_eq!(RiskLevel::from_score(39), RiskLevel::Low);
        assert_eq!(RiskLevel::from_score(40), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_score(59), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_score(60), RiskLevel::High);
        assert_eq!(RiskLevel::from_score(79), RiskLevel::High);
        assert_eq!(RiskLevel::from_score(80), RiskLevel::Critical);
        assert_eq!(RiskLevel::from_score(100), RiskLevel::Critical);
    }

    #[test]
    fn test_scorecard_deduplicates_flags_not_points() {
        let mut card = Scorecard::new();
        card.add(5, "HIGH_VALUE_ITEM", "item 1".into());
        card.add(5, "HIGH_VALUE_ITEM", "item 2".into());
        assert_eq!(card.score, 10);
        assert_eq!(card.flags.len(), 1);
        assert_eq!(card.reasons.len(), 2);
    }
}
