//! Collaborator read models consumed by the engine (the "signal store").
//!
//! Orders, accounts, payment methods, shipments and payouts are written by
//! the order/catalog subsystems; this engine only reads them when scoring
//! fraud, building evidence and matching provider transactions. The
//! `Create*` inputs exist for dev seeding and test fixtures.

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};

use crate::providers::ProviderKind;

/// A buyer account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub email: String,
    pub email_verified: bool,
    pub created_at: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateAccount {
    pub email: String,
    pub email_verified: bool,
    /// Backdated creation timestamp (None = now). Used by fixtures to
    /// exercise account-age signals.
    pub created_at: Option<i64>,
}

/// A stored payment method (card, wallet) attached to an account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentMethod {
    pub id: String,
    pub account_id: String,
    /// Provider-side kind, e.g. "card", "wallet"
    pub kind: String,
    pub created_at: i64,
}

/// A catalog product sold on a channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    pub id: String,
    pub channel_id: String,
    pub name: String,
    pub price_cents: i64,
    pub created_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Confirmed,
    Shipped,
    Delivered,
    Failed,
    Refunded,
}

/// An order placed on a channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub channel_id: String,
    pub account_id: String,
    /// Human-facing order number; provider metadata references this during
    /// reconciliation.
    pub order_number: String,
    pub status: OrderStatus,
    pub payment_method_id: Option<String>,
    pub total_cents: i64,
    pub currency: String,
    pub created_at: i64,
}

/// One line of an order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderItem {
    pub id: String,
    pub order_id: String,
    pub product_id: String,
    pub quantity: i64,
    pub unit_price_cents: i64,
}

/// A shipment for an order. The newest shipment is the one evidence packs
/// cite.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Shipment {
    pub id: String,
    pub order_id: String,
    pub carrier: String,
    pub tracking_number: String,
    pub tracking_url: Option<String>,
    pub delivered_at: Option<i64>,
    pub created_at: i64,
}

/// A provider payout (settlement batch) to the channel's bank account.
/// Reconciliation matches provider transactions against these.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payout {
    pub id: String,
    pub channel_id: String,
    pub provider: ProviderKind,
    pub provider_payout_id: String,
    pub amount_cents: i64,
    pub status: String,
    pub arrived_at: Option<i64>,
    pub created_at: i64,
}
