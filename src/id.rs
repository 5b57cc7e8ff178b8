//! Prefixed ID generation for Crosscheck entities.
//!
//! All IDs use a `cx_` brand prefix to guarantee collision avoidance with
//! payment provider IDs (Stripe's `dp_`, `txn_`, `po_`, Square's uppercase
//! dispute IDs, etc.).
//!
//! Format: `cx_{entity}_{uuid_simple}` (32 hex chars, no hyphens)

use uuid::Uuid;

/// All known entity prefixes for validation.
const ALL_PREFIXES: &[&str] = &[
    "cx_chan_",
    "cx_acct_",
    "cx_pm_",
    "cx_prod_",
    "cx_ord_",
    "cx_item_",
    "cx_ship_",
    "cx_po_",
    "cx_fs_",
    "cx_dsp_",
    "cx_tl_",
    "cx_ep_",
    "cx_ptx_",
    "cx_dis_",
];

/// Validate that a string is a valid Crosscheck prefixed ID.
///
/// This is a cheap check to reject garbage before hitting the database.
/// Validates format: `cx_{entity}_{32_hex_chars}`
pub fn is_valid_prefixed_id(s: &str) -> bool {
    let Some(prefix) = ALL_PREFIXES.iter().find(|p| s.starts_with(*p)) else {
        return false;
    };

    let hex_part = &s[prefix.len()..];

    hex_part.len() == 32 && hex_part.chars().all(|c| c.is_ascii_hexdigit())
}

/// Entity types that have prefixed IDs in Crosscheck.
#[derive(Debug, Clone, Copy)]
pub enum EntityType {
    Channel,
    Account,
    PaymentMethod,
    Product,
    Order,
    OrderItem,
    Shipment,
    Payout,
    FraudScore,
    Dispute,
    TimelineEntry,
    EvidencePack,
    ProviderTransaction,
    Discrepancy,
}

impl EntityType {
    /// Returns the prefix for this entity type.
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Channel => "cx_chan",
            Self::Account => "cx_acct",
            Self::PaymentMethod => "cx_pm",
            Self::Product => "cx_prod",
            Self::Order => "cx_ord",
            Self::OrderItem => "cx_item",
            Self::Shipment => "cx_ship",
            Self::Payout => "cx_po",
            Self::FraudScore => "cx_fs",
            Self::Dispute => "cx_dsp",
            Self::TimelineEntry => "cx_tl",
            Self::EvidencePack => "cx_ep",
            Self::ProviderTransaction => "cx_ptx",
            Self::Discrepancy => "cx_dis",
        }
    }

    /// Generates a new prefixed ID for this entity type.
    pub fn gen_id(&self) -> String {
        format!("{}_{}", self.prefix(), Uuid::new_v4().as_simple())
    }
}
