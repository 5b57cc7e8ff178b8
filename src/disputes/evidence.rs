//! Evidence pack builder.
//!
//! Synthesizes dispute evidence from the linked order and its most recent
//! shipment, and scores pack strength for the advisory auto-respond
//! recommendation. The builder never submits to the provider; submission
//! is a separate, explicit action on the state machine.

use chrono::{TimeZone, Utc};
use rusqlite::Connection;

use crate::db::queries;
use crate::error::Result;
use crate::models::{
    AttachmentKind, EvidencePack, EvidenceRecommendation, Order, RecommendationConfidence,
    RecommendedAction, Shipment,
};

/// Boilerplate policy text cited in every pack. Channels override the text
/// by editing the pack before marking it ready.
pub const REFUND_POLICY_TEXT: &str = "Refunds are issued for items returned within 30 days of \
delivery in their original condition. Digital goods and perishables are refundable only when \
defective. The policy is displayed at checkout and linked from every order confirmation.";

pub const TERMS_OF_SERVICE_TEXT: &str = "By placing an order the customer agrees to the channel's \
terms of service, including the shipping, return and refund terms presented at checkout.";

/// The facts the builder was able to assemble from order/shipment data.
#[derive(Debug, Default)]
pub struct SynthesizedEvidence {
    pub tracking_number: Option<String>,
    pub tracking_url: Option<String>,
    pub delivery_proof: Option<String>,
    pub product_description: Option<String>,
}

/// Assemble evidence facts for an order. Pure with respect to its inputs;
/// the shipment (if any) is the order's most recent one.
pub fn synthesize(
    conn: &Connection,
    order: &Order,
    shipment: Option<&Shipment>,
) -> Result<SynthesizedEvidence> {
    let mut evidence = SynthesizedEvidence::default();

    if let Some(shipment) = shipment {
        evidence.tracking_number = Some(shipment.tracking_number.clone());
        evidence.tracking_url = shipment.tracking_url.clone();
        evidence.delivery_proof = shipment.delivered_at.map(|ts| {
            let delivered = Utc
                .timestamp_opt(ts, 0)
                .single()
                .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
                .unwrap_or_else(|| ts.to_string());
            format!("{}, delivered {}", shipment.carrier, delivered)
        });
    }

    let lines = queries::get_order_lines(conn, &order.id)?;
    if !lines.is_empty() {
        let description = lines
            .iter()
            .map(|(name, quantity, unit_price_cents)| {
                format!(
                    "{}x {} ({}.{:02} {})",
                    quantity,
                    name,
                    unit_price_cents / 100,
                    unit_price_cents % 100,
                    order.currency
                )
            })
            .collect::<Vec<_>>()
            .join("; ");
        evidence.product_description = Some(description);
    }

    Ok(evidence)
}

/// Score pack strength and recommend a response. Advisory only: the
/// recommendation never transitions the dispute.
pub fn recommend(pack: &EvidencePack) -> EvidenceRecommendation {
    let mut strength = 0i64;
    let mut reasons = Vec::new();

    let has_tracking = pack.has_tracking();
    if has_tracking {
        strength += 30;
        reasons.push("Tracking number on file".to_string());
    }

    let has_delivery = pack.has_delivery_confirmation();
    if has_delivery {
        strength += 30;
        reasons.push("Delivery confirmation on file".to_string());
    }

    if !pack.customer_communication.is_empty() {
        strength += 20;
        reasons.push(format!(
            "{} customer communication entries",
            pack.customer_communication.len()
        ));
    }

    if pack.has_attachment(AttachmentKind::Photo) {
        strength += 10;
        reasons.push("Product photos attached".to_string());
    }

    if pack.has_attachment(AttachmentKind::Invoice) {
        strength += 10;
        reasons.push("Invoices attached".to_string());
    }

    let (action, confidence) = if strength >= 70 && has_tracking && has_delivery {
        (RecommendedAction::Challenge, RecommendationConfidence::High)
    } else if strength >= 50 {
        (RecommendedAction::Challenge, RecommendationConfidence::Medium)
    } else if strength >= 30 {
        (RecommendedAction::PartialRefund, RecommendationConfidence::Medium)
    } else {
        (RecommendedAction::Accept, RecommendationConfidence::Low)
    };

    EvidenceRecommendation {
        strength,
        action,
        confidence,
        reasons,
    }
}
