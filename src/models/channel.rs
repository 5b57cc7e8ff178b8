use serde::{Deserialize, Serialize};

use crate::providers::ProviderKind;

/// A selling channel (storefront) on the platform.
///
/// Channels are owned by the out-of-scope catalog subsystem; the engine
/// stores the minimal row it needs: which payment provider the channel
/// settles through and the secrets for verifying/driving that provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Channel {
    pub id: String,
    pub name: String,
    pub provider: ProviderKind,
    /// Secret for verifying inbound webhook signatures.
    #[serde(skip_serializing)]
    pub webhook_secret: String,
    /// API key for outbound provider calls (case sync, evidence submission).
    #[serde(skip_serializing)]
    pub provider_api_key: String,
    pub created_at: i64,
}

/// Data required to register a new channel
#[derive(Debug, Clone, Deserialize)]
pub struct CreateChannel {
    pub name: String,
    pub provider: ProviderKind,
    pub webhook_secret: String,
    pub provider_api_key: String,
}
