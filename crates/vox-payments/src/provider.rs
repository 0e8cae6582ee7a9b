//! Transfer provider interface.
//!
//! Two calls move money out: register the destination account as a
//! recipient, then initiate a transfer to it. The final outcome arrives
//! later through the provider's webhook, keyed by our reference.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Error types reported by a transfer provider.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    /// The request never got a usable response.
    #[error("network error: {0}")]
    Network(String),

    /// The provider answered and refused.
    #[error("rejected by provider: {0}")]
    Rejected(String),

    /// The provider answered with something we could not read.
    #[error("invalid provider response: {0}")]
    InvalidResponse(String),
}

/// Provider-side state of an initiated transfer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferReceipt {
    pub transfer_code: String,
    /// Provider status string (`pending`, `success`, `otp`, ...).
    pub status: String,
}

/// External money-movement API.
#[async_trait]
pub trait TransferProvider: Send + Sync {
    /// Register a destination account. Returns the provider's recipient code.
    async fn create_recipient(
        &self,
        account_number: &str,
        bank_code: &str,
        name: &str,
    ) -> Result<String, ProviderError>;

    /// Send `amount_minor` to a registered recipient under our `reference`.
    async fn initiate_transfer(
        &self,
        recipient_code: &str,
        amount_minor: i64,
        reference: &str,
        reason: &str,
    ) -> Result<TransferReceipt, ProviderError>;
}
