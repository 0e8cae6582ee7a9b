//! Provider webhook events.
//!
//! The provider signs the raw request body with HMAC-SHA512 under our secret
//! key. Only transfer outcome events are acted upon; everything else is
//! acknowledged and ignored.

use serde::Deserialize;

use crate::{PaymentError, Result};

/// Transfer outcome reported by the provider.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransferEventKind {
    Success,
    Failed,
    Reversed,
}

impl TransferEventKind {
    pub fn from_event(name: &str) -> Option<Self> {
        match name {
            "transfer.success" => Some(Self::Success),
            "transfer.failed" => Some(Self::Failed),
            "transfer.reversed" => Some(Self::Reversed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "transfer.success",
            Self::Failed => "transfer.failed",
            Self::Reversed => "transfer.reversed",
        }
    }
}

/// A parsed transfer event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransferEvent {
    pub kind: TransferEventKind,
    pub reference: String,
    pub transfer_code: Option<String>,
    pub reason: Option<String>,
}

#[derive(Deserialize)]
struct RawEvent {
    event: String,
    #[serde(default)]
    data: RawData,
}

#[derive(Default, Deserialize)]
struct RawData {
    reference: Option<String>,
    transfer_code: Option<String>,
    reason: Option<String>,
    gateway_response: Option<String>,
}

/// Check the body's signature against the provider secret.
pub fn verify(secret: &str, body: &[u8], signature: &str) -> Result<()> {
    vox_crypto::hmac::verify_sha512(secret.as_bytes(), body, signature.trim())
        .map_err(|_| PaymentError::InvalidSignature)
}

/// Parse a webhook body. Returns `None` for events that are not transfer outcomes.
pub fn parse(body: &[u8]) -> Result<Option<TransferEvent>> {
    let raw: RawEvent =
        serde_json::from_slice(body).map_err(|e| PaymentError::MalformedEvent(e.to_string()))?;

    let Some(kind) = TransferEventKind::from_event(&raw.event) else {
        tracing::debug!(event = %raw.event, "ignoring webhook event");
        return Ok(None);
    };

    let reference = raw
        .data
        .reference
        .filter(|r| !r.is_empty())
        .ok_or_else(|| PaymentError::MalformedEvent("missing data.reference".to_string()))?;

    Ok(Some(TransferEvent {
        kind,
        reference,
        transfer_code: raw.data.transfer_code,
        reason: raw.data.reason.or(raw.data.gateway_response),
    }))
}
