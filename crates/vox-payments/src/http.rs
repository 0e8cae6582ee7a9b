//! HTTP transfer provider client.
//!
//! Speaks a Paystack-style JSON API: every response is an envelope
//! `{ "status": bool, "message": str, "data": {...} }` and requests carry the
//! secret key as a bearer token.

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;

use crate::provider::{ProviderError, TransferProvider, TransferReceipt};

/// Default provider API base URL.
pub const DEFAULT_BASE_URL: &str = "https://api.paystack.co";

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    status: bool,
    #[serde(default)]
    message: String,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct RecipientData {
    recipient_code: String,
}

/// Transfer provider reached over HTTPS.
#[derive(Clone)]
pub struct HttpTransferProvider {
    http: reqwest::Client,
    base_url: String,
    secret_key: String,
    currency: String,
}

impl std::fmt::Debug for HttpTransferProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransferProvider")
            .field("base_url", &self.base_url)
            .field("currency", &self.currency)
            .finish_non_exhaustive()
    }
}

impl HttpTransferProvider {
    pub fn new(
        base_url: impl Into<String>,
        secret_key: impl Into<String>,
        currency: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ProviderError::Network(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            secret_key: secret_key.into(),
            currency: currency.into(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post<T: DeserializeOwned>(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> Result<T, ProviderError> {
        let response = self
            .http
            .post(format!("{}{path}", self.base_url))
            .bearer_auth(&self.secret_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Network(format!("request failed: {e}")))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ProviderError::Network(format!("failed to read response: {e}")))?;

        if status.is_server_error() {
            return Err(ProviderError::Network(format!("provider returned HTTP {status}")));
        }
        parse_envelope(&text)
    }
}

/// Unwrap a provider envelope into its `data`.
fn parse_envelope<T: DeserializeOwned>(body: &str) -> Result<T, ProviderError> {
    let envelope: Envelope<T> = serde_json::from_str(body)
        .map_err(|e| ProviderError::InvalidResponse(format!("invalid JSON response: {e}")))?;

    if !envelope.status {
        return Err(ProviderError::Rejected(envelope.message));
    }
    envelope
        .data
        .ok_or_else(|| ProviderError::InvalidResponse("missing data".to_string()))
}

#[async_trait]
impl TransferProvider for HttpTransferProvider {
    async fn create_recipient(
        &self,
        account_number: &str,
        bank_code: &str,
        name: &str,
    ) -> Result<String, ProviderError> {
        let data: RecipientData = self
            .post(
                "/transferrecipient",
                json!({
                    "type": "nuban",
                    "name": name,
                    "account_number": account_number,
                    "bank_code": bank_code,
                    "currency": self.currency,
                }),
            )
            .await?;
        Ok(data.recipient_code)
    }

    async fn initiate_transfer(
        &self,
        recipient_code: &str,
        amount_minor: i64,
        reference: &str,
        reason: &str,
    ) -> Result<TransferReceipt, ProviderError> {
        self.post(
            "/transfer",
            json!({
                "source": "balance",
                "amount": amount_minor,
                "recipient": recipient_code,
                "reference": reference,
                "reason": reason,
                "currency": self.currency,
            }),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_success_envelope() {
        let body = r#"{"status":true,"message":"ok","data":{"recipient_code":"RCP_1","id":9}}"#;
        let data: RecipientData = parse_envelope(body).expect("parse");
        assert_eq!(data.recipient_code, "RCP_1");
    }

    #[test]
    fn test_parse_transfer_receipt() {
        let body = r#"{"status":true,"message":"queued",
            "data":{"transfer_code":"TRF_1","status":"pending","amount":750000}}"#;
        let receipt: TransferReceipt = parse_envelope(body).expect("parse");
        assert_eq!(receipt.transfer_code, "TRF_1");
        assert_eq!(receipt.status, "pending");
    }

    #[test]
    fn test_parse_rejection() {
        let body = r#"{"status":false,"message":"Insufficient balance"}"#;
        let err = parse_envelope::<RecipientData>(body).expect_err("rejected");
        assert_eq!(err, ProviderError::Rejected("Insufficient balance".into()));
    }

    #[test]
    fn test_parse_garbage() {
        let err = parse_envelope::<RecipientData>("<html>").expect_err("garbage");
        assert!(matches!(err, ProviderError::InvalidResponse(_)));
    }

    #[test]
    fn test_base_url_normalized() {
        let provider = HttpTransferProvider::new(
            "https://example.test/",
            "sk_test_hidden",
            "NGN",
            Duration::from_secs(5),
        )
        .expect("client");
        assert_eq!(provider.base_url(), "https://example.test");
        assert!(!format!("{provider:?}").contains("sk_test_hidden"));
    }
}
