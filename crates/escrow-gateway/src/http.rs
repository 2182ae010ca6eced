//! # HTTP Payment Gateway
//!
//! `reqwest` client for a REST settlement rail.
//!
//! | Operation | Request |
//! |---|---|
//! | release | `POST {base}/v1/payouts/release` |
//! | refund | `POST {base}/v1/payouts/refund` |
//!
//! Both carry the order as a JSON body, `Authorization: Bearer {api_key}`,
//! and `Idempotency-Key: {order.idempotency_key}`. A 2xx response body is
//! `{"transactionId": "..."}`.
//!
//! Status mapping: 408, 429 and 5xx are `Unavailable` (retryable); any
//! other non-2xx is `Rejected`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::Deserialize;

use escrow_core::TransactionId;

use crate::adapter::{PaymentGateway, PaymentOrder};
use crate::error::GatewayError;

pub const IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";

/// Connection settings for [`HttpPaymentGateway`].
#[derive(Debug, Clone)]
pub struct HttpGatewayConfig {
    pub base_url: String,
    pub api_key: String,
    pub timeout: Duration,
}

impl HttpGatewayConfig {
    /// Configuration with a 10 second request timeout.
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            timeout: Duration::from_secs(10),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InitiateResponse {
    transaction_id: String,
}

#[derive(Debug)]
pub struct HttpPaymentGateway {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl HttpPaymentGateway {
    pub fn new(config: HttpGatewayConfig) -> Result<Self, GatewayError> {
        if config.base_url.trim().is_empty() {
            return Err(GatewayError::NotConfigured {
                reason: "base URL is empty".to_string(),
            });
        }
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .default_headers({
                let mut headers = HeaderMap::new();
                headers.insert(
                    AUTHORIZATION,
                    HeaderValue::from_str(&format!("Bearer {}", config.api_key)).map_err(|_| {
                        GatewayError::NotConfigured {
                            reason: "invalid API key characters".into(),
                        }
                    })?,
                );
                headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
                headers
            })
            .build()
            .map_err(|e| GatewayError::NotConfigured {
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            timeout: config.timeout,
        })
    }

    async fn submit(&self, route: &str, order: &PaymentOrder) -> Result<TransactionId, GatewayError> {
        let url = format!("{}/v1/payouts/{route}", self.base_url);
        let key = HeaderValue::from_str(&order.idempotency_key).map_err(|_| GatewayError::Rejected {
            reason: "idempotency key is not a valid header value".to_string(),
        })?;

        let resp = self
            .client
            .post(&url)
            .header(IDEMPOTENCY_KEY_HEADER, key)
            .json(order)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GatewayError::Timeout {
                        elapsed_ms: u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
                    }
                } else {
                    GatewayError::Unavailable {
                        reason: format!("{route}: {e}"),
                    }
                }
            })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let reason = format!("{route}: HTTP {status}: {body}");
            return Err(
                if status.is_server_error()
                    || status == StatusCode::REQUEST_TIMEOUT
                    || status == StatusCode::TOO_MANY_REQUESTS
                {
                    GatewayError::Unavailable { reason }
                } else {
                    GatewayError::Rejected { reason }
                },
            );
        }

        let body: InitiateResponse = resp.json().await.map_err(|e| GatewayError::InvalidResponse {
            reason: format!("{route}: {e}"),
        })?;
        TransactionId::new(body.transaction_id).map_err(|e| GatewayError::InvalidResponse {
            reason: format!("{route}: {e}"),
        })
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    async fn initiate_release(&self, order: &PaymentOrder) -> Result<TransactionId, GatewayError> {
        self.submit("release", order).await
    }

    async fn initiate_refund(&self, order: &PaymentOrder) -> Result<TransactionId, GatewayError> {
        self.submit("refund", order).await
    }

    fn name(&self) -> &str {
        "HttpPaymentGateway"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_base_url_is_not_configured() {
        let err = HttpPaymentGateway::new(HttpGatewayConfig::new("  ", "key")).unwrap_err();
        assert!(matches!(err, GatewayError::NotConfigured { .. }));
    }

    #[test]
    fn api_key_with_newline_is_rejected() {
        let err = HttpPaymentGateway::new(HttpGatewayConfig::new("http://rail", "bad\nkey")).unwrap_err();
        assert!(matches!(err, GatewayError::NotConfigured { .. }));
    }

    #[test]
    fn trailing_slash_is_trimmed() {
        let gw = HttpPaymentGateway::new(HttpGatewayConfig::new("http://rail/", "key")).unwrap();
        assert_eq!(gw.base_url, "http://rail");
    }
}
