//! Payment gateway error types.

use escrow_core::EscrowError;

/// Errors from payment gateway calls.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    /// The request did not complete within the client timeout.
    #[error("gateway request timed out after {elapsed_ms}ms")]
    Timeout {
        elapsed_ms: u64,
    },

    /// Connection failure, 5xx, 408 or 429.
    #[error("gateway unavailable: {reason}")]
    Unavailable {
        reason: String,
    },

    /// The gateway refused the instruction. Retrying with the same payload
    /// will not help.
    #[error("instruction rejected by gateway: {reason}")]
    Rejected {
        reason: String,
    },

    /// The gateway answered 2xx with a body we could not interpret.
    #[error("invalid gateway response: {reason}")]
    InvalidResponse {
        reason: String,
    },

    #[error("gateway not configured: {reason}")]
    NotConfigured {
        reason: String,
    },
}

impl GatewayError {
    /// Transient failures, retried with the same idempotency key.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Unavailable { .. })
    }
}

impl From<GatewayError> for EscrowError {
    fn from(err: GatewayError) -> Self {
        EscrowError::Gateway(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_failures_are_retryable() {
        assert!(GatewayError::Timeout { elapsed_ms: 10 }.is_retryable());
        assert!(GatewayError::Unavailable { reason: "503".into() }.is_retryable());
        assert!(!GatewayError::Rejected { reason: "closed".into() }.is_retryable());
        assert!(!GatewayError::InvalidResponse { reason: "empty".into() }.is_retryable());
        assert!(!GatewayError::NotConfigured { reason: "url".into() }.is_retryable());
    }

    #[test]
    fn converts_to_gateway_kind() {
        let err: EscrowError = GatewayError::Timeout { elapsed_ms: 5 }.into();
        assert_eq!(err.kind(), "GATEWAY_ERROR");
    }
}
