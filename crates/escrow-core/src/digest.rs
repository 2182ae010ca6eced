//! SHA-256 over canonical JSON. Audit chain hashes and request payload
//! hashes are both produced here, as 64-char lowercase hex.

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::canonical::CanonicalBytes;
use crate::error::CanonicalizationError;

pub fn sha256_hex(data: &CanonicalBytes) -> String {
    Sha256::digest(data.as_bytes())
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

/// Canonicalize `value`, then hash it.
pub fn canonical_sha256(value: &impl Serialize) -> Result<String, CanonicalizationError> {
    Ok(sha256_hex(&CanonicalBytes::new(value)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_hex_is_64_lowercase_chars() {
        let hex = canonical_sha256(&json!({"operation": "release"})).unwrap();
        assert_eq!(hex.len(), 64);
        assert!(hex.chars().all(|c| matches!(c, '0'..='9' | 'a'..='f')));
    }

    #[test]
    fn test_known_vector_for_empty_object() {
        assert_eq!(
            canonical_sha256(&json!({})).unwrap(),
            "44136fa355b3678a1146ad16f7e8649e94fb4fc21fe77e8310c060f61caaff8a"
        );
    }

    #[test]
    fn test_key_order_does_not_change_hash() {
        let a = canonical_sha256(&json!({"amount": "10.00", "reason": "ok"})).unwrap();
        let b = canonical_sha256(&json!({"reason": "ok", "amount": "10.00"})).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_amount_change_changes_hash() {
        let a = canonical_sha256(&json!({"amount": "4000.00"})).unwrap();
        let b = canonical_sha256(&json!({"amount": "4000.01"})).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_float_payload_cannot_be_hashed() {
        assert!(matches!(
            canonical_sha256(&json!({"amount": 40.5})),
            Err(CanonicalizationError::FloatRejected(_))
        ));
    }
}
