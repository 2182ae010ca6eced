//! # Canonical JSON
//!
//! Every hash the engine records (request payload hashes, audit event
//! hashes) is taken over [`CanonicalBytes`]: RFC 8785 output from
//! `serde_jcs`, after a check that the value holds no JSON floats. Amounts
//! travel as decimal strings, so a float anywhere in a payload is a caller
//! error, not something to round.

use serde::Serialize;
use serde_json::Value;

use crate::error::CanonicalizationError;

/// JCS bytes of a float-free JSON value. Only [`CanonicalBytes::new`]
/// constructs one.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CanonicalBytes(Vec<u8>);

impl CanonicalBytes {
    /// # Errors
    ///
    /// `FloatRejected` carrying the first float found (depth-first), or
    /// `SerializationFailed` if `value` is not representable as JSON.
    pub fn new(value: &impl Serialize) -> Result<Self, CanonicalizationError> {
        let json = serde_json::to_value(value)?;
        ensure_no_floats(&json)?;
        Ok(Self(serde_jcs::to_vec(&json)?))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

fn ensure_no_floats(value: &Value) -> Result<(), CanonicalizationError> {
    match value {
        Value::Number(n) if !(n.is_i64() || n.is_u64()) => Err(
            CanonicalizationError::FloatRejected(n.as_f64().unwrap_or(f64::NAN)),
        ),
        Value::Array(items) => items.iter().try_for_each(ensure_no_floats),
        Value::Object(fields) => fields.values().try_for_each(ensure_no_floats),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn text(cb: &CanonicalBytes) -> &str {
        std::str::from_utf8(cb.as_bytes()).unwrap()
    }

    #[test]
    fn test_keys_sorted_at_every_depth() {
        let cb = CanonicalBytes::new(&json!({
            "toState": "ACTIVE",
            "evidence": ["b.pdf", "a.pdf"],
            "actor": {"role": "participant", "id": "buyer-1"}
        }))
        .unwrap();
        assert_eq!(
            text(&cb),
            r#"{"actor":{"id":"buyer-1","role":"participant"},"evidence":["b.pdf","a.pdf"],"toState":"ACTIVE"}"#
        );
    }

    #[test]
    fn test_string_amounts_and_integer_versions_pass() {
        let cb = CanonicalBytes::new(&json!({"version": 3, "amount": "4000.00"})).unwrap();
        assert_eq!(text(&cb), r#"{"amount":"4000.00","version":3}"#);
    }

    #[test]
    fn test_float_rejected_at_top_level() {
        match CanonicalBytes::new(&json!({"amount": 1.5})) {
            Err(CanonicalizationError::FloatRejected(f)) => assert_eq!(f, 1.5),
            other => panic!("expected FloatRejected, got {other:?}"),
        }
    }

    #[test]
    fn test_float_rejected_inside_metadata() {
        let payload = json!({"metadata": {"lines": [{"qty": 2}, {"rate": 0.18}]}});
        assert!(matches!(
            CanonicalBytes::new(&payload),
            Err(CanonicalizationError::FloatRejected(_))
        ));
    }

    #[test]
    fn test_struct_field_order_is_irrelevant() {
        #[derive(Serialize)]
        struct Forward {
            amount: &'static str,
            reason: &'static str,
        }
        #[derive(Serialize)]
        struct Reversed {
            reason: &'static str,
            amount: &'static str,
        }
        let a = CanonicalBytes::new(&Forward { amount: "1.00", reason: "m1" }).unwrap();
        let b = CanonicalBytes::new(&Reversed { reason: "m1", amount: "1.00" }).unwrap();
        assert_eq!(a, b);
    }
}
