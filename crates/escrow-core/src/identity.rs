//! # Identifier Newtypes
//!
//! Escrows, disputes and fund movements are identified by UUIDs minted by the
//! engine. Parties, RFQs and gateway transactions are identified by opaque
//! strings minted elsewhere, validated to be non-empty and bounded.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::EscrowError;

/// Maximum length of an externally minted identifier.
pub const MAX_EXTERNAL_ID_LEN: usize = 128;

/// Identity used by the deadline scheduler and gateway callbacks.
pub const SYSTEM_ACTOR_ID: &str = "system";

macro_rules! uuid_identifier {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Generate a new random identifier.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Wrap an existing UUID.
            pub fn from_uuid(id: Uuid) -> Self {
                Self(id)
            }

            /// Access the inner UUID.
            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }

            /// Parse from the hyphenated string form.
            pub fn parse(s: &str) -> Result<Self, EscrowError> {
                Uuid::parse_str(s).map(Self).map_err(|e| {
                    EscrowError::Validation(format!(
                        "invalid {} {s:?}: {e}",
                        stringify!($name)
                    ))
                })
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                self.0.fmt(f)
            }
        }
    };
}

macro_rules! external_identifier {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Validate and wrap an externally minted identifier.
            ///
            /// # Errors
            ///
            /// Returns `EscrowError::Validation` if the value is blank or
            /// longer than [`MAX_EXTERNAL_ID_LEN`].
            pub fn new(value: impl Into<String>) -> Result<Self, EscrowError> {
                let value = value.into();
                let trimmed = value.trim();
                if trimmed.is_empty() {
                    return Err(EscrowError::Validation(format!("{} must not be empty", $label)));
                }
                if trimmed.chars().count() > MAX_EXTERNAL_ID_LEN {
                    return Err(EscrowError::Validation(format!(
                        "{} exceeds {MAX_EXTERNAL_ID_LEN} characters",
                        $label
                    )));
                }
                Ok(Self(trimmed.to_string()))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl TryFrom<String> for $name {
            type Error = EscrowError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

uuid_identifier!(
    /// Unique, immutable identifier of an escrow.
    EscrowId
);

uuid_identifier!(
    /// Identifier of a dispute record within an escrow.
    DisputeId
);

uuid_identifier!(
    /// Identifier of a fund movement (one release, refund, or expiry payout).
    MovementId
);

external_identifier!(
    /// A buyer, supplier, admin, mediator, or the system itself.
    PartyId,
    "party id"
);

external_identifier!(
    /// The RFQ/order an escrow secures.
    RfqId,
    "rfq id"
);

external_identifier!(
    /// A transaction id issued by the payment gateway.
    TransactionId,
    "transaction id"
);

impl PartyId {
    /// The engine's own party id.
    pub fn system() -> Self {
        Self(SYSTEM_ACTOR_ID.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uuid_ids_are_unique() {
        assert_ne!(EscrowId::new(), EscrowId::new());
        assert_ne!(MovementId::new(), MovementId::new());
    }

    #[test]
    fn test_uuid_id_parse_and_display() {
        let id = EscrowId::new();
        let parsed = EscrowId::parse(&id.to_string()).unwrap();
        assert_eq!(id, parsed);
        assert!(EscrowId::parse("not-a-uuid").is_err());
    }

    #[test]
    fn test_uuid_id_serializes_as_plain_string() {
        let id = DisputeId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{id}\""));
    }

    #[test]
    fn test_party_id_trims() {
        let id = PartyId::new("  buyer-1 ").unwrap();
        assert_eq!(id.as_str(), "buyer-1");
    }

    #[test]
    fn test_party_id_rejects_blank() {
        assert!(PartyId::new("").is_err());
        assert!(PartyId::new("   ").is_err());
    }

    #[test]
    fn test_party_id_rejects_oversized() {
        let long = "x".repeat(MAX_EXTERNAL_ID_LEN + 1);
        assert!(PartyId::new(long).is_err());
    }

    #[test]
    fn test_external_id_deserialize_validates() {
        let ok: TransactionId = serde_json::from_str("\"tx-1\"").unwrap();
        assert_eq!(ok.as_str(), "tx-1");
        assert!(serde_json::from_str::<TransactionId>("\"\"").is_err());
    }
}
