//! # Resolution Outcomes
//!
//! What a disputing party asks for ([`RequestedAction`]) and what the
//! mediator decides ([`ResolutionOutcome`]). An outcome is turned into a
//! [`Payout`] against the escrow's held amount; the escrow applies the
//! payout in the same commit that resolves the dispute.

use escrow_core::Amount;
use serde::{Deserialize, Serialize};

use crate::error::ArbitrationError;

/// The remedy requested when a dispute is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestedAction {
    Refund,
    PartialRefund,
    Release,
    Mediation,
}

impl RequestedAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Refund => "refund",
            Self::PartialRefund => "partial_refund",
            Self::Release => "release",
            Self::Mediation => "mediation",
        }
    }

    pub fn parse(s: &str) -> Result<Self, ArbitrationError> {
        match s {
            "refund" => Ok(Self::Refund),
            "partial_refund" => Ok(Self::PartialRefund),
            "release" => Ok(Self::Release),
            "mediation" => Ok(Self::Mediation),
            other => Err(ArbitrationError::Validation(format!(
                "unknown requested action: {other:?}"
            ))),
        }
    }
}

impl std::fmt::Display for RequestedAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The mediator's decision.
///
/// `Release` and `Refund` default to the full held amount when no amount is
/// given. `PartialRefund` always names its amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResolutionOutcome {
    Release {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        amount: Option<Amount>,
    },
    Refund {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        amount: Option<Amount>,
    },
    PartialRefund { amount: Amount },
}

impl ResolutionOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Release { .. } => "release",
            Self::Refund { .. } => "refund",
            Self::PartialRefund { .. } => "partial_refund",
        }
    }

    /// The amount the outcome names, if any. `None` means the full held
    /// amount.
    pub fn stated_amount(&self) -> Option<Amount> {
        match *self {
            Self::Release { amount } | Self::Refund { amount } => amount,
            Self::PartialRefund { amount } => Some(amount),
        }
    }

    /// Compute the payout this outcome implies.
    ///
    /// # Errors
    ///
    /// - `Validation` if an explicit amount is zero.
    /// - `ContestedExceeded` if a partial refund exceeds the contested amount.
    /// - `HeldExceeded` if any amount exceeds the held amount.
    pub fn payout(
        &self,
        held: Amount,
        contested: Option<Amount>,
    ) -> Result<Payout, ArbitrationError> {
        let (target, amount) = match *self {
            Self::Release { amount } => (PayoutTarget::Supplier, amount.unwrap_or(held)),
            Self::Refund { amount } => (PayoutTarget::Buyer, amount.unwrap_or(held)),
            Self::PartialRefund { amount } => {
                if let Some(limit) = contested {
                    if amount > limit {
                        return Err(ArbitrationError::ContestedExceeded {
                            requested: amount.to_string(),
                            contested: limit.to_string(),
                        });
                    }
                }
                (PayoutTarget::Buyer, amount)
            }
        };
        if amount.is_zero() {
            return Err(ArbitrationError::Validation(format!(
                "{} resolution must move a positive amount",
                self.as_str()
            )));
        }
        if amount > held {
            return Err(ArbitrationError::HeldExceeded {
                requested: amount.to_string(),
                held: held.to_string(),
            });
        }
        Ok(Payout { target, amount })
    }
}

/// Who receives funds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayoutTarget {
    Supplier,
    Buyer,
}

/// Funds leaving custody as the result of a resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payout {
    pub target: PayoutTarget,
    pub amount: Amount,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn units(n: u64) -> Amount {
        Amount::from_units(n)
    }

    #[test]
    fn release_defaults_to_full_held() {
        let payout = ResolutionOutcome::Release { amount: None }
            .payout(units(6000), None)
            .unwrap();
        assert_eq!(payout.target, PayoutTarget::Supplier);
        assert_eq!(payout.amount, units(6000));
    }

    #[test]
    fn refund_with_amount() {
        let payout = ResolutionOutcome::Refund {
            amount: Some(units(100)),
        }
        .payout(units(6000), None)
        .unwrap();
        assert_eq!(payout.target, PayoutTarget::Buyer);
        assert_eq!(payout.amount, units(100));
    }

    #[test]
    fn partial_refund_within_contested() {
        let payout = ResolutionOutcome::PartialRefund {
            amount: units(3000),
        }
        .payout(units(6000), Some(units(3000)))
        .unwrap();
        assert_eq!(payout.amount, units(3000));
    }

    #[test]
    fn partial_refund_above_contested_rejected() {
        let err = ResolutionOutcome::PartialRefund {
            amount: units(3001),
        }
        .payout(units(6000), Some(units(3000)))
        .unwrap_err();
        assert!(matches!(err, ArbitrationError::ContestedExceeded { .. }));
    }

    #[test]
    fn payout_above_held_rejected() {
        let err = ResolutionOutcome::Release {
            amount: Some(units(7000)),
        }
        .payout(units(6000), None)
        .unwrap_err();
        assert!(matches!(err, ArbitrationError::HeldExceeded { .. }));
    }

    #[test]
    fn zero_payout_rejected() {
        let err = ResolutionOutcome::Refund { amount: None }
            .payout(Amount::ZERO, None)
            .unwrap_err();
        assert!(matches!(err, ArbitrationError::Validation(_)));
    }

    #[test]
    fn outcome_serde_shape() {
        let outcome: ResolutionOutcome =
            serde_json::from_str(r#"{"type":"partial_refund","amount":"3000"}"#).unwrap();
        assert_eq!(
            outcome,
            ResolutionOutcome::PartialRefund {
                amount: units(3000)
            }
        );
        let release: ResolutionOutcome = serde_json::from_str(r#"{"type":"release"}"#).unwrap();
        assert_eq!(release, ResolutionOutcome::Release { amount: None });
    }

    #[test]
    fn requested_action_parse() {
        assert_eq!(
            RequestedAction::parse("partial_refund").unwrap(),
            RequestedAction::PartialRefund
        );
        assert!(RequestedAction::parse("chargeback").is_err());
    }
}
