//! Ledger-wide limits consulted by the validator.

use std::collections::BTreeSet;

use chrono::Duration;
use escrow_core::Currency;

pub const DEFAULT_ALLOWED_CURRENCIES: [&str; 6] = ["INR", "USD", "EUR", "GBP", "AED", "SGD"];

#[derive(Debug, Clone)]
pub struct LedgerPolicy {
    pub allowed_currencies: BTreeSet<String>,
    pub max_terms_len: usize,
    pub max_reason_len: usize,
    pub max_description_len: usize,
    /// How long an `OPEN` dispute may wait for a mediator before the
    /// scheduler escalates it.
    pub mediation_timeout: Duration,
}

impl LedgerPolicy {
    pub fn allows(&self, currency: &Currency) -> bool {
        self.allowed_currencies.contains(currency.as_str())
    }

    pub fn with_currencies<I, S>(mut self, currencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_currencies = currencies.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_mediation_timeout(mut self, timeout: Duration) -> Self {
        self.mediation_timeout = timeout;
        self
    }
}

impl Default for LedgerPolicy {
    fn default() -> Self {
        Self {
            allowed_currencies: DEFAULT_ALLOWED_CURRENCIES
                .iter()
                .map(|c| c.to_string())
                .collect(),
            max_terms_len: 1000,
            max_reason_len: 500,
            max_description_len: 4000,
            mediation_timeout: Duration::hours(72),
        }
    }
}
