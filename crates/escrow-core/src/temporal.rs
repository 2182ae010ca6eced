//! # Time: UTC Timestamps and Injectable Clocks
//!
//! `Timestamp` is UTC with second precision, rendered `YYYY-MM-DDTHH:MM:SSZ`.
//! Audit hashes include timestamps, so the representation must be
//! deterministic: sub-seconds are truncated at construction and the strict
//! parser rejects explicit offsets.
//!
//! Deadline and mediation-timeout logic never calls `Utc::now()` directly.
//! It reads a [`Clock`], which is a [`SystemClock`] in production and a
//! [`ManualClock`] in tests.

use std::sync::Arc;

use chrono::{DateTime, Duration, Timelike, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::EscrowError;

/// A UTC-only timestamp, truncated to seconds precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Current UTC time, truncated.
    pub fn now() -> Self {
        Self(truncate_to_seconds(Utc::now()))
    }

    /// From a `chrono::DateTime<Utc>`, truncating sub-seconds.
    pub fn from_utc(dt: DateTime<Utc>) -> Self {
        Self(truncate_to_seconds(dt))
    }

    /// Parse an RFC 3339 string with a `Z` suffix. Explicit offsets, even
    /// `+00:00`, are rejected.
    pub fn parse(s: &str) -> Result<Self, EscrowError> {
        if !s.ends_with('Z') {
            return Err(EscrowError::Validation(format!(
                "timestamp must be UTC with a Z suffix, got {s:?}"
            )));
        }
        DateTime::parse_from_rfc3339(s)
            .map(|dt| Self::from_utc(dt.with_timezone(&Utc)))
            .map_err(|e| EscrowError::Validation(format!("invalid RFC 3339 timestamp {s:?}: {e}")))
    }

    pub fn as_datetime(&self) -> &DateTime<Utc> {
        &self.0
    }

    /// This instant shifted by `delta`, or `None` if the result falls
    /// outside the range chrono can represent.
    pub fn checked_plus(&self, delta: Duration) -> Option<Self> {
        self.0.checked_add_signed(delta).map(Self::from_utc)
    }

    /// This instant shifted by `delta`, clamped to the representable range.
    /// A forward overflow yields the latest representable second, a
    /// backward one the earliest. Use [`Timestamp::checked_plus`] when the
    /// caller must know the shift did not fit.
    pub fn plus(&self, delta: Duration) -> Self {
        self.checked_plus(delta).unwrap_or_else(|| {
            if delta < Duration::zero() {
                Self::from_utc(DateTime::<Utc>::MIN_UTC)
            } else {
                Self::from_utc(DateTime::<Utc>::MAX_UTC)
            }
        })
    }

    /// Render as ISO 8601 with Z suffix (e.g., `2026-01-15T12:00:00Z`).
    pub fn to_iso8601(&self) -> String {
        self.0.format("%Y-%m-%dT%H:%M:%SZ").to_string()
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_iso8601())
    }
}

fn truncate_to_seconds(dt: DateTime<Utc>) -> DateTime<Utc> {
    dt.with_nanosecond(0).unwrap_or(dt)
}

/// Source of the current time.
pub trait Clock: Send + Sync + std::fmt::Debug {
    fn now(&self) -> Timestamp;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Timestamp::now()
    }
}

/// A clock that only moves when told to. Clones share the same instant.
#[derive(Debug, Clone)]
pub struct ManualClock {
    current: Arc<Mutex<Timestamp>>,
}

impl ManualClock {
    pub fn new(start: Timestamp) -> Self {
        Self {
            current: Arc::new(Mutex::new(start)),
        }
    }

    /// Move the clock forward by `delta`.
    pub fn advance(&self, delta: Duration) {
        let mut current = self.current.lock();
        *current = current.plus(delta);
    }

    pub fn set(&self, to: Timestamp) {
        *self.current.lock() = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        *self.current.lock()
    }
}
