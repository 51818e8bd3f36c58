//! Reconnect policy: error classification and attempt throttling.
//!
//! Classification is a substring check against whatever the transport layer
//! surfaces. That is deliberate (it has to match foreign library messages);
//! operators can extend the list per upstream via `extraRecoverableErrors`
//! without a rebuild.

use crate::status::{ConnectionSnapshot, ConnectionState};
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Signatures that mark an error as worth reconnecting over.
const RECOVERABLE_SIGNATURES: &[&str] = &[
    "502",
    "503",
    "504",
    "520",
    "521",
    "522",
    "523",
    "524",
    "525",
    "connection reset",
    "connection refused",
    "timeout",
    "network unreachable",
];

/// Subset that bypasses the error-count gate: gateway-class 5xx and any
/// timeout reconnect immediately instead of waiting for three strikes.
const CRITICAL_SIGNATURES: &[&str] = &[
    "502", "503", "504", "520", "521", "522", "523", "524", "525", "timeout",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Reconnect-worthy and urgent.
    Critical,
    /// Reconnect-worthy once the error count crosses the threshold.
    Recoverable,
    /// Malformed payloads, auth failures, anything a new channel won't fix.
    Unrecoverable,
}

impl ErrorClass {
    pub fn is_recoverable(self) -> bool {
        !matches!(self, Self::Unrecoverable)
    }

    pub fn is_critical(self) -> bool {
        matches!(self, Self::Critical)
    }
}

pub fn classify(message: &str, extra_signatures: &[String]) -> ErrorClass {
    let lower = message.to_lowercase();
    if CRITICAL_SIGNATURES.iter().any(|s| lower.contains(s)) {
        ErrorClass::Critical
    } else if RECOVERABLE_SIGNATURES.iter().any(|s| lower.contains(s))
        || extra_signatures
            .iter()
            .any(|s| lower.contains(&s.to_lowercase()))
    {
        ErrorClass::Recoverable
    } else {
        ErrorClass::Unrecoverable
    }
}

/// Throttle for reconnect attempts on one upstream.
#[derive(Debug, Clone, Copy)]
pub struct ReconnectPolicy {
    pub min_interval: Duration,
    pub max_attempts: u32,
    pub error_threshold: u32,
}

impl ReconnectPolicy {
    /// Whether a reconnect should be attempted right now. All gates must
    /// hold: not already healthy, the minimum interval since the previous
    /// attempt has elapsed, the attempt budget is not spent, and either the
    /// error count has crossed the threshold or the triggering error is
    /// critical.
    pub fn should_reconnect(
        &self,
        snapshot: &ConnectionSnapshot,
        class: ErrorClass,
        now: DateTime<Utc>,
    ) -> bool {
        if snapshot.state == ConnectionState::Healthy {
            return false;
        }
        if let Some(last) = snapshot.last_reconnect
            && now.signed_duration_since(last).num_seconds() < self.min_interval.as_secs() as i64
        {
            return false;
        }
        if snapshot.reconnect_attempts >= self.max_attempts {
            return false;
        }
        snapshot.error_count >= self.error_threshold || class.is_critical()
    }

    /// Backoff before transport-open retry `attempt` (0-based): 2^attempt
    /// seconds, capped at 5.
    pub fn open_backoff(attempt: u32) -> Duration {
        Duration::from_secs(2u64.saturating_pow(attempt).min(5))
    }
}
