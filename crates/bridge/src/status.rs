//! Per-upstream connection status record and request counters.
//!
//! The record is mutated only through its owning supervisor; readers
//! (`/health`, `/metrics`) take a consistent snapshot.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Healthy,
    Error,
    Reconnecting,
    Unknown,
}

/// Point-in-time view of one upstream's health.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionSnapshot {
    pub state: ConnectionState,
    pub error_count: u32,
    pub last_error: Option<String>,
    pub last_check: Option<DateTime<Utc>>,
    pub reconnect_attempts: u32,
    pub last_reconnect: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct RequestCounters {
    pub total: u64,
    pub succeeded: u64,
    pub failed: u64,
}

#[derive(Debug)]
struct Inner {
    snapshot: ConnectionSnapshot,
    counters: RequestCounters,
}

/// Observable health state of one upstream.
#[derive(Debug)]
pub struct StatusCell {
    name: String,
    inner: RwLock<Inner>,
}

impl StatusCell {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inner: RwLock::new(Inner {
                snapshot: ConnectionSnapshot {
                    state: ConnectionState::Unknown,
                    error_count: 0,
                    last_error: None,
                    last_check: None,
                    reconnect_attempts: 0,
                    last_reconnect: None,
                },
                counters: RequestCounters::default(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// A failed observation: call, probe, or reconnect attempt outcome.
    pub fn record_error(&self, error: &str) {
        let mut inner = self.inner.write();
        let snapshot = &mut inner.snapshot;
        snapshot.error_count += 1;
        snapshot.last_error = Some(error.to_string());
        snapshot.state = ConnectionState::Error;
        snapshot.last_check = Some(Utc::now());
        tracing::warn!(
            upstream = %self.name,
            error_count = snapshot.error_count,
            error = %error,
            "upstream error recorded"
        );
    }

    /// A successful observation resets the failure counters.
    pub fn record_success(&self) {
        let mut inner = self.inner.write();
        let snapshot = &mut inner.snapshot;
        if snapshot.error_count > 0 {
            tracing::info!(upstream = %self.name, "upstream recovered");
        }
        snapshot.state = ConnectionState::Healthy;
        snapshot.error_count = 0;
        snapshot.last_error = None;
        snapshot.last_check = Some(Utc::now());
        snapshot.reconnect_attempts = 0;
    }

    /// Entering a reconnect attempt. Caller must hold the upstream's
    /// reconnect lock.
    pub fn begin_reconnect(&self) {
        let mut inner = self.inner.write();
        let snapshot = &mut inner.snapshot;
        snapshot.state = ConnectionState::Reconnecting;
        snapshot.reconnect_attempts += 1;
        let now = Utc::now();
        snapshot.last_reconnect = Some(now);
        snapshot.last_check = Some(now);
    }

    pub fn snapshot(&self) -> ConnectionSnapshot {
        self.inner.read().snapshot.clone()
    }

    pub fn counters(&self) -> RequestCounters {
        self.inner.read().counters
    }

    pub fn count_request(&self) {
        self.inner.write().counters.total += 1;
    }

    pub fn count_success(&self) {
        self.inner.write().counters.succeeded += 1;
    }

    pub fn count_failure(&self) {
        self.inner.write().counters.failed += 1;
    }
}
