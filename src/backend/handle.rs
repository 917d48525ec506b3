//! Backend handle: identity, address and liveness of one tool server

use std::sync::RwLock;
use std::sync::atomic::{AtomicU32, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Liveness of a backend as seen by the router
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendStatus {
    /// Registered, no successful probe yet
    Starting,
    /// Answering probes; its tools are in the catalog
    Healthy,
    /// Failed probes or calls; its tools are dropped at the next refresh
    Unreachable,
    /// Shut down or deregistered
    Stopped,
}

impl BackendStatus {
    /// Returns true if no further transitions are possible
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped)
    }

    /// Whether `self -> next` is an allowed transition
    pub fn can_transition_to(&self, next: BackendStatus) -> bool {
        match (self, next) {
            (Self::Stopped, _) => false,
            (_, Self::Stopped) => true,
            (Self::Starting, Self::Healthy) => true,
            (Self::Healthy, Self::Unreachable) => true,
            (Self::Unreachable, Self::Healthy) => true,
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Healthy => "healthy",
            Self::Unreachable => "unreachable",
            Self::Stopped => "stopped",
        }
    }
}

impl std::fmt::Display for BackendStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of a handle, for reporting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendSnapshot {
    pub id: String,
    pub address: String,
    pub status: BackendStatus,
    pub consecutive_failures: u32,
    pub last_probe_at: Option<DateTime<Utc>>,
}

/// Shared, interior-mutable state of one backend.
///
/// Status only moves along the allowed transitions; any other request is
/// ignored and reported as `false`.
#[derive(Debug)]
pub struct BackendHandle {
    id: String,
    address: String,
    status: RwLock<BackendStatus>,
    consecutive_failures: AtomicU32,
    last_probe_at: RwLock<Option<DateTime<Utc>>>,
    /// Fingerprint of the tool list seen at the last successful discovery
    advertised: RwLock<Option<String>>,
}

impl BackendHandle {
    pub fn new(id: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
            status: RwLock::new(BackendStatus::Starting),
            consecutive_failures: AtomicU32::new(0),
            last_probe_at: RwLock::new(None),
            advertised: RwLock::new(None),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn status(&self) -> BackendStatus {
        *self.status.read().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_healthy(&self) -> bool {
        self.status() == BackendStatus::Healthy
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::SeqCst)
    }

    pub fn last_probe_at(&self) -> Option<DateTime<Utc>> {
        *self.last_probe_at.read().unwrap_or_else(|e| e.into_inner())
    }

    pub fn advertised(&self) -> Option<String> {
        self.advertised.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn set_advertised(&self, fingerprint: Option<String>) {
        *self.advertised.write().unwrap_or_else(|e| e.into_inner()) = fingerprint;
    }

    /// Whether a probe-reported fingerprint differs from the one last discovered.
    /// Unknown on either side counts as unchanged.
    pub fn advertises_changed(&self, reported: Option<&str>) -> bool {
        match (reported, self.advertised()) {
            (Some(reported), Some(known)) => reported != known,
            _ => false,
        }
    }

    /// Move to `next` if allowed; returns whether the status changed
    pub fn transition(&self, next: BackendStatus) -> bool {
        let mut status = self.status.write().unwrap_or_else(|e| e.into_inner());
        if !status.can_transition_to(next) {
            log::debug!("Backend {}: ignoring transition {} -> {}", self.id, *status, next);
            return false;
        }
        log::info!("Backend {}: {} -> {}", self.id, *status, next);
        *status = next;
        true
    }

    /// Successful probe: reset the failure count and become healthy
    pub fn record_success(&self) -> bool {
        self.touch();
        self.consecutive_failures.store(0, Ordering::SeqCst);
        match self.status() {
            BackendStatus::Starting | BackendStatus::Unreachable => self.transition(BackendStatus::Healthy),
            _ => false,
        }
    }

    /// Failed probe: flips healthy -> unreachable once `threshold` failures accumulate
    pub fn record_failure(&self, threshold: u32) -> bool {
        self.touch();
        let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
        log::debug!("Backend {}: {} consecutive failures", self.id, failures);
        if failures >= threshold.max(1) && self.status() == BackendStatus::Healthy {
            return self.transition(BackendStatus::Unreachable);
        }
        false
    }

    /// A call or discovery failed outright; no threshold applies
    pub fn mark_unreachable(&self, reason: &str) -> bool {
        self.consecutive_failures.fetch_add(1, Ordering::SeqCst);
        if self.status() != BackendStatus::Healthy {
            return false;
        }
        log::warn!("Backend {} marked unreachable: {}", self.id, reason);
        self.transition(BackendStatus::Unreachable)
    }

    /// Terminal stop
    pub fn stop(&self) -> bool {
        self.transition(BackendStatus::Stopped)
    }

    pub fn snapshot(&self) -> BackendSnapshot {
        BackendSnapshot {
            id: self.id.clone(),
            address: self.address.clone(),
            status: self.status(),
            consecutive_failures: self.consecutive_failures(),
            last_probe_at: self.last_probe_at(),
        }
    }

    fn touch(&self) {
        *self.last_probe_at.write().unwrap_or_else(|e| e.into_inner()) = Some(Utc::now());
    }
}
