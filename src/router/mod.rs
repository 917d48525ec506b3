//! Router - aggregates backend tool servers behind one catalog
//!
//! - `registry`: fan-out discovery and atomic catalog snapshots
//! - `dispatcher`: resolve, validate and forward one invocation
//! - `service`: backend lifecycle, health loop and the wire-facing handler

mod dispatcher;
mod registry;
mod service;

pub use dispatcher::{Dispatcher, FailureKind, InvocationFailure, InvocationRequest, InvocationResult};
pub use registry::{RefreshReport, ToolRegistry};
pub use service::Router;

use std::time::Duration;

use crate::tools::CollisionPolicy;

/// Router timing and policy knobs
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Address `toolmux serve` listens on
    pub listen: String,
    /// Time between health rounds
    pub health_interval: Duration,
    /// Bound on a single `health` probe
    pub probe_timeout: Duration,
    /// Bound on a single backend's `tools.list` during refresh
    pub discovery_timeout: Duration,
    /// Bound on a forwarded `tools.call`
    pub invoke_timeout: Duration,
    /// Consecutive failed probes before healthy -> unreachable
    pub failure_threshold: u32,
    pub collision_policy: CollisionPolicy,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:3000".to_string(),
            health_interval: Duration::from_secs(10),
            probe_timeout: Duration::from_secs(2),
            discovery_timeout: Duration::from_secs(5),
            invoke_timeout: Duration::from_secs(60),
            failure_threshold: 3,
            collision_policy: CollisionPolicy::Reject,
        }
    }
}

impl RouterConfig {
    /// Set the collision policy
    pub fn with_collision_policy(mut self, policy: CollisionPolicy) -> Self {
        self.collision_policy = policy;
        self
    }

    /// Set the health interval
    pub fn with_health_interval(mut self, interval: Duration) -> Self {
        self.health_interval = interval;
        self
    }

    /// Set probe, discovery and invoke timeouts at once
    pub fn with_timeouts(mut self, probe: Duration, discovery: Duration, invoke: Duration) -> Self {
        self.probe_timeout = probe;
        self.discovery_timeout = discovery;
        self.invoke_timeout = invoke;
        self
    }

    /// Set the failure threshold
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_router_config_default() {
        let config = RouterConfig::default();
        assert_eq!(config.health_interval, Duration::from_secs(10));
        assert_eq!(config.failure_threshold, 3);
        assert_eq!(config.collision_policy, CollisionPolicy::Reject);
    }

    #[test]
    fn test_router_config_builders() {
        let config = RouterConfig::default()
            .with_collision_policy(CollisionPolicy::Qualify)
            .with_health_interval(Duration::from_millis(50))
            .with_timeouts(Duration::from_millis(10), Duration::from_millis(20), Duration::from_millis(30))
            .with_failure_threshold(1);
        assert_eq!(config.collision_policy, CollisionPolicy::Qualify);
        assert_eq!(config.health_interval, Duration::from_millis(50));
        assert_eq!(config.discovery_timeout, Duration::from_millis(20));
        assert_eq!(config.invoke_timeout, Duration::from_millis(30));
        assert_eq!(config.failure_threshold, 1);
    }
}
