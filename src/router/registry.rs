//! Tool Registry - builds catalog snapshots from backend discovery

use std::sync::{Arc, RwLock};
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::Mutex;

use crate::backend::Backend;
use crate::error::{Result, ToolmuxError};
use crate::tools::{Collision, CollisionPolicy, ToolCatalog, ToolSpec, fingerprint_specs};

/// Outcome of one refresh
#[derive(Debug, Clone)]
pub struct RefreshReport {
    /// The snapshot now being served
    pub catalog: Arc<ToolCatalog>,
    /// Healthy backends whose discovery failed; now marked unreachable
    pub unreachable: Vec<String>,
    pub collisions: Vec<Collision>,
}

impl RefreshReport {
    /// `CatalogRefreshPartialFailure` when any backend was skipped
    pub fn partial_failure(&self) -> Option<ToolmuxError> {
        if self.unreachable.is_empty() {
            None
        } else {
            Some(ToolmuxError::CatalogRefreshPartialFailure(self.unreachable.clone()))
        }
    }

    pub fn is_complete(&self) -> bool {
        self.unreachable.is_empty()
    }
}

/// Holds the current catalog snapshot; readers clone the `Arc` and never block a refresh
pub struct ToolRegistry {
    policy: CollisionPolicy,
    discovery_timeout: Duration,
    catalog: RwLock<Arc<ToolCatalog>>,
    /// Serializes refreshes so an older fan-out never overwrites a newer snapshot
    refreshing: Mutex<()>,
}

impl ToolRegistry {
    pub fn new(policy: CollisionPolicy, discovery_timeout: Duration) -> Self {
        Self {
            policy,
            discovery_timeout,
            catalog: RwLock::new(Arc::new(ToolCatalog::new())),
            refreshing: Mutex::new(()),
        }
    }

    pub fn policy(&self) -> CollisionPolicy {
        self.policy
    }

    /// Current snapshot
    pub fn snapshot(&self) -> Arc<ToolCatalog> {
        Arc::clone(&self.catalog.read().unwrap_or_else(|e| e.into_inner()))
    }

    /// Query every healthy backend, merge in registration order, swap the snapshot.
    ///
    /// A backend that fails or times out is marked unreachable and left out;
    /// the refresh itself never fails. Concurrent refreshes run one at a time,
    /// each selecting healthy backends only once it holds the lock.
    pub async fn refresh(&self, backends: &[Arc<Backend>]) -> RefreshReport {
        let _guard = self.refreshing.lock().await;
        let healthy: Vec<&Arc<Backend>> = backends.iter().filter(|b| b.handle().is_healthy()).collect();
        let timeout = self.discovery_timeout;

        let results = join_all(healthy.iter().map(|backend| async move {
            let listed = match tokio::time::timeout(timeout, backend.client().list_tools()).await {
                Ok(result) => result,
                Err(_) => Err(ToolmuxError::Transport(format!(
                    "tools.list timed out after {:?}",
                    timeout
                ))),
            };
            (backend, listed)
        }))
        .await;

        let mut lists: Vec<(String, Vec<ToolSpec>)> = Vec::with_capacity(results.len());
        let mut unreachable = Vec::new();
        for (backend, listed) in results {
            match listed {
                Ok(tools) => {
                    log::debug!("Backend {} advertised {} tools", backend.id(), tools.len());
                    backend.handle().set_advertised(Some(fingerprint_specs(&tools)));
                    lists.push((backend.id().to_string(), tools));
                }
                Err(e) => {
                    log::warn!("Discovery failed for backend {}: {}", backend.id(), e);
                    backend.handle().mark_unreachable(&e.to_string());
                    unreachable.push(backend.id().to_string());
                }
            }
        }

        let (catalog, collisions) = ToolCatalog::merge(self.policy, lists);
        let catalog = Arc::new(catalog);
        *self.catalog.write().unwrap_or_else(|e| e.into_inner()) = Arc::clone(&catalog);

        let report = RefreshReport {
            catalog,
            unreachable,
            collisions,
        };
        match report.partial_failure() {
            Some(e) => log::warn!("{}", e),
            None => log::info!(
                "Catalog refreshed: {} tools from {} backends",
                report.catalog.len(),
                report.catalog.sources().len()
            ),
        }
        report
    }

    /// Like [`refresh`](Self::refresh) but surfaces skipped backends as an error
    pub async fn refresh_strict(&self, backends: &[Arc<Backend>]) -> Result<Arc<ToolCatalog>> {
        let report = self.refresh(backends).await;
        match report.partial_failure() {
            Some(e) => Err(e),
            None => Ok(report.catalog),
        }
    }
}
