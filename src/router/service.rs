//! Router service - backend lifecycle, health loop and the wire-facing handler

use std::sync::{Arc, RwLock, Weak};

use async_trait::async_trait;
use futures::future::join_all;
use serde_json::Value;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;

use crate::agent::ToolInvoker;
use crate::backend::{Backend, BackendConfig, BackendSnapshot, Connector, connector_for};
use crate::error::{Result, ToolmuxError};
use crate::fetch::Fetcher;
use crate::ipc::messages::{
    CallParams, HealthResult, HealthState, Methods, ToolListResult, WireError, WireRequest, WireResponse,
};
use crate::ipc::server::RequestHandler;
use crate::tools::{ToolCatalog, ToolSpec};

use super::RouterConfig;
use super::dispatcher::{Dispatcher, InvocationRequest, InvocationResult};
use super::registry::{RefreshReport, ToolRegistry};

/// Aggregates backends into one catalog and dispatches calls to them
pub struct Router {
    config: RouterConfig,
    fetcher: Fetcher,
    backends: RwLock<Vec<Arc<Backend>>>,
    registry: ToolRegistry,
    dispatcher: Dispatcher,
    health_task: Mutex<Option<JoinHandle<()>>>,
    shutdown_tx: watch::Sender<bool>,
}

impl Router {
    /// `fetcher` backs any builtin data-source backends
    pub fn new(config: RouterConfig, fetcher: Fetcher) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            registry: ToolRegistry::new(config.collision_policy, config.discovery_timeout),
            dispatcher: Dispatcher::new(config.invoke_timeout),
            config,
            fetcher,
            backends: RwLock::new(Vec::new()),
            health_task: Mutex::new(None),
            shutdown_tx,
        }
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Register a declared backend; it joins the catalog after its first successful probe
    pub fn register(&self, config: &BackendConfig) -> Result<()> {
        let connector = connector_for(config, &self.fetcher, self.config.invoke_timeout)?;
        self.register_with(config.id.clone(), config.address(), connector)
    }

    /// Register a backend with an explicit connector
    pub fn register_with(
        &self,
        id: impl Into<String>,
        address: impl Into<String>,
        connector: Arc<dyn Connector>,
    ) -> Result<()> {
        let id = id.into();
        let mut backends = self.backends.write().unwrap_or_else(|e| e.into_inner());
        if backends.iter().any(|b| b.id() == id) {
            return Err(ToolmuxError::DuplicateBackend(id));
        }
        let backend = Backend::new(id.clone(), address, connector);
        log::info!("Registered backend {} at {}", id, backend.handle().address());
        backends.push(Arc::new(backend));
        Ok(())
    }

    /// Remove a backend, close its channel and drop its tools
    pub async fn deregister(&self, id: &str) -> Result<RefreshReport> {
        let removed = {
            let mut backends = self.backends.write().unwrap_or_else(|e| e.into_inner());
            let index = backends
                .iter()
                .position(|b| b.id() == id)
                .ok_or_else(|| ToolmuxError::BackendNotFound(id.to_string()))?;
            backends.remove(index)
        };
        removed.handle().stop();
        removed.client().disconnect().await;
        log::info!("Deregistered backend {}", id);
        Ok(self.refresh().await)
    }

    /// Backends in registration order
    pub fn backends(&self) -> Vec<Arc<Backend>> {
        self.backends.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn backend_status(&self) -> Vec<BackendSnapshot> {
        self.backends().iter().map(|b| b.handle().snapshot()).collect()
    }

    /// Probe every backend, build the first catalog and start the health loop
    pub async fn start(self: &Arc<Self>) -> Result<RefreshReport> {
        log::info!("Starting router with {} backends", self.backends().len());
        self.probe_all().await;
        let report = self.refresh().await;

        let mut task = self.health_task.lock().await;
        if task.is_none() {
            *task = Some(tokio::spawn(health_loop(
                Arc::downgrade(self),
                self.config.health_interval,
                self.shutdown_tx.subscribe(),
            )));
        }
        Ok(report)
    }

    /// Current catalog snapshot
    pub fn list_catalog(&self) -> Arc<ToolCatalog> {
        self.registry.snapshot()
    }

    /// Rebuild the catalog from healthy backends
    pub async fn refresh(&self) -> RefreshReport {
        self.registry.refresh(&self.backends()).await
    }

    pub async fn invoke(&self, name: &str, arguments: Value) -> InvocationResult {
        let catalog = self.list_catalog();
        self.dispatcher
            .invoke(&catalog, &self.backends(), InvocationRequest::new(name, arguments))
            .await
    }

    /// Like [`invoke`](Self::invoke) but as a `Result`
    pub async fn try_invoke(&self, name: &str, arguments: Value) -> Result<Value> {
        let catalog = self.list_catalog();
        self.dispatcher
            .try_invoke(&catalog, &self.backends(), InvocationRequest::new(name, arguments))
            .await
    }

    /// One health round; refreshes the catalog when the healthy set changed
    /// or a healthy backend reports a different tool list than was discovered
    pub async fn health_check(&self) -> Vec<BackendSnapshot> {
        let changed = self.probe_all().await;

        let healthy: Vec<String> = self
            .backends()
            .iter()
            .filter(|b| b.handle().is_healthy())
            .map(|b| b.id().to_string())
            .collect();
        let catalog = self.list_catalog();
        if healthy.as_slice() != catalog.sources() {
            log::info!(
                "Healthy backends changed ({:?} -> {:?}), refreshing catalog",
                catalog.sources(),
                healthy
            );
            self.refresh().await;
        } else if !changed.is_empty() {
            log::info!("Backends {:?} advertise a changed tool list, refreshing catalog", changed);
            self.refresh().await;
        }
        self.backend_status()
    }

    /// Probe every live backend; returns the ids whose tool list changed since discovery
    async fn probe_all(&self) -> Vec<String> {
        let backends = self.backends();
        let timeout = self.config.probe_timeout;
        let threshold = self.config.failure_threshold;

        join_all(
            backends
                .iter()
                .filter(|b| !b.handle().status().is_terminal())
                .map(|backend| async move {
                    match backend.probe(timeout).await {
                        Ok(health) => {
                            backend.handle().record_success();
                            backend
                                .handle()
                                .advertises_changed(health.fingerprint.as_deref())
                                .then(|| backend.id().to_string())
                        }
                        Err(e) => {
                            log::debug!("Probe of {} failed: {}", backend.id(), e);
                            backend.handle().record_failure(threshold);
                            None
                        }
                    }
                }),
        )
        .await
        .into_iter()
        .flatten()
        .collect()
    }

    /// Stop the health loop, mark every backend stopped and close channels
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(task) = self.health_task.lock().await.take() {
            task.abort();
        }
        for backend in self.backends() {
            backend.handle().stop();
            backend.client().disconnect().await;
        }
        log::info!("Router shut down");
    }

    fn health(&self) -> HealthResult {
        let backends = self.backends();
        let any_healthy = backends.iter().any(|b| b.handle().is_healthy());
        let catalog = self.list_catalog();
        HealthResult {
            status: if backends.is_empty() || any_healthy {
                HealthState::Healthy
            } else {
                HealthState::Unreachable
            },
            tools: catalog.len(),
            fingerprint: Some(catalog.fingerprint()),
        }
    }
}

async fn health_loop(router: Weak<Router>, interval: std::time::Duration, mut shutdown_rx: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // First tick fires immediately; start() already probed
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown_rx.changed() => break,
        }
        let Some(router) = router.upgrade() else {
            break;
        };
        router.health_check().await;
    }
    log::debug!("Health loop stopped");
}

impl RequestHandler for Router {
    fn handle(
        &self,
        request: WireRequest,
    ) -> impl std::future::Future<Output = WireResponse> + Send {
        async move {
            let id = request.id;
            match request.method.as_str() {
                Methods::TOOLS_LIST => {
                    let catalog = self.list_catalog();
                    let body = ToolListResult {
                        tools: catalog.specs(),
                        fingerprint: Some(catalog.fingerprint()),
                    };
                    match serde_json::to_value(body) {
                        Ok(v) => WireResponse::success(id, v),
                        Err(e) => WireResponse::error(id, WireError::internal_error(e.to_string())),
                    }
                }
                Methods::TOOLS_CALL => {
                    let params: CallParams = match serde_json::from_value(request.params) {
                        Ok(p) => p,
                        Err(e) => {
                            return WireResponse::error(id, WireError::invalid_params(format!("Bad call params: {}", e)));
                        }
                    };
                    match self.try_invoke(&params.name, params.arguments).await {
                        Ok(payload) => {
                            WireResponse::success(id, serde_json::json!({ "success": true, "payload": payload }))
                        }
                        Err(e) => WireResponse::error(id, WireError::from(&e)),
                    }
                }
                Methods::HEALTH => match serde_json::to_value(self.health()) {
                    Ok(v) => WireResponse::success(id, v),
                    Err(e) => WireResponse::error(id, WireError::internal_error(e.to_string())),
                },
                other => WireResponse::error(id, WireError::method_not_found(other)),
            }
        }
    }
}

#[async_trait]
impl ToolInvoker for Router {
    async fn list_tools(&self) -> Result<Vec<ToolSpec>> {
        Ok(self.list_catalog().specs())
    }

    async fn invoke(&self, name: &str, arguments: Value) -> InvocationResult {
        Router::invoke(self, name, arguments).await
    }
}

impl Drop for Router {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendStatus;
    use crate::backend::LocalConnector;
    use crate::backend::testing::SwitchableConnector;
    use crate::fetch::RetryPolicy;
    use crate::ipc::messages::ErrorCode;
    use crate::router::FailureKind;
    use crate::tools::provider::testing::EchoTool;
    use crate::tools::{CollisionPolicy, ToolBox};
    use serde_json::json;
    use std::time::Duration;

    fn fetcher() -> Fetcher {
        Fetcher::with_timeout(Duration::from_secs(1), RetryPolicy::new(1, Duration::from_millis(1))).unwrap()
    }

    fn fast_config() -> RouterConfig {
        RouterConfig::default()
            .with_health_interval(Duration::from_millis(20))
            .with_timeouts(Duration::from_millis(100), Duration::from_millis(100), Duration::from_millis(200))
            .with_failure_threshold(1)
    }

    fn switchable(tools: &[&str]) -> Arc<SwitchableConnector> {
        Arc::new(SwitchableConnector::new(toolbox(tools)))
    }

    #[tokio::test]
    async fn test_duplicate_backend_rejected() {
        let router = Router::new(fast_config(), fetcher());
        router.register_with("a", "x", switchable(&["one"])).unwrap();
        let err = router.register_with("a", "y", switchable(&["two"])).unwrap_err();
        assert!(matches!(err, ToolmuxError::DuplicateBackend(ref id) if id == "a"));
    }

    #[tokio::test]
    async fn test_start_builds_catalog() {
        let router = Arc::new(Router::new(fast_config(), fetcher()));
        router.register_with("a", "x", switchable(&["one"])).unwrap();
        router.register_with("b", "y", switchable(&["two"])).unwrap();

        let report = router.start().await.unwrap();
        assert!(report.is_complete());
        assert_eq!(router.list_catalog().names(), vec!["one", "two"]);
        assert!(router.backend_status().iter().all(|s| s.status == BackendStatus::Healthy));
        router.shutdown().await;
    }

    #[tokio::test]
    async fn test_backend_down_at_start_stays_starting() {
        let router = Arc::new(Router::new(fast_config(), fetcher()));
        let down = switchable(&["two"]);
        down.set_up(false);
        router.register_with("a", "x", switchable(&["one"])).unwrap();
        router.register_with("b", "y", down).unwrap();

        router.start().await.unwrap();
        assert_eq!(router.list_catalog().names(), vec!["one"]);
        let status = router.backend_status();
        assert_eq!(status[1].status, BackendStatus::Starting);
        router.shutdown().await;
    }

    #[tokio::test]
    async fn test_health_check_drops_and_restores_tools() {
        let router = Arc::new(Router::new(fast_config(), fetcher()));
        let b = switchable(&["two"]);
        router.register_with("a", "x", switchable(&["one"])).unwrap();
        router.register_with("b", "y", b.clone()).unwrap();
        router.start().await.unwrap();

        b.set_up(false);
        router.health_check().await;
        assert_eq!(router.list_catalog().names(), vec!["one"]);

        let result = router.invoke("one", json!({"text": "still works"})).await;
        assert!(result.success);
        let result = router.invoke("two", json!({"text": "gone"})).await;
        assert_eq!(result.failure_kind(), Some(FailureKind::UnknownTool));

        b.set_up(true);
        router.health_check().await;
        assert_eq!(router.list_catalog().names(), vec!["one", "two"]);
        router.shutdown().await;
    }

    #[tokio::test]
    async fn test_health_loop_recovers_backend() {
        let router = Arc::new(Router::new(fast_config(), fetcher()));
        let a = switchable(&["one"]);
        a.set_up(false);
        router.register_with("a", "x", a.clone()).unwrap();
        router.start().await.unwrap();
        assert!(router.list_catalog().is_empty());

        a.set_up(true);
        let mut recovered = false;
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            if router.list_catalog().contains("one") {
                recovered = true;
                break;
            }
        }
        assert!(recovered);
        router.shutdown().await;
    }

    #[tokio::test]
    async fn test_register_after_start_joins_on_next_check() {
        let router = Arc::new(Router::new(fast_config(), fetcher()));
        router.register_with("a", "x", switchable(&["one"])).unwrap();
        router.start().await.unwrap();

        router.register_with("late", "y", switchable(&["two"])).unwrap();
        router.health_check().await;
        assert_eq!(router.list_catalog().names(), vec!["one", "two"]);
        router.shutdown().await;
    }

    #[tokio::test]
    async fn test_deregister_drops_tools() {
        let router = Arc::new(Router::new(fast_config(), fetcher()));
        router.register_with("a", "x", switchable(&["one"])).unwrap();
        router.register_with("b", "y", switchable(&["two"])).unwrap();
        router.start().await.unwrap();

        let report = router.deregister("b").await.unwrap();
        assert_eq!(report.catalog.names(), vec!["one"]);
        assert!(report.catalog.by_backend("b").is_empty());
        assert!(matches!(router.deregister("b").await, Err(ToolmuxError::BackendNotFound(_))));
        router.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_stops_all_backends() {
        let router = Arc::new(Router::new(fast_config(), fetcher()));
        router.register_with("a", "x", switchable(&["one"])).unwrap();
        router.start().await.unwrap();
        router.shutdown().await;

        assert!(router.backend_status().iter().all(|s| s.status == BackendStatus::Stopped));
        router.health_check().await;
        assert!(router.backend_status().iter().all(|s| s.status == BackendStatus::Stopped));
    }

    #[tokio::test]
    async fn test_qualify_policy_through_router() {
        let config = fast_config().with_collision_policy(CollisionPolicy::Qualify);
        let router = Arc::new(Router::new(config, fetcher()));
        router.register_with("a", "x", switchable(&["echo"])).unwrap();
        router.register_with("b", "y", switchable(&["echo"])).unwrap();
        router.start().await.unwrap();

        assert_eq!(router.list_catalog().names(), vec!["echo", "b__echo"]);
        assert!(router.invoke("b__echo", json!({"text": "x"})).await.success);
        router.shutdown().await;
    }

    #[tokio::test]
    async fn test_wire_handler() {
        let router = Arc::new(Router::new(fast_config(), fetcher()));
        router.register_with("a", "x", switchable(&["echo"])).unwrap();
        router.start().await.unwrap();

        let response = router.handle(WireRequest::no_params(1, Methods::TOOLS_LIST)).await;
        let body: ToolListResult = serde_json::from_value(response.result.unwrap()).unwrap();
        assert_eq!(body.tools.len(), 1);
        assert_eq!(body.fingerprint, Some(router.list_catalog().fingerprint()));

        let response = router
            .handle(WireRequest::call(2, "echo", json!({"text": "hi"})))
            .await;
        assert_eq!(response.result.unwrap()["payload"]["echo"], "hi");

        let response = router.handle(WireRequest::call(3, "missing", json!({}))).await;
        assert_eq!(response.error.unwrap().code, ErrorCode::UNKNOWN_TOOL);

        let response = router.handle(WireRequest::call(4, "echo", json!({}))).await;
        let error = response.error.unwrap();
        assert_eq!(error.code, ErrorCode::INVALID_PARAMS);
        assert_eq!(error.fields(), vec!["text".to_string()]);

        let response = router.handle(WireRequest::no_params(5, Methods::HEALTH)).await;
        assert_eq!(response.result.unwrap()["status"], "healthy");
        router.shutdown().await;
    }

    #[tokio::test]
    async fn test_health_reports_unreachable_when_all_down() {
        let router = Arc::new(Router::new(fast_config(), fetcher()));
        let a = switchable(&["one"]);
        a.set_up(false);
        router.register_with("a", "x", a).unwrap();
        router.start().await.unwrap();

        let response = router.handle(WireRequest::no_params(1, Methods::HEALTH)).await;
        assert_eq!(response.result.unwrap()["status"], "unreachable");
        router.shutdown().await;
    }

    /// Tool server whose tool list can be replaced while it stays up
    struct ReloadableToolBox {
        current: RwLock<Arc<ToolBox>>,
    }

    impl ReloadableToolBox {
        fn new(tools: &[&str]) -> Self {
            Self {
                current: RwLock::new(Arc::new(toolbox(tools))),
            }
        }

        fn reload(&self, tools: &[&str]) {
            *self.current.write().unwrap() = Arc::new(toolbox(tools));
        }
    }

    impl RequestHandler for ReloadableToolBox {
        fn handle(&self, request: WireRequest) -> impl std::future::Future<Output = WireResponse> + Send {
            let current = Arc::clone(&self.current.read().unwrap());
            async move { current.handle(request).await }
        }
    }

    fn toolbox(tools: &[&str]) -> ToolBox {
        let mut toolbox = ToolBox::new("test");
        for tool in tools {
            toolbox.add(Arc::new(EchoTool::new(tool)));
        }
        toolbox
    }

    #[tokio::test]
    async fn test_health_check_rediscovers_changed_tool_list() {
        let router = Arc::new(Router::new(fast_config(), fetcher()));
        let server = Arc::new(ReloadableToolBox::new(&["one"]));
        router
            .register_with("a", "x", Arc::new(LocalConnector::new(Arc::clone(&server))))
            .unwrap();
        router.start().await.unwrap();
        assert_eq!(router.list_catalog().names(), vec!["one"]);

        // Same backend, still healthy, different tools
        server.reload(&["one", "three"]);
        router.health_check().await;
        assert_eq!(router.list_catalog().names(), vec!["one", "three"]);
        assert_eq!(router.backend_status()[0].status, BackendStatus::Healthy);

        // Unchanged list leaves the snapshot alone
        let before = router.list_catalog();
        router.health_check().await;
        assert!(Arc::ptr_eq(&before, &router.list_catalog()));
        router.shutdown().await;
    }
}
