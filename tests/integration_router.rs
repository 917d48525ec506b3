//! Router integration tests
//!
//! Backends are in-process tool boxes or real TCP tool servers; the router is
//! exercised directly and over the wire.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::net::TcpListener;

use toolmux::backend::{BackendClient, BackendConfig, BackendStatus, Connector, LocalConnector, TcpConnector};
use toolmux::error::{Result, ToolmuxError};
use toolmux::fetch::{Fetcher, RetryPolicy};
use toolmux::ipc::{RpcChannel, ToolServer};
use toolmux::router::{FailureKind, Router, RouterConfig};
use toolmux::tools::{CollisionPolicy, LocalTool, ToolBox, ToolSpec};

/// Requires `query`; counts executions
struct LookupTool {
    name: String,
    calls: AtomicU32,
}

impl LookupTool {
    fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            calls: AtomicU32::new(0),
        })
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LocalTool for LookupTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec::new(&self.name, "Look something up").with_schema(json!({
            "type": "object",
            "properties": {"query": {"type": "string"}},
            "required": ["query"]
        }))
    }

    async fn call(&self, arguments: Value) -> Result<Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(json!({"tool": self.name, "query": arguments["query"]}))
    }
}

/// In-process backend whose connections can be refused
struct FlakyConnector {
    inner: LocalConnector<ToolBox>,
    up: AtomicBool,
}

impl FlakyConnector {
    fn new(toolbox: ToolBox) -> Arc<Self> {
        Arc::new(Self {
            inner: LocalConnector::new(Arc::new(toolbox)),
            up: AtomicBool::new(true),
        })
    }
}

#[async_trait]
impl Connector for FlakyConnector {
    async fn connect(&self) -> Result<Arc<dyn RpcChannel>> {
        if !self.up.load(Ordering::SeqCst) {
            return Err(ToolmuxError::Transport("connection refused".to_string()));
        }
        self.inner.connect().await
    }

    fn describe(&self) -> String {
        "flaky".to_string()
    }
}

fn fetcher() -> Fetcher {
    Fetcher::with_timeout(Duration::from_secs(1), RetryPolicy::default()).unwrap()
}

fn router(config: RouterConfig) -> Arc<Router> {
    let config = config.with_timeouts(Duration::from_millis(500), Duration::from_millis(500), Duration::from_secs(2));
    Arc::new(Router::new(config, fetcher()))
}

fn local(tools: &[Arc<LookupTool>]) -> Arc<LocalConnector<ToolBox>> {
    let mut toolbox = ToolBox::new("local");
    for tool in tools {
        toolbox.add(tool.clone());
    }
    Arc::new(LocalConnector::new(Arc::new(toolbox)))
}

/// An address nothing is listening on
async fn dead_addr() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().to_string()
}

async fn spawn_server<H: toolmux::ipc::RequestHandler + 'static>(handler: Arc<H>) -> (String, Arc<ToolServer>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let server = Arc::new(ToolServer::new());
    let running = Arc::clone(&server);
    tokio::spawn(async move {
        let _ = running.run_on(listener, handler).await;
    });
    (addr, server)
}

#[tokio::test]
async fn test_down_backend_does_not_affect_healthy_one() {
    let lookup = LookupTool::new("lookup");
    let router = router(RouterConfig::default());
    router.register_with("a", "local", local(&[lookup.clone()])).unwrap();
    router.register(&BackendConfig::tcp("b", dead_addr().await)).unwrap();

    let report = router.start().await.unwrap();
    assert_eq!(report.catalog.names(), vec!["lookup"]);

    let result = router.invoke("lookup", json!({"query": "asthma"})).await;
    assert!(result.success);
    assert_eq!(result.payload.unwrap()["query"], "asthma");
    assert_eq!(lookup.calls(), 1);

    let status = router.backend_status();
    assert_eq!(status[0].status, BackendStatus::Healthy);
    assert_eq!(status[1].status, BackendStatus::Starting);

    router.shutdown().await;
}

#[tokio::test]
async fn test_refresh_drops_only_the_failed_backends_tools() {
    let router = router(RouterConfig::default().with_failure_threshold(1));
    let b = FlakyConnector::new(ToolBox::new("b").with_tool(LookupTool::new("b_tool")));
    router.register_with("a", "local", local(&[LookupTool::new("a_tool")])).unwrap();
    router.register_with("b", "flaky", b.clone()).unwrap();

    let report = router.start().await.unwrap();
    assert_eq!(report.catalog.names(), vec!["a_tool", "b_tool"]);

    b.up.store(false, Ordering::SeqCst);
    router.backends()[1].client().disconnect().await;
    router.health_check().await;

    assert_eq!(router.list_catalog().names(), vec!["a_tool"]);
    let result = router.invoke("b_tool", json!({"query": "x"})).await;
    assert_eq!(result.failure_kind(), Some(FailureKind::UnknownTool));
    assert!(router.invoke("a_tool", json!({"query": "x"})).await.success);

    b.up.store(true, Ordering::SeqCst);
    router.health_check().await;
    assert_eq!(router.list_catalog().names(), vec!["a_tool", "b_tool"]);

    router.shutdown().await;
}

#[tokio::test]
async fn test_collisions_resolve_by_registration_order() {
    for _ in 0..3 {
        let router = router(RouterConfig::default());
        router.register_with("first", "local", local(&[LookupTool::new("shared")])).unwrap();
        router.register_with("second", "local", local(&[LookupTool::new("shared")])).unwrap();

        let report = router.start().await.unwrap();
        assert_eq!(report.catalog.len(), 1);
        assert_eq!(report.catalog.get("shared").unwrap().backend, "first");
        assert_eq!(report.collisions.len(), 1);
        assert_eq!(report.collisions[0].backend, "second");
        router.shutdown().await;
    }
}

#[tokio::test]
async fn test_qualify_policy_exposes_both_tools() {
    let router = router(RouterConfig::default().with_collision_policy(CollisionPolicy::Qualify));
    let second = LookupTool::new("shared");
    router.register_with("first", "local", local(&[LookupTool::new("shared")])).unwrap();
    router.register_with("second", "local", local(&[second.clone()])).unwrap();

    let report = router.start().await.unwrap();
    assert_eq!(report.catalog.names(), vec!["shared", "second__shared"]);

    let result = router.invoke("second__shared", json!({"query": "q"})).await;
    assert!(result.success);
    assert_eq!(second.calls(), 1);

    router.shutdown().await;
}

#[tokio::test]
async fn test_unknown_tool_and_invalid_arguments() {
    let lookup = LookupTool::new("lookup");
    let router = router(RouterConfig::default());
    router.register_with("a", "local", local(&[lookup.clone()])).unwrap();
    router.start().await.unwrap();

    let unknown = router.try_invoke("nope", json!({})).await.unwrap_err();
    assert!(matches!(unknown, ToolmuxError::UnknownTool(ref name) if name == "nope"));

    let invalid = router.try_invoke("lookup", json!({"query": 42})).await.unwrap_err();
    match invalid {
        ToolmuxError::InvalidArguments { tool, fields } => {
            assert_eq!(tool, "lookup");
            assert_eq!(fields, vec!["query".to_string()]);
        }
        other => panic!("expected invalid arguments, got {:?}", other),
    }
    assert_eq!(lookup.calls(), 0);

    router.shutdown().await;
}

#[tokio::test]
async fn test_deregister_drops_tools() {
    let router = router(RouterConfig::default());
    router.register_with("a", "local", local(&[LookupTool::new("one")])).unwrap();
    router.register_with("b", "local", local(&[LookupTool::new("two")])).unwrap();
    router.start().await.unwrap();

    let report = router.deregister("b").await.unwrap();
    assert_eq!(report.catalog.names(), vec!["one"]);
    assert!(matches!(router.deregister("b").await, Err(ToolmuxError::BackendNotFound(_))));

    router.shutdown().await;
}

#[tokio::test]
async fn test_end_to_end_over_tcp() {
    // Backend tool server on TCP
    let lookup = LookupTool::new("lookup");
    let (backend_addr, backend_server) = spawn_server(Arc::new(ToolBox::new("remote").with_tool(lookup.clone()))).await;

    // Router aggregating it plus one dead backend, itself served on TCP
    let router = router(RouterConfig::default());
    router.register(&BackendConfig::tcp("remote", &backend_addr)).unwrap();
    router.register(&BackendConfig::tcp("dead", dead_addr().await)).unwrap();
    let report = router.start().await.unwrap();
    assert_eq!(report.catalog.names(), vec!["lookup"]);
    let (router_addr, router_server) = spawn_server(Arc::clone(&router)).await;

    // A client talking to the router
    let client = BackendClient::new("router", Arc::new(TcpConnector::new(router_addr)));
    let tools = client.list_tools().await.unwrap();
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0].name, "lookup");

    let payload = client.call_tool("lookup", json!({"query": "fever"})).await.unwrap();
    assert_eq!(payload, json!({"tool": "lookup", "query": "fever"}));
    assert_eq!(lookup.calls(), 1);

    let err = client.call_tool("missing", json!({})).await.unwrap_err();
    assert!(matches!(err, ToolmuxError::UnknownTool(_)));

    let err = client.call_tool("lookup", json!({})).await.unwrap_err();
    assert!(matches!(err, ToolmuxError::InvalidArguments { ref fields, .. } if fields == &vec!["query".to_string()]));
    assert_eq!(lookup.calls(), 1);

    let health = client.health().await.unwrap();
    assert_eq!(health.tools, 1);

    router_server.shutdown();
    backend_server.shutdown();
    router.shutdown().await;
}
