//! Backends - the tool servers a router aggregates
//!
//! A [`Backend`] pairs a [`BackendHandle`] (identity and liveness) with a
//! [`BackendClient`] that reaches the server through a [`Connector`]:
//! a spawned process, a TCP socket, an HTTP endpoint or an in-process handler.

mod client;
mod config;
mod handle;
mod http;
mod local;
mod stdio;
mod tcp;

pub use client::BackendClient;
pub use config::{BackendConfig, Transport};
pub use handle::{BackendHandle, BackendSnapshot, BackendStatus};
pub use http::HttpConnector;
pub use local::LocalConnector;
pub use stdio::SpawnConnector;
pub use tcp::TcpConnector;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{Result, ToolmuxError};
use crate::fetch::Fetcher;
use crate::ipc::client::RpcChannel;
use crate::ipc::messages::HealthResult;
use crate::sources;

/// Opens a channel to a backend. Called again whenever the previous channel closed.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn RpcChannel>>;

    /// Where this connector points, for logs
    fn describe(&self) -> String;
}

/// Build the connector for a declared backend
pub fn connector_for(
    config: &BackendConfig,
    fetcher: &Fetcher,
    request_timeout: Duration,
) -> Result<Arc<dyn Connector>> {
    let connector: Arc<dyn Connector> = match config.transport()? {
        Transport::Tcp(addr) => Arc::new(TcpConnector::new(addr)),
        Transport::Http(url) => Arc::new(HttpConnector::new(url, request_timeout)?),
        Transport::Spawn { command, args, env } => Arc::new(SpawnConnector::new(command, args, env)),
        Transport::Builtin(kind) => {
            Arc::new(LocalConnector::new(Arc::new(sources::toolbox(kind, fetcher.clone()))))
        }
    };
    Ok(connector)
}

/// One registered backend
pub struct Backend {
    handle: BackendHandle,
    client: BackendClient,
}

impl Backend {
    pub fn new(id: impl Into<String>, address: impl Into<String>, connector: Arc<dyn Connector>) -> Self {
        let id = id.into();
        Self {
            handle: BackendHandle::new(id.clone(), address),
            client: BackendClient::new(id, connector),
        }
    }

    pub fn id(&self) -> &str {
        self.handle.id()
    }

    pub fn handle(&self) -> &BackendHandle {
        &self.handle
    }

    pub fn client(&self) -> &BackendClient {
        &self.client
    }

    /// `health` bounded by `timeout`; a timeout is a transport failure
    pub async fn probe(&self, timeout: Duration) -> Result<HealthResult> {
        match tokio::time::timeout(timeout, self.client.health()).await {
            Ok(result) => result,
            Err(_) => Err(ToolmuxError::Transport(format!(
                "{}: health probe timed out after {:?}",
                self.id(),
                timeout
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::RetryPolicy;
    use crate::sources::SourceKind;

    fn fetcher() -> Fetcher {
        Fetcher::with_timeout(Duration::from_secs(1), RetryPolicy::default()).unwrap()
    }

    #[test]
    fn test_connector_for_each_transport() {
        let fetcher = fetcher();
        let timeout = Duration::from_secs(1);

        let tcp = connector_for(&BackendConfig::tcp("a", "127.0.0.1:9"), &fetcher, timeout).unwrap();
        assert_eq!(tcp.describe(), "tcp://127.0.0.1:9");

        let http = connector_for(&BackendConfig::http("b", "http://127.0.0.1:9/rpc"), &fetcher, timeout).unwrap();
        assert_eq!(http.describe(), "http://127.0.0.1:9/rpc");

        let spawn = connector_for(&BackendConfig::spawn("c", "toolmux", vec!["backend".into()]), &fetcher, timeout)
            .unwrap();
        assert_eq!(spawn.describe(), "toolmux backend");

        let builtin = connector_for(&BackendConfig::builtin("d", SourceKind::Icd10), &fetcher, timeout).unwrap();
        assert_eq!(builtin.describe(), "in-process");
    }

    #[test]
    fn test_connector_for_invalid_config() {
        let config = BackendConfig {
            id: "x".into(),
            ..Default::default()
        };
        assert!(connector_for(&config, &fetcher(), Duration::from_secs(1)).is_err());
    }

    #[tokio::test]
    async fn test_probe_builtin_backend() {
        let connector = connector_for(
            &BackendConfig::builtin("icd10", SourceKind::Icd10),
            &fetcher(),
            Duration::from_secs(1),
        )
        .unwrap();
        let backend = Backend::new("icd10", "builtin:icd10", connector);
        let health = backend.probe(Duration::from_secs(1)).await.unwrap();
        assert_eq!(health.tools, 2);
    }
}
