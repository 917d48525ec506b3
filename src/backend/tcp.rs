//! TCP transport: JSON lines over a socket to a remote tool server

use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::TcpStream;

use crate::error::{Result, ToolmuxError};
use crate::ipc::client::{LineChannel, RpcChannel};

use super::Connector;

pub struct TcpConnector {
    addr: String,
}

impl TcpConnector {
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self) -> Result<Arc<dyn RpcChannel>> {
        let stream = TcpStream::connect(&self.addr)
            .await
            .map_err(|e| ToolmuxError::Transport(format!("Failed to connect to {}: {}", self.addr, e)))?;
        let _ = stream.set_nodelay(true);
        let (reader, writer) = stream.into_split();
        Ok(Arc::new(LineChannel::new(format!("tcp://{}", self.addr), reader, writer)))
    }

    fn describe(&self) -> String {
        format!("tcp://{}", self.addr)
    }
}
