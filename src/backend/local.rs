//! In-process transport: requests go straight to a handler, no framing

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;

use crate::error::{Result, ToolmuxError};
use crate::ipc::client::RpcChannel;
use crate::ipc::messages::{WireRequest, WireResponse};
use crate::ipc::server::RequestHandler;

use super::Connector;

/// Connects to a handler living in this process (builtin sources, tests)
pub struct LocalConnector<H> {
    handler: Arc<H>,
}

impl<H: RequestHandler + 'static> LocalConnector<H> {
    pub fn new(handler: Arc<H>) -> Self {
        Self { handler }
    }
}

#[async_trait]
impl<H: RequestHandler + 'static> Connector for LocalConnector<H> {
    async fn connect(&self) -> Result<Arc<dyn RpcChannel>> {
        Ok(Arc::new(LocalChannel {
            handler: Arc::clone(&self.handler),
            open: AtomicBool::new(true),
        }))
    }

    fn describe(&self) -> String {
        "in-process".to_string()
    }
}

struct LocalChannel<H> {
    handler: Arc<H>,
    open: AtomicBool,
}

#[async_trait]
impl<H: RequestHandler + 'static> RpcChannel for LocalChannel<H> {
    async fn send(&self, request: WireRequest) -> Result<WireResponse> {
        if !self.is_open() {
            return Err(ToolmuxError::Transport("in-process channel closed".to_string()));
        }
        Ok(self.handler.handle(request).await)
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<()> {
        self.open.store(false, Ordering::SeqCst);
        Ok(())
    }
}
