//! Tool server loop - serves the wire protocol over TCP or stdio
//!
//! Provides:
//! - TCP listener with a client cap
//! - Stdio serving (for spawned backend processes)
//! - Per-request concurrency within a connection
//! - Cooperative shutdown

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinSet;

use crate::error::{Result, ToolmuxError};
use crate::ipc::messages::{WireError, WireRequest, WireResponse};

/// Configuration for the tool server
#[derive(Debug, Clone)]
pub struct ToolServerConfig {
    /// Address to listen on (host:port)
    pub listen: String,
    /// Maximum number of concurrent clients
    pub max_clients: usize,
}

impl Default for ToolServerConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:3000".to_string(),
            max_clients: 64,
        }
    }
}

impl ToolServerConfig {
    /// Create config with a custom listen address
    pub fn with_listen(mut self, listen: impl Into<String>) -> Self {
        self.listen = listen.into();
        self
    }

    /// Set max clients
    pub fn with_max_clients(mut self, max: usize) -> Self {
        self.max_clients = max;
        self
    }
}

/// Handler trait for processing requests
pub trait RequestHandler: Send + Sync {
    /// Handle a request and return a response
    fn handle(
        &self,
        request: WireRequest,
    ) -> impl std::future::Future<Output = WireResponse> + Send;
}

/// TCP tool server
pub struct ToolServer {
    config: ToolServerConfig,
    clients: Arc<AtomicUsize>,
    shutdown_tx: watch::Sender<bool>,
}

impl ToolServer {
    /// Create a new server with default config
    pub fn new() -> Self {
        Self::with_config(ToolServerConfig::default())
    }

    /// Create a new server with custom config
    pub fn with_config(config: ToolServerConfig) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            config,
            clients: Arc::new(AtomicUsize::new(0)),
            shutdown_tx,
        }
    }

    /// Listen address from the config
    pub fn listen_addr(&self) -> &str {
        &self.config.listen
    }

    /// Get count of connected clients
    pub fn client_count(&self) -> usize {
        self.clients.load(Ordering::SeqCst)
    }

    /// Bind the configured address and serve until shutdown
    pub async fn run<H: RequestHandler + 'static>(&self, handler: Arc<H>) -> Result<()> {
        let listener = TcpListener::bind(&self.config.listen).await.map_err(|e| {
            ToolmuxError::Transport(format!("Failed to bind {}: {}", self.config.listen, e))
        })?;
        self.run_on(listener, handler).await
    }

    /// Serve on an already bound listener until shutdown
    pub async fn run_on<H: RequestHandler + 'static>(
        &self,
        listener: TcpListener,
        handler: Arc<H>,
    ) -> Result<()> {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        if *shutdown_rx.borrow_and_update() {
            return Ok(());
        }
        if let Ok(addr) = listener.local_addr() {
            log::info!("Tool server listening on {}", addr);
        }

        loop {
            tokio::select! {
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, addr)) => {
                            if self.clients.load(Ordering::SeqCst) >= self.config.max_clients {
                                log::warn!("Rejecting {}: at capacity ({} clients)", addr, self.config.max_clients);
                                continue;
                            }
                            self.clients.fetch_add(1, Ordering::SeqCst);
                            log::debug!("Client connected: {}", addr);

                            let handler = Arc::clone(&handler);
                            let clients = Arc::clone(&self.clients);
                            let mut client_shutdown = self.shutdown_tx.subscribe();

                            tokio::spawn(async move {
                                let (reader, writer) = stream.into_split();
                                tokio::select! {
                                    result = serve_connection(reader, writer, handler) => {
                                        if let Err(e) = result {
                                            log::warn!("Client {} ended with error: {}", addr, e);
                                        }
                                    }
                                    _ = client_shutdown.changed() => {}
                                }
                                clients.fetch_sub(1, Ordering::SeqCst);
                                log::debug!("Client disconnected: {}", addr);
                            });
                        }
                        Err(e) => {
                            log::error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.changed() => {
                    break;
                }
            }
        }

        log::info!("Tool server stopped");
        Ok(())
    }

    /// Signal the server to shutdown
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

impl Default for ToolServer {
    fn default() -> Self {
        Self::new()
    }
}

/// Serve the protocol on this process's stdin/stdout until stdin closes
pub async fn serve_stdio<H: RequestHandler + 'static>(handler: Arc<H>) -> Result<()> {
    log::info!("Serving tool protocol on stdio");
    serve_connection(tokio::io::stdin(), tokio::io::stdout(), handler).await
}

/// Read newline-delimited requests and write one response line per request.
///
/// Requests on the same connection run concurrently; responses may come back
/// out of order and are correlated by id.
pub async fn serve_connection<R, W, H>(reader: R, writer: W, handler: Arc<H>) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
    H: RequestHandler + 'static,
{
    let mut reader = BufReader::new(reader);
    let writer = Arc::new(Mutex::new(writer));
    let mut in_flight = JoinSet::new();
    let mut line = Vec::new();

    loop {
        line.clear();
        // Raw bytes: a line that is not UTF-8 gets a parse error, not a dropped connection
        let read = reader.read_until(b'\n', &mut line).await?;
        if read == 0 {
            break; // EOF - client disconnected
        }

        let trimmed = line.trim_ascii();
        if trimmed.is_empty() {
            continue;
        }

        match serde_json::from_slice::<WireRequest>(trimmed) {
            Ok(request) => {
                let handler = Arc::clone(&handler);
                let writer = Arc::clone(&writer);
                in_flight.spawn(async move {
                    let response = handler.handle(request).await;
                    write_response(&writer, &response).await
                });
            }
            Err(e) => {
                let response = WireResponse::error(0, WireError::parse_error(format!("Parse error: {}", e)));
                write_response(&writer, &response).await?;
            }
        }

        // Reap finished requests so the set does not grow unbounded
        while let Some(done) = in_flight.try_join_next() {
            log_write_outcome(done);
        }
    }

    while let Some(done) = in_flight.join_next().await {
        log_write_outcome(done);
    }
    Ok(())
}

fn log_write_outcome(done: std::result::Result<Result<()>, tokio::task::JoinError>) {
    match done {
        Ok(Ok(())) => {}
        Ok(Err(e)) => log::warn!("Failed to write response: {}", e),
        Err(e) => log::error!("Request task panicked: {}", e),
    }
}

async fn write_response<W: AsyncWrite + Unpin>(writer: &Mutex<W>, response: &WireResponse) -> Result<()> {
    let mut json = serde_json::to_vec(response)?;
    json.push(b'\n');
    let mut w = writer.lock().await;
    w.write_all(&json).await?;
    w.flush().await?;
    Ok(())
}
