//! Client half of the wire protocol.
//!
//! Provides:
//! - `RpcChannel`: one request in, one correlated response out
//! - `LineChannel`: newline-delimited JSON over any async byte stream
//!   (TCP socket, child process stdio)

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;

use crate::error::{Result, ToolmuxError};
use crate::ipc::messages::{WireRequest, WireResponse};

/// A request/response link to one tool server.
#[async_trait]
pub trait RpcChannel: Send + Sync {
    /// Send a request and wait for its response.
    async fn send(&self, request: WireRequest) -> Result<WireResponse>;

    /// Whether the underlying link is still usable.
    fn is_open(&self) -> bool;

    /// Release the link (and anything it owns, e.g. a child process).
    async fn close(&self) -> Result<()>;
}

type PendingMap = Arc<StdMutex<HashMap<u64, oneshot::Sender<WireResponse>>>>;

/// Removes the pending entry if the caller gives up (timeout, cancellation).
struct PendingGuard {
    id: u64,
    pending: PendingMap,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        pending.remove(&self.id);
    }
}

/// Newline-delimited JSON channel over a byte stream.
pub struct LineChannel {
    label: String,
    writer: Mutex<Option<Box<dyn AsyncWrite + Send + Unpin>>>,
    pending: PendingMap,
    connected: Arc<AtomicBool>,
    reader_task: JoinHandle<()>,
}

impl LineChannel {
    /// Wrap a reader/writer pair; spawns the response reader task.
    pub fn new<R, W>(label: impl Into<String>, reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let label = label.into();
        let pending: PendingMap = Arc::new(StdMutex::new(HashMap::new()));
        let connected = Arc::new(AtomicBool::new(true));

        let reader_task = {
            let pending = Arc::clone(&pending);
            let connected = Arc::clone(&connected);
            let label = label.clone();
            tokio::spawn(async move {
                let mut reader = BufReader::new(reader);
                let mut line = Vec::new();

                loop {
                    line.clear();
                    match reader.read_until(b'\n', &mut line).await {
                        Ok(0) => {
                            log::debug!("{}: connection closed", label);
                            break;
                        }
                        Ok(_) => {
                            let trimmed = line.trim_ascii();
                            if trimmed.is_empty() {
                                continue;
                            }
                            match serde_json::from_slice::<WireResponse>(trimmed) {
                                Ok(response) => {
                                    let sender = pending
                                        .lock()
                                        .unwrap_or_else(|e| e.into_inner())
                                        .remove(&response.id);
                                    match sender {
                                        Some(tx) => {
                                            let _ = tx.send(response);
                                        }
                                        None => log::debug!("{}: dropping response for unknown id {}", label, response.id),
                                    }
                                }
                                Err(e) => log::warn!("{}: ignoring unparseable line: {}", label, e),
                            }
                        }
                        Err(e) => {
                            log::warn!("{}: read error: {}", label, e);
                            break;
                        }
                    }
                }

                connected.store(false, Ordering::SeqCst);
                // Dropping the senders fails every waiter with "closed"
                pending.lock().unwrap_or_else(|e| e.into_inner()).clear();
            })
        };

        Self {
            label,
            writer: Mutex::new(Some(Box::new(writer))),
            pending,
            connected,
            reader_task,
        }
    }

    /// Label used in logs and errors.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Number of requests awaiting a response.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[async_trait]
impl RpcChannel for LineChannel {
    async fn send(&self, request: WireRequest) -> Result<WireResponse> {
        if !self.is_open() {
            return Err(ToolmuxError::Transport(format!("{}: not connected", self.label)));
        }

        let id = request.id;
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, tx);
        let _guard = PendingGuard {
            id,
            pending: Arc::clone(&self.pending),
        };
        // The reader may have hit EOF and drained `pending` before the insert
        if !self.is_open() {
            return Err(ToolmuxError::Transport(format!("{}: connection closed", self.label)));
        }

        let mut json = serde_json::to_vec(&request)?;
        json.push(b'\n');
        {
            let mut writer = self.writer.lock().await;
            let w = writer
                .as_mut()
                .ok_or_else(|| ToolmuxError::Transport(format!("{}: writer closed", self.label)))?;
            let write = async {
                w.write_all(&json).await?;
                w.flush().await
            };
            if let Err(e) = write.await {
                self.connected.store(false, Ordering::SeqCst);
                return Err(ToolmuxError::Transport(format!("{}: failed to write: {}", self.label, e)));
            }
        }

        rx.await
            .map_err(|_| ToolmuxError::Transport(format!("{}: connection closed before response", self.label)))
    }

    fn is_open(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<()> {
        let mut writer = self.writer.lock().await;
        if let Some(mut w) = writer.take() {
            let _ = w.shutdown().await;
        }
        self.connected.store(false, Ordering::SeqCst);
        self.reader_task.abort();
        Ok(())
    }
}

impl Drop for LineChannel {
    fn drop(&mut self) {
        self.reader_task.abort();
    }
}
