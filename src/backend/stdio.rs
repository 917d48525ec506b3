//! Spawned-process transport: the child speaks JSON lines on its stdin/stdout

use std::collections::BTreeMap;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;

use crate::error::{Result, ToolmuxError};
use crate::ipc::client::{LineChannel, RpcChannel};
use crate::ipc::messages::{WireRequest, WireResponse};

use super::Connector;

/// Spawns a fresh child on every connect; the previous one is killed on close
pub struct SpawnConnector {
    command: String,
    args: Vec<String>,
    env: BTreeMap<String, String>,
}

impl SpawnConnector {
    pub fn new(command: impl Into<String>, args: Vec<String>, env: BTreeMap<String, String>) -> Self {
        Self {
            command: command.into(),
            args,
            env,
        }
    }
}

#[async_trait]
impl Connector for SpawnConnector {
    async fn connect(&self) -> Result<Arc<dyn RpcChannel>> {
        let mut child = Command::new(&self.command)
            .args(&self.args)
            .envs(&self.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ToolmuxError::Transport(format!("Failed to spawn '{}': {}", self.command, e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ToolmuxError::Transport(format!("'{}': stdin not captured", self.command)))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ToolmuxError::Transport(format!("'{}': stdout not captured", self.command)))?;

        log::info!("Spawned backend process '{}' (pid {:?})", self.describe(), child.id());

        Ok(Arc::new(ChildChannel {
            inner: LineChannel::new(self.describe(), stdout, stdin),
            child: Mutex::new(Some(child)),
        }))
    }

    fn describe(&self) -> String {
        std::iter::once(self.command.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Line channel that owns the child process behind it
struct ChildChannel {
    inner: LineChannel,
    child: Mutex<Option<Child>>,
}

#[async_trait]
impl RpcChannel for ChildChannel {
    async fn send(&self, request: WireRequest) -> Result<WireResponse> {
        self.inner.send(request).await
    }

    fn is_open(&self) -> bool {
        self.inner.is_open()
    }

    async fn close(&self) -> Result<()> {
        self.inner.close().await?;
        if let Some(mut child) = self.child.lock().await.take() {
            if let Err(e) = child.kill().await {
                log::warn!("{}: failed to kill child: {}", self.inner.label(), e);
            }
            log::info!("{}: backend process stopped", self.inner.label());
        }
        Ok(())
    }
}
