//! Backend declarations: how to reach one tool server

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Result, ToolmuxError};
use crate::sources::SourceKind;

/// One `backends:` entry. Exactly one of `url`, `command` or `builtin` is set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct BackendConfig {
    pub id: String,

    /// `tcp://host:port` or `http(s)://...`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Program to spawn; speaks the protocol on its stdio
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,

    /// Data-source tool set hosted in this process
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub builtin: Option<SourceKind>,
}

/// Resolved transport for a backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transport {
    Tcp(String),
    Http(String),
    Spawn {
        command: String,
        args: Vec<String>,
        env: BTreeMap<String, String>,
    },
    Builtin(SourceKind),
}

impl BackendConfig {
    pub fn tcp(id: impl Into<String>, addr: impl AsRef<str>) -> Self {
        Self {
            id: id.into(),
            url: Some(format!("tcp://{}", addr.as_ref())),
            ..Default::default()
        }
    }

    pub fn http(id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            url: Some(url.into()),
            ..Default::default()
        }
    }

    pub fn spawn(id: impl Into<String>, command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            id: id.into(),
            command: Some(command.into()),
            args,
            ..Default::default()
        }
    }

    pub fn builtin(id: impl Into<String>, kind: SourceKind) -> Self {
        Self {
            id: id.into(),
            builtin: Some(kind),
            ..Default::default()
        }
    }

    /// Validate and resolve the transport
    pub fn transport(&self) -> Result<Transport> {
        if self.id.trim().is_empty() {
            return Err(ToolmuxError::Config("backend id must not be empty".to_string()));
        }

        let declared = [self.url.is_some(), self.command.is_some(), self.builtin.is_some()]
            .iter()
            .filter(|set| **set)
            .count();
        if declared != 1 {
            return Err(ToolmuxError::Config(format!(
                "backend '{}' must set exactly one of url, command or builtin (found {})",
                self.id, declared
            )));
        }

        if let Some(url) = &self.url {
            if let Some(addr) = url.strip_prefix("tcp://") {
                if addr.is_empty() {
                    return Err(ToolmuxError::Config(format!("backend '{}': empty tcp address", self.id)));
                }
                return Ok(Transport::Tcp(addr.to_string()));
            }
            if url.starts_with("http://") || url.starts_with("https://") {
                return Ok(Transport::Http(url.clone()));
            }
            return Err(ToolmuxError::Config(format!(
                "backend '{}': unsupported url scheme in '{}' (expected tcp://, http:// or https://)",
                self.id, url
            )));
        }

        if let Some(command) = &self.command {
            if command.trim().is_empty() {
                return Err(ToolmuxError::Config(format!("backend '{}': empty command", self.id)));
            }
            return Ok(Transport::Spawn {
                command: command.clone(),
                args: self.args.clone(),
                env: self.env.clone(),
            });
        }

        match self.builtin {
            Some(kind) => Ok(Transport::Builtin(kind)),
            None => Err(ToolmuxError::Config(format!("backend '{}' has no transport", self.id))),
        }
    }

    /// Human-readable address used in logs and status output
    pub fn address(&self) -> String {
        if let Some(url) = &self.url {
            return url.clone();
        }
        if let Some(command) = &self.command {
            return std::iter::once(command.as_str())
                .chain(self.args.iter().map(String::as_str))
                .collect::<Vec<_>>()
                .join(" ");
        }
        match self.builtin {
            Some(kind) => format!("builtin:{}", kind),
            None => String::new(),
        }
    }
}
