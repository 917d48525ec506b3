//! Global configuration.
//!
//! Loaded from .toolmux.yml or ~/.config/toolmux/toolmux.yml

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use toolmux::agent::ReasonerConfig;
use toolmux::backend::BackendConfig;
use toolmux::fetch::RetryPolicy;
use toolmux::router::RouterConfig;
use toolmux::tools::CollisionPolicy;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ToolmuxConfig {
    pub router: RouterSection,
    pub fetch: FetchSection,
    pub backends: Vec<BackendConfig>,
    pub reasoner: ReasonerConfig,
}

impl ToolmuxConfig {
    /// Load configuration with fallback chain.
    ///
    /// Search order:
    /// 1. Explicit path if provided
    /// 2. .toolmux.yml in current directory
    /// 3. ~/.config/toolmux/toolmux.yml
    /// 4. Defaults
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        let project_config = PathBuf::from(".toolmux.yml");
        if project_config.exists() {
            match Self::load_from_file(&project_config) {
                Ok(config) => {
                    log::info!("Loaded config from .toolmux.yml");
                    return Ok(config);
                }
                Err(e) => {
                    log::warn!("Failed to load .toolmux.yml: {}", e);
                }
            }
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("toolmux").join("toolmux.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => {
                        log::info!("Loaded config from {}", user_config.display());
                        return Ok(config);
                    }
                    Err(e) => {
                        log::warn!("Failed to load {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        log::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;
        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.router.failure_threshold == 0 {
            eyre::bail!("router.failure-threshold must be > 0");
        }
        if self.router.health_interval_ms == 0 {
            eyre::bail!("router.health-interval-ms must be > 0");
        }
        if self.fetch.max_attempts == 0 {
            eyre::bail!("fetch.max-attempts must be > 0");
        }
        if self.reasoner.max_tool_rounds == 0 {
            eyre::bail!("reasoner.max-tool-rounds must be > 0");
        }

        let mut seen = HashSet::new();
        for backend in &self.backends {
            backend
                .transport()
                .map_err(|e| eyre::eyre!("backend '{}': {}", backend.id, e))?;
            if !seen.insert(backend.id.as_str()) {
                eyre::bail!("duplicate backend id '{}'", backend.id);
            }
        }
        Ok(())
    }
}

/// Router settings.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct RouterSection {
    pub listen: String,
    pub health_interval_ms: u64,
    pub probe_timeout_ms: u64,
    pub discovery_timeout_ms: u64,
    pub invoke_timeout_ms: u64,
    pub failure_threshold: u32,
    pub collision_policy: CollisionPolicy,
}

impl Default for RouterSection {
    fn default() -> Self {
        let defaults = RouterConfig::default();
        Self {
            listen: defaults.listen,
            health_interval_ms: defaults.health_interval.as_millis() as u64,
            probe_timeout_ms: defaults.probe_timeout.as_millis() as u64,
            discovery_timeout_ms: defaults.discovery_timeout.as_millis() as u64,
            invoke_timeout_ms: defaults.invoke_timeout.as_millis() as u64,
            failure_threshold: defaults.failure_threshold,
            collision_policy: defaults.collision_policy,
        }
    }
}

impl RouterSection {
    pub fn to_router_config(&self) -> RouterConfig {
        RouterConfig {
            listen: self.listen.clone(),
            ..Default::default()
        }
        .with_health_interval(Duration::from_millis(self.health_interval_ms))
        .with_timeouts(
            Duration::from_millis(self.probe_timeout_ms),
            Duration::from_millis(self.discovery_timeout_ms),
            Duration::from_millis(self.invoke_timeout_ms),
        )
        .with_failure_threshold(self.failure_threshold)
        .with_collision_policy(self.collision_policy)
    }
}

/// Outbound HTTP settings for the built-in data sources.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct FetchSection {
    pub max_attempts: u32,
    pub backoff_ms: u64,
    pub timeout_ms: u64,
}

impl Default for FetchSection {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_attempts: policy.max_attempts,
            backoff_ms: policy.base_backoff.as_millis() as u64,
            timeout_ms: 30_000,
        }
    }
}

impl FetchSection {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, Duration::from_millis(self.backoff_ms))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use toolmux::sources::SourceKind;

    #[test]
    fn test_default_config() {
        let config = ToolmuxConfig::default();
        assert_eq!(config.router.listen, "127.0.0.1:3000");
        assert_eq!(config.router.failure_threshold, 3);
        assert_eq!(config.fetch.max_attempts, 6);
        assert!(config.backends.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_yaml() {
        let yaml = r#"
router:
  listen: 0.0.0.0:4000
  health-interval-ms: 500
  collision-policy: qualify
fetch:
  max-attempts: 2
backends:
  - id: icd10
    builtin: icd10
  - id: remote
    url: tcp://10.0.0.2:3001
  - id: local
    command: toolmux
    args: [backend, pubmed]
reasoner:
  model: llama3
"#;
        let config: ToolmuxConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.router.collision_policy, CollisionPolicy::Qualify);
        assert_eq!(config.router.invoke_timeout_ms, 60_000);
        assert_eq!(config.backends.len(), 3);
        assert_eq!(config.backends[0].builtin, Some(SourceKind::Icd10));
        assert_eq!(config.reasoner.model, "llama3");

        let router = config.router.to_router_config();
        assert_eq!(router.listen, "0.0.0.0:4000");
        assert_eq!(router.health_interval, Duration::from_millis(500));
        assert_eq!(router.collision_policy, CollisionPolicy::Qualify);

        assert_eq!(config.fetch.retry_policy().max_attempts, 2);
    }

    #[test]
    fn test_duplicate_backend_ids_rejected() {
        let config = ToolmuxConfig {
            backends: vec![
                BackendConfig::builtin("a", SourceKind::Icd10),
                BackendConfig::tcp("a", "127.0.0.1:9"),
            ],
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_backend_without_transport_rejected() {
        let config = ToolmuxConfig {
            backends: vec![BackendConfig {
                id: "empty".into(),
                ..Default::default()
            }],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_threshold_rejected() {
        let config = ToolmuxConfig {
            router: RouterSection {
                failure_threshold: 0,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_explicit_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "backends:\n  - id: pubmed\n    builtin: pubmed").unwrap();

        let config = ToolmuxConfig::load(Some(&file.path().to_path_buf())).unwrap();
        assert_eq!(config.backends[0].id, "pubmed");
    }

    #[test]
    fn test_load_invalid_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("toolmux.yml");
        fs::write(&path, "backends:\n  - id: x\n  - id: x\n    builtin: icd10\n").unwrap();

        assert!(ToolmuxConfig::load(Some(&path)).is_err());
    }

    #[test]
    fn test_load_missing_explicit_file_fails() {
        let path = PathBuf::from("/nonexistent/toolmux.yml");
        assert!(ToolmuxConfig::load(Some(&path)).is_err());
    }
}
