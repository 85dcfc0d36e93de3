// ABOUTME: Configuration loading and the configuration gate for block diagnostics.
// ABOUTME: Reads YAML settings, resolves global/deployment/module enablement, and supplies the log root.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::model::Metadata;

pub const DEFAULT_RETENTION_WINDOW: u64 = 5;
pub const DEFAULT_WRITE_TIMEOUT_MS: u64 = 10_000;

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unable to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Which candidate heights get flushed when a new height is appended.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FlushPolicy {
    /// Flush every open entry below the appended height, oldest first.
    /// Covers gaps left by skipped heights.
    #[default]
    AnyLower,
    /// Flush only the exact predecessor (`height - 1`) when it is cached.
    Predecessor,
}

/// Top-level diagnostics configuration. Every field defaults to "disabled".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub deployment: Option<DeploymentConfig>,
}

/// Settings for one deployment (one coin / daemon being diagnosed).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentConfig {
    #[serde(default = "default_deployment_name")]
    pub name: String,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub log_path: Option<PathBuf>,
    #[serde(default = "default_retention_window")]
    pub retention_window: u64,
    #[serde(default)]
    pub flush_policy: FlushPolicy,
    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,
    /// Per-module settings keyed by module name. Each mapping may carry an
    /// `enabled` flag plus arbitrary module-specific keys.
    #[serde(default)]
    pub modules: BTreeMap<String, Metadata>,
}

fn default_deployment_name() -> String {
    "default".to_string()
}

fn default_retention_window() -> u64 {
    DEFAULT_RETENTION_WINDOW
}

fn default_write_timeout_ms() -> u64 {
    DEFAULT_WRITE_TIMEOUT_MS
}

impl Default for DeploymentConfig {
    fn default() -> Self {
        Self {
            name: default_deployment_name(),
            enabled: false,
            log_path: None,
            retention_window: DEFAULT_RETENTION_WINDOW,
            flush_policy: FlushPolicy::default(),
            write_timeout_ms: DEFAULT_WRITE_TIMEOUT_MS,
            modules: BTreeMap::new(),
        }
    }
}

impl DiagnosticsConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&contents)
    }

    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - BLOCKDIAG_CONFIG: path to a YAML config file (unset: everything disabled)
    /// - BLOCKDIAG_LOG_PATH: overrides the deployment's `logPath` when non-empty
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = match std::env::var("BLOCKDIAG_CONFIG").ok().filter(|p| !p.is_empty()) {
            Some(path) => Self::from_path(Path::new(&path))?,
            None => Self::default(),
        };

        if let Some(log_path) = std::env::var("BLOCKDIAG_LOG_PATH").ok().filter(|p| !p.is_empty()) {
            config.deployment.get_or_insert_with(DeploymentConfig::default).log_path =
                Some(PathBuf::from(log_path));
        }

        Ok(config)
    }
}

/// The granularity at which enablement is checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope<'a> {
    Global,
    Deployment,
    Module(&'a str),
}

/// Read-only view over a [`DiagnosticsConfig`] that answers "may this run?".
/// Missing configuration at any level reads as disabled; nothing here fails.
#[derive(Debug, Clone, Default)]
pub struct ConfigGate {
    config: DiagnosticsConfig,
}

impl ConfigGate {
    pub fn new(config: DiagnosticsConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DiagnosticsConfig {
        &self.config
    }

    fn deployment(&self) -> Option<&DeploymentConfig> {
        self.config.deployment.as_ref()
    }

    /// Hierarchical check: global, then deployment, then the module's own flag.
    pub fn can_run(&self, scope: Scope<'_>) -> bool {
        if !self.config.enabled {
            return false;
        }
        if matches!(scope, Scope::Global) {
            return true;
        }
        let Some(deployment) = self.deployment().filter(|d| d.enabled) else {
            return false;
        };
        match scope {
            Scope::Global | Scope::Deployment => true,
            Scope::Module(name) => deployment
                .modules
                .get(name)
                .and_then(|m| m.get("enabled"))
                .and_then(Value::as_bool)
                .unwrap_or(false),
        }
    }

    /// Persistence requires the deployment to be enabled and a non-empty log root.
    pub fn logging_enabled(&self) -> bool {
        self.can_run(Scope::Deployment) && self.log_root().is_some()
    }

    pub fn log_root(&self) -> Option<&Path> {
        self.deployment()
            .and_then(|d| d.log_path.as_deref())
            .filter(|p| !p.as_os_str().is_empty())
    }

    /// The module's settings mapping, or an empty mapping when absent.
    pub fn module_config(&self, name: &str) -> Metadata {
        self.deployment()
            .and_then(|d| d.modules.get(name))
            .cloned()
            .unwrap_or_default()
    }

    pub fn deployment_name(&self) -> &str {
        self.deployment().map(|d| d.name.as_str()).unwrap_or("default")
    }

    pub fn retention_window(&self) -> u64 {
        self.deployment()
            .map(|d| d.retention_window)
            .unwrap_or(DEFAULT_RETENTION_WINDOW)
    }

    pub fn flush_policy(&self) -> FlushPolicy {
        self.deployment().map(|d| d.flush_policy).unwrap_or_default()
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(
            self.deployment()
                .map(|d| d.write_timeout_ms)
                .unwrap_or(DEFAULT_WRITE_TIMEOUT_MS),
        )
    }
}
