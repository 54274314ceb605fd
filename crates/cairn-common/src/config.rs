//! ---
//! cairn_section: "01-core-functionality"
//! cairn_subsection: "module"
//! cairn_type: "source"
//! cairn_scope: "code"
//! cairn_description: "Shared configuration and tracing primitives."
//! cairn_version: "v0.1.0"
//! cairn_owner: "tbd"
//! ---
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSeconds};
use tracing::debug;

use crate::logging::LogFormat;

fn default_memento_directory() -> PathBuf {
    PathBuf::from("target/mementos")
}

fn default_max_serialization_attempts() -> usize {
    5
}

fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_sweep_temp_files() -> bool {
    true
}

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

fn default_log_format() -> LogFormat {
    LogFormat::StructuredJson
}

/// Primary configuration object for Cairn processes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub persistence: PersistenceConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Metadata describing where an [`AppConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedAppConfig {
    pub config: AppConfig,
    pub source: PathBuf,
}

impl AppConfig {
    pub const ENV_CONFIG_PATH: &str = "CAIRN_CONFIG";

    /// Load configuration from disk, respecting the `CAIRN_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration from disk together with the effective source path.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedAppConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(path.clone())?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        for candidate in candidates {
            if candidate.as_ref().exists() {
                let path = candidate.as_ref().to_path_buf();
                let config = Self::from_path(path.clone())?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        Err(anyhow!(
            "no configuration files found. inspected: {}",
            candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ))
    }

    /// Parse and validate a configuration file at an explicit path.
    pub fn from_path(path: PathBuf) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(&path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        let config = toml::from_str::<AppConfig>(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        self.persistence.validate()
    }
}

impl std::str::FromStr for AppConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: AppConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

/// Settings for the memento store and its writer pool.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Root of the memento store; category subdirectories live underneath.
    #[serde(default = "default_memento_directory")]
    pub directory: PathBuf,
    /// Attempts made by the retrying serializer before an operation fails.
    #[serde(default = "default_max_serialization_attempts")]
    pub max_serialization_attempts: usize,
    /// Grace window for outstanding writes when the persister stops.
    #[serde(default = "default_shutdown_timeout")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub shutdown_timeout: Duration,
    /// Writer pool size; `None` lets the runtime pick one thread per core.
    #[serde(default)]
    pub worker_threads: Option<usize>,
    /// Remove leftover `*.tmp` files when the persister opens the store.
    #[serde(default = "default_sweep_temp_files")]
    pub sweep_temp_files: bool,
    /// Controller name stamped on every persistence log event, e.g. `primary` or `standby-b`.
    #[serde(default)]
    pub node: Option<String>,
}

impl PersistenceConfig {
    /// Configuration rooted at `directory` with every other setting defaulted.
    pub fn for_directory(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_serialization_attempts == 0 {
            return Err(anyhow!(
                "persistence.max_serialization_attempts must be at least 1"
            ));
        }
        if self.worker_threads == Some(0) {
            return Err(anyhow!("persistence.worker_threads must be at least 1"));
        }
        if self.directory.as_os_str().is_empty() {
            return Err(anyhow!("persistence.directory must not be empty"));
        }
        if matches!(&self.node, Some(node) if node.trim().is_empty()) {
            return Err(anyhow!("persistence.node must not be blank"));
        }
        Ok(())
    }
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            directory: default_memento_directory(),
            max_serialization_attempts: default_max_serialization_attempts(),
            shutdown_timeout: default_shutdown_timeout(),
            worker_threads: None,
            sweep_temp_files: default_sweep_temp_files(),
            node: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: default_log_format(),
            file_prefix: None,
        }
    }
}
