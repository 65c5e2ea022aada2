//! Configuration for both batch commands.
//!
//! Defaults are overridden by an optional TOML file, which is in turn
//! overridden by command-line flags.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub deploy: DeployConfig,
    pub health: HealthConfig,
    pub pool: PoolConfig,
    pub engine: EngineConfig,
}

/// Deployment orchestrator settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DeployConfig {
    /// Prefix of the externally reachable URL; the host port is appended.
    pub base_url: String,
    /// First host port tried for a new container.
    pub port_start: u16,
    /// How many candidate ports are probed before giving up.
    pub port_search_limit: u16,
    /// Port the service listens on inside the container.
    pub container_port: u16,
    /// Tasks deployed at the same time.
    pub concurrency: usize,
    /// Host the health probe connects to.
    pub probe_host: String,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost".to_owned(),
            port_start: 9001,
            port_search_limit: 1000,
            container_port: 8000,
            concurrency: 1,
            probe_host: "localhost".to_owned(),
        }
    }
}

/// Health check timing.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Delay between two polls.
    #[serde(rename = "interval_secs", with = "serde_duration_secs")]
    pub interval: Duration,
    /// Total time allowed before the check times out.
    #[serde(rename = "timeout_secs", with = "serde_duration_secs")]
    pub timeout: Duration,
    /// Timeout of a single HTTP probe.
    #[serde(rename = "probe_timeout_secs", with = "serde_duration_secs")]
    pub probe_timeout: Duration,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3),
            timeout: Duration::from_secs(20),
            probe_timeout: Duration::from_secs(5),
        }
    }
}

/// Worker pool sizing.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub workers: usize,
    pub queue_capacity: usize,
    #[serde(rename = "stats_interval_secs", with = "serde_duration_secs")]
    pub stats_interval: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: 8,
            queue_capacity: 64,
            stats_interval: Duration::from_secs(60),
        }
    }
}

/// External generation engine invocation.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub program: String,
    /// `{workspace}`, `{log_dir}`, `{session}` and `{uuid}` are substituted.
    pub args: Vec<String>,
    /// Runtime containers are named `<runtime_prefix>-<session>`.
    pub runtime_prefix: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            program: "openhands-headless".to_owned(),
            args: vec![],
            runtime_prefix: "openhands-runtime".to_owned(),
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl AppConfig {
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn parse(raw: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.deploy.concurrency == 0 {
            return Err(ConfigError::Invalid("deploy.concurrency must be at least 1".into()));
        }
        if self.deploy.port_search_limit == 0 {
            return Err(ConfigError::Invalid(
                "deploy.port_search_limit must be at least 1".into(),
            ));
        }
        if self.pool.workers == 0 || self.pool.queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "pool.workers and pool.queue_capacity must be at least 1".into(),
            ));
        }
        if self.health.interval.is_zero() {
            return Err(ConfigError::Invalid("health.interval_secs must be at least 1".into()));
        }
        Ok(())
    }
}

mod serde_duration_secs {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
