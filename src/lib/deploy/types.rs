use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::lib::docker::types::DockerError;
use crate::lib::tasks::types::TaskError;

/// Outcome of deploying one task. Finalized once, then only read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentResult {
    pub uuid: uuid::Uuid,
    pub host_url: Option<String>,
    pub deployed: bool,
    pub failure_reason: Option<String>,
}

impl DeploymentResult {
    pub fn deployed(uuid: uuid::Uuid, host_url: String) -> Self {
        DeploymentResult {
            uuid,
            host_url: Some(host_url),
            deployed: true,
            failure_reason: None,
        }
    }

    pub fn failed(uuid: uuid::Uuid, reason: impl Into<String>) -> Self {
        DeploymentResult {
            uuid,
            host_url: None,
            deployed: false,
            failure_reason: Some(reason.into()),
        }
    }
}

/// How a running container came to serve the task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provision {
    Reused,
    Created,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deployment {
    pub container: String,
    pub host_port: u16,
    pub provision: Provision,
}

#[derive(Error, Debug)]
pub enum DeployError {
    #[error("no build definition found in {}", .0.display())]
    NoBuildDefinition(PathBuf),

    #[error("image build failed: {0}")]
    BuildFailure(String),

    #[error("container failed to start: {0}")]
    StartupFailure(String),

    #[error(
        "health check timed out after {} seconds, container status: {status}",
        .timeout.as_secs()
    )]
    HealthCheckTimeout { timeout: Duration, status: String },

    #[error("container exited with code {code}")]
    ContainerExited { code: i64 },

    #[error("no free host port between {start} and {end}")]
    PortExhaustion { start: u16, end: u16 },

    #[error("result for {0} already recorded")]
    DuplicateResult(uuid::Uuid),

    #[error("container engine error: {0}")]
    Docker(#[from] DockerError),

    #[error("task metadata error: {0}")]
    Task(#[from] TaskError),

    #[error("report error: {0}")]
    Report(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type DeployResult<T> = Result<T, DeployError>;
