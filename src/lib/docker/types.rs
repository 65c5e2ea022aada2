use std::path::Path;

use async_trait::async_trait;
use bollard::Docker;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerStatus {
    Created,
    Running,
    Exited,
    /// Anything else the engine reports (restarting, paused, removing, dead).
    Other(String),
}

impl std::fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContainerStatus::Created => f.write_str("created"),
            ContainerStatus::Running => f.write_str("running"),
            ContainerStatus::Exited => f.write_str("exited"),
            ContainerStatus::Other(s) => f.write_str(s),
        }
    }
}

/// What the engine currently reports about a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerInfo {
    pub id: String,
    pub name: String,
    pub status: ContainerStatus,
    pub exit_code: Option<i64>,
    /// First host port published for the container, if any.
    pub host_port: Option<u16>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartPolicy {
    No,
    Always,
}

/// Everything needed to create and start a service container.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub name: String,
    pub image: String,
    pub env: Vec<String>,
    pub host_port: u16,
    pub container_port: u16,
}

impl Config {
    pub fn port_key(&self) -> String {
        format!("{}/tcp", self.container_port)
    }
}

/// The container-engine operations the orchestrator consumes.
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Returns `true` when an image with this tag is present locally.
    async fn image_exists(&self, tag: &str) -> DockerResult<bool>;

    /// Builds an image from a directory holding a `Dockerfile`.
    async fn build_image(&self, context: &Path, tag: &str) -> DockerResult<()>;

    /// Creates and starts a container, returning its id.
    async fn run_container(&self, config: &Config) -> DockerResult<String>;

    /// `Ok(None)` when no container with that name exists.
    async fn inspect_container(&self, name: &str) -> DockerResult<Option<ContainerInfo>>;

    async fn stop_container(&self, name: &str) -> DockerResult<()>;

    /// Force-removes a container.
    async fn remove_container(&self, name: &str) -> DockerResult<()>;

    async fn set_restart_policy(&self, name: &str, policy: RestartPolicy) -> DockerResult<()>;
}

#[derive(Debug, Clone)]
pub struct DockerClient {
    pub client: Docker,
}

#[derive(Error, Debug)]
pub enum DockerError {
    #[error("Docker client error: {0}")]
    ClientError(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("image build failed: {0}")]
    BuildFailed(String),

    #[error("Docker API error: {0}")]
    Api(#[from] bollard::errors::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type DockerResult<T> = Result<T, DockerError>;
