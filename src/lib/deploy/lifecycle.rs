use std::sync::Arc;

use tracing::{info, warn};

use super::health::HealthChecker;
use super::image::Image;
use super::types::{DeployError, DeployResult, Deployment, Provision};
use crate::lib::docker::types::{
    Config, ContainerEngine, ContainerStatus, DockerError, RestartPolicy,
};
use crate::lib::tasks::types::{Naming, Task};

/// Keeps at most one live container per task.
///
/// Policy: an existing container is reused only while it is running and its
/// service answers a probe; any other existing container is stopped and
/// removed before a new one is created.
pub struct ContainerLifecycleManager {
    engine: Arc<dyn ContainerEngine>,
    health: HealthChecker,
    naming: Naming,
}

impl ContainerLifecycleManager {
    pub fn new(engine: Arc<dyn ContainerEngine>, health: HealthChecker, naming: Naming) -> Self {
        ContainerLifecycleManager {
            engine,
            health,
            naming,
        }
    }

    /// Looks at the container already carrying the task's canonical name.
    /// Returns it when it can be kept, otherwise clears it away.
    pub async fn reconcile(&self, task: &Task) -> DeployResult<Option<Deployment>> {
        let name = self.naming.container_name(&task.uuid);
        let Some(existing) = self.engine.inspect_container(&name).await? else {
            return Ok(None);
        };

        if existing.status == ContainerStatus::Running {
            if let Some(port) = existing.host_port {
                if self.health.probe_once(port).await {
                    self.engine
                        .set_restart_policy(&name, RestartPolicy::Always)
                        .await?;
                    info!(uuid = %task.uuid, container = %name, port, "reusing healthy container");
                    return Ok(Some(Deployment {
                        container: name,
                        host_port: port,
                        provision: Provision::Reused,
                    }));
                }
            }
        }

        info!(
            uuid = %task.uuid,
            container = %name,
            status = %existing.status,
            "replacing existing container"
        );
        self.teardown(&name).await;
        Ok(None)
    }

    /// Starts a fresh container for `task` and waits for it to become
    /// healthy. A healthy container gets the `always` restart policy; an
    /// unhealthy one is stopped and removed.
    pub async fn ensure_running(
        &self,
        image: &Image,
        task: &Task,
        host_port: u16,
        container_port: u16,
    ) -> DeployResult<Deployment> {
        let name = self.naming.container_name(&task.uuid);
        if self.engine.inspect_container(&name).await?.is_some() {
            self.teardown(&name).await;
        }

        let config = Config {
            name: name.clone(),
            image: image.tag.clone(),
            env: vec![format!("PORT={}", container_port)],
            host_port,
            container_port,
        };

        info!(uuid = %task.uuid, container = %name, host_port, "starting container");
        if let Err(e) = self.engine.run_container(&config).await {
            // creation may have succeeded before start failed
            self.teardown(&name).await;
            return Err(DeployError::StartupFailure(e.to_string()));
        }

        let verified = match self.health.check(&name, host_port).await {
            Ok(outcome) => outcome.into_result(self.health.timeout()),
            Err(e) => Err(e),
        };
        let verified = match verified {
            Ok(()) => self
                .engine
                .set_restart_policy(&name, RestartPolicy::Always)
                .await
                .map_err(DeployError::from),
            Err(e) => Err(e),
        };

        match verified {
            Ok(()) => Ok(Deployment {
                container: name,
                host_port,
                provision: Provision::Created,
            }),
            Err(e) => {
                warn!(uuid = %task.uuid, container = %name, error = %e, "container is not healthy");
                self.teardown(&name).await;
                Err(e)
            }
        }
    }

    /// Best-effort stop and forced removal.
    pub async fn teardown(&self, name: &str) {
        match self.engine.stop_container(name).await {
            Ok(()) | Err(DockerError::NotFound(_)) => {}
            Err(e) => warn!(container = name, error = %e, "failed to stop container"),
        }
        match self.engine.remove_container(name).await {
            Ok(()) => info!(container = name, "container stopped and removed"),
            Err(DockerError::NotFound(_)) => {}
            Err(e) => warn!(container = name, error = %e, "failed to remove container"),
        }
    }
}
