use std::collections::HashMap;
use std::sync::Arc;

use futures_util::stream::{self, StreamExt};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{error, info, warn};

use super::health::{HealthChecker, Probe};
use super::image::{BuildContext, ImageBuilder, resolve_build_context};
use super::lifecycle::ContainerLifecycleManager;
use super::ports::PortAllocator;
use super::report::{BatchSummary, ResultRecorder};
use super::types::{DeployResult, Deployment, DeploymentResult, Provision};
use crate::lib::config::{DeployConfig, HealthConfig};
use crate::lib::docker::types::ContainerEngine;
use crate::lib::tasks::catalog::{TaskCatalog, is_ready};
use crate::lib::tasks::types::{Layout, Naming, Task};

/// Drives a whole deployment batch: build or reuse, allocate, start, verify,
/// record.
pub struct Deployer {
    images: ImageBuilder,
    ports: PortAllocator,
    lifecycle: ContainerLifecycleManager,
    layout: Layout,
    naming: Naming,
    config: DeployConfig,
    names: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl Deployer {
    pub fn new(
        engine: Arc<dyn ContainerEngine>,
        probe: Arc<dyn Probe>,
        layout: Layout,
        naming: Naming,
        config: DeployConfig,
        health: HealthConfig,
    ) -> Self {
        let checker = HealthChecker::new(engine.clone(), probe, health);
        Deployer {
            images: ImageBuilder::new(engine.clone(), naming.clone()),
            ports: PortAllocator::new(config.port_search_limit),
            lifecycle: ContainerLifecycleManager::new(engine, checker, naming.clone()),
            layout,
            naming,
            config,
            names: Mutex::new(HashMap::new()),
        }
    }

    pub fn host_url(&self, port: u16) -> String {
        format!("{}:{}", self.config.base_url.trim_end_matches('/'), port)
    }

    /// Serializes work on one canonical container name.
    async fn claim(&self, name: &str) -> OwnedMutexGuard<()> {
        let lock = self
            .names
            .lock()
            .await
            .entry(name.to_string())
            .or_default()
            .clone();
        lock.lock_owned().await
    }

    /// Drops the name's lock once nobody holds or waits on it. Clones only
    /// happen under the map lock.
    async fn unclaim(&self, name: &str) {
        let mut names = self.names.lock().await;
        if names.get(name).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            names.remove(name);
        }
    }

    async fn try_deploy(&self, task: &Task) -> DeployResult<Deployment> {
        let workspace = self.layout.workspace_dir(&task.uuid);
        let context = resolve_build_context(&workspace).await?;

        let name = self.naming.container_name(&task.uuid);
        let claim = self.claim(&name).await;
        let deployed = self.provision(task, &context).await;
        drop(claim);
        self.unclaim(&name).await;
        deployed
    }

    async fn provision(&self, task: &Task, context: &BuildContext) -> DeployResult<Deployment> {
        if let Some(existing) = self.lifecycle.reconcile(task).await? {
            self.ports.reserve(existing.host_port);
            return Ok(existing);
        }

        let image = self.images.build_or_get(task, context).await?;
        let host_port = self.ports.allocate(self.config.port_start).await?;

        match self
            .lifecycle
            .ensure_running(&image, task, host_port, self.config.container_port)
            .await
        {
            Ok(deployment) => Ok(deployment),
            Err(e) => {
                self.ports.release(host_port);
                Err(e)
            }
        }
    }

    /// Deploys one task. Every failure ends up as the result's reason.
    pub async fn deploy_task(&self, task: &Task) -> DeploymentResult {
        info!(uuid = %task.uuid, title = %task.title, "deploying task");
        match self.try_deploy(task).await {
            Ok(deployment) => {
                let url = self.host_url(deployment.host_port);
                match deployment.provision {
                    Provision::Reused => info!(uuid = %task.uuid, %url, "already deployed"),
                    Provision::Created => info!(uuid = %task.uuid, %url, "deployed"),
                }
                DeploymentResult::deployed(task.uuid, url)
            }
            Err(e) => {
                warn!(uuid = %task.uuid, error = %e, "deployment failed");
                DeploymentResult::failed(task.uuid, e.to_string())
            }
        }
    }

    async fn process(&self, task: &Task) -> DeploymentResult {
        if is_ready(task) {
            self.deploy_task(task).await
        } else {
            info!(uuid = %task.uuid, status = %task.status, "generation not done, skipping");
            DeploymentResult::failed(
                task.uuid,
                format!("generation not done (status: {})", task.status),
            )
        }
    }

    /// Runs the batch and records every task of the catalog, rejected
    /// entries included. Only a failure to write the report stops the batch.
    pub async fn deploy_batch(
        &self,
        catalog: &TaskCatalog,
        recorder: &mut ResultRecorder,
    ) -> DeployResult<BatchSummary> {
        let concurrency = self.config.concurrency.max(1);
        info!(
            tasks = catalog.len(),
            ready = catalog.ready().count(),
            rejected = catalog.rejected().len(),
            concurrency,
            "starting deployment batch"
        );

        for (entry, reason) in catalog.rejected() {
            let result = DeploymentResult::failed(entry.uuid, reason.clone());
            if let Err(e) = recorder.record(entry, result) {
                error!(uuid = %entry.uuid, error = %e, "cannot record result");
                return Err(e);
            }
        }

        let mut outcomes = stream::iter(catalog.tasks())
            .map(|task| async move { (task, self.process(task).await) })
            .buffer_unordered(concurrency);

        while let Some((task, result)) = outcomes.next().await {
            if let Err(e) = recorder.record(task, result) {
                error!(uuid = %task.uuid, error = %e, "cannot record result");
                return Err(e);
            }
        }

        Ok(recorder.summary())
    }
}
