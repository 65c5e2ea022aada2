//! In-memory engine used by tests to script container behaviour.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;

use super::types::{
    Config, ContainerEngine, ContainerInfo, ContainerStatus, DockerError, DockerResult,
    RestartPolicy,
};

#[derive(Debug, Clone)]
struct FakeContainer {
    info: ContainerInfo,
    script: VecDeque<ContainerStatus>,
    restart_policy: RestartPolicy,
}

#[derive(Debug, Default)]
struct Inner {
    images: HashSet<String>,
    containers: HashMap<String, FakeContainer>,
    scripts: HashMap<String, Vec<ContainerStatus>>,
    exit_codes: HashMap<String, i64>,
    failing_builds: HashSet<String>,
    calls: Vec<String>,
}

#[derive(Debug, Default)]
pub struct FakeEngine {
    inner: Mutex<Inner>,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_image(&self, tag: &str) {
        self.inner.lock().unwrap().images.insert(tag.to_string());
    }

    /// Registers an already existing container.
    pub fn add_container(&self, name: &str, status: ContainerStatus, host_port: Option<u16>) {
        let info = ContainerInfo {
            id: format!("id-{}", name),
            name: name.to_string(),
            status,
            exit_code: None,
            host_port,
        };
        self.inner.lock().unwrap().containers.insert(
            name.to_string(),
            FakeContainer {
                info,
                script: VecDeque::new(),
                restart_policy: RestartPolicy::No,
            },
        );
    }

    /// Statuses reported by successive inspections of a container created
    /// later under `name`; the last one sticks.
    pub fn script_status(&self, name: &str, statuses: Vec<ContainerStatus>) {
        self.inner
            .lock()
            .unwrap()
            .scripts
            .insert(name.to_string(), statuses);
    }

    pub fn exit_code(&self, name: &str, code: i64) {
        self.inner
            .lock()
            .unwrap()
            .exit_codes
            .insert(name.to_string(), code);
    }

    pub fn fail_build(&self, tag: &str) {
        self.inner
            .lock()
            .unwrap()
            .failing_builds
            .insert(tag.to_string());
    }

    pub fn calls(&self) -> Vec<String> {
        self.inner.lock().unwrap().calls.clone()
    }

    pub fn count_calls(&self, prefix: &str) -> usize {
        self.calls().iter().filter(|c| c.starts_with(prefix)).count()
    }

    pub fn exists(&self, name: &str) -> bool {
        self.inner.lock().unwrap().containers.contains_key(name)
    }

    pub fn restart_policy(&self, name: &str) -> Option<RestartPolicy> {
        self.inner
            .lock()
            .unwrap()
            .containers
            .get(name)
            .map(|c| c.restart_policy)
    }
}

#[async_trait]
impl ContainerEngine for FakeEngine {
    async fn image_exists(&self, tag: &str) -> DockerResult<bool> {
        Ok(self.inner.lock().unwrap().images.contains(tag))
    }

    async fn build_image(&self, _context: &Path, tag: &str) -> DockerResult<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(format!("build:{}", tag));
        if inner.failing_builds.contains(tag) {
            return Err(DockerError::BuildFailed(format!("step 3/5 failed for {}", tag)));
        }
        inner.images.insert(tag.to_string());
        Ok(())
    }

    async fn run_container(&self, config: &Config) -> DockerResult<String> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(format!("run:{}", config.name));
        if inner.containers.contains_key(&config.name) {
            return Err(DockerError::ClientError(format!(
                "name {} already in use",
                config.name
            )));
        }
        let script: VecDeque<ContainerStatus> = inner
            .scripts
            .get(&config.name)
            .cloned()
            .unwrap_or_else(|| vec![ContainerStatus::Running])
            .into();
        let info = ContainerInfo {
            id: format!("id-{}", config.name),
            name: config.name.clone(),
            status: ContainerStatus::Created,
            exit_code: inner.exit_codes.get(&config.name).copied(),
            host_port: Some(config.host_port),
        };
        let id = info.id.clone();
        inner.containers.insert(
            config.name.clone(),
            FakeContainer {
                info,
                script,
                restart_policy: RestartPolicy::No,
            },
        );
        Ok(id)
    }

    async fn inspect_container(&self, name: &str) -> DockerResult<Option<ContainerInfo>> {
        let mut inner = self.inner.lock().unwrap();
        let Some(container) = inner.containers.get_mut(name) else {
            return Ok(None);
        };
        if container.script.len() > 1 {
            if let Some(next) = container.script.pop_front() {
                container.info.status = next;
            }
        } else if let Some(last) = container.script.front() {
            container.info.status = last.clone();
        }
        Ok(Some(container.info.clone()))
    }

    async fn stop_container(&self, name: &str) -> DockerResult<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(format!("stop:{}", name));
        match inner.containers.get_mut(name) {
            Some(container) => {
                container.info.status = ContainerStatus::Exited;
                container.script.clear();
                Ok(())
            }
            None => Err(DockerError::NotFound(name.to_string())),
        }
    }

    async fn remove_container(&self, name: &str) -> DockerResult<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(format!("remove:{}", name));
        match inner.containers.remove(name) {
            Some(_) => Ok(()),
            None => Err(DockerError::NotFound(name.to_string())),
        }
    }

    async fn set_restart_policy(&self, name: &str, policy: RestartPolicy) -> DockerResult<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(format!("restart:{}:{:?}", name, policy));
        match inner.containers.get_mut(name) {
            Some(container) => {
                container.restart_policy = policy;
                Ok(())
            }
            None => Err(DockerError::NotFound(name.to_string())),
        }
    }
}
