use std::{collections::HashMap, path::Path};

use super::types::{
    Config, ContainerEngine, ContainerInfo, ContainerStatus, DockerClient, DockerError,
    DockerResult, RestartPolicy,
};
use async_trait::async_trait;
use bollard::{
    Docker,
    container::{
        Config as ContainerConfig, CreateContainerOptions, InspectContainerOptions,
        RemoveContainerOptions, StartContainerOptions, UpdateContainerOptions,
    },
    errors::Error as BollardError,
    image::BuildImageOptions,
    models::{
        ContainerInspectResponse, ContainerStateStatusEnum, HostConfig, PortBinding, PortMap,
        RestartPolicy as EngineRestartPolicy, RestartPolicyNameEnum,
    },
};
use futures_util::stream::StreamExt;
use tracing::{debug, info, warn};

impl DockerClient {
    /// Connects to the local daemon and checks that it answers.
    pub async fn connect() -> DockerResult<Self> {
        let client = Docker::connect_with_local_defaults()?;
        client.ping().await?;
        Ok(DockerClient { client })
    }
}

fn status_code(err: &BollardError) -> Option<u16> {
    match err {
        BollardError::DockerResponseServerError { status_code, .. } => Some(*status_code),
        _ => None,
    }
}

fn into_status(status: Option<ContainerStateStatusEnum>) -> ContainerStatus {
    match status {
        Some(ContainerStateStatusEnum::CREATED) => ContainerStatus::Created,
        Some(ContainerStateStatusEnum::RUNNING) => ContainerStatus::Running,
        Some(ContainerStateStatusEnum::EXITED) => ContainerStatus::Exited,
        Some(other) => ContainerStatus::Other(other.to_string()),
        None => ContainerStatus::Other("unknown".to_string()),
    }
}

fn first_host_port(ports: Option<&PortMap>) -> Option<u16> {
    ports?
        .values()
        .flatten()
        .flatten()
        .filter_map(|binding| binding.host_port.as_deref())
        .find_map(|port| port.parse().ok())
}

fn into_info(name: &str, resp: ContainerInspectResponse) -> ContainerInfo {
    let state = resp.state.unwrap_or_default();
    let host_port = first_host_port(
        resp.network_settings
            .as_ref()
            .and_then(|settings| settings.ports.as_ref()),
    )
    .or_else(|| {
        first_host_port(
            resp.host_config
                .as_ref()
                .and_then(|host| host.port_bindings.as_ref()),
        )
    });

    ContainerInfo {
        id: resp.id.unwrap_or_default(),
        name: name.to_string(),
        status: into_status(state.status),
        exit_code: state.exit_code,
        host_port,
    }
}

async fn archive_context(context: &Path) -> DockerResult<Vec<u8>> {
    let context = context.to_path_buf();
    tokio::task::spawn_blocking(move || -> std::io::Result<Vec<u8>> {
        let mut builder = tar::Builder::new(Vec::new());
        builder.append_dir_all(".", &context)?;
        builder.into_inner()
    })
    .await
    .map_err(|e| DockerError::ClientError(format!("archive task failed: {}", e)))?
    .map_err(DockerError::from)
}

#[async_trait]
impl ContainerEngine for DockerClient {
    async fn image_exists(&self, tag: &str) -> DockerResult<bool> {
        match self.client.inspect_image(tag).await {
            Ok(_) => Ok(true),
            Err(e) if status_code(&e) == Some(404) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn build_image(&self, context: &Path, tag: &str) -> DockerResult<()> {
        info!(tag, context = %context.display(), "building image");
        let archive = archive_context(context).await?;

        let options = BuildImageOptions {
            dockerfile: "Dockerfile".to_string(),
            t: tag.to_string(),
            rm: true,
            ..Default::default()
        };

        let mut stream = self
            .client
            .build_image(options, None, Some(bytes::Bytes::from(archive)));

        while let Some(msg) = stream.next().await {
            let info = msg?;
            if let Some(error) = info.error {
                return Err(DockerError::BuildFailed(error));
            }
            if let Some(line) = info.stream {
                let line = line.trim_end();
                if !line.is_empty() {
                    debug!(tag, "{}", line);
                }
            }
        }

        info!(tag, "image built");
        Ok(())
    }

    async fn run_container(&self, config: &Config) -> DockerResult<String> {
        let port_key = config.port_key();

        let port_bindings: HashMap<String, Option<Vec<PortBinding>>> = HashMap::from([(
            port_key.clone(),
            Some(vec![PortBinding {
                host_ip: None,
                host_port: Some(config.host_port.to_string()),
            }]),
        )]);

        let host_config = HostConfig {
            port_bindings: Some(port_bindings),
            auto_remove: Some(false),
            ..Default::default()
        };

        let container_config = ContainerConfig {
            image: Some(config.image.clone()),
            env: Some(config.env.clone()),
            exposed_ports: Some(HashMap::from([(port_key, HashMap::new())])),
            tty: Some(true),
            open_stdin: Some(true),
            host_config: Some(host_config),
            ..Default::default()
        };

        let options = Some(CreateContainerOptions {
            name: config.name.clone(),
            platform: None,
        });

        let resp = self
            .client
            .create_container(options, container_config)
            .await?;
        for warning in &resp.warnings {
            warn!(container = %config.name, "{}", warning);
        }
        debug!(container = %config.name, id = %resp.id, "container created");

        self.client
            .start_container(&resp.id, None::<StartContainerOptions<String>>)
            .await?;

        info!(
            container = %config.name,
            host_port = config.host_port,
            "container started"
        );
        Ok(resp.id)
    }

    async fn inspect_container(&self, name: &str) -> DockerResult<Option<ContainerInfo>> {
        match self
            .client
            .inspect_container(name, None::<InspectContainerOptions>)
            .await
        {
            Ok(resp) => Ok(Some(into_info(name, resp))),
            Err(e) if status_code(&e) == Some(404) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn stop_container(&self, name: &str) -> DockerResult<()> {
        match self.client.stop_container(name, None).await {
            Ok(_) => {
                info!(container = name, "container stopped");
                Ok(())
            }
            // already stopped
            Err(e) if status_code(&e) == Some(304) => Ok(()),
            Err(e) if status_code(&e) == Some(404) => Err(DockerError::NotFound(name.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    async fn remove_container(&self, name: &str) -> DockerResult<()> {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        match self.client.remove_container(name, Some(options)).await {
            Ok(_) => {
                info!(container = name, "container removed");
                Ok(())
            }
            Err(e) if status_code(&e) == Some(404) => Err(DockerError::NotFound(name.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    async fn set_restart_policy(&self, name: &str, policy: RestartPolicy) -> DockerResult<()> {
        let name_enum = match policy {
            RestartPolicy::No => RestartPolicyNameEnum::NO,
            RestartPolicy::Always => RestartPolicyNameEnum::ALWAYS,
        };
        let options = UpdateContainerOptions::<String> {
            restart_policy: Some(EngineRestartPolicy {
                name: Some(name_enum),
                maximum_retry_count: None,
            }),
            ..Default::default()
        };
        self.client.update_container(name, options).await?;
        debug!(container = name, ?policy, "restart policy updated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bollard::models::{ContainerState, NetworkSettings};

    #[test]
    fn inspect_response_maps_status_and_port() {
        let resp = ContainerInspectResponse {
            id: Some("abc".to_string()),
            state: Some(ContainerState {
                status: Some(ContainerStateStatusEnum::EXITED),
                exit_code: Some(137),
                ..Default::default()
            }),
            network_settings: Some(NetworkSettings {
                ports: Some(HashMap::from([(
                    "8000/tcp".to_string(),
                    Some(vec![PortBinding {
                        host_ip: Some("0.0.0.0".to_string()),
                        host_port: Some("9003".to_string()),
                    }]),
                )])),
                ..Default::default()
            }),
            ..Default::default()
        };

        let info = into_info("ns-1", resp);
        assert_eq!(info.status, ContainerStatus::Exited);
        assert_eq!(info.exit_code, Some(137));
        assert_eq!(info.host_port, Some(9003));
        assert_eq!(info.name, "ns-1");
    }

    #[test]
    fn missing_state_is_reported_as_unknown() {
        let info = into_info("ns-2", ContainerInspectResponse::default());
        assert_eq!(info.status, ContainerStatus::Other("unknown".to_string()));
        assert_eq!(info.host_port, None);
    }

    #[tokio::test]
    async fn context_archive_contains_the_dockerfile() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Dockerfile"), "FROM scratch\n").unwrap();
        std::fs::create_dir(dir.path().join("app")).unwrap();
        std::fs::write(dir.path().join("app/main.py"), "print(1)\n").unwrap();

        let archive = archive_context(dir.path()).await.unwrap();
        let mut reader = tar::Archive::new(archive.as_slice());
        let names: Vec<String> = reader
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().to_string_lossy().into_owned())
            .collect();
        assert!(names.iter().any(|n| n.ends_with("Dockerfile")));
        assert!(names.iter().any(|n| n.ends_with("main.py")));
    }
}
