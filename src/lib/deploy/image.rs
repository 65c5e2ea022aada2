use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info};
use walkdir::WalkDir;

use super::types::{DeployError, DeployResult};
use crate::lib::docker::types::{ContainerEngine, DockerError};
use crate::lib::tasks::types::{Naming, Task};

pub const BUILD_DEFINITION: &str = "Dockerfile";

/// Directory holding the container definition for a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildContext {
    pub dockerfile: PathBuf,
}

impl BuildContext {
    pub fn dir(&self) -> &Path {
        self.dockerfile.parent().unwrap_or_else(|| Path::new("."))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    pub tag: String,
    pub built: bool,
}

/// Finds the shallowest `Dockerfile` under `workspace`; ties at equal depth
/// go to the lexicographically smallest path.
pub fn find_build_context(workspace: &Path) -> Option<BuildContext> {
    WalkDir::new(workspace)
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file() && entry.file_name() == BUILD_DEFINITION)
        .min_by(|a, b| {
            a.depth()
                .cmp(&b.depth())
                .then_with(|| a.path().cmp(b.path()))
        })
        .map(|entry| BuildContext {
            dockerfile: entry.into_path(),
        })
}

pub async fn resolve_build_context(workspace: &Path) -> DeployResult<BuildContext> {
    let root = workspace.to_path_buf();
    let found = tokio::task::spawn_blocking(move || find_build_context(&root))
        .await
        .map_err(|e| DeployError::Io(std::io::Error::other(e)))?;
    found.ok_or_else(|| DeployError::NoBuildDefinition(workspace.to_path_buf()))
}

pub struct ImageBuilder {
    engine: Arc<dyn ContainerEngine>,
    naming: Naming,
}

impl ImageBuilder {
    pub fn new(engine: Arc<dyn ContainerEngine>, naming: Naming) -> Self {
        ImageBuilder { engine, naming }
    }

    pub async fn build_or_get(&self, task: &Task, context: &BuildContext) -> DeployResult<Image> {
        let tag = self.naming.image_tag(&task.uuid);

        if self.engine.image_exists(&tag).await? {
            debug!(uuid = %task.uuid, tag, "reusing image");
            return Ok(Image { tag, built: false });
        }

        info!(uuid = %task.uuid, tag, "image not found, building");
        match self.engine.build_image(context.dir(), &tag).await {
            Ok(()) => Ok(Image { tag, built: true }),
            Err(DockerError::BuildFailed(msg)) => Err(DeployError::BuildFailure(msg)),
            Err(e) => Err(DeployError::BuildFailure(e.to_string())),
        }
    }
}
