use std::path::Path;

use tracing::debug;

use super::types::{Layout, Task, TaskError, TaskResult};

/// Reads and writes per-task metadata files.
#[derive(Debug, Clone)]
pub struct TaskStore {
    layout: Layout,
}

impl TaskStore {
    pub fn new(layout: Layout) -> Self {
        TaskStore { layout }
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub async fn exists(&self, uuid: &uuid::Uuid) -> bool {
        tokio::fs::try_exists(self.layout.article_path(uuid))
            .await
            .unwrap_or(false)
    }

    pub async fn load(&self, uuid: &uuid::Uuid) -> TaskResult<Task> {
        let path = self.layout.article_path(uuid);
        read_task(&path).await
    }

    /// Replaces the metadata file atomically so a crash mid-write never
    /// leaves a truncated file behind.
    pub async fn save(&self, task: &Task) -> TaskResult<()> {
        let dir = self.layout.articles_dir();
        tokio::fs::create_dir_all(&dir).await?;

        let path = self.layout.article_path(&task.uuid);
        let tmp = dir.join(format!(".{}.json.tmp", task.uuid));
        let body = serde_json::to_vec_pretty(task)?;
        tokio::fs::write(&tmp, body).await?;
        tokio::fs::rename(&tmp, &path).await?;

        debug!(uuid = %task.uuid, status = %task.status, "persisted task metadata");
        Ok(())
    }
}

pub async fn read_task(path: &Path) -> TaskResult<Task> {
    let raw = match tokio::fs::read(path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(TaskError::NotFound(path.to_path_buf()));
        }
        Err(e) => return Err(e.into()),
    };
    serde_json::from_slice(&raw).map_err(|source| TaskError::Malformed {
        path: path.to_path_buf(),
        source,
    })
}
