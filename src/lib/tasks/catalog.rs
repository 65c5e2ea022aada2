use std::collections::HashSet;
use std::path::Path;

use tracing::{debug, info, warn};

use super::store::TaskStore;
use super::types::{State, Task, TaskError, TaskResult};

/// Reads the articles index: a JSON array of task objects.
pub async fn read_index(path: &Path) -> TaskResult<Vec<Task>> {
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

/// Candidate tasks for a deployment batch, in index order.
///
/// Entries whose metadata exists but cannot be read are kept in `rejected`
/// as the index saw them, together with the reason.
#[derive(Debug, Clone, Default)]
pub struct TaskCatalog {
    tasks: Vec<Task>,
    rejected: Vec<(Task, String)>,
}

impl TaskCatalog {
    pub fn new(tasks: Vec<Task>) -> Self {
        TaskCatalog {
            tasks,
            rejected: Vec::new(),
        }
    }

    /// Resolves every index entry against its stored metadata. Entries
    /// without a metadata file were never generated and are left out;
    /// repeated uuids keep their first occurrence.
    pub async fn load(store: &TaskStore, index_path: &Path) -> TaskResult<Self> {
        let index = read_index(index_path).await?;
        let mut seen = HashSet::new();
        let mut tasks = Vec::with_capacity(index.len());
        let mut rejected = Vec::new();

        for entry in index {
            if !seen.insert(entry.uuid) {
                warn!(uuid = %entry.uuid, "duplicate uuid in index, ignoring");
                continue;
            }
            match store.load(&entry.uuid).await {
                Ok(task) => tasks.push(task),
                Err(TaskError::NotFound(_)) => {
                    debug!(uuid = %entry.uuid, "no metadata file, skipping");
                }
                Err(e) => {
                    warn!(uuid = %entry.uuid, error = %e, "unreadable metadata");
                    rejected.push((entry, e.to_string()));
                }
            }
        }

        info!(
            candidates = tasks.len(),
            rejected = rejected.len(),
            "loaded task catalog"
        );
        Ok(TaskCatalog { tasks, rejected })
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn rejected(&self) -> &[(Task, String)] {
        &self.rejected
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn ready(&self) -> impl Iterator<Item = &Task> {
        self.tasks.iter().filter(|t| is_ready(t))
    }
}

/// Only tasks whose generation finished can be deployed.
pub fn is_ready(task: &Task) -> bool {
    task.status == State::Done
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lib::tasks::types::Layout;

    #[tokio::test]
    async fn load_skips_missing_and_duplicate_entries() {
        let dir = tempfile::tempdir().unwrap();
        let store = TaskStore::new(Layout::new(dir.path()));

        let mut done = Task::new(uuid::Uuid::new_v4(), "done");
        done.status = State::Done;
        let pending = Task::new(uuid::Uuid::new_v4(), "pending");
        let missing = Task::new(uuid::Uuid::new_v4(), "missing");
        store.save(&done).await.unwrap();
        store.save(&pending).await.unwrap();

        let index = vec![done.clone(), pending.clone(), missing, done.clone()];
        let index_path = dir.path().join("index.json");
        std::fs::write(&index_path, serde_json::to_vec(&index).unwrap()).unwrap();

        let catalog = TaskCatalog::load(&store, &index_path).await.unwrap();
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.tasks()[0].uuid, done.uuid);
        assert_eq!(catalog.tasks()[1].uuid, pending.uuid);

        let ready: Vec<_> = catalog.ready().map(|t| t.uuid).collect();
        assert_eq!(ready, vec![done.uuid]);
    }

    #[tokio::test]
    async fn corrupt_metadata_rejects_only_its_entry() {
        let dir = tempfile::tempdir().unwrap();
        let layout = Layout::new(dir.path());
        let store = TaskStore::new(layout.clone());

        let mut done = Task::new(uuid::Uuid::new_v4(), "done");
        done.status = State::Done;
        store.save(&done).await.unwrap();
        let corrupt = Task::new(uuid::Uuid::new_v4(), "corrupt");
        std::fs::write(layout.article_path(&corrupt.uuid), "{truncated").unwrap();

        let index_path = dir.path().join("index.json");
        let index = vec![corrupt.clone(), done.clone()];
        std::fs::write(&index_path, serde_json::to_vec(&index).unwrap()).unwrap();

        let catalog = TaskCatalog::load(&store, &index_path).await.unwrap();
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.tasks()[0].uuid, done.uuid);

        let (entry, reason) = &catalog.rejected()[0];
        assert_eq!(entry.uuid, corrupt.uuid);
        assert_eq!(entry.title, "corrupt");
        assert!(reason.contains("malformed"));
    }

    #[tokio::test]
    async fn missing_index_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = TaskStore::new(Layout::new(dir.path()));
        let err = TaskCatalog::load(&store, &dir.path().join("nope.json"))
            .await
            .unwrap_err();
        assert!(matches!(err, TaskError::NotFound(_)));
    }
}
