use std::collections::HashSet;

use tracing::{debug, info};

use crate::lib::tasks::store::TaskStore;
use crate::lib::tasks::types::{Article, Task, TaskResult};

pub const CONTENT_PLACEHOLDER: &str = "{{content_source}}";

/// Fills the prompt template with the article title and body.
pub fn render_prompt(template: &str, task: &Task) -> String {
    let md = task.article.as_ref().map(|a| a.md.as_str()).unwrap_or("");
    let content = format!("{}\n{}", task.title, md);
    template.replace(CONTENT_PLACEHOLDER, &content)
}

/// Writes metadata for every index entry that has none yet and returns the
/// uuids to enqueue, in index order and without repeats. Existing metadata
/// is left alone so a rerun keeps each task's status.
pub async fn prepare_batch(
    store: &TaskStore,
    index: Vec<Task>,
    template: &str,
) -> TaskResult<Vec<uuid::Uuid>> {
    let layout = store.layout();
    tokio::fs::create_dir_all(layout.articles_dir()).await?;
    tokio::fs::create_dir_all(layout.workspace_base()).await?;
    tokio::fs::create_dir_all(layout.log_base()).await?;

    let mut seen = HashSet::new();
    let mut queue = Vec::with_capacity(index.len());
    let mut written = 0usize;

    for mut task in index {
        if !seen.insert(task.uuid) {
            continue;
        }
        if store.exists(&task.uuid).await {
            debug!(uuid = %task.uuid, "metadata exists, keeping it");
        } else {
            let prompt = render_prompt(template, &task);
            task.article.get_or_insert_with(Article::default).prompt = Some(prompt);
            store.save(&task).await?;
            written += 1;
        }
        queue.push(task.uuid);
    }

    info!(queued = queue.len(), written, "prepared batch");
    Ok(queue)
}
