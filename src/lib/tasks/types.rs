use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum State {
    #[default]
    Init,
    Running,
    Done,
    Failed,
}

impl State {
    pub fn as_str(&self) -> &'static str {
        match self {
            State::Init => "init",
            State::Running => "running",
            State::Done => "done",
            State::Failed => "failed",
        }
    }
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Usage reported by the generation engine for one task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Cost {
    #[serde(default)]
    pub cost: f64,
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Article {
    #[serde(default)]
    pub md: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Per-task metadata as stored in `articles/<uuid>.json`.
///
/// Fields this crate does not know about are kept in `extra` so that a
/// read-modify-write cycle never drops them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub uuid: uuid::Uuid,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub executable: bool,
    #[serde(default)]
    pub complexity: f64,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub cost: Cost,
    #[serde(default)]
    pub status: State,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub article: Option<Article>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Task {
    pub fn new(uuid: uuid::Uuid, title: &str) -> Self {
        Task {
            uuid,
            url: String::new(),
            title: title.to_string(),
            executable: false,
            complexity: 0.0,
            confidence: 0.0,
            cost: Cost::default(),
            status: State::Init,
            article: None,
            extra: Map::new(),
        }
    }

    pub fn prompt(&self) -> Option<&str> {
        self.article.as_ref()?.prompt.as_deref()
    }

    /// Moves the task to `dst`, refusing transitions the status machine forbids.
    pub fn transition(&mut self, dst: State) -> TaskResult<()> {
        if !super::state::valid_state_transition(&self.status, &dst) {
            return Err(TaskError::InvalidStateTransition {
                uuid: self.uuid,
                from: self.status,
                to: dst,
            });
        }
        self.status = dst;
        Ok(())
    }
}

/// Deterministic names for everything a task owns in the container engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Naming {
    pub namespace: String,
}

impl Naming {
    pub fn new(namespace: &str) -> Self {
        Naming {
            namespace: sanitize_namespace(namespace),
        }
    }

    /// Derives the namespace from the final component of a base directory.
    pub fn from_base_dir(base_dir: &std::path::Path) -> Self {
        let name = base_dir
            .canonicalize()
            .ok()
            .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
            .or_else(|| base_dir.file_name().map(|n| n.to_string_lossy().into_owned()))
            .unwrap_or_default();
        Naming::new(&name)
    }

    pub fn container_name(&self, uuid: &uuid::Uuid) -> String {
        format!("{}-{}", self.namespace, uuid)
    }

    pub fn image_tag(&self, uuid: &uuid::Uuid) -> String {
        format!("{}:{}", uuid, self.namespace)
    }
}

fn sanitize_namespace(raw: &str) -> String {
    let cleaned: String = raw
        .to_lowercase()
        .chars()
        .map(|c| match c {
            'a'..='z' | '0'..='9' | '_' | '.' | '-' => c,
            _ => '-',
        })
        .collect();
    // tags may not start with '.' or '-'
    let trimmed = cleaned.trim_start_matches(['.', '-']);
    if trimmed.is_empty() {
        "default".to_string()
    } else {
        trimmed.chars().take(120).collect()
    }
}

/// Directory layout under a batch base directory.
#[derive(Debug, Clone)]
pub struct Layout {
    pub base_dir: PathBuf,
}

impl Layout {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Layout {
            base_dir: base_dir.into(),
        }
    }

    pub fn articles_dir(&self) -> PathBuf {
        self.base_dir.join("articles")
    }

    pub fn workspace_base(&self) -> PathBuf {
        self.base_dir.join("workspace")
    }

    pub fn log_base(&self) -> PathBuf {
        self.base_dir.join("logs")
    }

    pub fn article_path(&self, uuid: &uuid::Uuid) -> PathBuf {
        self.articles_dir().join(format!("{}.json", uuid))
    }

    pub fn workspace_dir(&self, uuid: &uuid::Uuid) -> PathBuf {
        self.workspace_base().join(uuid.to_string())
    }

    pub fn log_dir(&self, uuid: &uuid::Uuid) -> PathBuf {
        self.log_base().join(uuid.to_string())
    }

    pub fn report_path(&self) -> PathBuf {
        self.base_dir.join("c2a.csv")
    }
}

#[derive(Error, Debug)]
pub enum TaskError {
    #[error("invalid state transition for {uuid}: {from} -> {to}")]
    InvalidStateTransition {
        uuid: uuid::Uuid,
        from: State,
        to: State,
    },

    #[error("task metadata not found: {0}")]
    NotFound(PathBuf),

    #[error("malformed task metadata in {path}: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type TaskResult<T> = Result<T, TaskError>;
