use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use thiserror::Error;

use crate::lib::docker::types::DockerError;
use crate::lib::tasks::store::TaskStore;
use crate::lib::tasks::types::{Cost, TaskError};

/// One invocation of the generation engine for one task.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub uuid: uuid::Uuid,
    pub title: String,
    pub prompt: String,
    pub workspace_dir: PathBuf,
    pub log_dir: PathBuf,
    pub session_id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationOutcome {
    pub usage: Cost,
    /// Final agent state as reported by the engine.
    pub agent_state: String,
    pub finished: bool,
}

/// The external code-generation engine.
#[async_trait]
pub trait GenerationEngine: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> WorkerResult<GenerationOutcome>;

    /// Tears down the runtime resources of an execution session. Called once
    /// per session whatever the outcome of `generate`.
    async fn cleanup_session(&self, session_id: &str) -> WorkerResult<()>;
}

#[derive(Clone)]
pub struct Worker {
    pub name: String,
    pub store: TaskStore,
    pub engine: Arc<dyn GenerationEngine>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Skipped,
    Done,
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct WorkerReport {
    pub worker: String,
    pub uuid: uuid::Uuid,
    pub outcome: TaskOutcome,
}

/// Progress counters shared by all workers.
#[derive(Debug, Default)]
pub struct PoolCounters {
    pub queued: AtomicU64,
    pub done: AtomicU64,
    pub failed: AtomicU64,
    pub skipped: AtomicU64,
}

impl PoolCounters {
    pub fn count(&self, outcome: &TaskOutcome) {
        let counter = match outcome {
            TaskOutcome::Skipped => &self.skipped,
            TaskOutcome::Done => &self.done,
            TaskOutcome::Failed(_) => &self.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> PoolSummary {
        PoolSummary {
            queued: self.queued.load(Ordering::Relaxed),
            done: self.done.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolSummary {
    pub queued: u64,
    pub done: u64,
    pub failed: u64,
    pub skipped: u64,
}

impl PoolSummary {
    pub fn finished(&self) -> u64 {
        self.done + self.failed + self.skipped
    }
}

#[derive(Debug, Clone)]
pub struct SystemStats {
    pub cpu_usage: f32,
    pub total_memory: u64,
    pub used_memory: u64,
    pub total_swap: u64,
    pub used_swap: u64,
    pub system_name: String,
    pub hostname: String,
    pub total_cpus: u64,
    pub disk_usage: f32,
    pub pool: PoolSummary,
}

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("task {0} has no prompt")]
    MissingPrompt(uuid::Uuid),

    #[error("generation engine error: {0}")]
    Engine(String),

    #[error("task metadata error: {0}")]
    Task(#[from] TaskError),

    #[error("Docker client error: {0}")]
    Docker(#[from] DockerError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type WorkerResult<T> = Result<T, WorkerError>;
