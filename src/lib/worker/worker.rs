use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use tokio::sync::{Mutex, mpsc};
use tracing::{debug, error, info, warn};

use super::stats::collect_stats;
use super::types::{
    GenerationEngine, GenerationRequest, PoolCounters, PoolSummary, TaskOutcome, Worker,
    WorkerError, WorkerReport, WorkerResult,
};
use crate::lib::config::PoolConfig;
use crate::lib::tasks::store::TaskStore;
use crate::lib::tasks::types::State;

/// Runs the session cleanup when released, or from `Drop` if the task
/// unwinds before it gets there.
struct SessionGuard {
    engine: Arc<dyn GenerationEngine>,
    session_id: String,
    armed: bool,
}

impl SessionGuard {
    fn new(engine: Arc<dyn GenerationEngine>) -> Self {
        SessionGuard {
            engine,
            session_id: uuid::Uuid::new_v4().to_string(),
            armed: true,
        }
    }

    async fn release(mut self) {
        self.armed = false;
        cleanup(self.engine.as_ref(), &self.session_id).await;
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let engine = self.engine.clone();
        let session_id = std::mem::take(&mut self.session_id);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move { cleanup(engine.as_ref(), &session_id).await });
            }
            Err(_) => warn!(session = %session_id, "no runtime left to clean up session"),
        }
    }
}

async fn cleanup(engine: &dyn GenerationEngine, session_id: &str) {
    match engine.cleanup_session(session_id).await {
        Ok(()) => debug!(session = session_id, "session cleaned up"),
        Err(e) => warn!(session = session_id, error = %e, "session cleanup failed"),
    }
}

async fn reset_dir(dir: &Path) -> std::io::Result<()> {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    tokio::fs::create_dir_all(dir).await
}

impl Worker {
    pub fn new(name: &str, store: TaskStore, engine: Arc<dyn GenerationEngine>) -> Self {
        Worker {
            name: name.to_string(),
            store,
            engine,
        }
    }

    /// Generates one task's workspace. Every status change is persisted
    /// before the next step starts.
    pub async fn run_task(&self, uuid: uuid::Uuid) -> WorkerResult<TaskOutcome> {
        let mut task = self.store.load(&uuid).await?;
        if task.status == State::Done {
            info!(worker = %self.name, %uuid, "task done, skipped");
            return Ok(TaskOutcome::Skipped);
        }

        let layout = self.store.layout();
        let workspace_dir = layout.workspace_dir(&uuid);
        let log_dir = layout.log_dir(&uuid);
        debug!(worker = %self.name, %uuid, status = %task.status, "cleaning workspace and logs");
        reset_dir(&workspace_dir).await?;
        reset_dir(&log_dir).await?;

        task.transition(State::Running)?;
        self.store.save(&task).await?;

        let session = SessionGuard::new(self.engine.clone());
        info!(
            worker = %self.name,
            %uuid,
            title = %task.title,
            session = %session.session_id,
            "running generation"
        );
        let generated = match task.prompt() {
            Some(prompt) => {
                let request = GenerationRequest {
                    uuid,
                    title: task.title.clone(),
                    prompt: prompt.to_string(),
                    workspace_dir,
                    log_dir,
                    session_id: session.session_id.clone(),
                };
                self.engine.generate(&request).await
            }
            None => Err(WorkerError::MissingPrompt(uuid)),
        };
        session.release().await;

        let outcome = match generated {
            Ok(generation) => {
                task.cost = generation.usage;
                if generation.finished {
                    TaskOutcome::Done
                } else {
                    TaskOutcome::Failed(format!("task not finished: {}", generation.agent_state))
                }
            }
            Err(e) => TaskOutcome::Failed(e.to_string()),
        };

        let status = match outcome {
            TaskOutcome::Failed(ref reason) => {
                warn!(worker = %self.name, %uuid, reason = %reason, "generation failed");
                State::Failed
            }
            _ => State::Done,
        };
        task.transition(status)?;
        self.store.save(&task).await?;
        Ok(outcome)
    }

    /// Best-effort: a task whose run died mid-way is marked failed.
    async fn mark_failed(&self, uuid: uuid::Uuid) {
        let marked = async {
            let mut task = self.store.load(&uuid).await?;
            if task.status == State::Running {
                task.transition(State::Failed)?;
                self.store.save(&task).await?;
            }
            Ok::<(), WorkerError>(())
        };
        if let Err(e) = marked.await {
            error!(worker = %self.name, %uuid, error = %e, "cannot mark task failed");
        }
    }

    /// Runs one task in its own tokio task so that a panic stays inside it.
    async fn run_isolated(&self, uuid: uuid::Uuid) -> TaskOutcome {
        let worker = self.clone();
        let handle = tokio::spawn(async move { worker.run_task(uuid).await });
        match handle.await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => {
                error!(worker = %self.name, %uuid, error = %e, "task aborted");
                self.mark_failed(uuid).await;
                TaskOutcome::Failed(e.to_string())
            }
            Err(e) => {
                error!(worker = %self.name, %uuid, error = %e, "task panicked");
                self.mark_failed(uuid).await;
                TaskOutcome::Failed(format!("worker panicked: {}", e))
            }
        }
    }
}

async fn worker_loop(
    worker: Worker,
    queue: Arc<Mutex<mpsc::Receiver<uuid::Uuid>>>,
    results: mpsc::UnboundedSender<WorkerReport>,
    counters: Arc<PoolCounters>,
) {
    loop {
        // hold the lock only while taking the next id
        let next = queue.lock().await.recv().await;
        let Some(uuid) = next else {
            debug!(worker = %worker.name, "queue drained");
            return;
        };

        let outcome = worker.run_isolated(uuid).await;
        counters.count(&outcome);
        let report = WorkerReport {
            worker: worker.name.clone(),
            uuid,
            outcome,
        };
        if results.send(report).is_err() {
            warn!(worker = %worker.name, "results queue closed");
        }
    }
}

/// Fixed-size pool of workers sharing one bounded queue of task ids.
pub struct WorkerPool {
    config: PoolConfig,
    store: TaskStore,
    engine: Arc<dyn GenerationEngine>,
}

impl WorkerPool {
    pub fn new(config: PoolConfig, store: TaskStore, engine: Arc<dyn GenerationEngine>) -> Self {
        WorkerPool {
            config,
            store,
            engine,
        }
    }

    pub async fn run(&self, uuids: Vec<uuid::Uuid>) -> PoolSummary {
        let workers = self.config.workers.max(1);
        let (work_tx, work_rx) = mpsc::channel(self.config.queue_capacity.max(1));
        let work_rx = Arc::new(Mutex::new(work_rx));
        let (result_tx, mut result_rx) = mpsc::unbounded_channel();
        let counters = Arc::new(PoolCounters::default());

        info!(tasks = uuids.len(), workers, "starting worker pool");
        let stats = tokio::spawn(collect_stats(counters.clone(), self.config.stats_interval));

        let handles: Vec<_> = (0..workers)
            .map(|i| {
                let worker = Worker::new(
                    &format!("worker-{}", i),
                    self.store.clone(),
                    self.engine.clone(),
                );
                tokio::spawn(worker_loop(
                    worker,
                    work_rx.clone(),
                    result_tx.clone(),
                    counters.clone(),
                ))
            })
            .collect();
        drop(result_tx);

        for uuid in uuids {
            if work_tx.send(uuid).await.is_err() {
                error!(%uuid, "no worker left to take tasks");
                break;
            }
            counters.queued.fetch_add(1, Ordering::Relaxed);
        }
        drop(work_tx);

        while let Some(report) = result_rx.recv().await {
            match &report.outcome {
                TaskOutcome::Done => info!(worker = %report.worker, uuid = %report.uuid, "run success"),
                TaskOutcome::Skipped => debug!(worker = %report.worker, uuid = %report.uuid, "skipped"),
                TaskOutcome::Failed(reason) => {
                    info!(worker = %report.worker, uuid = %report.uuid, %reason, "run failed")
                }
            }
        }

        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "worker stopped unexpectedly");
            }
        }
        stats.abort();

        let summary = counters.snapshot();
        info!(
            done = summary.done,
            failed = summary.failed,
            skipped = summary.skipped,
            "worker pool finished"
        );
        summary
    }
}
