use std::collections::HashSet;
use std::fs::File;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::info;

use super::types::{DeployError, DeployResult, DeploymentResult};
use crate::lib::tasks::types::Task;

const HEADERS: [&str; 13] = [
    "uuid",
    "url",
    "title",
    "executable",
    "complexity",
    "confidence",
    "cost",
    "input_tokens",
    "output_tokens",
    "app_status",
    "host_url",
    "deployed",
    "failure_reason",
];

#[derive(Debug, Serialize)]
struct ReportRow<'a> {
    uuid: String,
    url: &'a str,
    title: &'a str,
    executable: bool,
    complexity: f64,
    confidence: f64,
    cost: f64,
    input_tokens: u64,
    output_tokens: u64,
    app_status: &'a str,
    host_url: Option<&'a str>,
    deployed: bool,
    failure_reason: Option<&'a str>,
}

impl<'a> ReportRow<'a> {
    fn new(task: &'a Task, result: &'a DeploymentResult) -> Self {
        ReportRow {
            uuid: task.uuid.to_string(),
            url: &task.url,
            title: &task.title,
            executable: task.executable,
            complexity: task.complexity,
            confidence: task.confidence,
            cost: task.cost.cost,
            input_tokens: task.cost.input_tokens,
            output_tokens: task.cost.output_tokens,
            app_status: task.status.as_str(),
            host_url: result.host_url.as_deref(),
            deployed: result.deployed,
            failure_reason: result.failure_reason.as_deref(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub total: usize,
    pub deployed: usize,
    pub failed: usize,
}

/// Collects one result per task and appends it to the CSV report as soon as
/// it is recorded, so an interrupted batch keeps every finished row.
pub struct ResultRecorder {
    path: PathBuf,
    writer: csv::Writer<File>,
    results: Vec<DeploymentResult>,
    recorded: HashSet<uuid::Uuid>,
}

impl ResultRecorder {
    /// Truncates the report at `path` and writes its header.
    pub fn create(path: &Path) -> DeployResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = File::create(path)?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        writer.write_record(HEADERS)?;
        writer.flush()?;

        Ok(ResultRecorder {
            path: path.to_path_buf(),
            writer,
            results: Vec::new(),
            recorded: HashSet::new(),
        })
    }

    pub fn record(&mut self, task: &Task, result: DeploymentResult) -> DeployResult<()> {
        if !self.recorded.insert(result.uuid) {
            return Err(DeployError::DuplicateResult(result.uuid));
        }
        self.writer.serialize(ReportRow::new(task, &result))?;
        self.writer.flush()?;
        self.results.push(result);
        Ok(())
    }

    pub fn results(&self) -> &[DeploymentResult] {
        &self.results
    }

    pub fn summary(&self) -> BatchSummary {
        let deployed = self.results.iter().filter(|r| r.deployed).count();
        BatchSummary {
            total: self.results.len(),
            deployed,
            failed: self.results.len() - deployed,
        }
    }

    pub fn finish(mut self) -> DeployResult<BatchSummary> {
        self.writer.flush()?;
        let summary = self.summary();
        info!(
            report = %self.path.display(),
            total = summary.total,
            deployed = summary.deployed,
            failed = summary.failed,
            "deployment report written"
        );
        Ok(summary)
    }
}
