use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

use super::types::{
    GenerationEngine, GenerationOutcome, GenerationRequest, WorkerError, WorkerResult,
};
use crate::lib::config::EngineConfig;
use crate::lib::docker::types::{ContainerEngine, DockerError};
use crate::lib::tasks::types::Cost;

/// Usage line the engine prints on stdout when it is done.
#[derive(Debug, Deserialize)]
struct EngineReport {
    agent_state: String,
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
    #[serde(default)]
    cost: f64,
}

/// Runs the generation engine as an external process per task.
pub struct CommandEngine {
    config: EngineConfig,
    docker: Option<Arc<dyn ContainerEngine>>,
}

impl CommandEngine {
    pub fn new(config: EngineConfig, docker: Option<Arc<dyn ContainerEngine>>) -> Self {
        CommandEngine { config, docker }
    }

    pub fn runtime_container(&self, session_id: &str) -> String {
        format!("{}-{}", self.config.runtime_prefix, session_id)
    }

    fn args(&self, request: &GenerationRequest) -> Vec<String> {
        self.config
            .args
            .iter()
            .map(|arg| {
                arg.replace("{workspace}", &request.workspace_dir.to_string_lossy())
                    .replace("{log_dir}", &request.log_dir.to_string_lossy())
                    .replace("{session}", &request.session_id)
                    .replace("{uuid}", &request.uuid.to_string())
            })
            .collect()
    }
}

/// The last stdout line that parses as a report wins.
fn parse_report(stdout: &str) -> Option<EngineReport> {
    stdout
        .lines()
        .rev()
        .map(str::trim)
        .filter(|line| line.starts_with('{'))
        .find_map(|line| serde_json::from_str(line).ok())
}

#[async_trait]
impl GenerationEngine for CommandEngine {
    async fn generate(&self, request: &GenerationRequest) -> WorkerResult<GenerationOutcome> {
        let args = self.args(request);
        debug!(uuid = %request.uuid, program = %self.config.program, ?args, "spawning engine");

        let mut child = Command::new(&self.config.program)
            .args(&args)
            .env("WORKSPACE_BASE", &request.workspace_dir)
            .env("LOG_DIR", &request.log_dir)
            .env("SESSION_ID", &request.session_id)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                WorkerError::Engine(format!("cannot start {}: {}", self.config.program, e))
            })?;

        let writer = child.stdin.take().map(|mut stdin| {
            let prompt = request.prompt.clone();
            tokio::spawn(async move {
                stdin.write_all(prompt.as_bytes()).await?;
                stdin.shutdown().await
            })
        });

        let output = child.wait_with_output().await?;
        if let Some(writer) = writer {
            if let Ok(Err(e)) = writer.await {
                debug!(uuid = %request.uuid, error = %e, "engine closed stdin early");
            }
        }

        tokio::fs::create_dir_all(&request.log_dir).await?;
        tokio::fs::write(request.log_dir.join("engine.stdout.log"), &output.stdout).await?;
        tokio::fs::write(request.log_dir.join("engine.stderr.log"), &output.stderr).await?;

        if !output.status.success() {
            return Err(WorkerError::Engine(format!(
                "{} exited with {}",
                self.config.program, output.status
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let report = parse_report(&stdout)
            .ok_or_else(|| WorkerError::Engine("engine printed no usage report".to_string()))?;

        info!(
            uuid = %request.uuid,
            state = %report.agent_state,
            input_tokens = report.input_tokens,
            output_tokens = report.output_tokens,
            "engine finished"
        );
        Ok(GenerationOutcome {
            finished: report.agent_state.eq_ignore_ascii_case("finished"),
            usage: Cost {
                cost: report.cost,
                input_tokens: report.input_tokens,
                output_tokens: report.output_tokens,
            },
            agent_state: report.agent_state,
        })
    }

    async fn cleanup_session(&self, session_id: &str) -> WorkerResult<()> {
        let Some(docker) = &self.docker else {
            return Ok(());
        };
        let name = self.runtime_container(session_id);
        match docker.remove_container(&name).await {
            Ok(()) | Err(DockerError::NotFound(_)) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
