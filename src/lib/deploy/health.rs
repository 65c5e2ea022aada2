//! Readiness verification for a freshly started container.
//!
//! Container liveness (the engine's view) and application readiness (an HTTP
//! answer on the published port) are checked separately: a running container
//! whose service is not yet listening keeps the check polling, while an
//! exited container ends it immediately.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::time::{Instant, sleep};
use tracing::{debug, info};

use super::types::{DeployError, DeployResult};
use crate::lib::config::HealthConfig;
use crate::lib::docker::types::{ContainerEngine, ContainerStatus};

/// A probe failure. Always transient: the checker logs it and polls again.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("unexpected status {0}")]
    Status(u16),
}

#[async_trait]
pub trait Probe: Send + Sync {
    /// `Ok` when the service on `port` answers with a 2xx status.
    async fn probe(&self, port: u16) -> Result<(), ProbeError>;
}

/// Plain `GET http://<host>:<port>/`.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: reqwest::Client,
    host: String,
}

impl HttpProbe {
    pub fn new(host: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(HttpProbe {
            client,
            host: host.to_string(),
        })
    }
}

#[async_trait]
impl Probe for HttpProbe {
    async fn probe(&self, port: u16) -> Result<(), ProbeError> {
        let url = format!("http://{}:{}/", self.host, port);
        let resp = self.client.get(&url).send().await?;
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(ProbeError::Status(resp.status().as_u16()))
        }
    }
}

/// Terminal states of a health check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthOutcome {
    Healthy,
    Exited { code: i64 },
    TimedOut { status: String },
}

impl HealthOutcome {
    pub fn into_result(self, timeout: Duration) -> DeployResult<()> {
        match self {
            HealthOutcome::Healthy => Ok(()),
            HealthOutcome::Exited { code } => Err(DeployError::ContainerExited { code }),
            HealthOutcome::TimedOut { status } => {
                Err(DeployError::HealthCheckTimeout { timeout, status })
            }
        }
    }
}

pub struct HealthChecker {
    engine: Arc<dyn ContainerEngine>,
    probe: Arc<dyn Probe>,
    config: HealthConfig,
}

impl HealthChecker {
    pub fn new(engine: Arc<dyn ContainerEngine>, probe: Arc<dyn Probe>, config: HealthConfig) -> Self {
        HealthChecker {
            engine,
            probe,
            config,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.config.timeout
    }

    /// A single probe, used to decide whether an existing container can be
    /// kept.
    pub async fn probe_once(&self, port: u16) -> bool {
        match self.probe.probe(port).await {
            Ok(()) => true,
            Err(e) => {
                debug!(port, error = %e, "probe failed");
                false
            }
        }
    }

    /// Polls `container` every interval until it serves 2xx on `host_port`,
    /// exits, or the timeout elapses.
    pub async fn check(&self, container: &str, host_port: u16) -> DeployResult<HealthOutcome> {
        let start = Instant::now();
        let mut last_status = ContainerStatus::Other("unknown".to_string());

        loop {
            let elapsed = start.elapsed();
            if elapsed >= self.config.timeout {
                info!(container, status = %last_status, "health check timed out");
                return Ok(HealthOutcome::TimedOut {
                    status: last_status.to_string(),
                });
            }
            sleep(self.config.interval.min(self.config.timeout - elapsed)).await;

            let info = self
                .engine
                .inspect_container(container)
                .await?
                .ok_or_else(|| {
                    DeployError::StartupFailure(format!("container {} disappeared", container))
                })?;
            last_status = info.status.clone();

            match info.status {
                ContainerStatus::Running => match self.probe.probe(host_port).await {
                    Ok(()) => {
                        info!(container, host_port, "container is healthy");
                        return Ok(HealthOutcome::Healthy);
                    }
                    Err(e) => {
                        debug!(container, host_port, error = %e, "service not ready, retrying");
                    }
                },
                ContainerStatus::Exited => {
                    let code = info.exit_code.unwrap_or(-1);
                    info!(container, code, "container exited during health check");
                    return Ok(HealthOutcome::Exited { code });
                }
                ref other => {
                    debug!(container, status = %other, "waiting for container");
                }
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::lib::docker::fake::FakeEngine;
    use crate::lib::docker::types::{Config, ContainerEngine};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays scripted probe answers; the last answer repeats.
    #[derive(Default)]
    pub struct ScriptedProbe {
        answers: Mutex<VecDeque<bool>>,
        pub calls: Mutex<Vec<Instant>>,
    }

    impl ScriptedProbe {
        pub fn new(answers: Vec<bool>) -> Self {
            ScriptedProbe {
                answers: Mutex::new(answers.into()),
                calls: Mutex::new(Vec::new()),
            }
        }

        pub fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Probe for ScriptedProbe {
        async fn probe(&self, _port: u16) -> Result<(), ProbeError> {
            self.calls.lock().unwrap().push(Instant::now());
            let mut answers = self.answers.lock().unwrap();
            let ok = if answers.len() > 1 {
                answers.pop_front().unwrap_or(false)
            } else {
                answers.front().copied().unwrap_or(false)
            };
            if ok { Ok(()) } else { Err(ProbeError::Status(503)) }
        }
    }

    fn config(interval: u64, timeout: u64) -> HealthConfig {
        HealthConfig {
            interval: Duration::from_secs(interval),
            timeout: Duration::from_secs(timeout),
            probe_timeout: Duration::from_secs(5),
        }
    }

    async fn started(engine: &FakeEngine, name: &str) {
        engine
            .run_container(&Config {
                name: name.to_string(),
                image: "img".to_string(),
                host_port: 9001,
                container_port: 8000,
                ..Default::default()
            })
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn second_probe_succeeds_within_three_ticks() {
        let engine = Arc::new(FakeEngine::new());
        engine.script_status("svc", vec![ContainerStatus::Running]);
        started(&engine, "svc").await;
        let probe = Arc::new(ScriptedProbe::new(vec![false, true]));

        let checker = HealthChecker::new(engine.clone(), probe.clone(), config(3, 20));
        let start = Instant::now();
        let outcome = checker.check("svc", 9001).await.unwrap();

        assert_eq!(outcome, HealthOutcome::Healthy);
        assert!(start.elapsed() <= Duration::from_secs(9));
        let calls = probe.calls.lock().unwrap().clone();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0] - start, Duration::from_secs(3));
        assert_eq!(calls[1] - start, Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn exited_container_short_circuits() {
        let engine = Arc::new(FakeEngine::new());
        engine.script_status("svc", vec![ContainerStatus::Created, ContainerStatus::Exited]);
        engine.exit_code("svc", 2);
        started(&engine, "svc").await;
        let probe = Arc::new(ScriptedProbe::new(vec![true]));

        let checker = HealthChecker::new(engine, probe.clone(), config(3, 20));
        let start = Instant::now();
        let outcome = checker.check("svc", 9001).await.unwrap();

        assert_eq!(outcome, HealthOutcome::Exited { code: 2 });
        assert_eq!(start.elapsed(), Duration::from_secs(6));
        assert_eq!(probe.call_count(), 0);
        let err = outcome.into_result(Duration::from_secs(20)).unwrap_err();
        assert!(err.to_string().contains("code 2"));
    }

    #[tokio::test(start_paused = true)]
    async fn never_ready_times_out_at_the_deadline() {
        let engine = Arc::new(FakeEngine::new());
        engine.script_status("svc", vec![ContainerStatus::Running]);
        started(&engine, "svc").await;
        let probe = Arc::new(ScriptedProbe::new(vec![false]));

        let checker = HealthChecker::new(engine, probe.clone(), config(3, 20));
        let start = Instant::now();
        let outcome = checker.check("svc", 9001).await.unwrap();

        assert_eq!(
            outcome,
            HealthOutcome::TimedOut {
                status: "running".to_string()
            }
        );
        assert_eq!(start.elapsed(), Duration::from_secs(20));
        // ticks at 3, 6, ..., 18 and a clamped one at 20
        assert_eq!(probe.call_count(), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn vanished_container_is_a_startup_failure() {
        let engine = Arc::new(FakeEngine::new());
        let probe = Arc::new(ScriptedProbe::new(vec![true]));
        let checker = HealthChecker::new(engine, probe, config(3, 20));

        let err = checker.check("ghost", 9001).await.unwrap_err();
        assert!(matches!(err, DeployError::StartupFailure(_)));
    }

    async fn serve(status: axum::http::StatusCode) -> u16 {
        let app = axum::Router::new().route("/", axum::routing::get(move || async move { status }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        port
    }

    #[tokio::test]
    async fn http_probe_accepts_2xx_only() {
        let probe = HttpProbe::new("127.0.0.1", Duration::from_secs(2)).unwrap();

        let ok = serve(axum::http::StatusCode::OK).await;
        probe.probe(ok).await.unwrap();

        let accepted = serve(axum::http::StatusCode::ACCEPTED).await;
        probe.probe(accepted).await.unwrap();

        let broken = serve(axum::http::StatusCode::INTERNAL_SERVER_ERROR).await;
        assert!(matches!(
            probe.probe(broken).await,
            Err(ProbeError::Status(500))
        ));
    }

    #[tokio::test]
    async fn http_probe_reports_refused_connections() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let probe = HttpProbe::new("127.0.0.1", Duration::from_secs(2)).unwrap();
        assert!(matches!(probe.probe(port).await, Err(ProbeError::Request(_))));
    }
}
