use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::lib::config::AppConfig;
use crate::lib::deploy::deployer::Deployer;
use crate::lib::deploy::health::HttpProbe;
use crate::lib::deploy::report::ResultRecorder;
use crate::lib::docker::types::{ContainerEngine, DockerClient};
use crate::lib::tasks::catalog::{TaskCatalog, read_index};
use crate::lib::tasks::store::TaskStore;
use crate::lib::tasks::types::{Layout, Naming};
use crate::lib::worker::engine::CommandEngine;
use crate::lib::worker::prepare::prepare_batch;
use crate::lib::worker::worker::WorkerPool;

mod lib {
    pub mod config;
    pub mod deploy;
    pub mod docker;
    pub mod tasks;
    pub mod worker;
}

#[derive(Parser)]
#[command(name = "r_deploy")]
#[command(about = "Generate and deploy web apps from an articles batch")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build, start and health-check one container per generated task
    Deploy {
        /// Batch directory holding articles/, workspace/ and logs/
        base_dir: PathBuf,

        /// JSON index of the batch's articles
        articles: PathBuf,

        #[arg(long)]
        base_url: Option<String>,

        #[arg(long)]
        port_start: Option<u16>,

        #[arg(long)]
        container_port: Option<u16>,

        /// Tasks deployed at the same time
        #[arg(long)]
        concurrency: Option<usize>,

        #[arg(long)]
        config: Option<PathBuf>,

        #[arg(long)]
        debug: bool,
    },

    /// Run the generation engine over every task of the batch
    Run {
        base_dir: PathBuf,

        articles: PathBuf,

        /// Prompt template containing `{{content_source}}`
        #[arg(long)]
        prompt: PathBuf,

        #[arg(long)]
        workers: Option<usize>,

        #[arg(long)]
        config: Option<PathBuf>,

        #[arg(long)]
        debug: bool,
    },
}

fn init_tracing(debug: bool) {
    let fallback = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn load_config(path: Option<&Path>) -> anyhow::Result<AppConfig> {
    AppConfig::load(path).context("failed to load configuration")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Deploy {
            base_dir,
            articles,
            base_url,
            port_start,
            container_port,
            concurrency,
            config,
            debug,
        } => {
            init_tracing(debug);
            let mut config = load_config(config.as_deref())?;
            if let Some(base_url) = base_url {
                config.deploy.base_url = base_url;
            }
            if let Some(port) = port_start {
                config.deploy.port_start = port;
            }
            if let Some(port) = container_port {
                config.deploy.container_port = port;
            }
            if let Some(n) = concurrency {
                config.deploy.concurrency = n;
            }
            config.validate()?;
            deploy(base_dir, &articles, config).await
        }
        Commands::Run {
            base_dir,
            articles,
            prompt,
            workers,
            config,
            debug,
        } => {
            init_tracing(debug);
            let mut config = load_config(config.as_deref())?;
            if let Some(n) = workers {
                config.pool.workers = n;
            }
            config.validate()?;
            run(base_dir, &articles, &prompt, config).await
        }
    }
}

async fn deploy(base_dir: PathBuf, articles: &Path, config: AppConfig) -> anyhow::Result<()> {
    let naming = Naming::from_base_dir(&base_dir);
    let layout = Layout::new(base_dir);
    let store = TaskStore::new(layout.clone());

    let catalog = TaskCatalog::load(&store, articles)
        .await
        .with_context(|| format!("failed to load articles index {}", articles.display()))?;

    let docker: Arc<dyn ContainerEngine> = Arc::new(
        DockerClient::connect()
            .await
            .context("failed to connect to the container engine")?,
    );
    let probe = Arc::new(
        HttpProbe::new(&config.deploy.probe_host, config.health.probe_timeout)
            .context("failed to build the health probe client")?,
    );

    let mut recorder = ResultRecorder::create(&layout.report_path())
        .context("failed to create the deployment report")?;
    let deployer = Deployer::new(docker, probe, layout, naming, config.deploy, config.health);

    deployer.deploy_batch(&catalog, &mut recorder).await?;
    let summary = recorder.finish()?;
    info!(
        total = summary.total,
        deployed = summary.deployed,
        failed = summary.failed,
        "deployment batch finished"
    );
    Ok(())
}

async fn run(
    base_dir: PathBuf,
    articles: &Path,
    prompt: &Path,
    config: AppConfig,
) -> anyhow::Result<()> {
    let template = tokio::fs::read_to_string(prompt)
        .await
        .with_context(|| format!("failed to read prompt template {}", prompt.display()))?;
    let index = read_index(articles)
        .await
        .with_context(|| format!("failed to load articles index {}", articles.display()))?;

    let store = TaskStore::new(Layout::new(base_dir));
    let queue = prepare_batch(&store, index, &template).await?;

    // runtime cleanup needs the container engine, generation itself does not
    let docker: Option<Arc<dyn ContainerEngine>> = match DockerClient::connect().await {
        Ok(client) => Some(Arc::new(client) as Arc<dyn ContainerEngine>),
        Err(e) => {
            warn!(error = %e, "container engine unavailable, session cleanup disabled");
            None
        }
    };
    let engine = Arc::new(CommandEngine::new(config.engine, docker));

    let summary = WorkerPool::new(config.pool, store, engine).run(queue).await;
    info!(
        queued = summary.queued,
        done = summary.done,
        failed = summary.failed,
        skipped = summary.skipped,
        "generation batch finished"
    );
    Ok(())
}
