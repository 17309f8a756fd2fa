//! Application state wiring the engine together.
//!
//! Core services are generic over their ports; `AppState` pins them to the
//! SQLite repository, the filesystem result store and the registry-backed
//! plugin host.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;

use flowforge_core::plugin::{BoxPluginLoader, BoxPluginSource, PluginHost};
use flowforge_core::trigger::{HttpTriggerRegistry, TimeTriggerProcessor};
use flowforge_core::workflow::orchestrator::ExecutionOrchestrator;
use flowforge_core::workflow::queue::{ExecutionLauncher, ExecutionQueue, QueueReceiver};
use flowforge_core::workflow::service::WorkflowService;
use flowforge_infra::config::{plugins_dir, registry_token, results_dir};
use flowforge_infra::plugin::{RegistryPluginSource, RuntimePluginLoader};
use flowforge_infra::sqlite::{DatabasePool, SqliteWorkflowRepository};
use flowforge_infra::storage::LocalResultStorage;
use flowforge_types::config::EngineConfig;

pub type Repo = SqliteWorkflowRepository;
pub type Orchestrator = ExecutionOrchestrator<Repo, LocalResultStorage>;

/// Shared state for the HTTP handlers and the `serve` command.
#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<Repo>,
    pub workflows: Arc<WorkflowService<Repo>>,
    pub orchestrator: Arc<Orchestrator>,
    pub launcher: Arc<ExecutionLauncher<Repo>>,
    pub http_triggers: Arc<HttpTriggerRegistry<Repo>>,
    pub time_triggers: Arc<TimeTriggerProcessor<Repo>>,
    pub plugins: Arc<PluginHost>,
    pub data_dir: PathBuf,
}

impl AppState {
    /// Open the database under `data_dir` and wire every service.
    ///
    /// The queue's receiving half is returned separately; nothing runs
    /// until the caller spawns workers on it.
    pub async fn init(config: &EngineConfig, data_dir: PathBuf) -> anyhow::Result<(Self, QueueReceiver)> {
        tokio::fs::create_dir_all(&data_dir)
            .await
            .with_context(|| format!("failed to create data directory {}", data_dir.display()))?;

        let db_pool = DatabasePool::open_in(&data_dir)
            .await
            .context("failed to open database")?;
        let repo = Arc::new(SqliteWorkflowRepository::new(db_pool));

        let storage = Arc::new(LocalResultStorage::new(
            results_dir(config, &data_dir),
            config.results.max_size_bytes,
        ));

        let source = RegistryPluginSource::new(&config.plugins.registry_url, plugins_dir(config, &data_dir))
            .with_token(registry_token());
        let loader = RuntimePluginLoader::new(config.plugins.wasm_fuel).context("failed to start plugin runtimes")?;
        let plugins = Arc::new(PluginHost::new(
            BoxPluginSource::new(source),
            BoxPluginLoader::new(loader),
            Duration::from_secs(config.plugins.cache_ttl_secs),
        ));

        let orchestrator = Arc::new(ExecutionOrchestrator::new(
            Arc::clone(&repo),
            storage,
            Arc::clone(&plugins),
            &config.engine,
        ));

        let (queue, receiver) = ExecutionQueue::new(config.queue.capacity);
        let launcher = Arc::new(ExecutionLauncher::new(Arc::clone(&repo), queue));
        let http_triggers = Arc::new(HttpTriggerRegistry::new(Arc::clone(&launcher)));
        let workflows = Arc::new(
            WorkflowService::new(Arc::clone(&repo)).with_http_registry(Arc::clone(&http_triggers)),
        );
        let time_triggers = Arc::new(TimeTriggerProcessor::new(
            Arc::clone(&repo),
            Arc::clone(&launcher),
            Duration::from_secs(config.triggers.poll_interval_secs.max(1)),
        ));

        Ok((
            Self {
                repo,
                workflows,
                orchestrator,
                launcher,
                http_triggers,
                time_triggers,
                plugins,
                data_dir,
            },
            receiver,
        ))
    }
}
