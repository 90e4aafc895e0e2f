use std::sync::Arc;

use crate::config::Config;
use crate::db;
use crate::executor::{HttpAgentClient, TurnExecutor};
use crate::job_store::{JobStore, SqliteJobStore};
use crate::limiter::ConcurrencyLimiter;
use crate::orchestrator::SimulationOrchestrator;

#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    orchestrator: SimulationOrchestrator,
}

impl AppState {
    pub fn new(orchestrator: SimulationOrchestrator) -> Self {
        Self {
            inner: Arc::new(AppStateInner { orchestrator }),
        }
    }

    /// Wire the production stack: SQLite store, HTTP agent client, limiter.
    ///
    /// Jobs left unfinished by a previous process are failed before the
    /// state is handed out.
    pub async fn from_config(config: &Config) -> anyhow::Result<Self> {
        let pool = db::connect(&config.database_url).await?;
        let durable = SqliteJobStore::new(pool);
        durable.migrate().await?;

        let store = JobStore::new(Arc::new(durable));
        store.recover_interrupted().await?;

        let http = reqwest::Client::builder()
            .timeout(config.turn_timeout)
            .build()?;
        let client = HttpAgentClient::new(http, config.agent_api_base_url.clone())
            .with_access_token(config.agent_access_token.clone());
        let executor = TurnExecutor::new(Arc::new(client), config.turn_timeout);

        let orchestrator = SimulationOrchestrator::new(
            store,
            executor,
            ConcurrencyLimiter::new(config.max_concurrency),
            config.default_agent.clone(),
        )
        .with_failed_retention(config.failed_retention);
        Ok(Self::new(orchestrator))
    }

    pub fn orchestrator(&self) -> &SimulationOrchestrator {
        &self.inner.orchestrator
    }

    pub fn store(&self) -> &JobStore {
        self.inner.orchestrator.store()
    }
}
