use std::time::Duration;

use shared_types::AgentLocator;

use crate::executor::DEFAULT_TURN_TIMEOUT;
use crate::limiter::DEFAULT_MAX_CONCURRENCY;
use crate::orchestrator::DEFAULT_FAILED_RETENTION;

#[derive(Debug, Clone)]
pub struct Config {
    /// Port the simulator listens on
    pub port: u16,
    /// SQLite database holding job rows and conversation records
    pub database_url: String,
    /// Ceiling on conversations replayed at once
    pub max_concurrency: usize,
    /// Per-call timeout for one turn against the agent
    pub turn_timeout: Duration,
    /// How long a job that could not be finalized stays in the live mirror
    pub failed_retention: Duration,
    /// Base URL of the agent platform's REST API
    pub agent_api_base_url: String,
    /// Bearer token for the agent platform, if it needs one
    pub agent_access_token: Option<String>,
    /// Agent used when a job does not name one.
    pub default_agent: AgentLocator,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let max_concurrency: usize =
            env_parse("SIMULATOR_MAX_CONCURRENCY", DEFAULT_MAX_CONCURRENCY)?;

        Ok(Self {
            port: env_parse("SIMULATOR_PORT", 8090)?,
            database_url: env_str("SIMULATOR_DATABASE_URL", "sqlite:./data/simulator.db"),
            max_concurrency: max_concurrency.max(1),
            turn_timeout: Duration::from_secs(env_parse(
                "SIMULATOR_TURN_TIMEOUT_SECS",
                DEFAULT_TURN_TIMEOUT.as_secs(),
            )?),
            failed_retention: Duration::from_secs(env_parse(
                "SIMULATOR_FAILED_RETENTION_SECS",
                DEFAULT_FAILED_RETENTION.as_secs(),
            )?),
            agent_api_base_url: env_str("AGENT_API_BASE_URL", "https://dialogflow.googleapis.com"),
            agent_access_token: std::env::var("AGENT_ACCESS_TOKEN")
                .ok()
                .filter(|v| !v.trim().is_empty()),
            default_agent: AgentLocator {
                project_id: env_str("AGENT_PROJECT_ID", ""),
                location: env_str("AGENT_LOCATION", "global"),
                agent_id: env_str("AGENT_ID", ""),
                language_code: env_str("AGENT_LANGUAGE_CODE", "en"),
            },
        })
    }
}

fn env_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> anyhow::Result<T>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(val) => val
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("Failed to parse env var {key}={val}: {e}")),
        Err(_) => Ok(default),
    }
}
