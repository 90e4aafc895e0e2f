use simulator::api;
use simulator::app_state::AppState;
use simulator::config::Config;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "simulator=debug,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    info!(
        port = config.port,
        max_concurrency = config.max_concurrency,
        turn_timeout_secs = config.turn_timeout.as_secs(),
        "simulator starting"
    );
    if config.default_agent.project_id.is_empty() || config.default_agent.agent_id.is_empty() {
        tracing::warn!("AGENT_PROJECT_ID / AGENT_ID unset; jobs must name their agent");
    }

    let state = AppState::from_config(&config).await?;

    let app = api::router()
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = format!("0.0.0.0:{}", config.port);
    info!("listening on {addr}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
