mod config;
mod metrics;
mod routes;

use anyhow::{Context, Result};
use config::AppConfig;
use eval::EvaluatedAgent;
use metrics::Metrics;
use routes::AppState;
use std::sync::Arc;
use std::time::Duration;
use store::EvaluationStore;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::from_env()?;
    init_tracing();

    let agent_config = &config.agent;
    let store = Arc::new(
        EvaluationStore::open(&agent_config.database_path)
            .with_context(|| format!("Failed to open evaluation store at {}", agent_config.database_path))?,
    );

    let agent = Arc::new(EvaluatedAgent::connect(
        &agent_config.sources,
        &agent_config.ollama,
        &agent_config.retry,
        agent_config.eval.clone(),
        store.clone(),
    )?);

    let state = Arc::new(AppState {
        agent: agent.clone(),
        metrics: Metrics::new(),
        model: agent_config.ollama.model.clone(),
    });
    let app = routes::router(state);

    let listener = tokio::net::TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.listen_addr))?;
    info!(addr = %config.listen_addr, environment = %agent_config.eval.environment, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let grace = Duration::from_secs(config.shutdown_grace_secs);
    if !agent.drain(grace).await {
        warn!("Closing store before every evaluation finished");
    }
    store.close()?;
    Ok(())
}

/// `RUST_LOG` filters; `LOG_FORMAT=json` switches to structured output.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));
    let json = std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json"));
    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}
