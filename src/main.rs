use std::sync::Arc;

use poem::{listener::TcpListener, Server};
use tracing::info;
use tracing_subscriber::EnvFilter;
use vangogh_relay::{build_app, AppState, Config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env is optional
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env()?;
    let bind_addr = config.bind_addr.clone();
    let state = AppState::from_config(config)?;

    info!(
        backend = state.generator.name(),
        sync_budget_secs = state.config.sync_budget.as_secs(),
        "starting relay on {}",
        bind_addr
    );

    Server::new(TcpListener::bind(bind_addr))
        .run(build_app(Arc::new(state)))
        .await?;

    Ok(())
}
