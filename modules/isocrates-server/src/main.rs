use std::sync::Arc;

use anyhow::Result;
use isocrates_common::Config;
use isocrates_jobs::JobQueue;
use isocrates_server::{build_router, AppState};
use isocrates_store::ContentStore;
use sqlx::postgres::PgPoolOptions;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("isocrates=info".parse()?))
        .init();

    let config = Config::server_from_env()?;
    config.log_redacted();

    let pool = PgPoolOptions::new().max_connections(10).connect(&config.database_url).await?;
    let store = ContentStore::new(pool.clone());
    let queue = JobQueue::new(pool);

    let addr = format!("{}:{}", config.web_host, config.web_port);
    let state = Arc::new(AppState { store, queue, config });
    let app = build_router(state);

    info!("isocrates server listening on {addr}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
