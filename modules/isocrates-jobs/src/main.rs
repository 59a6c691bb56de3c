use std::time::Duration;

use anyhow::Result;
use isocrates_common::Config;
use isocrates_jobs::{worker, JobQueue};
use sqlx::postgres::PgPoolOptions;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("isocrates=info".parse()?))
        .init();

    info!("isocrates worker starting...");
    let config = Config::worker_from_env()?;
    config.log_redacted();

    let pool = PgPoolOptions::new().max_connections(5).connect(&config.database_url).await?;
    let queue = JobQueue::new(pool);

    worker::run(queue, Duration::from_secs(config.worker_poll_interval_secs)).await;
}
