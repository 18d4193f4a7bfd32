use anyhow::{Context, Result};
use relay_core::config::Settings;
use relay_core::types::FanoutJob;
use relay_core::{Broadcaster, HttpPushTransport, SignedTokenProvider, FANOUT_QUEUE};
use relay_db::PgStore;
use relay_queue::layers::RetryLayer;
use relay_queue::postgres::PostgresStorage;
use relay_queue::prelude::{Monitor, WorkerBuilder};
use std::sync::Arc;
use tracing::info;

mod hooks;
mod jobs;

#[derive(Clone)]
pub struct WorkerState {
    pub broadcaster: Broadcaster,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .json()
        .init();

    let settings = Settings::from_env().context("invalid worker configuration")?;

    let db = relay_db::connect(&settings.database_url)
        .await
        .context("failed to connect to database")?;

    let storage = PostgresStorage::<FanoutJob>::from_pool(db.clone());
    storage.setup().await?;

    let transport = HttpPushTransport::new(&settings.push_url, settings.push_timeout())?;

    let broadcaster = Broadcaster::new(
        Arc::new(PgStore::new(db)),
        Arc::new(SignedTokenProvider::new(settings.token_secret.clone())),
        Arc::new(transport),
        Arc::new(storage.clone()),
    )
    .with_hooks(hooks::registry())
    .with_defaults(settings.channel_defaults());

    let state = WorkerState { broadcaster };

    let handler_state = state.clone();
    let worker = WorkerBuilder::new(FANOUT_QUEUE)
        .backend(storage)
        .layer(RetryLayer::new(jobs::fanout::retry_policy))
        .concurrency(settings.worker_concurrency)
        .build_fn(move |job: FanoutJob| {
            let state = handler_state.clone();
            async move { jobs::fanout::handle_fanout_job(&state, job).await }
        })?;

    info!(
        env = %settings.relay_env,
        concurrency = settings.worker_concurrency,
        "worker starting"
    );

    Monitor::new().register(worker).run().await?;

    Ok(())
}
