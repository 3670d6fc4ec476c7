use anyhow::{bail, Context, Result};
use rollcall_api::ApiClient;
use rollcall_store::OfflineQueue;
use rollcall_sync::{Connectivity, SyncEngine};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

mod config;
mod engine;
mod extern_provider;
mod session;

use config::Config;
use extern_provider::{ExternalEmbeddingProvider, ExternalFrameSource};
use session::{SessionController, TickOutcome};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = Config::load().context("loading configuration")?;
    if config.class_id.is_empty() {
        bail!("no class configured; set class_id in the config file or ROLLCALL_CLASS_ID");
    }

    tracing::info!(
        server_url = %config.server_url,
        class_id = %config.class_id,
        db_path = %config.db_path.display(),
        "rollcalld starting"
    );

    let queue = OfflineQueue::open(&config.db_path)
        .await
        .context("opening offline queue")?;
    let api = Arc::new(
        ApiClient::new(
            &config.server_url,
            Duration::from_secs(config.request_timeout_secs),
            config.auth_token.clone(),
        )
        .context("building API client")?,
    );
    let connectivity = Arc::new(Connectivity::new(true));

    let sync_engine = Arc::new(SyncEngine::new(
        queue.clone(),
        api.clone(),
        connectivity.clone(),
        Duration::from_secs(config.sync_interval_secs),
        chrono::Duration::days(config.retention_days),
    ));
    let sync_task = tokio::spawn(sync_engine.clone().run());

    let engine = engine::spawn_engine(
        ExternalFrameSource::new(config.provider.capture_cmd.clone()),
        ExternalEmbeddingProvider::new(config.provider.extract_cmd.clone()),
    );
    let controller = SessionController::new(
        engine,
        api,
        queue,
        connectivity,
        config.match_threshold,
    );

    let info = controller
        .start(&config.class_id)
        .await
        .context("starting attendance session")?;
    tracing::info!(session_id = %info.session_id, date = %info.date, "capture loop running");

    let mut ticker = tokio::time::interval(Duration::from_secs(config.capture_interval_secs));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let TickOutcome::Marked { student_id, delivery } = controller.tick().await {
                    tracing::info!(student_id, delivery = ?delivery, "attendance marked");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutdown requested");
                break;
            }
        }
    }

    let summary = controller.end().await.context("ending session")?;
    tracing::info!(
        session_id = %summary.session_id,
        marked = summary.marked,
        "session closed"
    );

    // Flush anything that queued during the session before exiting.
    let report = sync_engine.drain().await;
    if report.failed > 0 {
        tracing::warn!(
            failed = report.failed,
            "marks still pending; they will sync on next start"
        );
    }
    sync_task.abort();

    tracing::info!("rollcalld stopped");
    Ok(())
}
