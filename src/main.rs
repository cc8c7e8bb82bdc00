use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use futures::FutureExt;
use tokio::net::TcpListener;
use tracing::info;

use sendit::config::Config;
use sendit::counters::{CounterStore, MemoryCounterStore, RedisCounterStore};
use sendit::db::{MemoryRecordIndex, PgRecordIndex, RecordIndex};
use sendit::notify::{LogNotifier, Notifier, SmtpNotifier};
use sendit::services::ExpiryReaper;
use sendit::storage::{BlobStore, MemoryBlobStore, S3BlobStore};
use sendit::utils::{init_logger, with_retry};
use sendit::{create_router, AppState, Backends};

const CONNECT_ATTEMPTS: u32 = 5;
const COUNTER_PURGE_INTERVAL: Duration = Duration::from_secs(600);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logger();

    // Load configuration
    let config = Config::from_env()?;
    info!("Configuration loaded: {:?}", config.server);

    let backends = connect_backends(&config).await?;
    info!(
        blobs = backends.blobs.backend_name(),
        records = backends.records.backend_name(),
        counters = backends.counters.backend_name(),
        notifier = backends.notifier.backend_name(),
        "Backends ready"
    );

    let reaper = Arc::new(ExpiryReaper::new(
        backends.blobs.clone(),
        backends.records.clone(),
        config.storage.timeout(),
    ));
    let reaper_handle = reaper.spawn(config.lifecycle.sweep_interval());

    let state = AppState::new(config.clone(), &backends);
    let app = create_router(state);

    let host: std::net::IpAddr = config
        .server
        .host
        .parse()
        .with_context(|| format!("HOST is not an IP address: {}", config.server.host))?;
    let addr = SocketAddr::from((host, config.server.port));
    info!("Server listening on {}", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| anyhow::anyhow!("Server error: {}", e))?;

    reaper_handle.shutdown().await;
    info!("Shutdown complete");
    Ok(())
}

async fn connect_backends(config: &Config) -> anyhow::Result<Backends> {
    let blobs: Arc<dyn BlobStore> = match config.storage.provider.as_str() {
        "memory" => Arc::new(MemoryBlobStore::new()),
        "s3" => Arc::new(S3BlobStore::new(&config.storage).context("Failed to configure S3 storage")?),
        other => anyhow::bail!("unknown STORAGE_PROVIDER: {}", other),
    };

    let records: Arc<dyn RecordIndex> = match config.database.provider.as_str() {
        "memory" => Arc::new(MemoryRecordIndex::new()),
        "postgres" => {
            let database = config.database.clone();
            let pool = with_retry(
                "postgres",
                move || {
                    let database = database.clone();
                    async move { sendit::db::create_pool(&database).await }.boxed()
                },
                CONNECT_ATTEMPTS,
            )
            .await
            .context("Failed to connect to Postgres")?;

            info!("Running database migrations...");
            sqlx::migrate!("./migrations")
                .run(&pool)
                .await
                .map_err(|e| anyhow::anyhow!("Failed to run migrations: {}", e))?;
            info!("Database migrations completed");

            Arc::new(PgRecordIndex::new(pool))
        }
        other => anyhow::bail!("unknown RECORD_INDEX: {}", other),
    };

    let counters: Arc<dyn CounterStore> = match config.redis.provider.as_str() {
        "memory" => {
            let store = Arc::new(MemoryCounterStore::new());
            spawn_counter_purge(store.clone());
            store
        }
        "redis" => {
            let url = config.redis.url.clone();
            let prefix = config.redis.key_prefix.clone();
            let store = with_retry(
                "redis",
                move || {
                    let url = url.clone();
                    let prefix = prefix.clone();
                    async move { RedisCounterStore::connect(&url, &prefix).await }.boxed()
                },
                CONNECT_ATTEMPTS,
            )
            .await
            .context("Failed to connect to Redis")?;
            Arc::new(store)
        }
        other => anyhow::bail!("unknown RATE_LIMIT_BACKEND: {}", other),
    };

    let notifier: Arc<dyn Notifier> = match config.email.provider.as_str() {
        "log" => Arc::new(LogNotifier),
        "smtp" => Arc::new(SmtpNotifier::new(&config.email).context("Failed to configure SMTP")?),
        other => anyhow::bail!("unknown EMAIL_PROVIDER: {}", other),
    };

    Ok(Backends {
        blobs,
        records,
        counters,
        notifier,
    })
}

/// Drop in-memory windows that already reset so idle clients do not pile up.
fn spawn_counter_purge(store: Arc<MemoryCounterStore>) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(COUNTER_PURGE_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            let purged = store.purge_expired().await;
            if purged > 0 {
                tracing::debug!(purged, "Purged expired rate limit windows");
            }
        }
    });
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}
