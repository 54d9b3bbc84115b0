use std::env;
use std::time::Duration;

use server::consumer::{self, ConsumerConfig};
use server::state::{AppState, Config};
use server::{db, redis_client};
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[tokio::main]
async fn main() {
    let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_owned());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(log_level))
        .init();

    let database_url = env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let redis_url = env::var("REDIS_URL").expect("REDIS_URL must be set");
    let bind_addr = env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_owned());
    let instance_id = env::var("INSTANCE_ID").unwrap_or_else(|_| Uuid::new_v4().to_string());

    let config = Config::from_env();

    info!("connecting to database...");
    let pool = db::create_pool(&database_url, config.db_pool_min, config.db_pool_max).await;
    db::run_migrations(&pool).await;
    info!("migrations applied");

    info!("connecting to redis...");
    let redis = redis_client::connect(&redis_url).await;

    let (shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel(1);

    let consumer_config = ConsumerConfig {
        partition_count: config.partition_count,
        batch_max: config.stream_batch_max,
        poll_interval: Duration::from_millis(config.stream_poll_interval_ms),
        retry_ceiling: config.stream_retry_ceiling,
        visibility_timeout_secs: config.stream_visibility_timeout_secs,
        replay_ttl_secs: config.replay_ttl_secs,
        replay_max_per_conversation: config.replay_max_per_conversation,
    };
    let consumer_handles = consumer::spawn_workers(
        pool.clone(),
        redis.clone(),
        instance_id.clone(),
        consumer_config,
        shutdown_rx,
    );
    info!(partitions = config.partition_count, "persistence consumer pool started");

    let state = AppState::new(pool, redis, redis_url, instance_id, config);
    let router = server::build_router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .expect("failed to bind");
    info!(addr = %bind_addr, "server listening");
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal(shutdown_tx))
        .await
        .expect("server error");

    for handle in consumer_handles {
        let _ = handle.await;
    }
    info!("server shut down gracefully");
}

/// Waits for SIGTERM or Ctrl-C (SIGINT), then signals every consumer worker
/// to stop pulling new batches before axum itself stops accepting connections.
async fn shutdown_signal(shutdown_tx: tokio::sync::broadcast::Sender<()>) {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => { info!("received Ctrl+C, shutting down"); },
        _ = terminate => { info!("received SIGTERM, shutting down"); },
    }
    let _ = shutdown_tx.send(());
}
