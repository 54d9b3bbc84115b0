use redis::aio::ConnectionManager;

/// A cloneable, auto-reconnecting connection to the fleet-shared store backing
/// C1 (idempotency), C2 (stream), C4 (presence), C5 (fan-out), and C6 (replay).
pub async fn connect(redis_url: &str) -> ConnectionManager {
    let client = redis::Client::open(redis_url).expect("invalid REDIS_URL");
    client
        .get_connection_manager()
        .await
        .expect("failed to connect to Redis")
}
