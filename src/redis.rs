use redis::aio::ConnectionManager;
use redis::Client;

pub type RedisPool = ConnectionManager;

/// Connect to Redis when a URL is configured; session stores fall back to
/// the in-memory backend otherwise.
pub async fn connect(redis_url: &str) -> RedisPool {
    let client = Client::open(redis_url).expect("Invalid Redis URL");
    ConnectionManager::new(client)
        .await
        .expect("Failed to connect to Redis")
}
