use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;

use super::TrialStore;
use crate::error::{ThrottlerError, ThrottlerResult};

pub const DEFAULT_KEY_PREFIX: &str = "trial";

/// Remote key/value store. Records are JSON strings under `<prefix>:<identity>`
/// with no expiry.
pub struct RedisStore<T> {
    connection: ConnectionManager,
    prefix: String,
    _record: PhantomData<fn() -> T>,
}

impl<T> Clone for RedisStore<T> {
    fn clone(&self) -> Self {
        Self {
            connection: self.connection.clone(),
            prefix: self.prefix.clone(),
            _record: PhantomData,
        }
    }
}

impl<T> RedisStore<T> {
    pub async fn connect(redis_url: &str, prefix: &str) -> ThrottlerResult<Self> {
        let client = Client::open(redis_url)
            .map_err(|e| ThrottlerError::Redis(format!("Failed to create Redis client: {}", e)))?;

        let connection = ConnectionManager::new(client)
            .await
            .map_err(|e| ThrottlerError::Redis(format!("Failed to connect to Redis: {}", e)))?;

        tracing::info!(prefix = %prefix, "connected to redis");
        Ok(Self::from_connection(connection, prefix))
    }

    pub fn from_connection(connection: ConnectionManager, prefix: &str) -> Self {
        Self {
            connection,
            prefix: prefix.to_string(),
            _record: PhantomData,
        }
    }

    fn redis_key(&self, key: &str) -> String {
        format!("{}:{}", self.prefix, key)
    }
}

// A nil reply is an unknown identity, not an error.
fn decode_value<T: DeserializeOwned>(value: Option<String>) -> ThrottlerResult<Option<T>> {
    value
        .map(|raw| serde_json::from_str(&raw).map_err(ThrottlerError::from))
        .transpose()
}

#[async_trait]
impl<T> TrialStore<T> for RedisStore<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    async fn get(&self, key: &str) -> ThrottlerResult<Option<T>> {
        let mut conn = self.connection.clone();
        let value: Option<String> = redis::cmd("GET")
            .arg(self.redis_key(key))
            .query_async::<_, Option<String>>(&mut conn)
            .await
            .map_err(|e| ThrottlerError::Redis(format!("GET failed: {}", e)))?;

        decode_value(value)
    }

    async fn set(&self, key: &str, record: &T) -> ThrottlerResult<()> {
        let payload = serde_json::to_string(record)?;
        let mut conn = self.connection.clone();
        redis::cmd("SET")
            .arg(self.redis_key(key))
            .arg(payload)
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| ThrottlerError::Redis(format!("SET failed: {}", e)))
    }

    async fn ping(&self) -> ThrottlerResult<()> {
        let mut conn = self.connection.clone();
        redis::cmd("PING")
            .query_async::<_, String>(&mut conn)
            .await
            .map(|_| ())
            .map_err(|e| ThrottlerError::Redis(format!("Ping failed: {}", e)))
    }

    fn backend(&self) -> &'static str {
        "redis"
    }
}
