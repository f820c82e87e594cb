//! Persistence backends for trial records.
//!
//! Every backend exposes the same contract: `get` answers `None` for an
//! unknown key and reserves `Err` for transport or storage failures, `set`
//! overwrites unconditionally. Expiry is owned by the records themselves, so
//! no backend applies its own TTL.

pub mod memory;
pub mod redis;
pub mod sql;

use async_trait::async_trait;

use crate::error::ThrottlerResult;

pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;
pub use self::sql::{SqlRecord, SqlStore};

/// Key/value contract over records of type `T`.
#[async_trait]
pub trait TrialStore<T>: Send + Sync
where
    T: Send + Sync + 'static,
{
    /// Fetch the record stored under `key`, if any.
    async fn get(&self, key: &str) -> ThrottlerResult<Option<T>>;

    /// Store `record` under `key`, replacing whatever was there.
    async fn set(&self, key: &str, record: &T) -> ThrottlerResult<()>;

    /// Check that the backend is reachable.
    async fn ping(&self) -> ThrottlerResult<()> {
        Ok(())
    }

    /// Short backend name for logs and health output.
    fn backend(&self) -> &'static str;
}
