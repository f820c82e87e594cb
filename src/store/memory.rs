use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::TrialStore;
use crate::error::{ThrottlerError, ThrottlerResult};

/// Process-local store. Contents are lost on restart.
#[derive(Clone)]
pub struct MemoryStore<T> {
    records: Arc<Mutex<HashMap<String, T>>>,
}

impl<T> MemoryStore<T> {
    pub fn new() -> Self {
        Self {
            records: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Number of identities currently tracked.
    pub fn len(&self) -> ThrottlerResult<usize> {
        let records = self
            .records
            .lock()
            .map_err(|_| ThrottlerError::Internal("Failed to acquire lock on records".to_string()))?;
        Ok(records.len())
    }

    pub fn is_empty(&self) -> ThrottlerResult<bool> {
        Ok(self.len()? == 0)
    }
}

impl<T> Default for MemoryStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T> TrialStore<T> for MemoryStore<T>
where
    T: Clone + Send + Sync + 'static,
{
    async fn get(&self, key: &str) -> ThrottlerResult<Option<T>> {
        let records = self
            .records
            .lock()
            .map_err(|_| ThrottlerError::Internal("Failed to acquire lock on records".to_string()))?;
        Ok(records.get(key).cloned())
    }

    async fn set(&self, key: &str, record: &T) -> ThrottlerResult<()> {
        let mut records = self
            .records
            .lock()
            .map_err(|_| ThrottlerError::Internal("Failed to acquire lock on records".to_string()))?;
        records.insert(key.to_string(), record.clone());
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{IdentityKind, TrialRecord};
    use chrono::Utc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_missing_key_is_not_an_error() {
        let store: MemoryStore<TrialRecord> = MemoryStore::new();
        assert_eq!(store.get("10.0.0.1").await.unwrap(), None);
        assert!(store.is_empty().unwrap());
    }

    #[tokio::test]
    async fn test_set_overwrites() {
        let store = MemoryStore::<TrialRecord>::new();
        let mut record = TrialRecord::new(IdentityKind::Ip, Utc::now(), Duration::from_secs(10));
        store.set("10.0.0.1", &record).await.unwrap();

        record.tries = 3;
        store.set("10.0.0.1", &record).await.unwrap();

        let stored = store.get("10.0.0.1").await.unwrap().unwrap();
        assert_eq!(stored.tries, 3);
        assert_eq!(store.len().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_returned_records_are_copies() {
        let store = MemoryStore::<TrialRecord>::new();
        let record = TrialRecord::new(IdentityKind::Jwt, Utc::now(), Duration::from_secs(10));
        store.set("subject", &record).await.unwrap();

        let mut copy = store.get("subject").await.unwrap().unwrap();
        copy.tries = 99;

        assert_eq!(store.get("subject").await.unwrap().unwrap().tries, 0);
    }
}
