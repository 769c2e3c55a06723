//! An in-memory implementation of `SessionStore`.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use tower_sessions::{
    session::{Id, Record},
    session_store, SessionStore,
};

/// An ephemeral session store, holding every session in process memory.
///
/// Nothing survives a restart and nothing is shared between processes. Clones
/// share the same map, so a single store can be handed to the session layer
/// and to [`routes::router`](crate::routes::router).
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<HashMap<Id, Record>>>,
}

impl MemoryStore {
    /// Creates a new, empty memory store.
    ///
    /// ```rust
    /// use axum_keycloak::memory_store::MemoryStore;
    ///
    /// let memory_store = MemoryStore::new();
    /// ```
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records currently held, expired or not.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    /// Returns `true` if no records are held.
    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.is_empty()
    }
}

fn is_active(expiry_date: OffsetDateTime) -> bool {
    expiry_date > OffsetDateTime::now_utc()
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn create(&self, record: &mut Record) -> session_store::Result<()> {
        let mut store = self.inner.lock().await;
        while store.contains_key(&record.id) {
            record.id = Id::default();
        }
        store.insert(record.id, record.clone());

        Ok(())
    }

    async fn save(&self, record: &Record) -> session_store::Result<()> {
        self.inner.lock().await.insert(record.id, record.clone());

        Ok(())
    }

    async fn load(&self, session_id: &Id) -> session_store::Result<Option<Record>> {
        let mut store = self.inner.lock().await;

        match store.get(session_id) {
            Some(record) if is_active(record.expiry_date) => Ok(Some(record.clone())),
            Some(_) => {
                tracing::debug!("evicting expired session");
                store.remove(session_id);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn delete(&self, session_id: &Id) -> session_store::Result<()> {
        self.inner.lock().await.remove(session_id);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use time::Duration;

    use super::*;

    fn record(expiry_date: OffsetDateTime) -> Record {
        Record {
            id: Id::default(),
            data: HashMap::new(),
            expiry_date,
        }
    }

    #[tokio::test]
    async fn round_trip() {
        let store = MemoryStore::new();
        let mut record = record(OffsetDateTime::now_utc() + Duration::hours(1));
        store.create(&mut record).await.unwrap();

        let loaded = store.load(&record.id).await.unwrap();
        assert_eq!(loaded.map(|r| r.id), Some(record.id));

        store.delete(&record.id).await.unwrap();
        assert!(store.load(&record.id).await.unwrap().is_none());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn create_avoids_collisions() {
        let store = MemoryStore::new();
        let mut first = record(OffsetDateTime::now_utc() + Duration::hours(1));
        store.create(&mut first).await.unwrap();

        let mut second = record(OffsetDateTime::now_utc() + Duration::hours(1));
        second.id = first.id;
        store.create(&mut second).await.unwrap();

        assert_ne!(first.id, second.id);
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn expired_records_are_evicted_on_load() {
        let store = MemoryStore::new();
        let mut record = record(OffsetDateTime::now_utc() - Duration::seconds(1));
        store.create(&mut record).await.unwrap();
        assert_eq!(store.len().await, 1);

        assert!(store.load(&record.id).await.unwrap().is_none());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn deleting_unknown_id_is_not_an_error() {
        let store = MemoryStore::new();
        assert!(store.delete(&Id::default()).await.is_ok());
    }
}
