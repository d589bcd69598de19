use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::domain::ItemId;

/// Persistence failure from an outer discovery cache. Discovery logs and ignores these.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("discovery store backend error: {0}")]
    Backend(String),
    #[error("discovery store entry is corrupt: {0}")]
    Corrupt(String),
}

/// Outer cache of whole discovery id lists, keyed by request fingerprint.
pub trait DiscoveryStore: Send + Sync {
    fn get_cached_discovery<'a>(
        &'a self,
        fingerprint: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Vec<ItemId>>, StoreError>> + Send + 'a>>;

    fn put_cached_discovery<'a>(
        &'a self,
        fingerprint: &'a str,
        ids: &'a [ItemId],
    ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + 'a>>;
}

/// Process-local store with a fixed TTL.
#[derive(Debug)]
pub struct InMemoryDiscoveryStore {
    ttl: Duration,
    entries: RwLock<HashMap<String, (Instant, Vec<ItemId>)>>,
}

impl InMemoryDiscoveryStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

impl Default for InMemoryDiscoveryStore {
    fn default() -> Self {
        Self::new(Duration::from_secs(2 * 60 * 60))
    }
}

impl DiscoveryStore for InMemoryDiscoveryStore {
    fn get_cached_discovery<'a>(
        &'a self,
        fingerprint: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Vec<ItemId>>, StoreError>> + Send + 'a>> {
        Box::pin(async move {
            let entries = self.entries.read().await;
            Ok(entries
                .get(fingerprint)
                .filter(|(stored_at, _)| stored_at.elapsed() < self.ttl)
                .map(|(_, ids)| ids.clone()))
        })
    }

    fn put_cached_discovery<'a>(
        &'a self,
        fingerprint: &'a str,
        ids: &'a [ItemId],
    ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + 'a>> {
        Box::pin(async move {
            let mut entries = self.entries.write().await;
            let now = Instant::now();
            entries.retain(|_, (stored_at, _)| now.duration_since(*stored_at) < self.ttl);
            entries.insert(fingerprint.to_owned(), (now, ids.to_vec()));
            Ok(())
        })
    }
}
