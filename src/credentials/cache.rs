//! TTL cache over the active-credential lookup.
//!
//! The pipeline asks for the active credential on every message; this cache
//! keeps that from turning into a database read per message. Entries expire
//! after a short TTL so operator changes are picked up quickly, and every
//! activation path invalidates explicitly so the next read is fresh.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::DatabaseError;
use crate::store::{Credential, CredentialStore};

/// Where the cache reads the active credential from.
#[async_trait]
pub trait CredentialSource: Send + Sync {
    async fn active_credential(&self) -> Result<Credential, DatabaseError>;
}

#[async_trait]
impl CredentialSource for CredentialStore {
    async fn active_credential(&self) -> Result<Credential, DatabaseError> {
        self.get_active().await
    }
}

struct CachedEntry {
    credential: Credential,
    fetched_at: Instant,
}

/// Shared, TTL-bounded view of the active credential.
pub struct ActiveCredentialCache {
    source: Arc<dyn CredentialSource>,
    ttl: Duration,
    inner: RwLock<Option<CachedEntry>>,
}

impl ActiveCredentialCache {
    pub fn new(source: Arc<dyn CredentialSource>, ttl: Duration) -> Self {
        Self {
            source,
            ttl,
            inner: RwLock::new(None),
        }
    }

    /// The active credential, served from cache while fresh.
    ///
    /// Double-checked: the read lock handles the hot path; on a miss the
    /// write lock re-checks before hitting the database so concurrent
    /// misses collapse into one query.
    pub async fn get(&self) -> Result<Credential, DatabaseError> {
        {
            let guard = self.inner.read().await;
            if let Some(entry) = guard.as_ref() {
                if entry.fetched_at.elapsed() < self.ttl {
                    return Ok(entry.credential.clone());
                }
            }
        }

        let mut guard = self.inner.write().await;
        if let Some(entry) = guard.as_ref() {
            if entry.fetched_at.elapsed() < self.ttl {
                return Ok(entry.credential.clone());
            }
        }

        let credential = self.source.active_credential().await?;
        debug!(
            credential_id = credential.id,
            provider = %credential.provider_name,
            "Active credential cache refreshed"
        );
        *guard = Some(CachedEntry {
            credential: credential.clone(),
            fetched_at: Instant::now(),
        });
        Ok(credential)
    }

    /// Drop the cached entry so the next `get` reads the database.
    pub async fn invalidate(&self) {
        let mut guard = self.inner.write().await;
        *guard = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Database;

    async fn seeded() -> (Arc<CredentialStore>, i64, i64) {
        let db = Arc::new(Database::open_in_memory().await.unwrap());
        let store = Arc::new(CredentialStore::new(db));
        let p = store.add_provider("gemini", "Google Gemini", "", 10).await.unwrap();
        let m = store.add_model(p, "gemini-2.0-flash", "Gemini 2.0 Flash", 8192, true).await.unwrap();
        let c1 = store.add_credential(p, m, "key-1", "first").await.unwrap();
        let c2 = store.add_credential(p, m, "key-2", "second").await.unwrap();
        (store, c1, c2)
    }

    #[tokio::test]
    async fn serves_stale_entry_until_invalidated() {
        let (store, c1, c2) = seeded().await;
        store.activate(c1).await.unwrap();

        let cache = ActiveCredentialCache::new(store.clone(), Duration::from_secs(60));
        assert_eq!(cache.get().await.unwrap().id, c1);

        // Activation behind the cache's back: still serves the cached row
        store.activate(c2).await.unwrap();
        assert_eq!(cache.get().await.unwrap().id, c1);

        cache.invalidate().await;
        assert_eq!(cache.get().await.unwrap().id, c2);
    }

    #[tokio::test]
    async fn expired_entry_is_refetched() {
        let (store, c1, c2) = seeded().await;
        store.activate(c1).await.unwrap();

        let cache = ActiveCredentialCache::new(store.clone(), Duration::from_millis(20));
        assert_eq!(cache.get().await.unwrap().id, c1);

        store.activate(c2).await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(cache.get().await.unwrap().id, c2);
    }

    #[tokio::test]
    async fn concurrent_misses_collapse_into_one_read() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        struct CountingSource {
            inner: Arc<CredentialStore>,
            reads: AtomicUsize,
        }

        #[async_trait]
        impl CredentialSource for CountingSource {
            async fn active_credential(&self) -> Result<Credential, DatabaseError> {
                self.reads.fetch_add(1, Ordering::SeqCst);
                self.inner.get_active().await
            }
        }

        let (store, c1, _) = seeded().await;
        store.activate(c1).await.unwrap();
        let source = Arc::new(CountingSource {
            inner: store,
            reads: AtomicUsize::new(0),
        });
        let cache = Arc::new(ActiveCredentialCache::new(
            source.clone(),
            Duration::from_secs(60),
        ));

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..16 {
            let cache = cache.clone();
            tasks.spawn(async move { cache.get().await.unwrap().id });
        }
        while let Some(joined) = tasks.join_next().await {
            assert_eq!(joined.unwrap(), c1);
        }

        assert_eq!(source.reads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn missing_active_surfaces_error() {
        let (store, _, _) = seeded().await;
        let cache = ActiveCredentialCache::new(store, Duration::from_secs(60));
        let err = cache.get().await.unwrap_err();
        assert!(matches!(err, DatabaseError::NoActiveCredential));
    }
}
