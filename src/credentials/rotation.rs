//! Credential rotation.
//!
//! Owns every activation: operator switches and rate-limit failover both go
//! through here, so the clear-then-set transaction and the cache
//! invalidation that must follow it live in one place.

use std::sync::Arc;

use tracing::{info, warn};

use crate::credentials::cache::ActiveCredentialCache;
use crate::error::DatabaseError;
use crate::store::{Credential, CredentialStore};

pub struct RotationEngine {
    store: Arc<CredentialStore>,
    cache: Arc<ActiveCredentialCache>,
}

impl RotationEngine {
    pub fn new(store: Arc<CredentialStore>, cache: Arc<ActiveCredentialCache>) -> Self {
        Self { store, cache }
    }

    /// Make `id` the active credential and refresh readers.
    pub async fn activate(&self, id: i64) -> Result<(), DatabaseError> {
        self.store.activate(id).await?;
        self.cache.invalidate().await;
        Ok(())
    }

    /// Switch away from `current_id` to the best other candidate.
    ///
    /// Candidates come back in deterministic failover order (provider
    /// priority, then fewest errors, then least recently used); the first
    /// one that is not the current credential wins. With a single-credential
    /// pool the current credential is re-activated, which still refreshes
    /// its state for the next attempt.
    pub async fn rotate_to_next(&self, current_id: i64) -> Result<Credential, DatabaseError> {
        let candidates = self.store.rotation_candidates().await?;
        if candidates.is_empty() {
            return Err(DatabaseError::NoCandidates);
        }

        let next = candidates
            .iter()
            .find(|c| c.id != current_id)
            .unwrap_or(&candidates[0])
            .clone();

        if next.id == current_id {
            warn!(
                credential_id = current_id,
                "Only one credential available; staying on it"
            );
        } else {
            info!(
                from = current_id,
                to = next.id,
                provider = %next.provider_name,
                model = %next.model_name,
                "Rotating active credential"
            );
        }

        self.store.activate(next.id).await?;
        self.cache.invalidate().await;
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Database;
    use std::time::Duration;

    struct Fixture {
        store: Arc<CredentialStore>,
        cache: Arc<ActiveCredentialCache>,
        engine: RotationEngine,
    }

    async fn fixture() -> Fixture {
        let db = Arc::new(Database::open_in_memory().await.unwrap());
        let store = Arc::new(CredentialStore::new(db));
        let cache = Arc::new(ActiveCredentialCache::new(
            store.clone(),
            Duration::from_secs(60),
        ));
        let engine = RotationEngine::new(store.clone(), cache.clone());
        Fixture { store, cache, engine }
    }

    async fn seed_two_providers(store: &CredentialStore) -> (i64, i64) {
        let gemini = store.add_provider("gemini", "Google Gemini", "", 10).await.unwrap();
        let groq = store.add_provider("groq", "Groq", "", 5).await.unwrap();
        let m1 = store.add_model(gemini, "gemini-2.0-flash", "Gemini 2.0 Flash", 8192, true).await.unwrap();
        let m2 = store.add_model(groq, "llama-3.3-70b", "Llama 3.3 70B", 8192, true).await.unwrap();
        let c1 = store.add_credential(gemini, m1, "key-1", "gemini").await.unwrap();
        let c2 = store.add_credential(groq, m2, "key-2", "groq").await.unwrap();
        (c1, c2)
    }

    #[tokio::test]
    async fn rotation_prefers_other_credential() {
        let f = fixture().await;
        let (c1, c2) = seed_two_providers(&f.store).await;
        f.engine.activate(c1).await.unwrap();

        let next = f.engine.rotate_to_next(c1).await.unwrap();
        assert_eq!(next.id, c2);
        // Cache was invalidated by the rotation
        assert_eq!(f.cache.get().await.unwrap().id, c2);
    }

    #[tokio::test]
    async fn rotation_is_deterministic() {
        let f = fixture().await;
        let (c1, _) = seed_two_providers(&f.store).await;
        f.engine.activate(c1).await.unwrap();

        let a = f.engine.rotate_to_next(c1).await.unwrap();
        f.engine.activate(c1).await.unwrap();
        let b = f.engine.rotate_to_next(c1).await.unwrap();
        assert_eq!(a.id, b.id);
    }

    #[tokio::test]
    async fn single_credential_pool_rotates_to_itself() {
        let f = fixture().await;
        let p = f.store.add_provider("gemini", "Google Gemini", "", 10).await.unwrap();
        let m = f.store.add_model(p, "gemini-2.0-flash", "Gemini 2.0 Flash", 8192, true).await.unwrap();
        let only = f.store.add_credential(p, m, "key", "solo").await.unwrap();
        f.engine.activate(only).await.unwrap();

        let next = f.engine.rotate_to_next(only).await.unwrap();
        assert_eq!(next.id, only);
    }

    #[tokio::test]
    async fn empty_pool_is_an_error() {
        let f = fixture().await;
        let err = f.engine.rotate_to_next(1).await.unwrap_err();
        assert!(matches!(err, DatabaseError::NoCandidates));
    }

    #[tokio::test]
    async fn disabled_provider_is_skipped() {
        let f = fixture().await;
        let (c1, c2) = seed_two_providers(&f.store).await;
        f.engine.activate(c2).await.unwrap();
        // Disable gemini: rotating away from groq has nowhere to go but groq
        f.store.set_provider_enabled(1, false).await.unwrap();

        let next = f.engine.rotate_to_next(c2).await.unwrap();
        assert_eq!(next.id, c2);
        assert_ne!(next.id, c1);
    }
}
