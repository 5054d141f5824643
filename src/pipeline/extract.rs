//! Extraction with bounded rate-limit failover.
//!
//! One call per active credential; a rate-limited credential is rotated away
//! from and never retried within the same message. Any other failure ends
//! the attempt immediately. At most `max_retries` rotations happen, so a
//! message costs at most `max_retries + 1` vendor calls.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{info, warn};

use crate::credentials::{ActiveCredentialCache, RotationEngine};
use crate::error::{DatabaseError, PipelineError};
use crate::providers::{CompletionBackend, ExtractionRequest, adapter_for};
use crate::store::CredentialStore;

pub struct Extractor {
    cache: Arc<ActiveCredentialCache>,
    rotation: Arc<RotationEngine>,
    store: Arc<CredentialStore>,
    backend: Arc<dyn CompletionBackend>,
    max_retries: u32,
}

impl Extractor {
    pub fn new(
        cache: Arc<ActiveCredentialCache>,
        rotation: Arc<RotationEngine>,
        store: Arc<CredentialStore>,
        backend: Arc<dyn CompletionBackend>,
        max_retries: u32,
    ) -> Self {
        Self {
            cache,
            rotation,
            store,
            backend,
            max_retries,
        }
    }

    /// Run one message through the active credential, rotating on rate
    /// limits. Returns the raw completion text.
    pub async fn extract(
        &self,
        system_prompt: &str,
        message: &str,
        real_id: &str,
    ) -> Result<String, PipelineError> {
        let mut credential = self.cache.get().await.map_err(|e| match e {
            DatabaseError::NoActiveCredential => PipelineError::NoCredential(e),
            other => PipelineError::Database(other),
        })?;

        let mut tried: HashSet<i64> = HashSet::new();

        for rotation in 0..=self.max_retries {
            tried.insert(credential.id);
            let request = ExtractionRequest {
                system_prompt,
                message,
                real_id,
                max_tokens: credential.max_tokens,
            };

            match self.backend.complete(&credential, &request).await {
                Ok(text) => {
                    self.store.report_success(credential.id).await?;
                    if rotation > 0 {
                        info!(
                            credential_id = credential.id,
                            rotations = rotation,
                            "Extraction succeeded after failover"
                        );
                    }
                    return Ok(text);
                }
                Err(err) => {
                    let rendered = err.to_string();
                    self.store.report_error(credential.id, &rendered).await?;

                    let adapter = adapter_for(&credential.provider_name)?;
                    if !adapter.is_rate_limited(&rendered) {
                        return Err(PipelineError::Call(err));
                    }

                    warn!(
                        credential_id = credential.id,
                        provider = %credential.provider_name,
                        error = %rendered,
                        "Credential rate limited"
                    );

                    if rotation == self.max_retries {
                        break;
                    }

                    let next = match self.rotation.rotate_to_next(credential.id).await {
                        Ok(next) => next,
                        // Pool emptied underneath us (providers disabled,
                        // credentials deleted): same terminal outcome as
                        // having tried them all.
                        Err(DatabaseError::NoCandidates) => {
                            return Err(PipelineError::PoolExhausted { tried: tried.len() });
                        }
                        Err(e) => return Err(PipelineError::Database(e)),
                    };
                    if tried.contains(&next.id) {
                        return Err(PipelineError::PoolExhausted { tried: tried.len() });
                    }
                    credential = next;
                }
            }
        }

        Err(PipelineError::RetriesExhausted {
            rotations: self.max_retries,
        })
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;
    use crate::providers::ExtractionRequest;
    use crate::store::{Credential, Database};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Scripted backend: pops one canned response per call and records which
    /// credential each call used.
    struct ScriptedBackend {
        script: Mutex<Vec<Result<String, u16>>>,
        calls: Mutex<Vec<i64>>,
    }

    impl ScriptedBackend {
        fn new(script: Vec<Result<String, u16>>) -> Self {
            Self {
                script: Mutex::new(script),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<i64> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl CompletionBackend for ScriptedBackend {
        async fn complete(
            &self,
            credential: &Credential,
            _request: &ExtractionRequest<'_>,
        ) -> Result<String, ProviderError> {
            self.calls.lock().unwrap().push(credential.id);
            match self.script.lock().unwrap().remove(0) {
                Ok(text) => Ok(text),
                Err(status) => Err(ProviderError::Api {
                    vendor: credential.provider_name.clone(),
                    status,
                    body: "rate limit exceeded".to_string(),
                }),
            }
        }
    }

    struct Fixture {
        store: Arc<CredentialStore>,
    }

    impl Fixture {
        async fn new(credential_count: usize) -> Self {
            let db = Arc::new(Database::open_in_memory().await.unwrap());
            let store = Arc::new(CredentialStore::new(db));
            let p = store.add_provider("gemini", "Google Gemini", "", 10).await.unwrap();
            let m = store
                .add_model(p, "gemini-2.0-flash", "Gemini 2.0 Flash", 8192, true)
                .await
                .unwrap();
            for i in 0..credential_count {
                store
                    .add_credential(p, m, &format!("key-{i}"), &format!("cred {i}"))
                    .await
                    .unwrap();
            }
            store.activate(1).await.unwrap();
            Self { store }
        }

        fn extractor(&self, backend: Arc<ScriptedBackend>, max_retries: u32) -> Extractor {
            self.extractor_with(backend, max_retries)
        }

        fn extractor_with(&self, backend: Arc<dyn CompletionBackend>, max_retries: u32) -> Extractor {
            let cache = Arc::new(ActiveCredentialCache::new(
                self.store.clone(),
                Duration::from_secs(60),
            ));
            let rotation = Arc::new(RotationEngine::new(self.store.clone(), cache.clone()));
            Extractor::new(cache, rotation, self.store.clone(), backend, max_retries)
        }
    }

    #[tokio::test]
    async fn success_on_first_call() {
        let f = Fixture::new(2).await;
        let backend = Arc::new(ScriptedBackend::new(vec![Ok("[]".to_string())]));
        let extractor = f.extractor(backend.clone(), 2);

        let text = extractor.extract("sys", "msg", "+549341").await.unwrap();
        assert_eq!(text, "[]");
        assert_eq!(backend.calls(), vec![1]);

        let creds = f.store.list_credentials().await.unwrap();
        assert!(creds.iter().find(|c| c.id == 1).unwrap().last_success_at.is_some());
    }

    #[tokio::test]
    async fn rate_limit_rotates_then_succeeds() {
        let f = Fixture::new(3).await;
        let backend = Arc::new(ScriptedBackend::new(vec![
            Err(429),
            Ok("[{\"material\": \"soja\"}]".to_string()),
        ]));
        let extractor = f.extractor(backend.clone(), 2);

        let text = extractor.extract("sys", "msg", "+549341").await.unwrap();
        assert!(text.contains("soja"));

        let calls = backend.calls();
        assert_eq!(calls.len(), 2);
        assert_ne!(calls[0], calls[1], "rotation must switch credentials");

        // Failed credential carries the error; winner carries the success
        let creds = f.store.list_credentials().await.unwrap();
        let failed = creds.iter().find(|c| c.id == calls[0]).unwrap();
        assert_eq!(failed.error_count, 1);
        let winner = creds.iter().find(|c| c.id == calls[1]).unwrap();
        assert!(winner.last_success_at.is_some());
    }

    #[tokio::test]
    async fn call_count_is_bounded_and_no_credential_repeats() {
        let f = Fixture::new(5).await;
        let backend = Arc::new(ScriptedBackend::new(vec![Err(429); 3]));
        let extractor = f.extractor(backend.clone(), 2);

        let err = extractor.extract("sys", "msg", "+549341").await.unwrap_err();
        assert!(matches!(err, PipelineError::RetriesExhausted { rotations: 2 }));

        let calls = backend.calls();
        assert_eq!(calls.len(), 3, "max_retries + 1 total calls");
        let unique: HashSet<_> = calls.iter().collect();
        assert_eq!(unique.len(), 3, "no credential tried twice");
    }

    #[tokio::test]
    async fn small_pool_exhausts_before_retry_cap() {
        let f = Fixture::new(2).await;
        let backend = Arc::new(ScriptedBackend::new(vec![Err(429); 3]));
        let extractor = f.extractor(backend.clone(), 5);

        let err = extractor.extract("sys", "msg", "+549341").await.unwrap_err();
        assert!(matches!(err, PipelineError::PoolExhausted { tried: 2 }));
        assert_eq!(backend.calls().len(), 2);
    }

    #[tokio::test]
    async fn pool_emptied_mid_message_reports_exhaustion() {
        let f = Fixture::new(1).await;
        let backend = Arc::new(ScriptedBackend::new(vec![Err(429)]));

        // Warm the cache, then disable the provider so rotation finds nothing
        let cache = Arc::new(ActiveCredentialCache::new(
            f.store.clone(),
            Duration::from_secs(60),
        ));
        cache.get().await.unwrap();
        f.store.set_provider_enabled(1, false).await.unwrap();

        let rotation = Arc::new(RotationEngine::new(f.store.clone(), cache.clone()));
        let extractor = Extractor::new(cache, rotation, f.store.clone(), backend, 2);

        let err = extractor.extract("sys", "msg", "+549341").await.unwrap_err();
        assert!(matches!(err, PipelineError::PoolExhausted { tried: 1 }));
    }

    #[tokio::test]
    async fn non_rate_limit_error_fails_fast() {
        let f = Fixture::new(3).await;
        struct HardFail;
        #[async_trait::async_trait]
        impl CompletionBackend for HardFail {
            async fn complete(
                &self,
                _credential: &Credential,
                _request: &ExtractionRequest<'_>,
            ) -> Result<String, ProviderError> {
                Err(ProviderError::Decode {
                    vendor: "gemini".to_string(),
                    reason: "unexpected end of input".to_string(),
                })
            }
        }

        let extractor = f.extractor_with(Arc::new(HardFail), 2);
        let err = extractor.extract("sys", "msg", "+549341").await.unwrap_err();
        assert!(matches!(err, PipelineError::Call(ProviderError::Decode { .. })));

        // No rotation happened: credential 1 is still active
        let active = f.store.get_active().await.unwrap();
        assert_eq!(active.id, 1);
    }

    #[tokio::test]
    async fn missing_active_credential_is_terminal() {
        let db = Arc::new(Database::open_in_memory().await.unwrap());
        let store = Arc::new(CredentialStore::new(db));
        let cache = Arc::new(ActiveCredentialCache::new(store.clone(), Duration::from_secs(60)));
        let rotation = Arc::new(RotationEngine::new(store.clone(), cache.clone()));
        let backend = Arc::new(ScriptedBackend::new(vec![]));
        let extractor = Extractor::new(cache, rotation, store, backend, 2);

        let err = extractor.extract("sys", "msg", "+549341").await.unwrap_err();
        assert!(matches!(err, PipelineError::NoCredential(_)));
    }
}
