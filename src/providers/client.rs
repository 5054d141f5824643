//! HTTP client for vendor calls.

use std::time::Duration;

use secrecy::ExposeSecret;
use tracing::debug;

use crate::error::ProviderError;
use crate::providers::{CompletionBackend, ExtractionRequest, adapter_for};
use crate::store::Credential;

/// Sends one extraction request to whichever vendor a credential belongs to.
pub struct ProviderClient {
    http: reqwest::Client,
    timeout: Duration,
}

impl ProviderClient {
    /// Extraction completions can take a while on large prompts, so the
    /// timeout is generous.
    pub fn new(timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::new(),
            timeout,
        }
    }

    /// Call the credential's vendor and return the completion text.
    async fn complete_inner(
        &self,
        credential: &Credential,
        request: &ExtractionRequest<'_>,
    ) -> Result<String, ProviderError> {
        let adapter = adapter_for(&credential.provider_name)?;
        let vendor = adapter.vendor();
        let body = adapter.encode(credential, request);

        let mut builder = self
            .http
            .post(adapter.endpoint(credential))
            .timeout(self.timeout)
            .json(&body);
        if adapter.bearer_auth() {
            builder = builder.bearer_auth(credential.api_key.expose_secret());
        }

        debug!(vendor, model = %credential.model_name, "Sending extraction request");
        let started = std::time::Instant::now();
        let response = builder.send().await.map_err(|e| ProviderError::Transport {
            vendor: vendor.to_string(),
            reason: e.to_string(),
        })?;

        let status = response.status();
        let bytes = response.bytes().await.map_err(|e| ProviderError::Transport {
            vendor: vendor.to_string(),
            reason: e.to_string(),
        })?;

        debug!(
            vendor,
            status = status.as_u16(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Extraction response received"
        );

        if !status.is_success() {
            return Err(ProviderError::Api {
                vendor: vendor.to_string(),
                status: status.as_u16(),
                body: String::from_utf8_lossy(&bytes).into_owned(),
            });
        }

        adapter.decode(&bytes)
    }
}

#[async_trait::async_trait]
impl CompletionBackend for ProviderClient {
    async fn complete(
        &self,
        credential: &Credential,
        request: &ExtractionRequest<'_>,
    ) -> Result<String, ProviderError> {
        self.complete_inner(credential, request).await
    }
}
