//! Vendor adapters for remote AI providers.
//!
//! Each vendor speaks its own wire dialect; the `VendorAdapter` trait hides
//! that behind encode/decode so the pipeline only ever sees "text in,
//! completion out". Adapters are stateless statics resolved by provider name.

pub mod client;
pub mod vendors;

pub use client::ProviderClient;

use crate::error::ProviderError;
use crate::store::Credential;

/// Everything an adapter needs to build one extraction request.
pub struct ExtractionRequest<'a> {
    pub system_prompt: &'a str,
    pub message: &'a str,
    /// Sender's resolved identity, embedded in the user turn so the model
    /// can fill the contact field.
    pub real_id: &'a str,
    pub max_tokens: u32,
}

/// Seam between the retry engine and the actual HTTP client.
#[async_trait::async_trait]
pub trait CompletionBackend: Send + Sync {
    async fn complete(
        &self,
        credential: &Credential,
        request: &ExtractionRequest<'_>,
    ) -> Result<String, ProviderError>;
}

/// Substrings that mark a vendor error as a rate limit. Matched
/// case-insensitively against the full rendered error.
const RATE_LIMIT_MARKERS: &[&str] = &[
    "429",
    "503",
    "rate limit",
    "rate_limit",
    "quota",
    "too many requests",
    "resource exhausted",
    "resource_exhausted",
    "request limit",
    "over_query_limit",
    "insufficient_quota",
    "quota exceeded",
    "limit exceeded",
];

/// One remote AI vendor's wire dialect.
pub trait VendorAdapter: Send + Sync + std::fmt::Debug {
    /// Provider name this adapter serves (matches `providers.name`).
    fn vendor(&self) -> &'static str;

    /// Full request URL. Some vendors carry the key here instead of a header.
    fn endpoint(&self, credential: &Credential) -> String;

    /// Whether the API key goes in an `Authorization: Bearer` header.
    fn bearer_auth(&self) -> bool {
        true
    }

    /// Build the JSON request body.
    fn encode(&self, credential: &Credential, request: &ExtractionRequest<'_>)
    -> serde_json::Value;

    /// Pull the completion text out of a 2xx response body.
    fn decode(&self, body: &[u8]) -> Result<String, ProviderError>;

    /// Extra rate-limit markers beyond the shared table.
    fn extra_rate_limit_markers(&self) -> &'static [&'static str] {
        &[]
    }

    /// Classify a rendered call error as rate-limiting or not. Rate-limit
    /// errors trigger credential rotation; everything else fails the attempt.
    fn is_rate_limited(&self, error_text: &str) -> bool {
        let lower = error_text.to_lowercase();
        RATE_LIMIT_MARKERS
            .iter()
            .chain(self.extra_rate_limit_markers())
            .any(|marker| lower.contains(marker))
    }
}

/// Resolve the adapter for a provider name.
pub fn adapter_for(vendor: &str) -> Result<&'static dyn VendorAdapter, ProviderError> {
    match vendor {
        "gemini" => Ok(&vendors::Gemini),
        "groq" => Ok(&vendors::Groq),
        "grok" => Ok(&vendors::Grok),
        "deepseek" => Ok(&vendors::DeepSeek),
        "qwen" => Ok(&vendors::Qwen),
        other => Err(ProviderError::UnsupportedVendor {
            vendor: other.to_string(),
        }),
    }
}
