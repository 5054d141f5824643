//! Error types for Freightline.

/// Top-level error type for the service.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    /// No credential is active+enabled with an enabled provider.
    /// Operator action required; never retried.
    #[error("no active AI credential configured")]
    NoActiveCredential,

    /// The rotation candidate pool is empty.
    #[error("no enabled credentials available to rotate to")]
    NoCandidates,
}

/// Errors from a single vendor call.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("{vendor}: unsupported provider")]
    UnsupportedVendor { vendor: String },

    #[error("{vendor}: failed to send request: {reason}")]
    Transport { vendor: String, reason: String },

    /// Non-2xx response. The raw body is kept verbatim so the rate-limit
    /// classifier can inspect the vendor's free-text error.
    #[error("{vendor} API error {status}: {body}")]
    Api {
        vendor: String,
        status: u16,
        body: String,
    },

    #[error("{vendor}: failed to parse response: {reason}")]
    Decode { vendor: String, reason: String },

    #[error("{vendor}: empty completion in response")]
    EmptyCompletion { vendor: String },
}

/// AI-output normalization and domain-acceptance errors.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("response is not valid JSON: {reason} (text starts: {snippet:?})")]
    NotJson { reason: String, snippet: String },

    #[error("response must be a JSON object or array, got {kind}")]
    WrongShape { kind: &'static str },

    #[error("listing {index}: field '{field}' is empty")]
    EmptyField { index: usize, field: &'static str },

    #[error(
        "listing {index}: field '{field}' value {value:?} lacks required qualifier {required:?}"
    )]
    MissingQualifier {
        index: usize,
        field: &'static str,
        value: String,
        required: String,
    },

    #[error("listing {index}: field '{field}' names forbidden country {country:?}")]
    ForbiddenCountry {
        index: usize,
        field: &'static str,
        country: String,
    },

    #[error("listing {index}: field '{field}' contains unknown-location phrase {phrase:?}")]
    UnknownLocation {
        index: usize,
        field: &'static str,
        phrase: String,
    },
}

/// Persistence-sink errors.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("sink request failed: {0}")]
    Transport(String),

    #[error("sink rejected listing: {status} - {body}")]
    Rejected { status: u16, body: String },

    #[error("sink response missing created-record id: {0}")]
    MissingId(String),
}

/// Per-message processing outcomes that terminate an attempt.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("no active AI credential configured; configure one before processing")]
    NoCredential(#[source] DatabaseError),

    /// Non-rate-limit vendor failure. Property of this attempt; not rotated.
    #[error("AI call failed: {0}")]
    Call(#[from] ProviderError),

    /// Every enabled credential was tried and rate-limited.
    #[error(
        "all {tried} available credentials are rate limited; wait for quotas to reset or activate another credential"
    )]
    PoolExhausted { tried: usize },

    /// The rotation cap was hit before any credential succeeded.
    #[error("retry limit reached ({rotations} rotations); wait for quotas to reset")]
    RetriesExhausted { rotations: u32 },

    #[error("invalid AI response: {0}")]
    Validation(#[from] ValidationError),

    #[error("sink upload failed: {0}")]
    Sink(#[from] SinkError),

    #[error("database error during processing: {0}")]
    Database(#[from] DatabaseError),
}

/// Result type alias for the service.
pub type Result<T> = std::result::Result<T, Error>;
