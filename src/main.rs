use std::sync::Arc;
use std::time::Duration;

use freightline::config::PipelineConfig;
use freightline::credentials::{ActiveCredentialCache, RotationEngine};
use freightline::pipeline::{Extractor, GeofenceRules, MessageProcessor};
use freightline::providers::ProviderClient;
use freightline::sink::RestSink;
use freightline::store::{CredentialStore, Database, MessageStore, ResultStore};
use freightline::worker::Worker;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let sink_url = std::env::var("FREIGHTLINE_SINK_URL").unwrap_or_else(|_| {
        eprintln!("Error: FREIGHTLINE_SINK_URL not set");
        eprintln!("  export FREIGHTLINE_SINK_URL=https://<project>.supabase.co");
        std::process::exit(1);
    });
    let sink_key = std::env::var("FREIGHTLINE_SINK_KEY").unwrap_or_else(|_| {
        eprintln!("Error: FREIGHTLINE_SINK_KEY not set");
        std::process::exit(1);
    });
    let owner_id = std::env::var("FREIGHTLINE_OWNER_ID").unwrap_or_else(|_| {
        eprintln!("Error: FREIGHTLINE_OWNER_ID not set (listing owner account id)");
        std::process::exit(1);
    });

    let db_path =
        std::env::var("FREIGHTLINE_DB_PATH").unwrap_or_else(|_| "./data/freightline.db".to_string());

    let poll_secs: u64 = std::env::var("FREIGHTLINE_POLL_SECS")
        .unwrap_or_else(|_| "60".to_string())
        .parse()
        .unwrap_or(60);

    let mut config = PipelineConfig::default();
    if let Ok(prompt_path) = std::env::var("FREIGHTLINE_PROMPT_FILE") {
        config = config.with_prompt_file(prompt_path);
    }

    eprintln!("🚚 Freightline v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Database: {db_path}");
    eprintln!("   Sink: {sink_url}");
    eprintln!("   Poll interval: {poll_secs}s\n");

    // ── Database & stores ────────────────────────────────────────────────
    let db = Arc::new(Database::open(&db_path).await.unwrap_or_else(|e| {
        eprintln!("Error: Failed to open database at {db_path}: {e}");
        std::process::exit(1);
    }));
    let credentials = Arc::new(CredentialStore::new(db.clone()));
    let messages = Arc::new(MessageStore::new(db.clone()));
    let results = Arc::new(ResultStore::new(db));

    // ── Credential cache & rotation ──────────────────────────────────────
    let cache = Arc::new(ActiveCredentialCache::new(
        credentials.clone(),
        config.cache_ttl,
    ));
    let rotation = Arc::new(RotationEngine::new(credentials.clone(), cache.clone()));

    // ── Pipeline ─────────────────────────────────────────────────────────
    let backend = Arc::new(ProviderClient::new(config.call_timeout));
    let extractor = Extractor::new(
        cache,
        rotation,
        credentials,
        backend,
        config.max_retries,
    );
    let sink = Arc::new(RestSink::new(
        sink_url,
        secrecy::SecretString::from(sink_key),
        owner_id,
        config.sink_timeout,
    ));
    let processor = Arc::new(MessageProcessor::new(
        extractor,
        messages.clone(),
        results,
        sink,
        GeofenceRules::default(),
        config.clone(),
    ));

    // ── Worker loop ──────────────────────────────────────────────────────
    let worker = Worker::new(processor, messages, config);
    tokio::select! {
        _ = worker.run(Duration::from_secs(poll_secs)) => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutting down");
        }
    }

    Ok(())
}
