//! Configuration types.

use std::path::Path;
use std::time::Duration;

/// Fallback system prompt when no prompt file is configured.
const DEFAULT_SYSTEM_PROMPT: &str =
    "Sos un extractor de cargas. Analizá el mensaje y devolvé un array JSON de cargas \
     con los campos: material, presentacion, peso, tipoEquipo, localidadCarga, \
     localidadDescarga, fechaCarga, fechaDescarga, telefono, correo, puntoReferencia, \
     precio, formaDePago, observaciones. Si el mensaje no describe ninguna carga, \
     devolvé un array vacío [].";

/// Pipeline configuration.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// How long a cached active-credential snapshot stays valid.
    pub cache_ttl: Duration,
    /// Maximum credential rotations per message (total vendor calls = max_retries + 1).
    pub max_retries: u32,
    /// Per-call timeout for vendor requests (extraction prompts can be large).
    pub call_timeout: Duration,
    /// Per-call timeout for sink requests.
    pub sink_timeout: Duration,
    /// Messages fetched per processing batch.
    pub batch_size: usize,
    /// Pause between launching successive message tasks (spreads load).
    pub message_stagger: Duration,
    /// Messages at this attempt count drop out of the processable set.
    pub max_attempts: u32,
    /// Text-only messages shorter than this are skipped.
    pub min_text_len: usize,
    /// System instruction sent with every extraction call.
    pub system_prompt: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(2),
            max_retries: 2,
            call_timeout: Duration::from_secs(120),
            sink_timeout: Duration::from_secs(30),
            batch_size: 10,
            message_stagger: Duration::from_millis(500),
            max_attempts: 3,
            min_text_len: 20,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }
}

impl PipelineConfig {
    /// Load the system prompt from a file, falling back to the built-in prompt.
    pub fn with_prompt_file(mut self, path: impl AsRef<Path>) -> Self {
        match std::fs::read_to_string(path.as_ref()) {
            Ok(prompt) if !prompt.trim().is_empty() => {
                self.system_prompt = prompt;
            }
            Ok(_) => {
                tracing::warn!(path = %path.as_ref().display(), "Prompt file is empty, keeping default");
            }
            Err(e) => {
                tracing::warn!(path = %path.as_ref().display(), error = %e, "Failed to read prompt file, keeping default");
            }
        }
        self
    }
}
