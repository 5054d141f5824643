//! Adapter implementations for the five supported vendors.
//!
//! Groq, Grok, and DeepSeek speak the OpenAI chat-completions dialect;
//! Gemini and Qwen each have their own request and response shapes.

use secrecy::ExposeSecret;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::error::ProviderError;
use crate::providers::{ExtractionRequest, VendorAdapter};
use crate::store::Credential;

const TEMPERATURE: f64 = 0.7;

/// Array-shape reinforcement for vendors without a JSON response mode.
const ARRAY_SUFFIX: &str = "\n\nIMPORTANTE: Debes responder con un array JSON. Si hay UNA carga, \
     responde [{...carga...}]. Si hay MÚLTIPLES cargas, responde \
     [{...carga1...}, {...carga2...}].\nEl formato debe ser SIEMPRE un array, nunca un objeto suelto.";

const JSON_ARRAY_SUFFIX: &str =
    "\n\nIMPORTANTE: Debes responder ÚNICAMENTE con un array JSON válido de cargas.";

const JSON_ONLY_SUFFIX: &str = "\n\nIMPORTANTE: Responde ÚNICAMENTE con JSON válido.";

fn user_turn(request: &ExtractionRequest<'_>) -> String {
    format!(
        "Teléfono del cliente: {}\n\n{}",
        request.real_id, request.message
    )
}

// ── OpenAI-dialect response ─────────────────────────────────────────

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: String,
}

fn decode_chat(vendor: &'static str, body: &[u8]) -> Result<String, ProviderError> {
    let response: ChatResponse =
        serde_json::from_slice(body).map_err(|e| ProviderError::Decode {
            vendor: vendor.to_string(),
            reason: e.to_string(),
        })?;
    response
        .choices
        .into_iter()
        .next()
        .map(|c| c.message.content)
        .ok_or(ProviderError::EmptyCompletion {
            vendor: vendor.to_string(),
        })
}

// ── Gemini ──────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct Gemini;

impl VendorAdapter for Gemini {
    fn vendor(&self) -> &'static str {
        "gemini"
    }

    /// Gemini authenticates with a `key` query parameter, not a header.
    fn endpoint(&self, credential: &Credential) -> String {
        format!(
            "https://generativelanguage.googleapis.com/v1beta/models/{}:generateContent?key={}",
            credential.model_name,
            credential.api_key.expose_secret()
        )
    }

    fn bearer_auth(&self) -> bool {
        false
    }

    fn encode(&self, _credential: &Credential, request: &ExtractionRequest<'_>) -> Value {
        let full_prompt = format!(
            "{}\n\n## Información del Cliente\n- Teléfono: {}\n\n## Mensaje del Cliente\n{}",
            request.system_prompt, request.real_id, request.message
        );
        json!({
            "contents": [{ "parts": [{ "text": full_prompt }] }],
            "generationConfig": {
                "temperature": TEMPERATURE,
                "maxOutputTokens": request.max_tokens,
                "topP": 0.95,
                "topK": 40,
                "responseMimeType": "application/json",
            },
        })
    }

    fn decode(&self, body: &[u8]) -> Result<String, ProviderError> {
        #[derive(Deserialize)]
        struct GeminiResponse {
            #[serde(default)]
            candidates: Vec<Candidate>,
        }
        #[derive(Deserialize)]
        struct Candidate {
            content: Content,
        }
        #[derive(Deserialize)]
        struct Content {
            #[serde(default)]
            parts: Vec<Part>,
        }
        #[derive(Deserialize)]
        struct Part {
            text: String,
        }

        let response: GeminiResponse =
            serde_json::from_slice(body).map_err(|e| ProviderError::Decode {
                vendor: "gemini".to_string(),
                reason: e.to_string(),
            })?;
        response
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content.parts.into_iter().next())
            .map(|p| p.text)
            .ok_or(ProviderError::EmptyCompletion {
                vendor: "gemini".to_string(),
            })
    }
}

// ── Groq ────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct Groq;

impl VendorAdapter for Groq {
    fn vendor(&self) -> &'static str {
        "groq"
    }

    fn endpoint(&self, _credential: &Credential) -> String {
        "https://api.groq.com/openai/v1/chat/completions".to_string()
    }

    fn encode(&self, credential: &Credential, request: &ExtractionRequest<'_>) -> Value {
        json!({
            "model": &credential.model_name,
            "messages": [
                { "role": "system", "content": format!("{}{ARRAY_SUFFIX}", request.system_prompt) },
                { "role": "user", "content": user_turn(request) },
            ],
            "temperature": TEMPERATURE,
            "max_tokens": request.max_tokens,
        })
    }

    fn decode(&self, body: &[u8]) -> Result<String, ProviderError> {
        decode_chat("groq", body)
    }
}

// ── Grok ────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct Grok;

impl VendorAdapter for Grok {
    fn vendor(&self) -> &'static str {
        "grok"
    }

    fn endpoint(&self, _credential: &Credential) -> String {
        "https://api.x.ai/v1/chat/completions".to_string()
    }

    fn encode(&self, credential: &Credential, request: &ExtractionRequest<'_>) -> Value {
        json!({
            "model": &credential.model_name,
            "messages": [
                { "role": "system", "content": format!("{}{JSON_ARRAY_SUFFIX}", request.system_prompt) },
                { "role": "user", "content": user_turn(request) },
            ],
            "temperature": TEMPERATURE,
            "max_tokens": request.max_tokens,
            "response_format": { "type": "json_object" },
        })
    }

    fn decode(&self, body: &[u8]) -> Result<String, ProviderError> {
        decode_chat("grok", body)
    }
}

// ── DeepSeek ────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct DeepSeek;

impl VendorAdapter for DeepSeek {
    fn vendor(&self) -> &'static str {
        "deepseek"
    }

    fn endpoint(&self, _credential: &Credential) -> String {
        "https://api.deepseek.com/v1/chat/completions".to_string()
    }

    fn encode(&self, credential: &Credential, request: &ExtractionRequest<'_>) -> Value {
        json!({
            "model": &credential.model_name,
            "messages": [
                { "role": "system", "content": format!("{}{ARRAY_SUFFIX}", request.system_prompt) },
                { "role": "user", "content": user_turn(request) },
            ],
            "temperature": TEMPERATURE,
            "max_tokens": request.max_tokens,
        })
    }

    fn decode(&self, body: &[u8]) -> Result<String, ProviderError> {
        decode_chat("deepseek", body)
    }
}

// ── Qwen ────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct Qwen;

impl VendorAdapter for Qwen {
    fn vendor(&self) -> &'static str {
        "qwen"
    }

    fn endpoint(&self, _credential: &Credential) -> String {
        "https://dashscope.aliyuncs.com/api/v1/services/aigc/text-generation/generation".to_string()
    }

    fn encode(&self, credential: &Credential, request: &ExtractionRequest<'_>) -> Value {
        json!({
            "model": &credential.model_name,
            "input": {
                "messages": [
                    { "role": "system", "content": format!("{}{JSON_ONLY_SUFFIX}", request.system_prompt) },
                    { "role": "user", "content": format!("Teléfono: {}\n\n{}", request.real_id, request.message) },
                ],
            },
            "parameters": {
                "result_format": "message",
                "temperature": TEMPERATURE,
                "max_tokens": request.max_tokens,
            },
        })
    }

    fn decode(&self, body: &[u8]) -> Result<String, ProviderError> {
        #[derive(Deserialize)]
        struct QwenResponse {
            output: QwenOutput,
        }
        #[derive(Deserialize)]
        struct QwenOutput {
            #[serde(default)]
            choices: Vec<ChatChoice>,
        }

        let response: QwenResponse =
            serde_json::from_slice(body).map_err(|e| ProviderError::Decode {
                vendor: "qwen".to_string(),
                reason: e.to_string(),
            })?;
        response
            .output
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or(ProviderError::EmptyCompletion {
                vendor: "qwen".to_string(),
            })
    }

    /// DashScope reports throttling with a `Throttling.*` error code.
    fn extra_rate_limit_markers(&self) -> &'static [&'static str] {
        &["throttling"]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::SecretString;

    fn credential() -> Credential {
        Credential {
            id: 1,
            provider_id: 1,
            model_id: 1,
            api_key: SecretString::from("test-key".to_string()),
            label: "test".to_string(),
            is_active: true,
            is_enabled: true,
            error_count: 0,
            last_error: None,
            last_used_at: None,
            last_success_at: None,
            provider_name: "gemini".to_string(),
            provider_display: "Google Gemini".to_string(),
            model_name: "gemini-2.0-flash".to_string(),
            model_display: "Gemini 2.0 Flash".to_string(),
            max_tokens: 8192,
        }
    }

    fn request<'a>() -> ExtractionRequest<'a> {
        ExtractionRequest {
            system_prompt: "Extraé las cargas.",
            message: "Cargo soja 30tn Rosario a Córdoba",
            real_id: "+5493411234567",
            max_tokens: 8192,
        }
    }

    #[test]
    fn gemini_key_goes_in_url() {
        let url = Gemini.endpoint(&credential());
        assert!(url.contains("gemini-2.0-flash:generateContent"));
        assert!(url.ends_with("key=test-key"));
        assert!(!Gemini.bearer_auth());
    }

    #[test]
    fn gemini_request_shape() {
        let body = Gemini.encode(&credential(), &request());
        let text = body["contents"][0]["parts"][0]["text"].as_str().unwrap();
        assert!(text.contains("Extraé las cargas."));
        assert!(text.contains("+5493411234567"));
        assert_eq!(body["generationConfig"]["responseMimeType"], "application/json");
    }

    #[test]
    fn gemini_decode_pulls_first_candidate() {
        let body = br#"{"candidates": [{"content": {"parts": [{"text": "[]"}]}}]}"#;
        assert_eq!(Gemini.decode(body).unwrap(), "[]");

        let empty = br#"{"candidates": []}"#;
        assert!(matches!(
            Gemini.decode(empty).unwrap_err(),
            ProviderError::EmptyCompletion { .. }
        ));
    }

    #[test]
    fn openai_dialect_decode() {
        let body = br#"{"choices": [{"message": {"role": "assistant", "content": "[{\"material\": \"soja\"}]"}}]}"#;
        assert_eq!(Groq.decode(body).unwrap(), r#"[{"material": "soja"}]"#);

        let garbage = b"not json";
        assert!(matches!(
            DeepSeek.decode(garbage).unwrap_err(),
            ProviderError::Decode { .. }
        ));
    }

    #[test]
    fn grok_forces_json_response_format() {
        let body = Grok.encode(&credential(), &request());
        assert_eq!(body["response_format"]["type"], "json_object");
    }

    #[test]
    fn qwen_nests_messages_under_input() {
        let body = Qwen.encode(&credential(), &request());
        assert_eq!(body["input"]["messages"][0]["role"], "system");
        assert_eq!(body["parameters"]["result_format"], "message");

        let response = br#"{"output": {"choices": [{"message": {"content": "[]"}}]}}"#;
        assert_eq!(Qwen.decode(response).unwrap(), "[]");
    }
}
