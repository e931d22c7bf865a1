//! Language-model providers
//!
//! `LanguageModelProvider` is the seam between the instruction processor
//! and a hosted model. `HttpProvider` speaks the OpenAI chat-completions,
//! Anthropic messages and Gemini generateContent wire formats over
//! blocking reqwest. `MockProvider` scripts answers for tests.

use std::collections::VecDeque;
use std::env;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AudioChatError, Result};

/// Default request timeout
pub const DEFAULT_PROVIDER_TIMEOUT_MS: u64 = 20_000;

// ============================================================================
// Configuration
// ============================================================================

/// Which hosted API to call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    #[serde(alias = "open_ai")]
    OpenAi,
    Anthropic,
    /// Gemini models through the Generative Language API
    Google,
    /// Heuristic mapping only
    None,
}

impl ProviderKind {
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "openai" | "open_ai" => Some(ProviderKind::OpenAi),
            "anthropic" | "claude" => Some(ProviderKind::Anthropic),
            "google" | "gemini" => Some(ProviderKind::Google),
            "none" | "off" | "heuristic" => Some(ProviderKind::None),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::Google => "google",
            ProviderKind::None => "none",
        }
    }

    fn default_model(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "gpt-4o-mini",
            ProviderKind::Anthropic => "claude-3-5-haiku-latest",
            ProviderKind::Google => "gemini-1.5-flash",
            ProviderKind::None => "",
        }
    }

    fn default_base_url(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "https://api.openai.com",
            ProviderKind::Anthropic => "https://api.anthropic.com",
            ProviderKind::Google => "https://generativelanguage.googleapis.com",
            ProviderKind::None => "",
        }
    }

    fn api_key_var(&self) -> Option<&'static str> {
        match self {
            ProviderKind::OpenAi => Some("OPENAI_API_KEY"),
            ProviderKind::Anthropic => Some("ANTHROPIC_API_KEY"),
            ProviderKind::Google => Some("GOOGLE_API_KEY"),
            ProviderKind::None => None,
        }
    }
}

/// Provider settings; API keys come from the environment only
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    /// Model name, provider default when unset
    pub model: Option<String>,
    /// API root, provider default when unset
    pub base_url: Option<String>,
    pub timeout_ms: u64,
    pub temperature: f32,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: ProviderKind::default(),
            model: None,
            base_url: None,
            timeout_ms: DEFAULT_PROVIDER_TIMEOUT_MS,
            temperature: 0.2,
        }
    }
}

impl ProviderConfig {
    pub fn disabled() -> Self {
        Self {
            kind: ProviderKind::None,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.timeout_ms == 0 {
            return Err(AudioChatError::Config {
                reason: "provider timeout_ms must be > 0".to_string(),
            });
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(AudioChatError::Config {
                reason: format!("provider temperature {} outside 0..=2", self.temperature),
            });
        }
        Ok(())
    }
}

// ============================================================================
// Provider Trait
// ============================================================================

/// One completion request
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderRequest {
    pub system: String,
    pub prompt: String,
    /// Expected response shape
    pub schema: Value,
    pub temperature: f32,
}

/// Text completion capability
pub trait LanguageModelProvider: Send + Sync {
    /// Name used in logs and step metadata
    fn name(&self) -> &str;

    /// Return the raw response text
    fn complete(&self, request: &ProviderRequest) -> Result<String>;
}

// ============================================================================
// HTTP Provider
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct OpenAiRequest<'a> {
    model: &'a str,
    temperature: f32,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAiMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    system: &'a str,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicBlock>,
}

#[derive(Debug, Deserialize)]
struct AnthropicBlock {
    #[serde(default)]
    text: Option<String>,
}

const ANTHROPIC_VERSION: &str = "2023-06-01";
const MAX_OUTPUT_TOKENS: u32 = 1024;

#[derive(Debug, Deserialize)]
struct GeminiPart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Serialize)]
struct GeminiSystem<'a> {
    parts: Vec<GeminiTextPart<'a>>,
}

#[derive(Debug, Serialize)]
struct GeminiTextPart<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
struct GeminiContent<'a> {
    role: &'a str,
    parts: Vec<GeminiTextPart<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiGenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest<'a> {
    system_instruction: GeminiSystem<'a>,
    contents: Vec<GeminiContent<'a>>,
    generation_config: GeminiGenerationConfig,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    #[serde(default)]
    content: Option<GeminiCandidateContent>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidateContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

/// Hosted model over HTTPS
#[derive(Clone)]
pub struct HttpProvider {
    kind: ProviderKind,
    model: String,
    base_url: String,
    api_key: String,
    timeout_ms: u64,
}

impl std::fmt::Debug for HttpProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpProvider")
            .field("kind", &self.kind)
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("timeout_ms", &self.timeout_ms)
            .finish_non_exhaustive()
    }
}

impl HttpProvider {
    /// Create a provider with an explicit key
    pub fn new(kind: ProviderKind, api_key: impl Into<String>, config: &ProviderConfig) -> Self {
        Self {
            kind,
            model: config
                .model
                .clone()
                .unwrap_or_else(|| kind.default_model().to_string()),
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| kind.default_base_url().to_string())
                .trim_end_matches('/')
                .to_string(),
            api_key: api_key.into(),
            timeout_ms: config.timeout_ms,
        }
    }

    /// Build from config plus the provider's API key variable
    ///
    /// `None` when the provider is disabled or no key is set.
    pub fn from_config(config: &ProviderConfig) -> Option<Self> {
        let var = config.kind.api_key_var()?;
        let key = env::var(var).ok().filter(|k| !k.trim().is_empty())?;
        Some(Self::new(config.kind, key, config))
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn endpoint(&self) -> String {
        match self.kind {
            ProviderKind::Anthropic => format!("{}/v1/messages", self.base_url),
            ProviderKind::Google => format!(
                "{}/v1beta/models/{}:generateContent",
                self.base_url, self.model
            ),
            _ => format!("{}/v1/chat/completions", self.base_url),
        }
    }

    #[cfg(feature = "llm-http")]
    fn send(&self, request: &ProviderRequest) -> Result<String> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_millis(self.timeout_ms))
            .build()
            .map_err(|e| self.failure(e.to_string()))?;

        let builder = match self.kind {
            ProviderKind::Anthropic => client
                .post(self.endpoint())
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", ANTHROPIC_VERSION)
                .json(&AnthropicRequest {
                    model: &self.model,
                    max_tokens: MAX_OUTPUT_TOKENS,
                    temperature: request.temperature,
                    system: &request.system,
                    messages: vec![ChatMessage {
                        role: "user",
                        content: &request.prompt,
                    }],
                }),
            ProviderKind::Google => client
                .post(self.endpoint())
                .header("x-goog-api-key", &self.api_key)
                .json(&GeminiRequest {
                    system_instruction: GeminiSystem {
                        parts: vec![GeminiTextPart {
                            text: &request.system,
                        }],
                    },
                    contents: vec![GeminiContent {
                        role: "user",
                        parts: vec![GeminiTextPart {
                            text: &request.prompt,
                        }],
                    }],
                    generation_config: GeminiGenerationConfig {
                        temperature: request.temperature,
                        max_output_tokens: MAX_OUTPUT_TOKENS,
                    },
                }),
            _ => client
                .post(self.endpoint())
                .bearer_auth(&self.api_key)
                .json(&OpenAiRequest {
                    model: &self.model,
                    temperature: request.temperature,
                    messages: vec![
                        ChatMessage {
                            role: "system",
                            content: &request.system,
                        },
                        ChatMessage {
                            role: "user",
                            content: &request.prompt,
                        },
                    ],
                }),
        };

        let response = builder.send().map_err(|e| {
            if e.is_timeout() {
                AudioChatError::ProviderTimeout {
                    provider: self.name().to_string(),
                    timeout_ms: self.timeout_ms,
                }
            } else if e.is_connect() {
                self.failure(format!("cannot connect to {}: {}", self.base_url, e))
            } else {
                self.failure(e.to_string())
            }
        })?;

        if !response.status().is_success() {
            return Err(self.failure(format!("API returned {}", response.status())));
        }

        let text = match self.kind {
            ProviderKind::Anthropic => response
                .json::<AnthropicResponse>()
                .map_err(|e| self.failure(format!("invalid response: {}", e)))?
                .content
                .into_iter()
                .filter_map(|b| b.text)
                .collect::<Vec<_>>()
                .join(""),
            ProviderKind::Google => response
                .json::<GeminiResponse>()
                .map_err(|e| self.failure(format!("invalid response: {}", e)))?
                .candidates
                .into_iter()
                .next()
                .and_then(|c| c.content)
                .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect::<Vec<_>>().join(""))
                .unwrap_or_default(),
            _ => response
                .json::<OpenAiResponse>()
                .map_err(|e| self.failure(format!("invalid response: {}", e)))?
                .choices
                .into_iter()
                .next()
                .and_then(|c| c.message.content)
                .unwrap_or_default(),
        };

        if text.trim().is_empty() {
            return Err(self.failure("empty completion".to_string()));
        }
        Ok(text)
    }

    #[cfg(not(feature = "llm-http"))]
    fn send(&self, _request: &ProviderRequest) -> Result<String> {
        Err(AudioChatError::ProviderUnavailable {
            reason: "HTTP provider support not compiled. Build with --features llm-http"
                .to_string(),
        })
    }

    fn failure(&self, reason: String) -> AudioChatError {
        AudioChatError::Provider {
            provider: self.name().to_string(),
            reason,
        }
    }
}

impl LanguageModelProvider for HttpProvider {
    fn name(&self) -> &str {
        self.kind.as_str()
    }

    fn complete(&self, request: &ProviderRequest) -> Result<String> {
        self.send(request)
    }
}

// ============================================================================
// Mock Provider
// ============================================================================

/// Scripted reply for `MockProvider`
#[derive(Debug, Clone, PartialEq)]
pub enum MockReply {
    Text(String),
    Fail(String),
    /// Answer with the text after sleeping
    Delayed(Duration, String),
}

/// Provider returning scripted replies in order; the last reply repeats
#[derive(Debug)]
pub struct MockProvider {
    replies: Mutex<VecDeque<MockReply>>,
    calls: AtomicUsize,
    last_request: Mutex<Option<ProviderRequest>>,
}

impl MockProvider {
    pub fn new(replies: Vec<MockReply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            calls: AtomicUsize::new(0),
            last_request: Mutex::new(None),
        }
    }

    pub fn text(reply: impl Into<String>) -> Self {
        Self::new(vec![MockReply::Text(reply.into())])
    }

    pub fn failing(reason: impl Into<String>) -> Self {
        Self::new(vec![MockReply::Fail(reason.into())])
    }

    /// Number of `complete` calls so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<ProviderRequest> {
        self.last_request.lock().ok().and_then(|r| r.clone())
    }

    fn next_reply(&self) -> Option<MockReply> {
        let mut replies = self.replies.lock().ok()?;
        if replies.len() > 1 {
            replies.pop_front()
        } else {
            replies.front().cloned()
        }
    }
}

impl LanguageModelProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn complete(&self, request: &ProviderRequest) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut last) = self.last_request.lock() {
            *last = Some(request.clone());
        }
        match self.next_reply() {
            Some(MockReply::Text(text)) => Ok(text),
            Some(MockReply::Delayed(delay, text)) => {
                thread::sleep(delay);
                Ok(text)
            }
            Some(MockReply::Fail(reason)) => Err(AudioChatError::Provider {
                provider: "mock".to_string(),
                reason,
            }),
            None => Err(AudioChatError::ProviderUnavailable {
                reason: "mock provider has no scripted replies".to_string(),
            }),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn request() -> ProviderRequest {
        ProviderRequest {
            system: "sys".to_string(),
            prompt: "make it louder".to_string(),
            schema: Value::Null,
            temperature: 0.2,
        }
    }

    #[test]
    fn test_mock_replies_in_order_last_repeats() {
        let mock = MockProvider::new(vec![
            MockReply::Fail("rate limited".to_string()),
            MockReply::Text("[]".to_string()),
        ]);
        assert!(mock.complete(&request()).is_err());
        assert_eq!(mock.complete(&request()).unwrap(), "[]");
        assert_eq!(mock.complete(&request()).unwrap(), "[]");
        assert_eq!(mock.calls(), 3);
        assert_eq!(mock.last_request().unwrap().prompt, "make it louder");
    }

    #[test]
    fn test_provider_kind_parse() {
        assert_eq!(ProviderKind::parse("OpenAI"), Some(ProviderKind::OpenAi));
        assert_eq!(ProviderKind::parse("anthropic"), Some(ProviderKind::Anthropic));
        assert_eq!(ProviderKind::parse("Gemini"), Some(ProviderKind::Google));
        assert_eq!(ProviderKind::parse("none"), Some(ProviderKind::None));
        assert_eq!(ProviderKind::parse("llama"), None);
    }

    #[test]
    fn test_disabled_config_builds_no_provider() {
        assert!(HttpProvider::from_config(&ProviderConfig::disabled()).is_none());
    }

    #[test]
    fn test_http_provider_defaults() {
        let config = ProviderConfig {
            kind: ProviderKind::Anthropic,
            base_url: Some("http://localhost:9000/".to_string()),
            ..Default::default()
        };
        let provider = HttpProvider::new(ProviderKind::Anthropic, "key", &config);
        assert_eq!(provider.model(), "claude-3-5-haiku-latest");
        assert_eq!(provider.endpoint(), "http://localhost:9000/v1/messages");
        assert!(!format!("{:?}", provider).contains("api_key"));
    }

    #[test]
    fn test_google_endpoint_and_wire_format() {
        let config = ProviderConfig {
            kind: ProviderKind::Google,
            ..Default::default()
        };
        let provider = HttpProvider::new(ProviderKind::Google, "key", &config);
        assert_eq!(provider.name(), "google");
        assert_eq!(
            provider.endpoint(),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-1.5-flash:generateContent"
        );

        let body = serde_json::to_value(GeminiRequest {
            system_instruction: GeminiSystem {
                parts: vec![GeminiTextPart { text: "sys" }],
            },
            contents: vec![GeminiContent {
                role: "user",
                parts: vec![GeminiTextPart { text: "add reverb" }],
            }],
            generation_config: GeminiGenerationConfig {
                temperature: 0.5,
                max_output_tokens: MAX_OUTPUT_TOKENS,
            },
        })
        .unwrap();
        assert_eq!(body["contents"][0]["parts"][0]["text"], "add reverb");
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "sys");
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 1024);

        let reply: GeminiResponse = serde_json::from_str(
            r#"{"candidates": [{"content": {"parts": [{"text": "[{\"type\": "}, {"text": "\"gain\"}]"}]}}]}"#,
        )
        .unwrap();
        let text: String = reply.candidates[0]
            .content
            .as_ref()
            .unwrap()
            .parts
            .iter()
            .filter_map(|p| p.text.clone())
            .collect();
        assert_eq!(text, r#"[{"type": "gain"}]"#);
    }

    #[test]
    fn test_config_validation() {
        assert!(ProviderConfig::default().validate().is_ok());
        let config = ProviderConfig {
            timeout_ms: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_serde_defaults() {
        let config: ProviderConfig = serde_json::from_str(r#"{"kind": "anthropic"}"#).unwrap();
        assert_eq!(config.kind, ProviderKind::Anthropic);
        assert_eq!(config.timeout_ms, DEFAULT_PROVIDER_TIMEOUT_MS);
    }
}
