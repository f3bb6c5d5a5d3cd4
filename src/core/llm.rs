use crate::config::{ApiKeys, ProviderConfig};
use crate::error::ProviderError;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

/// One LLM backend that can answer a field-analysis prompt with text
#[async_trait]
pub trait FieldProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn complete(&self, system: &str, prompt: &str) -> Result<String, ProviderError>;
}

/// Shared HTTP plumbing: one client, retry with exponential backoff
#[derive(Clone)]
struct HttpBackend {
    client: Client,
    attempts: u32,
    base_delay_ms: u64,
}

/// Delay before retry `attempt` (1-based): base, 2x base, 4x base, ...
/// Saturates instead of overflowing for large attempt counts.
fn backoff_delay_ms(base_delay_ms: u64, attempt: u32) -> u64 {
    base_delay_ms.saturating_mul(2_u64.saturating_pow(attempt.saturating_sub(1)))
}

impl HttpBackend {
    fn new(config: &ProviderConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            attempts: config.retry_attempts.max(1),
            base_delay_ms: config.retry_base_delay_ms,
        }
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        provider: &str,
        build: impl Fn(&Client) -> RequestBuilder,
    ) -> Result<T, ProviderError> {
        let mut last_error = None;

        for attempt in 0..self.attempts {
            if attempt > 0 {
                let delay = backoff_delay_ms(self.base_delay_ms, attempt);
                tracing::warn!(
                    "[{}] Retrying API call (attempt {}/{}) after {}ms delay",
                    provider,
                    attempt + 1,
                    self.attempts,
                    delay
                );
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }

            let response = match build(&self.client).send().await {
                Ok(resp) => resp,
                Err(e) => {
                    tracing::warn!("[{}] HTTP request failed: {}", provider, e);
                    last_error = Some(ProviderError::from(e));
                    continue;
                }
            };

            let status = response.status();
            if !status.is_success() {
                let body = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "Unknown error".to_string());
                tracing::warn!("[{}] API returned error status {}: {}", provider, status, body);
                last_error = Some(ProviderError::Api {
                    status: status.as_u16(),
                    body,
                });
                continue;
            }

            match response.json::<T>().await {
                Ok(decoded) => return Ok(decoded),
                Err(e) => {
                    tracing::warn!("[{}] Failed to decode response body: {}", provider, e);
                    last_error = Some(ProviderError::InvalidJson(e.to_string()));
                }
            }
        }

        Err(last_error.unwrap_or_else(|| ProviderError::Http("all retry attempts failed".into())))
    }
}

// ---------------------------------------------------------------------------
// OpenAI
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct OpenAIRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
    response_format: OpenAIResponseFormat,
}

#[derive(Debug, Serialize)]
struct OpenAIResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct OpenAIResponse {
    choices: Vec<OpenAIChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAIChoice {
    message: ChatMessage,
}

pub struct OpenAIProvider {
    http: HttpBackend,
    api_key: String,
    model: String,
    base_url: String,
    max_tokens: u32,
    temperature: f32,
}

impl OpenAIProvider {
    pub fn new(api_key: String, config: &ProviderConfig) -> Self {
        Self {
            http: HttpBackend::new(config),
            api_key,
            model: config.openai_model.clone(),
            base_url: config.openai_base_url.trim_end_matches('/').to_string(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        }
    }
}

#[async_trait]
impl FieldProvider for OpenAIProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn complete(&self, system: &str, prompt: &str) -> Result<String, ProviderError> {
        let request = OpenAIRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: system.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: prompt.to_string(),
                },
            ],
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            response_format: OpenAIResponseFormat { kind: "json_object" },
        };
        let url = format!("{}/chat/completions", self.base_url);

        let response: OpenAIResponse = self
            .http
            .send_json(self.name(), |client| {
                client
                    .post(&url)
                    .header("Authorization", format!("Bearer {}", self.api_key))
                    .json(&request)
            })
            .await?;

        response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or(ProviderError::EmptyResponse)
    }
}

// ---------------------------------------------------------------------------
// Anthropic
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    temperature: f32,
    system: String,
    messages: Vec<ChatMessage>,
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

pub struct AnthropicProvider {
    http: HttpBackend,
    api_key: String,
    model: String,
    base_url: String,
    max_tokens: u32,
    temperature: f32,
}

impl AnthropicProvider {
    pub fn new(api_key: String, config: &ProviderConfig) -> Self {
        Self {
            http: HttpBackend::new(config),
            api_key,
            model: config.anthropic_model.clone(),
            base_url: config.anthropic_base_url.trim_end_matches('/').to_string(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        }
    }
}

#[async_trait]
impl FieldProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn complete(&self, system: &str, prompt: &str) -> Result<String, ProviderError> {
        let request = AnthropicRequest {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            system: system.to_string(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
        };
        let url = format!("{}/messages", self.base_url);

        let response: AnthropicResponse = self
            .http
            .send_json(self.name(), |client| {
                client
                    .post(&url)
                    .header("x-api-key", &self.api_key)
                    .header("anthropic-version", "2023-06-01")
                    .json(&request)
            })
            .await?;

        let text: String = response
            .content
            .into_iter()
            .filter_map(|block| block.text)
            .collect();

        if text.trim().is_empty() {
            Err(ProviderError::EmptyResponse)
        } else {
            Ok(text)
        }
    }
}

// ---------------------------------------------------------------------------
// Gemini
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
struct GeminiPart {
    text: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiGenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
    response_mime_type: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    system_instruction: GeminiContent,
    contents: Vec<GeminiContent>,
    generation_config: GeminiGenerationConfig,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: GeminiContent,
}

pub struct GeminiProvider {
    http: HttpBackend,
    api_key: String,
    model: String,
    base_url: String,
    max_tokens: u32,
    temperature: f32,
}

impl GeminiProvider {
    pub fn new(api_key: String, config: &ProviderConfig) -> Self {
        Self {
            http: HttpBackend::new(config),
            api_key,
            model: config.gemini_model.clone(),
            base_url: config.gemini_base_url.trim_end_matches('/').to_string(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        }
    }
}

#[async_trait]
impl FieldProvider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn complete(&self, system: &str, prompt: &str) -> Result<String, ProviderError> {
        let request = GeminiRequest {
            system_instruction: GeminiContent {
                parts: vec![GeminiPart {
                    text: system.to_string(),
                }],
            },
            contents: vec![GeminiContent {
                parts: vec![GeminiPart {
                    text: prompt.to_string(),
                }],
            }],
            generation_config: GeminiGenerationConfig {
                temperature: self.temperature,
                max_output_tokens: self.max_tokens,
                response_mime_type: "application/json",
            },
        };
        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);

        let response: GeminiResponse = self
            .http
            .send_json(self.name(), |client| {
                client
                    .post(&url)
                    .query(&[("key", self.api_key.as_str())])
                    .json(&request)
            })
            .await?;

        response
            .candidates
            .into_iter()
            .next()
            .map(|c| c.content.parts.into_iter().map(|p| p.text).collect::<String>())
            .filter(|t| !t.trim().is_empty())
            .ok_or(ProviderError::EmptyResponse)
    }
}

/// Build one provider per configured API key, in a fixed order
/// (openai, anthropic, gemini).
pub fn providers_from_keys(keys: &ApiKeys, config: &ProviderConfig) -> Vec<Arc<dyn FieldProvider>> {
    let mut providers: Vec<Arc<dyn FieldProvider>> = Vec::new();

    if let Some(key) = &keys.openai {
        providers.push(Arc::new(OpenAIProvider::new(key.clone(), config)));
    }
    if let Some(key) = &keys.anthropic {
        providers.push(Arc::new(AnthropicProvider::new(key.clone(), config)));
    }
    if let Some(key) = &keys.gemini {
        providers.push(Arc::new(GeminiProvider::new(key.clone(), config)));
    }

    tracing::debug!("[Providers] {} provider(s) configured", providers.len());
    providers
}
