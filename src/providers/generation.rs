use crate::config::ProviderConfig;
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("generation provider unavailable: {0}")]
    Unavailable(String),
    #[error("generation provider returned unexpected response: {0}")]
    BadResponse(String),
}

#[derive(Debug, Clone)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

#[derive(Debug, Clone)]
pub struct GenerationParams {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: usize,
}

#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, prompt: Prompt, params: GenerationParams) -> Result<String, GenerationError>;

    /// Default: streaming is not supported; callers fall back to `generate`
    /// and synthesize a single chunk. Mirrors the provider-abstraction
    /// pattern of defaulting unsupported capabilities rather than requiring
    /// every implementor to hand-roll a rejection.
    async fn generate_stream(
        &self,
        prompt: Prompt,
        params: GenerationParams,
    ) -> Result<BoxStream<'static, Result<String, GenerationError>>, GenerationError> {
        let text = self.generate(prompt, params).await?;
        Ok(Box::pin(futures_util::stream::once(async move { Ok(text) })))
    }
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: usize,
    stream: bool,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

/// Thin HTTP client against an OpenAI-compatible `/chat/completions` endpoint.
pub struct HttpGenerator {
    client: reqwest::Client,
    config: ProviderConfig,
}

impl HttpGenerator {
    pub fn new(config: ProviderConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap_or_default();
        Self { client, config }
    }
}

#[async_trait]
impl Generator for HttpGenerator {
    async fn generate(&self, prompt: Prompt, params: GenerationParams) -> Result<String, GenerationError> {
        let mut request = self
            .client
            .post(format!("{}/chat/completions", self.config.endpoint))
            .json(&ChatRequest {
                model: &params.model,
                messages: vec![
                    ChatMessage { role: "system", content: &prompt.system },
                    ChatMessage { role: "user", content: &prompt.user },
                ],
                temperature: params.temperature,
                max_tokens: params.max_tokens,
                stream: false,
            });
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| GenerationError::Unavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(GenerationError::Unavailable(format!(
                "status {}",
                response.status()
            )));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| GenerationError::BadResponse(e.to_string()))?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| GenerationError::BadResponse("no choices returned".into()))
    }
}

/// Scriptable, network-free generator used in tests (S4/S5 scenarios):
/// returns a fixed string, or replays a fixed sequence of chunks when
/// streamed.
#[cfg(any(test, feature = "test-support"))]
pub struct StubGenerator {
    pub chunks: Vec<String>,
}

#[cfg(any(test, feature = "test-support"))]
impl StubGenerator {
    pub fn from_text(text: &str) -> Self {
        Self { chunks: vec![text.to_string()] }
    }
}

#[cfg(any(test, feature = "test-support"))]
#[async_trait]
impl Generator for StubGenerator {
    async fn generate(&self, _prompt: Prompt, _params: GenerationParams) -> Result<String, GenerationError> {
        Ok(self.chunks.concat())
    }

    async fn generate_stream(
        &self,
        _prompt: Prompt,
        _params: GenerationParams,
    ) -> Result<BoxStream<'static, Result<String, GenerationError>>, GenerationError> {
        let chunks = self.chunks.clone();
        Ok(Box::pin(futures_util::stream::iter(
            chunks.into_iter().map(Ok),
        )))
    }
}
