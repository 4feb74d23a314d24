use crate::conversation::{ConversationTurn, Role};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sshpilot_config::AiConfig;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("ai request failed: {0}")]
    Http(String),
    #[error("ai error {status}: {body}")]
    Status { status: u16, body: String },
    #[error("ai returned an empty response")]
    EmptyResponse,
    #[error("unknown ai provider: {0}")]
    UnknownProvider(String),
    #[error("ai request timed out after {0} ms")]
    Timeout(u64),
    #[error("ai provider misconfigured: {0}")]
    Misconfigured(String),
}

#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn complete(&self, turns: Vec<ConversationTurn>) -> Result<String, ProviderError>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProviderKind {
    OpenAi,
    Ollama,
    Anthropic,
}

impl ProviderKind {
    pub fn parse(name: &str) -> Result<Self, ProviderError> {
        match name.trim().to_lowercase().as_str() {
            "openai" | "openai-compatible" | "openrouter" => Ok(ProviderKind::OpenAi),
            "ollama" => Ok(ProviderKind::Ollama),
            "anthropic" => Ok(ProviderKind::Anthropic),
            _ => Err(ProviderError::UnknownProvider(name.to_string())),
        }
    }
}

fn requires_api_key(name: &str) -> bool {
    matches!(
        name.trim().to_lowercase().as_str(),
        "openai" | "openrouter" | "anthropic"
    )
}

#[derive(Clone)]
pub struct HttpCompletionProvider {
    client: reqwest::Client,
    kind: ProviderKind,
    endpoint: String,
    api_key: Option<String>,
    model: String,
    temperature: f32,
    max_tokens: u32,
    timeout_ms: u64,
}

impl std::fmt::Debug for HttpCompletionProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpCompletionProvider")
            .field("kind", &self.kind)
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl HttpCompletionProvider {
    pub fn from_config(cfg: &AiConfig) -> Result<Self, ProviderError> {
        let kind = ProviderKind::parse(&cfg.provider)?;
        if cfg.endpoint.trim().is_empty() {
            return Err(ProviderError::Misconfigured("endpoint is empty".to_string()));
        }
        if cfg.model.trim().is_empty() {
            return Err(ProviderError::Misconfigured("model is empty".to_string()));
        }
        let api_key = cfg
            .api_key
            .as_ref()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());
        if api_key.is_none() && requires_api_key(&cfg.provider) {
            return Err(ProviderError::Misconfigured(format!(
                "{} needs an api key (set ai.api_key or OPENAI_API_KEY)",
                cfg.provider
            )));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(cfg.timeout_ms))
            .build()
            .map_err(|e| ProviderError::Http(e.to_string()))?;
        Ok(Self {
            client,
            kind,
            endpoint: cfg.endpoint.trim().trim_end_matches('/').to_string(),
            api_key,
            model: cfg.model.clone(),
            temperature: cfg.temperature,
            max_tokens: cfg.max_tokens,
            timeout_ms: cfg.timeout_ms,
        })
    }

    pub fn kind(&self) -> ProviderKind {
        self.kind
    }

    fn map_send_error(&self, err: reqwest::Error) -> ProviderError {
        if err.is_timeout() {
            ProviderError::Timeout(self.timeout_ms)
        } else {
            ProviderError::Http(err.to_string())
        }
    }

    async fn check_status(&self, resp: reqwest::Response) -> Result<reqwest::Response, ProviderError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        warn!(status = status.as_u16(), "ai provider returned an error status");
        Err(ProviderError::Status {
            status: status.as_u16(),
            body,
        })
    }

    async fn request_openai(&self, messages: Vec<ChatMessage>) -> Result<String, ProviderError> {
        let url = format!("{}/v1/chat/completions", self.endpoint);
        let body = OpenAiRequest {
            model: self.model.clone(),
            messages,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            stream: false,
        };
        let mut req = self.client.post(url).json(&body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        let resp = req.send().await.map_err(|e| self.map_send_error(e))?;
        let resp = self.check_status(resp).await?;
        let data: OpenAiResponse = resp.json().await.map_err(|e| self.map_send_error(e))?;
        data.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or(ProviderError::EmptyResponse)
    }

    async fn request_ollama(&self, messages: Vec<ChatMessage>) -> Result<String, ProviderError> {
        let url = format!("{}/api/chat", self.endpoint);
        let body = OllamaRequest {
            model: self.model.clone(),
            messages,
            stream: false,
            options: OllamaOptions {
                temperature: self.temperature,
                num_predict: self.max_tokens,
            },
        };
        let resp = self
            .client
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;
        let resp = self.check_status(resp).await?;
        let data: OllamaResponse = resp.json().await.map_err(|e| self.map_send_error(e))?;
        data.message
            .map(|m| m.content)
            .ok_or(ProviderError::EmptyResponse)
    }

    async fn request_anthropic(&self, messages: Vec<ChatMessage>) -> Result<String, ProviderError> {
        let url = format!("{}/v1/messages", self.endpoint);
        let (system, messages) = split_system_prompt(messages);
        let body = AnthropicRequest {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            messages,
            system,
            stream: false,
        };
        let mut req = self.client.post(url).json(&body);
        if let Some(key) = &self.api_key {
            req = req.header("x-api-key", key);
        }
        req = req.header("anthropic-version", "2023-06-01");
        let resp = req.send().await.map_err(|e| self.map_send_error(e))?;
        let resp = self.check_status(resp).await?;
        let data: AnthropicResponse = resp.json().await.map_err(|e| self.map_send_error(e))?;
        let text: String = data.content.into_iter().filter_map(|c| c.text).collect();
        Ok(text)
    }
}

#[async_trait]
impl CompletionProvider for HttpCompletionProvider {
    async fn complete(&self, turns: Vec<ConversationTurn>) -> Result<String, ProviderError> {
        let messages: Vec<ChatMessage> = turns.into_iter().map(ChatMessage::from).collect();
        debug!(provider = ?self.kind, model = %self.model, turns = messages.len(), "ai request");
        let content = match self.kind {
            ProviderKind::OpenAi => self.request_openai(messages).await?,
            ProviderKind::Ollama => self.request_ollama(messages).await?,
            ProviderKind::Anthropic => self.request_anthropic(messages).await?,
        };
        let content = content.trim();
        if content.is_empty() {
            return Err(ProviderError::EmptyResponse);
        }
        Ok(content.to_string())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

impl From<ConversationTurn> for ChatMessage {
    fn from(turn: ConversationTurn) -> Self {
        Self {
            role: turn.role.as_str().to_string(),
            content: turn.content,
        }
    }
}

#[derive(Serialize)]
struct OpenAiRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
    stream: bool,
}

#[derive(Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
}

#[derive(Deserialize)]
struct OpenAiMessage {
    content: Option<String>,
}

#[derive(Serialize)]
struct OllamaRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Serialize)]
struct OllamaOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Deserialize)]
struct OllamaResponse {
    message: Option<OllamaMessage>,
}

#[derive(Deserialize)]
struct OllamaMessage {
    content: String,
}

#[derive(Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    temperature: f32,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    stream: bool,
}

#[derive(Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContent>,
}

#[derive(Deserialize)]
struct AnthropicContent {
    text: Option<String>,
}

fn split_system_prompt(messages: Vec<ChatMessage>) -> (Option<String>, Vec<ChatMessage>) {
    let mut system = String::new();
    let mut out = Vec::new();
    for message in messages {
        if message.role == Role::System.as_str() {
            if !system.is_empty() {
                system.push('\n');
            }
            system.push_str(&message.content);
        } else {
            out.push(message);
        }
    }
    let system = if system.trim().is_empty() {
        None
    } else {
        Some(system)
    };
    (system, out)
}
