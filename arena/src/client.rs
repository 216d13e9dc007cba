//! Model client: one outbound chat-completions call per `generate`.
//!
//! The engine only depends on the [`ModelClient`] trait. Every failure mode
//! of a call collapses into [`GenerationFailure`]; retries are the phase
//! executor's business, not this layer's.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::EngineConfig;
use crate::error::{ArenaError, ArenaResult, GenerationFailure};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }
}

/// Input of a single generation call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub system_prompt: String,
    /// Conversation context following the system prompt.
    pub context: Vec<ChatMessage>,
    pub model_id: String,
    pub max_tokens: u32,
}

impl GenerationRequest {
    pub fn new(
        system_prompt: impl Into<String>,
        context: Vec<ChatMessage>,
        model_id: impl Into<String>,
        max_tokens: u32,
    ) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            context,
            model_id: model_id.into(),
            max_tokens,
        }
    }

    /// System prompt followed by the context, as sent on the wire.
    pub fn messages(&self) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(self.context.len() + 1);
        messages.push(ChatMessage::system(self.system_prompt.clone()));
        messages.extend(self.context.iter().cloned());
        messages
    }

    /// Text of the last user message, handy for scripted clients.
    pub fn last_user_content(&self) -> &str {
        self.context
            .iter()
            .rev()
            .find(|m| m.role == ChatRole::User)
            .map(|m| m.content.as_str())
            .unwrap_or("")
    }
}

/// Capability to turn a prompt into text.
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn generate(&self, request: GenerationRequest) -> Result<String, GenerationFailure>;
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
    stream: bool,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

/// Client for an OpenAI-style `chat/completions` endpoint.
pub struct ChatCompletionsClient {
    http: reqwest::Client,
    url: String,
    probe_url: String,
    config: EngineConfig,
}

impl ChatCompletionsClient {
    pub fn new(config: &EngineConfig) -> ArenaResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| ArenaError::Configuration(format!("http client: {}", e)))?;

        Ok(Self {
            http,
            url: config.completions_url(),
            probe_url: format!("{}/v1/config", config.base_url.trim_end_matches('/')),
            config: config.clone(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Check the endpoint is reachable. Any HTTP response counts.
    pub async fn probe(&self) -> Result<u16, GenerationFailure> {
        let response = self
            .http
            .get(&self.probe_url)
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .map_err(|e| GenerationFailure::new(format!("probe failed: {}", e)))?;
        Ok(response.status().as_u16())
    }
}

#[async_trait]
impl ModelClient for ChatCompletionsClient {
    async fn generate(&self, request: GenerationRequest) -> Result<String, GenerationFailure> {
        if request.model_id.trim().is_empty() {
            return Err(GenerationFailure::new("model id must not be empty"));
        }

        let body = ChatRequest {
            model: &request.model_id,
            messages: request.messages(),
            max_tokens: self.config.clamp_max_tokens(request.max_tokens),
            temperature: self.config.temperature,
            stream: false,
        };

        let mut builder = self.http.post(&self.url).json(&body);
        if let Some(key) = &self.config.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                GenerationFailure::new(format!("request timed out: {}", e))
            } else {
                GenerationFailure::new(format!("request failed: {}", e))
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(GenerationFailure::new(format!(
                "endpoint returned HTTP {}: {}",
                status.as_u16(),
                detail.trim()
            )));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| GenerationFailure::new(format!("malformed response body: {}", e)))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| GenerationFailure::new("response has no message content"))?;

        debug!(model = %request.model_id, chars = content.len(), "generation succeeded");
        Ok(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_prepend_system() {
        let req = GenerationRequest::new(
            "be brief",
            vec![ChatMessage::user("hi")],
            "m1",
            64,
        );
        let messages = req.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, ChatRole::System);
        assert_eq!(messages[1].content, "hi");
        assert_eq!(req.last_user_content(), "hi");
    }

    #[test]
    fn test_role_serializes_lowercase() {
        let json = serde_json::to_value(ChatMessage::system("x")).unwrap();
        assert_eq!(json["role"], "system");
    }

    #[test]
    fn test_client_urls() {
        let config = EngineConfig {
            base_url: "http://ovms:8000/".into(),
            ..Default::default()
        };
        let client = ChatCompletionsClient::new(&config).unwrap();
        assert_eq!(client.url(), "http://ovms:8000/v3/chat/completions");
        assert_eq!(client.probe_url, "http://ovms:8000/v1/config");
    }
}
