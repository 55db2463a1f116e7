//! Messages-API client for the Anthropic model provider.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use super::{ChatMessage, ChatRequest, ContentBlock, ModelClient, Role, TextRequest};
use crate::config::ModelSettings;
use crate::errors::WorkflowError;

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// HTTP client against a messages-style completion API.
pub struct AnthropicClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: Option<ErrorBody>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

impl AnthropicClient {
    pub fn new(settings: &ModelSettings) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            api_key: settings.api_key.clone().unwrap_or_default(),
        }
    }

    async fn post_messages(&self, body: serde_json::Value) -> Result<Vec<ContentBlock>, WorkflowError> {
        let response = self
            .http
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| WorkflowError::Model(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response
                .json::<ErrorResponse>()
                .await
                .ok()
                .and_then(|e| e.error)
                .map(|e| e.message)
                .unwrap_or_else(|| "no error detail".to_string());
            return Err(WorkflowError::Model(format!(
                "provider returned {}: {}",
                status, detail
            )));
        }

        let parsed: MessagesResponse = response
            .json()
            .await
            .map_err(|e| WorkflowError::Model(format!("invalid response body: {}", e)))?;
        Ok(parsed.content)
    }

    fn wire_messages(messages: &[ChatMessage]) -> Vec<serde_json::Value> {
        messages
            .iter()
            .map(|m| {
                json!({
                    "role": match m.role {
                        Role::User => "user",
                        Role::Assistant => "assistant",
                    },
                    "content": m.content,
                })
            })
            .collect()
    }
}

#[async_trait]
impl ModelClient for AnthropicClient {
    async fn complete(&self, request: TextRequest) -> Result<String, WorkflowError> {
        let body = json!({
            "model": request.model,
            "max_tokens": request.max_tokens,
            "system": request.system,
            "temperature": request.temperature,
            "messages": [{"role": "user", "content": request.prompt}],
        });
        let blocks = self.post_messages(body).await?;
        super::joined_text(&blocks)
            .ok_or_else(|| WorkflowError::Model("completion contained no text".to_string()))
    }

    async fn chat(&self, request: ChatRequest) -> Result<Vec<ContentBlock>, WorkflowError> {
        let body = json!({
            "model": request.model,
            "max_tokens": request.max_tokens,
            "system": request.system,
            "temperature": request.temperature,
            "tools": request.tools,
            "messages": Self::wire_messages(&request.messages),
        });
        self.post_messages(body).await
    }
}
