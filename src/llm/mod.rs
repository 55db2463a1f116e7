//! Model provider abstraction.
//!
//! The orchestrator issues three call shapes: plain text completions
//! (planning, titles, responses, per-file content) and tool-augmented chat
//! turns (the code agent). `ModelClient` is the seam — the real
//! implementation is [`anthropic::AnthropicClient`]; tests substitute
//! scripted doubles.

pub mod anthropic;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::WorkflowError;

/// Message author role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// A single block of message content, mirroring the messages-API wire shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
    },
}

/// One conversation message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: Vec<ContentBlock>,
}

impl ChatMessage {
    pub fn text(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            content: vec![ContentBlock::Text { text: text.into() }],
        }
    }
}

/// Declaration of a tool the model may invoke.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDef {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// A plain text completion request.
#[derive(Debug, Clone)]
pub struct TextRequest {
    pub model: String,
    pub system: String,
    pub prompt: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// A tool-augmented chat turn request.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub system: String,
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<ToolDef>,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// Abstraction over the model provider for testability.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Issue a completion whose output is consumed as raw text.
    async fn complete(&self, request: TextRequest) -> Result<String, WorkflowError>;

    /// Issue one agent turn; the returned blocks may interleave text and
    /// tool invocations.
    async fn chat(&self, request: ChatRequest) -> Result<Vec<ContentBlock>, WorkflowError>;
}

/// Join the text segments of a block list into one string, or `None` if the
/// blocks contain no text at all. Models sometimes return a single answer
/// split across several text blocks.
pub fn joined_text(blocks: &[ContentBlock]) -> Option<String> {
    let parts: Vec<&str> = blocks
        .iter()
        .filter_map(|block| match block {
            ContentBlock::Text { text } => Some(text.as_str()),
            _ => None,
        })
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join(""))
    }
}

/// Extract the tool invocations from a block list, in order.
pub fn tool_uses(blocks: &[ContentBlock]) -> Vec<(&str, &str, &serde_json::Value)> {
    blocks
        .iter()
        .filter_map(|block| match block {
            ContentBlock::ToolUse { id, name, input } => {
                Some((id.as_str(), name.as_str(), input))
            }
            _ => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joined_text_merges_segments() {
        let blocks = vec![
            ContentBlock::Text {
                text: "Hello ".into(),
            },
            ContentBlock::ToolUse {
                id: "t1".into(),
                name: "terminal".into(),
                input: serde_json::json!({"command": "ls"}),
            },
            ContentBlock::Text {
                text: "world".into(),
            },
        ];
        assert_eq!(joined_text(&blocks).as_deref(), Some("Hello world"));
    }

    #[test]
    fn joined_text_none_without_text_blocks() {
        let blocks = vec![ContentBlock::ToolUse {
            id: "t1".into(),
            name: "listFiles".into(),
            input: serde_json::json!({}),
        }];
        assert!(joined_text(&blocks).is_none());
    }

    #[test]
    fn tool_uses_preserves_order() {
        let blocks = vec![
            ContentBlock::ToolUse {
                id: "a".into(),
                name: "readFiles".into(),
                input: serde_json::json!({"paths": ["x"]}),
            },
            ContentBlock::Text { text: "…".into() },
            ContentBlock::ToolUse {
                id: "b".into(),
                name: "terminal".into(),
                input: serde_json::json!({"command": "pwd"}),
            },
        ];
        let uses = tool_uses(&blocks);
        assert_eq!(uses.len(), 2);
        assert_eq!(uses[0].1, "readFiles");
        assert_eq!(uses[1].0, "b");
    }

    #[test]
    fn content_block_round_trips_through_json() {
        let block = ContentBlock::ToolUse {
            id: "t1".into(),
            name: "createOrUpdateFiles".into(),
            input: serde_json::json!({"files": []}),
        };
        let json = serde_json::to_string(&block).unwrap();
        assert!(json.contains(r#""type":"tool_use""#));
        let back: ContentBlock = serde_json::from_str(&json).unwrap();
        assert!(matches!(back, ContentBlock::ToolUse { .. }));
    }
}
