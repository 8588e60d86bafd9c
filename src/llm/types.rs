use serde::{Deserialize, Serialize};

use crate::storage::MessageRole;

/// Message in an LLM conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Who wrote the message.
    pub role: ChatRole,
    /// Message text.
    pub content: String,
}

/// Message role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    /// Instructions.
    System,
    /// Prompt.
    User,
    /// Model output.
    Assistant,
}

impl ChatMessage {
    /// Create a system message
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    /// Create a user message
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    /// Create an assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

impl From<ChatRole> for MessageRole {
    fn from(role: ChatRole) -> Self {
        match role {
            ChatRole::System => MessageRole::System,
            ChatRole::User => MessageRole::User,
            ChatRole::Assistant => MessageRole::Assistant,
        }
    }
}

/// Name and JSON schema a structured response must follow
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseFormat {
    /// Schema name sent with the request.
    pub name: String,
    /// JSON schema the answer must follow.
    pub schema: serde_json::Value,
}

/// Request body for the chat completions endpoint
#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub response_format: ResponseFormatSpec,
}

/// `response_format` block requesting strict JSON schema output
#[derive(Debug, Clone, Serialize)]
pub struct ResponseFormatSpec {
    #[serde(rename = "type")]
    pub format_type: String,
    pub json_schema: JsonSchemaSpec,
}

/// Named schema inside `response_format`
#[derive(Debug, Clone, Serialize)]
pub struct JsonSchemaSpec {
    pub name: String,
    pub strict: bool,
    pub schema: serde_json::Value,
}

impl ChatCompletionRequest {
    /// Build a request that asks for output matching `format`
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>, format: &ResponseFormat) -> Self {
        Self {
            model: model.into(),
            messages,
            response_format: ResponseFormatSpec {
                format_type: "json_schema".to_string(),
                json_schema: JsonSchemaSpec {
                    name: format.name.clone(),
                    strict: true,
                    schema: format.schema.clone(),
                },
            },
        }
    }
}

/// Response from the chat completions endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletionResponse {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub choices: Vec<Choice>,
    #[serde(default)]
    pub usage: Option<Usage>,
}

/// One completion choice
#[derive(Debug, Clone, Deserialize)]
pub struct Choice {
    pub finish_reason: Option<String>,
    pub message: Option<ResponseMessage>,
}

/// Assistant message inside a choice
#[derive(Debug, Clone, Deserialize)]
pub struct ResponseMessage {
    pub content: Option<String>,
    pub refusal: Option<String>,
}

/// Token usage information
#[derive(Debug, Clone, Deserialize)]
pub struct Usage {
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
    pub total_tokens: Option<u32>,
}
