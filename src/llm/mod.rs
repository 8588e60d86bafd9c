//! LLM access: a structured-query trait, typed response schemas and an
//! OpenAI-compatible client.

mod client;
mod schema;
mod types;

pub use client::OpenAiClient;
pub use schema::{ChangeType, FileChange, FilesResponse, PullRequestPlan, ResponseSchema};
pub use types::{
    ChatCompletionRequest, ChatCompletionResponse, ChatMessage, ChatRole, ResponseFormat,
};

use async_trait::async_trait;

use crate::error::{LlmError, LlmResult};

/// A model endpoint that answers with JSON matching a given schema.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Send `messages` and return the raw JSON text of the answer.
    ///
    /// Refusals, truncation and unusable output are errors, never retried.
    async fn structured_query(
        &self,
        model: &str,
        messages: &[ChatMessage],
        format: &ResponseFormat,
    ) -> LlmResult<String>;
}

/// Run a structured query and decode the answer into `T`.
pub async fn perform_structured_query<T: ResponseSchema>(
    client: &dyn LlmClient,
    model: &str,
    messages: &[ChatMessage],
) -> LlmResult<T> {
    let raw = client
        .structured_query(model, messages, &T::response_format())
        .await?;
    serde_json::from_str(&raw).map_err(|e| LlmError::MalformedOutput {
        message: format!("answer does not match {}: {}", T::NAME, e),
    })
}
