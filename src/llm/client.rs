use async_trait::async_trait;
use reqwest::Client;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

use super::types::{ChatCompletionRequest, ChatCompletionResponse, ChatMessage, ResponseFormat};
use super::LlmClient;
use crate::config::{OpenAiConfig, RequestConfig};
use crate::error::{AppResult, LlmError, LlmResult};

/// Client for OpenAI-compatible chat completions with structured outputs
#[derive(Clone)]
pub struct OpenAiClient {
    client: Client,
    base_url: String,
    api_key: String,
    timeout_ms: u64,
}

impl OpenAiClient {
    /// Create a new client; fails when no API key is configured
    pub fn new(config: &OpenAiConfig, request_config: &RequestConfig) -> AppResult<Self> {
        let api_key = config.require_api_key()?.to_string();
        let client = Client::builder()
            .timeout(Duration::from_millis(request_config.timeout_ms))
            .build()
            .map_err(LlmError::Http)?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            timeout_ms: request_config.timeout_ms,
        })
    }

    /// Get the base URL (for testing)
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Execute a single request (internal)
    async fn execute_request(
        &self,
        request: &ChatCompletionRequest,
    ) -> LlmResult<ChatCompletionResponse> {
        let url = format!("{}/chat/completions", self.base_url);
        debug!(
            model = %request.model,
            schema = %request.response_format.json_schema.name,
            messages = request.messages.len(),
            "Calling chat completions"
        );

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout {
                        timeout_ms: self.timeout_ms,
                    }
                } else {
                    LlmError::Http(e)
                }
            })?;

        let status = response.status();

        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(LlmError::Api {
                status: status.as_u16(),
                message: error_body,
            });
        }

        response
            .json()
            .await
            .map_err(|e| LlmError::MalformedOutput {
                message: format!("Failed to parse response: {}", e),
            })
    }
}

/// Pull the structured content out of a completion, classifying failures
fn completion_content(response: ChatCompletionResponse) -> LlmResult<String> {
    let Some(choice) = response.choices.into_iter().next() else {
        return Err(LlmError::MalformedOutput {
            message: "response contained no choices".to_string(),
        });
    };

    if let Some(refusal) = choice.message.as_ref().and_then(|m| m.refusal.clone()) {
        return Err(LlmError::Refused { message: refusal });
    }

    match choice.finish_reason.as_deref() {
        Some("length") => Err(LlmError::TooLong {
            message: "completion stopped at the token limit".to_string(),
        }),
        Some("content_filter") => Err(LlmError::Refused {
            message: "completion blocked by the content filter".to_string(),
        }),
        Some("stop") | None => choice
            .message
            .and_then(|m| m.content)
            .ok_or_else(|| LlmError::MalformedOutput {
                message: "completion has no content".to_string(),
            }),
        Some(other) => Err(LlmError::MalformedOutput {
            message: format!("unexpected finish reason '{}'", other),
        }),
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn structured_query(
        &self,
        model: &str,
        messages: &[ChatMessage],
        format: &ResponseFormat,
    ) -> LlmResult<String> {
        let request = ChatCompletionRequest::new(model, messages.to_vec(), format);
        let start = Instant::now();

        let result = self.execute_request(&request).await.and_then(completion_content);
        match &result {
            Ok(_) => info!(
                model = %model,
                schema = %format.name,
                latency_ms = start.elapsed().as_millis(),
                "Structured query succeeded"
            ),
            Err(e) => error!(
                model = %model,
                schema = %format.name,
                error = %e,
                latency_ms = start.elapsed().as_millis(),
                "Structured query failed"
            ),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::types::{Choice, ResponseMessage};

    fn response(finish: Option<&str>, content: Option<&str>, refusal: Option<&str>) -> ChatCompletionResponse {
        ChatCompletionResponse {
            id: Some("chatcmpl-1".to_string()),
            choices: vec![Choice {
                finish_reason: finish.map(str::to_string),
                message: Some(ResponseMessage {
                    content: content.map(str::to_string),
                    refusal: refusal.map(str::to_string),
                }),
            }],
            usage: None,
        }
    }

    #[test]
    fn test_stop_returns_content() {
        let content = completion_content(response(Some("stop"), Some("{}"), None)).unwrap();
        assert_eq!(content, "{}");
    }

    #[test]
    fn test_refusal_wins_over_finish_reason() {
        let err = completion_content(response(Some("stop"), None, Some("no"))).unwrap_err();
        assert!(matches!(err, LlmError::Refused { .. }));
    }

    #[test]
    fn test_length_is_too_long() {
        let err = completion_content(response(Some("length"), Some("{\"fil"), None)).unwrap_err();
        assert!(matches!(err, LlmError::TooLong { .. }));
    }

    #[test]
    fn test_no_choices_is_malformed() {
        let empty = ChatCompletionResponse {
            id: None,
            choices: vec![],
            usage: None,
        };
        assert!(matches!(
            completion_content(empty),
            Err(LlmError::MalformedOutput { .. })
        ));
    }
}
