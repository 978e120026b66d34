use async_trait::async_trait;
use thiserror::Error;

use super::types::{ChatCompletionRequest, ChatCompletionResponse};

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum LlmError {
    #[error("llm request failed: {0}")]
    Request(String),

    #[error("llm returned no content")]
    EmptyResponse,
}

pub type LlmResult<T> = Result<T, LlmError>;

/// Oracle client for the external LLM service.
///
/// Grounded on the kernel's `LLMProvider` trait, trimmed to the one
/// operation the planner and the analysis actions need.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn chat(&self, request: ChatCompletionRequest) -> LlmResult<ChatCompletionResponse>;
}

/// Strip a ```json fence (or a bare ``` fence) from an LLM response before
/// parsing it as JSON. LLMs asked for strict JSON-object mode still
/// occasionally wrap the payload in a markdown code fence.
pub fn extract_json(raw: &str) -> &str {
    let trimmed = raw.trim();
    if let Some(rest) = trimmed.strip_prefix("```json") {
        rest.trim().strip_suffix("```").unwrap_or(rest).trim()
    } else if let Some(rest) = trimmed.strip_prefix("```") {
        rest.trim().strip_suffix("```").unwrap_or(rest).trim()
    } else {
        trimmed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_json_passes_through_bare_json() {
        assert_eq!(extract_json(r#"{"a":1}"#), r#"{"a":1}"#);
    }

    #[test]
    fn extract_json_strips_json_fence() {
        let wrapped = "```json\n{\"a\":1}\n```";
        assert_eq!(extract_json(wrapped), "{\"a\":1}");
    }

    #[test]
    fn extract_json_strips_bare_fence() {
        let wrapped = "```\n{\"a\":1}\n```";
        assert_eq!(extract_json(wrapped), "{\"a\":1}");
    }
}
