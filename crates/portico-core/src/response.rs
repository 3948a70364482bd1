use serde::{Deserialize, Serialize};

use crate::message::ToolCall;

/// Why the model stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
}

/// Token usage with the gateway's floor clamps applied.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_tokens_details: Option<PromptTokensDetails>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PromptTokensDetails {
    pub cached_tokens: u32,
}

impl Usage {
    /// Build a usage block from raw provider counts, applying the
    /// invariants: `prompt_tokens >= 1`, `total_tokens >= 1`, and a
    /// missing total is reconstructed as prompt + completion + reasoning.
    pub fn from_counts(
        prompt: u32,
        completion: u32,
        total: Option<u32>,
        reasoning: Option<u32>,
        cached: Option<u32>,
    ) -> Self {
        let prompt_tokens = prompt.max(1);
        let total_tokens = total
            .unwrap_or(prompt_tokens + completion + reasoning.unwrap_or(0))
            .max(1);
        Self {
            prompt_tokens,
            completion_tokens: completion,
            total_tokens,
            reasoning_tokens: reasoning,
            prompt_tokens_details: cached
                .filter(|c| *c > 0)
                .map(|cached_tokens| PromptTokensDetails { cached_tokens }),
        }
    }

    pub fn cached_tokens(&self) -> u32 {
        self.prompt_tokens_details
            .as_ref()
            .map(|d| d.cached_tokens)
            .unwrap_or(0)
    }
}

/// The assistant message inside a choice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistantMessage {
    pub role: String,
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,
}

impl AssistantMessage {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".into(),
            content: Some(content.into()),
            reasoning: None,
            tool_calls: vec![],
            images: vec![],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Choice {
    pub index: u32,
    pub message: AssistantMessage,
    pub finish_reason: FinishReason,
}

/// Routing metadata attached to every response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponseMetadata {
    pub requested_model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requested_provider: Option<String>,
    pub used_model: String,
    pub used_provider: String,
    /// The provider's own model name actually invoked.
    pub underlying_used_model: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub cache_hit: bool,
}

/// The normalized buffered response — OpenAI chat-completion shape plus
/// `reasoning`, `images`, and a `metadata` block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub id: String,
    pub object: String,
    /// Unix seconds.
    pub created: i64,
    /// Echoed as `provider/baseModel`.
    pub model: String,
    pub choices: Vec<Choice>,
    pub usage: Usage,
    pub metadata: ResponseMetadata,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usage_floor_on_zero_counts() {
        let u = Usage::from_counts(0, 0, Some(0), None, None);
        assert_eq!(u.prompt_tokens, 1);
        assert_eq!(u.total_tokens, 1);
    }

    #[test]
    fn test_usage_total_reconstructed() {
        let u = Usage::from_counts(2, 3, None, Some(4), None);
        assert_eq!(u.total_tokens, 9);
    }

    #[test]
    fn test_usage_cached_tokens_surface() {
        let u = Usage::from_counts(10, 2, None, None, Some(8));
        assert_eq!(u.cached_tokens(), 8);
        let u = Usage::from_counts(10, 2, None, None, Some(0));
        assert!(u.prompt_tokens_details.is_none());
    }

    #[test]
    fn test_finish_reason_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&FinishReason::ToolCalls).unwrap(),
            "\"tool_calls\""
        );
    }
}
