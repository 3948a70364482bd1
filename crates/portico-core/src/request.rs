use serde::{Deserialize, Serialize};

use crate::error::{GatewayError, Result};
use crate::message::{ChatMessage, Role, ToolDef};

/// Stop sequences — the wire accepts a bare string or an array.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StopSequences {
    One(String),
    Many(Vec<String>),
}

impl StopSequences {
    pub fn as_vec(&self) -> Vec<String> {
        match self {
            StopSequences::One(s) => vec![s.clone()],
            StopSequences::Many(v) => v.clone(),
        }
    }
}

/// The normalized inbound chat-completion request. OpenAI chat-completions
/// shape plus routing hints (`provider`, `fallbacks`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    /// Requested model — bare id, alias, or `provider/model`.
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDef>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop: Option<StopSequences>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_format: Option<serde_json::Value>,
    #[serde(default)]
    pub stream: bool,
    /// Routing hint: pin the request to one provider.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    /// Routing hint: allow advancing to other providers on failure.
    /// Defaults to true.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallbacks: Option<bool>,
}

impl ChatRequest {
    /// Structural validation independent of the catalog.
    pub fn validate(&self) -> Result<()> {
        if self.model.trim().is_empty() {
            return Err(GatewayError::BadRequest("model must not be empty".into()));
        }
        if self.messages.is_empty() {
            return Err(GatewayError::BadRequest(
                "messages must not be empty".into(),
            ));
        }
        if let Some(t) = self.temperature {
            if !(0.0..=2.0).contains(&t) {
                return Err(GatewayError::BadRequest(format!(
                    "temperature {t} out of range [0, 2]"
                )));
            }
        }
        if let Some(p) = self.top_p {
            if !(0.0..=1.0).contains(&p) {
                return Err(GatewayError::BadRequest(format!(
                    "top_p {p} out of range [0, 1]"
                )));
            }
        }
        if self.max_tokens == Some(0) {
            return Err(GatewayError::BadRequest("max_tokens must be > 0".into()));
        }
        for m in &self.messages {
            if m.role == Role::Tool && m.tool_call_id.is_none() {
                return Err(GatewayError::BadRequest(
                    "tool messages require tool_call_id".into(),
                ));
            }
        }
        Ok(())
    }

    /// True when fallback to other providers is allowed (the default).
    pub fn fallbacks_allowed(&self) -> bool {
        self.fallbacks.unwrap_or(true)
    }

    /// Whether the request needs vision support.
    pub fn wants_vision(&self) -> bool {
        self.messages.iter().any(|m| m.has_images())
    }

    /// Whether the request needs tool support.
    pub fn wants_tools(&self) -> bool {
        self.tools.as_ref().is_some_and(|t| !t.is_empty())
    }

    /// Whether the request asks for structured JSON output.
    pub fn wants_json_output(&self) -> bool {
        self.response_format
            .as_ref()
            .and_then(|f| f.get("type"))
            .and_then(|t| t.as_str())
            .is_some_and(|t| t == "json_object" || t == "json_schema")
    }

    /// Deterministic requests are cacheable: temperature pinned to zero or
    /// an explicit seed.
    pub fn is_deterministic(&self) -> bool {
        self.temperature == Some(0.0) || self.seed.is_some()
    }

    /// Estimated prompt token count across all messages and tool schemas.
    pub fn estimate_prompt_tokens(&self) -> u32 {
        let mut total: u32 = self.messages.iter().map(|m| m.estimate_tokens()).sum();
        for tool in self.tools.iter().flatten() {
            let schema_len = tool
                .function
                .parameters
                .as_ref()
                .map(|p| p.to_string().len())
                .unwrap_or(0);
            total += ((tool.function.name.len() + schema_len) / 4) as u32;
        }
        total.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_request() -> ChatRequest {
        serde_json::from_value(serde_json::json!({
            "model": "gpt-4o",
            "messages": [{"role": "user", "content": "hi"}],
        }))
        .unwrap()
    }

    #[test]
    fn test_validate_rejects_empty_messages() {
        let mut req = base_request();
        req.messages.clear();
        assert!(matches!(
            req.validate(),
            Err(GatewayError::BadRequest(_))
        ));
    }

    #[test]
    fn test_validate_rejects_bad_temperature() {
        let mut req = base_request();
        req.temperature = Some(3.5);
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_deterministic_with_seed_or_zero_temperature() {
        let mut req = base_request();
        assert!(!req.is_deterministic());
        req.temperature = Some(0.0);
        assert!(req.is_deterministic());
        req.temperature = Some(0.7);
        req.seed = Some(42);
        assert!(req.is_deterministic());
    }

    #[test]
    fn test_stop_accepts_string_and_array() {
        let req: ChatRequest = serde_json::from_value(serde_json::json!({
            "model": "m",
            "messages": [{"role": "user", "content": "x"}],
            "stop": "END",
        }))
        .unwrap();
        assert_eq!(req.stop.unwrap().as_vec(), vec!["END"]);

        let req: ChatRequest = serde_json::from_value(serde_json::json!({
            "model": "m",
            "messages": [{"role": "user", "content": "x"}],
            "stop": ["a", "b"],
        }))
        .unwrap();
        assert_eq!(req.stop.unwrap().as_vec(), vec!["a", "b"]);
    }
}
