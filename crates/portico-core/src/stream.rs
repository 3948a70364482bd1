use serde::{Deserialize, Serialize};

use crate::response::{FinishReason, Usage};

/// An incremental tool-call fragment. Fragments with the same `index`
/// concatenate into one call; `id` and `name` arrive on the first fragment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolCallChunk {
    pub index: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
}

/// One incremental delta from a normalized stream.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamDelta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallChunk>,
}

impl StreamDelta {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_none() && self.reasoning.is_none() && self.tool_calls.is_empty()
    }
}

/// A frame in the canonical stream shape. Every completed stream carries
/// exactly one terminal frame (`Done` or `Error`); deltas monotonically
/// extend the content before it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SseFrame {
    Delta(StreamDelta),
    Done {
        finish_reason: FinishReason,
        usage: Usage,
    },
    Error {
        message: String,
        kind: String,
    },
}

impl SseFrame {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SseFrame::Done { .. } | SseFrame::Error { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_frames() {
        assert!(!SseFrame::Delta(StreamDelta::text("x")).is_terminal());
        assert!(
            SseFrame::Done {
                finish_reason: FinishReason::Stop,
                usage: Usage::default(),
            }
            .is_terminal()
        );
        assert!(
            SseFrame::Error {
                message: "boom".into(),
                kind: "transient".into(),
            }
            .is_terminal()
        );
    }
}
