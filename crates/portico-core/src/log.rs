use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One upstream attempt, recorded in order for fallback diagnosis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attempt {
    pub provider: String,
    /// Error kind, or "ok".
    pub outcome: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

/// Cost components in USD.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CostBreakdown {
    pub input_cost: f64,
    pub output_cost: f64,
    pub cached_cost: f64,
    pub request_cost: f64,
    pub total: f64,
}

impl CostBreakdown {
    pub fn zero() -> Self {
        Self::default()
    }
}

/// One immutable usage log record per completed request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRecord {
    pub request_id: String,
    pub org_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    pub requested_model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub used_model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub used_provider: Option<String>,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub reasoning_tokens: u32,
    pub cached_tokens: u32,
    pub cost: CostBreakdown,
    /// Time to first token, streams only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttft_ms: Option<u64>,
    pub duration_ms: u64,
    /// "ok", "client_disconnect", or an error kind.
    pub outcome: String,
    pub http_status: u16,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attempts: Vec<Attempt>,
    #[serde(default)]
    pub cache_hit: bool,
    #[serde(default)]
    pub byok: bool,
    /// Request/response bodies, persisted only when the org opted in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl LogRecord {
    /// A skeleton record for a request that never reached an upstream.
    pub fn rejected(
        request_id: impl Into<String>,
        org_id: impl Into<String>,
        requested_model: impl Into<String>,
        outcome: impl Into<String>,
        http_status: u16,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            org_id: org_id.into(),
            project_id: None,
            requested_model: requested_model.into(),
            used_model: None,
            used_provider: None,
            prompt_tokens: 0,
            completion_tokens: 0,
            reasoning_tokens: 0,
            cached_tokens: 0,
            cost: CostBreakdown::zero(),
            ttft_ms: None,
            duration_ms: 0,
            outcome: outcome.into(),
            http_status,
            attempts: vec![],
            cache_hit: false,
            byok: false,
            prompt: None,
            response: None,
            created_at: Utc::now(),
        }
    }
}
