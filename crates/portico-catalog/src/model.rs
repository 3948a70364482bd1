use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::provider::ProviderId;

/// Declared maturity of a (model, provider) binding. Orders fallback
/// candidates after price: stable < beta < unstable < experimental.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stability {
    Stable,
    Beta,
    Unstable,
    Experimental,
}

/// What a binding can do.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Capabilities {
    pub streaming: bool,
    pub vision: bool,
    pub tools: bool,
    pub parallel_tool_calls: bool,
    pub reasoning: bool,
    pub json_output: bool,
}

/// Per-binding pricing. Token prices are USD per token; `per_request`
/// and `per_image` use their own units (USD per call / per image).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Pricing {
    pub input: f64,
    pub output: f64,
    #[serde(default)]
    pub cached_input: f64,
    #[serde(default)]
    pub per_request: f64,
    #[serde(default)]
    pub per_image: f64,
}

impl Pricing {
    /// Convenience constructor from USD-per-million-token rates, the unit
    /// providers publish.
    pub const fn per_million(input: f64, output: f64) -> Self {
        Self {
            input: input / 1_000_000.0,
            output: output / 1_000_000.0,
            cached_input: 0.0,
            per_request: 0.0,
            per_image: 0.0,
        }
    }

    pub const fn with_cached(mut self, cached_per_million: f64) -> Self {
        self.cached_input = cached_per_million / 1_000_000.0;
        self
    }
}

/// A (model, provider) pair with pricing and capabilities.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderBinding {
    pub provider: ProviderId,
    /// The provider's own name for this model.
    pub provider_model: String,
    pub pricing: Pricing,
    pub context_window: u32,
    pub max_output: u32,
    pub caps: Capabilities,
    /// Fraction subtracted from the effective price (0.10 = 10% off).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discount: Option<f64>,
    pub stability: Stability,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deactivated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deprecated_at: Option<DateTime<Utc>>,
}

impl ProviderBinding {
    pub fn is_deactivated(&self) -> bool {
        self.deactivated_at.is_some_and(|t| t <= Utc::now())
    }

    pub fn is_deprecated(&self) -> bool {
        self.deprecated_at.is_some_and(|t| t <= Utc::now())
    }

    /// Input price after the binding discount, used for candidate order.
    pub fn effective_input_price(&self) -> f64 {
        self.pricing.input * (1.0 - self.discount.unwrap_or(0.0))
    }
}

/// A model with its ordered provider bindings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelEntry {
    /// Stable id, e.g. "gpt-4o".
    pub id: String,
    pub display_name: String,
    /// Model family, e.g. "gpt-4", "claude-3", "gemini", "llama".
    pub family: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aliases: Vec<String>,
    pub input_modalities: Vec<String>,
    pub output_modalities: Vec<String>,
    pub bindings: Vec<ProviderBinding>,
}

impl ModelEntry {
    /// A model is servable while at least one binding is active.
    pub fn is_servable(&self) -> bool {
        self.bindings.iter().any(|b| !b.is_deactivated())
    }

    pub fn binding_for(&self, provider: ProviderId) -> Option<&ProviderBinding> {
        self.bindings.iter().find(|b| b.provider == provider)
    }
}
