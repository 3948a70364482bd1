//! Cost computation from binding pricing and final token counts.

use portico_catalog::ProviderBinding;
use portico_core::{CostBreakdown, Usage};

/// Compute the cost components for a completed request. Cached prompt
/// tokens bill at the cached-input rate and are excluded from the plain
/// input component; the per-binding discount applies to every component;
/// the flat per-request fee is added last.
pub fn compute_cost(binding: &ProviderBinding, usage: &Usage) -> CostBreakdown {
    let p = &binding.pricing;
    let cached = usage.cached_tokens().min(usage.prompt_tokens);
    let billable_input = usage.prompt_tokens - cached;
    let multiplier = 1.0 - binding.discount.unwrap_or(0.0);

    let input_cost = billable_input as f64 * p.input * multiplier;
    let output_cost = usage.completion_tokens as f64 * p.output * multiplier;
    let cached_cost = cached as f64 * p.cached_input * multiplier;
    let request_cost = p.per_request * multiplier;

    CostBreakdown {
        input_cost,
        output_cost,
        cached_cost,
        request_cost,
        total: input_cost + output_cost + cached_cost + request_cost,
    }
}

/// Upper-bound cost estimate for the credit pre-check: estimated prompt
/// tokens at the input rate plus the full output budget at the output
/// rate.
pub fn estimate_cost(binding: &ProviderBinding, prompt_tokens: u32, max_tokens: u32) -> f64 {
    let p = &binding.pricing;
    prompt_tokens as f64 * p.input + max_tokens as f64 * p.output + p.per_request
}

#[cfg(test)]
mod tests {
    use super::*;
    use portico_catalog::{Capabilities, Pricing, ProviderId, Stability};

    fn binding(pricing: Pricing, discount: Option<f64>) -> ProviderBinding {
        ProviderBinding {
            provider: ProviderId::Openai,
            provider_model: "m".into(),
            pricing,
            context_window: 128_000,
            max_output: 16_384,
            caps: Capabilities::default(),
            discount,
            stability: Stability::Stable,
            deactivated_at: None,
            deprecated_at: None,
        }
    }

    #[test]
    fn test_cost_components() {
        let b = binding(Pricing::per_million(2.0, 10.0).with_cached(1.0), None);
        let usage = Usage::from_counts(1_000_000, 500_000, None, None, Some(200_000));
        let cost = compute_cost(&b, &usage);
        assert!((cost.input_cost - 1.6).abs() < 1e-9); // 800k at $2/M
        assert!((cost.output_cost - 5.0).abs() < 1e-9); // 500k at $10/M
        assert!((cost.cached_cost - 0.2).abs() < 1e-9); // 200k at $1/M
        assert!((cost.total - 6.8).abs() < 1e-9);
    }

    #[test]
    fn test_discount_applies() {
        let b = binding(Pricing::per_million(2.0, 10.0), Some(0.5));
        let usage = Usage::from_counts(1_000_000, 0, None, None, None);
        let cost = compute_cost(&b, &usage);
        assert!((cost.input_cost - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_cost_monotonicity() {
        let b = binding(Pricing::per_million(3.0, 15.0), None);
        let small = compute_cost(&b, &Usage::from_counts(10, 5, None, None, None));
        let bigger_prompt = compute_cost(&b, &Usage::from_counts(20, 5, None, None, None));
        let bigger_output = compute_cost(&b, &Usage::from_counts(10, 9, None, None, None));
        assert!(small.total <= bigger_prompt.total);
        assert!(small.total <= bigger_output.total);
    }

    #[test]
    fn test_estimate_is_upper_bound_for_same_counts() {
        let b = binding(Pricing::per_million(3.0, 15.0), None);
        let est = estimate_cost(&b, 100, 1000);
        let actual = compute_cost(&b, &Usage::from_counts(100, 1000, None, None, None));
        assert!(est >= actual.total - 1e-12);
    }
}
