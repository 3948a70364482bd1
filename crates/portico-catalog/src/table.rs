//! The built-in model table. Pricing is entered as USD per million tokens,
//! matching provider price sheets.

use chrono::{DateTime, TimeZone, Utc};

use crate::model::{Capabilities, ModelEntry, Pricing, ProviderBinding, Stability};
use crate::provider::ProviderId;

fn ts(y: i32, m: u32, d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, 0, 0, 0)
        .single()
        .expect("valid table date")
}

const TEXT_CAPS: Capabilities = Capabilities {
    streaming: true,
    vision: false,
    tools: true,
    parallel_tool_calls: true,
    reasoning: false,
    json_output: true,
};

const VISION_CAPS: Capabilities = Capabilities {
    streaming: true,
    vision: true,
    tools: true,
    parallel_tool_calls: true,
    reasoning: false,
    json_output: true,
};

// Bedrock streams in AWS event-stream framing, which the gateway does
// not relay; its bindings serve buffered responses only.
const BEDROCK_TEXT_CAPS: Capabilities = Capabilities {
    streaming: false,
    vision: false,
    tools: true,
    parallel_tool_calls: true,
    reasoning: false,
    json_output: true,
};

const BEDROCK_VISION_CAPS: Capabilities = Capabilities {
    streaming: false,
    vision: true,
    tools: true,
    parallel_tool_calls: true,
    reasoning: false,
    json_output: true,
};

const REASONING_CAPS: Capabilities = Capabilities {
    streaming: true,
    vision: false,
    tools: true,
    parallel_tool_calls: false,
    reasoning: true,
    json_output: true,
};

fn binding(
    provider: ProviderId,
    provider_model: &str,
    pricing: Pricing,
    context_window: u32,
    max_output: u32,
    caps: Capabilities,
    stability: Stability,
) -> ProviderBinding {
    ProviderBinding {
        provider,
        provider_model: provider_model.into(),
        pricing,
        context_window,
        max_output,
        caps,
        discount: None,
        stability,
        deactivated_at: None,
        deprecated_at: None,
    }
}

pub fn builtin_models() -> Vec<ModelEntry> {
    vec![
        ModelEntry {
            id: "gpt-4o".into(),
            display_name: "GPT-4o".into(),
            family: "gpt-4".into(),
            aliases: vec!["gpt-4o-2024-08-06".into()],
            input_modalities: vec!["text".into(), "image".into()],
            output_modalities: vec!["text".into()],
            bindings: vec![
                binding(
                    ProviderId::Openai,
                    "gpt-4o",
                    Pricing::per_million(2.50, 10.00).with_cached(1.25),
                    128_000,
                    16_384,
                    VISION_CAPS,
                    Stability::Stable,
                ),
                binding(
                    ProviderId::Azure,
                    "gpt-4o",
                    Pricing::per_million(2.50, 10.00).with_cached(1.25),
                    128_000,
                    16_384,
                    VISION_CAPS,
                    Stability::Stable,
                ),
            ],
        },
        ModelEntry {
            id: "gpt-4o-mini".into(),
            display_name: "GPT-4o mini".into(),
            family: "gpt-4".into(),
            aliases: vec!["gpt-4o-mini-2024-07-18".into()],
            input_modalities: vec!["text".into(), "image".into()],
            output_modalities: vec!["text".into()],
            bindings: vec![
                binding(
                    ProviderId::Openai,
                    "gpt-4o-mini",
                    Pricing::per_million(0.15, 0.60).with_cached(0.075),
                    128_000,
                    16_384,
                    VISION_CAPS,
                    Stability::Stable,
                ),
                binding(
                    ProviderId::Azure,
                    "gpt-4o-mini",
                    Pricing::per_million(0.15, 0.60),
                    128_000,
                    16_384,
                    VISION_CAPS,
                    Stability::Stable,
                ),
            ],
        },
        ModelEntry {
            id: "o3-mini".into(),
            display_name: "o3-mini".into(),
            family: "o-series".into(),
            aliases: vec![],
            input_modalities: vec!["text".into()],
            output_modalities: vec!["text".into()],
            bindings: vec![binding(
                ProviderId::Openai,
                "o3-mini",
                Pricing::per_million(1.10, 4.40).with_cached(0.55),
                200_000,
                100_000,
                REASONING_CAPS,
                Stability::Stable,
            )],
        },
        ModelEntry {
            id: "claude-3-5-sonnet".into(),
            display_name: "Claude 3.5 Sonnet".into(),
            family: "claude-3".into(),
            aliases: vec![
                "claude-3-5-sonnet-20241022".into(),
                "claude-3.5-sonnet".into(),
            ],
            input_modalities: vec!["text".into(), "image".into()],
            output_modalities: vec!["text".into()],
            bindings: vec![
                binding(
                    ProviderId::Anthropic,
                    "claude-3-5-sonnet-20241022",
                    Pricing::per_million(3.00, 15.00).with_cached(0.30),
                    200_000,
                    8_192,
                    VISION_CAPS,
                    Stability::Stable,
                ),
                binding(
                    ProviderId::Bedrock,
                    "anthropic.claude-3-5-sonnet-20241022-v2:0",
                    Pricing::per_million(3.00, 15.00),
                    200_000,
                    8_192,
                    BEDROCK_VISION_CAPS,
                    Stability::Stable,
                ),
            ],
        },
        ModelEntry {
            id: "claude-3-5-haiku".into(),
            display_name: "Claude 3.5 Haiku".into(),
            family: "claude-3".into(),
            aliases: vec!["claude-3-5-haiku-20241022".into()],
            input_modalities: vec!["text".into()],
            output_modalities: vec!["text".into()],
            bindings: vec![
                binding(
                    ProviderId::Anthropic,
                    "claude-3-5-haiku-20241022",
                    Pricing::per_million(0.80, 4.00).with_cached(0.08),
                    200_000,
                    8_192,
                    TEXT_CAPS,
                    Stability::Stable,
                ),
                binding(
                    ProviderId::Bedrock,
                    "anthropic.claude-3-5-haiku-20241022-v1:0",
                    Pricing::per_million(0.80, 4.00),
                    200_000,
                    8_192,
                    BEDROCK_TEXT_CAPS,
                    Stability::Beta,
                ),
            ],
        },
        ModelEntry {
            id: "gemini-1.5-pro".into(),
            display_name: "Gemini 1.5 Pro".into(),
            family: "gemini".into(),
            aliases: vec!["gemini-1.5-pro-002".into()],
            input_modalities: vec!["text".into(), "image".into()],
            output_modalities: vec!["text".into()],
            bindings: vec![binding(
                ProviderId::Google,
                "gemini-1.5-pro",
                Pricing::per_million(1.25, 5.00),
                2_000_000,
                8_192,
                VISION_CAPS,
                Stability::Stable,
            )],
        },
        ModelEntry {
            id: "gemini-1.5-flash".into(),
            display_name: "Gemini 1.5 Flash".into(),
            family: "gemini".into(),
            aliases: vec![],
            input_modalities: vec!["text".into(), "image".into()],
            output_modalities: vec!["text".into()],
            bindings: vec![binding(
                ProviderId::Google,
                "gemini-1.5-flash",
                Pricing::per_million(0.075, 0.30),
                1_000_000,
                8_192,
                VISION_CAPS,
                Stability::Stable,
            )],
        },
        ModelEntry {
            id: "llama-3.1-70b-instruct".into(),
            display_name: "Llama 3.1 70B Instruct".into(),
            family: "llama".into(),
            aliases: vec!["llama-3.1-70b".into()],
            input_modalities: vec!["text".into()],
            output_modalities: vec!["text".into()],
            bindings: vec![
                binding(
                    ProviderId::Groq,
                    "llama-3.1-70b-versatile",
                    Pricing::per_million(0.59, 0.79),
                    128_000,
                    8_192,
                    TEXT_CAPS,
                    Stability::Stable,
                ),
                binding(
                    ProviderId::Together,
                    "meta-llama/Meta-Llama-3.1-70B-Instruct-Turbo",
                    Pricing::per_million(0.88, 0.88),
                    128_000,
                    8_192,
                    TEXT_CAPS,
                    Stability::Stable,
                ),
                ProviderBinding {
                    deprecated_at: Some(ts(2025, 6, 1)),
                    ..binding(
                        ProviderId::InferenceNet,
                        "meta-llama/llama-3.1-70b-instruct/fp-16",
                        Pricing::per_million(0.40, 0.40),
                        128_000,
                        8_192,
                        TEXT_CAPS,
                        Stability::Unstable,
                    )
                },
            ],
        },
        ModelEntry {
            id: "llama-3.1-8b-instruct".into(),
            display_name: "Llama 3.1 8B Instruct".into(),
            family: "llama".into(),
            aliases: vec!["llama-3.1-8b".into()],
            input_modalities: vec!["text".into()],
            output_modalities: vec!["text".into()],
            bindings: vec![
                binding(
                    ProviderId::Groq,
                    "llama-3.1-8b-instant",
                    Pricing::per_million(0.05, 0.08),
                    128_000,
                    8_192,
                    TEXT_CAPS,
                    Stability::Stable,
                ),
                binding(
                    ProviderId::Together,
                    "meta-llama/Meta-Llama-3.1-8B-Instruct-Turbo",
                    Pricing::per_million(0.18, 0.18),
                    128_000,
                    8_192,
                    TEXT_CAPS,
                    Stability::Stable,
                ),
                binding(
                    ProviderId::InferenceNet,
                    "meta-llama/llama-3.1-8b-instruct/fp-8",
                    Pricing::per_million(0.03, 0.03),
                    128_000,
                    8_192,
                    TEXT_CAPS,
                    Stability::Beta,
                ),
            ],
        },
        ModelEntry {
            id: "gpt-4-turbo".into(),
            display_name: "GPT-4 Turbo".into(),
            family: "gpt-4".into(),
            aliases: vec![],
            input_modalities: vec!["text".into(), "image".into()],
            output_modalities: vec!["text".into()],
            bindings: vec![ProviderBinding {
                deactivated_at: Some(ts(2025, 7, 1)),
                deprecated_at: Some(ts(2025, 1, 15)),
                ..binding(
                    ProviderId::Openai,
                    "gpt-4-turbo",
                    Pricing::per_million(10.00, 30.00),
                    128_000,
                    4_096,
                    VISION_CAPS,
                    Stability::Stable,
                )
            }],
        },
    ]
}
