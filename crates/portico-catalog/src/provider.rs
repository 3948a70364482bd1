use serde::{Deserialize, Serialize};

/// Every upstream provider the gateway can dispatch to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderId {
    Openai,
    Anthropic,
    Google,
    Bedrock,
    Groq,
    Together,
    InferenceNet,
    Azure,
}

impl ProviderId {
    pub const ALL: [ProviderId; 8] = [
        ProviderId::Openai,
        ProviderId::Anthropic,
        ProviderId::Google,
        ProviderId::Bedrock,
        ProviderId::Groq,
        ProviderId::Together,
        ProviderId::InferenceNet,
        ProviderId::Azure,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderId::Openai => "openai",
            ProviderId::Anthropic => "anthropic",
            ProviderId::Google => "google",
            ProviderId::Bedrock => "bedrock",
            ProviderId::Groq => "groq",
            ProviderId::Together => "together",
            ProviderId::InferenceNet => "inference-net",
            ProviderId::Azure => "azure",
        }
    }

    pub fn parse(s: &str) -> Option<ProviderId> {
        match s.to_lowercase().as_str() {
            "openai" => Some(ProviderId::Openai),
            "anthropic" => Some(ProviderId::Anthropic),
            "google" | "gemini" => Some(ProviderId::Google),
            "bedrock" | "aws" => Some(ProviderId::Bedrock),
            "groq" => Some(ProviderId::Groq),
            "together" => Some(ProviderId::Together),
            "inference-net" | "inference" => Some(ProviderId::InferenceNet),
            "azure" => Some(ProviderId::Azure),
            _ => None,
        }
    }
}

impl std::fmt::Display for ProviderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a provider authenticates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthScheme {
    Bearer,
    ApiKeyHeader,
    SignedAws,
}

/// Static facts about one provider.
#[derive(Debug, Clone)]
pub struct ProviderInfo {
    pub id: ProviderId,
    pub display_name: &'static str,
    pub base_url: &'static str,
    pub auth: AuthScheme,
    /// Environment variable holding the gateway-owned key.
    pub env_key: &'static str,
    /// Whether streaming is native `data:`-framed SSE.
    pub native_sse: bool,
}

impl ProviderInfo {
    pub fn for_provider(id: ProviderId) -> &'static ProviderInfo {
        PROVIDERS
            .iter()
            .find(|p| p.id == id)
            .expect("every ProviderId has a ProviderInfo row")
    }
}

pub(crate) static PROVIDERS: &[ProviderInfo] = &[
    ProviderInfo {
        id: ProviderId::Openai,
        display_name: "OpenAI",
        base_url: "https://api.openai.com/v1",
        auth: AuthScheme::Bearer,
        env_key: "LLM_OPENAI_API_KEY",
        native_sse: true,
    },
    ProviderInfo {
        id: ProviderId::Anthropic,
        display_name: "Anthropic",
        base_url: "https://api.anthropic.com/v1",
        auth: AuthScheme::ApiKeyHeader,
        env_key: "LLM_ANTHROPIC_API_KEY",
        native_sse: true,
    },
    ProviderInfo {
        id: ProviderId::Google,
        display_name: "Google AI Studio",
        base_url: "https://generativelanguage.googleapis.com/v1beta",
        auth: AuthScheme::ApiKeyHeader,
        env_key: "LLM_GOOGLE_API_KEY",
        native_sse: true,
    },
    ProviderInfo {
        id: ProviderId::Bedrock,
        display_name: "AWS Bedrock",
        base_url: "https://bedrock-runtime.{region}.amazonaws.com",
        auth: AuthScheme::SignedAws,
        env_key: "LLM_AWS_SECRET_ACCESS_KEY",
        // Bedrock frames streaming responses in its own event-stream
        // encoding, not SSE.
        native_sse: false,
    },
    ProviderInfo {
        id: ProviderId::Groq,
        display_name: "Groq",
        base_url: "https://api.groq.com/openai/v1",
        auth: AuthScheme::Bearer,
        env_key: "LLM_GROQ_API_KEY",
        native_sse: true,
    },
    ProviderInfo {
        id: ProviderId::Together,
        display_name: "Together AI",
        base_url: "https://api.together.xyz/v1",
        auth: AuthScheme::Bearer,
        env_key: "LLM_TOGETHER_API_KEY",
        native_sse: true,
    },
    ProviderInfo {
        id: ProviderId::InferenceNet,
        display_name: "Inference.net",
        base_url: "https://api.inference.net/v1",
        auth: AuthScheme::Bearer,
        env_key: "LLM_INFERENCE_NET_API_KEY",
        native_sse: true,
    },
    ProviderInfo {
        id: ProviderId::Azure,
        display_name: "Azure OpenAI",
        base_url: "https://{resource}.openai.azure.com",
        auth: AuthScheme::ApiKeyHeader,
        env_key: "LLM_AZURE_API_KEY",
        native_sse: true,
    },
];
