use std::collections::HashMap;
use std::sync::Arc;

use portico_catalog::{ProviderBinding, ProviderId};
use portico_core::{
    ChatRequest, FinishReason, GatewayError, Result, SseFrame, ToolCall, Usage,
};

use crate::credentials::Credential;

/// Raw bytes from an upstream response body, already mapped into the
/// gateway error type so adapters stay independent of the HTTP client.
pub type ByteStream = futures::stream::BoxStream<'static, Result<bytes::Bytes>>;

/// A fully built upstream HTTP call. The body is serialized by the
/// adapter (Bedrock signs over the exact bytes).
#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    pub provider: ProviderId,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    /// True when the adapter rewrote the body into a provider-specific
    /// schema. An upstream 400 for a translated request may be a
    /// translation artifact worth trying elsewhere; for a passthrough
    /// request it is the caller's own malformed input.
    pub translated: bool,
}

impl UpstreamRequest {
    /// The parsed JSON body, for assertions in tests.
    pub fn body_json(&self) -> Result<serde_json::Value> {
        Ok(serde_json::from_slice(&self.body)?)
    }
}

/// One normalized choice extracted from a provider response.
#[derive(Debug, Clone, Default)]
pub struct ParsedChoice {
    pub content: Option<String>,
    pub reasoning: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub images: Vec<String>,
    pub finish_reason: Option<FinishReason>,
}

/// A provider response normalized into gateway vocabulary. The dispatch
/// engine assembles the final `ChatResponse` around this.
#[derive(Debug, Clone)]
pub struct ParsedResponse {
    /// Provider-assigned response id, when present.
    pub id: Option<String>,
    /// The model name the provider reports having used.
    pub model: Option<String>,
    pub choices: Vec<ParsedChoice>,
    pub usage: Usage,
}

/// Trait implemented by each provider family. Adapters are pure
/// translators: build the call, parse the reply, decode the stream.
pub trait ProviderAdapter: Send + Sync {
    fn provider(&self) -> ProviderId;

    /// Reject requests that need a capability this binding lacks, before
    /// any upstream call.
    fn check_capabilities(&self, req: &ChatRequest, binding: &ProviderBinding) -> Result<()> {
        check_binding_caps(self.provider(), req, binding)
    }

    /// Translate the normalized request into the provider's schema.
    fn build_request(
        &self,
        req: &ChatRequest,
        binding: &ProviderBinding,
        cred: &Credential,
    ) -> Result<UpstreamRequest>;

    /// Parse a buffered 2xx response body.
    fn parse_response(&self, body: &[u8]) -> Result<ParsedResponse>;

    /// Decode provider streaming into canonical frames. The returned
    /// receiver yields deltas in upstream order and exactly one terminal
    /// frame. Single-shot: the byte stream is consumed.
    fn parse_stream(&self, bytes: ByteStream) -> tokio::sync::mpsc::Receiver<SseFrame>;
}

/// Shared capability pre-check used by every adapter.
pub fn check_binding_caps(
    provider: ProviderId,
    req: &ChatRequest,
    binding: &ProviderBinding,
) -> Result<()> {
    let refuse = |reason: &str| {
        Err(GatewayError::CapabilityRefusal {
            provider: provider.to_string(),
            reason: reason.into(),
        })
    };
    if req.wants_vision() && !binding.caps.vision {
        return refuse("image input not supported");
    }
    if req.wants_tools() && !binding.caps.tools {
        return refuse("tools not supported");
    }
    if req.wants_json_output() && !binding.caps.json_output {
        return refuse("json output not supported");
    }
    Ok(())
}

/// The adapter table, keyed by provider id. Process-wide and read-only
/// after construction.
#[derive(Clone)]
pub struct AdapterRegistry {
    adapters: HashMap<ProviderId, Arc<dyn ProviderAdapter>>,
}

impl AdapterRegistry {
    pub fn empty() -> Self {
        Self {
            adapters: HashMap::new(),
        }
    }

    /// Register all built-in provider families. `default_max_tokens`
    /// feeds providers whose schema requires an explicit limit.
    pub fn builtin(default_max_tokens: u32) -> Self {
        let mut reg = Self::empty();
        for id in [
            ProviderId::Openai,
            ProviderId::Groq,
            ProviderId::Together,
            ProviderId::InferenceNet,
        ] {
            reg.register(Arc::new(crate::openai::OpenAiAdapter::for_provider(id)));
        }
        reg.register(Arc::new(crate::anthropic::AnthropicAdapter::new(
            default_max_tokens,
        )));
        reg.register(Arc::new(crate::google::GoogleAdapter::new()));
        reg.register(Arc::new(crate::bedrock::BedrockAdapter::new(
            default_max_tokens,
        )));
        reg.register(Arc::new(crate::azure::AzureAdapter::new()));
        reg
    }

    pub fn register(&mut self, adapter: Arc<dyn ProviderAdapter>) {
        self.adapters.insert(adapter.provider(), adapter);
    }

    pub fn get(&self, id: ProviderId) -> Option<Arc<dyn ProviderAdapter>> {
        self.adapters.get(&id).cloned()
    }
}
