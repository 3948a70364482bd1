use tokio::sync::mpsc;

use portico_catalog::{ProviderBinding, ProviderId};
use portico_core::{ChatRequest, GatewayError, Result, SseFrame};

use crate::adapter::{ByteStream, ParsedResponse, ProviderAdapter, UpstreamRequest};
use crate::credentials::Credential;
use crate::openai::{parse_openai_response, parse_openai_stream, OpenAiAdapter};

/// Azure OpenAI adapter. The wire format is OpenAI's; the differences are
/// deployment-scoped URLs on the org's resource, an `api-key` header, and
/// a mandatory `api-version` query parameter.
pub struct AzureAdapter;

impl AzureAdapter {
    pub fn new() -> Self {
        Self
    }
}

impl Default for AzureAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderAdapter for AzureAdapter {
    fn provider(&self) -> ProviderId {
        ProviderId::Azure
    }

    fn build_request(
        &self,
        req: &ChatRequest,
        binding: &ProviderBinding,
        cred: &Credential,
    ) -> Result<UpstreamRequest> {
        let azure = cred.azure.as_ref().ok_or_else(|| {
            GatewayError::ProviderNotConfigured("azure: missing resource name".into())
        })?;

        // The deployment name in the URL selects the model; the body's
        // `model` field is ignored but harmless, so the OpenAI body is
        // reused as-is.
        let body = OpenAiAdapter::build_body(req, &binding.provider_model, req.stream);
        Ok(UpstreamRequest {
            provider: ProviderId::Azure,
            url: format!(
                "https://{}.openai.azure.com/openai/deployments/{}/chat/completions?api-version={}",
                azure.resource, binding.provider_model, azure.api_version,
            ),
            headers: vec![("api-key".into(), cred.api_key.clone())],
            body: serde_json::to_vec(&body)?,
            // The body is the OpenAI shape unchanged; only URL and auth
            // differ.
            translated: false,
        })
    }

    fn parse_response(&self, body: &[u8]) -> Result<ParsedResponse> {
        parse_openai_response(body)
    }

    fn parse_stream(&self, bytes: ByteStream) -> mpsc::Receiver<SseFrame> {
        parse_openai_stream(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::{AzureOptions, CredentialMode};
    use portico_catalog::{Capabilities, Pricing, Stability};

    #[test]
    fn test_url_carries_resource_deployment_and_api_version() {
        let adapter = AzureAdapter::new();
        let req: ChatRequest = serde_json::from_value(serde_json::json!({
            "model": "gpt-4o",
            "messages": [{"role": "user", "content": "hi"}],
        }))
        .unwrap();
        let binding = ProviderBinding {
            provider: ProviderId::Azure,
            provider_model: "gpt-4o".into(),
            pricing: Pricing::per_million(2.50, 10.00),
            context_window: 128_000,
            max_output: 16_384,
            caps: Capabilities::default(),
            discount: None,
            stability: Stability::Stable,
            deactivated_at: None,
            deprecated_at: None,
        };
        let cred = Credential {
            api_key: "azure-key".into(),
            base_url: String::new(),
            mode: CredentialMode::Gateway,
            azure: Some(AzureOptions {
                resource: "myresource".into(),
                api_version: "2024-06-01".into(),
            }),
            aws: None,
        };
        let up = adapter.build_request(&req, &binding, &cred).unwrap();
        assert_eq!(
            up.url,
            "https://myresource.openai.azure.com/openai/deployments/gpt-4o/chat/completions?api-version=2024-06-01"
        );
        assert_eq!(up.headers[0], ("api-key".into(), "azure-key".into()));
    }
}
