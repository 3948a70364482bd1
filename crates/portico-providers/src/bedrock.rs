use tokio::sync::mpsc;

use portico_catalog::{ProviderBinding, ProviderId};
use portico_core::{ChatRequest, GatewayError, Result, SseFrame};

use crate::adapter::{ByteStream, ParsedResponse, ProviderAdapter, UpstreamRequest};
use crate::anthropic::AnthropicAdapter;
use crate::credentials::Credential;
use crate::sigv4;

/// AWS Bedrock adapter for the Anthropic model family. The payload is the
/// Messages API document with `anthropic_version` pinned to the Bedrock
/// dialect; the model moves into the URL and the call is SigV4-signed.
///
/// Bedrock streams in AWS event-stream framing rather than SSE, so its
/// bindings are declared non-streaming and stream requests fall through
/// to a provider that speaks SSE.
pub struct BedrockAdapter {
    inner: AnthropicAdapter,
}

impl BedrockAdapter {
    pub fn new(default_max_tokens: u32) -> Self {
        Self {
            inner: AnthropicAdapter::new(default_max_tokens),
        }
    }
}

impl ProviderAdapter for BedrockAdapter {
    fn provider(&self) -> ProviderId {
        ProviderId::Bedrock
    }

    fn build_request(
        &self,
        req: &ChatRequest,
        binding: &ProviderBinding,
        cred: &Credential,
    ) -> Result<UpstreamRequest> {
        let aws = cred.aws.as_ref().ok_or_else(|| {
            GatewayError::ProviderNotConfigured("bedrock: missing aws credentials".into())
        })?;

        let mut body =
            self.inner
                .build_body(req, &binding.provider_model, binding.max_output, false)?;
        if let Some(obj) = body.as_object_mut() {
            obj.remove("model");
            obj.remove("stream");
            obj.insert(
                "anthropic_version".into(),
                serde_json::json!("bedrock-2023-05-31"),
            );
        }
        let body = serde_json::to_vec(&body)?;

        // Cross-region inference profiles prefix the model id ("us.", "eu.").
        let model_id = match &aws.region_prefix {
            Some(prefix) => format!("{prefix}.{}", binding.provider_model),
            None => binding.provider_model.clone(),
        };
        let path = format!("/model/{}/invoke", sigv4::uri_encode_segment(&model_id));
        let host = cred
            .base_url
            .trim_start_matches("https://")
            .trim_end_matches('/')
            .to_string();

        let amz_date = chrono::Utc::now().format("%Y%m%dT%H%M%SZ").to_string();
        let (amz_date, authorization) = sigv4::sign(
            &sigv4::SigningParams {
                access_key_id: &aws.access_key_id,
                secret_access_key: &aws.secret_access_key,
                region: &aws.region,
                service: "bedrock",
                host: &host,
                path: &path,
                amz_date: &amz_date,
            },
            &body,
        );

        Ok(UpstreamRequest {
            provider: ProviderId::Bedrock,
            url: format!("https://{host}{path}"),
            headers: vec![
                ("x-amz-date".into(), amz_date),
                ("authorization".into(), authorization),
            ],
            body,
            translated: true,
        })
    }

    fn parse_response(&self, body: &[u8]) -> Result<ParsedResponse> {
        // Bedrock returns the Messages API document unchanged.
        crate::anthropic::parse_anthropic_response(body)
    }

    fn parse_stream(&self, _bytes: ByteStream) -> mpsc::Receiver<SseFrame> {
        let (tx, rx) = mpsc::channel(1);
        tokio::spawn(async move {
            let _ = tx
                .send(SseFrame::Error {
                    message: "bedrock streaming uses event-stream framing and is not relayed"
                        .into(),
                    kind: "capability_refusal".into(),
                })
                .await;
        });
        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::{AwsOptions, CredentialMode};
    use portico_catalog::{Capabilities, Pricing, Stability};

    fn binding() -> ProviderBinding {
        ProviderBinding {
            provider: ProviderId::Bedrock,
            provider_model: "anthropic.claude-3-5-sonnet-20241022-v2:0".into(),
            pricing: Pricing::per_million(3.00, 15.00),
            context_window: 200_000,
            max_output: 8_192,
            caps: Capabilities {
                streaming: false,
                vision: true,
                tools: true,
                parallel_tool_calls: true,
                reasoning: false,
                json_output: true,
            },
            discount: None,
            stability: Stability::Stable,
            deactivated_at: None,
            deprecated_at: None,
        }
    }

    fn cred() -> Credential {
        Credential {
            api_key: String::new(),
            base_url: "https://bedrock-runtime.us-east-1.amazonaws.com".into(),
            mode: CredentialMode::Gateway,
            azure: None,
            aws: Some(AwsOptions {
                region: "us-east-1".into(),
                region_prefix: Some("us".into()),
                access_key_id: "AKIDEXAMPLE".into(),
                secret_access_key: "secret".into(),
            }),
        }
    }

    fn request() -> ChatRequest {
        serde_json::from_value(serde_json::json!({
            "model": "claude-3-5-sonnet",
            "messages": [{"role": "user", "content": "hi"}],
        }))
        .unwrap()
    }

    #[test]
    fn test_model_moves_to_url_with_region_prefix() {
        let adapter = BedrockAdapter::new(4096);
        let up = adapter.build_request(&request(), &binding(), &cred()).unwrap();
        assert_eq!(
            up.url,
            "https://bedrock-runtime.us-east-1.amazonaws.com/model/us.anthropic.claude-3-5-sonnet-20241022-v2%3A0/invoke"
        );
        let body = up.body_json().unwrap();
        assert!(body.get("model").is_none());
        assert_eq!(body["anthropic_version"], "bedrock-2023-05-31");
        assert_eq!(body["max_tokens"], 4096);
    }

    #[test]
    fn test_request_is_signed() {
        let adapter = BedrockAdapter::new(4096);
        let up = adapter.build_request(&request(), &binding(), &cred()).unwrap();
        let auth = up
            .headers
            .iter()
            .find(|(n, _)| n == "authorization")
            .map(|(_, v)| v.clone())
            .unwrap();
        assert!(auth.starts_with("AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/"));
        assert!(auth.contains("/us-east-1/bedrock/aws4_request"));
        assert!(up.headers.iter().any(|(n, _)| n == "x-amz-date"));
    }
}
