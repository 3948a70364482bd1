use futures::StreamExt;
use tokio::sync::mpsc;

use portico_catalog::{ProviderBinding, ProviderId};
use portico_core::{
    ChatRequest, FinishReason, FunctionCall, Result, SseFrame, StreamDelta, ToolCall,
    ToolCallChunk, Usage,
};

use crate::adapter::{ByteStream, ParsedChoice, ParsedResponse, ProviderAdapter, UpstreamRequest};
use crate::credentials::Credential;
use crate::sse::SseLineDecoder;

/// OpenAI-compatible adapter. Serves OpenAI itself plus the providers
/// that speak its chat-completions dialect (Groq, Together,
/// Inference.net) with only auth-header and base-URL differences.
pub struct OpenAiAdapter {
    provider: ProviderId,
}

impl OpenAiAdapter {
    pub fn for_provider(provider: ProviderId) -> Self {
        Self { provider }
    }

    pub(crate) fn build_body(req: &ChatRequest, model: &str, stream: bool) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": model,
            "messages": translate_messages(req),
        });
        if let Some(t) = req.temperature {
            body["temperature"] = serde_json::json!(t);
        }
        if let Some(p) = req.top_p {
            body["top_p"] = serde_json::json!(p);
        }
        if let Some(m) = req.max_tokens {
            body["max_tokens"] = serde_json::json!(m);
        }
        if let Some(ref stop) = req.stop {
            body["stop"] = serde_json::json!(stop.as_vec());
        }
        if let Some(seed) = req.seed {
            body["seed"] = serde_json::json!(seed);
        }
        if let Some(ref rf) = req.response_format {
            body["response_format"] = rf.clone();
        }
        if let Some(ref tools) = req.tools {
            if !tools.is_empty() {
                body["tools"] = serde_json::json!(tools);
            }
        }
        if let Some(ref tc) = req.tool_choice {
            body["tool_choice"] = tc.clone();
        }
        if stream {
            body["stream"] = serde_json::json!(true);
            body["stream_options"] = serde_json::json!({ "include_usage": true });
        }
        body
    }
}

/// Messages pass through almost verbatim — the normalized shape is the
/// OpenAI shape. Gateway-only fields (`reasoning`) are stripped.
fn translate_messages(req: &ChatRequest) -> serde_json::Value {
    let messages: Vec<serde_json::Value> = req
        .messages
        .iter()
        .map(|m| {
            let mut v = serde_json::json!({
                "role": m.role,
                "content": m.content,
            });
            if let Some(ref tcs) = m.tool_calls {
                v["tool_calls"] = serde_json::json!(tcs);
            }
            if let Some(ref id) = m.tool_call_id {
                v["tool_call_id"] = serde_json::json!(id);
            }
            if let Some(ref name) = m.name {
                v["name"] = serde_json::json!(name);
            }
            v
        })
        .collect();
    serde_json::json!(messages)
}

impl ProviderAdapter for OpenAiAdapter {
    fn provider(&self) -> ProviderId {
        self.provider
    }

    fn build_request(
        &self,
        req: &ChatRequest,
        binding: &ProviderBinding,
        cred: &Credential,
    ) -> Result<UpstreamRequest> {
        let body = Self::build_body(req, &binding.provider_model, req.stream);
        Ok(UpstreamRequest {
            provider: self.provider,
            url: format!("{}/chat/completions", cred.base_url),
            headers: vec![(
                "authorization".into(),
                format!("Bearer {}", cred.api_key),
            )],
            body: serde_json::to_vec(&body)?,
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

/// Buffered-response parsing shared with the Azure adapter.
pub(crate) fn parse_openai_response(body: &[u8]) -> Result<ParsedResponse> {
    let data: serde_json::Value = serde_json::from_slice(body)?;

    let choices = data["choices"]
        .as_array()
        .map(|cs| cs.iter().map(parse_choice).collect())
        .unwrap_or_default();

    let usage = &data["usage"];
    let usage = Usage::from_counts(
        usage["prompt_tokens"].as_u64().unwrap_or(0) as u32,
        usage["completion_tokens"].as_u64().unwrap_or(0) as u32,
        usage["total_tokens"].as_u64().map(|t| t as u32),
        usage["completion_tokens_details"]["reasoning_tokens"]
            .as_u64()
            .map(|t| t as u32),
        usage["prompt_tokens_details"]["cached_tokens"]
            .as_u64()
            .map(|t| t as u32),
    );

    Ok(ParsedResponse {
        id: data["id"].as_str().map(String::from),
        model: data["model"].as_str().map(String::from),
        choices,
        usage,
    })
}

fn parse_choice(choice: &serde_json::Value) -> ParsedChoice {
    let message = &choice["message"];
    let tool_calls = parse_tool_calls(&message["tool_calls"]);
    let finish_reason = choice["finish_reason"]
        .as_str()
        .map(|fr| map_finish_reason(fr, !tool_calls.is_empty()));
    ParsedChoice {
        content: message["content"].as_str().map(String::from),
        // Some OpenAI-compatible hosts expose reasoning under
        // "reasoning_content", others under "reasoning".
        reasoning: message["reasoning_content"]
            .as_str()
            .or_else(|| message["reasoning"].as_str())
            .map(String::from),
        tool_calls,
        images: message["images"]
            .as_array()
            .map(|imgs| {
                imgs.iter()
                    .filter_map(|i| i.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default(),
        finish_reason,
    }
}

pub(crate) fn parse_tool_calls(value: &serde_json::Value) -> Vec<ToolCall> {
    value
        .as_array()
        .map(|calls| {
            calls
                .iter()
                .filter_map(|c| {
                    Some(ToolCall {
                        id: c["id"].as_str()?.to_string(),
                        kind: "function".into(),
                        function: FunctionCall {
                            name: c["function"]["name"].as_str()?.to_string(),
                            arguments: c["function"]["arguments"]
                                .as_str()
                                .unwrap_or("{}")
                                .to_string(),
                        },
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

pub(crate) fn map_finish_reason(raw: &str, has_tool_calls: bool) -> FinishReason {
    match raw {
        "length" => FinishReason::Length,
        "content_filter" => FinishReason::ContentFilter,
        "tool_calls" => FinishReason::ToolCalls,
        _ if has_tool_calls => FinishReason::ToolCalls,
        _ => FinishReason::Stop,
    }
}

/// Stream decoding shared with the Azure adapter.
pub(crate) fn parse_openai_stream(mut bytes: ByteStream) -> mpsc::Receiver<SseFrame> {
    let (tx, rx) = mpsc::channel(256);

    tokio::spawn(async move {
        let mut decoder = SseLineDecoder::new();
        let mut finish_reason: Option<FinishReason> = None;
        let mut saw_tool_calls = false;
        let mut usage = Usage::default();

        while let Some(chunk) = bytes.next().await {
            let data = match chunk {
                Ok(b) => b,
                Err(e) => {
                    let _ = tx
                        .send(SseFrame::Error {
                            message: e.to_string(),
                            kind: e.kind().into(),
                        })
                        .await;
                    return;
                }
            };
            for payload in decoder.push(&data) {
                if payload == "[DONE]" {
                    let _ = tx
                        .send(SseFrame::Done {
                            finish_reason: finish_reason.unwrap_or({
                                if saw_tool_calls {
                                    FinishReason::ToolCalls
                                } else {
                                    FinishReason::Stop
                                }
                            }),
                            usage: Usage::from_counts(
                                usage.prompt_tokens,
                                usage.completion_tokens,
                                None,
                                usage.reasoning_tokens,
                                Some(usage.cached_tokens()),
                            ),
                        })
                        .await;
                    return;
                }
                let Ok(event) = serde_json::from_str::<serde_json::Value>(&payload) else {
                    continue;
                };

                if let Some(u) = event.get("usage").filter(|u| !u.is_null()) {
                    usage = Usage::from_counts(
                        u["prompt_tokens"].as_u64().unwrap_or(0) as u32,
                        u["completion_tokens"].as_u64().unwrap_or(0) as u32,
                        u["total_tokens"].as_u64().map(|t| t as u32),
                        u["completion_tokens_details"]["reasoning_tokens"]
                            .as_u64()
                            .map(|t| t as u32),
                        u["prompt_tokens_details"]["cached_tokens"]
                            .as_u64()
                            .map(|t| t as u32),
                    );
                }

                let choice = &event["choices"][0];
                if let Some(fr) = choice["finish_reason"].as_str() {
                    saw_tool_calls |= fr == "tool_calls";
                    finish_reason = Some(map_finish_reason(fr, saw_tool_calls));
                }

                let delta = &choice["delta"];
                let mut out = StreamDelta::default();
                if let Some(text) = delta["content"].as_str() {
                    if !text.is_empty() {
                        out.content = Some(text.to_string());
                    }
                }
                if let Some(text) = delta["reasoning_content"]
                    .as_str()
                    .or_else(|| delta["reasoning"].as_str())
                {
                    if !text.is_empty() {
                        out.reasoning = Some(text.to_string());
                    }
                }
                if let Some(tcs) = delta["tool_calls"].as_array() {
                    saw_tool_calls = true;
                    for tc in tcs {
                        out.tool_calls.push(ToolCallChunk {
                            index: tc["index"].as_u64().unwrap_or(0) as u32,
                            id: tc["id"].as_str().map(String::from),
                            name: tc["function"]["name"].as_str().map(String::from),
                            arguments: tc["function"]["arguments"].as_str().map(String::from),
                        });
                    }
                }
                if !out.is_empty() && tx.send(SseFrame::Delta(out)).await.is_err() {
                    // Client went away — stop decoding.
                    return;
                }
            }
        }

        // Stream ended without [DONE].
        let _ = tx
            .send(SseFrame::Done {
                finish_reason: finish_reason.unwrap_or(FinishReason::Stop),
                usage: Usage::from_counts(
                    usage.prompt_tokens,
                    usage.completion_tokens,
                    None,
                    usage.reasoning_tokens,
                    None,
                ),
            })
            .await;
    });

    rx
}
