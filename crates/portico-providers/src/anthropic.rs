use futures::StreamExt;
use tokio::sync::mpsc;

use portico_catalog::{ProviderBinding, ProviderId};
use portico_core::{
    ChatRequest, FinishReason, FunctionCall, GatewayError, MessageContent, Result, Role, SseFrame,
    StreamDelta, ToolCall, ToolCallChunk, Usage,
};

use crate::adapter::{ByteStream, ParsedChoice, ParsedResponse, ProviderAdapter, UpstreamRequest};
use crate::credentials::Credential;
use crate::sse::SseLineDecoder;

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Anthropic Messages API adapter. System messages move to the top-level
/// `system` string, tool results become `tool_result` content blocks, and
/// `max_tokens` is mandatory.
pub struct AnthropicAdapter {
    default_max_tokens: u32,
}

impl AnthropicAdapter {
    pub fn new(default_max_tokens: u32) -> Self {
        Self { default_max_tokens }
    }

    pub(crate) fn build_body(
        &self,
        req: &ChatRequest,
        model: &str,
        max_output: u32,
        stream: bool,
    ) -> Result<serde_json::Value> {
        let mut system_parts: Vec<String> = Vec::new();
        let mut messages: Vec<serde_json::Value> = Vec::new();

        for msg in &req.messages {
            match msg.role {
                Role::System => system_parts.push(msg.text_content()),
                Role::User => messages.push(serde_json::json!({
                    "role": "user",
                    "content": translate_user_content(msg.content.as_ref()),
                })),
                Role::Assistant => {
                    let tool_calls = msg.tool_calls.as_deref().unwrap_or(&[]);
                    if tool_calls.is_empty() {
                        messages.push(serde_json::json!({
                            "role": "assistant",
                            "content": msg.text_content(),
                        }));
                    } else {
                        let mut blocks: Vec<serde_json::Value> = Vec::new();
                        let text = msg.text_content();
                        if !text.is_empty() {
                            blocks.push(serde_json::json!({"type": "text", "text": text}));
                        }
                        for tc in tool_calls {
                            let input: serde_json::Value =
                                serde_json::from_str(&tc.function.arguments)
                                    .unwrap_or(serde_json::json!({}));
                            blocks.push(serde_json::json!({
                                "type": "tool_use",
                                "id": tc.id,
                                "name": tc.function.name,
                                "input": input,
                            }));
                        }
                        messages.push(serde_json::json!({
                            "role": "assistant",
                            "content": blocks,
                        }));
                    }
                }
                Role::Tool => {
                    let id = msg.tool_call_id.clone().ok_or_else(|| {
                        GatewayError::BadRequest("tool message without tool_call_id".into())
                    })?;
                    messages.push(serde_json::json!({
                        "role": "user",
                        "content": [{
                            "type": "tool_result",
                            "tool_use_id": id,
                            "content": msg.text_content(),
                        }],
                    }));
                }
            }
        }

        // max_tokens is required by the Messages API; inject the gateway
        // default when the client omits it, clamped to the binding limit.
        let max_tokens = req
            .max_tokens
            .unwrap_or(self.default_max_tokens)
            .min(max_output);

        let mut body = serde_json::json!({
            "model": model,
            "max_tokens": max_tokens,
            "messages": messages,
        });
        if !system_parts.is_empty() {
            body["system"] = serde_json::json!(system_parts.join("\n\n"));
        }
        if let Some(t) = req.temperature {
            body["temperature"] = serde_json::json!(t);
        }
        if let Some(p) = req.top_p {
            body["top_p"] = serde_json::json!(p);
        }
        if let Some(ref stop) = req.stop {
            body["stop_sequences"] = serde_json::json!(stop.as_vec());
        }
        if let Some(ref tools) = req.tools {
            if !tools.is_empty() {
                let tools: Vec<serde_json::Value> = tools
                    .iter()
                    .map(|t| {
                        serde_json::json!({
                            "name": t.function.name,
                            "description": t.function.description,
                            "input_schema": t.function.parameters
                                .clone()
                                .unwrap_or(serde_json::json!({"type": "object"})),
                        })
                    })
                    .collect();
                body["tools"] = serde_json::json!(tools);
            }
        }
        if let Some(choice) = translate_tool_choice(req.tool_choice.as_ref()) {
            body["tool_choice"] = choice;
        }
        if stream {
            body["stream"] = serde_json::json!(true);
        }
        Ok(body)
    }
}

fn translate_user_content(content: Option<&MessageContent>) -> serde_json::Value {
    match content {
        None => serde_json::json!(""),
        Some(MessageContent::Text(t)) => serde_json::json!(t),
        Some(MessageContent::Parts(parts)) => {
            let blocks: Vec<serde_json::Value> = parts
                .iter()
                .map(|p| match p {
                    portico_core::ContentPart::Text { text } => {
                        serde_json::json!({"type": "text", "text": text})
                    }
                    portico_core::ContentPart::ImageUrl { image_url } => serde_json::json!({
                        "type": "image",
                        "source": {"type": "url", "url": image_url.url},
                    }),
                })
                .collect();
            serde_json::json!(blocks)
        }
    }
}

fn translate_tool_choice(choice: Option<&serde_json::Value>) -> Option<serde_json::Value> {
    match choice? {
        serde_json::Value::String(s) => match s.as_str() {
            "auto" => Some(serde_json::json!({"type": "auto"})),
            "required" => Some(serde_json::json!({"type": "any"})),
            // "none" — omit tools entirely is the closest mapping; let
            // the provider default apply.
            _ => None,
        },
        obj => obj["function"]["name"].as_str().map(|name| {
            serde_json::json!({"type": "tool", "name": name})
        }),
    }
}

pub(crate) fn map_stop_reason(raw: Option<&str>, has_tool_calls: bool) -> FinishReason {
    match raw {
        Some("tool_use") => FinishReason::ToolCalls,
        Some("max_tokens") => FinishReason::Length,
        Some("end_turn") | Some("stop_sequence") => FinishReason::Stop,
        _ if has_tool_calls => FinishReason::ToolCalls,
        _ => FinishReason::Stop,
    }
}

/// Parse a buffered Messages API response. Shared with the Bedrock
/// adapter, which returns the same document shape.
pub(crate) fn parse_anthropic_response(body: &[u8]) -> Result<ParsedResponse> {
    let data: serde_json::Value = serde_json::from_slice(body)?;

    let mut content = String::new();
    let mut reasoning = String::new();
    let mut tool_calls: Vec<ToolCall> = Vec::new();
    if let Some(blocks) = data["content"].as_array() {
        for b in blocks {
            match b["type"].as_str() {
                Some("text") => content.push_str(b["text"].as_str().unwrap_or("")),
                Some("thinking") => {
                    reasoning.push_str(b["thinking"].as_str().unwrap_or(""))
                }
                Some("tool_use") => tool_calls.push(ToolCall {
                    id: b["id"].as_str().unwrap_or("").to_string(),
                    kind: "function".into(),
                    function: FunctionCall {
                        name: b["name"].as_str().unwrap_or("").to_string(),
                        arguments: b["input"].to_string(),
                    },
                }),
                _ => {}
            }
        }
    }

    let has_tool_calls = !tool_calls.is_empty();
    let usage = &data["usage"];
    let usage = Usage::from_counts(
        usage["input_tokens"].as_u64().unwrap_or(0) as u32,
        usage["output_tokens"].as_u64().unwrap_or(0) as u32,
        None,
        None,
        usage["cache_read_input_tokens"].as_u64().map(|t| t as u32),
    );

    Ok(ParsedResponse {
        id: data["id"].as_str().map(String::from),
        model: data["model"].as_str().map(String::from),
        choices: vec![ParsedChoice {
            content: (!content.is_empty()).then_some(content),
            reasoning: (!reasoning.is_empty()).then_some(reasoning),
            tool_calls,
            images: vec![],
            finish_reason: Some(map_stop_reason(
                data["stop_reason"].as_str(),
                has_tool_calls,
            )),
        }],
        usage,
    })
}

impl ProviderAdapter for AnthropicAdapter {
    fn provider(&self) -> ProviderId {
        ProviderId::Anthropic
    }

    fn build_request(
        &self,
        req: &ChatRequest,
        binding: &ProviderBinding,
        cred: &Credential,
    ) -> Result<UpstreamRequest> {
        let body =
            self.build_body(req, &binding.provider_model, binding.max_output, req.stream)?;
        Ok(UpstreamRequest {
            provider: ProviderId::Anthropic,
            url: format!("{}/messages", cred.base_url),
            headers: vec![
                ("x-api-key".into(), cred.api_key.clone()),
                ("anthropic-version".into(), ANTHROPIC_VERSION.into()),
            ],
            body: serde_json::to_vec(&body)?,
            translated: true,
        })
    }

    fn parse_response(&self, body: &[u8]) -> Result<ParsedResponse> {
        parse_anthropic_response(body)
    }

    fn parse_stream(&self, mut bytes: ByteStream) -> mpsc::Receiver<SseFrame> {
        let (tx, rx) = mpsc::channel(256);

        tokio::spawn(async move {
            let mut decoder = SseLineDecoder::new();
            let mut input_tokens = 0u32;
            let mut output_tokens = 0u32;
            let mut cached_tokens: Option<u32> = None;
            let mut stop_reason: Option<String> = None;
            let mut has_tool_calls = false;
            // Tool block index -> gateway chunk index, so interleaved text
            // blocks don't shift chunk indices.
            let mut next_chunk_index = 0u32;
            let mut open_tool_chunk: Option<u32> = None;

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
                    let Ok(event) = serde_json::from_str::<serde_json::Value>(&payload) else {
                        continue;
                    };
                    match event["type"].as_str() {
                        Some("message_start") => {
                            let u = &event["message"]["usage"];
                            if let Some(it) = u["input_tokens"].as_u64() {
                                input_tokens = it as u32;
                            }
                            if let Some(ct) = u["cache_read_input_tokens"].as_u64() {
                                cached_tokens = Some(ct as u32);
                            }
                        }
                        Some("content_block_start") => {
                            let cb = &event["content_block"];
                            if cb["type"].as_str() == Some("tool_use") {
                                has_tool_calls = true;
                                let idx = next_chunk_index;
                                next_chunk_index += 1;
                                open_tool_chunk = Some(idx);
                                let frame = SseFrame::Delta(StreamDelta {
                                    tool_calls: vec![ToolCallChunk {
                                        index: idx,
                                        id: cb["id"].as_str().map(String::from),
                                        name: cb["name"].as_str().map(String::from),
                                        arguments: None,
                                    }],
                                    ..Default::default()
                                });
                                if tx.send(frame).await.is_err() {
                                    return;
                                }
                            }
                        }
                        Some("content_block_delta") => {
                            let delta = &event["delta"];
                            let frame = match delta["type"].as_str() {
                                Some("text_delta") => delta["text"]
                                    .as_str()
                                    .map(|t| SseFrame::Delta(StreamDelta::text(t))),
                                Some("thinking_delta") => {
                                    delta["thinking"].as_str().map(|t| {
                                        SseFrame::Delta(StreamDelta {
                                            reasoning: Some(t.to_string()),
                                            ..Default::default()
                                        })
                                    })
                                }
                                Some("input_json_delta") => delta["partial_json"]
                                    .as_str()
                                    .zip(open_tool_chunk)
                                    .map(|(partial, idx)| {
                                        SseFrame::Delta(StreamDelta {
                                            tool_calls: vec![ToolCallChunk {
                                                index: idx,
                                                arguments: Some(partial.to_string()),
                                                ..Default::default()
                                            }],
                                            ..Default::default()
                                        })
                                    }),
                                _ => None,
                            };
                            if let Some(frame) = frame {
                                if tx.send(frame).await.is_err() {
                                    return;
                                }
                            }
                        }
                        Some("content_block_stop") => {
                            open_tool_chunk = None;
                        }
                        Some("message_delta") => {
                            if let Some(sr) = event["delta"]["stop_reason"].as_str() {
                                stop_reason = Some(sr.to_string());
                            }
                            if let Some(ot) = event["usage"]["output_tokens"].as_u64() {
                                output_tokens = ot as u32;
                            }
                        }
                        Some("message_stop") => {
                            let _ = tx
                                .send(SseFrame::Done {
                                    finish_reason: map_stop_reason(
                                        stop_reason.as_deref(),
                                        has_tool_calls,
                                    ),
                                    usage: Usage::from_counts(
                                        input_tokens,
                                        output_tokens,
                                        None,
                                        None,
                                        cached_tokens,
                                    ),
                                })
                                .await;
                            return;
                        }
                        Some("error") => {
                            let msg = event["error"]["message"]
                                .as_str()
                                .unwrap_or("unknown upstream error");
                            let _ = tx
                                .send(SseFrame::Error {
                                    message: msg.to_string(),
                                    kind: "transient".into(),
                                })
                                .await;
                            return;
                        }
                        _ => {}
                    }
                }
            }

            // Stream ended without message_stop.
            let _ = tx
                .send(SseFrame::Done {
                    finish_reason: map_stop_reason(stop_reason.as_deref(), has_tool_calls),
                    usage: Usage::from_counts(input_tokens, output_tokens, None, None, None),
                })
                .await;
        });

        rx
    }
}
