use futures::StreamExt;
use tokio::sync::mpsc;

use portico_catalog::{ProviderBinding, ProviderId};
use portico_core::{
    ChatRequest, FinishReason, FunctionCall, MessageContent, Result, Role, SseFrame, StreamDelta,
    ToolCall, ToolCallChunk, Usage,
};

use crate::adapter::{ByteStream, ParsedChoice, ParsedResponse, ProviderAdapter, UpstreamRequest};
use crate::credentials::Credential;
use crate::sse::SseLineDecoder;

/// Google Generative Language API adapter. Conversations split into
/// `contents` with roles `user`/`model`; system messages become
/// `systemInstruction`; sampling lives under `generationConfig`.
pub struct GoogleAdapter;

impl GoogleAdapter {
    pub fn new() -> Self {
        Self
    }

    fn build_body(req: &ChatRequest, stream: bool) -> serde_json::Value {
        let mut system_parts: Vec<serde_json::Value> = Vec::new();
        let mut contents: Vec<serde_json::Value> = Vec::new();

        for msg in &req.messages {
            match msg.role {
                Role::System => {
                    system_parts.push(serde_json::json!({"text": msg.text_content()}))
                }
                Role::User | Role::Tool => contents.push(serde_json::json!({
                    "role": "user",
                    "parts": translate_parts(msg.content.as_ref()),
                })),
                Role::Assistant => {
                    let mut parts = translate_parts(msg.content.as_ref())
                        .as_array()
                        .cloned()
                        .unwrap_or_default();
                    for tc in msg.tool_calls.iter().flatten() {
                        let args: serde_json::Value =
                            serde_json::from_str(&tc.function.arguments)
                                .unwrap_or(serde_json::json!({}));
                        parts.push(serde_json::json!({
                            "functionCall": {"name": tc.function.name, "args": args},
                        }));
                    }
                    contents.push(serde_json::json!({"role": "model", "parts": parts}));
                }
            }
        }

        let mut generation = serde_json::Map::new();
        if let Some(t) = req.temperature {
            generation.insert("temperature".into(), serde_json::json!(t));
        }
        if let Some(p) = req.top_p {
            generation.insert("topP".into(), serde_json::json!(p));
        }
        if let Some(m) = req.max_tokens {
            generation.insert("maxOutputTokens".into(), serde_json::json!(m));
        }
        if let Some(ref stop) = req.stop {
            generation.insert("stopSequences".into(), serde_json::json!(stop.as_vec()));
        }
        if req.wants_json_output() {
            generation.insert(
                "responseMimeType".into(),
                serde_json::json!("application/json"),
            );
        }

        let mut body = serde_json::json!({ "contents": contents });
        if !system_parts.is_empty() {
            body["systemInstruction"] = serde_json::json!({"parts": system_parts});
        }
        if !generation.is_empty() {
            body["generationConfig"] = serde_json::Value::Object(generation);
        }
        if let Some(ref tools) = req.tools {
            if !tools.is_empty() {
                let decls: Vec<serde_json::Value> = tools
                    .iter()
                    .map(|t| {
                        serde_json::json!({
                            "name": t.function.name,
                            "description": t.function.description,
                            "parameters": t.function.parameters,
                        })
                    })
                    .collect();
                body["tools"] = serde_json::json!([{"functionDeclarations": decls}]);
            }
        }
        // Streaming is selected by the URL, not the body.
        let _ = stream;
        body
    }
}

impl Default for GoogleAdapter {
    fn default() -> Self {
        Self::new()
    }
}

fn translate_parts(content: Option<&MessageContent>) -> serde_json::Value {
    match content {
        None => serde_json::json!([]),
        Some(MessageContent::Text(t)) => serde_json::json!([{"text": t}]),
        Some(MessageContent::Parts(parts)) => {
            let out: Vec<serde_json::Value> = parts
                .iter()
                .map(|p| match p {
                    portico_core::ContentPart::Text { text } => serde_json::json!({"text": text}),
                    portico_core::ContentPart::ImageUrl { image_url } => serde_json::json!({
                        "fileData": {"fileUri": image_url.url},
                    }),
                })
                .collect();
            serde_json::json!(out)
        }
    }
}

pub(crate) fn map_google_finish(raw: Option<&str>, has_tool_calls: bool) -> FinishReason {
    match raw {
        Some("MAX_TOKENS") => FinishReason::Length,
        Some("SAFETY") | Some("PROHIBITED_CONTENT") | Some("BLOCKLIST") => {
            FinishReason::ContentFilter
        }
        _ if has_tool_calls => FinishReason::ToolCalls,
        // STOP and anything unrecognized default to stop.
        _ => FinishReason::Stop,
    }
}

fn parse_candidate(candidate: &serde_json::Value) -> ParsedChoice {
    let mut content = String::new();
    let mut tool_calls: Vec<ToolCall> = Vec::new();
    if let Some(parts) = candidate["content"]["parts"].as_array() {
        for (i, p) in parts.iter().enumerate() {
            if let Some(text) = p["text"].as_str() {
                content.push_str(text);
            }
            if let Some(fc) = p.get("functionCall").filter(|v| !v.is_null()) {
                tool_calls.push(ToolCall {
                    id: format!("call_{i}"),
                    kind: "function".into(),
                    function: FunctionCall {
                        name: fc["name"].as_str().unwrap_or("").to_string(),
                        arguments: fc["args"].to_string(),
                    },
                });
            }
        }
    }
    let has_tool_calls = !tool_calls.is_empty();
    ParsedChoice {
        content: (!content.is_empty()).then_some(content),
        reasoning: None,
        tool_calls,
        images: vec![],
        finish_reason: Some(map_google_finish(
            candidate["finishReason"].as_str(),
            has_tool_calls,
        )),
    }
}

fn parse_usage(meta: &serde_json::Value) -> Usage {
    Usage::from_counts(
        meta["promptTokenCount"].as_u64().unwrap_or(0) as u32,
        meta["candidatesTokenCount"].as_u64().unwrap_or(0) as u32,
        meta["totalTokenCount"].as_u64().map(|t| t as u32),
        meta["thoughtsTokenCount"].as_u64().map(|t| t as u32),
        meta["cachedContentTokenCount"].as_u64().map(|t| t as u32),
    )
}

impl ProviderAdapter for GoogleAdapter {
    fn provider(&self) -> ProviderId {
        ProviderId::Google
    }

    fn build_request(
        &self,
        req: &ChatRequest,
        binding: &ProviderBinding,
        cred: &Credential,
    ) -> Result<UpstreamRequest> {
        let body = Self::build_body(req, req.stream);
        let verb = if req.stream {
            "streamGenerateContent?alt=sse"
        } else {
            "generateContent"
        };
        Ok(UpstreamRequest {
            provider: ProviderId::Google,
            url: format!(
                "{}/models/{}:{verb}",
                cred.base_url, binding.provider_model
            ),
            headers: vec![("x-goog-api-key".into(), cred.api_key.clone())],
            body: serde_json::to_vec(&body)?,
            translated: true,
        })
    }

    fn parse_response(&self, body: &[u8]) -> Result<ParsedResponse> {
        let data: serde_json::Value = serde_json::from_slice(body)?;
        let choices = data["candidates"]
            .as_array()
            .map(|cs| cs.iter().map(parse_candidate).collect())
            .unwrap_or_default();
        Ok(ParsedResponse {
            id: None,
            model: data["modelVersion"].as_str().map(String::from),
            choices,
            usage: parse_usage(&data["usageMetadata"]),
        })
    }

    fn parse_stream(&self, mut bytes: ByteStream) -> mpsc::Receiver<SseFrame> {
        let (tx, rx) = mpsc::channel(256);

        tokio::spawn(async move {
            let mut decoder = SseLineDecoder::new();
            let mut usage = Usage::default();
            let mut finish: Option<FinishReason> = None;
            let mut has_tool_calls = false;
            let mut tool_index = 0u32;

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
                    if let Some(meta) = event.get("usageMetadata").filter(|m| !m.is_null()) {
                        usage = parse_usage(meta);
                    }
                    let candidate = &event["candidates"][0];
                    let mut out = StreamDelta::default();
                    if let Some(parts) = candidate["content"]["parts"].as_array() {
                        for p in parts {
                            if let Some(text) = p["text"].as_str() {
                                if !text.is_empty() {
                                    out.content =
                                        Some(out.content.unwrap_or_default() + text);
                                }
                            }
                            if let Some(fc) = p.get("functionCall").filter(|v| !v.is_null()) {
                                has_tool_calls = true;
                                out.tool_calls.push(ToolCallChunk {
                                    index: tool_index,
                                    id: Some(format!("call_{tool_index}")),
                                    name: fc["name"].as_str().map(String::from),
                                    arguments: Some(fc["args"].to_string()),
                                });
                                tool_index += 1;
                            }
                        }
                    }
                    if let Some(fr) = candidate["finishReason"].as_str() {
                        finish = Some(map_google_finish(Some(fr), has_tool_calls));
                    }
                    if !out.is_empty() && tx.send(SseFrame::Delta(out)).await.is_err() {
                        return;
                    }
                }
            }

            // Google streams end when the HTTP body does; the last chunk
            // carried finishReason and usageMetadata.
            let _ = tx
                .send(SseFrame::Done {
                    finish_reason: finish.unwrap_or(FinishReason::Stop),
                    usage: Usage::from_counts(
                        usage.prompt_tokens,
                        usage.completion_tokens,
                        None,
                        usage.reasoning_tokens,
                        Some(usage.cached_tokens()),
                    ),
                })
                .await;
        });

        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use portico_catalog::{Capabilities, Pricing, Stability};

    fn binding() -> ProviderBinding {
        ProviderBinding {
            provider: ProviderId::Google,
            provider_model: "gemini-1.5-pro".into(),
            pricing: Pricing::per_million(1.25, 5.00),
            context_window: 2_000_000,
            max_output: 8_192,
            caps: Capabilities {
                streaming: true,
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
            api_key: "goog-key".into(),
            base_url: "https://generativelanguage.googleapis.com/v1beta".into(),
            mode: crate::credentials::CredentialMode::Gateway,
            azure: None,
            aws: None,
        }
    }

    #[test]
    fn test_contents_use_user_and_model_roles() {
        let req: ChatRequest = serde_json::from_value(serde_json::json!({
            "model": "gemini-1.5-pro",
            "messages": [
                {"role": "system", "content": "be terse"},
                {"role": "user", "content": "hi"},
                {"role": "assistant", "content": "hello"},
                {"role": "user", "content": "again"},
            ],
            "max_tokens": 100,
        }))
        .unwrap();
        let adapter = GoogleAdapter::new();
        let up = adapter.build_request(&req, &binding(), &cred()).unwrap();
        assert!(up.url.ends_with("models/gemini-1.5-pro:generateContent"));
        let body = up.body_json().unwrap();
        let contents = body["contents"].as_array().unwrap();
        assert_eq!(contents.len(), 3);
        assert_eq!(contents[0]["role"], "user");
        assert_eq!(contents[1]["role"], "model");
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "be terse");
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 100);
    }

    #[test]
    fn test_stream_url_uses_sse_alt() {
        let mut req: ChatRequest = serde_json::from_value(serde_json::json!({
            "model": "gemini-1.5-pro",
            "messages": [{"role": "user", "content": "hi"}],
        }))
        .unwrap();
        req.stream = true;
        let adapter = GoogleAdapter::new();
        let up = adapter.build_request(&req, &binding(), &cred()).unwrap();
        assert!(up.url.contains(":streamGenerateContent?alt=sse"));
    }

    #[test]
    fn test_parse_response_defaults_to_stop() {
        let raw = serde_json::json!({
            "candidates": [{
                "content": {"role": "model", "parts": [{"text": "hey"}]},
                "finishReason": "SOMETHING_NEW",
            }],
            "usageMetadata": {"promptTokenCount": 4, "candidatesTokenCount": 2, "totalTokenCount": 6},
        });
        let adapter = GoogleAdapter::new();
        let parsed = adapter.parse_response(raw.to_string().as_bytes()).unwrap();
        assert_eq!(parsed.choices[0].finish_reason, Some(FinishReason::Stop));
        assert_eq!(parsed.usage.total_tokens, 6);
    }

    #[test]
    fn test_parse_function_call() {
        let raw = serde_json::json!({
            "candidates": [{
                "content": {"role": "model", "parts": [
                    {"functionCall": {"name": "lookup", "args": {"q": "rust"}}},
                ]},
                "finishReason": "STOP",
            }],
            "usageMetadata": {"promptTokenCount": 9, "candidatesTokenCount": 3},
        });
        let adapter = GoogleAdapter::new();
        let parsed = adapter.parse_response(raw.to_string().as_bytes()).unwrap();
        let choice = &parsed.choices[0];
        assert_eq!(choice.finish_reason, Some(FinishReason::ToolCalls));
        assert_eq!(choice.tool_calls[0].function.name, "lookup");
    }
}
