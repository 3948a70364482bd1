use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use moka::Expiry;
use portico_config::CacheConfig;
use portico_core::{ChatRequest, ChatResponse, Result};

/// One cached normalized response with its own TTL.
#[derive(Clone)]
struct CachedEntry {
    response: Arc<ChatResponse>,
    ttl: Duration,
}

struct PerEntryTtl;

impl Expiry<String, CachedEntry> for PerEntryTtl {
    fn expire_after_create(
        &self,
        _key: &String,
        entry: &CachedEntry,
        _created_at: std::time::Instant,
    ) -> Option<Duration> {
        Some(entry.ttl)
    }
}

/// Response cache keyed by request fingerprint, with per-key
/// single-flight fill. Streaming and non-deterministic requests never
/// reach it — the dispatcher gates eligibility.
#[derive(Clone)]
pub struct ResponseCache {
    enabled: bool,
    store: moka::future::Cache<String, CachedEntry>,
    /// Per-key fill locks: at most one concurrent filler per key.
    inflight: Arc<DashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    ttl: Duration,
    structured_ttl: Duration,
}

impl ResponseCache {
    pub fn new(cfg: &CacheConfig) -> Self {
        Self {
            enabled: cfg.enabled,
            store: moka::future::Cache::builder()
                .max_capacity(cfg.max_entries)
                .expire_after(PerEntryTtl)
                .build(),
            inflight: Arc::new(DashMap::new()),
            ttl: Duration::from_secs(cfg.ttl_secs),
            structured_ttl: Duration::from_secs(cfg.structured_ttl_secs),
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Content-addressed fingerprint over the request minus its `stream`
    /// flag and routing hints. Field order is fixed by construction, so
    /// equal requests hash equally.
    pub fn fingerprint(model_id: &str, req: &ChatRequest) -> String {
        let canonical = serde_json::json!({
            "model": model_id,
            "messages": req.messages,
            "tools": req.tools,
            "tool_choice": req.tool_choice,
            "temperature": req.temperature,
            "top_p": req.top_p,
            "max_tokens": req.max_tokens,
            "stop": req.stop.as_ref().map(|s| s.as_vec()),
            "seed": req.seed,
            "response_format": req.response_format,
        });
        blake3::hash(canonical.to_string().as_bytes())
            .to_hex()
            .to_string()
    }

    /// Look up a live entry.
    pub async fn get(&self, key: &str) -> Option<Arc<ChatResponse>> {
        if !self.enabled {
            return None;
        }
        self.store.get(key).await.map(|e| e.response)
    }

    /// Store a response. Last write wins on concurrent puts.
    pub async fn insert(&self, key: String, response: Arc<ChatResponse>, structured: bool) {
        if !self.enabled {
            return;
        }
        let ttl = if structured {
            self.structured_ttl
        } else {
            self.ttl
        };
        self.store.insert(key, CachedEntry { response, ttl }).await;
    }

    /// Single-flight get-or-compute: at most one filler runs per key;
    /// callers that arrive during the fill observe the filled value. A
    /// failed filler populates nothing and its error is not cached —
    /// the next caller runs its own filler.
    ///
    /// Returns `(response, was_hit)`; `was_hit` is false only for the
    /// caller whose filler produced the value.
    pub async fn get_or_compute<F, Fut>(
        &self,
        key: &str,
        structured: bool,
        filler: F,
    ) -> Result<(Arc<ChatResponse>, bool)>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<ChatResponse>>,
    {
        if !self.enabled {
            return filler().await.map(|r| (Arc::new(r), false));
        }
        if let Some(hit) = self.get(key).await {
            return Ok((hit, true));
        }

        let cell = self
            .inflight
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();
        let guard = cell.lock().await;

        // The filler that held the lock before us may have populated the
        // store.
        if let Some(hit) = self.get(key).await {
            drop(guard);
            self.release(key, &cell);
            return Ok((hit, true));
        }

        let result = filler().await;
        let out = match result {
            Ok(response) => {
                let response = Arc::new(response);
                self.insert(key.to_string(), Arc::clone(&response), structured)
                    .await;
                Ok((response, false))
            }
            Err(e) => Err(e),
        };
        drop(guard);
        self.release(key, &cell);
        out
    }

    /// Opportunistically drop the in-flight cell once nobody else holds
    /// it (the map keeps one reference, we keep one).
    fn release(&self, key: &str, cell: &Arc<tokio::sync::Mutex<()>>) {
        self.inflight
            .remove_if(key, |_, v| Arc::ptr_eq(v, cell) && Arc::strong_count(cell) <= 2);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use portico_core::{
        AssistantMessage, Choice, FinishReason, GatewayError, ResponseMetadata, Usage,
    };
    use std::sync::atomic::{AtomicU32, Ordering};

    fn config() -> CacheConfig {
        CacheConfig {
            enabled: true,
            max_entries: 100,
            ttl_secs: 60,
            structured_ttl_secs: 600,
        }
    }

    fn response(text: &str) -> ChatResponse {
        ChatResponse {
            id: "chatcmpl-test".into(),
            object: "chat.completion".into(),
            created: 0,
            model: "openai/gpt-4o".into(),
            choices: vec![Choice {
                index: 0,
                message: AssistantMessage::text(text),
                finish_reason: FinishReason::Stop,
            }],
            usage: Usage::from_counts(5, 1, None, None, None),
            metadata: ResponseMetadata::default(),
        }
    }

    fn request(content: &str, temperature: f32) -> ChatRequest {
        serde_json::from_value(serde_json::json!({
            "model": "gpt-4o",
            "messages": [{"role": "user", "content": content}],
            "temperature": temperature,
        }))
        .unwrap()
    }

    #[test]
    fn test_fingerprint_ignores_stream_flag() {
        let mut a = request("hi", 0.0);
        let mut b = request("hi", 0.0);
        a.stream = false;
        b.stream = true;
        assert_eq!(
            ResponseCache::fingerprint("gpt-4o", &a),
            ResponseCache::fingerprint("gpt-4o", &b)
        );
    }

    #[test]
    fn test_fingerprint_varies_with_content_and_params() {
        let a = request("hi", 0.0);
        let b = request("bye", 0.0);
        let c = request("hi", 0.5);
        let key_a = ResponseCache::fingerprint("gpt-4o", &a);
        assert_ne!(key_a, ResponseCache::fingerprint("gpt-4o", &b));
        assert_ne!(key_a, ResponseCache::fingerprint("gpt-4o", &c));
        assert_ne!(key_a, ResponseCache::fingerprint("gpt-4o-mini", &a));
    }

    #[tokio::test]
    async fn test_single_flight_filler_runs_once() {
        let cache = ResponseCache::new(&config());
        let calls = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            let calls = Arc::clone(&calls);
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_compute("k", false, || async {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok(response("slow"))
                    })
                    .await
                    .unwrap()
            }));
        }

        let mut results = Vec::new();
        for h in handles {
            results.push(h.await.unwrap());
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(
            results
                .iter()
                .all(|(r, _)| r.choices[0].message.content.as_deref() == Some("slow"))
        );
        assert_eq!(results.iter().filter(|(_, hit)| !hit).count(), 1);
    }

    #[tokio::test]
    async fn test_failed_filler_not_cached() {
        let cache = ResponseCache::new(&config());
        let err = cache
            .get_or_compute("k", false, || async {
                Err::<ChatResponse, _>(GatewayError::Transient {
                    provider: "openai".into(),
                    detail: "boom".into(),
                })
            })
            .await;
        assert!(err.is_err());

        // The next caller retries independently and can succeed.
        let (resp, hit) = cache
            .get_or_compute("k", false, || async { Ok(response("recovered")) })
            .await
            .unwrap();
        assert!(!hit);
        assert_eq!(resp.choices[0].message.content.as_deref(), Some("recovered"));
    }

    #[tokio::test]
    async fn test_disabled_cache_always_fills() {
        let mut cfg = config();
        cfg.enabled = false;
        let cache = ResponseCache::new(&cfg);
        let (_, hit) = cache
            .get_or_compute("k", false, || async { Ok(response("a")) })
            .await
            .unwrap();
        assert!(!hit);
        let (_, hit) = cache
            .get_or_compute("k", false, || async { Ok(response("b")) })
            .await
            .unwrap();
        assert!(!hit);
    }
}
