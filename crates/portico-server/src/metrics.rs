//! Prometheus-compatible metrics for the gateway.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Global metrics registry.
#[derive(Debug, Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

#[derive(Debug)]
struct MetricsInner {
    /// Total HTTP requests served.
    http_requests_total: AtomicU64,
    /// Total HTTP errors (4xx + 5xx).
    http_errors_total: AtomicU64,
    /// Total buffered chat completions.
    completions_total: AtomicU64,
    /// Total streamed chat completions.
    completions_stream_total: AtomicU64,
    /// Total cache-served completions.
    cache_hits_total: AtomicU64,
    /// Total prompt tokens across buffered completions.
    prompt_tokens_total: AtomicU64,
    /// Total completion tokens across buffered completions.
    completion_tokens_total: AtomicU64,
    /// Server start time for uptime calculation.
    started_at: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner {
                http_requests_total: AtomicU64::new(0),
                http_errors_total: AtomicU64::new(0),
                completions_total: AtomicU64::new(0),
                completions_stream_total: AtomicU64::new(0),
                cache_hits_total: AtomicU64::new(0),
                prompt_tokens_total: AtomicU64::new(0),
                completion_tokens_total: AtomicU64::new(0),
                started_at: Instant::now(),
            }),
        }
    }

    pub fn inc_http_requests(&self) {
        self.inner
            .http_requests_total
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_http_errors(&self) {
        self.inner.http_errors_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_completions(&self) {
        self.inner.completions_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_stream_completions(&self) {
        self.inner
            .completions_stream_total
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_cache_hits(&self) {
        self.inner.cache_hits_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_tokens(&self, prompt: u32, completion: u32) {
        self.inner
            .prompt_tokens_total
            .fetch_add(u64::from(prompt), Ordering::Relaxed);
        self.inner
            .completion_tokens_total
            .fetch_add(u64::from(completion), Ordering::Relaxed);
    }

    pub fn uptime_secs(&self) -> u64 {
        self.inner.started_at.elapsed().as_secs()
    }

    /// Render metrics in Prometheus text exposition format.
    pub fn render_prometheus(&self) -> String {
        let m = &self.inner;
        format!(
            r#"# HELP portico_uptime_seconds Time since the server started.
# TYPE portico_uptime_seconds gauge
portico_uptime_seconds {}

# HELP portico_http_requests_total Total HTTP requests served.
# TYPE portico_http_requests_total counter
portico_http_requests_total {}

# HELP portico_http_errors_total Total HTTP errors (4xx/5xx).
# TYPE portico_http_errors_total counter
portico_http_errors_total {}

# HELP portico_completions_total Total buffered chat completions.
# TYPE portico_completions_total counter
portico_completions_total {}

# HELP portico_completions_stream_total Total streamed chat completions.
# TYPE portico_completions_stream_total counter
portico_completions_stream_total {}

# HELP portico_cache_hits_total Total cache-served completions.
# TYPE portico_cache_hits_total counter
portico_cache_hits_total {}

# HELP portico_prompt_tokens_total Total prompt tokens (buffered).
# TYPE portico_prompt_tokens_total counter
portico_prompt_tokens_total {}

# HELP portico_completion_tokens_total Total completion tokens (buffered).
# TYPE portico_completion_tokens_total counter
portico_completion_tokens_total {}
"#,
            self.uptime_secs(),
            m.http_requests_total.load(Ordering::Relaxed),
            m.http_errors_total.load(Ordering::Relaxed),
            m.completions_total.load(Ordering::Relaxed),
            m.completions_stream_total.load(Ordering::Relaxed),
            m.cache_hits_total.load(Ordering::Relaxed),
            m.prompt_tokens_total.load(Ordering::Relaxed),
            m.completion_tokens_total.load(Ordering::Relaxed),
        )
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_render() {
        let m = Metrics::new();
        m.inc_http_requests();
        m.inc_http_requests();
        m.inc_completions();
        m.add_tokens(100, 50);
        let output = m.render_prometheus();
        assert!(output.contains("portico_http_requests_total 2"));
        assert!(output.contains("portico_completions_total 1"));
        assert!(output.contains("portico_prompt_tokens_total 100"));
        assert!(output.contains("# TYPE portico_uptime_seconds gauge"));
    }
}
