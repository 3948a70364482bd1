use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use portico_catalog::ProviderId;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CircuitState {
    /// Normal operation — requests flow through.
    Closed,
    /// Provider is failing — reject candidates immediately.
    Open { since: Instant },
    /// Allow a single probe request to test if the provider recovered.
    HalfOpen,
}

#[derive(Debug)]
struct CircuitBreaker {
    state: CircuitState,
    consecutive_failures: u32,
}

impl CircuitBreaker {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
        }
    }

    fn allow_request(&mut self, open_duration: Duration) -> bool {
        match self.state {
            CircuitState::Closed => true,
            CircuitState::Open { since } => {
                if since.elapsed() >= open_duration {
                    self.state = CircuitState::HalfOpen;
                    true
                } else {
                    false
                }
            }
            // Already probing — block additional concurrent requests.
            CircuitState::HalfOpen => false,
        }
    }

    fn record_success(&mut self) {
        self.consecutive_failures = 0;
        self.state = CircuitState::Closed;
    }

    fn record_failure(&mut self, threshold: u32) -> bool {
        self.consecutive_failures += 1;
        let was_open = matches!(self.state, CircuitState::Open { .. });
        if self.consecutive_failures >= threshold {
            self.state = CircuitState::Open {
                since: Instant::now(),
            };
        }
        !was_open && matches!(self.state, CircuitState::Open { .. })
    }
}

/// Per-provider circuit breakers shared across requests.
#[derive(Clone)]
pub struct ProviderBreakers {
    breakers: Arc<Mutex<HashMap<ProviderId, CircuitBreaker>>>,
    failure_threshold: u32,
    open_duration: Duration,
}

impl ProviderBreakers {
    pub fn new(failure_threshold: u32, open_duration: Duration) -> Self {
        Self {
            breakers: Arc::new(Mutex::new(HashMap::new())),
            failure_threshold,
            open_duration,
        }
    }

    /// Whether a candidate on this provider may proceed.
    pub fn allow(&self, provider: ProviderId) -> bool {
        let mut breakers = self.breakers.lock();
        breakers
            .entry(provider)
            .or_insert_with(CircuitBreaker::new)
            .allow_request(self.open_duration)
    }

    pub fn record_success(&self, provider: ProviderId) {
        let mut breakers = self.breakers.lock();
        if let Some(cb) = breakers.get_mut(&provider) {
            cb.record_success();
        }
    }

    pub fn record_failure(&self, provider: ProviderId) {
        let mut breakers = self.breakers.lock();
        let cb = breakers.entry(provider).or_insert_with(CircuitBreaker::new);
        if cb.record_failure(self.failure_threshold) {
            warn!(
                provider = %provider,
                failures = cb.consecutive_failures,
                "circuit breaker OPEN — provider disabled for {}s",
                self.open_duration.as_secs()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opens_after_threshold_and_half_opens() {
        let breakers = ProviderBreakers::new(3, Duration::from_millis(10));
        let p = ProviderId::Openai;
        assert!(breakers.allow(p));
        breakers.record_failure(p);
        breakers.record_failure(p);
        assert!(breakers.allow(p));
        breakers.record_failure(p);
        assert!(!breakers.allow(p));

        std::thread::sleep(Duration::from_millis(15));
        // First caller after cooldown becomes the probe…
        assert!(breakers.allow(p));
        // …and concurrent callers are still blocked.
        assert!(!breakers.allow(p));

        breakers.record_success(p);
        assert!(breakers.allow(p));
    }

    #[test]
    fn test_success_resets_failure_count() {
        let breakers = ProviderBreakers::new(2, Duration::from_secs(60));
        let p = ProviderId::Groq;
        breakers.record_failure(p);
        breakers.record_success(p);
        breakers.record_failure(p);
        assert!(breakers.allow(p));
    }
}
