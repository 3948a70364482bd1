use thiserror::Error;

/// Unified error type for the entire gateway.
///
/// Variants map one-to-one onto the dispatch error taxonomy: the first
/// group terminates a request before any upstream attempt, the second
/// group controls the candidate attempt loop, the rest are generic.
#[derive(Error, Debug)]
pub enum GatewayError {
    // ── Inbound / terminal ─────────────────────────────────────
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("unknown model: {0}")]
    UnknownModel(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("insufficient credits: estimated {estimated:.6}, available {available:.6}")]
    InsufficientCredits { estimated: f64, available: f64 },

    // ── Candidate attempt loop ─────────────────────────────────
    #[error("provider not configured: {0}")]
    ProviderNotConfigured(String),

    #[error("capability refusal: {provider}: {reason}")]
    CapabilityRefusal { provider: String, reason: String },

    #[error("upstream auth failure: {provider} returned {status}")]
    UpstreamAuth { provider: String, status: u16 },

    #[error("rate limited by {provider}")]
    RateLimited {
        provider: String,
        retry_after_secs: Option<u64>,
    },

    #[error("transient upstream failure: {provider}: {detail}")]
    Transient { provider: String, detail: String },

    #[error("upstream rejected request: {provider}: {detail}")]
    UpstreamBadRequest {
        provider: String,
        detail: String,
        /// True when the adapter rewrote the request into a
        /// provider-specific schema, so the rejection may be an artifact
        /// of the translation rather than the caller's input.
        translated: bool,
    },

    #[error("stream aborted mid-flight: {0}")]
    StreamMidFlight(String),

    #[error("all providers unavailable for {model} after {attempts} attempts")]
    UpstreamUnavailable { model: String, attempts: usize },

    // ── Generic ────────────────────────────────────────────────
    #[error("config error: {0}")]
    Config(String),

    #[error("ledger error: {0}")]
    Ledger(String),

    #[error("log store error: {0}")]
    LogStore(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl GatewayError {
    /// Short stable identifier used in log records and error envelopes.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "bad_request",
            Self::UnknownModel(_) => "unknown_model",
            Self::Unauthorized(_) => "unauthorized",
            Self::Forbidden(_) => "forbidden",
            Self::InsufficientCredits { .. } => "insufficient_credits",
            Self::ProviderNotConfigured(_) => "provider_not_configured",
            Self::CapabilityRefusal { .. } => "capability_refusal",
            Self::UpstreamAuth { .. } => "upstream_auth",
            Self::RateLimited { .. } => "rate_limited",
            Self::Transient { .. } => "transient",
            Self::UpstreamBadRequest { .. } => "upstream_bad_request",
            Self::StreamMidFlight(_) => "stream_mid_flight",
            Self::UpstreamUnavailable { .. } => "upstream_unavailable",
            Self::Config(_) => "config",
            Self::Ledger(_) => "ledger",
            Self::LogStore(_) => "log_store",
            Self::Internal(_) | Self::Io(_) | Self::Serialization(_) | Self::Other(_) => {
                "internal"
            }
        }
    }

    /// HTTP status the ingress handler maps this error to.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::BadRequest(_) | Self::UnknownModel(_) => 400,
            Self::Unauthorized(_) => 401,
            Self::Forbidden(_) => 403,
            Self::InsufficientCredits { .. } => 402,
            Self::RateLimited { .. } => 429,
            Self::UpstreamUnavailable { .. }
            | Self::Transient { .. }
            | Self::StreamMidFlight(_) => 502,
            Self::ProviderNotConfigured(_)
            | Self::CapabilityRefusal { .. }
            | Self::UpstreamAuth { .. } => 502,
            // A passthrough request the upstream called malformed is the
            // caller's own 400; a translated one is a gateway-side 502.
            Self::UpstreamBadRequest { translated, .. } => {
                if *translated {
                    502
                } else {
                    400
                }
            }
            _ => 500,
        }
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_is_stable() {
        let e = GatewayError::RateLimited {
            provider: "openai".into(),
            retry_after_secs: Some(30),
        };
        assert_eq!(e.kind(), "rate_limited");
        assert_eq!(e.http_status(), 429);
    }

    #[test]
    fn test_insufficient_credits_maps_to_402() {
        let e = GatewayError::InsufficientCredits {
            estimated: 0.5,
            available: 0.0,
        };
        assert_eq!(e.http_status(), 402);
    }

    #[test]
    fn test_exhaustion_maps_to_502() {
        let e = GatewayError::UpstreamUnavailable {
            model: "gpt-4o".into(),
            attempts: 6,
        };
        assert_eq!(e.http_status(), 502);
        assert_eq!(e.kind(), "upstream_unavailable");
    }
}
