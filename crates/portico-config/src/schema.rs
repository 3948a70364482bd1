use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Root configuration — maps to `portico.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PorticoConfig {
    pub server: ServerConfig,
    pub dispatch: DispatchConfig,
    pub cache: CacheConfig,
    pub log: LogConfig,
    pub ledger: LedgerConfig,
    /// Per-provider options, keyed by provider id ("openai", "azure", …).
    pub providers: HashMap<String, ProviderConfig>,
    /// Gateway API keys and the org context each resolves to.
    pub api_keys: Vec<ApiKeyConfig>,
}

// ── Server ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen: String,
    pub cors: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:8787".into(),
            cors: true,
        }
    }
}

// ── Dispatch ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Retries of one candidate on transient errors, beyond the first try.
    pub max_retries: u32,
    /// Base delay for exponential backoff (doubles each retry).
    pub base_delay_ms: u64,
    /// Deadline for a single upstream call.
    pub upstream_timeout_secs: u64,
    /// `max_tokens` injected for providers that require it when the
    /// client omits it.
    pub default_max_tokens: u32,
    /// Consecutive failures before a provider's circuit opens.
    pub circuit_failure_threshold: u32,
    /// How long an open circuit stays open before a probe is allowed.
    pub circuit_open_secs: u64,
    /// When a stream is requested but no candidate supports streaming:
    /// true = serve buffered, false = fail.
    pub stream_downgrade: bool,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay_ms: 500,
            upstream_timeout_secs: 120,
            default_max_tokens: 4096,
            circuit_failure_threshold: 5,
            circuit_open_secs: 60,
            stream_downgrade: true,
        }
    }
}

// ── Cache ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub max_entries: u64,
    /// TTL for plain chat responses.
    pub ttl_secs: u64,
    /// TTL for deterministic structured (JSON) outputs.
    pub structured_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: 10_000,
            ttl_secs: 300,
            structured_ttl_secs: 3600,
        }
    }
}

// ── Usage log ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// SQLite database path for usage logs.
    pub db_path: PathBuf,
    /// In-process buffer capacity before enqueue falls back to a
    /// synchronous write.
    pub buffer_size: usize,
    /// Records per drain batch.
    pub batch_size: usize,
    /// Maximum time a buffered record waits before being flushed.
    pub flush_interval_ms: u64,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("portico.db"),
            buffer_size: 1024,
            batch_size: 64,
            flush_interval_ms: 500,
        }
    }
}

// ── Ledger ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Starting credit balance per org (in-memory ledger only; a real
    /// deployment points the gateway at an external ledger service).
    pub initial_credits: HashMap<String, f64>,
}

// ── Providers ──────────────────────────────────────────────────

/// Per-provider options. Only the fields a provider family needs are
/// consulted; the rest stay `None`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Gateway-owned API key. Env var fills this when unset.
    pub api_key: Option<String>,
    /// Override the default base URL (self-hosted gateways, proxies).
    pub base_url: Option<String>,
    /// Custom display name, lowercase letters only.
    pub display_name: Option<String>,
    /// Azure: resource name, required for the azure provider.
    pub azure_resource: Option<String>,
    /// Azure: API version query parameter.
    pub azure_api_version: Option<String>,
    /// Bedrock: region, e.g. "us-east-1".
    pub aws_region: Option<String>,
    /// Bedrock: cross-region inference profile prefix ("us", "eu").
    pub aws_region_prefix: Option<String>,
    /// Bedrock: SigV4 key pair.
    pub aws_access_key_id: Option<String>,
    pub aws_secret_access_key: Option<String>,
}

// ── API keys ───────────────────────────────────────────────────

/// One gateway API key and the org context it resolves to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKeyConfig {
    pub key: String,
    pub org: String,
    #[serde(default)]
    pub project: Option<String>,
    /// Empty = all providers allowed.
    #[serde(default)]
    pub allowed_providers: Vec<String>,
    #[serde(default)]
    pub blocked_providers: Vec<String>,
    /// Org-supplied provider keys (BYOK), keyed by provider id.
    #[serde(default)]
    pub byok: HashMap<String, String>,
    /// Org opted in to storing prompt/response bodies in usage logs.
    #[serde(default)]
    pub log_bodies: bool,
}

static DISPLAY_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new("^[a-z]+$").expect("valid display-name regex"));

/// Provider ids the config section accepts, with the env var holding the
/// gateway-owned key for each.
pub const PROVIDER_ENV_KEYS: &[(&str, &str)] = &[
    ("openai", "LLM_OPENAI_API_KEY"),
    ("anthropic", "LLM_ANTHROPIC_API_KEY"),
    ("google", "LLM_GOOGLE_API_KEY"),
    ("bedrock", "LLM_AWS_SECRET_ACCESS_KEY"),
    ("groq", "LLM_GROQ_API_KEY"),
    ("together", "LLM_TOGETHER_API_KEY"),
    ("inference-net", "LLM_INFERENCE_NET_API_KEY"),
    ("azure", "LLM_AZURE_API_KEY"),
];

impl PorticoConfig {
    /// Validate the config. Returns warnings; fatal problems are errors.
    pub fn validate(&self) -> Result<Vec<String>, String> {
        let mut warnings = Vec::new();

        let known: Vec<&str> = PROVIDER_ENV_KEYS.iter().map(|(id, _)| *id).collect();
        for (id, p) in &self.providers {
            if !known.contains(&id.as_str()) {
                return Err(format!("providers.{id}: unknown provider id"));
            }
            if let Some(ref name) = p.display_name {
                if !DISPLAY_NAME_RE.is_match(name) {
                    return Err(format!(
                        "providers.{id}.display_name: {name:?} must match [a-z]+"
                    ));
                }
            }
            if id == "azure" && p.api_key.is_some() && p.azure_resource.is_none() {
                return Err("providers.azure: azure_resource is required".into());
            }
        }

        for k in &self.api_keys {
            if k.key.len() < 16 {
                warnings.push(format!("api key for org {}: shorter than 16 chars", k.org));
            }
            for pid in k.allowed_providers.iter().chain(&k.blocked_providers) {
                if !known.contains(&pid.as_str()) {
                    return Err(format!("api key for org {}: unknown provider {pid}", k.org));
                }
            }
        }

        if self.api_keys.is_empty() {
            warnings.push("no api_keys configured — every request will be rejected".into());
        }
        if self.dispatch.default_max_tokens == 0 {
            return Err("dispatch.default_max_tokens must be > 0".into());
        }

        Ok(warnings)
    }

    /// The configured key for a provider, if any.
    pub fn provider(&self, id: &str) -> Option<&ProviderConfig> {
        self.providers.get(id)
    }
}
