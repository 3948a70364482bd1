use std::path::{Path, PathBuf};
use tracing::{info, warn};

use portico_core::{GatewayError, Result};

use crate::schema::{PorticoConfig, ProviderConfig, PROVIDER_ENV_KEYS};

/// Loads the gateway configuration.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Resolve the config path: explicit path > PORTICO_CONFIG env >
    /// ./portico.toml.
    pub fn resolve_path(explicit: Option<&Path>) -> PathBuf {
        if let Some(p) = explicit {
            return p.to_path_buf();
        }
        if let Ok(p) = std::env::var("PORTICO_CONFIG") {
            return PathBuf::from(p);
        }
        PathBuf::from("portico.toml")
    }

    /// Load the config from disk, falling back to defaults, then apply
    /// env overrides and validate.
    pub fn load(path: Option<&Path>) -> Result<PorticoConfig> {
        let config_path = Self::resolve_path(path);
        let config = if config_path.exists() {
            info!(?config_path, "loading configuration");
            let raw = std::fs::read_to_string(&config_path)?;
            toml::from_str::<PorticoConfig>(&raw).map_err(|e| {
                GatewayError::Config(format!("failed to parse {}: {e}", config_path.display()))
            })?
        } else {
            warn!(?config_path, "config file not found, using defaults");
            PorticoConfig::default()
        };

        let config = Self::apply_env_overrides(config);

        match config.validate() {
            Ok(warnings) => {
                for w in &warnings {
                    warn!("{w}");
                }
            }
            Err(e) => return Err(GatewayError::Config(e)),
        }

        Ok(config)
    }

    /// Apply env var overrides. Config file takes priority for provider
    /// keys; env is the fallback.
    pub fn apply_env_overrides(mut config: PorticoConfig) -> PorticoConfig {
        if let Ok(v) = std::env::var("PORTICO_LISTEN") {
            config.server.listen = v;
        }
        if let Ok(v) = std::env::var("DATABASE_URL") {
            config.log.db_path = PathBuf::from(v);
        }

        for (id, env_key) in PROVIDER_ENV_KEYS {
            let entry = config
                .providers
                .entry((*id).to_string())
                .or_insert_with(ProviderConfig::default);
            if entry.api_key.is_none() {
                if let Ok(v) = std::env::var(env_key) {
                    entry.api_key = Some(v);
                }
            }
        }

        // Azure and Bedrock carry extra structured options.
        if let Some(azure) = config.providers.get_mut("azure") {
            if azure.azure_resource.is_none() {
                if let Ok(v) = std::env::var("LLM_AZURE_RESOURCE") {
                    azure.azure_resource = Some(v);
                }
            }
            if azure.azure_api_version.is_none() {
                if let Ok(v) = std::env::var("LLM_AZURE_API_VERSION") {
                    azure.azure_api_version = Some(v);
                }
            }
        }
        if let Some(bedrock) = config.providers.get_mut("bedrock") {
            if bedrock.aws_region.is_none() {
                if let Ok(v) = std::env::var("LLM_AWS_REGION") {
                    bedrock.aws_region = Some(v);
                }
            }
            if bedrock.aws_region_prefix.is_none() {
                if let Ok(v) = std::env::var("LLM_AWS_REGION_PREFIX") {
                    bedrock.aws_region_prefix = Some(v);
                }
            }
            if bedrock.aws_access_key_id.is_none() {
                if let Ok(v) = std::env::var("LLM_AWS_ACCESS_KEY_ID") {
                    bedrock.aws_access_key_id = Some(v);
                }
            }
            if bedrock.aws_secret_access_key.is_none() {
                if let Ok(v) = std::env::var("LLM_AWS_SECRET_ACCESS_KEY") {
                    bedrock.aws_secret_access_key = Some(v);
                }
            }
        }

        config
    }
}
