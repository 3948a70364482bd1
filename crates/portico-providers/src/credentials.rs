use std::collections::HashMap;

use portico_catalog::ProviderId;
use portico_config::{PorticoConfig, ProviderConfig};
use portico_core::{GatewayError, Result};

/// Whose key a request runs on. BYOK requests are billed at provider
/// cost only; the gateway margin is zeroed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialMode {
    Gateway,
    Byok,
}

/// Azure needs a resource name and API version on top of the key.
#[derive(Debug, Clone)]
pub struct AzureOptions {
    pub resource: String,
    pub api_version: String,
}

/// Bedrock signs with a key pair scoped to a region; `region_prefix`
/// selects a cross-region inference profile.
#[derive(Debug, Clone)]
pub struct AwsOptions {
    pub region: String,
    pub region_prefix: Option<String>,
    pub access_key_id: String,
    pub secret_access_key: String,
}

/// A resolved credential for one (org, provider) pair.
#[derive(Debug, Clone)]
pub struct Credential {
    pub api_key: String,
    /// Resolved base URL (catalog default unless overridden).
    pub base_url: String,
    pub mode: CredentialMode,
    pub azure: Option<AzureOptions>,
    pub aws: Option<AwsOptions>,
}

/// The org context a gateway API key resolves to.
#[derive(Debug, Clone, Default)]
pub struct OrgContext {
    pub org_id: String,
    pub project_id: Option<String>,
    /// Empty = all providers allowed.
    pub allowed_providers: Vec<ProviderId>,
    pub blocked_providers: Vec<ProviderId>,
    /// Org-stored provider keys (BYOK).
    pub byok: HashMap<ProviderId, String>,
    /// Org opted in to persisting prompt/response bodies in usage logs.
    pub log_bodies: bool,
}

impl OrgContext {
    pub fn provider_allowed(&self, id: ProviderId) -> bool {
        if self.blocked_providers.contains(&id) {
            return false;
        }
        self.allowed_providers.is_empty() || self.allowed_providers.contains(&id)
    }
}

/// Resolves credentials: org BYOK key first, then the gateway-owned key
/// from config (already backfilled from env vars by the loader).
#[derive(Clone)]
pub struct CredentialResolver {
    providers: HashMap<String, ProviderConfig>,
}

impl CredentialResolver {
    pub fn new(config: &PorticoConfig) -> Self {
        Self {
            providers: config.providers.clone(),
        }
    }

    pub fn resolve(&self, org: &OrgContext, provider: ProviderId) -> Result<Credential> {
        let info = portico_catalog::ProviderInfo::for_provider(provider);
        let cfg = self.providers.get(provider.as_str());
        let base_url = cfg
            .and_then(|c| c.base_url.clone())
            .unwrap_or_else(|| info.base_url.to_string());

        // Bedrock credentials are a signed key pair; BYOK does not apply.
        if provider == ProviderId::Bedrock {
            let cfg = cfg.ok_or_else(|| {
                GatewayError::ProviderNotConfigured(provider.to_string())
            })?;
            let (Some(access_key_id), Some(secret), Some(region)) = (
                cfg.aws_access_key_id.clone(),
                cfg.aws_secret_access_key.clone(),
                cfg.aws_region.clone(),
            ) else {
                return Err(GatewayError::ProviderNotConfigured(provider.to_string()));
            };
            return Ok(Credential {
                api_key: String::new(),
                base_url: base_url.replace("{region}", &region),
                mode: CredentialMode::Gateway,
                azure: None,
                aws: Some(AwsOptions {
                    region,
                    region_prefix: cfg.aws_region_prefix.clone(),
                    access_key_id,
                    secret_access_key: secret,
                }),
            });
        }

        let (api_key, mode) = if let Some(key) = org.byok.get(&provider) {
            (key.clone(), CredentialMode::Byok)
        } else if let Some(key) = cfg.and_then(|c| c.api_key.clone()) {
            (key, CredentialMode::Gateway)
        } else {
            return Err(GatewayError::ProviderNotConfigured(provider.to_string()));
        };

        let azure = if provider == ProviderId::Azure {
            let resource = cfg
                .and_then(|c| c.azure_resource.clone())
                .ok_or_else(|| GatewayError::ProviderNotConfigured("azure".into()))?;
            let api_version = cfg
                .and_then(|c| c.azure_api_version.clone())
                .unwrap_or_else(|| "2024-06-01".into());
            Some(AzureOptions {
                resource,
                api_version,
            })
        } else {
            None
        };

        Ok(Credential {
            api_key,
            base_url,
            mode,
            azure,
            aws: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use portico_config::ApiKeyConfig;

    fn config_with(provider: &str, cfg: ProviderConfig) -> PorticoConfig {
        let mut c = PorticoConfig::default();
        c.providers.insert(provider.into(), cfg);
        c.api_keys.push(ApiKeyConfig {
            key: "pk-test-0123456789abcdef".into(),
            org: "acme".into(),
            project: None,
            allowed_providers: vec![],
            blocked_providers: vec![],
            byok: HashMap::new(),
            log_bodies: false,
        });
        c
    }

    #[test]
    fn test_gateway_key_fallback() {
        let cfg = config_with(
            "openai",
            ProviderConfig {
                api_key: Some("sk-gw".into()),
                ..Default::default()
            },
        );
        let resolver = CredentialResolver::new(&cfg);
        let cred = resolver
            .resolve(&OrgContext::default(), ProviderId::Openai)
            .unwrap();
        assert_eq!(cred.api_key, "sk-gw");
        assert_eq!(cred.mode, CredentialMode::Gateway);
        assert_eq!(cred.base_url, "https://api.openai.com/v1");
    }

    #[test]
    fn test_byok_wins_over_gateway_key() {
        let cfg = config_with(
            "openai",
            ProviderConfig {
                api_key: Some("sk-gw".into()),
                ..Default::default()
            },
        );
        let resolver = CredentialResolver::new(&cfg);
        let mut org = OrgContext::default();
        org.byok.insert(ProviderId::Openai, "sk-org".into());
        let cred = resolver.resolve(&org, ProviderId::Openai).unwrap();
        assert_eq!(cred.api_key, "sk-org");
        assert_eq!(cred.mode, CredentialMode::Byok);
    }

    #[test]
    fn test_unconfigured_provider_errors() {
        let resolver = CredentialResolver::new(&PorticoConfig::default());
        let err = resolver
            .resolve(&OrgContext::default(), ProviderId::Groq)
            .unwrap_err();
        assert!(matches!(err, GatewayError::ProviderNotConfigured(_)));
    }

    #[test]
    fn test_bedrock_requires_key_pair_and_region() {
        let cfg = config_with(
            "bedrock",
            ProviderConfig {
                aws_access_key_id: Some("AKIA".into()),
                aws_secret_access_key: Some("secret".into()),
                aws_region: Some("us-east-1".into()),
                aws_region_prefix: Some("us".into()),
                ..Default::default()
            },
        );
        let resolver = CredentialResolver::new(&cfg);
        let cred = resolver
            .resolve(&OrgContext::default(), ProviderId::Bedrock)
            .unwrap();
        let aws = cred.aws.unwrap();
        assert_eq!(aws.region, "us-east-1");
        assert_eq!(aws.region_prefix.as_deref(), Some("us"));
        assert!(cred.base_url.contains("us-east-1"));
    }

    #[test]
    fn test_azure_requires_resource() {
        let cfg = config_with(
            "azure",
            ProviderConfig {
                api_key: Some("ak".into()),
                ..Default::default()
            },
        );
        let resolver = CredentialResolver::new(&cfg);
        assert!(
            resolver
                .resolve(&OrgContext::default(), ProviderId::Azure)
                .is_err()
        );
    }

    #[test]
    fn test_org_provider_policy() {
        let org = OrgContext {
            allowed_providers: vec![ProviderId::Openai],
            blocked_providers: vec![ProviderId::Groq],
            ..Default::default()
        };
        assert!(org.provider_allowed(ProviderId::Openai));
        assert!(!org.provider_allowed(ProviderId::Groq));
        assert!(!org.provider_allowed(ProviderId::Anthropic));
    }
}
