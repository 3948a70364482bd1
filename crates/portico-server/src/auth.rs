use std::collections::HashMap;

use async_trait::async_trait;

use portico_catalog::ProviderId;
use portico_config::PorticoConfig;
use portico_core::{GatewayError, Result};
use portico_providers::OrgContext;

/// Token lookup: a bearer API key resolves to the org context the
/// request runs under. Backed by config here; a deployment can swap in
/// a database- or service-backed implementation.
#[async_trait]
pub trait ApiKeyStore: Send + Sync {
    async fn resolve(&self, token: &str) -> Result<OrgContext>;
}

/// Key table built from `[[api_keys]]` config entries.
pub struct StaticApiKeys {
    keys: HashMap<String, OrgContext>,
}

impl StaticApiKeys {
    pub fn from_config(config: &PorticoConfig) -> Result<Self> {
        let mut keys = HashMap::new();
        for entry in &config.api_keys {
            let parse_list = |ids: &[String]| -> Result<Vec<ProviderId>> {
                ids.iter()
                    .map(|s| {
                        ProviderId::parse(s).ok_or_else(|| {
                            GatewayError::Config(format!("unknown provider in api key: {s}"))
                        })
                    })
                    .collect()
            };
            let mut byok = HashMap::new();
            for (provider, key) in &entry.byok {
                let id = ProviderId::parse(provider).ok_or_else(|| {
                    GatewayError::Config(format!("unknown byok provider: {provider}"))
                })?;
                byok.insert(id, key.clone());
            }
            keys.insert(
                entry.key.clone(),
                OrgContext {
                    org_id: entry.org.clone(),
                    project_id: entry.project.clone(),
                    allowed_providers: parse_list(&entry.allowed_providers)?,
                    blocked_providers: parse_list(&entry.blocked_providers)?,
                    byok,
                    log_bodies: entry.log_bodies,
                },
            );
        }
        Ok(Self { keys })
    }
}

#[async_trait]
impl ApiKeyStore for StaticApiKeys {
    async fn resolve(&self, token: &str) -> Result<OrgContext> {
        self.keys
            .get(token)
            .cloned()
            .ok_or_else(|| GatewayError::Unauthorized("unknown API key".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use portico_config::ApiKeyConfig;

    #[tokio::test]
    async fn test_resolve_known_key() {
        let mut config = PorticoConfig::default();
        config.api_keys.push(ApiKeyConfig {
            key: "pk-live-0123456789abcdef".into(),
            org: "acme".into(),
            project: Some("default".into()),
            allowed_providers: vec!["openai".into()],
            blocked_providers: vec![],
            byok: HashMap::from([("anthropic".into(), "sk-ant-own".into())]),
            log_bodies: true,
        });
        let store = StaticApiKeys::from_config(&config).unwrap();
        let org = store.resolve("pk-live-0123456789abcdef").await.unwrap();
        assert_eq!(org.org_id, "acme");
        assert_eq!(org.allowed_providers, vec![ProviderId::Openai]);
        assert!(org.log_bodies);
        assert_eq!(
            org.byok.get(&ProviderId::Anthropic).map(String::as_str),
            Some("sk-ant-own")
        );
    }

    #[tokio::test]
    async fn test_unknown_key_is_unauthorized() {
        let store = StaticApiKeys::from_config(&PorticoConfig::default()).unwrap();
        let err = store.resolve("nope").await.unwrap_err();
        assert!(matches!(err, GatewayError::Unauthorized(_)));
    }
}
