use std::io::Write;

use portico_config::{ConfigLoader, PorticoConfig};

#[test]
fn test_parse_full_config() {
    let raw = r#"
[server]
listen = "127.0.0.1:9999"
cors = false

[dispatch]
max_retries = 1
default_max_tokens = 2048

[cache]
ttl_secs = 60

[providers.openai]
api_key = "sk-test"

[providers.azure]
api_key = "azure-key"
azure_resource = "myresource"
azure_api_version = "2024-06-01"

[providers.bedrock]
aws_region = "us-east-1"
aws_region_prefix = "us"
aws_access_key_id = "AKIA123"
aws_secret_access_key = "secret"

[ledger]
initial_credits = { acme = 100.0 }

[[api_keys]]
key = "pk-live-0123456789abcdef"
org = "acme"
project = "default"
allowed_providers = ["openai", "azure"]
byok = { openai = "sk-org-own-key" }
"#;
    let cfg: PorticoConfig = toml::from_str(raw).unwrap();
    assert_eq!(cfg.server.listen, "127.0.0.1:9999");
    assert_eq!(cfg.dispatch.max_retries, 1);
    assert_eq!(cfg.cache.ttl_secs, 60);
    assert_eq!(
        cfg.providers["azure"].azure_resource.as_deref(),
        Some("myresource")
    );
    assert_eq!(cfg.api_keys[0].org, "acme");
    assert_eq!(
        cfg.api_keys[0].byok.get("openai").map(String::as_str),
        Some("sk-org-own-key")
    );
    assert_eq!(cfg.ledger.initial_credits["acme"], 100.0);
    assert!(cfg.validate().is_ok());
}

#[test]
fn test_load_missing_file_uses_defaults() {
    let cfg = ConfigLoader::load(Some(std::path::Path::new(
        "/nonexistent/portico.toml",
    )))
    .unwrap();
    assert_eq!(cfg.server.listen, "0.0.0.0:8787");
    assert_eq!(cfg.dispatch.default_max_tokens, 4096);
}

#[test]
fn test_load_from_file() {
    let mut f = tempfile::NamedTempFile::new().unwrap();
    writeln!(f, "[server]\nlisten = \"127.0.0.1:1234\"").unwrap();
    let cfg = ConfigLoader::load(Some(f.path())).unwrap();
    assert_eq!(cfg.server.listen, "127.0.0.1:1234");
}

#[test]
fn test_invalid_toml_is_config_error() {
    let mut f = tempfile::NamedTempFile::new().unwrap();
    writeln!(f, "[server\nlisten = ").unwrap();
    let err = ConfigLoader::load(Some(f.path())).unwrap_err();
    assert!(matches!(err, portico_core::GatewayError::Config(_)));
}
