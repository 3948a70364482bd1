use portico_catalog::{BindingPolicy, Catalog, ProviderId, Stability};
use portico_core::GatewayError;

#[test]
fn test_lookup_exact_id() {
    let catalog = Catalog::builtin();
    let (entry, pinned) = catalog.lookup("gpt-4o").unwrap();
    assert_eq!(entry.id, "gpt-4o");
    assert!(pinned.is_none());
}

#[test]
fn test_lookup_alias() {
    let catalog = Catalog::builtin();
    let (entry, pinned) = catalog.lookup("claude-3.5-sonnet").unwrap();
    assert_eq!(entry.id, "claude-3-5-sonnet");
    assert!(pinned.is_none());
}

#[test]
fn test_lookup_provider_prefix_pins() {
    let catalog = Catalog::builtin();
    let (entry, pinned) = catalog.lookup("anthropic/claude-3-5-sonnet").unwrap();
    assert_eq!(entry.id, "claude-3-5-sonnet");
    assert_eq!(pinned, Some(ProviderId::Anthropic));
}

#[test]
fn test_lookup_provider_prefix_without_binding_fails() {
    let catalog = Catalog::builtin();
    let err = catalog.lookup("groq/claude-3-5-sonnet").unwrap_err();
    assert!(matches!(err, GatewayError::UnknownModel(_)));
}

#[test]
fn test_lookup_unknown_model() {
    let catalog = Catalog::builtin();
    assert!(matches!(
        catalog.lookup("not-a-model"),
        Err(GatewayError::UnknownModel(_))
    ));
}

#[test]
fn test_bindings_sorted_by_price_then_stability() {
    let catalog = Catalog::builtin();
    let (entry, _) = catalog.lookup("llama-3.1-8b-instruct").unwrap();
    let bindings = catalog.list_bindings(entry, None, &BindingPolicy::default());
    // inference-net is cheapest, then groq, then together.
    let order: Vec<ProviderId> = bindings.iter().map(|b| b.provider).collect();
    assert_eq!(
        order,
        vec![ProviderId::InferenceNet, ProviderId::Groq, ProviderId::Together]
    );
}

#[test]
fn test_pinned_binding_sorts_first() {
    let catalog = Catalog::builtin();
    let (entry, _) = catalog.lookup("llama-3.1-8b-instruct").unwrap();
    let bindings = catalog.list_bindings(entry, Some(ProviderId::Together), &BindingPolicy::default());
    assert_eq!(bindings[0].provider, ProviderId::Together);
}

#[test]
fn test_policy_excludes_deprecated_and_unstable() {
    let catalog = Catalog::builtin();
    let (entry, _) = catalog.lookup("llama-3.1-70b-instruct").unwrap();

    let all = catalog.list_bindings(entry, None, &BindingPolicy::default());
    assert_eq!(all.len(), 3);

    let no_deprecated = catalog.list_bindings(
        entry,
        None,
        &BindingPolicy {
            exclude_deprecated: true,
            ..Default::default()
        },
    );
    assert!(no_deprecated.iter().all(|b| !b.is_deprecated()));
    assert_eq!(no_deprecated.len(), 2);

    let stable_only = catalog.list_bindings(
        entry,
        None,
        &BindingPolicy {
            exclude_unstable: true,
            ..Default::default()
        },
    );
    assert!(stable_only.iter().all(|b| b.stability <= Stability::Beta));
}

#[test]
fn test_deactivated_bindings_hidden_by_default() {
    let catalog = Catalog::builtin();
    let (entry, _) = catalog.lookup("gpt-4-turbo").unwrap();
    let active = catalog.list_bindings(entry, None, &BindingPolicy::default());
    assert!(active.is_empty());
    assert!(!entry.is_servable());

    let with_deactivated = catalog.list_bindings(
        entry,
        None,
        &BindingPolicy {
            include_deactivated: true,
            ..Default::default()
        },
    );
    assert_eq!(with_deactivated.len(), 1);
}

#[test]
fn test_model_views_skip_unservable_models() {
    let catalog = Catalog::builtin();
    let views = catalog.model_views(false, false);
    assert!(views.iter().all(|v| v.id != "gpt-4-turbo"));

    let views = catalog.model_views(true, false);
    assert!(views.iter().any(|v| v.id == "gpt-4-turbo"));
}

#[test]
fn test_model_view_reports_best_pricing() {
    let catalog = Catalog::builtin();
    let views = catalog.model_views(false, false);
    let llama = views
        .iter()
        .find(|v| v.id == "llama-3.1-8b-instruct")
        .unwrap();
    // Cheapest active binding is inference-net at $0.03/M input.
    assert!((llama.pricing.input - 0.03e-6).abs() < 1e-12);
    assert_eq!(llama.providers.len(), 3);
}
