use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use portico_core::{GatewayError, Result};

use crate::model::{ModelEntry, Pricing, ProviderBinding};
use crate::provider::{ProviderId, ProviderInfo};
use crate::table;

/// Binding filter applied by `list_bindings`.
#[derive(Debug, Clone, Copy, Default)]
pub struct BindingPolicy {
    pub include_deactivated: bool,
    pub exclude_deprecated: bool,
    pub exclude_unstable: bool,
}

/// The process-wide model & provider table. Read-only after construction.
pub struct Catalog {
    models: Vec<ModelEntry>,
    /// model id -> index into `models`
    by_id: HashMap<String, usize>,
    /// alias -> index into `models`
    by_alias: HashMap<String, usize>,
}

impl Catalog {
    /// Build the catalog from the built-in table.
    pub fn builtin() -> Self {
        Self::from_models(table::builtin_models())
    }

    pub fn from_models(models: Vec<ModelEntry>) -> Self {
        let mut by_id = HashMap::new();
        let mut by_alias = HashMap::new();
        for (i, m) in models.iter().enumerate() {
            by_id.insert(m.id.clone(), i);
            for a in &m.aliases {
                by_alias.insert(a.clone(), i);
            }
        }
        Self {
            models,
            by_id,
            by_alias,
        }
    }

    pub fn models(&self) -> &[ModelEntry] {
        &self.models
    }

    /// Resolve a model string: exact id, then alias, then `provider/m`.
    /// Returns the entry and, for the `provider/m` form, the pinned
    /// provider.
    pub fn lookup(&self, model: &str) -> Result<(&ModelEntry, Option<ProviderId>)> {
        if let Some(&i) = self.by_id.get(model) {
            return Ok((&self.models[i], None));
        }
        if let Some(&i) = self.by_alias.get(model) {
            return Ok((&self.models[i], None));
        }
        if let Some((prefix, rest)) = model.split_once('/') {
            if let Some(provider) = ProviderId::parse(prefix) {
                if let Some(&i) = self.by_id.get(rest).or_else(|| self.by_alias.get(rest)) {
                    let entry = &self.models[i];
                    if entry.binding_for(provider).is_none() {
                        return Err(GatewayError::UnknownModel(format!(
                            "{rest} has no {provider} binding"
                        )));
                    }
                    return Ok((entry, Some(provider)));
                }
            }
        }
        Err(GatewayError::UnknownModel(model.to_string()))
    }

    /// Ordered candidate bindings: policy filter, then pinned first, then
    /// ascending effective input price, then declared stability.
    pub fn list_bindings<'a>(
        &self,
        entry: &'a ModelEntry,
        pinned: Option<ProviderId>,
        policy: &BindingPolicy,
    ) -> Vec<&'a ProviderBinding> {
        let mut bindings: Vec<&ProviderBinding> = entry
            .bindings
            .iter()
            .filter(|b| policy.include_deactivated || !b.is_deactivated())
            .filter(|b| !policy.exclude_deprecated || !b.is_deprecated())
            .filter(|b| {
                !policy.exclude_unstable || b.stability <= crate::model::Stability::Beta
            })
            .collect();

        bindings.sort_by(|a, b| {
            let a_pinned = pinned == Some(a.provider);
            let b_pinned = pinned == Some(b.provider);
            b_pinned
                .cmp(&a_pinned)
                .then(
                    a.effective_input_price()
                        .partial_cmp(&b.effective_input_price())
                        .unwrap_or(std::cmp::Ordering::Equal),
                )
                .then(a.stability.cmp(&b.stability))
        });
        bindings
    }

    /// Views for `GET /v1/models`.
    pub fn model_views(&self, include_deactivated: bool, exclude_deprecated: bool) -> Vec<ModelView> {
        let policy = BindingPolicy {
            include_deactivated,
            exclude_deprecated,
            exclude_unstable: false,
        };
        self.models
            .iter()
            .filter_map(|m| {
                let bindings = self.list_bindings(m, None, &policy);
                if bindings.is_empty() {
                    return None;
                }
                let best = bindings
                    .first()
                    .map(|b| b.pricing)
                    .unwrap_or_default();
                let deactivated_at = m
                    .bindings
                    .iter()
                    .map(|b| b.deactivated_at)
                    .min()
                    .flatten();
                let deprecated_at = m
                    .bindings
                    .iter()
                    .map(|b| b.deprecated_at)
                    .min()
                    .flatten();
                Some(ModelView {
                    id: m.id.clone(),
                    name: m.display_name.clone(),
                    family: m.family.clone(),
                    architecture: ArchitectureView {
                        input_modalities: m.input_modalities.clone(),
                        output_modalities: m.output_modalities.clone(),
                    },
                    providers: bindings
                        .iter()
                        .map(|b| ProviderView {
                            provider_id: b.provider.as_str().to_string(),
                            model_name: b.provider_model.clone(),
                            pricing: Some(b.pricing),
                        })
                        .collect(),
                    pricing: best,
                    deactivated_at,
                    deprecated_at,
                })
            })
            .collect()
    }

    pub fn provider_info(&self, id: ProviderId) -> &'static ProviderInfo {
        ProviderInfo::for_provider(id)
    }
}

/// One row of the `GET /v1/models` listing.
#[derive(Debug, Clone, Serialize)]
pub struct ModelView {
    pub id: String,
    pub name: String,
    pub family: String,
    pub architecture: ArchitectureView,
    pub providers: Vec<ProviderView>,
    /// Best (cheapest active) pricing across providers.
    pub pricing: Pricing,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deactivated_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deprecated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ArchitectureView {
    pub input_modalities: Vec<String>,
    pub output_modalities: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProviderView {
    pub provider_id: String,
    pub model_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pricing: Option<Pricing>,
}
