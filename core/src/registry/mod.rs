use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::Config;
use crate::errors::{OpgError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ProviderId {
    OpenAi,
    Anthropic,
    LmStudio,
    Ollama,
}

// String serde so the id works as a TOML table key.
impl Serialize for ProviderId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ProviderId {
    fn deserialize<D: serde::Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        ProviderId::parse(&s)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown provider: {s}")))
    }
}

impl ProviderId {
    pub const ALL: [ProviderId; 4] = [
        ProviderId::OpenAi,
        ProviderId::Anthropic,
        ProviderId::LmStudio,
        ProviderId::Ollama,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderId::OpenAi => "openai",
            ProviderId::Anthropic => "anthropic",
            ProviderId::LmStudio => "local-lmstudio",
            ProviderId::Ollama => "local-ollama",
        }
    }

    pub fn parse(s: &str) -> Option<ProviderId> {
        match s.to_lowercase().as_str() {
            "openai" => Some(ProviderId::OpenAi),
            "anthropic" => Some(ProviderId::Anthropic),
            "local-lmstudio" | "lmstudio" => Some(ProviderId::LmStudio),
            "local-ollama" | "ollama" => Some(ProviderId::Ollama),
            _ => None,
        }
    }

    /// Local servers hold no credential; availability is decided by a probe.
    pub fn is_local(&self) -> bool {
        matches!(self, ProviderId::LmStudio | ProviderId::Ollama)
    }
}

impl std::fmt::Display for ProviderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One enabled model under a provider, with optional overrides of the
/// provider-level defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSpec {
    pub id: String,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub system_prompt: Option<String>,
}

impl ModelSpec {
    pub fn plain(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            temperature: None,
            max_tokens: None,
            system_prompt: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProviderSettings {
    pub endpoint: String,
    pub credential: Option<String>,
    pub temperature: f64,
    pub max_tokens: u32,
    /// Provider-level prompt override; absent means the registry's global
    /// default applies.
    pub system_prompt: Option<String>,
    pub models: Vec<ModelSpec>,
}

/// A resolved model with its effective sampling parameters and prompt,
/// overrides already folded in over the provider defaults.
#[derive(Debug, Clone)]
pub struct ResolvedModel {
    pub provider: ProviderId,
    pub id: String,
    pub temperature: f64,
    pub max_tokens: u32,
    pub system_prompt: String,
}

/// A row of the provider listing exposed to the shell.
#[derive(Debug, Clone)]
pub struct ProviderListing {
    pub provider: ProviderId,
    pub available: bool,
    pub models: Vec<String>,
}

/// In-memory registry of providers and their enabled models.
///
/// A provider is selectable only while it satisfies the availability
/// invariant: cloud providers need a credential, local providers need a
/// reachable endpoint, and either kind needs a non-empty model list.
pub struct Registry {
    providers: BTreeMap<ProviderId, ProviderSettings>,
    reachable: BTreeMap<ProviderId, bool>,
    /// Global fallback prompt, used when neither the model nor the provider
    /// carries one.
    default_prompt: String,
}

impl Registry {
    pub fn from_config(config: &Config) -> Self {
        let mut providers = BTreeMap::new();
        for (&id, pc) in &config.providers {
            providers.insert(
                id,
                ProviderSettings {
                    endpoint: pc.endpoint.clone(),
                    credential: pc.credential.clone(),
                    temperature: pc.temperature,
                    max_tokens: pc.max_tokens,
                    system_prompt: pc.system_prompt.clone(),
                    models: pc.models.iter().map(ModelSpec::plain).collect(),
                },
            );
        }
        Self {
            providers,
            // Local providers start unreachable until a probe says otherwise.
            reachable: BTreeMap::new(),
            default_prompt: config.default_system_prompt.clone(),
        }
    }

    pub fn settings(&self, id: ProviderId) -> Option<&ProviderSettings> {
        self.providers.get(&id)
    }

    /// Records the outcome of a local-endpoint health probe.
    pub fn set_reachable(&mut self, id: ProviderId, up: bool) {
        debug!(provider = %id, reachable = up, "probe result recorded");
        self.reachable.insert(id, up);
    }

    pub fn is_available(&self, id: ProviderId) -> bool {
        let Some(settings) = self.providers.get(&id) else {
            return false;
        };
        if settings.models.is_empty() {
            return false;
        }
        if id.is_local() {
            self.reachable.get(&id).copied().unwrap_or(false)
        } else {
            settings.credential.is_some()
        }
    }

    /// All configured providers with availability status, including the
    /// unavailable ones so the shell can show why they are missing.
    pub fn list(&self) -> Vec<ProviderListing> {
        self.providers
            .iter()
            .map(|(&id, settings)| ProviderListing {
                provider: id,
                available: self.is_available(id),
                models: settings.models.iter().map(|m| m.id.clone()).collect(),
            })
            .collect()
    }

    /// Ordered (provider, model, availability) rows across every provider.
    pub fn list_models(&self) -> Vec<(ProviderId, String, bool)> {
        let mut rows = Vec::new();
        for (&id, settings) in &self.providers {
            let available = self.is_available(id);
            for model in &settings.models {
                rows.push((id, model.id.clone(), available));
            }
        }
        rows
    }

    /// First model of the first available provider, if any.
    pub fn default_model(&self) -> Option<ResolvedModel> {
        for (&id, settings) in &self.providers {
            if self.is_available(id) {
                if let Some(model) = settings.models.first() {
                    return Some(self.resolve_spec(id, settings, model));
                }
            }
        }
        None
    }

    /// Looks a model identifier up across available providers.
    pub fn resolve_model(&self, model_id: &str) -> Result<ResolvedModel> {
        for (&id, settings) in &self.providers {
            if !self.is_available(id) {
                continue;
            }
            if let Some(model) = settings.models.iter().find(|m| m.id == model_id) {
                return Ok(self.resolve_spec(id, settings, model));
            }
        }
        Err(OpgError::Configuration(format!(
            "unknown or unavailable model: {model_id}"
        )))
    }

    fn resolve_spec(
        &self,
        id: ProviderId,
        settings: &ProviderSettings,
        model: &ModelSpec,
    ) -> ResolvedModel {
        ResolvedModel {
            provider: id,
            id: model.id.clone(),
            temperature: model.temperature.unwrap_or(settings.temperature),
            max_tokens: model.max_tokens.unwrap_or(settings.max_tokens),
            system_prompt: model
                .system_prompt
                .clone()
                .or_else(|| settings.system_prompt.clone())
                .unwrap_or_else(|| self.default_prompt.clone()),
        }
    }

    /// Replaces the enabled-model set for one provider. Session-scoped; the
    /// change is never written back to the environment. Emptying the list is
    /// allowed and leaves the provider unselectable until repopulated.
    pub fn update_models(&mut self, id: ProviderId, model_ids: Vec<String>) -> Result<()> {
        let settings = self
            .providers
            .get_mut(&id)
            .ok_or_else(|| OpgError::Configuration(format!("unknown provider: {id}")))?;
        info!(provider = %id, models = ?model_ids, "enabled model set replaced");
        settings.models = model_ids.into_iter().map(ModelSpec::plain).collect();
        Ok(())
    }

    /// Replaces the global fallback prompt. Applies to future conversations;
    /// model- and provider-level prompts keep precedence over it.
    pub fn set_default_prompt(&mut self, prompt: &str) {
        self.default_prompt = prompt.to_string();
    }
}
