use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::errors::{OpgError, Result};
use crate::registry::ProviderId;

const OPG_DIR: &str = ".opg";
const FALLBACK_SYSTEM_PROMPT: &str = "You are a helpful assistant.";

pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_TOOL_LOOP_CAP: usize = 4;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub endpoint: String,
    pub credential: Option<String>,
    pub temperature: f64,
    pub max_tokens: u32,
    pub system_prompt: Option<String>,
    pub models: Vec<String>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            credential: None,
            temperature: 0.7,
            max_tokens: 4096,
            system_prompt: None,
            models: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub providers: BTreeMap<ProviderId, ProviderConfig>,
    pub default_system_prompt: String,
    pub tools_enabled: bool,
    pub sandbox_root: PathBuf,
    pub request_timeout_secs: u64,
    pub tool_loop_cap: usize,
}

impl Default for Config {
    fn default() -> Self {
        let mut providers = BTreeMap::new();
        for id in ProviderId::ALL {
            providers.insert(
                id,
                ProviderConfig {
                    endpoint: default_endpoint(id).to_string(),
                    models: default_models(id).iter().map(|m| m.to_string()).collect(),
                    ..ProviderConfig::default()
                },
            );
        }
        Config {
            providers,
            default_system_prompt: FALLBACK_SYSTEM_PROMPT.to_string(),
            tools_enabled: false,
            sandbox_root: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            tool_loop_cap: DEFAULT_TOOL_LOOP_CAP,
        }
    }
}

fn default_endpoint(id: ProviderId) -> &'static str {
    match id {
        ProviderId::OpenAi => "https://api.openai.com/v1/chat/completions",
        ProviderId::Anthropic => "https://api.anthropic.com/v1/messages",
        ProviderId::LmStudio => "http://localhost:1234/v1/chat/completions",
        ProviderId::Ollama => "http://localhost:11434/api/chat",
    }
}

fn default_models(id: ProviderId) -> &'static [&'static str] {
    match id {
        ProviderId::OpenAi => &["gpt-3.5-turbo", "gpt-4"],
        ProviderId::Anthropic => &["claude-3-sonnet-20240229"],
        ProviderId::LmStudio => &["local-model"],
        ProviderId::Ollama => &["llama2"],
    }
}

/// Env-var prefix used by the per-provider override variables.
fn env_prefix(id: ProviderId) -> &'static str {
    match id {
        ProviderId::OpenAi => "OPENAI",
        ProviderId::Anthropic => "ANTHROPIC",
        ProviderId::LmStudio => "LM_STUDIO",
        ProviderId::Ollama => "OLLAMA",
    }
}

fn credential_env(id: ProviderId) -> Option<&'static str> {
    match id {
        ProviderId::OpenAi => Some("OPENAI_API_KEY"),
        ProviderId::Anthropic => Some("ANTHROPIC_API_KEY"),
        ProviderId::LmStudio | ProviderId::Ollama => None,
    }
}

fn endpoint_env(id: ProviderId) -> &'static str {
    match id {
        ProviderId::OpenAi => "OPENAI_API_ENDPOINT",
        ProviderId::Anthropic => "ANTHROPIC_API_ENDPOINT",
        ProviderId::LmStudio => "LM_STUDIO_ENDPOINT",
        ProviderId::Ollama => "OLLAMA_ENDPOINT",
    }
}

pub fn get_opg_dir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(OPG_DIR)
}

pub fn get_config_path() -> PathBuf {
    get_opg_dir().join("config.toml")
}

impl Config {
    /// Loads the config file if one exists, overlays environment variables,
    /// and validates. The environment always wins over the file.
    pub fn load() -> Result<Self> {
        let mut config = if get_config_path().exists() {
            load_config_file()?
        } else {
            Config::default()
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Ok(prompt) = std::env::var("GENERIC_SYSTEM_PROMPT") {
            self.default_system_prompt = prompt;
        }
        if let Ok(v) = std::env::var("OPG_ENABLE_TOOLS") {
            self.tools_enabled = matches!(v.to_lowercase().as_str(), "1" | "true" | "yes");
        }
        if let Ok(root) = std::env::var("OPG_SANDBOX_ROOT") {
            self.sandbox_root = PathBuf::from(root);
        }
        if let Ok(secs) = std::env::var("OPG_REQUEST_TIMEOUT_SECS")
            && let Ok(secs) = secs.parse()
        {
            self.request_timeout_secs = secs;
        }
        if let Ok(cap) = std::env::var("OPG_TOOL_LOOP_CAP")
            && let Ok(cap) = cap.parse()
        {
            self.tool_loop_cap = cap;
        }

        for id in ProviderId::ALL {
            let pc = self.providers.entry(id).or_insert_with(|| ProviderConfig {
                endpoint: default_endpoint(id).to_string(),
                ..ProviderConfig::default()
            });
            let prefix = env_prefix(id);

            if let Some(var) = credential_env(id)
                && let Ok(key) = std::env::var(var)
                && !key.is_empty()
            {
                pc.credential = Some(key);
            }
            if let Ok(endpoint) = std::env::var(endpoint_env(id)) {
                pc.endpoint = endpoint;
            }
            if let Ok(models) = std::env::var(format!("{prefix}_MODELS")) {
                pc.models = models
                    .split(',')
                    .map(|m| m.trim().to_string())
                    .filter(|m| !m.is_empty())
                    .collect();
            }
            if let Ok(prompt) = std::env::var(format!("{prefix}_SYSTEM_PROMPT")) {
                pc.system_prompt = Some(prompt);
            }
            if let Ok(temp) = std::env::var(format!("{prefix}_TEMPERATURE"))
                && let Ok(temp) = temp.parse()
            {
                pc.temperature = temp;
            }
            if let Ok(max) = std::env::var(format!("{prefix}_MAX_TOKENS"))
                && let Ok(max) = max.parse()
            {
                pc.max_tokens = max;
            }
        }
    }

    fn validate(&self) -> Result<()> {
        for (id, pc) in &self.providers {
            if !(0.0..=1.0).contains(&pc.temperature) {
                return Err(OpgError::Validation(format!(
                    "temperature {} for provider {} is outside [0.0, 1.0]",
                    pc.temperature, id
                )));
            }
        }
        Ok(())
    }
}

fn load_config_file() -> Result<Config> {
    let config_path = get_config_path();
    let content = std::fs::read_to_string(&config_path).map_err(|e| {
        OpgError::Configuration(format!(
            "failed to read config from {}: {}",
            config_path.display(),
            e
        ))
    })?;
    toml::from_str(&content).map_err(|e| {
        OpgError::Configuration(format!(
            "failed to parse config from {}: {}",
            config_path.display(),
            e
        ))
    })
}

pub fn save_config(config: &Config) -> Result<()> {
    let opg_dir = get_opg_dir();
    if !opg_dir.exists() {
        std::fs::create_dir_all(&opg_dir).map_err(|e| {
            OpgError::Configuration(format!(
                "failed to create opg directory at {}: {}",
                opg_dir.display(),
                e
            ))
        })?;
    }
    let content = toml::to_string_pretty(config)
        .map_err(|e| OpgError::Configuration(format!("failed to serialize config: {e}")))?;
    std::fs::write(get_config_path(), content).map_err(|e| {
        OpgError::Configuration(format!(
            "failed to write config to {}: {}",
            get_config_path().display(),
            e
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_all_providers() {
        let config = Config::default();
        for id in ProviderId::ALL {
            let pc = config.providers.get(&id).expect("provider configured");
            assert!(!pc.endpoint.is_empty());
            assert!(!pc.models.is_empty());
        }
        assert!(!config.tools_enabled);
    }

    #[test]
    fn out_of_range_temperature_is_rejected() {
        let mut config = Config::default();
        config
            .providers
            .get_mut(&ProviderId::OpenAi)
            .unwrap()
            .temperature = 1.5;
        let err = config.validate().unwrap_err();
        assert!(matches!(err, OpgError::Validation(_)));
    }

    #[test]
    fn config_round_trips_through_toml() {
        let config = Config::default();
        let toml = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&toml).unwrap();
        assert_eq!(parsed.providers.len(), config.providers.len());
        assert_eq!(parsed.tool_loop_cap, config.tool_loop_cap);
    }
}
