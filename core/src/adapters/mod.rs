use std::time::Duration;

use async_trait::async_trait;

use crate::conversation::{ApiMode, Message};
use crate::errors::{OpgError, Result};
use crate::registry::{ProviderId, ProviderSettings, ResolvedModel};

pub mod anthropic;
pub mod ollama;
pub mod openai;
pub mod probe;
pub mod responses;

pub use anthropic::AnthropicAdapter;
pub use ollama::OllamaAdapter;
pub use openai::OpenAiChatAdapter;
pub use responses::OpenAiResponsesAdapter;

/// Canonical sampling parameters, mapped to each provider's wire fields by
/// the adapters. Constructed through `validated` so out-of-range values are
/// rejected up front instead of silently clamped.
#[derive(Debug, Clone, Copy)]
pub struct SamplingParams {
    pub temperature: f64,
    pub max_tokens: u32,
}

impl SamplingParams {
    pub fn validated(temperature: f64, max_tokens: u32) -> Result<Self> {
        if !(0.0..=1.0).contains(&temperature) {
            return Err(OpgError::Validation(format!(
                "temperature {temperature} is outside [0.0, 1.0]"
            )));
        }
        Ok(Self {
            temperature,
            max_tokens,
        })
    }
}

/// One outbound exchange.
///
/// For stateless adapters `messages` is the full ordered sequence including
/// the system message. For the stateful adapter it is only the messages
/// appended since the last exchange, with `continuation` carrying the
/// server-side history handle.
#[derive(Debug, Clone, Copy)]
pub struct SendRequest<'a> {
    pub model: &'a str,
    pub messages: &'a [Message],
    pub params: SamplingParams,
    pub continuation: Option<&'a str>,
}

#[derive(Debug, Clone)]
pub struct SendOutcome {
    pub text: String,
    /// Present only for stateful providers; stored back on the conversation.
    pub continuation: Option<String>,
}

/// Translates the internal conversation representation to and from one
/// provider family's wire format. Exactly one network call per `send`.
#[async_trait]
pub trait Adapter: Send + Sync {
    fn provider(&self) -> ProviderId;

    async fn send(&self, request: SendRequest<'_>) -> Result<SendOutcome>;
}

pub(crate) fn build_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(Duration::from_secs(10))
        .build()
        .unwrap_or_default()
}

pub(crate) fn transport_error(provider: ProviderId, err: reqwest::Error) -> OpgError {
    OpgError::provider(provider.as_str(), err.to_string())
}

/// Selects the adapter variant for a model's provider family.
pub fn create_adapter(
    model: &ResolvedModel,
    settings: &ProviderSettings,
    api_mode: ApiMode,
    timeout: Duration,
) -> Result<Box<dyn Adapter>> {
    if api_mode == ApiMode::Stateful && model.provider != ProviderId::OpenAi {
        return Err(OpgError::Configuration(format!(
            "stateful API mode is only available for openai models, not {}",
            model.provider
        )));
    }

    match model.provider {
        ProviderId::OpenAi => {
            let api_key = settings.credential.clone().ok_or_else(|| {
                OpgError::Configuration("openai provider has no credential".into())
            })?;
            match api_mode {
                ApiMode::Stateless => Ok(Box::new(OpenAiChatAdapter::new(
                    ProviderId::OpenAi,
                    &settings.endpoint,
                    Some(api_key),
                    timeout,
                ))),
                ApiMode::Stateful => {
                    // The responses endpoint lives next to chat completions.
                    let endpoint = settings.endpoint.replace("/chat/completions", "/responses");
                    Ok(Box::new(OpenAiResponsesAdapter::new(
                        &endpoint, api_key, timeout,
                    )))
                }
            }
        }
        ProviderId::Anthropic => {
            let api_key = settings.credential.clone().ok_or_else(|| {
                OpgError::Configuration("anthropic provider has no credential".into())
            })?;
            Ok(Box::new(AnthropicAdapter::new(
                &settings.endpoint,
                api_key,
                timeout,
            )))
        }
        ProviderId::LmStudio => Ok(Box::new(OpenAiChatAdapter::new(
            ProviderId::LmStudio,
            &settings.endpoint,
            None,
            timeout,
        ))),
        ProviderId::Ollama => Ok(Box::new(OllamaAdapter::new(&settings.endpoint, timeout))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_of_range_temperature_is_a_validation_error() {
        assert!(matches!(
            SamplingParams::validated(1.2, 256),
            Err(OpgError::Validation(_))
        ));
        assert!(matches!(
            SamplingParams::validated(-0.1, 256),
            Err(OpgError::Validation(_))
        ));
        assert!(SamplingParams::validated(0.0, 256).is_ok());
        assert!(SamplingParams::validated(1.0, 256).is_ok());
    }

    #[test]
    fn stateful_mode_is_openai_only() {
        let settings = ProviderSettings {
            endpoint: "https://api.anthropic.com/v1/messages".into(),
            credential: Some("key".into()),
            temperature: 0.7,
            max_tokens: 4096,
            system_prompt: Some("prompt".into()),
            models: vec![],
        };
        let model = ResolvedModel {
            provider: ProviderId::Anthropic,
            id: "claude-3-sonnet-20240229".into(),
            temperature: 0.7,
            max_tokens: 4096,
            system_prompt: "prompt".into(),
        };
        let err = create_adapter(
            &model,
            &settings,
            ApiMode::Stateful,
            Duration::from_secs(1),
        )
        .err()
        .unwrap();
        assert!(matches!(err, OpgError::Configuration(_)));
    }
}
