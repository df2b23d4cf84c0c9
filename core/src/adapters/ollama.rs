use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::adapters::openai::to_wire_role_content;
use crate::adapters::{Adapter, SendOutcome, SendRequest, build_client, transport_error};
use crate::errors::{OpgError, Result};
use crate::registry::ProviderId;

#[derive(Debug, Serialize)]
struct OllamaBody<'a> {
    model: &'a str,
    messages: Vec<OllamaMessage<'a>>,
    options: OllamaOptions,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct OllamaMessage<'a> {
    role: &'a str,
    content: std::borrow::Cow<'a, str>,
}

/// Ollama renames the sampling fields at the wire level; `num_predict` is
/// the canonical max-output-tokens.
#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f64,
    num_predict: u32,
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    message: OllamaResponseMessage,
}

#[derive(Debug, Deserialize)]
struct OllamaResponseMessage {
    content: Option<String>,
}

/// Stateless adapter for a local Ollama server.
pub struct OllamaAdapter {
    client: reqwest::Client,
    endpoint: String,
}

impl OllamaAdapter {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: build_client(timeout),
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl Adapter for OllamaAdapter {
    fn provider(&self) -> ProviderId {
        ProviderId::Ollama
    }

    async fn send(&self, request: SendRequest<'_>) -> Result<SendOutcome> {
        let body = OllamaBody {
            model: request.model,
            messages: request
                .messages
                .iter()
                .map(|m| {
                    let (role, content) = to_wire_role_content(m);
                    OllamaMessage { role, content }
                })
                .collect(),
            options: OllamaOptions {
                temperature: request.params.temperature,
                num_predict: request.params.max_tokens,
            },
            stream: false,
        };

        debug!(model = request.model, messages = body.messages.len(), "ollama chat request");

        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(ProviderId::Ollama, e))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(OpgError::provider(
                ProviderId::Ollama.as_str(),
                format!("HTTP {status}: {error_text}"),
            ));
        }

        let parsed: OllamaResponse = response
            .json()
            .await
            .map_err(|e| transport_error(ProviderId::Ollama, e))?;

        let text = parsed
            .message
            .content
            .as_deref()
            .map(|c| c.trim().to_string())
            .ok_or_else(|| {
                OpgError::provider(ProviderId::Ollama.as_str(), "no content in response")
            })?;

        Ok(SendOutcome {
            text,
            continuation: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::SamplingParams;
    use crate::conversation::{Message, Role};

    #[test]
    fn max_tokens_maps_to_num_predict() {
        let messages = [Message {
            role: Role::User,
            content: "hi".into(),
            seq: 0,
        }];
        let params = SamplingParams::validated(0.3, 512).unwrap();
        let body = OllamaBody {
            model: "llama2",
            messages: messages
                .iter()
                .map(|m| {
                    let (role, content) = to_wire_role_content(m);
                    OllamaMessage { role, content }
                })
                .collect(),
            options: OllamaOptions {
                temperature: params.temperature,
                num_predict: params.max_tokens,
            },
            stream: false,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["options"]["num_predict"], 512);
        assert_eq!(json["stream"], false);
    }
}
