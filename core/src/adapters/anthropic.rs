use std::borrow::Cow;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::adapters::{Adapter, SendOutcome, SendRequest, build_client, transport_error};
use crate::conversation::Role;
use crate::errors::{OpgError, Result};
use crate::registry::ProviderId;

const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Debug, Serialize)]
struct MessagesBody<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    max_tokens: u32,
    temperature: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: Cow<'a, str>,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    text: Option<String>,
}

/// Anthropic messages adapter. The system prompt is a top-level field rather
/// than a message, so it is lifted out of the sequence here.
pub struct AnthropicAdapter {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl AnthropicAdapter {
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: build_client(timeout),
            endpoint: endpoint.into(),
            api_key: api_key.into(),
        }
    }
}

#[async_trait]
impl Adapter for AnthropicAdapter {
    fn provider(&self) -> ProviderId {
        ProviderId::Anthropic
    }

    async fn send(&self, request: SendRequest<'_>) -> Result<SendOutcome> {
        let system = request
            .messages
            .iter()
            .find(|m| m.role == Role::System)
            .map(|m| m.content.as_str());

        let messages: Vec<WireMessage> = request
            .messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| match m.role {
                Role::User => WireMessage {
                    role: "user",
                    content: Cow::Borrowed(m.content.as_str()),
                },
                Role::Assistant => WireMessage {
                    role: "assistant",
                    content: Cow::Borrowed(m.content.as_str()),
                },
                // No native slot; marked user message, same as the
                // chat-completions adapter.
                Role::ToolResult | Role::System => WireMessage {
                    role: "user",
                    content: Cow::Owned(format!("[tool result]\n{}", m.content)),
                },
            })
            .collect();

        let body = MessagesBody {
            model: request.model,
            messages,
            max_tokens: request.params.max_tokens,
            temperature: request.params.temperature,
            system,
        };

        debug!(model = request.model, messages = body.messages.len(), "anthropic messages request");

        let response = self
            .client
            .post(&self.endpoint)
            .header("Content-Type", "application/json")
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(ProviderId::Anthropic, e))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(OpgError::provider(
                ProviderId::Anthropic.as_str(),
                format!("HTTP {status}: {error_text}"),
            ));
        }

        let parsed: MessagesResponse = response
            .json()
            .await
            .map_err(|e| transport_error(ProviderId::Anthropic, e))?;

        let text = parsed
            .content
            .first()
            .and_then(|b| b.text.as_deref())
            .map(|t| t.trim().to_string())
            .ok_or_else(|| {
                OpgError::provider(ProviderId::Anthropic.as_str(), "no content in response")
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
    use crate::conversation::Message;

    #[test]
    fn system_message_becomes_top_level_field() {
        let messages = vec![
            Message {
                role: Role::System,
                content: "be terse".into(),
                seq: 0,
            },
            Message {
                role: Role::User,
                content: "hi".into(),
                seq: 1,
            },
        ];
        let system = messages
            .iter()
            .find(|m| m.role == Role::System)
            .map(|m| m.content.as_str());
        let wire: Vec<&Message> = messages.iter().filter(|m| m.role != Role::System).collect();

        assert_eq!(system, Some("be terse"));
        assert_eq!(wire.len(), 1);
        assert_eq!(wire[0].content, "hi");
    }
}
