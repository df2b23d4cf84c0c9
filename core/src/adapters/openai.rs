use std::borrow::Cow;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::adapters::{Adapter, SendOutcome, SendRequest, build_client, transport_error};
use crate::conversation::{Message, Role};
use crate::errors::{OpgError, Result};
use crate::registry::ProviderId;

#[derive(Debug, Serialize)]
struct ChatCompletionsBody<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    temperature: f64,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: Cow<'a, str>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionsResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

/// Stateless chat-completions adapter. Serves the OpenAI API and any
/// OpenAI-compatible local server (LM Studio runs without a credential).
pub struct OpenAiChatAdapter {
    client: reqwest::Client,
    provider: ProviderId,
    endpoint: String,
    api_key: Option<String>,
}

impl OpenAiChatAdapter {
    pub fn new(
        provider: ProviderId,
        endpoint: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            client: build_client(timeout),
            provider,
            endpoint: endpoint.into(),
            api_key,
        }
    }
}

/// Maps an internal message onto the chat-completions role set. Tool results
/// have no native slot here, so they travel as user messages with a marker
/// the model was told about in the tool instructions.
pub(crate) fn to_wire_role_content(message: &Message) -> (&'static str, Cow<'_, str>) {
    match message.role {
        Role::System => ("system", Cow::Borrowed(message.content.as_str())),
        Role::User => ("user", Cow::Borrowed(message.content.as_str())),
        Role::Assistant => ("assistant", Cow::Borrowed(message.content.as_str())),
        Role::ToolResult => (
            "user",
            Cow::Owned(format!("[tool result]\n{}", message.content)),
        ),
    }
}

#[async_trait]
impl Adapter for OpenAiChatAdapter {
    fn provider(&self) -> ProviderId {
        self.provider
    }

    async fn send(&self, request: SendRequest<'_>) -> Result<SendOutcome> {
        let body = ChatCompletionsBody {
            model: request.model,
            messages: request
                .messages
                .iter()
                .map(|m| {
                    let (role, content) = to_wire_role_content(m);
                    WireMessage { role, content }
                })
                .collect(),
            temperature: request.params.temperature,
            max_tokens: request.params.max_tokens,
        };

        debug!(provider = %self.provider, model = request.model, messages = body.messages.len(), "chat completions request");

        let mut req = self
            .client
            .post(&self.endpoint)
            .header("Content-Type", "application/json");
        if let Some(key) = &self.api_key {
            req = req.header("Authorization", format!("Bearer {key}"));
        }

        let response = req
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(self.provider, e))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(OpgError::provider(
                self.provider.as_str(),
                format!("HTTP {status}: {error_text}"),
            ));
        }

        let parsed: ChatCompletionsResponse = response
            .json()
            .await
            .map_err(|e| transport_error(self.provider, e))?;

        let text = parsed
            .choices
            .first()
            .and_then(|c| c.message.content.as_deref())
            .map(|c| c.trim().to_string())
            .ok_or_else(|| {
                OpgError::provider(self.provider.as_str(), "no content in response")
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

    #[test]
    fn tool_results_travel_as_marked_user_messages() {
        let msg = Message {
            role: Role::ToolResult,
            content: "file contents".into(),
            seq: 3,
        };
        let (role, content) = to_wire_role_content(&msg);
        assert_eq!(role, "user");
        assert_eq!(content, "[tool result]\nfile contents");
    }

    #[test]
    fn request_body_serializes_expected_schema() {
        let messages = vec![
            Message {
                role: Role::System,
                content: "sys".into(),
                seq: 0,
            },
            Message {
                role: Role::User,
                content: "hello".into(),
                seq: 1,
            },
        ];
        let body = ChatCompletionsBody {
            model: "gpt-4",
            messages: messages
                .iter()
                .map(|m| {
                    let (role, content) = to_wire_role_content(m);
                    WireMessage { role, content }
                })
                .collect(),
            temperature: 0.7,
            max_tokens: 4096,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["model"], "gpt-4");
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["content"], "hello");
        assert_eq!(json["max_tokens"], 4096);
    }
}
