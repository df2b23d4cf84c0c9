use std::borrow::Cow;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::adapters::{Adapter, SendOutcome, SendRequest, build_client, transport_error};
use crate::conversation::Role;
use crate::errors::{OpgError, Result};
use crate::registry::ProviderId;

#[derive(Debug, Serialize)]
struct ResponsesBody<'a> {
    model: &'a str,
    input: Vec<InputMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    instructions: Option<&'a str>,
    temperature: f64,
    max_output_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    previous_response_id: Option<&'a str>,
    store: bool,
}

#[derive(Debug, Serialize)]
struct InputMessage<'a> {
    role: &'a str,
    content: Cow<'a, str>,
}

#[derive(Debug, Deserialize)]
struct ResponsesResponse {
    id: String,
    output: Vec<OutputItem>,
}

#[derive(Debug, Deserialize)]
struct OutputItem {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    content: Vec<OutputContent>,
}

#[derive(Debug, Deserialize)]
struct OutputContent {
    #[serde(rename = "type")]
    kind: String,
    text: Option<String>,
}

/// Stateful adapter for the OpenAI responses API.
///
/// The remote side retains conversation history: the first call carries the
/// system prompt and the full sequence, every later call carries only the
/// newly appended messages plus the previous response id. The response id
/// comes back as the conversation's continuation token.
pub struct OpenAiResponsesAdapter {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl OpenAiResponsesAdapter {
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: build_client(timeout),
            endpoint: endpoint.into(),
            api_key: api_key.into(),
        }
    }
}

#[async_trait]
impl Adapter for OpenAiResponsesAdapter {
    fn provider(&self) -> ProviderId {
        ProviderId::OpenAi
    }

    async fn send(&self, request: SendRequest<'_>) -> Result<SendOutcome> {
        // The system prompt goes in `instructions`; it is not an input item.
        let instructions = request
            .messages
            .iter()
            .find(|m| m.role == Role::System)
            .map(|m| m.content.as_str());

        let input: Vec<InputMessage> = request
            .messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| match m.role {
                Role::Assistant => InputMessage {
                    role: "assistant",
                    content: Cow::Borrowed(m.content.as_str()),
                },
                Role::ToolResult => InputMessage {
                    role: "user",
                    content: Cow::Owned(format!("[tool result]\n{}", m.content)),
                },
                _ => InputMessage {
                    role: "user",
                    content: Cow::Borrowed(m.content.as_str()),
                },
            })
            .collect();

        let body = ResponsesBody {
            model: request.model,
            input,
            instructions,
            temperature: request.params.temperature,
            max_output_tokens: request.params.max_tokens,
            previous_response_id: request.continuation,
            store: true,
        };

        debug!(
            model = request.model,
            input = body.input.len(),
            continued = body.previous_response_id.is_some(),
            "responses request"
        );

        let response = self
            .client
            .post(&self.endpoint)
            .header("Content-Type", "application/json")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(ProviderId::OpenAi, e))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(OpgError::provider(
                ProviderId::OpenAi.as_str(),
                format!("HTTP {status}: {error_text}"),
            ));
        }

        let parsed: ResponsesResponse = response
            .json()
            .await
            .map_err(|e| transport_error(ProviderId::OpenAi, e))?;

        let text = parsed
            .output
            .iter()
            .filter(|item| item.kind == "message")
            .flat_map(|item| item.content.iter())
            .filter(|c| c.kind == "output_text")
            .filter_map(|c| c.text.as_deref())
            .collect::<Vec<_>>()
            .join("");

        if text.is_empty() {
            return Err(OpgError::provider(
                ProviderId::OpenAi.as_str(),
                "no output text in response",
            ));
        }

        Ok(SendOutcome {
            text: text.trim().to_string(),
            continuation: Some(parsed.id),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_output_text_is_collected() {
        let raw = serde_json::json!({
            "id": "resp_abc",
            "output": [
                {"type": "reasoning", "content": []},
                {"type": "message", "content": [
                    {"type": "output_text", "text": "Hello "},
                    {"type": "output_text", "text": "there."}
                ]}
            ]
        });
        let parsed: ResponsesResponse = serde_json::from_value(raw).unwrap();
        assert_eq!(parsed.id, "resp_abc");
        let text: String = parsed
            .output
            .iter()
            .filter(|i| i.kind == "message")
            .flat_map(|i| i.content.iter())
            .filter_map(|c| c.text.as_deref())
            .collect();
        assert_eq!(text, "Hello there.");
    }

    #[test]
    fn continuation_token_is_serialized_when_present() {
        let body = ResponsesBody {
            model: "gpt-4",
            input: vec![InputMessage {
                role: "user",
                content: Cow::Borrowed("again"),
            }],
            instructions: None,
            temperature: 0.7,
            max_output_tokens: 4096,
            previous_response_id: Some("resp_abc"),
            store: true,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["previous_response_id"], "resp_abc");
        assert!(json.get("instructions").is_none());
    }
}
