use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::errors::{OpgError, Result};
use crate::registry::ProviderId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    /// Result of a sandboxed tool execution, fed back to the model.
    ToolResult,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::ToolResult => "tool-result",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    /// Insertion position within the conversation. Strictly increasing;
    /// restarts at zero on `clear()`.
    pub seq: usize,
}

/// How conversation history reaches the provider.
///
/// Stateless adapters replay the full message sequence on every call.
/// Stateful adapters hand history ownership to the remote side and only send
/// what was appended since the last exchange, plus a continuation token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiMode {
    Stateless,
    Stateful,
}

impl ApiMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApiMode::Stateless => "stateless",
            ApiMode::Stateful => "stateful",
        }
    }
}

/// An in-memory conversation bound to exactly one model.
///
/// The binding is fixed at creation; switching models means creating a new
/// conversation. `clear()` resets the message sequence but keeps the binding.
#[derive(Debug)]
pub struct Conversation {
    provider: ProviderId,
    model: String,
    api_mode: ApiMode,
    messages: Vec<Message>,
    next_seq: usize,
    /// Opaque handle to server-retained history (stateful mode only).
    continuation: Option<String>,
    /// Number of leading messages already delivered to a stateful provider.
    synced: usize,
    created_at: DateTime<Local>,
}

impl Conversation {
    pub fn new(provider: ProviderId, model: impl Into<String>, api_mode: ApiMode) -> Self {
        Self {
            provider,
            model: model.into(),
            api_mode,
            messages: Vec::new(),
            next_seq: 0,
            continuation: None,
            synced: 0,
            created_at: Local::now(),
        }
    }

    pub fn provider(&self) -> ProviderId {
        self.provider
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn api_mode(&self) -> ApiMode {
        self.api_mode
    }

    pub fn created_at(&self) -> DateTime<Local> {
        self.created_at
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn push(&mut self, role: Role, content: impl Into<String>) -> usize {
        let seq = self.next_seq;
        self.messages.push(Message {
            role,
            content: content.into(),
            seq,
        });
        self.next_seq += 1;
        seq
    }

    /// Drops messages past `len`, rewinding the sequence counter with them.
    /// Used to roll a failed or abandoned turn back off the conversation.
    pub fn truncate(&mut self, len: usize) {
        if len < self.messages.len() {
            self.messages.truncate(len);
            self.next_seq = self.messages.last().map(|m| m.seq + 1).unwrap_or(0);
            self.synced = self.synced.min(self.messages.len());
        }
    }

    /// Resets the message sequence to empty. Model binding, API mode and any
    /// server-side continuation are discarded along with the history.
    pub fn clear(&mut self) {
        self.messages.clear();
        self.next_seq = 0;
        self.continuation = None;
        self.synced = 0;
    }

    pub fn continuation(&self) -> Option<&str> {
        self.continuation.as_deref()
    }

    pub fn set_continuation(&mut self, token: Option<String>) {
        self.continuation = token;
    }

    /// Messages not yet delivered to a stateful provider.
    pub fn unsynced(&self) -> &[Message] {
        &self.messages[self.synced..]
    }

    pub fn synced(&self) -> usize {
        self.synced
    }

    /// Rolls the stateful delivery bookkeeping back to an earlier snapshot,
    /// paired with `truncate` when a turn is rolled back.
    pub fn rewind_sync(&mut self, synced: usize, continuation: Option<String>) {
        self.synced = synced.min(self.messages.len());
        self.continuation = continuation;
    }

    /// Marks everything currently in the sequence as delivered.
    pub fn mark_synced(&mut self) {
        self.synced = self.messages.len();
    }

    /// Returns the system message content, if one leads the sequence.
    pub fn system_prompt(&self) -> Option<&str> {
        self.messages
            .iter()
            .find(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
    }

    /// Replaces the system message content in place, or inserts one at the
    /// head of the sequence when the conversation has none.
    pub fn set_system_prompt(&mut self, prompt: impl Into<String>) {
        let prompt = prompt.into();
        if let Some(msg) = self.messages.iter_mut().find(|m| m.role == Role::System) {
            msg.content = prompt;
        } else {
            // Renumber so the system message owns seq 0.
            self.messages.insert(
                0,
                Message {
                    role: Role::System,
                    content: prompt,
                    seq: 0,
                },
            );
            for (i, msg) in self.messages.iter_mut().enumerate() {
                msg.seq = i;
            }
            self.next_seq = self.messages.len();
        }
    }

    /// In-place mode switches are rejected: stateless and stateful history
    /// ownership are incompatible, so switching requires a new conversation.
    pub fn switch_api_mode(&mut self, mode: ApiMode) -> Result<()> {
        if mode == self.api_mode {
            return Ok(());
        }
        Err(OpgError::Configuration(format!(
            "cannot switch a {} conversation to {} in place; start a new conversation",
            self.api_mode.as_str(),
            mode.as_str()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Conversation {
        Conversation::new(ProviderId::OpenAi, "gpt-4", ApiMode::Stateless)
    }

    #[test]
    fn sequence_is_strictly_increasing() {
        let mut conv = sample();
        let a = conv.push(Role::System, "sys");
        let b = conv.push(Role::User, "hi");
        let c = conv.push(Role::Assistant, "hello");
        assert_eq!((a, b, c), (0, 1, 2));
        let seqs: Vec<usize> = conv.messages().iter().map(|m| m.seq).collect();
        assert_eq!(seqs, vec![0, 1, 2]);
    }

    #[test]
    fn clear_restarts_sequence_and_keeps_binding() {
        let mut conv = sample();
        conv.push(Role::System, "sys");
        conv.push(Role::User, "hi");
        conv.set_continuation(Some("resp_1".into()));
        conv.clear();
        assert!(conv.messages().is_empty());
        assert!(conv.continuation().is_none());
        assert_eq!(conv.model(), "gpt-4");
        assert_eq!(conv.push(Role::System, "sys"), 0);
    }

    #[test]
    fn truncate_rewinds_sequence() {
        let mut conv = sample();
        conv.push(Role::System, "sys");
        conv.push(Role::User, "hi");
        conv.push(Role::User, "again");
        conv.truncate(1);
        assert_eq!(conv.messages().len(), 1);
        assert_eq!(conv.push(Role::User, "redo"), 1);
    }

    #[test]
    fn in_place_mode_switch_is_rejected() {
        let mut conv = sample();
        let err = conv.switch_api_mode(ApiMode::Stateful).unwrap_err();
        assert!(matches!(err, OpgError::Configuration(_)));
        // Same mode is a no-op.
        assert!(conv.switch_api_mode(ApiMode::Stateless).is_ok());
    }

    #[test]
    fn set_system_prompt_replaces_in_place() {
        let mut conv = sample();
        conv.push(Role::System, "old");
        conv.push(Role::User, "hi");
        conv.set_system_prompt("new");
        assert_eq!(conv.system_prompt(), Some("new"));
        assert_eq!(conv.messages().len(), 2);
    }

    #[test]
    fn unsynced_tracks_stateful_delivery() {
        let mut conv = Conversation::new(ProviderId::OpenAi, "gpt-4", ApiMode::Stateful);
        conv.push(Role::System, "sys");
        conv.push(Role::User, "first");
        assert_eq!(conv.unsynced().len(), 2);
        conv.mark_synced();
        conv.push(Role::User, "second");
        let tail: Vec<&str> = conv.unsynced().iter().map(|m| m.content.as_str()).collect();
        assert_eq!(tail, vec!["second"]);
    }
}
