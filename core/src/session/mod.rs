use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::adapters::{Adapter, SamplingParams, SendRequest, create_adapter};
use crate::config::Config;
use crate::conversation::{ApiMode, Conversation, Message, Role};
use crate::errors::{OpgError, Result};
use crate::registry::{ProviderId, ProviderListing, Registry, ResolvedModel};
use crate::tools;

/// Where a prompt update applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptScope {
    /// The active conversation only.
    Current,
    /// The default for every conversation created afterwards.
    Default,
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub tools_enabled: bool,
    pub sandbox_root: PathBuf,
    pub tool_loop_cap: usize,
    pub request_timeout: Duration,
}

impl SessionOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            tools_enabled: config.tools_enabled,
            sandbox_root: config.sandbox_root.clone(),
            tool_loop_cap: config.tool_loop_cap,
            request_timeout: Duration::from_secs(config.request_timeout_secs),
        }
    }
}

/// Summary of a freshly created conversation, for the shell to render.
#[derive(Debug, Clone)]
pub struct ConversationInfo {
    pub provider: ProviderId,
    pub model: String,
    pub api_mode: ApiMode,
}

/// Result of replacing a provider's model set.
#[derive(Debug, Clone)]
pub struct ChangeModelsOutcome {
    pub provider: ProviderId,
    pub models: Vec<String>,
    /// Model the session was rebound to when the previous binding vanished.
    pub rebound_to: Option<String>,
    /// True when the previous conversation had to be discarded entirely.
    pub dropped: bool,
}

type AdapterFactory = Box<
    dyn Fn(&ResolvedModel, ApiMode, &Registry, Duration) -> Result<Arc<dyn Adapter>> + Send + Sync,
>;

/// Conversation state captured when a turn begins, restored if the turn is
/// rolled back. Covers the stateful continuation bookkeeping as well, so a
/// failed or abandoned exchange cannot leave the token ahead of the history.
struct TurnSnapshot {
    messages: usize,
    synced: usize,
    continuation: Option<String>,
}

struct Active {
    conversation: Conversation,
    adapter: Arc<dyn Adapter>,
    model: ResolvedModel,
    prompt_override: Option<String>,
    in_flight: Option<TurnSnapshot>,
}

/// Owns the current conversation and drives the turn loop.
///
/// All mutation of session state goes through this controller; there are no
/// process-wide registries. One turn is fully processed before the next input
/// is accepted.
pub struct SessionController {
    registry: Registry,
    options: SessionOptions,
    factory: AdapterFactory,
    current: Option<Active>,
}

impl SessionController {
    pub fn new(registry: Registry, options: SessionOptions) -> Self {
        Self {
            registry,
            options,
            factory: Box::new(|model, api_mode, registry, timeout| {
                let settings = registry.settings(model.provider).ok_or_else(|| {
                    OpgError::Configuration(format!("unknown provider: {}", model.provider))
                })?;
                create_adapter(model, settings, api_mode, timeout).map(Arc::from)
            }),
            current: None,
        }
    }

    /// Swaps the adapter construction seam, used by tests to record traffic.
    pub fn with_adapter_factory<F>(mut self, factory: F) -> Self
    where
        F: Fn(&ResolvedModel, ApiMode, &Registry, Duration) -> Result<Arc<dyn Adapter>>
            + Send
            + Sync
            + 'static,
    {
        self.factory = Box::new(factory);
        self
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut Registry {
        &mut self.registry
    }

    pub fn conversation(&self) -> Option<&Conversation> {
        self.current.as_ref().map(|a| &a.conversation)
    }

    /// Starts a conversation with the given model, or the first available
    /// one. Any previous conversation is discarded wholesale.
    pub fn new_conversation(&mut self, model_id: Option<&str>) -> Result<ConversationInfo> {
        let model = match model_id {
            Some(id) => self.registry.resolve_model(id)?,
            None => self.registry.default_model().ok_or_else(|| {
                OpgError::Configuration("no providers available; configure an API key or start a local server".into())
            })?,
        };
        self.activate(model, ApiMode::Stateless, None)
    }

    fn activate(
        &mut self,
        model: ResolvedModel,
        api_mode: ApiMode,
        prompt_override: Option<String>,
    ) -> Result<ConversationInfo> {
        // Reject bad sampling parameters before any state changes.
        SamplingParams::validated(model.temperature, model.max_tokens)?;

        let adapter = (self.factory)(&model, api_mode, &self.registry, self.options.request_timeout)?;
        let mut conversation = Conversation::new(model.provider, model.id.clone(), api_mode);
        let prompt = self.effective_prompt(&model, prompt_override.as_deref());
        conversation.push(Role::System, prompt);

        info!(provider = %model.provider, model = %model.id, mode = api_mode.as_str(), "conversation started");

        let info = ConversationInfo {
            provider: model.provider,
            model: model.id.clone(),
            api_mode,
        };
        self.current = Some(Active {
            conversation,
            adapter,
            model,
            prompt_override,
            in_flight: None,
        });
        Ok(info)
    }

    /// System prompt resolution: conversation override, else the model's
    /// (which already inherits from the provider and global defaults), plus
    /// the tool protocol fragment when filesystem access is on.
    fn effective_prompt(&self, model: &ResolvedModel, prompt_override: Option<&str>) -> String {
        let mut prompt = prompt_override
            .map(|p| p.to_string())
            .unwrap_or_else(|| model.system_prompt.clone());
        if self.options.tools_enabled {
            prompt.push_str(&tools::instructions());
        }
        prompt
    }

    /// Resets the message sequence; model binding and API mode survive.
    pub fn clear(&mut self) -> Result<ConversationInfo> {
        let tools_enabled = self.options.tools_enabled;
        let active = self.require_active()?;
        active.conversation.clear();
        let mut prompt = active
            .prompt_override
            .clone()
            .unwrap_or_else(|| active.model.system_prompt.clone());
        if tools_enabled {
            prompt.push_str(&tools::instructions());
        }
        active.conversation.push(Role::System, prompt);
        Ok(ConversationInfo {
            provider: active.model.provider,
            model: active.model.id.clone(),
            api_mode: active.conversation.api_mode(),
        })
    }

    pub fn set_prompt(&mut self, text: &str, scope: PromptScope) -> Result<()> {
        match scope {
            PromptScope::Current => {
                let tools_enabled = self.options.tools_enabled;
                let active = self.require_active()?;
                active.prompt_override = Some(text.to_string());
                let mut prompt = text.to_string();
                if tools_enabled {
                    prompt.push_str(&tools::instructions());
                }
                active.conversation.set_system_prompt(prompt);
                Ok(())
            }
            PromptScope::Default => {
                self.registry.set_default_prompt(text);
                Ok(())
            }
        }
    }

    /// Reads a prompt from a file; applying it is the caller's decision.
    pub fn load_prompt(&self, path: &std::path::Path) -> Result<String> {
        std::fs::read_to_string(path)
            .map_err(|e| OpgError::Validation(format!("cannot read {}: {e}", path.display())))
    }

    pub fn current_prompt(&self) -> Option<&str> {
        self.conversation().and_then(|c| c.system_prompt())
    }

    /// Non-system transcript of the active conversation.
    pub fn history(&self) -> Vec<&Message> {
        self.conversation()
            .map(|c| {
                c.messages()
                    .iter()
                    .filter(|m| m.role != Role::System)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn list_providers(&self) -> Vec<ProviderListing> {
        self.registry.list()
    }

    pub fn list_models(&self) -> Vec<(ProviderId, String, bool)> {
        self.registry.list_models()
    }

    /// Replaces a provider's enabled models for the rest of the process.
    /// If the active conversation's model disappears, the session rebinds to
    /// the first available model, or drops the conversation when none is left.
    pub fn change_models(
        &mut self,
        provider: ProviderId,
        models: Vec<String>,
    ) -> Result<ChangeModelsOutcome> {
        self.registry.update_models(provider, models.clone())?;

        let mut outcome = ChangeModelsOutcome {
            provider,
            models,
            rebound_to: None,
            dropped: false,
        };

        let stale = self
            .current
            .as_ref()
            .is_some_and(|a| self.registry.resolve_model(a.conversation.model()).is_err());
        if stale {
            match self.registry.default_model() {
                Some(model) => {
                    let id = model.id.clone();
                    self.activate(model, ApiMode::Stateless, None)?;
                    outcome.rebound_to = Some(id);
                }
                None => {
                    warn!("no model left to rebind; conversation dropped");
                    self.current = None;
                    outcome.dropped = true;
                }
            }
        }
        Ok(outcome)
    }

    /// Moves to the requested API mode by starting a fresh conversation with
    /// the same model and prompt. In-place switching is impossible: the two
    /// modes have incompatible history ownership. OpenAI only.
    pub fn switch_api_mode(&mut self, mode: ApiMode) -> Result<ConversationInfo> {
        let active = self.require_active()?;
        if active.model.provider != ProviderId::OpenAi {
            return Err(OpgError::Configuration(format!(
                "API switching is not available for {} models",
                active.model.provider
            )));
        }
        if active.conversation.api_mode() == mode {
            return Ok(ConversationInfo {
                provider: active.model.provider,
                model: active.model.id.clone(),
                api_mode: mode,
            });
        }
        let model = active.model.clone();
        let prompt_override = active.prompt_override.clone();
        self.activate(model, mode, prompt_override)
    }

    /// Rolls an interrupted turn back to where it began, including any
    /// intermediate tool-loop messages and stateful bookkeeping, so an
    /// abandoned exchange appends nothing.
    pub fn discard_incomplete_turn(&mut self) {
        if let Some(active) = self.current.as_mut() {
            Self::rollback(active);
        }
    }

    fn rollback(active: &mut Active) {
        if let Some(snapshot) = active.in_flight.take() {
            active.conversation.truncate(snapshot.messages);
            active
                .conversation
                .rewind_sync(snapshot.synced, snapshot.continuation);
        }
    }

    /// One full user turn: append, exchange with the provider, run the
    /// bounded tool loop, and return the text to render. A transport failure
    /// rolls the whole turn back off the conversation.
    pub async fn send_message(&mut self, text: &str) -> Result<String> {
        let tools_enabled = self.options.tools_enabled;
        let tool_loop_cap = self.options.tool_loop_cap.max(1);
        let sandbox_root = self.options.sandbox_root.clone();

        let active = self.require_active()?;
        let params = SamplingParams::validated(active.model.temperature, active.model.max_tokens)?;

        active.in_flight = Some(TurnSnapshot {
            messages: active.conversation.messages().len(),
            synced: active.conversation.synced(),
            continuation: active.conversation.continuation().map(str::to_string),
        });
        active.conversation.push(Role::User, text);

        let mut iterations = 0;
        loop {
            iterations += 1;

            let outcome = {
                let conv = &active.conversation;
                let (messages, continuation) = match conv.api_mode() {
                    ApiMode::Stateless => (conv.messages(), None),
                    ApiMode::Stateful => (conv.unsynced(), conv.continuation()),
                };
                let request = SendRequest {
                    model: &active.model.id,
                    messages,
                    params,
                    continuation,
                };
                active.adapter.send(request).await
            };

            let outcome = match outcome {
                Ok(outcome) => outcome,
                Err(e) => {
                    // The user may resend; nothing of this turn survives, not
                    // even a continuation advanced by an earlier iteration.
                    Self::rollback(active);
                    return Err(e);
                }
            };

            active.conversation.push(Role::Assistant, outcome.text.clone());
            if active.conversation.api_mode() == ApiMode::Stateful {
                active.conversation.set_continuation(outcome.continuation);
                // The server already holds everything up to its own reply.
                active.conversation.mark_synced();
            }

            if tools_enabled
                && let Some(invocation) = tools::extract(&outcome.text)
            {
                if iterations >= tool_loop_cap {
                    warn!(cap = tool_loop_cap, "tool loop cap reached; returning last text verbatim");
                    active.in_flight = None;
                    return Ok(outcome.text);
                }
                info!(operation = %invocation.operation, "tool call detected");
                let result = match tools::execute(&invocation, &sandbox_root) {
                    Ok(output) => output,
                    // Failures go back into the conversation so the model
                    // can react; they never end the session.
                    Err(e @ (OpgError::Tool(_) | OpgError::SandboxViolation(_))) => e.to_string(),
                    Err(e) => return Err(e),
                };
                active.conversation.push(Role::ToolResult, result);
                continue;
            }

            active.in_flight = None;
            return Ok(outcome.text);
        }
    }

    fn require_active(&mut self) -> Result<&mut Active> {
        self.current.as_mut().ok_or_else(|| {
            OpgError::Configuration("no active conversation; start one with /new".into())
        })
    }
}
