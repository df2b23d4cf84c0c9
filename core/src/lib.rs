pub mod adapters;
pub mod config;
pub mod conversation;
pub mod errors;
pub mod registry;
pub mod session;
pub mod tools;

pub use adapters::{Adapter, SamplingParams, SendOutcome, SendRequest, create_adapter};
pub use config::{Config, ProviderConfig, get_config_path, get_opg_dir, save_config};
pub use conversation::{ApiMode, Conversation, Message, Role};
pub use errors::{OpgError, Result};
pub use registry::{ModelSpec, ProviderId, ProviderListing, Registry, ResolvedModel};
pub use session::{
    ChangeModelsOutcome, ConversationInfo, PromptScope, SessionController, SessionOptions,
};
