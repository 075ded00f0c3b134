pub mod ai;
pub mod config;
pub mod models;
pub mod provider;
pub mod relay;
pub mod state;

// Re-export main types for convenience
pub use ai::{InferenceClient, OllamaClient, OpenAIClient};
pub use config::{Config, Secrets, Setting, SettingSource};
pub use models::{list_models_or_default, ModelChoices};
pub use provider::Provider;
pub use relay::{ChatRelay, CompletedTurn, TurnOutcome};
pub use state::{
    ChatMessage, ChatRole, ChatSession, ChatSettings, SessionError, SessionPhase, EMPTY_REPLY,
    ERROR_NOTICE,
};
