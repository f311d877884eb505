pub mod config;
pub mod mock;
pub mod ollama;

pub use config::LlmConfig;
pub use mock::ScriptedModel;
pub use ollama::OllamaModel;
