use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;

/// Settings for the Ollama language-generation backend.
#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    /// Ollama base URL
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    /// Per-request timeout
    pub timeout: Duration,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            model: "llama3.2:3b".to_string(),
            temperature: 0.7,
            timeout: Duration::from_millis(30_000),
        }
    }
}

impl LlmConfig {
    /// Load configuration from environment variables with sensible defaults.
    pub fn from_env() -> Self {
        Self::from_vars(&std::env::vars().collect())
    }

    pub fn from_vars(vars: &HashMap<String, String>) -> Self {
        let defaults = Self::default();
        Self {
            base_url: vars
                .get("OLLAMA_URL")
                .map(|u| u.trim_end_matches('/').to_string())
                .unwrap_or(defaults.base_url),
            model: vars.get("OLLAMA_MODEL").cloned().unwrap_or(defaults.model),
            temperature: vars
                .get("OLLAMA_TEMPERATURE")
                .and_then(|t| t.parse().ok())
                .unwrap_or(defaults.temperature),
            timeout: vars
                .get("OLLAMA_TIMEOUT")
                .and_then(|t| t.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.timeout),
        }
    }
}
