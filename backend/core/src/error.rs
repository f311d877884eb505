use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Top-level error type for the call orchestration engine.
#[derive(Debug, Error)]
pub enum CallError {
    #[error("provider error ({provider}): {message}")]
    Provider {
        provider: String,
        message: String,
        /// HTTP status returned by the provider, when there was one.
        status: Option<u16>,
        retryable: bool,
    },

    #[error("network error ({provider}): {message}")]
    Network { provider: String, message: String },

    #[error("language generation failed: {0}")]
    Generation(#[from] GenerationError),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        source: Box<CallError>,
    },

    #[error("all providers failed. last error ({last_provider}): {source}")]
    AllProvidersFailed {
        last_provider: String,
        source: Box<CallError>,
    },

    #[error("no telephony provider is configured")]
    NoProviders,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Failure reported by the language-generation collaborator.
#[derive(Debug, Clone, Error)]
pub enum GenerationError {
    #[error("language model timed out after {0:?}")]
    Timeout(Duration),

    #[error("language model unavailable: {0}")]
    Unavailable(String),

    #[error("language model returned an empty response")]
    EmptyResponse,

    #[error("language model returned an invalid response: {0}")]
    InvalidResponse(String),
}

/// Coarse error classes used for retry/failover decisions and caller-facing reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Network,
    Authentication,
    RateLimit,
    Validation,
    Provider,
    Unknown,
}

const RETRYABLE_PATTERNS: &[&str] = &[
    "econnreset",
    "etimedout",
    "enotfound",
    "econnrefused",
    "timeout",
    "timed out",
    "network",
    "connection reset",
    "connection refused",
    "dns",
    "rate limit",
    "too many requests",
    "503",
    "502",
    "500",
];

/// Whether an error message looks like a transient failure worth retrying.
pub fn is_retryable_message(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    RETRYABLE_PATTERNS.iter().any(|p| lower.contains(p))
}

impl ErrorCategory {
    /// Keyword classification, checked in order. The first family that matches wins.
    pub fn from_message(message: &str) -> ErrorCategory {
        let m = message.to_ascii_lowercase();
        let has = |words: &[&str]| words.iter().any(|w| m.contains(w));

        if has(&["network", "timeout", "timed out", "connection"]) {
            Self::Network
        } else if has(&["auth", "unauthorized", "forbidden", "401", "403"]) {
            Self::Authentication
        } else if has(&["rate limit", "429", "too many"]) {
            Self::RateLimit
        } else if has(&["validation", "invalid", "400"]) {
            Self::Validation
        } else if has(&["provider", "service unavailable", "503"]) {
            Self::Provider
        } else {
            Self::Unknown
        }
    }

    /// Authentication and validation failures mean misconfiguration or bad input.
    /// Retrying or moving to another provider cannot fix either.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Authentication | Self::Validation)
    }

    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Network => {
                "Network connection issue. Please check your internet connection and try again."
            }
            Self::Authentication => "Authentication failed. Please check your API credentials.",
            Self::RateLimit => "Rate limit exceeded. Please wait a moment and try again.",
            Self::Validation => "Invalid input. Please check your data and try again.",
            Self::Provider => "Service temporarily unavailable. Please try again later.",
            Self::Unknown => "An unexpected error occurred.",
        }
    }

    pub fn suggestions(&self) -> &'static [&'static str] {
        match self {
            Self::Network => &[
                "Check your internet connection",
                "Verify the service is accessible",
                "Try again in a few moments",
            ],
            Self::Authentication => &[
                "Verify your API keys are correct",
                "Check if your account has sufficient permissions",
                "Ensure your credentials haven't expired",
            ],
            Self::RateLimit => &[
                "Wait a few minutes before retrying",
                "Consider upgrading your plan for higher limits",
                "Implement request throttling",
            ],
            Self::Validation => &[
                "Review the input data format",
                "Check required fields are provided",
                "Verify data types match expected format",
            ],
            Self::Provider => &[
                "Try again in a few minutes",
                "Check provider status page",
                "Contact support if issue persists",
            ],
            Self::Unknown => &[
                "Check the error logs for details",
                "Try again later",
                "Contact support if the issue persists",
            ],
        }
    }
}

impl CallError {
    pub fn provider(
        provider: impl Into<String>,
        message: impl Into<String>,
        status: Option<u16>,
    ) -> Self {
        let message = message.into();
        let retryable = match status {
            Some(code) => code == 429 || code >= 500,
            None => is_retryable_message(&message),
        };
        Self::Provider {
            provider: provider.into(),
            message,
            status,
            retryable,
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Provider { status: Some(code), .. } => match *code {
                401 | 403 => ErrorCategory::Authentication,
                429 => ErrorCategory::RateLimit,
                400 | 404 | 409 | 422 => ErrorCategory::Validation,
                c if c >= 500 => ErrorCategory::Provider,
                _ => ErrorCategory::from_message(&self.to_string()),
            },
            Self::Provider { message, .. } => match ErrorCategory::from_message(message) {
                ErrorCategory::Unknown => ErrorCategory::Provider,
                other => other,
            },
            Self::Network { .. } => ErrorCategory::Network,
            Self::Generation(GenerationError::Timeout(_)) => ErrorCategory::Network,
            Self::Generation(_) => ErrorCategory::Provider,
            Self::Validation(_) | Self::NotFound(_) | Self::Configuration(_) => {
                ErrorCategory::Validation
            }
            Self::NoProviders => ErrorCategory::Provider,
            Self::RetriesExhausted { source, .. } | Self::AllProvidersFailed { source, .. } => {
                source.category()
            }
            Self::Storage(_) => ErrorCategory::Unknown,
            Self::Other(e) => ErrorCategory::from_message(&e.to_string()),
        }
    }

    /// Transient failures that are worth another attempt against the same provider.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Provider { retryable, .. } => *retryable,
            Self::Network { .. } => true,
            Self::Generation(GenerationError::Timeout(_)) => true,
            Self::Other(e) => is_retryable_message(&e.to_string()),
            _ => false,
        }
    }

    pub fn report(&self) -> ErrorReport {
        ErrorReport::from(self)
    }
}

/// Caller-facing description of a failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorReport {
    pub message: String,
    pub category: ErrorCategory,
    pub suggestions: Vec<String>,
}

impl From<&CallError> for ErrorReport {
    fn from(err: &CallError) -> Self {
        let category = err.category();
        let message = match (category, err) {
            (ErrorCategory::Unknown, _) | (_, CallError::NotFound(_)) => err.to_string(),
            (ErrorCategory::Validation, CallError::Validation(detail)) => {
                format!("{} {}", category.user_message(), detail)
            }
            _ => category.user_message().to_string(),
        };
        Self {
            message,
            category,
            suggestions: category.suggestions().iter().map(|s| s.to_string()).collect(),
        }
    }
}
