//! Provider adapters: one implementation of [`ProviderAdapter`] per telephony or
//! voice-AI backend, plus the shared plumbing they are built from.

pub mod auth;
pub mod config;
pub mod http;
pub mod phone;
pub mod provider;
pub mod providers;
pub mod registry;
pub mod render;
pub mod webhook;

pub use config::{ProviderSettings, TelephonyConfig};
pub use phone::format_e164;
pub use provider::{CallFlow, CallScript, DialRequest, ProviderAdapter, ProviderResponse, TurnPrompt};
pub use registry::AdapterRegistry;
