use std::collections::BTreeMap;

use async_trait::async_trait;

use callforge_core::{CallError, NormalizedEvent, ProviderCallDetails, ProviderKind};

/// Who conducts the conversation once the call connects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallFlow {
    /// The provider only carries audio; the engine generates every spoken turn.
    SelfHosted,
    /// The provider runs its own voice agent and reports back when done.
    Hosted,
}

/// Persona and opening line handed to hosted voice agents.
#[derive(Debug, Clone)]
pub struct CallScript {
    pub system_prompt: String,
    pub first_message: String,
    pub language: String,
}

/// An outbound dial request, already resolved to a driver and webhook.
#[derive(Debug, Clone)]
pub struct DialRequest {
    /// Destination as stored; adapters format it for their network.
    pub to: String,
    /// Caller id override. Adapters fall back to their configured number.
    pub from: Option<String>,
    pub webhook_url: String,
    pub metadata: BTreeMap<String, String>,
    pub script: Option<CallScript>,
}

/// The next thing to say on a self-hosted call.
#[derive(Debug, Clone)]
pub struct TurnPrompt {
    pub text: String,
    /// Ask the provider to capture the reply and post it back to `action_url`.
    pub continue_listening: bool,
    pub language: String,
    pub voice: String,
    pub action_url: String,
}

/// A webhook response body in the format the provider expects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderResponse {
    pub content_type: &'static str,
    pub body: String,
}

/// Uniform lifecycle over a telephony or voice-AI backend.
///
/// Call sites depend only on this trait; the concrete adapter is chosen once
/// when the [`crate::AdapterRegistry`] is built from configuration.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn kind(&self) -> ProviderKind;

    fn flow(&self) -> CallFlow;

    /// Place the call and return the provider's call id.
    async fn initiate(&self, request: &DialRequest) -> Result<String, CallError>;

    /// Translate a raw webhook body. A missing call id is a validation error.
    fn parse_webhook(
        &self,
        body: &[u8],
        content_type: Option<&str>,
    ) -> Result<NormalizedEvent, CallError>;

    fn render_turn(&self, turn: &TurnPrompt) -> ProviderResponse;

    /// Ask the provider what it knows about a call.
    ///
    /// Providers without a status API report the unknown sentinel.
    async fn fetch_status(&self, provider_call_id: &str) -> Result<ProviderCallDetails, CallError> {
        Ok(ProviderCallDetails::unknown(self.kind(), provider_call_id))
    }

    /// End a live call. Providers without a hangup API refuse with a validation error.
    async fn hangup(&self, provider_call_id: &str) -> Result<(), CallError> {
        Err(CallError::Validation(format!(
            "{} cannot hang up call {provider_call_id}",
            self.kind()
        )))
    }
}
