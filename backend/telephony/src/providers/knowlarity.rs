use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use tracing::info;

use callforge_core::{CallError, NormalizedEvent, ProviderKind};

use crate::config::CredentialSettings;
use crate::http::{json_body, require_call_id, transport_error};
use crate::phone::format_e164;
use crate::provider::{CallFlow, DialRequest, ProviderAdapter, ProviderResponse, TurnPrompt};
use crate::render;
use crate::webhook::{normalize, FieldNames, WebhookFields};

const FIELDS: FieldNames = FieldNames {
    call_id: &["call_id", "id", "call_uuid"],
    status: &["status", "call_status", "state"],
    speech: &["speech_result", "transcription", "user_input"],
    dtmf: &["dtmf", "digits"],
    delivery: &["event_id", "timestamp"],
    recording_url: &["recording_url", "recording", "media_url"],
    duration: &["duration", "call_duration"],
    transcript: &[],
    summary: &[],
};

/// Knowlarity click-to-call. JSON action responses, basic auth, no status API.
pub struct KnowlarityAdapter {
    settings: CredentialSettings,
    client: Client,
    base_url: String,
    country_code: String,
}

impl KnowlarityAdapter {
    pub fn new(settings: CredentialSettings, client: Client, country_code: impl Into<String>) -> Self {
        Self {
            settings,
            client,
            base_url: "https://www.knowlarity.com/api/v1".to_string(),
            country_code: country_code.into(),
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }
}

#[async_trait]
impl ProviderAdapter for KnowlarityAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Knowlarity
    }

    fn flow(&self) -> CallFlow {
        CallFlow::SelfHosted
    }

    async fn initiate(&self, request: &DialRequest) -> Result<String, CallError> {
        let to = format_e164(&request.to, &self.country_code);
        let from = format_e164(
            request.from.as_deref().unwrap_or(&self.settings.phone_number),
            &self.country_code,
        );

        info!("[Telephony/Knowlarity] Dialing");

        let response = self
            .client
            .post(format!("{}/call", self.base_url))
            .basic_auth(&self.settings.api_key, Some(&self.settings.api_token))
            .json(&json!({
                "from": from,
                "to": to,
                "webhook_url": request.webhook_url,
                "record": true,
                "metadata": request.metadata,
            }))
            .send()
            .await
            .map_err(|e| transport_error(self.kind(), e))?;

        let body = json_body(self.kind(), response).await?;
        require_call_id(self.kind(), &body, &["call_id", "id"])
    }

    fn parse_webhook(
        &self,
        body: &[u8],
        content_type: Option<&str>,
    ) -> Result<NormalizedEvent, CallError> {
        let fields = WebhookFields::parse(body, content_type)?;
        normalize(self.kind(), &fields, &FIELDS)
    }

    fn render_turn(&self, turn: &TurnPrompt) -> ProviderResponse {
        render::json_action(turn)
    }
}
