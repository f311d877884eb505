use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use tracing::info;
use url::Url;

use callforge_core::{CallError, NormalizedEvent, ProviderKind};

use crate::config::CustomSettings;
use crate::http::{json_body, require_call_id, transport_error};
use crate::phone::format_e164;
use crate::provider::{CallFlow, DialRequest, ProviderAdapter, ProviderResponse, TurnPrompt};
use crate::render;
use crate::webhook::{normalize, FieldNames, WebhookFields};

/// Generic candidates covering the common provider spellings.
const FIELDS: FieldNames = FieldNames {
    call_id: &["CallSid", "call_id", "CallUUID", "id", "callSid", "call_uuid"],
    status: &["CallStatus", "status", "call_status", "CallState"],
    speech: &["SpeechResult", "speech_result", "transcription", "speech"],
    dtmf: &["Digits", "dtmf", "digits"],
    delivery: &["EventId", "event_id", "SequenceNumber", "sequence", "CurrentTime", "timestamp"],
    recording_url: &["RecordingUrl", "recording_url"],
    duration: &["RecordingDuration", "duration", "call_duration", "Duration"],
    transcript: &["transcript"],
    summary: &["summary"],
};

/// Self-hosted gateway reached through a single dial URL.
pub struct CustomAdapter {
    settings: CustomSettings,
    client: Client,
    country_code: String,
}

impl CustomAdapter {
    pub fn new(settings: CustomSettings, client: Client, country_code: impl Into<String>) -> Self {
        Self {
            settings,
            client,
            country_code: country_code.into(),
        }
    }
}

#[async_trait]
impl ProviderAdapter for CustomAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Custom
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

        info!("[Telephony/Custom] Dialing via {}", self.settings.api_url);

        let response = self
            .client
            .post(&self.settings.api_url)
            .bearer_auth(&self.settings.api_secret)
            .header("X-API-KEY", &self.settings.api_key)
            .json(&json!({
                "to": to,
                "from": from,
                "webhook_url": request.webhook_url,
                "record": true,
                "metadata": request.metadata,
            }))
            .send()
            .await
            .map_err(|e| transport_error(self.kind(), e))?;

        let body = json_body(self.kind(), response).await?;
        require_call_id(self.kind(), &body, &["call_id", "id", "callSid", "sid"])
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
        render::markup(turn)
    }

    /// `POST /calls/{id}/hangup` on the gateway's host.
    async fn hangup(&self, provider_call_id: &str) -> Result<(), CallError> {
        let url = Url::parse(&self.settings.api_url)
            .and_then(|base| base.join(&format!("/calls/{provider_call_id}/hangup")))
            .map_err(|e| CallError::Configuration(format!("invalid TELEPHONY_API_URL: {e}")))?;

        let response = self
            .client
            .post(url)
            .bearer_auth(&self.settings.api_secret)
            .header("X-API-KEY", &self.settings.api_key)
            .send()
            .await
            .map_err(|e| transport_error(self.kind(), e))?;
        json_body(self.kind(), response).await?;
        info!(call_id = %provider_call_id, "[Telephony/Custom] Call hung up");
        Ok(())
    }
}
