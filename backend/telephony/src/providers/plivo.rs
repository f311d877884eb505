use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::json;
use tracing::{debug, info};

use callforge_core::{CallError, CallStatus, NormalizedEvent, ProviderCallDetails, ProviderKind};

use crate::config::PlivoSettings;
use crate::http::{json_body, pick_str, require_call_id, transport_error};
use crate::phone::format_e164;
use crate::provider::{CallFlow, DialRequest, ProviderAdapter, ProviderResponse, TurnPrompt};
use crate::render;
use crate::webhook::{normalize, FieldNames, WebhookFields};

const FIELDS: FieldNames = FieldNames {
    call_id: &["CallUUID", "CallSid", "call_uuid", "RequestUUID"],
    status: &["CallStatus", "CallState", "status"],
    speech: &["SpeechResult", "speech_result", "Speech"],
    dtmf: &["Digits", "DTMF"],
    delivery: &["EventTimestamp", "Timestamp", "CurrentTime"],
    recording_url: &["RecordingUrl", "recording_url", "RecordUrl"],
    duration: &["RecordingDuration", "Duration", "duration", "BillDuration"],
    transcript: &[],
    summary: &[],
};

/// Plivo voice API. Markup responses, basic auth with the auth id.
pub struct PlivoAdapter {
    settings: PlivoSettings,
    client: Client,
    base_url: String,
    country_code: String,
}

impl PlivoAdapter {
    pub fn new(settings: PlivoSettings, client: Client, country_code: impl Into<String>) -> Self {
        Self {
            settings,
            client,
            base_url: "https://api.plivo.com".to_string(),
            country_code: country_code.into(),
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    fn call_url(&self) -> String {
        format!("{}/v1/Account/{}/Call/", self.base_url, self.settings.auth_id)
    }
}

#[async_trait]
impl ProviderAdapter for PlivoAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Plivo
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

        info!("[Telephony/Plivo] Dialing");

        // Plivo wants numbers without the leading plus.
        let response = self
            .client
            .post(self.call_url())
            .basic_auth(&self.settings.auth_id, Some(&self.settings.auth_token))
            .json(&json!({
                "to": to.trim_start_matches('+'),
                "from": from.trim_start_matches('+'),
                "answer_url": request.webhook_url,
                "answer_method": "POST",
                "hangup_url": request.webhook_url,
                "hangup_method": "POST",
                "record": true,
                "record_callback_url": request.webhook_url,
            }))
            .send()
            .await
            .map_err(|e| transport_error(self.kind(), e))?;

        let body = json_body(self.kind(), response).await?;
        // `request_uuid` can be a single id or a list when dialing several numbers.
        if let Some(first) = body
            .get("request_uuid")
            .and_then(|v| v.as_array())
            .and_then(|ids| ids.first())
            .and_then(|id| id.as_str())
        {
            return Ok(first.to_string());
        }
        require_call_id(self.kind(), &body, &["request_uuid", "call_uuid"])
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

    async fn fetch_status(&self, provider_call_id: &str) -> Result<ProviderCallDetails, CallError> {
        let response = self
            .client
            .get(format!("{}{}/", self.call_url(), provider_call_id))
            .basic_auth(&self.settings.auth_id, Some(&self.settings.auth_token))
            .send()
            .await
            .map_err(|e| transport_error(self.kind(), e))?;

        if response.status() == StatusCode::NOT_FOUND {
            debug!(call_uuid = %provider_call_id, "Plivo has no record of call");
            return Ok(ProviderCallDetails::unknown(self.kind(), provider_call_id));
        }

        let body = json_body(self.kind(), response).await?;
        let Some(raw) = pick_str(&body, &["call_status", "call_state", "status"]) else {
            return Ok(ProviderCallDetails::unknown(self.kind(), provider_call_id));
        };

        let mut details = ProviderCallDetails::known(
            self.kind(),
            provider_call_id,
            CallStatus::from_provider_or_failed(&raw),
        );
        details.raw_status = Some(raw);
        details.duration_seconds = pick_str(&body, &["call_duration", "duration", "bill_duration"])
            .and_then(|d| d.parse::<f64>().ok())
            .map(|d| d.round() as u64);
        details.recording_url = pick_str(&body, &["recording_url"]);
        Ok(details)
    }

    async fn hangup(&self, provider_call_id: &str) -> Result<(), CallError> {
        let response = self
            .client
            .delete(format!("{}{}/", self.call_url(), provider_call_id))
            .basic_auth(&self.settings.auth_id, Some(&self.settings.auth_token))
            .send()
            .await
            .map_err(|e| transport_error(self.kind(), e))?;
        json_body(self.kind(), response).await?;
        info!(call_uuid = %provider_call_id, "[Telephony/Plivo] Call hung up");
        Ok(())
    }
}
