use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Map, Value};
use tracing::{debug, info};

use callforge_core::{CallError, CallStatus, NormalizedEvent, ProviderCallDetails, ProviderKind};

use crate::config::ElevenLabsSettings;
use crate::http::{json_body, pick_str, require_call_id, transport_error};
use crate::phone::format_e164;
use crate::provider::{CallFlow, DialRequest, ProviderAdapter, ProviderResponse, TurnPrompt};
use crate::render;
use crate::webhook::{normalize, transcript_text, FieldNames, WebhookFields};

const FIELDS: FieldNames = FieldNames {
    call_id: &["conversation_id", "data.conversation_id"],
    status: &["status", "data.status"],
    speech: &[],
    dtmf: &[],
    delivery: &[],
    recording_url: &["recording_url"],
    duration: &[
        "call_duration_secs",
        "metadata.call_duration_secs",
        "data.metadata.call_duration_secs",
    ],
    transcript: &["transcript", "data.transcript"],
    summary: &[
        "analysis.summary",
        "analysis.transcript_summary",
        "data.analysis.transcript_summary",
    ],
};

/// ElevenLabs Conversational AI outbound calls. The agent persona can be
/// overridden per call; results arrive by webhook or the conversations API.
pub struct ElevenLabsAdapter {
    settings: ElevenLabsSettings,
    client: Client,
    base_url: String,
    country_code: String,
}

impl ElevenLabsAdapter {
    pub fn new(settings: ElevenLabsSettings, client: Client, country_code: impl Into<String>) -> Self {
        Self {
            settings,
            client,
            base_url: "https://api.elevenlabs.io/v1".to_string(),
            country_code: country_code.into(),
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }
}

#[async_trait]
impl ProviderAdapter for ElevenLabsAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::ElevenLabs
    }

    fn flow(&self) -> CallFlow {
        CallFlow::Hosted
    }

    async fn initiate(&self, request: &DialRequest) -> Result<String, CallError> {
        let phone_number = format_e164(&request.to, &self.country_code);

        let mut variables: Map<String, Value> = request
            .metadata
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect();
        let language = request
            .script
            .as_ref()
            .map(|s| s.language.clone())
            .unwrap_or_else(|| "en".to_string());
        variables.insert("language".into(), Value::String(language));

        let mut payload = json!({
            "agent_id": self.settings.agent_id,
            "phone_number": phone_number,
            "dynamic_variables": variables,
            "webhook_url": request.webhook_url,
        });
        if let Some(script) = &request.script {
            if !script.first_message.is_empty() {
                payload["first_message"] = json!(script.first_message);
            }
            if !script.system_prompt.is_empty() {
                payload["agent_config_override"] = json!({
                    "prompt": { "prompt": script.system_prompt }
                });
            }
        }

        info!("[Telephony/ElevenLabs] Starting conversation with agent {}", self.settings.agent_id);

        let response = self
            .client
            .post(format!("{}/convai/conversation/phone-call", self.base_url))
            .header("xi-api-key", &self.settings.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| transport_error(self.kind(), e))?;

        let body = json_body(self.kind(), response).await?;
        require_call_id(self.kind(), &body, &["conversation_id", "callSid"])
    }

    fn parse_webhook(
        &self,
        body: &[u8],
        content_type: Option<&str>,
    ) -> Result<NormalizedEvent, CallError> {
        let fields = WebhookFields::parse(body, content_type)?;
        normalize(self.kind(), &fields, &FIELDS)
    }

    fn render_turn(&self, _turn: &TurnPrompt) -> ProviderResponse {
        render::ack()
    }

    async fn fetch_status(&self, provider_call_id: &str) -> Result<ProviderCallDetails, CallError> {
        let response = self
            .client
            .get(format!("{}/convai/conversations/{}", self.base_url, provider_call_id))
            .header("xi-api-key", &self.settings.api_key)
            .send()
            .await
            .map_err(|e| transport_error(self.kind(), e))?;

        if response.status() == StatusCode::NOT_FOUND {
            debug!(conversation_id = %provider_call_id, "ElevenLabs has no record of conversation");
            return Ok(ProviderCallDetails::unknown(self.kind(), provider_call_id));
        }

        let body = json_body(self.kind(), response).await?;
        let Some(raw) = pick_str(&body, &["status"]) else {
            return Ok(ProviderCallDetails::unknown(self.kind(), provider_call_id));
        };

        let mut details = ProviderCallDetails::known(
            self.kind(),
            provider_call_id,
            CallStatus::from_provider_or_failed(&raw),
        );
        details.raw_status = Some(raw);
        details.duration_seconds = pick_str(&body, &["metadata.call_duration_secs", "call_duration_secs"])
            .and_then(|d| d.parse::<f64>().ok())
            .map(|d| d.round() as u64);
        details.transcript = body.get("transcript").and_then(transcript_text);
        details.summary = pick_str(&body, &["analysis.transcript_summary", "analysis.summary"]);
        Ok(details)
    }
}
