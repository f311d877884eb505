use async_trait::async_trait;
use chrono::DateTime;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use tracing::{debug, info};

use callforge_core::{CallError, CallStatus, NormalizedEvent, ProviderCallDetails, ProviderKind};

use crate::config::VapiSettings;
use crate::http::{json_body, pick_str, require_call_id, transport_error};
use crate::phone::format_e164;
use crate::provider::{CallFlow, DialRequest, ProviderAdapter, ProviderResponse, TurnPrompt};
use crate::render;
use crate::webhook::{normalize, transcript_text, FieldNames, WebhookFields};

// Vapi wraps every server message in `message`; status is derived from its type.
const FIELDS: FieldNames = FieldNames {
    call_id: &["message.call.id", "call.id", "id"],
    status: &[],
    speech: &[],
    dtmf: &[],
    delivery: &[],
    recording_url: &["message.recordingUrl", "message.artifact.recordingUrl"],
    duration: &["message.durationSeconds"],
    transcript: &["message.transcript", "message.artifact.transcript", "message.artifact.messages"],
    summary: &["message.summary", "message.analysis.summary"],
};

/// Vapi hosted voice assistant. The assistant is defined inline per call and
/// reports back through `status-update` and `end-of-call-report` messages.
pub struct VapiAdapter {
    settings: VapiSettings,
    client: Client,
    base_url: String,
    country_code: String,
}

impl VapiAdapter {
    pub fn new(settings: VapiSettings, client: Client, country_code: impl Into<String>) -> Self {
        Self {
            settings,
            client,
            base_url: "https://api.vapi.ai".to_string(),
            country_code: country_code.into(),
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }
}

/// Final status of an ended call. Unanswered and busy calls carry an
/// `endedReason` saying so; every other ending counts as completed.
fn ended_status(ended_reason: Option<&str>) -> CallStatus {
    match ended_reason.and_then(CallStatus::from_provider) {
        Some(status @ (CallStatus::NoAnswer | CallStatus::Busy | CallStatus::Failed)) => status,
        _ => CallStatus::Completed,
    }
}

fn elapsed_seconds(started_at: Option<&str>, ended_at: Option<&str>) -> Option<u64> {
    let started = DateTime::parse_from_rfc3339(started_at?).ok()?;
    let ended = DateTime::parse_from_rfc3339(ended_at?).ok()?;
    u64::try_from((ended - started).num_seconds()).ok()
}

#[async_trait]
impl ProviderAdapter for VapiAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Vapi
    }

    fn flow(&self) -> CallFlow {
        CallFlow::Hosted
    }

    async fn initiate(&self, request: &DialRequest) -> Result<String, CallError> {
        let number = format_e164(&request.to, &self.country_code);
        let (system_prompt, first_message, language) = match &request.script {
            Some(script) => (
                script.system_prompt.as_str(),
                script.first_message.as_str(),
                script.language.as_str(),
            ),
            None => ("", "", "en"),
        };

        let mut customer = json!({ "number": number });
        if let Some(name) = request.metadata.get("driver_name") {
            customer["name"] = json!(name);
        }

        let mut assistant = json!({
            "model": {
                "provider": "openai",
                "model": "gpt-4",
                "messages": [{ "role": "system", "content": system_prompt }],
            },
            "voice": { "provider": "11labs", "voiceId": "sarah" },
            "transcriber": { "provider": "deepgram", "model": "nova-2", "language": language },
            "serverUrl": request.webhook_url,
            "serverMessages": ["status-update", "end-of-call-report"],
            "metadata": request.metadata,
        });
        if !first_message.is_empty() {
            assistant["firstMessage"] = json!(first_message);
        }

        let payload = json!({
            "phoneNumberId": self.settings.phone_number_id,
            "customer": customer,
            "assistant": assistant,
        });

        info!("[Telephony/Vapi] Starting assistant call");

        let response = self
            .client
            .post(format!("{}/call", self.base_url))
            .bearer_auth(&self.settings.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| transport_error(self.kind(), e))?;

        let body = json_body(self.kind(), response).await?;
        require_call_id(self.kind(), &body, &["id"])
    }

    fn parse_webhook(
        &self,
        body: &[u8],
        content_type: Option<&str>,
    ) -> Result<NormalizedEvent, CallError> {
        let fields = WebhookFields::parse(body, content_type)?;
        let mut event = normalize(self.kind(), &fields, &FIELDS)?;

        let kind = fields.first_str(&["message.type", "type"]);
        match kind.as_deref() {
            Some("end-of-call-report") => {
                let reason = fields.first_str(&["message.endedReason", "message.call.endedReason"]);
                event.status = ended_status(reason.as_deref());
                event.raw_status = reason.or_else(|| Some("end-of-call-report".to_string()));
            }
            Some("status-update") => {
                if let Some(raw) = fields.first_str(&["message.status"]) {
                    event.status = match raw.as_str() {
                        "ended" => ended_status(fields.first_str(&["message.endedReason"]).as_deref()),
                        other => CallStatus::from_provider(other).unwrap_or(CallStatus::InProgress),
                    };
                    event.raw_status = Some(raw);
                }
            }
            other => {
                debug!(message_type = ?other, call_id = %event.provider_call_id, "Vapi message carries no status");
            }
        }
        Ok(event)
    }

    fn render_turn(&self, _turn: &TurnPrompt) -> ProviderResponse {
        render::ack()
    }

    async fn fetch_status(&self, provider_call_id: &str) -> Result<ProviderCallDetails, CallError> {
        let response = self
            .client
            .get(format!("{}/call/{}", self.base_url, provider_call_id))
            .bearer_auth(&self.settings.api_key)
            .send()
            .await
            .map_err(|e| transport_error(self.kind(), e))?;

        if response.status() == StatusCode::NOT_FOUND {
            debug!(call_id = %provider_call_id, "Vapi has no record of call");
            return Ok(ProviderCallDetails::unknown(self.kind(), provider_call_id));
        }

        let body = json_body(self.kind(), response).await?;
        let Some(raw) = pick_str(&body, &["status"]) else {
            return Ok(ProviderCallDetails::unknown(self.kind(), provider_call_id));
        };
        let status = match raw.as_str() {
            "ended" => ended_status(pick_str(&body, &["endedReason"]).as_deref()),
            other => CallStatus::from_provider(other).unwrap_or(CallStatus::InProgress),
        };

        let mut details = ProviderCallDetails::known(self.kind(), provider_call_id, status);
        details.raw_status = Some(raw);
        details.duration_seconds = elapsed_seconds(
            body.get("startedAt").and_then(Value::as_str),
            body.get("endedAt").and_then(Value::as_str),
        );
        details.recording_url = pick_str(&body, &["recordingUrl", "artifact.recordingUrl"]);
        details.transcript = ["transcript", "artifact.transcript", "artifact.messages"]
            .iter()
            .find_map(|path| {
                path.split('.')
                    .try_fold(&body, |value, part| value.get(part))
                    .and_then(transcript_text)
            });
        details.summary = pick_str(&body, &["summary", "analysis.summary"]);
        Ok(details)
    }

    async fn hangup(&self, provider_call_id: &str) -> Result<(), CallError> {
        let response = self
            .client
            .delete(format!("{}/call/{}", self.base_url, provider_call_id))
            .bearer_auth(&self.settings.api_key)
            .send()
            .await
            .map_err(|e| transport_error(self.kind(), e))?;
        json_body(self.kind(), response).await?;
        info!(call_id = %provider_call_id, "[Telephony/Vapi] Call ended on request");
        Ok(())
    }
}
