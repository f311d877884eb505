use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde_json::{json, Map, Value};
use tracing::{debug, info};

use callforge_core::{CallError, CallStatus, NormalizedEvent, ProviderCallDetails, ProviderKind};

use crate::config::BolnaSettings;
use crate::http::{json_body, pick_str, require_call_id, transport_error};
use crate::phone::format_e164;
use crate::provider::{CallFlow, CallScript, DialRequest, ProviderAdapter, ProviderResponse, TurnPrompt};
use crate::render;
use crate::webhook::{normalize, transcript_text, FieldNames, WebhookFields};

const FIELDS: FieldNames = FieldNames {
    call_id: &["call_id", "id", "execution_id"],
    status: &["status"],
    speech: &[],
    dtmf: &[],
    delivery: &[],
    recording_url: &["recording_url", "telephony_data.recording_url"],
    duration: &["duration_seconds", "call_duration", "conversation_duration"],
    transcript: &["transcript"],
    summary: &["summary"],
};

/// Self-hosted Bolna voice-agent server.
///
/// Without a configured agent id a fresh agent is created for every call from
/// the call script.
pub struct BolnaAdapter {
    settings: BolnaSettings,
    client: Client,
    country_code: String,
}

impl BolnaAdapter {
    pub fn new(settings: BolnaSettings, client: Client, country_code: impl Into<String>) -> Self {
        Self {
            settings,
            client,
            country_code: country_code.into(),
        }
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.settings.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    async fn create_agent(&self, script: Option<&CallScript>) -> Result<String, CallError> {
        let (prompt, welcome, language) = match script {
            Some(s) => (s.system_prompt.as_str(), s.first_message.as_str(), s.language.as_str()),
            None => ("", "", "hi"),
        };
        let payload = json!({
            "agent_config": {
                "agent_name": "callforge",
                "agent_type": "other",
                "agent_welcome_message": welcome,
            },
            "agent_prompts": { "task_1": { "system_prompt": prompt } },
            "tasks": [{
                "task_type": "conversation",
                "toolchain": {
                    "execution": "parallel",
                    "pipelines": [["transcriber", "llm", "synthesizer"]],
                },
                "tools_config": {
                    "transcriber": { "language": language, "stream": true },
                },
                "task_config": { "hangup_after_silence": 10 },
            }],
        });

        let response = self
            .authorized(self.client.post(format!("{}/agent", self.settings.server_url)))
            .json(&payload)
            .send()
            .await
            .map_err(|e| transport_error(self.kind(), e))?;
        let body = json_body(self.kind(), response).await?;
        require_call_id(self.kind(), &body, &["agent_id"])
    }
}

#[async_trait]
impl ProviderAdapter for BolnaAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Bolna
    }

    fn flow(&self) -> CallFlow {
        CallFlow::Hosted
    }

    async fn initiate(&self, request: &DialRequest) -> Result<String, CallError> {
        let agent_id = match &self.settings.agent_id {
            Some(id) => id.clone(),
            None => self.create_agent(request.script.as_ref()).await?,
        };

        let mut user_data: Map<String, Value> = request
            .metadata
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect();
        if let Some(script) = &request.script {
            user_data.insert("system_prompt".into(), Value::String(script.system_prompt.clone()));
        }

        info!("[Telephony/Bolna] Starting call with agent {}", agent_id);

        let response = self
            .authorized(self.client.post(format!("{}/call", self.settings.server_url)))
            .json(&json!({
                "agent_id": agent_id,
                "recipient_phone_number": format_e164(&request.to, &self.country_code),
                "user_data": user_data,
            }))
            .send()
            .await
            .map_err(|e| transport_error(self.kind(), e))?;

        let body = json_body(self.kind(), response).await?;
        require_call_id(self.kind(), &body, &["call_id", "id", "execution_id"])
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
            .authorized(
                self.client
                    .get(format!("{}/call/{}", self.settings.server_url, provider_call_id)),
            )
            .send()
            .await
            .map_err(|e| transport_error(self.kind(), e))?;

        if response.status() == StatusCode::NOT_FOUND {
            debug!(call_id = %provider_call_id, "Bolna has no record of call");
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
        details.duration_seconds = pick_str(&body, &["duration_seconds", "call_duration"])
            .and_then(|d| d.parse::<f64>().ok())
            .map(|d| d.round() as u64);
        details.recording_url = pick_str(&body, &["recording_url"]);
        details.transcript = body.get("transcript").and_then(transcript_text);
        details.summary = pick_str(&body, &["summary"]);
        Ok(details)
    }
}
