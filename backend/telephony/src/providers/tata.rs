use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use tracing::{debug, info};

use callforge_core::{CallError, NormalizedEvent, ProviderKind};

use crate::auth::TokenCache;
use crate::config::TataSettings;
use crate::http::{json_body, pick_str, transport_error};
use crate::phone::format_e164;
use crate::provider::{CallFlow, DialRequest, ProviderAdapter, ProviderResponse, TurnPrompt};
use crate::render;
use crate::webhook::{normalize, FieldNames, WebhookFields};

const FIELDS: FieldNames = FieldNames {
    // The reference sent as `custom_identifier` is echoed on every event and is the join key.
    call_id: &["custom_identifier", "call_id", "id", "call_uuid", "callSid"],
    status: &["call_status", "status", "state", "event_type"],
    speech: &["speech_result", "transcription", "user_input", "text"],
    dtmf: &["dtmf", "digits", "input"],
    delivery: &["event_id", "timestamp", "time"],
    recording_url: &["recording_url", "recording", "media_url"],
    duration: &["duration", "call_duration", "total_duration"],
    transcript: &[],
    summary: &[],
};

/// Refresh access tokens this long before they expire.
const TOKEN_SKEW: Duration = Duration::from_secs(60);

/// Tata Tele Business Services Smartflo click-to-call.
///
/// Smartflo rings the agent number first and bridges the destination.
/// Access tokens come from the login endpoint when one is configured and are
/// cached until shortly before expiry.
pub struct TataAdapter {
    settings: TataSettings,
    client: Client,
    base_url: String,
    country_code: String,
    tokens: TokenCache,
}

impl TataAdapter {
    pub fn new(settings: TataSettings, client: Client, country_code: impl Into<String>) -> Self {
        let tokens = match settings.auth_url {
            Some(_) => TokenCache::new(TOKEN_SKEW),
            None => TokenCache::with_static(settings.api_token.clone()),
        };
        Self {
            settings,
            client,
            base_url: "https://api-smartflo.tatateleservices.com/v1".to_string(),
            country_code: country_code.into(),
            tokens,
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    async fn access_token(&self) -> Result<String, CallError> {
        let Some(auth_url) = self.settings.auth_url.as_deref() else {
            return Ok(self.settings.api_token.clone());
        };
        self.tokens
            .get_or_refresh(|| async move {
                let response = self
                    .client
                    .post(auth_url)
                    .json(&json!({
                        "email": self.settings.api_key,
                        "password": self.settings.api_token,
                    }))
                    .send()
                    .await
                    .map_err(|e| transport_error(self.kind(), e))?;
                let body = json_body(self.kind(), response).await?;
                let token = pick_str(&body, &["access_token", "token"]).ok_or_else(|| {
                    CallError::provider(self.kind().as_str(), "login response did not include a token", Some(401))
                })?;
                let ttl = body
                    .get("expires_in")
                    .and_then(Value::as_u64)
                    .map(Duration::from_secs);
                Ok((token, ttl))
            })
            .await
    }
}

fn unix_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default()
}

/// Our own reference for a click-to-call, `{agent}_{destination}_{millis}`.
fn call_reference(agent: &str, destination: &str) -> String {
    format!(
        "{}_{}_{}",
        agent.trim_start_matches('+'),
        destination.trim_start_matches('+'),
        unix_millis()
    )
}

#[async_trait]
impl ProviderAdapter for TataAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Tata
    }

    fn flow(&self) -> CallFlow {
        CallFlow::SelfHosted
    }

    async fn initiate(&self, request: &DialRequest) -> Result<String, CallError> {
        let agent_number = self.settings.agent_number.as_deref().ok_or_else(|| {
            CallError::Configuration("TATA_AGENT_NUMBER is required for click-to-call".into())
        })?;
        let agent = format_e164(agent_number, &self.country_code);
        let destination = format_e164(&request.to, &self.country_code);
        let caller_id = format_e164(
            request.from.as_deref().unwrap_or(&self.settings.phone_number),
            &self.country_code,
        );

        let reference = call_reference(&agent, &destination);
        let mut payload = json!({
            "agent_number": agent,
            "destination_number": destination,
            "async": 1,
            "caller_id": caller_id,
            "custom_identifier": reference,
        });
        if let Some(timeout) = self.settings.call_timeout {
            payload["call_timeout"] = json!(timeout);
        }

        info!("[Telephony/Tata] Dialing via agent leg");

        let token = self.access_token().await?;
        let response = self
            .client
            .post(format!("{}/click_to_call", self.base_url))
            .bearer_auth(&token)
            .header("X-API-KEY", &self.settings.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| transport_error(self.kind(), e))?;

        if response.status() == StatusCode::UNAUTHORIZED {
            self.tokens.invalidate();
        }
        let body = json_body(self.kind(), response).await?;

        if body.get("success").and_then(Value::as_bool) == Some(false) {
            let message = pick_str(&body, &["message", "error"])
                .unwrap_or_else(|| "request rejected".to_string());
            return Err(CallError::provider(
                self.kind().as_str(),
                format!("tata click-to-call failed: {message}"),
                None,
            ));
        }

        if let Some(id) = pick_str(&body, &["call_id", "id", "call_uuid", "data.call_id", "data.id"]) {
            debug!(smartflo_id = %id, call_ref = %reference, "Smartflo accepted click-to-call");
        }
        Ok(reference)
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
