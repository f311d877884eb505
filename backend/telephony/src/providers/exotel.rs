use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::json;
use tracing::{debug, info};

use callforge_core::{
    CallError, CallStatus, NormalizedEvent, ProviderCallDetails, ProviderKind,
};

use crate::config::ExotelSettings;
use crate::http::{json_body, pick_str, require_call_id, transport_error};
use crate::phone::format_e164;
use crate::provider::{CallFlow, DialRequest, ProviderAdapter, ProviderResponse, TurnPrompt};
use crate::render;
use crate::webhook::{normalize, FieldNames, WebhookFields};

const FIELDS: FieldNames = FieldNames {
    call_id: &["CallSid", "call_id", "Sid"],
    status: &["CallStatus", "status", "CallState"],
    speech: &["SpeechResult", "speech_result", "transcription"],
    dtmf: &["Digits", "dtmf"],
    delivery: &["EventId", "CurrentTime"],
    recording_url: &["RecordingUrl", "recording_url"],
    duration: &["RecordingDuration", "duration", "DialCallDuration"],
    transcript: &[],
    summary: &[],
};

/// Maximum call length requested from Exotel, in seconds.
const TIME_LIMIT_SECS: u32 = 300;

/// Exotel connect API. Markup responses, basic auth.
pub struct ExotelAdapter {
    settings: ExotelSettings,
    client: Client,
    base_url: String,
    country_code: String,
}

impl ExotelAdapter {
    pub fn new(settings: ExotelSettings, client: Client, country_code: impl Into<String>) -> Self {
        let base_url = format!("https://{}.exotel.com", settings.subdomain);
        Self {
            settings,
            client,
            base_url,
            country_code: country_code.into(),
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    fn calls_url(&self) -> String {
        format!("{}/v1/Accounts/{}/Calls", self.base_url, self.settings.api_key)
    }
}

#[async_trait]
impl ProviderAdapter for ExotelAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Exotel
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

        info!("[Telephony/Exotel] Dialing via {}", self.settings.subdomain);

        let response = self
            .client
            .post(format!("{}/connect.json", self.calls_url()))
            .basic_auth(&self.settings.api_key, Some(&self.settings.api_token))
            .json(&json!({
                "From": to,
                "CallerId": from,
                "Url": request.webhook_url,
                "TimeLimit": TIME_LIMIT_SECS,
                "StatusCallback": request.webhook_url,
                "Record": true,
                "RecordCallback": request.webhook_url,
                "CustomField": serde_json::to_string(&request.metadata).unwrap_or_default(),
            }))
            .send()
            .await
            .map_err(|e| transport_error(self.kind(), e))?;

        let body = json_body(self.kind(), response).await?;
        require_call_id(self.kind(), &body, &["Call.Sid", "Sid", "call_id"])
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
            .get(format!("{}/{}.json", self.calls_url(), provider_call_id))
            .basic_auth(&self.settings.api_key, Some(&self.settings.api_token))
            .send()
            .await
            .map_err(|e| transport_error(self.kind(), e))?;

        if response.status() == StatusCode::NOT_FOUND {
            debug!(call_sid = %provider_call_id, "Exotel has no record of call");
            return Ok(ProviderCallDetails::unknown(self.kind(), provider_call_id));
        }

        let body = json_body(self.kind(), response).await?;
        let Some(raw) = pick_str(&body, &["Call.Status", "Status"]) else {
            return Ok(ProviderCallDetails::unknown(self.kind(), provider_call_id));
        };

        let mut details = ProviderCallDetails::known(
            self.kind(),
            provider_call_id,
            CallStatus::from_provider_or_failed(&raw),
        );
        details.raw_status = Some(raw);
        details.duration_seconds = pick_str(&body, &["Call.Duration", "Duration"])
            .and_then(|d| d.parse::<f64>().ok())
            .map(|d| d.round() as u64);
        details.recording_url = pick_str(&body, &["Call.RecordingUrl", "RecordingUrl"]);
        Ok(details)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn adapter(base_url: &str) -> ExotelAdapter {
        ExotelAdapter::new(
            ExotelSettings {
                api_key: "acct".into(),
                api_token: "secret".into(),
                phone_number: "08047112233".into(),
                subdomain: "api".into(),
            },
            Client::new(),
            "+91",
        )
        .with_base_url(base_url)
    }

    fn dial(to: &str) -> DialRequest {
        DialRequest {
            to: to.into(),
            from: None,
            webhook_url: "https://calls.example.com/webhooks/exotel".into(),
            metadata: Default::default(),
            script: None,
        }
    }

    #[tokio::test]
    async fn initiate_formats_number_and_reads_nested_sid() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/Accounts/acct/Calls/connect.json")
            .match_header("authorization", Matcher::Regex("^Basic ".into()))
            .match_body(Matcher::PartialJson(json!({
                "From": "+919876543210",
                "CallerId": "+918047112233",
                "TimeLimit": 300,
            })))
            .with_status(200)
            .with_body(r#"{"Call":{"Sid":"exo-123","Status":"queued"}}"#)
            .create_async()
            .await;

        let sid = adapter(&server.url()).initiate(&dial("9876543210")).await.unwrap();
        assert_eq!(sid, "exo-123");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn server_error_is_retryable_and_auth_error_is_not() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v1/Accounts/acct/Calls/connect.json")
            .with_status(503)
            .with_body("try later")
            .create_async()
            .await;
        let err = adapter(&server.url()).initiate(&dial("9876543210")).await.unwrap_err();
        assert!(err.is_retryable());

        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v1/Accounts/acct/Calls/connect.json")
            .with_status(401)
            .with_body(r#"{"message":"Authentication failed"}"#)
            .create_async()
            .await;
        let err = adapter(&server.url()).initiate(&dial("9876543210")).await.unwrap_err();
        assert!(!err.is_retryable());
        assert!(err.category().is_fatal());
    }

    #[test]
    fn parses_form_encoded_status_callback() {
        let event = adapter("http://unused")
            .parse_webhook(
                b"CallSid=exo-123&CallStatus=completed&RecordingUrl=https%3A%2F%2Frec%2F1.mp3&duration=42",
                Some("application/x-www-form-urlencoded"),
            )
            .unwrap();
        assert_eq!(event.provider_call_id, "exo-123");
        assert_eq!(event.status, CallStatus::Completed);
        assert_eq!(event.recording_url.as_deref(), Some("https://rec/1.mp3"));
        assert_eq!(event.duration_seconds, Some(42));
    }

    #[tokio::test]
    async fn missing_call_reports_unknown() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/v1/Accounts/acct/Calls/gone.json")
            .with_status(404)
            .create_async()
            .await;
        let details = adapter(&server.url()).fetch_status("gone").await.unwrap();
        assert_eq!(details.status, callforge_core::RemoteStatus::Unknown);
    }
}
