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
    status: &["status", "call_status"],
    speech: &["speech_result", "transcription"],
    dtmf: &["dtmf"],
    delivery: &["event_id", "timestamp"],
    recording_url: &["recording_url"],
    duration: &["duration"],
    transcript: &[],
    summary: &[],
};

/// Ozonetel outbound API. Bearer secret plus `X-API-KEY`, JSON action responses.
pub struct OzonetelAdapter {
    settings: CredentialSettings,
    client: Client,
    base_url: String,
    country_code: String,
}

impl OzonetelAdapter {
    pub fn new(settings: CredentialSettings, client: Client, country_code: impl Into<String>) -> Self {
        Self {
            settings,
            client,
            base_url: "https://ozonetel.com/api/v1".to_string(),
            country_code: country_code.into(),
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }
}

#[async_trait]
impl ProviderAdapter for OzonetelAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Ozonetel
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

        info!("[Telephony/Ozonetel] Dialing");

        let response = self
            .client
            .post(format!("{}/call", self.base_url))
            .bearer_auth(&self.settings.api_token)
            .header("X-API-KEY", &self.settings.api_key)
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
        require_call_id(self.kind(), &body, &["call_id", "id", "ucid"])
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

#[cfg(test)]
mod tests {
    use super::*;
    use callforge_core::CallStatus;
    use mockito::Matcher;

    fn adapter(base_url: &str) -> OzonetelAdapter {
        OzonetelAdapter::new(
            CredentialSettings {
                api_key: "oz-key".into(),
                api_token: "oz-secret".into(),
                phone_number: "+918000000002".into(),
            },
            Client::new(),
            "+91",
        )
        .with_base_url(base_url)
    }

    #[tokio::test]
    async fn initiate_sends_both_credentials() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/call")
            .match_header("authorization", "Bearer oz-secret")
            .match_header("x-api-key", "oz-key")
            .match_body(Matcher::PartialJson(json!({"to": "+919876543210"})))
            .with_status(200)
            .with_body(r#"{"call_id":"oz-1"}"#)
            .create_async()
            .await;

        let request = DialRequest {
            to: "9876543210".into(),
            from: None,
            webhook_url: "https://calls.example.com/webhooks/ozonetel".into(),
            metadata: Default::default(),
            script: None,
        };
        assert_eq!(adapter(&server.url()).initiate(&request).await.unwrap(), "oz-1");
        mock.assert_async().await;
    }

    #[test]
    fn parses_busy_event() {
        let event = adapter("http://unused")
            .parse_webhook(br#"{"call_id":"oz-1","status":"busy"}"#, None)
            .unwrap();
        assert_eq!(event.status, CallStatus::Busy);
    }
}
