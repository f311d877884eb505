use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use tracing::{debug, info};

use callforge_core::{CallError, CallStatus, NormalizedEvent, ProviderCallDetails, ProviderKind};

use crate::config::BlandSettings;
use crate::http::{json_body, pick_str, require_call_id, transport_error};
use crate::phone::format_e164;
use crate::provider::{CallFlow, DialRequest, ProviderAdapter, ProviderResponse, TurnPrompt};
use crate::render;
use crate::webhook::{normalize, transcript_text, FieldNames, WebhookFields};

const FIELDS: FieldNames = FieldNames {
    call_id: &["call_id", "c_id", "id"],
    status: &["status", "queue_status"],
    speech: &[],
    dtmf: &[],
    delivery: &[],
    recording_url: &["recording_url"],
    duration: &["duration_seconds", "duration"],
    transcript: &["transcripts", "concatenated_transcript", "transcript"],
    summary: &["summary", "analysis.summary"],
};

/// Bland AI hosted voice agent. Bland runs the conversation and reports the
/// transcript and summary when the call ends.
pub struct BlandAdapter {
    settings: BlandSettings,
    client: Client,
    base_url: String,
    country_code: String,
}

impl BlandAdapter {
    pub fn new(settings: BlandSettings, client: Client, country_code: impl Into<String>) -> Self {
        Self {
            settings,
            client,
            base_url: "https://api.bland.ai/v1".to_string(),
            country_code: country_code.into(),
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }
}

/// `call_length` is reported in minutes.
fn length_seconds(call_length: Option<&Value>) -> Option<u64> {
    call_length
        .and_then(Value::as_f64)
        .filter(|m| *m >= 0.0)
        .map(|m| (m * 60.0).round() as u64)
}

#[async_trait]
impl ProviderAdapter for BlandAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Bland
    }

    fn flow(&self) -> CallFlow {
        CallFlow::Hosted
    }

    async fn initiate(&self, request: &DialRequest) -> Result<String, CallError> {
        let phone_number = format_e164(&request.to, &self.country_code);
        let (task, first_sentence, language) = match &request.script {
            Some(script) => (
                script.system_prompt.as_str(),
                Some(script.first_message.as_str()),
                script.language.as_str(),
            ),
            None => ("", None, "en"),
        };

        let mut payload = json!({
            "phone_number": phone_number,
            "task": task,
            "model": "enhanced",
            "language": language,
            "voice": "nat",
            "record": true,
            "transcribe": true,
            "summary": true,
            "analysis_schema": {
                "summary": "Summarize the call in 2-3 sentences.",
                "user_answers": "Extract the user's answers to the questions asked.",
            },
            "metadata": request.metadata,
        });
        if let Some(first) = first_sentence.filter(|s| !s.is_empty()) {
            payload["first_sentence"] = json!(first);
        }
        // Bland rejects plain-http webhooks.
        if request.webhook_url.starts_with("https://") {
            payload["webhook"] = json!(request.webhook_url);
        }

        info!("[Telephony/Bland] Starting hosted call");

        let response = self
            .client
            .post(format!("{}/calls", self.base_url))
            .header("Authorization", &self.settings.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| transport_error(self.kind(), e))?;

        let body = json_body(self.kind(), response).await?;
        require_call_id(self.kind(), &body, &["call_id"])
    }

    fn parse_webhook(
        &self,
        body: &[u8],
        content_type: Option<&str>,
    ) -> Result<NormalizedEvent, CallError> {
        let fields = WebhookFields::parse(body, content_type)?;
        let mut event = normalize(self.kind(), &fields, &FIELDS)?;

        let completed = match fields.get("completed") {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
            _ => false,
        };
        if completed {
            event.status = CallStatus::Completed;
            event.raw_status.get_or_insert_with(|| "completed".to_string());
        }
        if let Some(seconds) = length_seconds(fields.get("call_length")) {
            event.duration_seconds = Some(seconds);
        }
        Ok(event)
    }

    fn render_turn(&self, _turn: &TurnPrompt) -> ProviderResponse {
        render::ack()
    }

    async fn fetch_status(&self, provider_call_id: &str) -> Result<ProviderCallDetails, CallError> {
        let response = self
            .client
            .get(format!("{}/calls/{}", self.base_url, provider_call_id))
            .header("Authorization", &self.settings.api_key)
            .send()
            .await
            .map_err(|e| transport_error(self.kind(), e))?;

        if response.status() == StatusCode::NOT_FOUND {
            debug!(call_id = %provider_call_id, "Bland has no record of call");
            return Ok(ProviderCallDetails::unknown(self.kind(), provider_call_id));
        }

        let body = json_body(self.kind(), response).await?;
        let completed = body.get("completed").and_then(Value::as_bool) == Some(true);
        let raw = pick_str(&body, &["status", "queue_status"]);
        let status = match (&raw, completed) {
            (_, true) => CallStatus::Completed,
            (Some(raw), false) => CallStatus::from_provider_or_failed(raw),
            (None, false) => return Ok(ProviderCallDetails::unknown(self.kind(), provider_call_id)),
        };

        let mut details = ProviderCallDetails::known(self.kind(), provider_call_id, status);
        details.raw_status = raw;
        details.duration_seconds = length_seconds(body.get("call_length")).or_else(|| {
            body.get("duration_seconds")
                .and_then(Value::as_f64)
                .map(|d| d.round() as u64)
        });
        details.recording_url = pick_str(&body, &["recording_url"]);
        details.transcript = ["transcripts", "concatenated_transcript"]
            .iter()
            .find_map(|k| body.get(*k).and_then(transcript_text));
        details.summary = pick_str(&body, &["summary", "analysis.summary"]);
        Ok(details)
    }

    async fn hangup(&self, provider_call_id: &str) -> Result<(), CallError> {
        let response = self
            .client
            .post(format!("{}/calls/{}/stop", self.base_url, provider_call_id))
            .header("Authorization", &self.settings.api_key)
            .send()
            .await
            .map_err(|e| transport_error(self.kind(), e))?;
        json_body(self.kind(), response).await?;
        info!(call_id = %provider_call_id, "[Telephony/Bland] Call stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::CallScript;
    use callforge_core::RemoteStatus;
    use mockito::Matcher;

    fn adapter(base_url: &str) -> BlandAdapter {
        BlandAdapter::new(BlandSettings { api_key: "bl-key".into() }, Client::new(), "+91")
            .with_base_url(base_url)
    }

    fn dial(webhook_url: &str) -> DialRequest {
        DialRequest {
            to: "9876543210".into(),
            from: None,
            webhook_url: webhook_url.into(),
            metadata: Default::default(),
            script: Some(CallScript {
                system_prompt: "You are a fleet dispatcher.".into(),
                first_message: "Namaste!".into(),
                language: "hi".into(),
            }),
        }
    }

    #[tokio::test]
    async fn initiate_hands_over_the_script() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/calls")
            .match_header("authorization", "bl-key")
            .match_body(Matcher::PartialJson(json!({
                "phone_number": "+919876543210",
                "task": "You are a fleet dispatcher.",
                "first_sentence": "Namaste!",
                "webhook": "https://calls.example.com/webhooks/bland",
            })))
            .with_status(200)
            .with_body(r#"{"status":"success","call_id":"bl-1"}"#)
            .create_async()
            .await;

        let id = adapter(&server.url())
            .initiate(&dial("https://calls.example.com/webhooks/bland"))
            .await
            .unwrap();
        assert_eq!(id, "bl-1");
        mock.assert_async().await;
    }

    #[test]
    fn completion_webhook_carries_transcript_and_minutes() {
        let event = adapter("http://unused")
            .parse_webhook(
                br#"{
                    "call_id": "bl-1",
                    "completed": true,
                    "call_length": 0.7,
                    "summary": "Driver is near Nagpur.",
                    "transcripts": [
                        {"user": "assistant", "text": "Aap kahan hain?"},
                        {"user": "user", "text": "Nagpur ke paas"}
                    ]
                }"#,
                Some("application/json"),
            )
            .unwrap();
        assert_eq!(event.status, CallStatus::Completed);
        assert_eq!(event.duration_seconds, Some(42));
        assert_eq!(
            event.transcript.as_deref(),
            Some("Agent: Aap kahan hain?\nUser: Nagpur ke paas")
        );
        assert_eq!(event.summary.as_deref(), Some("Driver is near Nagpur."));
    }

    #[tokio::test]
    async fn hangup_stops_the_call() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/calls/bl-1/stop")
            .match_header("authorization", "bl-key")
            .with_status(200)
            .with_body(r#"{"status":"success","message":"Call ended successfully."}"#)
            .create_async()
            .await;
        adapter(&server.url()).hangup("bl-1").await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn fetch_status_reads_completed_flag() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/calls/bl-1")
            .with_status(200)
            .with_body(r#"{"call_id":"bl-1","completed":true,"status":"completed","call_length":1.5,"concatenated_transcript":"hello"}"#)
            .create_async()
            .await;
        let details = adapter(&server.url()).fetch_status("bl-1").await.unwrap();
        assert_eq!(details.status, RemoteStatus::Known(CallStatus::Completed));
        assert_eq!(details.duration_seconds, Some(90));
        assert_eq!(details.transcript.as_deref(), Some("hello"));
    }
}
