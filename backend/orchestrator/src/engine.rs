use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, warn};

use callforge_core::{
    format_transcript, CallError, CallHandle, CallOrchestrator, CallRecord, CallRequest,
    CallSessionStore, CallStatus, CallUpdate, Directory, DriverStatus, LanguageModel, NewCall,
    ProviderCallDetails, ProviderKind, Question,
};
use callforge_logging::{CallEvent, CallEventLogger};
use callforge_telephony::{
    render, AdapterRegistry, CallFlow, CallScript, DialRequest, ProviderResponse, TurnPrompt,
};

use crate::conversation::{ConversationMachine, SpokenTurn, DEFAULT_EXCHANGE_CAP};
use crate::cost::RateTable;
use crate::failover::with_failover;
use crate::prompt;
use crate::retry::{retry_with_backoff, RetryPolicy};

/// Runtime knobs of the engine.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Externally reachable base URL; webhooks land on `{public_url}/webhooks/{provider}`.
    pub public_url: String,
    pub language: String,
    pub voice: String,
    /// Agent turns before the conversation is closed.
    pub exchange_cap: usize,
    /// Non-terminal calls untouched for this long are refreshed from the provider on query.
    pub stale_after: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            public_url: "http://localhost:8080".to_string(),
            language: "hi-IN".to_string(),
            voice: "alice".to_string(),
            exchange_cap: DEFAULT_EXCHANGE_CAP,
            stale_after: Duration::from_secs(600),
        }
    }
}

/// How the HTTP layer should answer a provider webhook.
#[derive(Debug, Clone, PartialEq)]
pub enum WebhookReply {
    /// Plain `OK`.
    Ack,
    Respond(ProviderResponse),
}

/// Result of a status query: the local record, or the provider's own view
/// when no local record exists.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "source", content = "call", rename_all = "snake_case")]
pub enum CallSnapshot {
    Local(CallRecord),
    Remote(ProviderCallDetails),
}

/// What the agent is told and asks on one call.
struct Persona {
    system_prompt: String,
    first_message: Option<String>,
    questions: Vec<Question>,
}

/// The call orchestration engine.
///
/// Places calls with retry and provider failover, drives self-hosted
/// conversations from webhooks, and reconciles hosted calls on completion.
pub struct CallEngine {
    registry: AdapterRegistry,
    store: Arc<dyn CallSessionStore>,
    directory: Arc<dyn Directory>,
    conversation: ConversationMachine,
    retry: RetryPolicy,
    rates: RateTable,
    settings: EngineSettings,
}

impl CallEngine {
    pub fn new(
        registry: AdapterRegistry,
        store: Arc<dyn CallSessionStore>,
        directory: Arc<dyn Directory>,
        model: Arc<dyn LanguageModel>,
        settings: EngineSettings,
    ) -> Self {
        let conversation = ConversationMachine::new(store.clone(), model, settings.exchange_cap);
        Self {
            registry,
            store,
            directory,
            conversation,
            retry: RetryPolicy::default(),
            rates: RateTable::default(),
            settings,
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_rates(mut self, rates: RateTable) -> Self {
        self.rates = rates;
        self
    }

    pub fn registry(&self) -> &AdapterRegistry {
        &self.registry
    }

    pub fn store(&self) -> Arc<dyn CallSessionStore> {
        self.store.clone()
    }

    pub fn webhook_url(&self, provider: ProviderKind) -> String {
        format!(
            "{}/webhooks/{}",
            self.settings.public_url.trim_end_matches('/'),
            provider
        )
    }

    /// Resolve the driver and persona, then dial through the failover chain.
    ///
    /// Each provider gets the full retry budget before the next one is tried.
    pub async fn initiate_call(&self, request: CallRequest) -> Result<CallHandle, CallError> {
        let driver = self
            .directory
            .driver(&request.driver_id)
            .await?
            .ok_or_else(|| CallError::NotFound(format!("driver {}", request.driver_id)))?;
        if driver.phone.trim().is_empty() {
            return Err(CallError::Validation(format!(
                "driver {} has no phone number",
                driver.id
            )));
        }

        let agent = match &request.agent_id {
            Some(id) => Some(
                self.directory
                    .agent(id)
                    .await?
                    .ok_or_else(|| CallError::NotFound(format!("agent {id}")))?,
            ),
            None => None,
        };

        if let Some(kind) = request.provider_override {
            if self.registry.get(kind).is_none() {
                return Err(CallError::Validation(format!(
                    "provider {kind} is not configured"
                )));
            }
        }
        if self.registry.is_empty() {
            return Err(CallError::NoProviders);
        }

        let script = CallScript {
            system_prompt: prompt::system_prompt(agent.as_ref(), &driver.name),
            first_message: agent
                .as_ref()
                .and_then(|a| a.first_message.clone())
                .unwrap_or_else(|| prompt::default_first_message(&driver.name)),
            language: self.settings.language.clone(),
        };
        let mut metadata = BTreeMap::new();
        metadata.insert("driver_id".to_string(), driver.id.clone());
        metadata.insert("driver_name".to_string(), driver.name.clone());
        if let Some(agent) = &agent {
            metadata.insert("agent_id".to_string(), agent.id.clone());
        }

        let candidates: Vec<_> = self
            .registry
            .failover_order(request.provider_override)
            .into_iter()
            .filter_map(|kind| self.registry.get(kind).map(|adapter| (kind, adapter)))
            .map(|(kind, adapter)| {
                let dial = DialRequest {
                    to: driver.phone.clone(),
                    from: None,
                    webhook_url: self.webhook_url(kind),
                    metadata: metadata.clone(),
                    script: Some(script.clone()),
                };
                let policy = self.retry.clone();
                let attempt = move || async move {
                    retry_with_backoff(&policy, || adapter.initiate(&dial)).await
                };
                (kind, attempt)
            })
            .collect();

        let (provider, provider_call_id) = with_failover(candidates, |from, to, error| {
            CallEventLogger::log_event(
                &driver.id,
                CallEvent::ProviderSwitched {
                    from: from.to_string(),
                    to: to.to_string(),
                    error_msg: error.to_string(),
                },
            );
        })
        .await
        .inspect_err(|e| {
            CallEventLogger::log_event(
                &driver.id,
                CallEvent::Error {
                    error_msg: e.to_string(),
                },
            );
        })?;

        let record = self
            .store
            .create_call(NewCall {
                provider,
                provider_call_id: provider_call_id.clone(),
                driver_id: driver.id.clone(),
                agent_id: agent.map(|a| a.id),
            })
            .await?;

        CallEventLogger::log_event(
            &record.id.to_string(),
            CallEvent::Dialed {
                provider: provider.to_string(),
                to: driver.phone.clone(),
            },
        );
        if let Err(e) = self
            .store
            .update_driver_status(&driver.id, DriverStatus::Calling)
            .await
        {
            warn!(driver_id = %driver.id, error = %e, "Could not mark driver as calling");
        }

        info!("[Engine] Call {} placed via {} ({})", record.id, provider, provider_call_id);
        Ok(CallHandle {
            call_id: record.id,
            provider_call_id,
            provider,
        })
    }

    /// Route one provider webhook to the call it belongs to.
    ///
    /// Unknown provider: `NotFound`. Malformed body or missing call id:
    /// `Validation`. A call id nobody knows is acknowledged and logged.
    pub async fn handle_webhook(
        &self,
        provider: ProviderKind,
        body: &[u8],
        content_type: Option<&str>,
    ) -> Result<WebhookReply, CallError> {
        let adapter = self
            .registry
            .get(provider)
            .ok_or_else(|| CallError::NotFound(format!("provider {provider} is not configured")))?;
        let event = adapter.parse_webhook(body, content_type)?;

        let Some(call) = self
            .store
            .find_call_by_provider_id(provider, &event.provider_call_id)
            .await?
        else {
            warn!(provider = %provider, provider_call_id = %event.provider_call_id, "Webhook for unknown call");
            CallEventLogger::log_event(
                &event.provider_call_id,
                CallEvent::WebhookUnmatched {
                    provider: provider.to_string(),
                    provider_call_id: event.provider_call_id.clone(),
                },
            );
            return Ok(WebhookReply::Ack);
        };

        let flow = adapter.flow();
        let was_terminal = call.status.is_terminal();
        let call = self.settle(&call, event.to_update(), flow).await?;

        if flow == CallFlow::Hosted {
            return Ok(WebhookReply::Respond(render::ack()));
        }
        if was_terminal || call.status.is_terminal() {
            return Ok(WebhookReply::Ack);
        }

        if let Some(speech) = event.speech.as_deref().filter(|s| !s.trim().is_empty()) {
            let persona = self.persona(&call).await?;
            let turn = self
                .conversation
                .on_speech(&call, &persona.system_prompt, speech, event.delivery_id.as_deref())
                .await?;
            return Ok(WebhookReply::Respond(
                adapter.render_turn(&self.turn_prompt(provider, turn)),
            ));
        }

        if let Some(digits) = &event.dtmf {
            debug!(call_id = %call.id, digits = %digits, "Keypad input ignored");
        }

        // Connect events greet; later callbacks without speech (gather
        // timeouts) repeat the last agent turn and keep listening.
        if matches!(event.status, CallStatus::Ringing | CallStatus::InProgress) {
            let persona = self.persona(&call).await?;
            let turn = self
                .conversation
                .greet(&call, &persona.system_prompt, persona.first_message.as_deref())
                .await?;
            if call.status != CallStatus::InProgress {
                self.settle(&call, CallUpdate::status(CallStatus::InProgress), flow)
                    .await?;
            }
            return Ok(WebhookReply::Respond(
                adapter.render_turn(&self.turn_prompt(provider, turn)),
            ));
        }

        Ok(WebhookReply::Ack)
    }

    /// Local state of a call, refreshed from the provider when stale.
    /// Without a local record the provider's status API answers directly.
    pub async fn call_snapshot(
        &self,
        provider: Option<ProviderKind>,
        provider_call_id: &str,
    ) -> Result<CallSnapshot, CallError> {
        let kind = provider
            .or_else(|| self.registry.default_kind())
            .ok_or(CallError::NoProviders)?;

        if let Some(call) = self
            .store
            .find_call_by_provider_id(kind, provider_call_id)
            .await?
        {
            let stale_after = chrono::Duration::from_std(self.settings.stale_after)
                .unwrap_or_else(|_| chrono::Duration::zero());
            if call.status.is_terminal() || Utc::now() - call.updated_at < stale_after {
                return Ok(CallSnapshot::Local(call));
            }
            return match self.sync_call(&call).await {
                Ok(fresh) => Ok(CallSnapshot::Local(fresh)),
                Err(e) => {
                    warn!(call_id = %call.id, error = %e, "Status refresh failed, serving local state");
                    Ok(CallSnapshot::Local(call))
                }
            };
        }

        let adapter = self
            .registry
            .get(kind)
            .ok_or_else(|| CallError::NotFound(format!("provider {kind} is not configured")))?;
        Ok(CallSnapshot::Remote(
            adapter.fetch_status(provider_call_id).await?,
        ))
    }

    /// End a live call at the provider and settle it as cancelled.
    ///
    /// Providers without a hangup API refuse with `Validation`. Other provider
    /// failures are logged and the call is still settled. A call that already
    /// ended is returned unchanged.
    pub async fn hangup_call(
        &self,
        provider: Option<ProviderKind>,
        provider_call_id: &str,
    ) -> Result<CallRecord, CallError> {
        let kind = provider
            .or_else(|| self.registry.default_kind())
            .ok_or(CallError::NoProviders)?;
        let call = self
            .store
            .find_call_by_provider_id(kind, provider_call_id)
            .await?
            .ok_or_else(|| CallError::NotFound(format!("call {provider_call_id}")))?;
        if call.status.is_terminal() {
            return Ok(call);
        }
        let adapter = self
            .registry
            .get(kind)
            .ok_or_else(|| CallError::NotFound(format!("provider {kind} is not configured")))?;

        match adapter.hangup(provider_call_id).await {
            Ok(()) => {}
            Err(e @ CallError::Validation(_)) => return Err(e),
            Err(e) => {
                warn!(call_id = %call.id, provider = %kind, error = %e, "Provider hangup failed, cancelling locally");
            }
        }
        info!("[Engine] Call {} hung up", call.id);
        self.settle(&call, CallUpdate::status(CallStatus::Cancelled), adapter.flow())
            .await
    }

    /// Pull the provider's view of a call into the store.
    pub async fn sync_call(&self, call: &CallRecord) -> Result<CallRecord, CallError> {
        let Some(adapter) = self.registry.get(call.provider) else {
            debug!(call_id = %call.id, provider = %call.provider, "Provider no longer configured, skipping sync");
            return Ok(call.clone());
        };
        let details = adapter.fetch_status(&call.provider_call_id).await?;
        match details.to_update() {
            Some(update) => self.settle(call, update, adapter.flow()).await,
            None => Ok(call.clone()),
        }
    }

    /// Apply an update and run completion work on the first terminal transition.
    async fn settle(
        &self,
        call: &CallRecord,
        update: CallUpdate,
        flow: CallFlow,
    ) -> Result<CallRecord, CallError> {
        let record = self.store.update_call(call.id, update).await?;
        if record.status != call.status {
            CallEventLogger::log_event(
                &record.id.to_string(),
                CallEvent::StatusChanged {
                    from: call.status.to_string(),
                    to: record.status.to_string(),
                },
            );
        }
        if !call.status.is_terminal() && record.status.is_terminal() {
            return self.finish(record, flow).await;
        }
        Ok(record)
    }

    /// Transcript, summary, answers, cost and driver state for a call that
    /// just ended. Runs once: `ended_at` marks it done.
    async fn finish(&self, record: CallRecord, flow: CallFlow) -> Result<CallRecord, CallError> {
        if record.ended_at.is_some() {
            return Ok(record);
        }

        let mut update = CallUpdate {
            ended_at: Some(Utc::now()),
            ..Default::default()
        };

        let completed = record.status == CallStatus::Completed;
        if completed {
            let turns = self.store.turns(record.id).await?;
            if !turns.is_empty() {
                update.transcript = Some(format_transcript(&turns));
            }

            let transcript = record.transcript.clone().or_else(|| update.transcript.clone());
            if let (CallFlow::SelfHosted, None, Some(transcript)) =
                (flow, &record.summary, transcript)
            {
                let persona = self.persona(&record).await?;
                let debrief = self.conversation.debrief(&transcript, &persona.questions).await;
                update.summary = debrief.summary;
                update.answers = debrief.answers;
            }

            update.cost = Some(self.rates.cost(
                record.provider,
                flow,
                record.duration_seconds.unwrap_or(0),
            ));
        }

        let record = self.store.update_call(record.id, update).await?;

        let driver_status = if completed {
            DriverStatus::Contacted
        } else {
            DriverStatus::New
        };
        if let Err(e) = self
            .store
            .update_driver_status(&record.driver_id, driver_status)
            .await
        {
            warn!(driver_id = %record.driver_id, error = %e, "Could not update driver status");
        }

        if completed {
            CallEventLogger::log_event(
                &record.id.to_string(),
                CallEvent::Completed {
                    duration_seconds: record.duration_seconds,
                    cost: record.cost.as_ref().map(|c| c.amount),
                },
            );
        }
        info!("[Engine] Call {} ended as {}", record.id, record.status);
        Ok(record)
    }

    async fn persona(&self, call: &CallRecord) -> Result<Persona, CallError> {
        let driver_name = self
            .directory
            .driver(&call.driver_id)
            .await?
            .map(|d| d.name)
            .unwrap_or_else(|| call.driver_id.clone());
        let agent = match &call.agent_id {
            Some(id) => self.directory.agent(id).await?,
            None => None,
        };

        Ok(Persona {
            system_prompt: prompt::system_prompt(agent.as_ref(), &driver_name),
            first_message: agent.as_ref().and_then(|a| a.first_message.clone()),
            questions: agent
                .map(|a| a.questions)
                .filter(|q| !q.is_empty())
                .unwrap_or_else(prompt::default_questions),
        })
    }

    fn turn_prompt(&self, provider: ProviderKind, turn: SpokenTurn) -> TurnPrompt {
        TurnPrompt {
            text: turn.text,
            continue_listening: turn.continue_listening,
            language: self.settings.language.clone(),
            voice: self.settings.voice.clone(),
            action_url: self.webhook_url(provider),
        }
    }
}

#[async_trait]
impl CallOrchestrator for CallEngine {
    async fn place_call(&self, request: CallRequest) -> Result<CallHandle, CallError> {
        self.initiate_call(request).await
    }

    async fn sync_call(&self, call: &CallRecord) -> Result<CallRecord, CallError> {
        CallEngine::sync_call(self, call).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use callforge_core::Driver;
    use callforge_llm::ScriptedModel;
    use callforge_store::MemoryStore;
    use callforge_telephony::config::{BlandSettings, ExotelSettings, PlivoSettings};
    use callforge_telephony::providers::{BlandAdapter, ExotelAdapter, PlivoAdapter};
    use mockito::Matcher;
    use reqwest::Client;

    const FORM: Option<&str> = Some("application/x-www-form-urlencoded");

    fn exotel(base_url: &str) -> Arc<ExotelAdapter> {
        Arc::new(
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
            .with_base_url(base_url),
        )
    }

    fn plivo(base_url: &str) -> Arc<PlivoAdapter> {
        Arc::new(
            PlivoAdapter::new(
                PlivoSettings {
                    auth_id: "MAXXXX".into(),
                    auth_token: "tok".into(),
                    phone_number: "+918000000000".into(),
                },
                Client::new(),
                "+91",
            )
            .with_base_url(base_url),
        )
    }

    fn bland() -> Arc<BlandAdapter> {
        Arc::new(BlandAdapter::new(
            BlandSettings { api_key: "bk".into() },
            Client::new(),
            "+91",
        ))
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 2,
            base_delay_ms: 1,
            max_delay_ms: 2,
            jitter: false,
            ..Default::default()
        }
    }

    async fn store_with_rajesh() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        store
            .upsert_driver(Driver {
                id: "d1".into(),
                name: "Rajesh".into(),
                phone: "9876543210".into(),
                status: DriverStatus::New,
            })
            .await;
        store
    }

    fn engine(registry: AdapterRegistry, store: Arc<MemoryStore>, model: Arc<ScriptedModel>) -> CallEngine {
        CallEngine::new(
            registry,
            store.clone(),
            store,
            model,
            EngineSettings {
                public_url: "https://calls.example.com/".into(),
                ..Default::default()
            },
        )
        .with_retry_policy(fast_retry())
    }

    fn rajesh() -> CallRequest {
        CallRequest {
            driver_id: "d1".into(),
            agent_id: None,
            provider_override: None,
        }
    }

    fn body(reply: &WebhookReply) -> &str {
        match reply {
            WebhookReply::Respond(response) => &response.body,
            WebhookReply::Ack => "OK",
        }
    }

    #[tokio::test]
    async fn full_self_hosted_call() {
        let mut server = mockito::Server::new_async().await;
        let dial = server
            .mock("POST", "/v1/Accounts/acct/Calls/connect.json")
            .match_body(Matcher::PartialJson(serde_json::json!({
                "From": "+919876543210",
                "Url": "https://calls.example.com/webhooks/exotel",
            })))
            .with_status(200)
            .with_body(r#"{"Call":{"Sid":"exo-123"}}"#)
            .create_async()
            .await;

        let mut registry = AdapterRegistry::new();
        registry.register(exotel(&server.url()));
        let store = store_with_rajesh().await;
        let model = Arc::new(
            ScriptedModel::new()
                .with_rule("Summarize", "Rajesh is in Nagpur.")
                .with_rule("Extract", r#"{"location": "Nagpur"}"#)
                .with_responses(["Namaste Rajesh ji, aap kahan hain?", "Kab tak chalenge?"]),
        );
        let engine = engine(registry, store.clone(), model.clone());

        let handle = engine.initiate_call(rajesh()).await.unwrap();
        dial.assert_async().await;
        assert_eq!(handle.provider, ProviderKind::Exotel);
        assert_eq!(handle.provider_call_id, "exo-123");
        assert_eq!(store.driver("d1").await.unwrap().unwrap().status, DriverStatus::Calling);

        let greeting = engine
            .handle_webhook(ProviderKind::Exotel, b"CallSid=exo-123&CallStatus=ringing", FORM)
            .await
            .unwrap();
        assert!(body(&greeting).contains("aap kahan hain?"));

        let reply = engine
            .handle_webhook(
                ProviderKind::Exotel,
                b"CallSid=exo-123&CallStatus=in-progress&SpeechResult=Nagpur",
                FORM,
            )
            .await
            .unwrap();
        assert!(body(&reply).contains("Kab tak chalenge?"));

        let done = engine
            .handle_webhook(
                ProviderKind::Exotel,
                b"CallSid=exo-123&CallStatus=completed&duration=42",
                FORM,
            )
            .await
            .unwrap();
        assert_eq!(done, WebhookReply::Ack);

        let call = store.call(handle.call_id).await.unwrap().unwrap();
        assert_eq!(call.status, CallStatus::Completed);
        assert_eq!(call.duration_seconds, Some(42));
        assert!(call.ended_at.is_some());
        assert_eq!(
            call.transcript.as_deref(),
            Some("Agent: Namaste Rajesh ji, aap kahan hain?\nUser: Nagpur\nAgent: Kab tak chalenge?")
        );
        assert_eq!(call.summary.as_deref(), Some("Rajesh is in Nagpur."));
        assert_eq!(call.answers, Some(serde_json::json!({"location": "Nagpur"})));
        let cost = call.cost.clone().unwrap();
        assert!((cost.amount - 0.024).abs() < 1e-9);
        assert_eq!(store.driver("d1").await.unwrap().unwrap().status, DriverStatus::Contacted);

        // A redelivered completion changes nothing and asks the model nothing.
        let calls_before = model.call_count();
        engine
            .handle_webhook(
                ProviderKind::Exotel,
                b"CallSid=exo-123&CallStatus=completed&duration=7",
                FORM,
            )
            .await
            .unwrap();
        let again = store.call(handle.call_id).await.unwrap().unwrap();
        assert_eq!(again.duration_seconds, Some(42));
        assert_eq!(again.summary, call.summary);
        assert_eq!(model.call_count(), calls_before);
    }

    #[tokio::test]
    async fn silent_callback_repeats_the_question() {
        let mut registry = AdapterRegistry::new();
        registry.register(exotel("http://unused"));
        let store = store_with_rajesh().await;
        let model = Arc::new(ScriptedModel::new().with_responses(["Namaste Rajesh ji, aap kahan hain?"]));
        let engine = engine(registry, store.clone(), model.clone());
        let call = store
            .create_call(NewCall {
                provider: ProviderKind::Exotel,
                provider_call_id: "exo-5".into(),
                driver_id: "d1".into(),
                agent_id: None,
            })
            .await
            .unwrap();

        engine
            .handle_webhook(ProviderKind::Exotel, b"CallSid=exo-5&CallStatus=in-progress", FORM)
            .await
            .unwrap();
        let timeout = engine
            .handle_webhook(ProviderKind::Exotel, b"CallSid=exo-5&CallStatus=in-progress", FORM)
            .await
            .unwrap();

        assert!(body(&timeout).contains("aap kahan hain?"));
        assert!(body(&timeout).contains("<Gather"));
        assert_eq!(store.turns(call.id).await.unwrap().len(), 1);
        assert_eq!(model.call_count(), 1);
    }

    #[tokio::test]
    async fn fails_over_after_exhausting_retries() {
        let mut exotel_server = mockito::Server::new_async().await;
        let flaky = exotel_server
            .mock("POST", "/v1/Accounts/acct/Calls/connect.json")
            .with_status(503)
            .with_body("busy")
            .expect(2)
            .create_async()
            .await;
        let mut plivo_server = mockito::Server::new_async().await;
        plivo_server
            .mock("POST", "/v1/Account/MAXXXX/Call/")
            .with_status(201)
            .with_body(r#"{"request_uuid":"req-7"}"#)
            .create_async()
            .await;

        let mut registry = AdapterRegistry::new();
        registry.register(exotel(&exotel_server.url()));
        registry.register(plivo(&plivo_server.url()));
        let store = store_with_rajesh().await;
        let engine = engine(registry, store.clone(), Arc::new(ScriptedModel::new()));

        let handle = engine.initiate_call(rajesh()).await.unwrap();
        flaky.assert_async().await;
        assert_eq!(handle.provider, ProviderKind::Plivo);
        assert_eq!(handle.provider_call_id, "req-7");
        assert!(store
            .find_call_by_provider_id(ProviderKind::Plivo, "req-7")
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn bad_credentials_do_not_fail_over() {
        let mut exotel_server = mockito::Server::new_async().await;
        exotel_server
            .mock("POST", "/v1/Accounts/acct/Calls/connect.json")
            .with_status(401)
            .with_body(r#"{"message":"Authentication failed"}"#)
            .create_async()
            .await;
        let mut plivo_server = mockito::Server::new_async().await;
        let untouched = plivo_server
            .mock("POST", "/v1/Account/MAXXXX/Call/")
            .expect(0)
            .create_async()
            .await;

        let mut registry = AdapterRegistry::new();
        registry.register(exotel(&exotel_server.url()));
        registry.register(plivo(&plivo_server.url()));
        let engine = engine(registry, store_with_rajesh().await, Arc::new(ScriptedModel::new()));

        let err = engine.initiate_call(rajesh()).await.unwrap_err();
        assert!(err.category().is_fatal());
        untouched.assert_async().await;
    }

    #[tokio::test]
    async fn unknown_driver_and_missing_providers_are_rejected() {
        let store = store_with_rajesh().await;
        let engine = engine(AdapterRegistry::new(), store, Arc::new(ScriptedModel::new()));

        let err = engine
            .initiate_call(CallRequest {
                driver_id: "nobody".into(),
                agent_id: None,
                provider_override: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, CallError::NotFound(_)));

        let err = engine.initiate_call(rajesh()).await.unwrap_err();
        assert!(matches!(err, CallError::NoProviders));
    }

    #[tokio::test]
    async fn webhook_routing_errors() {
        let mut registry = AdapterRegistry::new();
        registry.register(exotel("http://unused"));
        let engine = engine(registry, store_with_rajesh().await, Arc::new(ScriptedModel::new()));

        let err = engine
            .handle_webhook(ProviderKind::Plivo, b"CallUUID=x", FORM)
            .await
            .unwrap_err();
        assert!(matches!(err, CallError::NotFound(_)));

        let err = engine
            .handle_webhook(ProviderKind::Exotel, b"CallStatus=completed", FORM)
            .await
            .unwrap_err();
        assert!(matches!(err, CallError::Validation(_)));

        let reply = engine
            .handle_webhook(ProviderKind::Exotel, b"CallSid=stranger&CallStatus=ringing", FORM)
            .await
            .unwrap();
        assert_eq!(reply, WebhookReply::Ack);
    }

    #[tokio::test]
    async fn hosted_completion_is_reconciled() {
        let mut registry = AdapterRegistry::new();
        registry.register(bland());
        let store = store_with_rajesh().await;
        let model = Arc::new(ScriptedModel::new());
        let engine = engine(registry, store.clone(), model.clone());

        let call = store
            .create_call(NewCall {
                provider: ProviderKind::Bland,
                provider_call_id: "bl-1".into(),
                driver_id: "d1".into(),
                agent_id: None,
            })
            .await
            .unwrap();

        let payload = serde_json::json!({
            "call_id": "bl-1",
            "completed": true,
            "call_length": 1.5,
            "concatenated_transcript": "Agent: Namaste\nUser: Pune mein hoon",
            "summary": "Driver is in Pune.",
        });
        let reply = engine
            .handle_webhook(
                ProviderKind::Bland,
                payload.to_string().as_bytes(),
                Some("application/json"),
            )
            .await
            .unwrap();
        assert_eq!(reply, WebhookReply::Respond(render::ack()));

        let call = store.call(call.id).await.unwrap().unwrap();
        assert_eq!(call.status, CallStatus::Completed);
        assert_eq!(call.duration_seconds, Some(90));
        assert_eq!(call.summary.as_deref(), Some("Driver is in Pune."));
        assert_eq!(call.transcript.as_deref(), Some("Agent: Namaste\nUser: Pune mein hoon"));
        let cost = call.cost.unwrap();
        assert!((cost.amount - 0.275).abs() < 1e-9);
        assert_eq!(cost.currency, "USD");
        assert_eq!(model.call_count(), 0);
        assert_eq!(store.driver("d1").await.unwrap().unwrap().status, DriverStatus::Contacted);
    }

    #[tokio::test]
    async fn failed_call_returns_driver_to_new() {
        let mut registry = AdapterRegistry::new();
        registry.register(exotel("http://unused"));
        let store = store_with_rajesh().await;
        let engine = engine(registry, store.clone(), Arc::new(ScriptedModel::new()));
        let call = store
            .create_call(NewCall {
                provider: ProviderKind::Exotel,
                provider_call_id: "exo-9".into(),
                driver_id: "d1".into(),
                agent_id: None,
            })
            .await
            .unwrap();

        engine
            .handle_webhook(ProviderKind::Exotel, b"CallSid=exo-9&CallStatus=no-answer", FORM)
            .await
            .unwrap();

        let call = store.call(call.id).await.unwrap().unwrap();
        assert_eq!(call.status, CallStatus::NoAnswer);
        assert!(call.cost.is_none());
        assert_eq!(store.driver("d1").await.unwrap().unwrap().status, DriverStatus::New);
    }

    #[tokio::test]
    async fn snapshot_falls_back_to_the_provider() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/v1/Accounts/acct/Calls/remote-1.json")
            .with_status(200)
            .with_body(r#"{"Call":{"Sid":"remote-1","Status":"completed","Duration":"30"}}"#)
            .create_async()
            .await;

        let mut registry = AdapterRegistry::new();
        registry.register(exotel(&server.url()));
        let engine = engine(registry, store_with_rajesh().await, Arc::new(ScriptedModel::new()));

        match engine.call_snapshot(None, "remote-1").await.unwrap() {
            CallSnapshot::Remote(details) => {
                assert_eq!(details.status, callforge_core::RemoteStatus::Known(CallStatus::Completed));
                assert_eq!(details.duration_seconds, Some(30));
            }
            other => panic!("expected remote snapshot, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn hangup_cancels_a_live_call() {
        let mut server = mockito::Server::new_async().await;
        let hangup = server
            .mock("DELETE", "/v1/Account/MAXXXX/Call/uuid-3/")
            .with_status(204)
            .expect(1)
            .create_async()
            .await;

        let mut registry = AdapterRegistry::new();
        registry.register(plivo(&server.url()));
        let store = store_with_rajesh().await;
        let engine = engine(registry, store.clone(), Arc::new(ScriptedModel::new()));
        let call = store
            .create_call(NewCall {
                provider: ProviderKind::Plivo,
                provider_call_id: "uuid-3".into(),
                driver_id: "d1".into(),
                agent_id: None,
            })
            .await
            .unwrap();
        store
            .update_call(call.id, CallUpdate::status(CallStatus::InProgress))
            .await
            .unwrap();

        let ended = engine.hangup_call(None, "uuid-3").await.unwrap();
        assert_eq!(ended.status, CallStatus::Cancelled);
        assert!(ended.ended_at.is_some());
        assert_eq!(store.driver("d1").await.unwrap().unwrap().status, DriverStatus::New);

        // Already over: nothing is sent to the provider again.
        let again = engine.hangup_call(Some(ProviderKind::Plivo), "uuid-3").await.unwrap();
        assert_eq!(again.status, CallStatus::Cancelled);
        hangup.assert_async().await;

        let err = engine.hangup_call(None, "nobody").await.unwrap_err();
        assert!(matches!(err, CallError::NotFound(_)));
    }

    #[tokio::test]
    async fn hangup_is_refused_without_a_hangup_api() {
        let mut registry = AdapterRegistry::new();
        registry.register(exotel("http://unused"));
        let store = store_with_rajesh().await;
        let engine = engine(registry, store.clone(), Arc::new(ScriptedModel::new()));
        let call = store
            .create_call(NewCall {
                provider: ProviderKind::Exotel,
                provider_call_id: "exo-4".into(),
                driver_id: "d1".into(),
                agent_id: None,
            })
            .await
            .unwrap();

        let err = engine.hangup_call(None, "exo-4").await.unwrap_err();
        assert!(matches!(err, CallError::Validation(_)));
        let call = store.call(call.id).await.unwrap().unwrap();
        assert!(!call.status.is_terminal());
    }
}
