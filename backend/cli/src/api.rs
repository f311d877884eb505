use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info};

use callforge_core::{
    Agent, CallError, CallRequest, CallSessionStore, Driver, DriverStatus, ErrorCategory,
    Message, ProviderKind, Question, Recurrence, ScheduledCall,
};
use callforge_orchestrator::CallEngine;
use callforge_store::SqliteStore;

use crate::{stream, webhooks};

/// Shared application state for API handlers.
pub struct AppState {
    pub engine: Arc<CallEngine>,
    pub store: Arc<SqliteStore>,
    pub scheduler_tx: mpsc::Sender<Message>,
}

/// Build the Axum router with all API and webhook routes.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/calls", post(create_call))
        .route("/api/calls/stream", get(stream::call_stream))
        .route("/api/calls/{provider_call_id}", get(get_call))
        .route("/api/calls/{provider_call_id}/sync", post(sync_call))
        .route("/api/calls/{provider_call_id}/hangup", post(hangup_call))
        .route("/api/scheduled-calls", post(create_scheduled_call))
        .route("/api/scheduler/process", post(process_scheduled))
        .route("/api/drivers", post(upsert_driver))
        .route("/api/agents", post(upsert_agent))
        .route(
            "/webhooks/{provider}",
            get(webhooks::receive_query).post(webhooks::receive),
        )
        .with_state(state)
}

/// A [`CallError`] rendered as `{message, category, suggestions}` with a
/// status code derived from its category.
pub struct ApiError(pub CallError);

impl From<CallError> for ApiError {
    fn from(err: CallError) -> Self {
        Self(err)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        if matches!(self.0, CallError::NotFound(_)) {
            return StatusCode::NOT_FOUND;
        }
        match self.0.category() {
            ErrorCategory::Authentication => StatusCode::UNAUTHORIZED,
            ErrorCategory::Validation => StatusCode::BAD_REQUEST,
            ErrorCategory::RateLimit | ErrorCategory::Provider | ErrorCategory::Network => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ErrorCategory::Unknown => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self.0, "Request failed");
        }
        (status, Json(self.0.report())).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Deserialize)]
pub struct ProviderQuery {
    pub provider: Option<String>,
}

impl ProviderQuery {
    fn kind(&self) -> Result<Option<ProviderKind>, ApiError> {
        self.provider
            .as_deref()
            .filter(|p| !p.trim().is_empty())
            .map(|p| p.parse().map_err(|e: String| ApiError(CallError::Validation(e))))
            .transpose()
    }
}

/// Health check endpoint.
async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    let registry = state.engine.registry();
    Json(json!({
        "status": "ok",
        "service": "callforge",
        "version": env!("CARGO_PKG_VERSION"),
        "providers": registry.kinds(),
        "default_provider": registry.default_kind(),
    }))
}

/// Place a call now.
async fn create_call(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CallRequest>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let handle = state.engine.initiate_call(request).await?;
    Ok((StatusCode::CREATED, Json(json!(handle))))
}

/// Current state of a call by its provider-side id.
async fn get_call(
    State(state): State<Arc<AppState>>,
    Path(provider_call_id): Path<String>,
    Query(query): Query<ProviderQuery>,
) -> ApiResult<Json<Value>> {
    let snapshot = state
        .engine
        .call_snapshot(query.kind()?, &provider_call_id)
        .await?;
    Ok(Json(json!(snapshot)))
}

/// Force a refresh of a known call from its provider.
async fn sync_call(
    State(state): State<Arc<AppState>>,
    Path(provider_call_id): Path<String>,
    Query(query): Query<ProviderQuery>,
) -> ApiResult<Json<Value>> {
    let kind = query
        .kind()?
        .or_else(|| state.engine.registry().default_kind())
        .ok_or(CallError::NoProviders)?;
    let call = state
        .engine
        .store()
        .find_call_by_provider_id(kind, &provider_call_id)
        .await?
        .ok_or_else(|| CallError::NotFound(format!("call {provider_call_id}")))?;
    let call = state.engine.sync_call(&call).await?;
    Ok(Json(json!(call)))
}

/// End a live call; the record settles as cancelled.
async fn hangup_call(
    State(state): State<Arc<AppState>>,
    Path(provider_call_id): Path<String>,
    Query(query): Query<ProviderQuery>,
) -> ApiResult<Json<Value>> {
    let call = state
        .engine
        .hangup_call(query.kind()?, &provider_call_id)
        .await?;
    info!(call_id = %call.id, status = %call.status, "Hangup requested");
    Ok(Json(json!(call)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleInput {
    pub driver_id: String,
    #[serde(default)]
    pub agent_id: Option<String>,
    pub scheduled_at: DateTime<Utc>,
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub recurring: Option<Recurrence>,
    #[serde(default)]
    pub max_retries: Option<u32>,
}

/// Queue a call for later, optionally recurring.
async fn create_scheduled_call(
    State(state): State<Arc<AppState>>,
    Json(input): Json<ScheduleInput>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    if input.driver_id.trim().is_empty() {
        return Err(CallError::Validation("driverId is required".into()).into());
    }
    let mut scheduled = ScheduledCall::new(input.driver_id, input.scheduled_at);
    if let Some(agent_id) = input.agent_id {
        scheduled = scheduled.with_agent(agent_id);
    }
    if let Some(recurrence) = input.recurring {
        scheduled = scheduled.with_recurrence(recurrence);
    }
    if let Some(max_retries) = input.max_retries {
        if max_retries < 1 {
            return Err(CallError::Validation("maxRetries must be at least 1".into()).into());
        }
        scheduled = scheduled.with_max_retries(max_retries);
    }
    if let Some(timezone) = input.timezone {
        scheduled.timezone = timezone;
    }

    let scheduled = state.engine.store().create_scheduled_call(scheduled).await?;
    info!(
        scheduled_call_id = %scheduled.id,
        driver_id = %scheduled.driver_id,
        at = %scheduled.scheduled_at,
        "Scheduled call created"
    );
    Ok((StatusCode::CREATED, Json(json!(scheduled))))
}

/// Run a scheduler pass now and report what it did.
async fn process_scheduled(State(state): State<Arc<AppState>>) -> ApiResult<Json<Value>> {
    let (reply_tx, reply_rx) = oneshot::channel();
    state
        .scheduler_tx
        .send(Message::ProcessScheduled { reply: Some(reply_tx) })
        .await
        .map_err(|_| CallError::Other(anyhow::anyhow!("scheduler is not running")))?;
    let summary = reply_rx
        .await
        .map_err(|_| CallError::Other(anyhow::anyhow!("scheduler dropped the request")))?;
    Ok(Json(json!(summary)))
}

#[derive(Debug, Deserialize)]
pub struct DriverInput {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    pub phone: String,
}

async fn upsert_driver(
    State(state): State<Arc<AppState>>,
    Json(input): Json<DriverInput>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    if input.phone.trim().is_empty() {
        return Err(CallError::Validation("phone is required".into()).into());
    }
    let driver = Driver {
        id: input
            .id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
        name: input.name,
        phone: input.phone,
        status: DriverStatus::New,
    };
    state.store.upsert_driver(&driver).await?;
    Ok((StatusCode::CREATED, Json(json!(driver))))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentInput {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    pub system_prompt: String,
    #[serde(default)]
    pub questions: Vec<Question>,
    #[serde(default)]
    pub first_message: Option<String>,
}

async fn upsert_agent(
    State(state): State<Arc<AppState>>,
    Json(input): Json<AgentInput>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let agent = Agent {
        id: input
            .id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
        name: input.name,
        system_prompt: input.system_prompt,
        questions: input.questions,
        first_message: input.first_message,
    };
    state.store.upsert_agent(&agent).await?;
    Ok((StatusCode::CREATED, Json(json!(agent))))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use callforge_llm::ScriptedModel;
    use callforge_orchestrator::EngineSettings;
    use callforge_telephony::config::BlandSettings;
    use callforge_telephony::providers::BlandAdapter;
    use callforge_telephony::AdapterRegistry;

    pub(crate) fn test_state(registry: AdapterRegistry) -> (Arc<AppState>, mpsc::Receiver<Message>) {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let engine = CallEngine::new(
            registry,
            store.clone(),
            store.clone(),
            Arc::new(ScriptedModel::new().with_default("Aap abhi kahan hain?")),
            EngineSettings::default(),
        );
        let (tx, rx) = mpsc::channel(4);
        let state = Arc::new(AppState {
            engine: Arc::new(engine),
            store,
            scheduler_tx: tx,
        });
        (state, rx)
    }

    pub(crate) async fn serve(state: Arc<AppState>) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, build_router(state)).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[test]
    fn error_status_follows_category() {
        let status = |e: CallError| ApiError(e).status();
        assert_eq!(status(CallError::NotFound("driver d1".into())), StatusCode::NOT_FOUND);
        assert_eq!(status(CallError::Validation("bad".into())), StatusCode::BAD_REQUEST);
        assert_eq!(
            status(CallError::provider("exotel", "denied", Some(401))),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            status(CallError::provider("exotel", "busy", Some(503))),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(status(CallError::NoProviders), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            status(CallError::Storage("disk full".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn unknown_driver_is_a_structured_404() {
        let (state, _rx) = test_state(AdapterRegistry::new());
        let base = serve(state).await;

        let resp = reqwest::Client::new()
            .post(format!("{base}/api/calls"))
            .json(&json!({ "driverId": "missing" }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 404);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["category"], "validation");
        assert!(body["message"].as_str().unwrap().contains("missing"));
        assert!(body["suggestions"].as_array().unwrap().len() > 0);
    }

    #[tokio::test]
    async fn drivers_and_schedules_are_stored() {
        let (state, _rx) = test_state(AdapterRegistry::new());
        let store = state.store.clone();
        let base = serve(state).await;
        let client = reqwest::Client::new();

        let resp = client
            .post(format!("{base}/api/drivers"))
            .json(&json!({ "id": "d1", "name": "Rajesh", "phone": "9876543210" }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 201);

        let resp = client
            .post(format!("{base}/api/scheduled-calls"))
            .json(&json!({
                "driverId": "d1",
                "scheduledAt": "2030-01-01T09:00:00Z",
                "recurring": "daily"
            }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 201);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["status"], "pending");
        assert_eq!(body["recurring"], "daily");

        let id: uuid::Uuid = body["id"].as_str().unwrap().parse().unwrap();
        let stored = store.scheduled_call(id).await.unwrap().unwrap();
        assert_eq!(stored.driver_id, "d1");
    }

    #[tokio::test]
    async fn zero_max_retries_is_rejected() {
        let (state, _rx) = test_state(AdapterRegistry::new());
        let store = state.store.clone();
        let base = serve(state).await;

        let resp = reqwest::Client::new()
            .post(format!("{base}/api/scheduled-calls"))
            .json(&json!({
                "driverId": "d1",
                "scheduledAt": "2030-01-01T09:00:00Z",
                "maxRetries": 0
            }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["category"], "validation");

        let due = store
            .find_due_scheduled_calls("2031-01-01T00:00:00Z".parse().unwrap(), 10)
            .await
            .unwrap();
        assert!(due.is_empty());
    }

    #[tokio::test]
    async fn process_waits_for_the_scheduler_reply() {
        let (state, mut rx) = test_state(AdapterRegistry::new());
        let base = serve(state).await;

        tokio::spawn(async move {
            if let Some(Message::ProcessScheduled { reply: Some(tx) }) = rx.recv().await {
                let _ = tx.send(callforge_core::TickSummary {
                    selected: 2,
                    dispatched: 1,
                    rescheduled: 1,
                    failed: 0,
                });
            }
        });

        let body: Value = reqwest::Client::new()
            .post(format!("{base}/api/scheduler/process"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["selected"], 2);
        assert_eq!(body["rescheduled"], 1);
    }

    #[tokio::test]
    async fn unknown_provider_query_is_rejected() {
        let (state, _rx) = test_state(AdapterRegistry::new());
        let base = serve(state).await;

        let resp = reqwest::get(format!("{base}/api/calls/abc?provider=nokia"))
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);
    }

    #[tokio::test]
    async fn hangup_settles_the_call_as_cancelled() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/calls/bl-5/stop")
            .with_status(200)
            .with_body(r#"{"status":"success"}"#)
            .create_async()
            .await;
        let mut registry = AdapterRegistry::new();
        registry.register(Arc::new(
            BlandAdapter::new(BlandSettings { api_key: "bk".into() }, reqwest::Client::new(), "+91")
                .with_base_url(server.url()),
        ));
        let (state, _rx) = test_state(registry);
        let store = state.store.clone();
        store
            .create_call(callforge_core::NewCall {
                provider: ProviderKind::Bland,
                provider_call_id: "bl-5".into(),
                driver_id: "d1".into(),
                agent_id: None,
            })
            .await
            .unwrap();
        let base = serve(state).await;
        let client = reqwest::Client::new();

        let resp = client
            .post(format!("{base}/api/calls/bl-5/hangup?provider=bland"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["status"], "cancelled");

        let resp = client
            .post(format!("{base}/api/calls/unknown/hangup"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 404);
    }
}
