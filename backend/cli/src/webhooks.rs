//! Inbound provider webhooks.
//!
//! Providers retry anything that is not a 2xx, so only genuinely malformed
//! input or an unknown provider is refused. Everything else is acknowledged.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, RawQuery, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use tracing::{error, warn};

use callforge_core::{CallError, ProviderKind};
use callforge_orchestrator::WebhookReply;

use crate::api::{ApiError, AppState};

const FORM: &str = "application/x-www-form-urlencoded";

/// `POST /webhooks/{provider}` with a form or JSON body.
pub async fn receive(
    State(state): State<Arc<AppState>>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    dispatch(&state, &provider, &body, content_type.as_deref()).await
}

/// `GET /webhooks/{provider}`: some providers deliver callbacks as query strings.
pub async fn receive_query(
    State(state): State<Arc<AppState>>,
    Path(provider): Path<String>,
    RawQuery(query): RawQuery,
) -> Response {
    let body = query.unwrap_or_default();
    dispatch(&state, &provider, body.as_bytes(), Some(FORM)).await
}

async fn dispatch(
    state: &AppState,
    provider: &str,
    body: &[u8],
    content_type: Option<&str>,
) -> Response {
    let kind: ProviderKind = match provider.parse() {
        Ok(kind) => kind,
        Err(e) => return ApiError(CallError::NotFound(e)).into_response(),
    };

    match state.engine.handle_webhook(kind, body, content_type).await {
        Ok(WebhookReply::Ack) => (StatusCode::OK, "OK").into_response(),
        Ok(WebhookReply::Respond(reply)) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, reply.content_type)],
            reply.body,
        )
            .into_response(),
        Err(e @ (CallError::NotFound(_) | CallError::Validation(_))) => {
            warn!(provider = %kind, error = %e, "Rejected webhook");
            ApiError(e).into_response()
        }
        Err(e) => {
            error!(provider = %kind, error = %e, "Webhook handling failed");
            (StatusCode::OK, "OK").into_response()
        }
    }
}
