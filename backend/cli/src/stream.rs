use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Query, State},
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::{self, Stream};
use serde::Deserialize;
use serde_json::json;
use tokio::time::{interval_at, Instant, Interval};
use tracing::{debug, warn};
use uuid::Uuid;

use callforge_core::{CallFilter, CallSessionStore};

use crate::api::AppState;

/// Time between `update` events.
const UPDATE_INTERVAL: Duration = Duration::from_secs(2);
const FEED_LIMIT: usize = 10;

#[derive(Debug, Default, Deserialize)]
pub struct StreamQuery {
    #[serde(rename = "callId")]
    pub call_id: Option<Uuid>,
    #[serde(rename = "driverId")]
    pub driver_id: Option<String>,
}

impl StreamQuery {
    fn filter(&self) -> CallFilter {
        let unfiltered = self.call_id.is_none() && self.driver_id.is_none();
        CallFilter {
            call_id: self.call_id,
            driver_id: self.driver_id.clone(),
            active_only: unfiltered,
            updated_before: None,
            limit: FEED_LIMIT,
        }
    }
}

struct Feed {
    store: Arc<dyn CallSessionStore>,
    filter: CallFilter,
    /// `None` until the `connected` event has gone out.
    ticker: Option<Interval>,
}

/// `GET /api/calls/stream`: live call updates over server-sent events.
///
/// The feed lives as long as the response body; a client disconnect drops
/// the stream and its timer with it.
pub async fn call_stream(
    State(state): State<Arc<AppState>>,
    Query(query): Query<StreamQuery>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    debug!(call_id = ?query.call_id, driver_id = ?query.driver_id, "Live feed opened");
    let feed = Feed {
        store: state.engine.store(),
        filter: query.filter(),
        ticker: None,
    };

    let stream = stream::unfold(feed, |mut feed| async move {
        let event = if let Some(ticker) = feed.ticker.as_mut() {
            ticker.tick().await;
            update_event(feed.store.as_ref(), &feed.filter).await
        } else {
            feed.ticker = Some(interval_at(Instant::now() + UPDATE_INTERVAL, UPDATE_INTERVAL));
            Event::default().event("connected").data(
                json!({ "type": "connected", "timestamp": chrono::Utc::now() }).to_string(),
            )
        };
        Some((Ok(event), feed))
    });

    Sse::new(stream).keep_alive(KeepAlive::new())
}

async fn update_event(store: &dyn CallSessionStore, filter: &CallFilter) -> Event {
    match store.list_calls(filter).await {
        Ok(calls) => Event::default().event("update").data(
            json!({ "type": "update", "calls": calls, "timestamp": chrono::Utc::now() })
                .to_string(),
        ),
        Err(e) => {
            warn!(error = %e, "Live feed query failed");
            Event::default()
                .event("error")
                .data(json!({ "type": "error", "message": e.to_string() }).to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::tests::{serve, test_state};
    use callforge_core::{NewCall, ProviderKind};
    use callforge_telephony::AdapterRegistry;

    #[test]
    fn unfiltered_feed_shows_active_calls() {
        let filter = StreamQuery::default().filter();
        assert!(filter.active_only);
        assert_eq!(filter.limit, FEED_LIMIT);

        let filter = StreamQuery {
            call_id: None,
            driver_id: Some("d1".into()),
        }
        .filter();
        assert!(!filter.active_only);
        assert_eq!(filter.driver_id.as_deref(), Some("d1"));
    }

    #[tokio::test]
    async fn feed_sends_connected_then_update() {
        let (state, _rx) = test_state(AdapterRegistry::new());
        state
            .engine
            .store()
            .create_call(NewCall {
                provider: ProviderKind::Plivo,
                provider_call_id: "req-1".into(),
                driver_id: "d1".into(),
                agent_id: None,
            })
            .await
            .unwrap();
        let base = serve(state).await;

        let mut resp = reqwest::get(format!("{base}/api/calls/stream?driverId=d1"))
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);

        let mut seen = String::new();
        while !seen.contains("event: update") {
            let chunk = tokio::time::timeout(Duration::from_secs(5), resp.chunk())
                .await
                .expect("feed stalled")
                .unwrap()
                .expect("feed closed");
            seen.push_str(&String::from_utf8_lossy(&chunk));
        }
        assert!(seen.contains("event: connected"));
        assert!(seen.contains("req-1"));
    }
}
