use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, error, info, warn};

use callforge_core::{CallFilter, CallOrchestrator, CallSessionStore, SyncSummary};

/// Periodic sweep that refreshes in-flight calls nobody has heard about in a
/// while. Covers missed or undeliverable webhooks.
pub struct StatusSync {
    store: Arc<dyn CallSessionStore>,
    orchestrator: Arc<dyn CallOrchestrator>,
    stale_after: Duration,
    batch_size: usize,
}

impl StatusSync {
    pub fn new(
        store: Arc<dyn CallSessionStore>,
        orchestrator: Arc<dyn CallOrchestrator>,
        stale_after: Duration,
        batch_size: usize,
    ) -> Self {
        Self {
            store,
            orchestrator,
            stale_after,
            batch_size,
        }
    }

    /// Refresh up to one batch of stale non-terminal calls. Each call is
    /// synced independently; one failure does not stop the sweep.
    pub async fn sweep(&self, now: DateTime<Utc>) -> SyncSummary {
        let filter = CallFilter {
            active_only: true,
            updated_before: Some(now - self.stale_after),
            limit: self.batch_size,
            ..Default::default()
        };
        let calls = match self.store.list_calls(&filter).await {
            Ok(calls) => calls,
            Err(e) => {
                error!(error = %e, "Status sync could not list stale calls");
                return SyncSummary {
                    errors: 1,
                    ..Default::default()
                };
            }
        };

        let mut summary = SyncSummary::default();
        for call in calls {
            summary.checked += 1;
            match self.orchestrator.sync_call(&call).await {
                Ok(fresh) if fresh.status != call.status || fresh.updated_at != call.updated_at => {
                    debug!(call_id = %call.id, from = %call.status, to = %fresh.status, "Call refreshed");
                    summary.updated += 1;
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(call_id = %call.id, provider = %call.provider, error = %e, "Status sync failed");
                    summary.errors += 1;
                }
            }
        }

        if summary.checked > 0 {
            info!(
                checked = summary.checked,
                updated = summary.updated,
                errors = summary.errors,
                "Status sync sweep finished"
            );
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use callforge_core::{
        CallError, CallHandle, CallRecord, CallRequest, CallStatus, CallUpdate, NewCall,
        ProviderKind,
    };
    use callforge_store::MemoryStore;

    /// Reports every call as completed, except `sid-broken` which errors.
    struct RemoteCompletes {
        store: Arc<MemoryStore>,
    }

    #[async_trait]
    impl CallOrchestrator for RemoteCompletes {
        async fn place_call(&self, _request: CallRequest) -> Result<CallHandle, CallError> {
            Err(CallError::NoProviders)
        }

        async fn sync_call(&self, call: &CallRecord) -> Result<CallRecord, CallError> {
            if call.provider_call_id == "sid-broken" {
                return Err(CallError::provider("exotel", "bad gateway", Some(502)));
            }
            self.store
                .update_call(call.id, CallUpdate::status(CallStatus::Completed))
                .await
        }
    }

    async fn call(store: &MemoryStore, sid: &str) -> CallRecord {
        store
            .create_call(NewCall {
                provider: ProviderKind::Exotel,
                provider_call_id: sid.into(),
                driver_id: "d1".into(),
                agent_id: None,
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn refreshes_only_stale_active_calls() {
        let store = Arc::new(MemoryStore::new());
        let stale = call(&store, "sid-1").await;
        call(&store, "sid-broken").await;
        let done = call(&store, "sid-done").await;
        store
            .update_call(done.id, CallUpdate::status(CallStatus::Failed))
            .await
            .unwrap();

        let sync = StatusSync::new(
            store.clone(),
            Arc::new(RemoteCompletes { store: store.clone() }),
            Duration::minutes(10),
            10,
        );

        // Nothing is stale yet.
        assert_eq!(sync.sweep(Utc::now()).await, SyncSummary::default());

        let later = Utc::now() + Duration::hours(1);
        let summary = sync.sweep(later).await;
        assert_eq!(
            summary,
            SyncSummary {
                checked: 2,
                updated: 1,
                errors: 1
            }
        );
        let refreshed = store.call(stale.id).await.unwrap().unwrap();
        assert_eq!(refreshed.status, CallStatus::Completed);
    }
}
