use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use callforge_core::{
    Agent, CallError, CallFilter, CallRecord, CallSessionStore, CallUpdate, ConversationTurn,
    Directory, Driver, DriverStatus, NewCall, ProviderKind, ScheduledCall, ScheduledCallStatus,
    ScheduledCallUpdate,
};

#[derive(Default)]
struct Inner {
    calls: HashMap<Uuid, CallRecord>,
    turns: HashMap<Uuid, Vec<ConversationTurn>>,
    scheduled: HashMap<Uuid, ScheduledCall>,
    drivers: HashMap<String, Driver>,
    agents: HashMap<String, Agent>,
}

/// Process-local store. Every operation runs under one lock, which gives the
/// per-call write serialization the engine relies on.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn upsert_driver(&self, driver: Driver) {
        self.inner.lock().await.drivers.insert(driver.id.clone(), driver);
    }

    pub async fn upsert_agent(&self, agent: Agent) {
        self.inner.lock().await.agents.insert(agent.id.clone(), agent);
    }
}

pub(crate) fn matches_filter(call: &CallRecord, filter: &CallFilter) -> bool {
    filter.call_id.map_or(true, |id| call.id == id)
        && filter
            .driver_id
            .as_deref()
            .map_or(true, |d| call.driver_id == d)
        && (!filter.active_only || !call.status.is_terminal())
        && filter
            .updated_before
            .map_or(true, |before| call.updated_at < before)
}

#[async_trait]
impl CallSessionStore for MemoryStore {
    async fn find_call_by_provider_id(
        &self,
        provider: ProviderKind,
        provider_call_id: &str,
    ) -> Result<Option<CallRecord>, CallError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .calls
            .values()
            .find(|c| c.provider == provider && c.provider_call_id == provider_call_id)
            .cloned())
    }

    async fn call(&self, id: Uuid) -> Result<Option<CallRecord>, CallError> {
        Ok(self.inner.lock().await.calls.get(&id).cloned())
    }

    async fn create_call(&self, call: NewCall) -> Result<CallRecord, CallError> {
        let mut inner = self.inner.lock().await;
        let duplicate = inner
            .calls
            .values()
            .any(|c| c.provider == call.provider && c.provider_call_id == call.provider_call_id);
        if duplicate {
            return Err(CallError::Validation(format!(
                "call {} is already registered for {}",
                call.provider_call_id, call.provider
            )));
        }
        let record = CallRecord::new(call, Utc::now());
        inner.calls.insert(record.id, record.clone());
        Ok(record)
    }

    async fn update_call(&self, id: Uuid, update: CallUpdate) -> Result<CallRecord, CallError> {
        let mut inner = self.inner.lock().await;
        let record = inner
            .calls
            .get_mut(&id)
            .ok_or_else(|| CallError::NotFound(format!("call {id}")))?;
        record.apply(update, Utc::now());
        Ok(record.clone())
    }

    async fn list_calls(&self, filter: &CallFilter) -> Result<Vec<CallRecord>, CallError> {
        let inner = self.inner.lock().await;
        let mut calls: Vec<CallRecord> = inner
            .calls
            .values()
            .filter(|c| matches_filter(c, filter))
            .cloned()
            .collect();
        calls.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        if filter.limit > 0 {
            calls.truncate(filter.limit);
        }
        Ok(calls)
    }

    async fn append_turn(
        &self,
        call_id: Uuid,
        expected_len: usize,
        turn: ConversationTurn,
    ) -> Result<bool, CallError> {
        let mut inner = self.inner.lock().await;
        if !inner.calls.contains_key(&call_id) {
            return Err(CallError::NotFound(format!("call {call_id}")));
        }
        let turns = inner.turns.entry(call_id).or_default();
        if turns.len() != expected_len {
            return Ok(false);
        }
        turns.push(turn);
        Ok(true)
    }

    async fn turns(&self, call_id: Uuid) -> Result<Vec<ConversationTurn>, CallError> {
        Ok(self
            .inner
            .lock()
            .await
            .turns
            .get(&call_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn find_due_scheduled_calls(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ScheduledCall>, CallError> {
        let inner = self.inner.lock().await;
        let mut due: Vec<ScheduledCall> = inner
            .scheduled
            .values()
            .filter(|s| s.status == ScheduledCallStatus::Pending && s.scheduled_at <= now)
            .cloned()
            .collect();
        due.sort_by_key(|s| s.scheduled_at);
        due.truncate(limit);
        Ok(due)
    }

    async fn scheduled_call(&self, id: Uuid) -> Result<Option<ScheduledCall>, CallError> {
        Ok(self.inner.lock().await.scheduled.get(&id).cloned())
    }

    async fn create_scheduled_call(&self, call: ScheduledCall) -> Result<ScheduledCall, CallError> {
        self.inner
            .lock()
            .await
            .scheduled
            .insert(call.id, call.clone());
        Ok(call)
    }

    async fn update_scheduled_call(
        &self,
        id: Uuid,
        update: ScheduledCallUpdate,
    ) -> Result<ScheduledCall, CallError> {
        let mut inner = self.inner.lock().await;
        let scheduled = inner
            .scheduled
            .get_mut(&id)
            .ok_or_else(|| CallError::NotFound(format!("scheduled call {id}")))?;
        scheduled.apply(update);
        Ok(scheduled.clone())
    }

    async fn update_driver_status(&self, driver_id: &str, status: DriverStatus) -> Result<(), CallError> {
        let mut inner = self.inner.lock().await;
        let driver = inner
            .drivers
            .get_mut(driver_id)
            .ok_or_else(|| CallError::NotFound(format!("driver {driver_id}")))?;
        driver.status = status;
        Ok(())
    }
}

#[async_trait]
impl Directory for MemoryStore {
    async fn driver(&self, id: &str) -> Result<Option<Driver>, CallError> {
        Ok(self.inner.lock().await.drivers.get(id).cloned())
    }

    async fn agent(&self, id: &str) -> Result<Option<Agent>, CallError> {
        Ok(self.inner.lock().await.agents.get(id).cloned())
    }
}
