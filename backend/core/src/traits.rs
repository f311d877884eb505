use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::{CallError, GenerationError};
use crate::message::Message;
use crate::types::{
    Agent, CallFilter, CallHandle, CallRecord, CallRequest, CallUpdate, ConversationTurn, Driver,
    DriverStatus, NewCall, ProviderKind, ScheduledCall, ScheduledCallUpdate,
};

/// Trait for long-running components (the scheduler).
///
/// Each component receives messages from its channel and runs in its own Tokio task.
#[async_trait]
pub trait Component: Send + Sync + 'static {
    /// Human-readable name of this component.
    fn name(&self) -> &str;

    /// Start the component's event loop, consuming from the given receiver.
    async fn start(&self, rx: mpsc::Receiver<Message>) -> Result<()>;
}

/// Persistence boundary for calls, turns, scheduled calls and driver state.
///
/// Implementations serialize writes per call id: `update_call` and
/// `append_turn` are atomic with respect to other writers of the same call.
#[async_trait]
pub trait CallSessionStore: Send + Sync {
    async fn find_call_by_provider_id(
        &self,
        provider: ProviderKind,
        provider_call_id: &str,
    ) -> Result<Option<CallRecord>, CallError>;

    async fn call(&self, id: Uuid) -> Result<Option<CallRecord>, CallError>;

    async fn create_call(&self, call: NewCall) -> Result<CallRecord, CallError>;

    /// Apply a partial update (see [`CallRecord::apply`]) and return the stored record.
    async fn update_call(&self, id: Uuid, update: CallUpdate) -> Result<CallRecord, CallError>;

    async fn list_calls(&self, filter: &CallFilter) -> Result<Vec<CallRecord>, CallError>;

    /// Append a turn only if the call currently has exactly `expected_len` turns.
    ///
    /// Returns `false` when another writer got there first; the caller reloads and re-derives.
    async fn append_turn(
        &self,
        call_id: Uuid,
        expected_len: usize,
        turn: ConversationTurn,
    ) -> Result<bool, CallError>;

    async fn turns(&self, call_id: Uuid) -> Result<Vec<ConversationTurn>, CallError>;

    /// Pending scheduled calls due at `now`, oldest first.
    async fn find_due_scheduled_calls(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ScheduledCall>, CallError>;

    async fn scheduled_call(&self, id: Uuid) -> Result<Option<ScheduledCall>, CallError>;

    async fn create_scheduled_call(&self, call: ScheduledCall) -> Result<ScheduledCall, CallError>;

    async fn update_scheduled_call(
        &self,
        id: Uuid,
        update: ScheduledCallUpdate,
    ) -> Result<ScheduledCall, CallError>;

    async fn update_driver_status(&self, driver_id: &str, status: DriverStatus) -> Result<(), CallError>;
}

/// Read-only lookups of drivers and agent personas.
#[async_trait]
pub trait Directory: Send + Sync {
    async fn driver(&self, id: &str) -> Result<Option<Driver>, CallError>;

    async fn agent(&self, id: &str) -> Result<Option<Agent>, CallError>;
}

/// Opaque text generator used to produce spoken turns, summaries and answer extraction.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Model name, for logs.
    fn name(&self) -> &str;

    async fn generate(&self, prompt: &str) -> Result<String, GenerationError>;
}

/// Entry points the scheduler needs from the orchestration engine.
#[async_trait]
pub trait CallOrchestrator: Send + Sync {
    async fn place_call(&self, request: CallRequest) -> Result<CallHandle, CallError>;

    /// Refresh a call from its provider's status API. Unknown remote state leaves it unchanged.
    async fn sync_call(&self, call: &CallRecord) -> Result<CallRecord, CallError>;
}
