use serde::Serialize;
use tokio::sync::oneshot;

/// Commands accepted by the scheduler component.
#[derive(Debug)]
pub enum Message {
    /// Run a scheduled-call pass now instead of waiting for the next tick.
    ProcessScheduled {
        reply: Option<oneshot::Sender<TickSummary>>,
    },
    /// Refresh stale in-flight calls from their providers now.
    SyncStatus {
        reply: Option<oneshot::Sender<SyncSummary>>,
    },
}

/// Outcome of one scheduler pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TickSummary {
    pub selected: usize,
    pub dispatched: usize,
    pub rescheduled: usize,
    pub failed: usize,
}

/// Outcome of one status-sync sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncSummary {
    pub checked: usize,
    pub updated: usize,
    pub errors: usize,
}
