pub mod error;
pub mod event;
pub mod message;
pub mod status;
pub mod traits;
pub mod types;

pub use error::{is_retryable_message, CallError, ErrorCategory, ErrorReport, GenerationError};
pub use event::{NormalizedEvent, ProviderCallDetails, RemoteStatus};
pub use message::{Message, SyncSummary, TickSummary};
pub use status::CallStatus;
pub use traits::{CallOrchestrator, CallSessionStore, Component, Directory, LanguageModel};
pub use types::{
    format_transcript, Agent, CallCost, CallFilter, CallHandle, CallRecord, CallRequest,
    CallUpdate, ConversationTurn, Driver, DriverStatus, NewCall, ProviderKind, Question,
    Recurrence, ScheduledCall, ScheduledCallStatus, ScheduledCallUpdate, TurnRole,
};
