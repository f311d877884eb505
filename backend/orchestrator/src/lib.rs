//! Call orchestration: placing calls with retry and provider failover,
//! running self-hosted conversations, and reconciling call outcomes.

pub mod conversation;
pub mod cost;
pub mod engine;
pub mod failover;
pub mod prompt;
pub mod retry;

pub use conversation::{ConversationMachine, ConversationPhase, SpokenTurn};
pub use cost::{Rate, RateTable};
pub use engine::{CallEngine, CallSnapshot, EngineSettings, WebhookReply};
pub use failover::with_failover;
pub use retry::{retry_with_backoff, RetryPolicy};
