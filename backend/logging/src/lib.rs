//! Telemetry and structured logging components for CallForge.
//!
//! Handles log redaction, JSON output generation, file rotation, and call lifecycle event logging.

pub mod event_logger;
pub mod logger;
pub mod redact;

pub use event_logger::{CallEvent, CallEventLogger, EventLogEntry};
pub use logger::init_logger;
pub use redact::redact_sensitive_data;
