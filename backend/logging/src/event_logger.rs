//! Call Event Logger
//!
//! Lifecycle events of a call (dial, failover, turns, status changes) written as
//! structured records on the `call_events` target, which the file layer stores as NDJSON.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::redact::redact_sensitive_data;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CallEvent {
    Dialed {
        provider: String,
        to: String,
    },
    ProviderSwitched {
        from: String,
        to: String,
        error_msg: String,
    },
    TurnAppended {
        role: String,
        text: String,
    },
    StatusChanged {
        from: String,
        to: String,
    },
    Completed {
        duration_seconds: Option<u64>,
        cost: Option<f64>,
    },
    WebhookUnmatched {
        provider: String,
        provider_call_id: String,
    },
    Error {
        error_msg: String,
    },
}

#[derive(Debug, Serialize)]
pub struct EventLogEntry {
    pub call_ref: String,
    pub timestamp: DateTime<Utc>,
    pub event: CallEvent,
}

pub struct CallEventLogger;

impl CallEventLogger {
    /// Logs a call lifecycle event after scrubbing phone numbers and credentials.
    pub fn log_event(call_ref: &str, event: CallEvent) {
        let entry = EventLogEntry {
            call_ref: call_ref.into(),
            timestamp: Utc::now(),
            event: Self::redact(event),
        };

        let json = serde_json::to_string(&entry).unwrap_or_default();
        info!(target: "call_events", call_ref = %entry.call_ref, event = %json, "Call event");
    }

    fn redact(mut event: CallEvent) -> CallEvent {
        match &mut event {
            CallEvent::Dialed { to, .. } => *to = redact_sensitive_data(to),
            CallEvent::ProviderSwitched { error_msg, .. } | CallEvent::Error { error_msg } => {
                *error_msg = redact_sensitive_data(error_msg);
            }
            CallEvent::TurnAppended { text, .. } => *text = redact_sensitive_data(text),
            CallEvent::StatusChanged { .. }
            | CallEvent::Completed { .. }
            | CallEvent::WebhookUnmatched { .. } => {}
        }
        event
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dialed_number_is_redacted() {
        let event = CallEventLogger::redact(CallEvent::Dialed {
            provider: "exotel".into(),
            to: "+919876543210".into(),
        });
        match event {
            CallEvent::Dialed { to, .. } => assert_eq!(to, "[REDACTED_PHONE]"),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn events_serialize_with_type_tag() {
        let json = serde_json::to_value(CallEvent::StatusChanged {
            from: "queued".into(),
            to: "completed".into(),
        })
        .unwrap();
        assert_eq!(json["type"], "status_changed");
    }
}
