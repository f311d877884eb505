use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Canonical lifecycle status of an outbound call.
///
/// Every provider vocabulary is folded onto these nine values. Statuses only
/// move forward: a call never returns to an earlier non-terminal status, and a
/// terminal status is final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    Pending,
    Queued,
    Ringing,
    InProgress,
    Completed,
    Failed,
    NoAnswer,
    Busy,
    Cancelled,
}

impl CallStatus {
    pub const ALL: [CallStatus; 9] = [
        CallStatus::Pending,
        CallStatus::Queued,
        CallStatus::Ringing,
        CallStatus::InProgress,
        CallStatus::Completed,
        CallStatus::Failed,
        CallStatus::NoAnswer,
        CallStatus::Busy,
        CallStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Queued => "queued",
            Self::Ringing => "ringing",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::NoAnswer => "no_answer",
            Self::Busy => "busy",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::NoAnswer | Self::Busy | Self::Cancelled
        )
    }

    /// Position in the forward-only lifecycle. All terminal statuses share the top rank.
    pub fn rank(&self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Queued => 1,
            Self::Ringing => 2,
            Self::InProgress => 3,
            _ => 4,
        }
    }

    /// Resolve the status a call should hold after observing `next`.
    ///
    /// Terminal statuses are sticky and non-terminal statuses never regress.
    pub fn advance(self, next: CallStatus) -> CallStatus {
        if self.is_terminal() || next.rank() < self.rank() {
            self
        } else {
            next
        }
    }

    /// Map a provider's native status string onto the canonical enum.
    ///
    /// Returns `None` for vocabulary nobody has taught us yet; see [`CallStatus::from_provider_or_failed`].
    pub fn from_provider(raw: &str) -> Option<CallStatus> {
        let key: String = raw
            .trim()
            .to_ascii_lowercase()
            .chars()
            .map(|c| if c == '-' || c == ' ' { '_' } else { c })
            .collect();

        let status = match key.as_str() {
            "pending" | "new" | "created" => Self::Pending,
            "queued" | "initiated" | "scheduled" | "request_received" | "accepted" => Self::Queued,
            "ringing" | "dialing" | "calling" | "call_ringing" => Self::Ringing,
            "in_progress" | "inprogress" | "answer" | "answered" | "active" | "connected" | "ongoing"
            | "started" | "live" | "call_answered" | "in_call" | "processing" => Self::InProgress,
            "completed" | "complete" | "done" | "ended" | "finished" | "hangup" | "call_ended"
            | "call_completed" | "success" | "disconnected" | "end_of_call_report" => Self::Completed,
            "failed" | "error" | "call_failed" | "rejected" | "unreachable" => Self::Failed,
            "no_answer" | "noanswer" | "not_answered" | "missed" | "unanswered"
            | "customer_did_not_answer" => Self::NoAnswer,
            "busy" | "user_busy" | "customer_busy" => Self::Busy,
            "cancelled" | "canceled" | "aborted" => Self::Cancelled,
            _ => return None,
        };
        Some(status)
    }

    /// Like [`CallStatus::from_provider`] but folds unknown vocabulary into `Failed`.
    /// Callers keep the raw string alongside for diagnostics.
    pub fn from_provider_or_failed(raw: &str) -> CallStatus {
        match Self::from_provider(raw) {
            Some(status) => status,
            None => {
                tracing::warn!(raw_status = %raw, "Unmapped provider status, treating as failed");
                Self::Failed
            }
        }
    }
}

impl fmt::Display for CallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CallStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown call status: {s}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_status_is_sticky() {
        assert_eq!(CallStatus::Completed.advance(CallStatus::Ringing), CallStatus::Completed);
        assert_eq!(CallStatus::Busy.advance(CallStatus::Completed), CallStatus::Busy);
    }

    #[test]
    fn non_terminal_status_never_regresses() {
        assert_eq!(CallStatus::InProgress.advance(CallStatus::Ringing), CallStatus::InProgress);
        assert_eq!(CallStatus::Queued.advance(CallStatus::Ringing), CallStatus::Ringing);
        assert_eq!(CallStatus::Ringing.advance(CallStatus::NoAnswer), CallStatus::NoAnswer);
    }

    #[test]
    fn provider_vocabulary_maps_onto_canonical_values() {
        assert_eq!(CallStatus::from_provider("in-progress"), Some(CallStatus::InProgress));
        assert_eq!(CallStatus::from_provider("No Answer"), Some(CallStatus::NoAnswer));
        assert_eq!(CallStatus::from_provider("canceled"), Some(CallStatus::Cancelled));
        assert_eq!(CallStatus::from_provider("done"), Some(CallStatus::Completed));
        assert_eq!(CallStatus::from_provider("CALL_ANSWERED"), Some(CallStatus::InProgress));
        assert_eq!(CallStatus::from_provider("end-of-call-report"), Some(CallStatus::Completed));
        assert_eq!(CallStatus::from_provider("customer-did-not-answer"), Some(CallStatus::NoAnswer));
    }

    #[test]
    fn unknown_vocabulary_folds_into_failed() {
        assert_eq!(CallStatus::from_provider("teleported"), None);
        assert_eq!(CallStatus::from_provider_or_failed("teleported"), CallStatus::Failed);
    }

    #[test]
    fn round_trips_through_strings() {
        for status in CallStatus::ALL {
            assert_eq!(status.as_str().parse::<CallStatus>().unwrap(), status);
        }
    }
}
