use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::status::CallStatus;

/// Every telephony or voice-AI backend the engine knows how to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Exotel,
    Knowlarity,
    Ozonetel,
    Plivo,
    Tata,
    Custom,
    Bland,
    ElevenLabs,
    Bolna,
    Vapi,
}

impl ProviderKind {
    /// Configuration precedence: the first fully configured provider becomes the default.
    pub const PRECEDENCE: [ProviderKind; 10] = [
        ProviderKind::Exotel,
        ProviderKind::Knowlarity,
        ProviderKind::Ozonetel,
        ProviderKind::Plivo,
        ProviderKind::Tata,
        ProviderKind::Custom,
        ProviderKind::Bland,
        ProviderKind::ElevenLabs,
        ProviderKind::Bolna,
        ProviderKind::Vapi,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Exotel => "exotel",
            Self::Knowlarity => "knowlarity",
            Self::Ozonetel => "ozonetel",
            Self::Plivo => "plivo",
            Self::Tata => "tata",
            Self::Custom => "custom",
            Self::Bland => "bland",
            Self::ElevenLabs => "elevenlabs",
            Self::Bolna => "bolna",
            Self::Vapi => "vapi",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        Self::PRECEDENCE
            .iter()
            .copied()
            .find(|kind| kind.as_str() == lower)
            .ok_or_else(|| format!("unknown provider: {s}"))
    }
}

/// Monetary cost of a finished call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallCost {
    pub amount: f64,
    pub currency: String,
}

/// One outbound call attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallRecord {
    pub id: Uuid,
    pub provider: ProviderKind,
    /// The provider's own identifier. Sole join key for inbound webhooks.
    pub provider_call_id: String,
    pub driver_id: String,
    pub agent_id: Option<String>,
    pub status: CallStatus,
    /// Last provider status string seen, kept for diagnostics.
    pub raw_status: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_seconds: Option<u64>,
    pub transcript: Option<String>,
    pub summary: Option<String>,
    /// Structured answers extracted from the conversation.
    pub answers: Option<serde_json::Value>,
    pub recording_url: Option<String>,
    pub cost: Option<CallCost>,
    pub updated_at: DateTime<Utc>,
}

/// Fields needed to create a [`CallRecord`] once a provider accepts a dial request.
#[derive(Debug, Clone)]
pub struct NewCall {
    pub provider: ProviderKind,
    pub provider_call_id: String,
    pub driver_id: String,
    pub agent_id: Option<String>,
}

impl CallRecord {
    pub fn new(call: NewCall, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            provider: call.provider,
            provider_call_id: call.provider_call_id,
            driver_id: call.driver_id,
            agent_id: call.agent_id,
            status: CallStatus::Queued,
            raw_status: None,
            started_at: now,
            ended_at: None,
            duration_seconds: None,
            transcript: None,
            summary: None,
            answers: None,
            recording_url: None,
            cost: None,
            updated_at: now,
        }
    }

    /// Apply a partial update and report whether anything changed.
    ///
    /// Once the call is terminal the status is frozen and ancillary fields are
    /// only filled when still empty, so replayed events cannot rewrite history
    /// while late data (a recording URL arriving after hangup) still lands.
    pub fn apply(&mut self, update: CallUpdate, now: DateTime<Utc>) -> bool {
        let was_terminal = self.status.is_terminal();
        let mut changed = false;

        if let Some(next) = update.status {
            let resolved = self.status.advance(next);
            if resolved != self.status {
                self.status = resolved;
                changed = true;
            }
        }

        fn set<T: PartialEq>(slot: &mut Option<T>, value: Option<T>, fill_only: bool) -> bool {
            match value {
                Some(v) if slot.is_none() || (!fill_only && slot.as_ref() != Some(&v)) => {
                    *slot = Some(v);
                    true
                }
                _ => false,
            }
        }

        changed |= set(&mut self.raw_status, update.raw_status, was_terminal);
        changed |= set(&mut self.ended_at, update.ended_at, was_terminal);
        changed |= set(&mut self.duration_seconds, update.duration_seconds, was_terminal);
        changed |= set(&mut self.transcript, update.transcript, was_terminal);
        changed |= set(&mut self.summary, update.summary, was_terminal);
        changed |= set(&mut self.answers, update.answers, was_terminal);
        changed |= set(&mut self.recording_url, update.recording_url, was_terminal);
        changed |= set(&mut self.cost, update.cost, was_terminal);

        if changed {
            self.updated_at = now;
        }
        changed
    }
}

/// Partial update of a [`CallRecord`]. `None` leaves a field untouched.
#[derive(Debug, Clone, Default)]
pub struct CallUpdate {
    pub status: Option<CallStatus>,
    pub raw_status: Option<String>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_seconds: Option<u64>,
    pub transcript: Option<String>,
    pub summary: Option<String>,
    pub answers: Option<serde_json::Value>,
    pub recording_url: Option<String>,
    pub cost: Option<CallCost>,
}

impl CallUpdate {
    pub fn status(status: CallStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }
}

/// Filter for listing calls (live feed, status sync).
#[derive(Debug, Clone, Default)]
pub struct CallFilter {
    pub call_id: Option<Uuid>,
    pub driver_id: Option<String>,
    /// Only non-terminal calls.
    pub active_only: bool,
    /// Only calls not touched since this instant.
    pub updated_before: Option<DateTime<Utc>>,
    /// Maximum rows, most recently updated first. Zero means no limit.
    pub limit: usize,
}

/// Who spoke a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnRole {
    Agent,
    User,
}

impl TurnRole {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Agent => "Agent",
            Self::User => "User",
        }
    }
}

/// One utterance in a voice conversation. Append-only once stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: TurnRole,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    /// Set on the agent's last words; nothing is gathered after it.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub closing: bool,
    /// Delivery id of the webhook that carried a user utterance.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivery_id: Option<String>,
}

impl ConversationTurn {
    fn new(role: TurnRole, text: impl Into<String>, closing: bool) -> Self {
        Self {
            role,
            text: text.into(),
            timestamp: Utc::now(),
            closing,
            delivery_id: None,
        }
    }

    pub fn with_delivery(mut self, delivery_id: Option<&str>) -> Self {
        self.delivery_id = delivery_id.map(str::to_string);
        self
    }

    pub fn agent(text: impl Into<String>) -> Self {
        Self::new(TurnRole::Agent, text, false)
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(TurnRole::User, text, false)
    }

    /// A final agent turn that ends the conversation.
    pub fn closing(text: impl Into<String>) -> Self {
        Self::new(TurnRole::Agent, text, true)
    }
}

/// Render turns as `Role: text` lines.
pub fn format_transcript(turns: &[ConversationTurn]) -> String {
    turns
        .iter()
        .map(|t| format!("{}: {}", t.role.label(), t.text))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Recurrence unit for a scheduled call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recurrence {
    Daily,
    Weekly,
    Monthly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduledCallStatus {
    Pending,
    Queued,
    Completed,
    Failed,
}

impl ScheduledCallStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Queued => "queued",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

/// A deferred (optionally recurring) call request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledCall {
    pub id: Uuid,
    pub driver_id: String,
    pub agent_id: Option<String>,
    pub scheduled_at: DateTime<Utc>,
    pub timezone: String,
    pub recurring: Option<Recurrence>,
    pub max_retries: u32,
    pub retry_count: u32,
    pub status: ScheduledCallStatus,
    /// The call placed for this occurrence, once dispatched.
    pub call_id: Option<Uuid>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ScheduledCall {
    pub fn new(driver_id: impl Into<String>, scheduled_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            driver_id: driver_id.into(),
            agent_id: None,
            scheduled_at,
            timezone: "UTC".to_string(),
            recurring: None,
            max_retries: 3,
            retry_count: 0,
            status: ScheduledCallStatus::Pending,
            call_id: None,
            last_error: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    pub fn with_recurrence(mut self, recurrence: Recurrence) -> Self {
        self.recurring = Some(recurrence);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn apply(&mut self, update: ScheduledCallUpdate) {
        if let Some(status) = update.status {
            self.status = status;
        }
        if let Some(at) = update.scheduled_at {
            self.scheduled_at = at;
        }
        if let Some(count) = update.retry_count {
            self.retry_count = count;
        }
        if update.call_id.is_some() {
            self.call_id = update.call_id;
        }
        if update.last_error.is_some() {
            self.last_error = update.last_error;
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ScheduledCallUpdate {
    pub status: Option<ScheduledCallStatus>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub retry_count: Option<u32>,
    pub call_id: Option<Uuid>,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriverStatus {
    New,
    Calling,
    Completed,
    Failed,
    Contacted,
    Qualified,
    Disqualified,
}

impl DriverStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Calling => "calling",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Contacted => "contacted",
            Self::Qualified => "qualified",
            Self::Disqualified => "disqualified",
        }
    }
}

/// A person the engine calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Driver {
    pub id: String,
    pub name: String,
    pub phone: String,
    pub status: DriverStatus,
}

/// A question the agent asks during an interview.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    pub id: String,
    pub text: String,
}

/// Interview persona: what the agent is and what it asks, in order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    pub name: String,
    pub system_prompt: String,
    #[serde(default)]
    pub questions: Vec<Question>,
    #[serde(default)]
    pub first_message: Option<String>,
}

/// Call-initiation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallRequest {
    pub driver_id: String,
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub provider_override: Option<ProviderKind>,
}

/// Result of a successful call initiation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallHandle {
    pub call_id: Uuid,
    pub provider_call_id: String,
    pub provider: ProviderKind,
}
