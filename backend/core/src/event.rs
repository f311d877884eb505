use serde::{Deserialize, Serialize};

use crate::status::CallStatus;
use crate::types::{CallUpdate, ProviderKind};

/// A provider webhook translated into the engine's vocabulary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedEvent {
    pub provider: ProviderKind,
    pub provider_call_id: String,
    pub status: CallStatus,
    /// The status string as the provider sent it.
    pub raw_status: Option<String>,
    pub speech: Option<String>,
    pub dtmf: Option<String>,
    pub recording_url: Option<String>,
    pub duration_seconds: Option<u64>,
    /// Full transcript, sent by hosted voice-AI providers at the end of a call.
    pub transcript: Option<String>,
    pub summary: Option<String>,
    /// Provider identity of this particular delivery (event id, sequence or
    /// timestamp). Redeliveries of one event carry the same value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivery_id: Option<String>,
}

impl NormalizedEvent {
    pub fn new(provider: ProviderKind, provider_call_id: impl Into<String>, status: CallStatus) -> Self {
        Self {
            provider,
            provider_call_id: provider_call_id.into(),
            status,
            raw_status: None,
            speech: None,
            dtmf: None,
            recording_url: None,
            duration_seconds: None,
            transcript: None,
            summary: None,
            delivery_id: None,
        }
    }

    /// Status and ancillary fields carried by this event, as a record update.
    pub fn to_update(&self) -> CallUpdate {
        CallUpdate {
            status: Some(self.status),
            raw_status: self.raw_status.clone(),
            duration_seconds: self.duration_seconds,
            recording_url: self.recording_url.clone(),
            transcript: self.transcript.clone(),
            summary: self.summary.clone(),
            ..Default::default()
        }
    }
}

/// What a provider's status API knows about a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "status", rename_all = "snake_case")]
pub enum RemoteStatus {
    Known(CallStatus),
    /// The provider has no information (expired, never existed, or no status API).
    /// Callers leave local state unchanged.
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderCallDetails {
    pub provider: ProviderKind,
    pub provider_call_id: String,
    pub status: RemoteStatus,
    pub raw_status: Option<String>,
    pub duration_seconds: Option<u64>,
    pub recording_url: Option<String>,
    pub transcript: Option<String>,
    pub summary: Option<String>,
}

impl ProviderCallDetails {
    pub fn unknown(provider: ProviderKind, provider_call_id: impl Into<String>) -> Self {
        Self {
            provider,
            provider_call_id: provider_call_id.into(),
            status: RemoteStatus::Unknown,
            raw_status: None,
            duration_seconds: None,
            recording_url: None,
            transcript: None,
            summary: None,
        }
    }

    pub fn known(provider: ProviderKind, provider_call_id: impl Into<String>, status: CallStatus) -> Self {
        Self {
            status: RemoteStatus::Known(status),
            ..Self::unknown(provider, provider_call_id)
        }
    }

    /// Record update for this snapshot, or `None` for the unknown sentinel.
    pub fn to_update(&self) -> Option<CallUpdate> {
        match self.status {
            RemoteStatus::Unknown => None,
            RemoteStatus::Known(status) => Some(CallUpdate {
                status: Some(status),
                raw_status: self.raw_status.clone(),
                duration_seconds: self.duration_seconds,
                recording_url: self.recording_url.clone(),
                transcript: self.transcript.clone(),
                summary: self.summary.clone(),
                ..Default::default()
            }),
        }
    }
}
