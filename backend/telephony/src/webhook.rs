//! Field extraction for provider webhooks.
//!
//! Providers post form-encoded or JSON bodies and disagree on field names for
//! the same concept. Adapters describe their candidates with [`FieldNames`]
//! and [`normalize`] does the rest.

use serde_json::{Map, Value};

use callforge_core::{CallError, CallStatus, NormalizedEvent, ProviderKind};

/// A decoded webhook body as a flat-or-nested JSON object.
#[derive(Debug, Clone)]
pub struct WebhookFields {
    map: Map<String, Value>,
}

impl WebhookFields {
    /// Decode `body` as JSON or form data. Content type wins; otherwise the body is sniffed.
    pub fn parse(body: &[u8], content_type: Option<&str>) -> Result<Self, CallError> {
        let text = std::str::from_utf8(body)
            .map_err(|_| CallError::Validation("webhook body is not valid UTF-8".into()))?
            .trim();
        if text.is_empty() {
            return Err(CallError::Validation("empty webhook payload".into()));
        }

        let content_type = content_type.unwrap_or_default().to_ascii_lowercase();
        let is_json = if content_type.contains("json") {
            true
        } else if content_type.contains("x-www-form-urlencoded") {
            false
        } else {
            text.starts_with('{')
        };

        if is_json {
            match serde_json::from_str::<Value>(text) {
                Ok(Value::Object(map)) => Ok(Self { map }),
                Ok(_) => Err(CallError::Validation("webhook JSON body must be an object".into())),
                Err(e) => Err(CallError::Validation(format!("malformed webhook JSON: {e}"))),
            }
        } else {
            let map = url::form_urlencoded::parse(text.as_bytes())
                .map(|(k, v)| (k.into_owned(), Value::String(v.into_owned())))
                .collect();
            Ok(Self { map })
        }
    }

    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self { map }),
            _ => None,
        }
    }

    /// Look up a key, following `.` into nested objects (`Call.Sid`).
    pub fn get(&self, path: &str) -> Option<&Value> {
        if let Some(v) = self.map.get(path) {
            return Some(v);
        }
        let mut parts = path.split('.');
        let mut current = self.map.get(parts.next()?)?;
        for part in parts {
            current = current.as_object()?.get(part)?;
        }
        Some(current)
    }

    /// First candidate holding a non-empty scalar, rendered as a string.
    pub fn first_str(&self, candidates: &[&str]) -> Option<String> {
        candidates.iter().find_map(|key| match self.get(key)? {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        })
    }

    /// First candidate that parses as a non-negative number of seconds.
    pub fn first_u64(&self, candidates: &[&str]) -> Option<u64> {
        candidates.iter().find_map(|key| {
            let v = self.get(key)?;
            let n = match v {
                Value::Number(n) => n.as_f64()?,
                Value::String(s) => s.trim().parse::<f64>().ok()?,
                _ => return None,
            };
            (n >= 0.0).then(|| n.round() as u64)
        })
    }

    /// First candidate holding a transcript, either as text or as a list of turns.
    pub fn first_transcript(&self, candidates: &[&str]) -> Option<String> {
        candidates.iter().find_map(|key| transcript_text(self.get(key)?))
    }
}

/// Flatten a transcript value into `Role: text` lines.
///
/// Accepts a plain string or an array of objects carrying a speaker
/// (`role`/`user`/`speaker`) and an utterance (`text`/`message`/`content`).
pub fn transcript_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Array(items) => {
            let lines: Vec<String> = items
                .iter()
                .filter_map(|item| {
                    let obj = item.as_object()?;
                    let speaker = ["role", "user", "speaker"]
                        .iter()
                        .find_map(|k| obj.get(*k).and_then(Value::as_str))
                        .unwrap_or("agent");
                    let text = ["text", "message", "content"]
                        .iter()
                        .find_map(|k| obj.get(*k).and_then(Value::as_str))?;
                    let label = match speaker.to_ascii_lowercase().as_str() {
                        "user" | "human" | "customer" | "caller" => "User",
                        _ => "Agent",
                    };
                    Some(format!("{label}: {}", text.trim()))
                })
                .collect();
            (!lines.is_empty()).then(|| lines.join("\n"))
        }
        _ => None,
    }
}

/// Candidate field names for each concept, tried in order.
#[derive(Debug, Clone, Copy)]
pub struct FieldNames {
    pub call_id: &'static [&'static str],
    pub status: &'static [&'static str],
    pub speech: &'static [&'static str],
    pub dtmf: &'static [&'static str],
    /// Per-delivery identity: event id, sequence number or event timestamp.
    pub delivery: &'static [&'static str],
    pub recording_url: &'static [&'static str],
    pub duration: &'static [&'static str],
    pub transcript: &'static [&'static str],
    pub summary: &'static [&'static str],
}

/// Build a [`NormalizedEvent`] from decoded fields.
///
/// A missing status means "in progress" when the event carries caller input,
/// and "pending" otherwise. Unmapped status strings become `failed` with the raw value kept.
pub fn normalize(
    provider: ProviderKind,
    fields: &WebhookFields,
    names: &FieldNames,
) -> Result<NormalizedEvent, CallError> {
    let call_id = fields.first_str(names.call_id).ok_or_else(|| {
        CallError::Validation(format!("{provider} webhook is missing a call id"))
    })?;

    let raw_status = fields.first_str(names.status);
    let speech = fields.first_str(names.speech);
    let dtmf = fields.first_str(names.dtmf);

    let status = match &raw_status {
        Some(raw) => CallStatus::from_provider_or_failed(raw),
        None if speech.is_some() || dtmf.is_some() => CallStatus::InProgress,
        None => CallStatus::Pending,
    };

    let mut event = NormalizedEvent::new(provider, call_id, status);
    event.raw_status = raw_status;
    event.speech = speech;
    event.dtmf = dtmf;
    event.recording_url = fields.first_str(names.recording_url);
    event.duration_seconds = fields.first_u64(names.duration);
    event.transcript = fields.first_transcript(names.transcript);
    event.summary = fields.first_str(names.summary);
    event.delivery_id = fields.first_str(names.delivery);
    Ok(event)
}
