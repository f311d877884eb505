//! Turn rendering in the two response dialects providers understand.

use html_escape::{encode_double_quoted_attribute, encode_text};
use serde_json::json;

use crate::provider::{ProviderResponse, TurnPrompt};

/// Seconds of silence before the provider gives up waiting for speech.
pub const SPEECH_TIMEOUT_SECS: u32 = 5;

/// TwiML-style markup: `<Say>` followed by `<Gather>` when listening, then `<Hangup/>`.
pub fn markup(turn: &TurnPrompt) -> ProviderResponse {
    let language = encode_double_quoted_attribute(&turn.language);
    let voice = encode_double_quoted_attribute(&turn.voice);
    let say = format!(
        r#"    <Say language="{language}" voice="{voice}">{}</Say>"#,
        encode_text(&turn.text)
    );

    let mut lines = vec![
        r#"<?xml version="1.0" encoding="UTF-8"?>"#.to_string(),
        "<Response>".to_string(),
        say,
    ];
    if turn.continue_listening {
        lines.push(format!(
            r#"    <Gather input="speech" action="{}" method="POST" language="{language}" speechTimeout="{SPEECH_TIMEOUT_SECS}"/>"#,
            encode_double_quoted_attribute(&turn.action_url)
        ));
    }
    lines.push("    <Hangup/>".to_string());
    lines.push("</Response>".to_string());

    ProviderResponse {
        content_type: "text/xml",
        body: lines.join("\n"),
    }
}

/// JSON action object: `speak`, then either gather speech to the webhook or hang up.
pub fn json_action(turn: &TurnPrompt) -> ProviderResponse {
    let next_action = if turn.continue_listening {
        json!({
            "type": "gather",
            "input": "speech",
            "webhook": turn.action_url,
            "timeout": SPEECH_TIMEOUT_SECS,
        })
    } else {
        json!({ "type": "hangup" })
    };

    let body = json!({
        "action": "speak",
        "text": turn.text,
        "language": turn.language,
        "voice": turn.voice,
        "next_action": next_action,
    });

    ProviderResponse {
        content_type: "application/json",
        body: body.to_string(),
    }
}

/// Plain acknowledgement for providers that run their own conversation.
pub fn ack() -> ProviderResponse {
    ProviderResponse {
        content_type: "application/json",
        body: json!({ "received": true }).to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn turn(continue_listening: bool) -> TurnPrompt {
        TurnPrompt {
            text: "Aap kahan hain? <fast> & safe".into(),
            continue_listening,
            language: "hi-IN".into(),
            voice: "alice".into(),
            action_url: "https://calls.example.com/webhooks/exotel?a=1&b=2".into(),
        }
    }

    #[test]
    fn markup_gathers_speech_when_listening() {
        let xml = markup(&turn(true)).body;
        assert!(xml.contains(r#"<Gather input="speech" action="https://calls.example.com/webhooks/exotel?a=1&amp;b=2""#));
        assert!(xml.contains("&lt;fast&gt; &amp; safe"));
        assert!(xml.trim_end().ends_with("</Response>"));
    }

    #[test]
    fn markup_hangs_up_without_gather_when_closing() {
        let xml = markup(&turn(false)).body;
        assert!(!xml.contains("<Gather"));
        assert!(xml.contains("<Hangup/>"));
    }

    #[test]
    fn json_action_points_back_at_webhook() {
        let body: serde_json::Value = serde_json::from_str(&json_action(&turn(true)).body).unwrap();
        assert_eq!(body["action"], "speak");
        assert_eq!(body["next_action"]["type"], "gather");
        assert_eq!(body["next_action"]["webhook"], "https://calls.example.com/webhooks/exotel?a=1&b=2");

        let closing: serde_json::Value = serde_json::from_str(&json_action(&turn(false)).body).unwrap();
        assert_eq!(closing["next_action"]["type"], "hangup");
    }
}
