//! Log Redaction Layer
//!
//! Scrubs API keys, access tokens, and phone numbers from strings prior to logging.

use regex::Regex;
use std::sync::LazyLock;

// E.164 (+919876543210), bare 10-digit mobiles, and dashed/spaced variants.
static TELEPHONE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:\+\d{1,3}[-.\s]?)?\(?\d{3,5}\)?[-.\s]?\d{3}[-.\s]?\d{4}").unwrap()
});
static API_KEY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(sk-[a-zA-Z0-9]{32,})|((?i:bearer|basic)\s+[a-zA-Z0-9\-\._~+/]+=*)").unwrap()
});
static CREDENTIAL_PARAM_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)((?:api[_-]?key|api[_-]?token|auth[_-]?token|secret|password)["']?\s*[:=]\s*["']?)[^"'&\s,}]+"#)
        .unwrap()
});

/// Redacts sensitive patterns in a string.
pub fn redact_sensitive_data(input: &str) -> String {
    let mut redacted = TELEPHONE_RE.replace_all(input, "[REDACTED_PHONE]").to_string();
    redacted = API_KEY_RE.replace_all(&redacted, "[REDACTED_TOKEN]").to_string();
    redacted = CREDENTIAL_PARAM_RE
        .replace_all(&redacted, "${1}[REDACTED_TOKEN]")
        .to_string();
    redacted
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redaction() {
        let raw = "Sending to +1-555-123-4567 with Bearer eyJhbGciOiJIUzI1NiIsInR5cCI6IkpXVCJ9";
        let clean = redact_sensitive_data(raw);
        assert!(!clean.contains("+1-555-123-4567"));
        assert!(!clean.contains("Bearer eyJhbGciOiJIUzI1NiIsInR5cCI6IkpXVCJ9"));
    }

    #[test]
    fn redacts_indian_numbers_and_credential_params() {
        let raw = r#"dial +919876543210 from 9876543210 api_key=abc123 {"auth_token":"xyz"}"#;
        let clean = redact_sensitive_data(raw);
        assert!(!clean.contains("9876543210"));
        assert!(!clean.contains("abc123"));
        assert!(!clean.contains("xyz"));
        assert!(clean.contains("api_key=[REDACTED_TOKEN]"));
    }
}
