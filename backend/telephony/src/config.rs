use std::collections::HashMap;
use std::time::Duration;

use tracing::warn;

use callforge_core::ProviderKind;

use crate::http::DEFAULT_TIMEOUT;

#[derive(Debug, Clone, PartialEq)]
pub struct ExotelSettings {
    pub api_key: String,
    pub api_token: String,
    pub phone_number: String,
    /// `api` or a regional cluster such as `api.in`.
    pub subdomain: String,
}

/// Key, token and caller number; the shape shared by Knowlarity and Ozonetel.
#[derive(Debug, Clone, PartialEq)]
pub struct CredentialSettings {
    pub api_key: String,
    pub api_token: String,
    pub phone_number: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlivoSettings {
    pub auth_id: String,
    pub auth_token: String,
    pub phone_number: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TataSettings {
    pub api_key: String,
    pub api_token: String,
    pub phone_number: String,
    /// Agent leg of click-to-call. Dialing fails without it.
    pub agent_number: Option<String>,
    pub call_timeout: Option<u32>,
    /// Login endpoint exchanging key/token for a short-lived access token.
    /// Without it the API token is used as a static bearer token.
    pub auth_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CustomSettings {
    pub api_key: String,
    pub api_secret: String,
    pub phone_number: String,
    pub api_url: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BlandSettings {
    pub api_key: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ElevenLabsSettings {
    pub api_key: String,
    pub agent_id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BolnaSettings {
    pub server_url: String,
    pub api_key: Option<String>,
    /// Reuse an existing Bolna agent instead of creating one per call.
    pub agent_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VapiSettings {
    /// Private API key, sent as a bearer token.
    pub api_key: String,
    /// Vapi-side id of the number calls are placed from.
    pub phone_number_id: String,
}

/// Credentials for one fully configured provider.
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderSettings {
    Exotel(ExotelSettings),
    Knowlarity(CredentialSettings),
    Ozonetel(CredentialSettings),
    Plivo(PlivoSettings),
    Tata(TataSettings),
    Custom(CustomSettings),
    Bland(BlandSettings),
    ElevenLabs(ElevenLabsSettings),
    Bolna(BolnaSettings),
    Vapi(VapiSettings),
}

impl ProviderSettings {
    pub fn kind(&self) -> ProviderKind {
        match self {
            Self::Exotel(_) => ProviderKind::Exotel,
            Self::Knowlarity(_) => ProviderKind::Knowlarity,
            Self::Ozonetel(_) => ProviderKind::Ozonetel,
            Self::Plivo(_) => ProviderKind::Plivo,
            Self::Tata(_) => ProviderKind::Tata,
            Self::Custom(_) => ProviderKind::Custom,
            Self::Bland(_) => ProviderKind::Bland,
            Self::ElevenLabs(_) => ProviderKind::ElevenLabs,
            Self::Bolna(_) => ProviderKind::Bolna,
            Self::Vapi(_) => ProviderKind::Vapi,
        }
    }
}

/// Provider configuration, resolved once at startup and immutable afterwards.
#[derive(Debug, Clone)]
pub struct TelephonyConfig {
    /// Fully configured providers in precedence order.
    pub providers: Vec<ProviderSettings>,
    /// Explicit default; must name a configured provider.
    pub preferred: Option<ProviderKind>,
    /// Prepended to numbers dialed without one.
    pub country_code: String,
    pub request_timeout: Duration,
}

impl Default for TelephonyConfig {
    fn default() -> Self {
        Self {
            providers: Vec::new(),
            preferred: None,
            country_code: "+91".to_string(),
            request_timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl TelephonyConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Self::from_vars(&std::env::vars().collect())
    }

    pub fn from_vars(vars: &HashMap<String, String>) -> Self {
        let get = |key: &str| {
            vars.get(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let mut providers = Vec::new();

        if let (Some(api_key), Some(api_token), Some(phone_number)) = (
            get("EXOTEL_API_KEY"),
            get("EXOTEL_API_TOKEN"),
            get("EXOTEL_PHONE_NUMBER"),
        ) {
            providers.push(ProviderSettings::Exotel(ExotelSettings {
                api_key,
                api_token,
                phone_number,
                subdomain: get("EXOTEL_SUBDOMAIN").unwrap_or_else(|| "api".to_string()),
            }));
        }

        if let (Some(api_key), Some(api_token), Some(phone_number)) = (
            get("KNOWLARITY_API_KEY"),
            get("KNOWLARITY_API_TOKEN"),
            get("KNOWLARITY_PHONE_NUMBER"),
        ) {
            providers.push(ProviderSettings::Knowlarity(CredentialSettings {
                api_key,
                api_token,
                phone_number,
            }));
        }

        if let (Some(api_key), Some(api_token), Some(phone_number)) = (
            get("OZONETEL_API_KEY"),
            get("OZONETEL_API_TOKEN"),
            get("OZONETEL_PHONE_NUMBER"),
        ) {
            providers.push(ProviderSettings::Ozonetel(CredentialSettings {
                api_key,
                api_token,
                phone_number,
            }));
        }

        if let (Some(auth_id), Some(auth_token), Some(phone_number)) = (
            get("PLIVO_AUTH_ID"),
            get("PLIVO_AUTH_TOKEN"),
            get("PLIVO_PHONE_NUMBER"),
        ) {
            providers.push(ProviderSettings::Plivo(PlivoSettings {
                auth_id,
                auth_token,
                phone_number,
            }));
        }

        if let (Some(api_key), Some(api_token), Some(phone_number)) = (
            get("TATA_API_KEY"),
            get("TATA_API_TOKEN"),
            get("TATA_PHONE_NUMBER"),
        ) {
            providers.push(ProviderSettings::Tata(TataSettings {
                api_key,
                api_token,
                phone_number,
                agent_number: get("TATA_AGENT_NUMBER"),
                call_timeout: get("TATA_CALL_TIMEOUT").and_then(|t| t.parse().ok()),
                auth_url: get("TATA_AUTH_URL"),
            }));
        }

        let custom_selected = get("TELEPHONY_PROVIDER")
            .map(|p| p.eq_ignore_ascii_case("custom"))
            .unwrap_or(false);
        if let (true, Some(api_key), Some(api_secret), Some(phone_number), Some(api_url)) = (
            custom_selected,
            get("TELEPHONY_API_KEY"),
            get("TELEPHONY_API_SECRET"),
            get("TELEPHONY_PHONE_NUMBER"),
            get("TELEPHONY_API_URL"),
        ) {
            providers.push(ProviderSettings::Custom(CustomSettings {
                api_key,
                api_secret,
                phone_number,
                api_url,
            }));
        }

        if let Some(api_key) = get("BLAND_API_KEY") {
            providers.push(ProviderSettings::Bland(BlandSettings { api_key }));
        }

        if let (Some(api_key), Some(agent_id)) = (get("ELEVENLABS_API_KEY"), get("ELEVENLABS_AGENT_ID")) {
            providers.push(ProviderSettings::ElevenLabs(ElevenLabsSettings { api_key, agent_id }));
        }

        if let Some(server_url) = get("BOLNA_SERVER_URL") {
            providers.push(ProviderSettings::Bolna(BolnaSettings {
                server_url: server_url.trim_end_matches('/').to_string(),
                api_key: get("BOLNA_API_KEY"),
                agent_id: get("BOLNA_AGENT_ID"),
            }));
        }

        if let (Some(api_key), Some(phone_number_id)) = (get("VAPI_PRIVATE_KEY"), get("VAPI_PHONE_NUMBER_ID")) {
            providers.push(ProviderSettings::Vapi(VapiSettings { api_key, phone_number_id }));
        }

        let preferred = get("CALLFORGE_DEFAULT_PROVIDER").and_then(|name| match name.parse() {
            Ok(kind) => Some(kind),
            Err(e) => {
                warn!(error = %e, "Ignoring CALLFORGE_DEFAULT_PROVIDER");
                None
            }
        });

        let defaults = Self::default();
        Self {
            providers,
            preferred,
            country_code: get("CALLFORGE_COUNTRY_CODE").unwrap_or(defaults.country_code),
            request_timeout: get("TELEPHONY_TIMEOUT_SECS")
                .and_then(|t| t.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.request_timeout),
        }
    }

    pub fn configured(&self) -> Vec<ProviderKind> {
        self.providers.iter().map(ProviderSettings::kind).collect()
    }

    /// The active provider: the explicit preference if it is configured, else
    /// the first fully configured provider in precedence order.
    pub fn default_provider(&self) -> Option<ProviderKind> {
        let configured = self.configured();
        match self.preferred {
            Some(kind) if configured.contains(&kind) => Some(kind),
            Some(kind) => {
                warn!(provider = %kind, "Preferred provider is not configured, using precedence order");
                configured.first().copied()
            }
            None => configured.first().copied(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn first_fully_configured_provider_wins() {
        let config = TelephonyConfig::from_vars(&vars(&[
            ("PLIVO_AUTH_ID", "MA123"),
            ("PLIVO_AUTH_TOKEN", "tok"),
            ("PLIVO_PHONE_NUMBER", "+918000000000"),
            // Exotel is missing its number, so it is not configured.
            ("EXOTEL_API_KEY", "key"),
            ("EXOTEL_API_TOKEN", "tok"),
            ("KNOWLARITY_API_KEY", "k"),
            ("KNOWLARITY_API_TOKEN", "t"),
            ("KNOWLARITY_PHONE_NUMBER", "+918000000001"),
        ]));

        assert_eq!(
            config.configured(),
            vec![ProviderKind::Knowlarity, ProviderKind::Plivo]
        );
        assert_eq!(config.default_provider(), Some(ProviderKind::Knowlarity));
    }

    #[test]
    fn explicit_preference_must_be_configured() {
        let mut pairs = vec![
            ("BLAND_API_KEY", "bk"),
            ("EXOTEL_API_KEY", "key"),
            ("EXOTEL_API_TOKEN", "tok"),
            ("EXOTEL_PHONE_NUMBER", "+918000000000"),
            ("CALLFORGE_DEFAULT_PROVIDER", "bland"),
        ];
        let config = TelephonyConfig::from_vars(&vars(&pairs));
        assert_eq!(config.default_provider(), Some(ProviderKind::Bland));

        pairs.retain(|(k, _)| *k != "BLAND_API_KEY");
        let config = TelephonyConfig::from_vars(&vars(&pairs));
        assert_eq!(config.default_provider(), Some(ProviderKind::Exotel));
    }

    #[test]
    fn vapi_needs_key_and_number_id() {
        let config = TelephonyConfig::from_vars(&vars(&[("VAPI_PRIVATE_KEY", "pk")]));
        assert!(config.providers.is_empty());

        let config = TelephonyConfig::from_vars(&vars(&[
            ("VAPI_PRIVATE_KEY", "pk"),
            ("VAPI_PHONE_NUMBER_ID", "pn-1"),
            ("BLAND_API_KEY", "bk"),
        ]));
        assert_eq!(config.configured(), vec![ProviderKind::Bland, ProviderKind::Vapi]);
        assert_eq!(
            config.providers[1],
            ProviderSettings::Vapi(VapiSettings {
                api_key: "pk".into(),
                phone_number_id: "pn-1".into(),
            })
        );
    }

    #[test]
    fn custom_provider_requires_explicit_selection() {
        let base = [
            ("TELEPHONY_API_KEY", "k"),
            ("TELEPHONY_API_SECRET", "s"),
            ("TELEPHONY_PHONE_NUMBER", "+918000000000"),
            ("TELEPHONY_API_URL", "https://pbx.example.com/dial"),
        ];
        assert!(TelephonyConfig::from_vars(&vars(&base)).providers.is_empty());

        let mut selected = base.to_vec();
        selected.push(("TELEPHONY_PROVIDER", "custom"));
        let config = TelephonyConfig::from_vars(&vars(&selected));
        assert_eq!(config.configured(), vec![ProviderKind::Custom]);
        assert_eq!(config.country_code, "+91");
    }
}
