use std::collections::HashMap;
use std::time::Duration;

use callforge_orchestrator::EngineSettings;
use callforge_scheduler::SchedulerConfig;

/// CallForge server configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP server bind address
    pub bind_address: String,
    /// HTTP server port
    pub port: u16,
    /// SQLite database path
    pub db_path: String,
    pub log_dir: String,
    /// Log level, overridden by `RUST_LOG`
    pub log_level: String,
    /// Base URL providers use to reach the webhook endpoints
    pub public_url: String,
    pub scheduler_interval: Duration,
    pub scheduler_batch: usize,
    pub status_sync_interval: Duration,
    pub stale_after: Duration,
    pub language: String,
    pub voice: String,
    pub exchange_cap: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 8080,
            db_path: "callforge.db".to_string(),
            log_dir: "logs".to_string(),
            log_level: "info".to_string(),
            public_url: "http://localhost:8080".to_string(),
            scheduler_interval: Duration::from_secs(60),
            scheduler_batch: 10,
            status_sync_interval: Duration::from_secs(300),
            stale_after: Duration::from_secs(600),
            language: "hi-IN".to_string(),
            voice: "alice".to_string(),
            exchange_cap: 5,
        }
    }
}

impl Config {
    /// Load configuration from environment variables with sensible defaults.
    pub fn from_env() -> Self {
        Self::from_vars(&std::env::vars().collect())
    }

    pub fn from_vars(vars: &HashMap<String, String>) -> Self {
        let defaults = Self::default();
        let text = |key: &str, default: String| {
            vars.get(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .unwrap_or(default)
        };
        let secs = |key: &str, default: Duration| {
            vars.get(key)
                .and_then(|v| v.trim().parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(default)
        };
        let count = |key: &str, default: usize| {
            vars.get(key)
                .and_then(|v| v.trim().parse().ok())
                .filter(|n: &usize| *n > 0)
                .unwrap_or(default)
        };

        Self {
            bind_address: text("CALLFORGE_BIND", defaults.bind_address),
            port: vars
                .get("CALLFORGE_PORT")
                .and_then(|p| p.trim().parse().ok())
                .unwrap_or(defaults.port),
            db_path: text("CALLFORGE_DB", defaults.db_path),
            log_dir: text("CALLFORGE_LOG_DIR", defaults.log_dir),
            log_level: text("RUST_LOG", defaults.log_level),
            public_url: text("CALLFORGE_PUBLIC_URL", defaults.public_url)
                .trim_end_matches('/')
                .to_string(),
            scheduler_interval: secs("CALLFORGE_SCHEDULER_INTERVAL_SECS", defaults.scheduler_interval),
            scheduler_batch: count("CALLFORGE_SCHEDULER_BATCH", defaults.scheduler_batch),
            status_sync_interval: secs("CALLFORGE_STATUS_SYNC_SECS", defaults.status_sync_interval),
            stale_after: secs("CALLFORGE_STALE_AFTER_SECS", defaults.stale_after),
            language: text("CALLFORGE_LANGUAGE", defaults.language),
            voice: text("CALLFORGE_VOICE", defaults.voice),
            exchange_cap: count("CALLFORGE_EXCHANGE_CAP", defaults.exchange_cap),
        }
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            public_url: self.public_url.clone(),
            language: self.language.clone(),
            voice: self.voice.clone(),
            exchange_cap: self.exchange_cap,
            stale_after: self.stale_after,
        }
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            tick_interval: self.scheduler_interval,
            batch_size: self.scheduler_batch,
            sync_interval: self.status_sync_interval,
            stale_after: self.stale_after,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_and_overrides() {
        let config = Config::from_vars(&HashMap::new());
        assert_eq!(config.port, 8080);
        assert_eq!(config.scheduler_batch, 10);
        assert_eq!(config.status_sync_interval, Duration::from_secs(300));

        let vars: HashMap<String, String> = [
            ("CALLFORGE_PORT", "9090"),
            ("CALLFORGE_PUBLIC_URL", "https://calls.example.com/"),
            ("CALLFORGE_SCHEDULER_BATCH", "0"),
            ("CALLFORGE_EXCHANGE_CAP", "3"),
            ("CALLFORGE_STALE_AFTER_SECS", "30"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        let config = Config::from_vars(&vars);
        assert_eq!(config.port, 9090);
        assert_eq!(config.public_url, "https://calls.example.com");
        // Zero is not a usable batch size.
        assert_eq!(config.scheduler_batch, 10);
        assert_eq!(config.engine_settings().exchange_cap, 3);
        assert_eq!(config.scheduler_config().stale_after, Duration::from_secs(30));
    }
}
