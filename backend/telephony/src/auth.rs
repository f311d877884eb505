use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use callforge_core::CallError;

/// A bearer token and the instant after which it must not be reused.
#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    expires_at: Option<Instant>,
}

/// Per-adapter bearer-token cache with an explicit expiry check before reuse.
///
/// The lock is never held across the refresh call. Two concurrent refreshes
/// may both hit the auth endpoint; the later one wins.
pub struct TokenCache {
    skew: Duration,
    slot: Mutex<Option<CachedToken>>,
}

impl TokenCache {
    pub fn new(skew: Duration) -> Self {
        Self {
            skew,
            slot: Mutex::new(None),
        }
    }

    /// A cache holding a static token that never expires.
    pub fn with_static(token: impl Into<String>) -> Self {
        let cache = Self::new(Duration::ZERO);
        cache.store(token.into(), None);
        cache
    }

    fn cached(&self) -> Option<String> {
        let slot = self.slot.lock().ok()?;
        let token = slot.as_ref()?;
        match token.expires_at {
            Some(at) if Instant::now() + self.skew >= at => None,
            _ => Some(token.value.clone()),
        }
    }

    fn store(&self, value: String, ttl: Option<Duration>) {
        if let Ok(mut slot) = self.slot.lock() {
            *slot = Some(CachedToken {
                value,
                expires_at: ttl.map(|t| Instant::now() + t),
            });
        }
    }

    /// Return the cached token, or run `refresh` to obtain `(token, ttl)` and cache it.
    pub async fn get_or_refresh<F, Fut>(&self, refresh: F) -> Result<String, CallError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(String, Option<Duration>), CallError>>,
    {
        if let Some(token) = self.cached() {
            return Ok(token);
        }
        let (token, ttl) = refresh().await?;
        debug!(ttl_secs = ttl.map(|t| t.as_secs()), "Refreshed provider access token");
        self.store(token.clone(), ttl);
        Ok(token)
    }

    pub fn invalidate(&self) {
        if let Ok(mut slot) = self.slot.lock() {
            *slot = None;
        }
    }
}
