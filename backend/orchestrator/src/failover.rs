use std::fmt::Display;
use std::future::Future;

use tracing::{info, warn};

use callforge_core::CallError;

/// Try each candidate in order until one succeeds.
///
/// `on_switch(from, to, &error)` fires each time a failure moves the attempt
/// to the next candidate. A fatal error (bad credentials, invalid input) stops
/// immediately, since another provider cannot fix it. When every candidate
/// fails the last error comes back inside [`CallError::AllProvidersFailed`].
pub async fn with_failover<K, T, F, Fut, S>(
    candidates: Vec<(K, F)>,
    mut on_switch: S,
) -> Result<(K, T), CallError>
where
    K: Copy + Display,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, CallError>>,
    S: FnMut(K, K, &CallError),
{
    let mut last: Option<(K, CallError)> = None;

    for (key, attempt) in candidates {
        if let Some((previous, error)) = &last {
            on_switch(*previous, key, error);
        }
        match attempt().await {
            Ok(value) => {
                if last.is_some() {
                    info!(provider = %key, "Failover succeeded");
                }
                return Ok((key, value));
            }
            Err(e) if e.category().is_fatal() => {
                warn!(provider = %key, error = %e, "Fatal provider error, not failing over");
                return Err(e);
            }
            Err(e) => {
                warn!(provider = %key, error = %e, "Provider attempt failed");
                last = Some((key, e));
            }
        }
    }

    match last {
        Some((key, source)) => Err(CallError::AllProvidersFailed {
            last_provider: key.to_string(),
            source: Box::new(source),
        }),
        None => Err(CallError::NoProviders),
    }
}
