//! Calendar arithmetic for recurring calls and failed-dispatch backoff.
//!
//! Recurrence is computed in UTC from the occurrence's own scheduled time,
//! never from the time it happened to run.

use chrono::{DateTime, Duration, Months, Utc};

use callforge_core::Recurrence;

/// Upper bound on the wait before a failed scheduled call is retried.
pub const MAX_RETRY_DELAY_MINUTES: i64 = 60;

/// The occurrence after `at`. `None` only when the date overflows.
pub fn next_occurrence(at: DateTime<Utc>, recurrence: Recurrence) -> Option<DateTime<Utc>> {
    match recurrence {
        Recurrence::Daily => at.checked_add_signed(Duration::days(1)),
        Recurrence::Weekly => at.checked_add_signed(Duration::weeks(1)),
        // Clamps to the last day of shorter months (Jan 31 -> Feb 28/29).
        Recurrence::Monthly => at.checked_add_months(Months::new(1)),
    }
}

/// Wait before retry number `retry_count`: one minute doubled per retry, capped at an hour.
pub fn retry_delay(retry_count: u32) -> Duration {
    let minutes = 1i64.checked_shl(retry_count.min(30)).unwrap_or(i64::MAX);
    Duration::minutes(minutes.min(MAX_RETRY_DELAY_MINUTES))
}
