pub mod recurrence;
pub mod scheduler;
pub mod status_sync;

pub use scheduler::{CallScheduler, SchedulerConfig};
pub use status_sync::StatusSync;
