//! [`CallSessionStore`](callforge_core::CallSessionStore) implementations.

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
