//! Item store implementations.
//!
//! - `memory`: in-process, for tests and single-process use
//! - `sqlite`: durable, shareable between processes

pub mod memory;
pub mod sqlite;

pub use self::memory::{InMemoryItemStore, InMemoryStoreProvider};
pub use self::sqlite::{SqliteItemStore, SqliteStoreProvider};
