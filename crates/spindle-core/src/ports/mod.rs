//! Ports - the seams to everything outside the queue engine.
//!
//! - `ItemStore` / `StoreProvider`: where items live (memory, SQLite)
//! - `Sink`: where processed items go
//! - `Producer`: where new items come from
//! - `Clock`: what time it is

pub mod clock;
pub mod item_store;
pub mod producer;
pub mod sink;

pub use self::clock::{Clock, ManualClock, SystemClock};
pub use self::item_store::{HeldDelete, ItemStore, LeaseSet, StoreProvider};
pub use self::producer::{Producer, ProducerError};
pub use self::sink::{Sink, SinkError};
