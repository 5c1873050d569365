//! spindle-core
//!
//! Durable, lease-based work queue with at-least-once delivery, and the
//! worker that drains it into a sink.
//!
//! # Modules
//! - **domain**: identifiers and the feed payload (ids, feed)
//! - **ports**: seams to the outside (ItemStore, StoreProvider, Sink, Producer, Clock)
//! - **impls**: item stores (in-memory, SQLite)
//! - **queue**: records, leases, the `QueueHandle` façade and `QueueRegistry`
//! - **worker**: bounded ticks over a queue, and the periodic `WorkerGroup`
//! - **config**: TOML + environment configuration
//! - **observability**: counts and per-tick reports

pub mod config;
pub mod domain;
pub mod error;
pub mod impls;
pub mod observability;
pub mod ports;
pub mod queue;
pub mod worker;

pub use error::{QueueError, Result};
