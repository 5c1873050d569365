//! Sink port - where a processed item ends up.
//!
//! The worker makes exactly one synchronous `persist` call per claimed item.
//! Delivery is at-least-once, so a sink that must not duplicate records
//! should key on the item id it is given.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{ItemId, RecordId, ValidFeedItem};

#[derive(Debug, Error)]
pub enum SinkError {
    /// The sink looked at the item and refused it.
    #[error("sink rejected item: {0}")]
    Rejected(String),

    /// The sink could not be reached or failed while writing.
    #[error("sink unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait Sink: Send + Sync {
    async fn persist(&self, item_id: ItemId, item: &ValidFeedItem) -> Result<RecordId, SinkError>;
}
