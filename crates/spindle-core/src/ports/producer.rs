//! Producer port - whoever decides what gets enqueued (a feed fetcher, a file).

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::FeedItem;

#[derive(Debug, Error)]
pub enum ProducerError {
    #[error("fetch failed: {0}")]
    Fetch(String),

    #[error("could not parse source: {0}")]
    Parse(String),

    /// The source was reachable but yielded nothing to enqueue.
    #[error("no data found")]
    NoData,
}

#[async_trait]
pub trait Producer: Send + Sync {
    async fn fetch(&self) -> Result<Vec<FeedItem>, ProducerError>;
}
