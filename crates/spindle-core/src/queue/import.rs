//! Producer flow: fetch from a producer, enqueue one item per entry.

use serde::Serialize;
use thiserror::Error;
use tracing::info;

use super::handle::QueueHandle;
use crate::error::QueueError;
use crate::ports::{Producer, ProducerError};

/// Queue size around one import, for operator feedback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EnqueueReport {
    pub before: u64,
    pub added: u64,
    pub after: u64,
}

#[derive(Debug, Error)]
pub enum ImportError {
    #[error(transparent)]
    Producer(#[from] ProducerError),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// Pull everything `producer` has and enqueue it on `queue`.
///
/// A producer returning an empty batch is reported as `ProducerError::NoData`.
/// `after` is re-counted rather than derived, so concurrent activity shows up.
pub async fn enqueue_from(
    producer: &dyn Producer,
    queue: &QueueHandle,
) -> Result<EnqueueReport, ImportError> {
    let before = queue.number_of_items().await?;
    let entries = producer.fetch().await?;
    if entries.is_empty() {
        return Err(ProducerError::NoData.into());
    }
    let ids = queue.create_items(entries).await?;
    let after = queue.number_of_items().await?;

    let report = EnqueueReport {
        before,
        added: ids.len() as u64,
        after,
    };
    info!(
        queue = %queue.name(),
        before = report.before,
        added = report.added,
        after = report.after,
        "enqueued producer batch"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::domain::FeedItem;
    use crate::queue::QueueRegistry;

    struct FixedProducer(Vec<FeedItem>);

    #[async_trait]
    impl Producer for FixedProducer {
        async fn fetch(&self) -> Result<Vec<FeedItem>, ProducerError> {
            Ok(self.0.clone())
        }
    }

    struct DownProducer;

    #[async_trait]
    impl Producer for DownProducer {
        async fn fetch(&self) -> Result<Vec<FeedItem>, ProducerError> {
            Err(ProducerError::Fetch("connection refused".into()))
        }
    }

    #[tokio::test]
    async fn reports_counts_around_the_batch() {
        let queue = QueueRegistry::in_memory().open("feed_import").unwrap();
        queue.create_item(FeedItem::new("old", "old")).await.unwrap();

        let producer = FixedProducer(vec![
            FeedItem::new("a", "1"),
            FeedItem::new("b", "2"),
            FeedItem::new("c", "3"),
        ]);
        let report = enqueue_from(&producer, &queue).await.unwrap();
        assert_eq!(
            report,
            EnqueueReport {
                before: 1,
                added: 3,
                after: 4
            }
        );
    }

    #[tokio::test]
    async fn empty_batch_is_no_data() {
        let queue = QueueRegistry::in_memory().open("feed_import").unwrap();
        let err = enqueue_from(&FixedProducer(Vec::new()), &queue)
            .await
            .unwrap_err();
        assert!(matches!(err, ImportError::Producer(ProducerError::NoData)));
        assert_eq!(err.to_string(), "no data found");
    }

    #[tokio::test]
    async fn producer_failure_enqueues_nothing() {
        let queue = QueueRegistry::in_memory().open("feed_import").unwrap();
        assert!(enqueue_from(&DownProducer, &queue).await.is_err());
        assert_eq!(queue.number_of_items().await.unwrap(), 0);
    }
}
