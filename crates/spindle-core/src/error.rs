use thiserror::Error;

use crate::domain::ItemId;

/// Errors surfaced by the queue engine and its stores.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The backing store could not be reached or failed mid-operation.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("queue item not found: {0}")]
    NotFound(ItemId),

    /// Another consumer holds an unexpired lease on the item.
    #[error("queue item {0} is already leased")]
    AlreadyLeased(ItemId),

    /// The caller's lease lapsed before it settled the item.
    #[error("lease on {0} has expired")]
    LeaseExpired(ItemId),

    /// The caller's token is not the one on the active lease.
    #[error("lease token does not match the active lease on {0}")]
    InvalidToken(ItemId),

    #[error("invalid queue name {name:?}: {reason}")]
    InvalidQueueName { name: String, reason: &'static str },

    #[error("payload codec: {0}")]
    Codec(#[from] serde_json::Error),

    /// A stored row could not be mapped back into a queue item.
    #[error("corrupt queue record: {0}")]
    Corrupt(String),
}

impl QueueError {
    /// The caller no longer owns the item; it should drop it and move on.
    pub fn is_stale_lease(&self) -> bool {
        matches!(
            self,
            QueueError::LeaseExpired(_) | QueueError::InvalidToken(_) | QueueError::NotFound(_)
        )
    }
}

impl From<rusqlite::Error> for QueueError {
    fn from(err: rusqlite::Error) -> Self {
        QueueError::StorageUnavailable(err.to_string())
    }
}

impl From<tokio::task::JoinError> for QueueError {
    fn from(err: tokio::task::JoinError) -> Self {
        QueueError::StorageUnavailable(format!("blocking store task failed: {err}"))
    }
}

pub type Result<T> = std::result::Result<T, QueueError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_lease_errors_are_classified() {
        let id = ItemId::new(7);
        assert!(QueueError::LeaseExpired(id).is_stale_lease());
        assert!(QueueError::InvalidToken(id).is_stale_lease());
        assert!(QueueError::NotFound(id).is_stale_lease());
        assert!(!QueueError::StorageUnavailable("down".into()).is_stale_lease());
        assert!(!QueueError::AlreadyLeased(id).is_stale_lease());
    }

    #[test]
    fn messages_name_the_item() {
        let msg = QueueError::LeaseExpired(ItemId::new(3)).to_string();
        assert!(msg.contains("item-3"));
    }
}
