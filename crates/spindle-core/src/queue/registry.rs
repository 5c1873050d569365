//! Queue registry: named queues instead of one magic global.

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::handle::QueueHandle;
use crate::error::{QueueError, Result};
use crate::impls::{InMemoryStoreProvider, SqliteStoreProvider};
use crate::ports::{Clock, StoreProvider, SystemClock};

/// Lease window used when the caller does not pass one.
pub const DEFAULT_LEASE: Duration = Duration::from_secs(30);

/// Items fetched per store round-trip while scanning for claimable items.
pub const DEFAULT_SCAN_PAGE: usize = 64;

const MAX_QUEUE_NAME_LEN: usize = 128;

/// Validated queue name: 1..=128 chars of `[A-Za-z0-9_.-]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct QueueName(String);

impl QueueName {
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let reason = if name.is_empty() {
            Some("must not be empty")
        } else if name.len() > MAX_QUEUE_NAME_LEN {
            Some("must be at most 128 characters")
        } else if !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
        {
            Some("may only contain ASCII letters, digits, '_', '.' and '-'")
        } else {
            None
        };
        match reason {
            Some(reason) => Err(QueueError::InvalidQueueName { name, reason }),
            None => Ok(Self(name)),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for QueueName {
    type Error = QueueError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<QueueName> for String {
    fn from(name: QueueName) -> Self {
        name.0
    }
}

/// Hands out `QueueHandle`s by name.
///
/// Handles opened with the same name (on the same registry, or on registries
/// over the same database file) see the same items.
#[derive(Clone)]
pub struct QueueRegistry {
    provider: Arc<dyn StoreProvider>,
    clock: Arc<dyn Clock>,
    default_lease: Duration,
    scan_page: usize,
}

impl QueueRegistry {
    pub fn new(provider: Arc<dyn StoreProvider>) -> Self {
        Self {
            provider,
            clock: Arc::new(SystemClock),
            default_lease: DEFAULT_LEASE,
            scan_page: DEFAULT_SCAN_PAGE,
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryStoreProvider::new()))
    }

    pub fn sqlite(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(Arc::new(SqliteStoreProvider::open(path)?)))
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_default_lease(mut self, lease: Duration) -> Self {
        self.default_lease = lease;
        self
    }

    pub fn with_scan_page(mut self, page: usize) -> Self {
        self.scan_page = page.max(1);
        self
    }

    pub fn open(&self, name: &str) -> Result<QueueHandle> {
        let name = QueueName::new(name)?;
        let store = self.provider.open_store(&name)?;
        Ok(QueueHandle::new(
            name,
            store,
            Arc::clone(&self.clock),
            self.default_lease,
            self.scan_page,
        ))
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use serde_json::json;

    use super::*;

    #[rstest]
    #[case("feed_import")]
    #[case("exqueue.import-2")]
    #[case("a")]
    fn accepts_valid_names(#[case] name: &str) {
        assert_eq!(QueueName::new(name).unwrap().as_str(), name);
    }

    #[rstest]
    #[case("")]
    #[case("has space")]
    #[case("slash/name")]
    #[case("ünïcode")]
    fn rejects_invalid_names(#[case] name: &str) {
        assert!(matches!(
            QueueName::new(name),
            Err(QueueError::InvalidQueueName { .. })
        ));
    }

    #[test]
    fn rejects_overlong_names() {
        assert!(QueueName::new("q".repeat(128)).is_ok());
        assert!(QueueName::new("q".repeat(129)).is_err());
    }

    #[test]
    fn queue_name_deserializes_with_validation() {
        let name: QueueName = serde_json::from_value(json!("feed_import")).unwrap();
        assert_eq!(name.to_string(), "feed_import");
        assert!(serde_json::from_value::<QueueName>(json!("bad name")).is_err());
    }

    #[tokio::test]
    async fn same_name_shares_items() {
        let registry = QueueRegistry::in_memory();
        let a = registry.open("feed_import").unwrap();
        let b = registry.open("feed_import").unwrap();
        let other = registry.open("other").unwrap();

        a.create_item(json!({"title": "t"})).await.unwrap();
        assert_eq!(b.number_of_items().await.unwrap(), 1);
        assert_eq!(other.number_of_items().await.unwrap(), 0);
    }
}
