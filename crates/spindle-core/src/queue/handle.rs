//! Queue handle: the public façade over one named queue.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use super::lease::LeaseManager;
use super::record::QueueItem;
use super::registry::QueueName;
use super::scan::AvailableScan;
use super::state::ItemState;
use crate::domain::{ItemId, LeaseToken};
use crate::error::{QueueError, Result};
use crate::observability::QueueCounts;
use crate::ports::{Clock, HeldDelete, ItemStore};

/// An item the caller currently holds a lease on.
///
/// Hand it back to `release_item` or `delete_item`; the token inside is the
/// proof of ownership.
#[derive(Debug, Clone, PartialEq)]
pub struct ClaimedItem {
    pub id: ItemId,
    pub payload: serde_json::Value,
    pub lease_token: LeaseToken,
    pub lease_expires_at: DateTime<Utc>,

    /// Claim count including this one (1 on first delivery).
    pub attempts: u32,
}

impl ClaimedItem {
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }
}

/// One row of an administrative listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ListedItem {
    #[serde(flatten)]
    pub item: QueueItem,
    pub state: ItemState,
}

/// Cheap-to-clone handle on a named queue.
///
/// Obtained from `QueueRegistry::open`. Every clone talks to the same store.
#[derive(Clone)]
pub struct QueueHandle {
    name: QueueName,
    store: Arc<dyn ItemStore>,
    leases: LeaseManager,
    clock: Arc<dyn Clock>,
    default_lease: Duration,
    scan_page: usize,
}

impl QueueHandle {
    pub(crate) fn new(
        name: QueueName,
        store: Arc<dyn ItemStore>,
        clock: Arc<dyn Clock>,
        default_lease: Duration,
        scan_page: usize,
    ) -> Self {
        let leases = LeaseManager::new(Arc::clone(&store), Arc::clone(&clock));
        Self {
            name,
            store,
            leases,
            clock,
            default_lease,
            scan_page,
        }
    }

    pub fn name(&self) -> &QueueName {
        &self.name
    }

    pub fn default_lease(&self) -> Duration {
        self.default_lease
    }

    /// Enqueue one payload. The queue does not look inside it.
    pub async fn create_item<T: Serialize>(&self, payload: T) -> Result<ItemId> {
        let payload = serde_json::to_value(payload)?;
        let id = self.store.put(payload, self.clock.now()).await?;
        debug!(queue = %self.name, item_id = %id, "item created");
        Ok(id)
    }

    /// Enqueue several payloads in order. Each insert is atomic on its own;
    /// a storage failure part-way leaves the earlier items in place.
    pub async fn create_items<T, I>(&self, payloads: I) -> Result<Vec<ItemId>>
    where
        T: Serialize,
        I: IntoIterator<Item = T>,
    {
        let payloads = payloads
            .into_iter()
            .map(serde_json::to_value)
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let mut ids = Vec::with_capacity(payloads.len());
        for payload in payloads {
            ids.push(self.store.put(payload, self.clock.now()).await?);
        }
        debug!(queue = %self.name, created = ids.len(), "items created");
        Ok(ids)
    }

    pub async fn number_of_items(&self) -> Result<u64> {
        self.store.count().await
    }

    /// Claim the oldest claimable item under the default lease window.
    pub async fn claim_item(&self) -> Result<Option<ClaimedItem>> {
        self.claim_item_for(self.default_lease).await
    }

    /// Claim the oldest claimable item for `lease`.
    ///
    /// Candidates lost to a concurrent claimant (or deleted under our feet)
    /// are skipped. `None` means nothing is claimable right now; this never
    /// waits for an item to show up.
    pub async fn claim_item_for(&self, lease: Duration) -> Result<Option<ClaimedItem>> {
        let mut scan = self.scan();
        while let Some(candidate) = scan.next().await? {
            match self.leases.try_claim(candidate.id, lease).await {
                Ok(claim) => {
                    debug!(
                        queue = %self.name,
                        item_id = %candidate.id,
                        attempt = claim.attempts,
                        "item claimed"
                    );
                    return Ok(Some(ClaimedItem {
                        id: candidate.id,
                        payload: candidate.payload,
                        lease_token: claim.token,
                        lease_expires_at: claim.expires_at,
                        attempts: claim.attempts,
                    }));
                }
                Err(QueueError::AlreadyLeased(id) | QueueError::NotFound(id)) => {
                    debug!(queue = %self.name, item_id = %id, "lost claim race, trying next");
                }
                Err(err) => return Err(err),
            }
        }
        Ok(None)
    }

    /// Best-effort give-back. Returns `false` (not an error) when the lease
    /// had already lapsed or been released.
    pub async fn release_item(&self, item: &ClaimedItem) -> Result<bool> {
        let released = self.leases.release(item.id, item.lease_token).await?;
        if !released {
            debug!(queue = %self.name, item_id = %item.id, "release skipped, lease no longer held");
        }
        Ok(released)
    }

    /// Give the item back but keep it unclaimable for `delay`.
    pub async fn release_item_after(&self, item: &ClaimedItem, delay: Duration) -> Result<bool> {
        let released = self
            .leases
            .release_after(item.id, item.lease_token, delay)
            .await?;
        if !released {
            debug!(queue = %self.name, item_id = %item.id, "release skipped, lease no longer held");
        }
        Ok(released)
    }

    /// Remove a processed item.
    ///
    /// Only the holder of the current, unexpired lease may delete. A stale
    /// caller gets `LeaseExpired` or `InvalidToken` and the item stays put.
    pub async fn delete_item(&self, item: &ClaimedItem) -> Result<()> {
        let now = self.clock.now();
        match self.store.delete_if_held(item.id, item.lease_token, now).await? {
            HeldDelete::Deleted => {
                debug!(queue = %self.name, item_id = %item.id, "item deleted");
                Ok(())
            }
            HeldDelete::Expired => Err(QueueError::LeaseExpired(item.id)),
            HeldDelete::TokenMismatch => Err(QueueError::InvalidToken(item.id)),
            HeldDelete::Missing => Err(QueueError::NotFound(item.id)),
        }
    }

    /// Administrative wipe of every item and lease. Returns how many items
    /// were removed; wiping an empty queue is a no-op returning 0.
    pub async fn delete_queue(&self) -> Result<u64> {
        let removed = self.store.clear().await?;
        info!(queue = %self.name, removed, "queue deleted");
        Ok(removed)
    }

    pub async fn counts(&self) -> Result<QueueCounts> {
        let now = self.clock.now();
        let items = self.store.snapshot().await?;
        Ok(QueueCounts::tally(&items, now))
    }

    /// Every item with its current state, oldest first. Leases are left alone.
    pub async fn list_items(&self) -> Result<Vec<ListedItem>> {
        let now = self.clock.now();
        Ok(self
            .store
            .snapshot()
            .await?
            .into_iter()
            .map(|item| ListedItem {
                state: item.state(now),
                item,
            })
            .collect())
    }

    /// Fresh cursor over the items claimable right now.
    pub fn scan(&self) -> AvailableScan {
        AvailableScan::new(
            Arc::clone(&self.store),
            Arc::clone(&self.clock),
            self.scan_page,
        )
    }
}
