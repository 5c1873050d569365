//! ItemStore port - durable storage of queue items.
//!
//! The store owns every piece of shared mutable state, so it is also where
//! per-item atomicity lives: each lease transition is a single
//! compare-and-set against the stored lease. Nothing here spans more than
//! one item except `clear`, which must be atomic as a whole.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{ItemId, LeaseToken};
use crate::error::Result;
use crate::queue::{Lease, QueueItem, QueueName};

/// Result of a lease compare-and-set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseSet {
    /// Lease installed; `attempts` is the claim count including this one.
    Acquired { attempts: u32 },
    /// Someone else holds an unexpired lease.
    Held,
    /// No such item.
    Missing,
}

/// Result of deleting an item on behalf of a lease holder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeldDelete {
    Deleted,
    Missing,
    /// The token matches but the lease has lapsed.
    Expired,
    /// No lease, or a lease under a different token.
    TokenMismatch,
}

#[async_trait]
pub trait ItemStore: Send + Sync {
    /// Append a new item and return its id.
    async fn put(&self, payload: serde_json::Value, created_at: DateTime<Utc>) -> Result<ItemId>;

    /// Fetch one item, `QueueError::NotFound` if absent.
    async fn get(&self, id: ItemId) -> Result<QueueItem>;

    /// Remove an item regardless of lease state. `false` if it was not there.
    async fn delete(&self, id: ItemId) -> Result<bool>;

    /// Items currently stored, leased or not.
    async fn count(&self) -> Result<u64>;

    /// Up to `limit` items with id greater than `after` that are not under an
    /// unexpired lease at `now`, in creation order.
    async fn scan_available(
        &self,
        after: Option<ItemId>,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<QueueItem>>;

    /// Remove every item atomically. Returns how many were removed.
    async fn clear(&self) -> Result<u64>;

    /// Install `lease` iff the item has no lease or its lease expired by `now`.
    async fn set_lease_if_available(
        &self,
        id: ItemId,
        lease: Lease,
        now: DateTime<Utc>,
    ) -> Result<LeaseSet>;

    /// Drop the lease iff `token` holds it at `now`.
    async fn clear_lease_if_held(
        &self,
        id: ItemId,
        token: LeaseToken,
        now: DateTime<Utc>,
    ) -> Result<bool>;

    /// Swap the lease for `replacement` iff `token` holds it at `now`.
    async fn replace_lease_if_held(
        &self,
        id: ItemId,
        token: LeaseToken,
        replacement: Lease,
        now: DateTime<Utc>,
    ) -> Result<bool>;

    /// Delete the item iff `token` holds its lease at `now`.
    async fn delete_if_held(
        &self,
        id: ItemId,
        token: LeaseToken,
        now: DateTime<Utc>,
    ) -> Result<HeldDelete>;

    /// Every stored item in creation order.
    async fn snapshot(&self) -> Result<Vec<QueueItem>>;
}

/// Opens the store behind a named queue.
///
/// Opening the same name twice must yield views of the same items.
pub trait StoreProvider: Send + Sync {
    fn open_store(&self, queue: &QueueName) -> Result<Arc<dyn ItemStore>>;
}
