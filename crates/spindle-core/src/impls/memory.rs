//! In-memory item store.
//!
//! Same contract as the SQLite store minus durability. Every operation takes
//! the state lock once, which makes each of them atomic (including `clear`).

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::domain::{ItemId, LeaseToken};
use crate::error::{QueueError, Result};
use crate::ports::{HeldDelete, ItemStore, LeaseSet, StoreProvider};
use crate::queue::{Lease, QueueItem, QueueName};

/// In-memory store state.
struct InMemoryState {
    /// All items, keyed (and therefore ordered) by id.
    items: BTreeMap<ItemId, QueueItem>,

    /// Next id to assign. Survives `clear` so ids are never reused.
    next_id: u64,
}

impl InMemoryState {
    fn new() -> Self {
        Self {
            items: BTreeMap::new(),
            next_id: 1,
        }
    }

    fn allocate_id(&mut self) -> ItemId {
        let id = ItemId::new(self.next_id);
        self.next_id += 1;
        id
    }
}

/// In-memory item store.
pub struct InMemoryItemStore {
    state: Mutex<InMemoryState>,
}

impl InMemoryItemStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(InMemoryState::new()),
        }
    }
}

impl Default for InMemoryItemStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ItemStore for InMemoryItemStore {
    async fn put(&self, payload: serde_json::Value, created_at: DateTime<Utc>) -> Result<ItemId> {
        let mut state = self.state.lock().await;
        let id = state.allocate_id();
        state.items.insert(id, QueueItem::new(id, payload, created_at));
        Ok(id)
    }

    async fn get(&self, id: ItemId) -> Result<QueueItem> {
        let state = self.state.lock().await;
        state.items.get(&id).cloned().ok_or(QueueError::NotFound(id))
    }

    async fn delete(&self, id: ItemId) -> Result<bool> {
        let mut state = self.state.lock().await;
        Ok(state.items.remove(&id).is_some())
    }

    async fn count(&self) -> Result<u64> {
        let state = self.state.lock().await;
        Ok(state.items.len() as u64)
    }

    async fn scan_available(
        &self,
        after: Option<ItemId>,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<QueueItem>> {
        let state = self.state.lock().await;
        let items = match after {
            Some(after) => state.items.range(ItemId::new(after.get().saturating_add(1))..),
            None => state.items.range(..),
        };
        Ok(items
            .map(|(_, item)| item)
            .filter(|item| item.is_available(now))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn clear(&self) -> Result<u64> {
        let mut state = self.state.lock().await;
        let removed = state.items.len() as u64;
        state.items.clear();
        Ok(removed)
    }

    async fn set_lease_if_available(
        &self,
        id: ItemId,
        lease: Lease,
        now: DateTime<Utc>,
    ) -> Result<LeaseSet> {
        let mut state = self.state.lock().await;
        let Some(item) = state.items.get_mut(&id) else {
            return Ok(LeaseSet::Missing);
        };
        if !item.is_available(now) {
            return Ok(LeaseSet::Held);
        }
        item.lease = Some(lease);
        item.attempts = item.attempts.saturating_add(1);
        Ok(LeaseSet::Acquired {
            attempts: item.attempts,
        })
    }

    async fn clear_lease_if_held(
        &self,
        id: ItemId,
        token: LeaseToken,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let mut state = self.state.lock().await;
        if let Some(item) = state.items.get_mut(&id)
            && item.lease.is_some_and(|lease| lease.is_held_by(token, now))
        {
            item.lease = None;
            return Ok(true);
        }
        Ok(false)
    }

    async fn replace_lease_if_held(
        &self,
        id: ItemId,
        token: LeaseToken,
        replacement: Lease,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let mut state = self.state.lock().await;
        if let Some(item) = state.items.get_mut(&id)
            && item.lease.is_some_and(|lease| lease.is_held_by(token, now))
        {
            item.lease = Some(replacement);
            return Ok(true);
        }
        Ok(false)
    }

    async fn delete_if_held(
        &self,
        id: ItemId,
        token: LeaseToken,
        now: DateTime<Utc>,
    ) -> Result<HeldDelete> {
        let mut state = self.state.lock().await;
        let Some(item) = state.items.get(&id) else {
            return Ok(HeldDelete::Missing);
        };
        let verdict = match item.lease {
            Some(lease) if lease.is_held_by(token, now) => HeldDelete::Deleted,
            Some(lease) if lease.token == token => HeldDelete::Expired,
            _ => HeldDelete::TokenMismatch,
        };
        if verdict == HeldDelete::Deleted {
            state.items.remove(&id);
        }
        Ok(verdict)
    }

    async fn snapshot(&self) -> Result<Vec<QueueItem>> {
        let state = self.state.lock().await;
        Ok(state.items.values().cloned().collect())
    }
}

/// Hands out one shared in-memory store per queue name.
#[derive(Default)]
pub struct InMemoryStoreProvider {
    stores: StdMutex<HashMap<QueueName, Arc<InMemoryItemStore>>>,
}

impl InMemoryStoreProvider {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StoreProvider for InMemoryStoreProvider {
    fn open_store(&self, queue: &QueueName) -> Result<Arc<dyn ItemStore>> {
        let mut stores = self
            .stores
            .lock()
            .map_err(|_| QueueError::StorageUnavailable("store registry poisoned".into()))?;
        let store = stores
            .entry(queue.clone())
            .or_insert_with(|| Arc::new(InMemoryItemStore::new()));
        Ok(Arc::clone(store) as Arc<dyn ItemStore>)
    }
}
