//! Lease manager: single-claimant access per item for a bounded window.
//!
//! All the mutual exclusion lives in the store's compare-and-set primitives;
//! this type only mints tokens, computes deadlines and maps store verdicts to
//! queue errors.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use super::record::{Lease, QueueItem, deadline};
use crate::domain::{ItemId, LeaseToken};
use crate::error::{QueueError, Result};
use crate::ports::{Clock, ItemStore, LeaseSet};

/// A lease that was just granted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Claim {
    pub token: LeaseToken,
    pub expires_at: DateTime<Utc>,

    /// Claim count including this one.
    pub attempts: u32,
}

#[derive(Clone)]
pub struct LeaseManager {
    store: Arc<dyn ItemStore>,
    clock: Arc<dyn Clock>,
}

impl LeaseManager {
    pub fn new(store: Arc<dyn ItemStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Claim `id` for `duration`.
    ///
    /// Fails with `AlreadyLeased` while another lease is running and with
    /// `NotFound` if the item is gone. A fresh token is minted on every
    /// success, so tokens from lapsed leases stop working.
    pub async fn try_claim(&self, id: ItemId, duration: Duration) -> Result<Claim> {
        let now = self.clock.now();
        let lease = Lease::new(LeaseToken::generate(now), deadline(now, duration));
        match self.store.set_lease_if_available(id, lease, now).await? {
            LeaseSet::Acquired { attempts } => Ok(Claim {
                token: lease.token,
                expires_at: lease.expires_at,
                attempts,
            }),
            LeaseSet::Held => Err(QueueError::AlreadyLeased(id)),
            LeaseSet::Missing => Err(QueueError::NotFound(id)),
        }
    }

    /// Give the lease back. `false` if `token` no longer holds it.
    pub async fn release(&self, id: ItemId, token: LeaseToken) -> Result<bool> {
        let now = self.clock.now();
        self.store.clear_lease_if_held(id, token, now).await
    }

    /// Give the lease back, but keep the item unclaimable for `delay`.
    ///
    /// The running lease is swapped for one under a token nobody holds, which
    /// expires `delay` from now. A zero delay is a plain `release`.
    pub async fn release_after(&self, id: ItemId, token: LeaseToken, delay: Duration) -> Result<bool> {
        if delay.is_zero() {
            return self.release(id, token).await;
        }
        let now = self.clock.now();
        let backoff = Lease::new(LeaseToken::generate(now), deadline(now, delay));
        self.store.replace_lease_if_held(id, token, backoff, now).await
    }

    /// `true` iff the item carries a lease that ran out by `now`.
    pub fn is_expired(item: &QueueItem, now: DateTime<Utc>) -> bool {
        item.lease.is_some_and(|lease| lease.is_expired(now))
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use serde_json::json;

    use super::*;
    use crate::impls::InMemoryItemStore;
    use crate::ports::ManualClock;

    fn setup() -> (LeaseManager, Arc<InMemoryItemStore>, Arc<ManualClock>) {
        let store = Arc::new(InMemoryItemStore::new());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap(),
        ));
        let manager = LeaseManager::new(store.clone(), clock.clone());
        (manager, store, clock)
    }

    #[tokio::test]
    async fn second_claim_is_rejected_until_expiry() {
        let (manager, store, clock) = setup();
        let id = store.put(json!({}), clock.now()).await.unwrap();

        let first = manager.try_claim(id, Duration::from_secs(30)).await.unwrap();
        assert_eq!(first.attempts, 1);
        assert!(matches!(
            manager.try_claim(id, Duration::from_secs(30)).await,
            Err(QueueError::AlreadyLeased(_))
        ));

        clock.advance(Duration::from_secs(30));
        let second = manager.try_claim(id, Duration::from_secs(30)).await.unwrap();
        assert_ne!(first.token, second.token);
        assert_eq!(second.attempts, 2);

        // the first holder's token is dead now
        assert!(!manager.release(id, first.token).await.unwrap());
        assert!(manager.release(id, second.token).await.unwrap());
    }

    #[tokio::test]
    async fn claim_of_missing_item_is_not_found() {
        let (manager, _store, _clock) = setup();
        assert!(matches!(
            manager.try_claim(ItemId::new(5), Duration::from_secs(1)).await,
            Err(QueueError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn release_after_holds_the_item_back() {
        let (manager, store, clock) = setup();
        let id = store.put(json!({}), clock.now()).await.unwrap();
        let claim = manager.try_claim(id, Duration::from_secs(30)).await.unwrap();

        assert!(manager
            .release_after(id, claim.token, Duration::from_secs(60))
            .await
            .unwrap());
        // nobody can claim during the backoff, and the old token is spent
        assert!(matches!(
            manager.try_claim(id, Duration::from_secs(30)).await,
            Err(QueueError::AlreadyLeased(_))
        ));
        assert!(!manager.release(id, claim.token).await.unwrap());

        clock.advance(Duration::from_secs(60));
        assert!(manager.try_claim(id, Duration::from_secs(30)).await.is_ok());
    }

    #[tokio::test]
    async fn is_expired_is_a_pure_predicate() {
        let (manager, store, clock) = setup();
        let id = store.put(json!({}), clock.now()).await.unwrap();
        assert!(!LeaseManager::is_expired(&store.get(id).await.unwrap(), clock.now()));

        let claim = manager.try_claim(id, Duration::from_secs(10)).await.unwrap();
        let item = store.get(id).await.unwrap();
        assert!(!LeaseManager::is_expired(&item, clock.now()));
        assert!(LeaseManager::is_expired(&item, claim.expires_at));
    }
}
