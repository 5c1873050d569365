//! Queue item record: payload + lease.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use super::ItemState;
use crate::domain::{ItemId, LeaseToken};

/// An active or lapsed claim on an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub token: LeaseToken,
    pub expires_at: DateTime<Utc>,
}

impl Lease {
    pub fn new(token: LeaseToken, expires_at: DateTime<Utc>) -> Self {
        Self { token, expires_at }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Does `token` hold this lease at `now`?
    pub fn is_held_by(&self, token: LeaseToken, now: DateTime<Utc>) -> bool {
        self.token == token && !self.is_expired(now)
    }
}

/// A stored queue item.
///
/// Design:
/// - `id` and `payload` never change after `put`.
/// - `lease` is the only mutable part (plus `attempts`, bumped on every claim).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: ItemId,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub lease: Option<Lease>,

    /// Number of successful claims so far.
    pub attempts: u32,
}

impl QueueItem {
    pub fn new(id: ItemId, payload: serde_json::Value, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            payload,
            created_at,
            lease: None,
            attempts: 0,
        }
    }

    pub fn lease_expiry(&self) -> Option<DateTime<Utc>> {
        self.lease.map(|lease| lease.expires_at)
    }

    pub fn state(&self, now: DateTime<Utc>) -> ItemState {
        match &self.lease {
            None => ItemState::Available,
            Some(lease) if lease.is_expired(now) => ItemState::LeaseExpired,
            Some(_) => ItemState::Leased,
        }
    }

    pub fn is_available(&self, now: DateTime<Utc>) -> bool {
        self.state(now).is_claimable()
    }
}

/// `now + duration`, saturating instead of panicking on absurd durations.
pub(crate) fn deadline(now: DateTime<Utc>, duration: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(duration)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap()
    }

    #[test]
    fn new_item_is_available() {
        let item = QueueItem::new(ItemId::new(1), serde_json::json!({}), t0());
        assert_eq!(item.state(t0()), ItemState::Available);
        assert_eq!(item.attempts, 0);
        assert!(item.lease_expiry().is_none());
    }

    #[test]
    fn lease_expires_exactly_at_deadline() {
        let mut item = QueueItem::new(ItemId::new(1), serde_json::json!({}), t0());
        let expires_at = deadline(t0(), Duration::from_secs(30));
        item.lease = Some(Lease::new(LeaseToken::generate(t0()), expires_at));

        assert_eq!(item.state(t0()), ItemState::Leased);
        assert_eq!(
            item.state(expires_at - TimeDelta::milliseconds(1)),
            ItemState::Leased
        );
        assert_eq!(item.state(expires_at), ItemState::LeaseExpired);
        assert!(item.is_available(expires_at));
    }

    #[test]
    fn only_the_current_token_holds_the_lease() {
        let token = LeaseToken::generate(t0());
        let lease = Lease::new(token, deadline(t0(), Duration::from_secs(5)));
        assert!(lease.is_held_by(token, t0()));
        assert!(!lease.is_held_by(LeaseToken::generate(t0()), t0()));
        assert!(!lease.is_held_by(token, deadline(t0(), Duration::from_secs(5))));
    }

    #[test]
    fn deadline_saturates() {
        assert_eq!(deadline(t0(), Duration::MAX), DateTime::<Utc>::MAX_UTC);
    }
}
