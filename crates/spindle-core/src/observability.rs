use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::queue::{ItemState, QueueItem};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    pub total: u64,
    pub available: u64,
    pub leased: u64,
    pub expired: u64,
}

impl QueueCounts {
    pub fn tally(items: &[QueueItem], now: DateTime<Utc>) -> Self {
        let mut counts = Self::default();
        for item in items {
            counts.total += 1;
            match item.state(now) {
                ItemState::Available => counts.available += 1,
                ItemState::Leased => counts.leased += 1,
                ItemState::LeaseExpired => counts.expired += 1,
            }
        }
        counts
    }
}

/// How a single claimed item ended up. Logged as the `outcome` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Sink accepted it; item deleted.
    Persisted,
    /// Payload failed validation.
    Invalid,
    /// Sink refused or was down; item released for retry.
    SinkFailed,
    /// Retry budget used up; item deleted without reaching the sink.
    DeadLettered,
    /// Our lease lapsed before we could settle the item.
    LeaseLost,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Persisted => "persisted",
            Outcome::Invalid => "invalid",
            Outcome::SinkFailed => "sink_failed",
            Outcome::DeadLettered => "dead_lettered",
            Outcome::LeaseLost => "lease_lost",
        }
    }
}

/// Aggregate result of one worker tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickReport {
    pub claimed: u64,
    pub persisted: u64,
    pub invalid: u64,
    pub sink_failures: u64,
    pub dead_lettered: u64,
    pub lost_leases: u64,
}

impl TickReport {
    pub fn record(&mut self, outcome: Outcome) {
        let slot = match outcome {
            Outcome::Persisted => &mut self.persisted,
            Outcome::Invalid => &mut self.invalid,
            Outcome::SinkFailed => &mut self.sink_failures,
            Outcome::DeadLettered => &mut self.dead_lettered,
            Outcome::LeaseLost => &mut self.lost_leases,
        };
        *slot += 1;
    }

    pub fn merge(&mut self, other: &TickReport) {
        self.claimed += other.claimed;
        self.persisted += other.persisted;
        self.invalid += other.invalid;
        self.sink_failures += other.sink_failures;
        self.dead_lettered += other.dead_lettered;
        self.lost_leases += other.lost_leases;
    }
}
