//! Item state as seen at a given instant.

use serde::{Deserialize, Serialize};

/// Item state.
///
/// State transitions:
/// - Available -> Leased (claim succeeds)
/// - Leased -> Available (release)
/// - Leased -> LeaseExpired (time passes without release or delete)
/// - LeaseExpired -> Leased (another claim succeeds)
/// - any -> deleted (delete with a valid token, or queue wipe; not a state, the item is gone)
///
/// The state is never stored. It is derived from the lease and the clock, so
/// a crashed consumer's items become claimable without anyone touching them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemState {
    /// No lease, never claimed or explicitly released.
    Available,

    /// Claimed, lease still running.
    Leased,

    /// Claimed, but the lease ran out.
    LeaseExpired,
}

impl ItemState {
    /// Can a consumer claim the item right now?
    pub fn is_claimable(self) -> bool {
        matches!(self, ItemState::Available | ItemState::LeaseExpired)
    }
}
