//! Domain model (IDs, lease tokens, feed payloads).

pub mod feed;
pub mod ids;

pub use feed::{FeedItem, InvalidReason, ValidFeedItem, Validation};
pub use ids::{ItemId, LeaseToken, ParseLeaseTokenError, RecordId};
