//! Queue module: item records, leases, the queue façade and its registry.

mod handle;
mod import;
mod lease;
pub(crate) mod record;
mod registry;
mod retry;
mod scan;
mod state;

pub use handle::{ClaimedItem, ListedItem, QueueHandle};
pub use import::{EnqueueReport, ImportError, enqueue_from};
pub use lease::{Claim, LeaseManager};
pub use record::{Lease, QueueItem};
pub use registry::{DEFAULT_LEASE, DEFAULT_SCAN_PAGE, QueueName, QueueRegistry};
pub use retry::RetryPolicy;
pub use scan::AvailableScan;
pub use state::ItemState;
