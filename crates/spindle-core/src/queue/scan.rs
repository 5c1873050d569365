//! Lazy cursor over claimable items.

use std::collections::VecDeque;
use std::sync::Arc;

use super::record::QueueItem;
use crate::domain::ItemId;
use crate::error::Result;
use crate::ports::{Clock, ItemStore};

/// Walks available items in creation order, one store page at a time.
///
/// Every page is read against the store's current state and the clock's
/// current time, so the scan never works off a frozen snapshot. It is finite:
/// it stops at the first short page. `restart` starts over from the oldest
/// item.
pub struct AvailableScan {
    store: Arc<dyn ItemStore>,
    clock: Arc<dyn Clock>,
    page_size: usize,
    cursor: Option<ItemId>,
    buffer: VecDeque<QueueItem>,
    exhausted: bool,
}

impl AvailableScan {
    pub fn new(store: Arc<dyn ItemStore>, clock: Arc<dyn Clock>, page_size: usize) -> Self {
        Self {
            store,
            clock,
            page_size: page_size.max(1),
            cursor: None,
            buffer: VecDeque::new(),
            exhausted: false,
        }
    }

    pub async fn next(&mut self) -> Result<Option<QueueItem>> {
        if let Some(item) = self.buffer.pop_front() {
            return Ok(Some(item));
        }
        if self.exhausted {
            return Ok(None);
        }

        let page = self
            .store
            .scan_available(self.cursor, self.clock.now(), self.page_size)
            .await?;
        if page.len() < self.page_size {
            self.exhausted = true;
        }
        if let Some(last) = page.last() {
            self.cursor = Some(last.id);
        }
        self.buffer.extend(page);
        Ok(self.buffer.pop_front())
    }

    pub fn restart(&mut self) {
        self.cursor = None;
        self.buffer.clear();
        self.exhausted = false;
    }
}
