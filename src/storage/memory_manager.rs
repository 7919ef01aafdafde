use super::{PageId, StorageManager, INVALID_PAGE, PAGE_SIZE};
use anyhow::{anyhow, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};

/// A [`StorageManager`] that keeps pages in a hash map instead of on disk.
///
/// Behaves like a thinly-provisioned disk: reading a page id that was never
/// written back returns a zeroed buffer rather than an error, which is what
/// lets a test `fetch` a page it only ever obtained through `new_page` and
/// never explicitly flushed.
#[derive(Debug, Default)]
pub struct InMemoryStorageManager {
    pages: Mutex<HashMap<PageId, [u8; PAGE_SIZE]>>,
    next_page_id: AtomicI64,
}

impl InMemoryStorageManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a page's on-disk contents directly, bypassing `write_page`.
    /// Useful for tests that want to assert a cold `fetch` sees specific bytes.
    pub fn seed(&self, page_id: PageId, data: [u8; PAGE_SIZE]) {
        self.pages.lock().insert(page_id, data);
    }
}

impl StorageManager for InMemoryStorageManager {
    fn read_page(&self, page_id: PageId, buf: &mut [u8; PAGE_SIZE]) -> Result<()> {
        if page_id == INVALID_PAGE {
            return Err(anyhow!("cannot read the invalid page id"));
        }

        match self.pages.lock().get(&page_id) {
            Some(data) => *buf = *data,
            None => *buf = [0u8; PAGE_SIZE],
        }
        Ok(())
    }

    fn write_page(&self, page_id: PageId, buf: &[u8; PAGE_SIZE]) -> Result<()> {
        if page_id == INVALID_PAGE {
            return Err(anyhow!("cannot write the invalid page id"));
        }
        self.pages.lock().insert(page_id, *buf);
        Ok(())
    }

    fn allocate_page(&self) -> Result<PageId> {
        Ok(self.next_page_id.fetch_add(1, Ordering::SeqCst))
    }

    fn deallocate_page(&self, page_id: PageId) -> Result<()> {
        self.pages.lock().remove(&page_id);
        Ok(())
    }
}
