mod file_manager;
mod memory_manager;

pub use file_manager::FileStorageManager;
pub use memory_manager::InMemoryStorageManager;

use anyhow::Result;
use std::fmt::Debug;

/// A logical page, assigned by the storage manager. `INVALID` means "no page".
pub type PageId = i64;

pub const INVALID_PAGE: PageId = -1;

/// Every frame and every on-disk page is exactly this many bytes.
pub const PAGE_SIZE: usize = 4096;

/// The collaborator that actually owns page bytes and page-id allocation.
///
/// The buffer pool only shuttles bytes through this trait; it never
/// interprets them and never decides where they ultimately live. Swapping
/// the implementation (file-backed, in-memory, something networked) does
/// not change anything above this boundary.
pub trait StorageManager: Send + Sync + Debug {
    /// Fill `buf` with the on-disk contents of `page_id`.
    fn read_page(&self, page_id: PageId, buf: &mut [u8; PAGE_SIZE]) -> Result<()>;

    /// Persist `buf` as `page_id`.
    fn write_page(&self, page_id: PageId, buf: &[u8; PAGE_SIZE]) -> Result<()>;

    /// Reserve and return a fresh page id.
    fn allocate_page(&self) -> Result<PageId>;

    /// Reclaim a page id. Best-effort: callers should not treat failure here
    /// as fatal, since the page is already uncached by the time this runs.
    fn deallocate_page(&self, page_id: PageId) -> Result<()>;
}
