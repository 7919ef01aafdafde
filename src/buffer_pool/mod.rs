mod frame;
mod replacer;

use crate::printdbg;
use crate::storage::{PageId, StorageManager, INVALID_PAGE, PAGE_SIZE};
use frame::Frame;
use parking_lot::FairMutex;
use replacer::{ClockReplacer, Replacer};
use std::collections::{HashMap, LinkedList};
use std::sync::{Arc, Weak};

pub use frame::FrameGuard;

type FrameId = usize;

/// The BPM, wrapped for sharing across threads behind a single coarse lock.
pub type SharedBufferPool = Arc<FairMutex<BufferPoolManager>>;

/// Fixed-size pool of in-memory frames fronting a [`StorageManager`].
///
/// All bookkeeping (`free_list`, `page_table`, per-frame pin/dirty/data
/// state, replacer state) is protected by the coarse lock that wraps every
/// `BufferPoolManager` (see [`SharedBufferPool`]); callers are expected to
/// hold that lock for the duration of each method call, which is why
/// `BufferPoolManager::new` hands back the pool already wrapped in one
/// rather than a bare value. A [`FrameGuard`] returned by `fetch`/`new_page`
/// keeps its own clone of that same lock, so it stays usable after the call
/// that produced it returns and the lock has been released — each `read`/
/// `write` on the guard just re-acquires it for the duration of the access.
pub struct BufferPoolManager {
    storage: Arc<dyn StorageManager>,

    free_list: LinkedList<FrameId>,
    page_table: HashMap<PageId, FrameId>,
    frames: Vec<Frame>,

    replacer: Box<dyn Replacer>,

    /// Lets a method that only has `&mut self` hand out a [`FrameGuard`]
    /// carrying its own independent handle onto the pool. Populated at
    /// construction time via `Arc::new_cyclic`, so it's always upgradable
    /// for as long as any `SharedBufferPool` clone (and therefore this
    /// `BufferPoolManager`) is alive.
    self_ref: Weak<FairMutex<BufferPoolManager>>,
}

impl BufferPoolManager {
    pub fn new(pool_size: usize, storage: Arc<dyn StorageManager>) -> SharedBufferPool {
        assert!(pool_size > 0, "buffer pool must hold at least one frame");

        Arc::new_cyclic(|self_ref| {
            FairMutex::new(Self {
                storage,
                free_list: LinkedList::from_iter(0..pool_size),
                page_table: HashMap::new(),
                frames: (0..pool_size).map(|_| Frame::new()).collect(),
                replacer: Box::new(ClockReplacer::new(pool_size)),
                self_ref: self_ref.clone(),
            })
        })
    }

    /// Build the handle returned to callers for a frame pinned on their
    /// behalf. Panics if the pool itself has already been torn down, which
    /// can't happen while this call is executing (it's holding the pool's
    /// own lock by construction).
    fn guard_for(&self, frame_id: FrameId, page_id: PageId) -> FrameGuard {
        let pool = self
            .self_ref
            .upgrade()
            .expect("pool dropped while one of its own methods was executing");
        FrameGuard::new(frame_id, page_id, pool)
    }

    /// Obtain a free frame, evicting a victim via the replacer if none are free.
    ///
    /// Returns `None` if every frame is either free-list-empty and pinned, or
    /// if the chosen victim's write-back to storage failed (in which case the
    /// victim's replacer tracking is restored, leaving the pool unchanged).
    fn acquire_frame(&mut self) -> Option<FrameId> {
        if let Some(frame_id) = self.free_list.pop_front() {
            return Some(frame_id);
        }

        let victim = self.replacer.choose_victim()?;

        match self.evict_frame(victim) {
            Ok(()) => Some(victim),
            Err(e) => {
                printdbg!("failed to evict frame {victim}: {e}");
                self.replacer.unpin(victim);
                None
            }
        }
    }

    /// Write a dirty victim frame back to storage and clear its identity.
    ///
    /// Storage is written before any state is mutated, so a failure leaves
    /// the frame exactly as it was before eviction was attempted.
    fn evict_frame(&mut self, frame_id: FrameId) -> anyhow::Result<()> {
        let frame = &self.frames[frame_id];
        debug_assert_eq!(frame.pin_count, 0);

        if frame.dirty {
            self.storage.write_page(frame.page_id, &frame.data)?;
        }

        let frame = &mut self.frames[frame_id];
        printdbg!("evicting page {} from frame {frame_id}", frame.page_id);
        self.page_table.remove(&frame.page_id);
        frame.dirty = false;
        frame.page_id = INVALID_PAGE;

        Ok(())
    }

    /// Pin `page_id` into a frame, reading it from storage on a miss.
    pub fn fetch(&mut self, page_id: PageId) -> Option<FrameGuard> {
        if let Some(&frame_id) = self.page_table.get(&page_id) {
            let frame = &mut self.frames[frame_id];
            frame.pin_count += 1;
            self.replacer.pin(frame_id);
            printdbg!("fetched page {page_id} (frame {frame_id}), pin count {}", frame.pin_count);
            return Some(self.guard_for(frame_id, page_id));
        }

        let frame_id = self.acquire_frame()?;

        if let Err(e) = self.storage.read_page(page_id, &mut self.frames[frame_id].data) {
            printdbg!("failed to read page {page_id}: {e}");
            self.free_list.push_back(frame_id);
            return None;
        }

        let frame = &mut self.frames[frame_id];
        frame.page_id = page_id;
        frame.pin_count = 1;
        frame.dirty = false;
        self.page_table.insert(page_id, frame_id);
        self.replacer.pin(frame_id);

        printdbg!("fetched page {page_id} into frame {frame_id} from storage");
        Some(self.guard_for(frame_id, page_id))
    }

    /// Allocate a brand new page, pinning it into a zeroed frame.
    ///
    /// The page id is reserved from storage before a destination frame is
    /// selected: selecting a frame may evict and write back a dirty victim,
    /// and there is no point paying for that work for an id the pool might
    /// not even be able to allocate.
    pub fn new_page(&mut self) -> Option<(PageId, FrameGuard)> {
        let page_id = match self.storage.allocate_page() {
            Ok(id) => id,
            Err(e) => {
                printdbg!("failed to allocate a new page: {e}");
                return None;
            }
        };

        let frame_id = match self.acquire_frame() {
            Some(frame_id) => frame_id,
            None => {
                if let Err(e) = self.storage.deallocate_page(page_id) {
                    printdbg!("failed to deallocate unused page {page_id}: {e}");
                }
                return None;
            }
        };

        let frame = &mut self.frames[frame_id];
        frame.data = [0u8; PAGE_SIZE];
        frame.page_id = page_id;
        frame.pin_count = 1;
        frame.dirty = false;
        self.page_table.insert(page_id, frame_id);
        self.replacer.pin(frame_id);

        printdbg!("created page {page_id} in frame {frame_id}");
        Some((page_id, self.guard_for(frame_id, page_id)))
    }

    /// Unpin `page_id`, marking it evictable once its pin count hits zero.
    ///
    /// `dirty` is OR'd onto the frame's existing dirty flag: once true it
    /// stays true until the page is flushed. Returns `false` if the page is
    /// not resident or is already unpinned.
    pub fn unpin(&mut self, page_id: PageId, dirty: bool) -> bool {
        let Some(&frame_id) = self.page_table.get(&page_id) else {
            return false;
        };

        let frame = &mut self.frames[frame_id];
        if frame.pin_count == 0 {
            return false;
        }

        frame.dirty |= dirty;
        frame.pin_count -= 1;

        printdbg!("unpinned page {page_id} (frame {frame_id}), pin count {}", frame.pin_count);

        if frame.pin_count == 0 {
            self.replacer.unpin(frame_id);
        }

        true
    }

    /// Write a resident page's current bytes back to storage.
    ///
    /// Returns `false` for a non-resident page or the invalid page id.
    pub fn flush(&mut self, page_id: PageId) -> bool {
        if page_id == INVALID_PAGE {
            return false;
        }
        let Some(&frame_id) = self.page_table.get(&page_id) else {
            return false;
        };

        let frame = &mut self.frames[frame_id];
        match self.storage.write_page(page_id, &frame.data) {
            Ok(()) => {
                frame.dirty = false;
                true
            }
            Err(e) => {
                printdbg!("failed to flush page {page_id}: {e}");
                false
            }
        }
    }

    /// Flush every resident page, best-effort: one failure doesn't stop the sweep.
    pub fn flush_all(&mut self) {
        let page_ids: Vec<PageId> = self.page_table.keys().copied().collect();
        for page_id in page_ids {
            self.flush(page_id);
        }
    }

    /// Remove a page from the pool and reclaim its page id.
    ///
    /// Returns `true` if the page is now gone from the pool (including if it
    /// was never resident); `false` if it's pinned and can't be removed.
    pub fn delete_page(&mut self, page_id: PageId) -> bool {
        let Some(&frame_id) = self.page_table.get(&page_id) else {
            return true;
        };

        let frame = &self.frames[frame_id];
        if frame.pin_count > 0 {
            return false;
        }

        self.page_table.remove(&page_id);
        self.replacer.pin(frame_id);

        let frame = &mut self.frames[frame_id];
        frame.page_id = INVALID_PAGE;
        frame.dirty = false;
        self.free_list.push_back(frame_id);

        if let Err(e) = self.storage.deallocate_page(page_id) {
            printdbg!("failed to deallocate page {page_id}: {e}");
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{InMemoryStorageManager, StorageManager};
    use parking_lot::Mutex;

    fn test_pool(pool_size: usize) -> SharedBufferPool {
        BufferPoolManager::new(pool_size, Arc::new(InMemoryStorageManager::new()))
    }

    /// Wraps [`InMemoryStorageManager`] to record which ids `deallocate_page`
    /// was called with, for tests that need to observe that a reserved-but-
    /// unused page id was actually given back rather than leaked.
    #[derive(Debug)]
    struct DeallocSpy {
        inner: InMemoryStorageManager,
        deallocated: Mutex<Vec<PageId>>,
    }

    impl DeallocSpy {
        fn new() -> Self {
            Self {
                inner: InMemoryStorageManager::new(),
                deallocated: Mutex::new(Vec::new()),
            }
        }
    }

    impl StorageManager for DeallocSpy {
        fn read_page(&self, page_id: PageId, buf: &mut [u8; PAGE_SIZE]) -> anyhow::Result<()> {
            self.inner.read_page(page_id, buf)
        }

        fn write_page(&self, page_id: PageId, buf: &[u8; PAGE_SIZE]) -> anyhow::Result<()> {
            self.inner.write_page(page_id, buf)
        }

        fn allocate_page(&self) -> anyhow::Result<PageId> {
            self.inner.allocate_page()
        }

        fn deallocate_page(&self, page_id: PageId) -> anyhow::Result<()> {
            self.deallocated.lock().push(page_id);
            self.inner.deallocate_page(page_id)
        }
    }

    #[test]
    fn new_page_then_fetch_returns_same_bytes() {
        let pool = test_pool(2);

        let (page_id, guard) = pool.lock().new_page().unwrap();
        guard.write(|data| data[0] = 7);
        pool.lock().unpin(page_id, true);
        assert!(pool.lock().flush(page_id));

        let fetched = pool.lock().fetch(page_id).unwrap();
        assert_eq!(fetched.read(|data| data[0]), 7);
    }

    #[test]
    fn fetch_of_unseeded_page_reads_zeroed_bytes() {
        let pool = test_pool(2);
        let guard = pool.lock().fetch(5).unwrap();
        assert_eq!(guard.read(|data| *data), [0u8; PAGE_SIZE]);
    }

    #[test]
    fn new_page_fails_when_pool_is_fully_pinned() {
        let pool = test_pool(1);

        let (p1, _g1) = pool.lock().new_page().unwrap();
        assert!(pool.lock().new_page().is_none());

        pool.lock().unpin(p1, false);
        assert!(pool.lock().new_page().is_some());
    }

    #[test]
    fn unpinning_an_unknown_page_returns_false() {
        let pool = test_pool(2);
        assert!(!pool.lock().unpin(999, false));
    }

    #[test]
    fn double_unpin_returns_false_on_the_second_call() {
        let pool = test_pool(2);
        let (page_id, _guard) = pool.lock().new_page().unwrap();

        assert!(pool.lock().unpin(page_id, false));
        assert!(!pool.lock().unpin(page_id, false));
    }

    #[test]
    fn eviction_prefers_free_list_before_consulting_the_replacer() {
        let pool = test_pool(2);

        let (p1, _g1) = pool.lock().new_page().unwrap();
        pool.lock().unpin(p1, false);

        let (p2, _g2) = pool.lock().new_page().unwrap();
        assert_ne!(p1, p2);
    }

    #[test]
    fn unpinned_pages_are_evicted_to_make_room() {
        let pool = test_pool(1);

        let (p1, _g1) = pool.lock().new_page().unwrap();
        pool.lock().unpin(p1, false);

        let (p2, g2) = pool.lock().new_page().unwrap();
        assert_ne!(p1, p2);
        assert_eq!(g2.page_id(), p2);
    }

    #[test]
    fn dirty_eviction_victim_is_written_back_before_reuse() {
        let pool = test_pool(1);

        let (p1, guard) = pool.lock().new_page().unwrap();
        guard.write(|data| data[100] = 42);
        pool.lock().unpin(p1, true);

        let (_p2, _g2) = pool.lock().new_page().unwrap();

        let refetched = pool.lock().fetch(p1).unwrap();
        assert_eq!(refetched.read(|data| data[100]), 42);
    }

    #[test]
    fn delete_page_that_was_never_resident_succeeds() {
        let pool = test_pool(2);
        assert!(pool.lock().delete_page(123));
    }

    #[test]
    fn delete_pinned_page_fails() {
        let pool = test_pool(2);
        let (page_id, _guard) = pool.lock().new_page().unwrap();
        assert!(!pool.lock().delete_page(page_id));
    }

    #[test]
    fn delete_page_frees_its_frame_for_reuse() {
        let pool = test_pool(1);
        let (p1, _g1) = pool.lock().new_page().unwrap();
        pool.lock().unpin(p1, false);
        assert!(pool.lock().delete_page(p1));

        let (p2, _g2) = pool.lock().new_page().unwrap();
        assert_ne!(p1, p2);
    }

    #[test]
    fn flush_all_clears_dirty_flags_without_evicting() {
        let pool = test_pool(2);
        let (p1, guard) = pool.lock().new_page().unwrap();
        guard.write(|data| data[0] = 1);
        pool.lock().unpin(p1, true);

        pool.lock().flush_all();

        let refetched = pool.lock().fetch(p1).unwrap();
        assert_eq!(refetched.read(|data| data[0]), 1);
    }

    #[test]
    fn flush_of_nonresident_page_fails() {
        let pool = test_pool(2);
        assert!(!pool.lock().flush(777));
    }

    #[test]
    fn flush_of_invalid_page_id_fails() {
        let pool = test_pool(2);
        assert!(!pool.lock().flush(INVALID_PAGE));
    }

    #[test]
    fn new_page_deallocates_the_reserved_id_when_the_pool_is_full() {
        // Every frame pinned: acquire_frame() must fail after the id is
        // already reserved from storage, and that id must be handed back
        // via deallocate_page rather than silently leaked.
        let storage = Arc::new(DeallocSpy::new());
        let pool = BufferPoolManager::new(1, storage.clone());

        let (_p1, _g1) = pool.lock().new_page().unwrap();
        assert!(pool.lock().new_page().is_none());

        assert_eq!(&*storage.deallocated.lock(), &[1]);
    }

    #[test]
    fn stale_guard_panics_instead_of_reading_the_new_occupant() {
        let pool = test_pool(1);

        let (p1, guard) = pool.lock().new_page().unwrap();
        pool.lock().unpin(p1, false);
        assert!(pool.lock().delete_page(p1));

        // The frame `guard` pointed at is now free and about to be reused by
        // a different page; the stale handle must refuse to read it rather
        // than silently exposing p2's bytes under p1's name.
        let (_p2, _g2) = pool.lock().new_page().unwrap();

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            guard.read(|data| data[0])
        }));
        assert!(result.is_err(), "stale guard must panic rather than return data");
    }

    #[test]
    fn second_chance_spares_a_recently_referenced_page_from_eviction() {
        let pool = test_pool(3);

        let (p1, _g1) = pool.lock().new_page().unwrap();
        let (p2, _g2) = pool.lock().new_page().unwrap();
        let (p3, g3) = pool.lock().new_page().unwrap();
        g3.write(|data| data[0] = 0x99);

        // None of these three are marked dirty: if one gets evicted without
        // a second chance, a later fetch reads it back as zeroed bytes from
        // storage rather than the 0x99 written above.
        pool.lock().unpin(p1, false);
        pool.lock().unpin(p2, false);
        pool.lock().unpin(p3, false);

        // Forces an eviction; the clock hand starts at p1's frame, so p1 goes.
        let (_p4, _g4) = pool.lock().new_page().unwrap();

        // Re-reference p3 before the hand sweeps back around to it.
        let refetch = pool.lock().fetch(p3).unwrap();
        pool.lock().unpin(p3, false);
        drop(refetch);

        // Forces a second eviction; p2 (never re-referenced) goes instead of p3.
        let (_p5, _g5) = pool.lock().new_page().unwrap();

        let reread = pool.lock().fetch(p3).unwrap();
        assert_eq!(
            reread.read(|data| data[0]),
            0x99,
            "p3 was given a second chance and was never evicted"
        );
    }
}
