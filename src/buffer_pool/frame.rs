use super::{FrameId, SharedBufferPool};
use crate::storage::{PageId, INVALID_PAGE, PAGE_SIZE};

/// A slot in the buffer pool. Both the bookkeeping fields (`page_id`,
/// `pin_count`, `dirty`) and the page bytes themselves live behind the BPM's
/// coarse lock; there is no per-frame lock, since every access already goes
/// through a [`FrameGuard`], which re-acquires that coarse lock itself.
#[derive(Debug)]
pub(super) struct Frame {
    pub(super) page_id: PageId,
    pub(super) pin_count: u32,
    pub(super) dirty: bool,
    pub(super) data: [u8; PAGE_SIZE],
}

impl Frame {
    pub(super) fn new() -> Self {
        Self {
            page_id: INVALID_PAGE,
            pin_count: 0,
            dirty: false,
            data: [0u8; PAGE_SIZE],
        }
    }
}

/// A handle to a pinned frame, returned by `fetch` and `new_page`.
///
/// A `FrameGuard` is an index plus a back-reference to the pool, not an
/// owned pointer into the frame's bytes: it stores the frame's index, the
/// page id it was issued for, and a cloned handle onto the pool's own
/// [`SharedBufferPool`] lock. Every `read`/`write` call re-acquires that
/// lock and checks that the frame still holds the page this handle was
/// issued for, so a guard kept around after its pin count hit zero and the
/// frame was handed to a different page (eviction, or `delete_page`
/// followed by reuse) cannot silently observe the new occupant's bytes —
/// the call panics instead, since that can only happen if the caller used
/// the handle after the unpin that was supposed to be its last use of it.
///
/// Holding a `FrameGuard` does not itself keep the page pinned past the
/// caller's explicit `unpin` call; it's a reference to "frame `f`, as long as
/// it still holds page `p`", not a lock on the pin count.
#[derive(Clone)]
pub struct FrameGuard {
    frame_id: FrameId,
    page_id: PageId,
    pool: SharedBufferPool,
}

impl FrameGuard {
    pub(super) fn new(frame_id: FrameId, page_id: PageId, pool: SharedBufferPool) -> Self {
        Self {
            frame_id,
            page_id,
            pool,
        }
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Runs `f` over the frame's current bytes, read-only, under the pool's lock.
    pub fn read<R>(&self, f: impl FnOnce(&[u8; PAGE_SIZE]) -> R) -> R {
        let bpm = self.pool.lock();
        let frame = &bpm.frames[self.frame_id];
        self.assert_not_stale(frame.page_id);
        f(&frame.data)
    }

    /// Runs `f` over the frame's current bytes, mutably, under the pool's lock.
    pub fn write<R>(&self, f: impl FnOnce(&mut [u8; PAGE_SIZE]) -> R) -> R {
        let mut bpm = self.pool.lock();
        let frame = &mut bpm.frames[self.frame_id];
        self.assert_not_stale(frame.page_id);
        f(&mut frame.data)
    }

    fn assert_not_stale(&self, resident_page_id: PageId) {
        assert_eq!(
            resident_page_id, self.page_id,
            "stale frame handle: frame {} now holds page {} instead of {} \
             (used after its page was evicted or deleted)",
            self.frame_id, resident_page_id, self.page_id
        );
    }
}
