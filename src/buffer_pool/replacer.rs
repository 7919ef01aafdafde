use core::fmt::Debug;

use super::FrameId;

/// Victim-selection policy. The BPM only ever talks to frames through this
/// capability set, so an LRU-K or 2Q replacer could be dropped in without
/// touching the BPM.
pub(super) trait Replacer: Send + Sync + Debug {
    /// Mark `frame_id` as a replacement candidate (its pin count just hit
    /// zero). Idempotent: re-marking an already-tracked frame just reasserts
    /// its reference bit.
    fn unpin(&mut self, frame_id: FrameId);

    /// Remove `frame_id` from the replacement candidates (it was just pinned
    /// or evicted). Idempotent.
    fn pin(&mut self, frame_id: FrameId);

    /// Number of frames currently tracked as replacement candidates.
    fn size(&self) -> usize;

    /// Pick a victim among the tracked frames, removing it from tracking.
    /// Returns `None` iff `size() == 0`.
    fn choose_victim(&mut self) -> Option<FrameId>;
}

/// Second-chance clock replacer.
///
/// Each frame carries a `tracked` bit (is it a replacement candidate) and a
/// `referenced` bit (was it used since the clock hand last passed it). The
/// hand sweeps the ring, giving referenced frames one more pass before
/// evicting them.
#[derive(Debug)]
pub(super) struct ClockReplacer {
    tracked: Vec<bool>,
    referenced: Vec<bool>,
    hand: FrameId,
    tracked_count: usize,
}

impl ClockReplacer {
    pub(super) fn new(pool_size: usize) -> Self {
        Self {
            tracked: vec![false; pool_size],
            referenced: vec![false; pool_size],
            hand: 0,
            tracked_count: 0,
        }
    }
}

impl Replacer for ClockReplacer {
    fn unpin(&mut self, frame_id: FrameId) {
        if !self.tracked[frame_id] {
            self.tracked[frame_id] = true;
            self.tracked_count += 1;
        }
        self.referenced[frame_id] = true;
    }

    fn pin(&mut self, frame_id: FrameId) {
        if self.tracked[frame_id] {
            self.tracked[frame_id] = false;
            self.tracked_count -= 1;
        }
    }

    fn size(&self) -> usize {
        self.tracked_count
    }

    fn choose_victim(&mut self) -> Option<FrameId> {
        if self.tracked_count == 0 {
            return None;
        }

        let n = self.tracked.len();
        // Every tracked-and-referenced frame gets cleared at most once before
        // we must land on a tracked-and-unreferenced one, so this bound
        // always terminates given tracked_count > 0.
        for _ in 0..(2 * n) {
            let frame_id = self.hand;
            self.hand = (self.hand + 1) % n;

            if !self.tracked[frame_id] {
                continue;
            }
            if self.referenced[frame_id] {
                self.referenced[frame_id] = false;
                continue;
            }

            self.tracked[frame_id] = false;
            self.tracked_count -= 1;
            return Some(frame_id);
        }

        unreachable!("tracked_count > 0 guarantees a victim within 2 * pool_size steps")
    }
}
