//! Per-partition acknowledgment tracker.
//!
//! Records which offsets past the commit point have reached a terminal
//! outcome, using a growable array of 64-bit blocks. Bit `i` of block `b`
//! stands for offset `commit_point + b * 64 + i`.
//!
//! ```text
//!   commit point
//!        │
//!        ▼
//!   block 0: 1111111111 ... 1111   (offsets cp .. cp+63, all resolved)
//!   block 1: 0000000000 ... 0111   (offsets cp+64 .. cp+66 resolved)
//!                              ▲
//!                          high water
//! ```
//!
//! The tracker is committable when every bit from the commit point up to
//! the high-water mark is set. A set bit means "safe to pass over", not
//! necessarily "delivered".

use relay_core::Offset;

/// Number of offsets covered by one block.
const BLOCK_BITS: u64 = 64;

/// Returns a mask with bits `0..=bit` set.
const fn low_mask(bit: u32) -> u64 {
    u64::MAX >> (63 - bit)
}

/// Position of the highest bit ever set since the last reset.
///
/// Ordered by block first, then bit, so `max` picks the higher offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct HighWater {
    block: usize,
    bit: u32,
}

/// Result of reporting an offset as resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// The offset was newly marked.
    Marked,
    /// The offset is below the commit point and already covered.
    Stale,
    /// The offset was already marked since the last reset.
    Duplicate,
}

/// A contiguous run taken out of a tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Advance {
    /// Next offset to read; this is what gets committed.
    pub offset: Offset,
    /// Number of offsets folded into this advance.
    pub count: u64,
}

/// Read-only view of a tracker, for inspection and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackerState {
    /// First offset not yet committed.
    pub commit_point: Offset,
    /// Highest offset resolved since the last reset.
    pub highest_resolved: Option<Offset>,
    /// Number of 64-bit blocks currently allocated.
    pub capacity_blocks: usize,
    /// Whether a contiguous run is ready to commit.
    pub committable: bool,
}

impl TrackerState {
    /// Length of the resolved run waiting for a commit, or zero if there is
    /// a gap before the high-water mark.
    #[must_use]
    pub fn committable_run(&self) -> u64 {
        match (self.committable, self.highest_resolved) {
            (true, Some(high)) => high.get() - self.commit_point.get() + 1,
            _ => 0,
        }
    }
}

/// Sliding bitmap of resolved offsets for one partition.
#[derive(Debug, Clone)]
pub struct OffsetTracker {
    /// `last_acked + 1`: the first offset not yet committed.
    commit_point: Offset,
    /// Resolved bits relative to `commit_point`.
    blocks: Vec<u64>,
    /// `None` until a bit is set after construction or reset.
    high_water: Option<HighWater>,
    /// Bitmaps larger than this are dropped on reset.
    shrink_threshold_blocks: usize,
}

impl OffsetTracker {
    /// Creates a tracker whose first uncommitted offset is `first_offset`.
    ///
    /// # Panics
    ///
    /// Panics if `shrink_threshold_blocks` is zero.
    #[must_use]
    pub fn new(first_offset: Offset, shrink_threshold_blocks: usize) -> Self {
        assert!(
            shrink_threshold_blocks > 0,
            "shrink threshold must be positive"
        );
        Self {
            commit_point: first_offset,
            blocks: vec![0; 1],
            high_water: None,
            shrink_threshold_blocks,
        }
    }

    /// Marks `offset` as resolved.
    ///
    /// Offsets below the commit point are ignored: they can show up again
    /// around a reset and are already covered by a commit.
    pub fn record_resolved(&mut self, offset: Offset) -> Resolution {
        let Some(diff) = offset.get().checked_sub(self.commit_point.get()) else {
            return Resolution::Stale;
        };

        #[allow(clippy::cast_possible_truncation)]
        let block = (diff / BLOCK_BITS) as usize;
        #[allow(clippy::cast_possible_truncation)]
        let bit = (diff % BLOCK_BITS) as u32;

        self.ensure_capacity(block);

        let flag = 1u64 << bit;
        if self.blocks[block] & flag != 0 {
            return Resolution::Duplicate;
        }
        self.blocks[block] |= flag;

        let position = HighWater { block, bit };
        if self.high_water.map_or(true, |high| position > high) {
            self.high_water = Some(position);
        }

        Resolution::Marked
    }

    /// Returns true if every offset from the commit point up to the
    /// high-water mark has been resolved.
    #[must_use]
    pub fn is_committable(&self) -> bool {
        let Some(high) = self.high_water else {
            return false;
        };

        self.blocks[..high.block].iter().all(|&block| block == u64::MAX)
            && self.blocks[high.block] == low_mask(high.bit)
    }

    /// Number of offsets between the commit point and the high-water mark,
    /// inclusive. Only meaningful when [`is_committable`] holds.
    ///
    /// [`is_committable`]: Self::is_committable
    #[must_use]
    pub fn pending_run_length(&self) -> u64 {
        self.high_water.map_or(0, |high| {
            high.block as u64 * BLOCK_BITS + u64::from(high.bit) + 1
        })
    }

    /// Next offset to read once the pending run is committed.
    #[must_use]
    pub fn next_commit_offset(&self) -> Offset {
        self.commit_point.advance(self.pending_run_length())
    }

    /// Re-bases the tracker so `committed` becomes the first uncommitted
    /// offset, discarding every recorded bit.
    pub fn reset(&mut self, committed: Offset) {
        self.commit_point = committed;
        self.high_water = None;

        if self.blocks.len() > self.shrink_threshold_blocks {
            self.blocks = vec![0; 1];
        } else {
            self.blocks.fill(0);
        }
    }

    /// Takes the contiguous run if there is one, resetting the tracker to
    /// the new commit point.
    pub fn try_advance(&mut self) -> Option<Advance> {
        if !self.is_committable() {
            return None;
        }

        let advance = Advance {
            offset: self.next_commit_offset(),
            count: self.pending_run_length(),
        };
        self.reset(advance.offset);

        debug_assert!(self.high_water.is_none());
        Some(advance)
    }

    /// Returns the last offset covered by a commit, or `None` if nothing
    /// before the commit point exists.
    #[must_use]
    pub const fn last_acked(&self) -> Option<Offset> {
        self.commit_point.prev()
    }

    /// Returns the first offset not yet committed.
    #[must_use]
    pub const fn commit_point(&self) -> Offset {
        self.commit_point
    }

    /// Returns the highest offset resolved since the last reset.
    #[must_use]
    pub fn highest_resolved(&self) -> Option<Offset> {
        self.high_water.map(|high| {
            self.commit_point
                .advance(high.block as u64 * BLOCK_BITS + u64::from(high.bit))
        })
    }

    /// Returns the number of allocated blocks.
    #[must_use]
    pub fn capacity_blocks(&self) -> usize {
        self.blocks.len()
    }

    /// Returns a snapshot of the tracker.
    #[must_use]
    pub fn state(&self) -> TrackerState {
        TrackerState {
            commit_point: self.commit_point,
            highest_resolved: self.highest_resolved(),
            capacity_blocks: self.capacity_blocks(),
            committable: self.is_committable(),
        }
    }

    /// Grows the block array so `block` is addressable.
    fn ensure_capacity(&mut self, block: usize) {
        if block >= self.blocks.len() {
            // At least doubles, since block >= len.
            let new_len = block.saturating_add(1).saturating_mul(2);
            self.blocks.resize(new_len, 0);
        }
    }
}

// -----------------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------------
