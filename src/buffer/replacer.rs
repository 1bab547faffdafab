use bitflags::bitflags;

use crate::common::{Timestamp, LRU_K};

bitflags! {
    /// Caller advice about a slot's future use.
    ///
    /// The low nibble holds independent flags. Bits 4..7 hold the index
    /// level field: 4 for the root (`INDEX0`) down to 1 for level 3. Level
    /// values overlap as bit patterns, so combine hints with
    /// [`PageHint::merge`] rather than `|`.
    pub struct PageHint: u8 {
        /// The page will be checked out again shortly.
        const USE_SOON = 0x01;
        /// The page was modified and must be written before reuse.
        const DIRTY = 0x02;
        /// The page will not be needed again; reuse its slot first.
        const RESET = 0x04;
        const INDEX3 = 0x10;
        const INDEX2 = 0x20;
        const INDEX1 = 0x30;
        const INDEX0 = 0x40;
    }
}

const INDEX_SHIFT: u8 = 4;
const INDEX_MASK: u8 = 0x70;
const FLAG_MASK: u8 = 0x0F;

impl PageHint {
    /// Hint for a lookup node `level` steps below the root. Levels past 3
    /// share the lowest index priority.
    pub fn index(level: u8) -> PageHint {
        match level {
            0 => PageHint::INDEX0,
            1 => PageHint::INDEX1,
            2 => PageHint::INDEX2,
            _ => PageHint::INDEX3,
        }
    }

    /// Index level encoded in the hint, 0 being the root.
    pub fn index_level(&self) -> Option<u8> {
        match (self.bits() & INDEX_MASK) >> INDEX_SHIFT {
            0 => None,
            field => Some(4 - field.min(4)),
        }
    }

    /// Sticky union: flags accumulate and the index field keeps the
    /// shallowest level either side declared.
    pub fn merge(self, other: PageHint) -> PageHint {
        let flags = (self.bits() | other.bits()) & FLAG_MASK;
        let index = (self.bits() & INDEX_MASK).max(other.bits() & INDEX_MASK);
        PageHint::from_bits_truncate(flags | index)
    }

    /// Protection tier, higher is kept longer. `None` for a slot that
    /// should be reused first.
    fn tier(&self) -> Option<u64> {
        if self.contains(PageHint::RESET) {
            return None;
        }
        let tier = match self.index_level() {
            Some(level) => 7 - level as u64,
            None if self.contains(PageHint::USE_SOON) => 3,
            None if self.contains(PageHint::DIRTY) => 2,
            None => 1,
        };
        Some(tier)
    }
}

impl Default for PageHint {
    fn default() -> Self {
        PageHint::empty()
    }
}

/// The `LRU_K` most recent op-counter values at which a slot was checked
/// out, newest first. 0 means no access recorded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AccessHistory([Timestamp; LRU_K]);

impl AccessHistory {
    /// History of a slot that was just loaded at `now`.
    pub fn first_access(now: Timestamp) -> Self {
        let mut history = [0; LRU_K];
        history[0] = now;
        Self(history)
    }

    pub fn record_access(&mut self, now: Timestamp) {
        self.0.rotate_right(1);
        self.0[0] = now;
    }

    pub fn last(&self) -> Timestamp {
        self.0[0]
    }

    /// The K-th most recent access, 0 while fewer than K are recorded.
    pub fn kth(&self) -> Timestamp {
        self.0[LRU_K - 1]
    }
}

/// Eviction score of an unlocked slot; the lowest score is reused first.
///
/// The base is the LRU-K recency (K-th most recent access), so a page with
/// a sparse history scores lowest. `USE_SOON` and index hints base the
/// score on the most recent access instead. Each hint tier then adds
/// `boost` op-counter ticks: plain 1, dirty 2, use-soon 3, index levels
/// 3..0 score 4..7.
/// `RESET` scores 0.
pub fn eviction_score(history: &AccessHistory, hints: PageHint, boost: u64) -> u64 {
    let Some(tier) = hints.tier() else {
        return 0;
    };
    let base = if hints.contains(PageHint::USE_SOON) || hints.index_level().is_some() {
        history.last()
    } else {
        history.kth()
    };
    base.saturating_add(tier.saturating_mul(boost))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn history(last: Timestamp, kth: Timestamp) -> AccessHistory {
        let mut h = AccessHistory::first_access(kth);
        h.record_access(last);
        h
    }

    #[test]
    fn test_access_history() {
        let mut h = AccessHistory::first_access(5);
        assert_eq!(h.last(), 5);
        assert_eq!(h.kth(), 0);

        h.record_access(9);
        assert_eq!(h.last(), 9);
        assert_eq!(h.kth(), 5);

        h.record_access(12);
        assert_eq!(h.kth(), 9);
    }

    #[test]
    fn test_index_levels() {
        assert_eq!(PageHint::INDEX0.index_level(), Some(0));
        assert_eq!(PageHint::INDEX1.index_level(), Some(1));
        assert_eq!(PageHint::INDEX2.index_level(), Some(2));
        assert_eq!(PageHint::INDEX3.index_level(), Some(3));
        assert_eq!(PageHint::index(9), PageHint::INDEX3);
        assert_eq!(PageHint::DIRTY.index_level(), None);
    }

    #[test]
    fn test_merge_keeps_shallowest_index() {
        // INDEX3 | INDEX2 would read back as INDEX1
        let merged = PageHint::INDEX3.merge(PageHint::INDEX2);
        assert_eq!(merged.index_level(), Some(2));

        let merged = PageHint::DIRTY.merge(PageHint::INDEX0).merge(PageHint::INDEX3);
        assert!(merged.contains(PageHint::DIRTY));
        assert_eq!(merged.index_level(), Some(0));
    }

    #[test]
    fn test_score_ordering() {
        let h = history(100, 90);
        let boost = 10;

        let reset = eviction_score(&h, PageHint::RESET | PageHint::DIRTY, boost);
        let plain = eviction_score(&h, PageHint::empty(), boost);
        let dirty = eviction_score(&h, PageHint::DIRTY, boost);
        let soon = eviction_score(&h, PageHint::USE_SOON, boost);
        let deep = eviction_score(&h, PageHint::INDEX3, boost);
        let root = eviction_score(&h, PageHint::INDEX0, boost);

        assert_eq!(reset, 0);
        assert!(reset < plain);
        assert!(plain < dirty);
        assert!(dirty < soon);
        assert!(soon < deep);
        assert!(deep < root);
    }

    #[test]
    fn test_sparse_history_is_most_evictable() {
        let once = AccessHistory::first_access(500);
        let twice = history(20, 10);
        assert!(
            eviction_score(&once, PageHint::empty(), 1)
                < eviction_score(&twice, PageHint::empty(), 1)
        );
    }
}
