use parking_lot::{MappedRwLockReadGuard, MappedRwLockWriteGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::common::{PageId, SlotId, StraitError, Timestamp};

use super::replacer::{eviction_score, AccessHistory, PageHint};

/// Where a slot stands in the swap cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapState {
    Idle,
    /// Writing the previous page out and/or reading the current one in.
    Swapping,
    /// The last swap-in could not get memory.
    FailedNoMemory,
    /// The last swap failed for any other reason.
    FailedCritical,
}

/// Bookkeeping for one slot. Lives under the pool mutex.
#[derive(Debug)]
pub(crate) struct SlotMeta {
    /// Page held by the slot, `None` while empty or after a failed swap.
    pub page_id: Option<PageId>,
    /// Page being written out while `swap_state` is `Swapping`.
    pub evicting: Option<PageId>,
    pub lock_count: u32,
    pub swap_state: SwapState,
    pub history: AccessHistory,
    /// Sticky hints for the current occupancy.
    pub hints: PageHint,
    /// Contents differ from what is on disk.
    pub needs_write: bool,
    pub score: u64,
    /// Why the last swap failed, shared with every waiter.
    pub failure: Option<String>,
}

/// A dirty page pushed out by `relabel`, kept until its write-back lands.
#[derive(Debug)]
pub(crate) struct Occupant {
    pub page_id: PageId,
    history: AccessHistory,
    hints: PageHint,
}

impl SlotMeta {
    pub fn empty() -> Self {
        Self {
            page_id: None,
            evicting: None,
            lock_count: 0,
            swap_state: SwapState::Idle,
            history: AccessHistory::default(),
            hints: PageHint::empty(),
            needs_write: false,
            score: 0,
            failure: None,
        }
    }

    /// Only unlocked slots that are not mid-swap can be reused.
    pub fn is_evictable(&self) -> bool {
        self.lock_count == 0 && self.swap_state != SwapState::Swapping
    }

    /// Score as seen by victim selection; empty slots go first.
    pub fn refresh_score(&mut self, boost: u64) {
        self.score = match self.page_id {
            Some(_) => eviction_score(&self.history, self.hints, boost),
            None => 0,
        };
    }

    /// Hands the slot to `page_id`, loaded at op `now`. Returns the previous
    /// occupant when it is dirty and has to be written out first.
    pub fn relabel(&mut self, page_id: PageId, now: Timestamp, boost: u64) -> Option<Occupant> {
        let previous = match self.page_id {
            Some(old) if self.needs_write => Some(Occupant {
                page_id: old,
                history: self.history,
                hints: self.hints,
            }),
            _ => None,
        };
        self.page_id = Some(page_id);
        self.evicting = previous.as_ref().map(|p| p.page_id);
        self.lock_count = 1;
        self.swap_state = SwapState::Swapping;
        self.history = AccessHistory::first_access(now);
        self.hints = PageHint::empty();
        self.needs_write = false;
        self.failure = None;
        self.refresh_score(boost);
        previous
    }

    /// Undoes a `relabel` whose write-back failed: the slot still holds the
    /// previous occupant's bytes, so it goes back to that page, dirty.
    /// Checkouts still waiting for the abandoned page find `failure`.
    pub fn restore(&mut self, previous: Occupant, failure: String, boost: u64) {
        self.page_id = Some(previous.page_id);
        self.evicting = None;
        self.lock_count -= 1;
        self.swap_state = SwapState::Idle;
        self.history = previous.history;
        self.hints = previous.hints;
        self.needs_write = true;
        self.failure = Some(failure);
        self.refresh_score(boost);
    }

    /// Error to hand to a checkout that finds the slot in a failed state.
    pub fn failure_error(&self) -> StraitError {
        match self.swap_state {
            SwapState::FailedNoMemory => StraitError::OutOfMemory,
            _ => StraitError::Critical(
                self.failure
                    .clone()
                    .unwrap_or_else(|| "page swap failed".to_string()),
            ),
        }
    }
}

/// Page bytes of one cache slot.
pub struct Slot {
    slot_id: SlotId,
    data: RwLock<Box<[u8]>>,
}

impl Slot {
    pub fn new(slot_id: SlotId, page_size: usize) -> Self {
        Self {
            slot_id,
            data: RwLock::new(vec![0u8; page_size].into_boxed_slice()),
        }
    }

    pub fn slot_id(&self) -> SlotId {
        self.slot_id
    }

    pub fn read(&self) -> MappedRwLockReadGuard<'_, [u8]> {
        RwLockReadGuard::map(self.data.read(), |data| &data[..])
    }

    pub fn write(&self) -> MappedRwLockWriteGuard<'_, [u8]> {
        RwLockWriteGuard::map(self.data.write(), |data| &mut data[..])
    }
}
