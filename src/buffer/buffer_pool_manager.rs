use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, MappedRwLockReadGuard, MappedRwLockWriteGuard, Mutex, MutexGuard};
use tracing::{debug, error, warn};

use crate::common::{PageId, Result, SlotId, StorageConfig, StraitError, Timestamp};
use crate::storage::disk::PageStore;
use crate::storage::page::header::stamp_checksum;

use super::replacer::PageHint;
use super::slot::{Slot, SlotMeta, SwapState};

/// Slot bookkeeping shared by every checkout, guarded by one mutex.
struct PoolState {
    metas: Vec<SlotMeta>,
    /// Advanced on every checkout; feeds the access histories.
    op_counter: Timestamp,
    /// Where the next victim scan begins.
    next_start: usize,
}

impl PoolState {
    fn tick(&mut self) -> Timestamp {
        self.op_counter += 1;
        self.op_counter
    }

    fn find(&self, page_id: PageId) -> Option<usize> {
        self.metas.iter().position(|m| m.page_id == Some(page_id))
    }

    fn is_being_written(&self, page_id: PageId) -> bool {
        self.metas
            .iter()
            .any(|m| m.swap_state == SwapState::Swapping && m.evicting == Some(page_id))
    }

    /// Lowest-scoring evictable slot, scanning from a rotating offset so
    /// ties do not always land on the same slots.
    fn pick_victim(&mut self) -> Option<usize> {
        let n = self.metas.len();
        let start = self.next_start;
        self.next_start = (start + 1) % n;

        let mut best: Option<(usize, u64)> = None;
        for i in 0..n {
            let index = (start + i) % n;
            let meta = &self.metas[index];
            if !meta.is_evictable() {
                continue;
            }
            if best.map_or(true, |(_, score)| meta.score < score) {
                best = Some((index, meta.score));
            }
        }
        best.map(|(index, _)| index)
    }
}

/// BufferPool keeps a fixed set of page slots and arbitrates concurrent
/// checkouts of pages by id.
///
/// A page is resident in at most one slot. Checkouts of a resident page
/// share its slot; a miss picks the unlocked slot with the lowest eviction
/// score, writes its old page back if dirty and reads the new one. Racing
/// checkouts of the same missing page wait for the one swap in flight and
/// all observe its outcome. Callers block, without spinning, when the slot
/// they need is mid-swap or when every slot is locked.
///
/// The pool arbitrates residency only: two checkouts of the same page see
/// the same bytes and must coordinate writes themselves.
pub struct BufferPool {
    store: Arc<PageStore>,
    slots: Vec<Slot>,
    state: Mutex<PoolState>,
    /// Signalled whenever a swap finishes or a slot becomes unlocked.
    available: Condvar,
    boost: u64,
    handles: AtomicUsize,
}

/// Message shared with every checkout that observes a failed swap.
fn failure_message(err: &StraitError) -> String {
    match err {
        StraitError::Critical(msg) => msg.clone(),
        other => other.to_string(),
    }
}

impl BufferPool {
    pub fn new(store: Arc<PageStore>, config: &StorageConfig) -> Result<Self> {
        config.validate()?;
        if config.page_size() != store.page_size() {
            return Err(StraitError::InvalidArgument(
                "pool page size differs from the store's",
            ));
        }

        let slots = (0..config.slot_count)
            .map(|i| Slot::new(SlotId::new(i as u32), store.page_size()))
            .collect();
        let metas = (0..config.slot_count).map(|_| SlotMeta::empty()).collect();

        Ok(Self {
            store,
            slots,
            state: Mutex::new(PoolState {
                metas,
                op_counter: 0,
                next_start: 0,
            }),
            available: Condvar::new(),
            boost: config.slot_boost(),
            handles: AtomicUsize::new(0),
        })
    }

    /// Locks `page_id` into a slot, loading it on a miss, and returns the
    /// slot. Every successful checkout must be paired with one
    /// [`BufferPool::release`].
    pub fn checkout(&self, page_id: PageId) -> Result<SlotId> {
        if page_id.is_null() || page_id.is_new() {
            return Err(StraitError::InvalidArgument("cannot check out the null page"));
        }
        if page_id.as_u64() >= self.store.num_pages() {
            return Err(StraitError::Eof(page_id));
        }

        let mut state = self.state.lock();
        loop {
            // a write-back of this page must land before anyone reads it
            if state.is_being_written(page_id) {
                self.available.wait(&mut state);
                continue;
            }

            if let Some(index) = state.find(page_id) {
                return self.checkout_resident(state, index, page_id);
            }

            match state.pick_victim() {
                Some(index) => return self.swap_in(state, index, page_id),
                None => {
                    debug!(page = page_id.as_u64(), "buffer.checkout.all_slots_locked");
                    self.available.wait(&mut state);
                }
            }
        }
    }

    fn checkout_resident(
        &self,
        mut state: MutexGuard<'_, PoolState>,
        index: usize,
        page_id: PageId,
    ) -> Result<SlotId> {
        let now = state.tick();
        let meta = &mut state.metas[index];
        meta.lock_count += 1;
        meta.history.record_access(now);
        meta.refresh_score(self.boost);

        while state.metas[index].swap_state == SwapState::Swapping {
            self.available.wait(&mut state);
        }

        // a failed write-back hands the slot back to its previous page
        let meta = &mut state.metas[index];
        if meta.swap_state != SwapState::Idle || meta.page_id != Some(page_id) {
            meta.lock_count -= 1;
            let err = meta.failure_error();
            self.available.notify_all();
            return Err(err);
        }
        Ok(SlotId::new(index as u32))
    }

    fn swap_in(&self, mut state: MutexGuard<'_, PoolState>, index: usize, page_id: PageId) -> Result<SlotId> {
        let now = state.tick();
        let previous = state.metas[index].relabel(page_id, now, self.boost);
        drop(state);

        debug!(
            page = page_id.as_u64(),
            slot = index,
            write_back = previous.as_ref().map(|p| p.page_id.as_u64()),
            "buffer.checkout.miss"
        );

        if let Some(previous) = previous {
            if let Err(err) = self.write_back(index, previous.page_id) {
                let mut state = self.state.lock();
                state.metas[index].restore(previous, failure_message(&err), self.boost);
                self.available.notify_all();
                return Err(err);
            }
        }
        let result = self.read_in(index, page_id);

        let mut state = self.state.lock();
        let meta = &mut state.metas[index];
        meta.evicting = None;
        let outcome = match result {
            Ok(()) => {
                meta.swap_state = SwapState::Idle;
                Ok(SlotId::new(index as u32))
            }
            Err(err) => {
                meta.swap_state = match err {
                    StraitError::OutOfMemory => SwapState::FailedNoMemory,
                    _ => SwapState::FailedCritical,
                };
                meta.failure = Some(failure_message(&err));
                meta.page_id = None;
                meta.lock_count -= 1;
                meta.refresh_score(self.boost);
                Err(err)
            }
        };
        self.available.notify_all();
        outcome
    }

    /// Persists the slot's dirty previous occupant before the slot is reused.
    fn write_back(&self, index: usize, old: PageId) -> Result<()> {
        let mut data = self.slots[index].write();
        stamp_checksum(&mut data);
        if let Err(err) = self.store.write_page(old, &data) {
            return Err(StraitError::critical(format!("write-back of {old} failed: {err}")));
        }
        debug!(page = old.as_u64(), slot = index, "buffer.swap.write_back");
        Ok(())
    }

    fn read_in(&self, index: usize, page_id: PageId) -> Result<()> {
        let mut data = self.slots[index].write();
        match self.store.read_page(page_id, &mut data) {
            Ok(()) => Ok(()),
            Err(StraitError::Io(err)) if err.kind() == std::io::ErrorKind::OutOfMemory => {
                warn!(page = page_id.as_u64(), "buffer.swap.out_of_memory");
                Err(StraitError::OutOfMemory)
            }
            Err(StraitError::OutOfMemory) => Err(StraitError::OutOfMemory),
            Err(err) => Err(StraitError::critical(format!(
                "swap-in of {page_id} failed: {err}"
            ))),
        }
    }

    /// Drops one lock on `slot_id` and folds `hints` into the slot's sticky
    /// hints. A `DIRTY` hint schedules a write-back before reuse.
    pub fn release(&self, slot_id: SlotId, hints: PageHint) {
        let mut state = self.state.lock();
        let Some(meta) = state.metas.get_mut(slot_id.as_usize()) else {
            warn!(slot = slot_id.as_u32(), "buffer.release.unknown_slot");
            return;
        };
        if meta.lock_count == 0 {
            debug!(slot = slot_id.as_u32(), "buffer.release.not_locked");
            return;
        }

        meta.hints = meta.hints.merge(hints);
        if hints.contains(PageHint::DIRTY) {
            meta.needs_write = true;
        }
        meta.lock_count -= 1;
        meta.refresh_score(self.boost);
        if meta.lock_count == 0 {
            self.available.notify_all();
        }
    }

    /// Shared view of a checked-out slot's bytes.
    pub fn read_slot(&self, slot_id: SlotId) -> MappedRwLockReadGuard<'_, [u8]> {
        self.slots[slot_id.as_usize()].read()
    }

    /// Mutable view of a checked-out slot's bytes. Callers release the slot
    /// with `PageHint::DIRTY` afterwards.
    pub fn write_slot(&self, slot_id: SlotId) -> MappedRwLockWriteGuard<'_, [u8]> {
        self.slots[slot_id.as_usize()].write()
    }

    /// Writes `page_id` to disk if it is resident and dirty. Returns whether
    /// anything was written.
    pub fn flush_page(&self, page_id: PageId) -> Result<bool> {
        let index = {
            let mut state = self.state.lock();
            loop {
                let Some(index) = state.find(page_id) else {
                    return Ok(false);
                };
                if state.metas[index].swap_state == SwapState::Swapping {
                    self.available.wait(&mut state);
                    continue;
                }
                let meta = &mut state.metas[index];
                if meta.swap_state != SwapState::Idle || !meta.needs_write {
                    return Ok(false);
                }
                // pinned so the slot cannot be swapped while we write it
                meta.lock_count += 1;
                meta.needs_write = false;
                break index;
            }
        };

        let result = {
            let mut data = self.slots[index].write();
            stamp_checksum(&mut data);
            self.store.write_page(page_id, &data)
        };

        let mut state = self.state.lock();
        let meta = &mut state.metas[index];
        if result.is_err() {
            meta.needs_write = true;
        }
        meta.lock_count -= 1;
        if meta.lock_count == 0 {
            self.available.notify_all();
        }
        drop(state);

        if let Err(err) = result {
            error!(page = page_id.as_u64(), error = %err, "buffer.flush.failed");
            return Err(err);
        }
        debug!(page = page_id.as_u64(), slot = index, "buffer.flush");
        Ok(true)
    }

    /// Writes every dirty resident page to disk.
    pub fn flush_all(&self) -> Result<usize> {
        let dirty: Vec<PageId> = {
            let state = self.state.lock();
            state
                .metas
                .iter()
                .filter(|m| m.needs_write)
                .filter_map(|m| m.page_id)
                .collect()
        };

        let mut flushed = 0;
        for page_id in dirty {
            if self.flush_page(page_id)? {
                flushed += 1;
            }
        }
        Ok(flushed)
    }

    /// Outstanding checkouts of `page_id`, `None` when it is not resident.
    pub fn lock_count(&self, page_id: PageId) -> Option<u32> {
        let state = self.state.lock();
        state.find(page_id).map(|index| state.metas[index].lock_count)
    }

    pub fn is_resident(&self, page_id: PageId) -> bool {
        self.state.lock().find(page_id).is_some()
    }

    /// Ids of all resident pages, in ascending order.
    pub fn resident_pages(&self) -> Vec<PageId> {
        let state = self.state.lock();
        let mut pages: Vec<PageId> = state.metas.iter().filter_map(|m| m.page_id).collect();
        pages.sort();
        pages
    }

    pub(crate) fn register_handle(&self) -> Result<()> {
        let limit = self.slots.len();
        self.handles
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| (n < limit).then_some(n + 1))
            .map(|_| ())
            .map_err(|_| StraitError::TooManyHandles(limit))
    }

    pub(crate) fn unregister_handle(&self) {
        self.handles.fetch_sub(1, Ordering::AcqRel);
    }

    pub fn handle_count(&self) -> usize {
        self.handles.load(Ordering::Acquire)
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub fn page_size(&self) -> usize {
        self.store.page_size()
    }

    pub fn store(&self) -> &Arc<PageStore> {
        &self.store
    }
}
