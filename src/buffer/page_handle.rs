use std::sync::Arc;

use parking_lot::{MappedRwLockReadGuard, MappedRwLockWriteGuard};
use tracing::{debug, warn};

use crate::common::{PageId, Result, SlotId, StraitError, StraitLen};
use crate::storage::disk::FreeSpaceAllocator;

use super::replacer::PageHint;
use super::BufferPool;

/// The page a handle currently has checked out.
struct Checkout {
    page_id: PageId,
    slot_id: SlotId,
    hints: PageHint,
}

/// A worker's session against the buffer pool: at most one page checked
/// out at a time, bracketed by [`PageHandle::start`] and
/// [`PageHandle::finish`].
///
/// Dropping a handle finishes any open checkout. The pool refuses to create
/// more handles than it has slots, so handles alone can never lock every
/// slot while another handle waits for one.
pub struct PageHandle {
    pool: Arc<BufferPool>,
    allocator: Arc<FreeSpaceAllocator>,
    current: Option<Checkout>,
}

impl PageHandle {
    pub fn new(pool: Arc<BufferPool>, allocator: Arc<FreeSpaceAllocator>) -> Result<Self> {
        pool.register_handle()?;
        Ok(Self {
            pool,
            allocator,
            current: None,
        })
    }

    /// Checks out `page_id`, or with `NEW_PAGE_ID` allocates a run of
    /// `strait_len` pages first and checks out its first page. Returns the
    /// id that was checked out.
    ///
    /// Freshly allocated pages may hold a previous owner's bytes.
    pub fn start(&mut self, page_id: PageId, strait_len: StraitLen) -> Result<PageId> {
        if let Some(current) = &self.current {
            warn!(
                held = current.page_id.as_u64(),
                requested = page_id.as_u64(),
                "page_handle.start.already_started"
            );
            return Err(StraitError::AlreadyStarted(current.page_id));
        }

        let allocated = if page_id.is_new() {
            if strait_len == 0 {
                return Err(StraitError::InvalidArgument("new page needs a strait length"));
            }
            let allocated = self.allocator.allocate(strait_len)?;
            debug!(page = allocated.as_u64(), strait_len, "page_handle.start.allocated");
            Some(allocated)
        } else {
            None
        };
        let page_id = allocated.unwrap_or(page_id);

        let slot_id = match self.pool.checkout(page_id) {
            Ok(slot_id) => slot_id,
            Err(err) => {
                // nobody else knows the new run yet, hand it back
                if allocated.is_some() {
                    if let Err(free_err) = self.allocator.free(strait_len, page_id) {
                        warn!(
                            page = page_id.as_u64(),
                            strait_len,
                            error = %free_err,
                            "page_handle.start.leaked_allocation"
                        );
                    }
                }
                return Err(err);
            }
        };
        self.current = Some(Checkout {
            page_id,
            slot_id,
            hints: PageHint::empty(),
        });
        Ok(page_id)
    }

    fn checkout(&self) -> Result<&Checkout> {
        self.current.as_ref().ok_or(StraitError::NotStarted)
    }

    /// Shared view of the checked-out page.
    pub fn raw(&self) -> Result<MappedRwLockReadGuard<'_, [u8]>> {
        let slot_id = self.checkout()?.slot_id;
        Ok(self.pool.read_slot(slot_id))
    }

    /// Mutable view of the checked-out page. Marks it dirty.
    pub fn raw_mut(&mut self) -> Result<MappedRwLockWriteGuard<'_, [u8]>> {
        let current = self.current.as_mut().ok_or(StraitError::NotStarted)?;
        current.hints = current.hints.merge(PageHint::DIRTY);
        let slot_id = current.slot_id;
        Ok(self.pool.write_slot(slot_id))
    }

    /// Declares hints for the checked-out page, applied at finish.
    pub fn hint(&mut self, hints: PageHint) -> Result<()> {
        match self.current.as_mut() {
            Some(current) => {
                current.hints = current.hints.merge(hints);
                Ok(())
            }
            None => {
                warn!(hints = hints.bits(), "page_handle.hint.not_started");
                Err(StraitError::NotStarted)
            }
        }
    }

    /// Releases the checked-out page. Does nothing if none is.
    pub fn finish(&mut self) {
        if let Some(current) = self.current.take() {
            self.pool.release(current.slot_id, current.hints);
        }
    }

    /// Id of the checked-out page.
    pub fn page_id(&self) -> Option<PageId> {
        self.current.as_ref().map(|c| c.page_id)
    }

    pub fn is_started(&self) -> bool {
        self.current.is_some()
    }

    pub fn pool(&self) -> &Arc<BufferPool> {
        &self.pool
    }

    pub fn allocator(&self) -> &Arc<FreeSpaceAllocator> {
        &self.allocator
    }
}

impl Drop for PageHandle {
    fn drop(&mut self) {
        self.finish();
        self.pool.unregister_handle();
    }
}
