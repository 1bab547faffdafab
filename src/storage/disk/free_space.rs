use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::common::{
    PageId, Result, StraitError, StraitLen, FILE_HEADER_PAGE_ID, RESERVED_PAGES,
};
use crate::storage::page::header::{
    left_sibling, page_type, right_sibling, set_right_sibling, stamp_checksum, verify_checksum,
};
use crate::storage::page::{
    FileHeaderPage, FileHeaderPageRef, FreeListPage, FreeListPageRef, PageType,
};

use super::PageStore;

/// A free-list directory page held in the window.
struct DirectoryPage {
    page_id: PageId,
    data: Box<[u8]>,
}

impl DirectoryPage {
    fn load(store: &PageStore, page_id: PageId) -> Result<Self> {
        let mut data = vec![0u8; store.page_size()].into_boxed_slice();
        store.read_page(page_id, &mut data)?;
        if page_type(&data)? != PageType::FreeList {
            return Err(StraitError::critical(format!(
                "{page_id} in the free-list chain is not a free-list page"
            )));
        }
        if !verify_checksum(&data) {
            return Err(StraitError::critical(format!(
                "checksum mismatch on free-list {page_id}"
            )));
        }
        Ok(Self { page_id, data })
    }

    fn view(&self) -> FreeListPageRef<'_> {
        FreeListPageRef::new(&self.data)
    }

    /// Applies `f` to a copy of the page and writes the copy through. The
    /// resident bytes only change once the write succeeded.
    fn update<T>(
        &mut self,
        store: &PageStore,
        f: impl FnOnce(&mut FreeListPage<'_>) -> Option<T>,
    ) -> Result<Option<T>> {
        let mut copy = self.data.clone();
        let Some(out) = f(&mut FreeListPage::new(&mut copy)) else {
            return Ok(None);
        };
        stamp_checksum(&mut copy);
        store.write_page(self.page_id, &copy)?;
        self.data = copy;
        Ok(Some(out))
    }
}

struct FreeListState {
    /// Resident directory pages, oldest first.
    window: VecDeque<DirectoryPage>,
    /// Right-most page of the on-disk chain.
    head: PageId,
    /// Number of directory pages in the chain.
    chain_len: u32,
}

/// FreeSpaceAllocator hands out and recycles contiguous page runs
/// ("straits").
///
/// Free runs are recorded in a chain of free-list directory pages linked
/// through their sibling pointers; only a bounded window of that chain is
/// kept in memory and searched. Requests the window cannot satisfy grow the
/// file. One mutex serializes every call.
pub struct FreeSpaceAllocator {
    store: Arc<PageStore>,
    window_capacity: usize,
    state: Mutex<FreeListState>,
}

impl FreeSpaceAllocator {
    /// Loads the window from the chain recorded in the file header, newest
    /// page first, following left links.
    pub fn open(store: Arc<PageStore>, window_capacity: usize) -> Result<Self> {
        if window_capacity == 0 {
            return Err(StraitError::InvalidArgument("free-list window needs a page"));
        }

        let header = store.read_file_header()?;
        let header = FileHeaderPageRef::new(&header);
        let head = header.free_list_head().ok_or_else(|| {
            StraitError::critical("file header does not name a free-list page")
        })?;
        let chain_len = header.free_list_count();

        let mut window = VecDeque::with_capacity(window_capacity);
        let mut next = Some(head);
        while let Some(page_id) = next {
            if window.len() == window_capacity {
                break;
            }
            let page = DirectoryPage::load(&store, page_id)?;
            next = left_sibling(&page.data);
            window.push_front(page);
        }

        debug!(
            head = head.as_u64(),
            chain_len,
            resident = window.len(),
            "free_space.open"
        );
        Ok(Self {
            store,
            window_capacity,
            state: Mutex::new(FreeListState {
                window,
                head,
                chain_len,
            }),
        })
    }

    /// Returns the first page of a run of `len` pages, reusing a freed run
    /// when the window has one and growing the file otherwise.
    ///
    /// Recycled pages keep whatever bytes they held; new owners must
    /// initialize them.
    pub fn allocate(&self, len: StraitLen) -> Result<PageId> {
        if len == 0 {
            return Err(StraitError::InvalidArgument("cannot allocate zero pages"));
        }
        let mut state = self.state.lock();

        loop {
            for page in state.window.iter_mut().rev() {
                if page.view().largest_strait() < len {
                    continue;
                }
                if let Some(start) = page.update(&self.store, |p| p.take(len))? {
                    debug!(start = start.as_u64(), len, dir = page.page_id.as_u64(), "free_space.allocate.reuse");
                    return Ok(start);
                }
            }
            if !self.slide_left(&mut state)? {
                break;
            }
        }

        let start = self.store.extend(len as u64)?;
        debug!(start = start.as_u64(), len, "free_space.allocate.grow");
        Ok(start)
    }

    /// Moves the window one page towards the tail of the chain when it is
    /// full, its newest page holds nothing and an older page exists.
    fn slide_left(&self, state: &mut FreeListState) -> Result<bool> {
        if state.window.len() < self.window_capacity {
            return Ok(false);
        }
        let newest_empty = state.window.back().map_or(false, |p| p.view().is_empty());
        let Some(left) = state.window.front().and_then(|p| left_sibling(&p.data)) else {
            return Ok(false);
        };
        if !newest_empty {
            return Ok(false);
        }

        let older = DirectoryPage::load(&self.store, left)?;
        state.window.pop_back();
        state.window.push_front(older);
        debug!(loaded = left.as_u64(), "free_space.window.slide_left");
        Ok(true)
    }

    /// Records `[start, start + len)` as free.
    pub fn free(&self, len: StraitLen, start: PageId) -> Result<()> {
        if len == 0 {
            return Err(StraitError::InvalidArgument("cannot free zero pages"));
        }
        if start.as_u64() < RESERVED_PAGES {
            return Err(StraitError::InvalidArgument("cannot free a reserved page"));
        }
        let end = start
            .checked_offset(len as u64)
            .ok_or(StraitError::InvalidArgument("freed range overflows the page id space"))?;
        if end.as_u64() > self.store.num_pages() {
            return Err(StraitError::InvalidArgument("freed range is past the end of the file"));
        }

        let mut state = self.state.lock();
        if state.window.iter().any(|p| p.view().overlaps(start, len)) {
            warn!(start = start.as_u64(), len, "free_space.free.double_free");
            return Err(StraitError::InvalidArgument("range is already free"));
        }

        if self.record(&mut state, start, len)? {
            return Ok(());
        }

        // reloaded right neighbours may be full too; a brand new page never is
        loop {
            let fresh = self.extend_window(&mut state)?;
            if self.record(&mut state, start, len)? {
                return Ok(());
            }
            if fresh {
                return Err(StraitError::critical(format!(
                    "fresh free-list page could not record {start}+{len}"
                )));
            }
        }
    }

    /// Coalesces with an adjacent ref anywhere in the window, else takes a
    /// null ref slot in a page that has room.
    fn record(&self, state: &mut FreeListState, start: PageId, len: StraitLen) -> Result<bool> {
        for page in state.window.iter_mut().rev() {
            if page
                .update(&self.store, |p| p.coalesce(start, len).then_some(()))?
                .is_some()
            {
                debug!(start = start.as_u64(), len, dir = page.page_id.as_u64(), "free_space.free.coalesce");
                return Ok(true);
            }
        }
        for page in state.window.iter_mut().rev() {
            if page.view().is_full() {
                continue;
            }
            if page
                .update(&self.store, |p| p.insert(start, len).then_some(()))?
                .is_some()
            {
                debug!(start = start.as_u64(), len, dir = page.page_id.as_u64(), "free_space.free.insert");
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Brings one more directory page into the window at its newest end:
    /// the right neighbour of the newest page when the chain continues,
    /// otherwise a brand new page linked at the head of the chain. Returns
    /// whether the page is brand new.
    fn extend_window(&self, state: &mut FreeListState) -> Result<bool> {
        let right = state.window.back().and_then(|p| right_sibling(&p.data));

        let (page, fresh) = match right {
            Some(page_id) => (DirectoryPage::load(&self.store, page_id)?, false),
            None => (self.add_directory_page(state)?, true),
        };

        if state.window.len() == self.window_capacity {
            self.evict_oldest(state)?;
        }
        debug!(page = page.page_id.as_u64(), fresh, "free_space.window.extend");
        state.window.push_back(page);
        Ok(fresh)
    }

    fn evict_oldest(&self, state: &mut FreeListState) -> Result<()> {
        let Some(oldest) = state.window.front().map(|p| p.page_id) else {
            return Ok(());
        };
        if let Some(next) = state.window.get(1) {
            if left_sibling(&next.data) != Some(oldest) {
                return Err(StraitError::critical(format!(
                    "free-list {} does not link back to {oldest}",
                    next.page_id
                )));
            }
        }
        state.window.pop_front();
        Ok(())
    }

    /// Creates a directory page at the end of the file and links it at the
    /// head of the chain.
    ///
    /// The page always comes from file growth rather than the free list:
    /// recycled ids may still have stale bytes resident in a buffer pool,
    /// and directory pages are written around the pool.
    fn add_directory_page(&self, state: &mut FreeListState) -> Result<DirectoryPage> {
        let old_head = state.head;
        let page_id = self.store.extend(1)?;

        let mut data = vec![0u8; self.store.page_size()].into_boxed_slice();
        FreeListPage::new(&mut data).init(Some(old_head));
        stamp_checksum(&mut data);
        self.store.write_page(page_id, &data)?;

        match state.window.iter_mut().find(|p| p.page_id == old_head) {
            Some(resident) => {
                resident.update(&self.store, |p| {
                    p.set_right(Some(page_id));
                    Some(())
                })?;
            }
            None => {
                let mut old = DirectoryPage::load(&self.store, old_head)?;
                set_right_sibling(&mut old.data, Some(page_id));
                stamp_checksum(&mut old.data);
                self.store.write_page(old_head, &old.data)?;
            }
        }

        let mut header = self.store.read_file_header()?;
        let chain_len = state.chain_len + 1;
        {
            let mut page = FileHeaderPage::new(&mut header);
            page.set_free_list_head(page_id);
            page.set_free_list_count(chain_len);
        }
        stamp_checksum(&mut header);
        self.store.write_page(FILE_HEADER_PAGE_ID, &header)?;

        state.head = page_id;
        state.chain_len = chain_len;
        debug!(page = page_id.as_u64(), chain_len, "free_space.chain.add_page");
        Ok(DirectoryPage { page_id, data })
    }

    /// Total free pages recorded in the resident window.
    pub fn resident_free_pages(&self) -> u64 {
        self.state
            .lock()
            .window
            .iter()
            .map(|p| p.view().page_count() as u64)
            .sum()
    }

    /// Ids of the resident directory pages, oldest first.
    pub fn window_pages(&self) -> Vec<PageId> {
        self.state.lock().window.iter().map(|p| p.page_id).collect()
    }

    /// Number of directory pages in the on-disk chain.
    pub fn chain_len(&self) -> u32 {
        self.state.lock().chain_len
    }

    pub fn store(&self) -> &Arc<PageStore> {
        &self.store
    }
}
