use bytes::{Buf, BufMut};

use crate::common::{PageId, StraitLen, PAGE_BODY_OFFSET, PAGE_HEADER_SIZE};

use super::header::{set_right_sibling, PageHeader, PageType};

const LARGEST_STRAIT_OFFSET: usize = PAGE_HEADER_SIZE;
const REF_COUNT_OFFSET: usize = PAGE_HEADER_SIZE + 2;
const PAGE_COUNT_OFFSET: usize = PAGE_HEADER_SIZE + 4;

/// start PageId (8) + strait length (2) + reserved (6)
pub const FREE_REF_SIZE: usize = 16;

/// A run of free pages recorded in a free-list directory page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeletedPageRef {
    pub start: PageId,
    pub len: StraitLen,
}

impl DeletedPageRef {
    pub fn end(&self) -> u64 {
        self.start.as_u64() + self.len as u64
    }

    fn overlaps(&self, start: PageId, len: StraitLen) -> bool {
        start.as_u64() < self.end() && self.start.as_u64() < start.as_u64() + len as u64
    }
}

/// Number of refs one directory page can hold.
pub fn refs_per_page(page_size: usize) -> usize {
    (page_size - PAGE_BODY_OFFSET) / FREE_REF_SIZE
}

/// Mutable view over a free-list directory page.
///
/// The page caches the longest run among its live refs so allocation can
/// reject it without scanning; every mutator here keeps that cache exact.
pub struct FreeListPage<'a> {
    data: &'a mut [u8],
}

impl<'a> FreeListPage<'a> {
    pub fn new(data: &'a mut [u8]) -> Self {
        Self { data }
    }

    /// Formats the page as an empty directory node linked after `left`.
    pub fn init(&mut self, left: Option<PageId>) {
        self.data.fill(0);
        let mut header = PageHeader::new(PageType::FreeList);
        header.left = left;
        header.encode(self.data);
    }

    pub fn view(&self) -> FreeListPageRef<'_> {
        FreeListPageRef::new(&*self.data)
    }

    pub fn set_right(&mut self, right: Option<PageId>) {
        set_right_sibling(self.data, right);
    }

    fn set_ref(&mut self, index: usize, entry: Option<DeletedPageRef>) {
        let offset = PAGE_BODY_OFFSET + index * FREE_REF_SIZE;
        let mut buf = &mut self.data[offset..offset + FREE_REF_SIZE];
        match entry {
            Some(entry) => {
                buf.put_u64_le(entry.start.as_u64());
                buf.put_u16_le(entry.len);
            }
            None => {
                buf.put_u64_le(0);
                buf.put_u16_le(0);
            }
        }
    }

    fn set_summary(&mut self, largest: StraitLen, refs: u16, pages: u32) {
        (&mut self.data[LARGEST_STRAIT_OFFSET..LARGEST_STRAIT_OFFSET + 2]).put_u16_le(largest);
        (&mut self.data[REF_COUNT_OFFSET..REF_COUNT_OFFSET + 2]).put_u16_le(refs);
        (&mut self.data[PAGE_COUNT_OFFSET..PAGE_COUNT_OFFSET + 4]).put_u32_le(pages);
    }

    /// Rebuilds largest strait, live ref count and page count from the refs.
    fn recompute_summary(&mut self) {
        let (mut largest, mut refs, mut pages) = (0u16, 0u16, 0u32);
        for entry in self.view().refs().flatten() {
            largest = largest.max(entry.len);
            refs += 1;
            pages += entry.len as u32;
        }
        self.set_summary(largest, refs, pages);
    }

    /// Carves `len` pages off the front of the first ref long enough to
    /// hold them.
    pub fn take(&mut self, len: StraitLen) -> Option<PageId> {
        if self.view().largest_strait() < len {
            return None;
        }
        let (index, entry) = self
            .view()
            .refs()
            .enumerate()
            .find_map(|(i, e)| e.filter(|e| e.len >= len).map(|e| (i, e)))?;

        let remaining = entry.len - len;
        let rest = if remaining == 0 {
            None
        } else {
            Some(DeletedPageRef {
                start: entry.start.offset(len as u64),
                len: remaining,
            })
        };
        self.set_ref(index, rest);
        self.recompute_summary();
        Some(entry.start)
    }

    /// Grows a ref that touches `[start, start + len)` to cover it. When the
    /// run bridges two refs of this page they become one, as long as the
    /// result still fits a strait length.
    pub fn coalesce(&mut self, start: PageId, len: StraitLen) -> bool {
        let end = start.as_u64() + len as u64;
        let mut below = None;
        let mut above = None;
        for (i, entry) in self.view().refs().enumerate() {
            let Some(entry) = entry else { continue };
            if entry.end() == start.as_u64() {
                below = Some((i, entry));
            } else if entry.start.as_u64() == end {
                above = Some((i, entry));
            }
        }

        let fits = |total: u32| total <= StraitLen::MAX as u32;
        let (index, merged, absorbed) = match (below, above) {
            (Some((i, b)), Some((j, a))) if fits(b.len as u32 + len as u32 + a.len as u32) => (
                i,
                DeletedPageRef { start: b.start, len: b.len + len + a.len },
                Some(j),
            ),
            (Some((i, b)), _) if fits(b.len as u32 + len as u32) => {
                (i, DeletedPageRef { start: b.start, len: b.len + len }, None)
            }
            (_, Some((j, a))) if fits(a.len as u32 + len as u32) => {
                (j, DeletedPageRef { start, len: a.len + len }, None)
            }
            _ => return false,
        };

        self.set_ref(index, Some(merged));
        if let Some(absorbed) = absorbed {
            self.set_ref(absorbed, None);
        }
        self.recompute_summary();
        true
    }

    /// Records the run in the first null ref slot.
    pub fn insert(&mut self, start: PageId, len: StraitLen) -> bool {
        let Some(index) = self.view().refs().position(|e| e.is_none()) else {
            return false;
        };
        self.set_ref(index, Some(DeletedPageRef { start, len }));
        self.recompute_summary();
        true
    }
}

/// Read-only view over a free-list directory page.
pub struct FreeListPageRef<'a> {
    data: &'a [u8],
}

impl<'a> FreeListPageRef<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    pub fn largest_strait(&self) -> StraitLen {
        (&self.data[LARGEST_STRAIT_OFFSET..LARGEST_STRAIT_OFFSET + 2]).get_u16_le()
    }

    pub fn ref_count(&self) -> u16 {
        (&self.data[REF_COUNT_OFFSET..REF_COUNT_OFFSET + 2]).get_u16_le()
    }

    pub fn page_count(&self) -> u32 {
        (&self.data[PAGE_COUNT_OFFSET..PAGE_COUNT_OFFSET + 4]).get_u32_le()
    }

    pub fn capacity(&self) -> usize {
        refs_per_page(self.data.len())
    }

    pub fn is_full(&self) -> bool {
        self.ref_count() as usize >= self.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.ref_count() == 0
    }

    pub fn get_ref(&self, index: usize) -> Option<DeletedPageRef> {
        let offset = PAGE_BODY_OFFSET + index * FREE_REF_SIZE;
        let mut buf = &self.data[offset..offset + FREE_REF_SIZE];
        let start = PageId::from_raw(buf.get_u64_le())?;
        let len = buf.get_u16_le();
        Some(DeletedPageRef { start, len })
    }

    /// Every ref slot in order, `None` for null slots.
    pub fn refs(&self) -> impl Iterator<Item = Option<DeletedPageRef>> + '_ {
        (0..self.capacity()).map(move |i| self.get_ref(i))
    }

    pub fn overlaps(&self, start: PageId, len: StraitLen) -> bool {
        self.refs().flatten().any(|e| e.overlaps(start, len))
    }
}
