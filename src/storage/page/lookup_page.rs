use bytes::{Buf, BufMut};

use crate::common::{PageId, Result, StraitError, PAGE_BODY_OFFSET, PAGE_HEADER_SIZE};

use super::header::{PageHeader, PageType};

const PARENT_OFFSET: usize = PAGE_HEADER_SIZE;
const ENTRY_ID_OFFSET: usize = PAGE_HEADER_SIZE + 8;
const STRAIT_COUNT_OFFSET: usize = PAGE_HEADER_SIZE + 10;
const DEPTH_OFFSET: usize = PAGE_HEADER_SIZE + 12;

/// reference (8) + exclusive end offset (8)
pub const LOOKUP_STRAIT_SIZE: usize = 16;

/// One entry of a lookup node: every offset below `end` (and at or above the
/// previous strait's end) is covered by `reference`.
///
/// At depth 0 `reference` is the page id that offset `end` would map to, so
/// an offset inside the strait resolves to `reference - (end - offset)`. At
/// higher depths it is the child lookup node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LookupStrait {
    pub end: u64,
    pub reference: PageId,
}

impl LookupStrait {
    /// Physical page for `offset`, valid only on depth-0 straits that
    /// cover it. `None` when the arithmetic lands before page 1.
    pub fn leaf_page(&self, offset: u64) -> Option<PageId> {
        let back = self.end.checked_sub(offset)?;
        self.reference
            .as_u64()
            .checked_sub(back)
            .and_then(PageId::from_raw)
    }
}

pub fn straits_per_page(page_size: usize) -> usize {
    (page_size - PAGE_BODY_OFFSET) / LOOKUP_STRAIT_SIZE
}

pub struct LookupPage<'a> {
    data: &'a mut [u8],
}

impl<'a> LookupPage<'a> {
    pub fn new(data: &'a mut [u8]) -> Self {
        Self { data }
    }

    pub fn init(&mut self, depth: u8, parent: Option<PageId>, entry_id: u16) {
        self.data.fill(0);
        PageHeader::new(PageType::Lookup).encode(self.data);
        (&mut self.data[PARENT_OFFSET..PARENT_OFFSET + 8])
            .put_u64_le(parent.map_or(0, |p| p.as_u64()));
        (&mut self.data[ENTRY_ID_OFFSET..ENTRY_ID_OFFSET + 2]).put_u16_le(entry_id);
        self.data[DEPTH_OFFSET] = depth;
    }

    pub fn view(&self) -> LookupPageRef<'_> {
        LookupPageRef::new(&*self.data)
    }

    /// Appends a strait. End offsets must be strictly increasing.
    pub fn push_strait(&mut self, strait: LookupStrait) -> Result<()> {
        let view = self.view();
        let count = view.strait_count() as usize;
        if count >= view.capacity() {
            return Err(StraitError::InvalidArgument("lookup node is full"));
        }
        if strait.reference.is_null() {
            return Err(StraitError::InvalidArgument("lookup strait needs a reference"));
        }
        if let Some(last) = view.last_strait() {
            if strait.end <= last.end {
                return Err(StraitError::InvalidArgument(
                    "lookup strait end offsets must be strictly increasing",
                ));
            }
        } else if strait.end == 0 {
            return Err(StraitError::InvalidArgument("lookup strait cannot be empty"));
        }

        let offset = PAGE_BODY_OFFSET + count * LOOKUP_STRAIT_SIZE;
        let mut buf = &mut self.data[offset..offset + LOOKUP_STRAIT_SIZE];
        buf.put_u64_le(strait.reference.as_u64());
        buf.put_u64_le(strait.end);
        (&mut self.data[STRAIT_COUNT_OFFSET..STRAIT_COUNT_OFFSET + 2])
            .put_u16_le(count as u16 + 1);
        Ok(())
    }

    /// Extends the last strait to a new end. Ranges only ever grow, so
    /// readers descending concurrently keep resolving published offsets.
    pub fn extend_last(&mut self, new_end: u64, new_reference: PageId) -> Result<()> {
        let count = self.view().live_count();
        let last = self
            .view()
            .last_strait()
            .ok_or(StraitError::InvalidArgument("lookup node has no straits"))?;
        if new_end <= last.end {
            return Err(StraitError::InvalidArgument("lookup straits can only be extended"));
        }
        let offset = PAGE_BODY_OFFSET + (count - 1) * LOOKUP_STRAIT_SIZE;
        let mut buf = &mut self.data[offset..offset + LOOKUP_STRAIT_SIZE];
        buf.put_u64_le(new_reference.as_u64());
        buf.put_u64_le(new_end);
        Ok(())
    }
}

pub struct LookupPageRef<'a> {
    data: &'a [u8],
}

impl<'a> LookupPageRef<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    pub fn parent(&self) -> Option<PageId> {
        PageId::from_raw((&self.data[PARENT_OFFSET..PARENT_OFFSET + 8]).get_u64_le())
    }

    pub fn entry_id(&self) -> u16 {
        (&self.data[ENTRY_ID_OFFSET..ENTRY_ID_OFFSET + 2]).get_u16_le()
    }

    pub fn strait_count(&self) -> u16 {
        (&self.data[STRAIT_COUNT_OFFSET..STRAIT_COUNT_OFFSET + 2]).get_u16_le()
    }

    pub fn depth(&self) -> u8 {
        self.data[DEPTH_OFFSET]
    }

    pub fn capacity(&self) -> usize {
        straits_per_page(self.data.len())
    }

    /// False when the stored strait count cannot fit in the page.
    pub fn is_count_valid(&self) -> bool {
        self.strait_count() as usize <= self.capacity()
    }

    /// Stored strait count, clamped to what the page can hold.
    fn live_count(&self) -> usize {
        (self.strait_count() as usize).min(self.capacity())
    }

    pub fn get_strait(&self, index: usize) -> Option<LookupStrait> {
        if index >= self.live_count() {
            return None;
        }
        let offset = PAGE_BODY_OFFSET + index * LOOKUP_STRAIT_SIZE;
        let mut buf = &self.data[offset..offset + LOOKUP_STRAIT_SIZE];
        let reference = PageId::new(buf.get_u64_le());
        let end = buf.get_u64_le();
        Some(LookupStrait { end, reference })
    }

    pub fn last_strait(&self) -> Option<LookupStrait> {
        match self.live_count() {
            0 => None,
            n => self.get_strait(n - 1),
        }
    }

    pub fn straits(&self) -> impl Iterator<Item = LookupStrait> + '_ {
        (0..self.live_count()).filter_map(move |i| self.get_strait(i))
    }

    /// First strait whose end offset exceeds `offset`.
    pub fn find(&self, offset: u64) -> Option<LookupStrait> {
        self.straits().find(|s| s.end > offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::NATIVE_PAGE_SIZE;
    use crate::storage::page::header::page_type;

    fn strait(end: u64, reference: u64) -> LookupStrait {
        LookupStrait {
            end,
            reference: PageId::new(reference),
        }
    }

    #[test]
    fn test_lookup_page_init() {
        let mut data = vec![0u8; NATIVE_PAGE_SIZE];
        LookupPage::new(&mut data).init(2, Some(PageId::new(9)), 4);

        let view = LookupPageRef::new(&data);
        assert_eq!(page_type(&data).unwrap(), PageType::Lookup);
        assert_eq!(view.depth(), 2);
        assert_eq!(view.parent(), Some(PageId::new(9)));
        assert_eq!(view.entry_id(), 4);
        assert_eq!(view.strait_count(), 0);
        assert_eq!(view.find(0), None);
    }

    #[test]
    fn test_find_first_strait_past_offset() {
        let mut data = vec![0u8; NATIVE_PAGE_SIZE];
        let mut page = LookupPage::new(&mut data);
        page.init(0, None, 0);
        page.push_strait(strait(5, 100)).unwrap();
        page.push_strait(strait(9, 104)).unwrap();

        let view = page.view();
        assert_eq!(view.find(0), Some(strait(5, 100)));
        assert_eq!(view.find(4), Some(strait(5, 100)));
        assert_eq!(view.find(5), Some(strait(9, 104)));
        assert_eq!(view.find(9), None);
    }

    #[test]
    fn test_straits_must_increase() {
        let mut data = vec![0u8; NATIVE_PAGE_SIZE];
        let mut page = LookupPage::new(&mut data);
        page.init(0, None, 0);
        page.push_strait(strait(5, 100)).unwrap();

        assert!(page.push_strait(strait(5, 120)).is_err());
        assert!(page.push_strait(strait(3, 120)).is_err());
        assert!(page.push_strait(strait(8, 0)).is_err());
        assert_eq!(page.view().strait_count(), 1);
    }

    #[test]
    fn test_extend_last() {
        let mut data = vec![0u8; NATIVE_PAGE_SIZE];
        let mut page = LookupPage::new(&mut data);
        page.init(0, None, 0);
        page.push_strait(strait(4, 50)).unwrap();
        page.extend_last(6, PageId::new(52)).unwrap();

        assert_eq!(page.view().last_strait(), Some(strait(6, 52)));
        assert!(page.extend_last(6, PageId::new(52)).is_err());
    }

    #[test]
    fn test_corrupt_count_is_clamped() {
        let mut data = vec![0u8; NATIVE_PAGE_SIZE];
        let mut page = LookupPage::new(&mut data);
        page.init(0, None, 0);
        page.push_strait(strait(5, 100)).unwrap();
        (&mut data[STRAIT_COUNT_OFFSET..STRAIT_COUNT_OFFSET + 2]).put_u16_le(u16::MAX);

        let view = LookupPageRef::new(&data);
        assert!(!view.is_count_valid());
        assert_eq!(view.straits().count(), view.capacity());
        assert_eq!(view.find(0), Some(strait(5, 100)));
        assert_eq!(view.get_strait(view.capacity()), None);
        assert_eq!(view.last_strait(), Some(strait(0, 0)));
    }

    #[test]
    fn test_leaf_page_formula() {
        // offsets 4..9 live on pages 42..47; reference names the page offset 9 would use
        let s = strait(9, 47);
        assert_eq!(s.leaf_page(4), Some(PageId::new(42)));
        assert_eq!(s.leaf_page(8), Some(PageId::new(46)));
        assert_eq!(strait(9, 3).leaf_page(4), None);
    }
}
