use std::fmt;

/// Page identifier - the 0-based position of a page inside the database file.
///
/// Page 0 is the file header and never a valid checkout target, so the
/// on-disk value 0 doubles as the null reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PageId(pub u64);

impl PageId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// Returns true for the null reference (page 0).
    pub fn is_null(&self) -> bool {
        self.0 == 0
    }

    /// Returns true for the "allocate me a new page" sentinel.
    pub fn is_new(&self) -> bool {
        *self == NEW_PAGE_ID
    }

    /// Returns the id `n` pages further into the file. Only for ids already
    /// known to lie inside the file; use [`PageId::checked_offset`] on
    /// caller-supplied ids.
    pub fn offset(&self, n: u64) -> PageId {
        PageId(self.0 + n)
    }

    /// Like [`PageId::offset`], `None` when the result does not fit a `u64`.
    pub fn checked_offset(&self, n: u64) -> Option<PageId> {
        self.0.checked_add(n).map(PageId)
    }

    /// Decodes an on-disk reference, mapping 0 to `None`.
    pub fn from_raw(raw: u64) -> Option<PageId> {
        if raw == 0 {
            None
        } else {
            Some(PageId(raw))
        }
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PageId({})", self.0)
    }
}

/// The null page reference.
pub const NULL_PAGE_ID: PageId = PageId(0);

/// Passing this to `PageHandle::start` allocates a fresh page first.
pub const NEW_PAGE_ID: PageId = PageId(u64::MAX);

/// Slot identifier - index of a cache line in the buffer pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotId(pub u32);

impl SlotId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn as_usize(&self) -> usize {
        self.0 as usize
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SlotId({})", self.0)
    }
}

/// Value of the pool's operation counter at the time of an access.
pub type Timestamp = u64;

/// Number of pages in a contiguous run.
pub type StraitLen = u16;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checked_offset() {
        assert_eq!(PageId::new(5).checked_offset(3), Some(PageId::new(8)));
        assert_eq!(NEW_PAGE_ID.checked_offset(1), None);
        assert_eq!(PageId::new(u64::MAX - 1).checked_offset(1), Some(NEW_PAGE_ID));
    }
}
