use super::error::{Result, StraitError};
use super::types::PageId;

/// Native page size unit; the database page size is this times the multiplier.
pub const NATIVE_PAGE_SIZE: usize = 4096;

/// Size of the fixed page header shared by every page type.
pub const PAGE_HEADER_SIZE: usize = 32;

/// Size of the type-specific sub-header that follows the fixed header.
pub const TYPE_HEADER_SIZE: usize = 16;

/// Offset of the page body.
pub const PAGE_BODY_OFFSET: usize = PAGE_HEADER_SIZE + TYPE_HEADER_SIZE;

/// Pages every database file starts with: the file header and the first
/// free-list directory page.
pub const RESERVED_PAGES: u64 = 2;

/// Page id of the file header.
pub const FILE_HEADER_PAGE_ID: PageId = PageId(0);

/// Page id of the free-list directory page created with the file.
pub const FIRST_FREE_LIST_PAGE_ID: PageId = PageId(1);

/// K value of the LRU-K history kept per slot
pub const LRU_K: usize = 2;

/// Default buffer pool size (number of slots)
pub const DEFAULT_SLOT_COUNT: usize = 64;

/// Default fraction of the pool capacity a hint tier is worth.
pub const DEFAULT_SLOT_BOOST_FRACTION: f32 = 0.10;

/// Default number of free-list directory pages kept resident.
pub const DEFAULT_FREE_LIST_WINDOW: usize = 4;

/// Tunables for opening a database file.
#[derive(Debug, Clone, PartialEq)]
pub struct StorageConfig {
    /// Page size multiplier, one of 1, 2, 4 or 8.
    pub page_multiplier: u16,
    /// Number of cache slots in the buffer pool.
    pub slot_count: usize,
    /// Fraction of `slot_count` that one hint tier adds to a slot's score.
    pub slot_boost_fraction: f32,
    /// Number of free-list directory pages kept in memory.
    pub free_list_window: usize,
    /// Hard cap on the number of pages in the file.
    pub max_pages: Option<u64>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            page_multiplier: 1,
            slot_count: DEFAULT_SLOT_COUNT,
            slot_boost_fraction: DEFAULT_SLOT_BOOST_FRACTION,
            free_list_window: DEFAULT_FREE_LIST_WINDOW,
            max_pages: None,
        }
    }
}

impl StorageConfig {
    pub fn with_page_multiplier(mut self, page_multiplier: u16) -> Self {
        self.page_multiplier = page_multiplier;
        self
    }

    pub fn with_slot_count(mut self, slot_count: usize) -> Self {
        self.slot_count = slot_count;
        self
    }

    pub fn with_slot_boost_fraction(mut self, fraction: f32) -> Self {
        self.slot_boost_fraction = fraction;
        self
    }

    pub fn with_free_list_window(mut self, pages: usize) -> Self {
        self.free_list_window = pages;
        self
    }

    pub fn with_max_pages(mut self, max_pages: u64) -> Self {
        self.max_pages = Some(max_pages);
        self
    }

    /// Size of one database page in bytes.
    pub fn page_size(&self) -> usize {
        NATIVE_PAGE_SIZE * self.page_multiplier as usize
    }

    /// Hint boost in op-counter ticks: the boost fraction of the pool capacity.
    pub fn slot_boost(&self) -> u64 {
        ((self.slot_boost_fraction * self.slot_count as f32) as u64).max(1)
    }

    pub fn validate(&self) -> Result<()> {
        if !matches!(self.page_multiplier, 1 | 2 | 4 | 8) {
            return Err(StraitError::InvalidArgument(
                "page multiplier must be 1, 2, 4 or 8",
            ));
        }
        if self.slot_count == 0 || self.slot_count > u32::MAX as usize {
            return Err(StraitError::InvalidArgument("slot count out of range"));
        }
        if !(0.0..=1.0).contains(&self.slot_boost_fraction) {
            return Err(StraitError::InvalidArgument(
                "slot boost fraction must be within 0.0..=1.0",
            ));
        }
        if self.free_list_window == 0 {
            return Err(StraitError::InvalidArgument(
                "free-list window needs at least one page",
            ));
        }
        if matches!(self.max_pages, Some(max) if max < RESERVED_PAGES) {
            return Err(StraitError::InvalidArgument(
                "max pages must cover the reserved pages",
            ));
        }
        Ok(())
    }
}
