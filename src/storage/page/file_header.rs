use bytes::{Buf, BufMut};

use crate::common::{PageId, PAGE_BODY_OFFSET, PAGE_HEADER_SIZE};

use super::header::{PageHeader, PageType};

const MAGIC_NUMBER: u32 = 0x5452_5453; // "STRT"
const VERSION: u16 = 1;

const FREE_LIST_HEAD_OFFSET: usize = PAGE_HEADER_SIZE;
const FREE_LIST_COUNT_OFFSET: usize = PAGE_HEADER_SIZE + 8;
const PAGE_MULTIPLIER_OFFSET: usize = PAGE_HEADER_SIZE + 12;
const VERSION_OFFSET: usize = PAGE_HEADER_SIZE + 14;
const MAGIC_OFFSET: usize = PAGE_BODY_OFFSET;

/// Page 0 of every database file: format identity plus the head of the
/// free-list directory chain.
pub struct FileHeaderPage<'a> {
    data: &'a mut [u8],
}

impl<'a> FileHeaderPage<'a> {
    pub fn new(data: &'a mut [u8]) -> Self {
        Self { data }
    }

    pub fn init(&mut self, page_multiplier: u16, free_list_head: PageId) {
        self.data.fill(0);
        PageHeader::new(PageType::Root).encode(self.data);
        (&mut self.data[MAGIC_OFFSET..MAGIC_OFFSET + 4]).put_u32_le(MAGIC_NUMBER);
        (&mut self.data[VERSION_OFFSET..VERSION_OFFSET + 2]).put_u16_le(VERSION);
        (&mut self.data[PAGE_MULTIPLIER_OFFSET..PAGE_MULTIPLIER_OFFSET + 2])
            .put_u16_le(page_multiplier);
        self.set_free_list_head(free_list_head);
        self.set_free_list_count(1);
    }

    pub fn set_free_list_head(&mut self, page_id: PageId) {
        (&mut self.data[FREE_LIST_HEAD_OFFSET..FREE_LIST_HEAD_OFFSET + 8])
            .put_u64_le(page_id.as_u64());
    }

    pub fn set_free_list_count(&mut self, count: u32) {
        (&mut self.data[FREE_LIST_COUNT_OFFSET..FREE_LIST_COUNT_OFFSET + 4]).put_u32_le(count);
    }

    pub fn view(&self) -> FileHeaderPageRef<'_> {
        FileHeaderPageRef::new(&*self.data)
    }
}

pub struct FileHeaderPageRef<'a> {
    data: &'a [u8],
}

impl<'a> FileHeaderPageRef<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    pub fn is_valid(&self) -> bool {
        self.magic() == MAGIC_NUMBER && self.version() == VERSION
    }

    pub fn magic(&self) -> u32 {
        (&self.data[MAGIC_OFFSET..MAGIC_OFFSET + 4]).get_u32_le()
    }

    pub fn version(&self) -> u16 {
        (&self.data[VERSION_OFFSET..VERSION_OFFSET + 2]).get_u16_le()
    }

    pub fn page_multiplier(&self) -> u16 {
        (&self.data[PAGE_MULTIPLIER_OFFSET..PAGE_MULTIPLIER_OFFSET + 2]).get_u16_le()
    }

    pub fn free_list_head(&self) -> Option<PageId> {
        PageId::from_raw((&self.data[FREE_LIST_HEAD_OFFSET..FREE_LIST_HEAD_OFFSET + 8]).get_u64_le())
    }

    pub fn free_list_count(&self) -> u32 {
        (&self.data[FREE_LIST_COUNT_OFFSET..FREE_LIST_COUNT_OFFSET + 4]).get_u32_le()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{FIRST_FREE_LIST_PAGE_ID, NATIVE_PAGE_SIZE};
    use crate::storage::page::header::page_type;

    #[test]
    fn test_file_header_init() {
        let mut data = vec![0xFFu8; NATIVE_PAGE_SIZE];
        let mut page = FileHeaderPage::new(&mut data);
        page.init(2, FIRST_FREE_LIST_PAGE_ID);

        let view = page.view();
        assert!(view.is_valid());
        assert_eq!(view.page_multiplier(), 2);
        assert_eq!(view.free_list_head(), Some(FIRST_FREE_LIST_PAGE_ID));
        assert_eq!(view.free_list_count(), 1);
        assert_eq!(page_type(&data).unwrap(), PageType::Root);
    }

    #[test]
    fn test_file_header_rejects_garbage() {
        let data = vec![0u8; NATIVE_PAGE_SIZE];
        assert!(!FileHeaderPageRef::new(&data).is_valid());
    }
}
