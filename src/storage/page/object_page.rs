use bytes::{Buf, BufMut};

use crate::common::{PageId, Result, StraitError, PAGE_BODY_OFFSET, PAGE_HEADER_SIZE};

use super::header::{PageHeader, PageType};

const TRASH_LINK_OFFSET: usize = PAGE_HEADER_SIZE;
const STRUCTURE_ID_OFFSET: usize = PAGE_HEADER_SIZE + 8;
const TRASH_START_OFFSET: usize = PAGE_HEADER_SIZE + 10;
const TRASH_COUNT_OFFSET: usize = PAGE_HEADER_SIZE + 12;
const ENTRY_ID_OFFSET: usize = PAGE_HEADER_SIZE + 14;

/// Rows of `fixed_len` bytes that fit in one object page.
pub fn objects_per_page(page_size: usize, fixed_len: u16) -> Result<u16> {
    if fixed_len == 0 {
        return Err(StraitError::InvalidArgument("fixed row length is zero"));
    }
    let count = (page_size - PAGE_BODY_OFFSET) / fixed_len as usize;
    if count == 0 {
        return Err(StraitError::InvalidArgument("row does not fit in a page"));
    }
    Ok(count.min(u16::MAX as usize) as u16)
}

/// Logical page offset (within its collection) holding `row`.
pub fn row_page_offset(row: u64, objects_per_page: u16) -> u64 {
    row / objects_per_page as u64
}

/// Byte offset of `row` inside the page at `page_offset`.
pub fn object_intra_offset(
    row: u64,
    page_offset: u64,
    objects_per_page: u16,
    fixed_len: u16,
) -> Result<usize> {
    let first_row = page_offset * objects_per_page as u64;
    let index = row
        .checked_sub(first_row)
        .filter(|i| *i < objects_per_page as u64)
        .ok_or_else(|| {
            StraitError::critical(format!(
                "row {row} does not live on page offset {page_offset}"
            ))
        })?;
    Ok(PAGE_BODY_OFFSET + index as usize * fixed_len as usize)
}

/// Mutable view of the object-page sub-header.
pub struct ObjectPage<'a> {
    data: &'a mut [u8],
}

impl<'a> ObjectPage<'a> {
    pub fn new(data: &'a mut [u8]) -> Self {
        Self { data }
    }

    pub fn init(&mut self, structure_id: u16, entry_id: u16, left: Option<PageId>) {
        self.data.fill(0);
        let mut header = PageHeader::new(PageType::Object);
        header.left = left;
        header.encode(self.data);
        (&mut self.data[STRUCTURE_ID_OFFSET..STRUCTURE_ID_OFFSET + 2]).put_u16_le(structure_id);
        (&mut self.data[ENTRY_ID_OFFSET..ENTRY_ID_OFFSET + 2]).put_u16_le(entry_id);
    }

    pub fn set_trash(&mut self, link: Option<PageId>, start_offset: u16, count: u16) {
        (&mut self.data[TRASH_LINK_OFFSET..TRASH_LINK_OFFSET + 8])
            .put_u64_le(link.map_or(0, |p| p.as_u64()));
        (&mut self.data[TRASH_START_OFFSET..TRASH_START_OFFSET + 2]).put_u16_le(start_offset);
        (&mut self.data[TRASH_COUNT_OFFSET..TRASH_COUNT_OFFSET + 2]).put_u16_le(count);
    }

    pub fn view(&self) -> ObjectPageRef<'_> {
        ObjectPageRef::new(&*self.data)
    }
}

pub struct ObjectPageRef<'a> {
    data: &'a [u8],
}

impl<'a> ObjectPageRef<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    pub fn trash_link(&self) -> Option<PageId> {
        PageId::from_raw((&self.data[TRASH_LINK_OFFSET..TRASH_LINK_OFFSET + 8]).get_u64_le())
    }

    pub fn structure_id(&self) -> u16 {
        (&self.data[STRUCTURE_ID_OFFSET..STRUCTURE_ID_OFFSET + 2]).get_u16_le()
    }

    pub fn trash_start(&self) -> u16 {
        (&self.data[TRASH_START_OFFSET..TRASH_START_OFFSET + 2]).get_u16_le()
    }

    pub fn trash_count(&self) -> u16 {
        (&self.data[TRASH_COUNT_OFFSET..TRASH_COUNT_OFFSET + 2]).get_u16_le()
    }

    pub fn entry_id(&self) -> u16 {
        (&self.data[ENTRY_ID_OFFSET..ENTRY_ID_OFFSET + 2]).get_u16_le()
    }
}
