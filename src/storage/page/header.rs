//! The fixed 32-byte header that starts every page.
//!
//! ```text
//! offset  size  field
//!      0     4  checksum (wrapping sum of every u32 word after this one)
//!      4     4  cache-generation id
//!      8     4  exclusive-owner marker
//!     12     1  flags
//!     13     1  page type
//!     14     2  reserved
//!     16     8  left sibling PageId (0 = none)
//!     24     8  right sibling PageId (0 = none)
//!     32    16  type-specific sub-header
//!     48     -  body
//! ```
//!
//! All integers are little-endian.

use bytes::{Buf, BufMut};

use crate::common::{PageId, Result, StraitError, PAGE_HEADER_SIZE};

const PAGE_TYPE_OFFSET: usize = 13;
const LEFT_OFFSET: usize = 16;
const RIGHT_OFFSET: usize = 24;

/// What a page holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PageType {
    /// Zero-filled page that nobody has initialized yet.
    Init = 0,
    /// Free-list directory node.
    FreeList = 1,
    /// Structure catalog.
    Structure = 2,
    /// Fixed-length object rows.
    Object = 3,
    /// Root directory / entry index.
    Root = 4,
    /// Lookup directory node.
    Lookup = 6,
    /// Variable-length storage.
    Dynamic = 7,
}

impl TryFrom<u8> for PageType {
    type Error = StraitError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(PageType::Init),
            1 => Ok(PageType::FreeList),
            2 => Ok(PageType::Structure),
            3 => Ok(PageType::Object),
            4 => Ok(PageType::Root),
            6 => Ok(PageType::Lookup),
            7 => Ok(PageType::Dynamic),
            other => Err(StraitError::critical(format!(
                "unknown page type tag {other}"
            ))),
        }
    }
}

/// Decoded form of the fixed page header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageHeader {
    pub checksum: u32,
    pub cache_generation: u32,
    pub owner: u32,
    pub flags: u8,
    pub page_type: PageType,
    pub left: Option<PageId>,
    pub right: Option<PageId>,
}

impl PageHeader {
    pub fn new(page_type: PageType) -> Self {
        Self {
            checksum: 0,
            cache_generation: 0,
            owner: 0,
            flags: 0,
            page_type,
            left: None,
            right: None,
        }
    }

    pub fn decode(page: &[u8]) -> Result<Self> {
        if page.len() < PAGE_HEADER_SIZE {
            return Err(StraitError::InvalidArgument("page shorter than its header"));
        }
        let mut buf = &page[..PAGE_HEADER_SIZE];
        let checksum = buf.get_u32_le();
        let cache_generation = buf.get_u32_le();
        let owner = buf.get_u32_le();
        let flags = buf.get_u8();
        let page_type = PageType::try_from(buf.get_u8())?;
        buf.advance(2);
        let left = PageId::from_raw(buf.get_u64_le());
        let right = PageId::from_raw(buf.get_u64_le());
        Ok(Self {
            checksum,
            cache_generation,
            owner,
            flags,
            page_type,
            left,
            right,
        })
    }

    pub fn encode(&self, page: &mut [u8]) {
        let mut buf = &mut page[..PAGE_HEADER_SIZE];
        buf.put_u32_le(self.checksum);
        buf.put_u32_le(self.cache_generation);
        buf.put_u32_le(self.owner);
        buf.put_u8(self.flags);
        buf.put_u8(self.page_type as u8);
        buf.put_u16_le(0);
        buf.put_u64_le(self.left.map_or(0, |p| p.as_u64()));
        buf.put_u64_le(self.right.map_or(0, |p| p.as_u64()));
    }
}

/// Reads the page type tag without decoding the rest of the header.
pub fn page_type(page: &[u8]) -> Result<PageType> {
    PageType::try_from(page[PAGE_TYPE_OFFSET])
}

pub fn left_sibling(page: &[u8]) -> Option<PageId> {
    PageId::from_raw((&page[LEFT_OFFSET..LEFT_OFFSET + 8]).get_u64_le())
}

pub fn set_left_sibling(page: &mut [u8], id: Option<PageId>) {
    (&mut page[LEFT_OFFSET..LEFT_OFFSET + 8]).put_u64_le(id.map_or(0, |p| p.as_u64()));
}

pub fn right_sibling(page: &[u8]) -> Option<PageId> {
    PageId::from_raw((&page[RIGHT_OFFSET..RIGHT_OFFSET + 8]).get_u64_le())
}

pub fn set_right_sibling(page: &mut [u8], id: Option<PageId>) {
    (&mut page[RIGHT_OFFSET..RIGHT_OFFSET + 8]).put_u64_le(id.map_or(0, |p| p.as_u64()));
}

/// Wrapping sum of every little-endian u32 word after the checksum itself.
pub fn compute_checksum(page: &[u8]) -> u32 {
    page[4..]
        .chunks_exact(4)
        .fold(0u32, |sum, word| {
            sum.wrapping_add(u32::from_le_bytes([word[0], word[1], word[2], word[3]]))
        })
}

/// Recomputes and stores the checksum.
pub fn stamp_checksum(page: &mut [u8]) {
    let sum = compute_checksum(page);
    (&mut page[..4]).put_u32_le(sum);
}

pub fn verify_checksum(page: &[u8]) -> bool {
    (&page[..4]).get_u32_le() == compute_checksum(page)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::NATIVE_PAGE_SIZE;

    #[test]
    fn test_header_layout() {
        let mut page = vec![0u8; NATIVE_PAGE_SIZE];
        let header = PageHeader {
            checksum: 0x0102_0304,
            cache_generation: 7,
            owner: 9,
            flags: 0x10,
            page_type: PageType::Lookup,
            left: Some(PageId::new(3)),
            right: None,
        };
        header.encode(&mut page);

        assert_eq!(&page[0..4], &[0x04, 0x03, 0x02, 0x01]);
        assert_eq!(page[12], 0x10);
        assert_eq!(page[13], PageType::Lookup as u8);
        assert_eq!(&page[16..24], &3u64.to_le_bytes());
        assert_eq!(&page[24..32], &[0u8; 8]);

        assert_eq!(PageHeader::decode(&page).unwrap(), header);
    }

    #[test]
    fn test_sibling_accessors() {
        let mut page = vec![0u8; NATIVE_PAGE_SIZE];
        PageHeader::new(PageType::FreeList).encode(&mut page);

        set_left_sibling(&mut page, Some(PageId::new(11)));
        set_right_sibling(&mut page, Some(PageId::new(12)));
        assert_eq!(left_sibling(&page), Some(PageId::new(11)));
        assert_eq!(right_sibling(&page), Some(PageId::new(12)));

        set_right_sibling(&mut page, None);
        assert_eq!(right_sibling(&page), None);
        assert_eq!(page_type(&page).unwrap(), PageType::FreeList);
    }

    #[test]
    fn test_unknown_page_type() {
        let mut page = vec![0u8; NATIVE_PAGE_SIZE];
        page[13] = 5;
        assert!(matches!(
            PageHeader::decode(&page),
            Err(StraitError::Critical(_))
        ));
    }

    #[test]
    fn test_checksum_skips_first_word() {
        let mut page = vec![0u8; NATIVE_PAGE_SIZE];
        page[4] = 1;
        page[100] = 2;
        stamp_checksum(&mut page);
        assert_eq!(compute_checksum(&page), 3);
        assert!(verify_checksum(&page));

        page[200] = 1;
        assert!(!verify_checksum(&page));
    }
}
