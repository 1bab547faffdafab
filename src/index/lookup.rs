use tracing::debug;

use crate::buffer::{PageHandle, PageHint};
use crate::common::{PageId, Result, StraitError};
use crate::storage::page::header::page_type;
use crate::storage::page::{
    object_intra_offset, row_page_offset, LookupPageRef, LookupStrait, PageType,
};

/// A chain of lookup nodes mapping logical page offsets of one collection
/// to physical page ids.
///
/// Descent holds one node at a time and releases it before moving to the
/// next level. It stays correct while ranges are only ever extended; trees
/// being restructured concurrently are not supported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LookupTree {
    root: PageId,
    depth: u8,
}

impl LookupTree {
    pub fn new(root: PageId, depth: u8) -> Self {
        Self { root, depth }
    }

    /// Reads the depth stored in the root node.
    pub fn open(handle: &mut PageHandle, root: PageId) -> Result<Self> {
        handle.start(root, 1)?;
        let depth = read_node(handle, root, None, |node| Ok(node.depth()));
        handle.finish();
        Ok(Self::new(root, depth?))
    }

    pub fn root(&self) -> PageId {
        self.root
    }

    pub fn depth(&self) -> u8 {
        self.depth
    }

    /// Resolves a logical page offset to its physical page.
    pub fn resolve(&self, handle: &mut PageHandle, offset: u64) -> Result<PageId> {
        let mut node = self.root;
        let mut level = self.depth;

        loop {
            let strait = self.search_node(handle, node, level, offset)?;
            if level == 0 {
                return strait.leaf_page(offset).ok_or_else(|| {
                    StraitError::critical(format!(
                        "leaf strait in {node} maps offset {offset} before page 1"
                    ))
                });
            }
            if strait.reference.is_null() {
                return Err(StraitError::critical(format!(
                    "lookup {node} has a null child reference"
                )));
            }
            node = strait.reference;
            level -= 1;
        }
    }

    /// Checks out one node, finds the strait covering `offset` and releases
    /// the node again with an index hint for its level.
    fn search_node(
        &self,
        handle: &mut PageHandle,
        node: PageId,
        level: u8,
        offset: u64,
    ) -> Result<LookupStrait> {
        handle.start(node, 1)?;
        let found = read_node(handle, node, Some(level), |view| Ok(view.find(offset)));
        let hinted = handle.hint(PageHint::index(self.depth - level));
        handle.finish();
        hinted?;

        let strait = found?.ok_or(StraitError::OffsetOutOfRange(offset))?;
        debug!(
            node = node.as_u64(),
            level,
            offset,
            end = strait.end,
            "lookup.resolve.step"
        );
        Ok(strait)
    }

    /// Physical page and byte offset of fixed-length row `row`.
    pub fn locate_row(
        &self,
        handle: &mut PageHandle,
        row: u64,
        objects_per_page: u16,
        fixed_len: u16,
    ) -> Result<(PageId, usize)> {
        if objects_per_page == 0 || fixed_len == 0 {
            return Err(StraitError::InvalidArgument("row geometry must be non-zero"));
        }
        let page_offset = row_page_offset(row, objects_per_page);
        let page_id = self.resolve(handle, page_offset)?;
        let intra = object_intra_offset(row, page_offset, objects_per_page, fixed_len)?;
        if intra + fixed_len as usize > handle.pool().page_size() {
            return Err(StraitError::InvalidArgument("row runs past the end of the page"));
        }
        Ok((page_id, intra))
    }
}

/// Validates the checked-out page as a lookup node at `level` and hands
/// it to `f`.
fn read_node<T>(
    handle: &PageHandle,
    node: PageId,
    level: Option<u8>,
    f: impl FnOnce(LookupPageRef<'_>) -> Result<T>,
) -> Result<T> {
    let data = handle.raw()?;
    if page_type(&data)? != PageType::Lookup {
        return Err(StraitError::critical(format!("{node} is not a lookup node")));
    }
    let view = LookupPageRef::new(&data);
    if !view.is_count_valid() {
        return Err(StraitError::critical(format!(
            "lookup {node} claims {} straits, room for {}",
            view.strait_count(),
            view.capacity()
        )));
    }
    if let Some(level) = level {
        if view.depth() != level {
            return Err(StraitError::critical(format!(
                "lookup {node} has depth {}, expected {level}",
                view.depth()
            )));
        }
    }
    f(view)
}
