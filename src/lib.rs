//! StraitDB - the page layer of an embedded, multi-worker storage engine
//!
//! This crate maps collections of records onto fixed-size pages inside one
//! file, keeps a bounded working set of those pages in memory, and recycles
//! page ids through an on-disk free list.
//!
//! # Architecture
//!
//! - **Storage Layer** (`storage`): Disk I/O, page identity and page layouts
//!   - `PageStore`: Reads, writes and grows the database file page by page
//!   - `FreeSpaceAllocator`: Hands out and recycles contiguous page runs
//!     ("straits") through a windowed chain of free-list directory pages
//!   - `header`, `FreeListPage`, `LookupPage`, `ObjectPage`: On-disk layouts
//!
//! - **Buffer Pool** (`buffer`): Memory management for database pages
//!   - `BufferPool`: Fixed set of slots with concurrent checkout and LRU-K
//!     eviction biased by caller hints
//!   - `PageHandle`: One worker's start/finish session against the pool
//!   - `PageHint`: Dirty, use-soon, reset and index-level advice
//!
//! - **Index** (`index`): `LookupTree` resolves a logical page offset to a
//!   physical page by descending a chain of lookup nodes
//!
//! # Example
//!
//! ```rust,no_run
//! use straitdb::buffer::PageHint;
//! use straitdb::common::{StorageConfig, NEW_PAGE_ID};
//! use straitdb::Database;
//!
//! let db = Database::open("test.db", StorageConfig::default()).unwrap();
//! let mut handle = db.handle().unwrap();
//!
//! // Allocate a page and write to it
//! let page_id = handle.start(NEW_PAGE_ID, 1).unwrap();
//! handle.raw_mut().unwrap()[48..53].copy_from_slice(b"hello");
//! handle.hint(PageHint::USE_SOON).unwrap();
//! handle.finish();
//!
//! // Flush changes to disk
//! db.flush().unwrap();
//! # let _ = page_id;
//! ```

pub mod buffer;
pub mod common;
mod database;
pub mod index;
pub mod storage;

// Re-export commonly used types at the crate root
pub use common::{PageId, Result, StraitError};
pub use database::Database;
