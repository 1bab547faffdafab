use std::fs::{File, OpenOptions};
use std::io::{self, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
#[cfg(test)]
use std::sync::atomic::AtomicBool;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::common::{
    PageId, Result, StorageConfig, StraitError, FILE_HEADER_PAGE_ID, FIRST_FREE_LIST_PAGE_ID,
    RESERVED_PAGES,
};
use crate::storage::page::header::stamp_checksum;
use crate::storage::page::{FileHeaderPage, FileHeaderPageRef, FreeListPage};

/// PageStore owns the database file and moves whole pages between it and
/// caller-provided buffers. Page `n` lives at byte offset `n * page_size`.
///
/// A new file is formatted with the file header (page 0) and an empty
/// free-list directory page (page 1).
pub struct PageStore {
    /// The database file
    db_file: Mutex<File>,
    /// Path to the database file
    db_path: PathBuf,
    page_size: usize,
    /// Number of pages in the file
    num_pages: AtomicU64,
    max_pages: Option<u64>,
    /// Number of page reads issued
    num_reads: AtomicU64,
    /// Number of page writes performed
    num_writes: AtomicU64,
    #[cfg(test)]
    fail_writes: AtomicBool,
}

impl PageStore {
    /// Opens the database file at `db_path`, creating and formatting it when
    /// it is missing or empty.
    pub fn open<P: AsRef<Path>>(db_path: P, config: &StorageConfig) -> Result<Self> {
        config.validate()?;
        let page_size = config.page_size();

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(db_path.as_ref())?;

        let file_size = file.metadata()?.len();
        if file_size % page_size as u64 != 0 {
            return Err(StraitError::critical(format!(
                "file length {file_size} is not a multiple of the {page_size}-byte page size"
            )));
        }

        let num_pages = if file_size == 0 {
            Self::format(&mut file, config)?;
            info!(path = %db_path.as_ref().display(), page_size, "store.open.formatted");
            RESERVED_PAGES
        } else {
            Self::check_header(&mut file, config)?;
            file_size / page_size as u64
        };

        if num_pages < RESERVED_PAGES {
            return Err(StraitError::InvalidDatabaseFile(format!(
                "file holds {num_pages} pages, fewer than the reserved {RESERVED_PAGES}"
            )));
        }

        debug!(path = %db_path.as_ref().display(), num_pages, "store.open");
        Ok(Self {
            db_file: Mutex::new(file),
            db_path: db_path.as_ref().to_path_buf(),
            page_size,
            num_pages: AtomicU64::new(num_pages),
            max_pages: config.max_pages,
            num_reads: AtomicU64::new(0),
            num_writes: AtomicU64::new(0),
            #[cfg(test)]
            fail_writes: AtomicBool::new(false),
        })
    }

    fn format(file: &mut File, config: &StorageConfig) -> Result<()> {
        let page_size = config.page_size();
        let mut pages = vec![0u8; page_size * RESERVED_PAGES as usize];
        let (header, free_list) = pages.split_at_mut(page_size);

        FileHeaderPage::new(header).init(config.page_multiplier, FIRST_FREE_LIST_PAGE_ID);
        stamp_checksum(header);
        FreeListPage::new(free_list).init(None);
        stamp_checksum(free_list);

        file.seek(SeekFrom::Start(0))?;
        file.write_all(&pages)?;
        file.sync_all()?;
        Ok(())
    }

    fn check_header(file: &mut File, config: &StorageConfig) -> Result<()> {
        let mut header = vec![0u8; config.page_size()];
        file.seek(SeekFrom::Start(0))?;
        file.read_exact(&mut header)?;

        let view = FileHeaderPageRef::new(&header);
        if !view.is_valid() {
            return Err(StraitError::InvalidDatabaseFile(format!(
                "bad magic {:#010x} or version {}",
                view.magic(),
                view.version()
            )));
        }
        if view.page_multiplier() != config.page_multiplier {
            return Err(StraitError::InvalidDatabaseFile(format!(
                "file uses page multiplier {}, config asks for {}",
                view.page_multiplier(),
                config.page_multiplier
            )));
        }
        Ok(())
    }

    fn check_access(&self, page_id: PageId, len: usize) -> Result<u64> {
        if len != self.page_size {
            return Err(StraitError::InvalidArgument("buffer is not exactly one page"));
        }
        if page_id.as_u64() >= self.num_pages() {
            return Err(StraitError::Eof(page_id));
        }
        Ok(page_id.as_u64() * self.page_size as u64)
    }

    #[cfg(test)]
    fn check_writable(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::Relaxed) {
            return Err(StraitError::Io(io::Error::new(ErrorKind::Other, "write refused")));
        }
        Ok(())
    }

    #[cfg(not(test))]
    fn check_writable(&self) -> Result<()> {
        Ok(())
    }

    /// Reads a page from disk into the provided buffer.
    /// The buffer must be exactly one page long.
    pub fn read_page(&self, page_id: PageId, data: &mut [u8]) -> Result<()> {
        let offset = self.check_access(page_id, data.len())?;

        let mut file = self.db_file.lock();
        self.num_reads.fetch_add(1, Ordering::Relaxed);
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(data)?;
        Ok(())
    }

    /// Writes a page to disk from the provided buffer.
    /// The buffer must be exactly one page long.
    pub fn write_page(&self, page_id: PageId, data: &[u8]) -> Result<()> {
        let offset = self.check_access(page_id, data.len())?;
        self.check_writable()?;

        let mut file = self.db_file.lock();
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)?;
        file.flush()?;

        self.num_writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Grows the file by `count` zero-filled pages and returns the id of the
    /// first one.
    pub fn extend(&self, count: u64) -> Result<PageId> {
        if count == 0 {
            return Err(StraitError::InvalidArgument("cannot grow the file by zero pages"));
        }

        let file = self.db_file.lock();
        let first = self.num_pages.load(Ordering::Acquire);
        let requested = first
            .checked_add(count)
            .ok_or(StraitError::InvalidArgument("page count overflows"))?;
        if let Some(limit) = self.max_pages {
            if requested > limit {
                return Err(StraitError::OutOfSpace { requested, limit });
            }
        }

        file.set_len(requested * self.page_size as u64)
            .map_err(|err| self.classify_grow_error(err, requested))?;
        self.num_pages.store(requested, Ordering::Release);

        debug!(first = first, count, "store.extend");
        Ok(PageId::new(first))
    }

    fn classify_grow_error(&self, err: io::Error, requested: u64) -> StraitError {
        match err.kind() {
            ErrorKind::StorageFull | ErrorKind::FileTooLarge => StraitError::OutOfSpace {
                requested,
                limit: self.num_pages(),
            },
            ErrorKind::OutOfMemory => StraitError::OutOfMemory,
            _ => StraitError::Io(err),
        }
    }

    /// Reads page 0.
    pub fn read_file_header(&self) -> Result<Vec<u8>> {
        let mut data = vec![0u8; self.page_size];
        self.read_page(FILE_HEADER_PAGE_ID, &mut data)?;
        Ok(data)
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Returns the number of pages in the file.
    pub fn num_pages(&self) -> u64 {
        self.num_pages.load(Ordering::Acquire)
    }

    /// Returns the number of page reads issued, including failed ones.
    pub fn num_reads(&self) -> u64 {
        self.num_reads.load(Ordering::Relaxed)
    }

    /// Returns the number of page writes performed.
    pub fn num_writes(&self) -> u64 {
        self.num_writes.load(Ordering::Relaxed)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    #[cfg(test)]
    pub(crate) fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::Relaxed);
    }

    /// Flushes any buffered writes to disk.
    pub fn sync(&self) -> Result<()> {
        let file = self.db_file.lock();
        file.sync_all()?;
        Ok(())
    }
}

impl Drop for PageStore {
    fn drop(&mut self) {
        let file = self.db_file.get_mut();
        let _ = file.sync_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::NATIVE_PAGE_SIZE;
    use tempfile::NamedTempFile;

    fn open_store(config: &StorageConfig) -> (PageStore, NamedTempFile) {
        let temp_file = NamedTempFile::new().unwrap();
        let store = PageStore::open(temp_file.path(), config).unwrap();
        (store, temp_file)
    }

    #[test]
    fn test_open_formats_empty_file() {
        let (store, temp) = open_store(&StorageConfig::default());
        assert_eq!(store.num_pages(), RESERVED_PAGES);
        assert_eq!(
            temp.as_file().metadata().unwrap().len(),
            RESERVED_PAGES * NATIVE_PAGE_SIZE as u64
        );

        let header = store.read_file_header().unwrap();
        let view = FileHeaderPageRef::new(&header);
        assert!(view.is_valid());
        assert_eq!(view.free_list_head(), Some(FIRST_FREE_LIST_PAGE_ID));
    }

    #[test]
    fn test_extend_and_read_write() {
        let (store, _temp) = open_store(&StorageConfig::default());

        let first = store.extend(3).unwrap();
        assert_eq!(first, PageId::new(2));
        assert_eq!(store.num_pages(), 5);

        let mut data = vec![0u8; NATIVE_PAGE_SIZE];
        store.read_page(PageId::new(4), &mut data).unwrap();
        assert!(data.iter().all(|&b| b == 0));

        data[0] = 42;
        data[NATIVE_PAGE_SIZE - 1] = 128;
        store.write_page(PageId::new(4), &data).unwrap();

        let mut read_back = vec![0u8; NATIVE_PAGE_SIZE];
        store.read_page(PageId::new(4), &mut read_back).unwrap();
        assert_eq!(read_back, data);
        assert_eq!(store.num_writes(), 1);
    }

    #[test]
    fn test_access_past_end() {
        let (store, _temp) = open_store(&StorageConfig::default());
        let mut data = vec![0u8; NATIVE_PAGE_SIZE];

        assert!(matches!(
            store.read_page(PageId::new(2), &mut data),
            Err(StraitError::Eof(_))
        ));
        assert!(matches!(
            store.read_page(PageId::new(1), &mut data[..10]),
            Err(StraitError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_max_pages() {
        let config = StorageConfig::default().with_max_pages(4);
        let (store, _temp) = open_store(&config);

        store.extend(2).unwrap();
        assert!(matches!(
            store.extend(1),
            Err(StraitError::OutOfSpace { requested: 5, limit: 4 })
        ));
        assert_eq!(store.num_pages(), 4);
    }

    #[test]
    fn test_reopen_checks_multiplier() {
        let temp = NamedTempFile::new().unwrap();
        {
            let store = PageStore::open(temp.path(), &StorageConfig::default()).unwrap();
            store.extend(1).unwrap();
        }

        let reopened = PageStore::open(temp.path(), &StorageConfig::default()).unwrap();
        assert_eq!(reopened.num_pages(), 3);
        drop(reopened);

        let bigger = StorageConfig::default().with_page_multiplier(2);
        assert!(PageStore::open(temp.path(), &bigger).is_err());
    }
}
