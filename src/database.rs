use std::path::Path;
use std::sync::Arc;

use tracing::info;

use crate::buffer::{BufferPool, PageHandle};
use crate::common::{Result, StorageConfig};
use crate::storage::disk::{FreeSpaceAllocator, PageStore};

/// One open database file with its allocator and buffer pool.
pub struct Database {
    store: Arc<PageStore>,
    allocator: Arc<FreeSpaceAllocator>,
    pool: Arc<BufferPool>,
    config: StorageConfig,
}

impl Database {
    pub fn open<P: AsRef<Path>>(path: P, config: StorageConfig) -> Result<Self> {
        config.validate()?;
        let store = Arc::new(PageStore::open(path.as_ref(), &config)?);
        let allocator = Arc::new(FreeSpaceAllocator::open(
            Arc::clone(&store),
            config.free_list_window,
        )?);
        let pool = Arc::new(BufferPool::new(Arc::clone(&store), &config)?);

        info!(
            path = %path.as_ref().display(),
            pages = store.num_pages(),
            slots = config.slot_count,
            page_size = config.page_size(),
            "database.open"
        );
        Ok(Self {
            store,
            allocator,
            pool,
            config,
        })
    }

    /// A new page handle for one worker.
    pub fn handle(&self) -> Result<PageHandle> {
        PageHandle::new(Arc::clone(&self.pool), Arc::clone(&self.allocator))
    }

    pub fn allocator(&self) -> &Arc<FreeSpaceAllocator> {
        &self.allocator
    }

    pub fn pool(&self) -> &Arc<BufferPool> {
        &self.pool
    }

    pub fn store(&self) -> &Arc<PageStore> {
        &self.store
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    /// Writes every dirty resident page and syncs the file.
    pub fn flush(&self) -> Result<()> {
        self.pool.flush_all()?;
        self.store.sync()
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        if let Err(err) = self.flush() {
            tracing::error!(error = %err, "database.close.flush_failed");
        }
    }
}
