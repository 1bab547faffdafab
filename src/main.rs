use std::thread;

use crossbeam_channel::unbounded;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use straitdb::buffer::PageHint;
use straitdb::common::{StorageConfig, NEW_PAGE_ID, PAGE_BODY_OFFSET};
use straitdb::index::LookupTree;
use straitdb::storage::page::{LookupPage, LookupStrait};
use straitdb::{Database, Result};

const WORKERS: usize = 4;
const DATA_PAGES: u16 = 32;

fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let db_path = "demo.db";
    if let Err(err) = run(db_path) {
        error!(error = %err, "demo.failed");
    }
    std::fs::remove_file(db_path).ok();
}

fn run(db_path: &str) -> Result<()> {
    let config = StorageConfig::default().with_slot_count(8);
    let db = Database::open(db_path, config)?;
    let mut handle = db.handle()?;

    // one run of data pages and a depth-0 lookup node covering it
    let first = db.allocator().allocate(DATA_PAGES)?;
    let root = handle.start(NEW_PAGE_ID, 1)?;
    {
        let mut data = handle.raw_mut()?;
        let mut node = LookupPage::new(&mut data);
        node.init(0, None, 0);
        node.push_strait(LookupStrait {
            end: DATA_PAGES as u64,
            reference: first.offset(DATA_PAGES as u64),
        })?;
    }
    handle.hint(PageHint::INDEX0)?;
    handle.finish();
    info!(root = root.as_u64(), first = first.as_u64(), "demo.tree_built");

    let tree = LookupTree::open(&mut handle, root)?;
    let (jobs, job_rx) = unbounded::<u64>();

    thread::scope(|scope| -> Result<()> {
        let mut workers = Vec::with_capacity(WORKERS);
        for worker in 0..WORKERS {
            let job_rx = job_rx.clone();
            let mut handle = db.handle()?;
            workers.push(scope.spawn(move || -> Result<usize> {
                let mut done = 0;
                for offset in job_rx.iter() {
                    let page_id = tree.resolve(&mut handle, offset)?;
                    handle.start(page_id, 1)?;
                    {
                        let mut data = handle.raw_mut()?;
                        data[PAGE_BODY_OFFSET..PAGE_BODY_OFFSET + 8]
                            .copy_from_slice(&offset.to_le_bytes());
                    }
                    handle.finish();
                    done += 1;
                }
                info!(worker, done, "demo.worker_exit");
                Ok(done)
            }));
        }

        for offset in 0..DATA_PAGES as u64 {
            if jobs.send(offset).is_err() {
                break;
            }
        }
        drop(jobs);

        let mut total = 0;
        for worker in workers {
            match worker.join() {
                Ok(result) => total += result?,
                Err(_) => error!("demo.worker_panicked"),
            }
        }
        info!(total, "demo.jobs_done");
        Ok(())
    })?;

    drop(handle);
    db.flush()?;
    info!(
        pages = db.store().num_pages(),
        reads = db.store().num_reads(),
        writes = db.store().num_writes(),
        "demo.finished"
    );
    Ok(())
}
