//! Integration tests for the buffer pool

use std::fs::OpenOptions;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use rand::Rng;
use straitdb::buffer::{BufferPool, PageHint};
use straitdb::common::{PageId, SlotId, StorageConfig, StraitError, NEW_PAGE_ID, NATIVE_PAGE_SIZE};
use straitdb::storage::disk::PageStore;
use tempfile::NamedTempFile;

fn create_pool(slots: usize, pages: u64) -> (Arc<BufferPool>, Vec<PageId>, NamedTempFile) {
    let temp_file = NamedTempFile::new().unwrap();
    let config = StorageConfig::default().with_slot_count(slots);
    let store = Arc::new(PageStore::open(temp_file.path(), &config).unwrap());
    let first = store.extend(pages).unwrap();
    let page_ids = (0..pages).map(|i| first.offset(i)).collect();
    let pool = Arc::new(BufferPool::new(store, &config).unwrap());
    (pool, page_ids, temp_file)
}

fn stamp(pool: &BufferPool, page_id: PageId) {
    let mut data = vec![0u8; pool.page_size()];
    data[48..56].copy_from_slice(&page_id.as_u64().to_le_bytes());
    pool.store().write_page(page_id, &data).unwrap();
}

fn stamped_id(data: &[u8]) -> u64 {
    u64::from_le_bytes(data[48..56].try_into().unwrap())
}

#[test]
fn test_dirty_pages_survive_eviction() {
    let (pool, page_ids, _temp) = create_pool(16, 256);
    assert_eq!(pool.page_size(), NATIVE_PAGE_SIZE);

    for &pid in &page_ids {
        let slot = pool.checkout(pid).unwrap();
        {
            let mut data = pool.write_slot(slot);
            let fill = (pid.as_u64() % 251) as u8;
            data[48..].fill(fill);
            data[48..56].copy_from_slice(&pid.as_u64().to_le_bytes());
        }
        pool.release(slot, PageHint::DIRTY);
        assert!(pool.resident_pages().len() <= 16);
    }

    // every page past the first 16 forced out a dirty victim
    assert!(pool.store().num_writes() >= 256 - 16);

    for &pid in &page_ids {
        let slot = pool.checkout(pid).unwrap();
        {
            let data = pool.read_slot(slot);
            let fill = (pid.as_u64() % 251) as u8;
            assert_eq!(stamped_id(&data), pid.as_u64());
            assert!(data[56..].iter().all(|&b| b == fill));
        }
        pool.release(slot, PageHint::empty());
    }
}

#[test]
fn test_racing_checkouts_share_one_read() {
    let (pool, page_ids, _temp) = create_pool(4, 4);
    let target = page_ids[2];
    stamp(&pool, target);
    let reads_before = pool.store().num_reads();

    let threads = 8;
    let barrier = Arc::new(Barrier::new(threads));
    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let pool = Arc::clone(&pool);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                let slot = pool.checkout(target).unwrap();
                assert_eq!(stamped_id(&pool.read_slot(slot)), target.as_u64());
                slot
            })
        })
        .collect();

    let slots: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert!(slots.windows(2).all(|w| w[0] == w[1]));
    assert_eq!(pool.store().num_reads(), reads_before + 1);
    assert_eq!(pool.lock_count(target), Some(threads as u32));

    for slot in slots {
        pool.release(slot, PageHint::empty());
    }
    assert_eq!(pool.lock_count(target), Some(0));
}

#[test]
fn test_residency_unique_under_random_interleavings() {
    let (pool, page_ids, _temp) = create_pool(8, 40);
    for &pid in &page_ids {
        stamp(&pool, pid);
    }
    let page_ids = Arc::new(page_ids);

    let handles: Vec<_> = (0..6)
        .map(|_| {
            let pool = Arc::clone(&pool);
            let page_ids = Arc::clone(&page_ids);
            thread::spawn(move || {
                let mut rng = rand::thread_rng();
                for _ in 0..300 {
                    let pid = page_ids[rng.gen_range(0..page_ids.len())];
                    let slot = pool.checkout(pid).unwrap();
                    assert_eq!(stamped_id(&pool.read_slot(slot)), pid.as_u64());

                    let hint = match rng.gen_range(0..4) {
                        0 => PageHint::DIRTY,
                        1 => PageHint::USE_SOON,
                        2 => PageHint::RESET,
                        _ => PageHint::empty(),
                    };
                    if hint == PageHint::DIRTY {
                        let mut data = pool.write_slot(slot);
                        data[48..56].copy_from_slice(&pid.as_u64().to_le_bytes());
                    }
                    pool.release(slot, hint);

                    let resident = pool.resident_pages();
                    let mut unique = resident.clone();
                    unique.dedup();
                    assert_eq!(resident, unique);
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
    assert!(pool.resident_pages().len() <= 8);
}

#[test]
fn test_checkout_waits_for_a_free_slot() {
    let (pool, page_ids, _temp) = create_pool(2, 3);
    let held_a = pool.checkout(page_ids[0]).unwrap();
    let held_b = pool.checkout(page_ids[1]).unwrap();

    let (done_tx, done_rx) = crossbeam_channel::bounded(1);
    let waiter = {
        let pool = Arc::clone(&pool);
        let target = page_ids[2];
        thread::spawn(move || {
            let slot = pool.checkout(target).unwrap();
            done_tx.send(slot).unwrap();
        })
    };

    // every slot is locked, so the checkout cannot finish yet
    assert!(done_rx.recv_timeout(Duration::from_millis(100)).is_err());

    pool.release(held_a, PageHint::empty());
    let slot = done_rx.recv().unwrap();
    assert_eq!(slot, held_a);
    waiter.join().unwrap();

    assert!(!pool.is_resident(page_ids[0]));
    pool.release(slot, PageHint::empty());
    pool.release(held_b, PageHint::empty());
}

#[test]
fn test_failed_swap_reaches_every_waiter() {
    let (pool, page_ids, temp) = create_pool(1, 2);
    let target = page_ids[1];
    let full_len = temp.as_file().metadata().unwrap().len();

    // cut the target page off behind the store's back
    let file = OpenOptions::new().write(true).open(temp.path()).unwrap();
    file.set_len(target.as_u64() * NATIVE_PAGE_SIZE as u64).unwrap();
    let reads_before = pool.store().num_reads();

    // holding the slot bytes parks the swap until every checkout is queued
    let parked = pool.write_slot(SlotId::new(0));
    let threads = 6;
    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let pool = Arc::clone(&pool);
            thread::spawn(move || pool.checkout(target))
        })
        .collect();
    while pool.lock_count(target) != Some(threads) {
        thread::yield_now();
    }
    drop(parked);

    for handle in handles {
        assert!(matches!(handle.join().unwrap(), Err(StraitError::Critical(_))));
    }
    assert_eq!(pool.store().num_reads(), reads_before + 1);
    assert_eq!(pool.lock_count(target), None);
    assert!(!pool.is_resident(target));
    assert!(pool.resident_pages().is_empty());

    file.set_len(full_len).unwrap();
    let slot = pool.checkout(target).unwrap();
    assert_eq!(pool.lock_count(target), Some(1));
    pool.release(slot, PageHint::empty());
}

#[test]
fn test_checkout_errors() {
    let (pool, page_ids, _temp) = create_pool(2, 1);
    let past_end = page_ids[0].offset(1);

    assert!(matches!(pool.checkout(PageId::new(0)), Err(StraitError::InvalidArgument(_))));
    assert!(matches!(pool.checkout(NEW_PAGE_ID), Err(StraitError::InvalidArgument(_))));
    assert!(matches!(pool.checkout(past_end), Err(StraitError::Eof(id)) if id == past_end));
    assert!(pool.resident_pages().is_empty());
}

#[test]
fn test_index_hints_outlive_plain_pages() {
    let (pool, page_ids, _temp) = create_pool(3, 5);
    let (root, plain, dirty) = (page_ids[0], page_ids[1], page_ids[2]);

    let slot = pool.checkout(root).unwrap();
    pool.release(slot, PageHint::INDEX0);
    let slot = pool.checkout(plain).unwrap();
    pool.release(slot, PageHint::empty());
    let slot = pool.checkout(dirty).unwrap();
    pool.release(slot, PageHint::DIRTY);

    let slot = pool.checkout(page_ids[3]).unwrap();
    pool.release(slot, PageHint::empty());
    assert!(!pool.is_resident(plain));
    assert!(pool.is_resident(root));
    assert!(pool.is_resident(dirty));
}

#[test]
fn test_flush_all_persists() {
    let temp_file = NamedTempFile::new().unwrap();
    let config = StorageConfig::default().with_slot_count(8);
    let page_ids: Vec<PageId>;

    {
        let store = Arc::new(PageStore::open(temp_file.path(), &config).unwrap());
        let first = store.extend(5).unwrap();
        page_ids = (0..5).map(|i| first.offset(i)).collect();
        let pool = BufferPool::new(store, &config).unwrap();

        for (i, &pid) in page_ids.iter().enumerate() {
            let slot = pool.checkout(pid).unwrap();
            pool.write_slot(slot)[100] = i as u8 + 1;
            pool.release(slot, PageHint::DIRTY);
        }
        assert_eq!(pool.flush_all().unwrap(), 5);
        assert_eq!(pool.flush_all().unwrap(), 0);
    }

    let store = Arc::new(PageStore::open(temp_file.path(), &config).unwrap());
    let pool = BufferPool::new(store, &config).unwrap();
    for (i, &pid) in page_ids.iter().enumerate() {
        let slot = pool.checkout(pid).unwrap();
        assert_eq!(pool.read_slot(slot)[100], i as u8 + 1);
        pool.release(slot, PageHint::empty());
    }
}
