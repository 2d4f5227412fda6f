use slicepool_rs::{Buffer, HostEnv, PoolConfig, PoolManager, PoolSlice, DEFAULT_HEAP_BUDGET};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;

/// Fixed host facts so slice capacities do not depend on the machine running
/// the tests.
struct FixedEnv {
    processors: usize,
    heap: usize,
}

impl HostEnv for FixedEnv {
    fn available_processors(&self) -> usize {
        self.processors
    }

    fn max_heap_bytes(&self) -> usize {
        self.heap
    }
}

fn default_manager() -> PoolManager {
    let env = FixedEnv {
        processors: 2,
        heap: DEFAULT_HEAP_BUDGET,
    };
    PoolManager::with_env(PoolConfig::default().with_slices_per_pool(2), &env).unwrap()
}

/// Manager whose class-0 slice holds exactly 16 slots, with a single slice
/// per class so every allocation is deterministic.
fn tiny_manager() -> PoolManager {
    let env = FixedEnv {
        processors: 1,
        heap: 1_966_080,
    };
    PoolManager::with_env(PoolConfig::default().with_slices_per_pool(1), &env).unwrap()
}

#[test]
fn small_request_comes_from_class_zero() {
    let m = default_manager();
    let b = m.allocate(1000);
    assert_eq!(b.capacity(), 4096);
    assert_eq!(b.limit(), 1000);
    assert!(b.as_pooled().is_some());
}

#[test]
fn medium_request_comes_from_the_top_class() {
    let m = default_manager();
    let b = m.allocate(20000);
    assert_eq!(b.capacity(), 65536);
    assert_eq!(b.limit(), 20000);
}

#[test]
fn oversize_request_assembles_a_composite() {
    let m = default_manager();
    let b = m.allocate(200_000);
    assert_eq!(b.limit(), 200_000);

    let composite = b.as_composite().unwrap();
    let caps: Vec<usize> = composite.segments().iter().map(|s| s.capacity()).collect();
    assert_eq!(caps, vec![65536, 65536, 65536, 4096]);
}

#[test]
fn duplicate_defers_the_return_until_both_dispose() {
    let m = tiny_manager();
    let pool = m.pools()[0].clone();
    let full = pool.elements_count();

    let Buffer::Pooled(mut b) = m.allocate(8) else {
        panic!("small request must be pooled")
    };
    let mut v = b.duplicate();

    b.dispose();
    assert_eq!(
        pool.elements_count(),
        full - 1,
        "the duplicate still holds the storage"
    );

    v.dispose();
    assert_eq!(pool.elements_count(), full, "last holder returned it");
}

#[test]
fn split_halves_return_the_original_region() {
    let m = tiny_manager();
    let pool = m.pools()[0].clone();
    let full = pool.elements_count();

    let Buffer::Pooled(mut b) = m.allocate(100) else {
        panic!("small request must be pooled")
    };
    let mut s = b.split(40);

    b.set_position(0);
    b.put_slice(&[0xAA; 40]);
    s.set_position(0);
    s.put_slice(&[0xBB; 16]);

    b.dispose();
    assert_eq!(pool.elements_count(), full - 1);
    s.dispose();
    assert_eq!(pool.elements_count(), full);

    // The region handed out next carries its full class capacity again.
    let b2 = m.allocate(4096);
    assert_eq!(b2.capacity(), 4096);
}

#[test]
fn overfull_slice_refuses_the_extra_buffer() {
    let m = tiny_manager();
    let pool = m.pools()[0].clone();
    let slice: Arc<PoolSlice> = pool.slices()[0].clone();
    let capacity = slice.capacity();
    assert_eq!(capacity, 16);

    // Drain the ring completely, then allocate one buffer past capacity; the
    // pool degrades to a fresh heap allocation instead of blocking.
    let mut held = Vec::new();
    while let Some(b) = slice.poll() {
        held.push(b);
    }
    assert_eq!(held.len(), capacity);
    held.push(pool.allocate());

    // All but the overflow buffer fit back.
    let mut accepted = 0;
    let mut refused = 0;
    for b in held {
        if slice.offer(b) {
            accepted += 1;
        } else {
            refused += 1;
        }
    }
    assert_eq!(accepted, capacity);
    assert_eq!(refused, 1);
    assert_eq!(slice.elements_count(), capacity);
}

#[test]
fn release_after_allocate_restores_the_slice_count() {
    let m = tiny_manager();
    let pool = m.pools()[0].clone();
    let full = pool.elements_count();

    for _ in 0..100 {
        let b = m.allocate(1000);
        m.release(b);
    }
    assert_eq!(pool.elements_count(), full);
}

#[test]
fn clear_drops_all_cached_buffers() {
    let m = tiny_manager();
    let slice = m.pools()[0].slices()[0].clone();
    slice.clear();
    assert_eq!(slice.elements_count(), 0);
    assert_eq!(slice.size(), 0);

    // Allocation still works; the ring simply has nothing cached.
    let b = m.allocate(1000);
    assert_eq!(b.capacity(), 4096);
}

#[test]
fn buffers_cross_threads_and_return_to_their_slice() {
    let m = default_manager();
    let b = m.allocate(5000);
    let pool1 = m.pools()[1].clone();
    let full = pool1.elements_count();

    thread::spawn(move || {
        // Released on a different thread than it was allocated on.
        b.dispose();
    })
    .join()
    .unwrap();

    assert_eq!(pool1.elements_count(), full + 1);
}

// ---------------------------------------------------------------------
// STRESS
// ---------------------------------------------------------------------

/// `pollers` threads take buffers from one shared slice and hand them through
/// a channel to `offerers` threads that verify a written tag and return them.
/// Afterwards the slice must hold exactly its initial population: nothing
/// lost, nothing duplicated.
fn poll_offer_stress(pollers: usize, offerers: usize, ops_per_thread: usize) {
    let env = FixedEnv {
        processors: 1,
        heap: 196_608_000,
    };
    let config = PoolConfig::default()
        .with_number_of_pools(1)
        .with_slices_per_pool(1);
    let m = PoolManager::with_env(config, &env).unwrap();
    let slice = m.pools()[0].slices()[0].clone();
    let initial = slice.elements_count();
    assert!(initial > 0);

    let (tx, rx) = mpsc::channel();
    let rx = Arc::new(std::sync::Mutex::new(rx));
    let mut handles = Vec::new();

    for id in 0..pollers {
        let slice = slice.clone();
        let tx = tx.clone();
        handles.push(thread::spawn(move || {
            let mut done = 0;
            while done < ops_per_thread {
                match slice.poll() {
                    Some(mut b) => {
                        let tag = ((id as u64) << 32 | done as u64).to_le_bytes();
                        b.clear();
                        b.put_slice(&tag);
                        tx.send(b).unwrap();
                        done += 1;
                    }
                    None => thread::yield_now(),
                }
            }
        }));
    }
    drop(tx);

    for _ in 0..offerers {
        let slice = slice.clone();
        let rx = rx.clone();
        handles.push(thread::spawn(move || loop {
            let received = rx.lock().unwrap().recv();
            let Ok(mut b) = received else { break };
            // The tag written by the poller must still be intact: two threads
            // holding the same region would tear it.
            b.set_position(0);
            let mut tag = [0u8; 8];
            b.copy_to_slice(&mut tag);
            let value = u64::from_le_bytes(tag);
            assert!((value >> 32) < pollers as u64, "torn tag {value:#x}");
            assert!(slice.offer(b), "a circulating buffer never overfills");
        }));
    }

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(
        slice.elements_count(),
        initial,
        "every buffer polled was offered back exactly once"
    );
}

#[test]
fn stress_poll_offer_small() {
    poll_offer_stress(4, 4, 20_000);
}

#[test]
#[ignore = "full-size stress run, takes minutes in debug builds"]
fn stress_poll_offer_full() {
    poll_offer_stress(16, 16, 1_000_000);
}
