use kernel_sync::SpinLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::{panic, thread};

#[test]
fn guard_releases_on_drop() {
    let lock = SpinLock::new(BTreeMap::new());
    {
        let mut map = lock.lock();
        map.insert(0x1000_u64, 4096_u64);
        assert!(lock.is_locked());
    }
    assert!(!lock.is_locked());
    assert_eq!(lock.lock().get(&0x1000), Some(&4096));
}

#[test]
fn try_lock_fails_while_held() {
    let lock = SpinLock::new(7_u32);
    let held = lock.try_lock().expect("uncontended");
    assert_eq!(*held, 7);
    assert!(lock.try_lock().is_none());
    drop(held);
    assert!(lock.try_lock().is_some());
}

#[test]
fn with_lock_returns_closure_result() {
    let lock = SpinLock::new(vec![3_u64, 1, 2]);
    let removed = lock.with_lock(|v| {
        v.sort_unstable();
        v.remove(0)
    });
    assert_eq!(removed, 1);
    assert_eq!(lock.into_inner(), vec![2, 3]);
}

#[test]
fn get_mut_needs_no_lock() {
    let mut lock = SpinLock::new(String::from("sg"));
    lock.get_mut().push('t');
    assert_eq!(*lock.lock(), "sgt");
}

#[test]
fn debug_shows_contents_or_locked_state() {
    let lock = SpinLock::new(5_u8);
    assert_eq!(format!("{lock:?}"), "SpinLock { inner: 5 }");
    let _guard = lock.lock();
    assert_eq!(format!("{lock:?}"), "SpinLock { <locked> }");
}

#[test]
fn concurrent_inserts_and_removals_stay_consistent() {
    const THREADS: usize = 8;
    const KEYS: usize = 2_000;

    let lock = Arc::new(SpinLock::new(BTreeMap::<usize, usize>::new()));
    let in_cs = Arc::new(AtomicUsize::new(0));
    let start = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let lock = Arc::clone(&lock);
            let in_cs = Arc::clone(&in_cs);
            let start = Arc::clone(&start);
            thread::spawn(move || {
                start.wait();
                for k in 0..KEYS {
                    let key = t * KEYS + k;
                    lock.with_lock(|map| {
                        assert_eq!(in_cs.fetch_add(1, Ordering::SeqCst), 0, "mutual exclusion violated");
                        map.insert(key, t);
                        in_cs.fetch_sub(1, Ordering::SeqCst);
                    });
                    if k % 2 == 0 {
                        assert_eq!(lock.with_lock(|map| map.remove(&key)), Some(t));
                    }
                    thread::yield_now();
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    let map = lock.lock();
    assert_eq!(map.len(), THREADS * KEYS / 2);
    assert!(map.keys().all(|k| k % 2 == 1));
}

#[test]
fn lock_is_released_on_panic() {
    let lock = SpinLock::new(0_u32);
    let result = panic::catch_unwind(panic::AssertUnwindSafe(|| {
        lock.with_lock(|v| {
            *v = 9;
            panic!("boom");
        });
    }));
    assert!(result.is_err());
    assert_eq!(lock.with_lock(|v| *v), 9);
}

#[test]
fn spin_lock_is_sync_for_send_contents() {
    fn assert_sync<S: Sync>(_: &S) {}
    assert_sync(&SpinLock::new(BTreeMap::<u64, u64>::new()));
}
