use kernel_sync::IrqLock;
use std::panic;

#[test]
fn lock_mutates_and_releases() {
    let l = IrqLock::new(0_u32);

    {
        let mut g = l.lock();
        *g = 41;
    }

    {
        let mut g = l.lock();
        *g += 1;
        assert_eq!(*g, 42);
    }
}

#[test]
fn try_lock_fails_while_held() {
    let l = IrqLock::new(1u8);

    let g1 = l.try_lock();
    assert!(g1.is_some());
    assert!(l.try_lock().is_none());

    drop(g1);
    assert!(l.try_lock().is_some());
}

#[test]
fn with_lock_returns_closure_result() {
    let l = IrqLock::new(Vec::<u64>::new());
    let len = l.with_lock(|v| {
        v.push(0x1000);
        v.push(0x2000);
        v.len()
    });
    assert_eq!(len, 2);
    assert_eq!(l.with_lock(|v| v.clone()), vec![0x1000, 0x2000]);
}

#[test]
fn get_mut_and_into_inner() {
    let mut l = IrqLock::new(vec![1, 2, 3]);
    l.get_mut().push(4);
    assert_eq!(l.into_inner(), vec![1, 2, 3, 4]);
}

#[test]
fn contended_increments_are_exact() {
    use std::sync::{Arc, Barrier};
    use std::thread;

    let threads = 4;
    let iters = 2_000;

    let lock = Arc::new(IrqLock::new(0usize));
    let start = Arc::new(Barrier::new(threads));

    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let lock = Arc::clone(&lock);
            let start = Arc::clone(&start);
            thread::spawn(move || {
                start.wait();
                for _ in 0..iters {
                    lock.with_lock(|v| *v += 1);
                    thread::yield_now();
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(lock.with_lock(|v| *v), threads * iters);
}

#[test]
fn lock_is_released_on_panic() {
    let l = IrqLock::new(0u32);

    let res = panic::catch_unwind(panic::AssertUnwindSafe(|| {
        l.with_lock(|v| {
            *v = 123;
            panic!("boom");
        });
    }));
    assert!(res.is_err());
    assert_eq!(l.with_lock(|v| *v), 123);
}

#[test]
fn irq_lock_is_sync_for_send_t() {
    fn takes_sync<S: Sync>(_s: &S) {}
    let l = IrqLock::new(0u8);
    takes_sync(&l);
}
