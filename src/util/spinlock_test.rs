use std::{sync::Arc, thread};

use super::*;

#[test]
fn test_spinlock_exclusion() {
    let lock = Arc::new(Spinlock::new(0_u64));

    let n_threads = 8_u64;
    let n_incrs = 10_000_u64;

    let mut handles = vec![];
    for _ in 0..n_threads {
        let lock = Arc::clone(&lock);
        handles.push(thread::spawn(move || {
            for _ in 0..n_incrs {
                let mut val = lock.lock();
                *val += 1;
            }
        }));
    }

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(*lock.lock(), n_threads * n_incrs);
    println!("test_spinlock_exclusion conflicts:{}", lock.to_conflicts());
}

#[test]
fn test_spinlock_into_inner() {
    let lock = Spinlock::new(vec![1, 2, 3]);
    {
        let mut val = lock.lock();
        val.push(4);
    }
    assert_eq!(lock.into_inner(), vec![1, 2, 3, 4]);
}
