//! Count-down latch used as the start and failure barriers.
//!
//! Threads call [`CountDownLatch::count_down`] once, then block in
//! [`CountDownLatch::wait`] until the count reaches zero. The count saturates
//! at zero, so the pool can count down on behalf of a thread that died without
//! risking an underflow if that thread got there first.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Blocking count-down latch.
///
/// Safe to share across threads via `Arc<CountDownLatch>`.
#[derive(Debug)]
pub struct CountDownLatch {
    count: Mutex<usize>,
    cv: Condvar,
}

impl CountDownLatch {
    /// Latch that opens after `count` count-downs. A zero count is open.
    pub fn new(count: usize) -> Self {
        Self {
            count: Mutex::new(count),
            cv: Condvar::new(),
        }
    }

    /// Lock with poison recovery. A thread panicking while holding the lock
    /// must not wedge every other worker on the barrier.
    fn lock_or_recover(&self) -> MutexGuard<'_, usize> {
        self.count.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Decrement the count, waking every waiter when it reaches zero.
    pub fn count_down(&self) {
        let mut count = self.lock_or_recover();
        if *count == 0 {
            return;
        }
        *count -= 1;
        if *count == 0 {
            self.cv.notify_all();
        }
    }

    /// Current count. A snapshot, possibly stale by the time it is used.
    pub fn count(&self) -> usize {
        *self.lock_or_recover()
    }

    /// Block until the count reaches zero.
    pub fn wait(&self) {
        let mut count = self.lock_or_recover();
        while *count > 0 {
            count = self.cv.wait(count).unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Block until the count reaches zero or `timeout` elapses.
    ///
    /// Returns `true` when the latch opened.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut count = self.lock_or_recover();
        while *count > 0 {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _) = self
                .cv
                .wait_timeout(count, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            count = guard;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_zero_latch_is_open() {
        let latch = CountDownLatch::new(0);
        latch.wait();
        assert!(latch.wait_timeout(Duration::ZERO));
    }

    #[test]
    fn test_count_down_saturates() {
        let latch = CountDownLatch::new(1);
        latch.count_down();
        latch.count_down();
        assert_eq!(latch.count(), 0);
    }

    #[test]
    fn test_wait_timeout_expires() {
        let latch = CountDownLatch::new(1);
        assert!(!latch.wait_timeout(Duration::from_millis(20)));
        assert_eq!(latch.count(), 1);
    }

    #[test]
    fn test_waiters_released_together() {
        let latch = Arc::new(CountDownLatch::new(3));
        let handles: Vec<_> = (0..3)
            .map(|_| {
                let latch = latch.clone();
                thread::spawn(move || {
                    latch.count_down();
                    latch.wait();
                    latch.count()
                })
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().expect("thread"), 0);
        }
    }
}
