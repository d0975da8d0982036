//! The per-watch counting wake primitive: a `Mutex`+`Condvar` counter with `post`/`wait`
//! operations. Construction seeds the count to 1, so a worker's first `wait` returns immediately.

use std::sync::{Condvar, Mutex};

/// Whether a `wait()` returned because the count became positive, or because it was interrupted
/// and should be retried by the caller.
#[derive(Debug, PartialEq, Eq)]
pub enum WaitResult {
    Posted,
    Interrupted,
}

pub struct Wake {
    count: Mutex<u32>,
    condvar: Condvar,
}

impl Wake {
    /// Constructs a wake with its count seeded to 1, so that the first `wait()` returns
    /// immediately without requiring an external post. This lets a worker process its initial
    /// `(INIT, UNMONITORED)` transition without prompting.
    pub fn new() -> Self {
        Wake {
            count: Mutex::new(1),
            condvar: Condvar::new(),
        }
    }

    /// Increments the count and wakes at most one waiter.
    pub fn post(&self) {
        let mut count = match self.count.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *count = count.saturating_add(1);
        self.condvar.notify_one();
    }

    /// Blocks until the count is greater than zero, then atomically decrements it.
    ///
    /// This implementation cannot itself be interrupted by a Unix signal the way a blocking
    /// syscall can (`Condvar::wait` is not a syscall a signal handler can interrupt), so it always
    /// returns `Posted`. The `WaitResult` type is kept so that callers — in particular the worker
    /// loop, which is written against the general "retry on interruption" contract this primitive
    /// specifies — do not need to change if a future implementation is backed by a real futex or
    /// signal-interruptible primitive.
    pub fn wait(&self) -> WaitResult {
        let mut count = match self.count.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        while *count == 0 {
            count = match self.condvar.wait(count) {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
        }
        *count -= 1;
        WaitResult::Posted
    }
}

impl Default for Wake {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn first_wait_returns_immediately() {
        let wake = Wake::new();
        assert_eq!(wake.wait(), WaitResult::Posted);
    }

    #[test]
    fn wait_blocks_until_post() {
        let wake = Arc::new(Wake::new());
        // Consume the initial seeded count.
        assert_eq!(wake.wait(), WaitResult::Posted);

        let waiter = Arc::clone(&wake);
        let handle = thread::spawn(move || waiter.wait());

        thread::sleep(Duration::from_millis(50));
        wake.post();

        assert_eq!(handle.join().unwrap(), WaitResult::Posted);
    }

    #[test]
    fn posts_without_intervening_wait_coalesce_into_single_wakeup() {
        let wake = Wake::new();
        assert_eq!(wake.wait(), WaitResult::Posted);

        wake.post();
        wake.post();
        wake.post();

        // Three posts, but only one outstanding count is guaranteed to have been consumed by a
        // wait in between; the remaining two are still available to be waited on.
        assert_eq!(wake.wait(), WaitResult::Posted);
        assert_eq!(wake.wait(), WaitResult::Posted);
    }
}
