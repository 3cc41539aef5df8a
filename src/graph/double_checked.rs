//! Double-checked memoization cell shared by scoped bindings and lazies.

use parking_lot::ReentrantMutex;
use std::sync::OnceLock;

/// Computes a value at most once and publishes it.
///
/// The fast path is a lock-free read of the `OnceLock`; an empty lock is the
/// "uninitialized" sentinel, so an absent (`None`) value is cached like any
/// other. Computation runs under a per-cell reentrant lock. A failed
/// computation publishes nothing and the next caller retries.
pub struct DoubleChecked<T> {
    value: OnceLock<T>,
    lock: ReentrantMutex<()>,
}

impl<T: Clone> DoubleChecked<T> {
    pub fn new() -> Self {
        Self {
            value: OnceLock::new(),
            lock: ReentrantMutex::new(()),
        }
    }

    pub fn get_or_try_compute<E>(&self, compute: impl FnOnce() -> Result<T, E>) -> Result<T, E> {
        if let Some(value) = self.value.get() {
            return Ok(value.clone());
        }

        let _guard = self.lock.lock();
        if let Some(value) = self.value.get() {
            return Ok(value.clone());
        }

        let computed = compute()?;
        // A reentrant call on this thread may have published first; that value wins.
        Ok(self.value.get_or_init(|| computed).clone())
    }

    pub fn is_initialized(&self) -> bool {
        self.value.get().is_some()
    }

    /// The published value without computing.
    pub fn peek(&self) -> Option<T> {
        self.value.get().cloned()
    }
}

impl<T: Clone> Default for DoubleChecked<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Barrier};

    #[test]
    fn computes_once() {
        let cell = DoubleChecked::<Option<u32>>::new();
        let calls = AtomicUsize::new(0);
        let compute = || -> Result<Option<u32>, ()> {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(None)
        };

        assert_eq!(cell.get_or_try_compute(compute), Ok(None));
        assert_eq!(cell.get_or_try_compute(compute), Ok(None));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(cell.is_initialized());
    }

    #[test]
    fn failure_is_not_cached() {
        let cell = DoubleChecked::<u32>::new();
        assert_eq!(cell.get_or_try_compute(|| Err("boom")), Err("boom"));
        assert!(!cell.is_initialized());
        assert_eq!(cell.get_or_try_compute(|| Ok::<_, &str>(7)), Ok(7));
        assert_eq!(cell.peek(), Some(7));
    }

    #[test]
    fn reentrant_computation_keeps_first_published_value() {
        let cell = Arc::new(DoubleChecked::<u32>::new());
        let inner = cell.clone();
        let value = cell.get_or_try_compute(|| {
            let nested = inner.get_or_try_compute(|| Ok::<_, ()>(1))?;
            Ok::<_, ()>(nested + 1)
        });
        assert_eq!(value, Ok(1));
        assert_eq!(cell.peek(), Some(1));
    }

    #[test]
    fn concurrent_first_access_computes_once() {
        let cell = Arc::new(DoubleChecked::<usize>::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(8));

        std::thread::scope(|s| {
            for _ in 0..8 {
                let cell = cell.clone();
                let calls = calls.clone();
                let barrier = barrier.clone();
                s.spawn(move || {
                    barrier.wait();
                    cell.get_or_try_compute(|| Ok::<_, ()>(calls.fetch_add(1, Ordering::SeqCst)))
                        .unwrap()
                });
            }
        });

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cell.peek(), Some(0));
    }
}
