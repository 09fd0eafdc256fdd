//! Privileged-thread identity.
//!
//! Every dispatcher is bound to exactly one privileged (main) thread: the
//! thread that owns its tick source and runs `drain`. This module provides
//! the process-wide main thread marker and [`ThreadAffinity`], the
//! per-object binding used by the event loop host.
//!
//! ```
//! use thread_updater::thread_check::ThreadAffinity;
//!
//! let affinity = ThreadAffinity::current();
//! assert!(affinity.is_same_thread());
//!
//! let other = std::thread::spawn(move || affinity.is_same_thread())
//!     .join()
//!     .unwrap();
//! assert!(!other);
//! ```

use std::sync::OnceLock;
use std::thread::ThreadId;

/// Global storage for the main thread ID.
static MAIN_THREAD_ID: OnceLock<ThreadId> = OnceLock::new();

/// Register the current thread as the process main thread.
///
/// Returns `true` if the current thread is now (or already was) the main
/// thread, and `false` if a different thread registered first.
pub fn set_main_thread() -> bool {
    let current = std::thread::current().id();
    *MAIN_THREAD_ID.get_or_init(|| current) == current
}

/// Get the main thread ID if it has been set.
#[inline]
pub fn main_thread_id() -> Option<ThreadId> {
    MAIN_THREAD_ID.get().copied()
}

/// Check if the current thread is the process main thread.
///
/// Returns `true` when no main thread has been registered yet, so that code
/// running during early initialization takes the direct path.
#[inline]
pub fn is_main_thread() -> bool {
    match MAIN_THREAD_ID.get() {
        Some(&main_id) => std::thread::current().id() == main_id,
        None => true,
    }
}

/// Thread affinity tracker.
///
/// Records the thread an object is bound to and answers whether the caller
/// is running on it.
#[derive(Debug, Clone, Copy)]
pub struct ThreadAffinity {
    thread_id: ThreadId,
}

impl Default for ThreadAffinity {
    fn default() -> Self {
        Self::current()
    }
}

impl ThreadAffinity {
    /// Bind to the current thread.
    #[inline]
    pub fn current() -> Self {
        Self {
            thread_id: std::thread::current().id(),
        }
    }

    /// Bind to the registered main thread, falling back to the current thread.
    pub fn main_thread() -> Self {
        Self {
            thread_id: main_thread_id().unwrap_or_else(|| std::thread::current().id()),
        }
    }

    /// Get the thread ID this affinity is bound to.
    #[inline]
    pub fn thread_id(&self) -> ThreadId {
        self.thread_id
    }

    /// Check if the current thread matches this affinity.
    #[inline]
    pub fn is_same_thread(&self) -> bool {
        std::thread::current().id() == self.thread_id
    }

    /// Panics if the current thread does not match this affinity.
    pub fn assert_same_thread(&self, operation: &str) {
        if !self.is_same_thread() {
            self.panic_wrong_thread(operation);
        }
    }

    /// Debug-only variant of [`assert_same_thread`](Self::assert_same_thread).
    #[inline]
    pub fn debug_assert_same_thread(&self, operation: &str) {
        #[cfg(debug_assertions)]
        self.assert_same_thread(operation);
        #[cfg(not(debug_assertions))]
        let _ = operation;
    }

    #[cold]
    #[inline(never)]
    fn panic_wrong_thread(&self, operation: &str) -> ! {
        let current = std::thread::current();
        let current_name = current.name().unwrap_or("<unnamed>");

        panic!(
            "{operation} must run on the privileged thread {:?}, \
             but was called from \"{current_name}\" ({:?}). \
             Submit the work through the dispatcher instead of calling it directly.",
            self.thread_id,
            current.id()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn test_thread_affinity_same_thread() {
        let affinity = ThreadAffinity::current();
        assert!(affinity.is_same_thread());
        affinity.assert_same_thread("test");
        affinity.debug_assert_same_thread("test");
    }

    #[test]
    fn test_thread_affinity_different_thread() {
        let affinity = ThreadAffinity::current();
        let result = Arc::new(AtomicBool::new(false));
        let result_clone = result.clone();

        std::thread::spawn(move || {
            result_clone.store(!affinity.is_same_thread(), Ordering::SeqCst);
        })
        .join()
        .unwrap();

        assert!(result.load(Ordering::SeqCst));
    }

    #[test]
    fn test_thread_affinity_panic_on_wrong_thread() {
        let affinity = ThreadAffinity::current();

        let result = std::thread::spawn(move || {
            affinity.assert_same_thread("drain");
        })
        .join();

        assert!(result.is_err(), "expected an affinity violation panic");
    }

    #[test]
    fn test_set_main_thread_from_worker() {
        // Only this test registers a main thread, so whichever thread wins
        // must observe itself as main and any other thread must not.
        let registered = std::thread::spawn(|| {
            let won = set_main_thread();
            (won, is_main_thread(), set_main_thread())
        })
        .join()
        .unwrap();

        let (won, seen_as_main, second_call) = registered;
        if won {
            assert!(seen_as_main);
            assert!(second_call, "re-registering the same thread is accepted");
            assert!(!is_main_thread());
            assert!(main_thread_id().is_some());
        }
    }

    #[test]
    fn test_thread_affinity_copy() {
        let affinity1 = ThreadAffinity::current();
        let affinity2 = affinity1;

        assert_eq!(affinity1.thread_id(), affinity2.thread_id());
        assert!(ThreadAffinity::default().is_same_thread());
    }
}
