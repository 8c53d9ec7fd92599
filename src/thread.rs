//! Spawn-join functionality for benchmark workers.
//!
//! **You may not need to check this if it is OK to run benchmarks with [`std::thread`].**
//!
//! Some engines want their callers on threads they manage themselves (e.g., registered with an
//! internal epoch or runtime). In that case, their join handle should implement the
//! [`JoinHandle`] trait and the spawner needs to implement [`Thread`]; the runner then uses it
//! in place of [`DefaultThread`].
//!
//! Workers report through the run's shared state, so spawned functions have no return value.

use log::warn;

/// A join handle returned by a spawn function.
pub trait JoinHandle {
    /// Joins the thread, consuming the boxed self. Returns `false` if the thread panicked.
    fn join(self: Box<Self>) -> bool;
}

/// A thread management abstraction.
pub trait Thread: Clone + Send + 'static {
    /// Spawns a new thread named `name` running a boxed closure.
    fn spawn(&self, name: String, f: Box<dyn FnOnce() + Send>) -> Box<dyn JoinHandle>;

    /// Pins the current thread to a CPU core. Core ids wrap around the available cores.
    fn pin(&self, core: usize);
}

/// A zero-sized wrapper for [`std::thread`] functions.
#[derive(Clone)]
pub struct DefaultThread;

/// A wrapper for [`std::thread::JoinHandle`].
pub struct DefaultJoinHandle(std::thread::JoinHandle<()>);

impl JoinHandle for DefaultJoinHandle {
    fn join(self: Box<Self>) -> bool {
        self.0.join().is_ok()
    }
}

impl Thread for DefaultThread {
    /// Panics if the thread cannot be created, like [`std::thread::spawn`].
    fn spawn(&self, name: String, f: Box<dyn FnOnce() + Send>) -> Box<dyn JoinHandle> {
        let handle = std::thread::Builder::new()
            .name(name.clone())
            .spawn(f)
            .unwrap_or_else(|e| panic!("failed to spawn thread {}: {}", name, e));
        Box::new(DefaultJoinHandle(handle))
    }

    fn pin(&self, core: usize) {
        match core_affinity::get_core_ids() {
            Some(cores) if !cores.is_empty() => {
                let id = cores[core % cores.len()];
                if !core_affinity::set_for_current(id) {
                    warn!("Failed to pin thread to core {}", id.id);
                }
            }
            _ => warn!("No core ids available, thread {} is not pinned", core),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn spawn_named_and_join() {
        let thread = DefaultThread;
        let hits = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let hits = hits.clone();
                let t = thread.clone();
                thread.spawn(
                    format!("doer.{}", i),
                    Box::new(move || {
                        t.pin(i);
                        assert_eq!(
                            std::thread::current().name(),
                            Some(format!("doer.{}", i).as_str())
                        );
                        hits.fetch_add(1, Ordering::Relaxed);
                    }),
                )
            })
            .collect();
        for h in handles {
            assert!(h.join());
        }
        assert_eq!(hits.load(Ordering::Relaxed), 4);
    }

    #[test]
    fn join_reports_panics() {
        let h = DefaultThread.spawn("boom".to_string(), Box::new(|| panic!("boom")));
        assert!(!h.join());
    }
}
