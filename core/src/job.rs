//! Worker pool exposing a single blocking `parallel_for` (C2).

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

type JobFn = dyn Fn(usize) + Send + Sync;

struct Shared {
    next: AtomicUsize,
    end: AtomicUsize,
    job_active: Mutex<bool>,
    active_workers: AtomicUsize,
    shutdown: AtomicBool,
    // guarded by the same mutex as `job_active` so wake/done never race a
    // worker reading a half-published closure
    current_func: Mutex<Option<Arc<JobFn>>>,
    wake: Condvar,
    done: Condvar,
}

/// Fixed-size worker pool driving one blocking `parallel_for` at a time.
///
/// Mirrors a single-atomic-counter work-stealing scheme: `parallel_for`
/// publishes `[start, end)` and a closure, wakes every worker, and each
/// worker claims indices one at a time via `fetch_add` until the range is
/// exhausted. Nested `parallel_for` calls are not supported.
pub struct JobSystem {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

fn worker_loop(shared: Arc<Shared>) {
    loop {
        let func = {
            let mut guard = shared.job_active.lock().unwrap();
            loop {
                if shared.shutdown.load(Ordering::Acquire) {
                    return;
                }
                if *guard && shared.next.load(Ordering::Acquire) < shared.end.load(Ordering::Acquire) {
                    break;
                }
                guard = shared.wake.wait(guard).unwrap();
            }
            shared.current_func.lock().unwrap().clone()
        };
        let Some(func) = func else { continue };

        shared.active_workers.fetch_add(1, Ordering::AcqRel);
        let end = shared.end.load(Ordering::Acquire);
        loop {
            let idx = shared.next.fetch_add(1, Ordering::AcqRel);
            if idx >= end {
                break;
            }
            func(idx);
        }
        // drop the active-worker count and wake the caller even if `func`
        // panicked partway through, so a single bad shader never hangs submit
        let remaining = shared.active_workers.fetch_sub(1, Ordering::AcqRel) - 1;
        if remaining == 0 && shared.next.load(Ordering::Acquire) >= end {
            let mut guard = shared.job_active.lock().unwrap();
            *guard = false;
            shared.done.notify_all();
        }
    }
}

impl JobSystem {
    /// Spawns `thread_count.max(4)` workers (default: hardware concurrency).
    pub fn new(thread_count: usize) -> Self {
        let thread_count = thread_count.max(4);
        let shared = Arc::new(Shared {
            next: AtomicUsize::new(0),
            end: AtomicUsize::new(0),
            job_active: Mutex::new(false),
            active_workers: AtomicUsize::new(0),
            shutdown: AtomicBool::new(false),
            current_func: Mutex::new(None),
            wake: Condvar::new(),
            done: Condvar::new(),
        });
        let workers = (0..thread_count)
            .map(|_| {
                let shared = Arc::clone(&shared);
                std::thread::spawn(move || worker_loop(shared))
            })
            .collect();
        log::info!("job system started with {} workers", thread_count);
        JobSystem { shared, workers }
    }

    pub fn default_thread_count() -> usize {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4)
            .max(4)
    }

    /// Invokes `f(i)` for each `i` in `start..end`, across the worker pool,
    /// and blocks until every invocation has returned. Must not be called
    /// reentrantly from inside a running job.
    pub fn parallel_for<F>(&self, start: usize, end: usize, f: F)
    where
        F: Fn(usize) + Send + Sync + 'static,
    {
        if start >= end {
            return;
        }
        {
            let mut guard = self.shared.job_active.lock().unwrap();
            *self.shared.current_func.lock().unwrap() = Some(Arc::new(f));
            self.shared.next.store(start, Ordering::Release);
            self.shared.end.store(end, Ordering::Release);
            self.shared.active_workers.store(0, Ordering::Release);
            *guard = true;
            self.shared.wake.notify_all();

            let _guard = self
                .shared
                .done
                .wait_while(guard, |active| {
                    *active && self.shared.active_workers.load(Ordering::Acquire) > 0
                        || self.shared.next.load(Ordering::Acquire) < end
                })
                .unwrap();
        }
        *self.shared.current_func.lock().unwrap() = None;
    }
}

impl Drop for JobSystem {
    fn drop(&mut self) {
        self.shared.shutdown.store(true, Ordering::Release);
        {
            let _guard = self.shared.job_active.lock().unwrap();
            self.shared.wake.notify_all();
        }
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}
