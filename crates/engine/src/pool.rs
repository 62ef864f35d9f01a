//! Bounded write pool
//!
//! Long-running writes are handed to a fixed set of worker threads so they
//! do not occupy the caller's thread. The queue is FIFO and bounded; past
//! capacity, submission fails with [`WriteError::Backpressure`] instead of
//! blocking.
//!
//! Each submission returns a [`WriteTicket`]. A job that panics is caught and
//! logged, its worker keeps running, and its ticket reports
//! [`WriteError::Panicked`].

use crate::error::WriteError;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, error};

/// Pool metrics snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Jobs waiting in the queue
    pub queue_depth: usize,
    /// Jobs currently running
    pub active_jobs: usize,
    /// Jobs finished since the pool started, panicked ones included
    pub jobs_completed: u64,
    /// Worker threads
    pub worker_count: usize,
}

/// Handle to the result of a submitted write
#[derive(Debug)]
pub struct WriteTicket<R> {
    rx: Receiver<Result<R, WriteError>>,
}

impl<R> WriteTicket<R> {
    /// Block until the write finishes
    pub fn wait(self) -> Result<R, WriteError> {
        self.rx.recv().unwrap_or(Err(WriteError::Panicked))
    }

    /// Result if the write has already finished
    pub fn try_wait(&self) -> Option<Result<R, WriteError>> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(mpsc::TryRecvError::Empty) => None,
            Err(mpsc::TryRecvError::Disconnected) => Some(Err(WriteError::Panicked)),
        }
    }
}

type Job = Box<dyn FnOnce() + Send>;

struct PoolInner {
    queue: Mutex<VecDeque<Job>>,
    work_ready: Condvar,
    drain_cond: Condvar,
    shutdown: AtomicBool,
    queue_depth: AtomicUsize,
    active_jobs: AtomicUsize,
    max_queue_depth: usize,
    jobs_completed: AtomicU64,
}

/// Fixed-size pool of write workers
pub struct WritePool {
    inner: Arc<PoolInner>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    num_threads: usize,
}

impl WritePool {
    /// Start `num_threads` workers named `tempora-write-0`, `tempora-write-1`, ...
    ///
    /// # Errors
    ///
    /// Returns an error if a worker thread cannot be spawned.
    pub fn new(num_threads: usize, max_queue_depth: usize) -> io::Result<Self> {
        let inner = Arc::new(PoolInner {
            queue: Mutex::new(VecDeque::new()),
            work_ready: Condvar::new(),
            drain_cond: Condvar::new(),
            shutdown: AtomicBool::new(false),
            queue_depth: AtomicUsize::new(0),
            active_jobs: AtomicUsize::new(0),
            max_queue_depth,
            jobs_completed: AtomicU64::new(0),
        });

        let pool = Self {
            inner,
            workers: Mutex::new(Vec::with_capacity(num_threads)),
            num_threads,
        };
        for i in 0..num_threads {
            let inner = Arc::clone(&pool.inner);
            let spawned = std::thread::Builder::new()
                .name(format!("tempora-write-{}", i))
                .spawn(move || worker_loop(&inner));
            match spawned {
                Ok(handle) => pool.workers.lock().push(handle),
                Err(e) => {
                    pool.shutdown();
                    return Err(e);
                }
            }
        }
        debug!(target: "tempora::pool", threads = num_threads, queue_depth = max_queue_depth, "write pool started");
        Ok(pool)
    }

    /// Queue a write
    ///
    /// # Errors
    ///
    /// - `Backpressure` if the queue is at capacity
    /// - `PoolShutdown` if [`WritePool::shutdown`] was called
    pub fn submit<R, F>(&self, job: F) -> Result<WriteTicket<R>, WriteError>
    where
        R: Send + 'static,
        F: FnOnce() -> Result<R, WriteError> + Send + 'static,
    {
        if self.inner.shutdown.load(Ordering::Acquire) {
            return Err(WriteError::PoolShutdown);
        }

        let (tx, rx) = mpsc::sync_channel(1);
        let work: Job = Box::new(move || {
            // The receiver may have been dropped; the write still happened.
            let _ = tx.send(job());
        });

        {
            // Check and push under one lock so racing submitters cannot
            // overshoot the bound.
            let mut queue = self.inner.queue.lock();
            if queue.len() >= self.inner.max_queue_depth {
                return Err(WriteError::Backpressure);
            }
            queue.push_back(work);
            self.inner.queue_depth.fetch_add(1, Ordering::Release);
        }
        self.inner.work_ready.notify_one();
        Ok(WriteTicket { rx })
    }

    /// Block until every queued and running job has finished
    ///
    /// Workers keep running afterwards.
    pub fn drain(&self) {
        let mut queue = self.inner.queue.lock();
        while self.inner.queue_depth.load(Ordering::Acquire) > 0
            || self.inner.active_jobs.load(Ordering::Acquire) > 0
        {
            self.inner.drain_cond.wait(&mut queue);
        }
    }

    /// Stop accepting jobs, run what is queued, and join the workers
    pub fn shutdown(&self) {
        self.inner.shutdown.store(true, Ordering::Release);

        // Notify under the queue lock so a worker between its shutdown check
        // and its wait cannot miss the wakeup.
        {
            let _queue = self.inner.queue.lock();
            self.inner.work_ready.notify_all();
        }

        let mut workers = self.workers.lock();
        for handle in workers.drain(..) {
            let _ = handle.join();
        }
    }

    /// Whether [`WritePool::shutdown`] was called
    pub fn is_shutdown(&self) -> bool {
        self.inner.shutdown.load(Ordering::Acquire)
    }

    /// Current counters
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            queue_depth: self.inner.queue_depth.load(Ordering::Relaxed),
            active_jobs: self.inner.active_jobs.load(Ordering::Relaxed),
            jobs_completed: self.inner.jobs_completed.load(Ordering::Relaxed),
            worker_count: self.num_threads,
        }
    }
}

impl Drop for WritePool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Decrements `active_jobs` and wakes drain waiters on drop, panics included
struct ActiveJobGuard<'a> {
    inner: &'a PoolInner,
}

impl Drop for ActiveJobGuard<'_> {
    fn drop(&mut self) {
        self.inner.jobs_completed.fetch_add(1, Ordering::Relaxed);
        let prev_active = self.inner.active_jobs.fetch_sub(1, Ordering::Release);

        if prev_active == 1 && self.inner.queue_depth.load(Ordering::Acquire) == 0 {
            let _queue = self.inner.queue.lock();
            self.inner.drain_cond.notify_all();
        }
    }
}

fn worker_loop(inner: &PoolInner) {
    loop {
        let job = {
            let mut queue = inner.queue.lock();
            loop {
                if let Some(job) = queue.pop_front() {
                    inner.queue_depth.fetch_sub(1, Ordering::Release);
                    inner.active_jobs.fetch_add(1, Ordering::Release);
                    break job;
                }
                if inner.shutdown.load(Ordering::Acquire) {
                    return;
                }
                inner.work_ready.wait(&mut queue);
            }
        };

        let _guard = ActiveJobGuard { inner };
        if let Err(e) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(job)) {
            let message = e
                .downcast_ref::<&str>()
                .copied()
                .or_else(|| e.downcast_ref::<String>().map(String::as_str))
                .unwrap_or("(non-string panic)");
            error!(target: "tempora::pool", panic = message, "write job panicked");
        }
    }
}
