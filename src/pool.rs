//! Fixed-size worker pool
//!
//! Workers pull boxed tasks from a FIFO guarded by a mutex and condition
//! variable. Shutdown wakes everyone, lets queued tasks drain, and joins the
//! threads; a task that panics is caught and logged so the worker survives.

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::{Condvar, Mutex};

use crate::error::{Error, Result};

type Task = Box<dyn FnOnce() + Send + 'static>;

struct PoolShared {
    tasks: Mutex<VecDeque<Task>>,
    available: Condvar,
    stopping: AtomicBool,
}

pub struct WorkerPool {
    shared: Arc<PoolShared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Spawn `num_threads` workers; 0 means one per hardware thread.
    pub fn new(num_threads: usize) -> Self {
        let num_threads = if num_threads == 0 {
            std::thread::available_parallelism()
                .map(|p| p.get())
                .unwrap_or(1)
        } else {
            num_threads
        };

        let shared = Arc::new(PoolShared {
            tasks: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
            stopping: AtomicBool::new(false),
        });

        let workers = (0..num_threads)
            .map(|_| {
                let shared = Arc::clone(&shared);
                std::thread::spawn(move || worker_loop(&shared))
            })
            .collect();
        log::debug!("worker pool started with {} threads", num_threads);

        Self {
            shared,
            workers: Mutex::new(workers),
        }
    }

    /// Queue a task. Calling this after `shutdown` is a caller bug and is
    /// reported as `Error::PoolShutDown`.
    pub fn execute<F>(&self, task: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        if self.shared.stopping.load(Ordering::Acquire) {
            return Err(Error::PoolShutDown);
        }
        self.shared.tasks.lock().push_back(Box::new(task));
        self.shared.available.notify_one();
        Ok(())
    }

    /// True once `shutdown` has begun.
    pub fn is_shut_down(&self) -> bool {
        self.shared.stopping.load(Ordering::Acquire)
    }

    /// Stop accepting tasks, drain what is queued, and join all workers.
    /// Idempotent.
    pub fn shutdown(&self) {
        if self.shared.stopping.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shared.available.notify_all();
        let workers = std::mem::take(&mut *self.workers.lock());
        for handle in workers {
            let _ = handle.join();
        }
        log::debug!("worker pool shut down");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(shared: &PoolShared) {
    loop {
        let task = {
            let mut tasks = shared.tasks.lock();
            loop {
                if let Some(task) = tasks.pop_front() {
                    break task;
                }
                if shared.stopping.load(Ordering::Acquire) {
                    return;
                }
                shared.available.wait(&mut tasks);
            }
        };
        if catch_unwind(AssertUnwindSafe(task)).is_err() {
            log::warn!("worker task panicked; worker continues");
        }
    }
}
