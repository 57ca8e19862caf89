//! Event stream processor
//!
//! Decouples a high-volume event source from a durable sink: producers push
//! into a bounded lock-free queue and a single consumer thread drains it,
//! folds each event into the running stats (exact per-channel counts, a
//! Count-Min frequency sketch, and a ring of per-minute HyperLogLog windows
//! spanning the last hour), and batches events for the sink callback. Full
//! batches are handed to a worker pool so a slow sink never stalls ingestion.
//!
//! Loss is possible only at the queue boundary (full queue, counted in
//! `events_dropped`); everything the consumer drains reaches the sink exactly
//! once, though batches may arrive out of order across workers.

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use ahash::AHashMap;
use itertools::Itertools;
use parking_lot::{Condvar, Mutex};

use crate::clock::unix_time_seconds;
use crate::config::ProcessorConfig;
use crate::error::Result;
use crate::pool::WorkerPool;
use crate::queue::BoundedQueue;
use crate::sketch::{CountMinSketch, HyperLogLog};

const WINDOW_SPAN_SECONDS: i64 = 3600;
const BUCKET_SPAN_SECONDS: i64 = 60;

/// Upper bound on how long the consumer sleeps while idle.
const IDLE_WAIT: Duration = Duration::from_millis(5);

/// One record from the activity bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub event_type: String,
    pub user_id: String,
    pub channel_id: String,
    /// Seconds since epoch; zero or below means "stamp at processing time"
    pub timestamp: i64,
}

/// Durable-sink callback; runs on worker threads with no internal lock held.
/// Must not call back into `flush_now`.
pub type FlushCallback = Arc<dyn Fn(Vec<Event>) + Send + Sync>;

/// Per-minute cardinality window.
struct MinuteWindow {
    bucket_start: i64,
    sketch: HyperLogLog,
}

/// Stats guarded by one mutex so each event's counters, sketch, and window
/// update are atomic with respect to readers.
struct Stats {
    channel_frequency: CountMinSketch,
    channel_counts: AHashMap<String, u64>,
    /// Ascending by `bucket_start`; entries older than an hour are evicted
    /// on access
    windows: VecDeque<MinuteWindow>,
}

struct Shared {
    queue: BoundedQueue<Event>,
    pool: WorkerPool,
    batch_size: usize,
    flush_interval: Duration,

    running: AtomicBool,
    flush_requested: AtomicBool,
    drained: AtomicBool,

    total_processed: AtomicU64,
    events_dropped: AtomicU64,
    pending_flush_tasks: AtomicUsize,

    stats: Mutex<Stats>,
    pending_batch: Mutex<Vec<Event>>,
    callback: Mutex<Option<FlushCallback>>,

    data_mutex: Mutex<()>,
    data_cv: Condvar,
    flush_mutex: Mutex<()>,
    flush_cv: Condvar,
    pending_mutex: Mutex<()>,
    pending_cv: Condvar,
    drain_mutex: Mutex<()>,
    drain_cv: Condvar,
}

pub struct EventStreamProcessor {
    shared: Arc<Shared>,
    consumer: Option<JoinHandle<()>>,
}

impl EventStreamProcessor {
    /// Validate the configuration and spawn the consumer thread.
    pub fn new(config: ProcessorConfig) -> Result<Self> {
        config.validate()?;

        let shared = Arc::new(Shared {
            queue: BoundedQueue::with_capacity(config.buffer_size),
            pool: WorkerPool::new(config.num_threads),
            batch_size: config.batch_size,
            flush_interval: Duration::from_millis(config.flush_interval_ms),
            running: AtomicBool::new(true),
            flush_requested: AtomicBool::new(false),
            drained: AtomicBool::new(true),
            total_processed: AtomicU64::new(0),
            events_dropped: AtomicU64::new(0),
            pending_flush_tasks: AtomicUsize::new(0),
            stats: Mutex::new(Stats {
                channel_frequency: CountMinSketch::default(),
                channel_counts: AHashMap::new(),
                windows: VecDeque::new(),
            }),
            pending_batch: Mutex::new(Vec::with_capacity(config.batch_size * 2)),
            callback: Mutex::new(None),
            data_mutex: Mutex::new(()),
            data_cv: Condvar::new(),
            flush_mutex: Mutex::new(()),
            flush_cv: Condvar::new(),
            pending_mutex: Mutex::new(()),
            pending_cv: Condvar::new(),
            drain_mutex: Mutex::new(()),
            drain_cv: Condvar::new(),
        });

        let consumer = {
            let shared = Arc::clone(&shared);
            std::thread::Builder::new()
                .name("event-consumer".into())
                .spawn(move || consume_loop(&shared))?
        };
        log::debug!(
            "event stream processor started: queue capacity {}, batch size {}",
            shared.queue.capacity(),
            shared.batch_size
        );

        Ok(Self {
            shared,
            consumer: Some(consumer),
        })
    }

    /// Enqueue one event. Never blocks; a full queue drops the event,
    /// returns false, and bumps `events_dropped`.
    pub fn push_event(
        &self,
        event_type: &str,
        user_id: &str,
        channel_id: &str,
        timestamp: i64,
    ) -> bool {
        let event = Event {
            event_type: event_type.to_string(),
            user_id: user_id.to_string(),
            channel_id: channel_id.to_string(),
            timestamp,
        };
        match self.shared.queue.push(event) {
            Ok(()) => {
                self.shared.drained.store(false, Ordering::Release);
                self.shared.data_cv.notify_one();
                true
            }
            Err(_) => {
                self.shared.events_dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Install the durable-sink callback. Batches that became ready while no
    /// callback was installed are still pending and flow on the next flush.
    pub fn set_flush_callback<F>(&self, callback: F)
    where
        F: Fn(Vec<Event>) + Send + Sync + 'static,
    {
        *self.shared.callback.lock() = Some(Arc::new(callback));
    }

    /// Remove the callback; subsequent batches accumulate in the pending
    /// buffer.
    pub fn clear_flush_callback(&self) {
        *self.shared.callback.lock() = None;
    }

    /// Estimated distinct `user_id` count over events stamped within the
    /// last hour, merging the per-minute windows.
    pub fn get_unique_users_last_hour(&self) -> u64 {
        let cutoff = unix_time_seconds() - WINDOW_SPAN_SECONDS;
        let mut stats = self.shared.stats.lock();
        while stats
            .windows
            .front()
            .is_some_and(|w| w.bucket_start < cutoff)
        {
            stats.windows.pop_front();
        }

        let mut aggregate = HyperLogLog::default();
        for window in &stats.windows {
            // windows all share the default precision
            let _ = aggregate.merge(&window.sketch);
        }
        aggregate.cardinality()
    }

    /// Up to `k` channels by exact event count, descending; ties break by
    /// channel id so the result is deterministic.
    pub fn get_top_channels(&self, k: usize) -> Vec<(String, u64)> {
        let stats = self.shared.stats.lock();
        stats
            .channel_counts
            .iter()
            .map(|(channel, &count)| (channel.clone(), count))
            .sorted_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)))
            .take(k)
            .collect()
    }

    /// Block until the queue is drained, the pending batch is handed off,
    /// and every in-flight sink task has completed.
    pub fn flush_now(&self) {
        self.shared.flush_requested.store(true, Ordering::Release);
        self.shared.data_cv.notify_all();

        {
            let mut guard = self.shared.flush_mutex.lock();
            while self.shared.flush_requested.load(Ordering::Acquire) {
                self.shared.flush_cv.wait(&mut guard);
            }
        }

        {
            let mut guard = self.shared.pending_mutex.lock();
            while self.shared.pending_flush_tasks.load(Ordering::Acquire) != 0 {
                self.shared.pending_cv.wait(&mut guard);
            }
        }

        self.shared.notify_idle_state();

        let mut guard = self.shared.drain_mutex.lock();
        while !self.shared.drained.load(Ordering::Acquire) {
            self.shared.drain_cv.wait(&mut guard);
        }
    }

    /// Events drained from the queue so far.
    pub fn total_events_processed(&self) -> u64 {
        self.shared.total_processed.load(Ordering::Relaxed)
    }

    /// Events rejected at the queue boundary so far.
    pub fn events_dropped(&self) -> u64 {
        self.shared.events_dropped.load(Ordering::Relaxed)
    }
}

impl Drop for EventStreamProcessor {
    fn drop(&mut self) {
        self.shared.running.store(false, Ordering::Release);
        self.shared.flush_requested.store(true, Ordering::Release);
        self.shared.data_cv.notify_all();
        if let Some(consumer) = self.consumer.take() {
            let _ = consumer.join();
        }
        self.shared.pool.shutdown();
        log::debug!(
            "event stream processor stopped: {} processed, {} dropped",
            self.total_events_processed(),
            self.events_dropped()
        );
    }
}

fn consume_loop(shared: &Arc<Shared>) {
    let mut last_flush = Instant::now();

    loop {
        if !shared.running.load(Ordering::Acquire) && shared.queue.is_empty() {
            break;
        }

        if let Some(mut event) = shared.queue.pop() {
            shared.process_event(&mut event);
            shared.total_processed.fetch_add(1, Ordering::Relaxed);

            let reached_batch = {
                let mut batch = shared.pending_batch.lock();
                batch.push(event);
                batch.len() >= shared.batch_size
            };
            if reached_batch {
                let batch = std::mem::take(&mut *shared.pending_batch.lock());
                shared.flush_batch(batch);
                last_flush = Instant::now();
                shared.notify_idle_state();
            }
            continue;
        }

        let interval_elapsed = {
            let batch = shared.pending_batch.lock();
            !batch.is_empty() && last_flush.elapsed() >= shared.flush_interval
        };

        if interval_elapsed || shared.flush_requested.load(Ordering::Acquire) {
            let batch = std::mem::take(&mut *shared.pending_batch.lock());
            if !batch.is_empty() {
                shared.flush_batch(batch);
            }
            last_flush = Instant::now();
            shared.flush_requested.store(false, Ordering::Release);
            {
                let _guard = shared.flush_mutex.lock();
                shared.flush_cv.notify_all();
            }
            shared.notify_idle_state();
            continue;
        }

        {
            let mut guard = shared.data_mutex.lock();
            if shared.running.load(Ordering::Acquire)
                && shared.queue.is_empty()
                && !shared.flush_requested.load(Ordering::Acquire)
            {
                let _ = shared.data_cv.wait_for(&mut guard, IDLE_WAIT);
            }
        }
        shared.notify_idle_state();
    }

    // shutdown: residual events still reach the sink
    let remaining = std::mem::take(&mut *shared.pending_batch.lock());
    if !remaining.is_empty() {
        shared.flush_batch(remaining);
    }
    shared.flush_requested.store(false, Ordering::Release);
    {
        let _guard = shared.flush_mutex.lock();
        shared.flush_cv.notify_all();
    }
    shared.notify_idle_state();
}

impl Shared {
    /// Fold one event into the stats. Runs on the consumer thread before the
    /// event enters the pending batch, so sketch updates happen-before sink
    /// delivery.
    fn process_event(&self, event: &mut Event) {
        if event.timestamp <= 0 {
            event.timestamp = unix_time_seconds();
        }
        let bucket = (event.timestamp / BUCKET_SPAN_SECONDS) * BUCKET_SPAN_SECONDS;
        let cutoff = bucket - WINDOW_SPAN_SECONDS;

        let mut stats = self.stats.lock();
        stats.channel_frequency.incr(event.channel_id.as_bytes());
        *stats
            .channel_counts
            .entry(event.channel_id.clone())
            .or_insert(0) += 1;

        while stats
            .windows
            .front()
            .is_some_and(|w| w.bucket_start < cutoff)
        {
            stats.windows.pop_front();
        }

        match stats
            .windows
            .iter_mut()
            .find(|w| w.bucket_start == bucket)
        {
            Some(window) => window.sketch.add(event.user_id.as_bytes()),
            None => {
                let mut sketch = HyperLogLog::default();
                sketch.add(event.user_id.as_bytes());
                let position = stats.windows.partition_point(|w| w.bucket_start < bucket);
                stats.windows.insert(
                    position,
                    MinuteWindow {
                        bucket_start: bucket,
                        sketch,
                    },
                );
            }
        }
    }

    /// Hand a batch to the sink via the worker pool. With no callback
    /// installed the batch returns to the pending buffer.
    fn flush_batch(self: &Arc<Self>, batch: Vec<Event>) {
        if batch.is_empty() {
            return;
        }

        let callback = self.callback.lock().clone();
        let Some(callback) = callback else {
            let mut batch = batch;
            let mut pending = self.pending_batch.lock();
            if pending.is_empty() {
                *pending = batch;
            } else {
                pending.append(&mut batch);
            }
            return;
        };

        if self.pool.is_shut_down() {
            // pool teardown happens only after this thread has joined, but a
            // rejected batch must still reach the sink
            deliver(&callback, batch);
            return;
        }

        self.pending_flush_tasks.fetch_add(1, Ordering::AcqRel);
        let guard = FlushTaskGuard {
            shared: Arc::clone(self),
        };
        let task = move || {
            let _guard = guard;
            deliver(&callback, batch);
        };
        if self.pool.execute(task).is_err() {
            // the dropped closure's guard has already balanced the counter
            log::error!("worker pool rejected a flush; batch dropped");
        }
    }

    fn notify_idle_state(&self) {
        if !self.queue.is_empty()
            || !self.pending_batch.lock().is_empty()
            || self.pending_flush_tasks.load(Ordering::Acquire) != 0
        {
            self.drained.store(false, Ordering::Release);
            return;
        }
        self.drained.store(true, Ordering::Release);
        let _guard = self.drain_mutex.lock();
        self.drain_cv.notify_all();
    }
}

/// Invoke the sink callback, catching panics: the batch counts as delivered
/// either way (retry and durability belong to the sink).
fn deliver(callback: &FlushCallback, batch: Vec<Event>) {
    let count = batch.len();
    if catch_unwind(AssertUnwindSafe(|| (**callback)(batch))).is_err() {
        log::warn!("flush callback panicked on a batch of {} events", count);
    }
}

/// Balances `pending_flush_tasks` when the task finishes, and equally when a
/// rejected task is dropped unrun.
struct FlushTaskGuard {
    shared: Arc<Shared>,
}

impl Drop for FlushTaskGuard {
    fn drop(&mut self) {
        self.shared
            .pending_flush_tasks
            .fetch_sub(1, Ordering::AcqRel);
        {
            let _guard = self.shared.pending_mutex.lock();
            self.shared.pending_cv.notify_all();
        }
        self.shared.notify_idle_state();
    }
}
