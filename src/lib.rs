//! In-process analytics engines for high-volume activity streams.
//!
//! Two independent cores share this crate:
//!
//! - [`EventStreamProcessor`]: a bounded lock-free queue feeding a consumer
//!   thread that maintains per-channel frequency and hourly unique-user
//!   estimates, and batches events out to a durable-sink callback on a
//!   worker pool.
//! - [`Leaderboard`]: an ordered in-memory ranking with exponential
//!   time-decay scoring and crash-recoverable JSON snapshots.
//!
//! Both are single-process, shared-memory engines; durability and transport
//! belong to the host.

pub mod config;
pub mod error;
pub mod hash;
pub mod leaderboard;
pub mod pool;
pub mod processor;
pub mod queue;
pub mod sketch;

mod clock;

pub use config::{LeaderboardConfig, ProcessorConfig};
pub use error::{Error, Result};
pub use leaderboard::{Leaderboard, RankEntry, SkipList, TimeDecay};
pub use pool::WorkerPool;
pub use processor::{Event, EventStreamProcessor, FlushCallback};
pub use queue::BoundedQueue;
pub use sketch::{CountMinSketch, HyperLogLog};

#[cfg(test)]
use mimalloc::MiMalloc;

#[cfg(test)]
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;
