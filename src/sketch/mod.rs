//! Probabilistic sketches
//!
//! Constant-memory summaries of high-volume streams: a Count-Min sketch for
//! per-key frequency and a HyperLogLog for distinct counts. Both hash with
//! the shared salted 64-bit hash. Neither synchronizes internally; callers
//! hold their own lock.

pub mod count_min;
pub mod hyperloglog;

pub use count_min::CountMinSketch;
pub use hyperloglog::HyperLogLog;
