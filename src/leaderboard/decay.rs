//! Exponential time-decay scoring

use crate::error::{Error, Result};

const SECONDS_PER_DAY: f64 = 86_400.0;

/// Per-day multiplicative score retention. A factor of 0.95 keeps 95% of a
/// score per elapsed day; 1.0 disables decay entirely.
#[derive(Debug, Clone, Copy)]
pub struct TimeDecay {
    factor: f64,
}

impl TimeDecay {
    pub fn new(factor: f64) -> Result<Self> {
        if !(factor > 0.0 && factor <= 1.0) {
            return Err(Error::InvalidDecayFactor(factor));
        }
        Ok(Self { factor })
    }

    #[inline]
    pub fn factor(&self) -> f64 {
        self.factor
    }

    /// Decay `score` over the fractional days between `last_update` and
    /// `now`. Returns `score` unchanged when time has not advanced.
    pub fn apply(&self, score: f64, last_update: i64, now: i64) -> f64 {
        if now <= last_update {
            return score;
        }
        let days = (now - last_update) as f64 / SECONDS_PER_DAY;
        score * self.factor.powf(days)
    }
}
