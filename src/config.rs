//! Engine configuration

use crate::error::{Error, Result};

/// Configuration for the event stream processor.
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// Ingestion queue capacity; rounded up to a power of two (default: 1024)
    pub buffer_size: usize,
    /// Worker pool size; 0 means one worker per hardware thread (default: 0)
    pub num_threads: usize,
    /// Number of events that triggers a batch hand-off (default: 100)
    pub batch_size: usize,
    /// Idle time after which a partial batch is flushed anyway (default: 1000)
    pub flush_interval_ms: u64,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            buffer_size: 1024,
            num_threads: 0,
            batch_size: 100,
            flush_interval_ms: 1000,
        }
    }
}

impl ProcessorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.buffer_size == 0 {
            return Err(Error::InvalidConfigValue("buffer_size"));
        }
        if self.batch_size == 0 {
            return Err(Error::InvalidConfigValue("batch_size"));
        }
        if self.flush_interval_ms == 0 {
            return Err(Error::InvalidConfigValue("flush_interval_ms"));
        }
        Ok(())
    }
}

/// Configuration for the leaderboard engine.
#[derive(Debug, Clone)]
pub struct LeaderboardConfig {
    /// Per-day multiplicative score retention, in (0, 1]; 1 disables decay
    /// (default: 0.95)
    pub decay_factor: f64,
    /// Maximum resident users; 0 means unbounded (default: 100_000)
    pub max_users: usize,
}

impl Default for LeaderboardConfig {
    fn default() -> Self {
        Self {
            decay_factor: 0.95,
            max_users: 100_000,
        }
    }
}

impl LeaderboardConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.decay_factor > 0.0 && self.decay_factor <= 1.0) {
            return Err(Error::InvalidDecayFactor(self.decay_factor));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_processor_defaults_valid() {
        assert!(ProcessorConfig::default().validate().is_ok());
    }

    #[test]
    fn test_processor_rejects_zero_fields() {
        for field in 0..3 {
            let mut config = ProcessorConfig::default();
            match field {
                0 => config.buffer_size = 0,
                1 => config.batch_size = 0,
                _ => config.flush_interval_ms = 0,
            }
            assert!(matches!(
                config.validate(),
                Err(Error::InvalidConfigValue(_))
            ));
        }
    }

    #[test]
    fn test_leaderboard_decay_bounds() {
        assert!(LeaderboardConfig::default().validate().is_ok());

        let disabled = LeaderboardConfig {
            decay_factor: 1.0,
            ..Default::default()
        };
        assert!(disabled.validate().is_ok());

        for bad in [0.0, -0.5, 1.5, f64::NAN] {
            let config = LeaderboardConfig {
                decay_factor: bad,
                ..Default::default()
            };
            assert!(matches!(
                config.validate(),
                Err(Error::InvalidDecayFactor(_))
            ));
        }
    }
}
