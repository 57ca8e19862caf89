use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("sketch width must be a non-zero power of two, got {0}")]
    InvalidSketchWidth(usize),

    #[error("sketch depth must be greater than zero")]
    InvalidSketchDepth,

    #[error("hyperloglog precision must be between 4 and 18, got {0}")]
    InvalidPrecision(u8),

    #[error("cannot merge hyperloglog sketches with precision {0} and {1}")]
    PrecisionMismatch(u8, u8),

    #[error("decay factor must be in (0, 1], got {0}")]
    InvalidDecayFactor(f64),

    #[error("skip list max level must be between 1 and 32, got {0}")]
    InvalidMaxLevel(usize),

    #[error("skip list promotion probability must be in (0, 1), got {0}")]
    InvalidProbability(f64),

    #[error("{0} must be greater than zero")]
    InvalidConfigValue(&'static str),

    #[error("worker pool is shut down")]
    PoolShutDown,

    #[error("snapshot encode error: {0}")]
    SnapshotEncode(String),

    #[error("snapshot parse error: {0}")]
    SnapshotParse(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
