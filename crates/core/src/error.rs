//! Error taxonomy for the colony.
//!
//! Invalid configuration fails loudly at the setter/constructor boundary
//! ([`Error::InvertedBounds`] and friends). A contract violation by the
//! external evaluator is surfaced on the next call into the colony
//! ([`Error::ChunkSizeMismatch`]). NaN and +/-inf values are not errors:
//! the state machine tolerates them (NaN sorts last, inf is simply a
//! bad-but-legal objective value) since there is no way to distinguish
//! "the objective is genuinely NaN" from "the evaluator forgot this slot"
//! by value alone.

use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum Error {
    #[error("bounds inverted at dimension {index}: lower ({lower}) must be < upper ({upper})")]
    InvertedBounds { index: usize, lower: f64, upper: f64 },

    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("grow_factor must be > 1.0, got {0}")]
    InvalidGrowFactor(f64),

    #[error("shrink_factor must be in (0.0, 1.0), got {0}")]
    InvalidShrinkFactor(f64),

    #[error("max_evaluations ({max_evaluations}) must exceed dim+1 ({min_required})")]
    MaxEvaluationsTooLow { max_evaluations: u64, min_required: u64 },

    #[error("reproduction_percent must be within [0.0, 1.0], got {0}")]
    InvalidReproductionPercent(f64),

    #[error("population must be at least 1, got {0}")]
    InvalidPopulation(usize),

    #[error("evaluation_chunk_size must be at least 1, got {0}")]
    InvalidChunkSize(usize),

    #[error("min_relative_size must be >= 0.0, got {0}")]
    InvalidMinRelativeSize(f64),

    #[error("evaluator returned {returned} values for a chunk of {expected}")]
    ChunkSizeMismatch { expected: usize, returned: usize },
}

pub type Result<T> = std::result::Result<T, Error>;
