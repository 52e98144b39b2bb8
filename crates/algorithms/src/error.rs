//! Per-region and run-level failures

use canopy_parallel::ParallelError;
use std::time::Duration;
use thiserror::Error;

/// Why a single region produced no metrics record.
///
/// These never abort a batch; the runner reports them next to the
/// successful records.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AggregationError {
    #[error("region would touch {pixels} cells, above the ceiling of {ceiling}")]
    ComputeLimitExceeded { pixels: u64, ceiling: u64 },

    #[error("aggregation exceeded its time budget of {0:?}")]
    Timeout(Duration),

    #[error("aggregation cancelled")]
    Cancelled,

    /// Canopy area above total area: CRS mismatch or broken inputs
    #[error("canopy area {canopy_m2} m² exceeds total area {total_m2} m²")]
    InvariantViolation { total_m2: f64, canopy_m2: f64 },

    #[error("{0}")]
    Core(String),
}

impl From<canopy_core::Error> for AggregationError {
    fn from(e: canopy_core::Error) -> Self {
        AggregationError::Core(e.to_string())
    }
}

impl AggregationError {
    /// Short machine-friendly label
    pub fn kind(&self) -> &'static str {
        match self {
            AggregationError::ComputeLimitExceeded { .. } => "compute_limit_exceeded",
            AggregationError::Timeout(_) => "timeout",
            AggregationError::Cancelled => "cancelled",
            AggregationError::InvariantViolation { .. } => "invariant_violation",
            AggregationError::Core(_) => "error",
        }
    }
}

/// Fatal failures that abort a run before any region is aggregated
#[derive(Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    Core(#[from] canopy_core::Error),

    #[error(transparent)]
    Parallel(#[from] ParallelError),
}

pub type RunResult<T> = std::result::Result<T, RunError>;
