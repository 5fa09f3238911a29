//! Error taxonomy shared by every stage of the survey processing.
//!
//! Structural problems (missing columns, bad index ranges, too little data) are reported as
//! [`FloeError`] values and abort the affected track or series. Per-sample numeric degeneracies are
//! not errors: a zero elapsed time yields [`crate::earth::Rate::Undefined`] and a non-positive reading
//! is flagged on the measurement it belongs to.

/// Errors raised by the drift, frame, calibration and record modules.
#[derive(Debug, thiserror::Error)]
pub enum FloeError {
    #[error("missing required column '{0}'")]
    MissingColumn(String),

    #[error("invalid schema: {0}")]
    InvalidSchema(String),

    #[error("invalid index range: start {start}, end {end} for {len} samples")]
    InvalidRange { start: usize, end: usize, len: usize },

    #[error("invalid reference point id '{0}' (expected 'zero' or 'unit')")]
    InvalidPointId(String),

    #[error("insufficient data: {0}")]
    InsufficientData(String),

    #[error("insufficient reference data: {0}")]
    InsufficientReferenceData(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),
}
