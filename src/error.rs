//! Error taxonomy for the filtering core.
//!
//! Every failure is raised at the point of violation and propagated to the
//! caller unchanged. Outer surfaces (CLI, config files) wrap these in
//! `anyhow` with context.

use std::error::Error;
use std::fmt::{Display, Formatter};

/// Errors raised by kernels, models, the filtering loop and recovery.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterError {
    /// Invalid control or model parameters.
    Configuration(String),

    /// `step()` was called with no unconsumed observation left.
    MissingInput {
        /// Position the filter tried to read.
        position: usize,
    },

    /// `predict()` was called on a model that was never calibrated.
    NotCalibrated(&'static str),

    /// A kernel step received a row that is not a single scalar.
    InputShape {
        /// Number of values a step accepts.
        expected: usize,
        /// Number of values received.
        got: usize,
    },

    /// A non-finite observation arrived with no forecast to stand in for it.
    InvalidNumericValue(String),

    /// Forecast horizon beyond what the kernel supports.
    InvalidHorizon {
        /// Horizon asked for.
        requested: usize,
        /// Largest horizon the kernel can produce.
        max: usize,
    },

    /// Backward and forward recovery segments differ in length.
    ///
    /// Signals a bug in the recovery window arithmetic.
    SegmentMismatch {
        /// Rows produced by the backward pass.
        backward: usize,
        /// Rows produced by the forward pass.
        forward: usize,
    },

    /// A recovery pass ran without an active out-of-control window.
    UndefinedRecoveryWindow,
}

impl Display for FilterError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            FilterError::Configuration(msg) => write!(f, "Invalid configuration: {}", msg),
            FilterError::MissingInput { position } => {
                write!(f, "No input available at position {}", position)
            }
            FilterError::NotCalibrated(model) => write!(
                f,
                "The {} model has not been calibrated yet; calibrate it on a validated series first",
                model
            ),
            FilterError::InputShape { expected, got } => write!(
                f,
                "Prediction step requires {} value(s) per row, got {}",
                expected, got
            ),
            FilterError::InvalidNumericValue(msg) => write!(f, "Invalid numeric value: {}", msg),
            FilterError::InvalidHorizon { requested, max } => write!(
                f,
                "Kernel can only predict up to horizon {}, asked for {}",
                max, requested
            ),
            FilterError::SegmentMismatch { backward, forward } => write!(
                f,
                "Backward and forward recovery segments differ in size: {} vs {}",
                backward, forward
            ),
            FilterError::UndefinedRecoveryWindow => {
                write!(f, "The out-of-control window is not defined")
            }
        }
    }
}

impl Error for FilterError {}

/// Result alias for the filtering core.
pub type Result<T> = std::result::Result<T, FilterError>;
