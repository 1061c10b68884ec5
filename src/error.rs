//! Error taxonomy for the classification and segmentation core

use thiserror::Error;

/// Errors raised by the demand classification and segmentation pipeline.
///
/// Numeric edge cases (0/0 ratios, standard deviations over fewer than two
/// samples) are never reported here; they degrade to `0.0` inside the
/// component that encounters them.
#[derive(Error, Debug)]
pub enum SegmentError {
    /// Input data is missing a required column or violates the ingestion contract.
    #[error("Data error: {0}")]
    Data(String),

    /// A post-fit operation was invoked on a pipeline that has not been fitted.
    #[error("Model not fitted: call fit before {operation}")]
    NotFitted {
        /// Name of the operation that required a fitted model
        operation: &'static str,
    },

    /// The external data source could not be read.
    #[error("Data source unavailable at {location}: {reason}")]
    SourceUnavailable {
        /// Path or identifier of the source
        location: String,
        /// Underlying failure
        reason: String,
    },

    /// Configuration values are out of their valid domain.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// The clustering backend rejected the input.
    #[error("Clustering failed: {0}")]
    Clustering(String),

    /// Malformed columnar input.
    #[error(transparent)]
    Frame(#[from] polars::error::PolarsError),
}

impl SegmentError {
    pub(crate) fn data(msg: impl Into<String>) -> Self {
        SegmentError::Data(msg.into())
    }

    pub(crate) fn config(msg: impl Into<String>) -> Self {
        SegmentError::Config(msg.into())
    }
}
