//! Per-feature standardisation (zero mean, unit variance)

use crate::error::SegmentError;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

/// Fitted standardisation parameters.
///
/// Scales use the population standard deviation; a constant feature gets a
/// scale of 1 so it maps to all zeros instead of dividing by zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardizerParams {
    mean: Array1<f64>,
    scale: Array1<f64>,
}

impl StandardizerParams {
    /// Fit on an `(n_entities, n_features)` matrix
    pub fn fit(features: ArrayView2<f64>) -> crate::Result<Self> {
        if features.nrows() == 0 {
            return Err(SegmentError::data("cannot fit a standardizer on zero entities"));
        }

        let mean = features
            .mean_axis(Axis(0))
            .ok_or_else(|| SegmentError::data("empty feature matrix"))?;
        let scale = features
            .std_axis(Axis(0), 0.0)
            .mapv(|s| if s.is_finite() && s > 0.0 { s } else { 1.0 });

        Ok(Self { mean, scale })
    }

    pub fn mean(&self) -> &Array1<f64> {
        &self.mean
    }

    pub fn scale(&self) -> &Array1<f64> {
        &self.scale
    }

    pub fn n_features(&self) -> usize {
        self.mean.len()
    }

    /// Apply `(x - mean) / scale` row by row using the fitted parameters
    pub fn transform(&self, features: ArrayView2<f64>) -> crate::Result<Array2<f64>> {
        if features.ncols() != self.n_features() {
            return Err(SegmentError::data(format!(
                "expected {} features, got {}",
                self.n_features(),
                features.ncols()
            )));
        }
        Ok((&features - &self.mean) / &self.scale)
    }

    /// Standardise a single feature row
    pub fn transform_row(&self, row: ArrayView1<f64>) -> crate::Result<Array1<f64>> {
        if row.len() != self.n_features() {
            return Err(SegmentError::data(format!(
                "Feature vector must have exactly {} dimensions",
                self.n_features()
            )));
        }
        Ok((&row - &self.mean) / &self.scale)
    }
}
