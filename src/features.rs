//! Feature engineering for inventory segmentation
//!
//! Six signals are derived per entity: revenue contribution, demand
//! variability, seasonality strength, trend slope, stockout frequency and
//! supplier reliability. Every ratio that is undefined for an entity (zero
//! mean, fewer than two samples) is reported as `0.0`, and the final values
//! are swept once more for NaN or infinity.
//!
//! `trend_slope` is batch-relative: raw slopes are divided by the largest
//! absolute slope in the batch. The same entity engineered inside a
//! different batch will generally get a different value.

use crate::config::FeatureConfig;
use crate::data::{DemandSeries, EntityKey};
use crate::demand::{finite_or_zero, sample_std};
use crate::error::SegmentError;
use chrono::Datelike;
use ndarray::Array2;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

pub const NUM_FEATURES: usize = 6;

pub const FEATURE_NAMES: [&str; NUM_FEATURES] = [
    "revenue_contribution",
    "demand_cv",
    "seasonality_strength",
    "trend_slope",
    "stockout_frequency",
    "supplier_reliability",
];

/// Column index of each feature in a [`FeatureMatrix`] array.
pub mod column {
    pub const REVENUE_CONTRIBUTION: usize = 0;
    pub const DEMAND_CV: usize = 1;
    pub const SEASONALITY_STRENGTH: usize = 2;
    pub const TREND_SLOPE: usize = 3;
    pub const STOCKOUT_FREQUENCY: usize = 4;
    pub const SUPPLIER_RELIABILITY: usize = 5;
}

/// Engineered signals for one entity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub revenue_contribution: f64,
    pub demand_cv: f64,
    pub seasonality_strength: f64,
    pub trend_slope: f64,
    pub stockout_frequency: f64,
    pub supplier_reliability: f64,
}

impl FeatureVector {
    pub fn to_array(&self) -> [f64; NUM_FEATURES] {
        [
            self.revenue_contribution,
            self.demand_cv,
            self.seasonality_strength,
            self.trend_slope,
            self.stockout_frequency,
            self.supplier_reliability,
        ]
    }

    pub fn from_array(values: [f64; NUM_FEATURES]) -> Self {
        Self {
            revenue_contribution: values[column::REVENUE_CONTRIBUTION],
            demand_cv: values[column::DEMAND_CV],
            seasonality_strength: values[column::SEASONALITY_STRENGTH],
            trend_slope: values[column::TREND_SLOPE],
            stockout_frequency: values[column::STOCKOUT_FREQUENCY],
            supplier_reliability: values[column::SUPPLIER_RELIABILITY],
        }
    }

    pub fn is_finite(&self) -> bool {
        self.to_array().iter().all(|v| v.is_finite())
    }

    fn sanitized(self) -> Self {
        Self::from_array(self.to_array().map(finite_or_zero))
    }
}

/// Feature vectors for a batch of entities, row-aligned with their keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureMatrix {
    keys: Vec<EntityKey>,
    vectors: Vec<FeatureVector>,
}

impl FeatureMatrix {
    pub fn new(keys: Vec<EntityKey>, vectors: Vec<FeatureVector>) -> crate::Result<Self> {
        if keys.len() != vectors.len() {
            return Err(SegmentError::data(format!(
                "{} entity keys for {} feature vectors",
                keys.len(),
                vectors.len()
            )));
        }
        if let Some((key, _)) = keys.iter().zip(&vectors).find(|(_, v)| !v.is_finite()) {
            return Err(SegmentError::data(format!(
                "entity {} has a non-finite feature value",
                key
            )));
        }
        Ok(Self { keys, vectors })
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    pub fn keys(&self) -> &[EntityKey] {
        &self.keys
    }

    pub fn vectors(&self) -> &[FeatureVector] {
        &self.vectors
    }

    pub fn iter(&self) -> impl Iterator<Item = (&EntityKey, &FeatureVector)> {
        self.keys.iter().zip(&self.vectors)
    }

    /// Dense `(n_entities, 6)` array in [`FEATURE_NAMES`] column order
    pub fn to_array2(&self) -> Array2<f64> {
        let rows: Vec<[f64; NUM_FEATURES]> = self.vectors.iter().map(|v| v.to_array()).collect();
        Array2::from_shape_fn((rows.len(), NUM_FEATURES), |(i, j)| rows[i][j])
    }
}

/// Where supplier reliability comes from.
///
/// The core has no source for this signal of its own; the caller must either
/// supply it or explicitly leave it out.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum ReliabilityInput {
    /// Read the per-entity value carried by each [`DemandSeries`]
    #[default]
    FromSeries,
    /// Look the value up by entity
    Provided(HashMap<EntityKey, f64>),
    /// Leave the feature out: every entity gets 0, which standardises to a
    /// constant column and has no influence on distances
    Omitted,
}

/// Derives [`FeatureVector`]s from demand series.
#[derive(Debug, Clone, Default)]
pub struct FeatureEngineer {
    config: FeatureConfig,
    reliability: ReliabilityInput,
}

impl FeatureEngineer {
    pub fn new(config: FeatureConfig, reliability: ReliabilityInput) -> crate::Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            reliability,
        })
    }

    /// Engineer features for a whole batch
    ///
    /// # Arguments
    /// * `series` - One demand series per entity; none may be empty
    ///
    /// # Returns
    /// * Feature matrix aligned with the input order
    pub fn engineer(&self, series: &[DemandSeries]) -> crate::Result<FeatureMatrix> {
        if matches!(self.reliability, ReliabilityInput::Omitted) {
            tracing::warn!("Supplier reliability omitted; feature set to 0 for all entities");
        }

        let mut vectors = series
            .par_iter()
            .map(|s| self.entity_features(s))
            .collect::<crate::Result<Vec<_>>>()?;

        normalise_slopes(&mut vectors, self.config.slope_epsilon);

        let vectors: Vec<FeatureVector> = vectors.into_iter().map(FeatureVector::sanitized).collect();
        let keys = series.iter().map(|s| s.key().clone()).collect();

        tracing::info!(
            entities = vectors.len(),
            features = ?FEATURE_NAMES,
            "Prepared clustering features"
        );
        FeatureMatrix::new(keys, vectors)
    }

    /// Features of one entity with an un-normalised trend slope
    fn entity_features(&self, series: &DemandSeries) -> crate::Result<FeatureVector> {
        if series.is_empty() {
            return Err(SegmentError::data(format!(
                "entity {} has zero observations",
                series.key()
            )));
        }

        let sales: Vec<f64> = series.quantities().collect();
        let mean = sales.iter().sum::<f64>() / sales.len() as f64;

        let demand_cv = if mean > 0.0 {
            sample_std(&sales, mean) / mean
        } else {
            0.0
        };

        let trend_slope = if sales.len() < self.config.min_observations_for_trend {
            0.0
        } else {
            ols_slope(&sales)
        };

        let zeros = sales.iter().filter(|&&q| q == 0.0).count();

        Ok(FeatureVector {
            revenue_contribution: series.total_revenue().unwrap_or(0.0),
            demand_cv,
            seasonality_strength: seasonality_strength(series, mean),
            trend_slope,
            stockout_frequency: zeros as f64 / sales.len() as f64,
            supplier_reliability: self.reliability_for(series)?,
        })
    }

    fn reliability_for(&self, series: &DemandSeries) -> crate::Result<f64> {
        let value = match &self.reliability {
            ReliabilityInput::Omitted => return Ok(0.0),
            ReliabilityInput::FromSeries => series.supplier_reliability(),
            ReliabilityInput::Provided(values) => values.get(series.key()).copied(),
        };
        let value = value.ok_or_else(|| {
            SegmentError::data(format!(
                "no supplier reliability supplied for entity {}",
                series.key()
            ))
        })?;

        if !(0.0..=1.0).contains(&value) {
            return Err(SegmentError::data(format!(
                "supplier reliability {} for entity {} is outside [0, 1]",
                value,
                series.key()
            )));
        }
        Ok(value)
    }
}

/// Standard deviation of per-calendar-month mean demand over overall mean, clipped to [0, 1]
fn seasonality_strength(series: &DemandSeries, overall_mean: f64) -> f64 {
    if overall_mean <= 0.0 {
        return 0.0;
    }

    let mut by_month: BTreeMap<u32, (f64, usize)> = BTreeMap::new();
    for obs in series.observations() {
        let entry = by_month.entry(obs.date.month()).or_insert((0.0, 0));
        entry.0 += obs.quantity;
        entry.1 += 1;
    }

    let month_means: Vec<f64> = by_month.values().map(|(sum, n)| sum / *n as f64).collect();
    let mean_of_means = month_means.iter().sum::<f64>() / month_means.len() as f64;

    finite_or_zero(sample_std(&month_means, mean_of_means) / overall_mean).clamp(0.0, 1.0)
}

/// Least-squares slope of `values` against the index 0, 1, ..., n - 1
fn ols_slope(values: &[f64]) -> f64 {
    let n = values.len() as f64;
    let x_mean = (n - 1.0) / 2.0;
    let y_mean = values.iter().sum::<f64>() / n;

    let (sxy, sxx) = values
        .iter()
        .enumerate()
        .fold((0.0, 0.0), |(sxy, sxx), (i, &y)| {
            let dx = i as f64 - x_mean;
            (sxy + dx * (y - y_mean), sxx + dx * dx)
        });

    if sxx > 0.0 {
        finite_or_zero(sxy / sxx)
    } else {
        0.0
    }
}

/// Divide every slope by the batch maximum absolute slope plus `epsilon`
fn normalise_slopes(vectors: &mut [FeatureVector], epsilon: f64) {
    let max_abs = vectors
        .iter()
        .map(|v| finite_or_zero(v.trend_slope).abs())
        .fold(0.0, f64::max);

    for v in vectors.iter_mut() {
        v.trend_slope /= max_abs + epsilon;
    }
}
