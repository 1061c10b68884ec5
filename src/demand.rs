//! Demand pattern classification (Syntetos & Boylan quadrant)
//!
//! Each entity is summarised by its Average Demand Interval (ADI) and the
//! squared coefficient of variation of its non-zero demand sizes (CV²), then
//! placed in one of four quadrants:
//!
//! | ADI < cut | CV² < cut | Pattern        |
//! |-----------|-----------|----------------|
//! | yes       | yes       | Smooth         |
//! | yes       | no        | Erratic        |
//! | no        | yes       | Intermittent   |
//! | no        | no        | Lumpy          |

use crate::config::ClassifierConfig;
use crate::data::{DemandSeries, EntityKey};
use crate::error::SegmentError;
use ndarray::{Array1, ArrayView1, Zip};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Interval and variability statistics for one entity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DemandStats {
    pub num_observations: usize,
    pub nonzero_observations: usize,
    pub total_demand: f64,
    pub nonzero_mean: f64,
    pub nonzero_std: f64,
    pub adi: f64,
    pub cv2: f64,
}

/// Compute ADI and CV² for a series
///
/// An entity that never sells gets `ADI = numObservations` (as if one demand
/// occurred) so the interval stays finite and at least 1. Its pattern is
/// fixed by [`classify_series`], not by this ADI.
pub fn compute_stats(series: &DemandSeries) -> crate::Result<DemandStats> {
    let num_observations = series.len();
    if num_observations == 0 {
        return Err(SegmentError::data(format!(
            "entity {} has zero observations",
            series.key()
        )));
    }

    let nonzero: Vec<f64> = series.quantities().filter(|&q| q > 0.0).collect();
    let nonzero_observations = nonzero.len();
    let total_demand: f64 = series.quantities().sum();

    let adi = num_observations as f64 / nonzero_observations.max(1) as f64;

    let nonzero_mean = if nonzero.is_empty() {
        0.0
    } else {
        nonzero.iter().sum::<f64>() / nonzero_observations as f64
    };
    let nonzero_std = sample_std(&nonzero, nonzero_mean);

    let cv = if nonzero_mean > 0.0 {
        nonzero_std / nonzero_mean
    } else {
        0.0
    };
    let cv2 = finite_or_zero(cv * cv);

    Ok(DemandStats {
        num_observations,
        nonzero_observations,
        total_demand,
        nonzero_mean,
        nonzero_std,
        adi,
        cv2,
    })
}

/// Sample standard deviation (n - 1 denominator); 0 with fewer than two values
pub(crate) fn sample_std(values: &[f64], mean: f64) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let ss: f64 = values.iter().map(|v| (v - mean).powi(2)).sum();
    finite_or_zero((ss / (values.len() - 1) as f64).sqrt())
}

pub(crate) fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

/// Demand pattern category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PatternLabel {
    Smooth,
    Intermittent,
    Erratic,
    Lumpy,
}

impl PatternLabel {
    pub const ALL: [PatternLabel; 4] = [
        PatternLabel::Smooth,
        PatternLabel::Intermittent,
        PatternLabel::Erratic,
        PatternLabel::Lumpy,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PatternLabel::Smooth => "Smooth",
            PatternLabel::Intermittent => "Intermittent",
            PatternLabel::Erratic => "Erratic",
            PatternLabel::Lumpy => "Lumpy",
        }
    }
}

impl fmt::Display for PatternLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Threshold classifier over (ADI, CV²).
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PatternClassifier {
    config: ClassifierConfig,
}

impl PatternClassifier {
    pub fn new(config: ClassifierConfig) -> crate::Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    /// Classify one entity. Comparisons are strict: a value equal to its
    /// threshold counts as "not below".
    pub fn classify(&self, adi: f64, cv2: f64) -> PatternLabel {
        let frequent = adi < self.config.adi_threshold;
        let stable = cv2 < self.config.cv2_threshold;
        match (frequent, stable) {
            (true, true) => PatternLabel::Smooth,
            (true, false) => PatternLabel::Erratic,
            (false, true) => PatternLabel::Intermittent,
            (false, false) => PatternLabel::Lumpy,
        }
    }

    /// Classify whole columns of ADI and CV² at once
    pub fn classify_batch(
        &self,
        adi: ArrayView1<f64>,
        cv2: ArrayView1<f64>,
    ) -> crate::Result<Array1<PatternLabel>> {
        if adi.len() != cv2.len() {
            return Err(SegmentError::data(format!(
                "ADI and CV2 columns differ in length ({} vs {})",
                adi.len(),
                cv2.len()
            )));
        }
        Ok(Zip::from(adi)
            .and(cv2)
            .map_collect(|&a, &c| self.classify(a, c)))
    }
}

/// Classify with the default thresholds (ADI 1.32, CV² 0.49)
pub fn classify(adi: f64, cv2: f64) -> PatternLabel {
    PatternClassifier::default().classify(adi, cv2)
}

/// One row of the classification table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifiedEntity {
    pub item_id: String,
    pub store_id: String,
    #[serde(rename = "ADI")]
    pub adi: f64,
    #[serde(rename = "CV2")]
    pub cv2: f64,
    pub demand_pattern: PatternLabel,
    #[serde(skip)]
    pub stats: DemandStats,
}

impl ClassifiedEntity {
    pub fn key(&self) -> EntityKey {
        EntityKey::new(self.item_id.clone(), self.store_id.clone())
    }
}

/// One row of the pattern summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternSummary {
    pub pattern: PatternLabel,
    pub count: usize,
    pub percentage: f64,
}

/// Compute statistics and patterns for every entity
///
/// # Arguments
/// * `series` - Demand series, one per entity
/// * `classifier` - Threshold classifier
///
/// # Returns
/// * One row per entity in input order; fails on the first empty series
pub fn classify_series(
    series: &[DemandSeries],
    classifier: &PatternClassifier,
) -> crate::Result<Vec<ClassifiedEntity>> {
    let stats = series
        .par_iter()
        .map(compute_stats)
        .collect::<crate::Result<Vec<_>>>()?;

    let adi: Array1<f64> = stats.iter().map(|s| s.adi).collect();
    let cv2: Array1<f64> = stats.iter().map(|s| s.cv2).collect();
    let patterns = classifier.classify_batch(adi.view(), cv2.view())?;

    let rows: Vec<ClassifiedEntity> = series
        .iter()
        .zip(stats)
        .zip(patterns.iter().copied())
        .map(|((s, stats), pattern)| ClassifiedEntity {
            item_id: s.key().item_id.clone(),
            store_id: s.key().store_id.clone(),
            adi: stats.adi,
            cv2: stats.cv2,
            demand_pattern: settle_pattern(&stats, pattern),
            stats,
        })
        .collect();

    tracing::info!(entities = rows.len(), "Classified demand patterns");
    Ok(rows)
}

/// An entity with no demand at all has an unbounded interval between
/// demands, so it never counts as frequent whatever its finite ADI says.
fn settle_pattern(stats: &DemandStats, pattern: PatternLabel) -> PatternLabel {
    if stats.nonzero_observations > 0 {
        return pattern;
    }
    match pattern {
        PatternLabel::Smooth => PatternLabel::Intermittent,
        PatternLabel::Erratic => PatternLabel::Lumpy,
        other => other,
    }
}

/// Count entities per pattern
///
/// Rows are ordered by descending count; only patterns that occur are listed.
/// Percentages are fractions summing to 1.0.
pub fn pattern_summary(rows: &[ClassifiedEntity]) -> Vec<PatternSummary> {
    let total = rows.len();
    let mut summary: Vec<PatternSummary> = PatternLabel::ALL
        .iter()
        .map(|&pattern| {
            let count = rows.iter().filter(|r| r.demand_pattern == pattern).count();
            PatternSummary {
                pattern,
                count,
                percentage: if total == 0 {
                    0.0
                } else {
                    count as f64 / total as f64
                },
            }
        })
        .filter(|s| s.count > 0)
        .collect();

    // Stable sort keeps the fixed category order among ties
    summary.sort_by(|a, b| b.count.cmp(&a.count));
    summary
}
