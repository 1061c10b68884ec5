//! Pipeline configuration
//!
//! Every section has defaults matching the production settings, builder-style
//! setters, and a `validate` step. A whole [`PipelineConfig`] can be read from
//! a TOML file; missing keys fall back to the defaults.

use crate::error::SegmentError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Recommended range for the number of inventory segments.
pub const RECOMMENDED_CLUSTERS: std::ops::RangeInclusive<usize> = 8..=12;

/// Thresholds for the ADI / CV² demand pattern quadrant.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    pub adi_threshold: f64,
    pub cv2_threshold: f64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            adi_threshold: 1.32,
            cv2_threshold: 0.49,
        }
    }
}

impl ClassifierConfig {
    pub fn with_adi_threshold(mut self, adi_threshold: f64) -> Self {
        self.adi_threshold = adi_threshold;
        self
    }

    pub fn with_cv2_threshold(mut self, cv2_threshold: f64) -> Self {
        self.cv2_threshold = cv2_threshold;
        self
    }

    pub fn validate(&self) -> crate::Result<()> {
        if !(self.adi_threshold.is_finite() && self.adi_threshold > 0.0) {
            return Err(SegmentError::config(format!(
                "adi_threshold must be a positive finite number, got {}",
                self.adi_threshold
            )));
        }
        if !(self.cv2_threshold.is_finite() && self.cv2_threshold > 0.0) {
            return Err(SegmentError::config(format!(
                "cv2_threshold must be a positive finite number, got {}",
                self.cv2_threshold
            )));
        }
        Ok(())
    }
}

/// Feature engineering settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    /// Entities with fewer observations get a trend slope of exactly 0
    pub min_observations_for_trend: usize,
    /// Added to the batch maximum absolute slope before normalising
    pub slope_epsilon: f64,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            min_observations_for_trend: 10,
            slope_epsilon: 1e-10,
        }
    }
}

impl FeatureConfig {
    pub fn with_min_observations_for_trend(mut self, n: usize) -> Self {
        self.min_observations_for_trend = n;
        self
    }

    pub fn validate(&self) -> crate::Result<()> {
        // A regression needs two points to define a slope
        if self.min_observations_for_trend < 2 {
            return Err(SegmentError::config(
                "min_observations_for_trend must be at least 2",
            ));
        }
        if !(self.slope_epsilon.is_finite() && self.slope_epsilon > 0.0) {
            return Err(SegmentError::config("slope_epsilon must be positive"));
        }
        Ok(())
    }
}

/// K-Means segmentation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentationConfig {
    pub num_clusters: usize,
    pub random_seed: u64,
    /// Independent initialisations; the lowest-inertia run is kept
    pub n_runs: usize,
    pub max_iterations: u64,
    pub tolerance: f64,
    /// Compute the silhouette on the first N entities only
    pub silhouette_sample: Option<usize>,
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        Self {
            num_clusters: 8,
            random_seed: 42,
            n_runs: 10,
            max_iterations: 300,
            tolerance: 1e-4,
            silhouette_sample: None,
        }
    }
}

impl SegmentationConfig {
    pub fn with_num_clusters(mut self, num_clusters: usize) -> Self {
        self.num_clusters = num_clusters;
        self
    }

    pub fn with_random_seed(mut self, random_seed: u64) -> Self {
        self.random_seed = random_seed;
        self
    }

    pub fn with_n_runs(mut self, n_runs: usize) -> Self {
        self.n_runs = n_runs;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: u64) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_silhouette_sample(mut self, sample: Option<usize>) -> Self {
        self.silhouette_sample = sample;
        self
    }

    pub fn validate(&self) -> crate::Result<()> {
        if self.num_clusters == 0 {
            return Err(SegmentError::config("num_clusters must be at least 1"));
        }
        if self.n_runs == 0 {
            return Err(SegmentError::config("n_runs must be at least 1"));
        }
        if self.max_iterations == 0 {
            return Err(SegmentError::config("max_iterations must be at least 1"));
        }
        if !(self.tolerance.is_finite() && self.tolerance > 0.0) {
            return Err(SegmentError::config(format!(
                "tolerance must be positive, got {}",
                self.tolerance
            )));
        }
        if !RECOMMENDED_CLUSTERS.contains(&self.num_clusters) {
            tracing::warn!(
                num_clusters = self.num_clusters,
                "num_clusters is outside the recommended range 8-12"
            );
        }
        Ok(())
    }
}

/// Complete configuration for both the classification and segmentation paths.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub classifier: ClassifierConfig,
    pub features: FeatureConfig,
    pub segmentation: SegmentationConfig,
}

impl PipelineConfig {
    /// Read a TOML configuration file and validate it
    pub fn from_toml_file(path: impl AsRef<Path>) -> crate::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            SegmentError::config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> crate::Result<Self> {
        let config: PipelineConfig =
            toml::from_str(text).map_err(|e| SegmentError::config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> crate::Result<()> {
        self.classifier.validate()?;
        self.features.validate()?;
        self.segmentation.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.classifier.adi_threshold, 1.32);
        assert_eq!(config.classifier.cv2_threshold, 0.49);
        assert_eq!(config.features.min_observations_for_trend, 10);
        assert_eq!(config.segmentation.num_clusters, 8);
        assert_eq!(config.segmentation.n_runs, 10);
        assert_eq!(config.segmentation.max_iterations, 300);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = PipelineConfig::from_toml_str(
            r#"
            [segmentation]
            num_clusters = 10
            random_seed = 7

            [classifier]
            adi_threshold = 1.5
            "#,
        )
        .unwrap();

        assert_eq!(config.segmentation.num_clusters, 10);
        assert_eq!(config.segmentation.random_seed, 7);
        assert_eq!(config.segmentation.n_runs, 10);
        assert_eq!(config.classifier.adi_threshold, 1.5);
        assert_eq!(config.classifier.cv2_threshold, 0.49);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let config = SegmentationConfig::default().with_num_clusters(0);
        assert!(matches!(config.validate(), Err(SegmentError::Config(_))));

        let config = ClassifierConfig::default().with_adi_threshold(f64::NAN);
        assert!(config.validate().is_err());

        let config = FeatureConfig::default().with_min_observations_for_trend(1);
        assert!(config.validate().is_err());

        assert!(PipelineConfig::from_toml_str("[segmentation]\nnum_clusters = \"eight\"").is_err());
    }

    #[test]
    fn test_out_of_range_clusters_is_only_a_warning() {
        let config = SegmentationConfig::default().with_num_clusters(3);
        assert!(config.validate().is_ok());
    }
}
