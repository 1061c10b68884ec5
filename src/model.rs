//! K-Means segmentation model
//!
//! [`fit`] standardises the feature matrix and runs seeded K-Means (several
//! initialisations, lowest inertia kept). The result is an immutable
//! [`FittedModel`] that every later step borrows. [`SegmentationPipeline`]
//! wraps the Unfitted -> Fitted lifecycle for callers that hold the model
//! alongside its configuration.

use crate::config::SegmentationConfig;
use crate::data::EntityKey;
use crate::error::SegmentError;
use crate::features::{FeatureMatrix, FeatureVector};
use crate::profile::{self, ClusterLabels, ClusterProfile};
use crate::quality::{self, QualityReport};
use crate::scaling::StandardizerParams;
use linfa::prelude::*;
use linfa::DatasetBase;
use linfa_clustering::KMeans;
use linfa_nn::distance::L2Dist;
use ndarray::parallel::prelude::*;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Standardiser parameters and centroids produced by one fit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FittedModel {
    /// Configuration the model was fitted with
    config: SegmentationConfig,
    /// Per-feature mean and scale
    standardizer: StandardizerParams,
    /// Cluster centroids in standardised space, one row per cluster
    centroids: Array2<f64>,
    /// Within-cluster sum of squares on the training batch
    inertia: f64,
    /// Cluster sizes on the training batch
    training_sizes: Vec<usize>,
}

impl FittedModel {
    pub fn config(&self) -> &SegmentationConfig {
        &self.config
    }

    pub fn standardizer(&self) -> &StandardizerParams {
        &self.standardizer
    }

    pub fn centroids(&self) -> &Array2<f64> {
        &self.centroids
    }

    pub fn n_clusters(&self) -> usize {
        self.centroids.nrows()
    }

    pub fn inertia(&self) -> f64 {
        self.inertia
    }

    pub fn training_cluster_sizes(&self) -> &[usize] {
        &self.training_sizes
    }

    /// Standardise a feature matrix with the fitted parameters
    pub fn transform(&self, features: &FeatureMatrix) -> crate::Result<Array2<f64>> {
        self.standardizer.transform(features.to_array2().view())
    }

    /// Assign every entity to its nearest centroid
    pub fn predict(&self, features: &FeatureMatrix) -> crate::Result<ClusterAssignment> {
        let scaled = self.transform(features)?;
        let clusters = self.predict_scaled(scaled.view())?;
        Ok(ClusterAssignment {
            keys: features.keys().to_vec(),
            clusters,
            n_clusters: self.n_clusters(),
        })
    }

    /// Nearest-centroid assignment for rows that are already standardised
    pub fn predict_scaled(&self, scaled: ArrayView2<f64>) -> crate::Result<Vec<usize>> {
        if scaled.ncols() != self.centroids.ncols() {
            return Err(SegmentError::data(format!(
                "expected {} standardized features, got {}",
                self.centroids.ncols(),
                scaled.ncols()
            )));
        }

        Ok(scaled
            .axis_iter(Axis(0))
            .into_par_iter()
            .map(|row| nearest_centroid(&self.centroids, row))
            .collect())
    }

    /// Predict the cluster of a single entity from its raw features
    pub fn predict_one(&self, vector: &FeatureVector) -> crate::Result<usize> {
        let scaled = self.scale_new_entity(vector)?;
        Ok(nearest_centroid(&self.centroids, scaled.view()))
    }

    /// Standardise one raw feature vector
    pub fn scale_new_entity(&self, vector: &FeatureVector) -> crate::Result<Array1<f64>> {
        let raw = Array1::from(vector.to_array().to_vec());
        self.standardizer.transform_row(raw.view())
    }
}

/// Index of the closest centroid by Euclidean distance; ties go to the lowest index
fn nearest_centroid(centroids: &Array2<f64>, point: ArrayView1<f64>) -> usize {
    let mut min_distance = f64::INFINITY;
    let mut closest_cluster = 0;

    for (cluster_idx, centroid) in centroids.outer_iter().enumerate() {
        let distance = euclidean_distance(&point, &centroid);
        if distance < min_distance {
            min_distance = distance;
            closest_cluster = cluster_idx;
        }
    }

    closest_cluster
}

/// Calculate Euclidean distance between two points
pub(crate) fn euclidean_distance(a: &ArrayView1<f64>, b: &ArrayView1<f64>) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f64>()
        .sqrt()
}

/// Cluster id for each entity, valid only against the model that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterAssignment {
    keys: Vec<EntityKey>,
    clusters: Vec<usize>,
    n_clusters: usize,
}

impl ClusterAssignment {
    /// Rebuild an assignment from stored parts
    pub fn from_parts(
        keys: Vec<EntityKey>,
        clusters: Vec<usize>,
        n_clusters: usize,
    ) -> crate::Result<Self> {
        if keys.len() != clusters.len() {
            return Err(SegmentError::data(format!(
                "{} entity keys for {} cluster ids",
                keys.len(),
                clusters.len()
            )));
        }
        if let Some(&bad) = clusters.iter().find(|&&c| c >= n_clusters) {
            return Err(SegmentError::data(format!(
                "cluster id {} out of range for {} clusters",
                bad, n_clusters
            )));
        }
        Ok(Self {
            keys,
            clusters,
            n_clusters,
        })
    }

    pub fn len(&self) -> usize {
        self.clusters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }

    pub fn n_clusters(&self) -> usize {
        self.n_clusters
    }

    pub fn keys(&self) -> &[EntityKey] {
        &self.keys
    }

    pub fn clusters(&self) -> &[usize] {
        &self.clusters
    }

    pub fn iter(&self) -> impl Iterator<Item = (&EntityKey, usize)> {
        self.keys.iter().zip(self.clusters.iter().copied())
    }

    /// Entity count per cluster; empty clusters report 0
    pub fn cluster_sizes(&self) -> Vec<usize> {
        cluster_sizes(&self.clusters, self.n_clusters)
    }

    pub(crate) fn check_matches(&self, features: &FeatureMatrix, n_clusters: usize) -> crate::Result<()> {
        if self.n_clusters != n_clusters {
            return Err(SegmentError::data(format!(
                "assignment has {} clusters but the model has {}",
                self.n_clusters, n_clusters
            )));
        }
        if self.keys.as_slice() != features.keys() {
            return Err(SegmentError::data(
                "assignment and feature matrix cover different entities",
            ));
        }
        Ok(())
    }
}

fn cluster_sizes(clusters: &[usize], n_clusters: usize) -> Vec<usize> {
    let mut sizes = vec![0; n_clusters];
    for &label in clusters {
        if label < n_clusters {
            sizes[label] += 1;
        }
    }
    sizes
}

/// Fit the standardiser and K-Means on a feature matrix
///
/// # Arguments
/// * `features` - Engineered features for the whole batch
/// * `config` - Cluster count, seed, runs and iteration limits
///
/// # Returns
/// * Fitted model; identical input and seed always give identical centroids
pub fn fit(features: &FeatureMatrix, config: &SegmentationConfig) -> crate::Result<FittedModel> {
    config.validate()?;

    if features.len() < config.num_clusters {
        return Err(SegmentError::data(format!(
            "Number of entities ({}) must be at least equal to number of clusters ({})",
            features.len(),
            config.num_clusters
        )));
    }

    let raw = features.to_array2();
    let standardizer = StandardizerParams::fit(raw.view())?;
    let scaled = standardizer.transform(raw.view())?;

    tracing::info!(
        entities = features.len(),
        num_clusters = config.num_clusters,
        n_runs = config.n_runs,
        seed = config.random_seed,
        "Fitting K-means clustering"
    );

    let centroids = fit_centroids(&scaled, config)?;
    let labels: Vec<usize> = scaled
        .outer_iter()
        .map(|row| nearest_centroid(&centroids, row))
        .collect();
    let inertia = quality::inertia(scaled.view(), &labels, &centroids);
    let training_sizes = cluster_sizes(&labels, config.num_clusters);

    tracing::info!(inertia, sizes = ?training_sizes, "Clustering completed");

    Ok(FittedModel {
        config: config.clone(),
        standardizer,
        centroids,
        inertia,
        training_sizes,
    })
}

fn fit_centroids(scaled: &Array2<f64>, config: &SegmentationConfig) -> crate::Result<Array2<f64>> {
    let rng = StdRng::seed_from_u64(config.random_seed);
    let dataset = DatasetBase::from(scaled.clone());

    let model = KMeans::params_with(config.num_clusters, rng, L2Dist)
        .n_runs(config.n_runs)
        .max_n_iterations(config.max_iterations)
        .tolerance(config.tolerance)
        .fit(&dataset)
        .map_err(|e| SegmentError::Clustering(e.to_string()))?;

    tracing::debug!(centroids = ?model.centroids().shape(), "Best K-means run selected");
    Ok(model.centroids().clone())
}

/// Segmentation lifecycle: `Unfitted -> Fitted`, never back.
///
/// Fitting does not mutate the pipeline; it returns a fitted pipeline that
/// shares its model through an `Arc`, so clones are cheap and can be handed
/// to concurrent callers.
#[derive(Debug, Clone)]
pub enum SegmentationPipeline {
    Unfitted(SegmentationConfig),
    Fitted(Arc<FittedModel>),
}

impl SegmentationPipeline {
    pub fn new(config: SegmentationConfig) -> Self {
        SegmentationPipeline::Unfitted(config)
    }

    pub fn config(&self) -> &SegmentationConfig {
        match self {
            SegmentationPipeline::Unfitted(config) => config,
            SegmentationPipeline::Fitted(model) => model.config(),
        }
    }

    pub fn is_fitted(&self) -> bool {
        matches!(self, SegmentationPipeline::Fitted(_))
    }

    /// Fit on a batch, producing a new fitted pipeline with the same configuration
    pub fn fit(&self, features: &FeatureMatrix) -> crate::Result<Self> {
        let model = fit(features, self.config())?;
        Ok(SegmentationPipeline::Fitted(Arc::new(model)))
    }

    /// The fitted model, or `NotFitted` if [`fit`](Self::fit) has not run
    pub fn fitted_model(&self) -> crate::Result<&Arc<FittedModel>> {
        self.model("fitted_model")
    }

    /// The fitted model, or `NotFitted` naming the operation that needed it
    pub(crate) fn model(&self, operation: &'static str) -> crate::Result<&Arc<FittedModel>> {
        match self {
            SegmentationPipeline::Fitted(model) => Ok(model),
            SegmentationPipeline::Unfitted(_) => Err(SegmentError::NotFitted { operation }),
        }
    }

    pub fn transform(&self, features: &FeatureMatrix) -> crate::Result<Array2<f64>> {
        self.model("transform")?.transform(features)
    }

    pub fn predict(&self, features: &FeatureMatrix) -> crate::Result<ClusterAssignment> {
        self.model("predict")?.predict(features)
    }

    pub fn label(
        &self,
        features: &FeatureMatrix,
        assignment: &ClusterAssignment,
    ) -> crate::Result<ClusterLabels> {
        let model = self.model("label")?;
        assignment.check_matches(features, model.n_clusters())?;
        Ok(profile::assign_labels(features, assignment))
    }

    pub fn profile(
        &self,
        features: &FeatureMatrix,
        assignment: &ClusterAssignment,
    ) -> crate::Result<Vec<ClusterProfile>> {
        let model = self.model("profile")?;
        assignment.check_matches(features, model.n_clusters())?;
        Ok(profile::profile_clusters(features, assignment))
    }

    pub fn evaluate(
        &self,
        features: &FeatureMatrix,
        assignment: &ClusterAssignment,
    ) -> crate::Result<QualityReport> {
        let model = self.model("evaluate")?;
        assignment.check_matches(features, model.n_clusters())?;
        let scaled = model.transform(features)?;
        let report = quality::evaluate(
            scaled.view(),
            assignment.clusters(),
            model.n_clusters(),
            model.inertia(),
            model.config().silhouette_sample,
        );
        tracing::info!(
            silhouette = report.silhouette,
            davies_bouldin = report.davies_bouldin,
            "Cluster quality (silhouette higher is better, Davies-Bouldin lower is better)"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn vector(revenue: f64, cv: f64) -> FeatureVector {
        FeatureVector {
            revenue_contribution: revenue,
            demand_cv: cv,
            seasonality_strength: 0.1,
            trend_slope: 0.0,
            stockout_frequency: 0.2,
            supplier_reliability: 0.9,
        }
    }

    fn create_test_features() -> FeatureMatrix {
        let vectors = vec![
            vector(100.0, 0.1),
            vector(110.0, 0.2),
            vector(105.0, 0.15),
            vector(5000.0, 1.5),
            vector(5200.0, 1.4),
            vector(5100.0, 1.6),
            vector(1000.0, 0.7),
            vector(1100.0, 0.8),
            vector(1050.0, 0.75),
        ];
        let keys = (0..vectors.len())
            .map(|i| EntityKey::new(format!("ITEM_{:04}", i), "CA_1"))
            .collect();
        FeatureMatrix::new(keys, vectors).unwrap()
    }

    fn config(k: usize) -> SegmentationConfig {
        SegmentationConfig::default().with_num_clusters(k)
    }

    #[test]
    fn test_fit_kmeans() {
        let features = create_test_features();
        let model = fit(&features, &config(3)).unwrap();

        assert_eq!(model.n_clusters(), 3);
        assert_eq!(model.centroids().shape(), &[3, 6]);
        assert!(model.inertia() >= 0.0 && model.inertia().is_finite());
        assert_eq!(model.training_cluster_sizes().iter().sum::<usize>(), 9);
    }

    #[test]
    fn test_well_separated_groups_share_clusters() {
        let features = create_test_features();
        let model = fit(&features, &config(3)).unwrap();
        let assignment = model.predict(&features).unwrap();
        let c = assignment.clusters();

        assert_eq!(c[0], c[1]);
        assert_eq!(c[1], c[2]);
        assert_eq!(c[3], c[4]);
        assert_eq!(c[6], c[8]);
        assert_ne!(c[0], c[3]);
        assert_ne!(c[0], c[6]);
        assert_eq!(assignment.cluster_sizes(), vec![3, 3, 3]);
    }

    #[test]
    fn test_fit_is_deterministic_for_seed() {
        let features = create_test_features();
        let a = fit(&features, &config(3)).unwrap();
        let b = fit(&features, &config(3)).unwrap();

        assert_eq!(a.centroids(), b.centroids());
        assert_eq!(
            a.predict(&features).unwrap().clusters(),
            b.predict(&features).unwrap().clusters()
        );
    }

    #[test]
    fn test_too_few_entities_for_k() {
        let features = create_test_features();
        let result = fit(&features, &config(10));
        assert!(matches!(result, Err(SegmentError::Data(_))));
    }

    #[test]
    fn test_nearest_centroid_ties_go_to_lowest_index() {
        let centroids = array![[1.0, 0.0], [-1.0, 0.0], [0.0, 5.0]];
        let origin = array![0.0, 0.0];
        assert_eq!(nearest_centroid(&centroids, origin.view()), 0);

        let centroids = array![[0.0, 5.0], [-1.0, 0.0], [1.0, 0.0]];
        assert_eq!(nearest_centroid(&centroids, origin.view()), 1);
    }

    #[test]
    fn test_predict_one_matches_batch() {
        let features = create_test_features();
        let model = fit(&features, &config(3)).unwrap();
        let assignment = model.predict(&features).unwrap();

        for (i, v) in features.vectors().iter().enumerate() {
            assert_eq!(model.predict_one(v).unwrap(), assignment.clusters()[i]);
        }
    }

    #[test]
    fn test_unfitted_pipeline_reports_not_fitted() {
        let features = create_test_features();
        let pipeline = SegmentationPipeline::new(config(3));
        assert!(!pipeline.is_fitted());

        assert!(matches!(
            pipeline.predict(&features),
            Err(SegmentError::NotFitted { operation: "predict" })
        ));
        assert!(matches!(
            pipeline.transform(&features),
            Err(SegmentError::NotFitted { operation: "transform" })
        ));

        assert!(matches!(
            pipeline.fitted_model(),
            Err(SegmentError::NotFitted { operation: "fitted_model" })
        ));

        let fitted = pipeline.fit(&features).unwrap();
        assert!(fitted.is_fitted());
        assert_eq!(fitted.fitted_model().unwrap().n_clusters(), 3);
        let assignment = fitted.predict(&features).unwrap();
        assert_eq!(assignment.len(), features.len());

        // The unfitted value is untouched
        assert!(matches!(
            pipeline.label(&features, &assignment),
            Err(SegmentError::NotFitted { operation: "label" })
        ));
        assert!(matches!(
            pipeline.profile(&features, &assignment),
            Err(SegmentError::NotFitted { operation: "profile" })
        ));
    }

    #[test]
    fn test_assignment_from_other_model_rejected() {
        let features = create_test_features();
        let three = SegmentationPipeline::new(config(3)).fit(&features).unwrap();
        let four = SegmentationPipeline::new(config(4)).fit(&features).unwrap();

        let assignment = four.predict(&features).unwrap();
        assert!(three.profile(&features, &assignment).is_err());
    }
}
