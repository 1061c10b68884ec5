//! Clustering quality diagnostics
//!
//! These numbers are reported only; nothing downstream branches on them.

use crate::model::euclidean_distance;
use ndarray::{Array1, Array2, ArrayView2, Axis};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Diagnostics for one assignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityReport {
    /// Mean silhouette coefficient in [-1, 1], higher is better
    pub silhouette: f64,
    /// Davies-Bouldin index, at least 0, lower is better
    pub davies_bouldin: f64,
    /// Within-cluster sum of squares of the fitted model
    pub inertia: f64,
    pub cluster_sizes: Vec<usize>,
}

/// Compute all diagnostics over standardised features
///
/// # Arguments
/// * `features` - Standardised `(n_entities, n_features)` matrix
/// * `labels` - Cluster id per row
/// * `n_clusters` - Number of clusters in the model
/// * `inertia` - Inertia reported by the fit
/// * `silhouette_sample` - Restrict the silhouette to the first N rows
pub fn evaluate(
    features: ArrayView2<f64>,
    labels: &[usize],
    n_clusters: usize,
    inertia: f64,
    silhouette_sample: Option<usize>,
) -> QualityReport {
    let sample_size = silhouette_sample.unwrap_or(features.nrows());
    let mut cluster_sizes = vec![0; n_clusters];
    for &label in labels.iter().filter(|&&l| l < n_clusters) {
        cluster_sizes[label] += 1;
    }

    QualityReport {
        silhouette: silhouette_score(features, labels, n_clusters, sample_size),
        davies_bouldin: davies_bouldin_index(features, labels, n_clusters),
        inertia,
        cluster_sizes,
    }
}

/// Mean silhouette coefficient over the first `sample_size` rows
///
/// Points in singleton clusters score 0. With fewer than two points or fewer
/// than two occupied clusters the score is 0.
pub fn silhouette_score(
    features: ArrayView2<f64>,
    labels: &[usize],
    n_clusters: usize,
    sample_size: usize,
) -> f64 {
    let n_samples = features.nrows().min(labels.len()).min(sample_size);
    if n_samples < 2 {
        return 0.0;
    }

    let labels = &labels[..n_samples];
    let occupied = {
        let mut seen = vec![false; n_clusters];
        for &l in labels.iter().filter(|&&l| l < n_clusters) {
            seen[l] = true;
        }
        seen.iter().filter(|&&s| s).count()
    };
    if occupied < 2 {
        return 0.0;
    }

    let scores: Vec<f64> = (0..n_samples)
        .into_par_iter()
        .map(|i| {
            let point = features.row(i);
            let cluster_label = labels[i];

            // Per-cluster distance sums and counts, excluding the point itself
            let mut sums = vec![0.0; n_clusters];
            let mut counts = vec![0usize; n_clusters];
            for j in (0..n_samples).filter(|&j| j != i && labels[j] < n_clusters) {
                sums[labels[j]] += euclidean_distance(&point, &features.row(j));
                counts[labels[j]] += 1;
            }

            if cluster_label >= n_clusters || counts[cluster_label] == 0 {
                return 0.0;
            }

            let a_i = sums[cluster_label] / counts[cluster_label] as f64;
            let b_i = (0..n_clusters)
                .filter(|&c| c != cluster_label && counts[c] > 0)
                .map(|c| sums[c] / counts[c] as f64)
                .fold(f64::INFINITY, f64::min);

            if b_i.is_infinite() || (a_i == 0.0 && b_i == 0.0) {
                0.0
            } else {
                (b_i - a_i) / a_i.max(b_i)
            }
        })
        .collect();

    scores.iter().sum::<f64>() / n_samples as f64
}

/// Davies-Bouldin index over occupied clusters
///
/// Centroids are recomputed as the member means of each cluster. Pairs of
/// clusters with coincident centroids contribute 0. Fewer than two occupied
/// clusters give 0.
pub fn davies_bouldin_index(features: ArrayView2<f64>, labels: &[usize], n_clusters: usize) -> f64 {
    let n_features = features.ncols();
    let mut centroids = Array2::<f64>::zeros((n_clusters, n_features));
    let mut counts = vec![0usize; n_clusters];

    for (row, &label) in features.outer_iter().zip(labels).filter(|(_, &l)| l < n_clusters) {
        let mut centroid = centroids.row_mut(label);
        centroid += &row;
        counts[label] += 1;
    }

    let occupied: Vec<usize> = (0..n_clusters).filter(|&c| counts[c] > 0).collect();
    if occupied.len() < 2 {
        return 0.0;
    }
    for &c in &occupied {
        let mut centroid = centroids.row_mut(c);
        centroid /= counts[c] as f64;
    }

    // Mean distance of members to their centroid
    let mut scatter = Array1::<f64>::zeros(n_clusters);
    for (row, &label) in features.outer_iter().zip(labels).filter(|(_, &l)| l < n_clusters) {
        scatter[label] += euclidean_distance(&row, &centroids.row(label));
    }
    for &c in &occupied {
        scatter[c] /= counts[c] as f64;
    }

    let total: f64 = occupied
        .iter()
        .map(|&i| {
            occupied
                .iter()
                .filter(|&&j| j != i)
                .map(|&j| {
                    let separation = euclidean_distance(&centroids.row(i), &centroids.row(j));
                    if separation > 0.0 {
                        (scatter[i] + scatter[j]) / separation
                    } else {
                        0.0
                    }
                })
                .fold(0.0, f64::max)
        })
        .sum();

    total / occupied.len() as f64
}

/// Sum of squared distances to the assigned centroid rows
pub fn inertia(features: ArrayView2<f64>, labels: &[usize], centroids: &Array2<f64>) -> f64 {
    features
        .axis_iter(Axis(0))
        .zip(labels)
        .filter(|(_, &l)| l < centroids.nrows())
        .map(|(row, &l)| euclidean_distance(&row, &centroids.row(l)).powi(2))
        .sum()
}
