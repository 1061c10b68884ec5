//! Business labels and cluster profile reports
//!
//! Labels combine a value tier, from where the cluster's mean revenue sits
//! among all cluster means, with a stability tier from its mean demand CV.
//! They depend on the whole set of clusters, so they are recomputed for
//! every fit.

use crate::demand::sample_std;
use crate::features::{column, FeatureMatrix, FeatureVector, NUM_FEATURES};
use crate::model::ClusterAssignment;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Cluster mean demand CV below this is "Stable"
pub const STABLE_CV: f64 = 0.5;
/// Cluster mean demand CV below this (and not stable) is "Moderate"
pub const MODERATE_CV: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueTier {
    Premium,
    MidTier,
    Budget,
}

impl fmt::Display for ValueTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ValueTier::Premium => "Premium",
            ValueTier::MidTier => "Mid-Tier",
            ValueTier::Budget => "Budget",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StabilityTier {
    Stable,
    Moderate,
    Volatile,
}

impl StabilityTier {
    pub fn from_cv(mean_cv: f64) -> Self {
        if mean_cv < STABLE_CV {
            StabilityTier::Stable
        } else if mean_cv < MODERATE_CV {
            StabilityTier::Moderate
        } else {
            StabilityTier::Volatile
        }
    }
}

impl fmt::Display for StabilityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StabilityTier::Stable => "Stable",
            StabilityTier::Moderate => "Moderate",
            StabilityTier::Volatile => "Volatile",
        })
    }
}

/// Two-part segment label such as `Premium-Stable`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BusinessLabel {
    pub value: ValueTier,
    pub stability: StabilityTier,
}

impl fmt::Display for BusinessLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.value, self.stability)
    }
}

/// Mean revenue and demand CV of one occupied cluster.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClusterMeans {
    pub cluster_id: usize,
    pub revenue_contribution: f64,
    pub demand_cv: f64,
}

/// Business label per occupied cluster.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterLabels {
    labels: BTreeMap<usize, BusinessLabel>,
}

impl ClusterLabels {
    pub fn get(&self, cluster_id: usize) -> Option<BusinessLabel> {
        self.labels.get(&cluster_id).copied()
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, BusinessLabel)> + '_ {
        self.labels.iter().map(|(&id, &label)| (id, label))
    }
}

/// Linear-interpolated percentile of an ascending slice, `q` in [0, 1]
fn percentile(sorted: &[f64], q: f64) -> f64 {
    match sorted.len() {
        0 => 0.0,
        1 => sorted[0],
        n => {
            let pos = q.clamp(0.0, 1.0) * (n - 1) as f64;
            let lo = pos.floor() as usize;
            let hi = pos.ceil() as usize;
            sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64)
        }
    }
}

/// Derive labels from cluster means
///
/// Value tier is Premium above the 67th percentile of the cluster-mean
/// revenues, Budget below the 33rd, Mid-Tier otherwise. Pure: the same means
/// always give the same labels.
pub fn label_clusters(means: &[ClusterMeans]) -> ClusterLabels {
    let mut revenues: Vec<f64> = means.iter().map(|m| m.revenue_contribution).collect();
    revenues.sort_by(f64::total_cmp);
    let upper = percentile(&revenues, 0.67);
    let lower = percentile(&revenues, 0.33);

    let labels = means
        .iter()
        .map(|m| {
            let value = if m.revenue_contribution > upper {
                ValueTier::Premium
            } else if m.revenue_contribution < lower {
                ValueTier::Budget
            } else {
                ValueTier::MidTier
            };
            let label = BusinessLabel {
                value,
                stability: StabilityTier::from_cv(m.demand_cv),
            };
            (m.cluster_id, label)
        })
        .collect();

    ClusterLabels { labels }
}

/// Members of each occupied cluster, in cluster id order
fn members_by_cluster<'a>(
    features: &'a FeatureMatrix,
    assignment: &ClusterAssignment,
) -> BTreeMap<usize, Vec<&'a FeatureVector>> {
    let mut groups: BTreeMap<usize, Vec<&FeatureVector>> = BTreeMap::new();
    for (vector, &cluster) in features.vectors().iter().zip(assignment.clusters()) {
        groups.entry(cluster).or_default().push(vector);
    }
    groups
}

/// Per-cluster mean revenue and demand CV over occupied clusters
pub fn cluster_means(features: &FeatureMatrix, assignment: &ClusterAssignment) -> Vec<ClusterMeans> {
    members_by_cluster(features, assignment)
        .into_iter()
        .map(|(cluster_id, members)| {
            let n = members.len() as f64;
            ClusterMeans {
                cluster_id,
                revenue_contribution: members.iter().map(|v| v.revenue_contribution).sum::<f64>() / n,
                demand_cv: members.iter().map(|v| v.demand_cv).sum::<f64>() / n,
            }
        })
        .collect()
}

/// Label every occupied cluster of an assignment
pub fn assign_labels(features: &FeatureMatrix, assignment: &ClusterAssignment) -> ClusterLabels {
    label_clusters(&cluster_means(features, assignment))
}

/// Mean and sample standard deviation of one feature inside a cluster.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureSummary {
    pub mean: f64,
    /// 0 for clusters with a single member
    pub std: f64,
}

/// Aggregated statistics of one cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterProfile {
    pub cluster_id: usize,
    pub business_label: BusinessLabel,
    pub count: usize,
    pub revenue_contribution: FeatureSummary,
    pub demand_cv: FeatureSummary,
    pub seasonality_strength: FeatureSummary,
    pub trend_slope: FeatureSummary,
    pub stockout_frequency: FeatureSummary,
    pub supplier_reliability: FeatureSummary,
}

impl ClusterProfile {
    pub fn mean_stockout_frequency(&self) -> f64 {
        self.stockout_frequency.mean
    }
}

/// Build one profile row per occupied cluster, ordered by cluster id
pub fn profile_clusters(features: &FeatureMatrix, assignment: &ClusterAssignment) -> Vec<ClusterProfile> {
    let labels = assign_labels(features, assignment);

    members_by_cluster(features, assignment)
        .into_iter()
        .filter_map(|(cluster_id, members)| {
            let business_label = labels.get(cluster_id)?;
            let summaries = summarise(&members);
            Some(ClusterProfile {
                cluster_id,
                business_label,
                count: members.len(),
                revenue_contribution: summaries[column::REVENUE_CONTRIBUTION],
                demand_cv: summaries[column::DEMAND_CV],
                seasonality_strength: summaries[column::SEASONALITY_STRENGTH],
                trend_slope: summaries[column::TREND_SLOPE],
                stockout_frequency: summaries[column::STOCKOUT_FREQUENCY],
                supplier_reliability: summaries[column::SUPPLIER_RELIABILITY],
            })
        })
        .collect()
}

fn summarise(members: &[&FeatureVector]) -> [FeatureSummary; NUM_FEATURES] {
    let rows: Vec<[f64; NUM_FEATURES]> = members.iter().map(|v| v.to_array()).collect();
    std::array::from_fn(|j| {
        let values: Vec<f64> = rows.iter().map(|r| r[j]).collect();
        let mean = values.iter().sum::<f64>() / values.len().max(1) as f64;
        FeatureSummary {
            mean,
            std: sample_std(&values, mean),
        }
    })
}

/// One row of the cluster assignment table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignmentRow {
    pub entity_id: String,
    pub item_id: String,
    pub store_id: String,
    pub cluster_id: usize,
    pub business_label: String,
}

/// Join an assignment with its cluster labels
pub fn assignment_table(assignment: &ClusterAssignment, labels: &ClusterLabels) -> Vec<AssignmentRow> {
    assignment
        .iter()
        .map(|(key, cluster_id)| AssignmentRow {
            entity_id: key.to_string(),
            item_id: key.item_id.clone(),
            store_id: key.store_id.clone(),
            cluster_id,
            business_label: labels
                .get(cluster_id)
                .map(|l| l.to_string())
                .unwrap_or_default(),
        })
        .collect()
}
