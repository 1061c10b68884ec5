//! Integration tests for DemandForge

mod common;

use approx::assert_abs_diff_eq;
use demandforge::demand::ClassifiedEntity;
use demandforge::features::NUM_FEATURES;
use demandforge::{
    classify, classify_series, load_demand_table, pattern_summary, series_from_dataframe,
    ColumnMapping, FeatureConfig, FeatureEngineer, PatternClassifier, PatternLabel,
    ReliabilityInput, SegmentError, SegmentationConfig, SegmentationPipeline,
};
use ndarray::Axis;
use proptest::prelude::*;

fn features_for(n_entities: usize, seed: u64) -> demandforge::FeatureMatrix {
    let series = common::synthetic_series(n_entities, 120, seed);
    FeatureEngineer::default().engineer(&series).unwrap()
}

#[test]
fn test_end_to_end_classification_from_csv() {
    let series = common::synthetic_series(40, 90, 7);
    let file = common::write_csv(&series);

    let df = load_demand_table(file.path()).unwrap();
    let loaded = series_from_dataframe(&df, &ColumnMapping::default()).unwrap();
    assert_eq!(loaded.len(), 40);

    let rows = classify_series(&loaded, &PatternClassifier::default()).unwrap();
    assert_eq!(rows.len(), 40);
    for row in &rows {
        assert!(row.adi >= 1.0);
        assert!(row.cv2 >= 0.0);
        assert_abs_diff_eq!(
            row.adi,
            row.stats.num_observations as f64 / row.stats.nonzero_observations.max(1) as f64,
            epsilon = 1e-12
        );
        assert_eq!(row.demand_pattern, classify(row.adi, row.cv2));
    }

    let summary = pattern_summary(&rows);
    let total: f64 = summary.iter().map(|s| s.percentage).sum();
    assert_abs_diff_eq!(total, 1.0, epsilon = 1e-12);
    assert_eq!(summary.iter().map(|s| s.count).sum::<usize>(), 40);
}

#[test]
fn test_classification_table_serializes_with_expected_columns() {
    let series = common::synthetic_series(3, 30, 1);
    let rows: Vec<ClassifiedEntity> = classify_series(&series, &PatternClassifier::default()).unwrap();
    let json = serde_json::to_value(&rows[0]).unwrap();

    for field in ["item_id", "store_id", "ADI", "CV2", "demand_pattern"] {
        assert!(json.get(field).is_some(), "missing {}", field);
    }
}

#[test]
fn test_thousand_entities_eight_clusters() {
    let features = features_for(1000, 42);
    let pipeline = SegmentationPipeline::new(SegmentationConfig::default().with_num_clusters(8))
        .fit(&features)
        .unwrap();

    let model = pipeline.fitted_model().unwrap();
    assert_eq!(model.n_clusters(), 8);
    assert_eq!(model.centroids().shape(), &[8, NUM_FEATURES]);

    let assignment = pipeline.predict(&features).unwrap();
    let sizes = assignment.cluster_sizes();
    assert_eq!(sizes.len(), 8);
    assert_eq!(sizes.iter().sum::<usize>(), 1000);
    assert!(assignment.clusters().iter().all(|&c| c < 8));

    let quality = pipeline.evaluate(&features, &assignment).unwrap();
    assert!((-1.0..=1.0).contains(&quality.silhouette));
    assert!(quality.davies_bouldin >= 0.0);
    assert!(quality.inertia >= 0.0 && quality.inertia.is_finite());

    let profiles = pipeline.profile(&features, &assignment).unwrap();
    let occupied = sizes.iter().filter(|&&s| s > 0).count();
    assert_eq!(profiles.len(), occupied);
    assert_eq!(profiles.iter().map(|p| p.count).sum::<usize>(), 1000);
    assert!(profiles.windows(2).all(|w| w[0].cluster_id < w[1].cluster_id));
}

#[test]
fn test_clustering_is_reproducible() {
    let features = features_for(300, 3);
    let config = SegmentationConfig::default().with_num_clusters(8).with_random_seed(11);

    let first = SegmentationPipeline::new(config.clone()).fit(&features).unwrap();
    let second = SegmentationPipeline::new(config).fit(&features).unwrap();

    assert_eq!(
        first.fitted_model().unwrap().centroids(),
        second.fitted_model().unwrap().centroids()
    );
    assert_eq!(
        first.predict(&features).unwrap().clusters(),
        second.predict(&features).unwrap().clusters()
    );
}

#[test]
fn test_standardized_training_features() {
    let features = features_for(500, 5);
    let pipeline = SegmentationPipeline::new(SegmentationConfig::default())
        .fit(&features)
        .unwrap();
    let scaled = pipeline.transform(&features).unwrap();

    let mean = scaled.mean_axis(Axis(0)).unwrap();
    let std = scaled.std_axis(Axis(0), 0.0);
    for j in 0..NUM_FEATURES {
        assert_abs_diff_eq!(mean[j], 0.0, epsilon = 1e-9);
        assert_abs_diff_eq!(std[j], 1.0, epsilon = 1e-9);
    }
}

#[test]
fn test_labels_recomputed_per_fit_and_idempotent() {
    let features = features_for(400, 9);
    let pipeline = SegmentationPipeline::new(SegmentationConfig::default().with_num_clusters(10))
        .fit(&features)
        .unwrap();
    let assignment = pipeline.predict(&features).unwrap();

    let a = pipeline.label(&features, &assignment).unwrap();
    let b = pipeline.label(&features, &assignment).unwrap();
    assert_eq!(a, b);

    let labelled = demandforge::assignment_table(&assignment, &a);
    assert_eq!(labelled.len(), 400);
    for row in &labelled {
        let (value, stability) = row.business_label.rsplit_once('-').unwrap();
        assert!(["Premium", "Mid-Tier", "Budget"].contains(&value));
        assert!(["Stable", "Moderate", "Volatile"].contains(&stability));
    }
}

#[test]
fn test_predict_new_batch_without_refit() {
    let features = features_for(200, 21);
    let pipeline = SegmentationPipeline::new(SegmentationConfig::default())
        .fit(&features)
        .unwrap();
    let before = pipeline.fitted_model().unwrap().centroids().clone();

    let other = features_for(50, 22);
    let assignment = pipeline.predict(&other).unwrap();
    assert_eq!(assignment.len(), 50);
    assert_eq!(assignment.cluster_sizes().iter().sum::<usize>(), 50);
    assert_eq!(pipeline.fitted_model().unwrap().centroids(), &before);
}

#[test]
fn test_not_fitted_and_missing_source() {
    let features = features_for(20, 1);
    let pipeline = SegmentationPipeline::new(SegmentationConfig::default());
    let err = pipeline.predict(&features).unwrap_err();
    assert!(matches!(err, SegmentError::NotFitted { .. }));

    let err = load_demand_table("/definitely/not/here.csv").unwrap_err();
    assert!(matches!(err, SegmentError::SourceUnavailable { .. }));
}

#[test]
fn test_adversarial_entities_in_a_batch() {
    let start = common::start_date();
    let mut series = common::synthetic_series(12, 60, 4);
    series.push(
        demandforge::DemandSeries::daily(
            demandforge::EntityKey::new("ZERO", "CA_1"),
            start,
            &[0.0; 30],
        )
        .unwrap(),
    );
    series.push(
        demandforge::DemandSeries::daily(demandforge::EntityKey::new("ONE", "CA_1"), start, &[3.0])
            .unwrap(),
    );

    let engineer = FeatureEngineer::new(FeatureConfig::default(), ReliabilityInput::Omitted).unwrap();
    let features = engineer.engineer(&series).unwrap();
    for v in features.vectors() {
        assert!(v.is_finite());
    }
    assert_eq!(features.vectors()[13].trend_slope, 0.0);

    let rows = classify_series(&series, &PatternClassifier::default()).unwrap();
    assert_eq!(rows[12].cv2, 0.0);
    assert_eq!(rows[13].cv2, 0.0);
    assert_eq!(rows[13].adi, 1.0);
}

proptest! {
    #[test]
    fn prop_classify_matches_quadrant_table(adi in 1.0f64..10.0, cv2 in 0.0f64..5.0) {
        let expected = match (adi < 1.32, cv2 < 0.49) {
            (true, true) => PatternLabel::Smooth,
            (true, false) => PatternLabel::Erratic,
            (false, true) => PatternLabel::Intermittent,
            (false, false) => PatternLabel::Lumpy,
        };
        prop_assert_eq!(classify(adi, cv2), expected);
        prop_assert_eq!(classify(adi, cv2), classify(adi, cv2));
    }

    #[test]
    fn prop_stats_invariants(
        quantities in prop::collection::vec(prop_oneof![Just(0.0f64), 0.0f64..500.0], 1..60)
    ) {
        let series = demandforge::DemandSeries::daily(
            demandforge::EntityKey::new("P", "S"),
            common::start_date(),
            &quantities,
        ).unwrap();
        let stats = demandforge::demand::compute_stats(&series).unwrap();

        prop_assert!(stats.adi >= 1.0);
        prop_assert!(stats.cv2 >= 0.0 && stats.cv2.is_finite());
        prop_assert!(stats.nonzero_observations <= stats.num_observations);
        if stats.nonzero_observations <= 1 {
            prop_assert_eq!(stats.cv2, 0.0);
        }
        if stats.nonzero_observations > 0 {
            let expected = stats.num_observations as f64 / stats.nonzero_observations as f64;
            prop_assert!((stats.adi - expected).abs() < 1e-12);
        }
    }

    #[test]
    fn prop_features_always_finite(
        quantities in prop::collection::vec(prop_oneof![Just(0.0f64), 0.0f64..1e6], 1..40)
    ) {
        let series = demandforge::DemandSeries::daily(
            demandforge::EntityKey::new("P", "S"),
            common::start_date(),
            &quantities,
        ).unwrap();
        let engineer = FeatureEngineer::new(FeatureConfig::default(), ReliabilityInput::Omitted).unwrap();
        let features = engineer.engineer(&[series]).unwrap();
        let v = features.vectors()[0];

        prop_assert!(v.is_finite());
        prop_assert!((0.0..=1.0).contains(&v.seasonality_strength));
        prop_assert!((0.0..=1.0).contains(&v.stockout_frequency));
        prop_assert!((-1.0..=1.0).contains(&v.trend_slope));
        if quantities.len() < 10 {
            prop_assert_eq!(v.trend_slope, 0.0);
        }
    }
}
