//! DemandForge: demand pattern classification and K-Means inventory segmentation
//!
//! This is the main entrypoint that orchestrates data loading, classification,
//! model fitting, prediction and reporting.

use anyhow::{Context, Result};
use clap::Parser;
use demandforge::cli::Command;
use demandforge::{
    assignment_table, classify_series, load_demand_table, pattern_summary, series_from_dataframe,
    Args, ColumnMapping, DemandSeries, FeatureEngineer, FeatureMatrix, PatternClassifier,
    PipelineConfig, ReliabilityInput, SegmentationPipeline,
};
use serde::Serialize;
use std::fs::File;
use std::path::Path;
use std::time::Instant;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    let config = args.pipeline_config()?;

    match &args.command {
        Command::Classify { input, output } => run_classification(&config, input, output.as_deref()),
        Command::Segment {
            input,
            predict_input,
            output,
            ..
        } => run_segmentation(&config, input, predict_input.as_deref(), output.as_deref()),
    }
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(filter)
        .init();
}

fn load_series(path: &Path) -> Result<Vec<DemandSeries>> {
    let df = load_demand_table(path)?;
    let series = series_from_dataframe(&df, &ColumnMapping::default())
        .with_context(|| format!("invalid demand table {}", path.display()))?;
    Ok(series)
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let file = File::create(path).with_context(|| format!("cannot create {}", path.display()))?;
    serde_json::to_writer_pretty(file, value)?;
    info!(path = %path.display(), "Report written");
    Ok(())
}

#[derive(Serialize)]
struct ClassificationReport<'a> {
    summary: &'a [demandforge::demand::PatternSummary],
    entities: &'a [demandforge::demand::ClassifiedEntity],
}

/// Run demand pattern classification
fn run_classification(config: &PipelineConfig, input: &Path, output: Option<&Path>) -> Result<()> {
    let start_time = Instant::now();

    let series = load_series(input)?;
    let classifier = PatternClassifier::new(config.classifier)?;
    let rows = classify_series(&series, &classifier)?;
    let summary = pattern_summary(&rows);

    println!("=== Demand Pattern Summary ===");
    for row in &summary {
        println!(
            "{:<13} {:>8} ({:.1}%)",
            row.pattern,
            row.count,
            row.percentage * 100.0
        );
    }

    if let Some(path) = output {
        write_json(
            path,
            &ClassificationReport {
                summary: &summary,
                entities: &rows,
            },
        )?;
    }

    println!(
        "\nClassified {} item-locations in {:.2}s",
        rows.len(),
        start_time.elapsed().as_secs_f64()
    );
    Ok(())
}

#[derive(Serialize)]
struct SegmentationReport<'a> {
    quality: &'a demandforge::QualityReport,
    profiles: &'a [demandforge::ClusterProfile],
    assignments: &'a [demandforge::profile::AssignmentRow],
    predicted: Option<&'a [demandforge::profile::AssignmentRow]>,
}

/// Pick the supplier reliability source available in the data
fn reliability_input(series: &[DemandSeries]) -> ReliabilityInput {
    if series.iter().all(|s| s.supplier_reliability().is_some()) {
        ReliabilityInput::FromSeries
    } else {
        warn!("supplier_reliability not supplied for every entity; leaving the feature out");
        ReliabilityInput::Omitted
    }
}

/// Engineer features for a table assigned against an already fitted model
fn predict_features(engineer: &FeatureEngineer, path: &Path) -> Result<FeatureMatrix> {
    let series = load_series(path)?;
    let features = engineer
        .engineer(&series)
        .with_context(|| format!("cannot build features for predict input {}", path.display()))?;
    Ok(features)
}

/// Run full segmentation pipeline
fn run_segmentation(
    config: &PipelineConfig,
    input: &Path,
    predict_input: Option<&Path>,
    output: Option<&Path>,
) -> Result<()> {
    let start_time = Instant::now();

    // Step 1: features
    let series = load_series(input)?;
    let engineer = FeatureEngineer::new(config.features, reliability_input(&series))?;
    let features = engineer.engineer(&series)?;
    let new_features = predict_input
        .map(|path| predict_features(&engineer, path).map(|f| (path, f)))
        .transpose()?;

    // Step 2: fit and assign
    let pipeline = SegmentationPipeline::new(config.segmentation.clone()).fit(&features)?;
    let assignment = pipeline.predict(&features)?;
    let labels = pipeline.label(&features, &assignment)?;
    let profiles = pipeline.profile(&features, &assignment)?;
    let quality = pipeline.evaluate(&features, &assignment)?;
    let assignments = assignment_table(&assignment, &labels);

    println!("=== Cluster Statistics ===");
    for (i, &size) in quality.cluster_sizes.iter().enumerate() {
        let percentage = size as f64 / assignment.len() as f64 * 100.0;
        let label = labels.get(i).map(|l| l.to_string()).unwrap_or_else(|| "-".to_string());
        println!("Cluster {}: {} item-locations ({:.1}%) {}", i, size, percentage, label);
    }
    println!("\nSilhouette score: {:.3}", quality.silhouette);
    println!("Davies-Bouldin index: {:.3}", quality.davies_bouldin);
    println!("Within-cluster sum of squares: {:.2}", quality.inertia);

    println!("\n=== Cluster Profiles ===");
    for p in &profiles {
        println!(
            "Cluster {} [{}] n={} revenue={:.2}±{:.2} cv={:.3}±{:.3} seasonality={:.3} trend={:.3} stockout={:.3}",
            p.cluster_id,
            p.business_label,
            p.count,
            p.revenue_contribution.mean,
            p.revenue_contribution.std,
            p.demand_cv.mean,
            p.demand_cv.std,
            p.seasonality_strength.mean,
            p.trend_slope.mean,
            p.mean_stockout_frequency()
        );
    }

    // Step 3: optional out-of-sample assignment against the same model
    let predicted = match &new_features {
        Some((path, new_features)) => {
            let new_assignment = pipeline.predict(new_features)?;
            println!("\n=== Predicted Assignments ({}) ===", path.display());
            for (i, size) in new_assignment.cluster_sizes().iter().enumerate() {
                println!("Cluster {}: {} item-locations", i, size);
            }
            Some(assignment_table(&new_assignment, &labels))
        }
        None => None,
    };

    if let Some(path) = output {
        write_json(
            path,
            &SegmentationReport {
                quality: &quality,
                profiles: &profiles,
                assignments: &assignments,
                predicted: predicted.as_deref(),
            },
        )?;
    }

    println!(
        "\nSegmented {} item-locations in {:.2}s",
        assignment.len(),
        start_time.elapsed().as_secs_f64()
    );
    Ok(())
}
