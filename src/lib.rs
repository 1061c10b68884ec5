//! DemandForge: demand pattern classification and inventory segmentation
//!
//! Two independent paths share one ingestion contract:
//!
//! * **Classification** computes ADI and CV² per item-location and places it
//!   in the Smooth / Intermittent / Erratic / Lumpy quadrant.
//! * **Segmentation** engineers six features per item-location, standardises
//!   them, clusters them with seeded K-Means and labels each cluster with a
//!   value and stability tier.

pub mod cli;
pub mod config;
pub mod data;
pub mod demand;
pub mod error;
pub mod features;
pub mod model;
pub mod profile;
pub mod quality;
pub mod scaling;

// Re-export public items for easier access
pub use cli::Args;
pub use config::{ClassifierConfig, FeatureConfig, PipelineConfig, SegmentationConfig};
pub use data::{load_demand_table, series_from_dataframe, ColumnMapping, DemandSeries, EntityKey};
pub use demand::{classify, classify_series, pattern_summary, DemandStats, PatternClassifier, PatternLabel};
pub use error::SegmentError;
pub use features::{FeatureEngineer, FeatureMatrix, FeatureVector, ReliabilityInput};
pub use model::{fit, ClusterAssignment, FittedModel, SegmentationPipeline};
pub use profile::{assignment_table, BusinessLabel, ClusterLabels, ClusterProfile};
pub use quality::QualityReport;
pub use scaling::StandardizerParams;

/// Common result type used throughout the library
pub type Result<T> = std::result::Result<T, SegmentError>;
