//! Command-line interface definitions and argument parsing

use crate::config::PipelineConfig;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Demand pattern classification and inventory segmentation
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// TOML configuration file; flags below override its values
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// ADI cutoff between frequent and intermittent demand
    #[arg(long, global = true)]
    pub adi_threshold: Option<f64>,

    /// CV² cutoff between stable and variable demand sizes
    #[arg(long, global = true)]
    pub cv2_threshold: Option<f64>,

    /// Minimum observations before a trend slope is estimated
    #[arg(long, global = true)]
    pub min_trend_obs: Option<usize>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Classify every item-location into a demand pattern
    Classify {
        /// Path to the input CSV file
        #[arg(short, long)]
        input: PathBuf,

        /// Write the classification table and summary as JSON
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Cluster item-locations into inventory segments
    Segment {
        /// Path to the input CSV file used for fitting
        #[arg(short, long)]
        input: PathBuf,

        /// Number of clusters for K-Means
        #[arg(short = 'k', long)]
        clusters: Option<usize>,

        /// Random seed for K-Means initialisation
        #[arg(long)]
        seed: Option<u64>,

        /// Assign a second table against the fitted model without refitting
        #[arg(long)]
        predict_input: Option<PathBuf>,

        /// Write assignments, profiles and quality diagnostics as JSON
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

impl Args {
    /// Resolve the effective configuration: defaults, then file, then flags
    pub fn pipeline_config(&self) -> crate::Result<PipelineConfig> {
        let mut config = match &self.config {
            Some(path) => PipelineConfig::from_toml_file(path)?,
            None => PipelineConfig::default(),
        };

        if let Some(adi) = self.adi_threshold {
            config.classifier.adi_threshold = adi;
        }
        if let Some(cv2) = self.cv2_threshold {
            config.classifier.cv2_threshold = cv2;
        }
        if let Some(n) = self.min_trend_obs {
            config.features.min_observations_for_trend = n;
        }
        if let Command::Segment { clusters, seed, .. } = &self.command {
            if let Some(k) = clusters {
                config.segmentation.num_clusters = *k;
            }
            if let Some(seed) = seed {
                config.segmentation.random_seed = *seed;
            }
        }

        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_parse_segment_args() {
        let args = Args::try_parse_from([
            "demandforge",
            "segment",
            "--input",
            "sales.csv",
            "-k",
            "10",
            "--seed",
            "7",
            "--verbose",
        ])
        .unwrap();

        assert!(args.verbose);
        let config = args.pipeline_config().unwrap();
        assert_eq!(config.segmentation.num_clusters, 10);
        assert_eq!(config.segmentation.random_seed, 7);
        assert_eq!(config.classifier.adi_threshold, 1.32);
    }

    #[test]
    fn test_flags_override_config_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[classifier]\nadi_threshold = 1.5\ncv2_threshold = 0.6").unwrap();
        let path = file.path().to_str().unwrap().to_string();

        let args = Args::try_parse_from([
            "demandforge",
            "--config",
            path.as_str(),
            "--cv2-threshold",
            "0.7",
            "classify",
            "--input",
            "sales.csv",
        ])
        .unwrap();

        let config = args.pipeline_config().unwrap();
        assert_eq!(config.classifier.adi_threshold, 1.5);
        assert_eq!(config.classifier.cv2_threshold, 0.7);
    }

    #[test]
    fn test_invalid_override_rejected() {
        let args = Args::try_parse_from([
            "demandforge",
            "segment",
            "--input",
            "sales.csv",
            "-k",
            "0",
        ])
        .unwrap();
        assert!(args.pipeline_config().is_err());

        assert!(Args::try_parse_from(["demandforge", "classify"]).is_err());
    }
}
