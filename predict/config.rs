//! # Run Configuration
//!
//! Every knob the pipeline reads lives in [`PipelineConfig`], which is passed
//! explicitly into [`crate::pipeline::run`]. The binary builds it from an optional
//! TOML file and then applies command-line overrides on top.

use crate::enrich::genesets::GeneSetSource;
use crate::types::ExpressionFormat;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Default stem of the report file name.
pub const DEFAULT_PREFIX: &str = "VirPred_results";
/// Default location of the bundled reference training dataset.
pub const DEFAULT_REFERENCE_DATASET: &str = "data/reference_training.csv";
/// Wall-clock ceiling applied to reference gene-set retrieval.
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 1800;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read configuration file '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse configuration file '{path}': {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Settings for the enrichment scorer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScoringSettings {
    /// Gene sets with fewer member genes present in the input are not scored.
    pub min_set_size: usize,
    /// Exponent applied to rank weights in the random walk.
    pub tau: f64,
    /// Report the sum of the largest positive and negative deviations instead of the
    /// single largest deviation.
    pub max_diff: bool,
}

impl Default for ScoringSettings {
    fn default() -> Self {
        Self {
            min_set_size: 10,
            tau: 1.0,
            max_diff: true,
        }
    }
}

/// One (kernel width, regularization) pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HyperParameters {
    /// RBF kernel width: `K(x, y) = exp(-sigma * |x - y|^2)`.
    pub sigma: f64,
    /// Soft-margin cost `C`.
    pub cost: f64,
}

/// Settings for classifier fitting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClassifierSettings {
    /// Used without tuning when every reference feature is available.
    pub fixed: HyperParameters,
    /// Kernel widths searched when only a subset of features matched.
    pub sigma_grid: Vec<f64>,
    /// Costs searched when only a subset of features matched.
    pub cost_grid: Vec<f64>,
    /// Number of cross-validation folds for the search.
    pub folds: usize,
    /// Seed for fold assignment, so repeated runs select the same model.
    pub seed: u64,
}

impl Default for ClassifierSettings {
    fn default() -> Self {
        Self {
            fixed: HyperParameters {
                sigma: 0.01,
                cost: 1.0,
            },
            sigma_grid: vec![0.001, 0.005, 0.01, 0.05, 0.1],
            cost_grid: vec![0.25, 0.5, 1.0, 2.0, 4.0, 8.0, 16.0],
            folds: 5,
            seed: 20_240_917,
        }
    }
}

/// Settings for the scoped worker pools.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WorkerSettings {
    /// Worker threads per phase pool.
    pub threads: usize,
    /// Number of contiguous samples handed to one prediction task.
    pub chunk_size: usize,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            threads: num_cpus::get().max(1),
            chunk_size: 64,
        }
    }
}

/// The complete, explicit description of one prediction run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    pub input: PathBuf,
    pub format: ExpressionFormat,
    pub output_dir: PathBuf,
    pub prefix: String,
    pub reference_dataset: PathBuf,
    /// Pre-fit model used when every reference feature matched.
    pub pretrained_model: Option<PathBuf>,
    /// Where to persist the model that was used for prediction, if anywhere.
    pub save_model: Option<PathBuf>,
    pub gene_sets: GeneSetSource,
    pub fetch_timeout_secs: u64,
    pub scoring: ScoringSettings,
    pub classifier: ClassifierSettings,
    pub workers: WorkerSettings,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            input: PathBuf::new(),
            format: ExpressionFormat::Normalize,
            output_dir: PathBuf::from("."),
            prefix: DEFAULT_PREFIX.to_string(),
            reference_dataset: PathBuf::from(DEFAULT_REFERENCE_DATASET),
            pretrained_model: None,
            save_model: None,
            gene_sets: GeneSetSource::default(),
            fetch_timeout_secs: DEFAULT_FETCH_TIMEOUT_SECS,
            scoring: ScoringSettings::default(),
            classifier: ClassifierSettings::default(),
            workers: WorkerSettings::default(),
        }
    }
}

impl PipelineConfig {
    /// Reads a TOML configuration file. Keys that are absent keep their defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    /// Rejects settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.input.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("an input file is required".into()));
        }
        if self.prefix.trim().is_empty() {
            return Err(ConfigError::Invalid("the output prefix must not be empty".into()));
        }
        if self.prefix.contains(['/', '\\']) {
            return Err(ConfigError::Invalid(format!(
                "the output prefix '{}' must not contain path separators",
                self.prefix
            )));
        }
        if self.scoring.min_set_size == 0 {
            return Err(ConfigError::Invalid("scoring.min_set_size must be at least 1".into()));
        }
        if !self.scoring.tau.is_finite() || self.scoring.tau < 0.0 {
            return Err(ConfigError::Invalid("scoring.tau must be a non-negative number".into()));
        }
        if self.fetch_timeout_secs == 0 {
            return Err(ConfigError::Invalid("fetch_timeout_secs must be at least 1".into()));
        }
        if self.workers.threads == 0 || self.workers.chunk_size == 0 {
            return Err(ConfigError::Invalid(
                "workers.threads and workers.chunk_size must be at least 1".into(),
            ));
        }
        let classifier = &self.classifier;
        if classifier.folds < 2 {
            return Err(ConfigError::Invalid("classifier.folds must be at least 2".into()));
        }
        if classifier.sigma_grid.is_empty() || classifier.cost_grid.is_empty() {
            return Err(ConfigError::Invalid(
                "classifier.sigma_grid and classifier.cost_grid must not be empty".into(),
            ));
        }
        let all_positive = std::iter::once(classifier.fixed.sigma)
            .chain(std::iter::once(classifier.fixed.cost))
            .chain(classifier.sigma_grid.iter().copied())
            .chain(classifier.cost_grid.iter().copied())
            .all(|v| v.is_finite() && v > 0.0);
        if !all_positive {
            return Err(ConfigError::Invalid(
                "kernel widths and costs must be finite and strictly positive".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn defaults_match_documented_values() {
        let config = PipelineConfig::default();
        assert_eq!(config.prefix, "VirPred_results");
        assert_eq!(config.format, ExpressionFormat::Normalize);
        assert_eq!(config.scoring.min_set_size, 10);
        assert_eq!(config.classifier.folds, 5);
        assert_eq!(config.fetch_timeout(), Duration::from_secs(1800));
    }

    #[test]
    fn partial_toml_keeps_defaults_for_missing_keys() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "prefix = \"cohort\"\nformat = \"Counts\"\n\n[classifier]\nfolds = 3\n\n[workers]\nchunk_size = 8"
        )
        .unwrap();
        let config = PipelineConfig::load(file.path()).unwrap();
        assert_eq!(config.prefix, "cohort");
        assert_eq!(config.format, ExpressionFormat::Counts);
        assert_eq!(config.classifier.folds, 3);
        assert_eq!(config.classifier.cost_grid.len(), 7);
        assert_eq!(config.workers.chunk_size, 8);
        assert_eq!(config.scoring.min_set_size, 10);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "prefx = \"typo\"").unwrap();
        assert!(matches!(
            PipelineConfig::load(file.path()),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn validate_requires_input_and_positive_grid() {
        let mut config = PipelineConfig::default();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        config.input = PathBuf::from("expr.tsv");
        assert!(config.validate().is_ok());

        config.classifier.sigma_grid.push(0.0);
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }
}
