// ========================================================================================
//
//                         End-to-end virulence prediction run
//
// ========================================================================================
//
// load expression -> load reference -> fetch gene sets -> score (pool) -> match features
// -> build classifier -> predict (pool) -> write report -> save model (optional)
//
// Every stage returns its own error type and the first failure ends the run. The report
// is written only after every prediction succeeded, and the model is saved only after
// the report is in place.

use crate::classify::features::{FeatureMatch, InsufficientFeaturesError, match_features};
use crate::classify::model::{ModelError, Selection, TrainedModel};
use crate::classify::reference::{ReferenceError, load_reference_dataset};
use crate::config::{ConfigError, HyperParameters, PipelineConfig};
use crate::enrich::genesets::{GeneSetError, load_collection};
use crate::enrich::gsva::{ScoringError, score_gene_sets};
use crate::expression::{ExpressionError, load_expression_matrix};
use crate::predictor::{PredictionError, predict_samples};
use crate::report::{ReportError, report_file_name, write_report};
use crate::workers::{Phase, with_phase_pool};
use std::fmt;
use std::path::PathBuf;
use std::time::Instant;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("Input format error: {0}")]
    InputFormat(#[from] ExpressionError),
    #[error("Reference gene sets unavailable: {0}")]
    ReferenceFetch(#[from] GeneSetError),
    #[error("Enrichment scoring failed: {0}")]
    Scoring(#[from] ScoringError),
    #[error("Reference training dataset unusable: {0}")]
    ReferenceDataset(#[from] ReferenceError),
    #[error("Insufficient features: {0}")]
    InsufficientFeatures(#[from] InsufficientFeaturesError),
    #[error("Classifier unavailable: {0}")]
    Training(#[from] ModelError),
    #[error("Prediction failed: {0}")]
    Prediction(#[from] PredictionError),
    #[error("Output could not be written: {0}")]
    OutputWrite(#[from] ReportError),
}

/// Non-fatal conditions raised during a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineWarning {
    /// Only part of the reference features could be scored; the classifier was
    /// retrained on the matched subset.
    PartialFeatures {
        matched: usize,
        required: usize,
        missing: Vec<String>,
    },
}

impl fmt::Display for PipelineWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PartialFeatures {
                matched,
                required,
                missing,
            } => write!(
                f,
                "Only {matched} of {required} reference features were found; the classifier was retrained without: {}",
                missing.join(", ")
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    Full,
    Partial,
}

impl fmt::Display for MatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full => f.write_str("full"),
            Self::Partial => f.write_str("partial"),
        }
    }
}

/// What a successful run did.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub genes: usize,
    pub samples: usize,
    pub gene_sets_scored: usize,
    pub match_kind: MatchKind,
    pub matched_features: usize,
    pub required_features: usize,
    pub hyperparameters: HyperParameters,
    pub virulent: usize,
    pub avirulent: usize,
    pub report_path: PathBuf,
    pub warnings: Vec<PipelineWarning>,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Input: {} genes x {} samples", self.genes, self.samples)?;
        writeln!(f, "Gene sets scored: {}", self.gene_sets_scored)?;
        writeln!(
            f,
            "Feature match: {} ({} of {} reference features)",
            self.match_kind, self.matched_features, self.required_features
        )?;
        writeln!(
            f,
            "Classifier: sigma = {}, cost = {}",
            self.hyperparameters.sigma, self.hyperparameters.cost
        )?;
        writeln!(
            f,
            "Predictions: {} Virulent, {} Avirulent",
            self.virulent, self.avirulent
        )?;
        for warning in &self.warnings {
            writeln!(f, "Warning: {warning}")?;
        }
        write!(f, "Report: {}", self.report_path.display())
    }
}

/// Runs the whole prediction pipeline described by `config`.
pub fn run(config: &PipelineConfig) -> Result<RunSummary, PipelineError> {
    config.validate()?;
    let started = Instant::now();

    let expression = load_expression_matrix(&config.input)?;
    let reference = load_reference_dataset(&config.reference_dataset)?;
    let collection = load_collection(&config.gene_sets, config.fetch_timeout())?;

    let phase_start = Instant::now();
    let scores = with_phase_pool(config.workers.threads, Phase::Scoring, || {
        score_gene_sets(&expression, &collection, config.format, &config.scoring)
    })?;
    log::info!(
        "Scored {} gene sets for {} samples in {:.2?}",
        scores.nrows(),
        scores.ncols(),
        phase_start.elapsed()
    );

    let feature_match = match_features(reference.feature_names(), scores.row_labels())?;
    let mut warnings = Vec::new();
    let (model, match_kind) = match &feature_match {
        FeatureMatch::Full(features) => {
            let model = match &config.pretrained_model {
                Some(path) => {
                    let model = TrainedModel::load(path)?;
                    model.check_features(features)?;
                    model
                }
                None => TrainedModel::fit_fixed(&reference, &config.classifier)?,
            };
            (model, MatchKind::Full)
        }
        FeatureMatch::Partial { matched, missing } => {
            let warning = PipelineWarning::PartialFeatures {
                matched: matched.len(),
                required: reference.feature_names().len(),
                missing: missing.clone(),
            };
            log::warn!("{warning}");
            warnings.push(warning);
            let (model, _) = TrainedModel::fit_tuned(&reference, matched, &config.classifier)?;
            (model, MatchKind::Partial)
        }
    };
    if let Selection::CrossValidated { balanced_accuracy } = model.selection {
        log::info!("Retrained classifier cross-validated balanced accuracy: {balanced_accuracy:.3}");
    }
    let records = predict_samples(
        &model,
        &scores,
        config.workers.chunk_size,
        config.workers.threads,
    )?;

    let report_path = config
        .output_dir
        .join(report_file_name(&config.prefix, chrono::Local::now().date_naive()));
    write_report(&report_path, &records)?;

    // The model is persisted last; if that fails the run leaves no report behind.
    if let Some(path) = &config.save_model {
        if let Err(e) = model.save(path) {
            let _ = std::fs::remove_file(&report_path);
            return Err(e.into());
        }
    }

    let virulent = records.iter().filter(|r| r.prediction.is_positive()).count();
    log::info!("Run finished in {:.2?}", started.elapsed());
    Ok(RunSummary {
        genes: expression.nrows(),
        samples: expression.ncols(),
        gene_sets_scored: scores.nrows(),
        match_kind,
        matched_features: feature_match.matched().len(),
        required_features: reference.feature_names().len(),
        hyperparameters: HyperParameters {
            sigma: model.svm.sigma,
            cost: model.svm.cost,
        },
        virulent,
        avirulent: records.len() - virulent,
        report_path,
        warnings,
    })
}
