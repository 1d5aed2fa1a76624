use crate::classify::platt::PlattScaling;
use crate::classify::reference::{ReferenceDataset, ReferenceError};
use crate::classify::scaling::Standardizer;
use crate::classify::svm::{KernelSvm, SvmError};
use crate::classify::tuning::{self, TuningOutcome};
use crate::config::{ClassifierSettings, HyperParameters};
use crate::types::VirulenceClass;
use ndarray::{Array1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

// --- Public Data Structures ---
// The trained classifier as written to and read from a TOML file.

/// How the kernel width and cost of a model were chosen.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Selection {
    /// The fixed pair used when every reference feature is available.
    Fixed,
    /// Grid search; holds the winning cross-validated balanced accuracy.
    CrossValidated { balanced_accuracy: f64 },
}

/// A self-contained classifier over a named, ordered feature set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainedModel {
    /// Gene-set features, in the column order the model expects.
    pub features: Vec<String>,
    pub selection: Selection,
    pub platt: PlattScaling,
    pub scaler: Standardizer,
    pub svm: KernelSvm,
}

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Failed to read or write model file '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse TOML model file: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Failed to serialize model to TOML format: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
    #[error("Classifier training failed: {0}")]
    Svm(#[from] SvmError),
    #[error("Reference dataset cannot be used for training: {0}")]
    Reference(#[from] ReferenceError),
    #[error(
        "The model was trained on features [{}] but was given [{}].",
        .expected.join(", "),
        .found.join(", ")
    )]
    FeatureMismatch {
        expected: Vec<String>,
        found: Vec<String>,
    },
    #[error("Prediction data has {found} feature columns, but the model uses {expected}.")]
    ColumnCount { found: usize, expected: usize },
    #[error("Model file is internally inconsistent: {0}")]
    Inconsistent(String),
}

impl TrainedModel {
    /// Trains with `settings.fixed` on every feature of `data`.
    pub fn fit_fixed(
        data: &ReferenceDataset,
        settings: &ClassifierSettings,
    ) -> Result<Self, ModelError> {
        log::info!(
            "Training classifier on {} features with sigma = {}, cost = {}",
            data.feature_names().len(),
            settings.fixed.sigma,
            settings.fixed.cost
        );
        Self::fit(data, settings.fixed, Selection::Fixed, settings)
    }

    /// Restricts `data` to `features`, picks hyperparameters by cross-validated grid
    /// search and trains on the full restricted dataset.
    pub fn fit_tuned(
        data: &ReferenceDataset,
        features: &[String],
        settings: &ClassifierSettings,
    ) -> Result<(Self, TuningOutcome), ModelError> {
        let restricted = data.restrict(features)?;
        check_trainable(&restricted)?;
        let signs = signs_of(restricted.labels());
        log::info!(
            "Retraining classifier on {} matched features with a {}x{} grid search",
            features.len(),
            settings.sigma_grid.len(),
            settings.cost_grid.len()
        );
        let outcome = tuning::grid_search(restricted.features(), &signs, settings)?;
        let model = Self::fit(
            &restricted,
            outcome.best,
            Selection::CrossValidated {
                balanced_accuracy: outcome.score,
            },
            settings,
        )?;
        Ok((model, outcome))
    }

    fn fit(
        data: &ReferenceDataset,
        params: HyperParameters,
        selection: Selection,
        settings: &ClassifierSettings,
    ) -> Result<Self, ModelError> {
        check_trainable(data)?;
        let rows = data.features();
        let signs = signs_of(data.labels());

        let scaler = Standardizer::fit(rows);
        let svm = KernelSvm::train(scaler.transform(rows).view(), &signs, params)?;
        let calibration = calibration_decisions(rows, &signs, params, settings, &scaler, &svm)?;
        let platt = PlattScaling::fit(&calibration, &signs);

        Ok(Self {
            features: data.feature_names().to_vec(),
            selection,
            platt,
            scaler,
            svm,
        })
    }

    /// Raw decision values for `rows` (samples x features, in model feature order).
    pub fn decision_values(&self, rows: ArrayView2<f64>) -> Result<Array1<f64>, ModelError> {
        if rows.ncols() != self.features.len() {
            return Err(ModelError::ColumnCount {
                found: rows.ncols(),
                expected: self.features.len(),
            });
        }
        Ok(self.svm.decision_values(self.scaler.transform(rows).view()))
    }

    /// Predicted class and probability of `Virulent` for each row.
    ///
    /// `features` names the columns of `rows` and must equal the model's features,
    /// including their order.
    pub fn predict(
        &self,
        features: &[String],
        rows: ArrayView2<f64>,
    ) -> Result<Vec<(VirulenceClass, f64)>, ModelError> {
        self.check_features(features)?;
        let decisions = self.decision_values(rows)?;
        Ok(decisions
            .iter()
            .map(|&f| (VirulenceClass::from_decision(f), self.platt.probability(f)))
            .collect())
    }

    pub fn check_features(&self, features: &[String]) -> Result<(), ModelError> {
        if features != self.features.as_slice() {
            return Err(ModelError::FeatureMismatch {
                expected: self.features.clone(),
                found: features.to_vec(),
            });
        }
        Ok(())
    }

    /// Saves the trained model to a file in a human-readable TOML format.
    pub fn save(&self, path: &Path) -> Result<(), ModelError> {
        let io_error = |source| ModelError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_error)?;
        }
        let toml_string = toml::to_string_pretty(self)?;
        let mut file = BufWriter::new(fs::File::create(path).map_err(io_error)?);
        file.write_all(toml_string.as_bytes()).map_err(io_error)?;
        file.flush().map_err(io_error)?;
        log::info!("Saved classifier to {}", path.display());
        Ok(())
    }

    /// Loads a trained model from a TOML file and checks that its parts agree.
    pub fn load(path: &Path) -> Result<Self, ModelError> {
        let toml_string = fs::read_to_string(path).map_err(|source| ModelError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let model: Self = toml::from_str(&toml_string)?;
        model.check_consistency()?;
        log::info!(
            "Loaded classifier over {} features from {}",
            model.features.len(),
            path.display()
        );
        Ok(model)
    }

    fn check_consistency(&self) -> Result<(), ModelError> {
        let n = self.features.len();
        if n == 0 {
            return Err(ModelError::Inconsistent("no features".into()));
        }
        if self.scaler.n_features() != n || self.scaler.scale.len() != n {
            return Err(ModelError::Inconsistent(format!(
                "{n} features but scaling statistics for {}",
                self.scaler.n_features()
            )));
        }
        if self.svm.support_vectors.ncols() != n {
            return Err(ModelError::Inconsistent(format!(
                "{n} features but support vectors of width {}",
                self.svm.support_vectors.ncols()
            )));
        }
        if self.svm.support_vectors.nrows() != self.svm.coefficients.len() {
            return Err(ModelError::Inconsistent(format!(
                "{} support vectors but {} coefficients",
                self.svm.support_vectors.nrows(),
                self.svm.coefficients.len()
            )));
        }
        if self.scaler.scale.iter().any(|&s| s <= 0.0 || !s.is_finite()) {
            return Err(ModelError::Inconsistent("non-positive feature scale".into()));
        }
        Ok(())
    }
}

fn signs_of(labels: &[VirulenceClass]) -> Vec<f64> {
    labels.iter().map(|l| l.sign()).collect()
}

fn check_trainable(data: &ReferenceDataset) -> Result<(), ModelError> {
    match data.class_counts() {
        (_, 0) => Err(SvmError::SingleClass("Virulent").into()),
        (0, _) => Err(SvmError::SingleClass("Avirulent").into()),
        _ => Ok(()),
    }
}

/// Decision values the sigmoid is fitted on: out-of-fold values when both classes
/// have at least two rows, otherwise the in-sample values of the final machine.
fn calibration_decisions(
    rows: ArrayView2<f64>,
    signs: &[f64],
    params: HyperParameters,
    settings: &ClassifierSettings,
    scaler: &Standardizer,
    svm: &KernelSvm,
) -> Result<Vec<f64>, ModelError> {
    let positives = signs.iter().filter(|&&y| y > 0.0).count();
    let negatives = signs.len() - positives;
    if positives < 2 || negatives < 2 {
        log::debug!("Too few rows per class for out-of-fold calibration; using in-sample decisions");
        return Ok(svm.decision_values(scaler.transform(rows).view()).to_vec());
    }

    let k = settings.folds.min(signs.len()).max(2);
    let folds = tuning::stratified_folds(signs, k, settings.seed);
    let mut decisions = vec![0.0; signs.len()];
    for fold in 0..k {
        let (test, train): (Vec<usize>, Vec<usize>) =
            (0..signs.len()).partition(|&i| folds[i] == fold);
        if test.is_empty() {
            continue;
        }
        let train_signs: Vec<f64> = train.iter().map(|&i| signs[i]).collect();
        let fold_values = tuning::fold_decision_values(
            rows.select(Axis(0), &train).view(),
            &train_signs,
            rows.select(Axis(0), &test).view(),
            params,
        )?;
        for (&row, &value) in test.iter().zip(fold_values.iter()) {
            decisions[row] = value;
        }
    }
    Ok(decisions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;
    use tempfile::tempdir;

    /// 20 rows, 4 features; the first two features carry the class signal.
    fn reference() -> ReferenceDataset {
        let labels: Vec<VirulenceClass> = (0..20)
            .map(|i| {
                if i % 2 == 0 {
                    VirulenceClass::Virulent
                } else {
                    VirulenceClass::Avirulent
                }
            })
            .collect();
        let features = Array2::from_shape_fn((20, 4), |(i, j)| {
            let noise = ((i * 7 + j * 3) % 5) as f64 * 0.1;
            let signal = if j < 2 { labels[i].sign() * 1.5 } else { 0.0 };
            signal + noise
        });
        ReferenceDataset::new(
            (0..4).map(|j| format!("GOBP_{j}")).collect(),
            (0..20).map(|i| format!("ref{i}")).collect(),
            features,
            labels,
        )
        .unwrap()
    }

    #[test]
    fn fixed_model_predicts_reference_classes() {
        let data = reference();
        let model = TrainedModel::fit_fixed(&data, &ClassifierSettings::default()).unwrap();
        assert_eq!(model.selection, Selection::Fixed);
        let predictions = model.predict(data.feature_names(), data.features()).unwrap();
        for ((class, probability), truth) in predictions.iter().zip(data.labels()) {
            assert_eq!(class, truth);
            assert!((0.0..=1.0).contains(probability));
        }
    }

    #[test]
    fn tuned_model_uses_only_requested_features() {
        let data = reference();
        let features = vec!["GOBP_1".to_string(), "GOBP_0".to_string()];
        let (model, outcome) =
            TrainedModel::fit_tuned(&data, &features, &ClassifierSettings::default()).unwrap();
        assert_eq!(model.features, features);
        assert!(matches!(model.selection, Selection::CrossValidated { .. }));
        assert_eq!(outcome.score, 1.0);
    }

    #[test]
    fn reordered_features_are_rejected() {
        let data = reference();
        let model = TrainedModel::fit_fixed(&data, &ClassifierSettings::default()).unwrap();
        let mut shuffled = data.feature_names().to_vec();
        shuffled.swap(0, 1);
        let err = model.predict(&shuffled, data.features()).unwrap_err();
        assert!(matches!(err, ModelError::FeatureMismatch { .. }));
    }

    #[test]
    fn single_class_reference_cannot_be_trained() {
        let data = reference();
        let virulent_rows: Vec<usize> = (0..20).step_by(2).collect();
        let only_virulent = ReferenceDataset::new(
            data.feature_names().to_vec(),
            virulent_rows.iter().map(|i| format!("ref{i}")).collect(),
            data.features().select(Axis(0), &virulent_rows),
            vec![VirulenceClass::Virulent; virulent_rows.len()],
        )
        .unwrap();
        let err = TrainedModel::fit_fixed(&only_virulent, &ClassifierSettings::default()).unwrap_err();
        assert!(matches!(err, ModelError::Svm(SvmError::SingleClass(_))));
    }

    #[test]
    fn save_and_load_round_trip() {
        let data = reference();
        let model = TrainedModel::fit_fixed(&data, &ClassifierSettings::default()).unwrap();
        let dir = tempdir().unwrap();
        let path = dir.path().join("models").join("classifier.toml");
        model.save(&path).unwrap();
        let loaded = TrainedModel::load(&path).unwrap();
        assert_eq!(loaded.features, model.features);
        let original = model.decision_values(data.features()).unwrap();
        let reloaded = loaded.decision_values(data.features()).unwrap();
        for (a, b) in original.iter().zip(reloaded.iter()) {
            approx::assert_abs_diff_eq!(a, b, epsilon = 1e-12);
        }
    }
}
