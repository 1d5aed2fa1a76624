//! # Reference Training Dataset
//!
//! The labelled cohort the classifier learns from. It is a comma-separated file with
//! a header row:
//!
//! - `Class`: required, `Virulent` or `Avirulent` (any letter case).
//! - `SampleID`: optional, kept for diagnostics only.
//! - every other column: a numeric feature, named by the gene set whose enrichment
//!   score it holds.
//!
//! The dataset is loaded once per run and never mutated; restricting it to a feature
//! subset produces a new value.

use crate::types::{VirulenceClass, first_duplicate};
use ahash::AHashMap;
use ndarray::{Array2, ArrayView2, Axis, ShapeBuilder};
use polars::prelude::*;
use std::fs::File;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const CLASS_COLUMN: &str = "Class";
pub const SAMPLE_ID_COLUMN: &str = "SampleID";

#[derive(Error, Debug)]
pub enum ReferenceError {
    #[error(
        "Could not open reference dataset '{path}': {source}. No training data ships with virpred; supply it with --reference FILE or `reference_dataset` in the configuration file."
    )]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Error from the underlying Polars DataFrame library: {0}")]
    Polars(#[from] PolarsError),
    #[error("Could not read the header row of the reference dataset: {0}")]
    Header(#[from] csv::Error),
    #[error("Column '{0}' appears more than once in the reference dataset header.")]
    DuplicateColumn(String),
    #[error("The reference dataset has no 'Class' column.")]
    MissingClassColumn,
    #[error("Row {row} of the reference dataset has an invalid class: {reason}")]
    InvalidClass { row: usize, reason: String },
    #[error("The reference dataset has no feature columns.")]
    NoFeatures,
    #[error("The reference dataset has no rows.")]
    NoSamples,
    #[error("Missing values were found in reference feature '{0}'.")]
    MissingValues(String),
    #[error("Reference feature '{column}' is not numeric (found '{value}').")]
    NonNumeric { column: String, value: String },
    #[error("Non-finite values (NaN or Infinity) were found in reference feature '{0}'.")]
    NonFinite(String),
    #[error("Feature '{0}' is not part of the reference dataset.")]
    UnknownFeature(String),
    #[error("Reference dataset dimensions disagree: {0}")]
    ShapeMismatch(String),
}

/// Labelled training rows: samples x features.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceDataset {
    feature_names: Vec<String>,
    sample_ids: Vec<String>,
    features: Array2<f64>,
    labels: Vec<VirulenceClass>,
}

impl ReferenceDataset {
    /// Assembles a dataset from parts already in memory. Row `i` of `features` belongs
    /// to `labels[i]` and `sample_ids[i]`.
    pub fn new(
        feature_names: Vec<String>,
        sample_ids: Vec<String>,
        features: Array2<f64>,
        labels: Vec<VirulenceClass>,
    ) -> Result<Self, ReferenceError> {
        if feature_names.is_empty() || features.ncols() == 0 {
            return Err(ReferenceError::NoFeatures);
        }
        if labels.is_empty() || features.nrows() == 0 {
            return Err(ReferenceError::NoSamples);
        }
        if features.ncols() != feature_names.len()
            || features.nrows() != labels.len()
            || sample_ids.len() != labels.len()
        {
            return Err(ReferenceError::ShapeMismatch(format!(
                "{}x{} feature values for {} labels, {} sample ids and {} feature names",
                features.nrows(),
                features.ncols(),
                labels.len(),
                sample_ids.len(),
                feature_names.len()
            )));
        }
        Ok(Self {
            feature_names,
            sample_ids,
            features,
            labels,
        })
    }

    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    pub fn sample_ids(&self) -> &[String] {
        &self.sample_ids
    }

    pub fn features(&self) -> ArrayView2<'_, f64> {
        self.features.view()
    }

    pub fn labels(&self) -> &[VirulenceClass] {
        &self.labels
    }

    pub fn n_samples(&self) -> usize {
        self.labels.len()
    }

    /// Number of (virulent, avirulent) rows.
    pub fn class_counts(&self) -> (usize, usize) {
        let virulent = self.labels.iter().filter(|l| l.is_positive()).count();
        (virulent, self.labels.len() - virulent)
    }

    /// A copy holding only `features`, in exactly the given order.
    pub fn restrict(&self, features: &[String]) -> Result<Self, ReferenceError> {
        let index: AHashMap<&str, usize> = self
            .feature_names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.as_str(), i))
            .collect();
        let columns = features
            .iter()
            .map(|name| {
                index
                    .get(name.as_str())
                    .copied()
                    .ok_or_else(|| ReferenceError::UnknownFeature(name.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Self::new(
            features.to_vec(),
            self.sample_ids.clone(),
            self.features.select(Axis(1), &columns),
            self.labels.clone(),
        )
    }
}

/// Loads and validates the reference training dataset.
pub fn load_reference_dataset(path: &Path) -> Result<ReferenceDataset, ReferenceError> {
    let file = File::open(path).map_err(|source| ReferenceError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    // polars renames repeated header names, so duplicates are only visible in the raw row.
    let header = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)?
        .headers()?
        .iter()
        .map(str::to_string)
        .collect::<Vec<_>>();
    if let Some(dup) = first_duplicate(&header) {
        return Err(ReferenceError::DuplicateColumn(dup));
    }

    // Every cell is read as text; features are converted column by column.
    let df = CsvReader::new(file)
        .with_options(
            CsvReadOptions::default()
                .with_has_header(true)
                .with_infer_schema_length(Some(0)),
        )
        .finish()?;

    if df.height() == 0 {
        return Err(ReferenceError::NoSamples);
    }

    let class_column = df
        .column(CLASS_COLUMN)
        .map_err(|_| ReferenceError::MissingClassColumn)?;
    let labels = parse_labels(class_column)?;

    let sample_ids = match df.column(SAMPLE_ID_COLUMN) {
        Ok(column) => {
            let text = column.cast(&DataType::String)?;
            text.str()?
                .into_iter()
                .enumerate()
                .map(|(i, id)| id.map_or_else(|| format!("row{}", i + 1), str::to_string))
                .collect()
        }
        Err(_) => (1..=df.height()).map(|i| format!("row{i}")).collect(),
    };

    let feature_columns: Vec<&Column> = df
        .get_columns()
        .iter()
        .filter(|c| c.name().as_str() != CLASS_COLUMN && c.name().as_str() != SAMPLE_ID_COLUMN)
        .collect();
    if feature_columns.is_empty() {
        return Err(ReferenceError::NoFeatures);
    }

    let n_rows = df.height();
    let mut feature_names = Vec::with_capacity(feature_columns.len());
    let mut buffer = Vec::with_capacity(n_rows * feature_columns.len());
    for column in feature_columns {
        let name = column.name().as_str().to_string();
        buffer.extend(numeric_values(column, &name)?);
        feature_names.push(name);
    }
    let features = Array2::from_shape_vec((n_rows, feature_names.len()).f(), buffer)
        .map_err(|e| ReferenceError::ShapeMismatch(e.to_string()))?;

    let dataset = ReferenceDataset::new(feature_names, sample_ids, features, labels)?;
    let (virulent, avirulent) = dataset.class_counts();
    log::info!(
        "Loaded reference dataset '{}': {} samples ({virulent} virulent, {avirulent} avirulent), {} features",
        path.display(),
        dataset.n_samples(),
        dataset.feature_names().len()
    );
    Ok(dataset)
}

fn parse_labels(column: &Column) -> Result<Vec<VirulenceClass>, ReferenceError> {
    let text = column.cast(&DataType::String)?;
    text.str()?
        .into_iter()
        .enumerate()
        .map(|(i, value)| match value {
            Some(v) => v
                .parse::<VirulenceClass>()
                .map_err(|reason| ReferenceError::InvalidClass { row: i + 1, reason }),
            None => Err(ReferenceError::InvalidClass {
                row: i + 1,
                reason: "the class is missing".to_string(),
            }),
        })
        .collect()
}

fn numeric_values(column: &Column, name: &str) -> Result<Vec<f64>, ReferenceError> {
    if column.null_count() > 0 {
        return Err(ReferenceError::MissingValues(name.to_string()));
    }
    let casted = column.cast(&DataType::Float64)?;
    if casted.null_count() > 0 {
        let value = column
            .str()?
            .into_iter()
            .zip(casted.f64()?)
            .find_map(|(raw, parsed)| match (raw, parsed) {
                (Some(raw), None) => Some(raw.to_string()),
                _ => None,
            })
            .unwrap_or_default();
        return Err(ReferenceError::NonNumeric {
            column: name.to_string(),
            value,
        });
    }
    let chunked = casted.f64()?.rechunk();
    let values: Vec<f64> = chunked.into_no_null_iter().collect();
    if values.iter().any(|v| !v.is_finite()) {
        return Err(ReferenceError::NonFinite(name.to_string()));
    }
    Ok(values)
}
