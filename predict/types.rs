// ========================================================================================
//                             High-Level Data Contracts
// ========================================================================================

// This file is ONLY for types that are SHARED BETWEEN FILES, not types that only are used in one file.

use ahash::AHashSet;
use ndarray::{Array2, ArrayView1};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// How the expression values were produced, which decides the enrichment kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ExpressionFormat {
    /// Continuous, already-normalized expression (Gaussian kernel).
    #[default]
    Normalize,
    /// Raw integer read counts (Poisson kernel).
    Counts,
}

impl fmt::Display for ExpressionFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Normalize => f.write_str("Normalize"),
            Self::Counts => f.write_str("Counts"),
        }
    }
}

/// The two classes the classifier separates. `Virulent` is the positive class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VirulenceClass {
    Virulent,
    Avirulent,
}

impl VirulenceClass {
    #[inline]
    pub fn is_positive(self) -> bool {
        matches!(self, Self::Virulent)
    }

    /// The +1 / -1 encoding used by the support-vector solver.
    #[inline]
    pub fn sign(self) -> f64 {
        if self.is_positive() { 1.0 } else { -1.0 }
    }

    #[inline]
    pub fn from_decision(decision_value: f64) -> Self {
        if decision_value > 0.0 {
            Self::Virulent
        } else {
            Self::Avirulent
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Virulent => "Virulent",
            Self::Avirulent => "Avirulent",
        }
    }
}

impl fmt::Display for VirulenceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VirulenceClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.eq_ignore_ascii_case("virulent") {
            Ok(Self::Virulent)
        } else if trimmed.eq_ignore_ascii_case("avirulent") {
            Ok(Self::Avirulent)
        } else {
            Err(format!(
                "Unrecognized class label '{trimmed}'. Expected 'Virulent' or 'Avirulent'."
            ))
        }
    }
}

/// A structural problem with a labelled matrix.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MatrixError {
    #[error("Matrix has {rows} rows and {cols} columns; both dimensions must be non-empty.")]
    Empty { rows: usize, cols: usize },
    #[error("Row label '{0}' appears more than once.")]
    DuplicateRowLabel(String),
    #[error("Column label '{0}' appears more than once.")]
    DuplicateColumnLabel(String),
    #[error(
        "Values have shape {found_rows}x{found_cols} but {label_rows} row labels and {label_cols} column labels were supplied."
    )]
    ShapeMismatch {
        found_rows: usize,
        found_cols: usize,
        label_rows: usize,
        label_cols: usize,
    },
}

/// A dense numeric matrix with unique row and column labels.
///
/// Both the expression matrix (genes x samples) and the enrichment score matrix
/// (gene sets x samples) use this representation; the column labels are always the
/// sample identifiers, in input order.
#[derive(Debug, Clone, PartialEq)]
pub struct LabeledMatrix {
    row_labels: Vec<String>,
    column_labels: Vec<String>,
    values: Array2<f64>,
}

/// Genes as rows, samples as columns.
pub type ExpressionMatrix = LabeledMatrix;

/// Gene sets as rows, samples as columns.
pub type ScoreMatrix = LabeledMatrix;

impl LabeledMatrix {
    pub fn new(
        row_labels: Vec<String>,
        column_labels: Vec<String>,
        values: Array2<f64>,
    ) -> Result<Self, MatrixError> {
        if values.nrows() != row_labels.len() || values.ncols() != column_labels.len() {
            return Err(MatrixError::ShapeMismatch {
                found_rows: values.nrows(),
                found_cols: values.ncols(),
                label_rows: row_labels.len(),
                label_cols: column_labels.len(),
            });
        }
        if row_labels.is_empty() || column_labels.is_empty() {
            return Err(MatrixError::Empty {
                rows: row_labels.len(),
                cols: column_labels.len(),
            });
        }
        if let Some(dup) = first_duplicate(&row_labels) {
            return Err(MatrixError::DuplicateRowLabel(dup));
        }
        if let Some(dup) = first_duplicate(&column_labels) {
            return Err(MatrixError::DuplicateColumnLabel(dup));
        }
        Ok(Self {
            row_labels,
            column_labels,
            values,
        })
    }

    pub fn row_labels(&self) -> &[String] {
        &self.row_labels
    }

    pub fn column_labels(&self) -> &[String] {
        &self.column_labels
    }

    pub fn values(&self) -> &Array2<f64> {
        &self.values
    }

    pub fn nrows(&self) -> usize {
        self.values.nrows()
    }

    pub fn ncols(&self) -> usize {
        self.values.ncols()
    }

    pub fn row_index(&self, label: &str) -> Option<usize> {
        self.row_labels.iter().position(|l| l == label)
    }

    pub fn row(&self, label: &str) -> Option<ArrayView1<'_, f64>> {
        self.row_index(label).map(|idx| self.values.row(idx))
    }
}

/// The first label that occurs more than once, if any.
pub fn first_duplicate(labels: &[String]) -> Option<String> {
    let mut seen = AHashSet::with_capacity(labels.len());
    labels
        .iter()
        .find(|label| !seen.insert(label.as_str()))
        .cloned()
}

/// One output row: a sample, its predicted class and the probability of `Virulent`.
#[derive(Debug, Clone, PartialEq)]
pub struct PredictionRecord {
    pub sample_id: String,
    pub prediction: VirulenceClass,
    pub probability: f64,
}
