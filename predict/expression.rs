//! # Expression Matrix Loading
//!
//! The only entry point for user-provided expression data. A delimited text file
//! with genes as rows and samples as columns is read with `polars` and turned into
//! an [`ExpressionMatrix`].
//!
//! - Delimiter fallback: the file is first read as tab-separated; if that fails or
//!   yields no sample columns, it is re-read as comma-separated.
//! - Every cell is read as text and sample columns are converted afterwards, so the
//!   result never depends on how many leading rows a type guess would look at.
//! - Header: the raw header row must not repeat a name.
//! - Row labels: the first column must hold gene identifiers. A first column made
//!   of decimal numbers, or any empty label, means the row labels are absent.
//! - Values: every sample column must be numeric, complete and finite.

use crate::types::{ExpressionMatrix, MatrixError, first_duplicate};
use ndarray::{Array2, ShapeBuilder};
use polars::prelude::*;
use std::fs::File;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExpressionError {
    #[error("Could not open expression file '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(
        "Expression file '{path}' could not be parsed as tab-separated ({tab}) or comma-separated ({comma}) text."
    )]
    Unparseable {
        path: PathBuf,
        tab: String,
        comma: String,
    },
    #[error("Could not read the header row of expression file '{path}': {source}")]
    Header {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error(
        "Expression file '{0}' has no sample columns. Expected a gene identifier column followed by one column per sample."
    )]
    NoSampleColumns(PathBuf),
    #[error("Expression file '{0}' contains no gene rows.")]
    NoGenes(PathBuf),
    #[error("Row labels are absent: {0}")]
    RowLabelsAbsent(String),
    #[error("Missing values were found in sample column '{0}'.")]
    MissingValues(String),
    #[error("Sample column '{sample}' is not numeric (found '{value}').")]
    NonNumeric { sample: String, value: String },
    #[error("Non-finite values (NaN or Infinity) were found in sample column '{0}'.")]
    NonFinite(String),
    #[error("Malformed expression matrix: {0}")]
    Matrix(#[from] MatrixError),
}

/// Reads an expression matrix, trying tab and then comma as the delimiter.
pub fn load_expression_matrix(path: &Path) -> Result<ExpressionMatrix, ExpressionError> {
    // Surface a missing or unreadable file directly instead of as a parse failure.
    File::open(path).map_err(|source| ExpressionError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let (df, separator) = match read_delimited(path, b'\t') {
        Ok(df) if df.width() >= 2 => (df, b'\t'),
        first_attempt => {
            let tab_reason = match first_attempt {
                Ok(_) => "only one column".to_string(),
                Err(e) => e.to_string(),
            };
            log::debug!(
                "Tab-separated read of '{}' unusable ({tab_reason}); retrying with commas",
                path.display()
            );
            match read_delimited(path, b',') {
                Ok(df) if df.width() >= 2 => (df, b','),
                Ok(df) if df.width() == 1 && tab_reason == "only one column" => {
                    return Err(ExpressionError::NoSampleColumns(path.to_path_buf()));
                }
                Ok(_) => {
                    return Err(ExpressionError::Unparseable {
                        path: path.to_path_buf(),
                        tab: tab_reason,
                        comma: "only one column".to_string(),
                    });
                }
                Err(e) => {
                    return Err(ExpressionError::Unparseable {
                        path: path.to_path_buf(),
                        tab: tab_reason,
                        comma: e.to_string(),
                    });
                }
            }
        }
    };

    // polars renames repeated header names, so duplicates are only visible in the raw row.
    let header = read_header(path, separator)?;
    if let Some(dup) = first_duplicate(&header) {
        return Err(MatrixError::DuplicateColumnLabel(dup).into());
    }

    if df.height() == 0 {
        return Err(ExpressionError::NoGenes(path.to_path_buf()));
    }

    let columns = df.get_columns();
    let genes = extract_row_labels(&columns[0])?;

    let n_genes = genes.len();
    let n_samples = columns.len() - 1;
    let mut samples = Vec::with_capacity(n_samples);
    let mut buffer = Vec::with_capacity(n_genes * n_samples);
    for column in &columns[1..] {
        let name = column.name().as_str().to_string();
        let mut values = extract_numeric_column(column, &name)?;
        buffer.append(&mut values);
        samples.push(name);
    }

    let values = Array2::from_shape_vec((n_genes, n_samples).f(), buffer).map_err(|_| {
        MatrixError::ShapeMismatch {
            found_rows: n_genes,
            found_cols: n_samples,
            label_rows: n_genes,
            label_cols: n_samples,
        }
    })?;

    let matrix = ExpressionMatrix::new(genes, samples, values)?;
    log::info!(
        "Loaded expression matrix from '{}': {} genes x {} samples",
        path.display(),
        matrix.nrows(),
        matrix.ncols()
    );
    Ok(matrix)
}

/// Reads every column as text.
fn read_delimited(path: &Path, separator: u8) -> PolarsResult<DataFrame> {
    let file = File::open(path)?;
    CsvReader::new(file)
        .with_options(
            CsvReadOptions::default()
                .with_has_header(true)
                .with_infer_schema_length(Some(0))
                .with_parse_options(CsvParseOptions::default().with_separator(separator)),
        )
        .finish()
}

fn read_header(path: &Path, separator: u8) -> Result<Vec<String>, ExpressionError> {
    let header_error = |source| ExpressionError::Header {
        path: path.to_path_buf(),
        source,
    };
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(separator)
        .has_headers(false)
        .flexible(true)
        .from_path(path)
        .map_err(header_error)?;
    match reader.records().next() {
        Some(record) => Ok(record
            .map_err(header_error)?
            .iter()
            .map(str::to_string)
            .collect()),
        None => Ok(Vec::new()),
    }
}

fn extract_row_labels(column: &Column) -> Result<Vec<String>, ExpressionError> {
    let as_text = column.cast(&DataType::String).map_err(|e| {
        ExpressionError::RowLabelsAbsent(format!("the first column is not text: {e}"))
    })?;
    let text = as_text.str().map_err(|e| {
        ExpressionError::RowLabelsAbsent(format!("the first column is not text: {e}"))
    })?;

    let mut labels = Vec::with_capacity(text.len());
    for (idx, value) in text.into_iter().enumerate() {
        match value.map(str::trim) {
            Some(label) if !label.is_empty() => labels.push(label.to_string()),
            _ => {
                return Err(ExpressionError::RowLabelsAbsent(format!(
                    "data row {} has no gene identifier",
                    idx + 1
                )));
            }
        }
    }

    // Integer identifiers (Entrez IDs) are labels; a column of decimals is data.
    let all_numeric = labels.iter().all(|l| l.parse::<f64>().is_ok());
    let any_fractional = labels.iter().any(|l| l.parse::<i64>().is_err());
    if all_numeric && any_fractional {
        return Err(ExpressionError::RowLabelsAbsent(format!(
            "the first column '{}' holds decimal numbers instead of gene identifiers",
            column.name()
        )));
    }
    Ok(labels)
}

fn extract_numeric_column(column: &Column, name: &str) -> Result<Vec<f64>, ExpressionError> {
    if column.null_count() > 0 {
        return Err(ExpressionError::MissingValues(name.to_string()));
    }

    let casted = column.cast(&DataType::Float64).map_err(|e| ExpressionError::NonNumeric {
        sample: name.to_string(),
        value: e.to_string(),
    })?;
    if casted.null_count() > 0 {
        return Err(ExpressionError::NonNumeric {
            sample: name.to_string(),
            value: first_unparsed(column, &casted),
        });
    }

    let chunked = casted
        .f64()
        .map_err(|e| ExpressionError::NonNumeric {
            sample: name.to_string(),
            value: e.to_string(),
        })?
        .rechunk();
    let values: Vec<f64> = chunked.into_no_null_iter().collect();
    if values.iter().any(|v| !v.is_finite()) {
        return Err(ExpressionError::NonFinite(name.to_string()));
    }
    Ok(values)
}

/// The first original cell that did not survive the conversion to a number.
fn first_unparsed(original: &Column, casted: &Column) -> String {
    let (Ok(text), Ok(numbers)) = (original.str(), casted.f64()) else {
        return String::new();
    };
    text.into_iter()
        .zip(numbers)
        .find_map(|(raw, parsed)| match (raw, parsed) {
            (Some(raw), None) => Some(raw.to_string()),
            _ => None,
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_file(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{content}").unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn reads_tab_separated_matrix() {
        let file = write_file("gene\tS1\tS2\nMX1\t1.5\t2.5\nIFIT1\t0.0\t-1.0\n");
        let m = load_expression_matrix(file.path()).unwrap();
        assert_eq!(m.row_labels(), ["MX1", "IFIT1"]);
        assert_eq!(m.column_labels(), ["S1", "S2"]);
        assert_abs_diff_eq!(m.values()[[0, 1]], 2.5, epsilon = 1e-12);
        assert_abs_diff_eq!(m.values()[[1, 1]], -1.0, epsilon = 1e-12);
    }

    #[test]
    fn falls_back_to_comma_separated() {
        let file = write_file("gene,S1,S2,S3\nMX1,1,2,3\nIFIT1,4,5,6\n");
        let m = load_expression_matrix(file.path()).unwrap();
        assert_eq!(m.nrows(), 2);
        assert_eq!(m.ncols(), 3);
        assert_abs_diff_eq!(m.values()[[1, 2]], 6.0, epsilon = 1e-12);
    }

    #[test]
    fn integer_gene_identifiers_are_valid_labels() {
        let file = write_file("entrez\tS1\tS2\n4599\t1.0\t2.0\n3434\t3.0\t4.0\n");
        let m = load_expression_matrix(file.path()).unwrap();
        assert_eq!(m.row_labels(), ["4599", "3434"]);
    }

    #[test]
    fn decimal_first_column_means_labels_absent() {
        let file = write_file("a\tb\tc\n0.5\t1.0\t2.0\n1.5\t3.0\t4.0\n");
        let err = load_expression_matrix(file.path()).unwrap_err();
        assert!(matches!(err, ExpressionError::RowLabelsAbsent(_)), "{err:?}");
    }

    #[test]
    fn header_only_file_has_no_genes() {
        let file = write_file("gene\tS1\tS2\n");
        let err = load_expression_matrix(file.path()).unwrap_err();
        assert!(matches!(err, ExpressionError::NoGenes(_)), "{err:?}");
    }

    #[test]
    fn single_column_file_has_no_samples() {
        let file = write_file("gene\nMX1\nIFIT1\n");
        let err = load_expression_matrix(file.path()).unwrap_err();
        assert!(matches!(err, ExpressionError::NoSampleColumns(_)), "{err:?}");
    }

    #[test]
    fn duplicate_genes_are_rejected() {
        let file = write_file("gene\tS1\tS2\nMX1\t1\t2\nMX1\t3\t4\n");
        let err = load_expression_matrix(file.path()).unwrap_err();
        match err {
            ExpressionError::Matrix(MatrixError::DuplicateRowLabel(gene)) => {
                assert_eq!(gene, "MX1")
            }
            other => panic!("expected duplicate row label, got {other:?}"),
        }
    }

    #[test]
    fn duplicate_samples_are_rejected() {
        let file = write_file("gene\tS1\tS1\nMX1\t1\t2\nIFIT1\t3\t4\n");
        let err = load_expression_matrix(file.path()).unwrap_err();
        match err {
            ExpressionError::Matrix(MatrixError::DuplicateColumnLabel(sample)) => {
                assert_eq!(sample, "S1")
            }
            other => panic!("expected duplicate column label, got {other:?}"),
        }
    }

    #[test]
    fn late_decimal_after_many_integer_rows_is_read() {
        let mut content = String::from("gene\tS1\tS2\n");
        for g in 0..150 {
            let s1 = if g == 120 { "2.5".to_string() } else { g.to_string() };
            content.push_str(&format!("G{g}\t{s1}\t0\n"));
        }
        let file = write_file(&content);
        let m = load_expression_matrix(file.path()).unwrap();
        assert_eq!(m.nrows(), 150);
        assert_abs_diff_eq!(m.values()[[120, 0]], 2.5, epsilon = 1e-12);
        assert_abs_diff_eq!(m.values()[[149, 0]], 149.0, epsilon = 1e-12);
    }

    #[test]
    fn symbols_after_many_numeric_gene_ids_are_labels() {
        let mut content = String::from("gene,S1,S2\n");
        for g in 0..130 {
            let label = if g < 110 { format!("{}", 1000 + g) } else { format!("IFIT{g}") };
            content.push_str(&format!("{label},{g}.5,1\n"));
        }
        let file = write_file(&content);
        let m = load_expression_matrix(file.path()).unwrap();
        assert_eq!(m.row_labels()[0], "1000");
        assert_eq!(m.row_labels()[129], "IFIT129");
    }

    #[test]
    fn non_numeric_sample_is_named() {
        let file = write_file("gene\tS1\tS2\nMX1\t1\thigh\nIFIT1\t3\t4\n");
        let err = load_expression_matrix(file.path()).unwrap_err();
        match err {
            ExpressionError::NonNumeric { sample, value } => {
                assert_eq!(sample, "S2");
                assert_eq!(value, "high");
            }
            other => panic!("expected NonNumeric, got {other:?}"),
        }
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = load_expression_matrix(Path::new("/definitely/not/here.tsv")).unwrap_err();
        assert!(matches!(err, ExpressionError::Io { .. }));
    }
}
