//! The prediction report: one CSV row per sample, in input column order.
//!
//! The report is first written to a `.partial` sibling and renamed into place once it
//! is complete, so a failed run never leaves a truncated report behind.

use crate::types::{PredictionRecord, VirulenceClass};
use chrono::NaiveDate;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const REPORT_HEADER: [&str; 3] = ["SampleID", "Prediction", "Probability"];

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("Could not create output directory '{path}': {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Could not write report '{path}': {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("Could not move the finished report into place at '{path}': {source}")]
    Finalize {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Could not read report '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("Report '{path}' has an unexpected header: {found}")]
    Header { path: PathBuf, found: String },
    #[error("Report '{path}' line {line} is malformed: {reason}")]
    Row {
        path: PathBuf,
        line: u64,
        reason: String,
    },
}

/// `{prefix}_{YYYYMMDD}.csv`
pub fn report_file_name(prefix: &str, date: NaiveDate) -> String {
    format!("{prefix}_{}.csv", date.format("%Y%m%d"))
}

/// Writes `records` to `path`, creating the parent directory if needed. An existing
/// report at `path` is replaced.
pub fn write_report(path: &Path, records: &[PredictionRecord]) -> Result<(), ReportError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|source| ReportError::CreateDir {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    let partial = partial_path(path);
    if let Err(e) = write_rows(&partial, records) {
        let _ = fs::remove_file(&partial);
        return Err(ReportError::Write {
            path: path.to_path_buf(),
            source: e,
        });
    }
    if let Err(source) = fs::rename(&partial, path) {
        let _ = fs::remove_file(&partial);
        return Err(ReportError::Finalize {
            path: path.to_path_buf(),
            source,
        });
    }
    log::info!("Wrote {} predictions to {}", records.len(), path.display());
    Ok(())
}

fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".partial");
    path.with_file_name(name)
}

fn write_rows(path: &Path, records: &[PredictionRecord]) -> Result<(), csv::Error> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(REPORT_HEADER)?;
    for record in records {
        writer.write_record([
            record.sample_id.as_str(),
            record.prediction.as_str(),
            &record.probability.to_string(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

/// Parses a report written by [`write_report`].
pub fn read_report(path: &Path) -> Result<Vec<PredictionRecord>, ReportError> {
    let read_error = |source| ReportError::Read {
        path: path.to_path_buf(),
        source,
    };
    let mut reader = csv::Reader::from_path(path).map_err(read_error)?;
    let header = reader.headers().map_err(read_error)?;
    if header.iter().ne(REPORT_HEADER) {
        return Err(ReportError::Header {
            path: path.to_path_buf(),
            found: header.iter().collect::<Vec<_>>().join(","),
        });
    }

    let mut records = Vec::new();
    for row in reader.records() {
        let row = row.map_err(read_error)?;
        let line = row.position().map_or(0, |p| p.line());
        let malformed = |reason: String| ReportError::Row {
            path: path.to_path_buf(),
            line,
            reason,
        };
        let prediction = row[1].parse::<VirulenceClass>().map_err(malformed)?;
        let probability = row[2]
            .parse::<f64>()
            .map_err(|e| malformed(format!("probability '{}': {e}", &row[2])))?;
        records.push(PredictionRecord {
            sample_id: row[0].to_string(),
            prediction,
            probability,
        });
    }
    Ok(records)
}
