//! Chunked, parallel application of a trained classifier to every input sample.

use crate::classify::model::{ModelError, TrainedModel};
use crate::types::{PredictionRecord, ScoreMatrix};
use crate::workers::{Phase, WorkerPoolError, with_phase_pool};
use ndarray::{Axis, s};
use rayon::prelude::*;
use std::ops::Range;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PredictionError {
    #[error("Model feature '{0}' has no enrichment scores for the input samples.")]
    MissingFeature(String),
    #[error("Prediction chunk size must be at least 1.")]
    InvalidChunkSize,
    #[error("Prediction failed for samples {first}..={last}: {source}")]
    Chunk {
        first: String,
        last: String,
        #[source]
        source: ModelError,
    },
    #[error(transparent)]
    WorkerPool(#[from] WorkerPoolError),
}

/// Contiguous sample ranges of at most `chunk_size` samples, in order.
pub fn sample_chunks(n_samples: usize, chunk_size: usize) -> Vec<Range<usize>> {
    (0..n_samples)
        .step_by(chunk_size.max(1))
        .map(|start| start..(start + chunk_size).min(n_samples))
        .collect()
}

/// Predicts every sample column of `scores` with `model`.
///
/// Samples are split into contiguous chunks processed on the prediction worker pool.
/// Records come back in input column order. The first failing chunk aborts the whole
/// phase and no records are returned.
pub fn predict_samples(
    model: &TrainedModel,
    scores: &ScoreMatrix,
    chunk_size: usize,
    threads: usize,
) -> Result<Vec<PredictionRecord>, PredictionError> {
    if chunk_size == 0 {
        return Err(PredictionError::InvalidChunkSize);
    }

    let rows: Vec<usize> = model
        .features
        .iter()
        .map(|feature| {
            scores
                .row_index(feature)
                .ok_or_else(|| PredictionError::MissingFeature(feature.clone()))
        })
        .collect::<Result<_, _>>()?;
    let feature_names: Vec<String> = rows.iter().map(|&r| scores.row_labels()[r].clone()).collect();
    // samples x features, in model feature order
    let design = scores.values().select(Axis(0), &rows).reversed_axes();
    let samples = scores.column_labels();

    let chunks = sample_chunks(samples.len(), chunk_size);
    log::info!(
        "Predicting {} samples in {} chunks of up to {chunk_size} on {threads} workers",
        samples.len(),
        chunks.len()
    );

    let per_chunk: Vec<Vec<PredictionRecord>> = with_phase_pool(threads, Phase::Prediction, || {
        chunks
            .par_iter()
            .map(|range| -> Result<Vec<PredictionRecord>, PredictionError> {
                let block = design.slice(s![range.clone(), ..]);
                let predictions =
                    model
                        .predict(&feature_names, block)
                        .map_err(|source| PredictionError::Chunk {
                            first: samples[range.start].clone(),
                            last: samples[range.end - 1].clone(),
                            source,
                        })?;
                Ok(samples[range.clone()]
                    .iter()
                    .zip(predictions)
                    .map(|(sample_id, (prediction, probability))| PredictionRecord {
                        sample_id: sample_id.clone(),
                        prediction,
                        probability,
                    })
                    .collect())
            })
            .collect::<Result<Vec<_>, PredictionError>>()
    })?;

    Ok(per_chunk.into_iter().flatten().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::reference::ReferenceDataset;
    use crate::config::ClassifierSettings;
    use crate::types::VirulenceClass;
    use approx::assert_abs_diff_eq;
    use ndarray::Array2;

    fn feature_names() -> Vec<String> {
        (0..3).map(|j| format!("GOBP_{j}")).collect()
    }

    fn model() -> TrainedModel {
        let labels: Vec<VirulenceClass> = (0..12)
            .map(|i| {
                if i < 6 {
                    VirulenceClass::Virulent
                } else {
                    VirulenceClass::Avirulent
                }
            })
            .collect();
        let features = Array2::from_shape_fn((12, 3), |(i, j)| {
            labels[i].sign() * (1.0 + j as f64 * 0.2) + ((i * 5 + j) % 4) as f64 * 0.15
        });
        let data = ReferenceDataset::new(
            feature_names(),
            (0..12).map(|i| format!("r{i}")).collect(),
            features,
            labels,
        )
        .unwrap();
        TrainedModel::fit_fixed(&data, &ClassifierSettings::default()).unwrap()
    }

    /// Gene sets x samples, with an unrelated extra gene set in the first row.
    fn scores(n_samples: usize) -> ScoreMatrix {
        let mut rows = vec!["GOBP_EXTRA".to_string()];
        rows.extend(feature_names().into_iter().rev());
        let values = Array2::from_shape_fn((4, n_samples), |(r, c)| {
            let direction = if c % 3 == 0 { -1.0 } else { 1.0 };
            direction * (0.5 + r as f64 * 0.1) + c as f64 * 0.01
        });
        ScoreMatrix::new(rows, (0..n_samples).map(|c| format!("S{c}")).collect(), values).unwrap()
    }

    #[test]
    fn chunking_never_changes_predictions() {
        let model = model();
        let scores = scores(11);
        let reference = predict_samples(&model, &scores, 64, 1).unwrap();
        assert_eq!(reference.len(), 11);
        for chunk_size in [1, 2, 3, 5, 11] {
            let chunked = predict_samples(&model, &scores, chunk_size, 3).unwrap();
            assert_eq!(chunked.len(), reference.len());
            for (a, b) in chunked.iter().zip(&reference) {
                assert_eq!(a.sample_id, b.sample_id);
                assert_eq!(a.prediction, b.prediction);
                assert_abs_diff_eq!(a.probability, b.probability, epsilon = 1e-9);
            }
        }
    }

    #[test]
    fn records_follow_input_column_order() {
        let records = predict_samples(&model(), &scores(7), 2, 2).unwrap();
        let ids: Vec<&str> = records.iter().map(|r| r.sample_id.as_str()).collect();
        assert_eq!(ids, ["S0", "S1", "S2", "S3", "S4", "S5", "S6"]);
    }

    #[test]
    fn missing_model_feature_is_reported() {
        let scores = ScoreMatrix::new(
            vec!["GOBP_0".into(), "GOBP_1".into()],
            vec!["S0".into()],
            Array2::zeros((2, 1)),
        )
        .unwrap();
        let err = predict_samples(&model(), &scores, 4, 1).unwrap_err();
        assert!(matches!(err, PredictionError::MissingFeature(f) if f == "GOBP_2"));
    }

    #[test]
    fn chunks_cover_all_samples_contiguously() {
        assert_eq!(sample_chunks(7, 3), vec![0..3, 3..6, 6..7]);
        assert_eq!(sample_chunks(3, 10), vec![0..3]);
        assert!(sample_chunks(0, 4).is_empty());
    }
}
