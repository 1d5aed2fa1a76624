//! # Gene-Set Variation Analysis
//!
//! Turns a genes x samples expression matrix into a gene-sets x samples enrichment
//! score matrix, sample by sample and without reference to any phenotype.
//!
//! 1. Every gene's expression is compared against its own distribution across all
//!    samples through a kernel estimate of the cumulative distribution function:
//!    a Gaussian kernel for continuous data, a Poisson kernel for read counts. The
//!    estimate is mapped onto the log-odds scale.
//! 2. Within each sample, genes are ranked by that statistic and given symmetric
//!    rank weights, so both strongly up- and strongly down-regulated genes count.
//! 3. A Kolmogorov-Smirnov-like random walk over the ranking compares the genes of
//!    a set against all other genes. The enrichment score is the sum of the largest
//!    positive and largest negative deviation of the walk.
//!
//! Work is spread over the rayon pool of the calling phase; every unit (one gene in
//! step 1, one sample in steps 2-3) is independent and results are collected in
//! index order, so the output does not depend on the number of workers.

use crate::config::ScoringSettings;
use crate::enrich::genesets::GeneSetCollection;
use crate::types::{ExpressionFormat, ExpressionMatrix, MatrixError, ScoreMatrix};
use crate::workers::WorkerPoolError;
use ahash::AHashMap;
use ndarray::{Array2, ArrayView1, Axis};
use rayon::prelude::*;
use statrs::distribution::{ContinuousCDF, DiscreteCDF, Normal, Poisson};
use thiserror::Error;

/// Bandwidth of the Gaussian kernel is the gene's standard deviation divided by this.
const SIGMA_FACTOR: f64 = 4.0;
/// Offset added to each observed count to form the Poisson kernel rate.
const POISSON_BANDWIDTH: f64 = 0.5;
/// Keeps kernel CDF values strictly inside (0, 1) before the log-odds transform.
const CDF_CLAMP: f64 = 1e-15;

#[derive(Error, Debug)]
pub enum ScoringError {
    #[error("Enrichment scoring needs at least 2 samples to estimate gene distributions, found {0}.")]
    TooFewSamples(usize),
    #[error("All {0} genes are constant across samples; there is nothing to score.")]
    NoVariableGenes(usize),
    #[error(
        "None of the {total} gene sets has at least {min_size} member genes present in the input."
    )]
    NoScorableGeneSets { total: usize, min_size: usize },
    #[error(
        "Counts mode requires non-negative expression values, but gene '{gene}' has {value} in sample '{sample}'."
    )]
    NegativeCount {
        gene: String,
        sample: String,
        value: f64,
    },
    #[error("Kernel density estimation failed for gene '{gene}': {reason}")]
    Kernel { gene: String, reason: String },
    #[error(transparent)]
    WorkerPool(#[from] WorkerPoolError),
    #[error("Score matrix could not be assembled: {0}")]
    Matrix(#[from] MatrixError),
}

/// Scores every gene set of `collection` that has enough members in `expression`.
///
/// Must be called inside the scoring phase's worker pool to run in parallel; it is
/// also correct, and produces identical values, when called from any other thread.
pub fn score_gene_sets(
    expression: &ExpressionMatrix,
    collection: &GeneSetCollection,
    format: ExpressionFormat,
    settings: &ScoringSettings,
) -> Result<ScoreMatrix, ScoringError> {
    let n_samples = expression.ncols();
    if n_samples < 2 {
        return Err(ScoringError::TooFewSamples(n_samples));
    }
    if format == ExpressionFormat::Counts {
        check_non_negative(expression)?;
    }

    // Constant genes carry no information and break the Gaussian bandwidth.
    let variable_rows: Vec<usize> = expression
        .values()
        .axis_iter(Axis(0))
        .enumerate()
        .filter(|(_, row)| !is_constant(*row))
        .map(|(idx, _)| idx)
        .collect();
    if variable_rows.is_empty() {
        return Err(ScoringError::NoVariableGenes(expression.nrows()));
    }
    let dropped = expression.nrows() - variable_rows.len();
    if dropped > 0 {
        log::warn!("{dropped} genes are constant across all samples and were excluded from scoring");
    }

    let genes: Vec<&str> = variable_rows
        .iter()
        .map(|&idx| expression.row_labels()[idx].as_str())
        .collect();
    let filtered = expression.values().select(Axis(0), &variable_rows);

    let (set_names, set_members) = map_gene_sets(&genes, collection, settings.min_set_size);
    if set_names.is_empty() {
        return Err(ScoringError::NoScorableGeneSets {
            total: collection.len(),
            min_size: settings.min_set_size,
        });
    }
    log::info!(
        "Scoring {} of {} gene sets (minimum size {}) over {} genes and {} samples using the {} kernel",
        set_names.len(),
        collection.len(),
        settings.min_set_size,
        genes.len(),
        n_samples,
        match format {
            ExpressionFormat::Normalize => "Gaussian",
            ExpressionFormat::Counts => "Poisson",
        }
    );

    let statistics = kernel_cdf_log_odds(&filtered, &genes, format)?;

    let per_sample: Vec<Vec<f64>> = (0..n_samples)
        .into_par_iter()
        .map(|sample_idx| {
            let column = statistics.column(sample_idx);
            let (order, rank_weights) = order_and_rank_weights(column);
            set_members
                .iter()
                .map(|members| {
                    enrichment_score(members, &order, &rank_weights, settings.tau, settings.max_diff)
                })
                .collect()
        })
        .collect();

    let mut scores = Array2::zeros((set_names.len(), n_samples));
    for (sample_idx, sample_scores) in per_sample.into_iter().enumerate() {
        for (set_idx, score) in sample_scores.into_iter().enumerate() {
            scores[[set_idx, sample_idx]] = score;
        }
    }

    Ok(ScoreMatrix::new(
        set_names,
        expression.column_labels().to_vec(),
        scores,
    )?)
}

fn check_non_negative(expression: &ExpressionMatrix) -> Result<(), ScoringError> {
    for ((gene_idx, sample_idx), &value) in expression.values().indexed_iter() {
        if value < 0.0 {
            return Err(ScoringError::NegativeCount {
                gene: expression.row_labels()[gene_idx].clone(),
                sample: expression.column_labels()[sample_idx].clone(),
                value,
            });
        }
    }
    Ok(())
}

fn is_constant(row: ArrayView1<f64>) -> bool {
    match row.first() {
        Some(&first) => row.iter().all(|&v| v == first),
        None => true,
    }
}

/// Maps each gene set onto row indices of `genes`, keeping sets with at least
/// `min_size` members present. Sets stay in collection order.
fn map_gene_sets(
    genes: &[&str],
    collection: &GeneSetCollection,
    min_size: usize,
) -> (Vec<String>, Vec<Vec<usize>>) {
    let index: AHashMap<&str, usize> = genes.iter().enumerate().map(|(i, &g)| (g, i)).collect();

    let mut names = Vec::new();
    let mut members = Vec::new();
    for (name, set_genes) in collection.iter() {
        let present: Vec<usize> = set_genes
            .iter()
            .filter_map(|g| index.get(g.as_str()).copied())
            .collect();
        if present.len() >= min_size {
            names.push(name.to_string());
            members.push(present);
        } else {
            log::debug!(
                "Gene set {name} skipped: {} of {} genes present",
                present.len(),
                set_genes.len()
            );
        }
    }
    (names, members)
}

fn sample_standard_deviation(row: ArrayView1<f64>) -> f64 {
    let n = row.len() as f64;
    let mean = row.sum() / n;
    let ss: f64 = row.iter().map(|&v| (v - mean) * (v - mean)).sum();
    (ss / (n - 1.0)).sqrt()
}

/// For every gene and sample, the log-odds of the kernel-estimated CDF of that
/// gene's expression evaluated at the sample's value.
fn kernel_cdf_log_odds(
    values: &Array2<f64>,
    genes: &[&str],
    format: ExpressionFormat,
) -> Result<Array2<f64>, ScoringError> {
    let n_samples = values.ncols();
    let rows: Vec<Vec<f64>> = (0..values.nrows())
        .into_par_iter()
        .map(|gene_idx| {
            let row = values.row(gene_idx);
            let kernel_error = |reason: String| ScoringError::Kernel {
                gene: genes[gene_idx].to_string(),
                reason,
            };
            match format {
                ExpressionFormat::Normalize => {
                    let bandwidth = sample_standard_deviation(row) / SIGMA_FACTOR;
                    let kernel = Normal::new(0.0, bandwidth).map_err(|e| kernel_error(e.to_string()))?;
                    Ok(row
                        .iter()
                        .map(|&x| {
                            let left_tail =
                                row.iter().map(|&y| kernel.cdf(x - y)).sum::<f64>() / n_samples as f64;
                            log_odds(left_tail)
                        })
                        .collect())
                }
                ExpressionFormat::Counts => {
                    let kernels = row
                        .iter()
                        .map(|&y| Poisson::new(y + POISSON_BANDWIDTH))
                        .collect::<Result<Vec<_>, _>>()
                        .map_err(|e| kernel_error(e.to_string()))?;
                    Ok(row
                        .iter()
                        .map(|&x| {
                            let k = x.floor() as u64;
                            let left_tail =
                                kernels.iter().map(|p| p.cdf(k)).sum::<f64>() / n_samples as f64;
                            log_odds(left_tail)
                        })
                        .collect())
                }
            }
        })
        .collect::<Result<_, ScoringError>>()?;

    let mut out = Array2::zeros((values.nrows(), n_samples));
    for (gene_idx, row) in rows.into_iter().enumerate() {
        for (sample_idx, v) in row.into_iter().enumerate() {
            out[[gene_idx, sample_idx]] = v;
        }
    }
    Ok(out)
}

#[inline]
fn log_odds(left_tail: f64) -> f64 {
    let p = left_tail.clamp(CDF_CLAMP, 1.0 - CDF_CLAMP);
    -((1.0 - p) / p).ln()
}

/// Orders genes by decreasing statistic (ties keep gene order) and computes the
/// symmetric rank weight `|n - r - n/2|` of each gene, with `r` its 0-based rank.
fn order_and_rank_weights(statistic: ArrayView1<f64>) -> (Vec<usize>, Vec<f64>) {
    let n = statistic.len();
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| statistic[b].total_cmp(&statistic[a]).then(a.cmp(&b)));

    let half = n as f64 / 2.0;
    let mut weights = vec![0.0; n];
    for (rank, &gene_idx) in order.iter().enumerate() {
        weights[gene_idx] = (n as f64 - rank as f64 - half).abs();
    }
    (order, weights)
}

/// Random-walk enrichment of one gene set in one sample's ranking.
fn enrichment_score(
    members: &[usize],
    order: &[usize],
    rank_weights: &[f64],
    tau: f64,
    max_diff: bool,
) -> f64 {
    let n = order.len();
    let mut in_set = vec![false; n];
    for &gene_idx in members {
        in_set[gene_idx] = true;
    }

    let total_in: f64 = members
        .iter()
        .map(|&g| weight(rank_weights[g], tau))
        .sum();
    let total_out = (n - members.len()) as f64;
    if total_in <= 0.0 || total_out <= 0.0 {
        return 0.0;
    }

    let mut running_in = 0.0;
    let mut running_out = 0.0;
    let mut max_pos = 0.0f64;
    let mut max_neg = 0.0f64;
    for &gene_idx in order {
        if in_set[gene_idx] {
            running_in += weight(rank_weights[gene_idx], tau);
        } else {
            running_out += 1.0;
        }
        let walk = running_in / total_in - running_out / total_out;
        max_pos = max_pos.max(walk);
        max_neg = max_neg.min(walk);
    }

    if max_diff {
        max_pos + max_neg
    } else if max_pos > max_neg.abs() {
        max_pos
    } else {
        max_neg
    }
}

#[inline]
fn weight(rank_weight: f64, tau: f64) -> f64 {
    if tau == 1.0 { rank_weight } else { rank_weight.powf(tau) }
}
