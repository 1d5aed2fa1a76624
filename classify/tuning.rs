//! Cross-validated selection of the kernel width and cost for a reduced feature set.

use crate::classify::scaling::Standardizer;
use crate::classify::svm::{KernelSvm, SvmError};
use crate::config::{ClassifierSettings, HyperParameters};
use ndarray::{Array1, ArrayView2, Axis};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

/// Result of a grid search.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TuningOutcome {
    pub best: HyperParameters,
    /// Mean balanced accuracy of `best` across folds.
    pub score: f64,
}

/// Assigns each row to one of `k` folds so that both classes are spread as evenly as
/// possible. The assignment depends only on the labels, `k` and `seed`.
pub fn stratified_folds(signs: &[f64], k: usize, seed: u64) -> Vec<usize> {
    let k = k.max(1);
    let mut rng = StdRng::seed_from_u64(seed);
    let mut assignment = vec![0; signs.len()];
    let mut offset = 0;
    for positive in [true, false] {
        let mut members: Vec<usize> = (0..signs.len())
            .filter(|&i| (signs[i] > 0.0) == positive)
            .collect();
        members.shuffle(&mut rng);
        for (position, &row) in members.iter().enumerate() {
            assignment[row] = (offset + position) % k;
        }
        // The second class continues the round-robin where the first one stopped.
        offset = (offset + members.len()) % k;
    }
    assignment
}

/// Trains on `train_rows` and returns decision values for `test_rows`. Standardization
/// statistics come from the training rows only. A training fold holding a single
/// class predicts that class for every test row with decision value +1 or -1.
pub fn fold_decision_values(
    train_rows: ArrayView2<f64>,
    train_signs: &[f64],
    test_rows: ArrayView2<f64>,
    params: HyperParameters,
) -> Result<Array1<f64>, SvmError> {
    let first = train_signs.first().copied().unwrap_or(1.0);
    if train_signs.iter().all(|&y| y == first) {
        return Ok(Array1::from_elem(test_rows.nrows(), first.signum()));
    }
    let scaler = Standardizer::fit(train_rows);
    let svm = KernelSvm::train(scaler.transform(train_rows).view(), train_signs, params)?;
    Ok(svm.decision_values(scaler.transform(test_rows).view()))
}

/// Mean per-class recall over the classes present in `truth`. With a single class
/// present this is plain accuracy.
pub fn balanced_accuracy(truth: &[f64], decisions: &[f64]) -> f64 {
    let mut recalls = Vec::with_capacity(2);
    for positive in [true, false] {
        let mut hits = 0usize;
        let mut total = 0usize;
        for (&y, &f) in truth.iter().zip(decisions) {
            if (y > 0.0) == positive {
                total += 1;
                if (f > 0.0) == positive {
                    hits += 1;
                }
            }
        }
        if total > 0 {
            recalls.push(hits as f64 / total as f64);
        }
    }
    if recalls.is_empty() {
        0.0
    } else {
        recalls.iter().sum::<f64>() / recalls.len() as f64
    }
}

/// Cross-validated score of one hyperparameter pair.
pub fn cross_validate(
    rows: ArrayView2<f64>,
    signs: &[f64],
    folds: &[usize],
    params: HyperParameters,
) -> Result<f64, SvmError> {
    let n_folds = folds.iter().copied().max().map_or(0, |m| m + 1);
    let mut total = 0.0;
    let mut evaluated = 0usize;
    for fold in 0..n_folds {
        let (test, train): (Vec<usize>, Vec<usize>) =
            (0..signs.len()).partition(|&i| folds[i] == fold);
        if test.is_empty() || train.is_empty() {
            continue;
        }
        let train_signs: Vec<f64> = train.iter().map(|&i| signs[i]).collect();
        let test_signs: Vec<f64> = test.iter().map(|&i| signs[i]).collect();
        let decisions = fold_decision_values(
            rows.select(Axis(0), &train).view(),
            &train_signs,
            rows.select(Axis(0), &test).view(),
            params,
        )?
        .to_vec();
        total += balanced_accuracy(&test_signs, &decisions);
        evaluated += 1;
    }
    Ok(if evaluated == 0 { 0.0 } else { total / evaluated as f64 })
}

/// Searches `sigma_grid x cost_grid` with stratified k-fold cross-validation.
///
/// The highest mean balanced accuracy wins. Ties go to the smaller cost, then the
/// smaller kernel width.
pub fn grid_search(
    rows: ArrayView2<f64>,
    signs: &[f64],
    settings: &ClassifierSettings,
) -> Result<TuningOutcome, SvmError> {
    let k = settings.folds.min(signs.len()).max(2);
    let folds = stratified_folds(signs, k, settings.seed);

    let mut costs = settings.cost_grid.clone();
    costs.sort_by(f64::total_cmp);
    let mut sigmas = settings.sigma_grid.clone();
    sigmas.sort_by(f64::total_cmp);

    let mut best: Option<TuningOutcome> = None;
    for &cost in &costs {
        for &sigma in &sigmas {
            let params = HyperParameters { sigma, cost };
            let score = cross_validate(rows, signs, &folds, params)?;
            log::debug!("Grid point sigma = {sigma}, cost = {cost}: balanced accuracy {score:.4}");
            if best.is_none_or(|b| score > b.score) {
                best = Some(TuningOutcome { best: params, score });
            }
        }
    }

    let outcome = best.ok_or(SvmError::EmptyGrid)?;
    log::info!(
        "Selected sigma = {}, cost = {} by {k}-fold cross-validation (balanced accuracy {:.3})",
        outcome.best.sigma,
        outcome.best.cost,
        outcome.score
    );
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn labels(n_pos: usize, n_neg: usize) -> Vec<f64> {
        std::iter::repeat_n(1.0, n_pos)
            .chain(std::iter::repeat_n(-1.0, n_neg))
            .collect()
    }

    #[test]
    fn folds_are_stratified_and_reproducible() {
        let signs = labels(10, 10);
        let folds = stratified_folds(&signs, 5, 7);
        assert_eq!(folds, stratified_folds(&signs, 5, 7));
        for fold in 0..5 {
            let pos = (0..20).filter(|&i| folds[i] == fold && signs[i] > 0.0).count();
            let neg = (0..20).filter(|&i| folds[i] == fold && signs[i] < 0.0).count();
            assert_eq!((pos, neg), (2, 2), "fold {fold}");
        }
    }

    #[test]
    fn balanced_accuracy_weighs_classes_equally() {
        let truth = [1.0, 1.0, 1.0, -1.0];
        // All positives right, the only negative wrong: (1 + 0) / 2.
        assert_eq!(balanced_accuracy(&truth, &[0.5, 0.2, 0.9, 0.3]), 0.5);
        // Single class present degenerates to accuracy.
        assert_eq!(balanced_accuracy(&[1.0, 1.0], &[0.5, -0.5]), 0.5);
    }

    #[test]
    fn single_class_training_fold_predicts_that_class() {
        let train = Array2::from_shape_vec((2, 1), vec![0.0, 1.0]).unwrap();
        let test = Array2::from_shape_vec((3, 1), vec![5.0, -5.0, 0.0]).unwrap();
        let params = HyperParameters { sigma: 0.1, cost: 1.0 };
        let decisions = fold_decision_values(train.view(), &[-1.0, -1.0], test.view(), params).unwrap();
        assert!(decisions.iter().all(|&f| f == -1.0));
    }

    #[test]
    fn grid_search_separates_shifted_classes() {
        let signs = labels(10, 10);
        let rows = Array2::from_shape_fn((20, 3), |(i, j)| {
            let shift = if signs[i] > 0.0 { 2.0 } else { -2.0 };
            shift + ((i * 3 + j * 5) % 7) as f64 * 0.1
        });
        let settings = ClassifierSettings::default();
        let outcome = grid_search(rows.view(), &signs, &settings).unwrap();
        assert_eq!(outcome.score, 1.0);
        assert!(settings.cost_grid.contains(&outcome.best.cost));
        assert!(settings.sigma_grid.contains(&outcome.best.sigma));
    }

    #[test]
    fn ties_prefer_smaller_cost_then_smaller_sigma() {
        // Two rows per class and two folds: every fold trains on one row of each
        // class, so every grid point scores the same and the first one is kept.
        let signs = labels(2, 2);
        let rows = Array2::from_shape_vec((4, 1), vec![1.0, 1.2, -1.0, -1.2]).unwrap();
        let settings = ClassifierSettings {
            sigma_grid: vec![0.5, 0.1],
            cost_grid: vec![4.0, 1.0],
            folds: 2,
            ..ClassifierSettings::default()
        };
        let outcome = grid_search(rows.view(), &signs, &settings).unwrap();
        assert_eq!(outcome.best, HyperParameters { sigma: 0.1, cost: 1.0 });
    }
}
