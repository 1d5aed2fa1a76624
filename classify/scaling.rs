use ndarray::{Array1, Array2, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

/// Per-feature centering and scaling learned from training rows only.
///
/// Features that do not vary in the training data keep a scale of 1 so they are
/// centered but never divided by zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Standardizer {
    pub mean: Array1<f64>,
    pub scale: Array1<f64>,
}

impl Standardizer {
    /// Learns mean and sample standard deviation of each column of `rows`
    /// (samples x features).
    pub fn fit(rows: ArrayView2<f64>) -> Self {
        let n = rows.nrows();
        let mean = rows
            .mean_axis(Axis(0))
            .unwrap_or_else(|| Array1::zeros(rows.ncols()));
        let scale = if n < 2 {
            Array1::ones(rows.ncols())
        } else {
            let centered = &rows - &mean;
            centered
                .mapv(|v| v * v)
                .sum_axis(Axis(0))
                .mapv(|ss| {
                    let sd = (ss / (n - 1) as f64).sqrt();
                    if sd > f64::EPSILON { sd } else { 1.0 }
                })
        };
        Self { mean, scale }
    }

    pub fn n_features(&self) -> usize {
        self.mean.len()
    }

    pub fn transform(&self, rows: ArrayView2<f64>) -> Array2<f64> {
        (&rows - &self.mean) / &self.scale
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn transformed_training_rows_have_zero_mean_unit_variance() {
        let rows = array![[1.0, 10.0, 3.0], [2.0, 20.0, 3.0], [3.0, 30.0, 3.0], [6.0, 0.0, 3.0]];
        let scaler = Standardizer::fit(rows.view());
        let z = scaler.transform(rows.view());
        for col in 0..2 {
            let column = z.column(col);
            assert_abs_diff_eq!(column.sum(), 0.0, epsilon = 1e-12);
            let var = column.mapv(|v| v * v).sum() / 3.0;
            assert_abs_diff_eq!(var, 1.0, epsilon = 1e-12);
        }
        // Constant column: centered, scale left at 1.
        assert_abs_diff_eq!(scaler.scale[2], 1.0);
        assert!(z.column(2).iter().all(|&v| v == 0.0));
    }

    #[test]
    fn unseen_rows_use_training_statistics() {
        let train = array![[0.0], [2.0]];
        let scaler = Standardizer::fit(train.view());
        let z = scaler.transform(array![[4.0]].view());
        // mean 1, sd sqrt(2)
        assert_abs_diff_eq!(z[[0, 0]], 3.0 / 2f64.sqrt(), epsilon = 1e-12);
    }
}
