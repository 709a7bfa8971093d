//! Dense linear system solver

use crate::{MathError, Result};
use ndarray::{Array1, Array2};

const PIVOT_EPSILON: f64 = 1e-12;

/// Solve `a * x = b` by Gaussian elimination with partial pivoting.
///
/// `a` must be square with the same order as `b`.
pub fn solve(mut a: Array2<f64>, mut b: Array1<f64>) -> Result<Array1<f64>> {
    let n = b.len();
    if a.nrows() != n || a.ncols() != n {
        return Err(MathError::InvalidInput(format!(
            "Expected a {}x{} matrix, got {}x{}",
            n,
            n,
            a.nrows(),
            a.ncols()
        )));
    }

    for col in 0..n {
        let pivot = (col..n)
            .max_by(|&i, &j| a[[i, col]].abs().total_cmp(&a[[j, col]].abs()))
            .unwrap_or(col);

        if a[[pivot, col]].abs() < PIVOT_EPSILON {
            return Err(MathError::Singular(format!(
                "No usable pivot in column {}",
                col
            )));
        }

        if pivot != col {
            for k in 0..n {
                a.swap([col, k], [pivot, k]);
            }
            b.swap(col, pivot);
        }

        for row in col + 1..n {
            let factor = a[[row, col]] / a[[col, col]];
            if factor == 0.0 {
                continue;
            }
            for k in col..n {
                a[[row, k]] -= factor * a[[col, k]];
            }
            b[row] -= factor * b[col];
        }
    }

    let mut x = Array1::zeros(n);
    for row in (0..n).rev() {
        let tail: f64 = (row + 1..n).map(|k| a[[row, k]] * x[k]).sum();
        x[row] = (b[row] - tail) / a[[row, row]];
    }

    Ok(x)
}
