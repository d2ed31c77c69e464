//! Ordinary least squares
//!
//! Solved through the normal equations on standardised columns with
//! partial-pivot Gaussian elimination. Columns that are constant in the
//! training data carry no information beyond the intercept and get a zero
//! coefficient instead of making the system singular.

use serde::{Deserialize, Serialize};

use crate::{MLError, MLResult};

/// Relative pivot size below which the system counts as singular
const PIVOT_TOLERANCE: f64 = 1e-10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearRegression {
    pub intercept: f64,
    pub coefficients: Vec<f64>,
}

impl LinearRegression {
    pub fn fit(x: &[Vec<f64>], y: &[f64]) -> MLResult<Self> {
        let n = x.len();
        if n == 0 || n != y.len() {
            return Err(MLError::InsufficientData(format!(
                "linear fit over {} rows and {} targets",
                n,
                y.len()
            )));
        }
        let width = x[0].len();
        let means: Vec<f64> = (0..width)
            .map(|j| x.iter().map(|row| row[j]).sum::<f64>() / n as f64)
            .collect();
        let y_mean = y.iter().sum::<f64>() / n as f64;

        let active: Vec<usize> = (0..width)
            .filter(|&j| x.iter().any(|row| row[j] != x[0][j]))
            .collect();
        let p = active.len();
        if p >= n {
            return Err(MLError::Singular);
        }
        let scales: Vec<f64> = active
            .iter()
            .map(|&j| (x.iter().map(|row| (row[j] - means[j]).powi(2)).sum::<f64>() / n as f64).sqrt())
            .collect();

        // augmented [ZᵀZ | Zᵀy] over standardised active columns
        let mut system = vec![vec![0.0; p + 1]; p];
        for (row, &target) in x.iter().zip(y) {
            let z: Vec<f64> = active
                .iter()
                .zip(&scales)
                .map(|(&j, s)| (row[j] - means[j]) / s)
                .collect();
            let dy = target - y_mean;
            for a in 0..p {
                for b in 0..p {
                    system[a][b] += z[a] * z[b];
                }
                system[a][p] += z[a] * dy;
            }
        }

        let solution = solve(system)?;
        let mut coefficients = vec![0.0; width];
        for ((&j, beta), scale) in active.iter().zip(&solution).zip(&scales) {
            coefficients[j] = beta / scale;
        }
        let intercept = y_mean - coefficients.iter().zip(&means).map(|(b, m)| b * m).sum::<f64>();
        Ok(Self {
            intercept,
            coefficients,
        })
    }

    pub fn predict(&self, row: &[f64]) -> f64 {
        self.intercept
            + self
                .coefficients
                .iter()
                .zip(row)
                .map(|(b, v)| b * v)
                .sum::<f64>()
    }
}

/// Gaussian elimination with partial pivoting on an augmented matrix
fn solve(mut m: Vec<Vec<f64>>) -> MLResult<Vec<f64>> {
    let p = m.len();
    let scale = (0..p).map(|i| m[i][i].abs()).fold(0.0, f64::max).max(f64::MIN_POSITIVE);

    for col in 0..p {
        let pivot_row = (col..p)
            .max_by(|&a, &b| m[a][col].abs().total_cmp(&m[b][col].abs()))
            .unwrap_or(col);
        if m[pivot_row][col].abs() <= PIVOT_TOLERANCE * scale {
            return Err(MLError::Singular);
        }
        m.swap(col, pivot_row);

        for row in col + 1..p {
            let factor = m[row][col] / m[col][col];
            if factor == 0.0 {
                continue;
            }
            for k in col..=p {
                m[row][k] -= factor * m[col][k];
            }
        }
    }

    let mut solution = vec![0.0; p];
    for row in (0..p).rev() {
        let tail: f64 = (row + 1..p).map(|k| m[row][k] * solution[k]).sum();
        solution[row] = (m[row][p] - tail) / m[row][row];
    }
    if solution.iter().any(|v| !v.is_finite()) {
        return Err(MLError::Singular);
    }
    Ok(solution)
}
