use ndarray::{Array1, Array2, Axis};

use crate::error::{MlrError, Result};

const JACOBI_MAX_SWEEPS: usize = 100;

/// Lower-triangular Cholesky factor `L` with `a = L Lᵀ`.
pub fn cholesky(a: &Array2<f64>) -> Result<Array2<f64>> {
    let n = a.nrows();
    if a.ncols() != n {
        return Err(MlrError::Shape(format!(
            "cholesky needs a square matrix, got {:?}",
            a.shape()
        )));
    }
    let mut l = Array2::<f64>::zeros((n, n));
    for j in 0..n {
        let mut diag = a[[j, j]];
        for k in 0..j {
            diag -= l[[j, k]] * l[[j, k]];
        }
        if !(diag > 0.0) {
            return Err(MlrError::Regressor(format!(
                "matrix is not positive definite (pivot {} = {})",
                j, diag
            )));
        }
        let diag = diag.sqrt();
        l[[j, j]] = diag;
        for i in (j + 1)..n {
            let mut value = a[[i, j]];
            for k in 0..j {
                value -= l[[i, k]] * l[[j, k]];
            }
            l[[i, j]] = value / diag;
        }
    }
    Ok(l)
}

/// Solve `L x = b` for lower-triangular `L`.
pub fn solve_lower(l: &Array2<f64>, b: &Array1<f64>) -> Array1<f64> {
    let n = l.nrows();
    let mut x = Array1::<f64>::zeros(n);
    for i in 0..n {
        let mut value = b[i];
        for k in 0..i {
            value -= l[[i, k]] * x[k];
        }
        x[i] = value / l[[i, i]];
    }
    x
}

/// Solve `Lᵀ x = b` for lower-triangular `L`.
pub fn solve_lower_transposed(l: &Array2<f64>, b: &Array1<f64>) -> Array1<f64> {
    let n = l.nrows();
    let mut x = Array1::<f64>::zeros(n);
    for i in (0..n).rev() {
        let mut value = b[i];
        for k in (i + 1)..n {
            value -= l[[k, i]] * x[k];
        }
        x[i] = value / l[[i, i]];
    }
    x
}

/// Solve `a x = b` given the Cholesky factor of `a`.
pub fn cholesky_solve(l: &Array2<f64>, b: &Array1<f64>) -> Array1<f64> {
    solve_lower_transposed(l, &solve_lower(l, b))
}

/// Eigen-decomposition of a symmetric matrix by cyclic Jacobi rotations.
///
/// Eigenvalues are sorted in decreasing order; eigenvectors are the columns
/// of the returned matrix, each signed so that its largest component is
/// positive.
pub fn symmetric_eigen(a: &Array2<f64>) -> Result<(Array1<f64>, Array2<f64>)> {
    let n = a.nrows();
    if a.ncols() != n {
        return Err(MlrError::Shape(format!(
            "eigen-decomposition needs a square matrix, got {:?}",
            a.shape()
        )));
    }
    let mut m = a.clone();
    let mut v = Array2::<f64>::eye(n);
    let scale: f64 = m.iter().map(|x| x * x).sum::<f64>().max(f64::MIN_POSITIVE);

    for _ in 0..JACOBI_MAX_SWEEPS {
        let mut off = 0.0;
        for p in 0..n {
            for q in (p + 1)..n {
                off += m[[p, q]] * m[[p, q]];
            }
        }
        if off <= 1e-24 * scale {
            break;
        }
        for p in 0..n {
            for q in (p + 1)..n {
                let apq = m[[p, q]];
                if apq.abs() <= f64::MIN_POSITIVE {
                    continue;
                }
                let theta = (m[[q, q]] - m[[p, p]]) / (2.0 * apq);
                let t = theta.signum() / (theta.abs() + (theta * theta + 1.0).sqrt());
                let c = 1.0 / (t * t + 1.0).sqrt();
                let s = t * c;
                for k in 0..n {
                    let (akp, akq) = (m[[k, p]], m[[k, q]]);
                    m[[k, p]] = c * akp - s * akq;
                    m[[k, q]] = s * akp + c * akq;
                }
                for k in 0..n {
                    let (apk, aqk) = (m[[p, k]], m[[q, k]]);
                    m[[p, k]] = c * apk - s * aqk;
                    m[[q, k]] = s * apk + c * aqk;
                }
                for k in 0..n {
                    let (vkp, vkq) = (v[[k, p]], v[[k, q]]);
                    v[[k, p]] = c * vkp - s * vkq;
                    v[[k, q]] = s * vkp + c * vkq;
                }
            }
        }
    }

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&i, &j| m[[j, j]].total_cmp(&m[[i, i]]));
    let values = Array1::from_iter(order.iter().map(|&i| m[[i, i]]));
    let mut vectors = v.select(Axis(1), &order);
    for mut column in vectors.columns_mut() {
        let pivot = column
            .iter()
            .copied()
            .fold(0.0_f64, |best, x| if x.abs() > best.abs() { x } else { best });
        if pivot < 0.0 {
            column.mapv_inplace(|x| -x);
        }
    }
    Ok((values, vectors))
}

/// Weighted ridge regression with an unpenalised intercept.
///
/// Returns `(coefficients, intercept)` minimising
/// `Σ wᵢ (yᵢ - b - xᵢ·β)² + alpha |β|²`.
pub fn weighted_ridge(
    x: &Array2<f64>,
    y: &Array1<f64>,
    weights: &Array1<f64>,
    alpha: f64,
) -> Result<(Array1<f64>, f64)> {
    let (n, p) = x.dim();
    if y.len() != n || weights.len() != n {
        return Err(MlrError::Shape(format!(
            "ridge regression got {} rows, {} targets and {} weights",
            n,
            y.len(),
            weights.len()
        )));
    }
    let total: f64 = weights.sum();
    if !(total > 0.0) {
        return Err(MlrError::Regressor(
            "ridge regression needs positive sample weights".to_string(),
        ));
    }
    let x_mean = x.t().dot(weights) / total;
    let y_mean = y.dot(weights) / total;
    let xc = x - &x_mean.view().insert_axis(Axis(0));
    let yc = y - y_mean;

    let weighted = &xc * &weights.view().insert_axis(Axis(1));
    let mut gram = weighted.t().dot(&xc);
    for i in 0..p {
        gram[[i, i]] += alpha;
    }
    let rhs = weighted.t().dot(&yc);
    let l = cholesky(&gram)?;
    let coef = cholesky_solve(&l, &rhs);
    let intercept = y_mean - x_mean.dot(&coef);
    Ok((coef, intercept))
}
