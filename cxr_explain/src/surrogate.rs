//! Local linear surrogate: weighted ridge regression fit by a Cholesky
//! solve of the normal equations.
//!
//! The perturbation explainer fits the top class's probability as a linear
//! function of superpixel presence; the fitted coefficients rank superpixels
//! by how much turning them off moves the prediction. The fit carries an
//! unpenalized intercept so the baseline probability lands there instead of
//! leaking into the superpixel coefficients, which keeps the sign of each
//! coefficient meaningful.

use ndarray::Array2;

use cxr_inference::XrayError;

/// Fit `y ~ X b + intercept` with per-sample weights and an L2 penalty on
/// the feature coefficients.
///
/// Solves the normal equations of the intercept-augmented design; only the
/// feature columns are penalized, so a constant response is explained
/// entirely by the intercept. Returns the feature coefficients, intercept
/// excluded. A failed factorization is an [`XrayError::Explanation`].
pub fn fit_weighted_ridge(
    x: &Array2<f64>,
    y: &[f64],
    sample_weights: &[f64],
    lambda: f64,
) -> Result<Vec<f64>, XrayError> {
    let (n, k) = x.dim();
    if n == 0 || k == 0 || y.len() != n || sample_weights.len() != n {
        return Err(XrayError::Explanation(
            "surrogate fit failed: inconsistent design matrix".into(),
        ));
    }

    // Normal equations over (x_i, 1), accumulated in f64 for stability. The
    // trailing column is the intercept.
    let m = k + 1;
    let mut a = Array2::<f64>::zeros((m, m));
    let mut b = vec![0f64; m];
    for i in 0..n {
        let w = sample_weights[i];
        for p in 0..m {
            let xp = if p < k { x[(i, p)] } else { 1.0 } * w;
            b[p] += xp * y[i];
            for q in p..m {
                let xq = if q < k { x[(i, q)] } else { 1.0 };
                a[(p, q)] += xp * xq;
            }
        }
    }
    for p in 0..m {
        for q in 0..p {
            a[(p, q)] = a[(q, p)];
        }
    }
    for p in 0..k {
        a[(p, p)] += lambda;
    }

    let mut coefs = cholesky_solve(a, b)
        .ok_or_else(|| XrayError::Explanation("surrogate fit failed to converge".into()))?;
    coefs.truncate(k);
    Ok(coefs)
}

/// Solve `A x = b` for symmetric positive-definite `A`.
fn cholesky_solve(mut a: Array2<f64>, mut b: Vec<f64>) -> Option<Vec<f64>> {
    let k = b.len();

    // In-place Cholesky factorization, A = L L'.
    for j in 0..k {
        let mut diag = a[(j, j)];
        for p in 0..j {
            diag -= a[(j, p)] * a[(j, p)];
        }
        if diag <= 0.0 || !diag.is_finite() {
            return None;
        }
        let diag = diag.sqrt();
        a[(j, j)] = diag;
        for i in (j + 1)..k {
            let mut v = a[(i, j)];
            for p in 0..j {
                v -= a[(i, p)] * a[(j, p)];
            }
            a[(i, j)] = v / diag;
        }
    }

    // Forward substitution: L z = b.
    for i in 0..k {
        for p in 0..i {
            b[i] -= a[(i, p)] * b[p];
        }
        b[i] /= a[(i, i)];
    }

    // Back substitution: L' x = z.
    for i in (0..k).rev() {
        for p in (i + 1)..k {
            b[i] -= a[(p, i)] * b[p];
        }
        b[i] /= a[(i, i)];
    }

    Some(b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_recovers_known_coefficients() {
        // y = 2*x0 - 1*x1, exactly linear and well-conditioned.
        let x = array![
            [1.0, 0.0],
            [0.0, 1.0],
            [1.0, 1.0],
            [2.0, 1.0],
            [1.0, 2.0],
        ];
        let y: Vec<f64> = x.rows().into_iter().map(|r| 2.0 * r[0] - r[1]).collect();
        let w = vec![1.0; y.len()];

        let coefs = fit_weighted_ridge(&x, &y, &w, 1e-9).unwrap();
        assert_eq!(coefs.len(), 2);
        assert!((coefs[0] - 2.0).abs() < 1e-4);
        assert!((coefs[1] + 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_weights_favor_heavy_samples() {
        // Two contradictory samples where the feature is on; the heavier one
        // wins. The third sample pins the intercept near zero.
        let x = array![[1.0], [1.0], [0.0]];
        let y = vec![0.0, 1.0, 0.0];
        let w = vec![0.01, 100.0, 1.0];

        let coefs = fit_weighted_ridge(&x, &y, &w, 1e-6).unwrap();
        assert!(coefs[0] > 0.9);
    }

    #[test]
    fn test_constant_response_attributes_nothing() {
        // A classifier that ignores the masks entirely: every perturbed
        // sample scores the same. The intercept absorbs the baseline, so no
        // superpixel may come out positively weighted.
        let x = array![
            [1.0, 0.0, 1.0],
            [0.0, 1.0, 1.0],
            [1.0, 1.0, 0.0],
            [0.0, 0.0, 1.0],
            [1.0, 1.0, 1.0],
            [0.0, 1.0, 0.0],
        ];
        let y = vec![0.7; 6];
        let w = vec![1.0; 6];

        let coefs = fit_weighted_ridge(&x, &y, &w, 1.0).unwrap();
        for coef in coefs {
            assert!(coef.abs() < 1e-6);
        }
    }

    #[test]
    fn test_inconsistent_shapes_rejected() {
        let x = array![[1.0, 0.0]];
        let err = fit_weighted_ridge(&x, &[1.0, 2.0], &[1.0], 1.0).unwrap_err();
        assert!(matches!(err, XrayError::Explanation(_)));
    }

    #[test]
    fn test_singular_without_penalty_fails() {
        // Duplicate columns make the normal equations singular; with a zero
        // penalty the factorization cannot proceed.
        let x = array![[1.0, 1.0], [2.0, 2.0], [3.0, 3.0]];
        let y = vec![1.0, 2.0, 3.0];
        let w = vec![1.0; 3];

        assert!(fit_weighted_ridge(&x, &y, &w, 0.0).is_err());
        assert!(fit_weighted_ridge(&x, &y, &w, 1.0).is_ok());
    }
}
