//! Delta-method composition of estimates.
//!
//! For `f(theta_1, ..., theta_m)` the composite influence curve is
//! `sum_i df/dtheta_i * IC_i` and its variance `grad' * Sigma * grad / n`,
//! where `Sigma` is the empirical covariance of the stacked curves. The
//! gradient is taken by central finite differences with step
//! `cbrt(eps) * max(|theta_i|, 1)`, accurate to `O(h^2)` for smooth `f`.

use crate::inference::Estimate;
use ndarray::{Array1, Array2, Axis};
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum CompositionError {
    #[error("At least one estimate is required for composition.")]
    Empty,
    #[error("Influence curves have different lengths: {lengths:?}.")]
    LengthMismatch { lengths: Vec<usize> },
    #[error(
        "Estimate {index} was computed on different rows than estimate 0; composed estimates must share their rows."
    )]
    RowMismatch { index: usize },
    #[error("The gradient of the composition is not finite at {point:?}.")]
    NonFiniteGradient { point: Vec<f64> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ComposedEstimate {
    /// Composite estimate with its influence curve.
    pub estimate: Estimate,
    pub gradient: Array1<f64>,
    /// Empirical covariance of the constituent influence curves.
    pub covariance: Array2<f64>,
}

impl ComposedEstimate {
    pub fn stderror(&self) -> f64 {
        let n = self.estimate.n() as f64;
        (self.gradient.dot(&self.covariance.dot(&self.gradient)) / n).sqrt()
    }
}

/// Unbiased covariance of the influence curves, one curve per row of `curves`.
pub fn covariance_matrix(curves: &Array2<f64>) -> Array2<f64> {
    let n = curves.ncols();
    let Some(means) = curves.mean_axis(Axis(1)) else {
        return Array2::zeros((curves.nrows(), curves.nrows()));
    };
    let centered = curves - &means.insert_axis(Axis(1));
    let denominator = n.saturating_sub(1).max(1) as f64;
    centered.dot(&centered.t()) / denominator
}

pub fn gradient<F>(f: &F, point: &[f64]) -> Result<Array1<f64>, CompositionError>
where
    F: Fn(&[f64]) -> f64,
{
    let step_scale = f64::EPSILON.cbrt();
    let mut shifted = point.to_vec();
    let gradient: Array1<f64> = (0..point.len())
        .map(|i| {
            let h = step_scale * point[i].abs().max(1.0);
            shifted[i] = point[i] + h;
            let up = f(&shifted);
            shifted[i] = point[i] - h;
            let down = f(&shifted);
            shifted[i] = point[i];
            (up - down) / (2.0 * h)
        })
        .collect();
    if !gradient.iter().all(|g| g.is_finite()) {
        return Err(CompositionError::NonFiniteGradient {
            point: point.to_vec(),
        });
    }
    Ok(gradient)
}

/// Composes `estimates` through `f`. All estimates must share the same rows in
/// the same order.
pub fn compose<F>(f: F, estimates: &[&Estimate]) -> Result<ComposedEstimate, CompositionError>
where
    F: Fn(&[f64]) -> f64,
{
    let first = estimates.first().ok_or(CompositionError::Empty)?;
    let lengths: Vec<usize> = estimates.iter().map(|e| e.n()).collect();
    if lengths.iter().any(|&len| len != first.n()) {
        return Err(CompositionError::LengthMismatch { lengths });
    }
    if let Some(index) = estimates.iter().position(|e| e.rows != first.rows) {
        return Err(CompositionError::RowMismatch { index });
    }

    let point: Vec<f64> = estimates.iter().map(|e| e.estimate).collect();
    let gradient = gradient(&f, &point)?;

    let mut curves = Array2::zeros((estimates.len(), first.n()));
    for (mut row, estimate) in curves.rows_mut().into_iter().zip(estimates) {
        row.assign(&estimate.influence_curve);
    }
    let covariance = covariance_matrix(&curves);
    let influence_curve = gradient.dot(&curves);

    Ok(ComposedEstimate {
        estimate: Estimate::new(f(&point), influence_curve, first.rows.clone()),
        gradient,
        covariance,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn estimate(value: f64, ic: Array1<f64>) -> Estimate {
        let rows = (0..ic.len()).collect();
        Estimate::new(value, ic, rows)
    }

    #[test]
    fn identity_reproduces_the_standard_error() {
        let e = estimate(1.3, array![0.5, -1.0, 0.25, 0.25, 1.5, -1.5]);
        let composed = compose(|x| x[0], &[&e]).unwrap();
        assert_abs_diff_eq!(composed.estimate.estimate, 1.3, epsilon = 1e-15);
        assert_abs_diff_eq!(composed.gradient[0], 1.0, epsilon = 1e-9);
        assert_abs_diff_eq!(composed.stderror(), e.stderror(), epsilon = 1e-9);
        assert_abs_diff_eq!(composed.estimate.stderror(), e.stderror(), epsilon = 1e-9);
    }

    #[test]
    fn difference_accounts_for_covariance() {
        let ic1 = array![1.0, -1.0, 2.0, -2.0, 0.5];
        let ic2 = array![0.5, -0.5, 1.0, -1.0, 0.0];
        let e1 = estimate(3.0, ic1.clone());
        let e2 = estimate(1.0, ic2.clone());
        let composed = compose(|x| x[0] - x[1], &[&e1, &e2]).unwrap();

        assert_abs_diff_eq!(composed.estimate.estimate, 2.0, epsilon = 1e-12);
        let direct = estimate(2.0, &ic1 - &ic2);
        assert_abs_diff_eq!(composed.stderror(), direct.stderror(), epsilon = 1e-8);
        for (a, b) in composed.estimate.influence_curve.iter().zip(direct.influence_curve.iter()) {
            assert_abs_diff_eq!(*a, *b, epsilon = 1e-8);
        }
        assert_abs_diff_eq!(composed.covariance[(0, 1)], composed.covariance[(1, 0)]);
    }

    #[test]
    fn ratio_gradient_matches_calculus() {
        let e1 = estimate(2.0, array![0.1, -0.1, 0.2]);
        let e2 = estimate(4.0, array![0.3, 0.1, -0.4]);
        let composed = compose(|x| x[0] / x[1], &[&e1, &e2]).unwrap();
        assert_abs_diff_eq!(composed.gradient[0], 0.25, epsilon = 1e-8);
        assert_abs_diff_eq!(composed.gradient[1], -2.0 / 16.0, epsilon = 1e-8);
    }

    #[test]
    fn misaligned_estimates_are_rejected() {
        let e1 = estimate(1.0, array![0.1, -0.1, 0.0]);
        let e2 = estimate(1.0, array![0.1, -0.1]);
        assert_eq!(
            compose(|x| x[0] + x[1], &[&e1, &e2]).unwrap_err(),
            CompositionError::LengthMismatch {
                lengths: vec![3, 2]
            }
        );

        let e3 = Estimate::new(1.0, array![0.1, -0.1, 0.0], vec![0, 1, 3]);
        assert_eq!(
            compose(|x| x[0] + x[1], &[&e1, &e3]).unwrap_err(),
            CompositionError::RowMismatch { index: 1 }
        );
        assert_eq!(compose(|x| x[0], &[]).unwrap_err(), CompositionError::Empty);
    }

    #[test]
    fn non_finite_gradient_is_an_error() {
        let e = estimate(0.0, array![0.1, -0.1]);
        let err = compose(|x| x[0].ln(), &[&e]).unwrap_err();
        assert!(matches!(err, CompositionError::NonFiniteGradient { .. }));
    }
}
