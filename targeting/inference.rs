//! Influence-curve based inference for a scalar estimate.
//!
//! The standard error is `sqrt(var(IC) / n)` with the unbiased variance.
//! Tests are two-sided against zero: a one-sample t-test with `n - 1`
//! degrees of freedom, or a z-test.

use ndarray::Array1;
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal, StudentsT};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum InferenceMethod {
    #[default]
    #[serde(rename = "t")]
    TTest,
    #[serde(rename = "z")]
    ZTest,
}

/// A point estimate with its influence curve over the rows it was computed on.
#[derive(Debug, Clone, PartialEq)]
pub struct Estimate {
    pub estimate: f64,
    pub influence_curve: Array1<f64>,
    /// Indices, in the original dataset, of the rows the curve is evaluated on.
    pub rows: Vec<usize>,
}

impl Estimate {
    pub fn new(estimate: f64, influence_curve: Array1<f64>, rows: Vec<usize>) -> Self {
        debug_assert_eq!(influence_curve.len(), rows.len());
        Self {
            estimate,
            influence_curve,
            rows,
        }
    }

    pub fn n(&self) -> usize {
        self.influence_curve.len()
    }

    /// NaN with fewer than two rows.
    pub fn stderror(&self) -> f64 {
        let n = self.n();
        if n < 2 {
            return f64::NAN;
        }
        (self.influence_curve.var(1.0) / n as f64).sqrt()
    }

    /// Close to zero for a targeted estimate.
    pub fn mean_inf_curve(&self) -> f64 {
        self.influence_curve.mean().unwrap_or(f64::NAN)
    }

    /// Two-sided p-value of `estimate = 0`.
    pub fn pvalue(&self, method: InferenceMethod) -> f64 {
        let se = self.stderror();
        if se.is_nan() || self.estimate.is_nan() {
            return f64::NAN;
        }
        if se == 0.0 {
            return if self.estimate == 0.0 { 1.0 } else { 0.0 };
        }
        let statistic = (self.estimate / se).abs();
        match reference_cdf(method, self.n()) {
            Some(cdf) => (2.0 * (1.0 - cdf(statistic))).clamp(0.0, 1.0),
            None => f64::NAN,
        }
    }

    /// Confidence interval at `level` (e.g. 0.95).
    pub fn confint(&self, method: InferenceMethod, level: f64) -> (f64, f64) {
        let se = self.stderror();
        let quantile = critical_value(method, self.n(), level);
        if se == 0.0 {
            return (self.estimate, self.estimate);
        }
        let half_width = quantile * se;
        (self.estimate - half_width, self.estimate + half_width)
    }
}

fn reference_cdf(method: InferenceMethod, n: usize) -> Option<Box<dyn Fn(f64) -> f64>> {
    match method {
        InferenceMethod::TTest => {
            let dist = StudentsT::new(0.0, 1.0, n.saturating_sub(1) as f64).ok()?;
            Some(Box::new(move |x| dist.cdf(x)))
        }
        InferenceMethod::ZTest => {
            let dist = Normal::new(0.0, 1.0).ok()?;
            Some(Box::new(move |x| dist.cdf(x)))
        }
    }
}

/// Two-sided critical value at `level`; NaN when the reference distribution is undefined.
pub fn critical_value(method: InferenceMethod, n: usize, level: f64) -> f64 {
    if !(0.0..1.0).contains(&level) {
        return f64::NAN;
    }
    let p = 0.5 + level / 2.0;
    match method {
        InferenceMethod::TTest => StudentsT::new(0.0, 1.0, n.saturating_sub(1) as f64)
            .map_or(f64::NAN, |dist| dist.inverse_cdf(p)),
        InferenceMethod::ZTest => Normal::new(0.0, 1.0).map_or(f64::NAN, |dist| dist.inverse_cdf(p)),
    }
}
