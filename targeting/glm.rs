use crate::faer_ndarray::{FaerLinalgError, solve_symmetric};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis, Zip};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Defines the link function, connecting the linear predictor to the mean response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkFunction {
    /// The logit link, for binary outcomes coded 0/1.
    Logit,
    /// The identity link, for continuous outcomes.
    Identity,
}

/// Probabilities are kept this far away from 0 and 1.
pub const PROB_EPS: f64 = 1e-8;

impl LinkFunction {
    /// Maps a linear predictor to the mean scale.
    #[inline]
    pub fn inverse(self, eta: f64) -> f64 {
        match self {
            LinkFunction::Logit => {
                let eta = eta.clamp(-700.0, 700.0);
                (1.0 / (1.0 + (-eta).exp())).clamp(PROB_EPS, 1.0 - PROB_EPS)
            }
            LinkFunction::Identity => eta,
        }
    }

    /// Maps a mean to the linear predictor scale.
    #[inline]
    pub fn apply(self, mu: f64) -> f64 {
        match self {
            LinkFunction::Logit => {
                let p = mu.clamp(PROB_EPS, 1.0 - PROB_EPS);
                (p / (1.0 - p)).ln()
            }
            LinkFunction::Identity => mu,
        }
    }
}

/// The status of IRLS convergence.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GlmStatus {
    /// Converged successfully within tolerance.
    Converged,
    /// Reached maximum iterations without converging.
    MaxIterationsReached,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GlmConfig {
    pub link_function: LinkFunction,
    pub max_iterations: usize,
    pub convergence_tolerance: f64,
    /// Ridge penalty `lambda * sum(beta_j^2)` over the penalized coefficients.
    pub ridge: f64,
}

impl GlmConfig {
    pub fn new(link_function: LinkFunction) -> Self {
        Self {
            link_function,
            max_iterations: 100,
            convergence_tolerance: 1e-12,
            ridge: 0.0,
        }
    }

    pub fn with_ridge(mut self, ridge: f64) -> Self {
        self.ridge = ridge;
        self
    }
}

#[derive(Clone, Debug)]
pub struct GlmFit {
    pub beta: Array1<f64>,
    /// For `Identity` this is the weighted residual sum of squares, for `Logit`
    /// the binomial deviance.
    pub deviance: f64,
    pub status: GlmStatus,
    pub iteration: usize,
}

#[derive(Error, Debug)]
pub enum GlmError {
    #[error(
        "Design matrix has {rows} rows but the response, offset and weights have lengths {response}, {offset} and {weights}."
    )]
    DimensionMismatch {
        rows: usize,
        response: usize,
        offset: usize,
        weights: usize,
    },

    #[error("Penalty mask has {found} entries but the design matrix has {expected} columns.")]
    PenaltyMaskMismatch { expected: usize, found: usize },

    #[error("A linear system solve failed. The weighted design may be degenerate. Error: {0}")]
    LinearSystemSolveFailed(#[from] FaerLinalgError),

    #[error("IRLS produced non-finite values at iteration {iteration}.")]
    NonFinite { iteration: usize },

    #[error(
        "IRLS failed to find a step that decreases the deviance at iteration {iteration} after {halvings} step halvings."
    )]
    StepHalvingFailed { iteration: usize, halvings: usize },
}

const MAX_STEP_HALVINGS: usize = 30;

/// Fits a generalized linear model by iteratively reweighted least squares.
///
/// The linear predictor is `eta = offset + x * beta`; the offset is a fixed term
/// and is never estimated. `penalized` marks the coefficients subject to the
/// ridge penalty (intercepts are usually left out). The objective minimized is
/// `deviance + ridge * sum(penalized_j * beta_j^2)`.
///
/// Each iteration solves the weighted normal equations and, mgcv-style, halves
/// the step while the penalized deviance does not decrease.
pub fn fit_glm(
    x: ArrayView2<f64>,
    y: ArrayView1<f64>,
    offset: ArrayView1<f64>,
    prior_weights: ArrayView1<f64>,
    penalized: ArrayView1<f64>,
    config: &GlmConfig,
) -> Result<GlmFit, GlmError> {
    let (n, p) = x.dim();
    if y.len() != n || offset.len() != n || prior_weights.len() != n {
        return Err(GlmError::DimensionMismatch {
            rows: n,
            response: y.len(),
            offset: offset.len(),
            weights: prior_weights.len(),
        });
    }
    if penalized.len() != p {
        return Err(GlmError::PenaltyMaskMismatch {
            expected: p,
            found: penalized.len(),
        });
    }

    let link = config.link_function;
    let penalty_diag = penalized.mapv(|m| m * config.ridge);
    let penalty = |beta: &Array1<f64>| -> f64 {
        Zip::from(beta)
            .and(&penalty_diag)
            .fold(0.0, |acc, &b, &s| acc + s * b * b)
    };

    let mut beta = Array1::<f64>::zeros(p);
    let mut eta = offset.to_owned();
    let mut mu = eta.mapv(|e| link.inverse(e));
    let mut deviance = calculate_deviance(y, &mu, link, prior_weights);
    let mut objective = deviance + penalty(&beta);

    for iter in 1..=config.max_iterations {
        let (weights, z) = update_glm_vectors(y, &eta, &mu, offset, link, prior_weights);

        if !weights.iter().all(|v| v.is_finite()) || !z.iter().all(|v| v.is_finite()) {
            return Err(GlmError::NonFinite { iteration: iter });
        }

        let mut beta_trial = solve_weighted_least_squares(x, z.view(), weights.view(), &penalty_diag)?;
        if !beta_trial.iter().all(|v| v.is_finite()) {
            log::error!("Non-finite beta values at iteration {iter}: {beta_trial:?}");
            return Err(GlmError::NonFinite { iteration: iter });
        }

        let mut eta_trial = &offset + &x.dot(&beta_trial);
        let mut mu_trial = eta_trial.mapv(|e| link.inverse(e));
        let mut deviance_trial = calculate_deviance(y, &mu_trial, link, prior_weights);
        let mut objective_trial = deviance_trial + penalty(&beta_trial);

        let slack = 1e-12 * (objective.abs() + 1.0);
        let mut halvings = 0;
        while (!objective_trial.is_finite() || objective_trial > objective + slack)
            && halvings < MAX_STEP_HALVINGS
        {
            beta_trial = &beta + 0.5 * (&beta_trial - &beta);
            eta_trial = &offset + &x.dot(&beta_trial);
            mu_trial = eta_trial.mapv(|e| link.inverse(e));
            deviance_trial = calculate_deviance(y, &mu_trial, link, prior_weights);
            objective_trial = deviance_trial + penalty(&beta_trial);
            halvings += 1;
            log::debug!(
                "Step halving #{halvings} | current: {objective:.8e}, trial: {objective_trial:.8e}"
            );
        }

        if !objective_trial.is_finite() || objective_trial > objective + slack {
            log::warn!("IRLS failed to find a valid step after {halvings} halvings");
            return Err(GlmError::StepHalvingFailed {
                iteration: iter,
                halvings,
            });
        }

        let change = (objective - objective_trial).abs() / (objective_trial.abs() + 0.1);
        log::debug!("[IRLS Iter #{iter}] objective: {objective_trial:.10e}, relative change: {change:.3e}");

        beta = beta_trial;
        eta = eta_trial;
        mu = mu_trial;
        deviance = deviance_trial;
        objective = objective_trial;

        // Weighted least squares is exact in one solve for the identity link.
        if link == LinkFunction::Identity || change < config.convergence_tolerance {
            return Ok(GlmFit {
                beta,
                deviance,
                status: GlmStatus::Converged,
                iteration: iter,
            });
        }
    }

    log::warn!(
        "IRLS reached {} iterations without converging",
        config.max_iterations
    );
    Ok(GlmFit {
        beta,
        deviance,
        status: GlmStatus::MaxIterationsReached,
        iteration: config.max_iterations,
    })
}

/// Returns the IRLS weights and the working response on the `eta - offset` scale.
pub fn update_glm_vectors(
    y: ArrayView1<f64>,
    eta: &Array1<f64>,
    mu: &Array1<f64>,
    offset: ArrayView1<f64>,
    link: LinkFunction,
    prior_weights: ArrayView1<f64>,
) -> (Array1<f64>, Array1<f64>) {
    const MIN_WEIGHT: f64 = 1e-10;

    match link {
        LinkFunction::Logit => {
            let variance = mu.mapv(|m| (m * (1.0 - m)).max(MIN_WEIGHT));
            let weights = &prior_weights * &variance;
            // The same variance divides the residual, so `w * (z - x*beta)` is
            // exactly `prior * (y - mu)` and the fixed point solves the score equation.
            let z = Zip::from(eta)
                .and(&offset)
                .and(&y)
                .and(mu)
                .and(&variance)
                .map_collect(|&e, &o, &yi, &m, &v| (e - o) + (yi - m) / v);
            (weights, z)
        }
        LinkFunction::Identity => (prior_weights.to_owned(), &y - &offset),
    }
}

pub fn calculate_deviance(
    y: ArrayView1<f64>,
    mu: &Array1<f64>,
    link: LinkFunction,
    prior_weights: ArrayView1<f64>,
) -> f64 {
    const EPS: f64 = 1e-8;
    match link {
        LinkFunction::Logit => {
            let total_residual = Zip::from(y)
                .and(mu)
                .and(prior_weights)
                .fold(0.0, |acc, &yi, &mui, &wi| {
                    let mui_c = mui.clamp(EPS, 1.0 - EPS);
                    let term1 = if yi > EPS {
                        yi * (yi.ln() - mui_c.ln())
                    } else {
                        0.0
                    };
                    let term2 = if yi < 1.0 - EPS {
                        (1.0 - yi) * ((1.0 - yi).ln() - (1.0 - mui_c).ln())
                    } else {
                        0.0
                    };
                    acc + wi * (term1 + term2)
                });
            2.0 * total_residual
        }
        LinkFunction::Identity => Zip::from(y)
            .and(mu)
            .and(prior_weights)
            .fold(0.0, |acc, &yi, &mui, &wi| acc + wi * (yi - mui) * (yi - mui)),
    }
}

/// Solves `(X'WX + diag(penalty)) beta = X'Wz`.
fn solve_weighted_least_squares(
    x: ArrayView2<f64>,
    z: ArrayView1<f64>,
    weights: ArrayView1<f64>,
    penalty_diag: &Array1<f64>,
) -> Result<Array1<f64>, GlmError> {
    let weighted_x: Array2<f64> = &x * &weights.insert_axis(Axis(1));
    let mut xtwx = x.t().dot(&weighted_x);
    xtwx.diag_mut()
        .iter_mut()
        .zip(penalty_diag.iter())
        .for_each(|(d, &s)| *d += s);
    let xtwz = weighted_x.t().dot(&z);
    Ok(solve_symmetric(&xtwx, &xtwz)?)
}
