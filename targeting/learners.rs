//! Nuisance-model capability.
//!
//! The estimation core only needs to fit a model on a feature matrix and a
//! target, and to predict from it. `Learner` and `FittedModel` are that seam;
//! any model can plug in. The built-in learners below are small GLMs fitted by
//! the IRLS engine in `glm`, plus constant baselines.

use crate::data::CategoricalColumn;
use crate::glm::{GlmConfig, GlmError, LinkFunction, fit_glm};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis, s};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LearnerError {
    #[error("{learner} cannot be fitted on a {found} target.")]
    UnsupportedTarget {
        learner: &'static str,
        found: &'static str,
    },
    #[error("Cannot fit a model on zero rows.")]
    EmptyTarget,
    #[error("Categorical target has a missing value at row {0}.")]
    MissingTarget(usize),
    #[error("Model was fitted on {expected} features but {found} were supplied.")]
    FeatureCountMismatch { expected: usize, found: usize },
    #[error(
        "A {levels}-level probabilistic prediction has no scalar mean; only binary outcomes are supported."
    )]
    NotBinary { levels: usize },
    #[error("A probabilistic (classifier) prediction was expected.")]
    NotProbabilistic,
    #[error("Underlying GLM fit failed: {0}")]
    Glm(#[from] GlmError),
}

/// Target handed to a learner.
#[derive(Debug, Clone, Copy)]
pub enum Target<'a> {
    Continuous(ArrayView1<'a, f64>),
    Categorical(&'a CategoricalColumn),
}

impl Target<'_> {
    fn kind(&self) -> &'static str {
        match self {
            Target::Continuous(_) => "continuous",
            Target::Categorical(_) => "categorical",
        }
    }
}

/// Row-wise probabilities over named levels. Shape: [n_samples, n_levels].
#[derive(Debug, Clone, PartialEq)]
pub struct ProbabilityTable {
    levels: Vec<String>,
    probabilities: Array2<f64>,
}

impl ProbabilityTable {
    pub fn new(levels: Vec<String>, probabilities: Array2<f64>) -> Self {
        debug_assert_eq!(levels.len(), probabilities.ncols());
        Self {
            levels,
            probabilities,
        }
    }

    pub fn levels(&self) -> &[String] {
        &self.levels
    }

    pub fn probabilities(&self) -> &Array2<f64> {
        &self.probabilities
    }

    /// Probability mass of `level` at `row`; zero for a level the model never saw.
    pub fn pdf(&self, row: usize, level: &str) -> f64 {
        self.levels
            .iter()
            .position(|l| l == level)
            .map_or(0.0, |j| self.probabilities[(row, j)])
    }
}

/// What a fitted model returns.
#[derive(Debug, Clone, PartialEq)]
pub enum Prediction {
    /// Classifier output: a distribution over levels per row.
    Probabilistic(ProbabilityTable),
    /// Regressor output as a Gaussian per row.
    Gaussian { mean: Array1<f64>, std: f64 },
    /// Plain point predictions.
    Point(Array1<f64>),
}

impl Prediction {
    pub fn len(&self) -> usize {
        match self {
            Prediction::Probabilistic(table) => table.probabilities().nrows(),
            Prediction::Gaussian { mean, .. } => mean.len(),
            Prediction::Point(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The expected value per row. Binary distributions give the probability
    /// of the second level.
    pub fn mean(&self) -> Result<Array1<f64>, LearnerError> {
        match self {
            Prediction::Probabilistic(table) => {
                if table.levels().len() != 2 {
                    return Err(LearnerError::NotBinary {
                        levels: table.levels().len(),
                    });
                }
                Ok(table.probabilities().column(1).to_owned())
            }
            Prediction::Gaussian { mean, .. } => Ok(mean.clone()),
            Prediction::Point(values) => Ok(values.clone()),
        }
    }
}

pub trait FittedModel: fmt::Debug + Send + Sync {
    fn predict(&self, features: ArrayView2<f64>) -> Result<Prediction, LearnerError>;

    fn predict_mean(&self, features: ArrayView2<f64>) -> Result<Array1<f64>, LearnerError> {
        self.predict(features)?.mean()
    }

    /// Number of rows the model was fitted on.
    fn n_rows(&self) -> usize;
}

pub trait Learner: fmt::Debug {
    fn fit(
        &self,
        features: ArrayView2<f64>,
        target: Target<'_>,
    ) -> Result<Arc<dyn FittedModel>, LearnerError>;

    /// Identifies the learner's configuration; two learners with the same
    /// fingerprint produce the same fit on the same data.
    fn fingerprint(&self) -> String {
        format!("{self:?}")
    }
}

fn with_intercept(features: ArrayView2<f64>) -> Array2<f64> {
    let mut x = Array2::ones((features.nrows(), features.ncols() + 1));
    x.slice_mut(s![.., 1..]).assign(&features);
    x
}

fn check_width(expected: usize, features: ArrayView2<f64>) -> Result<(), LearnerError> {
    if features.ncols() != expected {
        return Err(LearnerError::FeatureCountMismatch {
            expected,
            found: features.ncols(),
        });
    }
    Ok(())
}

fn complete_codes(column: &CategoricalColumn) -> Result<Vec<usize>, LearnerError> {
    column
        .codes()
        .iter()
        .enumerate()
        .map(|(i, code)| code.ok_or(LearnerError::MissingTarget(i)))
        .collect()
}

/// Ordinary least squares with an intercept.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LinearRegressor;

#[derive(Debug, Clone, PartialEq)]
pub struct LinearFit {
    pub intercept: f64,
    pub coefficients: Array1<f64>,
    pub n_rows: usize,
}

impl LinearRegressor {
    pub fn fit_linear(
        &self,
        features: ArrayView2<f64>,
        y: ArrayView1<f64>,
    ) -> Result<LinearFit, LearnerError> {
        let n = y.len();
        if n == 0 {
            return Err(LearnerError::EmptyTarget);
        }
        let x = with_intercept(features);
        let fit = fit_glm(
            x.view(),
            y,
            Array1::zeros(n).view(),
            Array1::ones(n).view(),
            Array1::zeros(x.ncols()).view(),
            &GlmConfig::new(LinkFunction::Identity),
        )?;
        Ok(LinearFit {
            intercept: fit.beta[0],
            coefficients: fit.beta.slice(s![1..]).to_owned(),
            n_rows: n,
        })
    }
}

impl FittedModel for LinearFit {
    fn predict(&self, features: ArrayView2<f64>) -> Result<Prediction, LearnerError> {
        check_width(self.coefficients.len(), features)?;
        Ok(Prediction::Point(
            features.dot(&self.coefficients) + self.intercept,
        ))
    }

    fn n_rows(&self) -> usize {
        self.n_rows
    }
}

impl Learner for LinearRegressor {
    fn fit(
        &self,
        features: ArrayView2<f64>,
        target: Target<'_>,
    ) -> Result<Arc<dyn FittedModel>, LearnerError> {
        match target {
            Target::Continuous(y) => Ok(Arc::new(self.fit_linear(features, y)?)),
            other => Err(LearnerError::UnsupportedTarget {
                learner: "LinearRegressor",
                found: other.kind(),
            }),
        }
    }
}

/// Ridge-penalized logistic regression. Binary targets get a single model,
/// targets with more levels one model per level (one-vs-rest) whose
/// probabilities are normalized per row.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LogisticClassifier {
    pub ridge: f64,
    pub max_iterations: usize,
}

impl Default for LogisticClassifier {
    fn default() -> Self {
        Self {
            ridge: 1e-6,
            max_iterations: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogisticFit {
    pub levels: Vec<String>,
    /// One row of `[intercept, coefficients...]` per fitted binary model.
    pub coefficients: Array2<f64>,
    pub n_rows: usize,
}

impl LogisticClassifier {
    fn fit_binary(&self, x: &Array2<f64>, y: &Array1<f64>) -> Result<Array1<f64>, LearnerError> {
        let n = y.len();
        let mut penalized = Array1::ones(x.ncols());
        penalized[0] = 0.0;
        let config = GlmConfig {
            max_iterations: self.max_iterations,
            ..GlmConfig::new(LinkFunction::Logit).with_ridge(self.ridge)
        };
        let fit = fit_glm(
            x.view(),
            y.view(),
            Array1::zeros(n).view(),
            Array1::ones(n).view(),
            penalized.view(),
            &config,
        )?;
        Ok(fit.beta)
    }

    pub fn fit_logistic(
        &self,
        features: ArrayView2<f64>,
        target: &CategoricalColumn,
    ) -> Result<LogisticFit, LearnerError> {
        let codes = complete_codes(target)?;
        let n = codes.len();
        if n == 0 {
            return Err(LearnerError::EmptyTarget);
        }
        let levels = target.levels().to_vec();
        let x = with_intercept(features);
        let indicator = |k: usize| -> Array1<f64> {
            codes.iter().map(|&c| if c == k { 1.0 } else { 0.0 }).collect()
        };

        let coefficients = match levels.len() {
            0 | 1 => Array2::zeros((0, x.ncols())),
            2 => self.fit_binary(&x, &indicator(1))?.insert_axis(Axis(0)),
            k => {
                let mut all = Array2::zeros((k, x.ncols()));
                for level in 0..k {
                    all.row_mut(level).assign(&self.fit_binary(&x, &indicator(level))?);
                }
                all
            }
        };
        Ok(LogisticFit {
            levels,
            coefficients,
            n_rows: n,
        })
    }
}

impl FittedModel for LogisticFit {
    fn predict(&self, features: ArrayView2<f64>) -> Result<Prediction, LearnerError> {
        let width = self.coefficients.ncols().saturating_sub(1);
        if self.coefficients.nrows() > 0 {
            check_width(width, features)?;
        }
        let n = features.nrows();
        let k = self.levels.len();
        let probabilities = match k {
            0 => Array2::zeros((n, 0)),
            1 => Array2::ones((n, 1)),
            _ => {
                let x = with_intercept(features);
                let scores = x
                    .dot(&self.coefficients.t())
                    .mapv(|eta| LinkFunction::Logit.inverse(eta));
                if k == 2 {
                    let p1 = scores.column(0);
                    let mut table = Array2::zeros((n, 2));
                    table.column_mut(0).assign(&p1.mapv(|p| 1.0 - p));
                    table.column_mut(1).assign(&p1);
                    table
                } else {
                    let totals = scores.sum_axis(Axis(1)).insert_axis(Axis(1));
                    &scores / &totals
                }
            }
        };
        Ok(Prediction::Probabilistic(ProbabilityTable::new(
            self.levels.clone(),
            probabilities,
        )))
    }

    fn n_rows(&self) -> usize {
        self.n_rows
    }
}

impl Learner for LogisticClassifier {
    fn fit(
        &self,
        features: ArrayView2<f64>,
        target: Target<'_>,
    ) -> Result<Arc<dyn FittedModel>, LearnerError> {
        match target {
            Target::Categorical(column) => Ok(Arc::new(self.fit_logistic(features, column)?)),
            other => Err(LearnerError::UnsupportedTarget {
                learner: "LogisticClassifier",
                found: other.kind(),
            }),
        }
    }
}

/// Predicts the training mean with the training standard deviation.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ConstantRegressor;

#[derive(Debug, Clone, PartialEq)]
pub struct ConstantRegressorFit {
    pub mean: f64,
    pub std: f64,
    pub n_rows: usize,
}

impl FittedModel for ConstantRegressorFit {
    fn predict(&self, features: ArrayView2<f64>) -> Result<Prediction, LearnerError> {
        Ok(Prediction::Gaussian {
            mean: Array1::from_elem(features.nrows(), self.mean),
            std: self.std,
        })
    }

    fn n_rows(&self) -> usize {
        self.n_rows
    }
}

impl Learner for ConstantRegressor {
    fn fit(
        &self,
        _features: ArrayView2<f64>,
        target: Target<'_>,
    ) -> Result<Arc<dyn FittedModel>, LearnerError> {
        let Target::Continuous(y) = target else {
            return Err(LearnerError::UnsupportedTarget {
                learner: "ConstantRegressor",
                found: target.kind(),
            });
        };
        let mean = y.mean().ok_or(LearnerError::EmptyTarget)?;
        let std = if y.len() > 1 { y.std(1.0) } else { 0.0 };
        Ok(Arc::new(ConstantRegressorFit {
            mean,
            std,
            n_rows: y.len(),
        }))
    }
}

/// Predicts the empirical level frequencies of the training target.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ConstantClassifier;

#[derive(Debug, Clone, PartialEq)]
pub struct ConstantClassifierFit {
    pub levels: Vec<String>,
    pub frequencies: Array1<f64>,
    pub n_rows: usize,
}

impl FittedModel for ConstantClassifierFit {
    fn predict(&self, features: ArrayView2<f64>) -> Result<Prediction, LearnerError> {
        let n = features.nrows();
        let probabilities = Array2::from_shape_fn((n, self.levels.len()), |(_, j)| {
            self.frequencies[j]
        });
        Ok(Prediction::Probabilistic(ProbabilityTable::new(
            self.levels.clone(),
            probabilities,
        )))
    }

    fn n_rows(&self) -> usize {
        self.n_rows
    }
}

impl Learner for ConstantClassifier {
    fn fit(
        &self,
        _features: ArrayView2<f64>,
        target: Target<'_>,
    ) -> Result<Arc<dyn FittedModel>, LearnerError> {
        let Target::Categorical(column) = target else {
            return Err(LearnerError::UnsupportedTarget {
                learner: "ConstantClassifier",
                found: target.kind(),
            });
        };
        let codes = complete_codes(column)?;
        if codes.is_empty() {
            return Err(LearnerError::EmptyTarget);
        }
        let mut frequencies = Array1::zeros(column.levels().len());
        for &code in &codes {
            frequencies[code] += 1.0;
        }
        frequencies /= codes.len() as f64;
        Ok(Arc::new(ConstantClassifierFit {
            levels: column.levels().to_vec(),
            frequencies,
            n_rows: codes.len(),
        }))
    }
}

fn default_ridge() -> f64 {
    LogisticClassifier::default().ridge
}

fn default_max_iterations() -> usize {
    LogisticClassifier::default().max_iterations
}

/// Serializable description of a built-in learner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LearnerSpec {
    Linear,
    Logistic {
        #[serde(default = "default_ridge")]
        ridge: f64,
        #[serde(default = "default_max_iterations")]
        max_iterations: usize,
    },
    ConstantRegressor,
    ConstantClassifier,
}

impl LearnerSpec {
    pub fn build(&self) -> Box<dyn Learner> {
        match *self {
            LearnerSpec::Linear => Box::new(LinearRegressor),
            LearnerSpec::Logistic {
                ridge,
                max_iterations,
            } => Box::new(LogisticClassifier {
                ridge,
                max_iterations,
            }),
            LearnerSpec::ConstantRegressor => Box::new(ConstantRegressor),
            LearnerSpec::ConstantClassifier => Box::new(ConstantClassifier),
        }
    }

    pub fn default_logistic() -> Self {
        LearnerSpec::Logistic {
            ridge: default_ridge(),
            max_iterations: default_max_iterations(),
        }
    }
}
