//! # Targeted estimation
//!
//! `tmle` sequences the nuisance fits for one parameter and then targets them:
//!
//! 1. Structural checks (column names, treatment order, levels). Nothing is
//!    fitted when they fail.
//! 2. The dataset is restricted to the rows complete for the parameter's
//!    target and confounders.
//! 3. The encoder (H), outcome model (Q) and treatment mechanism (G) are
//!    fitted, or reused from `NuisanceParameters` when their `FitKey` matches.
//! 4. The initial plug-in estimate is the mean counterfactual aggregate
//!    through Q.
//! 5. The fluctuation (F) is fitted on the clever covariate with the initial
//!    prediction as offset. The targeted estimate is the mean counterfactual
//!    aggregate through F, and the influence curve is
//!    `covariate * (y - F(T, W)) + aggregate - estimate`.

use crate::counterfactual::{counterfactual_aggregate, outcome_features};
use crate::data::{AlignedData, DataError, Dataset, OutcomeColumn};
use crate::encoder::{EncoderError, FittedEncoder};
use crate::fluctuation::{Fluctuation, compute_offset};
use crate::glm::{GlmConfig, GlmError, LinkFunction};
use crate::indicator::compute_covariate;
use crate::inference::{Estimate, InferenceMethod};
use crate::joint::{joint_label, joint_treatment};
use crate::learners::{FittedModel, Learner, LearnerError, Target};
use crate::nuisance::{FitKey, NuisanceParameters, NuisanceSpec, fit_or_reuse};
use crate::parameter::{Parameter, ParameterError};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EstimationError {
    #[error(transparent)]
    Data(#[from] DataError),
    #[error(transparent)]
    Parameter(#[from] ParameterError),
    #[error("Nuisance model failed: {0}")]
    Learner(#[from] LearnerError),
    #[error("Treatment encoding failed: {0}")]
    Encoder(#[from] EncoderError),
    #[error("Fluctuation fit failed: {0}")]
    Glm(#[from] GlmError),
    #[error(
        "Outcome '{target}' has {levels} levels; categorical outcomes must be binary."
    )]
    UnsupportedOutcome { target: String, levels: usize },
    #[error("The {0} nuisance slot has not been fitted.")]
    NuisanceNotFitted(&'static str),
    #[error("Level '{level}' is not a level of treatment '{treatment}'.")]
    UnknownLevel { treatment: String, level: String },
    #[error("No complete rows remain for target '{0}'.")]
    EmptyData(String),
    #[error(
        "The estimate of {parameter} is not finite. A treatment assignment in the contrast \
         probably has zero estimated density; use a positive threshold (got {threshold})."
    )]
    NonFiniteEstimate { parameter: String, threshold: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EstimatorSettings {
    /// Floor applied to treatment-mechanism densities.
    pub threshold: f64,
    pub inference: InferenceMethod,
    pub confidence_level: f64,
    pub max_iterations: usize,
    pub convergence_tolerance: f64,
}

impl Default for EstimatorSettings {
    fn default() -> Self {
        let glm = GlmConfig::new(LinkFunction::Logit);
        Self {
            threshold: 1e-8,
            inference: InferenceMethod::TTest,
            confidence_level: 0.95,
            max_iterations: glm.max_iterations,
            convergence_tolerance: glm.convergence_tolerance,
        }
    }
}

impl EstimatorSettings {
    fn fluctuation_config(&self, link: LinkFunction) -> GlmConfig {
        GlmConfig {
            max_iterations: self.max_iterations,
            convergence_tolerance: self.convergence_tolerance,
            ..GlmConfig::new(link)
        }
    }
}

#[derive(Debug, Clone)]
pub struct TMLEResult {
    pub parameter: Parameter,
    pub tmle: Estimate,
    /// Plug-in estimate through the outcome model, before targeting.
    pub initial_estimate: f64,
    pub epsilon: f64,
    pub inference: InferenceMethod,
    pub confidence_level: f64,
    pub encoder: Arc<FittedEncoder>,
    pub q: Arc<dyn FittedModel>,
    pub g: Arc<dyn FittedModel>,
    pub fluctuation: Arc<Fluctuation>,
}

impl TMLEResult {
    pub fn estimate(&self) -> f64 {
        self.tmle.estimate
    }

    pub fn stderror(&self) -> f64 {
        self.tmle.stderror()
    }

    pub fn mean_inf_curve(&self) -> f64 {
        self.tmle.mean_inf_curve()
    }

    pub fn pvalue(&self) -> f64 {
        self.tmle.pvalue(self.inference)
    }

    pub fn confint(&self) -> (f64, f64) {
        self.tmle.confint(self.inference, self.confidence_level)
    }

    pub fn n(&self) -> usize {
        self.tmle.n()
    }
}

/// Fails when the parameter cannot be estimated on `dataset` at all.
pub fn check_parameter(dataset: &Dataset, parameter: &Parameter) -> Result<(), EstimationError> {
    parameter.check_treatments(dataset.treatments())?;
    if dataset.outcomes().column(parameter.target()).is_none() {
        return Err(DataError::ColumnNotFound(parameter.target().to_string()).into());
    }
    for name in parameter.confounders() {
        if dataset.confounders().column_index(name).is_none() {
            return Err(DataError::ColumnNotFound(name.clone()).into());
        }
    }
    Ok(())
}

fn outcome_link(data: &AlignedData) -> Result<LinkFunction, EstimationError> {
    match &data.outcome {
        OutcomeColumn::Continuous(_) => Ok(LinkFunction::Identity),
        OutcomeColumn::Categorical(column) if column.levels().len() == 2 => Ok(LinkFunction::Logit),
        OutcomeColumn::Categorical(column) => Err(EstimationError::UnsupportedOutcome {
            target: data.target.clone(),
            levels: column.levels().len(),
        }),
    }
}

fn outcome_target(data: &AlignedData) -> Target<'_> {
    match &data.outcome {
        OutcomeColumn::Continuous(values) => Target::Continuous(values.view()),
        OutcomeColumn::Categorical(column) => Target::Categorical(column),
    }
}

/// Estimates `parameter` on `dataset`, filling and reusing `nuisances`.
pub fn tmle(
    dataset: &Dataset,
    parameter: &Parameter,
    spec: &NuisanceSpec,
    nuisances: &mut NuisanceParameters,
    settings: &EstimatorSettings,
) -> Result<TMLEResult, EstimationError> {
    check_parameter(dataset, parameter)?;

    let data = dataset.realign(parameter.target(), parameter.confounders())?;
    if data.nrows() == 0 {
        return Err(EstimationError::EmptyData(data.target.clone()));
    }
    log::info!(
        "Estimating {parameter} on {} of {} rows",
        data.nrows(),
        dataset.nrows()
    );
    let link = outcome_link(&data)?;
    let w = data.confounders.view();

    let encoder = fit_or_reuse(
        &mut nuisances.h,
        FitKey {
            learner: format!("{:?}", spec.encoder),
            inputs: data.treatment_names.clone(),
            target: String::new(),
            rows: data.rows.clone(),
        },
        "encoder (H)",
        || Ok::<_, EstimationError>(Arc::new(spec.encoder.fit(&data.treatment_names, &data.treatments))),
    )?;

    let x = outcome_features(&encoder, &data.treatment_names, &data.treatments, w)?;
    let q_learner: &dyn Learner = match link {
        LinkFunction::Identity => spec.q_continuous.as_ref(),
        LinkFunction::Logit => spec.q_binary.as_ref(),
    };
    let q = fit_or_reuse(
        &mut nuisances.q,
        FitKey {
            learner: q_learner.fingerprint(),
            inputs: encoder
                .feature_names()
                .into_iter()
                .chain(data.confounder_names.iter().cloned())
                .collect(),
            target: data.target.clone(),
            rows: data.rows.clone(),
        },
        "outcome model (Q)",
        || q_learner.fit(x.view(), outcome_target(&data)),
    )?;

    let joint = joint_treatment(&data.treatments);
    let g = fit_or_reuse(
        &mut nuisances.g,
        FitKey {
            learner: spec.g.fingerprint(),
            inputs: data.confounder_names.clone(),
            target: joint_label(&data.treatment_names),
            rows: data.rows.clone(),
        },
        "treatment mechanism (G)",
        || spec.g.fit(w, Target::Categorical(&joint)),
    )?;

    nuisances.f = None;
    let initial = counterfactual_aggregate(parameter, nuisances, &data, settings.threshold)?;
    let initial_estimate = initial.mean().unwrap_or(f64::NAN);

    log::info!("Fitting fluctuation (F)");
    let covariate = compute_covariate(&joint, w, parameter, g.as_ref(), settings.threshold)?;
    let offset = compute_offset(&q.predict(x.view())?)?;
    let y = data.outcome_values();
    let fluctuation = Arc::new(Fluctuation::fit(
        covariate.view(),
        offset.view(),
        y.view(),
        &settings.fluctuation_config(link),
    )?);
    nuisances.f = Some(Arc::clone(&fluctuation));

    let aggregate = counterfactual_aggregate(parameter, nuisances, &data, settings.threshold)?;
    let estimate = aggregate.mean().unwrap_or(f64::NAN);
    let fitted = fluctuation.predict_mean(covariate.view(), offset.view());
    let influence_curve = &covariate * &(&y - &fitted) + &aggregate - estimate;
    if !estimate.is_finite() || influence_curve.iter().any(|v| !v.is_finite()) {
        return Err(EstimationError::NonFiniteEstimate {
            parameter: parameter.to_string(),
            threshold: settings.threshold,
        });
    }

    let tmle = Estimate::new(estimate, influence_curve, data.rows);
    log::info!(
        "{parameter}: estimate {estimate:.6} (initial {initial_estimate:.6}), se {:.6}, epsilon {:.3e}",
        tmle.stderror(),
        fluctuation.epsilon
    );

    Ok(TMLEResult {
        parameter: parameter.clone(),
        tmle,
        initial_estimate,
        epsilon: fluctuation.epsilon,
        inference: settings.inference,
        confidence_level: settings.confidence_level,
        encoder,
        q,
        g,
        fluctuation,
    })
}

/// Estimates every parameter in turn, threading one nuisance cache through
/// the runs. All parameters are checked before the first fit.
pub fn tmle_all(
    dataset: &Dataset,
    parameters: &[Parameter],
    spec: &NuisanceSpec,
    nuisances: &mut NuisanceParameters,
    settings: &EstimatorSettings,
) -> Result<Vec<TMLEResult>, EstimationError> {
    for parameter in parameters {
        check_parameter(dataset, parameter)?;
    }
    parameters
        .iter()
        .map(|parameter| tmle(dataset, parameter, spec, nuisances, settings))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{
        CategoricalColumn, ConfounderTable, OutcomeTable, TreatmentTable, reformat,
    };
    use crate::parameter::{AverageTreatmentEffect, InteractionEffect, TreatmentContrast};
    use ndarray::{Array1, Array2, array};

    fn dataset(outcome: OutcomeColumn) -> Dataset {
        let n = 8;
        let t = CategoricalColumn::from_complete(
            (0..n).map(|i| if i % 2 == 0 { "a" } else { "b" }),
        );
        let w = Array2::from_shape_fn((n, 1), |(i, _)| (i as f64 * 0.37).sin());
        reformat(
            TreatmentTable::new(vec!["T".into()], vec![t]).unwrap(),
            ConfounderTable::new(vec!["W".into()], w).unwrap(),
            OutcomeTable::new(vec!["y".into()], vec![outcome]).unwrap(),
        )
        .unwrap()
    }

    fn ate(target: &str, confounders: &[&str]) -> Parameter {
        Parameter::ATE(AverageTreatmentEffect {
            target: target.into(),
            treatment: vec![TreatmentContrast {
                name: "T".into(),
                case: "b".into(),
                control: "a".into(),
            }],
            confounders: confounders.iter().map(|s| s.to_string()).collect(),
        })
    }

    #[test]
    fn unknown_confounder_fails_before_fitting() {
        let data = dataset(OutcomeColumn::Continuous(Array1::linspace(0.0, 1.0, 8)));
        let mut nuisances = NuisanceParameters::default();
        let err = tmle(
            &data,
            &ate("y", &["V"]),
            &NuisanceSpec::default(),
            &mut nuisances,
            &EstimatorSettings::default(),
        )
        .unwrap_err();
        assert!(matches!(err, EstimationError::Data(DataError::ColumnNotFound(ref c)) if c == "V"));
        assert!(nuisances.h.is_none() && nuisances.q.is_none() && nuisances.g.is_none());
    }

    #[test]
    fn three_level_outcome_is_unsupported() {
        let outcome = OutcomeColumn::Categorical(CategoricalColumn::from_complete([
            "x", "y", "z", "x", "y", "z", "x", "y",
        ]));
        let err = tmle(
            &dataset(outcome),
            &ate("y", &["W"]),
            &NuisanceSpec::default(),
            &mut NuisanceParameters::default(),
            &EstimatorSettings::default(),
        )
        .unwrap_err();
        assert!(matches!(err, EstimationError::UnsupportedOutcome { levels: 3, .. }));
    }

    #[test]
    fn all_missing_target_is_empty() {
        let outcome = OutcomeColumn::Continuous(Array1::from_elem(8, f64::NAN));
        let err = tmle(
            &dataset(outcome),
            &ate("y", &["W"]),
            &NuisanceSpec::default(),
            &mut NuisanceParameters::default(),
            &EstimatorSettings::default(),
        )
        .unwrap_err();
        assert!(matches!(err, EstimationError::EmptyData(ref t) if t == "y"));
    }

    #[test]
    fn unseen_assignment_without_floor_is_an_error() {
        // No row has T1 = 1 and T2 = 1.
        let n = 12;
        let pattern = [("0", "0"), ("0", "1"), ("1", "0")];
        let t1 = CategoricalColumn::from_complete((0..n).map(|i| pattern[i % 3].0));
        let t2 = CategoricalColumn::from_complete((0..n).map(|i| pattern[i % 3].1));
        let w = Array2::from_shape_fn((n, 1), |(i, _)| (i as f64 * 0.37).sin());
        let y = Array1::from_shape_fn(n, |i| (i % 3) as f64 + (i as f64 * 0.91).cos());
        let data = reformat(
            TreatmentTable::new(vec!["T1".into(), "T2".into()], vec![t1, t2]).unwrap(),
            ConfounderTable::new(vec!["W".into()], w).unwrap(),
            y,
        )
        .unwrap();
        let parameter = Parameter::IATE(InteractionEffect {
            target: "y".into(),
            treatment: ["T1", "T2"]
                .iter()
                .map(|name| TreatmentContrast {
                    name: name.to_string(),
                    case: "1".into(),
                    control: "0".into(),
                })
                .collect(),
            confounders: vec!["W".into()],
        });
        let settings = EstimatorSettings {
            threshold: 0.0,
            ..EstimatorSettings::default()
        };
        let err = tmle(
            &data,
            &parameter,
            &NuisanceSpec::default(),
            &mut NuisanceParameters::default(),
            &settings,
        )
        .unwrap_err();
        assert!(matches!(err, EstimationError::NonFiniteEstimate { threshold, .. } if threshold == 0.0));

        let floored = tmle(
            &data,
            &parameter,
            &NuisanceSpec::default(),
            &mut NuisanceParameters::default(),
            &EstimatorSettings::default(),
        )
        .unwrap();
        assert!(floored.estimate().is_finite());
    }

    #[test]
    fn influence_curve_is_centered_for_continuous_outcome() {
        let outcome = OutcomeColumn::Continuous(array![0.3, 1.2, -0.1, 1.4, 0.2, 0.9, 0.5, 1.8]);
        let result = tmle(
            &dataset(outcome),
            &ate("y", &["W"]),
            &NuisanceSpec::default(),
            &mut NuisanceParameters::default(),
            &EstimatorSettings::default(),
        )
        .unwrap();
        assert_eq!(result.n(), 8);
        assert!(result.mean_inf_curve().abs() < 1e-8);
        assert!(result.stderror() > 0.0);
        let (low, high) = result.confint();
        assert!(low < result.estimate() && result.estimate() < high);
    }
}
