//! Signed indicators of a causal contrast and the clever covariate built on them.
//!
//! For a parameter over `k` treatment variables, the indicator map assigns a
//! sign to every joint treatment assignment the contrast involves:
//!
//! - CM:   the fixed assignment, weight `+1`;
//! - ATE:  case assignment `+1`, control assignment `-1`;
//! - IATE: every combination of case/control across the `k` variables with
//!         weight `(-1)^(k - #case)`, the inclusion-exclusion form of the
//!         interaction contrast.
//!
//! The clever covariate is `indicator(T) / max(g(T | W), threshold)`.

use crate::data::CategoricalColumn;
use crate::joint::joint_label;
use crate::learners::{FittedModel, LearnerError, Prediction};
use crate::parameter::Parameter;
use ahash::AHashMap;
use itertools::Itertools;
use ndarray::{Array1, ArrayView2};

#[derive(Debug, Clone, PartialEq)]
pub struct IndicatorEntry {
    /// One level per treatment variable, in treatment order.
    pub levels: Vec<String>,
    pub label: String,
    pub sign: f64,
}

#[derive(Debug, Clone)]
pub struct IndicatorMap {
    entries: Vec<IndicatorEntry>,
    weights: AHashMap<String, f64>,
}

impl IndicatorMap {
    fn new(entries: Vec<IndicatorEntry>) -> Self {
        let mut weights = AHashMap::with_capacity(entries.len());
        for entry in &entries {
            *weights.entry(entry.label.clone()).or_insert(0.0) += entry.sign;
        }
        Self { entries, weights }
    }

    pub fn entries(&self) -> &[IndicatorEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Signed weight of a joint label; zero when the label is not part of the contrast.
    pub fn weight(&self, label: &str) -> f64 {
        self.weights.get(label).copied().unwrap_or(0.0)
    }
}

fn entry(levels: Vec<String>, sign: f64) -> IndicatorEntry {
    IndicatorEntry {
        label: joint_label(&levels),
        levels,
        sign,
    }
}

pub fn indicator_fns(parameter: &Parameter) -> IndicatorMap {
    let entries = match parameter {
        Parameter::CM(p) => vec![entry(
            p.treatment.iter().map(|t| t.level.clone()).collect(),
            1.0,
        )],
        Parameter::ATE(p) => vec![
            entry(p.treatment.iter().map(|t| t.case.clone()).collect(), 1.0),
            entry(p.treatment.iter().map(|t| t.control.clone()).collect(), -1.0),
        ],
        Parameter::IATE(p) => {
            let k = p.treatment.len() as i32;
            p.treatment
                .iter()
                .map(|t| [(t.case.clone(), true), (t.control.clone(), false)])
                .multi_cartesian_product()
                .map(|combination| {
                    let n_case = combination.iter().filter(|(_, is_case)| *is_case).count() as i32;
                    let sign = if (k - n_case) % 2 == 0 { 1.0 } else { -1.0 };
                    entry(
                        combination.into_iter().map(|(level, _)| level).collect(),
                        sign,
                    )
                })
                .collect()
        }
    };
    IndicatorMap::new(entries)
}

/// Looks up every row's joint label; rows outside the contrast (and missing
/// rows) get weight zero.
pub fn indicator_values(indicators: &IndicatorMap, joint: &CategoricalColumn) -> Array1<f64> {
    (0..joint.len())
        .map(|row| joint.value(row).map_or(0.0, |label| indicators.weight(label)))
        .collect()
}

/// Floors every value at `threshold`.
pub fn plateau(values: &mut Array1<f64>, threshold: f64) {
    values.mapv_inplace(|v| v.max(threshold));
}

/// Probability mass the treatment mechanism assigns to each row's joint label.
pub fn joint_density(
    joint: &CategoricalColumn,
    confounders: ArrayView2<f64>,
    g: &dyn FittedModel,
) -> Result<Array1<f64>, LearnerError> {
    let Prediction::Probabilistic(table) = g.predict(confounders)? else {
        return Err(LearnerError::NotProbabilistic);
    };
    Ok((0..joint.len())
        .map(|row| joint.value(row).map_or(0.0, |label| table.pdf(row, label)))
        .collect())
}

/// The clever covariate: signed indicator over the truncated joint density.
pub fn compute_covariate(
    joint: &CategoricalColumn,
    confounders: ArrayView2<f64>,
    parameter: &Parameter,
    g: &dyn FittedModel,
    threshold: f64,
) -> Result<Array1<f64>, LearnerError> {
    let indicators = indicator_fns(parameter);
    let mut density = joint_density(joint, confounders, g)?;
    plateau(&mut density, threshold);
    Ok(indicator_values(&indicators, joint) / density)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::learners::{ConstantClassifier, Learner, Target};
    use crate::parameter::{
        AverageTreatmentEffect, CounterfactualMean, InteractionEffect, TreatmentContrast,
        TreatmentLevel,
    };
    use approx::assert_abs_diff_eq;
    use ndarray::{Array2, array};

    fn contrast(name: &str, case: &str, control: &str) -> TreatmentContrast {
        TreatmentContrast {
            name: name.into(),
            case: case.into(),
            control: control.into(),
        }
    }

    fn sign_of(map: &IndicatorMap, label: &str) -> f64 {
        map.entries()
            .iter()
            .find(|e| e.label == label)
            .map(|e| e.sign)
            .unwrap_or_else(|| panic!("label {label} missing"))
    }

    #[test]
    fn counterfactual_mean_has_single_positive_entry() {
        let parameter = Parameter::CM(CounterfactualMean {
            target: "y".into(),
            treatment: vec![
                TreatmentLevel {
                    name: "T1".into(),
                    level: "a".into(),
                },
                TreatmentLevel {
                    name: "T2".into(),
                    level: "1".into(),
                },
            ],
            confounders: vec![],
        });
        let map = indicator_fns(&parameter);
        assert_eq!(map.len(), 1);
        assert_eq!(map.weight("a_&_1"), 1.0);
    }

    #[test]
    fn ate_signs_case_and_control() {
        let parameter = Parameter::ATE(AverageTreatmentEffect {
            target: "y".into(),
            treatment: vec![contrast("T1", "1", "0"), contrast("T2", "b", "a")],
            confounders: vec![],
        });
        let map = indicator_fns(&parameter);
        assert_eq!(map.len(), 2);
        assert_eq!(map.weight("1_&_b"), 1.0);
        assert_eq!(map.weight("0_&_a"), -1.0);
        assert_eq!(map.weight("1_&_a"), 0.0);
    }

    #[test]
    fn iate_uses_inclusion_exclusion_signs() {
        let parameter = Parameter::IATE(InteractionEffect {
            target: "y".into(),
            treatment: vec![
                contrast("T1", "1", "0"),
                contrast("T2", "1", "0"),
                contrast("T3", "1", "0"),
            ],
            confounders: vec![],
        });
        let map = indicator_fns(&parameter);
        assert_eq!(map.len(), 8);
        assert_eq!(sign_of(&map, "1_&_1_&_1"), 1.0);
        assert_eq!(sign_of(&map, "1_&_1_&_0"), -1.0);
        assert_eq!(sign_of(&map, "1_&_0_&_0"), 1.0);
        assert_eq!(sign_of(&map, "0_&_0_&_0"), -1.0);
        let total: f64 = map.entries().iter().map(|e| e.sign).sum();
        assert_eq!(total, 0.0);
    }

    #[test]
    fn labels_outside_the_contrast_contribute_zero() {
        let parameter = Parameter::ATE(AverageTreatmentEffect {
            target: "y".into(),
            treatment: vec![contrast("T", "b", "a")],
            confounders: vec![],
        });
        let joint = CategoricalColumn::from_values([Some("a"), Some("b"), Some("c"), None]);
        let values = indicator_values(&indicator_fns(&parameter), &joint);
        assert_eq!(values, array![-1.0, 1.0, 0.0, 0.0]);
    }

    #[test]
    fn plateau_floors_small_values() {
        let mut values = array![0.0, 1e-12, 0.3];
        plateau(&mut values, 1e-3);
        assert_eq!(values, array![1e-3, 1e-3, 0.3]);
    }

    #[test]
    fn covariate_is_inverse_weighted_and_truncated() {
        let parameter = Parameter::ATE(AverageTreatmentEffect {
            target: "y".into(),
            treatment: vec![contrast("T", "b", "a")],
            confounders: vec![],
        });
        // g(a) = 0.75, g(b) = 0.25, "c" is unknown to g.
        let train = CategoricalColumn::from_complete(["a", "a", "a", "b"]);
        let w = Array2::zeros((4, 1));
        let g = ConstantClassifier
            .fit(w.view(), Target::Categorical(&train))
            .unwrap();

        let joint = CategoricalColumn::from_complete(["a", "b", "c", "b"]);
        let covariate = compute_covariate(&joint, w.view(), &parameter, g.as_ref(), 0.01).unwrap();
        assert_abs_diff_eq!(covariate[0], -1.0 / 0.75, epsilon = 1e-12);
        assert_abs_diff_eq!(covariate[1], 1.0 / 0.25, epsilon = 1e-12);
        assert_eq!(covariate[2], 0.0);

        let density = joint_density(&joint, w.view(), g.as_ref()).unwrap();
        assert_eq!(density[2], 0.0);
    }
}
