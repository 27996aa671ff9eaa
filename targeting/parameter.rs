//! Causal parameters: counterfactual mean (CM), average treatment effect (ATE)
//! and interaction average treatment effect (IATE).
//!
//! A parameter names its target outcome, its confounders and, in order, its
//! treatment variables with the levels that define the contrast. The order of
//! the treatment variables must match the order of the treatment table the
//! parameter is estimated against.

use crate::data::TreatmentTable;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum ParameterError {
    #[error(
        "The parameter's treatment variables {parameter:?} do not match the treatment columns {data:?}."
    )]
    TreatmentMismatch {
        parameter: Vec<String>,
        data: Vec<String>,
    },
    #[error(
        "The treatment columns {data:?} are ordered differently from the parameter's treatment variables {parameter:?}. Please align the ordering of the treatment table with the parameter."
    )]
    TreatmentOrder {
        parameter: Vec<String>,
        data: Vec<String>,
    },
    #[error(
        "Level '{level}' of treatment '{treatment}' was not observed. Observed levels: {observed:?}."
    )]
    UnknownLevel {
        treatment: String,
        level: String,
        observed: Vec<String>,
    },
    #[error("A parameter must name at least one treatment variable.")]
    NoTreatment,
}

/// One treatment variable fixed at a single level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreatmentLevel {
    pub name: String,
    pub level: String,
}

/// One treatment variable contrasted between two levels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreatmentContrast {
    pub name: String,
    pub case: String,
    pub control: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterfactualMean {
    pub target: String,
    pub treatment: Vec<TreatmentLevel>,
    pub confounders: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AverageTreatmentEffect {
    pub target: String,
    pub treatment: Vec<TreatmentContrast>,
    pub confounders: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InteractionEffect {
    pub target: String,
    pub treatment: Vec<TreatmentContrast>,
    pub confounders: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Parameter {
    CM(CounterfactualMean),
    ATE(AverageTreatmentEffect),
    IATE(InteractionEffect),
}

impl Parameter {
    pub fn target(&self) -> &str {
        match self {
            Parameter::CM(p) => &p.target,
            Parameter::ATE(p) => &p.target,
            Parameter::IATE(p) => &p.target,
        }
    }

    pub fn confounders(&self) -> &[String] {
        match self {
            Parameter::CM(p) => &p.confounders,
            Parameter::ATE(p) => &p.confounders,
            Parameter::IATE(p) => &p.confounders,
        }
    }

    pub fn treatment_names(&self) -> Vec<String> {
        match self {
            Parameter::CM(p) => p.treatment.iter().map(|t| t.name.clone()).collect(),
            Parameter::ATE(p) => p.treatment.iter().map(|t| t.name.clone()).collect(),
            Parameter::IATE(p) => p.treatment.iter().map(|t| t.name.clone()).collect(),
        }
    }

    /// Every (treatment, level) pair the parameter refers to.
    pub fn referenced_levels(&self) -> Vec<(&str, &str)> {
        match self {
            Parameter::CM(p) => p
                .treatment
                .iter()
                .map(|t| (t.name.as_str(), t.level.as_str()))
                .collect(),
            Parameter::ATE(AverageTreatmentEffect { treatment, .. })
            | Parameter::IATE(InteractionEffect { treatment, .. }) => treatment
                .iter()
                .flat_map(|t| {
                    [
                        (t.name.as_str(), t.case.as_str()),
                        (t.name.as_str(), t.control.as_str()),
                    ]
                })
                .collect(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Parameter::CM(_) => "CM",
            Parameter::ATE(_) => "ATE",
            Parameter::IATE(_) => "IATE",
        }
    }

    /// Checks that the parameter's treatment variables are exactly the columns
    /// of `treatments`, in the same order, and that every level it refers to
    /// was observed.
    pub fn check_treatments(&self, treatments: &TreatmentTable) -> Result<(), ParameterError> {
        let parameter = self.treatment_names();
        if parameter.is_empty() {
            return Err(ParameterError::NoTreatment);
        }
        if parameter != treatments.names {
            let mut sorted_parameter = parameter.clone();
            let mut sorted_data = treatments.names.clone();
            sorted_parameter.sort();
            sorted_data.sort();
            return Err(if sorted_parameter == sorted_data {
                ParameterError::TreatmentOrder {
                    parameter,
                    data: treatments.names.clone(),
                }
            } else {
                ParameterError::TreatmentMismatch {
                    parameter,
                    data: treatments.names.clone(),
                }
            });
        }

        for (index, (name, level)) in self.referenced_levels().into_iter().enumerate() {
            // Levels come in treatment order, two per variable for contrasts.
            let column_index = match self {
                Parameter::CM(_) => index,
                _ => index / 2,
            };
            let column = &treatments.columns[column_index];
            if column.level_index(level).is_none() {
                return Err(ParameterError::UnknownLevel {
                    treatment: name.to_string(),
                    level: level.to_string(),
                    observed: column.levels().to_vec(),
                });
            }
        }
        Ok(())
    }
}

impl std::fmt::Display for Parameter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let treatments = match self {
            Parameter::CM(p) => p
                .treatment
                .iter()
                .map(|t| format!("{}={}", t.name, t.level))
                .collect::<Vec<_>>(),
            Parameter::ATE(AverageTreatmentEffect { treatment, .. })
            | Parameter::IATE(InteractionEffect { treatment, .. }) => treatment
                .iter()
                .map(|t| format!("{}: {} -> {}", t.name, t.control, t.case))
                .collect(),
        };
        write!(f, "{}[{}; {}]", self.kind(), self.target(), treatments.join(", "))
    }
}
