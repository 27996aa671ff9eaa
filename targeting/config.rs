//! Run configuration loaded from TOML.

use crate::encoder::OneHotEncoder;
use crate::estimate::EstimatorSettings;
use crate::inference::InferenceMethod;
use crate::learners::LearnerSpec;
use crate::nuisance::NuisanceSpec;
use crate::parameter::Parameter;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read configuration file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse configuration: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("The confidence level must lie strictly between 0 and 1, got {0}.")]
    InvalidConfidenceLevel(f64),
    #[error("The threshold must be a positive number, got {0}.")]
    InvalidThreshold(f64),
}

fn default_q_continuous() -> LearnerSpec {
    LearnerSpec::Linear
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearnerConfig {
    #[serde(default = "default_q_continuous")]
    pub q_continuous: LearnerSpec,
    #[serde(default = "LearnerSpec::default_logistic")]
    pub q_binary: LearnerSpec,
    #[serde(default = "LearnerSpec::default_logistic")]
    pub g: LearnerSpec,
}

impl Default for LearnerConfig {
    fn default() -> Self {
        Self {
            q_continuous: default_q_continuous(),
            q_binary: LearnerSpec::default_logistic(),
            g: LearnerSpec::default_logistic(),
        }
    }
}

fn default_threshold() -> f64 {
    EstimatorSettings::default().threshold
}

fn default_confidence_level() -> f64 {
    EstimatorSettings::default().confidence_level
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    #[serde(default)]
    pub inference: InferenceMethod,
    #[serde(default = "default_confidence_level")]
    pub confidence_level: f64,
    #[serde(default)]
    pub learners: LearnerConfig,
    #[serde(default)]
    pub parameters: Vec<Parameter>,
}

impl RunConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        if !(config.confidence_level > 0.0 && config.confidence_level < 1.0) {
            return Err(ConfigError::InvalidConfidenceLevel(config.confidence_level));
        }
        if !(config.threshold > 0.0 && config.threshold.is_finite()) {
            return Err(ConfigError::InvalidThreshold(config.threshold));
        }
        Ok(config)
    }

    pub fn settings(&self) -> EstimatorSettings {
        EstimatorSettings {
            threshold: self.threshold,
            inference: self.inference,
            confidence_level: self.confidence_level,
            ..EstimatorSettings::default()
        }
    }

    pub fn nuisance_spec(&self) -> NuisanceSpec {
        NuisanceSpec {
            encoder: OneHotEncoder::default(),
            q_continuous: self.learners.q_continuous.build(),
            q_binary: self.learners.q_binary.build(),
            g: self.learners.g.build(),
        }
    }
}
