#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]

pub mod compose;
pub mod config;
pub mod counterfactual;
pub mod data;
pub mod encoder;
pub mod estimate;
pub mod faer_ndarray;
pub mod fluctuation;
pub mod glm;
pub mod indicator;
pub mod inference;
pub mod joint;
pub mod learners;
pub mod nuisance;
pub mod parameter;

pub use compose::{ComposedEstimate, compose};
pub use data::{Dataset, load_dataset, reformat};
pub use estimate::{EstimationError, EstimatorSettings, TMLEResult, tmle, tmle_all};
pub use inference::{Estimate, InferenceMethod};
pub use nuisance::{NuisanceParameters, NuisanceSpec};
pub use parameter::Parameter;
