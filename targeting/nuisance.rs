//! Cache of fitted nuisance artifacts shared across estimation runs.
//!
//! Every cached artifact carries the `FitKey` it was produced from: the
//! learner's fingerprint, the input and target column names, and the rows it
//! was fitted on. A slot is reused only when the key of the requested fit
//! equals the cached key, so the reuse decision is a pure function of the two.
//! The fluctuation is specific to a single parameter and is never reused.

use crate::encoder::{FittedEncoder, OneHotEncoder};
use crate::fluctuation::Fluctuation;
use crate::learners::{FittedModel, Learner, LearnerSpec, LinearRegressor};
use std::fmt;
use std::sync::Arc;

/// Everything that determines a nuisance fit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FitKey {
    pub learner: String,
    pub inputs: Vec<String>,
    pub target: String,
    pub rows: Vec<usize>,
}

/// True when a cached fit made under `cached` cannot stand in for a fit under `current`.
pub fn needs_refit(current: &FitKey, cached: Option<&FitKey>) -> bool {
    cached != Some(current)
}

pub struct FittedSlot<T: ?Sized> {
    pub artifact: Arc<T>,
    pub key: FitKey,
}

impl<T: ?Sized> Clone for FittedSlot<T> {
    fn clone(&self) -> Self {
        Self {
            artifact: Arc::clone(&self.artifact),
            key: self.key.clone(),
        }
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for FittedSlot<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FittedSlot")
            .field("artifact", &self.artifact)
            .field("learner", &self.key.learner)
            .field("target", &self.key.target)
            .field("rows", &self.key.rows.len())
            .finish()
    }
}

/// Returns the cached artifact when its key matches, otherwise fits a new one
/// and stores it in the slot.
pub fn fit_or_reuse<T: ?Sized, E>(
    slot: &mut Option<FittedSlot<T>>,
    key: FitKey,
    name: &str,
    fit: impl FnOnce() -> Result<Arc<T>, E>,
) -> Result<Arc<T>, E> {
    if let Some(cached) = slot.as_ref() {
        if !needs_refit(&key, Some(&cached.key)) {
            log::info!("Reusing {name}");
            return Ok(Arc::clone(&cached.artifact));
        }
    }
    log::info!(
        "Fitting {name} on {} rows with {}",
        key.rows.len(),
        key.learner
    );
    let artifact = fit()?;
    *slot = Some(FittedSlot {
        artifact: Arc::clone(&artifact),
        key,
    });
    Ok(artifact)
}

/// Fitted treatment encoder (H), outcome model (Q), treatment mechanism (G)
/// and fluctuation (F).
///
/// A `FitKey` records column names and row indices, not data values. One
/// `NuisanceParameters` must only be threaded through runs on the same
/// `Dataset`: on another dataset of the same shape the cached H, Q and G are
/// reused as they are. Start from `NuisanceParameters::new()` for new data.
#[derive(Debug, Clone, Default)]
pub struct NuisanceParameters {
    pub h: Option<FittedSlot<FittedEncoder>>,
    pub q: Option<FittedSlot<dyn FittedModel>>,
    pub g: Option<FittedSlot<dyn FittedModel>>,
    pub f: Option<Arc<Fluctuation>>,
}

impl NuisanceParameters {
    pub fn new() -> Self {
        Self::default()
    }
}

/// The learners used for each nuisance slot.
#[derive(Debug)]
pub struct NuisanceSpec {
    pub encoder: OneHotEncoder,
    /// Outcome model for continuous targets.
    pub q_continuous: Box<dyn Learner>,
    /// Outcome model for binary targets.
    pub q_binary: Box<dyn Learner>,
    pub g: Box<dyn Learner>,
}

impl Default for NuisanceSpec {
    fn default() -> Self {
        Self {
            encoder: OneHotEncoder::default(),
            q_continuous: Box::new(LinearRegressor),
            q_binary: LearnerSpec::default_logistic().build(),
            g: LearnerSpec::default_logistic().build(),
        }
    }
}
