use crate::data::{AlignedData, CategoricalColumn};
use crate::encoder::{EncoderError, FittedEncoder};
use crate::estimate::EstimationError;
use crate::fluctuation::compute_offset;
use crate::indicator::{compute_covariate, indicator_fns};
use crate::joint::joint_treatment;
use crate::nuisance::NuisanceParameters;
use crate::parameter::Parameter;
use ndarray::{Array1, Array2, ArrayView2, s};

/// Design matrix of the outcome model: encoded treatments followed by the confounders.
pub fn outcome_features(
    encoder: &FittedEncoder,
    treatment_names: &[String],
    treatments: &[CategoricalColumn],
    confounders: ArrayView2<f64>,
) -> Result<Array2<f64>, EncoderError> {
    let encoded = encoder.transform(treatment_names, treatments)?;
    let width = encoded.ncols();
    let mut x = Array2::zeros((confounders.nrows(), width + confounders.ncols()));
    x.slice_mut(s![.., ..width]).assign(&encoded);
    x.slice_mut(s![.., width..]).assign(&confounders);
    Ok(x)
}

/// Every row's treatment replaced by `levels`, one level per treatment column.
fn force_treatments(
    data: &AlignedData,
    levels: &[String],
) -> Result<Vec<CategoricalColumn>, EstimationError> {
    data.treatments
        .iter()
        .zip(&data.treatment_names)
        .zip(levels)
        .map(|((column, name), level)| {
            column.forced(level).ok_or_else(|| EstimationError::UnknownLevel {
                treatment: name.clone(),
                level: level.clone(),
            })
        })
        .collect()
}

/// Row-wise plug-in contrast: `sum(sign * E[Y | T = t, W])` over the
/// assignments `t` of the parameter's indicator map.
///
/// Predictions go through the fluctuation when `nuisances.f` is set and
/// through the outcome model alone otherwise.
pub fn counterfactual_aggregate(
    parameter: &Parameter,
    nuisances: &NuisanceParameters,
    data: &AlignedData,
    threshold: f64,
) -> Result<Array1<f64>, EstimationError> {
    let encoder = nuisances
        .h
        .as_ref()
        .ok_or(EstimationError::NuisanceNotFitted("H"))?;
    let q = nuisances
        .q
        .as_ref()
        .ok_or(EstimationError::NuisanceNotFitted("Q"))?;
    let w = data.confounders.view();

    let mut aggregate = Array1::zeros(data.nrows());
    for entry in indicator_fns(parameter).entries() {
        let forced = force_treatments(data, &entry.levels)?;
        let x = outcome_features(&encoder.artifact, &data.treatment_names, &forced, w)?;
        let prediction = q.artifact.predict(x.view())?;

        let counterfactual = match &nuisances.f {
            Some(fluctuation) => {
                let g = nuisances
                    .g
                    .as_ref()
                    .ok_or(EstimationError::NuisanceNotFitted("G"))?;
                let joint = joint_treatment(&forced);
                let covariate =
                    compute_covariate(&joint, w, parameter, g.artifact.as_ref(), threshold)?;
                let offset = compute_offset(&prediction)?;
                fluctuation.predict_mean(covariate.view(), offset.view())
            }
            None => prediction.mean()?,
        };
        aggregate.scaled_add(entry.sign, &counterfactual);
    }
    Ok(aggregate)
}
