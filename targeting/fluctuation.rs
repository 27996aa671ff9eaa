//! The targeting step: a one-parameter GLM that moves the initial outcome
//! model along the clever covariate.
//!
//! The fluctuation regresses the outcome on the covariate alone, with no
//! intercept and the initial prediction as a fixed offset on the link scale.
//! Its prediction for new data is `inverse_link(offset + epsilon * covariate)`.

use crate::glm::{GlmConfig, GlmError, GlmStatus, LinkFunction, fit_glm};
use crate::learners::{LearnerError, Prediction};
use ndarray::{Array1, ArrayView1, Axis};

/// The initial prediction expressed on the link scale of the fluctuation.
///
/// Binary classifier output becomes the logit of the second level's
/// probability; Gaussian output contributes its mean and point predictions
/// are used as they are.
pub fn compute_offset(prediction: &Prediction) -> Result<Array1<f64>, LearnerError> {
    match prediction {
        Prediction::Probabilistic(table) => {
            if table.levels().len() != 2 {
                return Err(LearnerError::NotBinary {
                    levels: table.levels().len(),
                });
            }
            Ok(table
                .probabilities()
                .column(1)
                .mapv(|p| LinkFunction::Logit.apply(p)))
        }
        Prediction::Gaussian { mean, .. } => Ok(mean.clone()),
        Prediction::Point(values) => Ok(values.clone()),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Fluctuation {
    pub epsilon: f64,
    pub link: LinkFunction,
    pub deviance: f64,
    pub status: GlmStatus,
    pub iteration: usize,
}

impl Fluctuation {
    pub fn fit(
        covariate: ArrayView1<f64>,
        offset: ArrayView1<f64>,
        y: ArrayView1<f64>,
        config: &GlmConfig,
    ) -> Result<Self, GlmError> {
        let n = covariate.len();
        let x = covariate.to_owned().insert_axis(Axis(1));
        let fit = fit_glm(
            x.view(),
            y,
            offset,
            Array1::ones(n).view(),
            Array1::zeros(1).view(),
            config,
        )?;
        log::debug!(
            "Fluctuation epsilon = {:.6e} after {} iteration(s)",
            fit.beta[0],
            fit.iteration
        );
        Ok(Self {
            epsilon: fit.beta[0],
            link: config.link_function,
            deviance: fit.deviance,
            status: fit.status,
            iteration: fit.iteration,
        })
    }

    /// Fluctuated mean for rows with the given covariate and offset.
    pub fn predict_mean(&self, covariate: ArrayView1<f64>, offset: ArrayView1<f64>) -> Array1<f64> {
        let link = self.link;
        let eps = self.epsilon;
        ndarray::Zip::from(covariate)
            .and(offset)
            .map_collect(|&h, &o| link.inverse(o + eps * h))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::learners::ProbabilityTable;
    use approx::assert_abs_diff_eq;
    use ndarray::{Array2, array};

    #[test]
    fn offset_of_binary_table_is_logit_of_second_level() {
        let table = ProbabilityTable::new(
            vec!["0".into(), "1".into()],
            array![[0.5, 0.5], [0.2, 0.8]],
        );
        let offset = compute_offset(&Prediction::Probabilistic(table)).unwrap();
        assert_abs_diff_eq!(offset[0], 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(offset[1], (0.8f64 / 0.2).ln(), epsilon = 1e-9);
    }

    #[test]
    fn offset_rejects_multiclass_tables() {
        let table = ProbabilityTable::new(
            vec!["a".into(), "b".into(), "c".into()],
            Array2::from_elem((1, 3), 1.0 / 3.0),
        );
        assert!(matches!(
            compute_offset(&Prediction::Probabilistic(table)),
            Err(LearnerError::NotBinary { levels: 3 })
        ));
    }

    #[test]
    fn offset_of_regression_output_is_the_mean() {
        let gaussian = Prediction::Gaussian {
            mean: array![1.0, 2.0],
            std: 3.0,
        };
        assert_eq!(compute_offset(&gaussian).unwrap(), array![1.0, 2.0]);
        let point = Prediction::Point(array![-1.0]);
        assert_eq!(compute_offset(&point).unwrap(), array![-1.0]);
    }

    #[test]
    fn identity_fluctuation_is_least_squares_through_origin() {
        let h = array![1.0, 2.0, -1.0, 0.5];
        let offset = array![0.0, 1.0, 2.0, 3.0];
        let y = array![0.5, 2.0, 1.5, 3.25];
        let fluctuation = Fluctuation::fit(
            h.view(),
            offset.view(),
            y.view(),
            &GlmConfig::new(LinkFunction::Identity),
        )
        .unwrap();
        let residual = &y - &offset;
        let expected = h.dot(&residual) / h.dot(&h);
        assert_abs_diff_eq!(fluctuation.epsilon, expected, epsilon = 1e-10);
        assert_eq!(fluctuation.status, GlmStatus::Converged);

        let fitted = fluctuation.predict_mean(h.view(), offset.view());
        // Residuals are orthogonal to the covariate.
        assert_abs_diff_eq!(h.dot(&(&y - &fitted)), 0.0, epsilon = 1e-9);
    }

    #[test]
    fn logistic_fluctuation_solves_the_score_equation() {
        let h = array![1.0, -1.0, 2.0, 0.5, -0.5, 1.5, -2.0, 1.0];
        let offset = array![0.1, -0.2, 0.3, 0.0, 0.4, -0.1, 0.2, -0.3];
        let y = array![1.0, 0.0, 1.0, 1.0, 0.0, 0.0, 0.0, 1.0];
        let fluctuation = Fluctuation::fit(
            h.view(),
            offset.view(),
            y.view(),
            &GlmConfig::new(LinkFunction::Logit),
        )
        .unwrap();
        let fitted = fluctuation.predict_mean(h.view(), offset.view());
        assert_abs_diff_eq!(h.dot(&(&y - &fitted)), 0.0, epsilon = 1e-8);
    }
}
