//! Adaptive-bounds outlier detection
//!
//! Each observation is checked against the confidence band predicted at the
//! previous step. Rejected observations are replaced by the previous
//! prediction, so the signal model keeps following its own trajectory, while
//! the uncertainty model still sees the raw deviation: a streak of outliers
//! widens the band until the filter can catch up with a genuine level shift.

use crate::error::{FilterError, Result};
use crate::model::{SignalModel, UncertaintyModel};
use crate::row::{ObservationRow, ResultRow};
use crate::traits::FilterAlgorithm;
use log::trace;
use serde::{Deserialize, Serialize};

/// Comparison used against the predicted limits
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoundCheck {
    /// Outlier when strictly outside `[lower, upper]`
    #[default]
    Exclusive,
    /// Outlier when outside `(lower, upper)`; landing on a limit counts
    Inclusive,
}

impl BoundCheck {
    /// Non-finite limits never flag an outlier
    pub fn is_outside(self, value: f64, lower: f64, upper: f64) -> bool {
        if !lower.is_finite() || !upper.is_finite() {
            return false;
        }
        match self {
            BoundCheck::Exclusive => value < lower || value > upper,
            BoundCheck::Inclusive => value <= lower || value >= upper,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AdaptiveBoundsAlgorithm {
    pub bound_check: BoundCheck,
}

impl AdaptiveBoundsAlgorithm {
    pub fn new(bound_check: BoundCheck) -> Self {
        Self { bound_check }
    }
}

impl FilterAlgorithm for AdaptiveBoundsAlgorithm {
    fn step(
        &self,
        observation: &ObservationRow,
        previous: &[ResultRow],
        signal_model: &mut SignalModel,
        uncertainty_model: &mut UncertaintyModel,
    ) -> Result<ResultRow> {
        let value = match observation.values.as_slice() {
            [value] => *value,
            values => {
                return Err(FilterError::InputShape {
                    expected: 1,
                    got: values.len(),
                })
            }
        };

        let prior = previous.last().and_then(|row| {
            Some((
                *row.predicted_values.first()?,
                *row.predicted_lower_limits.first()?,
                *row.predicted_upper_limits.first()?,
            ))
        });

        // NaN or infinite input is never accepted into the signal kernel
        let (is_outlier, accepted, deviation) = match prior {
            Some((predicted, _, _)) if !value.is_finite() => (true, predicted, 0.0),
            Some((predicted, lower, upper)) => {
                let is_outlier = self.bound_check.is_outside(value, lower, upper);
                let deviation = (value - predicted).abs();
                (
                    is_outlier,
                    if is_outlier { predicted } else { value },
                    if deviation.is_finite() { deviation } else { 0.0 },
                )
            }
            None if !value.is_finite() => {
                return Err(FilterError::InvalidNumericValue(format!(
                    "{} at {} with no prior forecast",
                    value, observation.index
                )))
            }
            None => (false, value, 0.0),
        };
        let accepted = vec![accepted];

        let predicted = signal_model.predict_step(&accepted)?;
        let half_widths = uncertainty_model.predict_step(&[deviation])?;

        let upper = predicted
            .iter()
            .zip(&half_widths)
            .map(|(p, w)| p + w)
            .collect();
        let lower = predicted
            .iter()
            .zip(&half_widths)
            .map(|(p, w)| p - w)
            .collect();

        trace!(
            "[Algorithm] {}: x={} accepted={:?} next={:?} +/-{:?}",
            observation.index,
            value,
            accepted,
            predicted,
            half_widths
        );

        Ok(ResultRow {
            index: observation.index,
            input_values: observation.values.clone(),
            inputs_are_outliers: vec![is_outlier],
            accepted_values: accepted,
            predicted_values: predicted,
            predicted_upper_limits: upper,
            predicted_lower_limits: lower,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::Kernel;

    fn models() -> (SignalModel, UncertaintyModel) {
        (
            SignalModel::with_fixed_kernel(Kernel::with_order(1, 0.5).unwrap()),
            UncertaintyModel::with_fixed_parameters(Kernel::with_order(1, 0.1).unwrap(), 1.0, 1.0, 1.0),
        )
    }

    #[test]
    fn test_bound_check_policies() {
        assert!(!BoundCheck::Exclusive.is_outside(1.0, 1.0, 2.0));
        assert!(BoundCheck::Inclusive.is_outside(1.0, 1.0, 2.0));
        assert!(BoundCheck::Exclusive.is_outside(2.5, 1.0, 2.0));
        assert!(!BoundCheck::Exclusive.is_outside(100.0, f64::NAN, 2.0));
    }

    #[test]
    fn test_first_step_accepts_observation() {
        let (mut signal, mut uncertainty) = models();
        let algorithm = AdaptiveBoundsAlgorithm::default();
        let row = algorithm
            .step(&ObservationRow::scalar(0i64, 4.0), &[], &mut signal, &mut uncertainty)
            .unwrap();

        assert!(!row.is_outlier());
        assert_eq!(row.accepted_values, vec![4.0]);
        assert_eq!(row.predicted_values, vec![4.0]);
        // Band: 1.25 * max(1.0, 0.1*0 + 0.9*1.0)
        assert!((row.predicted_upper_limits[0] - 5.25).abs() < 1e-12);
        assert!((row.predicted_lower_limits[0] - 2.75).abs() < 1e-12);
    }

    #[test]
    fn test_outlier_replaced_by_previous_prediction() {
        let (mut signal, mut uncertainty) = models();
        let algorithm = AdaptiveBoundsAlgorithm::default();
        let first = algorithm
            .step(&ObservationRow::scalar(0i64, 4.0), &[], &mut signal, &mut uncertainty)
            .unwrap();
        let second = algorithm
            .step(
                &ObservationRow::scalar(1i64, 40.0),
                std::slice::from_ref(&first),
                &mut signal,
                &mut uncertainty,
            )
            .unwrap();

        assert!(second.is_outlier());
        assert_eq!(second.input_values, vec![40.0]);
        assert_eq!(second.accepted_values, vec![4.0]);
        // Raw deviation 36 widens the band: 1.25 * (0.1*36 + 0.9*0.9)
        let half_width = second.predicted_upper_limits[0] - second.predicted_values[0];
        assert!((half_width - 1.25 * (3.6 + 0.81)).abs() < 1e-9);
    }

    #[test]
    fn test_multi_channel_row_is_shape_error() {
        let (mut signal, mut uncertainty) = models();
        let algorithm = AdaptiveBoundsAlgorithm::default();
        let err = algorithm
            .step(
                &ObservationRow::new(0i64, vec![1.0, 2.0]),
                &[],
                &mut signal,
                &mut uncertainty,
            )
            .unwrap_err();
        assert_eq!(err, FilterError::InputShape { expected: 1, got: 2 });

        let err = algorithm
            .step(&ObservationRow::new(0i64, vec![]), &[], &mut signal, &mut uncertainty)
            .unwrap_err();
        assert_eq!(err, FilterError::InputShape { expected: 1, got: 0 });
    }

    #[test]
    fn test_non_finite_value_is_flagged_and_replaced() {
        let (mut signal, mut uncertainty) = models();
        let algorithm = AdaptiveBoundsAlgorithm::default();
        let mut previous = algorithm
            .step(&ObservationRow::scalar(0i64, 4.0), &[], &mut signal, &mut uncertainty)
            .unwrap();

        for (i, bad) in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY].into_iter().enumerate() {
            let row = algorithm
                .step(
                    &ObservationRow::scalar(i as i64 + 1, bad),
                    std::slice::from_ref(&previous),
                    &mut signal,
                    &mut uncertainty,
                )
                .unwrap();
            assert!(row.is_outlier());
            assert_eq!(row.accepted_values, vec![4.0]);
            assert_eq!(row.predicted_values, vec![4.0]);
            assert!(row.predicted_upper_limits[0].is_finite());
            previous = row;
        }
    }

    #[test]
    fn test_non_finite_first_value_is_rejected() {
        let (mut signal, mut uncertainty) = models();
        let algorithm = AdaptiveBoundsAlgorithm::default();
        let err = algorithm
            .step(&ObservationRow::scalar(0i64, f64::NAN), &[], &mut signal, &mut uncertainty)
            .unwrap_err();
        assert!(matches!(err, FilterError::InvalidNumericValue(_)));
        assert!(!signal.kernel().is_initialized());
    }
}
