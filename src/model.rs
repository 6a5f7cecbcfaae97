//! Signal and uncertainty models
//!
//! Thin stateful wrappers around a [`Kernel`]. The signal model forecasts the
//! next value; the uncertainty model turns a forecast of the absolute
//! deviation into the half-width of the confidence band.

use crate::error::{FilterError, Result};
use crate::kernel::{CalibrationGuesses, Kernel};
use crate::simplex::{self, SimplexOptions};
use log::debug;
use serde::{Deserialize, Serialize};

/// Converts a mean-absolute-deviation-like statistic into an approximate
/// standard deviation (sqrt(pi/2) ~ 1.25 for a Gaussian)
pub const STANDARD_DEV_FACTOR: f64 = 1.25;

/// Default multiplier on the uncertainty band
pub const DEFAULT_UNCERTAINTY_GAIN: f64 = 1.0;

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// Absolute one-step residuals `|predicted[i] - observed[i + 1]|`
pub fn calibration_residuals(predicted: &[Vec<f64>], observed: &[f64]) -> Vec<f64> {
    predicted
        .iter()
        .filter_map(|row| row.first())
        .zip(observed.iter().skip(1))
        .map(|(p, x)| (p - x).abs())
        .collect()
}

// ============================================================================
// SIGNAL MODEL
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalModel {
    kernel: Kernel,
    horizon: usize,
    calibrated: bool,
}

impl SignalModel {
    pub fn new(kernel: Kernel) -> Self {
        Self {
            kernel,
            horizon: 1,
            calibrated: false,
        }
    }

    /// Model whose kernel parameters are already known
    pub fn with_fixed_kernel(kernel: Kernel) -> Self {
        Self {
            calibrated: true,
            ..Self::new(kernel)
        }
    }

    pub fn kernel(&self) -> &Kernel {
        &self.kernel
    }

    pub fn is_calibrated(&self) -> bool {
        self.calibrated
    }

    /// Fit the kernel on a clean series and return predictions over it
    pub fn calibrate(
        &mut self,
        inputs: &[f64],
        guesses: Option<&CalibrationGuesses>,
    ) -> Result<Vec<Vec<f64>>> {
        self.kernel.calibrate(inputs, guesses)?;
        self.calibrated = true;
        self.predict(inputs)
    }

    pub fn predict(&mut self, inputs: &[f64]) -> Result<Vec<Vec<f64>>> {
        if !self.calibrated {
            return Err(FilterError::NotCalibrated("signal"));
        }
        self.kernel.predict(inputs, self.horizon)
    }

    /// Forecast following a single observation row
    pub fn predict_step(&mut self, row: &[f64]) -> Result<Vec<f64>> {
        if !self.calibrated {
            return Err(FilterError::NotCalibrated("signal"));
        }
        self.kernel.predict_step(row, self.horizon)
    }

    /// Forecast already made for the next observation, if any
    pub fn current_forecast(&self) -> Option<f64> {
        if !self.calibrated {
            return None;
        }
        self.kernel.current_forecast()
    }

    pub fn reset(&mut self) {
        self.kernel.reset();
        self.calibrated = false;
    }
}

// ============================================================================
// UNCERTAINTY MODEL
// ============================================================================

/// Adaptive band half-width: `1.25 * gain * max(minimum, kernel(deviation))`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UncertaintyModel {
    kernel: Kernel,
    initial_uncertainty: Option<f64>,
    minimum_uncertainty: Option<f64>,
    uncertainty_gain: f64,
    calibrated: bool,
}

impl UncertaintyModel {
    /// Uncalibrated model; missing uncertainties are derived by `calibrate`
    pub fn new(
        kernel: Kernel,
        initial_uncertainty: Option<f64>,
        minimum_uncertainty: Option<f64>,
        uncertainty_gain: f64,
    ) -> Self {
        Self {
            kernel,
            initial_uncertainty,
            minimum_uncertainty,
            uncertainty_gain,
            calibrated: false,
        }
    }

    /// Model whose parameters are already known; the kernel is seeded with
    /// `initial_uncertainty`
    pub fn with_fixed_parameters(
        mut kernel: Kernel,
        initial_uncertainty: f64,
        minimum_uncertainty: f64,
        uncertainty_gain: f64,
    ) -> Self {
        kernel.initialize(initial_uncertainty);
        Self {
            kernel,
            initial_uncertainty: Some(initial_uncertainty),
            minimum_uncertainty: Some(minimum_uncertainty),
            uncertainty_gain,
            calibrated: true,
        }
    }

    pub fn kernel(&self) -> &Kernel {
        &self.kernel
    }

    pub fn is_calibrated(&self) -> bool {
        self.calibrated
    }

    pub fn initial_uncertainty(&self) -> Option<f64> {
        self.initial_uncertainty
    }

    pub fn minimum_uncertainty(&self) -> Option<f64> {
        self.minimum_uncertainty
    }

    pub fn uncertainty_gain(&self) -> f64 {
        self.uncertainty_gain
    }

    /// Fit the kernel on absolute deviations, then derive any missing
    /// initial/minimum uncertainty.
    pub fn calibrate(
        &mut self,
        deviations: &[f64],
        guesses: Option<&CalibrationGuesses>,
    ) -> Result<Vec<Vec<f64>>> {
        self.kernel.calibrate(deviations, guesses)?;

        let initial = match self.initial_uncertainty {
            Some(value) => value,
            None => {
                let guess = guesses
                    .and_then(|g| g.initial_uncertainty)
                    .unwrap_or(0.0);
                let value = self.optimize_initial_uncertainty(deviations, guess)?;
                self.initial_uncertainty = Some(value);
                value
            }
        };

        if self.minimum_uncertainty.is_none() {
            let floor = guesses
                .and_then(|g| g.minimum_uncertainty_floor)
                .unwrap_or(0.0);
            let seeded = self.seeded_predictions(initial, deviations)?;
            self.minimum_uncertainty = Some(median(&seeded).max(floor));
        }

        debug!(
            "[Uncertainty] Calibrated: initial={:.4}, minimum={:.4}, gain={:.2}",
            initial,
            self.minimum_uncertainty.unwrap_or(0.0),
            self.uncertainty_gain
        );

        self.calibrated = true;
        self.predict(deviations)
    }

    /// Half-widths for a sequence of deviations
    pub fn predict(&mut self, deviations: &[f64]) -> Result<Vec<Vec<f64>>> {
        if !self.calibrated {
            return Err(FilterError::NotCalibrated("uncertainty"));
        }
        let raw = self.kernel.predict(deviations, 1)?;
        Ok(raw
            .into_iter()
            .map(|row| row.into_iter().map(|p| self.band(p)).collect())
            .collect())
    }

    /// Half-width following a single deviation row
    pub fn predict_step(&mut self, row: &[f64]) -> Result<Vec<f64>> {
        if !self.calibrated {
            return Err(FilterError::NotCalibrated("uncertainty"));
        }
        let raw = self.kernel.predict_step(row, 1)?;
        Ok(raw.into_iter().map(|p| self.band(p)).collect())
    }

    /// Band half-width for the next observation, if any
    pub fn current_half_width(&self) -> Option<f64> {
        if !self.calibrated {
            return None;
        }
        self.kernel.current_forecast().map(|p| self.band(p))
    }

    pub fn reset(&mut self) {
        self.kernel.reset();
        self.calibrated = false;
    }

    fn band(&self, prediction: f64) -> f64 {
        let minimum = self.minimum_uncertainty.unwrap_or(0.0);
        STANDARD_DEV_FACTOR * self.uncertainty_gain * minimum.max(prediction)
    }

    fn seeded_predictions(&mut self, seed: f64, deviations: &[f64]) -> Result<Vec<f64>> {
        self.kernel.reset();
        self.kernel.initialize(seed);
        self.kernel.predict_series(deviations)
    }

    fn optimize_initial_uncertainty(&mut self, deviations: &[f64], guess: f64) -> Result<f64> {
        // The seeded kernel should neither drift up nor down on average
        let result = simplex::minimize(
            |x| match self.seeded_predictions(x[0], deviations) {
                Ok(predictions) => (x[0] - mean(&predictions)).abs(),
                Err(_) => f64::NAN,
            },
            &[guess],
            SimplexOptions::default(),
        );
        Ok(result.x[0])
    }
}

/// The two models a filter drives, moved between a filter and its recovery
/// sub-filters as one value
#[derive(Debug, Clone, PartialEq)]
pub struct ModelPair {
    pub signal: SignalModel,
    pub uncertainty: UncertaintyModel,
}
