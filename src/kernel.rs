//! Recursive smoothing kernels
//!
//! Two stateful one-step predictors share the same capability set
//! (`initialize`, `predict`, `reset`, `calibrate`):
//!
//! - [`Ewma1Kernel`]: single exponentially weighted moving average.
//! - [`Ewma3Kernel`]: triple (order-3) EWMA, forecasting along a local
//!   quadratic trend with Brown's closed form `a + b + c/2`.
//!
//! [`Kernel`] is the closed enum the models hold.
//!
//! ## Calibration
//! The forgetting factor `f` is fitted with a Nelder–Mead search on the
//! reparameterization `f = exp(-x²)`, which keeps `f` in `[0, 1]` without
//! explicit bounds. The objective is the RMSE between one-step predictions
//! and the observation `lag` steps later (1 for order-1, 2 for order-3,
//! whose forecast carries a two-step algorithmic lag).

use crate::error::{FilterError, Result};
use crate::simplex::{self, SimplexOptions};
use log::debug;
use serde::{Deserialize, Serialize};

/// Both kernels forecast a single step ahead
pub const MAX_PREDICTION_HORIZON: usize = 1;

fn auto_regressive(current: f64, preceding: f64, forgetting_factor: f64) -> f64 {
    forgetting_factor * current + (1.0 - forgetting_factor) * preceding
}

fn check_forgetting_factor(forgetting_factor: f64) -> Result<()> {
    if !(0.0..=1.0).contains(&forgetting_factor) {
        return Err(FilterError::Configuration(format!(
            "forgetting factor should be between 0 and 1, received {}",
            forgetting_factor
        )));
    }
    Ok(())
}

/// The order-3 forecast divides by `(f - 1)²`
fn check_trend_forgetting_factor(forgetting_factor: f64) -> Result<()> {
    check_forgetting_factor(forgetting_factor)?;
    if forgetting_factor >= 1.0 {
        return Err(FilterError::Configuration(format!(
            "order-3 forgetting factor must be below 1, received {}",
            forgetting_factor
        )));
    }
    Ok(())
}

fn check_horizon(horizon: usize) -> Result<()> {
    if horizon > MAX_PREDICTION_HORIZON {
        return Err(FilterError::InvalidHorizon {
            requested: horizon,
            max: MAX_PREDICTION_HORIZON,
        });
    }
    Ok(())
}

fn check_row(row: &[f64]) -> Result<f64> {
    match row {
        [value] => Ok(*value),
        _ => Err(FilterError::InputShape {
            expected: 1,
            got: row.len(),
        }),
    }
}

/// Forward map of the calibration reparameterization
pub fn to_forgetting_factor(x: f64) -> f64 {
    (-(x * x)).exp()
}

/// Inverse of [`to_forgetting_factor`] on the non-negative branch
pub fn from_forgetting_factor(forgetting_factor: f64) -> f64 {
    (-forgetting_factor.max(f64::MIN_POSITIVE).ln()).max(0.0).sqrt()
}

/// Root-mean-square error over the overlapping prefix of both series
pub fn rmse(observed: &[f64], predicted: &[f64]) -> f64 {
    let n = observed.len().min(predicted.len());
    if n == 0 {
        return f64::NAN;
    }
    let sum: f64 = observed
        .iter()
        .zip(predicted)
        .map(|(o, p)| (o - p).powi(2))
        .sum();
    (sum / n as f64).sqrt()
}

// ============================================================================
// ORDER-1 KERNEL
// ============================================================================

/// Single exponentially weighted moving average.
///
/// `prediction = f * current + (1 - f) * previous_prediction`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ewma1Kernel {
    forgetting_factor: f64,
    last_prediction: f64,
    initialized: bool,
}

impl Ewma1Kernel {
    pub fn new(forgetting_factor: f64) -> Result<Self> {
        check_forgetting_factor(forgetting_factor)?;
        Ok(Self {
            forgetting_factor,
            last_prediction: 0.0,
            initialized: false,
        })
    }

    pub fn initialize(&mut self, seed: f64) {
        self.last_prediction = seed;
        self.initialized = true;
    }

    pub fn reset(&mut self) {
        self.last_prediction = 0.0;
        self.initialized = false;
    }

    fn step(&mut self, value: f64) -> f64 {
        if !self.initialized {
            self.initialize(value);
        }
        self.last_prediction = auto_regressive(value, self.last_prediction, self.forgetting_factor);
        self.last_prediction
    }
}

// ============================================================================
// ORDER-3 KERNEL
// ============================================================================

/// Triple exponentially weighted moving average.
///
/// Keeps three nested smooths `s1 = EWMA(x)`, `s2 = EWMA(s1)`,
/// `s3 = EWMA(s2)` and forecasts with
///
/// ```text
/// a = 3 s1 - 3 s2 + s3
/// b = f / (2 (f-1)^2) * ((6-5f) s1 - 2 (5-4f) s2 + (4-3f) s3)
/// c = (f / (f-1))^2 * (s1 - 2 s2 + s3)
/// forecast = a + b + c / 2
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ewma3Kernel {
    forgetting_factor: f64,
    previous_stats: [f64; 3],
    current_stats: [f64; 3],
    initialized: bool,
}

impl Ewma3Kernel {
    pub fn new(forgetting_factor: f64) -> Result<Self> {
        check_trend_forgetting_factor(forgetting_factor)?;
        Ok(Self {
            forgetting_factor,
            previous_stats: [0.0; 3],
            current_stats: [0.0; 3],
            initialized: false,
        })
    }

    pub fn initialize(&mut self, seed: f64) {
        self.previous_stats = [seed; 3];
        self.current_stats = [seed; 3];
        self.initialized = true;
    }

    pub fn reset(&mut self) {
        self.previous_stats = [0.0; 3];
        self.current_stats = [0.0; 3];
        self.initialized = false;
    }

    /// Current `(s1, s2, s3)` smoothing statistics
    pub fn stats(&self) -> [f64; 3] {
        self.current_stats
    }

    fn update_stats(&mut self, value: f64) {
        let f = self.forgetting_factor;
        let [p1, p2, p3] = self.current_stats;
        let s1 = auto_regressive(value, p1, f);
        let s2 = auto_regressive(s1, p2, f);
        let s3 = auto_regressive(s2, p3, f);
        self.previous_stats = self.current_stats;
        self.current_stats = [s1, s2, s3];
    }

    fn forecast(&self) -> f64 {
        let f = self.forgetting_factor;
        let [s1, s2, s3] = self.current_stats;

        let a = 3.0 * s1 - 3.0 * s2 + s3;
        let b = f / (2.0 * (f - 1.0).powi(2))
            * ((6.0 - 5.0 * f) * s1 - 2.0 * (5.0 - 4.0 * f) * s2 + (4.0 - 3.0 * f) * s3);
        let c = (f / (f - 1.0)).powi(2) * (s1 - 2.0 * s2 + s3);

        a + b + c / 2.0
    }

    fn step(&mut self, value: f64) -> f64 {
        if !self.initialized {
            self.initialize(value);
        }
        self.update_stats(value);
        self.forecast()
    }
}

// ============================================================================
// KERNEL ENUM
// ============================================================================

/// Closed set of recursive predictors
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Kernel {
    Ewma1(Ewma1Kernel),
    Ewma3(Ewma3Kernel),
}

/// Optional starting points for a calibration search
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CalibrationGuesses {
    pub forgetting_factor: Option<f64>,
    pub initial_uncertainty: Option<f64>,
    /// Lower bound applied to a calibrated minimum uncertainty
    pub minimum_uncertainty_floor: Option<f64>,
}

impl Kernel {
    /// Build an order-1 or order-3 kernel
    pub fn with_order(order: u8, forgetting_factor: f64) -> Result<Self> {
        match order {
            1 => Ok(Kernel::Ewma1(Ewma1Kernel::new(forgetting_factor)?)),
            3 => Ok(Kernel::Ewma3(Ewma3Kernel::new(forgetting_factor)?)),
            other => Err(FilterError::Configuration(format!(
                "kernel order must be 1 or 3, received {}",
                other
            ))),
        }
    }

    pub fn order(&self) -> u8 {
        match self {
            Kernel::Ewma1(_) => 1,
            Kernel::Ewma3(_) => 3,
        }
    }

    pub fn forgetting_factor(&self) -> f64 {
        match self {
            Kernel::Ewma1(k) => k.forgetting_factor,
            Kernel::Ewma3(k) => k.forgetting_factor,
        }
    }

    pub fn set_forgetting_factor(&mut self, forgetting_factor: f64) -> Result<()> {
        match self {
            Kernel::Ewma1(k) => {
                check_forgetting_factor(forgetting_factor)?;
                k.forgetting_factor = forgetting_factor;
            }
            Kernel::Ewma3(k) => {
                check_trend_forgetting_factor(forgetting_factor)?;
                k.forgetting_factor = forgetting_factor;
            }
        }
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        match self {
            Kernel::Ewma1(k) => k.initialized,
            Kernel::Ewma3(k) => k.initialized,
        }
    }

    /// Forecast from the current state without consuming a value.
    ///
    /// `None` until the kernel has been seeded.
    pub fn current_forecast(&self) -> Option<f64> {
        match self {
            Kernel::Ewma1(k) if k.initialized => Some(k.last_prediction),
            Kernel::Ewma3(k) if k.initialized => Some(k.forecast()),
            _ => None,
        }
    }

    /// Steps between an input and the observation its forecast lines up with
    pub fn algorithmic_lag(&self) -> usize {
        match self {
            Kernel::Ewma1(_) => 1,
            Kernel::Ewma3(_) => 2,
        }
    }

    /// Seed internal state from a first observed value
    pub fn initialize(&mut self, seed: f64) {
        match self {
            Kernel::Ewma1(k) => k.initialize(seed),
            Kernel::Ewma3(k) => k.initialize(seed),
        }
    }

    /// Return to the unseeded state, keeping the forgetting factor
    pub fn reset(&mut self) {
        match self {
            Kernel::Ewma1(k) => k.reset(),
            Kernel::Ewma3(k) => k.reset(),
        }
    }

    /// Consume one row and return its `horizon`-length forecast.
    ///
    /// The row must hold exactly one value.
    pub fn predict_step(&mut self, row: &[f64], horizon: usize) -> Result<Vec<f64>> {
        check_horizon(horizon)?;
        let value = check_row(row)?;
        let prediction = match self {
            Kernel::Ewma1(k) => k.step(value),
            Kernel::Ewma3(k) => k.step(value),
        };
        Ok(vec![prediction; horizon])
    }

    /// Consume a scalar sequence, one forecast row per element
    pub fn predict(&mut self, inputs: &[f64], horizon: usize) -> Result<Vec<Vec<f64>>> {
        check_horizon(horizon)?;
        inputs
            .iter()
            .map(|&value| self.predict_step(&[value], horizon))
            .collect()
    }

    /// One-step predictions flattened into a plain series
    pub fn predict_series(&mut self, inputs: &[f64]) -> Result<Vec<f64>> {
        Ok(self
            .predict(inputs, 1)?
            .into_iter()
            .filter_map(|row| row.first().copied())
            .collect())
    }

    /// Fit the forgetting factor on `inputs`, then return fresh one-step
    /// predictions over `inputs[1..]` made with the fitted factor.
    pub fn calibrate(
        &mut self,
        inputs: &[f64],
        guesses: Option<&CalibrationGuesses>,
    ) -> Result<Vec<Vec<f64>>> {
        if let Some(guess) = guesses.and_then(|g| g.forgetting_factor) {
            self.set_forgetting_factor(guess)?;
        }
        let fitted = self.optimize_forgetting_factor(inputs);
        self.reset();
        self.set_forgetting_factor(fitted)?;
        debug!(
            "[Kernel] Order-{} calibrated on {} samples: forgetting factor {:.4}",
            self.order(),
            inputs.len(),
            fitted
        );
        self.predict(inputs.get(1..).unwrap_or(&[]), 1)
    }

    fn objective(&mut self, x: f64, inputs: &[f64]) -> f64 {
        let lag = self.algorithmic_lag();
        if inputs.len() <= lag {
            return f64::NAN;
        }
        self.reset();
        if self.set_forgetting_factor(to_forgetting_factor(x)).is_err() {
            return f64::NAN;
        }
        match self.predict_series(&inputs[..inputs.len() - lag]) {
            Ok(predictions) => rmse(&inputs[lag..], &predictions),
            Err(_) => f64::NAN,
        }
    }

    fn optimize_forgetting_factor(&mut self, inputs: &[f64]) -> f64 {
        let start = from_forgetting_factor(self.forgetting_factor());
        let result = simplex::minimize(
            |x| self.objective(x[0], inputs),
            &[start],
            SimplexOptions::default(),
        );
        to_forgetting_factor(result.x[0])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wavy_series(n: usize) -> Vec<f64> {
        (0..n)
            .map(|i| {
                let t = i as f64;
                10.0 * (t * 0.07).sin() + 0.8 * (t * 1.9).sin() + 0.5 * (t * 3.7).cos()
            })
            .collect()
    }

    #[test]
    fn test_rejects_forgetting_factor_out_of_range() {
        assert!(matches!(Ewma1Kernel::new(1.5), Err(FilterError::Configuration(_))));
        assert!(matches!(Ewma3Kernel::new(-0.1), Err(FilterError::Configuration(_))));
        assert!(matches!(Kernel::with_order(2, 0.5), Err(FilterError::Configuration(_))));
    }

    #[test]
    fn test_order3_rejects_unit_forgetting_factor() {
        assert!(matches!(Ewma3Kernel::new(1.0), Err(FilterError::Configuration(_))));
        assert!(matches!(Kernel::with_order(3, 1.0), Err(FilterError::Configuration(_))));
        assert!(Kernel::with_order(1, 1.0).is_ok());

        let mut kernel = Kernel::with_order(3, 0.5).unwrap();
        assert!(kernel.set_forgetting_factor(1.0).is_err());
        assert!((kernel.forgetting_factor() - 0.5).abs() < 1e-12);
        let out = kernel.predict_series(&[1.0, 2.0, 3.0]).unwrap();
        assert!(out.iter().all(|p| p.is_finite()));
    }

    #[test]
    fn test_current_forecast_follows_last_step() {
        for order in [1, 3] {
            let mut kernel = Kernel::with_order(order, 0.4).unwrap();
            assert_eq!(kernel.current_forecast(), None);
            let out = kernel.predict_series(&[1.0, 3.0, 2.0, 5.0]).unwrap();
            assert_eq!(kernel.current_forecast(), out.last().copied());
        }
    }

    #[test]
    fn test_ewma1_recursion() {
        let mut kernel = Kernel::with_order(1, 0.5).unwrap();
        let out = kernel.predict_series(&[2.0, 4.0, 0.0]).unwrap();
        // Seeded at 2.0 -> 2.0, then 0.5*4 + 0.5*2 = 3, then 0.5*0 + 0.5*3 = 1.5
        assert_eq!(out, vec![2.0, 3.0, 1.5]);
    }

    #[test]
    fn test_ewma3_constant_input_is_fixed_point() {
        let mut kernel = Kernel::with_order(3, 0.4).unwrap();
        let out = kernel.predict_series(&[5.0; 10]).unwrap();
        for p in out {
            assert!((p - 5.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_ewma3_tracks_linear_trend() {
        let mut kernel = Kernel::with_order(3, 0.5).unwrap();
        let ramp: Vec<f64> = (0..200).map(|i| 2.0 * i as f64).collect();
        let out = kernel.predict_series(&ramp).unwrap();
        // Steady state: the forecast after x_t lines up with x_{t+1}
        let last = out[out.len() - 1];
        assert!((last - 2.0 * 200.0).abs() < 1e-6, "got {}", last);
    }

    #[test]
    fn test_horizon_beyond_one_is_rejected() {
        for order in [1, 3] {
            let mut kernel = Kernel::with_order(order, 0.3).unwrap();
            assert_eq!(
                kernel.predict(&[1.0, 2.0], 2),
                Err(FilterError::InvalidHorizon { requested: 2, max: 1 })
            );
        }
    }

    #[test]
    fn test_multi_value_row_is_rejected() {
        let mut kernel = Kernel::with_order(3, 0.3).unwrap();
        assert_eq!(
            kernel.predict_step(&[1.0, 2.0], 1),
            Err(FilterError::InputShape { expected: 1, got: 2 })
        );
        assert_eq!(
            kernel.predict_step(&[], 1),
            Err(FilterError::InputShape { expected: 1, got: 0 })
        );
    }

    #[test]
    fn test_reset_clears_seed() {
        let mut kernel = Kernel::with_order(1, 0.3).unwrap();
        kernel.predict_series(&[7.0]).unwrap();
        assert!(kernel.is_initialized());
        kernel.reset();
        assert!(!kernel.is_initialized());
        assert!((kernel.forgetting_factor() - 0.3).abs() < 1e-12);
    }

    #[test]
    fn test_reparameterization_roundtrip() {
        for f in [0.05, 0.25, 0.5, 0.9] {
            let back = to_forgetting_factor(from_forgetting_factor(f));
            assert!((back - f).abs() < 1e-12);
        }
    }

    #[test]
    fn test_calibration_fits_factor_in_range() {
        let data = wavy_series(150);
        for order in [1, 3] {
            let mut kernel = Kernel::with_order(order, 0.25).unwrap();
            let predictions = kernel.calibrate(&data, None).unwrap();
            let f = kernel.forgetting_factor();
            assert!((0.0..=1.0).contains(&f), "order {} got {}", order, f);
            assert_eq!(predictions.len(), data.len() - 1);
        }
    }

    #[test]
    fn test_calibration_idempotent_under_reset() {
        let data = wavy_series(120);
        for order in [1, 3] {
            let mut kernel = Kernel::with_order(order, 0.3).unwrap();
            kernel.calibrate(&data, None).unwrap();
            let first = kernel.forgetting_factor();

            // The second search starts from the fitted factor
            kernel.reset();
            kernel.calibrate(&data, None).unwrap();
            let second = kernel.forgetting_factor();

            assert!((first - second).abs() < 1e-3, "order {}: {} vs {}", order, first, second);
        }
    }
}
