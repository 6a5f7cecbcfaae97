use crate::algorithm::BoundCheck;
use crate::error::FilterError;
use crate::kernel::Kernel;
use crate::model::{SignalModel, UncertaintyModel, DEFAULT_UNCERTAINTY_GAIN};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

pub const N_OUTLIER_THRESHOLD: &str = "n_outlier_threshold";
pub const N_WARMUP_STEPS: &str = "n_warmup_steps";
pub const N_STEPS_BACK: &str = "n_steps_back";

/// Recovery control knobs, validated at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "BTreeMap<String, i64>", into = "BTreeMap<String, i64>")]
pub struct ControlParameters {
    /// Consecutive outliers that trigger recovery (>= 1)
    pub n_outlier_threshold: usize,
    /// Lead-in rows fed to each recovery sub-pass, then discarded
    pub n_warmup_steps: usize,
    /// How far back the recovery window reaches; 0 disables recovery
    pub n_steps_back: usize,
}

impl ControlParameters {
    pub fn new(
        n_outlier_threshold: i64,
        n_warmup_steps: i64,
        n_steps_back: i64,
    ) -> std::result::Result<Self, FilterError> {
        if n_outlier_threshold < 1 {
            return Err(FilterError::Configuration(format!(
                "{} should be a non-zero, positive integer, got {}",
                N_OUTLIER_THRESHOLD, n_outlier_threshold
            )));
        }
        if n_warmup_steps < 0 {
            return Err(FilterError::Configuration(format!(
                "{} should be a positive integer (zero included), got {}",
                N_WARMUP_STEPS, n_warmup_steps
            )));
        }
        if n_steps_back < 0 {
            return Err(FilterError::Configuration(format!(
                "{} should be a positive integer (zero included), got {}",
                N_STEPS_BACK, n_steps_back
            )));
        }
        Ok(Self {
            n_outlier_threshold: n_outlier_threshold as usize,
            n_warmup_steps: n_warmup_steps as usize,
            n_steps_back: n_steps_back as usize,
        })
    }

    /// Build from a plain key -> value mapping
    pub fn from_map(map: &BTreeMap<String, i64>) -> std::result::Result<Self, FilterError> {
        let get = |key: &str| {
            map.get(key)
                .copied()
                .ok_or_else(|| FilterError::Configuration(format!("missing control parameter {}", key)))
        };
        Self::new(get(N_OUTLIER_THRESHOLD)?, get(N_WARMUP_STEPS)?, get(N_STEPS_BACK)?)
    }
}

impl Default for ControlParameters {
    fn default() -> Self {
        ControlParameters {
            n_outlier_threshold: 5,
            n_warmup_steps: 2,
            n_steps_back: 10,
        }
    }
}

impl TryFrom<BTreeMap<String, i64>> for ControlParameters {
    type Error = FilterError;

    fn try_from(map: BTreeMap<String, i64>) -> std::result::Result<Self, Self::Error> {
        Self::from_map(&map)
    }
}

impl From<ControlParameters> for BTreeMap<String, i64> {
    fn from(params: ControlParameters) -> Self {
        BTreeMap::from([
            (N_OUTLIER_THRESHOLD.to_string(), params.n_outlier_threshold as i64),
            (N_WARMUP_STEPS.to_string(), params.n_warmup_steps as i64),
            (N_STEPS_BACK.to_string(), params.n_steps_back as i64),
        ])
    }
}

/// Kernel choice plus uncertainty parameters for one model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// 1 (single EWMA) or 3 (triple EWMA)
    pub order: u8,
    pub forgetting_factor: f64,
    #[serde(default)]
    pub initial_uncertainty: Option<f64>,
    #[serde(default)]
    pub minimum_uncertainty: Option<f64>,
    #[serde(default = "default_gain")]
    pub uncertainty_gain: f64,
}

fn default_gain() -> f64 {
    DEFAULT_UNCERTAINTY_GAIN
}

impl Default for ModelConfig {
    fn default() -> Self {
        ModelConfig {
            order: 3,
            forgetting_factor: 0.25,
            initial_uncertainty: None,
            minimum_uncertainty: None,
            uncertainty_gain: DEFAULT_UNCERTAINTY_GAIN,
        }
    }
}

impl ModelConfig {
    pub fn signal_model(&self) -> std::result::Result<SignalModel, FilterError> {
        Ok(SignalModel::new(Kernel::with_order(self.order, self.forgetting_factor)?))
    }

    pub fn uncertainty_model(&self) -> std::result::Result<UncertaintyModel, FilterError> {
        Ok(UncertaintyModel::new(
            Kernel::with_order(self.order, self.forgetting_factor)?,
            self.initial_uncertainty,
            self.minimum_uncertainty,
            self.uncertainty_gain,
        ))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterConfig {
    pub control: ControlParameters,
    #[serde(default)]
    pub signal: ModelConfig,
    #[serde(default)]
    pub uncertainty: ModelConfig,
    /// Leading share of the series used to calibrate both models
    #[serde(default = "default_calibration_fraction")]
    pub calibration_fraction: f64,
    #[serde(default)]
    pub bound_check: BoundCheck,
}

fn default_calibration_fraction() -> f64 {
    0.2
}

impl Default for FilterConfig {
    fn default() -> Self {
        FilterConfig {
            control: ControlParameters::default(),
            signal: ModelConfig::default(),
            uncertainty: ModelConfig::default(),
            calibration_fraction: default_calibration_fraction(),
            bound_check: BoundCheck::default(),
        }
    }
}

impl FilterConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: FilterConfig = serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;
        if !(config.calibration_fraction > 0.0 && config.calibration_fraction <= 1.0) {
            return Err(FilterError::Configuration(format!(
                "calibration_fraction must be in (0, 1], got {}",
                config.calibration_fraction
            ))
            .into());
        }
        Ok(config)
    }
}
