//! Backward/forward recovery of outlier streaks
//!
//! When a filter sees too many outliers in a row, the causal prediction chain
//! behind it is likely corrupted. Recovery re-filters a bounded window of raw
//! observations twice with disposable sub-filters:
//!
//! 1. **Backward**: the window (plus up to `n_warmup_steps` later rows as
//!    lead-in) is fed in reverse, so the anomaly now lies in the sub-filter's
//!    past.
//! 2. **Forward**: the window (plus up to `n_warmup_steps` earlier rows) is
//!    fed in order, starting from the model state the backward pass ended in.
//!
//! The two passes are strictly sequential: the forward pass consumes the
//! models the backward pass hands back. Lead-in rows are dropped, the first
//! half of the segment is taken from the backward pass and the second half
//! from the forward pass.
//!
//! Each sub-filter starts with an empty result log. Its first row is checked
//! against a seed row built from the carried models, so a spike at the head
//! of a pass is still flagged.
//!
//! ## Window arithmetic
//! Lead-in is clamped to the data that actually exists and exactly the
//! number of rows added is trimmed afterwards, so both passes always return
//! `high - low + 1` rows, including when `n_steps_back < n_warmup_steps`.

use crate::config::ControlParameters;
use crate::error::{FilterError, Result};
use crate::filter::OutlierFilter;
use crate::model::ModelPair;
use crate::row::{ObservationRow, ResultRow, RowIndex};
use crate::traits::FilterAlgorithm;
use log::debug;

/// Inclusive range of input positions being recovered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutOfControlWindow {
    pub low: usize,
    pub high: usize,
}

/// Input slice for one sub-pass, with the lead-in it carries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PassSpan {
    pub start: usize,
    pub end: usize,
    pub warmup: usize,
}

impl OutOfControlWindow {
    /// `[max(position - n_steps_back, 0), min(position, last input)]`
    pub fn compute(position: usize, n_steps_back: usize, input_len: usize) -> Self {
        let high = position.min(input_len.saturating_sub(1));
        let low = position.saturating_sub(n_steps_back).min(high);
        Self { low, high }
    }

    pub fn len(&self) -> usize {
        self.high - self.low + 1
    }

    /// Extend `high` by up to `warmup` rows that exist after it
    pub fn backward_span(&self, warmup: usize, input_len: usize) -> PassSpan {
        let available = input_len.saturating_sub(1).saturating_sub(self.high);
        let warmup = warmup.min(available);
        PassSpan {
            start: self.low,
            end: self.high + warmup,
            warmup,
        }
    }

    /// Extend `low` by up to `warmup` rows that exist before it
    pub fn forward_span(&self, warmup: usize) -> PassSpan {
        let warmup = warmup.min(self.low);
        PassSpan {
            start: self.low - warmup,
            end: self.high,
            warmup,
        }
    }
}

/// Context row holding the forecast and band the models currently carry.
///
/// `None` while either model is unseeded.
pub fn seed_row(models: &ModelPair, index: RowIndex) -> Option<ResultRow> {
    let prediction = models.signal.current_forecast()?;
    let half_width = models.uncertainty.current_half_width()?;
    Some(ResultRow {
        index,
        input_values: vec![prediction],
        inputs_are_outliers: vec![false],
        accepted_values: vec![prediction],
        predicted_values: vec![prediction],
        predicted_upper_limits: vec![prediction + half_width],
        predicted_lower_limits: vec![prediction - half_width],
    })
}

/// Run a disposable sub-filter over `inputs` starting from `models`.
///
/// Returns the sub-filter's result log and its final model state.
pub fn run_subpass(
    algorithm: &dyn FilterAlgorithm,
    inputs: Vec<ObservationRow>,
    models: ModelPair,
    control: ControlParameters,
) -> Result<(Vec<ResultRow>, ModelPair)> {
    let n_inputs = inputs.len();
    let seed = inputs.first().and_then(|row| seed_row(&models, row.index));
    let mut sub_filter = OutlierFilter::for_recovery(algorithm, models, control, inputs, seed);
    sub_filter.update_filter()?;
    let status = sub_filter.status();
    debug!(
        "[Recovery] Sub-pass ({:?}) over {} rows: {} flagged",
        status.direction, n_inputs, status.outliers_flagged
    );
    Ok(sub_filter.into_parts())
}

/// First half from the backward pass, second half from the forward pass.
///
/// For a segment of `n` rows, `n / 2` come from `backward`.
pub fn merge_segments(backward: Vec<ResultRow>, forward: Vec<ResultRow>) -> Result<Vec<ResultRow>> {
    if backward.len() != forward.len() {
        return Err(FilterError::SegmentMismatch {
            backward: backward.len(),
            forward: forward.len(),
        });
    }
    let split = backward.len() / 2;
    let mut merged = Vec::with_capacity(backward.len());
    merged.extend(backward.into_iter().take(split));
    merged.extend(forward.into_iter().skip(split));
    Ok(merged)
}
