//! Outlier filter - step-wise filtering loop with streak recovery
//!
//! Each `step()` consumes one buffered observation, asks the
//! [`FilterAlgorithm`] for a result row, appends it to the result log and
//! tracks the consecutive-outlier streak. When the streak reaches
//! `n_outlier_threshold` on a primary filter with `n_steps_back > 0`, the
//! recent past is re-filtered backward then forward (see [`crate::recovery`])
//! and the corrected rows are spliced over the suspect segment before the
//! step returns.
//!
//! Invariant outside of a splice: `results.len() == current_position`.

use crate::config::ControlParameters;
use crate::error::{FilterError, Result};
use crate::model::{calibration_residuals, ModelPair, SignalModel, UncertaintyModel};
use crate::recovery::{self, OutOfControlWindow};
use crate::row::{ObservationRow, ResultRow, RowIndex};
use crate::status::FilterStatus;
use crate::traits::FilterAlgorithm;
use crate::window::{Window, WindowPosition, WindowSource};
use log::{debug, info};
use serde::{Deserialize, Serialize};

// ============================================================================
// CONSTANTS
// ============================================================================

/// One observation at a time, no look-ahead
pub const DEFAULT_INPUTS_WINDOW: Window = Window::new(WindowSource::Inputs, 1, WindowPosition::Centered);
/// The previous result row only
pub const DEFAULT_RESULTS_WINDOW: Window = Window::new(WindowSource::Results, 1, WindowPosition::Back);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterDirection {
    Forward,
    Backward,
}

// ============================================================================
// DATA STRUCTURES
// ============================================================================

pub struct OutlierFilter<A> {
    // Collaborators
    algorithm: A,
    models: ModelPair,
    control: ControlParameters,

    // Data
    inputs: Vec<ObservationRow>,
    results: Vec<ResultRow>,
    inputs_window: Window,
    results_window: Window,

    // Loop state
    current_position: usize,
    outliers_in_a_row: usize,
    direction: FilterDirection,

    // Recovery
    for_recovery: bool,
    /// Stands in for the result log until the first row is filtered
    context_seed: Option<ResultRow>,
    out_of_control: Option<OutOfControlWindow>,
    recoveries: usize,
}

impl<A: FilterAlgorithm> OutlierFilter<A> {
    pub fn new(
        algorithm: A,
        signal_model: SignalModel,
        uncertainty_model: UncertaintyModel,
        control: ControlParameters,
    ) -> Self {
        OutlierFilter {
            algorithm,
            models: ModelPair {
                signal: signal_model,
                uncertainty: uncertainty_model,
            },
            control,
            inputs: Vec::new(),
            results: Vec::new(),
            inputs_window: DEFAULT_INPUTS_WINDOW,
            results_window: DEFAULT_RESULTS_WINDOW,
            current_position: 0,
            outliers_in_a_row: 0,
            direction: FilterDirection::Forward,
            for_recovery: false,
            context_seed: None,
            out_of_control: None,
            recoveries: 0,
        }
    }

    /// Throwaway sub-filter that never triggers recovery itself.
    ///
    /// `context_seed` is the bound its first row is checked against.
    pub(crate) fn for_recovery(
        algorithm: A,
        models: ModelPair,
        control: ControlParameters,
        inputs: Vec<ObservationRow>,
        context_seed: Option<ResultRow>,
    ) -> Self {
        let mut filter = Self::new(algorithm, models.signal, models.uncertainty, control);
        filter.inputs = inputs;
        filter.for_recovery = true;
        filter.context_seed = context_seed;
        filter
    }

    /// Replace the default context windows
    pub fn with_windows(mut self, inputs_window: Window, results_window: Window) -> Result<Self> {
        if inputs_window.source != WindowSource::Inputs || results_window.source != WindowSource::Results {
            return Err(FilterError::Configuration(
                "inputs and results windows must slice their own source".to_string(),
            ));
        }
        if inputs_window.size == 0 || results_window.size == 0 {
            return Err(FilterError::Configuration("window size must be at least 1".to_string()));
        }
        self.inputs_window = inputs_window;
        self.results_window = results_window;
        Ok(self)
    }

    // ========================================================================
    // INGESTION
    // ========================================================================

    pub fn add_observation(&mut self, row: ObservationRow) {
        self.inputs.push(row);
    }

    pub fn add_observations<I>(&mut self, rows: I)
    where
        I: IntoIterator<Item = ObservationRow>,
    {
        self.inputs.extend(rows);
    }

    /// Buffer bare scalars, numbering them after the rows already held
    pub fn add_values(&mut self, values: &[f64]) {
        let offset = self.inputs.len() as i64;
        self.inputs.extend(
            values
                .iter()
                .enumerate()
                .map(|(i, &v)| ObservationRow::scalar(RowIndex::Sequence(offset + i as i64), v)),
        );
    }

    // ========================================================================
    // CALIBRATION
    // ========================================================================

    /// Calibrate the signal model on a clean series, then the uncertainty
    /// model on the absolute one-step residuals it leaves.
    pub fn calibrate_models(&mut self, calibration: &[f64]) -> Result<()> {
        let predicted = self.models.signal.calibrate(calibration, None)?;
        let residuals = calibration_residuals(&predicted, calibration);
        self.models.uncertainty.calibrate(&residuals, None)?;
        info!(
            "[Filter] Models calibrated on {} samples (signal f={:.4}, uncertainty f={:.4})",
            calibration.len(),
            self.models.signal.kernel().forgetting_factor(),
            self.models.uncertainty.kernel().forgetting_factor()
        );
        Ok(())
    }

    // ========================================================================
    // FILTERING LOOP
    // ========================================================================

    /// Filter the next buffered observation
    pub fn step(&mut self) -> Result<ResultRow> {
        let position = self.current_position;
        let observation = self
            .inputs
            .get(position)
            .cloned()
            .ok_or(FilterError::MissingInput { position })?;

        let context = match (self.results.len().checked_sub(1), &self.context_seed) {
            (Some(anchor), _) => self.results_window.clamped_slice(&self.results, anchor),
            (None, Some(seed)) => std::slice::from_ref(seed),
            (None, None) => &[],
        };
        let result = self.algorithm.step(
            &observation,
            context,
            &mut self.models.signal,
            &mut self.models.uncertainty,
        )?;

        self.results.push(result.clone());
        self.check_for_outlier(&result);

        if self.is_out_of_control() && !self.for_recovery && self.control.n_steps_back > 0 {
            self.restore_control()?;
        }

        self.current_position += 1;
        debug_assert_eq!(self.results.len(), self.current_position);

        Ok(result)
    }

    /// Step until every observation with a complete input window is consumed
    pub fn update_filter(&mut self) -> Result<&[ResultRow]> {
        if let Some(last) = self.inputs_window.last_full_anchor(self.inputs.len()) {
            while self.current_position <= last {
                self.step()?;
            }
        }
        Ok(&self.results)
    }

    pub fn is_out_of_control(&self) -> bool {
        self.outliers_in_a_row >= self.control.n_outlier_threshold
    }

    fn check_for_outlier(&mut self, result: &ResultRow) {
        if result.is_outlier() {
            self.outliers_in_a_row += 1;
        } else {
            self.clear_outlier_streak();
        }
    }

    fn clear_outlier_streak(&mut self) {
        self.outliers_in_a_row = 0;
    }

    // ========================================================================
    // RECOVERY
    // ========================================================================

    fn calculate_out_of_control_positions(&self) -> OutOfControlWindow {
        OutOfControlWindow::compute(self.current_position, self.control.n_steps_back, self.inputs.len())
    }

    fn apply_sub_filter(&mut self, inputs: Vec<ObservationRow>) -> Result<Vec<ResultRow>> {
        let (results, models) =
            recovery::run_subpass(&self.algorithm, inputs, self.models.clone(), self.control)?;
        // Carry on from where the sub-filter left the models
        self.models = models;
        Ok(results)
    }

    /// Re-filter the out-of-control window in reverse, returned in
    /// chronological order without its lead-in rows
    pub fn backward_recovery(&mut self) -> Result<Vec<ResultRow>> {
        self.direction = FilterDirection::Backward;
        let window = self.out_of_control.ok_or(FilterError::UndefinedRecoveryWindow)?;
        let span = window.backward_span(self.control.n_warmup_steps, self.inputs.len());

        let data: Vec<ObservationRow> = self.inputs[span.start..=span.end].iter().rev().cloned().collect();
        let mut results = self.apply_sub_filter(data)?;
        results.reverse();
        results.truncate(results.len().saturating_sub(span.warmup));
        Ok(results)
    }

    /// Re-filter the out-of-control window in order, without its lead-in rows
    pub fn forward_recovery(&mut self) -> Result<Vec<ResultRow>> {
        self.direction = FilterDirection::Forward;
        let window = self.out_of_control.ok_or(FilterError::UndefinedRecoveryWindow)?;
        let span = window.forward_span(self.control.n_warmup_steps);

        let data = self.inputs[span.start..=span.end].to_vec();
        let results = self.apply_sub_filter(data)?;
        Ok(results.into_iter().skip(span.warmup).collect())
    }

    fn restore_control(&mut self) -> Result<()> {
        let window = self.calculate_out_of_control_positions();
        info!(
            "[Filter] {} outliers in a row at {}: recovering positions {}..={}",
            self.outliers_in_a_row, self.results[self.results.len() - 1].index, window.low, window.high
        );
        self.out_of_control = Some(window);

        let backward = self.backward_recovery()?;
        let forward = self.forward_recovery()?;
        let merged = recovery::merge_segments(backward, forward)?;

        debug!("[Filter] Splicing {} recovered rows at {}", merged.len(), window.low);
        self.results.truncate(window.low);
        self.results.extend(merged);

        self.clear_outlier_streak();
        self.out_of_control = None;
        self.recoveries += 1;
        Ok(())
    }

    // ========================================================================
    // ACCESSORS
    // ========================================================================

    pub fn results(&self) -> &[ResultRow] {
        &self.results
    }

    pub fn inputs(&self) -> &[ObservationRow] {
        &self.inputs
    }

    pub fn signal_model(&self) -> &SignalModel {
        &self.models.signal
    }

    pub fn uncertainty_model(&self) -> &UncertaintyModel {
        &self.models.uncertainty
    }

    pub fn control_parameters(&self) -> &ControlParameters {
        &self.control
    }

    pub fn current_position(&self) -> usize {
        self.current_position
    }

    pub fn outliers_in_a_row(&self) -> usize {
        self.outliers_in_a_row
    }

    pub fn recoveries(&self) -> usize {
        self.recoveries
    }

    pub fn direction(&self) -> FilterDirection {
        self.direction
    }

    pub fn status(&self) -> FilterStatus {
        FilterStatus {
            position: self.current_position,
            buffered: self.inputs.len(),
            outliers_flagged: self.results.iter().filter(|r| r.is_outlier()).count(),
            outliers_in_a_row: self.outliers_in_a_row,
            recoveries: self.recoveries,
            direction: self.direction,
            for_recovery: self.for_recovery,
        }
    }

    /// Result log and final model state
    pub fn into_parts(self) -> (Vec<ResultRow>, ModelPair) {
        (self.results, self.models)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::Kernel;
    use crate::traits::MockFilterAlgorithm;

    const SPIKE: f64 = 100.0;

    fn models() -> (SignalModel, UncertaintyModel) {
        (
            SignalModel::with_fixed_kernel(Kernel::with_order(1, 0.5).unwrap()),
            UncertaintyModel::with_fixed_parameters(Kernel::with_order(1, 0.1).unwrap(), 1.0, 1.0, 1.0),
        )
    }

    /// Algorithm stub flagging every observation equal to SPIKE
    fn spike_flagging_mock() -> MockFilterAlgorithm {
        let mut mock = MockFilterAlgorithm::new();
        mock.expect_step().returning(|obs, _previous, _signal, _uncertainty| {
            let value = obs.values[0];
            let is_outlier = value == SPIKE;
            Ok(ResultRow {
                index: obs.index,
                input_values: obs.values.clone(),
                inputs_are_outliers: vec![is_outlier],
                accepted_values: vec![if is_outlier { 0.0 } else { value }],
                predicted_values: vec![value],
                predicted_upper_limits: vec![value + 1.0],
                predicted_lower_limits: vec![value - 1.0],
            })
        });
        mock
    }

    fn series_with_spikes(n: usize, spikes: std::ops::Range<usize>) -> Vec<f64> {
        (0..n)
            .map(|i| if spikes.contains(&i) { SPIKE } else { i as f64 })
            .collect()
    }

    fn mock_filter(control: ControlParameters) -> OutlierFilter<MockFilterAlgorithm> {
        let (signal, uncertainty) = models();
        OutlierFilter::new(spike_flagging_mock(), signal, uncertainty, control)
    }

    #[test]
    fn test_bulk_and_single_ingestion_match() {
        let _ = env_logger::builder().is_test(true).try_init();
        let rows: Vec<ObservationRow> = (0..25i64)
            .map(|i| ObservationRow::scalar(i, (i as f64 * 0.3).sin()))
            .collect();

        let mut bulk = mock_filter(ControlParameters::default());
        bulk.add_observations(rows.clone());

        let mut single = mock_filter(ControlParameters::default());
        for row in rows.iter().cloned() {
            single.add_observation(row);
        }

        assert_eq!(bulk.inputs(), single.inputs());

        let mut values = mock_filter(ControlParameters::default());
        let raw: Vec<f64> = rows.iter().map(|r| r.values[0]).collect();
        values.add_values(&raw[..10]);
        values.add_values(&raw[10..]);
        assert_eq!(values.inputs(), bulk.inputs());
    }

    #[test]
    fn test_step_without_input_fails() {
        let mut filter = mock_filter(ControlParameters::default());
        assert_eq!(filter.step().unwrap_err(), FilterError::MissingInput { position: 0 });
    }

    #[test]
    fn test_update_filter_keeps_log_in_step_with_position() {
        let mut filter = mock_filter(ControlParameters::default());
        filter.add_values(&series_with_spikes(12, 0..0));
        let results = filter.update_filter().unwrap();
        assert_eq!(results.len(), 12);
        assert_eq!(filter.current_position(), 12);

        // Nothing new buffered: no-op
        assert_eq!(filter.update_filter().unwrap().len(), 12);
    }

    #[test]
    fn test_streak_triggers_single_recovery() {
        let _ = env_logger::builder().is_test(true).try_init();
        let control = ControlParameters::new(5, 2, 6).unwrap();
        let mut filter = mock_filter(control);
        filter.add_values(&series_with_spikes(30, 8..13));

        filter.update_filter().unwrap();

        assert_eq!(filter.recoveries(), 1);
        assert_eq!(filter.outliers_in_a_row(), 0);
        assert_eq!(filter.direction(), FilterDirection::Forward);
        assert_eq!(filter.results().len(), 30);
        for (i, row) in filter.results().iter().enumerate() {
            assert_eq!(row.index, RowIndex::Sequence(i as i64));
            assert_eq!(row.is_outlier(), (8..13).contains(&i));
        }
    }

    #[test]
    fn test_recovery_near_start_clamps_window() {
        let control = ControlParameters::new(2, 3, 10).unwrap();
        let mut filter = mock_filter(control);
        filter.add_values(&series_with_spikes(8, 1..3));

        filter.update_filter().unwrap();

        assert_eq!(filter.recoveries(), 1);
        assert_eq!(filter.results().len(), 8);
        assert_eq!(filter.results()[0].index, RowIndex::Sequence(0));
    }

    #[test]
    fn test_zero_steps_back_never_recovers() {
        let control = ControlParameters::new(3, 2, 0).unwrap();
        let mut filter = mock_filter(control);
        filter.add_values(&series_with_spikes(20, 5..14));

        for _ in 0..14 {
            filter.step().unwrap();
        }
        assert_eq!(filter.outliers_in_a_row(), 9);
        assert!(filter.is_out_of_control());

        filter.update_filter().unwrap();
        assert_eq!(filter.recoveries(), 0);
        assert_eq!(filter.outliers_in_a_row(), 0);
        assert_eq!(filter.status().outliers_flagged, 9);
    }

    #[test]
    fn test_recovery_sub_filter_does_not_recurse() {
        let control = ControlParameters::new(1, 0, 4).unwrap();
        let (signal, uncertainty) = models();
        let mock = spike_flagging_mock();
        let mut sub = OutlierFilter::for_recovery(
            &mock as &dyn FilterAlgorithm,
            ModelPair { signal, uncertainty },
            control,
            series_with_spikes(6, 1..5)
                .into_iter()
                .enumerate()
                .map(|(i, v)| ObservationRow::scalar(i as i64, v))
                .collect(),
            None,
        );
        sub.update_filter().unwrap();
        assert_eq!(sub.recoveries(), 0);
        assert!(sub.status().for_recovery);
    }

    #[test]
    fn test_recovery_passes_require_window() {
        let mut filter = mock_filter(ControlParameters::default());
        filter.add_values(&[1.0, 2.0, 3.0]);
        assert_eq!(filter.backward_recovery().unwrap_err(), FilterError::UndefinedRecoveryWindow);
        assert_eq!(filter.forward_recovery().unwrap_err(), FilterError::UndefinedRecoveryWindow);
    }

    #[test]
    fn test_backward_and_forward_segments_match_without_warmup() {
        let control = ControlParameters::new(5, 0, 6).unwrap();
        let mut filter = mock_filter(control);
        filter.add_values(&series_with_spikes(20, 0..0));
        for _ in 0..10 {
            filter.step().unwrap();
        }
        filter.out_of_control = Some(filter.calculate_out_of_control_positions());

        let backward = filter.backward_recovery().unwrap();
        let forward = filter.forward_recovery().unwrap();
        assert_eq!(backward.len(), forward.len());
        assert_eq!(backward.len(), 7);
        assert_eq!(backward[0].index, forward[0].index);
    }

    #[test]
    fn test_rejects_mismatched_window_sources() {
        let filter = mock_filter(ControlParameters::default());
        let swapped = filter.with_windows(DEFAULT_RESULTS_WINDOW, DEFAULT_INPUTS_WINDOW);
        assert!(matches!(swapped, Err(FilterError::Configuration(_))));
    }
}
