use crate::error::Result;
use crate::model::{SignalModel, UncertaintyModel};
use crate::row::{ObservationRow, ResultRow};

/// Per-step filtering algorithm driven by [`crate::filter::OutlierFilter`].
#[cfg_attr(test, mockall::automock)]
pub trait FilterAlgorithm {
    /// Produce the result row for `observation`.
    ///
    /// `previous` is the results-window context (the last row, or empty on
    /// the first step). Implementations decide the outlier flag and must
    /// advance both models exactly once.
    fn step(
        &self,
        observation: &ObservationRow,
        previous: &[ResultRow],
        signal_model: &mut SignalModel,
        uncertainty_model: &mut UncertaintyModel,
    ) -> Result<ResultRow>;
}

impl<T: FilterAlgorithm + ?Sized> FilterAlgorithm for &T {
    fn step(
        &self,
        observation: &ObservationRow,
        previous: &[ResultRow],
        signal_model: &mut SignalModel,
        uncertainty_model: &mut UncertaintyModel,
    ) -> Result<ResultRow> {
        (**self).step(observation, previous, signal_model, uncertainty_model)
    }
}
