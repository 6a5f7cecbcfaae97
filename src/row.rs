//! Observation and result rows

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Ordering key of a row: a sequence number or a timestamp
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RowIndex {
    Sequence(i64),
    Timestamp(DateTime<Utc>),
}

impl fmt::Display for RowIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowIndex::Sequence(n) => write!(f, "{}", n),
            RowIndex::Timestamp(ts) => write!(f, "{}", ts.to_rfc3339()),
        }
    }
}

impl From<i64> for RowIndex {
    fn from(n: i64) -> Self {
        RowIndex::Sequence(n)
    }
}

impl From<DateTime<Utc>> for RowIndex {
    fn from(ts: DateTime<Utc>) -> Self {
        RowIndex::Timestamp(ts)
    }
}

/// One ingested observation; immutable once buffered
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationRow {
    pub index: RowIndex,
    pub values: Vec<f64>,
}

impl ObservationRow {
    pub fn new(index: impl Into<RowIndex>, values: Vec<f64>) -> Self {
        Self {
            index: index.into(),
            values,
        }
    }

    /// Single-channel row
    pub fn scalar(index: impl Into<RowIndex>, value: f64) -> Self {
        Self::new(index, vec![value])
    }
}

/// Outcome of filtering one observation.
///
/// `predicted_*` fields describe the step *after* this one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRow {
    pub index: RowIndex,
    pub input_values: Vec<f64>,
    pub inputs_are_outliers: Vec<bool>,
    pub accepted_values: Vec<f64>,
    pub predicted_values: Vec<f64>,
    pub predicted_upper_limits: Vec<f64>,
    pub predicted_lower_limits: Vec<f64>,
}

impl ResultRow {
    /// True when the first channel was flagged
    pub fn is_outlier(&self) -> bool {
        self.inputs_are_outliers.first().copied().unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_index_deserializes_number_or_timestamp() {
        let rows: Vec<ObservationRow> = serde_json::from_str(
            r#"[{"index": 4, "values": [1.5]},
                {"index": "2024-03-01T12:00:00Z", "values": [2.0]}]"#,
        )
        .expect("deserialize failed");

        assert_eq!(rows[0].index, RowIndex::Sequence(4));
        assert_eq!(
            rows[1].index,
            RowIndex::Timestamp(Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_outlier_flag_reads_first_channel() {
        let row = ResultRow {
            index: RowIndex::Sequence(1),
            input_values: vec![1.0],
            inputs_are_outliers: vec![true],
            accepted_values: vec![0.9],
            predicted_values: vec![1.0],
            predicted_upper_limits: vec![2.0],
            predicted_lower_limits: vec![0.0],
        };
        assert!(row.is_outlier());
    }
}
