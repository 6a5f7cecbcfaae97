use crate::filter::FilterDirection;
use serde::{Deserialize, Serialize};

/// Snapshot of a filter's progress, for logs and the CLI summary
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct FilterStatus {
    /// Observations consumed so far (== length of the result log)
    pub position: usize,

    /// Observations buffered, consumed or not
    pub buffered: usize,

    /// Rows currently flagged as outliers in the result log.
    /// Recovery may rewrite past flags, so this is recomputed, not accumulated.
    pub outliers_flagged: usize,

    /// Current consecutive-outlier streak
    pub outliers_in_a_row: usize,

    /// Completed backward/forward recovery cycles
    pub recoveries: usize,

    /// Direction of the last pass
    pub direction: FilterDirection,

    /// True for a throwaway recovery sub-filter
    pub for_recovery: bool,
}

impl Default for FilterStatus {
    fn default() -> Self {
        FilterStatus {
            position: 0,
            buffered: 0,
            outliers_flagged: 0,
            outliers_in_a_row: 0,
            recoveries: 0,
            direction: FilterDirection::Forward,
            for_recovery: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_status_default() {
        let status = FilterStatus::default();
        assert_eq!(status.position, 0);
        assert_eq!(status.recoveries, 0);
        assert_eq!(status.direction, FilterDirection::Forward);
        assert!(!status.for_recovery);
    }

    #[test]
    fn test_filter_status_serde_roundtrip() {
        let mut status = FilterStatus::default();
        status.position = 42;
        status.recoveries = 2;
        status.direction = FilterDirection::Backward;

        let json = serde_json::to_string(&status).expect("serialize failed");
        assert!(json.contains("\"backward\""));
        let restored: FilterStatus = serde_json::from_str(&json).expect("deserialize failed");

        assert_eq!(restored, status);
    }
}
