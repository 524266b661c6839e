//! Anomaly record data model for the cost/metric ensemble detector.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::pattern::PatternContext;

/// Which family of signal produced an anomaly.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyType {
    Ratio,
    Stddev,
    Trend,
    Combined,
    Metric,
    Log,
    Pattern,
    ConfigDrift,
}

/// Urgency bucket, derived from attenuated confidence.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// Direction of a ratio-detector change.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Increase,
    Decrease,
    FromZero,
    None,
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct RatioDetail {
    pub detected: bool,
    pub score: f64,
    pub change_ratio: f64,
    pub direction: Direction,
}

impl Default for Direction {
    fn default() -> Self {
        Direction::None
    }
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct ZScoreDetail {
    pub detected: bool,
    pub score: f64,
    pub z_score: f64,
    pub mean: f64,
    pub stddev: f64,
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct TrendDetail {
    pub detected: bool,
    pub score: f64,
    pub consecutive_days: u32,
    pub average_increase_rate: f64,
}

/// A single cost/metric anomaly finding, carrying every detector's typed output.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AnomalyRecord {
    /// Stable hash of the service name and evaluation window.
    pub signature: String,
    pub anomaly_type: AnomalyType,
    pub severity: Severity,
    pub confidence: f64,
    pub raw_confidence: f64,
    pub ratio: RatioDetail,
    pub zscore: ZScoreDetail,
    pub trend: TrendDetail,
    pub pattern_contexts: Vec<PatternContext>,
    pub analysis: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_ordering_places_critical_highest() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::High > Severity::Medium);
        assert!(Severity::Medium > Severity::Low);
    }

    #[test]
    fn anomaly_type_serializes_snake_case() {
        let json = serde_json::to_string(&AnomalyType::ConfigDrift).unwrap();
        assert_eq!(json, "\"config_drift\"");
    }
}
