//! Pattern chain data model.

use serde::{Deserialize, Serialize};

/// Which recognizer produced a [`PatternContext`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternType {
    DayOfWeek,
    Trend,
}

/// A recognized benign pattern and the confidence attenuation it earns.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PatternContext {
    pub pattern_type: PatternType,
    pub expected_value: f64,
    pub actual_value: f64,
    /// Always in `[-0.4, 0.1]`; negative values suppress false-positive confidence.
    pub confidence_adjustment: f64,
    pub explanation: String,
}
