//! Time-series query result types.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One series returned by a query: a metric name, its labels, and an
/// ordered set of `(unix_ts, value)` points.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TimeSeriesSample {
    pub metric: String,
    pub labels: BTreeMap<String, String>,
    pub samples: Vec<(i64, f64)>,
}

impl TimeSeriesSample {
    pub fn new(metric: impl Into<String>, labels: BTreeMap<String, String>, samples: Vec<(i64, f64)>) -> Self {
        Self {
            metric: metric.into(),
            labels,
            samples,
        }
    }

    /// Most recent value, if any.
    pub fn latest(&self) -> Option<f64> {
        self.samples.last().map(|(_, v)| *v)
    }

    /// Arithmetic mean over all points, or `None` if empty.
    pub fn mean(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        Some(self.samples.iter().map(|(_, v)| v).sum::<f64>() / self.samples.len() as f64)
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }
}
