//! Ensemble anomaly detection (C5): ratio/z-score/trend scoring with
//! pattern-chain attenuation.

pub mod detector;
pub mod types;

pub use detector::{DetectorConfig, EnsembleAnomalyDetector};
pub use types::{AnomalyRecord, AnomalyType, Direction, RatioDetail, Severity, TrendDetail, ZScoreDetail};
