//! Pattern recognition (C4): attenuate anomaly confidence for recurring,
//! benign-cause patterns.

pub mod chain;
pub mod recognizers;
pub mod types;

pub use chain::PatternChain;
pub use recognizers::{DayOfWeekRecognizer, PatternRecognizer, TrendRecognizer};
pub use types::{PatternContext, PatternType};
