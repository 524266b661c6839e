//! The pattern chain: an ordered, independently-failing set of recognizers
//! whose adjustments sum under a floor.

use tracing::warn;

use crate::pattern::recognizers::PatternRecognizer;
use crate::pattern::types::PatternContext;
use crate::series::TimedPoint;

/// Combines recognizer adjustments into a single confidence attenuation,
/// never exceeding `max_adjustment` in magnitude.
pub struct PatternChain {
    recognizers: Vec<Box<dyn PatternRecognizer>>,
    max_adjustment: f64,
    enabled: bool,
}

impl PatternChain {
    pub fn new(recognizers: Vec<Box<dyn PatternRecognizer>>, max_adjustment: f64) -> Self {
        Self {
            recognizers,
            max_adjustment: -max_adjustment.abs(),
            enabled: true,
        }
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Every context recognized by a chain member on this series. Recognizer
    /// errors are logged and skipped, not surfaced.
    pub fn recognized(&self, series: &[TimedPoint]) -> Vec<PatternContext> {
        if !self.enabled {
            return Vec::new();
        }
        self.recognizers
            .iter()
            .filter_map(|r| match r.recognize(series) {
                Ok(ctx) => ctx,
                Err(e) => {
                    warn!(error = %e, "pattern recognizer failed, skipping");
                    None
                }
            })
            .collect()
    }

    /// `max(sum(adjustments), max_adjustment)`. Zero when the chain is disabled.
    pub fn total_adjustment(&self, series: &[TimedPoint]) -> f64 {
        if !self.enabled {
            return 0.0;
        }
        let sum: f64 = self
            .recognized(series)
            .iter()
            .map(|ctx| ctx.confidence_adjustment)
            .sum();
        sum.max(self.max_adjustment)
    }
}
