//! Ensemble anomaly detector (C5): ratio, robust z-score, and trend tests
//! combined into a single confidence, attenuated by the pattern chain.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use chrono::Utc;

use crate::anomaly::types::{
    AnomalyRecord, AnomalyType, Direction, RatioDetail, Severity, TrendDetail, ZScoreDetail,
};
use crate::pattern::PatternChain;
use crate::series::TimedPoint;

/// Detector thresholds. Defaults match the values named throughout §4.5.
#[derive(Clone, Copy, Debug)]
pub struct DetectorConfig {
    pub ratio_threshold: f64,
    pub ratio_decrease_threshold: f64,
    pub stddev_multiplier: f64,
    pub trend_min_increase_rate: f64,
    pub trend_consecutive_days: u32,
    pub min_data_points: usize,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            ratio_threshold: 0.5,
            ratio_decrease_threshold: 0.3,
            stddev_multiplier: 2.0,
            trend_min_increase_rate: 0.05,
            trend_consecutive_days: 3,
            min_data_points: 7,
        }
    }
}

pub struct EnsembleAnomalyDetector {
    config: DetectorConfig,
    pattern_chain: PatternChain,
}

impl EnsembleAnomalyDetector {
    pub fn new(config: DetectorConfig, pattern_chain: PatternChain) -> Self {
        Self {
            config,
            pattern_chain,
        }
    }

    /// Score `series` for `service` and return an [`AnomalyRecord`] iff the
    /// ensemble actually flags it as anomalous.
    pub fn detect(&self, service: &str, series: &[TimedPoint]) -> Option<AnomalyRecord> {
        if series.len() < self.config.min_data_points {
            return None;
        }

        let target = series.last()?.value;
        let previous = series[series.len() - 2].value;
        let history: Vec<f64> = series[..series.len() - 1].iter().map(|p| p.value).collect();

        let ratio = self.ratio_detector(target, previous);
        let zscore = self.zscore_detector(target, &history);
        let trend = self.trend_detector(series);

        let detected_count =
            ratio.detected as u8 + zscore.detected as u8 + trend.detected as u8;

        let raw_confidence = clamp01(
            0.40 * ratio.score + 0.35 * zscore.score + 0.25 * trend.score,
        );
        let raw_confidence = (raw_confidence * 1000.0).round() / 1000.0;

        let adjustment = self.pattern_chain.total_adjustment(series);
        let confidence = clamp01(raw_confidence + adjustment);

        let is_anomaly = detected_count >= 2 || raw_confidence > 0.6;
        if !is_anomaly {
            return None;
        }

        let severity = severity_for(confidence, detected_count, ratio.change_ratio);
        let pattern_contexts = self.pattern_chain.recognized(series);
        let analysis = build_analysis(&ratio, &zscore, &trend, confidence);
        let now = Utc::now();

        Some(AnomalyRecord {
            signature: signature_for(service, series),
            anomaly_type: AnomalyType::Combined,
            severity,
            confidence,
            raw_confidence,
            ratio,
            zscore,
            trend,
            pattern_contexts,
            analysis,
            first_seen: now,
            last_seen: now,
        })
    }

    fn ratio_detector(&self, target: f64, previous: f64) -> RatioDetail {
        let target = if target.is_nan() { 0.0 } else { target };
        let previous = if previous.is_nan() { 0.0 } else { previous };

        if previous <= 0.0 {
            let detected = target > 0.0;
            return RatioDetail {
                detected,
                score: if detected { 0.5 } else { 0.0 },
                change_ratio: if detected { f64::INFINITY } else { 0.0 },
                direction: if detected {
                    Direction::FromZero
                } else {
                    Direction::None
                },
            };
        }

        let r = (target - previous) / previous;
        let detected = r >= self.config.ratio_threshold || r <= -self.config.ratio_decrease_threshold;
        let score = (r.abs() / (self.config.ratio_threshold * 2.0)).min(1.0);
        let direction = if r > 0.0 {
            Direction::Increase
        } else if r < 0.0 {
            Direction::Decrease
        } else {
            Direction::None
        };

        RatioDetail {
            detected,
            score,
            change_ratio: r,
            direction,
        }
    }

    fn zscore_detector(&self, target: f64, history: &[f64]) -> ZScoreDetail {
        if history.len() < 3 {
            return ZScoreDetail::default();
        }
        let mean = history.iter().sum::<f64>() / history.len() as f64;
        let variance = history.iter().map(|x| (x - mean).powi(2)).sum::<f64>()
            / (history.len() as f64 - 1.0);
        let stddev = variance.sqrt();
        if stddev == 0.0 {
            return ZScoreDetail {
                mean,
                stddev: 0.0,
                ..Default::default()
            };
        }
        let z = (target - mean) / stddev;
        let detected = z.abs() >= self.config.stddev_multiplier;
        let score = (z.abs() / (self.config.stddev_multiplier * 2.0)).min(1.0);
        ZScoreDetail {
            detected,
            score,
            z_score: z,
            mean,
            stddev,
        }
    }

    fn trend_detector(&self, series: &[TimedPoint]) -> TrendDetail {
        let mut rates = Vec::new();
        for k in (1..series.len()).rev() {
            let prev = series[k - 1].value;
            if prev <= 0.0 {
                break;
            }
            let rate = (series[k].value - prev) / prev;
            if rate >= self.config.trend_min_increase_rate {
                rates.push(rate);
            } else {
                break;
            }
        }

        let consecutive_days = rates.len() as u32;
        let detected = consecutive_days >= self.config.trend_consecutive_days;
        if rates.is_empty() {
            return TrendDetail::default();
        }
        let mean_rate = rates.iter().sum::<f64>() / rates.len() as f64;
        let required = self.config.trend_consecutive_days as f64;
        let days_factor = (consecutive_days as f64 / (required * 2.0)).min(1.0);
        let rate_factor = (mean_rate / (self.config.trend_min_increase_rate * 3.0)).min(1.0);
        let score = (days_factor + rate_factor) / 2.0;

        TrendDetail {
            detected,
            score,
            consecutive_days,
            average_increase_rate: mean_rate,
        }
    }
}

fn clamp01(v: f64) -> f64 {
    if v.is_nan() {
        0.0
    } else {
        v.clamp(0.0, 1.0)
    }
}

fn severity_for(confidence: f64, detected_count: u8, change_ratio: f64) -> Severity {
    if confidence >= 0.8 || (detected_count >= 2 && change_ratio >= 1.0) {
        Severity::Critical
    } else if confidence >= 0.65 {
        Severity::High
    } else if confidence >= 0.5 {
        Severity::Medium
    } else {
        Severity::Low
    }
}

fn signature_for(service: &str, series: &[TimedPoint]) -> String {
    let mut hasher = DefaultHasher::new();
    service.hash(&mut hasher);
    if let (Some(first), Some(last)) = (series.first(), series.last()) {
        first.ts.hash(&mut hasher);
        last.ts.hash(&mut hasher);
    }
    format!("{:016x}", hasher.finish())
}

fn build_analysis(ratio: &RatioDetail, zscore: &ZScoreDetail, trend: &TrendDetail, confidence: f64) -> String {
    let mut clauses = Vec::new();
    if ratio.change_ratio.is_finite() {
        clauses.push(format!("change of {:.1}%", ratio.change_ratio * 100.0));
    }
    if ratio.detected {
        clauses.push("ratio detector flagged it".to_string());
    }
    if zscore.detected {
        clauses.push(format!("z-score {:.2} exceeded threshold", zscore.z_score));
    }
    if trend.detected {
        clauses.push(format!(
            "{} consecutive days of sustained increase",
            trend.consecutive_days
        ));
    }
    clauses.push(format!("combined confidence {:.3}", confidence));
    clauses.join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat_series(n: usize, value: f64) -> Vec<TimedPoint> {
        (0..n as i64)
            .map(|i| TimedPoint::new(i * 86_400, value))
            .collect()
    }

    fn detector() -> EnsembleAnomalyDetector {
        EnsembleAnomalyDetector::new(
            DetectorConfig::default(),
            PatternChain::new(vec![], 0.40),
        )
    }

    #[test]
    fn stable_series_is_not_anomalous() {
        let series = flat_series(8, 100.0);
        assert!(detector().detect("svc-a", &series).is_none());
    }

    #[test]
    fn sharp_spike_is_flagged_critical_or_high() {
        let mut series = flat_series(7, 100.0);
        series.push(TimedPoint::new(7 * 86_400, 400.0));
        let record = detector().detect("svc-a", &series).unwrap();
        assert!(matches!(record.severity, Severity::Critical | Severity::High));
        assert!(record.ratio.detected);
    }

    #[test]
    fn short_series_below_min_points_is_skipped() {
        let series = flat_series(3, 100.0);
        assert!(detector().detect("svc-a", &series).is_none());
    }

    #[test]
    fn from_zero_escalation_is_detected_via_dedicated_branch() {
        let mut series = flat_series(7, 0.0);
        series.push(TimedPoint::new(7 * 86_400, 50.0));
        let ratio = detector().ratio_detector(50.0, 0.0);
        assert!(ratio.detected);
        assert_eq!(ratio.score, 0.5);
    }

    #[test]
    fn sustained_linear_ramp_attenuated_by_trend_recognizer() {
        let series: Vec<TimedPoint> = (0..8)
            .map(|i| TimedPoint::new(i * 86_400, 100_000.0 + 5_000.0 * i as f64))
            .collect();
        let chain = PatternChain::new(
            vec![Box::new(crate::pattern::TrendRecognizer)],
            0.40,
        );
        let with_chain = EnsembleAnomalyDetector::new(DetectorConfig::default(), chain);
        let without_chain =
            EnsembleAnomalyDetector::new(DetectorConfig::default(), PatternChain::new(vec![], 0.40));

        let with_record = with_chain.detect("svc-b", &series);
        let without_record = without_chain.detect("svc-b", &series);
        if let (Some(a), Some(b)) = (&with_record, &without_record) {
            assert!(a.confidence <= b.raw_confidence - 0.15 + 1e-9);
        }
    }
}
