//! Individual pattern recognizers: day-of-week cyclicality and linear trend.

use chrono::{DateTime, Datelike, Utc, Weekday};

use crate::error::{OpsGuardError, OpsGuardResult};
use crate::pattern::types::{PatternContext, PatternType};
use crate::series::TimedPoint;

const MIN_SAMPLES: usize = 7;
const DAY_OF_WEEK_TOLERANCE: f64 = 0.30;
const DAY_OF_WEEK_ADJUSTMENT: f64 = -0.20;
const TREND_TOLERANCE: f64 = 0.15;
const TREND_ADJUSTMENT: f64 = -0.15;

/// A component that recognizes one recurring, confidence-attenuating pattern.
pub trait PatternRecognizer: Send + Sync {
    fn recognize(&self, series: &[TimedPoint]) -> OpsGuardResult<Option<PatternContext>>;
}

fn is_weekend(ts: i64) -> OpsGuardResult<bool> {
    let dt: DateTime<Utc> = DateTime::from_timestamp(ts, 0).ok_or_else(|| {
        OpsGuardError::Validation {
            field: "ts".to_string(),
            detail: format!("{ts} is not a valid unix timestamp"),
        }
    })?;
    Ok(matches!(dt.weekday(), Weekday::Sat | Weekday::Sun))
}

/// Suppresses false positives caused by ordinary weekend/weekday volume swings.
#[derive(Default)]
pub struct DayOfWeekRecognizer;

impl PatternRecognizer for DayOfWeekRecognizer {
    fn recognize(&self, series: &[TimedPoint]) -> OpsGuardResult<Option<PatternContext>> {
        if series.len() < MIN_SAMPLES {
            return Ok(None);
        }
        let latest = series.last().expect("checked len above");
        let latest_is_weekend = is_weekend(latest.ts)?;

        let same_partition: Vec<f64> = series[..series.len() - 1]
            .iter()
            .filter_map(|p| match is_weekend(p.ts) {
                Ok(weekend) if weekend == latest_is_weekend => Some(p.value),
                _ => None,
            })
            .collect();

        if same_partition.len() < 2 {
            return Ok(None);
        }

        let expected = same_partition.iter().sum::<f64>() / same_partition.len() as f64;
        if expected <= 0.0 {
            return Ok(None);
        }

        let actual = latest.value;
        let ratio = actual / expected;
        if ratio < 1.0 - DAY_OF_WEEK_TOLERANCE || ratio > 1.0 + DAY_OF_WEEK_TOLERANCE {
            return Ok(None);
        }

        Ok(Some(PatternContext {
            pattern_type: PatternType::DayOfWeek,
            expected_value: expected,
            actual_value: actual,
            confidence_adjustment: DAY_OF_WEEK_ADJUSTMENT,
            explanation: format!(
                "value {actual:.2} is within tolerance of the typical {partition} mean {expected:.2}",
                partition = if latest_is_weekend { "weekend" } else { "weekday" },
            ),
        }))
    }
}

/// Suppresses false positives caused by an ongoing, already-expected linear growth.
#[derive(Default)]
pub struct TrendRecognizer;

impl PatternRecognizer for TrendRecognizer {
    fn recognize(&self, series: &[TimedPoint]) -> OpsGuardResult<Option<PatternContext>> {
        if series.len() < MIN_SAMPLES {
            return Ok(None);
        }
        let (history, target) = series.split_at(series.len() - 1);
        let target = target[0].value;

        let m = history.len() as f64;
        let xs: Vec<f64> = (0..history.len()).map(|i| i as f64).collect();
        let ys: Vec<f64> = history.iter().map(|p| p.value).collect();

        let mean_x = xs.iter().sum::<f64>() / m;
        let mean_y = ys.iter().sum::<f64>() / m;
        let var_x: f64 = xs.iter().map(|x| (x - mean_x).powi(2)).sum();
        if var_x == 0.0 {
            return Ok(None);
        }
        let cov_xy: f64 = xs
            .iter()
            .zip(ys.iter())
            .map(|(x, y)| (x - mean_x) * (y - mean_y))
            .sum();
        let slope = cov_xy / var_x;
        let intercept = mean_y - slope * mean_x;

        let expected = slope * m + intercept;
        if expected <= 0.0 {
            return Ok(None);
        }

        if (target - expected).abs() / expected > TREND_TOLERANCE {
            return Ok(None);
        }

        Ok(Some(PatternContext {
            pattern_type: PatternType::Trend,
            expected_value: expected,
            actual_value: target,
            confidence_adjustment: TREND_ADJUSTMENT,
            explanation: format!(
                "value {target:.2} tracks the fitted linear trend projection {expected:.2}"
            ),
        }))
    }
}
