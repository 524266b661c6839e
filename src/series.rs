//! Shared time-ordered numeric series used by pattern recognizers and the
//! anomaly detector alike.

/// A single `(unix_ts, value)` observation.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TimedPoint {
    pub ts: i64,
    pub value: f64,
}

impl TimedPoint {
    pub fn new(ts: i64, value: f64) -> Self {
        Self { ts, value }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructs_from_parts() {
        let p = TimedPoint::new(100, 1.5);
        assert_eq!(p.ts, 100);
        assert_eq!(p.value, 1.5);
    }
}
