//! # opsguard
//!
//! Admission control, ensemble anomaly detection, and cluster health
//! evaluation for a shared data-platform connection pool.
//!
//! ## Architecture
//!
//! ```text
//!   hint::parse/build/adjust          registry::{InMemoryStore, DurableStore}
//!            │                                  │
//!            ▼                                  ▼
//!   admission::AdmissionController ───── registry::RegistryStore
//!
//!   timeseries::TimeSeriesProvider ──▶ anomaly::EnsembleAnomalyDetector
//!            │                               │
//!            │                        pattern::PatternChain
//!            ▼                               ▼
//!   health::HealthEvaluator            anomaly::AnomalyRecord
//!
//!   injector::MetricInjector (pushes synthetic metrics for the mock provider)
//! ```
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use opsguard::admission::AdmissionController;
//! use opsguard::config::Settings;
//! use opsguard::registry::InMemoryStore;
//! use std::sync::Arc;
//!
//! # async fn run() -> opsguard::error::OpsGuardResult<()> {
//! let controller = AdmissionController::new(Arc::new(InMemoryStore::new()), Settings::default());
//! let result = controller.check_admission(4, "daily_load", "run-123", "fact_orders", 8).await?;
//! if result.allowed {
//!     // do the work at result.parallel degree, then:
//!     controller.release(4, "run-123").await?;
//! }
//! # Ok(())
//! # }
//! ```

pub mod admission;
pub mod anomaly;
pub mod config;
pub mod error;
pub mod health;
pub mod hint;
pub mod injector;
pub mod pattern;
pub mod registry;
pub mod series;
pub mod timeseries;

pub use admission::{AdmissionController, AdmissionReason, AdmissionResult, ReleaseResult, SourceStatus};
pub use anomaly::{AnomalyRecord, AnomalyType, EnsembleAnomalyDetector, Severity};
pub use config::Settings;
pub use error::{OpsGuardError, OpsGuardResult};
pub use health::{Anomaly, DetectionResult, HealthEvaluator};
pub use injector::MetricInjector;
pub use pattern::{PatternChain, PatternContext};
pub use registry::{BatchRegistration, ConnectionLimits, InMemoryStore, RegistryStore};
pub use timeseries::{MockProvider, TimeSeriesProvider, TimeSeriesSample};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::TrendRecognizer;
    use crate::series::TimedPoint;
    use std::sync::Arc;

    #[tokio::test]
    async fn admission_end_to_end_acquire_and_release() {
        let store = Arc::new(InMemoryStore::new());
        store
            .put_limits(ConnectionLimits {
                src_db_id: 4,
                name: "ADW".into(),
                db_type: "oracle".into(),
                max_connections: 1000,
                threshold_percent: 95,
                default_parallel: 8,
                min_parallel: 2,
            })
            .await
            .unwrap();
        let controller = AdmissionController::new(store, Settings::default());

        let result = controller
            .check_admission(4, "daily_load", "run-1", "fact_orders", 8)
            .await
            .unwrap();
        assert!(result.allowed);
        assert_eq!(result.reason, AdmissionReason::Ok);

        let hint = crate::hint::build(result.parallel as u32, true);
        assert!(hint.contains("PARALLEL(8)"));

        let release = controller.release(4, "run-1").await.unwrap();
        assert!(release.released);
    }

    #[tokio::test]
    async fn health_pipeline_surfaces_injected_crash_loop() {
        let provider = MockProvider::new();
        let mut labels = std::collections::BTreeMap::new();
        labels.insert("namespace".to_string(), "prod".to_string());
        labels.insert("pod".to_string(), "worker-9".to_string());
        provider.inject_anomaly("crash_loop", &labels);

        let evaluator = HealthEvaluator::new(None, 0.8, 0.8).unwrap();
        let result = evaluator.detect_all(&provider, Some("prod")).await.unwrap();
        assert!(result.has_anomalies());
        assert!(result.has_critical());
    }

    #[test]
    fn anomaly_pipeline_attenuates_via_pattern_chain() {
        let chain = PatternChain::new(vec![Box::new(TrendRecognizer)], 0.40);
        let detector = EnsembleAnomalyDetector::new(Default::default(), chain);
        let series: Vec<TimedPoint> = (0..8)
            .map(|i| TimedPoint::new(i * 86_400, 100_000.0 + 5_000.0 * i as f64))
            .collect();
        // A confident linear ramp should either be fully attenuated away or
        // survive with confidence reduced by the trend recognizer.
        if let Some(record) = detector.detect("svc", &series) {
            assert!(record.confidence <= record.raw_confidence);
        }
    }

    #[test]
    fn all_public_types_accessible() {
        let _settings = Settings::default();
        let _store = InMemoryStore::new();
        let _chain = PatternChain::new(vec![], 0.40);
        let _provider = MockProvider::new();
    }
}
