//! Admission control algorithm (C3): allow, downgrade, or wait.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::admission::types::{AdmissionReason, AdmissionResult, ReleaseResult, SourceStatus};
use crate::config::Settings;
use crate::error::{OpsGuardError, OpsGuardResult};
use crate::registry::{
    BatchRegistration, CommitOutcome, ConnectionLimits, RegistryStore, ReleaseOutcome,
};

/// Bound on conditional-write retries before a `check_admission` call gives
/// up and surfaces a transient error to the caller.
const MAX_COMMIT_RETRIES: u32 = 5;

/// Long-lived gatekeeper over a shared connection pool. Construct once per
/// process; tests build a fresh instance over an [`crate::registry::InMemoryStore`].
pub struct AdmissionController {
    store: Arc<dyn RegistryStore>,
    settings: Settings,
}

impl AdmissionController {
    pub fn new(store: Arc<dyn RegistryStore>, settings: Settings) -> Self {
        Self { store, settings }
    }

    /// Decide whether `requested_parallel` connections can be acquired now,
    /// at a downgraded degree, or must wait.
    pub async fn check_admission(
        &self,
        src_db_id: i64,
        dag_id: &str,
        dag_run_id: &str,
        table_name: &str,
        requested_parallel: i64,
    ) -> OpsGuardResult<AdmissionResult> {
        let limits = self.store.get_limits(src_db_id).await?;
        if requested_parallel < limits.min_parallel {
            return Err(OpsGuardError::Validation {
                field: "requested_parallel".to_string(),
                detail: format!(
                    "{requested_parallel} is below min_parallel {}",
                    limits.min_parallel
                ),
            });
        }
        let threshold = limits.threshold();

        for attempt in 0..MAX_COMMIT_RETRIES {
            let current_usage = self.store.current_usage(src_db_id).await?;

            if current_usage + requested_parallel <= threshold {
                let reg = BatchRegistration::new(
                    src_db_id,
                    dag_run_id.to_string(),
                    dag_id.to_string(),
                    table_name.to_string(),
                    requested_parallel,
                    None,
                );
                match self.store.try_commit_running(current_usage, reg).await? {
                    CommitOutcome::Committed { current_usage } => {
                        debug!(src_db_id, requested_parallel, "admitted at full capacity");
                        return Ok(AdmissionResult {
                            allowed: true,
                            parallel: requested_parallel,
                            downgraded: false,
                            original_parallel: None,
                            wait_seconds: 0,
                            queue_position: 0,
                            reason: AdmissionReason::Ok,
                            current_usage,
                            available: threshold - current_usage,
                        });
                    }
                    CommitOutcome::Conflict { .. } => {
                        debug!(src_db_id, attempt, "commit conflict, retrying");
                        continue;
                    }
                }
            }

            if let Some(adjusted) =
                find_acceptable_parallel(current_usage, threshold, requested_parallel, limits.min_parallel)
            {
                let reg = BatchRegistration::new(
                    src_db_id,
                    dag_run_id.to_string(),
                    dag_id.to_string(),
                    table_name.to_string(),
                    adjusted,
                    Some(requested_parallel),
                );
                match self.store.try_commit_running(current_usage, reg).await? {
                    CommitOutcome::Committed { current_usage } => {
                        debug!(
                            src_db_id,
                            requested_parallel, adjusted, "admitted with downgrade"
                        );
                        return Ok(AdmissionResult {
                            allowed: true,
                            parallel: adjusted,
                            downgraded: true,
                            original_parallel: Some(requested_parallel),
                            wait_seconds: 0,
                            queue_position: 0,
                            reason: AdmissionReason::PartialCapacityAvailable,
                            current_usage,
                            available: threshold - current_usage,
                        });
                    }
                    CommitOutcome::Conflict { .. } => {
                        debug!(src_db_id, attempt, "downgrade commit conflict, retrying");
                        continue;
                    }
                }
            }

            // Case C: no acceptable degree fits even at min_parallel. Wait.
            let running = self.store.scan_running(src_db_id).await?;
            let waiting = self.store.scan_waiting_count(src_db_id).await?;
            let wait_seconds = estimate_wait_seconds(
                running.len(),
                self.settings.default_wait_seconds,
                self.settings.max_wait_seconds,
            );
            return Ok(AdmissionResult {
                allowed: false,
                parallel: requested_parallel,
                downgraded: false,
                original_parallel: None,
                wait_seconds,
                queue_position: waiting + 1,
                reason: AdmissionReason::ConnectionLimitExceeded,
                current_usage,
                available: threshold - current_usage,
            });
        }

        warn!(src_db_id, "admission retries exhausted under contention");
        Err(OpsGuardError::WriteConflict {
            src_db_id,
            dag_run_id: dag_run_id.to_string(),
        })
    }

    /// Release the connections held by a batch. Idempotent: releasing an
    /// already-completed registration returns the same payload without
    /// double-releasing.
    pub async fn release(&self, src_db_id: i64, dag_run_id: &str) -> OpsGuardResult<ReleaseResult> {
        match self.store.complete(src_db_id, dag_run_id).await? {
            ReleaseOutcome::Released {
                released_connections,
            }
            | ReleaseOutcome::AlreadyReleased {
                released_connections,
            } => {
                let current_usage = self.store.current_usage(src_db_id).await?;
                Ok(ReleaseResult {
                    released: true,
                    released_connections,
                    current_usage,
                    error: None,
                })
            }
            ReleaseOutcome::NotFound => Ok(ReleaseResult {
                released: false,
                released_connections: 0,
                current_usage: self.store.current_usage(src_db_id).await?,
                error: Some(format!("Batch not found: {dag_run_id}")),
            }),
        }
    }

    /// Snapshot of usage across every source database with known limits, or
    /// that currently holds at least one running registration.
    pub async fn status(&self, known_sources: &[i64]) -> OpsGuardResult<HashMap<i64, SourceStatus>> {
        let mut out = HashMap::new();
        for &src_db_id in known_sources {
            let limits = self.store.get_limits(src_db_id).await?;
            let running = self.store.scan_running(src_db_id).await?;
            let waiting = self.store.scan_waiting_count(src_db_id).await?;
            let current_usage: i64 = running.iter().map(|r| r.parallel_hint).sum();
            let threshold = limits.threshold();
            out.insert(
                src_db_id,
                SourceStatus {
                    max_connections: limits.max_connections,
                    threshold,
                    current_usage,
                    available: threshold - current_usage,
                    active: running.len(),
                    waiting,
                },
            );
        }
        Ok(out)
    }
}

/// Halve `requested` repeatedly, clamped up to `min_parallel`, until a degree
/// fits under `threshold` or `min_parallel` itself doesn't fit.
fn find_acceptable_parallel(
    current_usage: i64,
    threshold: i64,
    requested: i64,
    min_parallel: i64,
) -> Option<i64> {
    let mut adjusted = requested;

    while adjusted >= min_parallel {
        adjusted /= 2;
        if adjusted < min_parallel {
            adjusted = min_parallel;
        }

        if current_usage + adjusted <= threshold {
            return Some(adjusted);
        }

        if adjusted == min_parallel {
            break;
        }
    }

    None
}

/// Wait-time estimate: a floor plus ten seconds per ten currently-running
/// batches, capped at `max_wait`.
fn estimate_wait_seconds(running_count: usize, default_wait: u64, max_wait: u64) -> u64 {
    if running_count == 0 {
        return default_wait;
    }
    let queue_factor = (running_count / 10).min(5) as u64;
    (default_wait + queue_factor * 10).min(max_wait)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::InMemoryStore;
    use proptest::prelude::*;

    fn settings() -> Settings {
        Settings::default()
    }

    async fn controller_with_limits(limits: ConnectionLimits) -> AdmissionController {
        let store = Arc::new(InMemoryStore::new());
        store.put_limits(limits).await.unwrap();
        AdmissionController::new(store, settings())
    }

    fn adw_limits() -> ConnectionLimits {
        ConnectionLimits {
            src_db_id: 4,
            name: "ADW".into(),
            db_type: "oracle".into(),
            max_connections: 1000,
            threshold_percent: 95,
            default_parallel: 8,
            min_parallel: 2,
        }
    }

    #[tokio::test]
    async fn full_capacity_admits_requested_parallel() {
        let controller = controller_with_limits(adw_limits()).await;
        let result = controller
            .check_admission(4, "dag", "run-1", "tbl", 8)
            .await
            .unwrap();
        assert!(result.allowed);
        assert_eq!(result.parallel, 8);
        assert_eq!(result.current_usage, 8);
        assert!(!result.downgraded);
    }

    #[tokio::test]
    async fn downgrade_finds_32_when_64_requested() {
        let controller = controller_with_limits(adw_limits()).await;
        for i in 0..90 {
            controller
                .check_admission(4, "dag", &format!("preload-{i}"), "tbl", 10)
                .await
                .unwrap();
        }
        let result = controller
            .check_admission(4, "dag", "run-new", "tbl", 64)
            .await
            .unwrap();
        assert!(result.allowed);
        assert!(result.downgraded);
        assert_eq!(result.parallel, 32);
        assert_eq!(result.original_parallel, Some(64));
        assert_eq!(result.reason, AdmissionReason::PartialCapacityAvailable);
    }

    #[tokio::test]
    async fn wait_when_no_capacity_fits() {
        let controller = controller_with_limits(adw_limits()).await;
        for i in 0..95 {
            controller
                .check_admission(4, "dag", &format!("preload-{i}"), "tbl", 10)
                .await
                .unwrap();
        }
        let result = controller
            .check_admission(4, "dag", "run-new", "tbl", 8)
            .await
            .unwrap();
        assert!(!result.allowed);
        assert!(result.wait_seconds >= 30 && result.wait_seconds <= 300);
        assert!(result.queue_position >= 1);
        assert_eq!(result.reason, AdmissionReason::ConnectionLimitExceeded);
    }

    #[tokio::test]
    async fn release_is_idempotent_end_to_end() {
        let controller = controller_with_limits(adw_limits()).await;
        controller
            .check_admission(4, "dag", "run-1", "tbl", 8)
            .await
            .unwrap();
        let first = controller.release(4, "run-1").await.unwrap();
        let second = controller.release(4, "run-1").await.unwrap();
        assert_eq!(first.released_connections, second.released_connections);
        assert_eq!(first.released_connections, 8);
    }

    #[tokio::test]
    async fn release_unknown_registration_reports_not_released() {
        let controller = controller_with_limits(adw_limits()).await;
        let result = controller.release(4, "ghost").await.unwrap();
        assert!(!result.released);
        assert!(result.error.is_some());
    }

    #[tokio::test]
    async fn requested_below_min_parallel_is_rejected() {
        let controller = controller_with_limits(adw_limits()).await;
        let result = controller.check_admission(4, "dag", "run-1", "tbl", 1).await;
        assert!(matches!(result, Err(OpsGuardError::Validation { .. })));
    }

    #[tokio::test]
    async fn unknown_source_uses_defensive_default_limits() {
        let store = Arc::new(InMemoryStore::new());
        let controller = AdmissionController::new(store, settings());
        let result = controller
            .check_admission(999, "dag", "run-1", "tbl", 4)
            .await
            .unwrap();
        assert!(result.allowed);
        assert_eq!(result.parallel, 4);
    }

    #[tokio::test]
    async fn concurrent_admits_never_exceed_threshold() {
        let limits = ConnectionLimits {
            src_db_id: 1,
            name: "small".into(),
            db_type: "oracle".into(),
            max_connections: 100,
            threshold_percent: 100,
            default_parallel: 4,
            min_parallel: 2,
        };
        let store = Arc::new(InMemoryStore::new());
        store.put_limits(limits).await.unwrap();
        let controller = Arc::new(AdmissionController::new(store.clone(), settings()));

        let mut handles = Vec::new();
        for i in 0..40 {
            let controller = controller.clone();
            handles.push(tokio::spawn(async move {
                controller
                    .check_admission(1, "dag", &format!("run-{i}"), "tbl", 8)
                    .await
                    .unwrap()
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let usage = store.current_usage(1).await.unwrap();
        assert!(usage <= 100, "usage {usage} exceeded threshold 100");
    }

    #[test]
    fn find_acceptable_parallel_halves_until_it_fits() {
        assert_eq!(find_acceptable_parallel(900, 950, 64, 2), Some(32));
        assert_eq!(find_acceptable_parallel(945, 950, 64, 2), Some(4));
    }

    #[test]
    fn find_acceptable_parallel_none_when_min_still_overflows() {
        assert_eq!(find_acceptable_parallel(949, 950, 64, 4), None);
    }

    #[test]
    fn wait_estimate_scales_with_queue_and_is_capped() {
        assert_eq!(estimate_wait_seconds(0, 30, 300), 30);
        assert_eq!(estimate_wait_seconds(25, 30, 300), 50);
        assert_eq!(estimate_wait_seconds(10_000, 30, 300), 80);
    }

    proptest! {
        /// Property 2: any degree `find_acceptable_parallel` returns is strictly
        /// below what was requested and never below `min_parallel`.
        #[test]
        fn downgrade_result_always_between_min_and_requested(
            current_usage in 0i64..1000,
            threshold in 0i64..1000,
            requested in 2i64..200,
            min_parallel in 1i64..10,
        ) {
            if let Some(adjusted) = find_acceptable_parallel(current_usage, threshold, requested, min_parallel) {
                prop_assert!(adjusted < requested);
                prop_assert!(adjusted >= min_parallel);
                prop_assert!(current_usage + adjusted <= threshold);
            }
        }

        /// Property 3 (idempotent release), checked property-wise over usage sizes.
        #[test]
        fn release_idempotent_for_any_parallel_degree(parallel in 2i64..64) {
            let runtime = tokio::runtime::Runtime::new().unwrap();
            runtime.block_on(async {
                let limits = ConnectionLimits {
                    src_db_id: 7,
                    name: "prop".into(),
                    db_type: "oracle".into(),
                    max_connections: 1000,
                    threshold_percent: 95,
                    default_parallel: 8,
                    min_parallel: 2,
                };
                let controller = controller_with_limits(limits).await;
                controller.check_admission(7, "dag", "run-p", "tbl", parallel).await.unwrap();
                let first = controller.release(7, "run-p").await.unwrap();
                let second = controller.release(7, "run-p").await.unwrap();
                prop_assert_eq!(first.released_connections, second.released_connections);
                Ok(())
            })?;
        }
    }
}
