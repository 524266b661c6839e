//! Registry data model: connection limits and batch registrations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Source-database connection ceiling, keyed by `src_db_id`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConnectionLimits {
    pub src_db_id: i64,
    pub name: String,
    pub db_type: String,
    pub max_connections: i64,
    pub threshold_percent: i64,
    pub default_parallel: i64,
    pub min_parallel: i64,
}

impl ConnectionLimits {
    /// Effective ceiling: `floor(max_connections * threshold_percent / 100)`.
    pub fn threshold(&self) -> i64 {
        self.max_connections * self.threshold_percent / 100
    }

    /// Defensive fallback used when a `src_db_id` has no configured limits.
    ///
    /// Conservative on purpose: 100 connections, 90% threshold, min parallel 1.
    pub fn defensive_default(src_db_id: i64) -> Self {
        Self {
            src_db_id,
            name: format!("Unknown_{src_db_id}"),
            db_type: "unknown".to_string(),
            max_connections: 100,
            threshold_percent: 90,
            default_parallel: 4,
            min_parallel: 1,
        }
    }
}

/// Lifecycle state of a batch's connection hold.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BatchStatus {
    Running,
    Waiting,
    Completed,
    Failed,
}

/// One acquired (or attempted) connection hold, keyed by `(src_db_id, dag_run_id)`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BatchRegistration {
    pub src_db_id: i64,
    pub dag_run_id: String,
    pub dag_id: String,
    pub table_name: String,
    pub parallel_hint: i64,
    pub status: BatchStatus,
    pub original_parallel: Option<i64>,
    pub started_at: DateTime<Utc>,
    pub ttl: i64,
}

/// 24-hour safety-net TTL applied when a registration is created.
pub const DEFAULT_TTL_SECONDS: i64 = 86_400;

impl BatchRegistration {
    pub fn new(
        src_db_id: i64,
        dag_run_id: String,
        dag_id: String,
        table_name: String,
        parallel_hint: i64,
        original_parallel: Option<i64>,
    ) -> Self {
        let started_at = Utc::now();
        Self {
            src_db_id,
            dag_run_id,
            dag_id,
            table_name,
            parallel_hint,
            status: BatchStatus::Running,
            original_parallel,
            started_at,
            ttl: started_at.timestamp() + DEFAULT_TTL_SECONDS,
        }
    }

    pub fn is_downgraded(&self) -> bool {
        self.original_parallel.is_some()
    }

    /// Whether this registration's TTL has lapsed as of `now` and should be
    /// treated as released regardless of recorded status.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.ttl < now.timestamp()
    }
}
