//! Ephemeral request/response shapes for the admission controller.

use serde::{Deserialize, Serialize};

/// Why an admission decision came out the way it did.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdmissionReason {
    Ok,
    PartialCapacityAvailable,
    ConnectionLimitExceeded,
}

impl AdmissionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdmissionReason::Ok => "ok",
            AdmissionReason::PartialCapacityAvailable => "partial_capacity_available",
            AdmissionReason::ConnectionLimitExceeded => "connection_limit_exceeded",
        }
    }
}

/// Result of a [`crate::admission::AdmissionController::check_admission`] call.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AdmissionResult {
    pub allowed: bool,
    pub parallel: i64,
    pub downgraded: bool,
    pub original_parallel: Option<i64>,
    pub wait_seconds: u64,
    pub queue_position: u32,
    pub reason: AdmissionReason,
    pub current_usage: i64,
    pub available: i64,
}

/// Result of a [`crate::admission::AdmissionController::release`] call.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReleaseResult {
    pub released: bool,
    pub released_connections: i64,
    pub current_usage: i64,
    pub error: Option<String>,
}

/// Per-source snapshot returned by [`crate::admission::AdmissionController::status`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SourceStatus {
    pub max_connections: i64,
    pub threshold: i64,
    pub current_usage: i64,
    pub available: i64,
    pub active: usize,
    pub waiting: u32,
}
