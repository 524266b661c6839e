//! Admission control (C3): decide allow/downgrade/wait for a connection request.

pub mod controller;
pub mod types;

pub use controller::AdmissionController;
pub use types::{AdmissionReason, AdmissionResult, ReleaseResult, SourceStatus};
