use thiserror::Error;

/// Errors surfaced by the control plane.
#[derive(Debug, Error)]
pub enum OpsGuardError {
    #[error("validation failed: {field} -- {detail}")]
    Validation { field: String, detail: String },

    #[error("storage operation timed out after {elapsed_ms}ms")]
    StorageTimeout { elapsed_ms: u64 },

    #[error("conditional write conflict on ({src_db_id}, {dag_run_id}), retries exhausted")]
    WriteConflict { src_db_id: i64, dag_run_id: String },

    #[error("time-series backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("pushgateway unreachable: {0}")]
    InjectionFailure(String),

    #[error("registration not found: ({src_db_id}, {dag_run_id})")]
    RegistrationNotFound { src_db_id: i64, dag_run_id: String },

    #[error("invalid configuration value for {name}: {value} -- {detail}")]
    InvalidConfig {
        name: String,
        value: String,
        detail: String,
    },

    #[error("http error: {0}")]
    Http(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<reqwest::Error> for OpsGuardError {
    fn from(e: reqwest::Error) -> Self {
        OpsGuardError::Http(e.to_string())
    }
}

impl From<serde_json::Error> for OpsGuardError {
    fn from(e: serde_json::Error) -> Self {
        OpsGuardError::Serialization(e.to_string())
    }
}

/// Convenience alias for results across the crate.
pub type OpsGuardResult<T> = Result<T, OpsGuardError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_embeds_offending_values() {
        let e = OpsGuardError::Validation {
            field: "requested_parallel".into(),
            detail: "below min_parallel".into(),
        };
        assert!(e.to_string().contains("requested_parallel"));

        let e = OpsGuardError::WriteConflict {
            src_db_id: 4,
            dag_run_id: "run-1".into(),
        };
        assert!(e.to_string().contains("run-1"));
    }

    #[test]
    fn invalid_config_display() {
        let e = OpsGuardError::InvalidConfig {
            name: "DEFAULT_WAIT_SECONDS".into(),
            value: "abc".into(),
            detail: "not an integer".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("DEFAULT_WAIT_SECONDS"));
        assert!(msg.contains("abc"));
    }

    #[test]
    fn result_alias_works() {
        let ok: OpsGuardResult<u32> = Ok(42);
        assert_eq!(ok.unwrap(), 42);

        let err: OpsGuardResult<u32> = Err(OpsGuardError::RegistrationNotFound {
            src_db_id: 1,
            dag_run_id: "x".into(),
        });
        assert!(err.is_err());
    }
}
