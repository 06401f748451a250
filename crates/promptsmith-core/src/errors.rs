//! Typed error hierarchy for the optimization pipeline.
//!
//! - `ConfigError`: rejected before a run row exists
//! - `ServiceError`: failures of the external language-model service
//! - `OptimizeError`: everything a stage or the orchestrator can surface

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("config error: {0}")]
pub struct ConfigError(pub String);

/// Which external operation failed. Carried by every `ServiceError`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceOp {
    GeneratePrompts,
    GenerateTests,
    InvokeModel,
    EvaluateResponse,
    RewritePrompt,
}

impl ServiceOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceOp::GeneratePrompts => "generate_prompt_variants",
            ServiceOp::GenerateTests => "generate_test_cases",
            ServiceOp::InvokeModel => "invoke_model_under_test",
            ServiceOp::EvaluateResponse => "evaluate_response",
            ServiceOp::RewritePrompt => "rewrite_prompt",
        }
    }
}

impl std::fmt::Display for ServiceOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ServiceError {
    #[error("{op} timed out after {seconds}s")]
    Timeout { op: ServiceOp, seconds: u64 },

    #[error("{op} cancelled")]
    Cancelled { op: ServiceOp },

    #[error("{op} returned malformed output: {detail}")]
    Malformed { op: ServiceOp, detail: String },

    #[error("{op} backend error: {message}")]
    Backend { op: ServiceOp, message: String },
}

impl ServiceError {
    pub fn op(&self) -> ServiceOp {
        match self {
            ServiceError::Timeout { op, .. }
            | ServiceError::Cancelled { op }
            | ServiceError::Malformed { op, .. }
            | ServiceError::Backend { op, .. } => *op,
        }
    }

    /// Cancellation is deliberate; everything else may be transient.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ServiceError::Cancelled { .. })
    }

    pub fn malformed(op: ServiceOp, detail: impl Into<String>) -> Self {
        ServiceError::Malformed {
            op,
            detail: detail.into(),
        }
    }

    pub fn backend(op: ServiceOp, message: impl Into<String>) -> Self {
        ServiceError::Backend {
            op,
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum OptimizeError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("external service error: {0}")]
    Service(#[from] ServiceError),

    /// Missing or inconsistent data: empty selections, foreign-key violations,
    /// broken lineage. Distinct from `Service` so callers can tell "no data
    /// produced" from "service unavailable".
    #[error("data integrity error: {0}")]
    Integrity(String),

    #[error("storage error: {0}")]
    Storage(#[source] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("run {0} not found")]
    RunNotFound(i64),

    #[error("store lock poisoned")]
    LockPoisoned,

    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("concurrency limiter closed")]
    SemaphoreClosed(#[from] tokio::sync::AcquireError),

    #[error("report sink failed: {0}")]
    Report(#[source] anyhow::Error),
}

impl OptimizeError {
    pub fn integrity(msg: impl Into<String>) -> Self {
        OptimizeError::Integrity(msg.into())
    }

    pub fn is_integrity(&self) -> bool {
        matches!(self, OptimizeError::Integrity(_))
    }

    pub fn is_config(&self) -> bool {
        matches!(self, OptimizeError::Config(_))
    }
}

impl From<rusqlite::Error> for OptimizeError {
    fn from(e: rusqlite::Error) -> Self {
        match &e {
            rusqlite::Error::SqliteFailure(err, msg)
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                OptimizeError::Integrity(format!(
                    "constraint violation: {}",
                    msg.clone().unwrap_or_else(|| err.to_string())
                ))
            }
            _ => OptimizeError::Storage(e),
        }
    }
}

pub type Result<T, E = OptimizeError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancelled_is_not_retryable() {
        let e = ServiceError::Cancelled {
            op: ServiceOp::InvokeModel,
        };
        assert!(!e.is_retryable());
        assert!(ServiceError::backend(ServiceOp::InvokeModel, "503").is_retryable());
    }

    #[test]
    fn service_error_message_names_operation() {
        let e = ServiceError::Timeout {
            op: ServiceOp::EvaluateResponse,
            seconds: 30,
        };
        assert_eq!(e.to_string(), "evaluate_response timed out after 30s");
    }

    #[test]
    fn constraint_violation_maps_to_integrity() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (id INTEGER PRIMARY KEY, v TEXT NOT NULL);")
            .unwrap();
        let err = conn
            .execute("INSERT INTO t (v) VALUES (NULL)", [])
            .unwrap_err();
        let mapped = OptimizeError::from(err);
        assert!(mapped.is_integrity(), "got {mapped:?}");
    }
}
