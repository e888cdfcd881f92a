//! Error taxonomy shared by every handler.
//!
//! Handlers construct the matching variant and let the router map it onto
//! the result envelope. Validation always happens before any file lock is
//! taken, so an error here never implies partial state.

use serde::Serialize;

/// Machine-readable error code carried in the result envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorCode {
    #[serde(rename = "VALIDATION_ERROR")]
    ValidationError,
    #[serde(rename = "DEPENDENCY_ERROR")]
    DependencyError,
    #[serde(rename = "TIMEOUT")]
    Timeout,
    #[serde(rename = "CONFLICT")]
    Conflict,
    #[serde(rename = "POLICY_DENIED")]
    PolicyDenied,
    #[serde(rename = "RUNTIME_ERROR")]
    RuntimeError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ValidationError => "VALIDATION_ERROR",
            ErrorCode::DependencyError => "DEPENDENCY_ERROR",
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::Conflict => "CONFLICT",
            ErrorCode::PolicyDenied => "POLICY_DENIED",
            ErrorCode::RuntimeError => "RUNTIME_ERROR",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(thiserror::Error, Debug)]
pub enum CoordError {
    /// Tool argument failed the input schema or safe-charset check.
    /// `field` names the offending argument.
    #[error("invalid argument '{field}': {message}")]
    Validation { field: String, message: String },

    /// Missing binary, missing directory, or a referenced session/task/team
    /// that does not exist.
    #[error("{0}")]
    Dependency(String),

    /// An auxiliary subprocess or a wake stage exhausted its budget.
    #[error("timed out after {seconds}s: {context}")]
    Timeout { seconds: u64, context: String },

    /// File-claim overlap, rate limit, cyclic dependency, or an illegal
    /// state transition.
    #[error("{0}")]
    Conflict(String),

    /// A budget or permission policy rejected the operation.
    #[error("policy '{policy}' denied: {message}")]
    PolicyDenied { policy: String, message: String },

    /// Unexpected OS or file error.
    #[error("{0}")]
    Runtime(String),
}

impl CoordError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        CoordError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn dependency(message: impl Into<String>) -> Self {
        CoordError::Dependency(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        CoordError::Conflict(message.into())
    }

    pub fn policy(policy: impl Into<String>, message: impl Into<String>) -> Self {
        CoordError::PolicyDenied {
            policy: policy.into(),
            message: message.into(),
        }
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        CoordError::Runtime(message.into())
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            CoordError::Validation { .. } => ErrorCode::ValidationError,
            CoordError::Dependency(_) => ErrorCode::DependencyError,
            CoordError::Timeout { .. } => ErrorCode::Timeout,
            CoordError::Conflict(_) => ErrorCode::Conflict,
            CoordError::PolicyDenied { .. } => ErrorCode::PolicyDenied,
            CoordError::Runtime(_) => ErrorCode::RuntimeError,
        }
    }
}

impl From<std::io::Error> for CoordError {
    fn from(err: std::io::Error) -> Self {
        CoordError::Runtime(err.to_string())
    }
}

impl From<serde_json::Error> for CoordError {
    fn from(err: serde_json::Error) -> Self {
        CoordError::Runtime(format!("JSON error: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_names_the_field() {
        let err = CoordError::validation("session", "must match [A-Za-z0-9._-]");
        assert_eq!(
            err.to_string(),
            "invalid argument 'session': must match [A-Za-z0-9._-]"
        );
        assert_eq!(err.code(), ErrorCode::ValidationError);
    }

    #[test]
    fn test_conflict_code() {
        let err = CoordError::conflict("file /repo/a.ts claimed by worker W1");
        assert_eq!(err.code(), ErrorCode::Conflict);
        assert_eq!(err.code().as_str(), "CONFLICT");
    }

    #[test]
    fn test_policy_denied_names_the_policy() {
        let err = CoordError::policy("global_budget", "would exceed 200000 tokens");
        assert_eq!(
            err.to_string(),
            "policy 'global_budget' denied: would exceed 200000 tokens"
        );
        assert_eq!(err.code(), ErrorCode::PolicyDenied);
    }

    #[test]
    fn test_timeout_display() {
        let err = CoordError::Timeout {
            seconds: 60,
            context: "cost helper".to_string(),
        };
        assert_eq!(err.to_string(), "timed out after 60s: cost helper");
        assert_eq!(err.code(), ErrorCode::Timeout);
    }

    #[test]
    fn test_io_error_maps_to_runtime() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: CoordError = io.into();
        assert_eq!(err.code(), ErrorCode::RuntimeError);
    }

    #[test]
    fn test_code_serializes_screaming_snake() {
        let json = serde_json::to_string(&ErrorCode::DependencyError).unwrap();
        assert_eq!(json, "\"DEPENDENCY_ERROR\"");
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<CoordError>();
    }
}
