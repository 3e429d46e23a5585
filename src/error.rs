//! Error types for the tenant operator

use std::fmt;

/// Result type alias for operator operations
pub type Result<T> = std::result::Result<T, OperatorError>;

/// Errors that can occur during operator operations
#[derive(Debug)]
pub enum OperatorError {
    /// Kubernetes API error
    KubeApi(String),
    /// Configuration error
    Configuration(String),
    /// Namespace, workload, tenant or schedule not found
    NotFound(String),
    /// Rejected input (malformed cron expression, bad timezone, missing identifier)
    Validation(String),
    /// A scheduled fire could not be carried out
    SchedulerExecution(String),
    /// Persistence layer error
    Storage(String),
    /// Serialization error
    Serialization(String),
    /// Invalid resource state
    InvalidState(String),
}

impl OperatorError {
    /// Whether this error means the addressed object does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, OperatorError::NotFound(_))
    }
}

impl fmt::Display for OperatorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperatorError::KubeApi(msg) => write!(f, "Kubernetes API error: {}", msg),
            OperatorError::Configuration(msg) => write!(f, "Configuration error: {}", msg),
            OperatorError::NotFound(msg) => write!(f, "Resource not found: {}", msg),
            OperatorError::Validation(msg) => write!(f, "Validation error: {}", msg),
            OperatorError::SchedulerExecution(msg) => write!(f, "Scheduler execution error: {}", msg),
            OperatorError::Storage(msg) => write!(f, "Storage error: {}", msg),
            OperatorError::Serialization(msg) => write!(f, "Serialization error: {}", msg),
            OperatorError::InvalidState(msg) => write!(f, "Invalid state: {}", msg),
        }
    }
}

impl std::error::Error for OperatorError {}

impl From<kube::Error> for OperatorError {
    fn from(err: kube::Error) -> Self {
        match err {
            kube::Error::Api(ae) if ae.code == 404 => OperatorError::NotFound(ae.message),
            other => OperatorError::KubeApi(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for OperatorError {
    fn from(err: serde_json::Error) -> Self {
        OperatorError::Serialization(err.to_string())
    }
}
