//! Domain error types for the build request syncer.
//!
//! Uses thiserror for ergonomic error handling with automatic Display implementations.

use crate::models::Id;
use crate::services::buildbot::config::SyncConfigError;

/// Errors raised by HTTP calls to buildbot or the dashboard.
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    /// Connection, TLS or timeout failure
    #[error("Request to {url} failed: {message}")]
    Transport { url: String, message: String },

    /// Non-success HTTP status
    #[error("Request to {url} returned HTTP {status}")]
    HttpStatus { url: String, status: u16 },

    /// Body was not the JSON we expected
    #[error("Invalid JSON from {url}: {message}")]
    InvalidJson { url: String, message: String },

    /// Dashboard API answered with a non-OK `status` field
    #[error("Dashboard API {path} responded with status '{status}'")]
    Status { path: String, status: String },
}

/// Errors that abort a sync cycle.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    Config(#[from] SyncConfigError),

    /// A dashboard payload could not be interpreted
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// A property template references a repository the commit set does not have
    #[error("Build request {request} has no commit for repository '{repository}'")]
    MissingRepository { request: Id, repository: String },

    /// A build record was handed to the syncer of another builder
    #[error("Build record for builder '{actual}' cannot be parsed by the syncer for '{expected}'")]
    BuilderMismatch { expected: String, actual: String },

    /// Two syncers claimed the same role for one test group within a cycle
    #[error("Test group {group} is served by both '{first}' and '{second}' for {role} requests")]
    SyncerConflict {
        group: Id,
        role: &'static str,
        first: String,
        second: String,
    },

    /// Two workers claimed the same role for one test group within a cycle
    #[error("Test group {group} ran {role} requests on both worker '{first}' and '{second}'")]
    WorkerConflict {
        group: Id,
        role: &'static str,
        first: String,
        second: String,
    },

    /// Configured builder does not exist on the buildbot server
    #[error("Builder '{0}' is not known to the buildbot server")]
    UnknownBuilder(String),

    /// A model object referenced by a build request was not loaded
    #[error("{0} not found")]
    NotFound(String),
}

/// Convenience type alias for Results with SyncError.
pub type SyncResult<T> = Result<T, SyncError>;

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::InvalidPayload(format!("JSON parsing error: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_error_display() {
        let err = RemoteError::HttpStatus {
            url: "http://build.webkit.org/builders/b/force".to_string(),
            status: 503,
        };
        assert_eq!(
            err.to_string(),
            "Request to http://build.webkit.org/builders/b/force returned HTTP 503"
        );
    }

    #[test]
    fn test_sync_error_wraps_remote_error() {
        let err: SyncError = RemoteError::Status {
            path: "/api/build-requests/t".to_string(),
            status: "WorkerNotFound".to_string(),
        }
        .into();
        assert!(matches!(err, SyncError::Remote(_)));
        assert!(err.to_string().contains("WorkerNotFound"));
    }

    #[test]
    fn test_json_error_becomes_invalid_payload() {
        let parse_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: SyncError = parse_err.into();
        assert!(matches!(err, SyncError::InvalidPayload(_)));
    }
}
