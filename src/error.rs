//! Error types for chat-graph
//!
//! Every failure surfaced by the store, the session layer and the services is a
//! [`GraphError`]. Each variant belongs to exactly one [`ErrorKind`], which is
//! what the transport layer matches on when it picks a status code.

use rusqlite::ErrorCode;
use serde::Serialize;
use thiserror::Error;

/// Closed set of failure categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    AlreadyExists,
    InvalidArgument,
    PermissionDenied,
    Internal,
    Unauthenticated,
    Canceled,
    DeadlineExceeded,
    Unknown,
}

impl ErrorKind {
    /// HTTP status the transport layer answers with for this category
    pub fn http_status(&self) -> u16 {
        match self {
            ErrorKind::NotFound => 404,
            ErrorKind::AlreadyExists => 409,
            ErrorKind::InvalidArgument => 400,
            ErrorKind::PermissionDenied => 403,
            ErrorKind::Unauthenticated => 401,
            _ => 500,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::AlreadyExists => "already_exists",
            ErrorKind::InvalidArgument => "invalid_argument",
            ErrorKind::PermissionDenied => "permission_denied",
            ErrorKind::Internal => "internal",
            ErrorKind::Unauthenticated => "unauthenticated",
            ErrorKind::Canceled => "canceled",
            ErrorKind::DeadlineExceeded => "deadline_exceeded",
            ErrorKind::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum GraphError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("Operation canceled")]
    Canceled,

    #[error("Deadline exceeded")]
    DeadlineExceeded,

    /// A driver error, already classified at the store boundary
    #[error("{context}: {source}")]
    Database {
        kind: ErrorKind,
        context: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Unknown error: {0}")]
    Unknown(String),
}

pub type Result<T, E = GraphError> = std::result::Result<T, E>;

impl GraphError {
    /// Wrap a rusqlite error, translating it into a semantic category
    pub fn database(context: impl Into<String>, source: rusqlite::Error) -> Self {
        GraphError::Database {
            kind: classify_sqlite(&source),
            context: context.into(),
            source,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            GraphError::NotFound(_) => ErrorKind::NotFound,
            GraphError::AlreadyExists(_) => ErrorKind::AlreadyExists,
            GraphError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            GraphError::PermissionDenied(_) => ErrorKind::PermissionDenied,
            GraphError::Unauthenticated(_) => ErrorKind::Unauthenticated,
            GraphError::Canceled => ErrorKind::Canceled,
            GraphError::DeadlineExceeded => ErrorKind::DeadlineExceeded,
            GraphError::Database { kind, .. } => *kind,
            GraphError::Internal(_) => ErrorKind::Internal,
            GraphError::Unknown(_) => ErrorKind::Unknown,
        }
    }

    pub fn http_status(&self) -> u16 {
        self.kind().http_status()
    }

    /// Body for the transport layer. Driver details stay out of the message.
    pub fn to_response(&self) -> ErrorResponse {
        let message = match self {
            GraphError::Database { context, .. } => context.clone(),
            other => other.to_string(),
        };
        ErrorResponse {
            code: self.kind(),
            status: self.http_status(),
            message,
        }
    }
}

/// Serializable error body handed to HTTP/WebSocket handlers
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub code: ErrorKind,
    pub status: u16,
    pub message: String,
}

fn classify_sqlite(err: &rusqlite::Error) -> ErrorKind {
    match err {
        rusqlite::Error::QueryReturnedNoRows => ErrorKind::NotFound,
        rusqlite::Error::SqliteFailure(e, _) => match e.code {
            ErrorCode::ConstraintViolation => match e.extended_code {
                rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY => ErrorKind::NotFound,
                rusqlite::ffi::SQLITE_CONSTRAINT_CHECK | rusqlite::ffi::SQLITE_CONSTRAINT_NOTNULL => {
                    ErrorKind::InvalidArgument
                }
                _ => ErrorKind::AlreadyExists,
            },
            ErrorCode::OperationInterrupted => ErrorKind::Canceled,
            _ => ErrorKind::Internal,
        },
        _ => ErrorKind::Internal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failure(code: i32) -> rusqlite::Error {
        rusqlite::Error::SqliteFailure(rusqlite::ffi::Error::new(code), None)
    }

    #[test]
    fn test_http_status_mapping() {
        assert_eq!(GraphError::NotFound("x".into()).http_status(), 404);
        assert_eq!(GraphError::AlreadyExists("x".into()).http_status(), 409);
        assert_eq!(GraphError::InvalidArgument("x".into()).http_status(), 400);
        assert_eq!(GraphError::PermissionDenied("x".into()).http_status(), 403);
        assert_eq!(GraphError::Unauthenticated("x".into()).http_status(), 401);
        assert_eq!(GraphError::Canceled.http_status(), 500);
        assert_eq!(GraphError::DeadlineExceeded.http_status(), 500);
        assert_eq!(GraphError::Internal("x".into()).http_status(), 500);
    }

    #[test]
    fn test_sqlite_classification() {
        let no_rows = GraphError::database("get", rusqlite::Error::QueryReturnedNoRows);
        assert_eq!(no_rows.kind(), ErrorKind::NotFound);

        let unique = GraphError::database("insert", failure(rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE));
        assert_eq!(unique.kind(), ErrorKind::AlreadyExists);

        let pk = GraphError::database("insert", failure(rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY));
        assert_eq!(pk.kind(), ErrorKind::AlreadyExists);

        let fk = GraphError::database("insert", failure(rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY));
        assert_eq!(fk.kind(), ErrorKind::NotFound);

        let check = GraphError::database("insert", failure(rusqlite::ffi::SQLITE_CONSTRAINT_CHECK));
        assert_eq!(check.kind(), ErrorKind::InvalidArgument);

        let interrupted = GraphError::database("select", failure(rusqlite::ffi::SQLITE_INTERRUPT));
        assert_eq!(interrupted.kind(), ErrorKind::Canceled);

        let busy = GraphError::database("begin", failure(rusqlite::ffi::SQLITE_BUSY));
        assert_eq!(busy.kind(), ErrorKind::Internal);
    }

    #[test]
    fn test_response_hides_driver_message() {
        let err = GraphError::database(
            "insert friendship alice -> bob",
            failure(rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY),
        );
        let body = err.to_response();
        assert_eq!(body.code, ErrorKind::AlreadyExists);
        assert_eq!(body.status, 409);
        assert_eq!(body.message, "insert friendship alice -> bob");
    }
}
