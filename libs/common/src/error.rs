//! Error types shared across the workspace
//!
//! [`DomainError`] is the error every port returns. Infrastructure failures
//! (database, cache, upstream HTTP) are translated into one of its kinds at the
//! adapter boundary. [`DatabaseError`] covers pool bootstrap.

use serde::Serialize;
use sqlx::Error as SqlxError;
use std::fmt::{self, Debug};
use thiserror::Error;

use crate::log::LogBody;

/// Custom error type for database bootstrap
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// Error occurred during database connection
    #[error("Database connection error: {0}")]
    Connection(#[source] SqlxError),

    /// Error occurred during database query execution
    #[error("Database query error: {0}")]
    Query(#[source] SqlxError),

    /// Error occurred during database migration
    #[error("Database migration error: {0}")]
    Migration(String),

    /// Configuration error
    #[error("Database configuration error: {0}")]
    Configuration(String),
}

/// Type alias for Result with DatabaseError
pub type DatabaseResult<T> = Result<T, DatabaseError>;

/// Closed taxonomy used to pick the HTTP status and logging behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    #[serde(rename = "InternalErr")]
    Internal,
    #[serde(rename = "BadRequestErr")]
    BadRequest,
    #[serde(rename = "NotFoundErr")]
    NotFound,
    #[serde(rename = "UnauthorizedErr")]
    Unauthorized,
}

impl ErrorKind {
    /// Code written in error responses
    pub fn code(self) -> &'static str {
        match self {
            ErrorKind::Internal => "InternalErr",
            ErrorKind::BadRequest => "BadRequestErr",
            ErrorKind::NotFound => "NotFoundErr",
            ErrorKind::Unauthorized => "UnauthorizedErr",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Error returned by services, repositories and caches
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{kind}: {title}{}", describe(.data))]
pub struct DomainError {
    kind: ErrorKind,
    title: String,
    data: LogBody,
}

fn describe(data: &LogBody) -> String {
    if data.is_empty() {
        String::new()
    } else {
        format!(" {data:?}")
    }
}

impl DomainError {
    pub fn new(kind: ErrorKind, title: impl Into<String>, data: LogBody) -> Self {
        Self {
            kind,
            title: title.into(),
            data,
        }
    }

    pub fn internal(title: impl Into<String>, data: LogBody) -> Self {
        Self::new(ErrorKind::Internal, title, data)
    }

    pub fn bad_request(title: impl Into<String>, data: LogBody) -> Self {
        Self::new(ErrorKind::BadRequest, title, data)
    }

    pub fn not_found(title: impl Into<String>, data: LogBody) -> Self {
        Self::new(ErrorKind::NotFound, title, data)
    }

    pub fn unauthorized(title: impl Into<String>, data: LogBody) -> Self {
        Self::new(ErrorKind::Unauthorized, title, data)
    }

    /// Classify an arbitrary error; anything that is not a `DomainError` is internal
    pub fn from_any(err: anyhow::Error) -> Self {
        match err.downcast::<DomainError>() {
            Ok(domain) => domain,
            Err(other) => Self::internal(
                "internal server error",
                LogBody::new().with("error", format!("{other:#}")),
            ),
        }
    }

    /// Attach an extra data field
    pub fn with<T>(mut self, key: &str, value: T) -> Self
    where
        T: Serialize + Debug,
    {
        self.data.insert(key, value);
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn data(&self) -> &LogBody {
        &self.data
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == ErrorKind::NotFound
    }
}
