//! Access error model.
//!
//! One taxonomy is shared by the grant store, the hierarchy resolver and the
//! permission resolver; the HTTP layer maps each kind to exactly one status.

use thiserror::Error;

/// Result type used across the access layer.
pub type AccessResult<T> = Result<T, AccessError>;

/// Access-layer error.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AccessError {
    /// No caller identity, an invalid one, or one that no longer resolves.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Valid identity lacking the role required for the operation.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// A referenced user/role/module/form/unit/grant does not exist.
    #[error("{0} not found")]
    NotFound(String),

    /// Malformed input (bad grant key, missing field, both or neither target).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The caller exists but is not in a state the operation requires.
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    /// Corrupted data: cycles in a tree, orphaned references.
    #[error("integrity error: {0}")]
    Integrity(String),

    /// The backing store failed (connection, timeout, driver error).
    #[error("storage error: {0}")]
    Storage(String),
}

/// Discriminant of [`AccessError`], for callers that branch on the kind only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Unauthorized,
    Forbidden,
    NotFound,
    InvalidArgument,
    PreconditionFailed,
    Integrity,
    Storage,
}

impl AccessError {
    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn precondition(msg: impl Into<String>) -> Self {
        Self::PreconditionFailed(msg.into())
    }

    pub fn integrity(msg: impl Into<String>) -> Self {
        Self::Integrity(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Unauthorized(_) => ErrorKind::Unauthorized,
            Self::Forbidden(_) => ErrorKind::Forbidden,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Self::PreconditionFailed(_) => ErrorKind::PreconditionFailed,
            Self::Integrity(_) => ErrorKind::Integrity,
            Self::Storage(_) => ErrorKind::Storage,
        }
    }

    /// Server-side faults whose detail must not reach the caller.
    pub fn is_internal(&self) -> bool {
        matches!(self.kind(), ErrorKind::Integrity | ErrorKind::Storage)
    }
}
