//! Typed error hierarchy for the mesh core.
//!
//! Mirrors the error taxonomy in kind, not just message: engines return a
//! `CoreError` whose `kind()` the orchestrator maps to a user-facing string.
//! Store-level failures are a narrower `StoreError` that engines translate
//! into the matching `CoreError` variant at the boundary.

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    PermissionDenied,
    ScopeDenied,
    DmNotAllowed,
    AlreadyExists,
    InvalidInput,
    Conflict,
    Busy,
    DegradedSearch,
    Internal,
}

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("scope denied: {0}")]
    ScopeDenied(String),

    #[error("dm not allowed: {reason}")]
    DmNotAllowed { reason: DmDenialReason },

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("conflict after retries: {0}")]
    Conflict(String),

    #[error("store busy: {0}")]
    Busy(String),

    #[error("degraded search: {0}")]
    DegradedSearch(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Why a DM was denied; surfaced alongside `DM_NOT_ALLOWED`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmDenialReason {
    Blocked,
    Closed,
    RequiresPermission,
    SelfDm,
}

impl std::fmt::Display for DmDenialReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DmDenialReason::Blocked => "blocked",
            DmDenialReason::Closed => "closed",
            DmDenialReason::RequiresPermission => "requires_permission",
            DmDenialReason::SelfDm => "self",
        };
        write!(f, "{s}")
    }
}

impl CoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::NotFound(_) => ErrorKind::NotFound,
            CoreError::PermissionDenied(_) => ErrorKind::PermissionDenied,
            CoreError::ScopeDenied(_) => ErrorKind::ScopeDenied,
            CoreError::DmNotAllowed { .. } => ErrorKind::DmNotAllowed,
            CoreError::AlreadyExists(_) => ErrorKind::AlreadyExists,
            CoreError::InvalidInput(_) => ErrorKind::InvalidInput,
            CoreError::Conflict(_) => ErrorKind::Conflict,
            CoreError::Busy(_) => ErrorKind::Busy,
            CoreError::DegradedSearch(_) => ErrorKind::DegradedSearch,
            CoreError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Single-line human-readable reason, suitable for a chat surface.
    pub fn user_message(&self) -> String {
        match self {
            CoreError::Internal(_) => "an internal error occurred".to_string(),
            other => other.to_string(),
        }
    }
}

pub type CoreResult<T> = std::result::Result<T, CoreError>;

/// Failures local to the Store, translated by engines into `CoreError`.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found")]
    NotFound,

    #[error("constraint violation: {0}")]
    Constraint(String),

    #[error("writer conflict")]
    Conflict,

    #[error("store busy")]
    Busy,

    #[error("store corrupt: {0}")]
    Corrupt(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        match &e {
            rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
            rusqlite::Error::SqliteFailure(err, _)
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                StoreError::Constraint(e.to_string())
            }
            rusqlite::Error::SqliteFailure(err, _)
                if err.code == rusqlite::ErrorCode::DatabaseBusy =>
            {
                StoreError::Busy
            }
            _ => StoreError::Other(anyhow::Error::new(e)),
        }
    }
}

impl From<StoreError> for CoreError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound => CoreError::NotFound("not found".to_string()),
            StoreError::Constraint(msg) => CoreError::AlreadyExists(msg),
            StoreError::Conflict => CoreError::Conflict("writer collision".to_string()),
            StoreError::Busy => CoreError::Busy("store lock timeout".to_string()),
            StoreError::Corrupt(msg) => CoreError::Internal(anyhow::anyhow!("corrupt store: {msg}")),
            StoreError::Other(e) => CoreError::Internal(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_kind_and_message() {
        let err = CoreError::NotFound("channel global:dev".to_string());
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(err.user_message(), "not found: channel global:dev");
    }

    #[test]
    fn dm_not_allowed_carries_reason() {
        let err = CoreError::DmNotAllowed {
            reason: DmDenialReason::Blocked,
        };
        assert_eq!(err.kind(), ErrorKind::DmNotAllowed);
        assert!(err.user_message().contains("blocked"));
    }

    #[test]
    fn internal_message_is_redacted() {
        let err = CoreError::Internal(anyhow::anyhow!("raw db path leaked"));
        assert_eq!(err.user_message(), "an internal error occurred");
    }

    #[test]
    fn store_error_not_found_maps_to_core_not_found() {
        let err: CoreError = StoreError::NotFound.into();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn store_error_busy_maps_to_core_busy() {
        let err: CoreError = StoreError::Busy.into();
        assert_eq!(err.kind(), ErrorKind::Busy);
    }
}
