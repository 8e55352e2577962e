//! Error types for campus operations
//!
//! All failures are returned to the caller as values. The sync layer rolls
//! back optimistic state before any of these reach a view.

use crate::{EntityId, Table};
use thiserror::Error;

/// Caller input failed local constraints. Never reaches the remote.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    RequiredFieldMissing { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Page number must be >= 1, got {page}")]
    InvalidPage { page: u32 },

    #[error("Page limit must be >= 1, got {limit}")]
    InvalidLimit { limit: u32 },
}

impl ValidationError {
    pub fn missing(field: impl Into<String>) -> Self {
        Self::RequiredFieldMissing {
            field: field.into(),
        }
    }

    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// The remote rejected a request or could not be reached.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    #[error("Remote rejected request with status {status}: {message}")]
    Rejected { status: u16, message: String },

    #[error("Remote unreachable: {message}")]
    Unreachable { message: String },

    #[error("Invalid remote payload: {message}")]
    Decode { message: String },

    #[error("Record not found in {table}: {id}")]
    NotFound { table: Table, id: EntityId },
}

impl RemoteError {
    pub fn rejected(status: u16, message: impl Into<String>) -> Self {
        Self::Rejected {
            status,
            message: message.into(),
        }
    }

    pub fn unreachable(message: impl Into<String>) -> Self {
        Self::Unreachable {
            message: message.into(),
        }
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    /// Human readable message carried by the error.
    pub fn message(&self) -> String {
        match self {
            Self::Rejected { message, .. }
            | Self::Unreachable { message }
            | Self::Decode { message } => message.clone(),
            Self::NotFound { .. } => self.to_string(),
        }
    }
}

impl From<serde_json::Error> for RemoteError {
    fn from(err: serde_json::Error) -> Self {
        Self::decode(err.to_string())
    }
}

/// A page load failed. The cache keeps its last good state.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("Fetch failed: {0}")]
    Remote(#[from] RemoteError),

    #[error("Invalid page request: {0}")]
    Invalid(#[from] ValidationError),

    #[error("Fetch for page {page} was superseded by a newer page change")]
    Superseded { page: u32 },
}

/// A local mutation failed. Optimistic state has already been rolled back.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SyncError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    #[error("Collection is not ready for mutations")]
    NotReady,

    #[error("Record {id} is not in the current window")]
    NotFound { id: EntityId },

    #[error("Record {id} is still awaiting insert confirmation")]
    Unconfirmed { id: EntityId },

    #[error("No pending mutation for token #{token}")]
    UnknownMutation { token: u64 },

    #[error("No user is signed in")]
    NotSignedIn,
}

/// Master error type for all campus errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CampusError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Sync(#[from] SyncError),
}

/// Result type alias for campus operations.
pub type CampusResult<T> = Result<T, CampusError>;

// =============================================================================
// TESTS
// =============================================================================
