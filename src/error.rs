//! Error types for profile store operations

use std::path::PathBuf;
use thiserror::Error;

/// Result type for profile store operations
pub type ProfileResult<T> = Result<T, ProfileError>;

/// Failures returned by [`crate::ProfileService`] mutations.
///
/// Connection probes never produce these; they report through
/// [`crate::TestResult`] instead.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProfileError {
    #[error("Invalid base URL. Use an absolute http:// or https:// URL.")]
    InvalidBaseUrl,

    #[error(
        "Invalid API key. Keys need at least 12 characters from letters, digits, '-', '_', '+' and '.'."
    )]
    InvalidApiKey,

    #[error("A profile named '{name}' already exists.")]
    DuplicateName { name: String },

    #[error("Profile '{id}' was not found.")]
    NotFound { id: String },

    #[error("Profile '{id}' is active and cannot be deleted. Switch profile first.")]
    CannotDeleteActive { id: String },

    /// The store could not be written; the change may not be durable.
    #[error("Could not save profiles to {path}: {message}")]
    Persistence { path: PathBuf, message: String },

    /// The store lock could not be taken.
    #[error("{0}")]
    Lock(String),
}

impl ProfileError {
    /// Stable code for transports that serialize failures.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidBaseUrl => "INVALID_BASE_URL",
            Self::InvalidApiKey => "INVALID_API_KEY",
            Self::DuplicateName { .. } => "DUPLICATE_NAME",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::CannotDeleteActive { .. } => "CANNOT_DELETE_ACTIVE",
            Self::Persistence { .. } => "PERSISTENCE",
            Self::Lock(_) => "LOCKED",
        }
    }

    /// Whether the caller can fix the failure by changing its input.
    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::InvalidBaseUrl | Self::InvalidApiKey | Self::DuplicateName { .. }
        )
    }
}
