//! Unified error types for the pointage core library.
//!
//! [`PointageError`] covers every failure a screen can surface to the
//! operator. Each module also keeps its own error type ([`ConfigError`],
//! [`StorageError`], [`CameraError`], [`ClientError`], [`ScanError`]) and
//! converts into the unified type with `From`.
//!
//! # Handling policy
//!
//! Every error is handled at the screen that triggered it. The outcome is one
//! of three things:
//!
//! - a redirect (no session, logout)
//! - an inline retry prompt (camera unavailable, submission failed)
//! - a timed banner or status line (invalid decode)
//!
//! # Example
//!
//! ```rust
//! use pointage_core::error::{PointageError, Result};
//!
//! fn token(stored: Option<&str>) -> Result<String> {
//!     stored.map(str::to_string).ok_or(PointageError::NoSession)
//! }
//!
//! assert!(token(None).unwrap_err().redirects_to_login());
//! ```
//!
//! [`ConfigError`]: crate::config::ConfigError
//! [`StorageError`]: crate::storage::StorageError
//! [`CameraError`]: crate::camera::CameraError
//! [`ClientError`]: crate::client::ClientError
//! [`ScanError`]: crate::scan::ScanError

use std::path::PathBuf;
use thiserror::Error;

/// The unified error type for all pointage operations.
#[derive(Debug, Error)]
pub enum PointageError {
    // =========================================================================
    // SESSION ERRORS
    // =========================================================================
    /// No session token is stored; the operator must log in.
    #[error("No active session. Please log in.")]
    NoSession,

    /// The login endpoint rejected the credentials or could not be reached.
    #[error("Login failed: {0}")]
    LoginFailed(String),

    /// The email entered on the login form is malformed.
    #[error("Invalid email address: '{0}'")]
    InvalidEmail(String),

    /// The pointage type could not be parsed.
    #[error("Invalid pointage type: '{0}'. Expected 'entry', 'exit' or a numeric category.")]
    InvalidPointageType(String),

    // =========================================================================
    // SCAN ERRORS
    // =========================================================================
    /// The camera could not be acquired (permission denied or no device).
    #[error("Camera unavailable: {0}")]
    CameraUnavailable(String),

    /// The requested action is not valid in the current scan phase.
    #[error("Invalid scan action: {0}")]
    InvalidTransition(String),

    /// The clocking submission failed (HTTP or network).
    #[error("Submission failed: {0}")]
    SubmissionFailed(String),

    // =========================================================================
    // CONFIGURATION ERRORS
    // =========================================================================
    /// The configuration file was not found at the expected path.
    #[error("Configuration file not found at: {}", .0.display())]
    ConfigNotFound(PathBuf),

    /// The configuration exists but could not be parsed.
    #[error("Failed to parse configuration: {0}")]
    ConfigParseError(String),

    /// The configuration was parsed but contains invalid values.
    #[error("Configuration validation failed: {0}")]
    ConfigValidationError(String),

    // =========================================================================
    // PERSISTENCE & I/O ERRORS
    // =========================================================================
    /// Reading or writing the persisted state failed.
    #[error("Persistence error: {0}")]
    PersistenceError(String),

    /// A low-level I/O error occurred.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

/// A specialized [`Result`] type for pointage operations.
pub type Result<T> = std::result::Result<T, PointageError>;

impl PointageError {
    /// Returns `true` if the screen should redirect to the login screen.
    #[inline]
    #[must_use]
    pub const fn redirects_to_login(&self) -> bool {
        matches!(self, Self::NoSession)
    }

    /// Returns `true` if the operator can retry the action that failed.
    #[inline]
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::CameraUnavailable(_)
                | Self::SubmissionFailed(_)
                | Self::LoginFailed(_)
                | Self::InvalidEmail(_)
        )
    }

    /// Returns `true` if this error is related to configuration.
    #[inline]
    #[must_use]
    pub const fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::ConfigNotFound(_) | Self::ConfigParseError(_) | Self::ConfigValidationError(_)
        )
    }

    /// Returns a machine-readable error code for logs and CLI exit reporting.
    #[inline]
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::NoSession => "NO_SESSION",
            Self::LoginFailed(_) => "LOGIN_FAILED",
            Self::InvalidEmail(_) => "INVALID_EMAIL",
            Self::InvalidPointageType(_) => "INVALID_POINTAGE_TYPE",
            Self::CameraUnavailable(_) => "CAMERA_UNAVAILABLE",
            Self::InvalidTransition(_) => "INVALID_TRANSITION",
            Self::SubmissionFailed(_) => "SUBMISSION_FAILED",
            Self::ConfigNotFound(_) => "CONFIG_NOT_FOUND",
            Self::ConfigParseError(_) => "CONFIG_PARSE_ERROR",
            Self::ConfigValidationError(_) => "CONFIG_VALIDATION_ERROR",
            Self::PersistenceError(_) => "PERSISTENCE_ERROR",
            Self::IoError(_) => "IO_ERROR",
        }
    }
}

// =============================================================================
// CONVERSIONS FROM MODULE-SPECIFIC ERRORS
// =============================================================================

impl From<crate::config::ConfigError> for PointageError {
    fn from(err: crate::config::ConfigError) -> Self {
        use crate::config::ConfigError;
        match err {
            ConfigError::NotFound(path) => Self::ConfigNotFound(path),
            ConfigError::WriteError { path, source } => {
                Self::PersistenceError(format!("Failed to write {}: {}", path.display(), source))
            }
            ConfigError::LoadError(e) => Self::ConfigParseError(e.to_string()),
            ConfigError::SerializeError(e) => Self::ConfigParseError(e.to_string()),
            ConfigError::ValidationError { field, message } => {
                Self::ConfigValidationError(format!("{field}: {message}"))
            }
            ConfigError::NoConfigDirectory => {
                Self::ConfigValidationError("cannot determine configuration directory".into())
            }
        }
    }
}

impl From<crate::storage::StorageError> for PointageError {
    fn from(err: crate::storage::StorageError) -> Self {
        use crate::storage::StorageError;
        match err {
            StorageError::NoSession => Self::NoSession,
            other => Self::PersistenceError(other.to_string()),
        }
    }
}

impl From<crate::camera::CameraError> for PointageError {
    fn from(err: crate::camera::CameraError) -> Self {
        Self::CameraUnavailable(err.to_string())
    }
}

impl From<crate::client::ClientError> for PointageError {
    fn from(err: crate::client::ClientError) -> Self {
        use crate::client::ClientError;
        match err {
            ClientError::InvalidEmail(email) => Self::InvalidEmail(email),
            ClientError::LoginRejected(message) => Self::LoginFailed(message),
            ClientError::MissingCodes => Self::SubmissionFailed(err.to_string()),
            ClientError::InvalidUrl(e) => Self::ConfigValidationError(e.to_string()),
            ClientError::Http(e) => Self::LoginFailed(e.to_string()),
        }
    }
}

impl From<crate::scan::ScanError> for PointageError {
    fn from(err: crate::scan::ScanError) -> Self {
        Self::InvalidTransition(err.to_string())
    }
}

impl From<crate::types::ParsePointageTypeError> for PointageError {
    fn from(err: crate::types::ParsePointageTypeError) -> Self {
        Self::InvalidPointageType(err.0)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Error as IoErr, ErrorKind};

    #[test]
    fn test_no_session_redirects() {
        assert!(PointageError::NoSession.redirects_to_login());
        assert!(!PointageError::CameraUnavailable("denied".into()).redirects_to_login());
        assert!(!PointageError::SubmissionFailed("x".into()).redirects_to_login());
    }

    #[test]
    fn test_recoverable_errors() {
        assert!(PointageError::CameraUnavailable("denied".into()).is_recoverable());
        assert!(PointageError::SubmissionFailed("duplicate entry".into()).is_recoverable());
        assert!(!PointageError::NoSession.is_recoverable());
        assert!(!PointageError::PersistenceError("disk full".into()).is_recoverable());
    }

    #[test]
    fn test_config_error_classification() {
        assert!(PointageError::ConfigNotFound(PathBuf::from("/test")).is_config_error());
        assert!(PointageError::ConfigParseError("syntax".into()).is_config_error());
        assert!(!PointageError::NoSession.is_config_error());
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(PointageError::NoSession.error_code(), "NO_SESSION");
        assert_eq!(
            PointageError::CameraUnavailable(String::new()).error_code(),
            "CAMERA_UNAVAILABLE"
        );
        assert_eq!(
            PointageError::SubmissionFailed(String::new()).error_code(),
            "SUBMISSION_FAILED"
        );
    }

    #[test]
    fn test_from_io_error() {
        let err: PointageError = IoErr::new(ErrorKind::NotFound, "gone").into();
        assert!(matches!(err, PointageError::IoError(_)));
        assert_eq!(err.error_code(), "IO_ERROR");
    }

    #[test]
    fn test_from_camera_error() {
        let err: PointageError = crate::camera::CameraError::PermissionDenied.into();
        assert!(matches!(err, PointageError::CameraUnavailable(_)));
        assert!(err.to_string().contains("permission denied"));
    }

    #[test]
    fn test_from_storage_no_session() {
        let err: PointageError = crate::storage::StorageError::NoSession.into();
        assert!(err.redirects_to_login());
    }

    #[test]
    fn test_error_display_messages() {
        assert_eq!(
            PointageError::InvalidTransition("cannot submit while idle".into()).to_string(),
            "Invalid scan action: cannot submit while idle"
        );
        assert_eq!(
            PointageError::SubmissionFailed("duplicate entry".into()).to_string(),
            "Submission failed: duplicate entry"
        );
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<PointageError>();
        assert_sync::<PointageError>();
    }
}
