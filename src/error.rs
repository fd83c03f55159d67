//! Error types for the Deskgate service.

use std::time::Duration;
use thiserror::Error;

/// Main error type for Deskgate operations.
#[derive(Error, Debug)]
pub enum DeskError {
    /// Malformed request payload; nothing was touched
    #[error("{0}")]
    Validation(String),

    /// Insufficient authorization level or wrong location
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// The requester is inside an active restriction window
    #[error("You are on cooldown for another {}s", remaining.as_secs())]
    CoolingDown { remaining: Duration },

    /// The control surface failed; the resource may be in an indeterminate state
    #[error("Resource unavailable: {0}")]
    ResourceUnavailable(String),

    /// The desktop driver has no way to carry out this kind of request
    #[error("{0}")]
    Unsupported(String),

    /// Request collides with work already in flight
    #[error("{0}")]
    Conflict(String),

    /// Front-end (messaging) errors
    #[error("Front-end error: {0}")]
    Frontend(String),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DeskError {
    /// Whether this error should be shown to the requester verbatim.
    ///
    /// Resource and front-end failures are reported as a generic failure
    /// instead; permission denials are not reported at all.
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            DeskError::Validation(_)
                | DeskError::CoolingDown { .. }
                | DeskError::Unsupported(_)
                | DeskError::Conflict(_)
        )
    }
}

/// Result type alias for Deskgate operations.
pub type Result<T> = std::result::Result<T, DeskError>;
