//! Error types for the authentication gate

use thiserror::Error;

/// Result type alias for gate operations
pub type Result<T> = std::result::Result<T, AuthError>;

/// Errors that can occur in the authentication gate
///
/// A wrong password or a declined biometric challenge is an outcome, not an
/// error; those are reported through return values so callers cannot confuse
/// "the user failed to authenticate" with "the gate itself failed".
#[derive(Debug, Error)]
pub enum AuthError {
    /// Password failed validation during setup
    #[error("password must be at least {min} characters")]
    PasswordTooShort { min: usize },

    /// No biometric hardware or enrollment on this device
    #[error("biometric authentication is not available on this device")]
    CapabilityUnavailable,

    /// A security-relevant write did not durably apply
    ///
    /// Raised only by the disable-all-authentication path. Callers must be
    /// able to distinguish "disabled" from "attempted to disable but the
    /// re-read still showed authentication enabled".
    #[error("disabling authentication was not durably persisted")]
    PersistenceFailed,

    /// Settings store error
    #[error("settings store error: {0}")]
    Storage(String),

    /// Biometric platform error (distinct from the user declining)
    #[error("biometric platform error: {0}")]
    Biometric(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for AuthError {
    fn from(e: serde_json::Error) -> Self {
        AuthError::Storage(e.to_string())
    }
}
