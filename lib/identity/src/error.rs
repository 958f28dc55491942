//! Error types for the identity crate.
//!
//! Errors are split by who caused them:
//! - `BackendError`: the identity collaborator failed or had nothing to return
//! - `AccountError`: an explicit user action (login, registration, profile
//!   update) failed and must be surfaced to the caller
//!
//! Background resolution never produces either of these for consumers; it
//! degrades to a fallback identity instead.

use std::fmt;

/// Errors reported by the identity collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// The requested record does not exist (yet).
    ///
    /// This is the only transient classification: a profile row may lag
    /// behind account creation.
    NotFound { resource: String },
    /// The service could not be reached or failed to answer.
    Unavailable { reason: String },
    /// The service answered with something that could not be understood.
    Malformed { reason: String },
    /// The service refused the request (bad credentials, constraint, policy).
    Rejected { reason: String },
}

impl BackendError {
    /// Returns true for the not-found classification.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns a human-readable reason suitable for surfacing to a user.
    #[must_use]
    pub fn reason(&self) -> String {
        match self {
            Self::NotFound { resource } => format!("{resource} not found"),
            Self::Unavailable { reason } | Self::Malformed { reason } | Self::Rejected { reason } => {
                reason.clone()
            }
        }
    }
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { resource } => write!(f, "{resource} not found"),
            Self::Unavailable { reason } => write!(f, "identity service unavailable: {reason}"),
            Self::Malformed { reason } => write!(f, "malformed identity service response: {reason}"),
            Self::Rejected { reason } => write!(f, "identity service rejected request: {reason}"),
        }
    }
}

impl std::error::Error for BackendError {}

/// Errors from user-initiated account actions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccountError {
    /// Credential exchange failed.
    LoginFailed { reason: String },
    /// Account creation failed.
    RegistrationFailed { reason: String },
    /// The remote sign-out failed. Local state has already been cleared.
    LogoutFailed { reason: String },
    /// The action needs a signed-in session and there is none.
    NotSignedIn,
    /// The profile write was refused or did not reach the service.
    ProfileUpdateFailed { reason: String },
    /// A profile update carried no fields.
    EmptyUpdate,
}

impl fmt::Display for AccountError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LoginFailed { reason } => write!(f, "login failed: {reason}"),
            Self::RegistrationFailed { reason } => write!(f, "registration failed: {reason}"),
            Self::LogoutFailed { reason } => write!(f, "logout failed: {reason}"),
            Self::NotSignedIn => write!(f, "no member is signed in"),
            Self::ProfileUpdateFailed { reason } => {
                write!(f, "profile update failed: {reason}")
            }
            Self::EmptyUpdate => write!(f, "profile update contains no changes"),
        }
    }
}

impl std::error::Error for AccountError {}
