use thiserror::Error;

use crate::api::ApiError;

/// How a failure should be treated by the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The server explicitly refused the credential, passcode or refresh token
    Rejection,
    /// Network, server or rate-limit trouble; worth retrying later
    Transient,
    /// Rejected locally before any network call
    Validation,
    /// The persistent store could not be read or written
    Storage,
}

/// Problems detected before talking to the server
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Email and password are required")]
    EmptyCredentials,

    #[error("Passcode must be {expected} digits")]
    InvalidOtp { expected: usize },

    #[error("Passcode expired - please sign in again")]
    OtpExpired,

    #[error("No sign-in is waiting for a passcode")]
    NoPendingLogin,

    #[error("Already signed in")]
    AlreadyAuthenticated,

    #[error("Not signed in")]
    NotAuthenticated,
}

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Rejected: {0}")]
    Rejected(String),

    #[error("Temporarily unavailable: {0}")]
    Transient(String),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Session storage failed: {0:#}")]
    Storage(#[from] anyhow::Error),
}

impl AuthError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AuthError::Rejected(_) => ErrorKind::Rejection,
            AuthError::Transient(_) => ErrorKind::Transient,
            AuthError::Validation(_) => ErrorKind::Validation,
            AuthError::Storage(_) => ErrorKind::Storage,
        }
    }

    /// Classify a failed login or passcode confirmation.
    /// Any explicit 4xx refusal (other than timeout/rate limit) is a rejection.
    pub fn from_flow_failure(err: ApiError) -> Self {
        if err.is_client_rejection() {
            AuthError::Rejected(err.user_message())
        } else {
            AuthError::Transient(err.to_string())
        }
    }

    /// Classify a failed renewal. Only 401/403 end the session.
    pub fn from_renewal_failure(err: ApiError) -> Self {
        if err.is_auth_rejection() {
            AuthError::Rejected(err.user_message())
        } else {
            AuthError::Transient(err.to_string())
        }
    }
}
