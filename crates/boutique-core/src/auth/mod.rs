//! Authentication module for the shopper's session.
//!
//! This module provides:
//! - `SessionController`: sign-in, passcode confirmation, silent renewal, logout
//! - `Session` state and the `UserProfile` payload it carries
//! - `AuthError`: failures classified as rejection, transient or validation
//!
//! Signed-in sessions are renewed every 9 minutes by default; passcodes
//! expire after 5 minutes unless the server says otherwise.

pub mod controller;
pub mod error;
pub mod otp;
mod renewal;
pub mod session;

pub use controller::{RenewOutcome, RestoreOutcome, SessionController};
pub use error::{AuthError, ErrorKind, ValidationError};
pub use otp::{format_countdown, validate_otp, OTP_LENGTH};
pub use session::{CachedSession, CredentialState, PendingLogin, SessionSnapshot, UserProfile};
