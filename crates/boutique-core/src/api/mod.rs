//! Auth API module for the storefront backend.
//!
//! This module provides the `AuthTransport` trait the session controller
//! talks through, and `HttpTransport`, its REST implementation.

pub mod client;
pub mod error;
pub mod transport;

#[cfg(test)]
pub(crate) mod scripted;

pub use client::HttpTransport;
pub use error::ApiError;
pub use transport::{AuthTransport, LoginChallenge, OtpSubmission, TokenGrant};
