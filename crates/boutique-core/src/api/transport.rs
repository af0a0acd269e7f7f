//! The network seam the session controller talks through.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::auth::UserProfile;

use super::ApiError;

/// Result of a successful credential submission: the server sent a passcode
/// and issued a device id the passcode is bound to.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginChallenge {
    pub email: String,
    pub device_id: String,
    /// Seconds until the passcode expires
    #[serde(default)]
    pub expires_in: Option<u64>,
}

/// Passcode confirmation request
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OtpSubmission<'a> {
    pub email: &'a str,
    pub device_id: &'a str,
    #[serde(rename = "otp")]
    pub code: &'a str,
    pub remember_me: bool,
}

/// Tokens issued by passcode confirmation or renewal
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenGrant {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub user: UserProfile,
    /// Seconds until the access token expires
    #[serde(default)]
    pub expires_in: Option<u64>,
}

/// Performs the actual authentication calls.
///
/// Implementations report every failure as an `ApiError`; the controller
/// classifies them, so transports should preserve the server's status code.
#[async_trait]
pub trait AuthTransport: Send + Sync {
    async fn login(&self, email: &str, password: &str) -> Result<LoginChallenge, ApiError>;

    async fn verify_otp(&self, submission: OtpSubmission<'_>) -> Result<TokenGrant, ApiError>;

    /// Exchange the refresh credential for a fresh access token.
    /// `refresh_token` is `None` when the shopper did not ask to be remembered;
    /// cookie-based backends may still succeed.
    async fn refresh(&self, refresh_token: Option<&str>) -> Result<TokenGrant, ApiError>;

    async fn logout(&self, device_id: &str, access_token: Option<&str>) -> Result<(), ApiError>;
}
