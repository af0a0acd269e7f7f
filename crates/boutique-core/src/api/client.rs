//! REST implementation of `AuthTransport`.
//!
//! All endpoints are JSON `POST`s under `{base_url}/auth`. Rate-limited
//! requests are retried with exponential backoff; every other failure is
//! returned as an `ApiError` carrying the server's status and message.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use reqwest::{header, Client};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, warn};

use crate::config::Config;

use super::transport::{AuthTransport, LoginChallenge, OtpSubmission, TokenGrant};
use super::ApiError;

// ============================================================================
// Constants
// ============================================================================

/// Maximum number of retries for rate-limited (429) requests.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay for rate limiting.
const INITIAL_BACKOFF: Duration = Duration::from_millis(1000);

#[derive(Serialize)]
struct LoginRequest<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    refresh_token: Option<&'a str>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LogoutRequest<'a> {
    device_id: &'a str,
}

/// HTTP transport for the storefront auth API.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
    base_url: String,
    initial_backoff: Duration,
}

impl HttpTransport {
    /// Create a transport against `base_url` (e.g. `https://api.example.com/v1`)
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .default_headers({
                let mut headers = header::HeaderMap::new();
                headers.insert(
                    header::ACCEPT,
                    header::HeaderValue::from_static("application/json"),
                );
                headers
            })
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            initial_backoff: INITIAL_BACKOFF,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(&config.api_base_url, config.request_timeout())
    }

    /// Override the rate-limit backoff (tests use a tiny value)
    pub fn with_backoff(mut self, initial_backoff: Duration) -> Self {
        self.initial_backoff = initial_backoff;
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}/auth/{}", self.base_url, path)
    }

    /// POST `body` to `url`, retrying on 429, and return the successful response.
    async fn send_post<B: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &B,
        bearer: Option<&str>,
    ) -> Result<reqwest::Response, ApiError> {
        let mut retries = 0;
        let mut backoff = self.initial_backoff;

        loop {
            let mut request = self.client.post(url).json(body);
            if let Some(token) = bearer {
                request = request.bearer_auth(token);
            }

            let response = request.send().await.map_err(|e| {
                if e.is_connect() || e.is_timeout() {
                    ApiError::Unreachable(e.to_string())
                } else {
                    ApiError::Network(e)
                }
            })?;

            let status = response.status();
            if status.is_success() {
                return Ok(response);
            }

            if status.as_u16() == 429 {
                retries += 1;
                if retries > MAX_RATE_LIMIT_RETRIES {
                    return Err(ApiError::RateLimited);
                }
                warn!(
                    url = url,
                    retry = retries,
                    backoff_ms = backoff.as_millis() as u64,
                    "Rate limited, backing off"
                );
                tokio::time::sleep(backoff).await;
                backoff *= 2;
                continue;
            }

            let body = response.text().await.unwrap_or_default();
            debug!(url = url, status = status.as_u16(), "Auth request failed");
            return Err(ApiError::from_status(status, &body));
        }
    }

    async fn post_json<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &B,
        bearer: Option<&str>,
    ) -> Result<T, ApiError> {
        let response = self.send_post(url, body, bearer).await?;
        let text = response.text().await?;
        serde_json::from_str(&text).map_err(|e| {
            ApiError::InvalidResponse(format!("Failed to parse response from {}: {}", url, e))
        })
    }
}

#[async_trait]
impl AuthTransport for HttpTransport {
    async fn login(&self, email: &str, password: &str) -> Result<LoginChallenge, ApiError> {
        let url = self.url("login");
        self.post_json(&url, &LoginRequest { email, password }, None).await
    }

    async fn verify_otp(&self, submission: OtpSubmission<'_>) -> Result<TokenGrant, ApiError> {
        let url = self.url("verify-otp");
        self.post_json(&url, &submission, None).await
    }

    async fn refresh(&self, refresh_token: Option<&str>) -> Result<TokenGrant, ApiError> {
        let url = self.url("refresh");
        self.post_json(&url, &RefreshRequest { refresh_token }, None).await
    }

    async fn logout(&self, device_id: &str, access_token: Option<&str>) -> Result<(), ApiError> {
        let url = self.url("logout");
        self.send_post(&url, &LogoutRequest { device_id }, access_token).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn transport(server: &MockServer) -> HttpTransport {
        HttpTransport::new(server.uri(), Duration::from_secs(5))
            .expect("client builds")
            .with_backoff(Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_login_parses_challenge() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/login"))
            .and(body_json(json!({"email": "a@b.com", "password": "pw"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "email": "a@b.com",
                "deviceId": "D1",
                "expiresIn": 300
            })))
            .expect(1)
            .mount(&server)
            .await;

        let challenge = transport(&server).login("a@b.com", "pw").await.expect("login ok");
        assert_eq!(challenge.email, "a@b.com");
        assert_eq!(challenge.device_id, "D1");
        assert_eq!(challenge.expires_in, Some(300));
    }

    #[tokio::test]
    async fn test_login_rejection_carries_server_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/login"))
            .respond_with(
                ResponseTemplate::new(401)
                    .set_body_json(json!({"message": "Invalid email or password"})),
            )
            .mount(&server)
            .await;

        let err = transport(&server).login("a@b.com", "nope").await.unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized(_)));
        assert_eq!(err.user_message(), "Invalid email or password");
    }

    #[tokio::test]
    async fn test_verify_otp_sends_camel_case_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/verify-otp"))
            .and(body_json(json!({
                "email": "a@b.com",
                "deviceId": "D1",
                "otp": "123456",
                "rememberMe": true
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "accessToken": "T1",
                "refreshToken": "R1",
                "user": {"id": 1},
                "expiresIn": 900
            })))
            .mount(&server)
            .await;

        let grant = transport(&server)
            .verify_otp(OtpSubmission {
                email: "a@b.com",
                device_id: "D1",
                code: "123456",
                remember_me: true,
            })
            .await
            .expect("verify ok");
        assert_eq!(grant.access_token, "T1");
        assert_eq!(grant.refresh_token.as_deref(), Some("R1"));
        assert_eq!(grant.user.id(), Some("1".to_string()));
    }

    #[tokio::test]
    async fn test_refresh_maps_statuses() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/refresh"))
            .and(body_json(json!({"refreshToken": "stale"})))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/auth/refresh"))
            .and(body_json(json!({})))
            .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
            .mount(&server)
            .await;

        let transport = transport(&server);
        let err = transport.refresh(Some("stale")).await.unwrap_err();
        assert!(err.is_auth_rejection());

        let err = transport.refresh(None).await.unwrap_err();
        assert!(matches!(err, ApiError::ServerError(_)));
        assert!(!err.is_auth_rejection());
    }

    #[tokio::test]
    async fn test_rate_limit_is_retried_then_surfaced() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/refresh"))
            .respond_with(ResponseTemplate::new(429))
            .expect(u64::from(MAX_RATE_LIMIT_RETRIES) + 1)
            .mount(&server)
            .await;

        let err = transport(&server).refresh(Some("R1")).await.unwrap_err();
        assert!(matches!(err, ApiError::RateLimited));
    }

    #[tokio::test]
    async fn test_logout_sends_bearer_and_ignores_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/logout"))
            .and(header("authorization", "Bearer T1"))
            .and(body_json(json!({"deviceId": "D1"})))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        transport(&server).logout("D1", Some("T1")).await.expect("logout ok");
    }

    #[tokio::test]
    async fn test_garbage_success_body_is_invalid_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/login"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let err = transport(&server).login("a@b.com", "pw").await.unwrap_err();
        assert!(matches!(err, ApiError::InvalidResponse(_)));
    }
}
