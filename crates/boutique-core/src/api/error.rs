use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Rate limited - please wait before retrying")]
    RateLimited,

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Server unreachable: {0}")]
    Unreachable(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Request failed with status {status}: {message}")]
    Status { status: u16, message: String },
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

/// JSON error body shape returned by the backend
#[derive(serde::Deserialize)]
struct ErrorBody {
    message: Option<String>,
    error: Option<String>,
}

impl ApiError {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            body.to_string()
        } else {
            let mut end = MAX_ERROR_BODY_LENGTH;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
        }
    }

    /// Pull a human-readable message out of a response body.
    /// Prefers `{"message": ...}`, then `{"error": ...}`, then the raw text.
    fn message_from_body(body: &str) -> String {
        if let Ok(parsed) = serde_json::from_str::<ErrorBody>(body) {
            if let Some(message) = parsed.message.or(parsed.error) {
                return Self::truncate_body(&message);
            }
        }
        Self::truncate_body(body)
    }

    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        Self::from_status_code(status.as_u16(), body)
    }

    pub fn from_status_code(status: u16, body: &str) -> Self {
        let message = Self::message_from_body(body);
        match status {
            400 | 422 => ApiError::BadRequest(message),
            401 => ApiError::Unauthorized(message),
            403 => ApiError::AccessDenied(message),
            404 => ApiError::NotFound(message),
            429 => ApiError::RateLimited,
            500..=599 => ApiError::ServerError(message),
            _ => ApiError::Status { status, message },
        }
    }

    /// HTTP status equivalent of this error, if the server answered at all
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Unauthorized(_) => Some(401),
            ApiError::AccessDenied(_) => Some(403),
            ApiError::BadRequest(_) => Some(400),
            ApiError::NotFound(_) => Some(404),
            ApiError::RateLimited => Some(429),
            ApiError::ServerError(_) => Some(500),
            ApiError::Status { status, .. } => Some(*status),
            ApiError::Network(e) => e.status().map(|s| s.as_u16()),
            ApiError::Unreachable(_) | ApiError::InvalidResponse(_) => None,
        }
    }

    /// The server explicitly refused the credential itself.
    /// Only 401/403 count; used to decide whether a renewal failure ends the session.
    pub fn is_auth_rejection(&self) -> bool {
        matches!(self.status(), Some(401) | Some(403))
    }

    /// The server explicitly refused the submitted credentials or passcode.
    /// Any 4xx except timeouts and rate limiting.
    pub fn is_client_rejection(&self) -> bool {
        match self.status() {
            Some(408) | Some(429) => false,
            Some(status) => (400..500).contains(&status),
            None => false,
        }
    }

    /// Message suitable for showing next to a form field
    pub fn user_message(&self) -> String {
        match self {
            ApiError::Unauthorized(m)
            | ApiError::AccessDenied(m)
            | ApiError::BadRequest(m)
            | ApiError::NotFound(m)
            | ApiError::ServerError(m)
            | ApiError::Unreachable(m)
            | ApiError::InvalidResponse(m)
            | ApiError::Status { message: m, .. }
                if !m.is_empty() =>
            {
                m.clone()
            }
            other => other.to_string(),
        }
    }
}
