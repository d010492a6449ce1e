/// Core error types for chatrelay.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("Upstream error: {0}")]
    Upstream(#[from] UpstreamError),

    #[error("OAuth error: {0}")]
    OAuth(#[from] OAuthError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl RelayError {
    pub fn validation(message: impl Into<String>) -> Self {
        RelayError::Validation(message.into())
    }

    pub fn unauthorized() -> Self {
        RelayError::Unauthorized("Authentication required".to_string())
    }

    /// HTTP status the relay reports for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            RelayError::Validation(_) => 400,
            RelayError::Unauthorized(_) => 401,
            RelayError::Upstream(e) => e.status_code(),
            RelayError::OAuth(e) => e.status_code(),
            RelayError::Config(_)
            | RelayError::Session(_)
            | RelayError::Io(_)
            | RelayError::Other(_) => 500,
        }
    }

    /// Message safe to hand back to a browser. Transport and internal
    /// failures collapse to a generic line; the detail goes to the log.
    pub fn public_message(&self) -> String {
        match self {
            RelayError::Validation(msg) | RelayError::Unauthorized(msg) => msg.clone(),
            RelayError::Upstream(UpstreamError::Api { message, .. }) => message.clone(),
            RelayError::OAuth(e) => e.to_string(),
            _ => "Internal server error".to_string(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid config: {0}")]
    Invalid(String),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Failed to parse response: {0}")]
    Parse(String),
}

impl UpstreamError {
    pub fn status_code(&self) -> u16 {
        match self {
            UpstreamError::Api { status, .. } if (400..=599).contains(status) => *status,
            _ => 500,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum OAuthError {
    #[error("{0}")]
    Denied(String),

    #[error("Missing authorization code")]
    MissingCode,

    #[error("Invalid state parameter")]
    InvalidState,

    #[error("Token exchange failed: {0}")]
    TokenExchange(String),

    #[error("Token refresh failed: {0}")]
    Refresh(String),

    #[error("Google OAuth is not configured")]
    NotConfigured,
}

impl OAuthError {
    pub fn status_code(&self) -> u16 {
        match self {
            OAuthError::Denied(_) | OAuthError::MissingCode | OAuthError::InvalidState => 400,
            OAuthError::TokenExchange(_) | OAuthError::Refresh(_) => 502,
            OAuthError::NotConfigured => 500,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Failed to read session: {0}")]
    Read(String),

    #[error("Failed to write session: {0}")]
    Write(String),

    #[error("Invalid session key: {0}")]
    InvalidKey(String),
}

pub type Result<T> = std::result::Result<T, RelayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_is_bad_request() {
        let err = RelayError::validation("message is required");
        assert_eq!(err.status_code(), 400);
        assert_eq!(err.public_message(), "message is required");
    }

    #[test]
    fn test_upstream_status_passthrough() {
        let err = RelayError::from(UpstreamError::Api {
            status: 404,
            message: "File not found".to_string(),
        });
        assert_eq!(err.status_code(), 404);
        assert_eq!(err.public_message(), "File not found");
    }

    #[test]
    fn test_upstream_non_error_status_becomes_500() {
        let err = UpstreamError::Api {
            status: 302,
            message: "redirect".to_string(),
        };
        assert_eq!(err.status_code(), 500);
    }

    #[test]
    fn test_internal_errors_are_generic() {
        let err = RelayError::Other("socket closed at 0x1234".to_string());
        assert_eq!(err.status_code(), 500);
        assert_eq!(err.public_message(), "Internal server error");
    }
}
