//! Identity Client Error Types
//!
//! Error hierarchy surfaced to callers of the client, the authenticating
//! transport, the resilience utilities and the webhook verifier.

use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

/// Root error type for the identity client.
///
/// Every variant is cloneable so a single refresh failure can be handed to
/// every caller that was waiting on the same in-flight refresh.
#[derive(Error, Debug, Clone)]
pub enum IdentityError {
    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    #[error("Validation failed: {message}")]
    Validation { message: String },

    #[error("Permission denied: {message}")]
    Permission { message: String },

    #[error("Not found: {message}")]
    NotFound { message: String },

    #[error("Conflict: {message}")]
    Conflict { message: String },

    #[error("Rate limited: {message}")]
    RateLimit {
        message: String,
        retry_after: Option<Duration>,
    },

    #[error("Server error (HTTP {status}): {message}")]
    Server { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Token error: {0}")]
    Token(#[from] TokenError),

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Webhook error: {0}")]
    Webhook(#[from] WebhookError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

impl IdentityError {
    /// Get error code for telemetry.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Authentication { .. } => "IDENTITY_AUTHENTICATION",
            Self::Validation { .. } => "IDENTITY_VALIDATION",
            Self::Permission { .. } => "IDENTITY_PERMISSION",
            Self::NotFound { .. } => "IDENTITY_NOT_FOUND",
            Self::Conflict { .. } => "IDENTITY_CONFLICT",
            Self::RateLimit { .. } => "IDENTITY_RATE_LIMIT",
            Self::Server { .. } => "IDENTITY_SERVER",
            Self::Network(_) => "IDENTITY_NETWORK",
            Self::Token(_) => "IDENTITY_TOKEN",
            Self::Configuration(_) => "IDENTITY_CONFIG",
            Self::Webhook(_) => "IDENTITY_WEBHOOK",
            Self::Storage(_) => "IDENTITY_STORAGE",
            Self::Protocol(_) => "IDENTITY_PROTOCOL",
        }
    }

    /// HTTP status this error was mapped from, if any.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Validation { .. } => Some(400),
            Self::Authentication { .. } => Some(401),
            Self::Permission { .. } => Some(403),
            Self::NotFound { .. } => Some(404),
            Self::Conflict { .. } => Some(409),
            Self::RateLimit { .. } => Some(429),
            Self::Server { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Check if error is retryable by status or transport class.
    ///
    /// Message vocabulary matching lives in
    /// [`is_retryable_error`](crate::resilience::is_retryable_error).
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(e) => e.is_retryable(),
            Self::RateLimit { .. } => true,
            Self::Server { status, .. } => matches!(status, 502 | 503 | 504),
            _ => false,
        }
    }

    /// Get retry-after duration if applicable.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimit { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Check if error requires the user to sign in again.
    pub fn needs_reauth(&self) -> bool {
        matches!(
            self,
            Self::Authentication { .. }
                | Self::Token(TokenError::Expired)
                | Self::Token(TokenError::NoRefreshToken)
                | Self::Token(TokenError::NoTokens)
                | Self::Token(TokenError::RefreshFailed { .. })
        )
    }

    /// Check if this is the circuit breaker rejecting a call.
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::Network(NetworkError::CircuitOpen))
    }
}

/// Configuration error.
#[derive(Error, Debug, Clone)]
pub enum ConfigurationError {
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    #[error("Missing required field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid endpoint URL: {url}")]
    InvalidEndpoint { url: String },
}

/// Token-related error.
#[derive(Error, Debug, Clone)]
pub enum TokenError {
    #[error("No credentials stored")]
    NoTokens,

    #[error("Token expired")]
    Expired,

    #[error("No refresh token available")]
    NoRefreshToken,

    #[error("Token refresh failed: {message}")]
    RefreshFailed { message: String },

    #[error("Failed to read stored credentials: {message}")]
    StorageRead { message: String },

    #[error("Invalid credential record: {message}")]
    InvalidRecord { message: String },
}

/// Network/transport error.
#[derive(Error, Debug, Clone)]
pub enum NetworkError {
    #[error("Connection failed: {message}")]
    ConnectionFailed { message: String },

    #[error("Request timeout after {timeout:?}")]
    Timeout { timeout: Duration },

    #[error("DNS resolution failed: {host}")]
    DnsResolutionFailed { host: String },

    #[error("TLS error: {message}")]
    TlsError { message: String },

    #[error("Circuit breaker is open")]
    CircuitOpen,
}

impl NetworkError {
    /// Check if error is retryable.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::TlsError { .. } | Self::CircuitOpen)
    }
}

/// Webhook verification error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WebhookError {
    #[error("Missing signature header")]
    MissingSignature,

    #[error("Missing timestamp header")]
    MissingTimestamp,

    #[error("Invalid timestamp: {value}")]
    InvalidTimestamp { value: String },

    #[error("Timestamp outside tolerance window")]
    TimestampOutOfWindow { timestamp: i64 },

    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Invalid payload: {message}")]
    InvalidPayload { message: String },
}

/// Credential store error.
#[derive(Error, Debug, Clone)]
pub enum StorageError {
    #[error("Read failed: {message}")]
    ReadFailed { message: String },

    #[error("Write failed: {message}")]
    WriteFailed { message: String },

    #[error("Delete failed: {message}")]
    DeleteFailed { message: String },

    #[error("Corrupted data: {message}")]
    CorruptedData { message: String },
}

/// Protocol/response parsing error.
#[derive(Error, Debug, Clone)]
pub enum ProtocolError {
    #[error("Invalid response: {message}")]
    InvalidResponse { message: String },

    #[error("Unexpected redirect to: {location}")]
    UnexpectedRedirect { location: String },

    #[error("Response too large: {size} bytes")]
    ResponseTooLarge { size: usize },

    #[error("Invalid JSON: {message}")]
    InvalidJson { message: String },
}

/// Result type for identity client operations.
pub type IdentityResult<T> = Result<T, IdentityError>;

/// Error body returned by the identity service.
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct ApiErrorResponse {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub retry_after: Option<u64>,
}

/// Parse error response from HTTP body.
pub fn parse_error_response(body: &str) -> Option<ApiErrorResponse> {
    serde_json::from_str(body).ok()
}

fn parse_retry_after(
    headers: &HashMap<String, String>,
    body: Option<&ApiErrorResponse>,
) -> Option<Duration> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("retry-after"))
        .and_then(|(_, v)| v.trim().parse::<u64>().ok())
        .or_else(|| body.and_then(|b| b.retry_after))
        .map(Duration::from_secs)
}

/// Create error from a non-success HTTP response.
pub fn create_error_from_response(
    status: u16,
    headers: &HashMap<String, String>,
    body: &str,
) -> IdentityError {
    let parsed = parse_error_response(body);
    let message = parsed
        .as_ref()
        .and_then(|r| r.message.clone().or_else(|| r.error.clone()))
        .unwrap_or_else(|| format!("HTTP {}", status));

    match status {
        400 => IdentityError::Validation { message },
        401 => IdentityError::Authentication { message },
        403 => IdentityError::Permission { message },
        404 => IdentityError::NotFound { message },
        409 => IdentityError::Conflict { message },
        429 => IdentityError::RateLimit {
            retry_after: parse_retry_after(headers, parsed.as_ref()),
            message,
        },
        _ => IdentityError::Server { status, message },
    }
}

/// Get user-friendly error message.
pub fn get_user_message(error: &IdentityError) -> String {
    match error {
        IdentityError::Authentication { .. }
        | IdentityError::Token(TokenError::Expired)
        | IdentityError::Token(TokenError::NoTokens) => {
            "Your session has expired. Please sign in again.".to_string()
        }
        IdentityError::Token(TokenError::NoRefreshToken)
        | IdentityError::Token(TokenError::RefreshFailed { .. }) => {
            "Your session cannot be renewed. Please sign in again.".to_string()
        }
        IdentityError::Permission { .. } => {
            "You do not have permission to perform this action.".to_string()
        }
        IdentityError::RateLimit { .. } => {
            "Too many requests. Please wait a moment and try again.".to_string()
        }
        IdentityError::Network(NetworkError::Timeout { .. }) => {
            "The request timed out. Please check your connection and try again.".to_string()
        }
        IdentityError::Network(NetworkError::CircuitOpen) | IdentityError::Server { .. } => {
            "The identity service is temporarily unavailable. Please try again later."
                .to_string()
        }
        _ => "An authentication error occurred. Please try again.".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let headers = HashMap::new();
        assert!(matches!(
            create_error_from_response(400, &headers, ""),
            IdentityError::Validation { .. }
        ));
        assert!(matches!(
            create_error_from_response(401, &headers, ""),
            IdentityError::Authentication { .. }
        ));
        assert!(matches!(
            create_error_from_response(403, &headers, ""),
            IdentityError::Permission { .. }
        ));
        assert!(matches!(
            create_error_from_response(404, &headers, ""),
            IdentityError::NotFound { .. }
        ));
        assert!(matches!(
            create_error_from_response(409, &headers, ""),
            IdentityError::Conflict { .. }
        ));
        assert!(matches!(
            create_error_from_response(503, &headers, ""),
            IdentityError::Server { status: 503, .. }
        ));
    }

    #[test]
    fn test_rate_limit_retry_after() {
        let mut headers = HashMap::new();
        headers.insert("Retry-After".to_string(), "17".to_string());
        let error = create_error_from_response(429, &headers, "");
        assert_eq!(error.retry_after(), Some(Duration::from_secs(17)));

        let body = r#"{"message":"slow","retry_after":5}"#;
        let error = create_error_from_response(429, &HashMap::new(), body);
        assert_eq!(error.retry_after(), Some(Duration::from_secs(5)));
        assert_eq!(error.to_string(), "Rate limited: slow");
    }

    #[test]
    fn test_message_from_body() {
        let error = create_error_from_response(
            404,
            &HashMap::new(),
            r#"{"error":"user not found","code":"USER_NOT_FOUND"}"#,
        );
        assert_eq!(error.to_string(), "Not found: user not found");
    }

    #[test]
    fn test_error_is_retryable() {
        assert!(IdentityError::Network(NetworkError::Timeout {
            timeout: Duration::from_secs(30)
        })
        .is_retryable());
        assert!(!IdentityError::Network(NetworkError::CircuitOpen).is_retryable());
        assert!(IdentityError::Server {
            status: 502,
            message: String::new()
        }
        .is_retryable());
        assert!(!IdentityError::Server {
            status: 500,
            message: String::new()
        }
        .is_retryable());
        assert!(!IdentityError::Validation {
            message: String::new()
        }
        .is_retryable());
    }

    #[test]
    fn test_needs_reauth() {
        assert!(IdentityError::Token(TokenError::Expired).needs_reauth());
        assert!(IdentityError::Authentication {
            message: "nope".into()
        }
        .needs_reauth());
        assert!(!IdentityError::Network(NetworkError::CircuitOpen).needs_reauth());
    }
}
