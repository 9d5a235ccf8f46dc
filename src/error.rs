//! Error types for the microgear connector
//!
//! Each layer owns a focused error enum; [`GearError`] is what the public
//! client surface returns. Only [`GearError::InvalidCredentials`] is terminal,
//! every other failure is retried by the client actor.

use crate::cache::CacheError;
use crate::config::ConfigError;
use crate::gateway::GatewayError;
use crate::transport::TransportError;
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

/// Main error type for microgear operations
#[derive(Debug, Error)]
pub enum GearError {
    /// The gateway refused to issue a request token: the device key/secret is wrong.
    #[error("Request token is not issued ({reason}), please check your key and secret")]
    InvalidCredentials { reason: String },

    #[error("Microgear is disconnected, cannot {operation}")]
    NotConnected { operation: &'static str },

    #[error("Token revoke failed: {0}")]
    RevokeFailed(String),

    #[error("Client is not connecting: {0}")]
    Disconnected(String),

    #[error("Client actor has shut down")]
    ClientClosed,

    #[error("Invalid broker endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl GearError {
    /// Create invalid credentials error
    pub fn invalid_credentials<S: Into<String>>(reason: S) -> Self {
        Self::InvalidCredentials {
            reason: reason.into(),
        }
    }

    /// Create not connected error for the named operation
    pub fn not_connected(operation: &'static str) -> Self {
        Self::NotConnected { operation }
    }

    /// Human readable reason suitable for an `error` event payload
    pub fn event_reason(&self) -> String {
        sanitize_error_message(&self.to_string())
    }
}

static SECRET_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(password|token|key|secret|revokecode)[=:]\s*[^\s&]+")
        .expect("secret pattern is valid")
});

static REVOKE_PATH_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/api/revoke/[^\s/]+/[^\s/]+").expect("revoke pattern is valid"));

/// Sanitize error messages so token material never reaches events or logs
pub fn sanitize_error_message(message: &str) -> String {
    let mut sanitized = SECRET_PATTERN
        .replace_all(message, "${1}=***")
        .to_string();

    sanitized = REVOKE_PATH_PATTERN
        .replace_all(&sanitized, "/api/revoke/***/***")
        .to_string();

    // Truncate very long messages - ensure total length is <= 500
    if sanitized.len() > 500 {
        let truncate_suffix = "...[truncated]";
        let mut cut = 500 - truncate_suffix.len();
        while !sanitized.is_char_boundary(cut) {
            cut -= 1;
        }
        sanitized = format!("{}{}", &sanitized[..cut], truncate_suffix);
    }

    sanitized
}

/// Result type for microgear operations
pub type GearResult<T> = Result<T, GearError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_credentials_message() {
        let error = GearError::invalid_credentials("401 from rtoken");
        assert!(error.to_string().contains("check your key and secret"));
    }

    #[test]
    fn test_not_connected_names_operation() {
        let error = GearError::not_connected("publish");
        assert_eq!(error.to_string(), "Microgear is disconnected, cannot publish");
    }

    #[test]
    fn test_error_message_sanitization() {
        let sanitized =
            sanitize_error_message("Failed to authenticate: password=secret123 token=abc456");

        assert!(!sanitized.contains("secret123"));
        assert!(!sanitized.contains("abc456"));
        assert!(sanitized.contains("password=***"));
        assert!(sanitized.contains("token=***"));
    }

    #[test]
    fn test_sanitize_stops_at_query_separator() {
        let sanitized = sanitize_error_message("oauth_token=abc&appid=demo");
        assert!(!sanitized.contains("abc"));
        assert!(sanitized.contains("appid=demo"));
    }

    #[test]
    fn test_revoke_path_redaction() {
        let message = "GET https://ga.netpie.io:8081/api/revoke/TOKEN123/CODE_456 failed";
        let sanitized = sanitize_error_message(message);

        assert!(sanitized.contains("/api/revoke/***/***"));
        assert!(!sanitized.contains("TOKEN123"));
        assert!(!sanitized.contains("CODE_456"));
    }

    #[test]
    fn test_long_message_truncation() {
        let sanitized = sanitize_error_message(&"x".repeat(600));

        assert!(sanitized.len() <= 500);
        assert!(sanitized.ends_with("...[truncated]"));
    }

    #[test]
    fn test_truncation_respects_char_boundaries() {
        let sanitized = sanitize_error_message(&"é".repeat(400));
        assert!(sanitized.len() <= 500);
        assert!(sanitized.ends_with("...[truncated]"));
    }

    #[test]
    fn test_sanitize_empty_message() {
        assert_eq!(sanitize_error_message(""), "");
    }

    #[test]
    fn test_event_reason_is_sanitized() {
        let error = GearError::RevokeFailed("token=abc".to_string());
        assert_eq!(error.event_reason(), "Token revoke failed: token=***");
    }
}
