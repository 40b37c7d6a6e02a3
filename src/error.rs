//! Error types for mcplink
//!
//! This module defines all error types used throughout the crate, using
//! `thiserror` for ergonomic error handling.
//!
//! Fallback and retry are local to discovery: the protected-resource
//! discovery steps and the authorization-server candidate list each try
//! their alternatives before surfacing a single aggregate
//! [`Error::Discovery`]. Every other component propagates its first
//! failure without internal retry.

use thiserror::Error;

/// Main error type for mcplink operations
///
/// This enum encompasses all possible errors that can occur during
/// metadata discovery, client registration, the authorization code flow,
/// token persistence, and connection pooling.
#[derive(Error, Debug)]
pub enum Error {
    /// Metadata discovery exhausted every step or candidate endpoint
    #[error("Discovery failed: {0}")]
    Discovery(String),

    /// Dynamic client registration endpoint returned a non-success status
    #[error("Client registration failed with status {status}: {body}")]
    Registration {
        /// HTTP status code returned by the registration endpoint
        status: u16,
        /// Response body, included for diagnosis
        body: String,
    },

    /// Authorization code exchange returned a non-success status
    #[error("Token exchange failed with status {status}: {body}")]
    TokenExchange {
        /// HTTP status code returned by the token endpoint
        status: u16,
        /// Response body, included for diagnosis
        body: String,
    },

    /// Refresh token grant returned a non-success status
    #[error("Token refresh failed with status {status}: {body}")]
    TokenRefresh {
        /// HTTP status code returned by the token endpoint
        status: u16,
        /// Response body, included for diagnosis
        body: String,
    },

    /// Authorization callback failed: state mismatch, reported OAuth
    /// error, or missing authorization code
    #[error("Authorization failed: {0}")]
    Authorization(String),

    /// No callback arrived within the authorization wait window
    #[error("Timed out waiting for the authorization callback")]
    AuthorizationTimeout,

    /// A token store update was requested for a record that does not exist
    #[error("No stored token for resource: {0}")]
    TokenNotFound(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Result type alias for mcplink operations
///
/// This is a convenience alias that uses `anyhow::Error` as the error type,
/// allowing for rich error context and easy error propagation.
pub type Result<T> = anyhow::Result<T>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discovery_error_display() {
        let error = Error::Discovery("https://api.example.com".to_string());
        assert_eq!(
            error.to_string(),
            "Discovery failed: https://api.example.com"
        );
    }

    #[test]
    fn test_registration_error_display() {
        let error = Error::Registration {
            status: 403,
            body: "registration disabled".to_string(),
        };
        let s = error.to_string();
        assert!(s.contains("403"));
        assert!(s.contains("registration disabled"));
    }

    #[test]
    fn test_token_exchange_error_display() {
        let error = Error::TokenExchange {
            status: 400,
            body: r#"{"error":"invalid_grant"}"#.to_string(),
        };
        let s = error.to_string();
        assert!(s.contains("400"));
        assert!(s.contains("invalid_grant"));
    }

    #[test]
    fn test_token_refresh_error_display() {
        let error = Error::TokenRefresh {
            status: 401,
            body: "expired".to_string(),
        };
        assert!(error.to_string().contains("Token refresh failed"));
    }

    #[test]
    fn test_authorization_error_display() {
        let error = Error::Authorization("state mismatch".to_string());
        assert_eq!(error.to_string(), "Authorization failed: state mismatch");
    }

    #[test]
    fn test_authorization_timeout_display() {
        let error = Error::AuthorizationTimeout;
        assert_eq!(
            error.to_string(),
            "Timed out waiting for the authorization callback"
        );
    }

    #[test]
    fn test_token_not_found_display() {
        let error = Error::TokenNotFound("https://api.example.com/mcp".to_string());
        assert!(error.to_string().contains("https://api.example.com/mcp"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let error: Error = io_error.into();
        assert!(matches!(error, Error::Io(_)));
    }

    #[test]
    fn test_json_error_conversion() {
        let json_str = "{invalid json}";
        let json_error = serde_json::from_str::<serde_json::Value>(json_str).unwrap_err();
        let error: Error = json_error.into();
        assert!(matches!(error, Error::Serialization(_)));
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Error>();
    }
}
