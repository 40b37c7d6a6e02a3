//! Resource server configuration
//!
//! This module defines the configuration structures a manifest or
//! settings layer supplies for each MCP resource server, and the
//! fingerprint derivation used to key the connection pool.
//!
//! Configuration loading itself (file formats, variable substitution) is
//! the caller's concern; this crate only consumes the resolved values.
//! No template-expression evaluation happens here.

use std::collections::BTreeMap;

use base64::Engine as _;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;

/// Default per-request timeout for transport connections, in seconds.
const DEFAULT_TRANSPORT_TIMEOUT_SECS: u64 = 30;

fn default_transport_timeout() -> u64 {
    DEFAULT_TRANSPORT_TIMEOUT_SECS
}

fn default_true() -> bool {
    true
}

// ---------------------------------------------------------------------------
// OAuthSettings
// ---------------------------------------------------------------------------

/// OAuth settings for one resource server.
///
/// # Examples
///
/// ```
/// use mcplink::config::OAuthSettings;
///
/// let settings: OAuthSettings = serde_json::from_str(r#"{ "enabled": true }"#).unwrap();
/// assert!(settings.enabled);
/// assert!(settings.auto_register, "auto_register defaults to true");
/// assert!(settings.client_id.is_none());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthSettings {
    /// Whether OAuth authorization is enabled for this server.
    #[serde(default)]
    pub enabled: bool,

    /// Static client identifier. When set, dynamic client registration is
    /// skipped entirely.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,

    /// Static client secret for confidential clients. Only used together
    /// with `client_id`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,

    /// Fixed local TCP port for the authorization redirect callback.
    /// When absent, the OS assigns a free port.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect_port: Option<u16>,

    /// Space-separated OAuth scope string to request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,

    /// Whether to fall back to RFC 7591 dynamic client registration when
    /// no `client_id` is configured.
    #[serde(default = "default_true")]
    pub auto_register: bool,
}

impl Default for OAuthSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            client_id: None,
            client_secret: None,
            redirect_port: None,
            scope: None,
            auto_register: true,
        }
    }
}

// ---------------------------------------------------------------------------
// TransportParams
// ---------------------------------------------------------------------------

/// Transport parameters handed to the connection collaborator.
///
/// The header map uses a [`BTreeMap`] so that serialization is
/// deterministic; the pool fingerprint depends on it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportParams {
    /// Static extra headers merged into every request on the connection.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    /// Per-request timeout in seconds.
    #[serde(default = "default_transport_timeout")]
    pub timeout_secs: u64,
}

impl Default for TransportParams {
    fn default() -> Self {
        Self {
            headers: BTreeMap::new(),
            timeout_secs: DEFAULT_TRANSPORT_TIMEOUT_SECS,
        }
    }
}

// ---------------------------------------------------------------------------
// ServerConfig
// ---------------------------------------------------------------------------

/// Fully resolved configuration for one MCP resource server.
///
/// An instance of this struct is the "effective configuration" a
/// connection is built from. Two configurations that differ in any field
/// produce different [fingerprints](Self::fingerprint) and therefore
/// never share a pooled connection.
///
/// # Examples
///
/// ```
/// use mcplink::config::ServerConfig;
///
/// let json = r#"{
///     "id": "search",
///     "endpoint": "https://api.example.com/mcp",
///     "oauth": { "enabled": true }
/// }"#;
///
/// let config: ServerConfig = serde_json::from_str(json).unwrap();
/// assert_eq!(config.id, "search");
/// assert!(config.oauth.enabled);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Logical identity of the server (matches the manifest key).
    pub id: String,

    /// The resource server entry point URL.
    pub endpoint: Url,

    /// Transport parameters for the underlying connection.
    #[serde(default)]
    pub transport: TransportParams,

    /// OAuth settings for this server.
    #[serde(default)]
    pub oauth: OAuthSettings,
}

impl ServerConfig {
    /// Derives the pool fingerprint for this configuration.
    ///
    /// The fingerprint is a SHA-256 digest over the canonical JSON
    /// serialization of the *full* effective configuration: logical
    /// identity, endpoint, transport parameters, and OAuth settings.
    /// Keying the pool on this value (rather than the endpoint URL alone)
    /// guarantees that distinct configurations never share a connection.
    ///
    /// # Examples
    ///
    /// ```
    /// use mcplink::config::ServerConfig;
    ///
    /// let a: ServerConfig = serde_json::from_str(
    ///     r#"{ "id": "a", "endpoint": "https://api.example.com/mcp" }"#,
    /// ).unwrap();
    /// let mut b = a.clone();
    /// b.transport.timeout_secs = 60;
    ///
    /// assert_eq!(a.fingerprint(), a.fingerprint());
    /// assert_ne!(a.fingerprint(), b.fingerprint());
    /// ```
    pub fn fingerprint(&self) -> String {
        // Serialization of these plain data structs cannot fail.
        let canonical = serde_json::to_vec(self).expect("config serialization is infallible");
        let digest = Sha256::digest(&canonical);
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(digest.as_slice())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
