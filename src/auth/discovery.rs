//! OAuth 2.1 / OIDC metadata discovery
//!
//! This module implements RFC 9728 Protected Resource Metadata discovery
//! and RFC 8414 / OpenID Connect Discovery to locate authorization server
//! endpoints before running the authorization code flow.
//!
//! # Protected resource discovery sequence
//!
//! [`discover_protected_resource`] tries three strictly ordered steps and
//! stops at the first one that yields valid metadata:
//!
//! 1. **Direct**: `GET {origin}/.well-known/oauth-protected-resource`
//!    (the resource URL's path is discarded for this step).
//! 2. **401 challenge**: `GET` the resource URL itself; on a `401` with a
//!    `WWW-Authenticate` header, follow its `resource_metadata` URL.
//! 3. **Fallback paths**: probe the well-known path, its trailing-slash
//!    variant, and (for resources with a non-empty path) the
//!    path-suffixed variants.
//!
//! A later step runs only when every earlier step failed; exhaustion
//! surfaces one aggregate [`Error::Discovery`] naming the original URL.
//!
//! # Authorization server discovery
//!
//! [`discover_authorization_server`] tries the RFC 8414 and OIDC
//! Discovery well-known orderings for the issuer and validates each
//! candidate: both endpoints must be present and the server must
//! advertise PKCE `S256` support. PKCE is mandatory for this crate, so an
//! S256-less candidate counts as a failed candidate.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::auth::challenge;
use crate::auth::pkce;
use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// Protected Resource Metadata (RFC 9728)
// ---------------------------------------------------------------------------

/// Metadata document describing a protected OAuth 2.1 resource.
///
/// Retrieved from the well-known URI
/// `/.well-known/oauth-protected-resource[...]` or from the URL embedded
/// in a `WWW-Authenticate: Bearer resource_metadata=<url>` challenge
/// header. Produced fresh on every discovery call and never persisted.
///
/// # References
///
/// - RFC 9728 <https://www.rfc-editor.org/rfc/rfc9728>
///
/// # Examples
///
/// ```
/// use mcplink::auth::discovery::ProtectedResourceMetadata;
///
/// let json = r#"{
///     "resource": "https://api.example.com",
///     "authorization_servers": ["https://auth.example.com"]
/// }"#;
///
/// let meta: ProtectedResourceMetadata = serde_json::from_str(json).unwrap();
/// assert_eq!(meta.resource, "https://api.example.com");
/// assert_eq!(meta.authorization_servers.len(), 1);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ProtectedResourceMetadata {
    /// The URI of the protected resource itself.
    pub resource: String,

    /// Ordered list of authorization server issuer URIs protecting this
    /// resource. Discovery treats an empty list as invalid.
    pub authorization_servers: Vec<String>,

    /// OAuth scopes supported by this resource, if advertised.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scopes_supported: Option<Vec<String>>,
}

// ---------------------------------------------------------------------------
// Authorization Server Metadata (RFC 8414 / OIDC Discovery)
// ---------------------------------------------------------------------------

/// Metadata document describing an OAuth 2.1 / OIDC authorization server.
///
/// Retrieved from one of several well-known URIs tried in order by
/// [`discover_authorization_server`]. A document is only usable when its
/// `code_challenge_methods_supported` includes `"S256"`.
///
/// # References
///
/// - RFC 8414 <https://www.rfc-editor.org/rfc/rfc8414>
/// - OpenID Connect Discovery 1.0 <https://openid.net/specs/openid-connect-discovery-1_0.html>
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct AuthServerMetadata {
    /// The issuer identifier URI for this authorization server.
    pub issuer: String,

    /// The URL of the authorization endpoint (RFC 6749 section 3.1).
    pub authorization_endpoint: String,

    /// The URL of the token endpoint (RFC 6749 section 3.2).
    pub token_endpoint: String,

    /// Optional URL of the Dynamic Client Registration endpoint (RFC 7591).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registration_endpoint: Option<String>,

    /// List of OAuth scopes the server supports.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scopes_supported: Option<Vec<String>>,

    /// List of `response_type` values the server supports (e.g. `["code"]`).
    pub response_types_supported: Vec<String>,

    /// List of `grant_type` values the server supports.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grant_types_supported: Option<Vec<String>>,

    /// PKCE challenge methods the server supports. Must contain `"S256"`
    /// for the server to be usable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_challenge_methods_supported: Option<Vec<String>>,

    /// Additional server metadata fields not explicitly modelled above.
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

// ---------------------------------------------------------------------------
// Protected resource discovery
// ---------------------------------------------------------------------------

/// Resolves the protected resource metadata for `resource_url`.
///
/// Runs the three-step discovery sequence described in the module
/// documentation. Step ordering is strict and short-circuiting: success
/// at step *k* makes no request belonging to later steps.
///
/// # Arguments
///
/// * `http` - Shared [`reqwest::Client`] used for all discovery requests.
/// * `resource_url` - The base URL of the MCP resource server.
///
/// # Errors
///
/// Returns [`Error::Discovery`] naming `resource_url` when every step
/// fails to produce metadata with a non-empty `authorization_servers`
/// list.
///
/// # Examples
///
/// ```no_run
/// use url::Url;
/// use mcplink::auth::discovery::discover_protected_resource;
///
/// # async fn example() -> mcplink::error::Result<()> {
/// let http = reqwest::Client::new();
/// let resource = Url::parse("https://api.example.com/mcp")?;
/// let meta = discover_protected_resource(&http, &resource).await?;
/// println!("auth server: {}", meta.authorization_servers[0]);
/// # Ok(())
/// # }
/// ```
pub async fn discover_protected_resource(
    http: &reqwest::Client,
    resource_url: &Url,
) -> Result<ProtectedResourceMetadata> {
    // Step 1: the well-known URI at the resource origin, path discarded.
    if let Some(url) = origin_url(resource_url, "/.well-known/oauth-protected-resource") {
        if let Some(meta) = fetch_resource_metadata(http, url).await {
            return Ok(meta);
        }
    }

    // Step 2: probe the resource itself and follow a 401 challenge.
    if let Some(meta) = follow_challenge(http, resource_url).await {
        return Ok(meta);
    }

    // Step 3: fallback well-known paths at the origin.
    for path in fallback_paths(resource_url) {
        if let Some(url) = origin_url(resource_url, &path) {
            if let Some(meta) = fetch_resource_metadata(http, url).await {
                return Ok(meta);
            }
        }
    }

    Err(Error::Discovery(format!(
        "protected resource metadata not found for {resource_url}"
    ))
    .into())
}

/// Issues an unauthenticated `GET` to the resource URL and, when the
/// response is a `401` carrying a `WWW-Authenticate` header with a
/// `resource_metadata` URL, fetches that URL.
///
/// Any failure along the way (no header, no parameter, fetch failure,
/// invalid body) yields `None` so the caller falls through to the next
/// discovery step.
async fn follow_challenge(
    http: &reqwest::Client,
    resource_url: &Url,
) -> Option<ProtectedResourceMetadata> {
    let resp = http
        .get(resource_url.clone())
        .header("Accept", "application/json")
        .send()
        .await
        .ok()?;

    if resp.status() != reqwest::StatusCode::UNAUTHORIZED {
        return None;
    }

    let header = resp
        .headers()
        .get(reqwest::header::WWW_AUTHENTICATE)?
        .to_str()
        .ok()?;

    let meta_url_str = challenge::resource_metadata_url(header)?;
    let meta_url = Url::parse(&meta_url_str).ok()?;
    tracing::debug!(url = %meta_url, "following resource_metadata challenge URL");
    fetch_resource_metadata(http, meta_url).await
}

/// Builds the step-3 fallback well-known paths for a resource URL.
fn fallback_paths(resource_url: &Url) -> Vec<String> {
    let mut paths = vec![
        "/.well-known/oauth-protected-resource".to_string(),
        "/.well-known/oauth-protected-resource/".to_string(),
    ];

    let trimmed = resource_url.path().trim_matches('/');
    if !trimmed.is_empty() {
        paths.push(format!("/.well-known/oauth-protected-resource/{trimmed}"));
        paths.push(format!("/.well-known/oauth-protected-resource/{trimmed}/"));
    }
    paths
}

/// Fetches one candidate metadata URL, returning `Some` only for a
/// successful response whose body parses into a document with a
/// non-empty `authorization_servers` list.
async fn fetch_resource_metadata(
    http: &reqwest::Client,
    url: Url,
) -> Option<ProtectedResourceMetadata> {
    tracing::debug!(url = %url, "fetching protected resource metadata");
    let resp = http.get(url).send().await.ok()?;
    if !resp.status().is_success() {
        return None;
    }
    let meta: ProtectedResourceMetadata = resp.json().await.ok()?;
    if meta.authorization_servers.is_empty() {
        return None;
    }
    Some(meta)
}

// ---------------------------------------------------------------------------
// Authorization server discovery
// ---------------------------------------------------------------------------

/// Resolves the authorization server metadata for `issuer`.
///
/// Candidate endpoints are tried sequentially until one returns a
/// successful, parseable, valid body:
///
/// - issuers with a non-empty path component `P`:
///   1. `{origin}/.well-known/oauth-authorization-server/{P}`
///   2. `{origin}/.well-known/openid-configuration/{P}`
///   3. `{origin}/{P}/.well-known/openid-configuration`
/// - issuers without a path:
///   1. `{origin}/.well-known/oauth-authorization-server`
///   2. `{origin}/.well-known/openid-configuration`
///
/// A candidate whose metadata omits `"S256"` from
/// `code_challenge_methods_supported` is treated the same as a candidate
/// that failed to respond.
///
/// # Errors
///
/// Returns [`Error::Discovery`] naming the issuer when every candidate
/// fails.
///
/// # Examples
///
/// ```no_run
/// use url::Url;
/// use mcplink::auth::discovery::discover_authorization_server;
///
/// # async fn example() -> mcplink::error::Result<()> {
/// let http = reqwest::Client::new();
/// let issuer = Url::parse("https://auth.example.com")?;
/// let meta = discover_authorization_server(&http, &issuer).await?;
/// println!("token endpoint: {}", meta.token_endpoint);
/// # Ok(())
/// # }
/// ```
pub async fn discover_authorization_server(
    http: &reqwest::Client,
    issuer: &Url,
) -> Result<AuthServerMetadata> {
    for candidate in authorization_server_candidates(issuer) {
        tracing::debug!(url = %candidate, "fetching authorization server metadata");
        let resp = match http.get(candidate.clone()).send().await {
            Ok(r) => r,
            Err(_) => continue,
        };
        if !resp.status().is_success() {
            continue;
        }
        let meta = match resp.json::<AuthServerMetadata>().await {
            Ok(m) => m,
            Err(_) => continue,
        };
        if pkce::verify_s256_support(&meta).is_err() {
            tracing::debug!(url = %candidate, "candidate rejected: no PKCE S256 support");
            continue;
        }
        return Ok(meta);
    }

    Err(Error::Discovery(format!(
        "authorization server metadata not found for {issuer}"
    ))
    .into())
}

/// Builds the candidate well-known URLs for authorization server
/// discovery, in the order they must be tried.
fn authorization_server_candidates(issuer: &Url) -> Vec<Url> {
    let origin = issuer.origin().ascii_serialization();
    let path = issuer.path().trim_matches('/');

    let specs = if path.is_empty() {
        vec![
            format!("{origin}/.well-known/oauth-authorization-server"),
            format!("{origin}/.well-known/openid-configuration"),
        ]
    } else {
        vec![
            format!("{origin}/.well-known/oauth-authorization-server/{path}"),
            format!("{origin}/.well-known/openid-configuration/{path}"),
            format!("{origin}/{path}/.well-known/openid-configuration"),
        ]
    };

    specs.into_iter().filter_map(|s| Url::parse(&s).ok()).collect()
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

/// Resolves `path` against the origin of `base`, discarding the base
/// URL's own path, query, and fragment.
fn origin_url(base: &Url, path: &str) -> Option<Url> {
    let origin = base.origin().ascii_serialization();
    Url::parse(&format!("{origin}{path}")).ok()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
