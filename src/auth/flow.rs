//! OAuth 2.1 authorization code flow with PKCE
//!
//! This module drives the browser-based OAuth 2.1 authorization code flow
//! with PKCE (RFC 7636) and resource indicators (RFC 8707) against a
//! discovered authorization server.
//!
//! # Flow overview
//!
//! 1. Verify the authorization server supports PKCE S256.
//! 2. Generate a PKCE pair and a random `state` value.
//! 3. Bind a local TCP listener for the redirect callback.
//! 4. Build the authorization URL and hand it to the browser collaborator.
//! 5. Accept the callback, validate `state`, extract the code.
//! 6. Exchange the code for tokens at the token endpoint.
//!
//! The callback listener is single-flight by design: one authorization
//! attempt at a time, bound to a fixed or OS-assigned port. It fails with
//! [`Error::AuthorizationTimeout`] when no callback arrives within the
//! wait window, and with [`Error::Authorization`] on state mismatch, a
//! reported OAuth error, or a missing authorization code.

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Write};
use std::sync::Arc;
use std::time::Duration;

use base64::Engine as _;
use url::Url;

use crate::auth::discovery::AuthServerMetadata;
use crate::auth::pkce;
use crate::error::{Error, Result};

/// How long to wait for the authorization redirect before giving up.
pub const DEFAULT_CALLBACK_TIMEOUT: Duration = Duration::from_secs(300);

// ---------------------------------------------------------------------------
// BrowserOpener
// ---------------------------------------------------------------------------

/// Collaborator that opens a URL with the user's default handler.
///
/// Implementations must be best-effort and non-blocking: a browser that
/// fails to launch is not an error, because the URL is also logged for
/// manual use.
pub trait BrowserOpener: Send + Sync {
    /// Open `url` with the OS default handler. Failures are ignored.
    fn open(&self, url: &str);
}

/// Default [`BrowserOpener`] shelling out to the platform launcher.
#[derive(Debug, Default)]
pub struct SystemBrowser;

impl BrowserOpener for SystemBrowser {
    fn open(&self, url: &str) {
        #[cfg(target_os = "macos")]
        {
            let _ = std::process::Command::new("open").arg(url).spawn();
        }
        #[cfg(target_os = "linux")]
        {
            let _ = std::process::Command::new("xdg-open").arg(url).spawn();
        }
        #[cfg(not(any(target_os = "macos", target_os = "linux")))]
        {
            // The user copies the URL from the log output instead.
            let _ = url;
        }
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// Raw JSON response from an OAuth token endpoint (RFC 6749 section 5.1).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct TokenResponse {
    /// The access token string issued by the authorization server.
    pub access_token: String,

    /// The token type, typically `"Bearer"`.
    pub token_type: String,

    /// Lifetime of the access token in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,

    /// Refresh token for obtaining a new access token later.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    /// Space-separated scopes granted by the authorization server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

/// An authorization URL paired with the `state` value embedded in it.
///
/// Exists only for the duration of one authorization attempt and is
/// never persisted.
#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    /// The fully assembled authorization endpoint URL.
    pub url: String,

    /// The random `state` nonce carried by the URL, to be matched against
    /// the callback.
    pub state: String,
}

// ---------------------------------------------------------------------------
// OAuthFlow
// ---------------------------------------------------------------------------

/// Drives the OAuth 2.1 authorization code flow with PKCE for one
/// resource server.
///
/// An `OAuthFlow` is bound to a resource URL (used as the RFC 8707
/// `resource` indicator on every token request) and is reused across
/// authorization attempts. Token persistence is the caller's concern.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use url::Url;
/// use mcplink::auth::flow::OAuthFlow;
///
/// let flow = OAuthFlow::new(
///     Arc::new(reqwest::Client::new()),
///     Url::parse("https://api.example.com/mcp").unwrap(),
///     0,
/// );
/// let request = flow
///     .build_authorization_request(
///         "https://auth.example.com/authorize",
///         "my-client",
///         "http://127.0.0.1:7777/callback",
///         "challenge",
///         None,
///     )
///     .unwrap();
/// assert!(request.url.contains("response_type=code"));
/// ```
pub struct OAuthFlow {
    http: Arc<reqwest::Client>,
    resource: Url,
    redirect_port: u16,
    client_secret: Option<String>,
    browser: Arc<dyn BrowserOpener>,
    callback_timeout: Duration,
}

impl OAuthFlow {
    /// Creates a new flow for `resource`.
    ///
    /// `redirect_port` is the local TCP port bound for the redirect
    /// callback; `0` lets the OS assign a free port.
    pub fn new(http: Arc<reqwest::Client>, resource: Url, redirect_port: u16) -> Self {
        Self {
            http,
            resource,
            redirect_port,
            client_secret: None,
            browser: Arc::new(SystemBrowser),
            callback_timeout: DEFAULT_CALLBACK_TIMEOUT,
        }
    }

    /// Sets the client secret sent on token requests (confidential
    /// clients only).
    pub fn with_client_secret(mut self, secret: Option<String>) -> Self {
        self.client_secret = secret;
        self
    }

    /// Replaces the browser collaborator. Tests inject a recording fake.
    pub fn with_browser(mut self, browser: Arc<dyn BrowserOpener>) -> Self {
        self.browser = browser;
        self
    }

    /// Overrides the callback wait window.
    pub fn with_callback_timeout(mut self, timeout: Duration) -> Self {
        self.callback_timeout = timeout;
        self
    }

    /// Builds the authorization URL for one attempt.
    ///
    /// The returned URL carries `response_type=code`, `client_id`,
    /// `redirect_uri`, a fresh random `state`, `code_challenge`,
    /// `code_challenge_method=S256`, the RFC 8707 `resource` indicator,
    /// and `scope` only when provided.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Authorization`] when `authorization_endpoint` is
    /// not a valid URL.
    pub fn build_authorization_request(
        &self,
        authorization_endpoint: &str,
        client_id: &str,
        redirect_uri: &str,
        code_challenge: &str,
        scope: Option<&str>,
    ) -> Result<AuthorizationRequest> {
        let mut url = Url::parse(authorization_endpoint).map_err(|e| {
            Error::Authorization(format!("invalid authorization endpoint URL: {e}"))
        })?;

        let state = generate_state();
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("response_type", "code");
            query.append_pair("client_id", client_id);
            query.append_pair("redirect_uri", redirect_uri);
            query.append_pair("state", &state);
            query.append_pair("code_challenge", code_challenge);
            query.append_pair("code_challenge_method", "S256");
            query.append_pair("resource", self.resource.as_str());
            if let Some(s) = scope {
                query.append_pair("scope", s);
            }
        }

        Ok(AuthorizationRequest {
            url: url.to_string(),
            state,
        })
    }

    /// Exchanges an authorization code for tokens at the token endpoint.
    ///
    /// POSTs a form-encoded body with `grant_type=authorization_code`,
    /// the code, verifier, client identity, redirect URI, and the
    /// `resource` indicator.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TokenExchange`] carrying the status and body on a
    /// non-2xx response.
    pub async fn exchange_code(
        &self,
        token_endpoint: &str,
        code: &str,
        code_verifier: &str,
        client_id: &str,
        redirect_uri: &str,
    ) -> Result<TokenResponse> {
        let mut params = vec![
            ("grant_type", "authorization_code"),
            ("code", code),
            ("code_verifier", code_verifier),
            ("client_id", client_id),
            ("redirect_uri", redirect_uri),
            ("resource", self.resource.as_str()),
        ];
        if let Some(ref secret) = self.client_secret {
            params.push(("client_secret", secret));
        }

        let resp = self.http.post(token_endpoint).form(&params).send().await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::TokenExchange {
                status: status.as_u16(),
                body,
            }
            .into());
        }

        let token: TokenResponse = resp.json().await.map_err(Error::Http)?;
        Ok(token)
    }

    /// Exchanges a refresh token for a new access token.
    ///
    /// POSTs a form-encoded body with `grant_type=refresh_token`, the
    /// refresh token, client identity, and the `resource` indicator. The
    /// previously granted scope is preserved by the server.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TokenRefresh`] carrying the status and body on a
    /// non-2xx response.
    pub async fn refresh(
        &self,
        token_endpoint: &str,
        refresh_token: &str,
        client_id: &str,
    ) -> Result<TokenResponse> {
        let mut params = vec![
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", client_id),
            ("resource", self.resource.as_str()),
        ];
        if let Some(ref secret) = self.client_secret {
            params.push(("client_secret", secret));
        }

        let resp = self.http.post(token_endpoint).form(&params).send().await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::TokenRefresh {
                status: status.as_u16(),
                body,
            }
            .into());
        }

        let token: TokenResponse = resp.json().await.map_err(Error::Http)?;
        Ok(token)
    }

    /// Runs the full interactive authorization code flow.
    ///
    /// Binds the local callback listener, opens the authorization URL in
    /// the browser (best-effort), waits for the redirect, validates it,
    /// and exchanges the code for tokens.
    ///
    /// # Errors
    ///
    /// - [`Error::Discovery`] when the server does not support PKCE S256.
    /// - [`Error::AuthorizationTimeout`] when no callback arrives within
    ///   the wait window.
    /// - [`Error::Authorization`] on state mismatch, a reported OAuth
    ///   error, or a missing code.
    /// - [`Error::TokenExchange`] when the code exchange fails.
    pub async fn authorize(
        &self,
        server: &AuthServerMetadata,
        client_id: &str,
        scope: Option<&str>,
    ) -> Result<TokenResponse> {
        pkce::verify_s256_support(server)?;

        let pair = pkce::generate()?;

        let listener =
            tokio::net::TcpListener::bind(("127.0.0.1", self.redirect_port))
                .await
                .map_err(|e| {
                    Error::Authorization(format!("failed to bind redirect listener: {e}"))
                })?;
        let port = listener
            .local_addr()
            .map_err(|e| Error::Authorization(format!("failed to read local address: {e}")))?
            .port();
        let redirect_uri = format!("http://127.0.0.1:{port}/callback");

        let request = self.build_authorization_request(
            &server.authorization_endpoint,
            client_id,
            &redirect_uri,
            &pair.challenge,
            scope,
        )?;

        tracing::info!(url = %request.url, "waiting for authorization in the browser");
        self.browser.open(&request.url);

        let code = tokio::time::timeout(
            self.callback_timeout,
            wait_for_callback(listener, request.state.clone()),
        )
        .await
        .map_err(|_| Error::AuthorizationTimeout)??;

        self.exchange_code(
            &server.token_endpoint,
            &code,
            &pair.verifier,
            client_id,
            &redirect_uri,
        )
        .await
    }
}

// ---------------------------------------------------------------------------
// Callback handling
// ---------------------------------------------------------------------------

/// Accepts a single connection on the callback listener and extracts the
/// authorization code from it.
async fn wait_for_callback(listener: tokio::net::TcpListener, expected_state: String) -> Result<String> {
    let (stream, _peer) = listener.accept().await.map_err(|e| {
        Error::Authorization(format!("failed to accept authorization callback: {e}"))
    })?;

    tokio::task::spawn_blocking(move || handle_callback_request(stream, &expected_state))
        .await
        .map_err(|e| Error::Authorization(format!("callback task panicked: {e}")))?
}

/// Parses the callback HTTP request, validates it, and writes a minimal
/// HTML response before returning the authorization code.
fn handle_callback_request(
    stream: tokio::net::TcpStream,
    expected_state: &str,
) -> Result<String> {
    let std_stream = stream
        .into_std()
        .map_err(|e| Error::Authorization(format!("stream conversion failed: {e}")))?;
    std_stream
        .set_nonblocking(false)
        .map_err(|e| Error::Authorization(format!("stream mode change failed: {e}")))?;

    let mut write_stream = std_stream
        .try_clone()
        .map_err(|e| Error::Authorization(format!("stream clone failed: {e}")))?;

    let reader = BufReader::new(std_stream);
    let mut request_line = String::new();
    for line in reader.lines() {
        let line =
            line.map_err(|e| Error::Authorization(format!("failed to read callback: {e}")))?;
        // HTTP headers end at the first empty line.
        if line.is_empty() {
            break;
        }
        if request_line.is_empty() {
            request_line = line;
        }
    }

    // Request line: "GET /callback?code=...&state=... HTTP/1.1"
    let path = request_line.split_whitespace().nth(1).unwrap_or("/");
    let query_string = path.split_once('?').map(|x| x.1).unwrap_or("");
    let params = parse_query_string(query_string);

    let outcome = evaluate_callback(&params, expected_state);

    let body = match &outcome {
        Ok(_) => {
            "<html><body><h2>Authorization complete</h2>\
             <p>You may close this tab and return to the application.</p></body></html>"
        }
        Err(_) => {
            "<html><body><h2>Authorization failed</h2>\
             <p>You may close this tab. Check the application output for details.</p></body></html>"
        }
    };
    let response = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    );
    let _ = write_stream.write_all(response.as_bytes());

    outcome
}

/// Applies the callback validation rules to the parsed query parameters.
fn evaluate_callback(params: &HashMap<String, String>, expected_state: &str) -> Result<String> {
    if let Some(error) = params.get("error") {
        let detail = params
            .get("error_description")
            .map(|d| format!(": {d}"))
            .unwrap_or_default();
        return Err(Error::Authorization(format!(
            "authorization server returned {error}{detail}"
        ))
        .into());
    }

    match params.get("state") {
        Some(state) if state == expected_state => {}
        _ => {
            return Err(
                Error::Authorization("state mismatch in authorization callback".to_string())
                    .into(),
            )
        }
    }

    params
        .get("code")
        .cloned()
        .ok_or_else(|| {
            Error::Authorization("authorization code missing from callback".to_string()).into()
        })
}

// ---------------------------------------------------------------------------
// Utility functions
// ---------------------------------------------------------------------------

/// Generates a cryptographically random state nonce: 16 random bytes
/// encoded as base64url without padding.
fn generate_state() -> String {
    use rand::RngCore as _;
    let mut bytes = [0u8; 16];
    rand::rng().fill_bytes(&mut bytes);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

/// Parses a URL query string into a key-value map.
///
/// Values are percent-decoded. Duplicate keys are overwritten by the last
/// occurrence.
fn parse_query_string(query: &str) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for pair in query.split('&') {
        let mut iter = pair.splitn(2, '=');
        let key = iter.next().unwrap_or("").to_string();
        let value = iter.next().unwrap_or("").to_string();
        if !key.is_empty() {
            map.insert(key, percent_decode(&value));
        }
    }
    map
}

/// Performs minimal percent-decoding of a query parameter value:
/// `+` becomes a space and `%XX` sequences become the corresponding byte.
fn percent_decode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let bytes = s.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'+' {
            out.push(' ');
            i += 1;
        } else if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let Ok(hex) = std::str::from_utf8(&bytes[i + 1..i + 3]) {
                if let Ok(byte) = u8::from_str_radix(hex, 16) {
                    out.push(byte as char);
                    i += 3;
                    continue;
                }
            }
            out.push(bytes[i] as char);
            i += 1;
        } else {
            out.push(bytes[i] as char);
            i += 1;
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
