//! High-level OAuth 2.1 authorization manager
//!
//! This module coordinates discovery, client registration, the
//! authorization code flow, and token persistence into a single façade.
//! The connection pool's connect factories call
//! [`AuthManager::access_token`] whenever a fresh bearer token is needed,
//! then attach it to the transport with [`AuthManager::bearer_headers`].
//!
//! Token resolution order for one server:
//!
//! 1. Resolve the protected resource metadata and authorization server.
//! 2. Resolve the client identity: static configuration wins, then a
//!    previously registered identity found in the store, then RFC 7591
//!    dynamic registration when enabled.
//! 3. Return a cached, unexpired token when one exists.
//! 4. Refresh an expired token that carries a refresh token. A failed
//!    refresh removes the stale record and falls through.
//! 5. Run the full interactive authorization flow and persist the result.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use url::Url;

use crate::auth::discovery;
use crate::auth::flow::{BrowserOpener, OAuthFlow, SystemBrowser, DEFAULT_CALLBACK_TIMEOUT};
use crate::auth::registration;
use crate::auth::token_store::TokenStore;
use crate::config::ServerConfig;
use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// AuthManager
// ---------------------------------------------------------------------------

/// Coordinator for the OAuth 2.1 token lifecycle across resource servers.
///
/// Owns a shared HTTP client, the token store, and the browser
/// collaborator. One `AuthManager` serves any number of resource servers;
/// per-server parameters arrive with each [`ServerConfig`].
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use tokio::sync::Mutex;
/// use mcplink::auth::manager::AuthManager;
/// use mcplink::auth::token_store::TokenStore;
/// use mcplink::config::ServerConfig;
///
/// # async fn example() -> mcplink::error::Result<()> {
/// let mut store = TokenStore::new(TokenStore::default_path()?);
/// store.load()?;
///
/// let manager = AuthManager::new(
///     Arc::new(reqwest::Client::new()),
///     Arc::new(Mutex::new(store)),
///     "My MCP Client",
/// );
///
/// let config: ServerConfig = serde_json::from_str(r#"{
///     "id": "search",
///     "endpoint": "https://api.example.com/mcp",
///     "oauth": { "enabled": true }
/// }"#)?;
///
/// let token = manager.access_token(&config).await?;
/// let headers = AuthManager::bearer_headers(&token);
/// # Ok(())
/// # }
/// ```
pub struct AuthManager {
    /// Shared HTTP client for all discovery and token requests.
    http: Arc<reqwest::Client>,

    /// The persisted token store.
    store: Arc<Mutex<TokenStore>>,

    /// Client name sent during dynamic registration.
    client_name: String,

    /// Browser collaborator for the interactive flow.
    browser: Arc<dyn BrowserOpener>,

    /// Wait window for the authorization callback.
    callback_timeout: Duration,
}

impl AuthManager {
    /// Creates a new manager.
    ///
    /// # Arguments
    ///
    /// * `http` - Shared HTTP client.
    /// * `store` - Token store, already loaded by the caller.
    /// * `client_name` - Name presented during dynamic registration.
    pub fn new(
        http: Arc<reqwest::Client>,
        store: Arc<Mutex<TokenStore>>,
        client_name: impl Into<String>,
    ) -> Self {
        Self {
            http,
            store,
            client_name: client_name.into(),
            browser: Arc::new(SystemBrowser),
            callback_timeout: DEFAULT_CALLBACK_TIMEOUT,
        }
    }

    /// Replaces the browser collaborator. Tests inject a recording fake.
    pub fn with_browser(mut self, browser: Arc<dyn BrowserOpener>) -> Self {
        self.browser = browser;
        self
    }

    /// Overrides the authorization callback wait window.
    pub fn with_callback_timeout(mut self, timeout: Duration) -> Self {
        self.callback_timeout = timeout;
        self
    }

    /// Returns a valid access token for the server described by `config`,
    /// driving discovery, registration, refresh, or the full interactive
    /// flow as needed.
    ///
    /// # Errors
    ///
    /// - [`Error::Discovery`] when metadata discovery fails.
    /// - [`Error::Registration`] when dynamic registration fails.
    /// - [`Error::Authorization`] when no client identity can be
    ///   resolved, or the interactive flow fails.
    /// - [`Error::AuthorizationTimeout`] when no callback arrives.
    /// - [`Error::TokenExchange`] when the code exchange fails.
    pub async fn access_token(&self, config: &ServerConfig) -> Result<String> {
        let resource = config.endpoint.as_str().to_string();

        // Step 1: discovery chain.
        let resource_meta =
            discovery::discover_protected_resource(&self.http, &config.endpoint).await?;
        // Discovery rejects documents with an empty server list.
        let issuer = resource_meta.authorization_servers[0].clone();
        let issuer_url = Url::parse(&issuer)
            .map_err(|e| Error::Discovery(format!("invalid authorization server URL {issuer}: {e}")))?;
        let server = discovery::discover_authorization_server(&self.http, &issuer_url).await?;

        // Step 2: client identity.
        let client_id = self.resolve_client_id(config, &resource, &issuer, &server).await?;

        // Step 3: cached, unexpired token.
        {
            let store = self.store.lock().await;
            if let Some(record) = store.get(&resource, &client_id, &issuer) {
                tracing::debug!(server = %config.id, "using cached access token");
                return Ok(record.access_token.clone());
            }
        }

        let flow = OAuthFlow::new(
            Arc::clone(&self.http),
            config.endpoint.clone(),
            config.oauth.redirect_port.unwrap_or(0),
        )
        .with_client_secret(config.oauth.client_secret.clone())
        .with_browser(Arc::clone(&self.browser))
        .with_callback_timeout(self.callback_timeout);

        // Step 4: refresh an expired record that carries a refresh token.
        let stale = {
            let store = self.store.lock().await;
            store
                .records()
                .find(|r| {
                    r.resource == resource
                        && r.client_id == client_id
                        && r.authorization_server == issuer
                })
                .cloned()
        };
        if let Some(record) = stale {
            if let Some(ref refresh_token) = record.refresh_token {
                match flow
                    .refresh(&server.token_endpoint, refresh_token, &client_id)
                    .await
                {
                    Ok(response) => {
                        let mut store = self.store.lock().await;
                        store.update(&resource, &client_id, &issuer, &response)?;
                        tracing::debug!(server = %config.id, "refreshed access token");
                        return Ok(response.access_token);
                    }
                    Err(e) => {
                        tracing::warn!(
                            server = %config.id,
                            error = %e,
                            "token refresh failed; re-authorizing"
                        );
                        let mut store = self.store.lock().await;
                        store.remove(&resource, &client_id, &issuer)?;
                    }
                }
            } else {
                // Expired with no refresh token: drop it before re-authorizing.
                let mut store = self.store.lock().await;
                store.remove(&resource, &client_id, &issuer)?;
            }
        }

        // Step 5: full interactive authorization.
        let response = flow
            .authorize(&server, &client_id, config.oauth.scope.as_deref())
            .await?;
        let access_token = response.access_token.clone();
        {
            let mut store = self.store.lock().await;
            store.store(&response, &resource, &client_id, &issuer)?;
        }
        tracing::info!(server = %config.id, "authorization complete");
        Ok(access_token)
    }

    /// Builds the header map carrying `Authorization: Bearer <token>` for
    /// the transport collaborator.
    ///
    /// # Examples
    ///
    /// ```
    /// use mcplink::auth::manager::AuthManager;
    ///
    /// let headers = AuthManager::bearer_headers("my_access_token");
    /// assert_eq!(
    ///     headers.get("Authorization"),
    ///     Some(&"Bearer my_access_token".to_string()),
    /// );
    /// ```
    pub fn bearer_headers(token: &str) -> HashMap<String, String> {
        let mut headers = HashMap::new();
        headers.insert("Authorization".to_string(), format!("Bearer {token}"));
        headers
    }

    // -----------------------------------------------------------------------
    // Private helpers
    // -----------------------------------------------------------------------

    /// Resolves the client identifier for one server.
    ///
    /// Priority: static configuration, then a previously registered
    /// identity found in the token store, then dynamic registration.
    async fn resolve_client_id(
        &self,
        config: &ServerConfig,
        resource: &str,
        issuer: &str,
        server: &discovery::AuthServerMetadata,
    ) -> Result<String> {
        if let Some(ref client_id) = config.oauth.client_id {
            return Ok(client_id.clone());
        }

        {
            let store = self.store.lock().await;
            if let Some(record) = store
                .records()
                .find(|r| r.resource == resource && r.authorization_server == issuer)
            {
                return Ok(record.client_id.clone());
            }
        }

        if !config.oauth.auto_register {
            return Err(Error::Authorization(
                "no client_id configured and auto-registration is disabled".to_string(),
            )
            .into());
        }
        let registration_endpoint = server.registration_endpoint.as_deref().ok_or_else(|| {
            Error::Authorization(format!(
                "authorization server {} offers no registration endpoint",
                server.issuer
            ))
        })?;

        let redirect_uri = format!(
            "http://127.0.0.1:{}/callback",
            config.oauth.redirect_port.unwrap_or(0)
        );
        let credentials = registration::register_client(
            &self.http,
            registration_endpoint,
            &self.client_name,
            &[redirect_uri],
            &serde_json::Map::new(),
        )
        .await?;
        tracing::info!(
            server = %config.id,
            client_id = %credentials.client_id,
            "registered OAuth client"
        );
        Ok(credentials.client_id)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
