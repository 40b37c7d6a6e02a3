//! Auth manager integration tests using wiremock
//!
//! Drives `src/auth/manager.rs` through the complete resolution chain:
//! protected-resource discovery, authorization-server discovery, dynamic
//! client registration, the interactive flow against an in-process
//! callback, token persistence, and the refresh/re-authorization paths.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use mcplink::auth::flow::{BrowserOpener, TokenResponse};
use mcplink::auth::manager::AuthManager;
use mcplink::auth::token_store::TokenStore;
use mcplink::config::ServerConfig;
use mcplink::error::Error;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

struct ChannelBrowser {
    tx: tokio::sync::mpsc::UnboundedSender<String>,
}

impl BrowserOpener for ChannelBrowser {
    fn open(&self, url: &str) {
        let _ = self.tx.send(url.to_string());
    }
}

struct NoopBrowser;

impl BrowserOpener for NoopBrowser {
    fn open(&self, _url: &str) {}
}

/// Mounts protected-resource and authorization-server metadata documents
/// on the mock server, with the mock server acting as both resource and
/// authorization server.
async fn mount_discovery(server: &MockServer, with_registration: bool) {
    let base_url = server.uri();

    Mock::given(method("GET"))
        .and(path("/.well-known/oauth-protected-resource"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "resource": format!("{}/mcp", base_url),
            "authorization_servers": [base_url]
        })))
        .mount(server)
        .await;

    let mut metadata = serde_json::json!({
        "issuer": base_url,
        "authorization_endpoint": format!("{}/authorize", base_url),
        "token_endpoint": format!("{}/token", base_url),
        "response_types_supported": ["code"],
        "code_challenge_methods_supported": ["S256"]
    });
    if with_registration {
        metadata["registration_endpoint"] = serde_json::json!(format!("{}/register", base_url));
    }

    Mock::given(method("GET"))
        .and(path("/.well-known/oauth-authorization-server"))
        .respond_with(ResponseTemplate::new(200).set_body_json(metadata))
        .mount(server)
        .await;
}

/// Builds a server config whose endpoint points at the mock server.
fn make_config(base_url: &str, client_id: Option<&str>) -> ServerConfig {
    serde_json::from_value(serde_json::json!({
        "id": "test_server",
        "endpoint": format!("{}/mcp", base_url),
        "oauth": {
            "enabled": true,
            "client_id": client_id,
        }
    }))
    .expect("config must deserialize")
}

/// Builds a manager over a fresh temp-file store, returning both.
fn make_manager(dir: &tempfile::TempDir) -> (AuthManager, Arc<Mutex<TokenStore>>) {
    let store = Arc::new(Mutex::new(TokenStore::new(dir.path().join("tokens.json"))));
    let manager = AuthManager::new(
        Arc::new(reqwest::Client::new()),
        Arc::clone(&store),
        "Mcplink Tests",
    );
    (manager, store)
}

fn token_response(access_token: &str, refresh_token: Option<&str>, expires_in: Option<u64>) -> TokenResponse {
    TokenResponse {
        access_token: access_token.to_string(),
        token_type: "Bearer".to_string(),
        expires_in,
        refresh_token: refresh_token.map(str::to_string),
        scope: None,
    }
}

// ---------------------------------------------------------------------------
// Cached token path
// ---------------------------------------------------------------------------

/// A fresh cached token is returned without touching the token endpoint.
#[tokio::test]
async fn test_cached_token_is_returned_without_token_request() {
    let server = MockServer::start().await;
    mount_discovery(&server, false).await;

    let dir = tempfile::tempdir().expect("temp dir");
    let (manager, store) = make_manager(&dir);
    let config = make_config(&server.uri(), Some("static-client"));

    // Seed the store under the exact key the manager will look up.
    let resource = config.endpoint.as_str().to_string();
    store
        .lock()
        .await
        .store(
            &token_response("cached_token", None, Some(3600)),
            &resource,
            "static-client",
            &server.uri(),
        )
        .expect("seed store");

    let token = manager
        .access_token(&config)
        .await
        .expect("cached token must be returned");
    assert_eq!(token, "cached_token");
}

// ---------------------------------------------------------------------------
// Refresh path
// ---------------------------------------------------------------------------

/// An expired record with a refresh token is refreshed in place; the
/// rotated refresh token is persisted.
#[tokio::test]
async fn test_expired_token_is_refreshed_and_updated() {
    let server = MockServer::start().await;
    mount_discovery(&server, false).await;

    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .and(body_string_contains("refresh_token=old_refresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "refreshed_access",
            "token_type": "Bearer",
            "expires_in": 3600,
            "refresh_token": "rotated_refresh"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().expect("temp dir");
    let (manager, store) = make_manager(&dir);
    let config = make_config(&server.uri(), Some("static-client"));
    let resource = config.endpoint.as_str().to_string();

    store
        .lock()
        .await
        .store(
            &token_response("stale_access", Some("old_refresh"), Some(0)),
            &resource,
            "static-client",
            &server.uri(),
        )
        .expect("seed store");

    let token = manager
        .access_token(&config)
        .await
        .expect("refresh must succeed");
    assert_eq!(token, "refreshed_access");

    let store = store.lock().await;
    let record = store
        .get(&resource, "static-client", &server.uri())
        .expect("refreshed record must be fresh");
    assert_eq!(record.access_token, "refreshed_access");
    assert_eq!(record.refresh_token.as_deref(), Some("rotated_refresh"));
}

/// A failed refresh removes the stale record and falls through to the
/// full flow; with no callback arriving, the attempt times out.
#[tokio::test]
async fn test_failed_refresh_removes_record_and_reauthorizes() {
    let server = MockServer::start().await;
    mount_discovery(&server, false).await;

    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .respond_with(ResponseTemplate::new(400).set_body_string(r#"{"error":"invalid_grant"}"#))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().expect("temp dir");
    let (manager, store) = make_manager(&dir);
    let manager = manager
        .with_browser(Arc::new(NoopBrowser))
        .with_callback_timeout(Duration::from_millis(100));
    let config = make_config(&server.uri(), Some("static-client"));
    let resource = config.endpoint.as_str().to_string();

    store
        .lock()
        .await
        .store(
            &token_response("stale_access", Some("dead_refresh"), Some(0)),
            &resource,
            "static-client",
            &server.uri(),
        )
        .expect("seed store");

    let err = manager
        .access_token(&config)
        .await
        .expect_err("full flow must time out with no callback");
    assert!(
        matches!(err.downcast_ref::<Error>(), Some(Error::AuthorizationTimeout)),
        "expected AuthorizationTimeout after failed refresh, got: {err}"
    );

    let store = store.lock().await;
    assert_eq!(
        store.records().count(),
        0,
        "failed refresh must remove the stale record"
    );
}

// ---------------------------------------------------------------------------
// Full chain with dynamic registration
// ---------------------------------------------------------------------------

/// With no static client, the manager registers dynamically, runs the
/// interactive flow, and persists the resulting token under the
/// registered client identity.
#[tokio::test]
async fn test_full_chain_with_dynamic_registration() {
    let server = MockServer::start().await;
    mount_discovery(&server, true).await;

    Mock::given(method("POST"))
        .and(path("/register"))
        .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
            "client_id": "registered-client"
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=authorization_code"))
        .and(body_string_contains("client_id=registered-client"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "brand_new_token",
            "token_type": "Bearer",
            "expires_in": 3600,
            "refresh_token": "brand_new_refresh"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().expect("temp dir");
    let (manager, store) = make_manager(&dir);
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let manager = manager
        .with_browser(Arc::new(ChannelBrowser { tx }))
        .with_callback_timeout(Duration::from_secs(5));
    let config = make_config(&server.uri(), None);
    let resource = config.endpoint.as_str().to_string();

    // Play the browser: complete the redirect with the issued state.
    let redirect_task = tokio::spawn(async move {
        let auth_url = rx.recv().await.expect("authorization URL must arrive");
        let params: HashMap<String, String> = url::Url::parse(&auth_url)
            .expect("authorization URL must parse")
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert_eq!(params["client_id"], "registered-client");

        let callback = format!(
            "{}?code=granted_code&state={}",
            params["redirect_uri"], params["state"]
        );
        let resp = reqwest::get(&callback).await.expect("callback must connect");
        assert!(resp.status().is_success());
    });

    let token = manager
        .access_token(&config)
        .await
        .expect("full chain must succeed");
    assert_eq!(token, "brand_new_token");
    redirect_task.await.expect("redirect task must not panic");

    let store = store.lock().await;
    let record = store
        .get(&resource, "registered-client", &server.uri())
        .expect("token must be persisted under the registered client");
    assert_eq!(record.refresh_token.as_deref(), Some("brand_new_refresh"));
}

/// With registration disabled and no static client, the attempt fails
/// before any interactive step.
#[tokio::test]
async fn test_missing_client_identity_fails_cleanly() {
    let server = MockServer::start().await;
    mount_discovery(&server, true).await;

    let dir = tempfile::tempdir().expect("temp dir");
    let (manager, _store) = make_manager(&dir);
    let manager = manager.with_browser(Arc::new(NoopBrowser));

    let config: ServerConfig = serde_json::from_value(serde_json::json!({
        "id": "test_server",
        "endpoint": format!("{}/mcp", server.uri()),
        "oauth": { "enabled": true, "auto_register": false }
    }))
    .expect("config must deserialize");

    let err = manager
        .access_token(&config)
        .await
        .expect_err("no client identity must fail");
    assert!(
        err.to_string().contains("auto-registration is disabled"),
        "got: {err}"
    );
}
