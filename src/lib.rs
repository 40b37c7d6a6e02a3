//! mcplink - OAuth 2.1 client engine and connection cache for MCP servers
//!
//! This library lets a client obtain and maintain OAuth 2.1 access to a
//! remote MCP resource server with minimal prior configuration, then
//! reuse authenticated connections efficiently.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//!
//! - `auth`: metadata discovery, challenge parsing, client registration,
//!   the PKCE authorization code flow, and token persistence
//! - `pool`: the fingerprint-keyed connection cache with idle eviction
//! - `connection`: the transport collaborator interface the pool manages
//! - `config`: resolved per-server configuration and fingerprinting
//! - `error`: error types and result aliases
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use tokio::sync::Mutex;
//! use mcplink::{AuthManager, ConnectionPool, ServerConfig, TokenStore};
//! use mcplink::pool::DEFAULT_IDLE_TIMEOUT;
//!
//! # async fn open_transport(
//! #     _endpoint: &url::Url,
//! #     _headers: std::collections::HashMap<String, String>,
//! # ) -> mcplink::Result<Arc<dyn mcplink::Connection>> { unimplemented!() }
//! #
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut store = TokenStore::new(TokenStore::default_path()?);
//!     store.load()?;
//!
//!     let http = Arc::new(reqwest::Client::new());
//!     let auth = Arc::new(AuthManager::new(http, Arc::new(Mutex::new(store)), "My Client"));
//!     let pool = ConnectionPool::new(DEFAULT_IDLE_TIMEOUT);
//!
//!     let config: ServerConfig = serde_json::from_str(r#"{
//!         "id": "search",
//!         "endpoint": "https://api.example.com/mcp",
//!         "oauth": { "enabled": true }
//!     }"#)?;
//!
//!     let auth_for_connect = Arc::clone(&auth);
//!     let handle = pool
//!         .get_or_create(&config.fingerprint(), || async move {
//!             let token = auth_for_connect.access_token(&config).await?;
//!             let headers = AuthManager::bearer_headers(&token);
//!             open_transport(&config.endpoint, headers).await
//!         })
//!         .await?;
//!     # let _ = handle;
//!
//!     pool.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod config;
pub mod connection;
pub mod error;
pub mod pool;

// Re-export commonly used types
pub use auth::manager::AuthManager;
pub use auth::token_store::TokenStore;
pub use config::{OAuthSettings, ServerConfig};
pub use connection::Connection;
pub use error::{Error, Result};
pub use pool::ConnectionPool;
