//! RFC 7591 dynamic client registration
//!
//! Registers this client with an authorization server at runtime,
//! yielding a client identifier without pre-provisioning. The request
//! body starts from a fixed set of public-client defaults and merges in
//! caller-supplied overrides, which win on key conflict.

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// ClientCredentials
// ---------------------------------------------------------------------------

/// Credentials issued by a registration endpoint or supplied statically.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientCredentials {
    /// The client identifier.
    pub client_id: String,

    /// Client secret, present only for confidential clients.
    #[serde(default)]
    pub client_secret: Option<String>,
}

// ---------------------------------------------------------------------------
// Registration
// ---------------------------------------------------------------------------

/// Registers a new OAuth client at `registration_endpoint`.
///
/// The JSON body merges the public-client defaults
///
/// ```json
/// {
///   "client_name": "<client_name>",
///   "redirect_uris": ["<redirect_uris...>"],
///   "grant_types": ["authorization_code"],
///   "response_types": ["code"],
///   "token_endpoint_auth_method": "none"
/// }
/// ```
///
/// with `overrides`; an override replaces the default under the same key.
///
/// # Arguments
///
/// * `http` - Shared [`reqwest::Client`].
/// * `registration_endpoint` - RFC 7591 registration endpoint URL.
/// * `client_name` - Human-readable client name for the default body.
/// * `redirect_uris` - Default redirect URI list for the body.
/// * `overrides` - Caller-supplied body fields; win on key conflict.
///
/// # Errors
///
/// Returns [`Error::Registration`] carrying the HTTP status and response
/// body when the endpoint returns a non-2xx status, or when the success
/// body cannot be parsed.
pub async fn register_client(
    http: &reqwest::Client,
    registration_endpoint: &str,
    client_name: &str,
    redirect_uris: &[String],
    overrides: &Map<String, Value>,
) -> Result<ClientCredentials> {
    let mut body = Map::new();
    body.insert("client_name".to_string(), Value::from(client_name));
    body.insert(
        "redirect_uris".to_string(),
        Value::from(redirect_uris.to_vec()),
    );
    body.insert(
        "grant_types".to_string(),
        serde_json::json!(["authorization_code"]),
    );
    body.insert("response_types".to_string(), serde_json::json!(["code"]));
    body.insert(
        "token_endpoint_auth_method".to_string(),
        Value::from("none"),
    );
    for (key, value) in overrides {
        body.insert(key.clone(), value.clone());
    }

    tracing::debug!(endpoint = registration_endpoint, "registering OAuth client");

    let resp = http
        .post(registration_endpoint)
        .json(&Value::Object(body))
        .send()
        .await?;

    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(Error::Registration {
            status: status.as_u16(),
            body,
        }
        .into());
    }

    let credentials: ClientCredentials = resp.json().await.map_err(Error::Http)?;
    Ok(credentials)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
