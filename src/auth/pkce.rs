//! PKCE S256 challenge generation
//!
//! This module implements the Proof Key for Code Exchange (PKCE)
//! extension to OAuth 2.0 as defined in RFC 7636, specifically the `S256`
//! challenge method mandated by OAuth 2.1. The `plain` method is never
//! offered: a server that does not support `S256` is unusable.
//!
//! # References
//!
//! - RFC 7636 <https://www.rfc-editor.org/rfc/rfc7636>
//! - OAuth 2.1 draft <https://datatracker.ietf.org/doc/draft-ietf-oauth-v2-1/>

use base64::Engine as _;
use sha2::{Digest, Sha256};

use crate::auth::discovery::AuthServerMetadata;
use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// PkceChallenge
// ---------------------------------------------------------------------------

/// A PKCE S256 pair consisting of a verifier and its derived challenge.
///
/// Created by [`generate`] and consumed by the authorization flow.
///
/// # Examples
///
/// ```
/// use mcplink::auth::pkce::generate;
///
/// let pkce = generate().expect("PKCE generation must not fail");
/// assert_eq!(pkce.method, "S256");
/// assert_eq!(pkce.verifier.len(), 43);
/// assert_ne!(pkce.verifier, pkce.challenge);
/// ```
#[derive(Debug, Clone)]
pub struct PkceChallenge {
    /// The code verifier: a base64url-encoded (no padding) random string
    /// of exactly 43 characters derived from 32 random bytes. Sent to the
    /// token endpoint in the `code_verifier` parameter.
    pub verifier: String,

    /// The code challenge: the base64url-encoded (no padding) SHA-256
    /// digest of the UTF-8 representation of [`Self::verifier`]. Sent to
    /// the authorization endpoint in the `code_challenge` parameter.
    pub challenge: String,

    /// The challenge method. Always `"S256"`.
    pub method: String,
}

// ---------------------------------------------------------------------------
// Public functions
// ---------------------------------------------------------------------------

/// Generates a fresh PKCE S256 pair.
///
/// The verifier is 32 cryptographically random bytes encoded as a
/// base64url string without padding. The challenge is the base64url
/// digest of the verifier string's UTF-8 bytes, exactly as transmitted,
/// per RFC 7636 section 4.2, not of the raw random bytes.
///
/// # Errors
///
/// Infallible in practice; returns a `Result` so callers can use `?`
/// uniformly.
pub fn generate() -> Result<PkceChallenge> {
    use rand::RngCore as _;

    let mut random_bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut random_bytes);

    let verifier = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(random_bytes);

    // RFC 7636 section 4.2: ASCII(BASE64URL(SHA256(ASCII(code_verifier))))
    let digest = Sha256::digest(verifier.as_bytes());
    let challenge = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(digest.as_slice());

    Ok(PkceChallenge {
        verifier,
        challenge,
        method: "S256".to_string(),
    })
}

/// Verifies that the authorization server supports the PKCE `S256` method.
///
/// Absence of the `code_challenge_methods_supported` field, or a list
/// without `"S256"` (case-sensitive), is an error: OAuth 2.1 mandates
/// PKCE for public clients and this crate never downgrades.
///
/// # Errors
///
/// Returns [`Error::Discovery`] when `S256` is not advertised.
pub fn verify_s256_support(metadata: &AuthServerMetadata) -> Result<()> {
    let supported = metadata
        .code_challenge_methods_supported
        .as_deref()
        .unwrap_or(&[]);

    if supported.iter().any(|m| m == "S256") {
        Ok(())
    } else {
        Err(Error::Discovery(format!(
            "authorization server {} does not support PKCE S256",
            metadata.issuer
        ))
        .into())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
