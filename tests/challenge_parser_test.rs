//! `WWW-Authenticate` challenge parser integration tests
//!
//! Exercises the tolerant challenge grammar in `src/auth/challenge.rs`
//! against realistic header values, including the exact shapes produced
//! by MCP resource servers in the wild.

use mcplink::auth::challenge::{parse_challenges, resource_metadata_url};

// ---------------------------------------------------------------------------
// resource_metadata extraction
// ---------------------------------------------------------------------------

/// A full production-shaped Bearer challenge must yield its
/// `resource_metadata` URL, including the trailing slash.
#[test]
fn test_extracts_resource_metadata_from_error_challenge() {
    let header = r#"Bearer error="invalid_request", error_description="No access token was provided in this request", resource_metadata="https://api.example.com/.well-known/oauth-protected-resource/mcp/""#;

    assert_eq!(
        resource_metadata_url(header).as_deref(),
        Some("https://api.example.com/.well-known/oauth-protected-resource/mcp/"),
    );
}

/// A realm-carrying Bearer challenge must yield the same extraction.
#[test]
fn test_extracts_resource_metadata_from_realm_challenge() {
    let header = r#"Bearer realm="https://example.com", resource_metadata="https://example.com/.well-known/oauth-protected-resource""#;

    assert_eq!(
        resource_metadata_url(header).as_deref(),
        Some("https://example.com/.well-known/oauth-protected-resource"),
    );
}

/// Scheme matching is case-insensitive for the Bearer lookup.
#[test]
fn test_extracts_resource_metadata_with_lowercase_scheme() {
    let header = r#"bearer resource_metadata="https://example.com/meta""#;
    assert_eq!(
        resource_metadata_url(header).as_deref(),
        Some("https://example.com/meta"),
    );
}

/// Only Bearer challenges are consulted; other schemes are skipped even
/// when they carry the parameter.
#[test]
fn test_resource_metadata_in_basic_challenge_is_ignored() {
    let header = r#"Basic resource_metadata="https://example.com/wrong", Bearer resource_metadata="https://example.com/right""#;
    assert_eq!(
        resource_metadata_url(header).as_deref(),
        Some("https://example.com/right"),
    );
}

// ---------------------------------------------------------------------------
// Grammar coverage
// ---------------------------------------------------------------------------

/// Multiple challenges in one header value parse into separate entries
/// in order.
#[test]
fn test_parses_multiple_challenges_in_order() {
    let header = r#"Digest realm="api", nonce="abc123", Bearer error="invalid_token""#;
    let challenges = parse_challenges(header);

    assert_eq!(challenges.len(), 2);
    assert_eq!(challenges[0].scheme, "Digest");
    assert_eq!(challenges[0].params["nonce"], "abc123");
    assert_eq!(challenges[1].scheme, "Bearer");
    assert_eq!(challenges[1].params["error"], "invalid_token");
}

/// Quoted parameter values keep embedded commas and spaces verbatim.
#[test]
fn test_quoted_values_are_taken_verbatim() {
    let header = r#"Bearer error_description="first, second, and third""#;
    let challenges = parse_challenges(header);
    assert_eq!(
        challenges[0].params["error_description"],
        "first, second, and third",
    );
}

/// Unquoted values stop at the next comma or whitespace.
#[test]
fn test_unquoted_values_stop_at_delimiters() {
    let challenges = parse_challenges("Bearer error=invalid_token, scope=read");
    assert_eq!(challenges.len(), 1);
    assert_eq!(challenges[0].params["error"], "invalid_token");
    assert_eq!(challenges[0].params["scope"], "read");
}

/// The parser never fails: arbitrary garbage yields an empty result
/// rather than an error.
#[test]
fn test_unmatchable_input_yields_empty_result() {
    assert!(parse_challenges("").is_empty());
    assert!(parse_challenges("    ").is_empty());
    assert!(parse_challenges("=,=,=").is_empty());
    assert!(parse_challenges("12345 key=value").is_empty());
}

/// A malformed header with no scheme boundary but a leading bearer token
/// falls back to a single Bearer challenge.
#[test]
fn test_bearer_prefix_fallback_collects_all_params() {
    let header = r#"Bearer,error="invalid_request",resource_metadata="https://example.com/meta""#;
    let challenges = parse_challenges(header);

    assert_eq!(challenges.len(), 1);
    assert_eq!(challenges[0].scheme, "Bearer");
    assert_eq!(challenges[0].params["error"], "invalid_request");
    assert_eq!(
        challenges[0].params["resource_metadata"],
        "https://example.com/meta",
    );
}
