//! Tolerant `WWW-Authenticate` challenge header parsing
//!
//! An HTTP 401 response may carry one or more authentication challenges
//! in a single `WWW-Authenticate` header value:
//!
//! ```text
//! Bearer realm="https://example.com", resource_metadata="https://example.com/.well-known/oauth-protected-resource"
//! ```
//!
//! This parser handles the common shape of that grammar: one or more
//! `scheme SP param(,param)*` segments separated by commas, where params
//! are `key="quoted value"` or `key=token`. Quoted values are taken
//! verbatim between the quotes and may contain commas and spaces;
//! unquoted values stop at the next comma or whitespace.
//!
//! It is deliberately best-effort rather than a conformance-grade
//! RFC 8941 structured-header parser: it never fails, and inputs that
//! match nothing produce an empty result. Tightening it into a strict
//! validator would turn a tolerant fallback path into a new failure mode.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;

// ---------------------------------------------------------------------------
// AuthChallenge
// ---------------------------------------------------------------------------

/// A single parsed authentication challenge.
///
/// # Examples
///
/// ```
/// use mcplink::auth::challenge::parse_challenges;
///
/// let challenges = parse_challenges(r#"Bearer realm="example", error="invalid_token""#);
/// assert_eq!(challenges.len(), 1);
/// assert_eq!(challenges[0].scheme, "Bearer");
/// assert_eq!(challenges[0].params["error"], "invalid_token");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthChallenge {
    /// Authentication scheme name (e.g. `"Bearer"`), case preserved.
    pub scheme: String,

    /// Parsed key/value parameters for this challenge.
    pub params: HashMap<String, String>,
}

/// Matches a `scheme SP rest` segment prefix. The scheme token grammar is
/// `[A-Za-z][A-Za-z0-9_+-]*`.
fn scheme_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^([A-Za-z][A-Za-z0-9_+-]*)[ \t]+(.*)$").expect("scheme pattern compiles")
    })
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parses a `WWW-Authenticate` header value into a sequence of challenges.
///
/// Scheme boundaries are detected by looking for the next `scheme SP`
/// occurrence at a comma boundary, so a challenge's parameter list may
/// itself contain commas only inside quoted values. If no scheme boundary
/// is found at all but the header begins with the token `bearer`
/// (case-insensitive), the entire remainder is treated as the parameters
/// of a single Bearer challenge.
///
/// This function never fails; unparseable input yields an empty vector.
///
/// # Examples
///
/// ```
/// use mcplink::auth::challenge::parse_challenges;
///
/// let header = r#"Basic realm="files", Bearer error="invalid_request", scope="read""#;
/// let challenges = parse_challenges(header);
/// assert_eq!(challenges.len(), 2);
/// assert_eq!(challenges[0].scheme, "Basic");
/// assert_eq!(challenges[1].scheme, "Bearer");
/// assert_eq!(challenges[1].params["scope"], "read");
///
/// assert!(parse_challenges("").is_empty());
/// ```
pub fn parse_challenges(header: &str) -> Vec<AuthChallenge> {
    let mut challenges = Vec::new();
    let mut current: Option<AuthChallenge> = None;

    for segment in split_segments(header) {
        let segment = segment.trim();
        if segment.is_empty() {
            continue;
        }

        if let Some((scheme, rest)) = split_scheme(segment) {
            if let Some(done) = current.take() {
                challenges.push(done);
            }
            let mut params = HashMap::new();
            if let Some((key, value)) = parse_param(rest) {
                params.insert(key, value);
            }
            current = Some(AuthChallenge {
                scheme: scheme.to_string(),
                params,
            });
        } else if let Some(challenge) = current.as_mut() {
            if let Some((key, value)) = parse_param(segment) {
                challenge.params.insert(key, value);
            }
        }
    }

    if let Some(done) = current.take() {
        challenges.push(done);
    }

    if challenges.is_empty() {
        if let Some(fallback) = bearer_fallback(header) {
            challenges.push(fallback);
        }
    }

    challenges
}

/// Extracts the `resource_metadata` URL from the first Bearer challenge
/// that carries one.
///
/// The scheme comparison is case-insensitive. Returns `None` when no
/// Bearer challenge contains the parameter.
///
/// # Examples
///
/// ```
/// use mcplink::auth::challenge::resource_metadata_url;
///
/// let header = r#"Bearer realm="https://example.com", resource_metadata="https://example.com/.well-known/oauth-protected-resource""#;
/// assert_eq!(
///     resource_metadata_url(header).as_deref(),
///     Some("https://example.com/.well-known/oauth-protected-resource"),
/// );
///
/// assert!(resource_metadata_url(r#"Bearer error="invalid_token""#).is_none());
/// ```
pub fn resource_metadata_url(header: &str) -> Option<String> {
    parse_challenges(header)
        .into_iter()
        .find(|c| c.scheme.eq_ignore_ascii_case("bearer") && c.params.contains_key("resource_metadata"))
        .and_then(|mut c| c.params.remove("resource_metadata"))
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Splits a header value into comma-delimited segments, ignoring commas
/// inside quoted strings.
fn split_segments(value: &str) -> Vec<&str> {
    let mut segments = Vec::new();
    let mut in_quotes = false;
    let mut start = 0;

    for (i, c) in value.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                segments.push(&value[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    segments.push(&value[start..]);
    segments
}

/// Splits a segment into `(scheme, rest)` when it begins a new challenge.
///
/// A segment begins a new challenge when it starts with a scheme token
/// followed by whitespace, and the remainder is not just the `=` of a
/// spaced-out `key = value` parameter.
fn split_scheme(segment: &str) -> Option<(&str, &str)> {
    let caps = scheme_pattern().captures(segment)?;
    let scheme = caps.get(1)?.as_str();
    let rest = caps.get(2)?.as_str();
    if rest.trim_start().starts_with('=') {
        return None;
    }
    Some((scheme, rest))
}

/// Parses a single `key=value` parameter.
///
/// The value may be quoted (taken verbatim between the quotes) or a bare
/// token (stopping at the next whitespace). Returns `None` when the
/// segment does not look like a parameter.
fn parse_param(segment: &str) -> Option<(String, String)> {
    let (key, rest) = segment.split_once('=')?;
    let key = key.trim();
    if key.is_empty() || !key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.') {
        return None;
    }

    let rest = rest.trim_start();
    let value = if let Some(inner) = rest.strip_prefix('"') {
        match inner.find('"') {
            Some(end) => &inner[..end],
            // Unterminated quote: take the remainder verbatim.
            None => inner,
        }
    } else {
        rest.split(|c: char| c.is_whitespace())
            .next()
            .unwrap_or("")
    };

    Some((key.to_string(), value.to_string()))
}

/// Builds a single Bearer challenge from a header that matched no scheme
/// boundary but begins with the token `bearer` (case-insensitive).
fn bearer_fallback(header: &str) -> Option<AuthChallenge> {
    let trimmed = header.trim_start();
    let prefix = trimmed.get(..6)?;
    if !prefix.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let rest = &trimmed[6..];
    // Must be a token boundary, not a longer word like "bearerish".
    if rest
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_' || c == '+' || c == '-')
    {
        return None;
    }

    let mut params = HashMap::new();
    for segment in split_segments(rest) {
        if let Some((key, value)) = parse_param(segment.trim()) {
            params.insert(key, value);
        }
    }
    Some(AuthChallenge {
        scheme: "Bearer".to_string(),
        params,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
