//! OAuth 2.1 / OIDC authorization
//!
//! This module implements the full authorization machinery for
//! connecting to OAuth-protected MCP resource servers: metadata
//! discovery, dynamic client registration, the PKCE authorization code
//! flow, and token persistence.
//!
//! # Module Layout
//!
//! - [`challenge`]   -- tolerant `WWW-Authenticate` header parsing
//! - [`discovery`]   -- RFC 9728 protected resource metadata and
//!   RFC 8414 / OIDC authorization server discovery
//! - [`registration`] -- RFC 7591 dynamic client registration
//! - [`pkce`]        -- PKCE `S256` challenge generation
//! - [`flow`]        -- OAuth 2.1 authorization code flow with PKCE
//! - [`token_store`] -- file-backed token persistence
//! - [`manager`]     -- high-level manager coordinating all sub-modules

pub mod challenge;
pub mod discovery;
pub mod flow;
pub mod manager;
pub mod pkce;
pub mod registration;
pub mod token_store;
