//! OAuth token persistence
//!
//! Tokens are held in a single in-memory mapping mirrored to one JSON
//! file on every mutation. Each save rewrites the whole file; there is no
//! incremental update and no cross-process locking, so concurrent
//! external writers race last-writer-wins. That is acceptable for a
//! single-user local cache and is a documented property, not a defect.
//!
//! Records are keyed by the triple `(resource, client_id,
//! authorization_server)`, concatenated with a fixed separator into an
//! opaque string. The key is compared only as a whole and is never parsed
//! back into its components. No URL normalization is applied before key
//! construction, so two spellings of the same resource URL (trailing
//! slash, scheme case) address different records.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::auth::flow::TokenResponse;
use crate::error::{Error, Result};

/// Separator used when concatenating the composite key components.
const KEY_SEPARATOR: &str = "|";

/// File name of the backing store inside the per-user data directory.
const STORE_FILE_NAME: &str = "tokens.json";

// ---------------------------------------------------------------------------
// TokenRecord
// ---------------------------------------------------------------------------

/// A persisted OAuth 2.1 token together with the identity it was issued
/// for.
///
/// Fields map to the token endpoint response defined in RFC 6749, with
/// `expires_in` converted to an absolute UTC `expires_at` at store time
/// so that expiry can be determined without a server round-trip.
///
/// # Examples
///
/// ```
/// use mcplink::auth::token_store::TokenRecord;
///
/// let record = TokenRecord {
///     access_token: "tok".to_string(),
///     token_type: "Bearer".to_string(),
///     expires_at: None,
///     refresh_token: None,
///     scope: None,
///     resource: "https://api.example.com/mcp".to_string(),
///     client_id: "client-1".to_string(),
///     authorization_server: "https://auth.example.com".to_string(),
/// };
///
/// // A record with no expiry is never considered expired.
/// assert!(!record.is_expired());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenRecord {
    /// The access token string issued by the authorization server.
    pub access_token: String,

    /// The token type, typically `"Bearer"`.
    pub token_type: String,

    /// UTC instant at which the access token expires. `None` means the
    /// token never expires.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "chrono::serde::ts_seconds_option"
    )]
    pub expires_at: Option<DateTime<Utc>>,

    /// Refresh token for obtaining a new access token without re-running
    /// the full authorization flow.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    /// Space-separated OAuth scopes granted by the authorization server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,

    /// The resource URL this token was issued for.
    pub resource: String,

    /// The client identifier the token was issued to.
    pub client_id: String,

    /// The authorization server that issued the token.
    pub authorization_server: String,
}

impl TokenRecord {
    /// Returns `true` when the record carries an expiry instant that has
    /// passed.
    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            None => false,
            Some(expires_at) => expires_at <= Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// TokenStore
// ---------------------------------------------------------------------------

/// File-backed store of OAuth tokens keyed by
/// `(resource, client_id, authorization_server)`.
///
/// # Examples
///
/// ```no_run
/// use mcplink::auth::token_store::TokenStore;
///
/// # fn example() -> mcplink::error::Result<()> {
/// let mut store = TokenStore::new(TokenStore::default_path()?);
/// store.load()?;
/// if let Some(record) = store.get(
///     "https://api.example.com/mcp",
///     "client-1",
///     "https://auth.example.com",
/// ) {
///     println!("cached token: {}", record.access_token);
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct TokenStore {
    path: PathBuf,
    records: HashMap<String, TokenRecord>,
}

impl TokenStore {
    /// Creates an empty store backed by `path`. Call [`load`](Self::load)
    /// to read any previously persisted records.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            records: HashMap::new(),
        }
    }

    /// Resolves the fixed per-user location of the backing file.
    ///
    /// # Errors
    ///
    /// Returns an error when no per-user data directory can be
    /// determined on this platform.
    pub fn default_path() -> Result<PathBuf> {
        let dirs = directories::ProjectDirs::from("", "", "mcplink")
            .ok_or_else(|| {
                Error::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "no per-user data directory",
                ))
            })?;
        Ok(dirs.data_dir().join(STORE_FILE_NAME))
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the backing file into memory.
    ///
    /// A missing file is not an error: the store starts empty.
    /// Unparseable content is logged as a warning and the store also
    /// starts empty, so a corrupted cache never blocks authorization.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] only for read failures other than the file
    /// being absent.
    pub fn load(&mut self) -> Result<()> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                self.records = HashMap::new();
                return Ok(());
            }
            Err(e) => return Err(Error::Io(e).into()),
        };

        match serde_json::from_str(&raw) {
            Ok(records) => self.records = records,
            Err(e) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "token store file is unparseable; starting empty"
                );
                self.records = HashMap::new();
            }
        }
        Ok(())
    }

    /// Serializes the entire mapping and overwrites the backing file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] on write failures and
    /// [`Error::Serialization`] on encoding failures.
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(Error::Io)?;
        }
        let raw = serde_json::to_string_pretty(&self.records).map_err(Error::Serialization)?;
        std::fs::write(&self.path, raw).map_err(Error::Io)?;
        Ok(())
    }

    /// Returns the stored record for the triple, or `None` when no record
    /// exists or the stored record has expired.
    ///
    /// An expired record is not surfaced but is also not deleted by this
    /// call; [`sweep_expired`](Self::sweep_expired) removes it.
    pub fn get(
        &self,
        resource: &str,
        client_id: &str,
        authorization_server: &str,
    ) -> Option<&TokenRecord> {
        let key = Self::composite_key(resource, client_id, authorization_server);
        self.records.get(&key).filter(|r| !r.is_expired())
    }

    /// Upserts a record from a token endpoint response and persists.
    ///
    /// When the response carries `expires_in`, the absolute expiry is
    /// computed as `now + expires_in`.
    ///
    /// # Errors
    ///
    /// Propagates persistence failures from [`save`](Self::save).
    pub fn store(
        &mut self,
        response: &TokenResponse,
        resource: &str,
        client_id: &str,
        authorization_server: &str,
    ) -> Result<()> {
        let key = Self::composite_key(resource, client_id, authorization_server);
        let record = TokenRecord {
            access_token: response.access_token.clone(),
            token_type: response.token_type.clone(),
            expires_at: response.expires_in.map(expiry_from_now),
            refresh_token: response.refresh_token.clone(),
            scope: response.scope.clone(),
            resource: resource.to_string(),
            client_id: client_id.to_string(),
            authorization_server: authorization_server.to_string(),
        };
        self.records.insert(key, record);
        self.save()
    }

    /// Updates an existing record in place from a refresh response and
    /// persists.
    ///
    /// The access token, token type, and scope are replaced. The refresh
    /// token is replaced only when the response supplies a new one.
    /// `expires_at` is recomputed only when the response carries
    /// `expires_in`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TokenNotFound`] when no record exists for the
    /// triple; propagates persistence failures otherwise.
    pub fn update(
        &mut self,
        resource: &str,
        client_id: &str,
        authorization_server: &str,
        response: &TokenResponse,
    ) -> Result<()> {
        let key = Self::composite_key(resource, client_id, authorization_server);
        let record = self
            .records
            .get_mut(&key)
            .ok_or_else(|| Error::TokenNotFound(resource.to_string()))?;

        record.access_token = response.access_token.clone();
        record.token_type = response.token_type.clone();
        record.scope = response.scope.clone();
        if let Some(ref refresh) = response.refresh_token {
            record.refresh_token = Some(refresh.clone());
        }
        if let Some(expires_in) = response.expires_in {
            record.expires_at = Some(expiry_from_now(expires_in));
        }
        self.save()
    }

    /// Removes the record for the triple, if present, and persists when
    /// something was removed. Removing an absent record is a no-op.
    ///
    /// # Errors
    ///
    /// Propagates persistence failures from [`save`](Self::save).
    pub fn remove(
        &mut self,
        resource: &str,
        client_id: &str,
        authorization_server: &str,
    ) -> Result<()> {
        let key = Self::composite_key(resource, client_id, authorization_server);
        if self.records.remove(&key).is_some() {
            self.save()?;
        }
        Ok(())
    }

    /// Deletes every record whose expiry has passed, persisting only when
    /// something changed. Returns the number of records removed.
    ///
    /// # Errors
    ///
    /// Propagates persistence failures from [`save`](Self::save).
    pub fn sweep_expired(&mut self) -> Result<usize> {
        let before = self.records.len();
        self.records.retain(|_, record| !record.is_expired());
        let removed = before - self.records.len();
        if removed > 0 {
            self.save()?;
        }
        Ok(removed)
    }

    /// Empties the mapping and deletes the backing file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] when the file exists but cannot be removed.
    pub fn clear_all(&mut self) -> Result<()> {
        self.records.clear();
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Io(e).into()),
        }
    }

    /// Iterates over every stored record, expired ones included.
    pub fn records(&self) -> impl Iterator<Item = &TokenRecord> {
        self.records.values()
    }

    /// Number of stored records, expired ones included.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the store holds no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Builds the opaque composite key for a record.
    ///
    /// The result is compared only as a whole; callers must never parse
    /// it back into components.
    fn composite_key(resource: &str, client_id: &str, authorization_server: &str) -> String {
        format!("{resource}{KEY_SEPARATOR}{client_id}{KEY_SEPARATOR}{authorization_server}")
    }
}

/// Converts an `expires_in` lifetime in seconds into an absolute UTC
/// expiry instant.
fn expiry_from_now(expires_in: u64) -> DateTime<Utc> {
    Utc::now() + chrono::Duration::seconds(i64::try_from(expires_in).unwrap_or(i64::MAX))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
