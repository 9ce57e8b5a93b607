//! Session token persistence.
//!
//! The store is the single source of truth for the access and refresh
//! tokens. Any copy held elsewhere is a cache that is reconciled with the
//! store on sign-in, refresh and sign-out.
//!
//! Stores may be mutated from outside this process (another console
//! instance sharing the same file), so readers must not assume that two
//! consecutive reads agree.

use std::{
    fs, io,
    path::{Path, PathBuf},
    sync::Mutex,
};

use serde::{Deserialize, Serialize};
use veil::Redact;

use crate::error::Result;

/// Access and refresh token as issued by the service.
///
/// The expiration hints are advisory only: the client relies on the
/// service's 401 responses to detect expired tokens.
#[derive(Clone, PartialEq, Eq, Hash, Deserialize, Serialize, Redact)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    /// Bearer credential for the service
    #[redact]
    pub access_token: String,

    /// Credential for the refresh endpoint only
    #[redact]
    pub refresh_token: String,

    /// Access token lifetime in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,

    /// Refresh token lifetime in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_expires_in: Option<u64>,
}

impl TokenPair {
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
            expires_in: None,
            refresh_expires_in: None,
        }
    }
}

/// Durable storage of the session tokens.
///
/// Implementations must write both tokens together: observers never see a
/// new access token next to an old refresh token.
pub trait TokenStore: Send + Sync {
    /// Reads both entries, either of which may be missing.
    fn load(&self) -> Result<StoredTokens>;

    /// Replaces both tokens.
    fn write(&self, tokens: &TokenPair) -> Result<()>;

    /// Removes both tokens.
    fn clear(&self) -> Result<()>;

    /// Reads the token pair, if both tokens are present.
    fn read(&self) -> Result<Option<TokenPair>> {
        self.load().map(StoredTokens::into_pair)
    }

    fn access_token(&self) -> Result<Option<String>> {
        self.load().map(|stored| stored.token)
    }

    fn refresh_token(&self) -> Result<Option<String>> {
        self.load().map(|stored| stored.refresh_token)
    }
}

/// Raw store contents: the two persisted entries, `token` and
/// `refreshToken`.
#[derive(Clone, Default, PartialEq, Eq, Deserialize, Serialize, Redact)]
#[serde(rename_all = "camelCase")]
pub struct StoredTokens {
    /// Access token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[redact]
    pub token: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[redact]
    pub refresh_token: Option<String>,
}

impl StoredTokens {
    #[must_use]
    pub fn into_pair(self) -> Option<TokenPair> {
        match (self.token, self.refresh_token) {
            (Some(access_token), Some(refresh_token)) => {
                Some(TokenPair::new(access_token, refresh_token))
            }
            _ => None,
        }
    }
}

impl From<&TokenPair> for StoredTokens {
    fn from(tokens: &TokenPair) -> Self {
        Self {
            token: Some(tokens.access_token.clone()),
            refresh_token: Some(tokens.refresh_token.clone()),
        }
    }
}

/// In-process token store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tokens: Mutex<StoredTokens>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-populated with raw entries, which may be
    /// incomplete.
    #[must_use]
    pub fn with_entries(tokens: StoredTokens) -> Self {
        Self {
            tokens: Mutex::new(tokens),
        }
    }
}

impl TokenStore for MemoryStore {
    fn load(&self) -> Result<StoredTokens> {
        Ok(self.tokens.lock()?.clone())
    }

    fn write(&self, tokens: &TokenPair) -> Result<()> {
        *self.tokens.lock()? = tokens.into();
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *self.tokens.lock()? = StoredTokens::default();
        Ok(())
    }
}

/// Token store backed by a TOML file.
///
/// ```toml
/// token = "eyJhbGciOi..."
/// refreshToken = "eyJhbGciOi..."
/// ```
///
/// Every read goes back to the file so that changes made by other processes
/// are observed. Writes replace the file through a rename so both entries
/// change at once.
#[derive(Clone, Debug)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    /// Token files are tiny; anything larger is not ours.
    const MAX_FILE_SIZE: u64 = 16 * 1024;

    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temporary_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(std::ffi::OsStr::to_os_string)
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    fn persist(&self, tokens: &StoredTokens) -> Result<()> {
        let contents = toml::to_string(tokens)?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let temporary = self.temporary_path();
        fs::write(&temporary, contents)?;
        fs::rename(&temporary, &self.path)?;

        Ok(())
    }
}

impl TokenStore for FileStore {
    fn load(&self) -> Result<StoredTokens> {
        // Prevent out-of-memory condition: the token file should be small.
        let size = match fs::metadata(&self.path) {
            Ok(attributes) => attributes.len(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(StoredTokens::default()),
            Err(e) => return Err(e.into()),
        };
        if size > Self::MAX_FILE_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("{} is too large", self.path.display()),
            )
            .into());
        }

        let contents = fs::read_to_string(&self.path)?;
        toml::from_str(&contents).map_err(Into::into)
    }

    fn write(&self, tokens: &TokenPair) -> Result<()> {
        trace!("writing tokens to {}", self.path.display());
        self.persist(&tokens.into())
    }

    fn clear(&self) -> Result<()> {
        trace!("clearing tokens in {}", self.path.display());
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn scratch_file() -> PathBuf {
        std::env::temp_dir()
            .join(format!("snipurl-{}", uuid::Uuid::new_v4()))
            .join("tokens.toml")
    }

    #[test]
    fn memory_store_lifecycle() {
        let store = MemoryStore::new();
        assert_eq!(store.read().unwrap(), None);

        let tokens = TokenPair::new("access", "refresh");
        store.write(&tokens).unwrap();
        assert_eq!(store.read().unwrap(), Some(tokens));
        assert_eq!(store.access_token().unwrap().as_deref(), Some("access"));

        store.clear().unwrap();
        assert_eq!(store.load().unwrap(), StoredTokens::default());
    }

    #[test]
    fn partial_entries_are_not_a_pair() {
        let store = MemoryStore::with_entries(StoredTokens {
            token: Some("access".to_owned()),
            refresh_token: None,
        });
        assert_eq!(store.read().unwrap(), None);
        assert_eq!(store.access_token().unwrap().as_deref(), Some("access"));
        assert_eq!(store.refresh_token().unwrap(), None);
    }

    #[test]
    fn file_store_uses_two_entries() {
        let path = scratch_file();
        let store = FileStore::new(&path);
        assert_eq!(store.read().unwrap(), None);

        store.write(&TokenPair::new("a1", "r1")).unwrap();
        let contents = fs::read_to_string(&path).unwrap();
        let raw: toml::Table = contents.parse().unwrap();
        assert_eq!(raw["token"].as_str(), Some("a1"));
        assert_eq!(raw["refreshToken"].as_str(), Some("r1"));

        // Changes made behind the store's back are observed.
        fs::write(&path, "token = \"a2\"\nrefreshToken = \"r2\"\n").unwrap();
        assert_eq!(store.read().unwrap(), Some(TokenPair::new("a2", "r2")));

        store.clear().unwrap();
        assert!(!path.exists());
        store.clear().unwrap();

        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn debug_output_redacts_tokens() {
        let tokens = TokenPair::new("secret-access", "secret-refresh");
        let debug = format!("{tokens:?}");
        assert!(!debug.contains("secret-access"));
        assert!(!debug.contains("secret-refresh"));
    }
}
