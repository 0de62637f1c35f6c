//! Common types used throughout VaultKey.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use url::Url;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Reference to a vault or key file.
///
/// Identities are stored in canonical URI form. A bare absolute path is
/// converted to a `file://` URI, so `/data/v1.db` and `file:///data/v1.db`
/// compare equal. Equality, hashing and persistence all use the canonical
/// string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VaultIdentity(Url);

impl VaultIdentity {
    /// Parse a raw identity string.
    ///
    /// # Preconditions
    /// - `raw` is a URI with a scheme, or an absolute filesystem path
    ///
    /// # Errors
    /// - Returns error if `raw` is empty, relative, or not a valid URI
    pub fn parse(raw: &str) -> crate::Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(crate::Error::InvalidInput(
                "Vault identity cannot be empty".to_string(),
            ));
        }

        // Single-letter schemes are Windows drive letters, not URIs.
        if let Ok(url) = Url::parse(raw) {
            if url.scheme().len() > 1 {
                return Ok(Self(url));
            }
        }

        Self::from_path(Path::new(raw))
    }

    /// Parse an identity that may be absent.
    ///
    /// Empty strings are the persisted sentinel for "no identity".
    pub fn parse_optional(raw: &str) -> crate::Result<Option<Self>> {
        if raw.trim().is_empty() {
            Ok(None)
        } else {
            Self::parse(raw).map(Some)
        }
    }

    /// Build an identity from an absolute local path.
    pub fn from_path(path: &Path) -> crate::Result<Self> {
        Url::from_file_path(path).map(Self).map_err(|_| {
            crate::Error::InvalidInput(format!(
                "Not an absolute path or URI: {}",
                path.display()
            ))
        })
    }

    /// Get the canonical string form.
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// Get the URI scheme, lowercased.
    pub fn scheme(&self) -> &str {
        self.0.scheme()
    }

    /// Check if this identity denotes a local file.
    pub fn is_local(&self) -> bool {
        self.0.scheme() == "file"
    }

    /// Get the local path for `file` identities.
    ///
    /// Returns `None` for other schemes and for a `file` URI without a path.
    pub fn local_path(&self) -> Option<PathBuf> {
        if !self.is_local() {
            return None;
        }
        let path = self.0.path();
        if path.is_empty() || path == "/" {
            return None;
        }
        self.0.to_file_path().ok()
    }
}

impl fmt::Display for VaultIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for VaultIdentity {
    type Error = crate::Error;

    fn try_from(value: String) -> crate::Result<Self> {
        Self::parse(&value)
    }
}

impl From<VaultIdentity> for String {
    fn from(value: VaultIdentity) -> Self {
        value.0.into()
    }
}

/// User passphrase that zeroizes on drop.
#[derive(Clone, Default, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct Passphrase(String);

impl Passphrase {
    /// Create a new passphrase.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Get the passphrase text.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Get the length in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Passphrase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Passphrase([REDACTED; {} bytes])", self.0.len())
    }
}

impl From<&str> for Passphrase {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Passphrase {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Credentials for one unlock attempt.
///
/// At least one of passphrase or key file must be present for the attempt
/// to be valid.
#[derive(Debug, Clone, Default)]
pub struct KeyMaterial {
    passphrase: Option<Passphrase>,
    key_file: Option<VaultIdentity>,
}

impl KeyMaterial {
    /// Create key material. An empty passphrase is stored as absent.
    pub fn new(passphrase: Option<Passphrase>, key_file: Option<VaultIdentity>) -> Self {
        Self {
            passphrase: passphrase.filter(|p| !p.is_empty()),
            key_file,
        }
    }

    /// Key material consisting only of a passphrase.
    pub fn from_passphrase(passphrase: impl Into<Passphrase>) -> Self {
        Self::new(Some(passphrase.into()), None)
    }

    /// Get the passphrase, if any.
    pub fn passphrase(&self) -> Option<&Passphrase> {
        self.passphrase.as_ref()
    }

    /// Get the key file, if any.
    pub fn key_file(&self) -> Option<&VaultIdentity> {
        self.key_file.as_ref()
    }

    /// Replace the key file.
    pub fn set_key_file(&mut self, key_file: Option<VaultIdentity>) {
        self.key_file = key_file;
    }

    /// Check if neither a passphrase nor a key file is present.
    pub fn is_empty(&self) -> bool {
        self.passphrase.is_none() && self.key_file.is_none()
    }

    /// Drop the passphrase from memory.
    pub fn clear(&mut self) {
        // Passphrase zeroizes itself on drop.
        self.passphrase = None;
        self.key_file = None;
    }
}
