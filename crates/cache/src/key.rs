//! URL hashing and cache file naming
//!
//! Every cached file is named `<key>-<description>`, where the key is the
//! hex rendering of a truncated SHA-1 digest of the URL. Truncation keeps
//! filenames short at the cost of a small collision risk: with the default
//! 4-byte key, two distinct URLs share a key with probability 2^-32 per pair.
//! Collisions are not detected; a longer key can be configured with
//! [`KeyLength`].

use crate::{Error, Result};
use sha1::{Digest, Sha1};
use std::ffi::OsStr;
use std::fmt;
use url::Url;

/// Number of digest bytes kept in a cache key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeyLength(usize);

impl KeyLength {
    /// Default key width: 4 bytes, rendered as 8 hex characters
    pub const DEFAULT: Self = Self(4);

    /// Widest possible key (the full SHA-1 digest)
    pub const MAX_BYTES: usize = 20;

    /// Create a key length of `bytes` digest bytes
    ///
    /// # Errors
    ///
    /// Returns a configuration error unless `1 <= bytes <= 20`.
    pub fn new(bytes: usize) -> Result<Self> {
        if (1..=Self::MAX_BYTES).contains(&bytes) {
            Ok(Self(bytes))
        } else {
            Err(Error::configuration(format!(
                "key length must be between 1 and {} bytes, got {bytes}",
                Self::MAX_BYTES
            )))
        }
    }

    /// Digest bytes kept
    #[must_use]
    pub fn bytes(self) -> usize {
        self.0
    }

    /// Length of the rendered key in hex characters
    #[must_use]
    pub fn hex_len(self) -> usize {
        self.0 * 2
    }
}

impl Default for KeyLength {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Short identifier derived from a URL, used as a filename prefix
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// The key as upper-case hex
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether `file_name` belongs to this key
    ///
    /// The comparison is byte-wise, so any filename can be tested, valid
    /// UTF-8 or not.
    #[must_use]
    pub fn matches(&self, file_name: impl AsRef<OsStr>) -> bool {
        file_name
            .as_ref()
            .as_encoded_bytes()
            .starts_with(self.0.as_bytes())
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Hash a URL with the default key length
#[must_use]
pub fn hash_url(url: &Url) -> CacheKey {
    hash_url_with(url, KeyLength::DEFAULT)
}

/// Hash a URL, keeping `length` bytes of the SHA-1 digest
///
/// The URL's serialized form is hashed, so two `Url` values that parse to
/// the same canonical string always yield the same key.
#[must_use]
pub fn hash_url_with(url: &Url, length: KeyLength) -> CacheKey {
    let digest = Sha1::digest(url.as_str().as_bytes());
    CacheKey(hex::encode_upper(&digest[..length.bytes()]))
}

/// Whether `c` may appear in the description part of a cache filename
fn is_safe_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-')
}

/// Whether a description consists only of `[A-Za-z0-9_.-]`
#[must_use]
pub fn is_safe_description(description: &str) -> bool {
    description.chars().all(is_safe_char)
}

/// Drop every character outside `[A-Za-z0-9_.-]`
#[must_use]
pub fn sanitize_description(description: &str) -> String {
    description.chars().filter(|&c| is_safe_char(c)).collect()
}

/// Name of a cached file: `<key>-<sanitized description>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheFileName(String);

impl CacheFileName {
    /// Compose a filename from a key and a free-form description
    #[must_use]
    pub fn new(key: &CacheKey, description: &str) -> Self {
        let description = sanitize_description(description);
        debug_assert!(
            is_safe_description(&description),
            "sanitized description contains unsafe characters: {description:?}"
        );
        Self(format!("{key}-{description}"))
    }

    /// The filename as a string
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheFileName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
