//! Persistent stores for encoded results.
//!
//! A [`CacheBackend`] is opened for one memoized function and stores
//! [`CacheEntry`] values keyed by identifier. Two implementations exist:
//!
//! - [`FsBackend`] - one directory per function under a root directory
//! - [`RemoteBackend`] - one collection per function on a REST document store
//!
//! [`CacheLocation`] selects and configures one of them, and parses the
//! `file://`, `mongodb://` and `http(s)://` address strings.

mod fs;
mod remote;

pub use fs::FsBackend;
pub use remote::{RemoteBackend, RemoteConfig};

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{CacheEntry, EntryMetadata};

/// Failure of the storage medium.
///
/// Everything except [`NotFound`](Self::NotFound) means the store could not
/// answer, which the memoizer reports instead of assuming a miss.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    /// No entry is stored under this identifier.
    #[error("no entry stored under `{0}`")]
    NotFound(String),
    /// Disk I/O failed.
    #[error("I/O error at {}: {message}", path.display())]
    Io {
        path: PathBuf,
        kind: io::ErrorKind,
        message: String,
    },
    /// The remote store answered with an unexpected status.
    #[error("remote store answered {status}: {message}")]
    Http { status: u16, message: String },
    /// The remote store could not be reached (connection, DNS, timeout).
    #[error("remote store unreachable: {0}")]
    Transport(String),
    /// A stored value is not valid UTF-8. The memoizer reports this as a
    /// decode failure of that entry, not as an unavailable store.
    #[error("entry `{id}` is not valid text: {message}")]
    InvalidText { id: String, message: String },
    /// The store answered, but the stored data is not in the expected shape.
    #[error("malformed stored data: {0}")]
    Malformed(String),
    /// The backend configuration is invalid.
    #[error("invalid cache configuration: {0}")]
    Config(String),
}

impl BackendError {
    pub fn io(path: impl AsRef<Path>, err: io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            kind: err.kind(),
            message: err.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Abstract store of encoded results, keyed by identifier.
///
/// # Concurrency
///
/// Several processes may use the same store at once. Implementations must
/// make [`write`](Self::write) atomic as seen by readers (no reader observes
/// a partially written entry) and idempotent (writing an identifier that
/// already holds an entry is not an error).
///
/// The maintenance operations ([`remove`](Self::remove),
/// [`clear`](Self::clear), [`len`](Self::len), [`entries`](Self::entries))
/// are never used by the memoization protocol itself.
pub trait CacheBackend: Send + Sync + fmt::Debug {
    /// Returns whether a value is stored under `id`.
    fn exists(&self, id: &str) -> Result<bool, BackendError>;

    /// Returns the stored representation, or [`BackendError::NotFound`] if
    /// the entry vanished since it was found.
    fn read(&self, id: &str) -> Result<String, BackendError>;

    /// Returns the metadata stored with `id`, if any.
    fn metadata(&self, id: &str) -> Result<Option<EntryMetadata>, BackendError>;

    /// Stores an entry. Must tolerate the identifier already being present.
    fn write(&self, entry: &CacheEntry) -> Result<(), BackendError>;

    /// Deletes one entry. Returns whether it existed.
    fn remove(&self, id: &str) -> Result<bool, BackendError>;

    /// Number of stored entries.
    fn len(&self) -> Result<usize, BackendError>;

    fn is_empty(&self) -> Result<bool, BackendError> {
        Ok(self.len()? == 0)
    }

    /// Deletes every entry of this function.
    fn clear(&self) -> Result<(), BackendError>;

    /// Metadata of every stored entry, which includes the original keys.
    fn entries(&self) -> Result<Vec<EntryMetadata>, BackendError>;
}

/// Default cache address: a `persist` directory relative to the working
/// directory.
pub const DEFAULT_CACHE: &str = "file://persist";

/// Where results are stored.
///
/// # Examples
///
/// ```
/// use persisto_core::CacheLocation;
/// use std::path::PathBuf;
///
/// let local = CacheLocation::parse("file://results").unwrap();
/// assert_eq!(local, CacheLocation::Filesystem { root: PathBuf::from("results") });
///
/// let bare = CacheLocation::parse("results").unwrap();
/// assert_eq!(bare, local);
///
/// let remote = CacheLocation::parse("mongodb://localhost:5000").unwrap();
/// match remote {
///     CacheLocation::Remote(config) => assert_eq!(config.endpoint, "http://localhost:5000"),
///     _ => unreachable!(),
/// }
///
/// assert!(CacheLocation::parse("ftp://nowhere").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CacheLocation {
    /// A directory tree on the local filesystem.
    Filesystem { root: PathBuf },
    /// A REST document store.
    Remote(RemoteConfig),
}

impl CacheLocation {
    pub fn filesystem(root: impl Into<PathBuf>) -> Self {
        Self::Filesystem { root: root.into() }
    }

    pub fn remote(endpoint: impl Into<String>) -> Self {
        Self::Remote(RemoteConfig::new(endpoint))
    }

    /// Parses a cache address.
    ///
    /// * `file://<path>` or a plain path: filesystem root
    /// * `mongodb://<host:port>`: document store served over HTTP at that address
    /// * `http://...` or `https://...`: document store at that URL
    pub fn parse(address: &str) -> Result<Self, BackendError> {
        let Some((scheme, rest)) = address.split_once("://") else {
            return Ok(Self::filesystem(address));
        };

        match scheme {
            "file" => Ok(Self::filesystem(rest)),
            "mongodb" => Ok(Self::remote(format!("http://{rest}"))),
            "http" | "https" => Ok(Self::remote(address)),
            other => Err(BackendError::Config(format!(
                "unsupported cache scheme `{other}` in `{address}`"
            ))),
        }
    }

    /// Opens the store for one memoized function, creating what is needed.
    pub fn open(&self, function: &str) -> Result<Box<dyn CacheBackend>, BackendError> {
        match self {
            Self::Filesystem { root } => Ok(Box::new(FsBackend::new(root, function)?)),
            Self::Remote(config) => Ok(Box::new(RemoteBackend::new(config, function)?)),
        }
    }
}

impl Default for CacheLocation {
    fn default() -> Self {
        Self::filesystem("persist")
    }
}

impl FromStr for CacheLocation {
    type Err = BackendError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
