//! # Persisto Core
//!
//! Building blocks of the persisto persistent memoization library.
//!
//! A memoized call runs through a fixed pipeline whose every stage can be
//! swapped:
//!
//! ```text
//! arguments -> KeyExtractor -> CacheKey -> KeyHasher -> identifier
//!                                                          |
//!          value <- Serializer::decode <- CacheBackend::read   (hit)
//!          value -> Serializer::encode -> CacheBackend::write  (miss)
//! ```
//!
//! ## Module Organization
//!
//! - [`keys`] - call arguments, cache keys and key extractors
//! - [`hashing`] - key to identifier mapping, SHA-256 by default
//! - [`serializer`] - encode/decode pairs (JSON, `Display`/`FromStr`, closures)
//! - [`backend`] - filesystem and REST document store backends
//! - [`memoizer`] - the pipeline itself and its builder
//!
//! Results stored by one process are visible to every other process using
//! the same backend, and survive restarts.
pub mod backend;
pub mod hashing;
pub mod keys;
pub mod memoizer;
pub mod serializer;
pub mod utils;

mod cache_entry;
mod error;
mod finite;

#[cfg(feature = "stats")]
mod stats;

#[cfg(feature = "stats")]
pub mod stats_registry;

pub use backend::{
    BackendError, CacheBackend, CacheLocation, FsBackend, RemoteBackend, RemoteConfig,
    DEFAULT_CACHE,
};
pub use cache_entry::{CacheEntry, EntryMetadata};
pub use error::PersistError;
pub use hashing::{KeyHasher, Sha256Hasher, SHA256_IDENTIFIER_LEN};
pub use keys::{key_fn, ArgumentKey, ArgumentTuple, CacheKey, CallArguments, KeyError, KeyExtractor};
pub use memoizer::{Memoizer, MemoizerBuilder, UnavailablePolicy};
pub use serializer::{
    DecodeError, DisplaySerializer, EncodeError, FnSerializer, JsonSerializer, Serializer,
};

#[cfg(feature = "stats")]
pub use stats::CacheStats;

/// Items used by code generated by `#[persist]`. Not a public API.
#[doc(hidden)]
pub mod __private {
    pub use once_cell::sync::OnceCell;

    use crate::BackendError;

    pub fn report_unavailable(function: &str, err: &BackendError) {
        tracing::warn!(function, error = %err, "memoizer could not be built");
    }

    /// Names the success and error types of `Result` aliases such as
    /// `io::Result<T>`.
    pub trait Fallible {
        type Ok;
        type Err;

        fn into_result(self) -> Result<Self::Ok, Self::Err>;
    }

    impl<T, E> Fallible for Result<T, E> {
        type Ok = T;
        type Err = E;

        fn into_result(self) -> Result<T, E> {
            self
        }
    }
}
