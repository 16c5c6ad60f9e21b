use std::convert::Infallible;
use std::fmt;
#[cfg(feature = "stats")]
use std::sync::Arc;

use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::{
    ArgumentKey, ArgumentTuple, BackendError, CacheBackend, CacheEntry, CacheKey, CacheLocation,
    DecodeError, EntryMetadata, FnSerializer, JsonSerializer, KeyError, KeyExtractor, KeyHasher,
    PersistError, Serializer, Sha256Hasher,
};

#[cfg(feature = "stats")]
use crate::CacheStats;

/// What a call does when the backend cannot be reached.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnavailablePolicy {
    /// Fail the call with [`PersistError::Unavailable`] or
    /// [`PersistError::Store`].
    #[default]
    Fail,
    /// Log a warning and run the function without the cache.
    Bypass,
}

/// Process-local layer consulted before the backend.
trait MemoryFront<R>: Send + Sync {
    fn get(&self, id: &str) -> Option<R>;
    fn insert(&self, id: &str, value: &R);
    fn remove(&self, id: &str);
    fn clear(&self);
}

struct DashFront<R> {
    map: DashMap<String, R>,
}

impl<R: Clone + Send + Sync> MemoryFront<R> for DashFront<R> {
    fn get(&self, id: &str) -> Option<R> {
        self.map.get(id).map(|value| value.clone())
    }

    fn insert(&self, id: &str, value: &R) {
        self.map.insert(id.to_string(), value.clone());
    }

    fn remove(&self, id: &str) {
        self.map.remove(id);
    }

    fn clear(&self) {
        self.map.clear();
    }
}

type Annotator = Box<dyn Fn() -> String + Send + Sync>;

/// A configured caching pipeline for one function.
///
/// A call derives the [`CacheKey`] from the arguments, hashes it into an
/// identifier and asks the backend for a stored result. On a hit the stored
/// representation is decoded and returned without running the function. On a
/// miss the function runs once, and its result is encoded and written before
/// being returned.
///
/// The memoizer never holds a lock around the computation: two callers (or
/// processes) missing on the same identifier at the same time both compute
/// and both write. Backends accept the second write, so the stored value
/// converges.
///
/// # Examples
///
/// ```
/// use persisto_core::{CacheLocation, Memoizer};
///
/// let root = tempfile::tempdir().unwrap();
/// let double = Memoizer::<(f64,), f64>::builder("double")
///     .key(persisto_core::ArgumentKey::named(["x"]))
///     .location(CacheLocation::filesystem(root.path()))
///     .build()
///     .unwrap();
///
/// assert_eq!(double.invoke((3.0,), |(x,)| x * 2.0).unwrap(), 6.0);
/// // Served from disk; the closure is not called.
/// assert_eq!(double.invoke((3.0,), |_| unreachable!()).unwrap(), 6.0);
/// assert_eq!(double.len().unwrap(), 1);
/// ```
pub struct Memoizer<A, R> {
    name: String,
    key: Box<dyn KeyExtractor<A>>,
    hasher: Box<dyn KeyHasher>,
    serializer: Box<dyn Serializer<R>>,
    backend: Box<dyn CacheBackend>,
    verify_key: bool,
    annotate: Option<Annotator>,
    on_unavailable: UnavailablePolicy,
    front: Option<Box<dyn MemoryFront<R>>>,
    #[cfg(feature = "stats")]
    stats: Arc<CacheStats>,
}

impl<A, R> Memoizer<A, R>
where
    A: ArgumentTuple + 'static,
    R: Serialize + DeserializeOwned + 'static,
{
    /// Starts a builder with the default key extractor and JSON serializer.
    pub fn builder(name: impl Into<String>) -> MemoizerBuilder<A, R> {
        MemoizerBuilder::bare(name)
            .key(ArgumentKey::new())
            .serializer(JsonSerializer)
    }
}

impl<A, R> Memoizer<A, R> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The store this memoizer reads and writes.
    pub fn backend(&self) -> &dyn CacheBackend {
        self.backend.as_ref()
    }

    #[cfg(feature = "stats")]
    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    /// Returns the identifier the arguments are stored under.
    pub fn identifier(&self, args: &A) -> Result<String, KeyError> {
        let key = self.key.derive(args)?;
        Ok(self.hasher.hash(&key))
    }

    /// Runs `compute` through the cache.
    ///
    /// Errors returned by `compute` come back as
    /// [`PersistError::Computation`] and are never stored.
    pub fn call<E, F>(&self, args: A, compute: F) -> Result<R, PersistError<R, E>>
    where
        F: FnOnce(A) -> Result<R, E>,
    {
        let key = self.key.derive(&args).map_err(PersistError::KeyDerivation)?;
        let id = self.hasher.hash(&key);

        if let Some(value) = self.front.as_ref().and_then(|front| front.get(&id)) {
            tracing::debug!(function = %self.name, %id, "memory hit");
            self.record_hit();
            return Ok(value);
        }

        match self.load(&id, &key) {
            Ok(Some(value)) => {
                tracing::debug!(function = %self.name, %id, "cache hit");
                self.record_hit();
                if let Some(front) = &self.front {
                    front.insert(&id, &value);
                }
                return Ok(value);
            }
            Ok(None) => {}
            Err(PersistError::Unavailable(err)) if self.on_unavailable == UnavailablePolicy::Bypass => {
                tracing::warn!(function = %self.name, %id, error = %err, "cache lookup failed, computing without cache");
                return compute(args).map_err(PersistError::Computation);
            }
            Err(err) => return Err(err.with_computation_error()),
        }

        tracing::debug!(function = %self.name, %id, "cache miss");
        self.record_miss();
        let value = compute(args).map_err(PersistError::Computation)?;
        self.store(id, key, value)
    }

    /// Infallible variant of [`call`](Self::call).
    pub fn invoke<F>(&self, args: A, compute: F) -> Result<R, PersistError<R>>
    where
        F: FnOnce(A) -> R,
    {
        self.call(args, |args| Ok::<R, Infallible>(compute(args)))
    }

    /// Returns the stored result for `args` without computing anything.
    pub fn lookup(&self, args: &A) -> Result<Option<R>, PersistError<R>> {
        let key = self.key.derive(args).map_err(PersistError::KeyDerivation)?;
        let id = self.hasher.hash(&key);
        if let Some(value) = self.front.as_ref().and_then(|front| front.get(&id)) {
            return Ok(Some(value));
        }
        self.load(&id, &key)
    }

    /// Whether a result is stored for `args`.
    pub fn contains(&self, args: &A) -> Result<bool, PersistError<R>> {
        let id = self.identifier(args).map_err(PersistError::KeyDerivation)?;
        self.backend.exists(&id).map_err(PersistError::Unavailable)
    }

    /// Deletes the stored result for `args`. Returns whether one existed.
    pub fn remove(&self, args: &A) -> Result<bool, PersistError<R>> {
        let id = self.identifier(args).map_err(PersistError::KeyDerivation)?;
        if let Some(front) = &self.front {
            front.remove(&id);
        }
        self.backend.remove(&id).map_err(PersistError::Unavailable)
    }

    /// Number of results stored for this function.
    pub fn len(&self) -> Result<usize, BackendError> {
        self.backend.len()
    }

    pub fn is_empty(&self) -> Result<bool, BackendError> {
        self.backend.is_empty()
    }

    /// Deletes every stored result of this function.
    pub fn clear(&self) -> Result<(), BackendError> {
        if let Some(front) = &self.front {
            front.clear();
        }
        self.backend.clear()
    }

    /// Keys of every stored result, read back from the entry metadata.
    pub fn keys(&self) -> Result<Vec<CacheKey>, BackendError> {
        Ok(self
            .backend
            .entries()?
            .into_iter()
            .map(|meta| meta.key)
            .collect())
    }

    /// Metadata of every stored result.
    pub fn entries(&self) -> Result<Vec<EntryMetadata>, BackendError> {
        self.backend.entries()
    }

    fn load(&self, id: &str, key: &CacheKey) -> Result<Option<R>, PersistError<R>> {
        if !self.backend.exists(id).map_err(PersistError::Unavailable)? {
            return Ok(None);
        }
        let representation = match self.backend.read(id) {
            Ok(representation) => representation,
            // Removed between the check and the read.
            Err(BackendError::NotFound(_)) => return Ok(None),
            Err(BackendError::InvalidText { message, .. }) => {
                return Err(PersistError::Decode {
                    id: id.to_string(),
                    source: DecodeError::new(message),
                })
            }
            Err(err) => return Err(PersistError::Unavailable(err)),
        };

        if self.verify_key {
            self.verify(id, key)?;
        }

        self.serializer
            .decode(&representation)
            .map(Some)
            .map_err(|source| PersistError::Decode {
                id: id.to_string(),
                source,
            })
    }

    fn verify(&self, id: &str, key: &CacheKey) -> Result<(), PersistError<R>> {
        match self.backend.metadata(id) {
            Ok(Some(meta)) if meta.key.canonical() != key.canonical() => {
                Err(PersistError::HashCollision {
                    id: id.to_string(),
                    stored: meta.key,
                    requested: key.clone(),
                })
            }
            Ok(Some(_)) => Ok(()),
            Ok(None) => {
                tracing::warn!(function = %self.name, %id, "no stored key to verify against");
                Ok(())
            }
            Err(err) => Err(PersistError::Unavailable(err)),
        }
    }

    fn store<E>(&self, id: String, key: CacheKey, value: R) -> Result<R, PersistError<R, E>> {
        let representation = match self.serializer.encode(&value) {
            Ok(representation) => representation,
            Err(source) => {
                tracing::warn!(function = %self.name, %id, error = %source, "result could not be encoded");
                return Err(PersistError::Encode { value, source });
            }
        };

        let mut metadata = EntryMetadata::fresh(self.name.as_str(), key);
        if let Some(annotate) = &self.annotate {
            metadata = metadata.with_annotation(annotate());
        }
        let entry = CacheEntry::new(id, representation, metadata);

        match self.backend.write(&entry) {
            Ok(()) => {
                tracing::debug!(function = %self.name, id = %entry.identifier, "stored result");
                #[cfg(feature = "stats")]
                self.stats.record_store();
                if let Some(front) = &self.front {
                    front.insert(&entry.identifier, &value);
                }
                Ok(value)
            }
            Err(source) => {
                tracing::warn!(function = %self.name, id = %entry.identifier, error = %source, "result could not be stored");
                match self.on_unavailable {
                    UnavailablePolicy::Bypass => Ok(value),
                    UnavailablePolicy::Fail => Err(PersistError::Store { value, source }),
                }
            }
        }
    }

    #[inline]
    fn record_hit(&self) {
        #[cfg(feature = "stats")]
        self.stats.record_hit();
    }

    #[inline]
    fn record_miss(&self) {
        #[cfg(feature = "stats")]
        self.stats.record_miss();
    }
}

impl<A, R> fmt::Debug for Memoizer<A, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Memoizer")
            .field("name", &self.name)
            .field("backend", &self.backend)
            .field("verify_key", &self.verify_key)
            .field("on_unavailable", &self.on_unavailable)
            .field("in_memory", &self.front.is_some())
            .finish_non_exhaustive()
    }
}

enum StoreChoice {
    Location(CacheLocation),
    Backend(Box<dyn CacheBackend>),
    Invalid(BackendError),
}

/// Configures a [`Memoizer`].
///
/// [`Memoizer::builder`] presets the argument-based key and the JSON
/// serializer; [`MemoizerBuilder::bare`] presets nothing, for argument or
/// result types that need their own key extractor or serializer. Without a
/// [`location`](Self::location) the cache lives under `./persist`.
pub struct MemoizerBuilder<A, R> {
    name: String,
    key: Option<Box<dyn KeyExtractor<A>>>,
    hasher: Option<Box<dyn KeyHasher>>,
    serializer: Option<Box<dyn Serializer<R>>>,
    store: Option<StoreChoice>,
    verify_key: bool,
    annotate: Option<Annotator>,
    on_unavailable: UnavailablePolicy,
    front: Option<Box<dyn MemoryFront<R>>>,
}

impl<A: 'static, R: 'static> MemoizerBuilder<A, R> {
    pub fn bare(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key: None,
            hasher: None,
            serializer: None,
            store: None,
            verify_key: false,
            annotate: None,
            on_unavailable: UnavailablePolicy::default(),
            front: None,
        }
    }

    pub fn key(mut self, key: impl KeyExtractor<A> + 'static) -> Self {
        self.key = Some(Box::new(key));
        self
    }

    pub fn hash(mut self, hasher: impl KeyHasher + 'static) -> Self {
        self.hasher = Some(Box::new(hasher));
        self
    }

    pub fn serializer(mut self, serializer: impl Serializer<R> + 'static) -> Self {
        self.serializer = Some(Box::new(serializer));
        self
    }

    /// Uses a `pickle`/`unpickle` closure pair as the serializer.
    pub fn pickle<P, U, E>(self, pickle: P, unpickle: U) -> Self
    where
        P: Fn(&R) -> String + Send + Sync + 'static,
        U: Fn(&str) -> Result<R, E> + Send + Sync + 'static,
        E: fmt::Display + 'static,
    {
        self.serializer(FnSerializer::new(pickle, unpickle))
    }

    pub fn location(mut self, location: CacheLocation) -> Self {
        self.store = Some(StoreChoice::Location(location));
        self
    }

    /// Selects the store from an address such as `file://persist` or
    /// `mongodb://localhost:5000`. An invalid address fails [`build`](Self::build).
    pub fn cache(mut self, address: impl AsRef<str>) -> Self {
        self.store = Some(match CacheLocation::parse(address.as_ref()) {
            Ok(location) => StoreChoice::Location(location),
            Err(err) => StoreChoice::Invalid(err),
        });
        self
    }

    /// Uses an already opened backend.
    pub fn backend(mut self, backend: impl CacheBackend + 'static) -> Self {
        self.store = Some(StoreChoice::Backend(Box::new(backend)));
        self
    }

    /// Compares the stored key with the requested key on every hit.
    pub fn verify_key(mut self, verify: bool) -> Self {
        self.verify_key = verify;
        self
    }

    /// Stores the output of `annotate` with every new entry.
    pub fn annotate(mut self, annotate: impl Fn() -> String + Send + Sync + 'static) -> Self {
        self.annotate = Some(Box::new(annotate));
        self
    }

    pub fn on_unavailable(mut self, policy: UnavailablePolicy) -> Self {
        self.on_unavailable = policy;
        self
    }

    pub fn build(self) -> Result<Memoizer<A, R>, BackendError> {
        let name = self.name;
        let key = self.key.ok_or_else(|| {
            BackendError::Config(format!("no key extractor configured for `{name}`"))
        })?;
        let serializer = self.serializer.ok_or_else(|| {
            BackendError::Config(format!("no serializer configured for `{name}`"))
        })?;
        let backend = match self.store {
            Some(StoreChoice::Backend(backend)) => backend,
            Some(StoreChoice::Location(location)) => location.open(&name)?,
            Some(StoreChoice::Invalid(err)) => return Err(err),
            None => CacheLocation::default().open(&name)?,
        };
        tracing::debug!(function = %name, ?backend, "memoizer ready");

        Ok(Memoizer {
            #[cfg(feature = "stats")]
            stats: crate::stats_registry::register(&name),
            name,
            key,
            hasher: self.hasher.unwrap_or_else(|| Box::new(Sha256Hasher)),
            serializer,
            backend,
            verify_key: self.verify_key,
            annotate: self.annotate,
            on_unavailable: self.on_unavailable,
            front: self.front,
        })
    }
}

impl<A: 'static, R: Clone + Send + Sync + 'static> MemoizerBuilder<A, R> {
    /// Keeps results in a process-local map in front of the backend.
    ///
    /// Entries removed from the backend by another process stay visible here
    /// until [`Memoizer::clear`] or [`Memoizer::remove`] is called on this
    /// memoizer.
    pub fn in_memory(mut self) -> Self {
        self.front = Some(Box::new(DashFront {
            map: DashMap::new(),
        }));
        self
    }
}

impl<A, R> fmt::Debug for MemoizerBuilder<A, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoizerBuilder")
            .field("name", &self.name)
            .field("verify_key", &self.verify_key)
            .field("on_unavailable", &self.on_unavailable)
            .finish_non_exhaustive()
    }
}
