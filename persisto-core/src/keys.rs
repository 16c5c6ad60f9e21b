use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use crate::finite::ensure_finite;

/// Error raised while turning call arguments into a [`CacheKey`].
///
/// When key derivation fails the call is aborted before the wrapped function
/// runs, so nothing is computed and nothing is stored.
#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    /// A single argument could not be captured through its `Serialize` impl.
    #[error("argument `{name}` could not be captured: {source}")]
    Argument {
        name: String,
        #[source]
        source: serde_json::Error,
    },
    /// A key value (or a stored key read back for inspection) did not
    /// serialize or deserialize.
    #[error("cache key could not be built: {0}")]
    Serialize(#[from] serde_json::Error),
    /// A custom extractor rejected the arguments.
    #[error("cache key could not be built: {0}")]
    Rejected(String),
    /// A float in the key is NaN or infinite. JSON would record it as
    /// `null`, merging it with every other such call.
    #[error("cache key could not be built: {0}")]
    NonFinite(String),
}

/// The ordered, named arguments of one invocation.
///
/// Every value is captured through `serde`, which gives the default key a
/// structural representation that does not depend on `Debug` output or on
/// pointer identity.
///
/// # Examples
///
/// ```
/// use persisto_core::CallArguments;
///
/// let args = CallArguments::new()
///     .arg("x", &3)
///     .unwrap()
///     .arg("label", "three")
///     .unwrap();
///
/// assert_eq!(args.len(), 2);
/// assert_eq!(args.get("x"), Some(&serde_json::json!(3)));
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallArguments {
    args: Vec<(String, Value)>,
}

impl CallArguments {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a named argument, capturing its value.
    pub fn arg<T>(mut self, name: impl Into<String>, value: &T) -> Result<Self, KeyError>
    where
        T: Serialize + ?Sized,
    {
        let name = name.into();
        if let Err(err) = ensure_finite(value) {
            return Err(KeyError::NonFinite(format!("argument `{name}`: {err}")));
        }
        match serde_json::to_value(value) {
            Ok(value) => {
                self.args.push((name, value));
                Ok(self)
            }
            Err(source) => Err(KeyError::Argument { name, source }),
        }
    }

    /// Appends an already captured argument value.
    pub fn push_value(&mut self, name: impl Into<String>, value: Value) {
        self.args.push((name.into(), value));
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.args
            .iter()
            .find(|(arg_name, _)| arg_name == name)
            .map(|(_, value)| value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.args.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.args.len()
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }
}

/// Argument lists that can be presented to a key extractor as named
/// [`CallArguments`].
///
/// Implemented for [`CallArguments`] itself and for tuples of up to twelve
/// `Serialize` values. Tuple elements take their names from `names`; an
/// element without a name is called `argN` after its position.
pub trait ArgumentTuple {
    fn to_call_arguments(&self, names: &[String]) -> Result<CallArguments, KeyError>;
}

impl ArgumentTuple for CallArguments {
    fn to_call_arguments(&self, _names: &[String]) -> Result<CallArguments, KeyError> {
        Ok(self.clone())
    }
}

impl ArgumentTuple for () {
    fn to_call_arguments(&self, _names: &[String]) -> Result<CallArguments, KeyError> {
        Ok(CallArguments::new())
    }
}

fn name_at(names: &[String], index: usize) -> String {
    names
        .get(index)
        .cloned()
        .unwrap_or_else(|| format!("arg{index}"))
}

macro_rules! impl_argument_tuple {
    ($($idx:tt $ty:ident),+) => {
        impl<$($ty: Serialize),+> ArgumentTuple for ($($ty,)+) {
            fn to_call_arguments(&self, names: &[String]) -> Result<CallArguments, KeyError> {
                let mut args = CallArguments::new();
                $(
                    args = args.arg(name_at(names, $idx), &self.$idx)?;
                )+
                Ok(args)
            }
        }
    };
}

impl_argument_tuple!(0 A1);
impl_argument_tuple!(0 A1, 1 A2);
impl_argument_tuple!(0 A1, 1 A2, 2 A3);
impl_argument_tuple!(0 A1, 1 A2, 2 A3, 3 A4);
impl_argument_tuple!(0 A1, 1 A2, 2 A3, 3 A4, 4 A5);
impl_argument_tuple!(0 A1, 1 A2, 2 A3, 3 A4, 4 A5, 5 A6);
impl_argument_tuple!(0 A1, 1 A2, 2 A3, 3 A4, 4 A5, 5 A6, 6 A7);
impl_argument_tuple!(0 A1, 1 A2, 2 A3, 3 A4, 4 A5, 5 A6, 6 A7, 7 A8);
impl_argument_tuple!(0 A1, 1 A2, 2 A3, 3 A4, 4 A5, 5 A6, 6 A7, 7 A8, 8 A9);
impl_argument_tuple!(0 A1, 1 A2, 2 A3, 3 A4, 4 A5, 5 A6, 6 A7, 7 A8, 8 A9, 9 A10);
impl_argument_tuple!(0 A1, 1 A2, 2 A3, 3 A4, 4 A5, 5 A6, 6 A7, 7 A8, 8 A9, 9 A10, 10 A11);
impl_argument_tuple!(0 A1, 1 A2, 2 A3, 3 A4, 4 A5, 5 A6, 6 A7, 7 A8, 8 A9, 9 A10, 10 A11, 11 A12);

/// Canonical identity of one call.
///
/// A `CacheKey` is a structural value. Two keys are equal exactly when their
/// structures are equal, and [`canonical`](Self::canonical) renders them into
/// a stable text form (object members sorted by name) that the default hasher
/// digests.
///
/// # Examples
///
/// ```
/// use persisto_core::CacheKey;
///
/// let key = CacheKey::of(&(2, 4)).unwrap();
/// assert_eq!(key.canonical(), "[2,4]");
///
/// let (x, y): (u32, u32) = key.decode().unwrap();
/// assert_eq!((x, y), (2, 4));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(Value);

impl CacheKey {
    /// Builds a key from any serializable value.
    pub fn of<T: Serialize + ?Sized>(value: &T) -> Result<Self, KeyError> {
        ensure_finite(value).map_err(|err| KeyError::NonFinite(err.to_string()))?;
        Ok(Self(serde_json::to_value(value)?))
    }

    pub fn from_value(value: Value) -> Self {
        Self(value)
    }

    pub fn value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }

    /// Reads the key back as a typed value.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, KeyError> {
        Ok(serde_json::from_value(self.0.clone())?)
    }

    /// Compact JSON with every object's members sorted by name.
    pub fn canonical(&self) -> String {
        sorted(&self.0).to_string()
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}

// Rebuilds objects in name order, independent of the map representation
// serde_json was compiled with.
fn sorted(value: &Value) -> Value {
    match value {
        Value::Array(items) => Value::Array(items.iter().map(sorted).collect()),
        Value::Object(members) => {
            let mut names: Vec<&String> = members.keys().collect();
            names.sort();
            let mut out = Map::new();
            for name in names {
                out.insert(name.clone(), sorted(&members[name.as_str()]));
            }
            Value::Object(out)
        }
        other => other.clone(),
    }
}

/// Derives the [`CacheKey`] of a call from its arguments.
///
/// Extractors must be deterministic and free of side effects. A
/// non-deterministic extractor silently breaks reuse of stored results; the
/// memoizer cannot detect it.
///
/// Any `Fn(&A) -> Result<CacheKey, KeyError>` closure is an extractor. Use
/// [`key_fn`] to build one from a closure returning any serializable value.
pub trait KeyExtractor<A: ?Sized>: Send + Sync {
    fn derive(&self, args: &A) -> Result<CacheKey, KeyError>;
}

impl<A: ?Sized, F> KeyExtractor<A> for F
where
    F: Fn(&A) -> Result<CacheKey, KeyError> + Send + Sync,
{
    fn derive(&self, args: &A) -> Result<CacheKey, KeyError> {
        self(args)
    }
}

/// Wraps a closure producing any serializable value into a [`KeyExtractor`].
///
/// # Examples
///
/// ```
/// use persisto_core::{key_fn, KeyExtractor};
///
/// // Ignore the second element: calls differing only in it share a key.
/// let extractor = key_fn(|args: &(u32, String)| args.0);
/// let a = extractor.derive(&(7, "first".to_string())).unwrap();
/// let b = extractor.derive(&(7, "second".to_string())).unwrap();
/// assert_eq!(a, b);
/// ```
pub fn key_fn<A, K, F>(f: F) -> impl Fn(&A) -> Result<CacheKey, KeyError> + Send + Sync
where
    A: ?Sized,
    K: Serialize,
    F: Fn(&A) -> K + Send + Sync,
{
    move |args: &A| CacheKey::of(&f(args))
}

/// Default key extractor: every argument, keyed by name.
///
/// The key is the list of `[name, value]` pairs sorted by argument name, so
/// it preserves names and does not depend on the order in which named
/// arguments were supplied.
///
/// # Examples
///
/// ```
/// use persisto_core::{ArgumentKey, KeyExtractor};
///
/// let extractor = ArgumentKey::named(["x", "a"]);
/// let key = extractor.derive(&(10, 15)).unwrap();
/// assert_eq!(key.canonical(), r#"[["a",15],["x",10]]"#);
/// ```
#[derive(Debug, Clone, Default)]
pub struct ArgumentKey {
    names: Vec<String>,
}

impl ArgumentKey {
    pub fn new() -> Self {
        Self::default()
    }

    /// Names the positional elements of tuple arguments.
    pub fn named<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    fn key_of(args: &CallArguments) -> CacheKey {
        let mut pairs: Vec<(&str, &Value)> = args.iter().collect();
        pairs.sort_by(|a, b| a.0.cmp(b.0));
        let pairs = pairs
            .into_iter()
            .map(|(name, value)| Value::Array(vec![Value::String(name.to_string()), value.clone()]))
            .collect();
        CacheKey(Value::Array(pairs))
    }
}

impl<A: ArgumentTuple + ?Sized> KeyExtractor<A> for ArgumentKey {
    fn derive(&self, args: &A) -> Result<CacheKey, KeyError> {
        let args = args.to_call_arguments(&self.names)?;
        Ok(Self::key_of(&args))
    }
}
