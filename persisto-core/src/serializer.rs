use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Display;
use std::marker::PhantomData;
use std::str::FromStr;

use crate::finite::ensure_finite;

/// A computed value could not be turned into a storable representation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("value could not be encoded: {message}")]
pub struct EncodeError {
    message: String,
}

impl EncodeError {
    pub fn new(message: impl Display) -> Self {
        Self {
            message: message.to_string(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// A stored representation could not be turned back into a value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("stored representation could not be decoded: {message}")]
pub struct DecodeError {
    message: String,
}

impl DecodeError {
    pub fn new(message: impl Display) -> Self {
        Self {
            message: message.to_string(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Encode/decode pair converting results to the text stored by a backend.
///
/// Implementations should satisfy `decode(encode(v)) == v` for every value
/// the wrapped function can return, under whatever equality the caller
/// relies on.
pub trait Serializer<R>: Send + Sync {
    fn encode(&self, value: &R) -> Result<String, EncodeError>;
    fn decode(&self, representation: &str) -> Result<R, DecodeError>;
}

/// Default serializer: structural JSON through `serde`.
///
/// # Examples
///
/// ```
/// use persisto_core::{JsonSerializer, Serializer};
///
/// let text = Serializer::<Vec<u32>>::encode(&JsonSerializer, &vec![1, 2, 3]).unwrap();
/// assert_eq!(text, "[1,2,3]");
/// let back: Vec<u32> = JsonSerializer.decode(&text).unwrap();
/// assert_eq!(back, vec![1, 2, 3]);
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl<R> Serializer<R> for JsonSerializer
where
    R: Serialize + DeserializeOwned,
{
    fn encode(&self, value: &R) -> Result<String, EncodeError> {
        ensure_finite(value).map_err(EncodeError::new)?;
        serde_json::to_string(value).map_err(EncodeError::new)
    }

    fn decode(&self, representation: &str) -> Result<R, DecodeError> {
        serde_json::from_str(representation).map_err(DecodeError::new)
    }
}

/// Stringify/parse serializer built on `ToString` and `FromStr`.
///
/// Stored files stay human readable. Round-trip fidelity is whatever the
/// type's `Display` and `FromStr` impls provide.
///
/// # Examples
///
/// ```
/// use persisto_core::{DisplaySerializer, Serializer};
///
/// let text = Serializer::<u64>::encode(&DisplaySerializer, &16).unwrap();
/// assert_eq!(text, "16");
/// let value: u64 = DisplaySerializer.decode("16").unwrap();
/// assert_eq!(value, 16);
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct DisplaySerializer;

impl<R> Serializer<R> for DisplaySerializer
where
    R: ToString + FromStr,
    R::Err: Display,
{
    fn encode(&self, value: &R) -> Result<String, EncodeError> {
        Ok(value.to_string())
    }

    fn decode(&self, representation: &str) -> Result<R, DecodeError> {
        representation.parse().map_err(DecodeError::new)
    }
}

/// Serializer assembled from a caller-supplied `pickle`/`unpickle` pair.
///
/// # Examples
///
/// ```
/// use persisto_core::{FnSerializer, Serializer};
///
/// let serializer = FnSerializer::new(
///     |value: &u64| format!("{value:x}"),
///     |text: &str| u64::from_str_radix(text, 16),
/// );
/// assert_eq!(serializer.encode(&255).unwrap(), "ff");
/// assert_eq!(serializer.decode("ff").unwrap(), 255);
/// ```
pub struct FnSerializer<R, P, U> {
    pickle: P,
    unpickle: U,
    _value: PhantomData<fn(&str) -> R>,
}

impl<R, P, U, E> FnSerializer<R, P, U>
where
    P: Fn(&R) -> String + Send + Sync,
    U: Fn(&str) -> Result<R, E> + Send + Sync,
    E: Display,
{
    pub fn new(pickle: P, unpickle: U) -> Self {
        Self {
            pickle,
            unpickle,
            _value: PhantomData,
        }
    }
}

impl<R, P, U, E> Serializer<R> for FnSerializer<R, P, U>
where
    P: Fn(&R) -> String + Send + Sync,
    U: Fn(&str) -> Result<R, E> + Send + Sync,
    E: Display,
{
    fn encode(&self, value: &R) -> Result<String, EncodeError> {
        Ok((self.pickle)(value))
    }

    fn decode(&self, representation: &str) -> Result<R, DecodeError> {
        (self.unpickle)(representation).map_err(DecodeError::new)
    }
}
