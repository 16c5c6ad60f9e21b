use std::convert::Infallible;
use std::error::Error;
use std::fmt;

use crate::{BackendError, CacheKey, DecodeError, EncodeError, KeyError};

/// Failure of a memoized call.
///
/// `R` is the result type of the wrapped function and `E` its own error type
/// ([`Infallible`] for functions that cannot fail).
///
/// Two variants are raised after the function has run successfully:
/// [`Encode`](Self::Encode) and [`Store`](Self::Store). They carry the
/// computed value, so a caller that only cares about the result can recover
/// it with [`into_value`](Self::into_value) and treat the lost cache write as
/// a warning.
#[derive(Debug)]
pub enum PersistError<R, E = Infallible> {
    /// The arguments could not be turned into a cache key.
    KeyDerivation(KeyError),
    /// The backend could not tell whether a result is stored. The function
    /// was not called.
    Unavailable(BackendError),
    /// A stored result exists but could not be decoded. The function was not
    /// called and nothing was overwritten.
    Decode { id: String, source: DecodeError },
    /// The stored entry under this identifier belongs to a different key.
    HashCollision {
        id: String,
        stored: CacheKey,
        requested: CacheKey,
    },
    /// The computed value could not be encoded, so it was not stored.
    Encode { value: R, source: EncodeError },
    /// The computed value could not be written to the backend.
    Store { value: R, source: BackendError },
    /// The wrapped function itself failed. Nothing was stored.
    Computation(E),
}

impl<R, E> PersistError<R, E> {
    /// Returns the computed value carried by post-computation failures.
    pub fn into_value(self) -> Option<R> {
        match self {
            Self::Encode { value, .. } | Self::Store { value, .. } => Some(value),
            _ => None,
        }
    }

    /// Returns a reference to the computed value, if this failure carries one.
    pub fn value(&self) -> Option<&R> {
        match self {
            Self::Encode { value, .. } | Self::Store { value, .. } => Some(value),
            _ => None,
        }
    }

    /// True when the wrapped function ran and produced a value.
    pub fn has_value(&self) -> bool {
        self.value().is_some()
    }

    /// Returns the wrapped function's own error.
    pub fn into_computation(self) -> Option<E> {
        match self {
            Self::Computation(err) => Some(err),
            _ => None,
        }
    }
}

impl<R> PersistError<R, Infallible> {
    /// Widens the computation error type of an infallible call.
    pub fn with_computation_error<E>(self) -> PersistError<R, E> {
        match self {
            Self::KeyDerivation(err) => PersistError::KeyDerivation(err),
            Self::Unavailable(err) => PersistError::Unavailable(err),
            Self::Decode { id, source } => PersistError::Decode { id, source },
            Self::HashCollision {
                id,
                stored,
                requested,
            } => PersistError::HashCollision {
                id,
                stored,
                requested,
            },
            Self::Encode { value, source } => PersistError::Encode { value, source },
            Self::Store { value, source } => PersistError::Store { value, source },
            Self::Computation(never) => match never {},
        }
    }
}

impl<R, E: fmt::Display> fmt::Display for PersistError<R, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::KeyDerivation(err) => write!(f, "failed to derive cache key: {err}"),
            Self::Unavailable(err) => write!(f, "cache backend unavailable: {err}"),
            Self::Decode { id, source } => write!(f, "cached entry `{id}` is unreadable: {source}"),
            Self::HashCollision {
                id,
                stored,
                requested,
            } => write!(
                f,
                "hash collision on `{id}`: stored key {stored} differs from requested key {requested}"
            ),
            Self::Encode { source, .. } => write!(f, "computed value was not cached: {source}"),
            Self::Store { source, .. } => write!(f, "computed value was not cached: {source}"),
            Self::Computation(err) => write!(f, "computation failed: {err}"),
        }
    }
}

impl<R, E> Error for PersistError<R, E>
where
    R: fmt::Debug,
    E: Error + 'static,
{
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::KeyDerivation(err) => Some(err),
            Self::Unavailable(err) => Some(err),
            Self::Decode { source, .. } => Some(source),
            Self::HashCollision { .. } => None,
            Self::Encode { source, .. } => Some(source),
            Self::Store { source, .. } => Some(source),
            Self::Computation(err) => Some(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, thiserror::Error)]
    #[error("division by zero")]
    struct DivisionByZero;

    #[test]
    fn test_store_failure_keeps_value() {
        let err: PersistError<u32> = PersistError::Store {
            value: 16,
            source: BackendError::Transport("connection refused".into()),
        };
        assert!(err.has_value());
        assert!(err.to_string().contains("connection refused"));
        assert_eq!(err.into_value(), Some(16));
    }

    #[test]
    fn test_lookup_failures_carry_no_value() {
        let err: PersistError<u32> = PersistError::Unavailable(BackendError::Config("x".into()));
        assert!(!err.has_value());
        assert_eq!(err.into_value(), None);
    }

    #[test]
    fn test_computation_error_is_source() {
        let err: PersistError<f64, DivisionByZero> = PersistError::Computation(DivisionByZero);
        assert_eq!(err.to_string(), "computation failed: division by zero");
        assert!(err.source().is_some());
        assert_eq!(err.into_computation(), Some(DivisionByZero));
    }

    #[test]
    fn test_widen_infallible() {
        let err: PersistError<u8> = PersistError::Encode {
            value: 1,
            source: EncodeError::new("nope"),
        };
        let widened: PersistError<u8, DivisionByZero> = err.with_computation_error();
        assert_eq!(widened.into_value(), Some(1));
    }
}
