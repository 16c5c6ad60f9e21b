use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use sha2::{Digest, Sha256};

use crate::CacheKey;

/// Maps a [`CacheKey`] to the identifier under which its result is stored.
///
/// The identifier must be stable: the same key always maps to the same
/// string under a given hasher. The core never tries to reverse it.
///
/// Custom hashers (any `Fn(&CacheKey) -> String`) may produce readable
/// identifiers. Two distinct keys mapping to the same identifier will share
/// one stored result: avoiding such collisions is the caller's job, and the
/// memoizer only detects them when key verification is switched on.
pub trait KeyHasher: Send + Sync {
    fn hash(&self, key: &CacheKey) -> String;
}

impl<F> KeyHasher for F
where
    F: Fn(&CacheKey) -> String + Send + Sync,
{
    fn hash(&self, key: &CacheKey) -> String {
        self(key)
    }
}

/// Default hasher: SHA-256 of the canonical key, URL-safe base64 without
/// padding.
///
/// Identifiers are exactly 43 characters drawn from `[A-Za-z0-9_-]`, which
/// keeps them safe as file names and URL path segments.
///
/// # Examples
///
/// ```
/// use persisto_core::{CacheKey, KeyHasher, Sha256Hasher};
///
/// let key = CacheKey::of(&[("x", 3)]).unwrap();
/// let id = Sha256Hasher.hash(&key);
/// assert_eq!(id.len(), 43);
/// assert_eq!(id, Sha256Hasher.hash(&key));
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct Sha256Hasher;

/// Length of identifiers produced by [`Sha256Hasher`].
pub const SHA256_IDENTIFIER_LEN: usize = 43;

impl KeyHasher for Sha256Hasher {
    fn hash(&self, key: &CacheKey) -> String {
        let digest = Sha256::digest(key.canonical().as_bytes());
        URL_SAFE_NO_PAD.encode(digest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ArgumentKey, KeyExtractor};
    use std::collections::HashSet;

    fn is_safe(id: &str) -> bool {
        id.chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    }

    #[test]
    fn test_identifier_shape() {
        let key = CacheKey::of("somestringkey123").unwrap();
        let id = Sha256Hasher.hash(&key);
        assert_eq!(id.len(), SHA256_IDENTIFIER_LEN);
        assert!(is_safe(&id));
    }

    #[test]
    fn test_identifier_is_stable() {
        let first = CacheKey::of(&(("arg1", vec![1, 1, 2, 3, 5, 8, 13]), ("x", "hello"))).unwrap();
        let second = CacheKey::of(&(("arg1", vec![1, 1, 2, 3, 5, 8, 13]), ("x", "hello"))).unwrap();
        assert_eq!(Sha256Hasher.hash(&first), Sha256Hasher.hash(&second));
    }

    #[test]
    fn test_no_collisions_over_many_inputs() {
        let extractor = ArgumentKey::named(["x", "y"]);
        let mut seen = HashSet::new();
        for x in 0..200i64 {
            for y in 0..60i64 {
                let key = extractor.derive(&(x, y)).unwrap();
                let id = Sha256Hasher.hash(&key);
                assert!(is_safe(&id));
                assert!(seen.insert(id), "collision for ({x}, {y})");
            }
        }
        assert_eq!(seen.len(), 12_000);
    }

    #[test]
    fn test_custom_hasher_closure() {
        let hasher = |key: &CacheKey| {
            let (x, y): (u32, u32) = key.decode().unwrap_or_default();
            format!("{x}_to_the_power_of_{y}")
        };
        let key = CacheKey::of(&(2, 4)).unwrap();
        assert_eq!(hasher.hash(&key), "2_to_the_power_of_4");
    }
}
