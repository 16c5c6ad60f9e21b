use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::CacheKey;

/// Audit record stored next to every value.
///
/// The metadata keeps the original [`CacheKey`], which identifiers cannot be
/// reversed into, together with the creation time and the name of the
/// function that produced the value. Both backends store it as plain JSON
/// so it can be inspected without this crate.
///
/// # Examples
///
/// ```
/// use persisto_core::{CacheKey, EntryMetadata};
///
/// let meta = EntryMetadata::fresh("double", CacheKey::of(&[("x", 3)]).unwrap());
/// assert_eq!(meta.function, "double");
/// assert!(meta.annotation.is_none());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryMetadata {
    pub function: String,
    pub key: CacheKey,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotation: Option<String>,
}

impl EntryMetadata {
    /// Creates metadata for a freshly computed value.
    pub fn fresh(function: impl Into<String>, key: CacheKey) -> Self {
        Self {
            function: function.into(),
            key,
            created_at: Utc::now(),
            annotation: None,
        }
    }

    pub fn with_annotation(mut self, annotation: impl Into<String>) -> Self {
        self.annotation = Some(annotation.into());
        self
    }
}

/// The persisted unit: an encoded value under its identifier.
///
/// Entries are created on a miss and never modified afterwards. Writing an
/// entry under an identifier that already holds one replaces it (filesystem)
/// or is accepted as already present (remote store).
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub identifier: String,
    pub representation: String,
    pub metadata: EntryMetadata,
}

impl CacheEntry {
    pub fn new(
        identifier: impl Into<String>,
        representation: impl Into<String>,
        metadata: EntryMetadata,
    ) -> Self {
        Self {
            identifier: identifier.into(),
            representation: representation.into(),
            metadata,
        }
    }
}
