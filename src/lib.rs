//! # Persisto
//!
//! Persistent memoization for Rust functions. Results are stored in a local
//! directory tree or a remote document store, so they survive process
//! restarts and can be shared between processes.
//!
//! ## Features
//!
//! - **Easy to use**: add `#[persist]` to a function
//! - **Pluggable pipeline**: custom key extractors, hashers and serializers
//! - **Two backends**: `file://` directory trees and `mongodb://`/`http://`
//!   REST document stores
//! - **Auditable**: every stored value has a JSON metadata record holding its
//!   key and creation time
//! - **Typed failures**: cache problems are never mistaken for misses
//!
//! ## Quick Start
//!
//! ```no_run
//! use persisto::persist;
//!
//! #[persist]
//! fn double(x: f64) -> f64 {
//!     x * 2.0
//! }
//!
//! # fn main() -> Result<(), persisto::PersistError<f64>> {
//! // Computes and writes persist/double/<id>.out
//! assert_eq!(double(3.0)?, 6.0);
//! // Read back from disk, also in the next run of the program
//! assert_eq!(double(3.0)?, 6.0);
//! # Ok(())
//! # }
//! ```
//!
//! ## Readable Identifiers
//!
//! ```no_run
//! use persisto::{persist, CacheKey};
//!
//! #[persist(
//!     key = |x: &u64, y: &u32| (*x, *y),
//!     hash = |key: &CacheKey| {
//!         let (x, y): (u64, u32) = key.decode().unwrap_or_default();
//!         format!("{x}_to_the_power_of_{y}")
//!     },
//!     pickle = |value: &u64| value.to_string(),
//!     unpickle = |text: &str| text.parse::<u64>(),
//! )]
//! fn power(x: u64, y: u32) -> u64 {
//!     x.pow(y)
//! }
//!
//! // Stored as persist/power/2_to_the_power_of_4.out containing `16`
//! assert_eq!(power(2, 4).unwrap(), 16);
//! ```
//!
//! ## Error Handling
//!
//! A `#[persist]` function returning `T` returns `Result<T, PersistError<T>>`.
//! Functions returning `Result<T, E>` keep `E` as
//! [`PersistError::Computation`]; their `Err` values are never stored.
//!
//! A value that was computed but could not be stored comes back inside
//! [`PersistError::Encode`] or [`PersistError::Store`]:
//!
//! ```no_run
//! use persisto::persist;
//!
//! #[persist(cache = "mongodb://localhost:5000")]
//! fn slow_square(x: i64) -> i64 {
//!     x * x
//! }
//!
//! let value = match slow_square(12) {
//!     Ok(value) => value,
//!     Err(err) if err.has_value() => err.into_value().unwrap_or_default(),
//!     Err(err) => panic!("{err}"),
//! };
//! assert_eq!(value, 144);
//! ```
//!
//! ## Without the Macro
//!
//! The same pipeline is available as a value:
//!
//! ```
//! use persisto::{ArgumentKey, CacheLocation, Memoizer};
//!
//! let root = tempfile::tempdir().unwrap();
//! let area = Memoizer::<(u32, u32), u32>::builder("area")
//!     .key(ArgumentKey::named(["width", "height"]))
//!     .location(CacheLocation::filesystem(root.path()))
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(area.invoke((3, 4), |(w, h)| w * h).unwrap(), 12);
//! assert_eq!(area.lookup(&(3, 4)).unwrap(), Some(12));
//! ```

pub use persisto_core::*;
pub use persisto_macros::persist;
