use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::CacheStats;

/// Statistics of every memoized function in the process, by function name.
///
/// Each [`Memoizer`](crate::Memoizer) registers itself when it is built, so
/// functions annotated with `#[persist]` show up here after their first call.
///
/// # Examples
///
/// ```
/// use persisto_core::stats_registry;
///
/// if let Some(stats) = stats_registry::get("power") {
///     println!("power: {} hits, {} stored", stats.hits(), stats.stores());
/// }
///
/// for name in stats_registry::list() {
///     println!("memoized: {name}");
/// }
/// ```
static STATS_REGISTRY: Lazy<RwLock<HashMap<String, Arc<CacheStats>>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

/// Returns the counters registered under `name`, creating them if needed.
///
/// Memoizers sharing a function name share counters, just as they share the
/// stored entries.
pub fn register(name: &str) -> Arc<CacheStats> {
    if let Some(stats) = STATS_REGISTRY.read().get(name) {
        return Arc::clone(stats);
    }
    let mut registry = STATS_REGISTRY.write();
    Arc::clone(
        registry
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(CacheStats::new())),
    )
}

/// Returns a snapshot of the counters of `name`.
pub fn get(name: &str) -> Option<CacheStats> {
    STATS_REGISTRY.read().get(name).map(|stats| (**stats).clone())
}

/// Returns the live counters of `name`.
pub fn get_shared(name: &str) -> Option<Arc<CacheStats>> {
    STATS_REGISTRY.read().get(name).map(Arc::clone)
}

/// Names of all registered functions.
pub fn list() -> Vec<String> {
    STATS_REGISTRY.read().keys().cloned().collect()
}

/// Resets the counters of `name`. Returns `false` if it is not registered.
pub fn reset(name: &str) -> bool {
    match STATS_REGISTRY.read().get(name) {
        Some(stats) => {
            stats.reset();
            true
        }
        None => false,
    }
}

/// Removes every registration.
///
/// Memoizers that already exist keep counting into their own counters; a
/// memoizer built afterwards starts from zero.
pub fn clear() {
    STATS_REGISTRY.write().clear();
}
