use std::sync::atomic::{AtomicU64, Ordering};

/// Per-function counters of a persistent cache.
///
/// A hit is a lookup answered by the store (or the in-memory front layer), a
/// miss is a lookup that led to calling the wrapped function, and a store is
/// a computed value that reached the backend. `misses - stores` is therefore
/// the number of results that could not be cached.
///
/// All counters use `Relaxed` atomics; they are monitoring data, not
/// synchronization.
///
/// # Examples
///
/// ```
/// use persisto_core::CacheStats;
///
/// let stats = CacheStats::new();
/// stats.record_miss();
/// stats.record_store();
/// stats.record_hit();
///
/// assert_eq!(stats.total_accesses(), 2);
/// assert_eq!(stats.stores(), 1);
/// assert!((stats.hit_rate() - 0.5).abs() < f64::EPSILON);
/// ```
#[derive(Debug)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    stores: AtomicU64,
}

impl CacheStats {
    pub fn new() -> Self {
        Self {
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            stores: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a computed value written to the backend.
    #[inline]
    pub fn record_store(&self) {
        self.stores.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn stores(&self) -> u64 {
        self.stores.load(Ordering::Relaxed)
    }

    /// Hits plus misses.
    #[inline]
    pub fn total_accesses(&self) -> u64 {
        self.hits() + self.misses()
    }

    /// Fraction of lookups answered from the cache, `0.0` without accesses.
    #[inline]
    pub fn hit_rate(&self) -> f64 {
        let total = self.total_accesses();
        if total == 0 {
            0.0
        } else {
            self.hits() as f64 / total as f64
        }
    }

    #[inline]
    pub fn miss_rate(&self) -> f64 {
        1.0 - self.hit_rate()
    }

    /// Resets every counter to zero. Stored entries are not affected.
    pub fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.stores.store(0, Ordering::Relaxed);
    }
}

impl Default for CacheStats {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for CacheStats {
    fn clone(&self) -> Self {
        Self {
            hits: AtomicU64::new(self.hits()),
            misses: AtomicU64::new(self.misses()),
            stores: AtomicU64::new(self.stores()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_stats() {
        let stats = CacheStats::new();
        assert_eq!(stats.hits(), 0);
        assert_eq!(stats.misses(), 0);
        assert_eq!(stats.stores(), 0);
        assert_eq!(stats.total_accesses(), 0);
    }

    #[test]
    fn test_rates() {
        let stats = CacheStats::new();
        stats.record_hit();
        stats.record_hit();
        stats.record_miss();
        assert!((stats.hit_rate() - 0.6666).abs() < 0.001);
        assert!((stats.miss_rate() - 0.3333).abs() < 0.001);
    }

    #[test]
    fn test_hit_rate_no_accesses() {
        let stats = CacheStats::default();
        assert_eq!(stats.hit_rate(), 0.0);
        assert_eq!(stats.miss_rate(), 1.0);
    }

    #[test]
    fn test_stores_are_not_accesses() {
        let stats = CacheStats::new();
        stats.record_miss();
        stats.record_store();
        stats.record_miss();
        assert_eq!(stats.total_accesses(), 2);
        assert_eq!(stats.misses() - stats.stores(), 1);
    }

    #[test]
    fn test_reset() {
        let stats = CacheStats::new();
        stats.record_hit();
        stats.record_miss();
        stats.record_store();

        stats.reset();
        assert_eq!(stats.hits(), 0);
        assert_eq!(stats.misses(), 0);
        assert_eq!(stats.stores(), 0);
    }

    #[test]
    fn test_clone_is_snapshot() {
        let stats = CacheStats::new();
        stats.record_hit();
        stats.record_store();

        let snapshot = stats.clone();
        stats.record_hit();
        assert_eq!(stats.hits(), 2);
        assert_eq!(snapshot.hits(), 1);
        assert_eq!(snapshot.stores(), 1);
    }

    #[test]
    fn test_concurrent_access() {
        use std::sync::Arc;
        use std::thread;

        let stats = Arc::new(CacheStats::new());
        let mut handles = vec![];

        for _ in 0..8 {
            let stats = Arc::clone(&stats);
            handles.push(thread::spawn(move || {
                for _ in 0..100 {
                    stats.record_hit();
                }
                for _ in 0..25 {
                    stats.record_miss();
                    stats.record_store();
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(stats.hits(), 800);
        assert_eq!(stats.misses(), 200);
        assert_eq!(stats.stores(), 200);
        assert!((stats.hit_rate() - 0.8).abs() < 0.001);
    }
}
