//! Time-windowed "already emitted" memo shared by every observer
//!
//! Watch streams resend overlapping windows on reconnect, so observers keep a
//! map of dedup key -> time first emitted. The map is pruned by a sweep that
//! runs with a small probability on each lookup, keeping the amortised cost
//! per call constant without a background timer.

use chrono::{DateTime, Duration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rand::Rng;
use tracing::debug;

/// How far before construction the `since` cutoff lies by default
pub const DEFAULT_LOOKBACK_SECS: i64 = 60;

/// Entries older than this are dropped by a sweep
pub const DEFAULT_RETENTION_SECS: i64 = 60 * 60;

/// Chance that a single lookup triggers a sweep
pub const DEFAULT_SWEEP_PROBABILITY: f64 = 0.01;

/// Dedup memo keyed by arbitrary strings
#[derive(Debug)]
pub struct DedupCache {
    since: DateTime<Utc>,
    retention: Duration,
    sweep_probability: f64,
    entries: DashMap<String, DateTime<Utc>>,
}

impl Default for DedupCache {
    fn default() -> Self {
        Self::new()
    }
}

impl DedupCache {
    /// Create a cache whose cutoff is one minute before now
    pub fn new() -> Self {
        Self::with_since(Utc::now() - Duration::seconds(DEFAULT_LOOKBACK_SECS))
    }

    /// Create a cache with an explicit cutoff
    pub fn with_since(since: DateTime<Utc>) -> Self {
        Self {
            since,
            retention: Duration::seconds(DEFAULT_RETENTION_SECS),
            sweep_probability: DEFAULT_SWEEP_PROBABILITY,
            entries: DashMap::new(),
        }
    }

    /// Set how long entries survive a sweep
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    /// Set the per-lookup sweep probability (clamped to `0.0..=1.0`)
    pub fn with_sweep_probability(mut self, probability: f64) -> Self {
        self.sweep_probability = probability.clamp(0.0, 1.0);
        self
    }

    /// Cutoff fixed at construction
    pub fn since(&self) -> DateTime<Utc> {
        self.since
    }

    /// True iff `key` was marked at a time after the cutoff
    pub fn seen(&self, key: &str, now: DateTime<Utc>) -> bool {
        self.maybe_sweep(now);
        self.entries
            .get(key)
            .is_some_and(|marked| *marked > self.since)
    }

    /// Record `key` as emitted at `now`
    pub fn mark(&self, key: impl Into<String>, now: DateTime<Utc>) {
        self.entries.insert(key.into(), now);
    }

    /// Atomically check and mark: returns true if `key` was already seen,
    /// otherwise records it and returns false.
    ///
    /// A key that is already seen keeps its original timestamp.
    pub fn check_and_mark(&self, key: &str, now: DateTime<Utc>) -> bool {
        self.maybe_sweep(now);

        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut entry) => {
                if *entry.get() > self.since {
                    true
                } else {
                    entry.insert(now);
                    false
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(now);
                false
            }
        }
    }

    /// Drop entries older than the retention horizon, returning how many went
    pub fn sweep(&self, now: DateTime<Utc>) -> usize {
        let horizon = now - self.retention;
        let before = self.entries.len();
        self.entries.retain(|_, marked| *marked >= horizon);
        let removed = before.saturating_sub(self.entries.len());

        if removed > 0 {
            debug!(removed, remaining = self.entries.len(), "Swept dedup cache");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn maybe_sweep(&self, now: DateTime<Utc>) {
        if self.sweep_probability > 0.0 && rand::rng().random_bool(self.sweep_probability) {
            self.sweep(now);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache_at(now: DateTime<Utc>) -> DedupCache {
        DedupCache::with_since(now - Duration::seconds(60)).with_sweep_probability(0.0)
    }

    #[test]
    fn test_unseen_until_marked() {
        let now = Utc::now();
        let cache = cache_at(now);

        assert!(!cache.seen("pod/web-1", now));
        cache.mark("pod/web-1", now);
        assert!(cache.seen("pod/web-1", now));
        assert!(!cache.seen("pod/web-2", now));
    }

    #[test]
    fn test_marks_before_cutoff_do_not_count() {
        let now = Utc::now();
        let cache = cache_at(now);

        cache.mark("old", now - Duration::seconds(120));
        assert!(!cache.seen("old", now));

        // Re-marking refreshes the stale entry
        assert!(!cache.check_and_mark("old", now));
        assert!(cache.seen("old", now));
    }

    #[test]
    fn test_check_and_mark() {
        let now = Utc::now();
        let cache = cache_at(now);

        assert!(!cache.check_and_mark("node-a", now));
        assert!(cache.check_and_mark("node-a", now + Duration::seconds(5)));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_sweep_past_retention_horizon() {
        let now = Utc::now();
        let cache = cache_at(now);

        cache.mark("a", now);
        cache.mark("b", now + Duration::minutes(30));

        assert_eq!(cache.sweep(now + Duration::minutes(59)), 0);
        assert_eq!(cache.sweep(now + Duration::minutes(61)), 1);
        assert!(!cache.seen("a", now + Duration::minutes(61)));
        assert!(cache.seen("b", now + Duration::minutes(61)));
    }

    #[test]
    fn test_certain_sweep_runs_on_lookup() {
        let now = Utc::now();
        let cache = cache_at(now).with_sweep_probability(1.0);

        cache.mark("a", now);
        assert!(cache.seen("a", now));

        let later = now + Duration::hours(2);
        assert!(!cache.seen("a", later));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_probability_is_clamped() {
        let cache = DedupCache::new().with_sweep_probability(7.0);
        assert!(!cache.seen("anything", Utc::now()));
    }
}
