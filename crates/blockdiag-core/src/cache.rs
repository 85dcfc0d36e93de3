// ABOUTME: Height-keyed cache of block diagnostic entries with an Open -> Finalized -> Evicted lifecycle.
// ABOUTME: Accepts appends only for open entries and counts records that arrive too late.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::builder::RecordBuilder;
use crate::model::{BlockDiagnosticEntry, DiagnosticRun};

/// What happened to an appended run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum AppendOutcome {
    Accepted,
    /// The run targeted a finalized entry, or a height older than the highest
    /// one seen that is no longer cached. It was dropped.
    LateArrival,
}

/// Point-in-time counters describing the cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub cached: usize,
    pub open: usize,
    pub unpersisted: usize,
    pub highest_seen: Option<u64>,
    pub late_arrivals: u64,
}

/// Owns every cached entry. Not synchronized on its own; a single owner
/// (see [`crate::actor`]) serializes access.
#[derive(Debug, Default)]
pub struct CacheStore {
    builder: RecordBuilder,
    entries: BTreeMap<u64, BlockDiagnosticEntry>,
    highest_seen: Option<u64>,
    late_arrivals: u64,
}

impl CacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store whose new entries come from `builder`.
    pub fn with_builder(builder: RecordBuilder) -> Self {
        Self {
            builder,
            ..Self::default()
        }
    }

    /// Return the open entry for `height`, creating it if needed.
    ///
    /// Returns `None` when the entry is finalized, or when it is absent and
    /// `height` is below the highest height seen so far.
    pub fn get_or_create(&mut self, height: u64) -> Option<&mut BlockDiagnosticEntry> {
        let absent = !self.entries.contains_key(&height);
        if absent && self.highest_seen.is_some_and(|h| height < h) {
            return None;
        }
        self.highest_seen = Some(self.highest_seen.map_or(height, |h| h.max(height)));

        let builder = &self.builder;
        let entry = self.entries.entry(height).or_insert_with(|| {
            tracing::debug!(height, "opening cache entry");
            builder.new_entry(height)
        });
        if entry.is_finalized() { None } else { Some(entry) }
    }

    /// Add `run` under `module` for `height`. Late runs are dropped and counted.
    pub fn append(&mut self, height: u64, module: &str, run: DiagnosticRun) -> AppendOutcome {
        match self.get_or_create(height) {
            Some(entry) => {
                entry.diagnostics.entry(module.to_string()).or_default().push(run);
                AppendOutcome::Accepted
            }
            None => {
                self.late_arrivals += 1;
                tracing::warn!(
                    height,
                    module,
                    late_arrivals = self.late_arrivals,
                    "dropping diagnostic record for a finalized or expired height"
                );
                AppendOutcome::LateArrival
            }
        }
    }

    /// Stamp `time_end` on the entry. Returns true only on the call that
    /// actually finalized it; absent or already-finalized entries are untouched.
    pub fn finalize(&mut self, height: u64) -> bool {
        match self.entries.get_mut(&height) {
            Some(entry) if entry.is_open() => {
                entry.time_end = Some(chrono::Utc::now());
                tracing::debug!(height, "finalized cache entry");
                true
            }
            _ => false,
        }
    }

    pub fn evict(&mut self, height: u64) -> Option<BlockDiagnosticEntry> {
        self.entries.remove(&height)
    }

    /// Remove every entry at or below `height`, returning the removed entries.
    pub fn evict_at_or_below(&mut self, height: u64) -> Vec<BlockDiagnosticEntry> {
        let kept = match height.checked_add(1) {
            Some(bound) => self.entries.split_off(&bound),
            None => BTreeMap::new(),
        };
        std::mem::replace(&mut self.entries, kept).into_values().collect()
    }

    pub fn contains(&self, height: u64) -> bool {
        self.entries.contains_key(&height)
    }

    pub fn get(&self, height: u64) -> Option<&BlockDiagnosticEntry> {
        self.entries.get(&height)
    }

    pub fn heights(&self) -> Vec<u64> {
        self.entries.keys().copied().collect()
    }

    /// Open entries strictly below `height`, ascending.
    pub fn open_heights_below(&self, height: u64) -> Vec<u64> {
        self.entries
            .range(..height)
            .filter(|(_, e)| e.is_open())
            .map(|(h, _)| *h)
            .collect()
    }

    /// Finalized entries still held in memory. Successfully persisted entries
    /// are evicted straight away, so these are the ones whose write failed.
    pub fn unpersisted_heights(&self) -> Vec<u64> {
        self.entries
            .iter()
            .filter(|(_, e)| e.is_finalized())
            .map(|(h, _)| *h)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        let open = self.entries.values().filter(|e| e.is_open()).count();
        CacheStats {
            cached: self.entries.len(),
            open,
            unpersisted: self.entries.len() - open,
            highest_seen: self.highest_seen,
            late_arrivals: self.late_arrivals,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Metadata;
    use serde_json::json;

    fn run(module: &str, height: u64) -> DiagnosticRun {
        DiagnosticRun::new(module.to_string(), height, Metadata::new(), json!({"height": height}))
    }

    #[test]
    fn append_creates_entry_and_keeps_arrival_order() {
        let mut cache = CacheStore::new();
        let first = run("a", 100);
        let second = run("a", 100);
        let first_id = first.run_id;
        let second_id = second.run_id;

        assert_eq!(cache.append(100, "a", first), AppendOutcome::Accepted);
        assert_eq!(cache.append(100, "a", second), AppendOutcome::Accepted);
        assert_eq!(cache.append(100, "b", run("b", 100)), AppendOutcome::Accepted);

        let entry = cache.get(100).expect("entry cached");
        let runs = &entry.diagnostics["a"];
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].run_id, first_id);
        assert_eq!(runs[1].run_id, second_id);
        assert_eq!(entry.run_count(), 3);
    }

    #[test]
    fn finalize_is_idempotent() {
        let mut cache = CacheStore::new();
        cache.append(5, "a", run("a", 5));

        assert!(cache.finalize(5));
        let first_end = cache.get(5).unwrap().time_end;
        assert!(first_end.is_some());

        assert!(!cache.finalize(5));
        assert_eq!(cache.get(5).unwrap().time_end, first_end);
    }

    #[test]
    fn finalize_absent_height_is_noop() {
        let mut cache = CacheStore::new();
        assert!(!cache.finalize(1));
        assert!(cache.is_empty());
    }

    #[test]
    fn append_to_finalized_entry_is_late_arrival() {
        let mut cache = CacheStore::new();
        cache.append(10, "a", run("a", 10));
        cache.finalize(10);

        assert_eq!(cache.append(10, "a", run("a", 10)), AppendOutcome::LateArrival);
        assert_eq!(cache.get(10).unwrap().run_count(), 1);
        assert_eq!(cache.stats().late_arrivals, 1);
        assert!(cache.get_or_create(10).is_none());
    }

    #[test]
    fn append_below_highest_seen_for_absent_height_is_late_arrival() {
        let mut cache = CacheStore::new();
        cache.append(20, "a", run("a", 20));

        assert_eq!(cache.append(19, "a", run("a", 19)), AppendOutcome::LateArrival);
        assert!(!cache.contains(19));
        assert_eq!(cache.stats().highest_seen, Some(20));
    }

    #[test]
    fn append_to_evicted_height_is_late_arrival() {
        let mut cache = CacheStore::new();
        cache.append(30, "a", run("a", 30));
        cache.append(31, "a", run("a", 31));
        cache.evict(30);

        assert_eq!(cache.append(30, "a", run("a", 30)), AppendOutcome::LateArrival);
        assert!(!cache.contains(30));
    }

    #[test]
    fn open_lower_entries_still_accept_appends() {
        let mut cache = CacheStore::new();
        cache.append(40, "a", run("a", 40));
        cache.append(41, "a", run("a", 41));

        assert_eq!(cache.append(40, "b", run("b", 40)), AppendOutcome::Accepted);
        assert_eq!(cache.get(40).unwrap().run_count(), 2);
    }

    #[test]
    fn evict_absent_height_is_noop() {
        let mut cache = CacheStore::new();
        assert!(cache.evict(77).is_none());
    }

    #[test]
    fn evict_at_or_below_splits_on_boundary() {
        let mut cache = CacheStore::new();
        for h in 1..=6 {
            cache.append(h, "a", run("a", h));
        }

        let removed: Vec<u64> = cache.evict_at_or_below(3).iter().map(|e| e.height).collect();
        assert_eq!(removed, vec![1, 2, 3]);
        assert_eq!(cache.heights(), vec![4, 5, 6]);

        assert!(cache.evict_at_or_below(u64::MAX).len() == 3);
        assert!(cache.is_empty());
    }

    #[test]
    fn open_and_unpersisted_heights() {
        let mut cache = CacheStore::new();
        for h in [3, 5, 8] {
            cache.append(h, "a", run("a", h));
        }
        cache.finalize(5);

        assert_eq!(cache.open_heights_below(8), vec![3]);
        assert_eq!(cache.open_heights_below(9), vec![3, 8]);
        assert_eq!(cache.unpersisted_heights(), vec![5]);

        let stats = cache.stats();
        assert_eq!(stats.cached, 3);
        assert_eq!(stats.open, 2);
        assert_eq!(stats.unpersisted, 1);
    }
}
