//! In-memory version cache backed by `DashMap`.

use crate::cache::{CacheStats, CacheableEntity, CachedEntity, VersionCache, VersionKey};
use crate::range::RangeMap;
use dashmap::DashMap;
use stadef_core::Timestamp;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::warn;

#[derive(Debug, Default)]
struct VersionEntry {
    versions: RangeMap<CachedEntity>,
    boundaries: BTreeSet<Timestamp>,
}

/// Concurrent in-memory [`VersionCache`].
///
/// Each key is guarded by its `DashMap` shard, so a `put` for one key
/// applies all of its sub-ranges before a reader of that key sees them.
#[derive(Debug, Default)]
pub struct InMemoryVersionCache {
    entries: DashMap<VersionKey, VersionEntry>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl InMemoryVersionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn record(&self, hit: bool) {
        let counter = if hit { &self.hits } else { &self.misses };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

impl VersionCache for InMemoryVersionCache {
    fn put<T: CacheableEntity>(&self, key: &VersionKey, versions: &RangeMap<T>) {
        if versions.is_empty() {
            return;
        }
        let mut entry = self.entries.entry(key.clone()).or_default();
        for (range, version) in versions.iter() {
            if let Some(effective_at) = range.lower_endpoint() {
                entry.boundaries.insert(effective_at);
            }
            entry.versions.put(*range, version.clone().into_cached());
        }
    }

    fn get<T: CacheableEntity>(&self, key: &VersionKey, at: Timestamp) -> Option<T> {
        let found = self.entries.get(key).and_then(|entry| {
            let cached = entry.versions.get(at)?;
            let typed = T::from_cached(cached);
            if typed.is_none() {
                warn!(
                    key = %key,
                    expected = %T::ENTITY_TYPE,
                    found = %cached.entity_type(),
                    "Version cache entry holds the wrong entity type"
                );
            }
            typed
        });
        self.record(found.is_some());
        found
    }

    fn get_range_map<T: CacheableEntity>(&self, key: &VersionKey) -> Option<RangeMap<T>> {
        let entry = self.entries.get(key)?;
        let typed = entry.versions.filter_map(|cached| {
            let version = T::from_cached(cached);
            if version.is_none() {
                warn!(
                    key = %key,
                    expected = %T::ENTITY_TYPE,
                    found = %cached.entity_type(),
                    "Skipping version of the wrong entity type"
                );
            }
            version
        });
        Some(typed)
    }

    fn has_key(&self, key: &VersionKey) -> bool {
        self.entries.contains_key(key)
    }

    fn version_boundaries(&self, key: &VersionKey) -> BTreeSet<Timestamp> {
        self.entries
            .get(key)
            .map(|entry| entry.boundaries.clone())
            .unwrap_or_default()
    }

    fn clear(&self) {
        self.entries.clear();
    }

    fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entry_count: self.entries.len() as u64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::range::TimeRange;
    use chrono::{TimeZone, Utc};
    use stadef_core::{Presence, Station, StationGroup, StationGroupData, VersionedEntity};

    fn ts(day: u32) -> Timestamp {
        Utc.with_ymd_and_hms(2020, 1, day, 0, 0, 0).unwrap()
    }

    fn make_test_group(
        effective_at: Timestamp,
        effective_until: Option<Timestamp>,
    ) -> StationGroup {
        StationGroup::new(
            "primary",
            Presence::Populated {
                effective_at,
                effective_until,
                data: StationGroupData {
                    description: "primary network".to_string(),
                    stations: vec![Station::create_entity_reference("STA".to_string())],
                },
            },
        )
    }

    fn make_test_versions() -> RangeMap<StationGroup> {
        [
            make_test_group(ts(1), Some(ts(5))),
            make_test_group(ts(5), None),
        ]
        .into_iter()
        .map(|g| {
            let range = TimeRange::effective(g.effective_at().unwrap(), g.effective_until());
            (range, g)
        })
        .collect()
    }

    #[test]
    fn test_put_get() {
        let cache = InMemoryVersionCache::new();
        let key = VersionKey::of::<StationGroup>(&"primary".to_string());
        cache.put(&key, &make_test_versions());

        assert!(cache.has_key(&key));
        let found: StationGroup = cache.get(&key, ts(3)).unwrap();
        assert_eq!(found.effective_at(), Some(ts(1)));
        let latest: StationGroup = cache.get(&key, ts(20)).unwrap();
        assert_eq!(latest.effective_at(), Some(ts(5)));
    }

    #[test]
    fn test_get_before_first_version_is_miss() {
        let cache = InMemoryVersionCache::new();
        let key = VersionKey::of::<StationGroup>(&"primary".to_string());
        cache.put(&key, &make_test_versions());

        let before = Utc.with_ymd_and_hms(2019, 6, 1, 0, 0, 0).unwrap();
        assert!(cache.get::<StationGroup>(&key, before).is_none());

        let stats = cache.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.entry_count, 1);
    }

    #[test]
    fn test_wrong_type_is_miss() {
        let cache = InMemoryVersionCache::new();
        let key = VersionKey::of::<StationGroup>(&"primary".to_string());
        cache.put(&key, &make_test_versions());

        assert!(cache.get::<Station>(&key, ts(3)).is_none());
        assert!(cache.get_range_map::<Station>(&key).unwrap().is_empty());

        let stats = cache.stats();
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hit_rate(), 0.0);
    }

    #[test]
    fn test_empty_put_creates_no_key() {
        let cache = InMemoryVersionCache::new();
        let key = VersionKey::of::<StationGroup>(&"primary".to_string());
        cache.put(&key, &RangeMap::<StationGroup>::new());
        assert!(!cache.has_key(&key));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_version_boundaries_and_clear() {
        let cache = InMemoryVersionCache::new();
        let key = VersionKey::of::<StationGroup>(&"primary".to_string());
        cache.put(&key, &make_test_versions());

        let boundaries: Vec<_> = cache.version_boundaries(&key).into_iter().collect();
        assert_eq!(boundaries, vec![ts(1), ts(5)]);

        cache.clear();
        assert!(!cache.has_key(&key));
        assert!(cache.version_boundaries(&key).is_empty());
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_get_range_map_roundtrip() {
        let cache = InMemoryVersionCache::new();
        let key = VersionKey::of::<StationGroup>(&"primary".to_string());
        let versions = make_test_versions();
        cache.put(&key, &versions);

        assert_eq!(cache.get_range_map::<StationGroup>(&key), Some(versions));
        assert!(cache
            .get_range_map::<StationGroup>(&VersionKey::of::<StationGroup>(&"other".to_string()))
            .is_none());
    }
}
