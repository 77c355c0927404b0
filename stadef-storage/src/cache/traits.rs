//! Version cache traits and cacheable entity wrapper.

use crate::cache::VersionKey;
use crate::range::RangeMap;
use stadef_core::{
    Channel, ChannelGroup, EntityType, Response, Station, StationGroup, Timestamp,
    VersionedEntity,
};
use std::collections::BTreeSet;

/// Any entity the version cache can hold.
///
/// One cache serves all five entity kinds, so values are stored behind this
/// enum and unwrapped by type on the way out.
#[derive(Debug, Clone, PartialEq)]
pub enum CachedEntity {
    StationGroup(StationGroup),
    Station(Station),
    ChannelGroup(ChannelGroup),
    Channel(Channel),
    Response(Response),
}

impl CachedEntity {
    pub fn entity_type(&self) -> EntityType {
        match self {
            CachedEntity::StationGroup(_) => EntityType::StationGroup,
            CachedEntity::Station(_) => EntityType::Station,
            CachedEntity::ChannelGroup(_) => EntityType::ChannelGroup,
            CachedEntity::Channel(_) => EntityType::Channel,
            CachedEntity::Response(_) => EntityType::Response,
        }
    }
}

/// Entity that can be written to and read from a [`VersionCache`].
pub trait CacheableEntity: VersionedEntity {
    fn into_cached(self) -> CachedEntity;

    /// `None` if `cached` holds a different entity kind.
    fn from_cached(cached: &CachedEntity) -> Option<Self>;
}

macro_rules! impl_cacheable {
    ($($ty:ident),* $(,)?) => {
        $(
            impl CacheableEntity for $ty {
                fn into_cached(self) -> CachedEntity {
                    CachedEntity::$ty(self)
                }

                fn from_cached(cached: &CachedEntity) -> Option<Self> {
                    match cached {
                        CachedEntity::$ty(entity) => Some(entity.clone()),
                        _ => None,
                    }
                }
            }
        )*
    };
}

impl_cacheable!(StationGroup, Station, ChannelGroup, Channel, Response);

/// Keyed store of per-entity version range maps.
///
/// Implementations must be safe for concurrent `put`/`get` without external
/// locking. Writers racing on the same key may interleave at sub-range
/// granularity; last writer wins for each overlapping sub-range.
pub trait VersionCache: Send + Sync {
    /// Merge `versions` into the range map stored under `key`.
    fn put<T: CacheableEntity>(&self, key: &VersionKey, versions: &RangeMap<T>);

    /// Version valid at `at`. `None` means not cached, never an error.
    fn get<T: CacheableEntity>(&self, key: &VersionKey, at: Timestamp) -> Option<T>;

    /// Every cached version for `key`.
    fn get_range_map<T: CacheableEntity>(&self, key: &VersionKey) -> Option<RangeMap<T>>;

    fn has_key(&self, key: &VersionKey) -> bool;

    /// Effective-at instants of every version written under `key`.
    fn version_boundaries(&self, key: &VersionKey) -> BTreeSet<Timestamp>;

    /// Drop every entry.
    fn clear(&self);

    fn stats(&self) -> CacheStats;
}

/// Lookup counters for one cache tier.
///
/// The version cache counts a point `get` as a hit only when a version covers
/// the instant and holds the requested entity type. A wrong-typed entry counts
/// as a miss. Range-map reads are not counted. The request cache counts a hit
/// only for a non-empty memoized result.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Keys held by the version cache, or requests held by the request cache.
    pub entry_count: u64,
}

impl CacheStats {
    /// Share of counted lookups that hit, or 0.0 before any lookup.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stadef_core::Presence;

    #[test]
    fn test_cache_stats_hit_rate() {
        let stats = CacheStats {
            hits: 80,
            misses: 20,
            ..Default::default()
        };
        assert!((stats.hit_rate() - 0.8).abs() < 0.001);

        let empty_stats = CacheStats::default();
        assert!((empty_stats.hit_rate() - 0.0).abs() < 0.001);
    }

    #[test]
    fn test_cached_entity_unwraps_by_type() {
        let station = Station::new("STA", Presence::EntityReference);
        let cached = station.clone().into_cached();

        assert_eq!(cached.entity_type(), EntityType::Station);
        assert_eq!(Station::from_cached(&cached), Some(station));
        assert_eq!(Channel::from_cached(&cached), None);
    }
}
