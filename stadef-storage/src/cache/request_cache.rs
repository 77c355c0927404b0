//! Whole-request memoization.
//!
//! Results are stored in one slot per result type, keyed by the normalized
//! [`Request`]. A request for channels can only ever read back channels, so
//! no runtime type filtering is needed on a hit.

use crate::cache::CacheStats;
use dashmap::DashMap;
use stadef_core::{
    Channel, ChannelGroup, Request, Response, Station, StationGroup, Timestamp,
};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

type Slot<T> = DashMap<Request, Vec<T>>;

/// Result type that has a slot in the [`RequestCache`].
pub trait CachedResult: Clone + Send + Sync + 'static {
    fn slot(cache: &RequestCache) -> &Slot<Self>;
}

/// Typed request cache shared across callers for the service lifetime.
#[derive(Debug, Default)]
pub struct RequestCache {
    station_groups: Slot<StationGroup>,
    stations: Slot<Station>,
    channel_groups: Slot<ChannelGroup>,
    channels: Slot<Channel>,
    responses: Slot<Response>,
    change_times: Slot<Timestamp>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl RequestCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached result for `request`. An empty result counts as a miss.
    pub fn retrieve<T: CachedResult>(&self, request: &Request) -> Option<Vec<T>> {
        let found = T::slot(self)
            .get(request)
            .map(|results| results.clone())
            .filter(|results| !results.is_empty());

        if found.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            debug!(request = %request, "Request cache hit");
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            debug!(request = %request, "Request cache miss");
        }
        found
    }

    /// Memoize `results`. Empty results are not kept.
    pub fn put<T: CachedResult>(&self, request: Request, results: Vec<T>) {
        if results.is_empty() {
            return;
        }
        T::slot(self).insert(request, results);
    }

    pub fn clear(&self) {
        self.station_groups.clear();
        self.stations.clear();
        self.channel_groups.clear();
        self.channels.clear();
        self.responses.clear();
        self.change_times.clear();
    }

    pub fn len(&self) -> usize {
        self.station_groups.len()
            + self.stations.len()
            + self.channel_groups.len()
            + self.channels.len()
            + self.responses.len()
            + self.change_times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entry_count: self.len() as u64,
        }
    }
}

macro_rules! impl_cached_result {
    ($($ty:ty => $slot:ident),* $(,)?) => {
        $(
            impl CachedResult for $ty {
                fn slot(cache: &RequestCache) -> &Slot<Self> {
                    &cache.$slot
                }
            }
        )*
    };
}

impl_cached_result!(
    StationGroup => station_groups,
    Station => stations,
    ChannelGroup => channel_groups,
    Channel => channels,
    Response => responses,
    Timestamp => change_times,
);

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use stadef_core::{EntityType, Presence, VersionedEntity};

    fn ts(day: u32) -> Timestamp {
        Utc.with_ymd_and_hms(2020, 1, day, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_put_retrieve() {
        let cache = RequestCache::new();
        let request = Request::at(EntityType::Station, &["STA"], ts(1));
        let station = Station::create_version_reference("STA".to_string(), ts(1));
        cache.put(request.clone(), vec![station.clone()]);

        let found: Vec<Station> = cache.retrieve(&request).unwrap();
        assert_eq!(found, vec![station]);
        assert_eq!(cache.stats().hits, 1);
    }

    #[test]
    fn test_slots_are_typed() {
        let cache = RequestCache::new();
        let request = Request::at(EntityType::Station, &["STA"], ts(1));
        cache.put(request.clone(), vec![Station::new("STA", Presence::EntityReference)]);

        assert!(cache.retrieve::<Channel>(&request).is_none());
        assert!(cache.retrieve::<Timestamp>(&request).is_none());
        assert!(cache.retrieve::<Station>(&request).is_some());
    }

    #[test]
    fn test_empty_result_is_miss() {
        let cache = RequestCache::new();
        let request = Request::at(EntityType::Channel, &["CH"], ts(1));
        cache.put::<Channel>(request.clone(), Vec::new());

        assert!(cache.retrieve::<Channel>(&request).is_none());
        assert!(cache.is_empty());
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn test_clear() {
        let cache = RequestCache::new();
        let request = Request::range(EntityType::Station, &["STA"], ts(1), ts(2));
        cache.put(request.clone(), vec![ts(2), ts(1)]);
        assert_eq!(cache.len(), 1);

        cache.clear();
        assert!(cache.retrieve::<Timestamp>(&request).is_none());
    }
}
