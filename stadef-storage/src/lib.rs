//! Stadef Storage - Station Definition Caching
//!
//! Repository and accessor traits for versioned station metadata, the two
//! cache tiers that sit in front of a backing repository, and an in-memory
//! repository for tests.
//!
//! Callers talk to a [`RequestCachingAccessor`], which memoizes whole
//! requests and delegates misses to an [`EntityCachingAccessor`]. That tier
//! answers from the [`VersionCache`] where it can and asks the backing
//! [`StationDefinitionRepository`] only for ids and time ranges it does not
//! hold.

pub mod accessor;
pub mod cache;
pub mod facet;
pub mod range;
pub mod window;

pub use accessor::{EntityCachingAccessor, RequestCachingAccessor};
pub use cache::{
    CacheStats, CacheableEntity, CachedEntity, CachedResult, InMemoryVersionCache, RequestCache,
    VersionCache, VersionKey,
};
pub use facet::{Facetable, StationDefinitionFacetingUtility};
pub use range::{Cut, RangeMap, RangeSet, TimeRange};
pub use window::OperationalWindow;

use stadef_core::{
    Channel, ChannelGroup, EntityType, FacetingDefinition, RequestTime, Response, ResponseId,
    StadefError, StadefResult, Station, StationGroup, StorageError, Timestamp, ValidationError,
    VersionedEntity,
};
use std::collections::HashMap;
use std::fmt;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

// ============================================================================
// REPOSITORY TRAIT
// ============================================================================

/// Authoritative source of station definition versions.
///
/// Lookups by time return the version valid at that instant for each id;
/// lookups by range return every version whose validity overlaps
/// `[start, end]`. Implementations may block on I/O.
pub trait StationDefinitionRepository: Send + Sync {
    // === Station Groups ===

    fn find_station_groups_by_name_and_time(
        &self,
        station_group_names: &[String],
        effective_at: Timestamp,
    ) -> StadefResult<Vec<StationGroup>>;

    fn find_station_groups_by_name_and_time_range(
        &self,
        station_group_names: &[String],
        start: Timestamp,
        end: Timestamp,
    ) -> StadefResult<Vec<StationGroup>>;

    fn store_station_groups(&self, station_groups: &[StationGroup]) -> StadefResult<()>;

    // === Stations ===

    fn find_stations_by_name_and_time(
        &self,
        station_names: &[String],
        effective_at: Timestamp,
    ) -> StadefResult<Vec<Station>>;

    fn find_stations_by_name_and_time_range(
        &self,
        station_names: &[String],
        start: Timestamp,
        end: Timestamp,
    ) -> StadefResult<Vec<Station>>;

    fn store_stations(&self, stations: &[Station]) -> StadefResult<()>;

    // === Channel Groups ===

    fn find_channel_groups_by_name_and_time(
        &self,
        channel_group_names: &[String],
        effective_at: Timestamp,
    ) -> StadefResult<Vec<ChannelGroup>>;

    fn find_channel_groups_by_name_and_time_range(
        &self,
        channel_group_names: &[String],
        start: Timestamp,
        end: Timestamp,
    ) -> StadefResult<Vec<ChannelGroup>>;

    fn store_channel_groups(&self, channel_groups: &[ChannelGroup]) -> StadefResult<()>;

    // === Channels ===

    fn find_channels_by_name_and_time(
        &self,
        channel_names: &[String],
        effective_at: Timestamp,
    ) -> StadefResult<Vec<Channel>>;

    fn find_channels_by_name_and_time_range(
        &self,
        channel_names: &[String],
        start: Timestamp,
        end: Timestamp,
    ) -> StadefResult<Vec<Channel>>;

    fn store_channels(&self, channels: &[Channel]) -> StadefResult<()>;

    // === Responses ===

    fn find_responses_by_id_and_time(
        &self,
        response_ids: &[ResponseId],
        effective_at: Timestamp,
    ) -> StadefResult<Vec<Response>>;

    fn find_responses_by_id_and_time_range(
        &self,
        response_ids: &[ResponseId],
        start: Timestamp,
        end: Timestamp,
    ) -> StadefResult<Vec<Response>>;

    fn store_responses(&self, responses: &[Response]) -> StadefResult<()>;
}

/// Full accessor surface exposed by both caching tiers.
pub trait StationDefinitionAccessor: StationDefinitionRepository {
    fn find_station_groups_by_name_and_time_faceted(
        &self,
        station_group_names: &[String],
        effective_at: Timestamp,
        faceting: &FacetingDefinition,
    ) -> StadefResult<Vec<StationGroup>>;

    fn find_stations_by_name_and_time_faceted(
        &self,
        station_names: &[String],
        effective_at: Timestamp,
        faceting: &FacetingDefinition,
    ) -> StadefResult<Vec<Station>>;

    fn find_channel_groups_by_name_and_time_faceted(
        &self,
        channel_group_names: &[String],
        effective_at: Timestamp,
        faceting: &FacetingDefinition,
    ) -> StadefResult<Vec<ChannelGroup>>;

    fn find_channels_by_name_and_time_faceted(
        &self,
        channel_names: &[String],
        effective_at: Timestamp,
        faceting: &FacetingDefinition,
    ) -> StadefResult<Vec<Channel>>;

    fn find_responses_by_id_and_time_faceted(
        &self,
        response_ids: &[ResponseId],
        effective_at: Timestamp,
        faceting: &FacetingDefinition,
    ) -> StadefResult<Vec<Response>>;

    /// Distinct effective times of the station and its channel groups,
    /// channels and responses over `[start, end]`, latest first.
    fn determine_station_change_times(
        &self,
        station: &Station,
        start: Timestamp,
        end: Timestamp,
    ) -> StadefResult<Vec<Timestamp>>;

    /// Reset the operational window to `[start, end]` and warm the caches
    /// from the named station groups downwards.
    fn cache(
        &self,
        station_group_names: &[String],
        start: Timestamp,
        end: Timestamp,
    ) -> StadefResult<()>;
}

// ============================================================================
// TYPED REPOSITORY DISPATCH
// ============================================================================

/// Routes a generic lookup to the repository method for the entity's type.
pub trait StationDefinitionEntity: CacheableEntity {
    fn find_by_id_and_time<R: StationDefinitionRepository + ?Sized>(
        repository: &R,
        ids: &[Self::Id],
        effective_at: Timestamp,
    ) -> StadefResult<Vec<Self>>;

    fn find_by_id_and_time_range<R: StationDefinitionRepository + ?Sized>(
        repository: &R,
        ids: &[Self::Id],
        start: Timestamp,
        end: Timestamp,
    ) -> StadefResult<Vec<Self>>;
}

macro_rules! impl_station_definition_entity {
    ($($ty:ty => $at:ident, $range:ident);* $(;)?) => {
        $(
            impl StationDefinitionEntity for $ty {
                fn find_by_id_and_time<R: StationDefinitionRepository + ?Sized>(
                    repository: &R,
                    ids: &[Self::Id],
                    effective_at: Timestamp,
                ) -> StadefResult<Vec<Self>> {
                    repository.$at(ids, effective_at)
                }

                fn find_by_id_and_time_range<R: StationDefinitionRepository + ?Sized>(
                    repository: &R,
                    ids: &[Self::Id],
                    start: Timestamp,
                    end: Timestamp,
                ) -> StadefResult<Vec<Self>> {
                    repository.$range(ids, start, end)
                }
            }
        )*
    };
}

impl_station_definition_entity! {
    StationGroup =>
        find_station_groups_by_name_and_time,
        find_station_groups_by_name_and_time_range;
    Station => find_stations_by_name_and_time, find_stations_by_name_and_time_range;
    ChannelGroup =>
        find_channel_groups_by_name_and_time,
        find_channel_groups_by_name_and_time_range;
    Channel => find_channels_by_name_and_time, find_channels_by_name_and_time_range;
    Response => find_responses_by_id_and_time, find_responses_by_id_and_time_range;
}

// ============================================================================
// PRECONDITIONS
// ============================================================================

/// Reject blank identifiers before touching any cache or repository.
pub(crate) fn require_ids<I: fmt::Display>(field: &str, ids: &[I]) -> StadefResult<()> {
    if ids.iter().any(|id| id.to_string().trim().is_empty()) {
        return Err(StadefError::Validation(ValidationError::RequiredFieldMissing {
            field: field.to_string(),
        }));
    }
    Ok(())
}

/// Reject `end` before `start`.
pub(crate) fn require_range(start: Timestamp, end: Timestamp) -> StadefResult<()> {
    if end < start {
        return Err(StadefError::Validation(ValidationError::InvalidTimeRange {
            start,
            end,
        }));
    }
    Ok(())
}

// ============================================================================
// IN-MEMORY REPOSITORY
// ============================================================================

/// A lookup received by the [`InMemoryRepository`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryCall {
    pub entity_type: EntityType,
    pub ids: Vec<String>,
    pub time: RequestTime,
}

type VersionTable<T> = RwLock<HashMap<<T as VersionedEntity>::Id, Vec<T>>>;

/// In-memory backing repository for testing.
///
/// Records every find call so tests can assert how often, and over which
/// ranges, the caching tiers reached the source of truth. `fail_with` makes
/// every subsequent call return the given error.
#[derive(Debug, Default)]
pub struct InMemoryRepository {
    station_groups: VersionTable<StationGroup>,
    stations: VersionTable<Station>,
    channel_groups: VersionTable<ChannelGroup>,
    channels: VersionTable<Channel>,
    responses: VersionTable<Response>,
    calls: RwLock<Vec<RepositoryCall>>,
    failure: RwLock<Option<StorageError>>,
}

fn read<T>(lock: &RwLock<T>) -> StadefResult<RwLockReadGuard<'_, T>> {
    lock.read()
        .map_err(|_| StadefError::Storage(StorageError::LockPoisoned))
}

fn write<T>(lock: &RwLock<T>) -> StadefResult<RwLockWriteGuard<'_, T>> {
    lock.write()
        .map_err(|_| StadefError::Storage(StorageError::LockPoisoned))
}

impl InMemoryRepository {
    /// Create a new empty repository.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every find call received so far, oldest first.
    pub fn calls(&self) -> Vec<RepositoryCall> {
        read(&self.calls).map(|calls| calls.clone()).unwrap_or_default()
    }

    /// Find calls received for one entity type.
    pub fn calls_for(&self, entity_type: EntityType) -> Vec<RepositoryCall> {
        self.calls()
            .into_iter()
            .filter(|call| call.entity_type == entity_type)
            .collect()
    }

    pub fn clear_calls(&self) {
        if let Ok(mut calls) = self.calls.write() {
            calls.clear();
        }
    }

    /// Fail every subsequent call with `error`.
    pub fn fail_with(&self, error: StorageError) {
        if let Ok(mut failure) = self.failure.write() {
            *failure = Some(error);
        }
    }

    pub fn recover(&self) {
        if let Ok(mut failure) = self.failure.write() {
            *failure = None;
        }
    }

    /// Number of stored versions of the given type.
    pub fn version_count(&self, entity_type: EntityType) -> usize {
        fn count<T: VersionedEntity>(table: &VersionTable<T>) -> usize {
            read(table)
                .map(|versions| versions.values().map(Vec::len).sum())
                .unwrap_or(0)
        }
        match entity_type {
            EntityType::StationGroup => count(&self.station_groups),
            EntityType::Station => count(&self.stations),
            EntityType::ChannelGroup => count(&self.channel_groups),
            EntityType::Channel => count(&self.channels),
            EntityType::Response => count(&self.responses),
        }
    }

    fn check_failure(&self) -> StadefResult<()> {
        match read(&self.failure)?.as_ref() {
            Some(error) => Err(StadefError::Storage(error.clone())),
            None => Ok(()),
        }
    }

    fn record<T: VersionedEntity>(&self, ids: &[T::Id], time: RequestTime) -> StadefResult<()> {
        write(&self.calls)?.push(RepositoryCall {
            entity_type: T::ENTITY_TYPE,
            ids: ids.iter().map(ToString::to_string).collect(),
            time,
        });
        self.check_failure()
    }

    fn find_at<T: VersionedEntity>(
        &self,
        table: &VersionTable<T>,
        ids: &[T::Id],
        effective_at: Timestamp,
    ) -> StadefResult<Vec<T>> {
        self.record::<T>(ids, RequestTime::At(effective_at))?;
        let versions = read(table)?;
        Ok(ids
            .iter()
            .filter_map(|id| versions.get(id))
            .filter_map(|history| {
                history.iter().find(|version| {
                    version.effective_at().is_some_and(|at| at <= effective_at)
                        && version.effective_until().map_or(true, |until| effective_at < until)
                })
            })
            .cloned()
            .collect())
    }

    fn find_range<T: VersionedEntity>(
        &self,
        table: &VersionTable<T>,
        ids: &[T::Id],
        start: Timestamp,
        end: Timestamp,
    ) -> StadefResult<Vec<T>> {
        self.record::<T>(ids, RequestTime::Range { start, end })?;
        let versions = read(table)?;
        Ok(ids
            .iter()
            .filter_map(|id| versions.get(id))
            .flat_map(|history| {
                history.iter().filter(|version| {
                    version.effective_at().is_some_and(|at| at <= end)
                        && version.effective_until().map_or(true, |until| until > start)
                })
            })
            .cloned()
            .collect())
    }

    /// Insert or replace versions by effective time. References without an
    /// effective time are ignored.
    fn store<T: VersionedEntity>(
        &self,
        table: &VersionTable<T>,
        entities: &[T],
    ) -> StadefResult<()> {
        self.check_failure()?;
        let mut versions = write(table)?;
        for entity in entities {
            let Some(effective_at) = entity.effective_at() else {
                continue;
            };
            let history = versions.entry(entity.id().clone()).or_default();
            history.retain(|existing| existing.effective_at() != Some(effective_at));
            history.push(entity.clone());
            history.sort_by_key(|version| version.effective_at());
        }
        Ok(())
    }
}

impl StationDefinitionRepository for InMemoryRepository {
    fn find_station_groups_by_name_and_time(
        &self,
        station_group_names: &[String],
        effective_at: Timestamp,
    ) -> StadefResult<Vec<StationGroup>> {
        self.find_at(&self.station_groups, station_group_names, effective_at)
    }

    fn find_station_groups_by_name_and_time_range(
        &self,
        station_group_names: &[String],
        start: Timestamp,
        end: Timestamp,
    ) -> StadefResult<Vec<StationGroup>> {
        self.find_range(&self.station_groups, station_group_names, start, end)
    }

    fn store_station_groups(&self, station_groups: &[StationGroup]) -> StadefResult<()> {
        self.store(&self.station_groups, station_groups)
    }

    fn find_stations_by_name_and_time(
        &self,
        station_names: &[String],
        effective_at: Timestamp,
    ) -> StadefResult<Vec<Station>> {
        self.find_at(&self.stations, station_names, effective_at)
    }

    fn find_stations_by_name_and_time_range(
        &self,
        station_names: &[String],
        start: Timestamp,
        end: Timestamp,
    ) -> StadefResult<Vec<Station>> {
        self.find_range(&self.stations, station_names, start, end)
    }

    fn store_stations(&self, stations: &[Station]) -> StadefResult<()> {
        self.store(&self.stations, stations)
    }

    fn find_channel_groups_by_name_and_time(
        &self,
        channel_group_names: &[String],
        effective_at: Timestamp,
    ) -> StadefResult<Vec<ChannelGroup>> {
        self.find_at(&self.channel_groups, channel_group_names, effective_at)
    }

    fn find_channel_groups_by_name_and_time_range(
        &self,
        channel_group_names: &[String],
        start: Timestamp,
        end: Timestamp,
    ) -> StadefResult<Vec<ChannelGroup>> {
        self.find_range(&self.channel_groups, channel_group_names, start, end)
    }

    fn store_channel_groups(&self, channel_groups: &[ChannelGroup]) -> StadefResult<()> {
        self.store(&self.channel_groups, channel_groups)
    }

    fn find_channels_by_name_and_time(
        &self,
        channel_names: &[String],
        effective_at: Timestamp,
    ) -> StadefResult<Vec<Channel>> {
        self.find_at(&self.channels, channel_names, effective_at)
    }

    fn find_channels_by_name_and_time_range(
        &self,
        channel_names: &[String],
        start: Timestamp,
        end: Timestamp,
    ) -> StadefResult<Vec<Channel>> {
        self.find_range(&self.channels, channel_names, start, end)
    }

    fn store_channels(&self, channels: &[Channel]) -> StadefResult<()> {
        self.store(&self.channels, channels)
    }

    fn find_responses_by_id_and_time(
        &self,
        response_ids: &[ResponseId],
        effective_at: Timestamp,
    ) -> StadefResult<Vec<Response>> {
        self.find_at(&self.responses, response_ids, effective_at)
    }

    fn find_responses_by_id_and_time_range(
        &self,
        response_ids: &[ResponseId],
        start: Timestamp,
        end: Timestamp,
    ) -> StadefResult<Vec<Response>> {
        self.find_range(&self.responses, response_ids, start, end)
    }

    fn store_responses(&self, responses: &[Response]) -> StadefResult<()> {
        self.store(&self.responses, responses)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use stadef_core::{Calibration, Presence, ResponseData};
    use uuid::Uuid;

    fn ts(day: u32) -> Timestamp {
        Utc.with_ymd_and_hms(2020, 1, day, 0, 0, 0).unwrap()
    }

    fn make_test_response(id: ResponseId, at: Timestamp, until: Option<Timestamp>) -> Response {
        Response::new(
            id,
            Presence::Populated {
                effective_at: at,
                effective_until: until,
                data: ResponseData {
                    calibration: Calibration {
                        calibration_period_sec: 1.0,
                        calibration_factor: 2.0,
                        calibration_time_shift_sec: 0.0,
                    },
                    fap_id: None,
                },
            },
        )
    }

    #[test]
    fn test_find_at_picks_containing_version() {
        let repository = InMemoryRepository::new();
        let id = Uuid::now_v7();
        repository
            .store_responses(&[
                make_test_response(id, ts(1), Some(ts(10))),
                make_test_response(id, ts(10), None),
            ])
            .unwrap();

        let early = repository.find_responses_by_id_and_time(&[id], ts(9)).unwrap();
        assert_eq!(early.len(), 1);
        assert_eq!(early[0].effective_at(), Some(ts(1)));

        let boundary = repository.find_responses_by_id_and_time(&[id], ts(10)).unwrap();
        assert_eq!(boundary[0].effective_at(), Some(ts(10)));

        let before = Utc.with_ymd_and_hms(2019, 1, 1, 0, 0, 0).unwrap();
        assert!(repository
            .find_responses_by_id_and_time(&[id], before)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_find_range_returns_overlapping_versions() {
        let repository = InMemoryRepository::new();
        let id = Uuid::now_v7();
        repository
            .store_responses(&[
                make_test_response(id, ts(1), Some(ts(5))),
                make_test_response(id, ts(5), Some(ts(10))),
                make_test_response(id, ts(10), None),
            ])
            .unwrap();

        let found = repository
            .find_responses_by_id_and_time_range(&[id], ts(5), ts(6))
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].effective_at(), Some(ts(5)));

        let all = repository
            .find_responses_by_id_and_time_range(&[id], ts(2), ts(20))
            .unwrap();
        assert_eq!(all.len(), 3);
    }

    #[test]
    fn test_store_replaces_same_effective_time() {
        let repository = InMemoryRepository::new();
        let id = Uuid::now_v7();
        repository
            .store_responses(&[make_test_response(id, ts(1), None)])
            .unwrap();
        repository
            .store_responses(&[make_test_response(id, ts(1), Some(ts(3)))])
            .unwrap();

        assert_eq!(repository.version_count(EntityType::Response), 1);
        let found = repository.find_responses_by_id_and_time(&[id], ts(2)).unwrap();
        assert_eq!(found[0].effective_until(), Some(ts(3)));
    }

    #[test]
    fn test_references_are_not_stored() {
        let repository = InMemoryRepository::new();
        repository
            .store_stations(&[Station::create_entity_reference("STA".to_string())])
            .unwrap();
        assert_eq!(repository.version_count(EntityType::Station), 0);
    }

    #[test]
    fn test_calls_are_recorded() {
        let repository = InMemoryRepository::new();
        let names = vec!["B".to_string(), "A".to_string()];
        repository.find_channels_by_name_and_time(&names, ts(1)).unwrap();
        repository
            .find_channels_by_name_and_time_range(&names, ts(1), ts(2))
            .unwrap();

        let calls = repository.calls_for(EntityType::Channel);
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].ids, names);
        assert_eq!(calls[0].time, RequestTime::At(ts(1)));
        assert_eq!(
            calls[1].time,
            RequestTime::Range {
                start: ts(1),
                end: ts(2)
            }
        );
        assert!(repository.calls_for(EntityType::Station).is_empty());

        repository.clear_calls();
        assert!(repository.calls().is_empty());
    }

    #[test]
    fn test_failure_propagates() {
        let repository = InMemoryRepository::new();
        let error = StorageError::Unavailable {
            reason: "database offline".to_string(),
        };
        repository.fail_with(error.clone());

        let result = repository.find_stations_by_name_and_time(&["STA".to_string()], ts(1));
        assert_eq!(result, Err(StadefError::Storage(error)));
        assert!(repository.store_stations(&[]).is_err());

        repository.recover();
        assert!(repository
            .find_stations_by_name_and_time(&["STA".to_string()], ts(1))
            .is_ok());
    }

    #[test]
    fn test_require_ids_rejects_blank() {
        let err = require_ids("channel_names", &["STA.CH1".to_string(), "  ".to_string()])
            .unwrap_err();
        assert!(err.is_invalid_argument());
        assert!(require_ids::<String>("channel_names", &[]).is_ok());
    }

    #[test]
    fn test_require_range_rejects_inverted() {
        assert!(require_range(ts(2), ts(1)).unwrap_err().is_invalid_state());
        assert!(require_range(ts(1), ts(1)).is_ok());
    }
}

#[cfg(test)]
mod prop_tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use proptest::prelude::*;
    use stadef_core::{Location, Presence, StationData, StationType};

    fn at(hours: i64) -> Timestamp {
        Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap() + Duration::hours(hours)
    }

    fn make_station(effective_at: Timestamp, effective_until: Option<Timestamp>) -> Station {
        Station::new(
            "STA",
            Presence::Populated {
                effective_at,
                effective_until,
                data: StationData {
                    station_type: StationType::Seismic3Component,
                    description: "test".to_string(),
                    location: Location {
                        latitude_degrees: 0.0,
                        longitude_degrees: 0.0,
                        depth_km: 0.0,
                        elevation_km: 0.0,
                    },
                    channel_groups: Vec::new(),
                    all_raw_channels: Vec::new(),
                },
            },
        )
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Point lookups return the unique contiguous version containing the instant.
        #[test]
        fn prop_point_lookup_matches_validity(
            boundaries in prop::collection::btree_set(0i64..500, 1..6),
            lookup in 0i64..600,
        ) {
            let repository = InMemoryRepository::new();
            let starts: Vec<i64> = boundaries.into_iter().collect();
            let stations: Vec<Station> = starts
                .iter()
                .enumerate()
                .map(|(i, start)| make_station(at(*start), starts.get(i + 1).map(|end| at(*end))))
                .collect();
            repository.store_stations(&stations).unwrap();

            let found = repository
                .find_stations_by_name_and_time(&["STA".to_string()], at(lookup))
                .unwrap();
            let expected = starts
                .iter()
                .rev()
                .find(|start| **start <= lookup)
                .map(|start| at(*start));
            prop_assert_eq!(found.first().and_then(|s| s.effective_at()), expected);
            prop_assert!(found.len() <= 1);
        }
    }
}
