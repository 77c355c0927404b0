//! Stadef Test Utilities
//!
//! Shared test infrastructure for the workspace:
//! - Proptest generators for timestamps, ids and version histories
//! - Fixtures for a small station network and a wired caching stack
//! - Assertions for the error classes callers branch on
//! - One-time tracing setup for tests that want log output

pub use stadef_storage::{
    EntityCachingAccessor, InMemoryRepository, InMemoryVersionCache, OperationalWindow,
    RepositoryCall, RequestCache, RequestCachingAccessor, StationDefinitionAccessor,
    StationDefinitionRepository, TimeRange, VersionCache, VersionKey,
};

pub use stadef_core::{
    Calibration, Channel, ChannelData, ChannelGroup, ChannelGroupData, ChannelGroupType,
    EntityType, FacetingDefinition, Location, Presence, Request, RequestTime, Response,
    ResponseData, ResponseId, StadefError, StadefResult, Station, StationData, StationGroup,
    StationGroupData, StationType, StorageError, Timestamp, Units, ValidationError,
    VersionedEntity,
};

use once_cell::sync::Lazy;
use tracing_subscriber::EnvFilter;

static TRACING: Lazy<()> = Lazy::new(|| {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
});

/// Install a test-friendly subscriber once per process. `RUST_LOG` applies.
pub fn init_tracing() {
    Lazy::force(&TRACING);
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for versioned station metadata.

    use super::*;
    use proptest::prelude::*;
    use uuid::Builder;

    /// Generate a random UUID v4 response id.
    pub fn arb_response_id() -> impl Strategy<Value = ResponseId> {
        any::<[u8; 16]>().prop_map(|bytes| Builder::from_random_bytes(bytes).into_uuid())
    }

    /// Generate a timestamp up to 1000 hours after the fixture epoch.
    pub fn arb_timestamp() -> impl Strategy<Value = Timestamp> {
        (0i64..1000).prop_map(fixtures::hours)
    }

    pub fn arb_entity_type() -> impl Strategy<Value = EntityType> {
        prop_oneof![
            Just(EntityType::StationGroup),
            Just(EntityType::Station),
            Just(EntityType::ChannelGroup),
            Just(EntityType::Channel),
            Just(EntityType::Response),
        ]
    }

    /// Generate a station-style name such as `ABC` or `ABC.BHZ`.
    pub fn arb_name() -> impl Strategy<Value = String> {
        "[A-Z]{3,5}(\\.[A-Z]{3})?"
    }

    /// Generate a closed range `[start, end]` with `start <= end`.
    pub fn arb_time_range() -> impl Strategy<Value = (Timestamp, Timestamp)> {
        (0i64..1000, 0i64..200).prop_map(|(start, length)| {
            (fixtures::hours(start), fixtures::hours(start + length))
        })
    }

    /// Generate hour offsets of version boundaries, strictly increasing.
    pub fn arb_version_boundaries() -> impl Strategy<Value = Vec<i64>> {
        prop::collection::btree_set(0i64..1000, 1..8).prop_map(|set| set.into_iter().collect())
    }

    /// Generate a contiguous channel history: each version ends where the
    /// next begins and the last one is open-ended.
    pub fn arb_channel_history(name: &'static str) -> impl Strategy<Value = Vec<Channel>> {
        arb_version_boundaries().prop_map(move |boundaries| {
            boundaries
                .iter()
                .enumerate()
                .map(|(i, start)| {
                    fixtures::channel(
                        name,
                        fixtures::hours(*start),
                        boundaries.get(i + 1).map(|end| fixtures::hours(*end)),
                        None,
                    )
                })
                .collect()
        })
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Builders for populated entities and a wired caching stack.

    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use std::sync::Arc;
    use uuid::Uuid;

    pub type EntityTier = EntityCachingAccessor<InMemoryRepository, InMemoryVersionCache>;
    pub type RequestTier = RequestCachingAccessor<EntityTier>;

    /// Fixture epoch, 2020-01-01T00:00:00Z.
    pub fn epoch() -> Timestamp {
        Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap()
    }

    /// `epoch() + hours`.
    pub fn hours(hours: i64) -> Timestamp {
        epoch() + Duration::hours(hours)
    }

    pub fn response(id: ResponseId, at: Timestamp, until: Option<Timestamp>) -> Response {
        Response::new(
            id,
            Presence::Populated {
                effective_at: at,
                effective_until: until,
                data: ResponseData {
                    calibration: Calibration {
                        calibration_period_sec: 1.0,
                        calibration_factor: 1.5,
                        calibration_time_shift_sec: 0.0,
                    },
                    fap_id: Some(Uuid::nil()),
                },
            },
        )
    }

    pub fn channel(
        name: &str,
        at: Timestamp,
        until: Option<Timestamp>,
        response: Option<Response>,
    ) -> Channel {
        let station = name.split('.').next().unwrap_or(name).to_string();
        Channel::new(
            name,
            Presence::Populated {
                effective_at: at,
                effective_until: until,
                data: ChannelData {
                    description: format!("{name} raw channel"),
                    station: Station::create_entity_reference(station),
                    units: Units::NanometersPerSecond,
                    nominal_sample_rate_hz: 40.0,
                    response,
                },
            },
        )
    }

    pub fn channel_group(
        name: &str,
        station: &str,
        at: Timestamp,
        until: Option<Timestamp>,
        channels: &[Channel],
    ) -> ChannelGroup {
        ChannelGroup::new(
            name,
            Presence::Populated {
                effective_at: at,
                effective_until: until,
                data: ChannelGroupData {
                    description: format!("{name} site"),
                    location: Some(location()),
                    group_type: ChannelGroupType::SiteGroup,
                    station: Station::create_entity_reference(station.to_string()),
                    channels: channels.to_vec(),
                },
            },
        )
    }

    pub fn station(
        name: &str,
        at: Timestamp,
        until: Option<Timestamp>,
        channel_groups: &[ChannelGroup],
        channels: &[Channel],
    ) -> Station {
        Station::new(
            name,
            Presence::Populated {
                effective_at: at,
                effective_until: until,
                data: StationData {
                    station_type: StationType::Seismic3Component,
                    description: format!("{name} station"),
                    location: location(),
                    channel_groups: channel_groups.to_vec(),
                    all_raw_channels: channels.to_vec(),
                },
            },
        )
    }

    pub fn station_group(name: &str, at: Timestamp, stations: &[Station]) -> StationGroup {
        StationGroup::new(
            name,
            Presence::Populated {
                effective_at: at,
                effective_until: None,
                data: StationGroupData {
                    description: format!("{name} network"),
                    stations: stations.to_vec(),
                },
            },
        )
    }

    pub fn location() -> Location {
        Location {
            latitude_degrees: 46.79,
            longitude_degrees: 82.29,
            depth_km: 0.0,
            elevation_km: 0.62,
        }
    }

    /// One station group `PRIMARY` holding station `STA`, channel group
    /// `STA01`, channel `STA.BHZ` and its response. The channel changes
    /// version at `hours(100)`; everything else starts at `epoch()`.
    #[derive(Debug, Clone)]
    pub struct Network {
        pub station_group: StationGroup,
        pub station: Station,
        pub channel_group: ChannelGroup,
        pub channels: Vec<Channel>,
        pub response: Response,
    }

    impl Network {
        pub fn new() -> Self {
            let response = response(Uuid::from_u128(7), epoch(), None);
            let early = channel("STA.BHZ", epoch(), Some(hours(100)), Some(response.clone()));
            let late = channel("STA.BHZ", hours(100), None, Some(response.clone()));
            let channel_group = channel_group("STA01", "STA", epoch(), None, &[early.clone()]);
            let station = station("STA", epoch(), None, &[channel_group.clone()], &[early.clone()]);
            let station_group = station_group("PRIMARY", epoch(), &[station.clone()]);
            Self {
                station_group,
                station,
                channel_group,
                channels: vec![early, late],
                response,
            }
        }

        pub fn store_into(&self, repository: &InMemoryRepository) -> StadefResult<()> {
            repository.store_responses(std::slice::from_ref(&self.response))?;
            repository.store_channels(&self.channels)?;
            repository.store_channel_groups(std::slice::from_ref(&self.channel_group))?;
            repository.store_stations(std::slice::from_ref(&self.station))?;
            repository.store_station_groups(std::slice::from_ref(&self.station_group))
        }
    }

    impl Default for Network {
        fn default() -> Self {
            Self::new()
        }
    }

    /// Both caching tiers over a fresh in-memory repository.
    pub struct CachingStack {
        pub repository: Arc<InMemoryRepository>,
        pub version_cache: Arc<InMemoryVersionCache>,
        pub window: Arc<OperationalWindow>,
        pub entity_tier: Arc<EntityTier>,
        pub request_tier: RequestTier,
    }

    pub fn caching_stack(window: TimeRange) -> CachingStack {
        let repository = Arc::new(InMemoryRepository::new());
        let version_cache = Arc::new(InMemoryVersionCache::new());
        let window = Arc::new(OperationalWindow::new(window));
        let entity_tier = Arc::new(EntityCachingAccessor::new(
            Arc::clone(&repository),
            Arc::clone(&version_cache),
            Arc::clone(&window),
        ));
        let request_tier =
            RequestCachingAccessor::new(Arc::clone(&entity_tier), Arc::new(RequestCache::new()));
        CachingStack {
            repository,
            version_cache,
            window,
            entity_tier,
            request_tier,
        }
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions for the error classes callers branch on.

    use super::*;

    #[track_caller]
    pub fn assert_invalid_argument<T: std::fmt::Debug>(result: &StadefResult<T>) {
        match result {
            Err(error) if error.is_invalid_argument() => {}
            other => panic!("Expected invalid-argument error, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_invalid_state<T: std::fmt::Debug>(result: &StadefResult<T>) {
        match result {
            Err(error) if error.is_invalid_state() => {}
            other => panic!("Expected invalid-state error, got: {:?}", other),
        }
    }

    /// Assert that a result carries exactly the given repository error.
    #[track_caller]
    pub fn assert_storage_error<T: std::fmt::Debug>(
        result: &StadefResult<T>,
        expected: &StorageError,
    ) {
        match result {
            Err(StadefError::Storage(error)) => assert_eq!(error, expected),
            other => panic!("Expected Storage error {:?}, got: {:?}", expected, other),
        }
    }

    /// Assert ascending `(id, effective_at)` order with no repeated version.
    #[track_caller]
    pub fn assert_sorted_versions<T: VersionedEntity>(entities: &[T]) {
        for pair in entities.windows(2) {
            assert!(
                pair[0].version_key() < pair[1].version_key(),
                "Versions out of order or repeated: {:?} then {:?}",
                pair[0].version_key(),
                pair[1].version_key()
            );
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================


#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Generated histories are contiguous and open-ended.
        #[test]
        fn prop_channel_history_is_contiguous(
            history in generators::arb_channel_history("STA.BHZ"),
        ) {
            for pair in history.windows(2) {
                prop_assert_eq!(pair[0].effective_until(), pair[1].effective_at());
            }
            prop_assert!(history.last().unwrap().effective_until().is_none());
        }

        #[test]
        fn prop_response_id_is_v4(id in generators::arb_response_id()) {
            prop_assert_eq!(id.get_version(), Some(uuid::Version::Random));
            prop_assert_eq!(id.get_variant(), uuid::Variant::RFC4122);
        }

        #[test]
        fn prop_time_range_is_ordered((start, end) in generators::arb_time_range()) {
            prop_assert!(start <= end);
        }
    }
}
