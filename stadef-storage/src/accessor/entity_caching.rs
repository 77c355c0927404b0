//! Entity-level version caching.
//!
//! Point lookups answer each id from the version cache when the instant lies
//! in the operational window and fetch the rest in one delegate call. Range
//! lookups subtract every cached validity range from the requested range and
//! fetch only the uncovered gaps, one delegate call per gap. Fetched versions
//! are cached with their children demoted to entity references.

use crate::cache::{VersionCache, VersionKey};
use crate::facet::{Facetable, StationDefinitionFacetingUtility};
use crate::range::{RangeMap, RangeSet, TimeRange};
use crate::window::OperationalWindow;
use crate::{
    require_ids, require_range, StationDefinitionAccessor, StationDefinitionEntity,
    StationDefinitionRepository,
};
use stadef_core::{
    Channel, ChannelData, ChannelGroup, ChannelGroupData, FacetingDefinition, Response,
    ResponseId, StadefError, StadefResult, Station, StationData, StationGroup, StationGroupData,
    Timestamp, ValidationError, VersionedEntity,
};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info};

/// Caching accessor over a backing repository `R` and a version cache `C`.
pub struct EntityCachingAccessor<R, C> {
    delegate: Arc<R>,
    version_cache: Arc<C>,
    operational_window: Arc<OperationalWindow>,
}

impl<R, C> EntityCachingAccessor<R, C>
where
    R: StationDefinitionRepository,
    C: VersionCache,
{
    pub fn new(
        delegate: Arc<R>,
        version_cache: Arc<C>,
        operational_window: Arc<OperationalWindow>,
    ) -> Self {
        Self {
            delegate,
            version_cache,
            operational_window,
        }
    }

    pub fn version_cache(&self) -> &Arc<C> {
        &self.version_cache
    }

    pub fn operational_window(&self) -> &Arc<OperationalWindow> {
        &self.operational_window
    }

    // ========================================================================
    // GENERIC LOOKUP
    // ========================================================================

    /// Point lookup shared by every entity type.
    ///
    /// `resolve_children` runs on cached and fetched entities alike and may
    /// drop an entity by returning `None`. `fetch` is called at most once,
    /// with exactly the ids the cache could not answer.
    fn find_cached_objects<T, F, D>(
        &self,
        ids: &[T::Id],
        effective_at: Timestamp,
        window: &TimeRange,
        resolve_children: F,
        fetch: D,
    ) -> StadefResult<Vec<T>>
    where
        T: StationDefinitionEntity,
        F: Fn(T) -> StadefResult<Option<T>>,
        D: FnOnce(&[T::Id]) -> StadefResult<Vec<T>>,
    {
        let mut found = Vec::new();
        let mut remaining: Vec<T::Id> = ids.to_vec();
        remaining.sort();
        remaining.dedup();

        if window.contains(effective_at) {
            for id in &remaining {
                let key = VersionKey::of::<T>(id);
                if !self.version_cache.has_key(&key) {
                    continue;
                }
                match self.version_cache.get::<T>(&key, effective_at) {
                    Some(entity) => found.extend(resolve_children(entity)?),
                    None => info!(
                        key = %key,
                        effective_at = %effective_at,
                        "Version cache returned no entity for a cached key, ignoring"
                    ),
                }
            }
            let cached: HashSet<&T::Id> = found.iter().map(|entity| entity.id()).collect();
            remaining.retain(|id| !cached.contains(id));
        }

        debug!(
            entity_type = %T::ENTITY_TYPE,
            cached = found.len(),
            fetching = remaining.len(),
            "Point lookup"
        );

        if !remaining.is_empty() {
            for entity in fetch(&remaining)? {
                found.extend(resolve_children(entity)?);
            }
        }

        Ok(sort_versions(found))
    }

    /// Range lookup shared by every entity type.
    ///
    /// Cached versions overlapping `[start, end]` go through
    /// `resolve_children`; every uncovered gap is fetched separately, latest
    /// gap first, scoped to that gap's endpoints.
    fn find_cached_objects_by_id_and_time_range<T, F, D>(
        &self,
        ids: &[T::Id],
        start: Timestamp,
        end: Timestamp,
        resolve_children: F,
        fetch: D,
    ) -> StadefResult<Vec<T>>
    where
        T: StationDefinitionEntity,
        F: Fn(T) -> StadefResult<Option<T>>,
        D: Fn(&[T::Id], Timestamp, Timestamp) -> StadefResult<Vec<T>>,
    {
        let requested = TimeRange::closed(start, end);
        let mut ids: Vec<T::Id> = ids.to_vec();
        ids.sort();
        ids.dedup();

        let mut found = Vec::new();
        for id in &ids {
            let mut gaps = RangeSet::of(requested);
            let key = VersionKey::of::<T>(id);

            if let Some(cached) = self.version_cache.get_range_map::<T>(&key) {
                for (range, entity) in cached.iter().rev() {
                    gaps.remove(range);
                    if range.overlaps(&requested) {
                        found.extend(resolve_children(entity.clone())?);
                    }
                }
            }

            for gap in gaps.as_descending_ranges() {
                let (Some(gap_start), Some(gap_end)) = (gap.lower_endpoint(), gap.upper_endpoint())
                else {
                    continue;
                };
                debug!(key = %key, gap = %gap, "Fetching uncached range");
                found.extend(fetch(std::slice::from_ref(id), gap_start, gap_end)?);
            }
        }

        Ok(sort_versions(found))
    }

    /// Write fetched versions into the version cache, children demoted,
    /// keeping only versions connected to the operational window.
    fn cache_versions<T: StationDefinitionEntity>(&self, entities: &[T], window: &TimeRange) {
        let mut by_id: BTreeMap<&T::Id, RangeMap<T>> = BTreeMap::new();
        for entity in entities.iter().filter(|entity| entity.is_populated()) {
            let Some(effective_at) = entity.effective_at() else {
                continue;
            };
            let range = TimeRange::effective(effective_at, entity.effective_until());
            if !window.is_connected(&range) {
                continue;
            }
            by_id
                .entry(entity.id())
                .or_default()
                .put(range, entity.with_entity_reference_children());
        }

        for (id, versions) in by_id {
            self.version_cache.put(&VersionKey::of::<T>(id), &versions);
        }
    }

    /// Cache the populated responses carried by freshly fetched channels.
    fn cache_channel_responses(&self, channels: &[Channel], window: &TimeRange) {
        let responses: Vec<Response> = channels
            .iter()
            .filter_map(Channel::response)
            .filter(|response| response.is_populated())
            .cloned()
            .collect();
        self.cache_versions(&responses, window);
    }

    /// Point-lookup fetch: cache the results only if `effective_at` lies in
    /// the window.
    fn fetch_at<T: StationDefinitionEntity>(
        &self,
        ids: &[T::Id],
        effective_at: Timestamp,
        window: &TimeRange,
    ) -> StadefResult<Vec<T>> {
        let fetched = T::find_by_id_and_time(&*self.delegate, ids, effective_at)?;
        if window.contains(effective_at) {
            self.cache_versions(&fetched, window);
        }
        Ok(fetched)
    }

    fn fetch_range<T: StationDefinitionEntity>(
        &self,
        ids: &[T::Id],
        start: Timestamp,
        end: Timestamp,
        window: &TimeRange,
    ) -> StadefResult<Vec<T>> {
        let fetched = T::find_by_id_and_time_range(&*self.delegate, ids, start, end)?;
        self.cache_versions(&fetched, window);
        Ok(fetched)
    }

    /// Plain point lookup followed by faceting of each result.
    fn facet_all<T: Facetable>(
        &self,
        entities: Vec<T>,
        effective_at: Timestamp,
        faceting: &FacetingDefinition,
    ) -> StadefResult<Vec<T>> {
        let utility = StationDefinitionFacetingUtility::new(self);
        let mut faceted = Vec::with_capacity(entities.len());
        for entity in &entities {
            faceted.extend(utility.populate_facets(entity, faceting, effective_at)?);
        }
        Ok(sort_versions(faceted))
    }
}

/// Sort by id then effective time (references first) and drop repeated
/// versions.
fn sort_versions<T: VersionedEntity>(mut entities: Vec<T>) -> Vec<T> {
    entities.sort_by(|a, b| {
        a.id()
            .cmp(b.id())
            .then_with(|| a.effective_at().cmp(&b.effective_at()))
    });
    entities.dedup_by(|a, b| a.version_key() == b.version_key());
    entities
}

fn names<T: VersionedEntity<Id = String>>(entities: &[T]) -> Vec<String> {
    entities.iter().map(|entity| entity.id().clone()).collect()
}

fn with_data<T: VersionedEntity>(entity: &T, data: T::Data) -> T {
    T::from_parts(entity.id().clone(), entity.presence().map_data(move |_| data))
}

// ============================================================================
// REPOSITORY SURFACE
// ============================================================================

impl<R, C> StationDefinitionRepository for EntityCachingAccessor<R, C>
where
    R: StationDefinitionRepository,
    C: VersionCache,
{
    fn find_station_groups_by_name_and_time(
        &self,
        station_group_names: &[String],
        effective_at: Timestamp,
    ) -> StadefResult<Vec<StationGroup>> {
        require_ids("station_group_names", station_group_names)?;
        let window = self.operational_window.snapshot();

        let resolve_stations = |group: StationGroup| -> StadefResult<Option<StationGroup>> {
            let Some(data) = group.data() else {
                return Ok(Some(group));
            };
            let stations: Vec<Station> = self
                .find_stations_by_name_and_time(&names(&data.stations), effective_at)?
                .iter()
                .map(Station::to_version_reference)
                .collect();
            if stations.is_empty() {
                return Ok(None);
            }
            Ok(Some(with_data(
                &group,
                StationGroupData {
                    description: data.description.clone(),
                    stations,
                },
            )))
        };

        self.find_cached_objects(
            station_group_names,
            effective_at,
            &window,
            resolve_stations,
            |ids| self.fetch_at(ids, effective_at, &window),
        )
    }

    fn find_station_groups_by_name_and_time_range(
        &self,
        station_group_names: &[String],
        start: Timestamp,
        end: Timestamp,
    ) -> StadefResult<Vec<StationGroup>> {
        require_ids("station_group_names", station_group_names)?;
        require_range(start, end)?;
        let window = self.operational_window.snapshot();

        self.find_cached_objects_by_id_and_time_range(
            station_group_names,
            start,
            end,
            |group| Ok(Some(group)),
            |ids, gap_start, gap_end| self.fetch_range(ids, gap_start, gap_end, &window),
        )
    }

    fn store_station_groups(&self, station_groups: &[StationGroup]) -> StadefResult<()> {
        self.delegate.store_station_groups(station_groups)
    }

    fn find_stations_by_name_and_time(
        &self,
        station_names: &[String],
        effective_at: Timestamp,
    ) -> StadefResult<Vec<Station>> {
        require_ids("station_names", station_names)?;
        let window = self.operational_window.snapshot();

        let resolve_children = |station: Station| -> StadefResult<Option<Station>> {
            let Some(data) = station.data() else {
                return Ok(Some(station));
            };
            let channels: Vec<Channel> = self
                .find_channels_by_name_and_time(&names(&data.all_raw_channels), effective_at)?
                .iter()
                .map(Channel::to_version_reference)
                .collect();
            let channel_keys: HashSet<_> = channels.iter().map(Channel::version_key).collect();

            // Groups must only reference channel versions the station itself holds.
            let channel_groups: Vec<ChannelGroup> = self
                .find_channel_groups_by_name_and_time(&names(&data.channel_groups), effective_at)?
                .into_iter()
                .filter(|group| {
                    group
                        .channels()
                        .iter()
                        .all(|channel| channel_keys.contains(&channel.version_key()))
                })
                .collect();

            if channels.is_empty() || channel_groups.is_empty() {
                return Ok(None);
            }
            Ok(Some(with_data(
                &station,
                StationData {
                    channel_groups,
                    all_raw_channels: channels,
                    ..data.clone()
                },
            )))
        };

        self.find_cached_objects(
            station_names,
            effective_at,
            &window,
            resolve_children,
            |ids| self.fetch_at(ids, effective_at, &window),
        )
    }

    fn find_stations_by_name_and_time_range(
        &self,
        station_names: &[String],
        start: Timestamp,
        end: Timestamp,
    ) -> StadefResult<Vec<Station>> {
        require_ids("station_names", station_names)?;
        require_range(start, end)?;
        let window = self.operational_window.snapshot();

        // Cached stations re-resolve their groups at their own effective time.
        let resolve_children = |station: Station| -> StadefResult<Option<Station>> {
            let (Some(data), Some(station_effective_at)) = (station.data(), station.effective_at())
            else {
                return Ok(Some(station));
            };
            let channel_names: HashSet<&String> =
                data.all_raw_channels.iter().map(|c| &c.name).collect();
            let channels: Vec<Channel> = data
                .all_raw_channels
                .iter()
                .map(Channel::to_entity_reference)
                .collect();

            let channel_groups: Vec<ChannelGroup> = self
                .find_channel_groups_by_name_and_time(
                    &names(&data.channel_groups),
                    station_effective_at,
                )?
                .into_iter()
                .filter_map(|group| {
                    let group_data = group.data()?;
                    let kept: Vec<Channel> = group_data
                        .channels
                        .iter()
                        .filter(|channel| channel_names.contains(&channel.name))
                        .map(Channel::to_entity_reference)
                        .collect();
                    (!kept.is_empty()).then(|| {
                        with_data(
                            &group,
                            ChannelGroupData {
                                channels: kept,
                                ..group_data.clone()
                            },
                        )
                    })
                })
                .collect();

            if channels.is_empty() || channel_groups.is_empty() {
                return Ok(None);
            }
            Ok(Some(with_data(
                &station,
                StationData {
                    channel_groups,
                    all_raw_channels: channels,
                    ..data.clone()
                },
            )))
        };

        self.find_cached_objects_by_id_and_time_range(
            station_names,
            start,
            end,
            resolve_children,
            |ids, gap_start, gap_end| self.fetch_range(ids, gap_start, gap_end, &window),
        )
    }

    fn store_stations(&self, stations: &[Station]) -> StadefResult<()> {
        self.delegate.store_stations(stations)
    }

    fn find_channel_groups_by_name_and_time(
        &self,
        channel_group_names: &[String],
        effective_at: Timestamp,
    ) -> StadefResult<Vec<ChannelGroup>> {
        require_ids("channel_group_names", channel_group_names)?;
        let window = self.operational_window.snapshot();

        let resolve_channels = |group: ChannelGroup| -> StadefResult<Option<ChannelGroup>> {
            let Some(data) = group.data() else {
                return Ok(Some(group));
            };
            let channels: Vec<Channel> = self
                .find_channels_by_name_and_time(&names(&data.channels), effective_at)?
                .iter()
                .map(Channel::to_version_reference)
                .collect();
            if channels.is_empty() {
                return Ok(None);
            }
            Ok(Some(with_data(
                &group,
                ChannelGroupData {
                    channels,
                    ..data.clone()
                },
            )))
        };

        self.find_cached_objects(
            channel_group_names,
            effective_at,
            &window,
            resolve_channels,
            |ids| self.fetch_at(ids, effective_at, &window),
        )
    }

    fn find_channel_groups_by_name_and_time_range(
        &self,
        channel_group_names: &[String],
        start: Timestamp,
        end: Timestamp,
    ) -> StadefResult<Vec<ChannelGroup>> {
        require_ids("channel_group_names", channel_group_names)?;
        require_range(start, end)?;
        let window = self.operational_window.snapshot();

        self.find_cached_objects_by_id_and_time_range(
            channel_group_names,
            start,
            end,
            |group| Ok(Some(group)),
            |ids, gap_start, gap_end| self.fetch_range(ids, gap_start, gap_end, &window),
        )
    }

    fn store_channel_groups(&self, channel_groups: &[ChannelGroup]) -> StadefResult<()> {
        self.delegate.store_channel_groups(channel_groups)
    }

    fn find_channels_by_name_and_time(
        &self,
        channel_names: &[String],
        effective_at: Timestamp,
    ) -> StadefResult<Vec<Channel>> {
        require_ids("channel_names", channel_names)?;
        let window = self.operational_window.snapshot();

        let resolve_response = |channel: Channel| -> StadefResult<Option<Channel>> {
            let Some(data) = channel.data() else {
                return Ok(Some(channel));
            };
            let Some(response) = data.response.as_ref() else {
                return Ok(Some(channel));
            };
            let resolved = self
                .find_responses_by_id_and_time(std::slice::from_ref(&response.id), effective_at)?
                .into_iter()
                .next();
            Ok(Some(match resolved {
                Some(response) => with_data(
                    &channel,
                    ChannelData {
                        response: Some(response),
                        ..data.clone()
                    },
                ),
                None => channel,
            }))
        };

        self.find_cached_objects(
            channel_names,
            effective_at,
            &window,
            resolve_response,
            |ids| {
                let channels: Vec<Channel> = self.fetch_at(ids, effective_at, &window)?;
                if window.contains(effective_at) {
                    self.cache_channel_responses(&channels, &window);
                }
                Ok(channels)
            },
        )
    }

    fn find_channels_by_name_and_time_range(
        &self,
        channel_names: &[String],
        start: Timestamp,
        end: Timestamp,
    ) -> StadefResult<Vec<Channel>> {
        require_ids("channel_names", channel_names)?;
        require_range(start, end)?;
        let window = self.operational_window.snapshot();

        self.find_cached_objects_by_id_and_time_range(
            channel_names,
            start,
            end,
            |channel| Ok(Some(channel)),
            |ids, gap_start, gap_end| {
                let channels: Vec<Channel> = self.fetch_range(ids, gap_start, gap_end, &window)?;
                self.cache_channel_responses(&channels, &window);
                Ok(channels)
            },
        )
    }

    fn store_channels(&self, channels: &[Channel]) -> StadefResult<()> {
        self.delegate.store_channels(channels)
    }

    fn find_responses_by_id_and_time(
        &self,
        response_ids: &[ResponseId],
        effective_at: Timestamp,
    ) -> StadefResult<Vec<Response>> {
        let window = self.operational_window.snapshot();

        self.find_cached_objects(
            response_ids,
            effective_at,
            &window,
            |response| Ok(Some(response)),
            |ids| self.fetch_at(ids, effective_at, &window),
        )
    }

    fn find_responses_by_id_and_time_range(
        &self,
        response_ids: &[ResponseId],
        start: Timestamp,
        end: Timestamp,
    ) -> StadefResult<Vec<Response>> {
        require_range(start, end)?;
        let window = self.operational_window.snapshot();

        self.find_cached_objects_by_id_and_time_range(
            response_ids,
            start,
            end,
            |response| Ok(Some(response)),
            |ids, gap_start, gap_end| self.fetch_range(ids, gap_start, gap_end, &window),
        )
    }

    fn store_responses(&self, responses: &[Response]) -> StadefResult<()> {
        self.delegate.store_responses(responses)
    }
}

// ============================================================================
// ACCESSOR SURFACE
// ============================================================================

impl<R, C> StationDefinitionAccessor for EntityCachingAccessor<R, C>
where
    R: StationDefinitionRepository,
    C: VersionCache,
{
    fn find_station_groups_by_name_and_time_faceted(
        &self,
        station_group_names: &[String],
        effective_at: Timestamp,
        faceting: &FacetingDefinition,
    ) -> StadefResult<Vec<StationGroup>> {
        let groups = self.find_station_groups_by_name_and_time(station_group_names, effective_at)?;
        self.facet_all(groups, effective_at, faceting)
    }

    fn find_stations_by_name_and_time_faceted(
        &self,
        station_names: &[String],
        effective_at: Timestamp,
        faceting: &FacetingDefinition,
    ) -> StadefResult<Vec<Station>> {
        let stations = self.find_stations_by_name_and_time(station_names, effective_at)?;
        self.facet_all(stations, effective_at, faceting)
    }

    fn find_channel_groups_by_name_and_time_faceted(
        &self,
        channel_group_names: &[String],
        effective_at: Timestamp,
        faceting: &FacetingDefinition,
    ) -> StadefResult<Vec<ChannelGroup>> {
        let groups = self.find_channel_groups_by_name_and_time(channel_group_names, effective_at)?;
        self.facet_all(groups, effective_at, faceting)
    }

    fn find_channels_by_name_and_time_faceted(
        &self,
        channel_names: &[String],
        effective_at: Timestamp,
        faceting: &FacetingDefinition,
    ) -> StadefResult<Vec<Channel>> {
        let channels = self.find_channels_by_name_and_time(channel_names, effective_at)?;
        self.facet_all(channels, effective_at, faceting)
    }

    fn find_responses_by_id_and_time_faceted(
        &self,
        response_ids: &[ResponseId],
        effective_at: Timestamp,
        faceting: &FacetingDefinition,
    ) -> StadefResult<Vec<Response>> {
        let responses = self.find_responses_by_id_and_time(response_ids, effective_at)?;
        self.facet_all(responses, effective_at, faceting)
    }

    fn determine_station_change_times(
        &self,
        station: &Station,
        start: Timestamp,
        end: Timestamp,
    ) -> StadefResult<Vec<Timestamp>> {
        require_ids("station.name", std::slice::from_ref(&station.name))?;
        require_range(start, end)?;

        let stations = self.find_stations_by_name_and_time_range(
            std::slice::from_ref(&station.name),
            start,
            end,
        )?;
        let group_names: Vec<String> = stations
            .iter()
            .flat_map(|s| s.channel_groups())
            .map(|group| group.name.clone())
            .collect();
        let channel_names: Vec<String> = stations
            .iter()
            .flat_map(|s| s.all_raw_channels())
            .map(|channel| channel.name.clone())
            .collect();

        let channel_groups =
            self.find_channel_groups_by_name_and_time_range(&group_names, start, end)?;
        let channels = self.find_channels_by_name_and_time_range(&channel_names, start, end)?;
        let response_ids: Vec<ResponseId> = channels
            .iter()
            .filter_map(Channel::response)
            .map(|response| response.id)
            .collect();
        let responses = self.find_responses_by_id_and_time_range(&response_ids, start, end)?;

        let mut times: Vec<Timestamp> = stations
            .iter()
            .map(Station::effective_at)
            .chain(channel_groups.iter().map(ChannelGroup::effective_at))
            .chain(channels.iter().map(Channel::effective_at))
            .chain(responses.iter().map(Response::effective_at))
            .flatten()
            .filter(|time| *time <= end)
            .collect();
        times.sort_unstable_by(|a, b| b.cmp(a));
        times.dedup();
        Ok(times)
    }

    fn cache(
        &self,
        station_group_names: &[String],
        start: Timestamp,
        end: Timestamp,
    ) -> StadefResult<()> {
        require_ids("station_group_names", station_group_names)?;
        if start >= end {
            return Err(StadefError::Validation(ValidationError::InvalidTimeRange {
                start,
                end,
            }));
        }

        info!(start = %start, end = %end, "Populating version cache");
        self.operational_window.set_range(TimeRange::closed(start, end));
        self.version_cache.clear();

        info!(count = station_group_names.len(), "Caching station groups");
        let station_groups =
            self.find_station_groups_by_name_and_time_range(station_group_names, start, end)?;

        let station_names: Vec<String> = station_groups
            .iter()
            .flat_map(|group| group.stations())
            .map(|station| station.name.clone())
            .collect();
        info!(count = station_names.len(), "Caching stations");
        let stations = self.find_stations_by_name_and_time_range(&station_names, start, end)?;

        let channel_group_names: Vec<String> = stations
            .iter()
            .flat_map(|station| station.channel_groups())
            .map(|group| group.name.clone())
            .collect();
        info!(count = channel_group_names.len(), "Caching channel groups");
        let channel_groups =
            self.find_channel_groups_by_name_and_time_range(&channel_group_names, start, end)?;

        let channel_names: Vec<String> = channel_groups
            .iter()
            .flat_map(|group| group.channels())
            .map(|channel| channel.name.clone())
            .collect();
        info!(count = channel_names.len(), "Caching channels");
        let channels = self.find_channels_by_name_and_time_range(&channel_names, start, end)?;

        let response_ids: Vec<ResponseId> = channels
            .iter()
            .filter_map(Channel::response)
            .map(|response| response.id)
            .collect();
        info!(count = response_ids.len(), "Caching responses");
        self.find_responses_by_id_and_time_range(&response_ids, start, end)?;

        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================
