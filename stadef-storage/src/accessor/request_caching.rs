//! Whole-request memoization in front of an entity-caching accessor.

use crate::cache::{CachedResult, RequestCache};
use crate::facet::{Facetable, StationDefinitionFacetingUtility};
use crate::{require_ids, require_range, StationDefinitionAccessor, StationDefinitionRepository};
use stadef_core::{
    Channel, ChannelGroup, EntityType, FacetingDefinition, Request, Response, ResponseId,
    StadefResult, Station, StationGroup, Timestamp, VersionedEntity,
};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

/// Memoizes every lookup by its normalized [`Request`] and delegates misses.
///
/// Stores and [`cache`](StationDefinitionAccessor::cache) pass straight
/// through; neither touches the request cache.
pub struct RequestCachingAccessor<A> {
    delegate: Arc<A>,
    request_cache: Arc<RequestCache>,
}

impl<A: StationDefinitionAccessor> RequestCachingAccessor<A> {
    pub fn new(delegate: Arc<A>, request_cache: Arc<RequestCache>) -> Self {
        Self {
            delegate,
            request_cache,
        }
    }

    pub fn request_cache(&self) -> &Arc<RequestCache> {
        &self.request_cache
    }

    pub fn delegate(&self) -> &Arc<A> {
        &self.delegate
    }

    fn retrieve_or_delegate<T: CachedResult>(
        &self,
        request: Request,
        fetch: impl FnOnce(&A) -> StadefResult<Vec<T>>,
    ) -> StadefResult<Vec<T>> {
        if let Some(cached) = self.request_cache.retrieve(&request) {
            return Ok(cached);
        }
        let results = fetch(&self.delegate)?;
        self.request_cache.put(request, results.clone());
        Ok(results)
    }

    /// Faceted lookup. A hit is faceted again against this accessor so its
    /// children reflect the current caches.
    fn retrieve_faceted<T: Facetable + CachedResult>(
        &self,
        request: Request,
        effective_at: Timestamp,
        faceting: &FacetingDefinition,
        fetch: impl FnOnce(&A) -> StadefResult<Vec<T>>,
    ) -> StadefResult<Vec<T>> {
        let Some(cached) = self.request_cache.retrieve::<T>(&request) else {
            let results = fetch(&self.delegate)?;
            self.request_cache.put(request, results.clone());
            return Ok(results);
        };

        debug!(request = %request, "Refaceting cached result");
        let utility = StationDefinitionFacetingUtility::new(self);
        let mut seen = HashSet::new();
        let mut faceted = Vec::with_capacity(cached.len());
        for entity in &cached {
            if let Some(entity) = utility.populate_facets(entity, faceting, effective_at)? {
                if seen.insert(entity.version_key()) {
                    faceted.push(entity);
                }
            }
        }
        Ok(faceted)
    }
}

impl<A: StationDefinitionAccessor> StationDefinitionRepository for RequestCachingAccessor<A> {
    fn find_station_groups_by_name_and_time(
        &self,
        station_group_names: &[String],
        effective_at: Timestamp,
    ) -> StadefResult<Vec<StationGroup>> {
        require_ids("station_group_names", station_group_names)?;
        let request = Request::at(EntityType::StationGroup, station_group_names, effective_at);
        self.retrieve_or_delegate(request, |delegate| {
            delegate.find_station_groups_by_name_and_time(station_group_names, effective_at)
        })
    }

    fn find_station_groups_by_name_and_time_range(
        &self,
        station_group_names: &[String],
        start: Timestamp,
        end: Timestamp,
    ) -> StadefResult<Vec<StationGroup>> {
        require_ids("station_group_names", station_group_names)?;
        require_range(start, end)?;
        let request = Request::range(EntityType::StationGroup, station_group_names, start, end);
        self.retrieve_or_delegate(request, |delegate| {
            delegate.find_station_groups_by_name_and_time_range(station_group_names, start, end)
        })
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
        let request = Request::at(EntityType::Station, station_names, effective_at);
        self.retrieve_or_delegate(request, |delegate| {
            delegate.find_stations_by_name_and_time(station_names, effective_at)
        })
    }

    fn find_stations_by_name_and_time_range(
        &self,
        station_names: &[String],
        start: Timestamp,
        end: Timestamp,
    ) -> StadefResult<Vec<Station>> {
        require_ids("station_names", station_names)?;
        require_range(start, end)?;
        let request = Request::range(EntityType::Station, station_names, start, end);
        self.retrieve_or_delegate(request, |delegate| {
            delegate.find_stations_by_name_and_time_range(station_names, start, end)
        })
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
        let request = Request::at(EntityType::ChannelGroup, channel_group_names, effective_at);
        self.retrieve_or_delegate(request, |delegate| {
            delegate.find_channel_groups_by_name_and_time(channel_group_names, effective_at)
        })
    }

    fn find_channel_groups_by_name_and_time_range(
        &self,
        channel_group_names: &[String],
        start: Timestamp,
        end: Timestamp,
    ) -> StadefResult<Vec<ChannelGroup>> {
        require_ids("channel_group_names", channel_group_names)?;
        require_range(start, end)?;
        let request = Request::range(EntityType::ChannelGroup, channel_group_names, start, end);
        self.retrieve_or_delegate(request, |delegate| {
            delegate.find_channel_groups_by_name_and_time_range(channel_group_names, start, end)
        })
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
        let request = Request::at(EntityType::Channel, channel_names, effective_at);
        self.retrieve_or_delegate(request, |delegate| {
            delegate.find_channels_by_name_and_time(channel_names, effective_at)
        })
    }

    fn find_channels_by_name_and_time_range(
        &self,
        channel_names: &[String],
        start: Timestamp,
        end: Timestamp,
    ) -> StadefResult<Vec<Channel>> {
        require_ids("channel_names", channel_names)?;
        require_range(start, end)?;
        let request = Request::range(EntityType::Channel, channel_names, start, end);
        self.retrieve_or_delegate(request, |delegate| {
            delegate.find_channels_by_name_and_time_range(channel_names, start, end)
        })
    }

    fn store_channels(&self, channels: &[Channel]) -> StadefResult<()> {
        self.delegate.store_channels(channels)
    }

    fn find_responses_by_id_and_time(
        &self,
        response_ids: &[ResponseId],
        effective_at: Timestamp,
    ) -> StadefResult<Vec<Response>> {
        let request = Request::at(EntityType::Response, response_ids, effective_at);
        self.retrieve_or_delegate(request, |delegate| {
            delegate.find_responses_by_id_and_time(response_ids, effective_at)
        })
    }

    fn find_responses_by_id_and_time_range(
        &self,
        response_ids: &[ResponseId],
        start: Timestamp,
        end: Timestamp,
    ) -> StadefResult<Vec<Response>> {
        require_range(start, end)?;
        let request = Request::range(EntityType::Response, response_ids, start, end);
        self.retrieve_or_delegate(request, |delegate| {
            delegate.find_responses_by_id_and_time_range(response_ids, start, end)
        })
    }

    fn store_responses(&self, responses: &[Response]) -> StadefResult<()> {
        self.delegate.store_responses(responses)
    }
}

impl<A: StationDefinitionAccessor> StationDefinitionAccessor for RequestCachingAccessor<A> {
    fn find_station_groups_by_name_and_time_faceted(
        &self,
        station_group_names: &[String],
        effective_at: Timestamp,
        faceting: &FacetingDefinition,
    ) -> StadefResult<Vec<StationGroup>> {
        require_ids("station_group_names", station_group_names)?;
        let request = Request::at(EntityType::StationGroup, station_group_names, effective_at)
            .with_faceting(faceting.clone());
        self.retrieve_faceted(request, effective_at, faceting, |delegate| {
            delegate.find_station_groups_by_name_and_time_faceted(
                station_group_names,
                effective_at,
                faceting,
            )
        })
    }

    fn find_stations_by_name_and_time_faceted(
        &self,
        station_names: &[String],
        effective_at: Timestamp,
        faceting: &FacetingDefinition,
    ) -> StadefResult<Vec<Station>> {
        require_ids("station_names", station_names)?;
        let request = Request::at(EntityType::Station, station_names, effective_at)
            .with_faceting(faceting.clone());
        self.retrieve_faceted(request, effective_at, faceting, |delegate| {
            delegate.find_stations_by_name_and_time_faceted(station_names, effective_at, faceting)
        })
    }

    fn find_channel_groups_by_name_and_time_faceted(
        &self,
        channel_group_names: &[String],
        effective_at: Timestamp,
        faceting: &FacetingDefinition,
    ) -> StadefResult<Vec<ChannelGroup>> {
        require_ids("channel_group_names", channel_group_names)?;
        let request = Request::at(EntityType::ChannelGroup, channel_group_names, effective_at)
            .with_faceting(faceting.clone());
        self.retrieve_faceted(request, effective_at, faceting, |delegate| {
            delegate.find_channel_groups_by_name_and_time_faceted(
                channel_group_names,
                effective_at,
                faceting,
            )
        })
    }

    fn find_channels_by_name_and_time_faceted(
        &self,
        channel_names: &[String],
        effective_at: Timestamp,
        faceting: &FacetingDefinition,
    ) -> StadefResult<Vec<Channel>> {
        require_ids("channel_names", channel_names)?;
        let request = Request::at(EntityType::Channel, channel_names, effective_at)
            .with_faceting(faceting.clone());
        self.retrieve_faceted(request, effective_at, faceting, |delegate| {
            delegate.find_channels_by_name_and_time_faceted(channel_names, effective_at, faceting)
        })
    }

    fn find_responses_by_id_and_time_faceted(
        &self,
        response_ids: &[ResponseId],
        effective_at: Timestamp,
        faceting: &FacetingDefinition,
    ) -> StadefResult<Vec<Response>> {
        let request = Request::at(EntityType::Response, response_ids, effective_at)
            .with_faceting(faceting.clone());
        self.retrieve_faceted(request, effective_at, faceting, |delegate| {
            delegate.find_responses_by_id_and_time_faceted(response_ids, effective_at, faceting)
        })
    }

    fn determine_station_change_times(
        &self,
        station: &Station,
        start: Timestamp,
        end: Timestamp,
    ) -> StadefResult<Vec<Timestamp>> {
        require_ids("station.name", std::slice::from_ref(&station.name))?;
        require_range(start, end)?;
        let request = Request::range(
            EntityType::Station,
            std::slice::from_ref(&station.name),
            start,
            end,
        );
        self.retrieve_or_delegate(request, |delegate| {
            delegate.determine_station_change_times(station, start, end)
        })
    }

    fn cache(
        &self,
        station_group_names: &[String],
        start: Timestamp,
        end: Timestamp,
    ) -> StadefResult<()> {
        self.delegate.cache(station_group_names, start, end)
    }
}
