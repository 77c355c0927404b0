//! Station definition faceting
//!
//! Applies a [`FacetingDefinition`] to an entity: a non-populated definition
//! collapses the entity to a version reference, a populated one makes sure the
//! entity is populated (fetching it through the accessor when it is only a
//! reference) and then facets each named child collection in turn. Entities
//! whose required children all drop out are themselves dropped.

use crate::{StationDefinitionEntity, StationDefinitionRepository};
use stadef_core::{
    Channel, ChannelData, ChannelGroup, ChannelGroupData, FacetingDefinition, Response, StadefError,
    StadefResult, Station, StationData, StationGroup, StationGroupData, Timestamp, ValidationError,
    VersionedEntity, CHANNELS_KEY, CHANNEL_GROUPS_KEY, RESPONSE_KEY, STATIONS_KEY,
};
use std::collections::HashSet;

/// Facets entities, resolving missing data through `accessor`.
pub struct StationDefinitionFacetingUtility<'a, R: StationDefinitionRepository + ?Sized> {
    accessor: &'a R,
}

impl<'a, R: StationDefinitionRepository + ?Sized> StationDefinitionFacetingUtility<'a, R> {
    pub fn new(accessor: &'a R) -> Self {
        Self { accessor }
    }

    /// Facet `initial` at `effective_at`.
    ///
    /// Returns `Ok(None)` when the entity cannot be populated or every one of
    /// its required children was dropped. Fails with an invalid-argument
    /// error if `faceting` describes a different entity type.
    pub fn populate_facets<T: Facetable>(
        &self,
        initial: &T,
        faceting: &FacetingDefinition,
        effective_at: Timestamp,
    ) -> StadefResult<Option<T>> {
        if faceting.class_type != T::ENTITY_TYPE {
            return Err(StadefError::Validation(ValidationError::InvalidValue {
                field: "faceting_definition.class_type".to_string(),
                reason: format!(
                    "expected {} but found {}",
                    T::ENTITY_TYPE,
                    faceting.class_type
                ),
            }));
        }

        if !faceting.populated {
            return Ok(Some(initial.to_version_reference()));
        }

        let populated = if initial.is_populated() {
            initial.clone()
        } else {
            let fetched = T::find_by_id_and_time(
                self.accessor,
                std::slice::from_ref(initial.id()),
                effective_at,
            )?;
            match fetched.into_iter().next() {
                Some(entity) => entity,
                None => return Ok(None),
            }
        };

        match populated.data() {
            Some(data) => T::populate_children(self, &populated, data, faceting, effective_at),
            None => Ok(Some(populated)),
        }
    }

    /// Facet each child if a definition is given, dropping the ones that
    /// cannot be populated; children are kept as-is otherwise.
    fn populate_all<T: Facetable>(
        &self,
        children: &[T],
        faceting: Option<&FacetingDefinition>,
        effective_at: Timestamp,
    ) -> StadefResult<Vec<T>> {
        let Some(faceting) = faceting else {
            return Ok(children.to_vec());
        };
        let mut populated = Vec::with_capacity(children.len());
        for child in children {
            if let Some(child) = self.populate_facets(child, faceting, effective_at)? {
                populated.push(child);
            }
        }
        Ok(populated)
    }
}

/// Entity with type-specific child faceting.
pub trait Facetable: StationDefinitionEntity {
    /// Facet the children of a populated entity.
    fn populate_children<R: StationDefinitionRepository + ?Sized>(
        utility: &StationDefinitionFacetingUtility<'_, R>,
        entity: &Self,
        data: &Self::Data,
        faceting: &FacetingDefinition,
        effective_at: Timestamp,
    ) -> StadefResult<Option<Self>>;
}

fn with_data<T: VersionedEntity>(entity: &T, data: T::Data) -> T {
    T::from_parts(entity.id().clone(), entity.presence().map_data(move |_| data))
}

impl Facetable for StationGroup {
    fn populate_children<R: StationDefinitionRepository + ?Sized>(
        utility: &StationDefinitionFacetingUtility<'_, R>,
        entity: &Self,
        data: &StationGroupData,
        faceting: &FacetingDefinition,
        effective_at: Timestamp,
    ) -> StadefResult<Option<Self>> {
        let stations =
            utility.populate_all(&data.stations, faceting.facet(STATIONS_KEY), effective_at)?;
        if stations.is_empty() {
            return Ok(None);
        }
        Ok(Some(with_data(
            entity,
            StationGroupData {
                description: data.description.clone(),
                stations,
            },
        )))
    }
}

impl Facetable for Station {
    fn populate_children<R: StationDefinitionRepository + ?Sized>(
        utility: &StationDefinitionFacetingUtility<'_, R>,
        entity: &Self,
        data: &StationData,
        faceting: &FacetingDefinition,
        effective_at: Timestamp,
    ) -> StadefResult<Option<Self>> {
        let group_faceting = faceting.facet(CHANNEL_GROUPS_KEY);
        let channel_groups =
            utility.populate_all(&data.channel_groups, group_faceting, effective_at)?;
        let channels = utility.populate_all(
            &data.all_raw_channels,
            faceting.facet(CHANNELS_KEY),
            effective_at,
        )?;

        // Populated channel groups restrict the raw channels to the ones they hold.
        let expected: HashSet<String> = if group_faceting.is_some_and(|f| f.populated) {
            let grouped: HashSet<&String> = channel_groups
                .iter()
                .flat_map(|group| group.channels())
                .map(|channel| &channel.name)
                .collect();
            channels
                .iter()
                .filter(|channel| grouped.contains(&channel.name))
                .map(|channel| channel.name.clone())
                .collect()
        } else {
            channels.iter().map(|channel| channel.name.clone()).collect()
        };

        let channel_groups: Vec<ChannelGroup> = channel_groups
            .into_iter()
            .filter_map(|group| match group.data() {
                Some(group_data) => {
                    let kept: Vec<Channel> = group_data
                        .channels
                        .iter()
                        .filter(|channel| expected.contains(&channel.name))
                        .cloned()
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
                }
                None => Some(group),
            })
            .collect();

        let channels: Vec<Channel> = channels
            .into_iter()
            .filter(|channel| expected.contains(&channel.name))
            .collect();

        if channels.is_empty() || channel_groups.is_empty() {
            return Ok(None);
        }
        Ok(Some(with_data(
            entity,
            StationData {
                channel_groups,
                all_raw_channels: channels,
                ..data.clone()
            },
        )))
    }
}

impl Facetable for ChannelGroup {
    fn populate_children<R: StationDefinitionRepository + ?Sized>(
        utility: &StationDefinitionFacetingUtility<'_, R>,
        entity: &Self,
        data: &ChannelGroupData,
        faceting: &FacetingDefinition,
        effective_at: Timestamp,
    ) -> StadefResult<Option<Self>> {
        let channels =
            utility.populate_all(&data.channels, faceting.facet(CHANNELS_KEY), effective_at)?;
        if channels.is_empty() {
            return Ok(None);
        }
        Ok(Some(with_data(
            entity,
            ChannelGroupData {
                channels,
                ..data.clone()
            },
        )))
    }
}

impl Facetable for Channel {
    fn populate_children<R: StationDefinitionRepository + ?Sized>(
        utility: &StationDefinitionFacetingUtility<'_, R>,
        entity: &Self,
        data: &ChannelData,
        faceting: &FacetingDefinition,
        effective_at: Timestamp,
    ) -> StadefResult<Option<Self>> {
        let (Some(response), Some(response_faceting)) =
            (data.response.as_ref(), faceting.facet(RESPONSE_KEY))
        else {
            return Ok(Some(entity.clone()));
        };

        let Some(response) = utility.populate_facets(response, response_faceting, effective_at)?
        else {
            return Ok(None);
        };
        Ok(Some(with_data(
            entity,
            ChannelData {
                response: Some(response),
                ..data.clone()
            },
        )))
    }
}

// Responses have no faceted children.
impl Facetable for Response {
    fn populate_children<R: StationDefinitionRepository + ?Sized>(
        _utility: &StationDefinitionFacetingUtility<'_, R>,
        entity: &Self,
        _data: &<Self as VersionedEntity>::Data,
        _faceting: &FacetingDefinition,
        _effective_at: Timestamp,
    ) -> StadefResult<Option<Self>> {
        Ok(Some(entity.clone()))
    }
}
