//! Faceting definitions
//!
//! A faceting definition states, per entity type, whether an entity should be
//! returned populated or as a version reference, and how each named child
//! collection should in turn be faceted.

use crate::EntityType;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Child key for the stations of a station group.
pub const STATIONS_KEY: &str = "stations";
/// Child key for the channel groups of a station.
pub const CHANNEL_GROUPS_KEY: &str = "channelGroups";
/// Child key for the channels of a station or channel group.
pub const CHANNELS_KEY: &str = "channels";
/// Child key for the response of a channel.
pub const RESPONSE_KEY: &str = "response";

/// Declarative faceting specification.
///
/// Children are kept in a `BTreeMap` so two definitions built in different
/// insertion orders compare and hash equal, which the request cache relies on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FacetingDefinition {
    pub class_type: EntityType,
    pub populated: bool,
    pub facets: BTreeMap<String, FacetingDefinition>,
}

impl FacetingDefinition {
    pub fn new(class_type: EntityType, populated: bool) -> Self {
        Self {
            class_type,
            populated,
            facets: BTreeMap::new(),
        }
    }

    /// Populated definition with no child facets.
    pub fn populated(class_type: EntityType) -> Self {
        Self::new(class_type, true)
    }

    /// Definition that collapses the entity to a version reference.
    pub fn version_reference(class_type: EntityType) -> Self {
        Self::new(class_type, false)
    }

    pub fn with_facet(mut self, key: impl Into<String>, definition: FacetingDefinition) -> Self {
        self.facets.insert(key.into(), definition);
        self
    }

    /// Faceting definition for the named child collection, if any.
    pub fn facet(&self, key: &str) -> Option<&FacetingDefinition> {
        self.facets.get(key)
    }
}
