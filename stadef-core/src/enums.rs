//! Enum types for station definition entities

use serde::{Deserialize, Serialize};
use std::fmt;

/// Entity type discriminator for cache keys and request descriptors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EntityType {
    StationGroup,
    Station,
    ChannelGroup,
    Channel,
    Response,
}

impl EntityType {
    /// All entity types, parents before children.
    pub const ALL: [EntityType; 5] = [
        EntityType::StationGroup,
        EntityType::Station,
        EntityType::ChannelGroup,
        EntityType::Channel,
        EntityType::Response,
    ];

    /// The type name used as the cache key prefix.
    pub fn type_name(&self) -> &'static str {
        match self {
            EntityType::StationGroup => "StationGroup",
            EntityType::Station => "Station",
            EntityType::ChannelGroup => "ChannelGroup",
            EntityType::Channel => "Channel",
            EntityType::Response => "Response",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name())
    }
}

/// Kind of station.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StationType {
    Seismic3Component,
    Seismic1Component,
    SeismicArray,
    Hydroacoustic,
    HydroacousticArray,
    Infrasound,
    InfrasoundArray,
    Weather,
    Unknown,
}

/// Kind of channel group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChannelGroupType {
    /// Channels recorded at one physical site
    SiteGroup,
    /// Channels grouped for processing
    ProcessingGroup,
    PhysicalSiteGroup,
}

/// Measurement units of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Units {
    NanometersPerSecond,
    Nanometers,
    NanometersPerSecondSquared,
    Pascals,
    MicroPascals,
    Counts,
    Unitless,
}
