//! Versioned station definition entities
//!
//! Every entity is valid over `[effective_at, effective_until)` and exists in
//! one of three presence states (see [`Presence`]). Parents hold their children
//! as full entities, version references or entity references; the caches only
//! ever store entities whose children are entity references, which keeps the
//! Station/ChannelGroup/Channel graph acyclic in storage.

use crate::{ChannelGroupType, EntityType, ResponseId, StationType, Timestamp, Units};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::Hash;
use uuid::Uuid;

// ============================================================================
// PRESENCE
// ============================================================================

/// Presence state of a versioned entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Presence<D> {
    /// Id only: no time, no data.
    EntityReference,
    /// Id and pinned version, no data.
    VersionReference { effective_at: Timestamp },
    /// Fully populated version.
    Populated {
        effective_at: Timestamp,
        effective_until: Option<Timestamp>,
        data: D,
    },
}

impl<D> Presence<D> {
    pub fn effective_at(&self) -> Option<Timestamp> {
        match self {
            Presence::EntityReference => None,
            Presence::VersionReference { effective_at } => Some(*effective_at),
            Presence::Populated { effective_at, .. } => Some(*effective_at),
        }
    }

    /// Only populated versions carry an end time.
    pub fn effective_until(&self) -> Option<Timestamp> {
        match self {
            Presence::Populated { effective_until, .. } => *effective_until,
            _ => None,
        }
    }

    pub fn data(&self) -> Option<&D> {
        match self {
            Presence::Populated { data, .. } => Some(data),
            _ => None,
        }
    }

    pub fn is_populated(&self) -> bool {
        matches!(self, Presence::Populated { .. })
    }

    /// Drop the payload, keeping the pinned version if there is one.
    pub fn to_version_reference(&self) -> Presence<D> {
        match self.effective_at() {
            Some(effective_at) => Presence::VersionReference { effective_at },
            None => Presence::EntityReference,
        }
    }

    /// Rewrite the payload of a populated version; references pass through.
    pub fn map_data(&self, f: impl FnOnce(&D) -> D) -> Presence<D> {
        match self {
            Presence::EntityReference => Presence::EntityReference,
            Presence::VersionReference { effective_at } => Presence::VersionReference {
                effective_at: *effective_at,
            },
            Presence::Populated {
                effective_at,
                effective_until,
                data,
            } => Presence::Populated {
                effective_at: *effective_at,
                effective_until: *effective_until,
                data: f(data),
            },
        }
    }
}

// ============================================================================
// VERSIONED ENTITY TRAIT
// ============================================================================

/// Behaviour shared by the five versioned entity kinds.
pub trait VersionedEntity: Clone + fmt::Debug + Send + Sync + 'static {
    /// Identifier type (names for most entities, UUIDs for responses).
    type Id: Clone + Eq + Hash + Ord + fmt::Display + fmt::Debug + Send + Sync + 'static;
    /// Payload carried by populated versions.
    type Data: Clone + fmt::Debug + Send + Sync + 'static;

    const ENTITY_TYPE: EntityType;

    fn id(&self) -> &Self::Id;

    fn presence(&self) -> &Presence<Self::Data>;

    fn from_parts(id: Self::Id, presence: Presence<Self::Data>) -> Self;

    /// Copy of `data` with every child entity demoted to an entity reference.
    fn demote_children(data: &Self::Data) -> Self::Data;

    fn effective_at(&self) -> Option<Timestamp> {
        self.presence().effective_at()
    }

    fn effective_until(&self) -> Option<Timestamp> {
        self.presence().effective_until()
    }

    fn data(&self) -> Option<&Self::Data> {
        self.presence().data()
    }

    fn is_populated(&self) -> bool {
        self.presence().is_populated()
    }

    fn to_entity_reference(&self) -> Self {
        Self::from_parts(self.id().clone(), Presence::EntityReference)
    }

    fn to_version_reference(&self) -> Self {
        Self::from_parts(self.id().clone(), self.presence().to_version_reference())
    }

    /// The form written into the version cache.
    fn with_entity_reference_children(&self) -> Self {
        Self::from_parts(
            self.id().clone(),
            self.presence().map_data(Self::demote_children),
        )
    }

    /// Identity of a version: id plus effective time.
    fn version_key(&self) -> (Self::Id, Option<Timestamp>) {
        (self.id().clone(), self.effective_at())
    }

    fn create_entity_reference(id: Self::Id) -> Self
    where
        Self: Sized,
    {
        Self::from_parts(id, Presence::EntityReference)
    }

    fn create_version_reference(id: Self::Id, effective_at: Timestamp) -> Self
    where
        Self: Sized,
    {
        Self::from_parts(id, Presence::VersionReference { effective_at })
    }
}

// ============================================================================
// SHARED VALUE TYPES
// ============================================================================

/// Geographic location of a station or site.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub latitude_degrees: f64,
    pub longitude_degrees: f64,
    pub depth_km: f64,
    pub elevation_km: f64,
}

/// Calibration of an instrument response.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    pub calibration_period_sec: f64,
    pub calibration_factor: f64,
    pub calibration_time_shift_sec: f64,
}

// ============================================================================
// STATION GROUP
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationGroup {
    pub name: String,
    pub presence: Presence<StationGroupData>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationGroupData {
    pub description: String,
    pub stations: Vec<Station>,
}

impl StationGroup {
    pub fn new(name: impl Into<String>, presence: Presence<StationGroupData>) -> Self {
        Self {
            name: name.into(),
            presence,
        }
    }

    /// Member stations; empty for references.
    pub fn stations(&self) -> &[Station] {
        self.presence
            .data()
            .map(|data| data.stations.as_slice())
            .unwrap_or_default()
    }
}

impl VersionedEntity for StationGroup {
    type Id = String;
    type Data = StationGroupData;

    const ENTITY_TYPE: EntityType = EntityType::StationGroup;

    fn id(&self) -> &String {
        &self.name
    }

    fn presence(&self) -> &Presence<StationGroupData> {
        &self.presence
    }

    fn from_parts(id: String, presence: Presence<StationGroupData>) -> Self {
        Self { name: id, presence }
    }

    fn demote_children(data: &StationGroupData) -> StationGroupData {
        StationGroupData {
            description: data.description.clone(),
            stations: data.stations.iter().map(Station::to_entity_reference).collect(),
        }
    }
}

// ============================================================================
// STATION
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Station {
    pub name: String,
    pub presence: Presence<StationData>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationData {
    pub station_type: StationType,
    pub description: String,
    pub location: Location,
    pub channel_groups: Vec<ChannelGroup>,
    pub all_raw_channels: Vec<Channel>,
}

impl Station {
    pub fn new(name: impl Into<String>, presence: Presence<StationData>) -> Self {
        Self {
            name: name.into(),
            presence,
        }
    }

    pub fn channel_groups(&self) -> &[ChannelGroup] {
        self.presence
            .data()
            .map(|data| data.channel_groups.as_slice())
            .unwrap_or_default()
    }

    pub fn all_raw_channels(&self) -> &[Channel] {
        self.presence
            .data()
            .map(|data| data.all_raw_channels.as_slice())
            .unwrap_or_default()
    }
}

impl VersionedEntity for Station {
    type Id = String;
    type Data = StationData;

    const ENTITY_TYPE: EntityType = EntityType::Station;

    fn id(&self) -> &String {
        &self.name
    }

    fn presence(&self) -> &Presence<StationData> {
        &self.presence
    }

    fn from_parts(id: String, presence: Presence<StationData>) -> Self {
        Self { name: id, presence }
    }

    fn demote_children(data: &StationData) -> StationData {
        StationData {
            station_type: data.station_type,
            description: data.description.clone(),
            location: data.location,
            channel_groups: data
                .channel_groups
                .iter()
                .map(ChannelGroup::to_entity_reference)
                .collect(),
            all_raw_channels: data
                .all_raw_channels
                .iter()
                .map(Channel::to_entity_reference)
                .collect(),
        }
    }
}

// ============================================================================
// CHANNEL GROUP
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelGroup {
    pub name: String,
    pub presence: Presence<ChannelGroupData>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelGroupData {
    pub description: String,
    pub location: Option<Location>,
    pub group_type: ChannelGroupType,
    /// Owning station, normally an entity reference.
    pub station: Station,
    pub channels: Vec<Channel>,
}

impl ChannelGroup {
    pub fn new(name: impl Into<String>, presence: Presence<ChannelGroupData>) -> Self {
        Self {
            name: name.into(),
            presence,
        }
    }

    pub fn channels(&self) -> &[Channel] {
        self.presence
            .data()
            .map(|data| data.channels.as_slice())
            .unwrap_or_default()
    }
}

impl VersionedEntity for ChannelGroup {
    type Id = String;
    type Data = ChannelGroupData;

    const ENTITY_TYPE: EntityType = EntityType::ChannelGroup;

    fn id(&self) -> &String {
        &self.name
    }

    fn presence(&self) -> &Presence<ChannelGroupData> {
        &self.presence
    }

    fn from_parts(id: String, presence: Presence<ChannelGroupData>) -> Self {
        Self { name: id, presence }
    }

    fn demote_children(data: &ChannelGroupData) -> ChannelGroupData {
        ChannelGroupData {
            description: data.description.clone(),
            location: data.location,
            group_type: data.group_type,
            station: data.station.to_entity_reference(),
            channels: data.channels.iter().map(Channel::to_entity_reference).collect(),
        }
    }
}

// ============================================================================
// CHANNEL
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    pub name: String,
    pub presence: Presence<ChannelData>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelData {
    pub description: String,
    /// Owning station, normally an entity reference.
    pub station: Station,
    pub units: Units,
    pub nominal_sample_rate_hz: f64,
    pub response: Option<Response>,
}

impl Channel {
    pub fn new(name: impl Into<String>, presence: Presence<ChannelData>) -> Self {
        Self {
            name: name.into(),
            presence,
        }
    }

    pub fn response(&self) -> Option<&Response> {
        self.presence.data().and_then(|data| data.response.as_ref())
    }
}

impl VersionedEntity for Channel {
    type Id = String;
    type Data = ChannelData;

    const ENTITY_TYPE: EntityType = EntityType::Channel;

    fn id(&self) -> &String {
        &self.name
    }

    fn presence(&self) -> &Presence<ChannelData> {
        &self.presence
    }

    fn from_parts(id: String, presence: Presence<ChannelData>) -> Self {
        Self { name: id, presence }
    }

    fn demote_children(data: &ChannelData) -> ChannelData {
        ChannelData {
            description: data.description.clone(),
            station: data.station.to_entity_reference(),
            units: data.units,
            nominal_sample_rate_hz: data.nominal_sample_rate_hz,
            response: data.response.as_ref().map(Response::to_entity_reference),
        }
    }
}

// ============================================================================
// RESPONSE
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub id: ResponseId,
    pub presence: Presence<ResponseData>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseData {
    pub calibration: Calibration,
    /// Frequency/amplitude/phase table, stored elsewhere.
    pub fap_id: Option<Uuid>,
}

impl Response {
    pub fn new(id: ResponseId, presence: Presence<ResponseData>) -> Self {
        Self { id, presence }
    }
}

impl VersionedEntity for Response {
    type Id = ResponseId;
    type Data = ResponseData;

    const ENTITY_TYPE: EntityType = EntityType::Response;

    fn id(&self) -> &ResponseId {
        &self.id
    }

    fn presence(&self) -> &Presence<ResponseData> {
        &self.presence
    }

    fn from_parts(id: ResponseId, presence: Presence<ResponseData>) -> Self {
        Self { id, presence }
    }

    // Leaf entity.
    fn demote_children(data: &ResponseData) -> ResponseData {
        data.clone()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn ts(year: i32, month: u32, day: u32) -> Timestamp {
        Utc.with_ymd_and_hms(year, month, day, 0, 0, 0).unwrap()
    }

    fn make_test_response() -> Response {
        Response::new(
            Uuid::now_v7(),
            Presence::Populated {
                effective_at: ts(2020, 1, 1),
                effective_until: None,
                data: ResponseData {
                    calibration: Calibration {
                        calibration_period_sec: 1.0,
                        calibration_factor: 0.5,
                        calibration_time_shift_sec: 0.0,
                    },
                    fap_id: None,
                },
            },
        )
    }

    fn make_test_channel() -> Channel {
        Channel::new(
            "STA.STA01.BHZ",
            Presence::Populated {
                effective_at: ts(2020, 1, 1),
                effective_until: Some(ts(2020, 6, 1)),
                data: ChannelData {
                    description: "vertical".to_string(),
                    station: Station::create_version_reference("STA".to_string(), ts(2020, 1, 1)),
                    units: Units::NanometersPerSecond,
                    nominal_sample_rate_hz: 40.0,
                    response: Some(make_test_response()),
                },
            },
        )
    }

    #[test]
    fn test_presence_times() {
        let channel = make_test_channel();
        assert_eq!(channel.effective_at(), Some(ts(2020, 1, 1)));
        assert_eq!(channel.effective_until(), Some(ts(2020, 6, 1)));
        assert!(channel.is_populated());

        let version = channel.to_version_reference();
        assert_eq!(version.effective_at(), Some(ts(2020, 1, 1)));
        assert_eq!(version.effective_until(), None);
        assert!(!version.is_populated());

        let entity = channel.to_entity_reference();
        assert_eq!(entity.effective_at(), None);
        assert_eq!(entity.name, channel.name);
    }

    #[test]
    fn test_version_reference_of_entity_reference_stays_entity_reference() {
        let entity = Station::create_entity_reference("STA".to_string());
        assert_eq!(entity.to_version_reference(), entity);
    }

    #[test]
    fn test_channel_children_demoted() {
        let channel = make_test_channel();
        let stored = channel.with_entity_reference_children();

        let data = stored.data().unwrap();
        assert_eq!(data.station, Station::create_entity_reference("STA".to_string()));
        let response = data.response.as_ref().unwrap();
        assert!(!response.is_populated());
        assert_eq!(response.effective_at(), None);
        assert_eq!(stored.effective_until(), channel.effective_until());
    }

    #[test]
    fn test_station_children_demoted() {
        let channel = make_test_channel();
        let group = ChannelGroup::new(
            "STA01",
            Presence::Populated {
                effective_at: ts(2020, 1, 1),
                effective_until: None,
                data: ChannelGroupData {
                    description: "site".to_string(),
                    location: None,
                    group_type: ChannelGroupType::SiteGroup,
                    station: Station::create_entity_reference("STA".to_string()),
                    channels: vec![channel.clone()],
                },
            },
        );
        let station = Station::new(
            "STA",
            Presence::Populated {
                effective_at: ts(2020, 1, 1),
                effective_until: None,
                data: StationData {
                    station_type: StationType::SeismicArray,
                    description: "array".to_string(),
                    location: Location {
                        latitude_degrees: 10.0,
                        longitude_degrees: 20.0,
                        depth_km: 0.0,
                        elevation_km: 1.0,
                    },
                    channel_groups: vec![group],
                    all_raw_channels: vec![channel],
                },
            },
        );

        let stored = station.with_entity_reference_children();
        assert!(stored.channel_groups().iter().all(|g| g.effective_at().is_none()));
        assert!(stored.all_raw_channels().iter().all(|c| c.effective_at().is_none()));
        assert_eq!(stored.channel_groups()[0].name, "STA01");
    }

    #[test]
    fn test_references_have_no_children() {
        let group = StationGroup::create_version_reference("primary".to_string(), ts(2020, 1, 1));
        assert!(group.stations().is_empty());
        assert_eq!(group.with_entity_reference_children(), group);
    }

    #[test]
    fn test_serde_roundtrip_preserves_presence() {
        let channel = make_test_channel();
        let json = serde_json::to_string(&channel).unwrap();
        let back: Channel = serde_json::from_str(&json).unwrap();
        assert_eq!(back, channel);
    }
}
