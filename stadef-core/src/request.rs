//! Request descriptors
//!
//! Immutable keys for whole-request memoization. Ids are sorted and
//! de-duplicated on construction so that requests naming the same entities in
//! a different order share a cache slot.

use crate::{EntityType, FacetingDefinition, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Time component of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestTime {
    At(Timestamp),
    Range { start: Timestamp, end: Timestamp },
}

/// Normalized request descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Request {
    entity_type: EntityType,
    ids: Vec<String>,
    time: RequestTime,
    faceting: Option<FacetingDefinition>,
}

impl Request {
    fn new<I>(entity_type: EntityType, ids: &[I], time: RequestTime) -> Self
    where
        I: ToString,
    {
        let mut ids: Vec<String> = ids.iter().map(ToString::to_string).collect();
        ids.sort();
        ids.dedup();
        Self {
            entity_type,
            ids,
            time,
            faceting: None,
        }
    }

    /// Point-in-time request.
    pub fn at<I: ToString>(entity_type: EntityType, ids: &[I], effective_at: Timestamp) -> Self {
        Self::new(entity_type, ids, RequestTime::At(effective_at))
    }

    /// Time-range request.
    pub fn range<I: ToString>(
        entity_type: EntityType,
        ids: &[I],
        start: Timestamp,
        end: Timestamp,
    ) -> Self {
        Self::new(entity_type, ids, RequestTime::Range { start, end })
    }

    pub fn with_faceting(mut self, faceting: FacetingDefinition) -> Self {
        self.faceting = Some(faceting);
        self
    }

    pub fn entity_type(&self) -> EntityType {
        self.entity_type
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn time(&self) -> RequestTime {
        self.time
    }

    pub fn faceting(&self) -> Option<&FacetingDefinition> {
        self.faceting.as_ref()
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.entity_type, self.ids.join(","))?;
        match self.time {
            RequestTime::At(t) => write!(f, "@{}", t.to_rfc3339())?,
            RequestTime::Range { start, end } => {
                write!(f, "@[{}..{}]", start.to_rfc3339(), end.to_rfc3339())?
            }
        }
        if self.faceting.is_some() {
            f.write_str("+faceted")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use uuid::Uuid;

    fn ts(day: u32) -> Timestamp {
        Utc.with_ymd_and_hms(2020, 1, day, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_id_order_is_normalized() {
        let a = Request::at(EntityType::Channel, &["B", "A", "A"], ts(1));
        let b = Request::at(EntityType::Channel, &["A", "B"], ts(1));
        assert_eq!(a, b);
        assert_eq!(a.ids(), ["A".to_string(), "B".to_string()]);
    }

    #[test]
    fn test_faceted_and_unfaceted_are_distinct() {
        let plain = Request::at(EntityType::Station, &["STA"], ts(1));
        let faceted = plain
            .clone()
            .with_faceting(FacetingDefinition::populated(EntityType::Station));
        assert_ne!(plain, faceted);
    }

    #[test]
    fn test_entity_type_and_time_distinguish() {
        let channel = Request::at(EntityType::Channel, &["X"], ts(1));
        let group = Request::at(EntityType::ChannelGroup, &["X"], ts(1));
        let later = Request::at(EntityType::Channel, &["X"], ts(2));
        let range = Request::range(EntityType::Channel, &["X"], ts(1), ts(2));
        assert_ne!(channel, group);
        assert_ne!(channel, later);
        assert_ne!(channel, range);
    }

    #[test]
    fn test_uuid_ids() {
        let id = Uuid::now_v7();
        let request = Request::at(EntityType::Response, &[id], ts(1));
        assert_eq!(request.ids(), [id.to_string()]);
        assert!(request.to_string().starts_with("Response["));
    }
}
