//! Identity and time types for station definition entities

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Identifier of an instrument response.
///
/// Station groups, stations, channel groups and channels are identified by
/// name; responses are the only entity keyed by UUID.
pub type ResponseId = Uuid;

/// Generate a new UUIDv7 response identifier (timestamp-sortable).
pub fn new_response_id() -> ResponseId {
    Uuid::now_v7()
}
