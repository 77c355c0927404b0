//! Version cache keys.
//!
//! A key pairs an entity type with the entity's identifier. Hashing and
//! equality use both fields separately, so `Channel` + `GroupA` and
//! `ChannelGroup` + `A` never collide even though their display forms do.

use stadef_core::{EntityType, VersionedEntity};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VersionKey {
    entity_type: EntityType,
    entity_id: String,
}

impl VersionKey {
    pub fn new(entity_type: EntityType, entity_id: impl Into<String>) -> Self {
        Self {
            entity_type,
            entity_id: entity_id.into(),
        }
    }

    /// Key for the entity of type `T` identified by `id`.
    pub fn of<T: VersionedEntity>(id: &T::Id) -> Self {
        Self::new(T::ENTITY_TYPE, id.to_string())
    }

    /// Key for `entity`'s own id.
    pub fn for_entity<T: VersionedEntity>(entity: &T) -> Self {
        Self::of::<T>(entity.id())
    }

    pub fn entity_type(&self) -> EntityType {
        self.entity_type
    }

    pub fn entity_id(&self) -> &str {
        &self.entity_id
    }
}

/// `TypeName` followed by the entity identifier, e.g. `ChannelSTA.CH1`.
impl fmt::Display for VersionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.entity_type.type_name(), self.entity_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stadef_core::{Channel, Response};
    use std::collections::HashSet;
    use uuid::Uuid;

    #[test]
    fn test_display_format() {
        let key = VersionKey::of::<Channel>(&"STA.CH1".to_string());
        assert_eq!(key.to_string(), "ChannelSTA.CH1");
        assert_eq!(key.entity_type(), EntityType::Channel);
        assert_eq!(key.entity_id(), "STA.CH1");

        let id = Uuid::now_v7();
        let key = VersionKey::of::<Response>(&id);
        assert_eq!(key.to_string(), format!("Response{}", id));
    }

    #[test]
    fn test_ambiguous_display_does_not_collide() {
        let channel = VersionKey::new(EntityType::Channel, "GroupA");
        let group = VersionKey::new(EntityType::ChannelGroup, "A");
        assert_eq!(channel.to_string(), group.to_string());
        assert_ne!(channel, group);

        let set: HashSet<_> = [channel, group].into_iter().collect();
        assert_eq!(set.len(), 2);
    }
}
