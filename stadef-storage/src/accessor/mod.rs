//! Caching accessors.
//!
//! The two tiers stack: a [`RequestCachingAccessor`] wraps an
//! [`EntityCachingAccessor`], which wraps the backing repository. Both
//! implement [`StationDefinitionAccessor`](crate::StationDefinitionAccessor),
//! so either can serve callers directly.

mod entity_caching;
mod request_caching;

pub use entity_caching::EntityCachingAccessor;
pub use request_caching::RequestCachingAccessor;
