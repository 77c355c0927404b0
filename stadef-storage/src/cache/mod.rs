//! Cache tiers for station definition lookups.
//!
//! Two caches sit in front of the backing repository:
//!
//! - The [`VersionCache`] holds, per entity, a [`RangeMap`](crate::range::RangeMap)
//!   of validity ranges to versions whose children are entity references.
//!   Point and range lookups consult it and only fetch the uncovered parts.
//! - The [`RequestCache`] memoizes whole requests by their normalized
//!   descriptor, in one homogeneously typed slot per result type.

pub mod request_cache;
pub mod traits;
pub mod version_cache;
pub mod version_key;

pub use request_cache::{CachedResult, RequestCache};
pub use traits::{CacheStats, CacheableEntity, CachedEntity, VersionCache};
pub use version_cache::InMemoryVersionCache;
pub use version_key::VersionKey;
