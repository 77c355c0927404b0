//! Error types for station definition operations

use crate::{EntityType, Timestamp};
use thiserror::Error;

/// Backing repository errors.
///
/// The caching tiers never translate these; they surface to the caller
/// exactly as the repository produced them.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Entity not found: {entity_type:?} with id {id}")]
    NotFound { entity_type: EntityType, id: String },

    #[error("Store failed for {entity_type:?}: {reason}")]
    StoreFailed { entity_type: EntityType, reason: String },

    #[error("Repository unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

/// Precondition failures raised before any cache or repository access.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    RequiredFieldMissing { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Invalid time range: end {end} is before start {start}")]
    InvalidTimeRange { start: Timestamp, end: Timestamp },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for all station definition errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StadefError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl StadefError {
    /// True for argument preconditions (blank ids, mismatched faceting definitions).
    pub fn is_invalid_argument(&self) -> bool {
        matches!(
            self,
            StadefError::Validation(
                ValidationError::RequiredFieldMissing { .. } | ValidationError::InvalidValue { .. }
            )
        )
    }

    /// True for state preconditions (inverted or empty time ranges).
    pub fn is_invalid_state(&self) -> bool {
        matches!(
            self,
            StadefError::Validation(ValidationError::InvalidTimeRange { .. })
        )
    }
}

/// Result type alias for station definition operations.
pub type StadefResult<T> = Result<T, StadefError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_storage_error_display_not_found() {
        let err = StorageError::NotFound {
            entity_type: EntityType::Channel,
            id: "STA.CH1".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("Entity not found"));
        assert!(msg.contains("STA.CH1"));
    }

    #[test]
    fn test_time_range_error_is_invalid_state() {
        let start = Utc.with_ymd_and_hms(2020, 6, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        let err: StadefError = ValidationError::InvalidTimeRange { start, end }.into();

        assert!(err.is_invalid_state());
        assert!(!err.is_invalid_argument());
        assert!(format!("{}", err).contains("before start"));
    }

    #[test]
    fn test_missing_field_is_invalid_argument() {
        let err: StadefError = ValidationError::RequiredFieldMissing {
            field: "station_names".to_string(),
        }
        .into();

        assert!(err.is_invalid_argument());
        assert!(!err.is_invalid_state());
    }

    #[test]
    fn test_storage_error_is_neither_precondition() {
        let err: StadefError = StorageError::Unavailable {
            reason: "connection reset".to_string(),
        }
        .into();

        assert!(!err.is_invalid_argument());
        assert!(!err.is_invalid_state());
    }
}
