//! Error types for l2cache operations

use thiserror::Error;

/// Region and backing-store errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegionError {
    #[error("Region lock poisoned: {region}")]
    LockPoisoned { region: String },

    #[error("Region {region} has been destroyed")]
    Destroyed { region: String },

    #[error("Store operation failed in region {region}: {reason}")]
    StoreFailure { region: String, reason: String },

    #[error("Directory lookup of {name} in namespace {namespace} failed: {reason}")]
    DirectoryLookup {
        namespace: String,
        name: String,
        reason: String,
    },
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

    #[error("Unknown or unsupported concurrency strategy: {name}")]
    UnknownStrategy { name: String },

    #[error("Unknown region factory: {name}")]
    UnknownRegionFactory { name: String },
}

/// Concurrency strategy errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StrategyError {
    /// A write was attempted through a strategy that forbids it. This is a
    /// caller bug and must not be retried.
    #[error("Can't {operation} through {strategy} cache: {key}")]
    UnsupportedOperation {
        strategy: String,
        operation: String,
        key: String,
    },

    #[error("Region {region} does not support version-aware writes")]
    OptimisticUnsupported { region: String },
}

/// Errors raised while turning cached state back into live values.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AssemblyError {
    #[error("No row with the given identifier exists: {entity_name}#{identifier}")]
    UnresolvableObject {
        entity_name: String,
        identifier: String,
    },

    #[error("Value {value} is not a valid {type_name}")]
    TypeMismatch { type_name: String, value: String },
}

/// Master error type for all cache errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Second-level caching is disabled: {reason}")]
    CachingDisabled { reason: String },

    #[error("Region error: {0}")]
    Region(#[from] RegionError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Strategy error: {0}")]
    Strategy(#[from] StrategyError),

    #[error("Assembly error: {0}")]
    Assembly(#[from] AssemblyError),
}

impl CacheError {
    /// True for the read-only write rejection.
    pub fn is_unsupported_operation(&self) -> bool {
        matches!(
            self,
            CacheError::Strategy(StrategyError::UnsupportedOperation { .. })
        )
    }

    /// True when a referenced row could not be resolved during reassembly.
    pub fn is_unresolvable_object(&self) -> bool {
        matches!(
            self,
            CacheError::Assembly(AssemblyError::UnresolvableObject { .. })
        )
    }
}

/// Result type alias for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_region_error_display_destroyed() {
        let err = RegionError::Destroyed {
            region: "widgets".to_string(),
        };
        assert_eq!(format!("{}", err), "Region widgets has been destroyed");
    }

    #[test]
    fn test_unsupported_operation_display() {
        let err = StrategyError::UnsupportedOperation {
            strategy: "read-only".to_string(),
            operation: "update".to_string(),
            key: "Widget#7".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("read-only"));
        assert!(msg.contains("update"));
        assert!(msg.contains("Widget#7"));
    }

    #[test]
    fn test_cache_error_from_conversions() {
        let err: CacheError = RegionError::LockPoisoned {
            region: "r".to_string(),
        }
        .into();
        assert!(matches!(err, CacheError::Region(_)));

        let err: CacheError = ConfigError::UnknownStrategy {
            name: "bogus".to_string(),
        }
        .into();
        assert!(matches!(err, CacheError::Config(_)));
        assert!(format!("{}", err).contains("bogus"));
    }

    #[test]
    fn test_classification_helpers() {
        let unsupported: CacheError = StrategyError::UnsupportedOperation {
            strategy: "read-only".to_string(),
            operation: "lock".to_string(),
            key: "k".to_string(),
        }
        .into();
        assert!(unsupported.is_unsupported_operation());
        assert!(!unsupported.is_unresolvable_object());

        let unresolvable: CacheError = AssemblyError::UnresolvableObject {
            entity_name: "Widget".to_string(),
            identifier: "7".to_string(),
        }
        .into();
        assert!(unresolvable.is_unresolvable_object());
        assert!(!unresolvable.is_unsupported_operation());
    }

    #[test]
    fn test_caching_disabled_display() {
        let err = CacheError::CachingDisabled {
            reason: "no region factory".to_string(),
        };
        assert!(format!("{}", err).contains("disabled"));
    }
}
