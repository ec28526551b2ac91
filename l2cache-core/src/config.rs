//! Configuration types

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::{CacheError, CacheResult, ConfigError};

/// Default region timeout: the worst-case propagation delay assumed when
/// pre-invalidating table spaces.
pub const DEFAULT_REGION_TIMEOUT_MS: u64 = 60_000;

/// Prefix of directory-service connection properties.
pub const DIRECTORY_PROPERTY_PREFIX: &str = "l2cache.directory.";

// ============================================================================
// ENUMS
// ============================================================================

/// Which region factory backs the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum RegionFactoryKind {
    /// Process-local in-memory regions.
    #[default]
    InMemory,
    /// Caching turned off; building any region fails.
    NoCaching,
    /// Region factory located through an external directory service.
    Directory,
}

impl RegionFactoryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RegionFactoryKind::InMemory => "in-memory",
            RegionFactoryKind::NoCaching => "none",
            RegionFactoryKind::Directory => "directory",
        }
    }
}

impl fmt::Display for RegionFactoryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for RegionFactoryKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "in-memory" | "memory" => Ok(RegionFactoryKind::InMemory),
            "none" | "no-caching" => Ok(RegionFactoryKind::NoCaching),
            "directory" => Ok(RegionFactoryKind::Directory),
            _ => Err(ConfigError::UnknownRegionFactory {
                name: s.to_string(),
            }),
        }
    }
}

/// How the update-timestamps ledger treats a table space it has no record of.
///
/// A missing record means either no write happened since start-up or the
/// entry was lost from the timestamps region. `AssumeFresh` trusts cached
/// results in both cases; `AssumeStale` treats them as misses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum UnknownSpacePolicy {
    #[default]
    AssumeFresh,
    AssumeStale,
}

impl UnknownSpacePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnknownSpacePolicy::AssumeFresh => "assume-fresh",
            UnknownSpacePolicy::AssumeStale => "assume-stale",
        }
    }
}

impl fmt::Display for UnknownSpacePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for UnknownSpacePolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "assume-fresh" | "fresh" => Ok(UnknownSpacePolicy::AssumeFresh),
            "assume-stale" | "stale" => Ok(UnknownSpacePolicy::AssumeStale),
            _ => Err(ConfigError::InvalidValue {
                field: "unknown_space_policy".to_string(),
                value: s.to_string(),
                reason: "expected assume-fresh or assume-stale".to_string(),
            }),
        }
    }
}

/// Concurrency strategy selected for an entity or collection region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConcurrencyStrategyKind {
    ReadOnly,
    NonstrictReadWrite,
    /// Version-aware writes through an optimistic region.
    Optimistic,
    /// Recognised so configuration can name it; not provided by this crate.
    ReadWrite,
    /// Recognised so configuration can name it; not provided by this crate.
    Transactional,
}

impl ConcurrencyStrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConcurrencyStrategyKind::ReadOnly => "read-only",
            ConcurrencyStrategyKind::NonstrictReadWrite => "nonstrict-read-write",
            ConcurrencyStrategyKind::Optimistic => "optimistic",
            ConcurrencyStrategyKind::ReadWrite => "read-write",
            ConcurrencyStrategyKind::Transactional => "transactional",
        }
    }

    /// Whether this crate can build the strategy.
    pub fn is_supported(&self) -> bool {
        matches!(
            self,
            ConcurrencyStrategyKind::ReadOnly
                | ConcurrencyStrategyKind::NonstrictReadWrite
                | ConcurrencyStrategyKind::Optimistic
        )
    }
}

impl fmt::Display for ConcurrencyStrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ConcurrencyStrategyKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "read-only" => Ok(ConcurrencyStrategyKind::ReadOnly),
            "nonstrict-read-write" => Ok(ConcurrencyStrategyKind::NonstrictReadWrite),
            "optimistic" => Ok(ConcurrencyStrategyKind::Optimistic),
            "read-write" => Ok(ConcurrencyStrategyKind::ReadWrite),
            "transactional" => Ok(ConcurrencyStrategyKind::Transactional),
            _ => Err(ConfigError::UnknownStrategy {
                name: s.to_string(),
            }),
        }
    }
}

// ============================================================================
// SETTINGS
// ============================================================================

/// Where to find an externally managed region factory.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DirectorySettings {
    /// Namespace the factory is bound under.
    pub namespace: String,
    /// Connection properties passed through to the directory service.
    pub properties: HashMap<String, String>,
}

/// Second-level cache settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheSettings {
    pub use_second_level_cache: bool,
    pub use_query_cache: bool,
    /// `None` defers to the region factory's default.
    pub use_minimal_puts: Option<bool>,
    pub region_prefix: Option<String>,
    pub region_factory: RegionFactoryKind,
    pub default_timeout: Duration,
    pub unknown_space_policy: UnknownSpacePolicy,
    pub directory: Option<DirectorySettings>,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            use_second_level_cache: true,
            use_query_cache: false,
            use_minimal_puts: None,
            region_prefix: None,
            region_factory: RegionFactoryKind::InMemory,
            default_timeout: Duration::from_millis(DEFAULT_REGION_TIMEOUT_MS),
            unknown_space_policy: UnknownSpacePolicy::AssumeFresh,
            directory: None,
        }
    }
}

impl CacheSettings {
    /// Create settings with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable or disable the query cache.
    pub fn with_query_cache(mut self, enabled: bool) -> Self {
        self.use_query_cache = enabled;
        self
    }

    /// Set the region name prefix.
    pub fn with_region_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.region_prefix = Some(prefix.into());
        self
    }

    /// Set the region factory.
    pub fn with_region_factory(mut self, kind: RegionFactoryKind) -> Self {
        self.region_factory = kind;
        self
    }

    /// Set the region timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Force minimal puts on or off.
    pub fn with_minimal_puts(mut self, enabled: bool) -> Self {
        self.use_minimal_puts = Some(enabled);
        self
    }

    /// Set the unknown table space policy.
    pub fn with_unknown_space_policy(mut self, policy: UnknownSpacePolicy) -> Self {
        self.unknown_space_policy = policy;
        self
    }

    /// Locate the region factory through a directory service.
    pub fn with_directory(mut self, directory: DirectorySettings) -> Self {
        self.region_factory = RegionFactoryKind::Directory;
        self.directory = Some(directory);
        self
    }

    /// Apply the region prefix to a region name.
    pub fn qualify_region_name(&self, name: &str) -> String {
        match &self.region_prefix {
            Some(prefix) => format!("{}.{}", prefix, name),
            None => name.to_string(),
        }
    }

    /// Create settings from environment variables with fallback to defaults.
    ///
    /// Environment variables:
    /// - `L2CACHE_USE_SECOND_LEVEL_CACHE`: enable entity/collection caching (default: true)
    /// - `L2CACHE_USE_QUERY_CACHE`: enable the query cache (default: false)
    /// - `L2CACHE_USE_MINIMAL_PUTS`: force minimal puts (default: region factory's choice)
    /// - `L2CACHE_REGION_PREFIX`: prefix for region names (default: none)
    /// - `L2CACHE_REGION_FACTORY`: `in-memory`, `none` or `directory` (default: in-memory)
    /// - `L2CACHE_DEFAULT_TIMEOUT_MS`: region timeout in milliseconds (default: 60000)
    /// - `L2CACHE_UNKNOWN_SPACE_POLICY`: `assume-fresh` or `assume-stale` (default: assume-fresh)
    /// - `L2CACHE_DIRECTORY_NAMESPACE`: namespace for directory lookup (default: none)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let flag = |name: &str, default: bool| {
            std::env::var(name)
                .ok()
                .map(|s| s.to_lowercase() != "false")
                .unwrap_or(default)
        };

        let directory = std::env::var("L2CACHE_DIRECTORY_NAMESPACE")
            .ok()
            .filter(|s| !s.is_empty())
            .map(|namespace| DirectorySettings {
                namespace,
                properties: HashMap::new(),
            });

        Self {
            use_second_level_cache: flag(
                "L2CACHE_USE_SECOND_LEVEL_CACHE",
                defaults.use_second_level_cache,
            ),
            use_query_cache: flag("L2CACHE_USE_QUERY_CACHE", defaults.use_query_cache),
            use_minimal_puts: std::env::var("L2CACHE_USE_MINIMAL_PUTS")
                .ok()
                .map(|s| s.to_lowercase() != "false"),
            region_prefix: std::env::var("L2CACHE_REGION_PREFIX")
                .ok()
                .filter(|s| !s.is_empty()),
            region_factory: std::env::var("L2CACHE_REGION_FACTORY")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.region_factory),
            default_timeout: std::env::var("L2CACHE_DEFAULT_TIMEOUT_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.default_timeout),
            unknown_space_policy: std::env::var("L2CACHE_UNKNOWN_SPACE_POLICY")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.unknown_space_policy),
            directory,
        }
    }

    /// Parse settings from a property map (`l2cache.*` keys).
    ///
    /// Unlike [`CacheSettings::from_env`], malformed values are reported
    /// rather than replaced by defaults. Keys under `l2cache.directory.`
    /// other than `namespace` become directory connection properties.
    pub fn from_properties(properties: &HashMap<String, String>) -> CacheResult<Self> {
        let mut settings = Self::default();

        if let Some(value) = properties.get("l2cache.use_second_level_cache") {
            settings.use_second_level_cache = parse_bool("use_second_level_cache", value)?;
        }
        if let Some(value) = properties.get("l2cache.use_query_cache") {
            settings.use_query_cache = parse_bool("use_query_cache", value)?;
        }
        if let Some(value) = properties.get("l2cache.use_minimal_puts") {
            settings.use_minimal_puts = Some(parse_bool("use_minimal_puts", value)?);
        }
        if let Some(value) = properties.get("l2cache.region_prefix") {
            settings.region_prefix = Some(value.clone());
        }
        if let Some(value) = properties.get("l2cache.region_factory") {
            settings.region_factory = value.parse()?;
        }
        if let Some(value) = properties.get("l2cache.default_timeout_ms") {
            let millis: u64 = value.trim().parse().map_err(|_| ConfigError::InvalidValue {
                field: "default_timeout_ms".to_string(),
                value: value.clone(),
                reason: "expected a whole number of milliseconds".to_string(),
            })?;
            settings.default_timeout = Duration::from_millis(millis);
        }
        if let Some(value) = properties.get("l2cache.unknown_space_policy") {
            settings.unknown_space_policy = value.parse()?;
        }

        let mut connection = HashMap::new();
        let mut namespace = None;
        for (key, value) in properties {
            if let Some(name) = key.strip_prefix(DIRECTORY_PROPERTY_PREFIX) {
                if name == "namespace" {
                    namespace = Some(value.clone());
                } else {
                    connection.insert(name.to_string(), value.clone());
                }
            }
        }
        if let Some(namespace) = namespace {
            settings.directory = Some(DirectorySettings {
                namespace,
                properties: connection,
            });
        }

        Ok(settings)
    }

    /// Validate the settings.
    /// Returns Ok(()) if valid, Err(CacheError::Config) if invalid.
    ///
    /// Validates:
    /// - default_timeout is positive
    /// - region_prefix, when present, is not blank
    /// - the directory factory has a non-empty namespace
    /// - the query cache is not combined with the no-caching factory
    pub fn validate(&self) -> CacheResult<()> {
        if self.default_timeout.is_zero() {
            return Err(CacheError::Config(ConfigError::InvalidValue {
                field: "default_timeout".to_string(),
                value: format!("{:?}", self.default_timeout),
                reason: "default_timeout must be positive".to_string(),
            }));
        }

        if let Some(prefix) = &self.region_prefix {
            if prefix.trim().is_empty() {
                return Err(CacheError::Config(ConfigError::InvalidValue {
                    field: "region_prefix".to_string(),
                    value: prefix.clone(),
                    reason: "region_prefix must not be blank".to_string(),
                }));
            }
        }

        if self.region_factory == RegionFactoryKind::Directory {
            match &self.directory {
                None => {
                    return Err(CacheError::Config(ConfigError::MissingRequired {
                        field: "directory.namespace".to_string(),
                    }))
                }
                Some(directory) if directory.namespace.trim().is_empty() => {
                    return Err(CacheError::Config(ConfigError::InvalidValue {
                        field: "directory.namespace".to_string(),
                        value: directory.namespace.clone(),
                        reason: "namespace must not be blank".to_string(),
                    }))
                }
                Some(_) => {}
            }
        }

        if self.use_query_cache && self.region_factory == RegionFactoryKind::NoCaching {
            return Err(CacheError::Config(ConfigError::InvalidValue {
                field: "use_query_cache".to_string(),
                value: "true".to_string(),
                reason: "the query cache needs a region factory other than none".to_string(),
            }));
        }

        Ok(())
    }
}

fn parse_bool(field: &str, value: &str) -> CacheResult<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "yes" | "1" => Ok(true),
        "false" | "no" | "0" => Ok(false),
        _ => Err(CacheError::Config(ConfigError::InvalidValue {
            field: field.to_string(),
            value: value.to_string(),
            reason: "expected true or false".to_string(),
        })),
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn props(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults_are_valid() {
        let settings = CacheSettings::default();
        assert!(settings.validate().is_ok());
        assert!(settings.use_second_level_cache);
        assert!(!settings.use_query_cache);
        assert_eq!(settings.unknown_space_policy, UnknownSpacePolicy::AssumeFresh);
    }

    #[test]
    fn test_from_properties() {
        let settings = CacheSettings::from_properties(&props(&[
            ("l2cache.use_query_cache", "true"),
            ("l2cache.use_minimal_puts", "false"),
            ("l2cache.region_prefix", "app"),
            ("l2cache.default_timeout_ms", "1500"),
            ("l2cache.unknown_space_policy", "assume-stale"),
        ]))
        .unwrap();

        assert!(settings.use_query_cache);
        assert_eq!(settings.use_minimal_puts, Some(false));
        assert_eq!(settings.region_prefix.as_deref(), Some("app"));
        assert_eq!(settings.default_timeout, Duration::from_millis(1500));
        assert_eq!(settings.unknown_space_policy, UnknownSpacePolicy::AssumeStale);
    }

    #[test]
    fn test_from_properties_directory() {
        let settings = CacheSettings::from_properties(&props(&[
            ("l2cache.region_factory", "directory"),
            ("l2cache.directory.namespace", "java:/cache/shared"),
            ("l2cache.directory.provider_url", "ldap://dir:389"),
        ]))
        .unwrap();

        let directory = settings.directory.as_ref().unwrap();
        assert_eq!(directory.namespace, "java:/cache/shared");
        assert_eq!(
            directory.properties.get("provider_url").map(String::as_str),
            Some("ldap://dir:389")
        );
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_from_properties_rejects_bad_bool() {
        let err = CacheSettings::from_properties(&props(&[("l2cache.use_query_cache", "maybe")]))
            .unwrap_err();
        assert!(matches!(
            err,
            CacheError::Config(ConfigError::InvalidValue { ref field, .. }) if field == "use_query_cache"
        ));
    }

    #[test]
    fn test_from_properties_rejects_unknown_factory() {
        let err = CacheSettings::from_properties(&props(&[("l2cache.region_factory", "redis")]))
            .unwrap_err();
        assert!(matches!(
            err,
            CacheError::Config(ConfigError::UnknownRegionFactory { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let settings = CacheSettings::default().with_timeout(Duration::ZERO);
        assert!(matches!(
            settings.validate(),
            Err(CacheError::Config(ConfigError::InvalidValue { ref field, .. })) if field == "default_timeout"
        ));
    }

    #[test]
    fn test_validate_directory_requires_namespace() {
        let settings = CacheSettings::default().with_region_factory(RegionFactoryKind::Directory);
        assert!(matches!(
            settings.validate(),
            Err(CacheError::Config(ConfigError::MissingRequired { .. }))
        ));
    }

    #[test]
    fn test_validate_query_cache_without_caching() {
        let settings = CacheSettings::default()
            .with_region_factory(RegionFactoryKind::NoCaching)
            .with_query_cache(true);
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_qualify_region_name() {
        let plain = CacheSettings::default();
        assert_eq!(plain.qualify_region_name("Widget"), "Widget");
        let prefixed = plain.with_region_prefix("app");
        assert_eq!(prefixed.qualify_region_name("Widget"), "app.Widget");
    }

    #[test]
    fn test_strategy_kind_parsing() {
        assert_eq!(
            "read-only".parse::<ConcurrencyStrategyKind>().unwrap(),
            ConcurrencyStrategyKind::ReadOnly
        );
        assert_eq!(
            "nonstrict-read-write".parse::<ConcurrencyStrategyKind>().unwrap(),
            ConcurrencyStrategyKind::NonstrictReadWrite
        );
        let rw = "read-write".parse::<ConcurrencyStrategyKind>().unwrap();
        assert!(!rw.is_supported());
        assert!("write-behind".parse::<ConcurrencyStrategyKind>().is_err());
        assert_eq!(ConcurrencyStrategyKind::ReadOnly.to_string(), "read-only");
    }
}
