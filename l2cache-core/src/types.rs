//! Type descriptors and the session-side collaborators the cache consumes.
//!
//! The cache never interprets entity state itself. Identifier hashing and
//! equality, and the conversion between live values and their storage-neutral
//! ("disassembled") form, are delegated to a [`TypeDescriptor`]. Resolving
//! references back to live rows goes through a [`SessionContext`].

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::identity::{combine_hash, stable_hash};
use crate::{AssemblyError, CacheResult, Timestamp};

// ============================================================================
// SESSION CONTEXT
// ============================================================================

/// The persistence session as seen by the cache.
pub trait SessionContext {
    /// Timestamp taken when the session's current transaction started.
    fn timestamp(&self) -> Timestamp;

    /// Extract the identifier of a live entity.
    fn identifier_of(&self, entity_name: &str, entity: &Value) -> CacheResult<Value>;

    /// Load an entity by identifier. `None` means the row no longer exists.
    fn resolve(&self, entity_name: &str, identifier: &Value) -> CacheResult<Option<Value>>;
}

// ============================================================================
// TYPE DESCRIPTOR
// ============================================================================

/// Describes how values of one mapped type are compared, hashed and
/// converted to and from their cached form.
pub trait TypeDescriptor: fmt::Debug + Send + Sync {
    /// Human readable type name, used in diagnostics.
    fn name(&self) -> String;

    /// Semantic equality of two values of this type.
    fn is_equal(&self, x: &Value, y: &Value) -> bool;

    /// Hash consistent with [`TypeDescriptor::is_equal`].
    fn hash_value(&self, value: &Value) -> u64;

    /// Convert a live value into its storage-neutral form.
    fn disassemble(&self, value: &Value, session: &dyn SessionContext) -> CacheResult<Value>;

    /// Rebuild a live value from its storage-neutral form.
    fn assemble(&self, cached: &Value, session: &dyn SessionContext) -> CacheResult<Value>;
}

/// Built-in type descriptors covering scalar, JSON, entity-reference and
/// composite values.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BasicType {
    Long,
    Double,
    Boolean,
    Text,
    /// Arbitrary JSON compared structurally.
    Json,
    /// Reference to a mapped entity; cached as its identifier.
    Entity { entity_name: String },
    /// Ordered tuple of component values (composite identifiers, multi-column rows).
    Composite(Vec<BasicType>),
}

impl BasicType {
    /// Shorthand for an entity reference type.
    pub fn entity(entity_name: impl Into<String>) -> Self {
        BasicType::Entity {
            entity_name: entity_name.into(),
        }
    }

    fn mismatch(&self, value: &Value) -> AssemblyError {
        AssemblyError::TypeMismatch {
            type_name: self.name(),
            value: value.to_string(),
        }
    }

    fn check_scalar(&self, value: &Value) -> CacheResult<()> {
        let ok = match self {
            _ if value.is_null() => true,
            BasicType::Long => value.as_i64().is_some(),
            BasicType::Double => value.is_number(),
            BasicType::Boolean => value.is_boolean(),
            BasicType::Text => value.is_string(),
            _ => true,
        };
        if ok {
            Ok(())
        } else {
            Err(self.mismatch(value).into())
        }
    }

    fn components<'a>(&self, value: &'a Value, arity: usize) -> CacheResult<&'a Vec<Value>> {
        match value.as_array() {
            Some(items) if items.len() == arity => Ok(items),
            _ => Err(self.mismatch(value).into()),
        }
    }
}

impl TypeDescriptor for BasicType {
    fn name(&self) -> String {
        match self {
            BasicType::Long => "long".to_string(),
            BasicType::Double => "double".to_string(),
            BasicType::Boolean => "boolean".to_string(),
            BasicType::Text => "text".to_string(),
            BasicType::Json => "json".to_string(),
            BasicType::Entity { entity_name } => format!("entity({})", entity_name),
            BasicType::Composite(parts) => {
                let names: Vec<String> = parts.iter().map(|p| p.name()).collect();
                format!("composite({})", names.join(","))
            }
        }
    }

    fn is_equal(&self, x: &Value, y: &Value) -> bool {
        match self {
            BasicType::Long => match (x.as_i64(), y.as_i64()) {
                (Some(a), Some(b)) => a == b,
                _ => x == y,
            },
            BasicType::Double => match (x.as_f64(), y.as_f64()) {
                (Some(a), Some(b)) => a == b || (a.is_nan() && b.is_nan()),
                _ => x == y,
            },
            BasicType::Composite(parts) => match (x.as_array(), y.as_array()) {
                (Some(xs), Some(ys)) if xs.len() == parts.len() && ys.len() == parts.len() => parts
                    .iter()
                    .zip(xs.iter().zip(ys.iter()))
                    .all(|(part, (a, b))| part.is_equal(a, b)),
                _ => x == y,
            },
            _ => x == y,
        }
    }

    fn hash_value(&self, value: &Value) -> u64 {
        match self {
            BasicType::Long => match value.as_i64() {
                Some(n) => stable_hash(&n.to_be_bytes()),
                None => json_hash(value),
            },
            BasicType::Double => match value.as_f64() {
                // -0.0 == 0.0, so both must hash alike
                Some(f) if f == 0.0 => stable_hash(&0.0f64.to_bits().to_be_bytes()),
                Some(f) if f.is_nan() => stable_hash(&f64::NAN.to_bits().to_be_bytes()),
                Some(f) => stable_hash(&f.to_bits().to_be_bytes()),
                None => json_hash(value),
            },
            BasicType::Text => match value.as_str() {
                Some(s) => stable_hash(s.as_bytes()),
                None => json_hash(value),
            },
            BasicType::Composite(parts) => match value.as_array() {
                Some(items) if items.len() == parts.len() => parts
                    .iter()
                    .zip(items.iter())
                    .fold(17u64, |acc, (part, item)| {
                        combine_hash(acc, part.hash_value(item))
                    }),
                _ => json_hash(value),
            },
            _ => json_hash(value),
        }
    }

    fn disassemble(&self, value: &Value, session: &dyn SessionContext) -> CacheResult<Value> {
        match self {
            BasicType::Entity { entity_name } => {
                if value.is_null() {
                    Ok(Value::Null)
                } else {
                    session.identifier_of(entity_name, value)
                }
            }
            BasicType::Composite(parts) => {
                let items = self.components(value, parts.len())?;
                let cached = parts
                    .iter()
                    .zip(items.iter())
                    .map(|(part, item)| part.disassemble(item, session))
                    .collect::<CacheResult<Vec<Value>>>()?;
                Ok(Value::Array(cached))
            }
            _ => {
                self.check_scalar(value)?;
                Ok(value.clone())
            }
        }
    }

    fn assemble(&self, cached: &Value, session: &dyn SessionContext) -> CacheResult<Value> {
        match self {
            BasicType::Entity { entity_name } => {
                if cached.is_null() {
                    return Ok(Value::Null);
                }
                session.resolve(entity_name, cached)?.ok_or_else(|| {
                    AssemblyError::UnresolvableObject {
                        entity_name: entity_name.clone(),
                        identifier: cached.to_string(),
                    }
                    .into()
                })
            }
            BasicType::Composite(parts) => {
                let items = self.components(cached, parts.len())?;
                let live = parts
                    .iter()
                    .zip(items.iter())
                    .map(|(part, item)| part.assemble(item, session))
                    .collect::<CacheResult<Vec<Value>>>()?;
                Ok(Value::Array(live))
            }
            _ => {
                self.check_scalar(cached)?;
                Ok(cached.clone())
            }
        }
    }
}

/// Hash of a JSON value consistent with `Value` equality, under which
/// `0.0` and `-0.0` are the same number.
fn json_hash(value: &Value) -> u64 {
    stable_hash(without_negative_zero(value).to_string().as_bytes())
}

fn without_negative_zero(value: &Value) -> Value {
    match value {
        Value::Number(n) if n.is_f64() && n.as_f64() == Some(0.0) => Value::from(0.0f64),
        Value::Array(items) => Value::Array(items.iter().map(without_negative_zero).collect()),
        Value::Object(fields) => Value::Object(
            fields
                .iter()
                .map(|(name, field)| (name.clone(), without_negative_zero(field)))
                .collect(),
        ),
        other => other.clone(),
    }
}

// ============================================================================
// ENTITY MODE
// ============================================================================

/// Representation the session uses for entity state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum EntityMode {
    /// Statically typed domain objects.
    #[default]
    Typed,
    /// Dynamic name/value maps.
    Map,
}

impl EntityMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityMode::Typed => "typed",
            EntityMode::Map => "map",
        }
    }
}

impl fmt::Display for EntityMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for EntityMode {
    type Err = AssemblyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "typed" => Ok(EntityMode::Typed),
            "map" => Ok(EntityMode::Map),
            _ => Err(AssemblyError::TypeMismatch {
                type_name: "entity-mode".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

// ============================================================================
// CACHE DATA DESCRIPTION
// ============================================================================

/// Orders two version values of a versioned entity.
pub trait VersionComparator: fmt::Debug + Send + Sync {
    fn compare(&self, a: &Value, b: &Value) -> Ordering;
}

/// Compares integer (or floating point) version numbers. Values that are not
/// numbers sort before every number and compare textually among themselves.
#[derive(Debug, Clone, Copy, Default)]
pub struct NumericVersionComparator;

impl VersionComparator for NumericVersionComparator {
    fn compare(&self, a: &Value, b: &Value) -> Ordering {
        match (a.as_i64(), b.as_i64()) {
            (Some(x), Some(y)) => x.cmp(&y),
            _ => match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
                (Some(_), None) => Ordering::Greater,
                (None, Some(_)) => Ordering::Less,
                (None, None) => a.to_string().cmp(&b.to_string()),
            },
        }
    }
}

/// Describes the data cached in a transactional region.
#[derive(Debug, Clone, Default)]
pub struct CacheDataDescription {
    mutable: bool,
    versioned: bool,
    version_comparator: Option<Arc<dyn VersionComparator>>,
}

impl CacheDataDescription {
    /// Data that never changes once written.
    pub fn immutable() -> Self {
        Self {
            mutable: false,
            versioned: false,
            version_comparator: None,
        }
    }

    /// Mutable, unversioned data.
    pub fn mutable() -> Self {
        Self {
            mutable: true,
            versioned: false,
            version_comparator: None,
        }
    }

    /// Mutable data carrying a version ordered by `comparator`.
    pub fn versioned(comparator: Arc<dyn VersionComparator>) -> Self {
        Self {
            mutable: true,
            versioned: true,
            version_comparator: Some(comparator),
        }
    }

    pub fn is_mutable(&self) -> bool {
        self.mutable
    }

    pub fn is_versioned(&self) -> bool {
        self.versioned
    }

    pub fn version_comparator(&self) -> Option<&Arc<dyn VersionComparator>> {
        self.version_comparator.as_ref()
    }
}
