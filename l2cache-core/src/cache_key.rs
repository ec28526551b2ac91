//! Keys for entity and collection regions.
//!
//! Several entity types may share one region, so a key carries the owning
//! role name alongside the identifier. Identifier equality and hashing are
//! delegated to the identifier's [`TypeDescriptor`]: composite identifiers
//! are plain JSON arrays whose structural equality is not always the mapped
//! type's notion of equality.

use serde_json::Value;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::{EntityMode, TypeDescriptor};

/// Identity of one cached entity or collection instance.
#[derive(Clone)]
pub struct CacheKey {
    identifier: Value,
    identifier_type: Arc<dyn TypeDescriptor>,
    role: String,
    entity_mode: EntityMode,
    hash_code: u64,
}

impl CacheKey {
    /// Build a key. The hash code is computed once, here.
    pub fn new(
        identifier: Value,
        identifier_type: Arc<dyn TypeDescriptor>,
        role: impl Into<String>,
        entity_mode: EntityMode,
    ) -> Self {
        let hash_code = identifier_type.hash_value(&identifier);
        Self {
            identifier,
            identifier_type,
            role: role.into(),
            entity_mode,
            hash_code,
        }
    }

    pub fn identifier(&self) -> &Value {
        &self.identifier
    }

    pub fn identifier_type(&self) -> &Arc<dyn TypeDescriptor> {
        &self.identifier_type
    }

    /// Entity name or collection role that owns this key.
    pub fn role(&self) -> &str {
        &self.role
    }

    pub fn entity_mode(&self) -> EntityMode {
        self.entity_mode
    }

    pub fn hash_code(&self) -> u64 {
        self.hash_code
    }
}

impl PartialEq for CacheKey {
    fn eq(&self, other: &Self) -> bool {
        self.role == other.role
            && self.identifier_type.name() == other.identifier_type.name()
            && self
                .identifier_type
                .is_equal(&self.identifier, &other.identifier)
    }
}

impl Eq for CacheKey {}

impl Hash for CacheKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash_code);
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.role, self.identifier)
    }
}

impl fmt::Debug for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheKey")
            .field("role", &self.role)
            .field("identifier", &self.identifier)
            .field("identifier_type", &self.identifier_type.name())
            .field("entity_mode", &self.entity_mode)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BasicType;
    use serde_json::json;
    use std::collections::HashSet;

    fn long_key(id: i64, role: &str) -> CacheKey {
        CacheKey::new(json!(id), Arc::new(BasicType::Long), role, EntityMode::Typed)
    }

    #[test]
    fn test_equal_inputs_equal_keys() {
        let a = long_key(7, "Widget");
        let b = long_key(7, "Widget");
        assert_eq!(a, b);
        assert_eq!(a.hash_code(), b.hash_code());
    }

    #[test]
    fn test_role_breaks_equality() {
        assert_ne!(long_key(7, "Widget"), long_key(7, "Gadget"));
    }

    #[test]
    fn test_identifier_breaks_equality() {
        assert_ne!(long_key(7, "Widget"), long_key(8, "Widget"));
    }

    #[test]
    fn test_type_breaks_equality() {
        let text = CacheKey::new(json!(7), Arc::new(BasicType::Text), "Widget", EntityMode::Typed);
        assert_ne!(long_key(7, "Widget"), text);
    }

    #[test]
    fn test_composite_identifier_uses_type_equality() {
        let id_type: Arc<dyn TypeDescriptor> =
            Arc::new(BasicType::Composite(vec![BasicType::Long, BasicType::Double]));
        let a = CacheKey::new(json!([1, 0.0]), Arc::clone(&id_type), "Line", EntityMode::Typed);
        let b = CacheKey::new(json!([1, -0.0]), id_type, "Line", EntityMode::Typed);
        assert_eq!(a, b);
        assert_eq!(a.hash_code(), b.hash_code());
    }

    #[test]
    fn test_nested_negative_zero_identifier_found_in_set() {
        let id_type: Arc<dyn TypeDescriptor> = Arc::new(BasicType::Json);
        let a = CacheKey::new(json!({"x": 0.0}), Arc::clone(&id_type), "Doc", EntityMode::Typed);
        let b = CacheKey::new(json!({"x": -0.0}), id_type, "Doc", EntityMode::Typed);
        assert_eq!(a, b);
        assert_eq!(a.hash_code(), b.hash_code());

        let mut set = HashSet::new();
        set.insert(a);
        assert!(set.contains(&b));
    }

    #[test]
    fn test_usable_in_hash_set() {
        let mut set = HashSet::new();
        set.insert(long_key(1, "Widget"));
        set.insert(long_key(1, "Widget"));
        set.insert(long_key(2, "Widget"));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_display() {
        assert_eq!(long_key(7, "Widget").to_string(), "Widget#7");
    }
}
