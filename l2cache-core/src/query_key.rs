//! Keys for the query results region.
//!
//! A [`QueryKey`] captures everything that determines a query's result set:
//! the query text, the disassembled parameter values with their types, the
//! row window, the enabled filters and the result transformer.
//!
//! # Hash lifecycle
//!
//! The hash code is computed right after construction. It is not serialized:
//! a deserialized key starts with no hash and recomputes it on first use,
//! because the hash of nested parameter values must not depend on anything
//! that does not survive the trip through the backing store.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::OnceLock;

use crate::identity::{combine_hash, stable_hash};
use crate::{BasicType, CacheResult, EntityMode, SessionContext, TypeDescriptor};

// ============================================================================
// TYPED VALUE
// ============================================================================

/// A parameter value paired with the type that compares and hashes it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypedValue {
    value_type: BasicType,
    value: Value,
}

impl TypedValue {
    pub fn new(value_type: BasicType, value: Value) -> Self {
        Self { value_type, value }
    }

    pub fn value_type(&self) -> &BasicType {
        &self.value_type
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    fn hash_code(&self) -> u64 {
        self.value_type.hash_value(&self.value)
    }
}

impl PartialEq for TypedValue {
    fn eq(&self, other: &Self) -> bool {
        self.value_type == other.value_type && self.value_type.is_equal(&self.value, &other.value)
    }
}

impl Eq for TypedValue {}

impl fmt::Display for TypedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value)
    }
}

// ============================================================================
// ROW SELECTION & FILTERS
// ============================================================================

/// First-row / max-rows window applied to a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct RowSelection {
    pub first_row: Option<u32>,
    pub max_rows: Option<u32>,
}

impl RowSelection {
    pub fn new(first_row: Option<u32>, max_rows: Option<u32>) -> Self {
        Self {
            first_row,
            max_rows,
        }
    }

    fn hash_code(&self) -> u64 {
        let first = self.first_row.map(i64::from).unwrap_or(-1);
        let max = self.max_rows.map(i64::from).unwrap_or(-1);
        combine_hash(
            stable_hash(&first.to_be_bytes()),
            stable_hash(&max.to_be_bytes()),
        )
    }
}

/// An enabled session filter and its parameter values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterKey {
    filter_name: String,
    parameters: BTreeMap<String, TypedValue>,
}

impl FilterKey {
    pub fn new(filter_name: impl Into<String>) -> Self {
        Self {
            filter_name: filter_name.into(),
            parameters: BTreeMap::new(),
        }
    }

    /// Add a filter parameter value.
    pub fn with_parameter(mut self, name: impl Into<String>, value: TypedValue) -> Self {
        self.parameters.insert(name.into(), value);
        self
    }

    pub fn filter_name(&self) -> &str {
        &self.filter_name
    }

    pub fn parameters(&self) -> &BTreeMap<String, TypedValue> {
        &self.parameters
    }

    fn hash_code(&self) -> u64 {
        hash_named(stable_hash(self.filter_name.as_bytes()), &self.parameters)
    }
}

impl fmt::Display for FilterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FilterKey[{}{{", self.filter_name)?;
        for (i, (name, value)) in self.parameters.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}={}", name, value)?;
        }
        write!(f, "}}]")
    }
}

fn hash_named(seed: u64, values: &BTreeMap<String, TypedValue>) -> u64 {
    values.iter().fold(seed, |acc, (name, value)| {
        combine_hash(combine_hash(acc, stable_hash(name.as_bytes())), value.hash_code())
    })
}

// ============================================================================
// QUERY PARAMETERS
// ============================================================================

/// Live parameter values for one query execution.
#[derive(Debug, Clone, Default)]
pub struct QueryParameters {
    positional: Vec<(BasicType, Value)>,
    named: BTreeMap<String, TypedValue>,
    row_selection: Option<RowSelection>,
    result_transformer: Option<String>,
}

impl QueryParameters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a positional parameter.
    pub fn with_positional(mut self, value_type: BasicType, value: Value) -> Self {
        self.positional.push((value_type, value));
        self
    }

    /// Bind a named parameter.
    pub fn with_named(
        mut self,
        name: impl Into<String>,
        value_type: BasicType,
        value: Value,
    ) -> Self {
        self.named
            .insert(name.into(), TypedValue::new(value_type, value));
        self
    }

    /// Set the row window.
    pub fn with_row_selection(mut self, selection: RowSelection) -> Self {
        self.row_selection = Some(selection);
        self
    }

    /// Name the custom result transformer applied to rows.
    pub fn with_result_transformer(mut self, transformer: impl Into<String>) -> Self {
        self.result_transformer = Some(transformer.into());
        self
    }
}

// ============================================================================
// QUERY KEY
// ============================================================================

/// Identity of one query execution in the query results region.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryKey {
    query_string: String,
    positional_types: Vec<BasicType>,
    positional_values: Vec<Value>,
    named_parameters: BTreeMap<String, TypedValue>,
    row_selection: Option<RowSelection>,
    filter_keys: Vec<FilterKey>,
    entity_mode: EntityMode,
    result_transformer: Option<String>,
    #[serde(skip)]
    hash_code: OnceLock<u64>,
}

impl QueryKey {
    /// Build a key for `query_string` executed with `parameters`.
    ///
    /// Positional values are disassembled through their types so that entity
    /// parameters are keyed by identifier. Filters are ordered by name.
    pub fn generate(
        query_string: impl Into<String>,
        parameters: &QueryParameters,
        filters: &[FilterKey],
        entity_mode: EntityMode,
        session: &dyn SessionContext,
    ) -> CacheResult<Self> {
        let mut positional_types = Vec::with_capacity(parameters.positional.len());
        let mut positional_values = Vec::with_capacity(parameters.positional.len());
        for (value_type, value) in &parameters.positional {
            positional_values.push(value_type.disassemble(value, session)?);
            positional_types.push(value_type.clone());
        }

        let mut named_parameters = BTreeMap::new();
        for (name, typed) in &parameters.named {
            let cached = typed.value_type.disassemble(&typed.value, session)?;
            named_parameters.insert(name.clone(), TypedValue::new(typed.value_type.clone(), cached));
        }

        let mut filter_keys = filters.to_vec();
        filter_keys.sort_by(|a, b| a.filter_name.cmp(&b.filter_name));

        let key = Self {
            query_string: query_string.into(),
            positional_types,
            positional_values,
            named_parameters,
            row_selection: parameters.row_selection,
            filter_keys,
            entity_mode,
            result_transformer: parameters.result_transformer.clone(),
            hash_code: OnceLock::new(),
        };
        let _ = key.hash_code.set(key.compute_hash_code());
        Ok(key)
    }

    pub fn query_string(&self) -> &str {
        &self.query_string
    }

    pub fn positional_values(&self) -> &[Value] {
        &self.positional_values
    }

    pub fn named_parameters(&self) -> &BTreeMap<String, TypedValue> {
        &self.named_parameters
    }

    pub fn row_selection(&self) -> Option<RowSelection> {
        self.row_selection
    }

    pub fn filter_keys(&self) -> &[FilterKey] {
        &self.filter_keys
    }

    pub fn entity_mode(&self) -> EntityMode {
        self.entity_mode
    }

    pub fn result_transformer(&self) -> Option<&str> {
        self.result_transformer.as_deref()
    }

    /// Memoized hash code, recomputed on first use after deserialization.
    pub fn hash_code(&self) -> u64 {
        *self.hash_code.get_or_init(|| self.compute_hash_code())
    }

    /// True when the hash has not been computed since deserialization.
    pub fn needs_rehash(&self) -> bool {
        self.hash_code.get().is_none()
    }

    fn compute_hash_code(&self) -> u64 {
        let mut result = 13u64;
        result = combine_hash(
            result,
            self.row_selection
                .map(|s| s.hash_code())
                .unwrap_or_default(),
        );
        for (value_type, value) in self.positional_types.iter().zip(&self.positional_values) {
            result = combine_hash(result, value_type.hash_value(value));
        }
        result = hash_named(result, &self.named_parameters);
        for filter in &self.filter_keys {
            result = combine_hash(result, filter.hash_code());
        }
        result = combine_hash(result, stable_hash(self.entity_mode.as_str().as_bytes()));
        if let Some(transformer) = &self.result_transformer {
            result = combine_hash(result, stable_hash(transformer.as_bytes()));
        }
        combine_hash(result, stable_hash(self.query_string.as_bytes()))
    }
}

impl PartialEq for QueryKey {
    fn eq(&self, other: &Self) -> bool {
        if self.query_string != other.query_string
            || self.row_selection != other.row_selection
            || self.result_transformer != other.result_transformer
            || self.entity_mode != other.entity_mode
            || self.positional_types != other.positional_types
            || self.positional_values.len() != other.positional_values.len()
        {
            return false;
        }
        let positional_equal = self
            .positional_types
            .iter()
            .zip(self.positional_values.iter().zip(&other.positional_values))
            .all(|(value_type, (a, b))| value_type.is_equal(a, b));

        positional_equal
            && self.filter_keys == other.filter_keys
            && self.named_parameters == other.named_parameters
    }
}

impl Eq for QueryKey {}

impl Hash for QueryKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash_code());
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sql: {}", self.query_string)?;
        if !self.positional_values.is_empty() {
            let values: Vec<String> = self.positional_values.iter().map(|v| v.to_string()).collect();
            write!(f, "; parameters: {}", values.join(", "))?;
        }
        if !self.named_parameters.is_empty() {
            let named: Vec<String> = self
                .named_parameters
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect();
            write!(f, "; named parameters: {{{}}}", named.join(", "))?;
        }
        if !self.filter_keys.is_empty() {
            let filters: Vec<String> = self.filter_keys.iter().map(|k| k.to_string()).collect();
            write!(f, "; filter keys: [{}]", filters.join(", "))?;
        }
        if let Some(selection) = self.row_selection {
            if let Some(first) = selection.first_row {
                write!(f, "; first row: {}", first)?;
            }
            if let Some(max) = selection.max_rows {
                write!(f, "; max rows: {}", max)?;
            }
        }
        if let Some(transformer) = &self.result_transformer {
            write!(f, "; transformer: {}", transformer)?;
        }
        Ok(())
    }
}
