//! Declarative attribute definitions
//!
//! An [`AttributeDefinition`] describes one typed slot on an artifact type:
//! its kind (scalar, list, dict, relation or blob), its flags and an ordered
//! set of named [`Validator`]s. Definitions are built fluently and checked
//! once, when the owning type is registered:
//!
//! ```ignore
//! let prop = AttributeDefinition::string().max_length(5).required();
//! let list = AttributeDefinition::list(AttributeDefinition::integer().min_value(1).max_value(10));
//! ```
//!
//! Facets applied to a kind that does not support them are remembered and
//! reported as [`SchemaDefinitionError::ConflictingFacets`] at registration.

pub mod validator;

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde_json::{Map as JsonMap, Value as JsonValue, json};
use tracing::trace;

use crate::error::{SchemaDefinitionError, ValidationError};
use crate::value::{DbType, Value};

pub use validator::{Predicate, Rule, Shape, Validator};

/// Scalar property kinds, each mapping to one persisted value type
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScalarKind {
    String,
    Text,
    Integer,
    Numeric,
    Boolean,
    DateTime,
}

impl ScalarKind {
    pub fn shape(self) -> Shape {
        match self {
            ScalarKind::String | ScalarKind::Text => Shape::String,
            ScalarKind::Integer => Shape::Integer,
            ScalarKind::Numeric => Shape::Numeric,
            ScalarKind::Boolean => Shape::Boolean,
            ScalarKind::DateTime => Shape::DateTime,
        }
    }

    pub fn db_type(self) -> DbType {
        match self {
            ScalarKind::String => DbType::String,
            ScalarKind::Text => DbType::Text,
            ScalarKind::Integer => DbType::Int,
            ScalarKind::Numeric => DbType::Numeric,
            ScalarKind::Boolean => DbType::Bool,
            ScalarKind::DateTime => DbType::DateTime,
        }
    }

    fn schema_type(self) -> &'static str {
        match self {
            ScalarKind::String => "string",
            ScalarKind::Text => "text",
            ScalarKind::Integer => "integer",
            ScalarKind::Numeric => "numeric",
            ScalarKind::Boolean => "boolean",
            ScalarKind::DateTime => "datetime",
        }
    }
}

/// Item definitions of a list attribute
#[derive(Clone, Debug)]
pub enum ListItems {
    /// Every element follows the same definition
    Homogeneous(Box<AttributeDefinition>),
    /// Fixed arity; one definition per position
    Tuple(Vec<AttributeDefinition>),
}

/// Value definitions of a dict attribute
#[derive(Clone, Debug)]
pub enum DictValues {
    /// Any key, one definition for every value
    Homogeneous(Box<AttributeDefinition>),
    /// Closed set of named keys, each with its own definition
    Composite(BTreeMap<String, AttributeDefinition>),
}

/// Constraints on the artifact a relation points at
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RelationSpec {
    pub references: Vec<String>,
    pub type_version: Option<String>,
}

#[derive(Clone, Debug)]
pub enum AttributeKind {
    Scalar(ScalarKind),
    List(ListItems),
    Dict(DictValues),
    Relation(RelationSpec),
    Blob,
}

/// Which registry view an attribute belongs to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Section {
    Property,
    Dependency,
    Blob,
}

/// One typed, validated attribute slot
#[derive(Clone, Debug)]
pub struct AttributeDefinition {
    name: Option<String>,
    display_name: Option<String>,
    description: Option<String>,
    readonly: bool,
    mutable: bool,
    required: bool,
    default: Option<Value>,
    validators: Vec<Validator>,
    kind: AttributeKind,
    /// Facet misuse, reported when the owning type is registered
    pending: Vec<String>,
}

// ---------------------------------------------------------------------------
// Constructors
// ---------------------------------------------------------------------------

impl AttributeDefinition {
    fn with_kind(kind: AttributeKind, shape: Shape) -> Self {
        let mutable = !matches!(kind, AttributeKind::Relation(_));
        Self {
            name: None,
            display_name: None,
            description: None,
            readonly: false,
            mutable,
            required: false,
            default: None,
            validators: vec![Validator::new("type", Rule::Shape(shape))],
            kind,
            pending: Vec::new(),
        }
    }

    fn scalar(kind: ScalarKind) -> Self {
        Self::with_kind(AttributeKind::Scalar(kind), kind.shape())
    }

    pub fn string() -> Self {
        Self::scalar(ScalarKind::String)
    }

    pub fn text() -> Self {
        Self::scalar(ScalarKind::Text)
    }

    pub fn integer() -> Self {
        Self::scalar(ScalarKind::Integer)
    }

    pub fn numeric() -> Self {
        Self::scalar(ScalarKind::Numeric)
    }

    pub fn boolean() -> Self {
        Self::scalar(ScalarKind::Boolean)
    }

    pub fn datetime() -> Self {
        Self::scalar(ScalarKind::DateTime)
    }

    /// Homogeneous list; a list of relations is itself a dependency and never mutable
    pub fn list(item: AttributeDefinition) -> Self {
        let item_is_relation = matches!(item.kind, AttributeKind::Relation(_));
        let mut def = Self::with_kind(AttributeKind::List(ListItems::Homogeneous(Box::new(item))), Shape::List);
        if item_is_relation {
            def.mutable = false;
        }
        def
    }

    /// Fixed-arity list with one definition per position
    pub fn tuple(items: Vec<AttributeDefinition>) -> Self {
        let arity = items.len();
        let mut def = Self::with_kind(AttributeKind::List(ListItems::Tuple(items)), Shape::List);
        def.install(Validator::new("arity", Rule::MaxSize(arity)).with_message(format!(
            "Tuple cannot hold more than {arity} items"
        )));
        def
    }

    /// Dict with one definition for every value
    pub fn dict(value: AttributeDefinition) -> Self {
        Self::with_kind(AttributeKind::Dict(DictValues::Homogeneous(Box::new(value))), Shape::Dict)
    }

    /// Dict with a closed set of named keys
    pub fn composite<K: Into<String>>(keys: impl IntoIterator<Item = (K, AttributeDefinition)>) -> Self {
        let keys = keys.into_iter().map(|(k, d)| (k.into(), d)).collect();
        Self::with_kind(AttributeKind::Dict(DictValues::Composite(keys)), Shape::Dict)
    }

    /// Reference to another artifact
    pub fn relation() -> Self {
        Self::with_kind(AttributeKind::Relation(RelationSpec::default()), Shape::Artifact)
    }

    pub fn relation_list() -> Self {
        Self::list(Self::relation())
    }

    /// Binary object descriptor
    pub fn blob() -> Self {
        Self::with_kind(AttributeKind::Blob, Shape::Blob)
    }

    pub fn blob_list() -> Self {
        Self::list(Self::blob())
    }
}

// ---------------------------------------------------------------------------
// Flags and facets
// ---------------------------------------------------------------------------

impl AttributeDefinition {
    /// Installs `validator`, replacing any validator already in its slot
    pub fn install(&mut self, validator: Validator) {
        match self.validators.iter_mut().find(|v| v.slot == validator.slot) {
            Some(existing) => *existing = validator,
            None => self.validators.push(validator),
        }
    }

    fn facet(mut self, slot: &str, rule: Rule, applies: bool) -> Self {
        if applies {
            self.install(Validator::new(slot, rule));
        } else {
            self.pending
                .push(format!("facet '{slot}' does not apply to {}", self.type_label()));
        }
        self
    }

    fn is_string(&self) -> bool {
        matches!(self.kind, AttributeKind::Scalar(ScalarKind::String | ScalarKind::Text))
    }

    fn is_number(&self) -> bool {
        matches!(self.kind, AttributeKind::Scalar(ScalarKind::Integer | ScalarKind::Numeric))
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn readonly(mut self) -> Self {
        self.readonly = true;
        self
    }

    /// Rejects writes once the owning artifact is no longer mutable
    pub fn immutable(mut self) -> Self {
        self.mutable = false;
        self
    }

    pub fn mutable(mut self) -> Self {
        if self.section() == Section::Dependency {
            self.pending.push("relations are never mutable".to_string());
        } else {
            self.mutable = true;
        }
        self
    }

    pub fn display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = Some(display_name.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(self.normalize(value.into()));
        self
    }

    /// Restricts values to a closed set
    pub fn allowed_values<V: Into<Value>>(mut self, values: impl IntoIterator<Item = V>) -> Self {
        let values: Vec<Value> = values.into_iter().map(|v| self.normalize(v.into())).collect();
        self.install(Validator::new("allowed_values", Rule::AllowedValues(values)));
        self
    }

    /// Adds a caller-defined predicate under its own slot
    pub fn validator(
        mut self,
        slot: impl Into<String>,
        message: impl Into<String>,
        predicate: impl Fn(&Value) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.install(Validator::new(slot, Rule::Custom(Arc::new(predicate))).with_message(message));
        self
    }

    pub fn max_length(self, max: usize) -> Self {
        let applies = self.is_string();
        self.facet("max_length", Rule::MaxLength(max), applies)
    }

    pub fn min_length(self, min: usize) -> Self {
        let applies = self.is_string();
        self.facet("min_length", Rule::MinLength(min), applies)
    }

    pub fn pattern(mut self, pattern: &str) -> Self {
        match Regex::new(pattern) {
            Ok(re) => {
                let applies = self.is_string();
                self.facet("pattern", Rule::Pattern(re), applies)
            }
            Err(e) => {
                self.pending.push(format!("invalid pattern '{pattern}': {e}"));
                self
            }
        }
    }

    pub fn min_value(self, min: impl Into<f64>) -> Self {
        let applies = self.is_number();
        self.facet("min_value", Rule::MinValue(min.into()), applies)
    }

    pub fn max_value(self, max: impl Into<f64>) -> Self {
        let applies = self.is_number();
        self.facet("max_value", Rule::MaxValue(max.into()), applies)
    }

    pub fn min_size(self, min: usize) -> Self {
        let applies = self.is_list();
        self.facet("min_size", Rule::MinSize(min), applies)
    }

    pub fn max_size(self, max: usize) -> Self {
        let applies = self.is_list();
        self.facet("max_size", Rule::MaxSize(max), applies)
    }

    pub fn unique(self) -> Self {
        let applies = self.is_list();
        self.facet("unique", Rule::Unique, applies)
    }

    pub fn min_keys(self, min: usize) -> Self {
        let applies = self.is_dict();
        self.facet("min_keys", Rule::MinKeys(min), applies)
    }

    pub fn max_keys(self, max: usize) -> Self {
        let applies = self.is_dict();
        self.facet("max_keys", Rule::MaxKeys(max), applies)
    }

    /// Allowed type names of the referenced artifact
    pub fn references<S: Into<String>>(mut self, type_names: impl IntoIterator<Item = S>) -> Self {
        let names: Vec<String> = type_names.into_iter().map(Into::into).collect();
        if let AttributeKind::Relation(spec) = &mut self.kind {
            spec.references = names.clone();
        }
        let applies = self.is_relation();
        self.facet("references", Rule::ReferenceTypes(names), applies)
    }

    /// Exact type version of the referenced artifact
    pub fn reference_version(mut self, version: impl Into<String>) -> Self {
        let version = version.into();
        if let AttributeKind::Relation(spec) = &mut self.kind {
            spec.type_version = Some(version.clone());
        }
        let applies = self.is_relation();
        self.facet("reference_version", Rule::ReferenceVersion(version), applies)
    }

    pub fn min_blob_size(self, min: u64) -> Self {
        let applies = matches!(self.kind, AttributeKind::Blob);
        self.facet("min_blob_size", Rule::MinBlobSize(min), applies)
    }

    pub fn max_blob_size(self, max: u64) -> Self {
        let applies = matches!(self.kind, AttributeKind::Blob);
        self.facet("max_blob_size", Rule::MaxBlobSize(max), applies)
    }

    pub fn min_locations(self, min: usize) -> Self {
        let applies = matches!(self.kind, AttributeKind::Blob);
        self.facet("min_locations", Rule::MinLocations(min), applies)
    }

    pub fn max_locations(self, max: usize) -> Self {
        let applies = matches!(self.kind, AttributeKind::Blob);
        self.facet("max_locations", Rule::MaxLocations(max), applies)
    }
}

// ---------------------------------------------------------------------------
// Introspection
// ---------------------------------------------------------------------------

impl AttributeDefinition {
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Name used in error messages, even before registration
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or("<unnamed>")
    }

    /// Assigns the declaration-site name; a definition is named exactly once
    pub fn assign_name(&mut self, name: &str) -> Result<(), SchemaDefinitionError> {
        if let Some(existing) = &self.name {
            return Err(SchemaDefinitionError::NameAlreadyAssigned {
                existing: existing.clone(),
                requested: name.to_string(),
            });
        }
        self.name = Some(name.to_string());
        Ok(())
    }

    pub fn get_display_name(&self) -> Option<&str> {
        self.display_name.as_deref().or(self.name.as_deref())
    }

    pub fn get_description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn is_readonly(&self) -> bool {
        self.readonly
    }

    pub fn is_mutable(&self) -> bool {
        self.mutable
    }

    pub fn is_required(&self) -> bool {
        self.required
    }

    pub fn get_default(&self) -> Option<&Value> {
        self.default.as_ref()
    }

    pub fn kind(&self) -> &AttributeKind {
        &self.kind
    }

    pub fn validators(&self) -> &[Validator] {
        &self.validators
    }

    /// The validator installed under `slot`, if any
    pub fn validator_in(&self, slot: &str) -> Option<&Validator> {
        self.validators.iter().find(|v| v.slot == slot)
    }

    pub fn get_allowed_values(&self) -> Option<&[Value]> {
        match self.validator_in("allowed_values").map(|v| &v.rule) {
            Some(Rule::AllowedValues(values)) => Some(values),
            _ => None,
        }
    }

    pub fn is_list(&self) -> bool {
        matches!(self.kind, AttributeKind::List(_))
    }

    pub fn is_dict(&self) -> bool {
        matches!(self.kind, AttributeKind::Dict(_))
    }

    pub fn is_collection(&self) -> bool {
        self.is_list() || self.is_dict()
    }

    pub fn is_relation(&self) -> bool {
        matches!(self.kind, AttributeKind::Relation(_))
    }

    pub fn section(&self) -> Section {
        match &self.kind {
            AttributeKind::Relation(_) => Section::Dependency,
            AttributeKind::Blob => Section::Blob,
            AttributeKind::List(ListItems::Homogeneous(item)) => match item.kind {
                AttributeKind::Relation(_) => Section::Dependency,
                AttributeKind::Blob => Section::Blob,
                _ => Section::Property,
            },
            _ => Section::Property,
        }
    }

    /// Definition governing the list element at `index`
    pub fn item_definition(&self, index: usize) -> Option<&AttributeDefinition> {
        match &self.kind {
            AttributeKind::List(ListItems::Homogeneous(item)) => Some(item),
            AttributeKind::List(ListItems::Tuple(items)) => items.get(index),
            _ => None,
        }
    }

    /// Definition governing the dict value under `key`
    pub fn value_definition(&self, key: &str) -> Option<&AttributeDefinition> {
        match &self.kind {
            AttributeKind::Dict(DictValues::Homogeneous(value)) => Some(value),
            AttributeKind::Dict(DictValues::Composite(keys)) => keys.get(key),
            _ => None,
        }
    }

    /// Declared keys of a composite dict
    pub fn declared_keys(&self) -> Option<impl Iterator<Item = (&String, &AttributeDefinition)>> {
        match &self.kind {
            AttributeKind::Dict(DictValues::Composite(keys)) => Some(keys.iter()),
            _ => None,
        }
    }

    /// Persisted type of this attribute's values, if it has one
    pub fn db_type(&self) -> Option<DbType> {
        match &self.kind {
            AttributeKind::Scalar(kind) => Some(kind.db_type()),
            AttributeKind::List(_) => Some(DbType::Array),
            _ => None,
        }
    }

    /// Empty container for list/dict attributes; unset collections are `None`
    pub fn empty_container(&self) -> Option<Value> {
        match &self.kind {
            AttributeKind::List(_) => Some(Value::List(Vec::new())),
            AttributeKind::Dict(_) => Some(Value::Dict(BTreeMap::new())),
            _ => None,
        }
    }

    fn type_label(&self) -> &'static str {
        match &self.kind {
            AttributeKind::Scalar(kind) => kind.schema_type(),
            AttributeKind::List(_) => "array",
            AttributeKind::Dict(_) => "dict",
            AttributeKind::Relation(_) => "relation",
            AttributeKind::Blob => "blob",
        }
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl AttributeDefinition {
    /// Validates a whole value
    ///
    /// `None` fails only when the attribute is required. Otherwise validators
    /// run in declaration order and the first failure is reported; collection
    /// elements are then validated against their own definitions.
    pub fn validate(&self, value: Option<&Value>) -> Result<(), ValidationError> {
        self.validate_as(self.label(), value)
    }

    /// [`validate`](Self::validate) reporting failures under `attribute`
    pub fn validate_as(&self, attribute: &str, value: Option<&Value>) -> Result<(), ValidationError> {
        let Some(value) = value else {
            return if self.required {
                Err(ValidationError::required(attribute))
            } else {
                Ok(())
            };
        };
        self.run_validators(attribute, value, None)?;
        self.validate_elements(attribute, value)
    }

    fn run_validators(&self, attribute: &str, value: &Value, skip_slot: Option<&str>) -> Result<(), ValidationError> {
        for validator in &self.validators {
            if skip_slot == Some(validator.slot.as_str()) {
                continue;
            }
            if validator.rule.violated_by(value) {
                trace!(attribute, slot = %validator.slot, "validator rejected value");
                return Err(ValidationError::new(attribute, validator.message.clone()).with_value(value.to_json()));
            }
        }
        Ok(())
    }

    fn validate_elements(&self, attribute: &str, value: &Value) -> Result<(), ValidationError> {
        match (&self.kind, value) {
            (AttributeKind::List(_), Value::List(items)) => {
                for (i, item) in items.iter().enumerate() {
                    let name = format!("{attribute}[{i}]");
                    match self.item_definition(i) {
                        Some(def) => def.validate_as(&name, Some(item))?,
                        None => return Err(ValidationError::new(name, "No item definition for this position")),
                    }
                }
                Ok(())
            }
            (AttributeKind::Dict(DictValues::Homogeneous(def)), Value::Dict(map)) => {
                for (key, item) in map {
                    def.validate_as(&format!("{attribute}.{key}"), Some(item))?;
                }
                Ok(())
            }
            (AttributeKind::Dict(DictValues::Composite(keys)), Value::Dict(map)) => {
                if let Some(unknown) = map.keys().find(|k| !keys.contains_key(*k)) {
                    return Err(ValidationError::new(attribute, format!("Key '{unknown}' is not allowed"))
                        .with_value(value.to_json()));
                }
                for (key, def) in keys {
                    def.validate_as(&format!("{attribute}.{key}"), map.get(key))?;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Declaration-time consistency check, run when the owning type registers
    pub fn check_declaration(&self, attribute: &str) -> Result<(), SchemaDefinitionError> {
        if let Some(message) = self.pending.first() {
            return Err(SchemaDefinitionError::ConflictingFacets {
                attribute: attribute.to_string(),
                message: message.clone(),
            });
        }
        self.check_bounds(attribute)?;

        match &self.kind {
            AttributeKind::List(ListItems::Homogeneous(item)) => item.check_declaration(&format!("{attribute}[]"))?,
            AttributeKind::List(ListItems::Tuple(items)) => {
                for (i, item) in items.iter().enumerate() {
                    item.check_declaration(&format!("{attribute}[{i}]"))?;
                }
            }
            AttributeKind::Dict(DictValues::Homogeneous(value)) => value.check_declaration(&format!("{attribute}.*"))?,
            AttributeKind::Dict(DictValues::Composite(keys)) => {
                for (key, def) in keys {
                    def.check_declaration(&format!("{attribute}.{key}"))?;
                }
            }
            _ => {}
        }

        if let Some(allowed) = self.get_allowed_values() {
            for value in allowed {
                self.run_validators(attribute, value, Some("allowed_values"))
                    .and_then(|_| self.validate_elements(attribute, value))
                    .map_err(|e| SchemaDefinitionError::InvalidAllowedValue {
                        attribute: attribute.to_string(),
                        message: format!("{value}: {}", e.message),
                    })?;
            }
        }

        if let Some(default) = &self.default {
            self.validate_as(attribute, Some(default))
                .map_err(|e| SchemaDefinitionError::InvalidDefault {
                    attribute: attribute.to_string(),
                    message: e.message,
                })?;
        }
        Ok(())
    }

    fn check_bounds(&self, attribute: &str) -> Result<(), SchemaDefinitionError> {
        let rule = |slot: &str| self.validator_in(slot).map(|v| &v.rule);
        let conflict = |lo: &str, hi: &str| SchemaDefinitionError::ConflictingFacets {
            attribute: attribute.to_string(),
            message: format!("{lo} is greater than {hi}"),
        };
        let inverted = match (rule("min_length"), rule("max_length")) {
            (Some(Rule::MinLength(lo)), Some(Rule::MaxLength(hi))) => lo > hi,
            _ => false,
        };
        if inverted {
            return Err(conflict("min_length", "max_length"));
        }
        let inverted = match (rule("min_value"), rule("max_value")) {
            (Some(Rule::MinValue(lo)), Some(Rule::MaxValue(hi))) => lo > hi,
            _ => false,
        };
        if inverted {
            return Err(conflict("min_value", "max_value"));
        }
        let inverted = match (rule("min_size"), rule("max_size")) {
            (Some(Rule::MinSize(lo)), Some(Rule::MaxSize(hi))) => lo > hi,
            _ => false,
        };
        if inverted {
            return Err(conflict("min_size", "max_size"));
        }
        let inverted = match (rule("min_keys"), rule("max_keys")) {
            (Some(Rule::MinKeys(lo)), Some(Rule::MaxKeys(hi))) => lo > hi,
            _ => false,
        };
        if inverted {
            return Err(conflict("min_keys", "max_keys"));
        }
        let inverted = match (rule("min_blob_size"), rule("max_blob_size")) {
            (Some(Rule::MinBlobSize(lo)), Some(Rule::MaxBlobSize(hi))) => lo > hi,
            _ => false,
        };
        if inverted {
            return Err(conflict("min_blob_size", "max_blob_size"));
        }
        let inverted = match (rule("min_locations"), rule("max_locations")) {
            (Some(Rule::MinLocations(lo)), Some(Rule::MaxLocations(hi))) => lo > hi,
            _ => false,
        };
        if inverted {
            return Err(conflict("min_locations", "max_locations"));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Conversion
// ---------------------------------------------------------------------------

impl AttributeDefinition {
    /// Brings a value into this definition's canonical variant
    ///
    /// Strings and texts convert into each other and integers widen to
    /// numeric, recursively through collections.
    pub fn normalize(&self, value: Value) -> Value {
        match (&self.kind, value) {
            (AttributeKind::Scalar(ScalarKind::Text), Value::String(s)) => Value::Text(s),
            (AttributeKind::Scalar(ScalarKind::String), Value::Text(s)) => Value::String(s),
            (AttributeKind::Scalar(ScalarKind::Numeric), Value::Integer(i)) => Value::Numeric(i as f64),
            (AttributeKind::List(_), Value::List(items)) => Value::List(
                items
                    .into_iter()
                    .enumerate()
                    .map(|(i, item)| match self.item_definition(i) {
                        Some(def) => def.normalize(item),
                        None => item,
                    })
                    .collect(),
            ),
            (AttributeKind::Dict(_), Value::Dict(map)) => Value::Dict(
                map.into_iter()
                    .map(|(k, v)| {
                        let v = match self.value_definition(&k) {
                            Some(def) => def.normalize(v),
                            None => v,
                        };
                        (k, v)
                    })
                    .collect(),
            ),
            (_, value) => value,
        }
    }

    /// Converts JSON into a value of this definition's kind
    ///
    /// `null` converts to `None`. Relations and blobs are never built from
    /// JSON; they are resolved by the repository proxies.
    pub fn value_from_json(&self, json: &JsonValue) -> Result<Option<Value>, ValidationError> {
        self.value_from_json_as(self.label(), json)
    }

    pub fn value_from_json_as(&self, attribute: &str, json: &JsonValue) -> Result<Option<Value>, ValidationError> {
        if json.is_null() {
            return Ok(None);
        }
        let mismatch = |expected: &str| {
            ValidationError::new(attribute, format!("Value must be of type {expected}")).with_value(json.clone())
        };
        let value = match &self.kind {
            AttributeKind::Scalar(ScalarKind::String) => {
                Value::String(json.as_str().ok_or_else(|| mismatch("string"))?.to_string())
            }
            AttributeKind::Scalar(ScalarKind::Text) => {
                Value::Text(json.as_str().ok_or_else(|| mismatch("text"))?.to_string())
            }
            AttributeKind::Scalar(ScalarKind::Integer) => Value::Integer(json.as_i64().ok_or_else(|| mismatch("integer"))?),
            AttributeKind::Scalar(ScalarKind::Numeric) => Value::Numeric(json.as_f64().ok_or_else(|| mismatch("numeric"))?),
            AttributeKind::Scalar(ScalarKind::Boolean) => Value::Boolean(json.as_bool().ok_or_else(|| mismatch("boolean"))?),
            AttributeKind::Scalar(ScalarKind::DateTime) => {
                let text = json.as_str().ok_or_else(|| mismatch("datetime"))?;
                let parsed = DateTime::parse_from_rfc3339(text).map_err(|_| mismatch("datetime"))?;
                Value::DateTime(parsed.with_timezone(&Utc))
            }
            AttributeKind::List(_) => {
                let items = json.as_array().ok_or_else(|| mismatch("array"))?;
                let mut values = Vec::with_capacity(items.len());
                for (i, item) in items.iter().enumerate() {
                    let name = format!("{attribute}[{i}]");
                    let def = self
                        .item_definition(i)
                        .ok_or_else(|| ValidationError::new(&name, "No item definition for this position"))?;
                    let value = def
                        .value_from_json_as(&name, item)?
                        .ok_or_else(|| ValidationError::new(&name, "List items cannot be null"))?;
                    values.push(value);
                }
                Value::List(values)
            }
            AttributeKind::Dict(_) => {
                let object = json.as_object().ok_or_else(|| mismatch("dict"))?;
                let mut map = BTreeMap::new();
                for (key, item) in object {
                    let name = format!("{attribute}.{key}");
                    let def = self
                        .value_definition(key)
                        .ok_or_else(|| ValidationError::new(attribute, format!("Key '{key}' is not allowed")))?;
                    if let Some(value) = def.value_from_json_as(&name, item)? {
                        map.insert(key.clone(), value);
                    }
                }
                Value::Dict(map)
            }
            AttributeKind::Relation(_) | AttributeKind::Blob => {
                return Err(ValidationError::new(attribute, "Value cannot be built from JSON").with_value(json.clone()));
            }
        };
        Ok(Some(value))
    }

    /// JSON-Schema-like description used for type discovery
    pub fn schema(&self) -> JsonValue {
        let mut schema = JsonMap::new();
        schema.insert("type".to_string(), json!(self.type_label()));
        if let Some(display_name) = self.get_display_name() {
            schema.insert("display_name".to_string(), json!(display_name));
        }
        if let Some(description) = &self.description {
            schema.insert("description".to_string(), json!(description));
        }
        schema.insert("required".to_string(), json!(self.required));
        schema.insert("readonly".to_string(), json!(self.readonly));
        schema.insert("mutable".to_string(), json!(self.mutable));
        if let Some(default) = &self.default {
            schema.insert("default".to_string(), default.to_json());
        }
        for validator in &self.validators {
            if let Some((key, value)) = validator.rule.schema_facet() {
                schema.insert(key.to_string(), value);
            }
        }
        match &self.kind {
            AttributeKind::List(ListItems::Homogeneous(item)) => {
                schema.insert("items".to_string(), item.schema());
            }
            AttributeKind::List(ListItems::Tuple(items)) => {
                schema.insert("items".to_string(), JsonValue::Array(items.iter().map(|d| d.schema()).collect()));
            }
            AttributeKind::Dict(DictValues::Homogeneous(value)) => {
                schema.insert("additionalProperties".to_string(), value.schema());
            }
            AttributeKind::Dict(DictValues::Composite(keys)) => {
                let properties: JsonMap<String, JsonValue> = keys.iter().map(|(k, d)| (k.clone(), d.schema())).collect();
                schema.insert("properties".to_string(), JsonValue::Object(properties));
                schema.insert("additionalProperties".to_string(), json!(false));
            }
            _ => {}
        }
        JsonValue::Object(schema)
    }
}
