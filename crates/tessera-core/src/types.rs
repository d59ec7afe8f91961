//! Type declaration builder
//!
//! A [`TypeDescriptor`] collects the identity and attribute definitions of an
//! artifact type. [`TypeDescriptor::register`] validates the declaration once
//! and freezes it into an immutable [`TypeMetadata`], whose
//! [`AttributeRegistry`] hands out one guarded [`Accessor`] per attribute.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde_json::{Map as JsonMap, Value as JsonValue, json};
use tracing::debug;

use crate::artifact::{Artifact, ArtifactState};
use crate::attribute::{AttributeDefinition, AttributeKind, ScalarKind, Section};
use crate::error::{SchemaDefinitionError, ValidationError};
use crate::value::Value;
use crate::version::SemVer;

/// Names of the fixed fields every artifact carries
pub const COMMON_FIELDS: &[&str] = &[
    "id",
    "name",
    "version",
    "type_name",
    "type_version",
    "visibility",
    "state",
    "owner",
    "created_at",
    "updated_at",
    "published_at",
    "deleted_at",
    "tags",
    "description",
];

static TYPE_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_]{0,254}$").expect("type name pattern is valid"));

static ATTRIBUTE_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,79}$").expect("attribute name pattern is valid"));

// ---------------------------------------------------------------------------
// Mutability
// ---------------------------------------------------------------------------

/// Decides whether an instance of a type still accepts writes to
/// non-mutable attributes
#[derive(Clone)]
pub enum Mutability {
    /// Mutable while the artifact is in the given lifecycle state
    WhileState(ArtifactState),
    /// Mutable until the named boolean property is set to `true`
    UntilFlagSet(String),
    /// Caller-supplied predicate
    Custom(Arc<dyn Fn(&Artifact) -> bool + Send + Sync>),
}

impl Mutability {
    pub fn is_mutable(&self, artifact: &Artifact) -> bool {
        match self {
            Mutability::WhileState(state) => artifact.state == *state,
            Mutability::UntilFlagSet(flag) => artifact.peek(flag).and_then(Value::as_bool) != Some(true),
            Mutability::Custom(predicate) => predicate(artifact),
        }
    }
}

impl Default for Mutability {
    fn default() -> Self {
        Mutability::WhileState(ArtifactState::Creating)
    }
}

impl fmt::Debug for Mutability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mutability::WhileState(state) => write!(f, "WhileState({state})"),
            Mutability::UntilFlagSet(flag) => write!(f, "UntilFlagSet({flag})"),
            Mutability::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

// ---------------------------------------------------------------------------
// Slots and accessors
// ---------------------------------------------------------------------------

/// Storage for one attribute on one instance
#[derive(Clone, Debug, Default)]
pub struct Slot {
    pub(crate) value: Option<Value>,
    /// Set once a readonly attribute received a non-null value
    pub(crate) assigned: bool,
}

impl Slot {
    pub fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    pub(crate) fn commit(&mut self, value: Option<Value>, readonly: bool) {
        if readonly && value.is_some() {
            self.assigned = true;
        }
        self.value = value;
    }
}

/// Guarded get/set for one declared attribute
#[derive(Clone, Debug)]
pub struct Accessor {
    name: String,
    definition: Arc<AttributeDefinition>,
    section: Section,
}

impl Accessor {
    fn new(name: String, definition: AttributeDefinition) -> Self {
        let section = definition.section();
        Self {
            name,
            definition: Arc::new(definition),
            section,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn definition(&self) -> &Arc<AttributeDefinition> {
        &self.definition
    }

    pub fn section(&self) -> Section {
        self.section
    }

    /// Reads the slot, materializing a copy of the default when unset
    pub fn get<'a>(&self, slot: &'a mut Slot) -> Option<&'a Value> {
        if slot.value.is_none()
            && let Some(default) = self.definition.get_default()
        {
            slot.value = Some(default.clone());
        }
        slot.value.as_ref()
    }

    /// Whether reads must hand out an immutable view
    pub fn is_read_only(&self, slot: &Slot, instance_mutable: bool) -> bool {
        (self.definition.is_readonly() && slot.assigned) || (!self.definition.is_mutable() && !instance_mutable)
    }

    /// Rejects the write if the attribute is readonly-and-set or frozen
    pub fn check_writable(&self, slot: &Slot, instance_mutable: bool) -> Result<(), ValidationError> {
        if self.definition.is_readonly() && slot.assigned {
            return Err(ValidationError::read_only(&self.name));
        }
        if !self.definition.is_mutable() && !instance_mutable {
            return Err(ValidationError::new(
                &self.name,
                "Attribute cannot be changed once the artifact is no longer mutable",
            ));
        }
        Ok(())
    }

    /// Validates and stores a whole value
    pub fn set(&self, slot: &mut Slot, value: Option<Value>, instance_mutable: bool) -> Result<(), ValidationError> {
        self.check_writable(slot, instance_mutable)?;
        self.store(slot, value)
    }

    /// Validates and stores without the mutability check
    pub(crate) fn store(&self, slot: &mut Slot, value: Option<Value>) -> Result<(), ValidationError> {
        let value = value.map(|v| self.definition.normalize(v));
        self.definition.validate_as(&self.name, value.as_ref())?;
        slot.commit(value, self.definition.is_readonly());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Registry views
// ---------------------------------------------------------------------------

/// Declared attributes partitioned by section, in canonical (name) order
#[derive(Clone, Debug, Default)]
pub struct AttributeRegistry {
    properties: BTreeMap<String, Accessor>,
    dependencies: BTreeMap<String, Accessor>,
    blobs: BTreeMap<String, Accessor>,
    all: BTreeMap<String, Accessor>,
}

impl AttributeRegistry {
    fn from_accessors(all: BTreeMap<String, Accessor>) -> Self {
        let mut registry = Self::default();
        for (name, accessor) in &all {
            let view = match accessor.section {
                Section::Property => &mut registry.properties,
                Section::Dependency => &mut registry.dependencies,
                Section::Blob => &mut registry.blobs,
            };
            view.insert(name.clone(), accessor.clone());
        }
        registry.all = all;
        registry
    }

    pub fn get(&self, name: &str) -> Option<&Accessor> {
        self.all.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.all.contains_key(name)
    }

    pub fn properties(&self) -> impl Iterator<Item = &Accessor> {
        self.properties.values()
    }

    pub fn dependencies(&self) -> impl Iterator<Item = &Accessor> {
        self.dependencies.values()
    }

    pub fn blobs(&self) -> impl Iterator<Item = &Accessor> {
        self.blobs.values()
    }

    pub fn all(&self) -> impl Iterator<Item = &Accessor> {
        self.all.values()
    }

    pub fn len(&self) -> usize {
        self.all.len()
    }

    pub fn is_empty(&self) -> bool {
        self.all.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Type metadata
// ---------------------------------------------------------------------------

/// Frozen description of a registered artifact type
#[derive(Debug)]
pub struct TypeMetadata {
    pub type_name: String,
    pub type_display_name: String,
    pub type_version: String,
    pub type_description: Option<String>,
    /// URL path segment the type is served under
    pub endpoint: String,
    registry: AttributeRegistry,
    mutability: Mutability,
}

impl TypeMetadata {
    pub fn registry(&self) -> &AttributeRegistry {
        &self.registry
    }

    pub fn accessor(&self, name: &str) -> Option<&Accessor> {
        self.registry.get(name)
    }

    pub fn mutability(&self) -> &Mutability {
        &self.mutability
    }

    pub fn sem_version(&self) -> Option<SemVer> {
        SemVer::parse(&self.type_version)
    }

    /// JSON description of the type and all of its attributes
    pub fn schema(&self) -> JsonValue {
        let properties: JsonMap<String, JsonValue> = self
            .registry
            .all()
            .map(|a| (a.name.clone(), a.definition.schema()))
            .collect();
        let required: Vec<&str> = self
            .registry
            .all()
            .filter(|a| a.definition.is_required())
            .map(|a| a.name.as_str())
            .collect();
        json!({
            "name": self.type_name,
            "version": self.type_version,
            "display_name": self.type_display_name,
            "description": self.type_description,
            "endpoint": self.endpoint,
            "properties": properties,
            "required": required,
        })
    }
}

// ---------------------------------------------------------------------------
// Descriptor
// ---------------------------------------------------------------------------

/// Builder for an artifact type declaration
///
/// Attributes inherited from the parent type are kept unless the child
/// declares an attribute with the same name.
#[derive(Debug)]
pub struct TypeDescriptor {
    type_name: String,
    type_version: String,
    display_name: Option<String>,
    description: Option<String>,
    endpoint: Option<String>,
    parent: Option<Arc<TypeMetadata>>,
    attributes: Vec<(String, AttributeDefinition)>,
    mutability: Option<Mutability>,
}

impl TypeDescriptor {
    pub fn new(type_name: impl Into<String>, type_version: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            type_version: type_version.into(),
            display_name: None,
            description: None,
            endpoint: None,
            parent: None,
            attributes: Vec::new(),
            mutability: None,
        }
    }

    pub fn display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = Some(display_name.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Defaults to the lowercased type name
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn extends(mut self, parent: &Arc<TypeMetadata>) -> Self {
        self.parent = Some(Arc::clone(parent));
        self
    }

    pub fn attribute(mut self, name: impl Into<String>, definition: AttributeDefinition) -> Self {
        self.attributes.push((name.into(), definition));
        self
    }

    /// Instances stay mutable until the boolean property `flag` is true
    pub fn mutable_until(mut self, flag: impl Into<String>) -> Self {
        self.mutability = Some(Mutability::UntilFlagSet(flag.into()));
        self
    }

    pub fn mutable_while(mut self, state: ArtifactState) -> Self {
        self.mutability = Some(Mutability::WhileState(state));
        self
    }

    pub fn mutable_when(mut self, predicate: impl Fn(&Artifact) -> bool + Send + Sync + 'static) -> Self {
        self.mutability = Some(Mutability::Custom(Arc::new(predicate)));
        self
    }

    pub fn has_mutability(&self) -> bool {
        self.mutability.is_some()
    }

    pub fn has_parent(&self) -> bool {
        self.parent.is_some()
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Validates the declaration and freezes it
    pub fn register(self) -> Result<Arc<TypeMetadata>, SchemaDefinitionError> {
        if !TYPE_NAME.is_match(&self.type_name) {
            return Err(SchemaDefinitionError::InvalidTypeName(self.type_name));
        }
        if !SemVer::is_valid(&self.type_version) {
            return Err(SchemaDefinitionError::InvalidTypeVersion {
                type_name: self.type_name,
                version: self.type_version,
            });
        }

        let mut all: BTreeMap<String, Accessor> = self
            .parent
            .as_ref()
            .map(|p| p.registry.all.clone())
            .unwrap_or_default();

        let mut declared: Vec<&str> = Vec::with_capacity(self.attributes.len());
        for (name, definition) in &self.attributes {
            if !ATTRIBUTE_NAME.is_match(name) {
                return Err(SchemaDefinitionError::InvalidAttributeName(name.clone()));
            }
            if COMMON_FIELDS.contains(&name.as_str()) {
                return Err(SchemaDefinitionError::ReservedName(name.clone()));
            }
            if declared.contains(&name.as_str()) {
                return Err(SchemaDefinitionError::ConflictingFacets {
                    attribute: name.clone(),
                    message: "attribute declared twice".to_string(),
                });
            }
            declared.push(name);

            let mut definition = definition.clone();
            definition.assign_name(name)?;
            definition.check_declaration(name)?;
            all.insert(name.clone(), Accessor::new(name.clone(), definition));
        }

        let mutability = self
            .mutability
            .or_else(|| self.parent.as_ref().map(|p| p.mutability.clone()))
            .unwrap_or_default();
        if let Mutability::UntilFlagSet(flag) = &mutability {
            let is_boolean = all
                .get(flag)
                .is_some_and(|a| matches!(a.definition.kind(), AttributeKind::Scalar(ScalarKind::Boolean)));
            if !is_boolean {
                return Err(SchemaDefinitionError::UnknownMutabilityFlag(flag.clone()));
            }
        }

        let endpoint = self.endpoint.unwrap_or_else(|| self.type_name.to_lowercase());
        let registry = AttributeRegistry::from_accessors(all);
        debug!(
            type_name = %self.type_name,
            type_version = %self.type_version,
            attributes = registry.len(),
            "registered artifact type"
        );

        Ok(Arc::new(TypeMetadata {
            type_display_name: self.display_name.unwrap_or_else(|| self.type_name.clone()),
            type_name: self.type_name,
            type_version: self.type_version,
            type_description: self.description,
            endpoint,
            registry,
            mutability,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> TypeDescriptor {
        TypeDescriptor::new("Sample", "1.0.0")
            .attribute("title", AttributeDefinition::string().max_length(5))
            .attribute("depends_on", AttributeDefinition::relation())
            .attribute("image", AttributeDefinition::blob())
            .attribute("tags_list", AttributeDefinition::list(AttributeDefinition::string()))
    }

    #[test]
    fn test_register_partitions_views() {
        fn names<'a>(it: impl Iterator<Item = &'a Accessor>) -> Vec<String> {
            it.map(|a| a.name().to_string()).collect()
        }

        let meta = sample().register().unwrap();
        assert_eq!(names(meta.registry().properties()), vec!["tags_list", "title"]);
        assert_eq!(names(meta.registry().dependencies()), vec!["depends_on"]);
        assert_eq!(names(meta.registry().blobs()), vec!["image"]);
        assert_eq!(meta.registry().len(), 4);
        assert_eq!(meta.endpoint, "sample");
        assert_eq!(meta.type_display_name, "Sample");
    }

    #[test]
    fn test_names_assigned_from_declaration_site() {
        let meta = sample().register().unwrap();
        assert_eq!(meta.accessor("title").unwrap().definition().name(), Some("title"));
    }

    #[test]
    fn test_invalid_identity() {
        assert!(matches!(
            TypeDescriptor::new("9bad", "1.0.0").register(),
            Err(SchemaDefinitionError::InvalidTypeName(_))
        ));
        assert!(matches!(
            TypeDescriptor::new("Good", "1.0").register(),
            Err(SchemaDefinitionError::InvalidTypeVersion { .. })
        ));
    }

    #[test]
    fn test_reserved_and_invalid_names() {
        let err = TypeDescriptor::new("T", "1.0.0")
            .attribute("state", AttributeDefinition::string())
            .register()
            .unwrap_err();
        assert_eq!(err, SchemaDefinitionError::ReservedName("state".to_string()));

        let err = TypeDescriptor::new("T", "1.0.0")
            .attribute("a.b", AttributeDefinition::string())
            .register()
            .unwrap_err();
        assert!(matches!(err, SchemaDefinitionError::InvalidAttributeName(_)));
    }

    #[test]
    fn test_prenamed_definition_rejected() {
        let mut def = AttributeDefinition::string();
        def.assign_name("other").unwrap();
        let err = TypeDescriptor::new("T", "1.0.0").attribute("title", def).register().unwrap_err();
        assert!(matches!(err, SchemaDefinitionError::NameAlreadyAssigned { .. }));
    }

    #[test]
    fn test_inheritance_with_override() {
        let parent = TypeDescriptor::new("Base", "1.0.0")
            .attribute("title", AttributeDefinition::string().max_length(5))
            .attribute("count", AttributeDefinition::integer())
            .register()
            .unwrap();
        let child = TypeDescriptor::new("Child", "1.0.0")
            .extends(&parent)
            .attribute("title", AttributeDefinition::string().max_length(50))
            .register()
            .unwrap();

        assert!(child.accessor("count").is_some());
        let title = child.accessor("title").unwrap().definition();
        assert!(title.validate(Some(&Value::from("a long title"))).is_ok());
        // parent untouched
        let title = parent.accessor("title").unwrap().definition();
        assert!(title.validate(Some(&Value::from("a long title"))).is_err());
    }

    #[test]
    fn test_mutability_flag_must_be_boolean() {
        let err = TypeDescriptor::new("T", "1.0.0")
            .attribute("activated", AttributeDefinition::string())
            .mutable_until("activated")
            .register()
            .unwrap_err();
        assert_eq!(err, SchemaDefinitionError::UnknownMutabilityFlag("activated".to_string()));

        assert!(
            TypeDescriptor::new("T", "1.0.0")
                .attribute("activated", AttributeDefinition::boolean())
                .mutable_until("activated")
                .register()
                .is_ok()
        );
    }

    #[test]
    fn test_schema_export() {
        let meta = sample().register().unwrap();
        let schema = meta.schema();
        assert_eq!(schema["name"], "Sample");
        assert_eq!(schema["properties"]["title"]["maxLength"], 5);
        assert_eq!(schema["properties"]["depends_on"]["type"], "relation");
    }

    #[test]
    fn test_readonly_slot_once() {
        let meta = TypeDescriptor::new("T", "1.0.0")
            .attribute("ro", AttributeDefinition::string().readonly())
            .register()
            .unwrap();
        let accessor = meta.accessor("ro").unwrap();
        let mut slot = Slot::default();

        accessor.set(&mut slot, None, true).unwrap();
        accessor.set(&mut slot, Some(Value::from("a")), true).unwrap();
        let err = accessor.set(&mut slot, Some(Value::from("a")), true).unwrap_err();
        assert_eq!(err.message, "Attribute is read-only");
    }
}
