//! Artifact instances
//!
//! An [`Artifact`] carries the common fields every artifact has plus one
//! [`Slot`] per attribute declared by its [`TypeMetadata`]. All attribute
//! access goes through the type's accessors, so readonly, mutability and
//! validation rules hold no matter how the value is reached.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::error::ValidationError;
use crate::guard::{DictAccess, DictGuard, FrozenDict, FrozenList, ListAccess, ListGuard};
use crate::types::{Accessor, Slot, TypeMetadata};
use crate::value::Value;
use crate::version::SemVer;

/// Lifecycle state of an artifact
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactState {
    #[default]
    Creating,
    Active,
    Deactivated,
    Deleted,
}

impl ArtifactState {
    pub fn as_str(self) -> &'static str {
        match self {
            ArtifactState::Creating => "creating",
            ArtifactState::Active => "active",
            ArtifactState::Deactivated => "deactivated",
            ArtifactState::Deleted => "deleted",
        }
    }
}

impl fmt::Display for ArtifactState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ArtifactState {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "creating" => Ok(ArtifactState::Creating),
            "active" => Ok(ArtifactState::Active),
            "deactivated" => Ok(ArtifactState::Deactivated),
            "deleted" => Ok(ArtifactState::Deleted),
            other => Err(ValidationError::new("state", "Unknown artifact state").with_value(json!(other))),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    #[default]
    Private,
    Public,
    Shared,
    Community,
}

impl fmt::Display for Visibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Visibility::Private => "private",
            Visibility::Public => "public",
            Visibility::Shared => "shared",
            Visibility::Community => "community",
        };
        f.write_str(name)
    }
}

/// Current time at the precision persisted by property bags
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// One typed artifact instance
#[derive(Clone)]
pub struct Artifact {
    pub id: String,
    pub name: String,
    pub version: String,
    pub visibility: Visibility,
    pub state: ArtifactState,
    pub owner: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub tags: BTreeSet<String>,
    pub description: Option<String>,
    type_meta: Arc<TypeMetadata>,
    slots: BTreeMap<String, Slot>,
}

impl Artifact {
    /// An instance with the given id, empty slots and no defaults applied
    pub fn blank(type_meta: Arc<TypeMetadata>, id: impl Into<String>) -> Self {
        let created = now();
        let slots = type_meta
            .registry()
            .all()
            .map(|a| (a.name().to_string(), Slot::default()))
            .collect();
        Self {
            id: id.into(),
            name: String::new(),
            version: "0.0.0".to_string(),
            visibility: Visibility::default(),
            state: ArtifactState::Creating,
            owner: None,
            created_at: created,
            updated_at: created,
            published_at: None,
            deleted_at: None,
            tags: BTreeSet::new(),
            description: None,
            type_meta,
            slots,
        }
    }

    /// Factory: fresh id and timestamps, state `creating`, defaults seeded
    pub fn create(
        type_meta: Arc<TypeMetadata>,
        name: impl Into<String>,
        version: impl Into<String>,
    ) -> Result<Self, ValidationError> {
        let version = version.into();
        if !SemVer::is_valid(&version) {
            return Err(
                ValidationError::new("version", "Version must be a semantic version").with_value(json!(version))
            );
        }
        let mut artifact = Self::blank(type_meta, Uuid::new_v4().to_string());
        artifact.name = name.into();
        artifact.version = version;
        artifact.seed_defaults();
        debug!(
            artifact_id = %artifact.id,
            type_name = %artifact.type_name(),
            "created artifact"
        );
        Ok(artifact)
    }

    /// Keyword construction
    ///
    /// Bypasses the mutability predicate but validates every value; unknown
    /// names fail, and required properties are checked once all values and
    /// defaults are in place. Required blobs and dependencies are left to
    /// [`validate_publish`](Self::validate_publish).
    pub fn from_properties(
        type_meta: Arc<TypeMetadata>,
        id: impl Into<String>,
        values: impl IntoIterator<Item = (String, Option<Value>)>,
    ) -> Result<Self, ValidationError> {
        let mut artifact = Self::blank(Arc::clone(&type_meta), id);
        artifact.seed_defaults();
        for (name, value) in values {
            let accessor = type_meta
                .accessor(&name)
                .ok_or_else(|| ValidationError::unknown_property(&name))?;
            let slot = artifact.slots.entry(name).or_default();
            accessor.store(slot, value)?;
        }
        for accessor in type_meta.registry().properties() {
            if accessor.definition().is_required() && artifact.peek(accessor.name()).is_none() {
                return Err(ValidationError::required(accessor.name()));
            }
        }
        Ok(artifact)
    }

    fn seed_defaults(&mut self) {
        let meta = Arc::clone(&self.type_meta);
        for accessor in meta.registry().all() {
            let slot = self.slots.entry(accessor.name().to_string()).or_default();
            accessor.get(slot);
        }
    }

    pub fn type_meta(&self) -> &Arc<TypeMetadata> {
        &self.type_meta
    }

    pub fn type_name(&self) -> &str {
        &self.type_meta.type_name
    }

    pub fn type_version(&self) -> &str {
        &self.type_meta.type_version
    }

    /// Whether non-mutable attributes still accept writes
    pub fn is_mutable(&self) -> bool {
        self.type_meta.mutability().is_mutable(self)
    }

    fn accessor(&self, name: &str) -> Result<Accessor, ValidationError> {
        self.type_meta
            .accessor(name)
            .cloned()
            .ok_or_else(|| ValidationError::unknown_property(name))
    }

    /// Stored value, falling back to the default without materializing it
    pub fn peek(&self, name: &str) -> Option<&Value> {
        self.slots
            .get(name)
            .and_then(Slot::value)
            .or_else(|| self.type_meta.accessor(name)?.definition().get_default())
    }

    /// Stored value; an unset attribute with a default gets its own copy
    pub fn get(&mut self, name: &str) -> Result<Option<&Value>, ValidationError> {
        let accessor = self.accessor(name)?;
        let slot = self.slots.entry(name.to_string()).or_default();
        Ok(accessor.get(slot))
    }

    /// Validates and assigns a whole value
    pub fn set(&mut self, name: &str, value: Option<Value>) -> Result<(), ValidationError> {
        let mutable = self.is_mutable();
        let accessor = self.accessor(name)?;
        let slot = self.slots.entry(name.to_string()).or_default();
        accessor.set(slot, value, mutable)?;
        trace!(artifact_id = %self.id, attribute = name, "attribute set");
        Ok(())
    }

    /// Whether reads of `name` hand out a frozen view
    pub fn is_read_only(&self, name: &str) -> bool {
        match (self.type_meta.accessor(name), self.slots.get(name)) {
            (Some(accessor), Some(slot)) => accessor.is_read_only(slot, self.is_mutable()),
            _ => false,
        }
    }

    /// Guarded access to a list attribute
    pub fn list_mut(&mut self, name: &str) -> Result<Box<dyn ListAccess + '_>, ValidationError> {
        let mutable = self.is_mutable();
        let accessor = self.accessor(name)?;
        if !accessor.definition().is_list() {
            return Err(ValidationError::new(name, "Attribute is not a list"));
        }
        let slot = self.slots.entry(name.to_string()).or_default();
        accessor.get(slot);
        if accessor.is_read_only(slot, mutable) {
            let frozen: &Slot = slot;
            let items = frozen.value().and_then(Value::as_list).map(Vec::as_slice).unwrap_or(&[]);
            return Ok(Box::new(FrozenList::new(name, items)));
        }
        Ok(Box::new(ListGuard::new(name, Arc::clone(accessor.definition()), slot)))
    }

    /// Guarded access to a dict attribute
    pub fn dict_mut(&mut self, name: &str) -> Result<Box<dyn DictAccess + '_>, ValidationError> {
        let mutable = self.is_mutable();
        let accessor = self.accessor(name)?;
        if !accessor.definition().is_dict() {
            return Err(ValidationError::new(name, "Attribute is not a dict"));
        }
        let slot = self.slots.entry(name.to_string()).or_default();
        accessor.get(slot);
        if accessor.is_read_only(slot, mutable) {
            let frozen: &Slot = slot;
            return Ok(Box::new(FrozenDict::new(name, frozen.value().and_then(Value::as_dict))));
        }
        Ok(Box::new(DictGuard::new(name, Arc::clone(accessor.definition()), slot)))
    }

    /// Every declared attribute with its effective value, in canonical order
    pub fn values(&self) -> impl Iterator<Item = (&Accessor, Option<&Value>)> {
        self.type_meta.registry().all().map(|a| (a, self.peek(a.name())))
    }

    /// Referenced artifacts of each populated dependency attribute
    pub fn populated_dependencies(&self) -> Vec<(&str, Vec<&Artifact>)> {
        self.type_meta
            .registry()
            .dependencies()
            .filter_map(|accessor| {
                let referenced: Vec<&Artifact> = match self.peek(accessor.name()) {
                    Some(Value::Artifact(artifact)) => vec![artifact.as_ref()],
                    Some(Value::List(items)) => items.iter().filter_map(Value::as_artifact).collect(),
                    _ => Vec::new(),
                };
                (!referenced.is_empty()).then_some((accessor.name(), referenced))
            })
            .collect()
    }

    /// Pre-publish check: required blobs and dependencies must be populated
    pub fn validate_publish(&self) -> Result<(), ValidationError> {
        let registry = self.type_meta.registry();
        for accessor in registry.dependencies().chain(registry.blobs()) {
            if !accessor.definition().is_required() {
                continue;
            }
            let populated = match self.peek(accessor.name()) {
                Some(Value::List(items)) => !items.is_empty(),
                Some(_) => true,
                None => false,
            };
            if !populated {
                return Err(ValidationError::required(accessor.name()));
            }
        }
        Ok(())
    }
}

impl PartialEq for Artifact {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.name == other.name
            && self.version == other.version
            && self.visibility == other.visibility
            && self.state == other.state
            && self.owner == other.owner
            && self.created_at == other.created_at
            && self.updated_at == other.updated_at
            && self.published_at == other.published_at
            && self.deleted_at == other.deleted_at
            && self.tags == other.tags
            && self.description == other.description
            && self.type_name() == other.type_name()
            && self.type_version() == other.type_version()
            && self.values().map(|(a, v)| (a.name(), v)).eq(other.values().map(|(a, v)| (a.name(), v)))
    }
}

impl fmt::Debug for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let values: BTreeMap<&str, Option<&Value>> = self.values().map(|(a, v)| (a.name(), v)).collect();
        f.debug_struct("Artifact")
            .field("type", &format_args!("{}@{}", self.type_name(), self.type_version()))
            .field("id", &self.id)
            .field("name", &self.name)
            .field("state", &self.state)
            .field("values", &values)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::AttributeDefinition;
    use crate::types::TypeDescriptor;

    fn meta() -> Arc<TypeMetadata> {
        TypeDescriptor::new("Sample", "1.0.0")
            .attribute("title", AttributeDefinition::string().max_length(5).required().default("dflt"))
            .attribute("locked", AttributeDefinition::string().immutable())
            .attribute("nums", AttributeDefinition::list(AttributeDefinition::integer()).default(vec![1]))
            .attribute("labels", AttributeDefinition::dict(AttributeDefinition::string()))
            .attribute("dep", AttributeDefinition::relation())
            .register()
            .unwrap()
    }

    #[test]
    fn test_factory_seeds_defaults() {
        let artifact = Artifact::create(meta(), "a", "1.0.0").unwrap();
        assert_eq!(artifact.state, ArtifactState::Creating);
        assert_eq!(artifact.peek("title"), Some(&Value::from("dflt")));
        assert!(Uuid::parse_str(&artifact.id).is_ok());
        assert!(Artifact::create(meta(), "a", "one").is_err());
    }

    #[test]
    fn test_defaults_are_copied_per_instance() {
        let mut a = Artifact::create(meta(), "a", "1.0.0").unwrap();
        let b = Artifact::create(meta(), "b", "1.0.0").unwrap();
        a.list_mut("nums").unwrap().append(Value::from(2)).unwrap();
        assert_eq!(a.peek("nums"), Some(&Value::from(vec![1, 2])));
        assert_eq!(b.peek("nums"), Some(&Value::from(vec![1])));
    }

    #[test]
    fn test_immutable_attribute_after_publish() {
        let mut artifact = Artifact::create(meta(), "a", "1.0.0").unwrap();
        artifact.set("locked", Some(Value::from("x"))).unwrap();
        artifact.state = ArtifactState::Active;
        assert!(artifact.set("locked", Some(Value::from("y"))).is_err());
        // mutable attributes stay writable
        artifact.set("title", Some(Value::from("t"))).unwrap();
    }

    #[test]
    fn test_guards_frozen_when_not_mutable() {
        let meta = TypeDescriptor::new("Frozen", "1.0.0")
            .attribute("nums", AttributeDefinition::list(AttributeDefinition::integer()).immutable())
            .register()
            .unwrap();
        let mut artifact = Artifact::create(meta, "a", "1.0.0").unwrap();
        artifact.list_mut("nums").unwrap().append(Value::from(1)).unwrap();
        artifact.state = ArtifactState::Active;
        assert!(artifact.is_read_only("nums"));
        let mut list = artifact.list_mut("nums").unwrap();
        assert_eq!(list.len(), 1);
        assert!(list.append(Value::from(2)).is_err());
    }

    #[test]
    fn test_unknown_property() {
        let mut artifact = Artifact::create(meta(), "a", "1.0.0").unwrap();
        assert_eq!(
            artifact.set("nope", None).unwrap_err().message,
            "unknown property"
        );
        assert!(Artifact::from_properties(meta(), "id", [("nope".to_string(), None)]).is_err());
    }

    #[test]
    fn test_from_properties_checks_required_after_defaults() {
        let artifact = Artifact::from_properties(meta(), "id-1", Vec::new()).unwrap();
        assert_eq!(artifact.peek("title"), Some(&Value::from("dflt")));

        let meta = TypeDescriptor::new("Req", "1.0.0")
            .attribute("title", AttributeDefinition::string().required())
            .attribute("dep", AttributeDefinition::relation().required())
            .register()
            .unwrap();
        let err = Artifact::from_properties(Arc::clone(&meta), "id-2", Vec::new()).unwrap_err();
        assert_eq!(err.attribute, "title");
        // required dependencies are only checked at publish time
        let artifact =
            Artifact::from_properties(meta, "id-3", [("title".to_string(), Some(Value::from("x")))]).unwrap();
        assert_eq!(artifact.validate_publish().unwrap_err().attribute, "dep");
    }

    #[test]
    fn test_mutable_until_flag() {
        let meta = TypeDescriptor::new("Flagged", "1.0.0")
            .attribute("activated", AttributeDefinition::boolean())
            .attribute("locked", AttributeDefinition::string().immutable())
            .mutable_until("activated")
            .register()
            .unwrap();
        let mut artifact = Artifact::create(meta, "a", "1.0.0").unwrap();
        artifact.state = ArtifactState::Active;
        artifact.set("locked", Some(Value::from("x"))).unwrap();
        artifact.set("activated", Some(Value::Boolean(true))).unwrap();
        assert!(!artifact.is_mutable());
        assert!(artifact.set("locked", Some(Value::from("y"))).is_err());
    }

    #[test]
    fn test_state_parsing() {
        assert_eq!("active".parse::<ArtifactState>().unwrap(), ArtifactState::Active);
        assert!("gone".parse::<ArtifactState>().is_err());
        assert_eq!(Visibility::Community.to_string(), "community");
    }
}
