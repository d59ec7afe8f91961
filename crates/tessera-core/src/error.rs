//! Error types for Tessera
//!
//! Each failure family has its own enum so callers can match on the exact
//! condition. Every variant carries the attribute name, path, offending value
//! or artifact id needed to render a precise message without re-deriving it.

use serde_json::Value as JsonValue;
use thiserror::Error;

/// A value failed a predicate, was missing while required, or violated
/// readonly / immutability rules.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("invalid value for '{attribute}': {message}")]
pub struct ValidationError {
    /// Attribute the value was offered to (dotted for nested keys)
    pub attribute: String,
    /// Failure message of the first failing validator
    pub message: String,
    /// Offending value, rendered as JSON
    pub value: Option<JsonValue>,
}

impl ValidationError {
    pub fn new(attribute: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
            message: message.into(),
            value: None,
        }
    }

    pub fn with_value(mut self, value: JsonValue) -> Self {
        self.value = Some(value);
        self
    }

    pub fn required(attribute: impl Into<String>) -> Self {
        Self::new(attribute, "Value is required")
    }

    pub fn read_only(attribute: impl Into<String>) -> Self {
        Self::new(attribute, "Attribute is read-only")
    }

    pub fn unknown_property(attribute: impl Into<String>) -> Self {
        Self::new(attribute, "unknown property")
    }
}

/// A type was declared with an internally inconsistent schema.
///
/// Raised once, when the type is registered, never while an instance is used.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaDefinitionError {
    #[error("invalid type name '{0}'")]
    InvalidTypeName(String),

    #[error("invalid type version '{version}' for type '{type_name}'")]
    InvalidTypeVersion { type_name: String, version: String },

    #[error("invalid attribute name '{0}'")]
    InvalidAttributeName(String),

    #[error("attribute '{attribute}' has an invalid default: {message}")]
    InvalidDefault { attribute: String, message: String },

    #[error("attribute '{attribute}' has an invalid allowed value: {message}")]
    InvalidAllowedValue { attribute: String, message: String },

    #[error("attribute '{attribute}' has conflicting facets: {message}")]
    ConflictingFacets { attribute: String, message: String },

    #[error("attribute name '{0}' is reserved for a common artifact field")]
    ReservedName(String),

    #[error("attribute already named '{existing}', cannot rename to '{requested}'")]
    NameAlreadyAssigned { existing: String, requested: String },

    #[error("mutability flag '{0}' is not a declared boolean property")]
    UnknownMutabilityFlag(String),
}

/// A patch path is malformed, escapes incorrectly or addresses a
/// nonexistent list index or dict key.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid path '{path}': {message}")]
pub struct PathError {
    pub path: String,
    pub message: String,
}

impl PathError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Errors raised while resolving or checking artifact dependencies
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DependencyError {
    #[error("circular dependency: artifact '{artifact_id}' cannot depend on itself via '{attribute}'")]
    Circular {
        artifact_id: String,
        attribute: String,
    },

    #[error("dependency '{0}' not found")]
    NotFound(String),

    #[error(
        "not all dependencies are in 'active' state: '{dependency_id}' of artifact '{artifact_id}' is '{state}'"
    )]
    NotActive {
        artifact_id: String,
        dependency_id: String,
        state: String,
    },

    #[error("dependency property '{attribute}' has to be deleted first")]
    PopulatedDependency { attribute: String },

    #[error("proxy chain deeper than {depth} layers")]
    UnwrapDepthExceeded { depth: usize },
}

/// Errors raised by the artifact type registry
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PluginError {
    #[error("unknown artifact type '{type_name}' (version {type_version})")]
    UnknownArtifactType {
        type_name: String,
        type_version: String,
    },

    #[error("no artifact type is served at endpoint '{0}'")]
    UnknownEndpoint(String),

    #[error("artifact type '{type_name}' version {type_version} is already registered")]
    DuplicateType {
        type_name: String,
        type_version: String,
    },
}

/// Errors raised while parsing a semantic version
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VersionError {
    #[error("'{0}' is not a semantic version")]
    Malformed(String),

    #[error("version component '{0}' does not fit in 64 bits")]
    Overflow(String),
}

impl PluginError {
    pub fn unknown(type_name: impl Into<String>, type_version: Option<&str>) -> Self {
        Self::UnknownArtifactType {
            type_name: type_name.into(),
            type_version: type_version.unwrap_or("any").to_string(),
        }
    }
}
